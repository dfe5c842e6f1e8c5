// Report generation from a finished trace

use crate::trace::format_btc;
use colored::Colorize;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use spendtrace_scanner::{GraphSnapshot, TraceSummary, UtxoRef};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Dot,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "dot" | "graphviz" => Some(ReportFormat::Dot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub start: String,
    pub max_depth: usize,
    pub generated_at: i64,
    pub vertices: Vec<VertexData>,
    pub edges: Vec<EdgeData>,
    pub findings: Vec<FindingData>,
    pub summary: SummaryData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexData {
    pub label: String,
    pub txid: String,
    pub vout: u32,
    pub script_type: String,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeData {
    pub from: String,
    pub to: String,
    pub sats: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingData {
    pub label: String,
    pub txid: String,
    pub vout: u32,
    pub script_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryData {
    pub total_vertices: usize,
    pub total_edges: usize,
    pub total_unspent: usize,
    pub units_processed: usize,
    pub failed_units: usize,
    pub depth_cutoffs: usize,
    pub elapsed_ms: u128,
    pub stopped: bool,
}

/// Collect everything a report needs from the trace summary and final graph.
pub fn build_report_data(summary: &TraceSummary, snapshot: &GraphSnapshot) -> ReportData {
    let vertices: Vec<VertexData> = snapshot
        .vertices_by_depth()
        .into_iter()
        .map(|v| VertexData {
            label: v.label.clone(),
            txid: v.utxo.txid.clone(),
            vout: v.utxo.vout,
            script_type: v.script_type.clone(),
            depth: v.depth,
        })
        .collect();

    let mut edges: Vec<EdgeData> = snapshot
        .edges()
        .map(|e| EdgeData {
            from: e.from.clone(),
            to: e.to.clone(),
            sats: e.value,
        })
        .collect();
    edges.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to)));

    let mut findings: Vec<FindingData> = summary
        .findings
        .iter()
        .map(|f| FindingData {
            label: f.label.clone(),
            txid: f.utxo.txid.clone(),
            vout: f.utxo.vout,
            script_type: f.script_type.clone(),
            depth: snapshot.depth(&f.label),
        })
        .collect();
    findings.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.label.cmp(&b.label)));

    ReportData {
        start: summary.start.to_string(),
        max_depth: summary.max_depth,
        generated_at: chrono::Utc::now().timestamp(),
        summary: SummaryData {
            total_vertices: vertices.len(),
            total_edges: edges.len(),
            total_unspent: findings.len(),
            units_processed: summary.units_processed,
            failed_units: summary.failed_units,
            depth_cutoffs: summary.depth_cutoffs,
            elapsed_ms: summary.elapsed.as_millis(),
            stopped: summary.stopped,
        },
        vertices,
        edges,
        findings,
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    // Header
    report.push_str(RULE);
    report.push_str("                           SPENDTRACE SPEND CHAIN REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Start Output: {}\n", data.start));
    report.push_str(&format!("Max Depth:    {}\n", data.max_depth));
    report.push_str(&format!("Generated:    {}\n", format_timestamp(data.generated_at)));
    report.push_str(&format!(
        "Duration:     {:.2} seconds\n",
        data.summary.elapsed_ms as f64 / 1000.0
    ));
    report.push_str(&format!("Status:       {}\n", data.status_to_string()));
    report.push('\n');

    // Summary
    report.push_str(RULE);
    report.push_str("SUMMARY\n");
    report.push_str(RULE);
    report.push('\n');
    report.push_str(&format!("Outputs Traced:   {}\n", data.summary.total_vertices));
    report.push_str(&format!("Spend Edges:      {}\n", data.summary.total_edges));
    report.push_str(&format!("Unspent Outputs:  {}\n", data.summary.total_unspent));
    report.push_str(&format!("Units Processed:  {}\n", data.summary.units_processed));
    if data.summary.failed_units > 0 {
        report.push_str(&format!("Failed Lookups:   {}\n", data.summary.failed_units));
    }
    if data.summary.depth_cutoffs > 0 {
        report.push_str(&format!(
            "Depth Cutoffs:    {}  (spent beyond depth {})\n",
            data.summary.depth_cutoffs, data.max_depth
        ));
    }
    report.push('\n');

    // Outputs by depth
    if !data.vertices.is_empty() {
        report.push_str(RULE);
        report.push_str("OUTPUTS BY DEPTH\n");
        report.push_str(RULE);
        report.push('\n');

        let mut by_depth: BTreeMap<usize, Vec<&VertexData>> = BTreeMap::new();
        for vertex in &data.vertices {
            by_depth.entry(vertex.depth).or_default().push(vertex);
        }

        for (depth, vertices) in by_depth {
            report.push_str(&format!(
                "{} {} output(s)\n",
                depth_marker(depth, data.deepest()),
                vertices.len()
            ));
            for vertex in vertices {
                report.push_str(&format!("  {}\n", vertex.short_label()));
                report.push_str(&format!("      {}:{}\n", vertex.txid, vertex.vout));
            }
            report.push('\n');
        }
    }

    // Edges
    if !data.edges.is_empty() {
        report.push_str(RULE);
        report.push_str("SPENDS\n");
        report.push_str(RULE);
        report.push('\n');

        let names: HashMap<&str, String> = data
            .vertices
            .iter()
            .map(|v| (v.label.as_str(), v.short_label()))
            .collect();
        let name = |label: &str| names.get(label).cloned().unwrap_or_else(|| label.to_string());

        for edge in &data.edges {
            report.push_str(&format!(
                "  {}  ->  {}  [{}]\n",
                name(&edge.from),
                name(&edge.to),
                format_btc(edge.sats)
            ));
        }
        report.push('\n');
    }

    // Findings
    report.push_str(RULE);
    report.push_str("UNSPENT OUTPUTS\n");
    report.push_str(RULE);
    report.push('\n');

    if data.findings.is_empty() {
        report.push_str("No unspent outputs found within the depth limit.\n\n");
    } else {
        for (idx, finding) in data.findings.iter().enumerate() {
            report.push_str(&format!("[{}] {}\n", idx + 1, finding.short_label()));
            report.push_str(&format!("Outpoint:     {}:{}\n", finding.txid, finding.vout));
            report.push_str(&format!("Script Type:  {}\n", finding.script_type));
            if let Some(depth) = finding.depth {
                report.push_str(&format!("Depth:        {}\n", depth));
            }
            report.push_str(
                "────────────────────────────────────────────────────────────────────────────────\n",
            );
        }
        report.push('\n');
    }

    // Footer
    report.push_str(RULE);
    report.push_str("                          End of Report\n");
    report.push_str(RULE);
    report.push_str("\nGenerated by spendtrace\n\n");

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "spendtrace",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": format_iso8601_timestamp(data.generated_at),
                "format": "json"
            },
            "trace": {
                "start": data.start,
                "max_depth": data.max_depth,
                "status": data.status_to_string(),
            },
            "summary": data.summary,
            "vertices": data.vertices,
            "edges": data.edges,
            "findings": data.findings
        }
    });

    serde_json::to_string_pretty(&json_report)
}

/// Graphviz DOT rendering of the spend graph.
///
/// Nodes are filled by depth relative to the deepest output reached and
/// unspent outputs get a double border. Edge labels carry the amount in BTC.
pub fn generate_dot_report(data: &ReportData) -> String {
    let mut graph: DiGraph<&VertexData, &EdgeData> = DiGraph::new();
    let mut nodes = HashMap::new();
    for vertex in &data.vertices {
        nodes.insert(vertex.label.as_str(), graph.add_node(vertex));
    }
    for edge in &data.edges {
        if let (Some(&from), Some(&to)) = (nodes.get(edge.from.as_str()), nodes.get(edge.to.as_str()))
        {
            graph.add_edge(from, to, edge);
        }
    }

    let unspent: Vec<&str> = data.findings.iter().map(|f| f.label.as_str()).collect();
    let max_depth = data.deepest();

    format!(
        "{:?}",
        Dot::with_attr_getters(
            &graph,
            &[Config::EdgeNoLabel, Config::NodeNoLabel],
            &|_, edge| format!("label = {:?}", format_btc(edge.weight().sats)),
            &|_, (_, vertex)| {
                let mut attrs = format!(
                    "label = {:?}, style = filled, fillcolor = \"{}\"",
                    vertex.short_label(),
                    depth_hsv(vertex.depth, max_depth)
                );
                if unspent.contains(&vertex.label.as_str()) {
                    attrs.push_str(", peripheries = 2");
                }
                attrs
            },
        )
    )
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

// Helper functions
impl VertexData {
    pub fn short_label(&self) -> String {
        UtxoRef::new(self.txid.as_str(), self.vout).short_label(&self.script_type)
    }
}

impl FindingData {
    pub fn short_label(&self) -> String {
        UtxoRef::new(self.txid.as_str(), self.vout).short_label(&self.script_type)
    }
}

impl ReportData {
    /// Depth of the deepest output in the graph, used to scale depth colours.
    pub fn deepest(&self) -> usize {
        self.vertices.iter().map(|v| v.depth).max().unwrap_or(0)
    }

    fn status_to_string(&self) -> &str {
        if self.summary.stopped {
            "Stopped"
        } else if self.summary.failed_units > 0 {
            "Completed with errors"
        } else {
            "Completed"
        }
    }
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    let datetime = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now);
    datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_iso8601_timestamp(timestamp: i64) -> String {
    use chrono::{DateTime, Utc};
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

/// 0.0 at the start output, 1.0 at the deepest output.
fn depth_ratio(depth: usize, max_depth: usize) -> f32 {
    (depth as f32 / max_depth.max(1) as f32).clamp(0.0, 1.0)
}

/// Dark violet near the start through to yellow at the deepest output.
fn depth_hsv(depth: usize, max_depth: usize) -> String {
    let ratio = depth_ratio(depth, max_depth);
    let hue = 0.75 - 0.62 * ratio;
    let value = 0.55 + 0.45 * ratio;
    format!("{:.3} 0.850 {:.3}", hue, value)
}

fn depth_marker(depth: usize, max_depth: usize) -> String {
    let marker = format!("[depth {}]", depth);
    let ratio = depth_ratio(depth, max_depth);
    if ratio < 0.34 {
        marker.purple().bold().to_string()
    } else if ratio < 0.67 {
        marker.magenta().bold().to_string()
    } else {
        marker.yellow().bold().to_string()
    }
}
