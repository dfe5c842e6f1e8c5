use crate::error::{Result, ScanError};
use crate::model::{Edge, Finding, UtxoRef, Vertex};
use crate::pending::PendingCounter;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

pub type SpendGraph = DiGraph<Vertex, Edge>;

/// Opaque node placement handed back by a renderer (e.g. after a drag).
pub type Position = (f32, f32);

#[derive(Debug, Default)]
struct StateInner {
    graph: SpendGraph,
    nodes: HashMap<String, NodeIndex>,
    visited: HashSet<UtxoRef>,
    findings: Vec<Finding>,
    positions: HashMap<String, Position>,
}

/// Graph, visited set and findings of one crawl cycle behind a single lock.
///
/// The lock is never held across a ledger call; every method takes it, does a
/// small amount of bookkeeping and releases it.
#[derive(Debug, Default)]
pub struct CrawlState {
    inner: Mutex<StateInner>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        // A panicking worker must not take the rest of the crawl down with it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `utxo` for processing. Exactly one caller per ref gets `true`.
    pub fn try_claim(&self, utxo: &UtxoRef) -> bool {
        let claimed = self.lock().visited.insert(utxo.clone());
        if !claimed {
            debug!("{} already claimed", utxo);
        }
        claimed
    }

    pub fn visited_count(&self) -> usize {
        self.lock().visited.len()
    }

    /// Insert a vertex unless its label is already known. An existing vertex
    /// keeps the depth it was first stored with. Returns true on insert.
    pub fn upsert_vertex(&self, utxo: &UtxoRef, label: &str, script_type: &str, depth: usize) -> bool {
        let mut inner = self.lock();
        if inner.nodes.contains_key(label) {
            return false;
        }

        let idx = inner.graph.add_node(Vertex {
            utxo: utxo.clone(),
            label: label.to_string(),
            script_type: script_type.to_string(),
            depth,
        });
        inner.nodes.insert(label.to_string(), idx);
        true
    }

    /// Insert the edge `from -> to` unless that ordered pair already exists.
    /// Both endpoints must already be vertices. Returns true on insert.
    pub fn upsert_edge(&self, from: &str, to: &str, value: u64) -> bool {
        let mut inner = self.lock();
        let (Some(&a), Some(&b)) = (inner.nodes.get(from), inner.nodes.get(to)) else {
            warn!("Edge {} -> {} references an unknown vertex", from, to);
            return false;
        };

        if inner.graph.find_edge(a, b).is_some() {
            return false;
        }

        inner.graph.add_edge(
            a,
            b,
            Edge {
                from: from.to_string(),
                to: to.to_string(),
                value,
            },
        );
        true
    }

    pub fn record_finding(&self, finding: Finding) {
        self.lock().findings.push(finding);
    }

    pub fn set_position(&self, label: &str, position: Position) {
        self.lock().positions.insert(label.to_string(), position);
    }

    /// Consistent copy of everything a renderer needs, taken under one lock.
    pub fn snapshot(&self) -> GraphSnapshot {
        let inner = self.lock();
        let depths = inner
            .graph
            .node_weights()
            .map(|v| (v.label.clone(), v.depth))
            .collect();

        GraphSnapshot {
            graph: inner.graph.clone(),
            depths,
            findings: inner.findings.clone(),
            positions: inner.positions.clone(),
        }
    }

    /// Clear the cycle. Refused while any unit of work is still pending.
    pub fn reset(&self, pending: &PendingCounter) -> Result<()> {
        let outstanding = pending.count();
        if outstanding != 0 {
            return Err(ScanError::StateBusy(outstanding));
        }

        let mut inner = self.lock();
        *inner = StateInner::default();
        pending.reset();
        Ok(())
    }
}

/// Read-only view of the spend graph at one instant.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub graph: SpendGraph,
    pub depths: HashMap<String, usize>,
    pub findings: Vec<Finding>,
    pub positions: HashMap<String, Position>,
}

impl GraphSnapshot {
    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.graph.node_weights()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    pub fn vertex(&self, label: &str) -> Option<&Vertex> {
        self.graph.node_weights().find(|v| v.label == label)
    }

    pub fn depth(&self, label: &str) -> Option<usize> {
        self.depths.get(label).copied()
    }

    pub fn max_depth(&self) -> usize {
        self.depths.values().copied().max().unwrap_or(0)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.graph
            .edge_weights()
            .any(|e| e.from == from && e.to == to)
    }

    /// Edges pointing at `label`.
    pub fn incoming(&self, label: &str) -> Vec<&Edge> {
        match self.graph.node_indices().find(|&i| self.graph[i].label == label) {
            Some(idx) => self
                .graph
                .edges_directed(idx, petgraph::Direction::Incoming)
                .map(|e| e.weight())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Vertices ordered by depth, then label, for stable listings.
    pub fn vertices_by_depth(&self) -> Vec<&Vertex> {
        let mut vertices: Vec<&Vertex> = self.graph.node_weights().collect();
        vertices.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.label.cmp(&b.label)));
        vertices
    }
}
