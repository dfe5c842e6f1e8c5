use spendtrace_core::report::{
    ReportFormat, build_report_data, generate_dot_report, generate_json_report,
    generate_text_report, save_report,
};
use spendtrace_core::trace::{TraceOptions, TraceOutcome, parse_delay, parse_outpoint};
use std::path::{Path, PathBuf};
use tracing::level_filters::LevelFilter;

// Helper functions for the trace handler

/// Assemble trace options from the raw command line values
pub fn build_trace_options(
    outpoint: &str,
    max_depth: usize,
    workers: usize,
    delay_secs: f64,
    base_url: &str,
) -> Result<TraceOptions, String> {
    let (txid, vout) = parse_outpoint(outpoint)?;

    let mut options = TraceOptions::new(txid, vout);
    options.max_depth = max_depth;
    options.workers = workers;
    options.delay = parse_delay(delay_secs)?;
    options.base_url = base_url.to_string();
    options.validate()?;

    Ok(options)
}

/// Expand `~` and environment variables in a user supplied path
pub fn resolve_output_path(raw: &str) -> Result<PathBuf, String> {
    let expanded = shellexpand::full(raw)
        .map_err(|e| format!("Failed to expand output path {}: {}", raw, e))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

pub fn parse_report_format(format: &str) -> Result<ReportFormat, String> {
    ReportFormat::from_str(format).ok_or_else(|| format!("Unknown report format '{}'", format))
}

/// Render the finished trace in the requested format
pub fn render_report(outcome: &TraceOutcome, format: ReportFormat) -> Result<String, String> {
    let data = build_report_data(&outcome.summary, &outcome.snapshot);
    match format {
        ReportFormat::Text => Ok(generate_text_report(&data)),
        ReportFormat::Json => generate_json_report(&data)
            .map_err(|e| format!("Failed to serialise JSON report: {}", e)),
        ReportFormat::Dot => Ok(generate_dot_report(&data)),
    }
}

/// Write the report to `output`, or to stdout when no path was given
pub fn write_report(content: &str, output: Option<&Path>) -> Result<(), String> {
    match output {
        Some(path) => save_report(content, path)
            .map_err(|e| format!("Failed to write report to {}: {}", path.display(), e)),
        None => {
            print!("{}", content);
            Ok(())
        }
    }
}

/// `-v` count to log verbosity; warnings only by default
pub fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

// Re-export trace types and functions from spendtrace-core
pub use spendtrace_core::trace::{
    TraceProgressCallback, build_tracer, execute_trace, format_btc,
};
