// Include handlers module directly from handlers.rs
#[path = "handlers.rs"]
pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    build_trace_options, log_level, parse_report_format, render_report, resolve_output_path,
    write_report,
};

// Re-export trace functionality from spendtrace-core
pub use spendtrace_core::trace::{
    TraceOptions, TraceOutcome, TraceProgressCallback, execute_trace, parse_outpoint,
};
