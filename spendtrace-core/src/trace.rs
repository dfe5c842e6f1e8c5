use indicatif::{ProgressBar, ProgressStyle};
use spendtrace_scanner::engine::{DEFAULT_MAX_DEPTH, DEFAULT_WORKERS};
use spendtrace_scanner::ledger::{DEFAULT_BASE_URL, DEFAULT_DELAY};
use spendtrace_scanner::model::is_valid_txid;
use spendtrace_scanner::{
    GraphSnapshot, MempoolClient, TraceSummary, Tracer, UpdateEvent, UtxoRef,
};
use std::sync::Arc;
use std::time::Duration;

const PROGRESS_TICK: Duration = Duration::from_millis(100);

/// Options for configuring a trace operation
#[derive(Debug, Clone)]
pub struct TraceOptions {
    pub txid: String,
    pub vout: u32,
    pub max_depth: usize,
    pub workers: usize,
    /// Pause after every ledger call
    pub delay: Duration,
    pub base_url: String,
    pub show_progress: bool,
}

impl TraceOptions {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
            max_depth: DEFAULT_MAX_DEPTH,
            workers: DEFAULT_WORKERS,
            delay: DEFAULT_DELAY,
            base_url: DEFAULT_BASE_URL.to_string(),
            show_progress: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_txid(&self.txid) {
            return Err(format!(
                "Invalid transaction id '{}': expected 64 hex characters",
                self.txid
            ));
        }
        if self.workers == 0 {
            return Err("Worker count must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Callback for reporting trace progress
pub type TraceProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Graph and summary of a finished trace
#[derive(Debug, Clone)]
pub struct TraceOutcome {
    pub summary: TraceSummary,
    pub snapshot: GraphSnapshot,
}

/// Split `txid:vout` into its parts
pub fn parse_outpoint(outpoint: &str) -> Result<(String, u32), String> {
    let (txid, vout) = outpoint
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| format!("Expected TXID:VOUT, got '{}'", outpoint))?;

    let txid = txid.to_lowercase();
    if !is_valid_txid(&txid) {
        return Err(format!(
            "Invalid transaction id '{}': expected 64 hex characters",
            txid
        ));
    }

    let vout = vout
        .parse::<u32>()
        .map_err(|e| format!("Invalid output index '{}': {}", vout, e))?;

    Ok((txid, vout))
}

/// Render a satoshi amount as BTC with eight decimals
pub fn format_btc(sats: u64) -> String {
    format!("{}.{:08} BTC", sats / 100_000_000, sats % 100_000_000)
}

/// Secs as given on the command line (fractional, non-negative)
pub fn parse_delay(secs: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid delay '{}': {}", secs, e))
}

/// Build a tracer backed by the Esplora client described by `options`
pub fn build_tracer(options: &TraceOptions) -> Result<Tracer<MempoolClient>, String> {
    options.validate()?;

    let client = MempoolClient::with_base_url(&options.base_url)
        .map_err(|e| e.to_string())?
        .with_delay(options.delay);

    Ok(Tracer::new(client)
        .with_max_depth(options.max_depth)
        .with_workers(options.workers))
}

/// Execute a trace with the given options
/// Returns the final graph and summary
pub async fn execute_trace(
    options: TraceOptions,
    progress_callback: Option<TraceProgressCallback>,
) -> Result<TraceOutcome, String> {
    let tracer = build_tracer(&options)?;

    // Set up single spinner for overall progress (only if enabled)
    let progress_bar = if options.show_progress {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .map_err(|e| e.to_string())?,
        );
        pb.set_message("Starting trace...");
        Some(pb)
    } else {
        None
    };

    tracer.start(&options.txid, options.vout);

    loop {
        let done = tokio::time::timeout(PROGRESS_TICK, tracer.wait())
            .await
            .is_ok();

        let batch = tracer.drain_events();
        if let Some(ref callback) = progress_callback {
            for event in batch.iter() {
                match event {
                    UpdateEvent::StatusMessage { text } => callback(text.clone()),
                    UpdateEvent::UnspentNotification { text, .. } => callback(text.clone()),
                }
            }
        }
        if let Some(ref pb) = progress_bar {
            if let Some(status) = batch.latest_status() {
                pb.set_message(format!("[{} pending] {}", tracer.pending_count(), status));
            }
            pb.tick();
        }

        if done {
            break;
        }
    }

    let summary = tracer
        .summary()
        .unwrap_or_else(|| TraceSummary::new(UtxoRef::new(options.txid.as_str(), options.vout), options.max_depth));

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!(
            "Trace complete! {} outputs, {} unspent",
            summary.vertices,
            summary.findings.len()
        ));
    }

    Ok(TraceOutcome {
        summary,
        snapshot: tracer.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = TraceOptions::new("ab".repeat(32), 1);
        assert_eq!(options.max_depth, 10);
        assert_eq!(options.workers, 5);
        assert_eq!(options.delay, Duration::from_millis(200));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_reject_zero_workers() {
        let mut options = TraceOptions::new("ab".repeat(32), 0);
        options.workers = 0;
        assert!(options.validate().unwrap_err().contains("at least 1"));
    }
}
