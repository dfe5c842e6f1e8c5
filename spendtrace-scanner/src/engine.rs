use crate::error::Result;
use crate::events::{EventBatch, EventQueue, UpdateEvent};
use crate::ledger::Ledger;
use crate::model::{Finding, TransactionDetails, UtxoRef};
use crate::pending::PendingCounter;
use crate::result::TraceSummary;
use crate::state::{CrawlState, GraphSnapshot, Position};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// One output to examine, at the depth it was discovered.
///
/// `prefetched` carries the transaction when the parent unit already fetched it
/// while expanding, so the child does not ask the ledger twice.
#[derive(Debug, Clone)]
struct WorkUnit {
    utxo: UtxoRef,
    depth: usize,
    prefetched: Option<Arc<TransactionDetails>>,
}

#[derive(Debug, Default)]
struct CrawlStats {
    units: AtomicUsize,
    failures: AtomicUsize,
    cutoffs: AtomicUsize,
}

impl CrawlStats {
    fn clear(&self) {
        self.units.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.cutoffs.store(0, Ordering::Relaxed);
    }
}

/// Everything a running unit of work touches.
struct UnitContext<L: Ledger> {
    ledger: Arc<L>,
    state: Arc<CrawlState>,
    events: Arc<EventQueue>,
    pending: Arc<PendingCounter>,
    permits: Arc<Semaphore>,
    stopped: Arc<AtomicBool>,
    stats: Arc<CrawlStats>,
    max_depth: usize,
}

impl<L: Ledger> UnitContext<L> {
    /// Hand a unit of work to the pool. Refused once a stop was requested.
    fn submit(self: &Arc<Self>, unit: WorkUnit) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            debug!("Stop requested, not scheduling {}", unit.utxo);
            return false;
        }

        let guard = self.pending.acquire();
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            // Released on every way out of this task, unwinding included.
            let _guard = guard;

            let Ok(_permit) = Arc::clone(&ctx.permits).acquire_owned().await else {
                return;
            };
            if ctx.stopped.load(Ordering::Acquire) {
                debug!("Stop requested, dropping queued {}", unit.utxo);
                return;
            }

            let utxo = unit.utxo.clone();
            let outcome = AssertUnwindSafe(Arc::clone(&ctx).process(unit))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                ctx.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Worker fault while tracing {}", utxo);
                ctx.events
                    .publish(UpdateEvent::status(format!("Worker fault while tracing {}", utxo)));
            }
        });
        true
    }

    async fn process(self: Arc<Self>, unit: WorkUnit) {
        let WorkUnit {
            utxo,
            depth,
            prefetched,
        } = unit;

        self.stats.units.fetch_add(1, Ordering::Relaxed);
        debug!("Tracing {} at depth {}", utxo, depth);
        self.events.publish(UpdateEvent::status(format!(
            "Tracing {} at depth {}",
            utxo, depth
        )));

        let tx = match prefetched {
            Some(tx) => tx,
            None => match self.ledger.fetch_transaction(&utxo.txid).await {
                Ok(tx) => Arc::new(tx),
                Err(e) => return self.abandon(&utxo, "transaction", &e.to_string()),
            },
        };

        let script_type = match tx.script_type(utxo.vout) {
            Ok(script_type) => script_type.to_string(),
            Err(e) => {
                warn!("{}", e);
                "unknown".to_string()
            }
        };
        let label = utxo.label(&script_type);
        self.state.upsert_vertex(&utxo, &label, &script_type, depth);

        let outspends = match self.ledger.fetch_outspends(&utxo.txid).await {
            Ok(outspends) => outspends,
            Err(e) => return self.abandon(&utxo, "spend status", &e.to_string()),
        };

        let Some(spender) = outspends.spender(utxo.vout) else {
            info!("{} is unspent", utxo);
            self.state.record_finding(Finding {
                utxo: utxo.clone(),
                label: label.clone(),
                script_type,
            });
            let text = format!("Unspent output found: {}", utxo);
            self.events.publish(UpdateEvent::unspent(label, text));
            return;
        };
        let spender = spender.to_string();

        if depth + 1 > self.max_depth {
            self.stats.cutoffs.fetch_add(1, Ordering::Relaxed);
            debug!("Depth limit reached at {}, spender {} not expanded", utxo, spender);
            self.events.publish(UpdateEvent::status(format!(
                "Depth limit {} reached: {} is spent by {} (not expanded)",
                self.max_depth, label, spender
            )));
            return;
        }

        let spending_tx = match self.ledger.fetch_transaction(&spender).await {
            Ok(tx) => Arc::new(tx),
            Err(e) => return self.abandon(&utxo, "spending transaction", &e.to_string()),
        };

        let mut scheduled = 0;
        for output in &spending_tx.outputs {
            let child = UtxoRef::new(spender.as_str(), output.index);
            let child_label = child.label(&output.script_type);

            let claimed = self.state.try_claim(&child);
            self.state
                .upsert_vertex(&child, &child_label, &output.script_type, depth + 1);
            self.state.upsert_edge(&label, &child_label, output.value);

            if claimed
                && self.submit(WorkUnit {
                    utxo: child,
                    depth: depth + 1,
                    prefetched: Some(Arc::clone(&spending_tx)),
                })
            {
                scheduled += 1;
            }
        }

        debug!(
            "{} spent by {}: {} outputs, {} scheduled",
            utxo,
            spender,
            spending_tx.outputs.len(),
            scheduled
        );
    }

    fn abandon(&self, utxo: &UtxoRef, what: &str, reason: &str) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        warn!("Abandoning {}: failed to fetch {}: {}", utxo, what, reason);
        self.events.publish(UpdateEvent::status(format!(
            "Failed to fetch {} for {}: {}",
            what, utxo, reason
        )));
    }
}

/// Renderer-side view of a running crawl: snapshots, events and progress.
#[derive(Clone)]
pub struct TraceHandle {
    state: Arc<CrawlState>,
    events: Arc<EventQueue>,
    pending: Arc<PendingCounter>,
    stopped: Arc<AtomicBool>,
}

impl TraceHandle {
    pub fn snapshot(&self) -> GraphSnapshot {
        self.state.snapshot()
    }

    pub fn drain_events(&self) -> EventBatch {
        self.events.drain_all()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_complete()
    }

    pub fn set_position(&self, label: &str, position: Position) {
        self.state.set_position(label, position);
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub async fn wait(&self) {
        self.pending.wait_idle().await;
    }
}

/// Depth-bounded crawl of the spend chain that starts at one output.
///
/// Units of work run on a pool of `workers` concurrent tasks; each unit may
/// submit further units for the outputs it discovers.
pub struct Tracer<L: Ledger> {
    ledger: Arc<L>,
    state: Arc<CrawlState>,
    events: Arc<EventQueue>,
    pending: Arc<PendingCounter>,
    stopped: Arc<AtomicBool>,
    stats: Arc<CrawlStats>,
    permits: Arc<Semaphore>,
    max_depth: usize,
    workers: usize,
    cycle: Mutex<Option<(UtxoRef, Instant)>>,
}

impl<L: Ledger> Tracer<L> {
    pub fn new(ledger: L) -> Self {
        Self {
            ledger: Arc::new(ledger),
            state: Arc::new(CrawlState::new()),
            events: Arc::new(EventQueue::new()),
            pending: PendingCounter::new(),
            stopped: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(CrawlStats::default()),
            permits: Arc::new(Semaphore::new(DEFAULT_WORKERS)),
            max_depth: DEFAULT_MAX_DEPTH,
            workers: DEFAULT_WORKERS,
            cycle: Mutex::new(None),
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self.permits = Arc::new(Semaphore::new(self.workers));
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn handle(&self) -> TraceHandle {
        TraceHandle {
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
            pending: Arc::clone(&self.pending),
            stopped: Arc::clone(&self.stopped),
        }
    }

    fn context(&self) -> Arc<UnitContext<L>> {
        Arc::new(UnitContext {
            ledger: Arc::clone(&self.ledger),
            state: Arc::clone(&self.state),
            events: Arc::clone(&self.events),
            pending: Arc::clone(&self.pending),
            permits: Arc::clone(&self.permits),
            stopped: Arc::clone(&self.stopped),
            stats: Arc::clone(&self.stats),
            max_depth: self.max_depth,
        })
    }

    /// Begin crawling from `txid:vout` and return without waiting.
    ///
    /// Returns false (and schedules nothing) if that output was already
    /// claimed in this cycle or a stop was requested. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self, txid: &str, vout: u32) -> bool {
        let utxo = UtxoRef::new(txid, vout);
        if self.is_stopped() {
            info!("Stop requested, not starting trace of {}", utxo);
            return false;
        }
        if !self.state.try_claim(&utxo) {
            info!("{} already visited, nothing to do", utxo);
            return false;
        }

        info!(
            "Starting trace of {} (max depth {}, {} workers)",
            utxo, self.max_depth, self.workers
        );
        *self.cycle.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((utxo.clone(), Instant::now()));

        self.context().submit(WorkUnit {
            utxo,
            depth: 0,
            prefetched: None,
        })
    }

    /// Wait until no unit of work is outstanding.
    pub async fn wait(&self) {
        self.pending.wait_idle().await;
    }

    /// Crawl from `txid:vout` to completion.
    pub async fn trace(&self, txid: &str, vout: u32) -> TraceSummary {
        self.start(txid, vout);
        self.wait().await;

        let summary = self.summary().unwrap_or_else(|| {
            TraceSummary::new(UtxoRef::new(txid, vout), self.max_depth)
        });
        info!(
            "Trace complete. {} vertices, {} edges, {} unspent",
            summary.vertices,
            summary.edges,
            summary.findings.len()
        );
        summary
    }

    /// Cooperative stop: nothing new is scheduled, in-flight calls finish.
    pub fn stop(&self) {
        info!("Stop requested");
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.count()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_complete()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.state.snapshot()
    }

    pub fn drain_events(&self) -> EventBatch {
        self.events.drain_all()
    }

    /// Summary of the current cycle, if one was started.
    pub fn summary(&self) -> Option<TraceSummary> {
        let (start, started_at) = self
            .cycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;

        let snapshot = self.state.snapshot();
        let mut summary = TraceSummary::new(start, self.max_depth);
        summary.vertices = snapshot.vertex_count();
        summary.edges = snapshot.edge_count();
        summary.findings = snapshot.findings;
        summary.units_processed = self.stats.units.load(Ordering::Relaxed);
        summary.failed_units = self.stats.failures.load(Ordering::Relaxed);
        summary.depth_cutoffs = self.stats.cutoffs.load(Ordering::Relaxed);
        summary.elapsed = started_at.elapsed();
        summary.stopped = self.is_stopped();
        Some(summary)
    }

    /// Clear graph, visited set, findings and queued events for a new cycle.
    /// Fails while units of work are still pending.
    pub fn reset(&self) -> Result<()> {
        self.state.reset(&self.pending)?;
        self.events.drain_all();
        self.stats.clear();
        self.stopped.store(false, Ordering::Release);
        *self.cycle.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
