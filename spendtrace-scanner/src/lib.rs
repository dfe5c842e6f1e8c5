pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod model;
pub mod pending;
pub mod result;
pub mod state;

pub use engine::{TraceHandle, Tracer};
pub use error::ScanError;
pub use events::{EventBatch, EventQueue, UpdateEvent};
pub use ledger::{Ledger, MempoolClient};
pub use model::{Edge, Finding, Outspends, TransactionDetails, TxOutput, UtxoRef, Vertex};
pub use result::TraceSummary;
pub use state::{CrawlState, GraphSnapshot};
