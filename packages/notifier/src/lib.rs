// Transfer Notification Dispatcher - Core
//
// Consumes transfer lifecycle events from the durable log, delivers signed
// callbacks to FSPs and re-emits fulfilment events for committed transfers.
//
// Pipeline: ingest -> span -> envelope -> router -> dispatch -> commit,
// with handler owning per-message bookkeeping.

pub mod cli;
pub mod commit;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod ingest;
pub mod kernel;
pub mod metrics;
pub mod router;
pub mod server;
pub mod span;

pub use config::*;
pub use error::{normalize, ErrorKind, NormalizedError, NotifierError};
pub use handler::{consume_message, process_message, DispatcherContext};
