//! Change capture.
//!
//! - [`AppendLog`]: in-process ordered, replayable change feed with any
//!   number of independent subscribers.
//! - [`cdc`]: decodes an external ordered change feed into the same
//!   [`Change`](crate::types::Change) representation and pulls it into an
//!   `AppendLog`.
//!
//! # Example
//!
//! ```ignore
//! let log = Arc::new(AppendLog::new());
//! let cancel = CancelToken::new();
//!
//! log.subscribe(FROM_EARLIEST, &cancel, |change| {
//!     println!("{:?} at {}", change.key(), change.offset);
//!     Ok(())
//! })?;
//! ```

mod cancel;
pub mod cdc;
mod log;

pub use cancel::CancelToken;
pub use cdc::{decode_event, ChangeFeed, FeedBatch, FeedError, Puller, PullerConfig, StreamEvent};
pub use log::{AppendLog, FROM_EARLIEST, FROM_LATEST};
