//! Change capture from an external ordered feed.
//!
//! The feed is split into shards; each shard is an ordered sequence of
//! stream events carrying an event tag and the item images before and after
//! the change. [`Puller`] reads every shard on its own thread, decodes each
//! event into a [`Change`] and appends it to an [`AppendLog`], which fans the
//! shards back into one stream.

use super::cancel::CancelToken;
use super::log::AppendLog;
use crate::error::{Result, StoreError};
use crate::repository::table::attribute::{item_to_record, Item};
use crate::types::Change;
use crate::value::Value;
use crossbeam_channel::select;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const INSERT: &str = "INSERT";
pub const MODIFY: &str = "MODIFY";
pub const REMOVE: &str = "REMOVE";

/// One event of the external feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "eventName")]
    pub event_name: String,

    #[serde(rename = "dynamodb")]
    pub record: StreamRecord,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "SequenceNumber", default)]
    pub sequence_number: String,

    #[serde(rename = "OldImage", default, skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Item>,

    #[serde(rename = "NewImage", default, skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Item>,
}

/// Decode a stream event. The offset is left at 0 for the log to assign.
pub fn decode_event(event: &StreamEvent) -> Result<Change<Value>> {
    let image = |image: &Option<Item>, name: &str| match image {
        Some(item) => item_to_record(item),
        None => Err(StoreError::invalid_type(
            format!("{name} on {} event", event.event_name),
            "absent image",
        )),
    };
    let record = &event.record;
    Ok(match event.event_name.as_str() {
        INSERT => Change {
            before: None,
            after: Some(image(&record.new_image, "NewImage")?),
            deleted: false,
            offset: 0,
        },
        MODIFY => Change {
            before: Some(image(&record.old_image, "OldImage")?),
            after: Some(image(&record.new_image, "NewImage")?),
            deleted: false,
            offset: 0,
        },
        REMOVE => Change {
            before: Some(image(&record.old_image, "OldImage")?),
            after: None,
            deleted: true,
            offset: 0,
        },
        other => {
            return Err(StoreError::invalid_type(
                "INSERT, MODIFY or REMOVE event",
                other,
            ))
        }
    })
}

#[derive(Debug, Error)]
pub enum FeedError {
    /// The source is rate limiting; the same read may be retried later.
    #[error("throughput exceeded")]
    ThroughputExceeded,

    #[error("transport error: {0}")]
    Transport(String),
}

/// One read from a shard.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeedBatch {
    pub events: Vec<StreamEvent>,
    /// Where the next read starts; `None` once the shard is closed.
    pub next_position: Option<String>,
}

/// Ordered, sharded source of stream events.
pub trait ChangeFeed: Send + Sync {
    fn shards(&self) -> std::result::Result<Vec<String>, FeedError>;

    /// Read up to `limit` events from `position` (`None` for the start of
    /// the shard).
    fn read(
        &self,
        shard: &str,
        position: Option<&str>,
        limit: usize,
    ) -> std::result::Result<FeedBatch, FeedError>;
}

/// Configuration for [`Puller`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PullerConfig {
    /// Reads per second per shard.
    pub requests_per_second: u32,

    /// Delay before retrying a read the source throttled.
    pub throttle_backoff: Duration,

    /// Delay after a read that returned no events.
    pub empty_poll_delay: Duration,

    /// Events requested per read.
    pub batch_size: usize,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 4,
            throttle_backoff: Duration::from_secs(1),
            empty_poll_delay: Duration::from_millis(250),
            batch_size: 100,
        }
    }
}

/// Pulls a [`ChangeFeed`] into an [`AppendLog`].
pub struct Puller<F> {
    feed: F,
    config: PullerConfig,
}

impl<F: ChangeFeed> Puller<F> {
    pub fn new(feed: F, config: PullerConfig) -> Self {
        Self { feed, config }
    }

    /// Pull every shard until all of them close.
    ///
    /// Returns `Cancelled` if `cancel` fires first, or the first decode or
    /// transport error of any shard, which also stops the others. Changes of
    /// one shard reach the log in feed order.
    pub fn run(&self, log: &AppendLog<Value>, cancel: &CancelToken) -> Result<()> {
        let shards = self
            .feed
            .shards()
            .map_err(|e| StoreError::internal("list_shards", None, e))?;
        debug!(shards = shards.len(), "pulling change feed");

        let stop = CancelToken::new();
        let stop = &stop;
        let results: Vec<Result<()>> = thread::scope(|scope| {
            scope.spawn(move || {
                select! {
                    recv(cancel.receiver()) -> _ => {},
                    recv(stop.receiver()) -> _ => {},
                }
                stop.cancel();
            });

            let handles: Vec<_> = shards
                .iter()
                .map(|shard| {
                    scope.spawn(move || {
                        let result = self.pull_shard(shard, log, stop);
                        if result.is_err() {
                            stop.cancel();
                        }
                        result
                    })
                })
                .collect();

            let results = handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(StoreError::internal("pull_shard", None, "shard puller panicked"))
                    })
                })
                .collect();
            stop.cancel();
            results
        });

        for result in results {
            match result {
                Err(StoreError::Cancelled) | Ok(()) => {}
                Err(e) => return Err(e),
            }
        }
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        debug!("change feed drained");
        Ok(())
    }

    fn pull_shard(&self, shard: &str, log: &AppendLog<Value>, stop: &CancelToken) -> Result<()> {
        let interval = Duration::from_secs(1) / self.config.requests_per_second.max(1);
        let mut position: Option<String> = None;
        let mut pulled = 0usize;

        loop {
            if stop.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            let started = Instant::now();
            match self
                .feed
                .read(shard, position.as_deref(), self.config.batch_size)
            {
                Ok(batch) => {
                    for event in &batch.events {
                        log.push(decode_event(event)?);
                    }
                    pulled += batch.events.len();
                    trace!(shard, events = batch.events.len(), "read shard");

                    let Some(next) = batch.next_position else {
                        debug!(shard, pulled, "shard closed");
                        return Ok(());
                    };
                    position = Some(next);
                    if batch.events.is_empty() && !stop.sleep(self.config.empty_poll_delay) {
                        return Err(StoreError::Cancelled);
                    }
                }
                Err(FeedError::ThroughputExceeded) => {
                    warn!(
                        shard,
                        backoff_ms = self.config.throttle_backoff.as_millis() as u64,
                        "throughput exceeded, backing off"
                    );
                    if !stop.sleep(self.config.throttle_backoff) {
                        return Err(StoreError::Cancelled);
                    }
                    continue;
                }
                Err(e) => return Err(StoreError::internal("pull_shard", None, e)),
            }

            let elapsed = started.elapsed();
            if elapsed < interval && !stop.sleep(interval - elapsed) {
                return Err(StoreError::Cancelled);
            }
        }
    }
}
