//! In-process, multi-subscriber, offset-addressable change log.

use super::cancel::CancelToken;
use crate::error::{Result, StoreError};
use crate::types::{Change, Record};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Start at the earliest retained entry.
pub const FROM_EARLIEST: i64 = 0;

/// Start at the latest entry present when subscribing.
pub const FROM_LATEST: i64 = -1;

/// First offset handed out; 0 and -1 are reserved for the start markers.
const FIRST_OFFSET: i64 = 1;

struct LogState<T> {
    /// Every entry ever appended, in order. Never truncated.
    entries: Vec<Arc<Change<T>>>,
    next_offset: i64,
    closed: bool,
    /// One channel per live subscription.
    subscribers: Vec<Sender<Arc<Change<T>>>>,
}

/// Ordered, replayable change feed.
///
/// Appends fan out to one queue per subscriber. Registration and the backlog
/// snapshot happen under the same lock as appends, so a subscriber never
/// misses or duplicates an entry.
///
/// Lifecycle is `Open -> Closed`. Closing is irreversible; subscribers drain
/// what was appended and then return cleanly.
pub struct AppendLog<T> {
    state: Mutex<LogState<T>>,
}

impl<T> AppendLog<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                next_offset: FIRST_OFFSET,
                closed: false,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Record an insert or update; returns the assigned offset.
    ///
    /// # Panics
    ///
    /// Panics if the log is closed.
    pub fn change(&self, before: Option<Record<T>>, after: Option<Record<T>>) -> i64 {
        self.push(Change {
            before,
            after,
            deleted: false,
            offset: 0,
        })
    }

    /// Record a deletion; returns the assigned offset.
    ///
    /// # Panics
    ///
    /// Panics if the log is closed.
    pub fn delete(&self, record: Record<T>) -> i64 {
        self.push(Change {
            before: Some(record),
            after: None,
            deleted: true,
            offset: 0,
        })
    }

    /// Append a change, overwriting its offset with the next log position.
    ///
    /// # Panics
    ///
    /// Panics if the log is closed.
    pub fn push(&self, mut change: Change<T>) -> i64 {
        let mut state = self.state.lock();
        assert!(!state.closed, "append to a closed AppendLog");

        let offset = state.next_offset;
        state.next_offset += 1;
        change.offset = offset;

        let entry = Arc::new(change);
        state.entries.push(Arc::clone(&entry));
        state
            .subscribers
            .retain(|tx| tx.send(Arc::clone(&entry)).is_ok());
        trace!(offset, "appended change");
        offset
    }

    /// Close the log. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            // Dropping the senders lets drained subscribers return.
            state.subscribers.clear();
            debug!(entries = state.entries.len(), "change log closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver entries to `callback` in append order.
    ///
    /// Blocks until at least one entry exists. `from` selects the first entry:
    /// [`FROM_EARLIEST`], [`FROM_LATEST`] (latest at subscribe time), or an
    /// exact offset (`OffsetNotFound` if no entry has it). Afterwards blocks
    /// between entries until the next append or close; returns `Ok(())` once
    /// the log is closed and drained, `Cancelled` when `cancel` fires, or the
    /// first error returned by `callback`.
    pub fn subscribe<F>(&self, from: i64, cancel: &CancelToken, mut callback: F) -> Result<()>
    where
        F: FnMut(&Change<T>) -> Result<()>,
    {
        let (rx, mut pending) = {
            let (tx, rx) = unbounded();
            let mut state = self.state.lock();
            if !state.closed {
                state.subscribers.push(tx);
            }
            let backlog: VecDeque<Arc<Change<T>>> = state.entries.iter().cloned().collect();
            (rx, backlog)
        };
        let backlog_len = pending.len();

        if pending.is_empty() {
            match next_entry(&rx, cancel)? {
                Some(first) => pending.push_back(first),
                None => return Ok(()),
            }
        }

        let start = match from {
            FROM_EARLIEST => 0,
            FROM_LATEST => backlog_len.saturating_sub(1),
            offset => pending
                .iter()
                .position(|c| c.offset == offset)
                .ok_or(StoreError::OffsetNotFound(offset))?,
        };
        pending.drain(..start);
        debug!(from, start_offset = ?pending.front().map(|c| c.offset), "subscription started");

        for entry in pending {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            callback(&entry)?;
        }

        while let Some(entry) = next_entry(&rx, cancel)? {
            callback(&entry)?;
        }
        debug!("subscription drained closed log");
        Ok(())
    }
}

impl<T> Default for AppendLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the next entry; `None` once the log is closed and drained.
fn next_entry<T>(
    rx: &Receiver<Arc<Change<T>>>,
    cancel: &CancelToken,
) -> Result<Option<Arc<Change<T>>>> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    select! {
        recv(rx) -> msg => Ok(msg.ok()),
        recv(cancel.receiver()) -> _ => Err(StoreError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::thread;
    use std::time::Duration;

    fn rec(id: &str, n: i32) -> Record<i32> {
        Record::new(id, "t", n)
    }

    fn drain(log: &AppendLog<i32>, from: i64) -> Result<Vec<i64>> {
        let mut offsets = Vec::new();
        log.subscribe(from, &CancelToken::new(), |c| {
            offsets.push(c.offset);
            Ok(())
        })?;
        Ok(offsets)
    }

    #[test]
    fn test_offsets_start_at_one() {
        let log = AppendLog::new();
        assert_eq!(log.change(None, Some(rec("a", 1))), 1);
        assert_eq!(log.delete(rec("a", 1)), 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_closed_log_drains_for_every_subscriber() {
        let log = AppendLog::new();
        for i in 0..5 {
            log.change(None, Some(rec("a", i)));
        }
        log.close();

        assert_eq!(drain(&log, FROM_EARLIEST).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(drain(&log, FROM_EARLIEST).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(drain(&log, FROM_LATEST).unwrap(), vec![5]);
        assert_eq!(drain(&log, 3).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn test_unknown_offset() {
        let log = AppendLog::new();
        log.change(None, Some(rec("a", 1)));
        log.close();
        let err = drain(&log, 42).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OffsetNotFound);
    }

    #[test]
    fn test_closed_empty_log_returns_immediately() {
        let log = AppendLog::<i32>::new();
        log.close();
        assert_eq!(drain(&log, FROM_EARLIEST).unwrap(), Vec::<i64>::new());
    }

    #[test]
    #[should_panic(expected = "closed")]
    fn test_append_after_close_panics() {
        let log = AppendLog::new();
        log.close();
        log.change(None, Some(rec("a", 1)));
    }

    #[test]
    fn test_live_delivery_in_order() {
        let log = Arc::new(AppendLog::new());
        let reader = {
            let log = Arc::clone(&log);
            thread::spawn(move || drain(&log, FROM_EARLIEST))
        };
        let writer = {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for i in 0..100 {
                    log.change(None, Some(rec("a", i)));
                }
                log.close();
            })
        };
        writer.join().unwrap();
        let offsets = reader.join().unwrap().unwrap();
        assert_eq!(offsets, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_while_waiting_for_first_entry() {
        let log = Arc::new(AppendLog::<i32>::new());
        let cancel = CancelToken::new();
        let handle = {
            let log = Arc::clone(&log);
            let cancel = cancel.clone();
            thread::spawn(move || log.subscribe(FROM_EARLIEST, &cancel, |_| Ok(())))
        };
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_cancel_between_entries() {
        let log = Arc::new(AppendLog::new());
        log.change(None, Some(rec("a", 1)));
        let cancel = CancelToken::new();
        let (seen_tx, seen_rx) = crossbeam_channel::bounded(1);
        let handle = {
            let log = Arc::clone(&log);
            let cancel = cancel.clone();
            thread::spawn(move || {
                log.subscribe(FROM_EARLIEST, &cancel, |c| {
                    let _ = seen_tx.send(c.offset);
                    Ok(())
                })
            })
        };
        assert_eq!(seen_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        cancel.cancel();
        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_callback_error_stops_subscription() {
        let log = AppendLog::new();
        log.change(None, Some(rec("a", 1)));
        log.change(None, Some(rec("a", 2)));
        log.close();
        let mut calls = 0;
        let result = log.subscribe(FROM_EARLIEST, &CancelToken::new(), |_| {
            calls += 1;
            Err(StoreError::EmptyCommand)
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
