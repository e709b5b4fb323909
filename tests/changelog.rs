//! Change log ordering, cancellation and change-feed ingestion.

use docstore::changelog::{ChangeFeed, FeedBatch, FeedError, StreamEvent};
use docstore::{
    AppendLog, CancelToken, Change, ErrorKind, MemoryRepository, Puller, PullerConfig, Record,
    Repository, UpdateRecords, Value, FROM_EARLIEST, FROM_LATEST,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn collect(
    log: &AppendLog<Value>,
    from: i64,
    cancel: &CancelToken,
) -> docstore::Result<Vec<Change<Value>>> {
    let mut changes = Vec::new();
    log.subscribe(from, cancel, |c| {
        changes.push(c.clone());
        Ok(())
    })?;
    Ok(changes)
}

fn counter(n: i32) -> Record<Value> {
    Record::new("c", "counters", Value::map([("n", Value::from(n))]))
}

#[test]
fn test_concurrent_subscribers_see_append_order() {
    let log = Arc::new(AppendLog::new());
    let repo = Arc::new(MemoryRepository::with_log(Arc::clone(&log)));

    let subscribers: Vec<_> = (0..3)
        .map(|_| {
            let log = Arc::clone(&log);
            thread::spawn(move || collect(&log, FROM_EARLIEST, &CancelToken::new()))
        })
        .collect();

    let writer = {
        let repo = Arc::clone(&repo);
        thread::spawn(move || {
            for n in 0..50 {
                let record = counter(n).with_version((n.max(1) - 1) as u16);
                repo.update_records(UpdateRecords::save(vec![record])).unwrap();
            }
        })
    };
    writer.join().unwrap();
    log.close();

    for handle in subscribers {
        let changes = handle.join().unwrap().unwrap();
        assert_eq!(changes.len(), 50);
        let offsets: Vec<i64> = changes.iter().map(|c| c.offset).collect();
        assert_eq!(offsets, (1..=50).collect::<Vec<i64>>());
        let versions: Vec<u16> = changes
            .iter()
            .filter_map(|c| c.after.as_ref().map(|r| r.version))
            .collect();
        assert_eq!(versions, (0..50).collect::<Vec<u16>>());
    }
}

#[test]
fn test_late_subscribers_replay_closed_log() {
    let log = AppendLog::new();
    for n in 0..4 {
        log.change(None, Some(counter(n)));
    }
    log.delete(counter(3));
    log.close();

    let all = collect(&log, FROM_EARLIEST, &CancelToken::new()).unwrap();
    assert_eq!(all.len(), 5);
    assert!(all[4].deleted);

    let latest = collect(&log, FROM_LATEST, &CancelToken::new()).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].offset, 5);

    let err = collect(&log, 99, &CancelToken::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OffsetNotFound);
}

#[test]
fn test_cancel_while_waiting_for_first_entry() {
    let log = Arc::new(AppendLog::<Value>::new());
    let cancel = CancelToken::new();
    let waiting = {
        let log = Arc::clone(&log);
        let cancel = cancel.clone();
        thread::spawn(move || collect(&log, FROM_EARLIEST, &cancel))
    };
    thread::sleep(Duration::from_millis(20));
    cancel.cancel();
    let err = waiting.join().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[test]
fn test_callback_error_stops_subscription() {
    let log = AppendLog::new();
    log.change(None, Some(counter(1)));
    log.change(None, Some(counter(2)));
    log.close();

    let mut seen = 0;
    let err = log
        .subscribe(FROM_EARLIEST, &CancelToken::new(), |_| {
            seen += 1;
            Err(docstore::StoreError::Serialization("rejected".into()))
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Serialization);
    assert_eq!(seen, 1);
}

/// A single closed shard of wire-format events.
struct WireFeed {
    events: Vec<StreamEvent>,
}

impl ChangeFeed for WireFeed {
    fn shards(&self) -> Result<Vec<String>, FeedError> {
        Ok(vec!["shard-0".to_string()])
    }

    fn read(
        &self,
        _shard: &str,
        position: Option<&str>,
        limit: usize,
    ) -> Result<FeedBatch, FeedError> {
        let start = position.and_then(|p| p.parse().ok()).unwrap_or(0usize);
        let end = (start + limit).min(self.events.len());
        Ok(FeedBatch {
            events: self.events[start..end].to_vec(),
            next_position: (end < self.events.len()).then(|| end.to_string()),
        })
    }
}

fn image(status: &str, version: u16) -> serde_json::Value {
    json!({
        "ID": { "S": "o1" },
        "Type": { "S": "orders" },
        "Data": { "M": { "status": { "S": status } } },
        "Version": { "N": version.to_string() }
    })
}

#[test]
fn test_feed_is_pulled_into_log() {
    let events: Vec<StreamEvent> = serde_json::from_value(json!([
        { "eventName": "INSERT", "dynamodb": { "SequenceNumber": "1", "NewImage": image("pending", 0) } },
        { "eventName": "MODIFY", "dynamodb": {
            "SequenceNumber": "2", "OldImage": image("pending", 0), "NewImage": image("shipped", 1) } },
        { "eventName": "REMOVE", "dynamodb": { "SequenceNumber": "3", "OldImage": image("shipped", 1) } }
    ]))
    .unwrap();

    let log = AppendLog::new();
    let config = PullerConfig {
        requests_per_second: 1000,
        batch_size: 2,
        ..PullerConfig::default()
    };
    Puller::new(WireFeed { events }, config)
        .run(&log, &CancelToken::new())
        .unwrap();
    log.close();

    let changes = collect(&log, FROM_EARLIEST, &CancelToken::new()).unwrap();
    assert_eq!(changes.len(), 3);
    assert!(changes[0].before.is_none());
    let shipped = changes[1].after.as_ref().unwrap();
    assert_eq!(shipped.data.get("status"), Some(&Value::from("shipped")));
    assert_eq!(shipped.version, 1);
    assert!(changes[2].deleted);
    assert_eq!(changes[2].key().map(|k| k.id), Some("o1".to_string()));
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: PullerConfig = serde_json::from_value(json!({ "batch_size": 25 })).unwrap();
    assert_eq!(config.batch_size, 25);
    assert_eq!(config.requests_per_second, 4);
}
