//! Bounded history of request outcomes.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::domain::node::NodeId;
use crate::domain::request::RequestType;

/// One observed request outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    /// Node that served the request.
    pub node_id: NodeId,
    /// Whether the request succeeded.
    pub success: bool,
    /// Observed response time.
    pub response_time_ms: f64,
    /// Request type that was served.
    pub request_type: RequestType,
    /// Unix millis when the outcome was recorded.
    pub timestamp_ms: u64,
}

/// Aggregates over the retained history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeedbackSummary {
    /// Records in the history.
    pub total: usize,
    /// Successful records in the history.
    pub successes: usize,
    /// Mean response time over all records, `0.0` when empty.
    pub avg_response_time_ms: f64,
}

/// Ring buffer of feedback records with high and low watermarks.
///
/// Once a push takes the log above `capacity`, the oldest records are
/// drained in place until only `retain` remain.
#[derive(Debug)]
pub struct FeedbackLog {
    records: Mutex<VecDeque<FeedbackRecord>>,
    capacity: usize,
    retain: usize,
}

impl FeedbackLog {
    /// An empty log. `retain` is clamped into `1..=capacity`.
    pub fn new(capacity: usize, retain: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity,
            retain: retain.clamp(1, capacity),
        }
    }

    /// Append a record. Returns how many old records were evicted.
    pub fn push(&self, record: FeedbackRecord) -> usize {
        let mut records = self.records.lock();
        records.push_back(record);
        if records.len() <= self.capacity {
            return 0;
        }
        let excess = records.len() - self.retain;
        records.drain(..excess);
        excess
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<FeedbackRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Totals over the retained records.
    pub fn summary(&self) -> FeedbackSummary {
        let records = self.records.lock();
        let total = records.len();
        let successes = records.iter().filter(|r| r.success).count();
        let avg_response_time_ms = if total == 0 {
            0.0
        } else {
            records.iter().map(|r| r.response_time_ms).sum::<f64>() / total as f64
        };
        FeedbackSummary {
            total,
            successes,
            avg_response_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: u64, success: bool) -> FeedbackRecord {
        FeedbackRecord {
            node_id: NodeId::from("n1"),
            success,
            response_time_ms: 100.0,
            request_type: RequestType::BatchProcessing,
            timestamp_ms: seq,
        }
    }

    #[test]
    fn test_overflow_trims_to_most_recent() {
        let log = FeedbackLog::new(10_000, 5_000);
        let mut evicted = 0;
        for seq in 1..=10_001 {
            evicted += log.push(record(seq, true));
        }

        assert_eq!(evicted, 5_001);
        assert_eq!(log.len(), 5_000);

        let kept = log.snapshot();
        assert_eq!(kept.first().map(|r| r.timestamp_ms), Some(5_002));
        assert_eq!(kept.last().map(|r| r.timestamp_ms), Some(10_001));
    }

    #[test]
    fn test_no_trim_at_capacity() {
        let log = FeedbackLog::new(4, 2);
        for seq in 0..4 {
            assert_eq!(log.push(record(seq, true)), 0);
        }
        assert_eq!(log.len(), 4);
        assert_eq!(log.push(record(4, true)), 3);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_huge_capacity_does_not_preallocate() {
        let log = FeedbackLog::new(usize::MAX, 2);
        log.push(record(1, true));
        log.push(record(2, false));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_summary() {
        let log = FeedbackLog::new(10, 5);
        assert_eq!(log.summary().avg_response_time_ms, 0.0);

        log.push(record(1, true));
        log.push(FeedbackRecord {
            response_time_ms: 300.0,
            ..record(2, false)
        });

        let summary = log.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.avg_response_time_ms, 200.0);
    }
}
