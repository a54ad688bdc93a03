use std::collections::HashMap;
use std::sync::Mutex;

/// Status code recorded when no HTTP response was obtained
pub const NO_RESPONSE_STATUS: &str = "0";

/// Counter of upload attempts keyed by client identity and status code
pub trait RequestCounter: Send + Sync {
    fn inc(&self, client: &str, status_code: &str);
}

/// In-process counter vector
#[derive(Debug, Default)]
pub struct RequestCounterVec {
    counts: Mutex<HashMap<(String, String), u64>>,
}

impl RequestCounterVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client: &str, status_code: &str) -> u64 {
        self.counts
            .lock()
            .ok()
            .and_then(|counts| {
                counts
                    .get(&(client.to_string(), status_code.to_string()))
                    .copied()
            })
            .unwrap_or(0)
    }

    /// All series sorted by client then status code
    pub fn snapshot(&self) -> Vec<(String, String, u64)> {
        let mut series: Vec<_> = match self.counts.lock() {
            Ok(counts) => counts
                .iter()
                .map(|((client, code), n)| (client.clone(), code.clone(), *n))
                .collect(),
            Err(_) => Vec::new(),
        };
        series.sort();
        series
    }
}

impl RequestCounter for RequestCounterVec {
    fn inc(&self, client: &str, status_code: &str) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts
                .entry((client.to_string(), status_code.to_string()))
                .or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_series() {
        let counter = RequestCounterVec::new();
        counter.inc("insightsclient", "202");
        counter.inc("insightsclient", "202");
        counter.inc("insightsclient", "401");
        counter.inc("other", NO_RESPONSE_STATUS);

        assert_eq!(counter.get("insightsclient", "202"), 2);
        assert_eq!(counter.get("insightsclient", "401"), 1);
        assert_eq!(counter.get("other", "0"), 1);
        assert_eq!(counter.get("other", "500"), 0);
    }

    #[test]
    fn test_snapshot_sorted() {
        let counter = RequestCounterVec::new();
        counter.inc("b", "200");
        counter.inc("a", "500");
        counter.inc("a", "200");

        assert_eq!(
            counter.snapshot(),
            vec![
                ("a".to_string(), "200".to_string(), 1),
                ("a".to_string(), "500".to_string(), 1),
                ("b".to_string(), "200".to_string(), 1),
            ]
        );
    }
}
