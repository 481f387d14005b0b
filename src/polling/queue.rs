//! Severity-ordered investigation queue with ID and timed title dedup.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::types::Investigation;

/// How long to block duplicate titles (covers investigation processing time).
const TITLE_BLOCK_MINUTES: i64 = 10;

fn title_block() -> ChronoDuration {
    ChronoDuration::minutes(TITLE_BLOCK_MINUTES)
}

struct QueueEntry {
    /// Lower value = higher priority (critical = 0).
    priority: u8,
    /// Enqueue sequence; breaks priority ties in FIFO order.
    seq: u64,
    investigation: Investigation,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct QueueInner {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    seen_ids: HashSet<Uuid>,
    title_block_until: HashMap<String, DateTime<Utc>>,
    next_seq: u64,
}

/// Queue statistics snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub max_size: usize,
    pub seen_count: usize,
    pub by_severity: HashMap<String, usize>,
}

/// Async priority queue for investigations.
///
/// A single mutex protects the heap and both dedup maps; `get` blocks on a
/// notifier until an item arrives or the timeout expires. One consumer
/// processes one investigation at a time; scale horizontally by sharing the
/// queue across workers.
pub struct InvestigationQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    max_size: usize,
}

impl InvestigationQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                seen_ids: HashSet::new(),
                title_block_until: HashMap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
            max_size,
        }
    }

    /// Add an investigation. Returns false on duplicate ID, blocked title,
    /// or full queue.
    pub async fn add(&self, investigation: Investigation) -> bool {
        {
            let mut inner = self.inner.lock().await;

            if inner.seen_ids.contains(&investigation.id) {
                debug!(id = %investigation.id, "Duplicate investigation skipped");
                return false;
            }

            let now = Utc::now();
            let title = investigation.title.clone();
            if !title.is_empty() {
                if let Some(block_until) = inner.title_block_until.get(&title) {
                    if now < *block_until {
                        info!(
                            id = %investigation.id,
                            title = %title,
                            blocked_for_seconds = (*block_until - now).num_seconds(),
                            "Duplicate title blocked"
                        );
                        return false;
                    }
                }
            }

            if inner.heap.len() >= self.max_size {
                warn!(max_size = self.max_size, "Investigation queue full");
                return false;
            }

            let priority = investigation.max_severity().priority();
            let severity = investigation.max_severity();
            let id = investigation.id;
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(Reverse(QueueEntry {
                priority,
                seq,
                investigation,
            }));
            inner.seen_ids.insert(id);
            if !title.is_empty() {
                inner.title_block_until.insert(title, now + title_block());
            }

            info!(
                id = %id,
                priority = priority,
                severity = %severity,
                queue_size = inner.heap.len(),
                "Investigation queued"
            );
        }

        self.notify.notify_one();
        true
    }

    /// Add a batch; returns how many were accepted.
    pub async fn add_batch(&self, investigations: Vec<Investigation>) -> usize {
        let mut added = 0;
        for inv in investigations {
            if self.add(inv).await {
                added += 1;
            }
        }
        added
    }

    /// Pop the highest-priority investigation, blocking until one is
    /// available or the timeout elapses.
    pub async fn get(&self, timeout: Option<Duration>) -> Option<Investigation> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(Reverse(entry)) = inner.heap.pop() {
                    info!(
                        id = %entry.investigation.id,
                        priority = entry.priority,
                        queue_size = inner.heap.len(),
                        "Investigation dequeued"
                    );
                    return Some(entry.investigation);
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Highest-priority investigation without removing it.
    pub async fn peek(&self) -> Option<Investigation> {
        let inner = self.inner.lock().await;
        inner
            .heap
            .peek()
            .map(|Reverse(entry)| entry.investigation.clone())
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.heap.clear();
        inner.seen_ids.clear();
        inner.title_block_until.clear();
        info!("Investigation queue cleared");
    }

    /// Observability hook: the title block is time-based so nothing needs
    /// clearing here.
    pub fn mark_completed(&self, investigation_id: Uuid, title: &str) {
        debug!(
            investigation_id = %investigation_id,
            title = title,
            "Investigation marked completed"
        );
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for Reverse(entry) in &inner.heap {
            *by_severity
                .entry(entry.investigation.max_severity().to_string())
                .or_insert(0) += 1;
        }
        QueueStats {
            size: inner.heap.len(),
            max_size: self.max_size,
            seen_count: inner.seen_ids.len(),
            by_severity,
        }
    }
}

impl Default for InvestigationQueue {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Alert;

    fn investigation(title: &str, level: u8) -> Investigation {
        let mut inv = Investigation::new();
        inv.add_alert(
            Alert::from_summary_block(&format!(
                "Alert ID: {}\nTime: x\nAgent: a\nLevel: {level}\nDescription: {title}",
                Uuid::new_v4()
            ))
            .unwrap(),
        );
        inv.title = title.to_string();
        inv
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = InvestigationQueue::new(10);
        assert!(queue.add(investigation("low alert", 2)).await);
        assert!(queue.add(investigation("critical alert", 13)).await);
        assert!(queue.add(investigation("medium alert", 5)).await);

        let first = queue.get(Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(first.title, "critical alert");
        let second = queue.get(Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(second.title, "medium alert");
        let third = queue.get(Some(Duration::from_millis(50))).await.unwrap();
        assert_eq!(third.title, "low alert");
    }

    #[tokio::test]
    async fn test_fifo_within_severity() {
        let queue = InvestigationQueue::new(10);
        queue.add(investigation("first", 5)).await;
        queue.add(investigation("second", 5)).await;
        assert_eq!(
            queue.get(Some(Duration::from_millis(50))).await.unwrap().title,
            "first"
        );
        assert_eq!(
            queue.get(Some(Duration::from_millis(50))).await.unwrap().title,
            "second"
        );
    }

    #[tokio::test]
    async fn test_id_dedup() {
        let queue = InvestigationQueue::new(10);
        let inv = investigation("dup", 5);
        let clone = inv.clone();
        assert!(queue.add(inv).await);
        assert!(!queue.add(clone).await);
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn test_title_block() {
        let queue = InvestigationQueue::new(10);
        assert!(queue.add(investigation("SSH brute force", 5)).await);
        // Different ID, same title, inside the block window.
        assert!(!queue.add(investigation("SSH brute force", 5)).await);
        assert_eq!(queue.size().await, 1);
    }

    #[tokio::test]
    async fn test_max_size() {
        let queue = InvestigationQueue::new(2);
        assert!(queue.add(investigation("one", 5)).await);
        assert!(queue.add(investigation("two", 5)).await);
        assert!(!queue.add(investigation("three", 5)).await);
    }

    #[tokio::test]
    async fn test_get_timeout_on_empty() {
        let queue = InvestigationQueue::new(10);
        let got = queue.get(Some(Duration::from_millis(20))).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_get_wakes_on_add() {
        let queue = std::sync::Arc::new(InvestigationQueue::new(10));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get(Some(Duration::from_secs(2))).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.add(investigation("wake", 5)).await;
        let got = consumer.await.unwrap();
        assert_eq!(got.unwrap().title, "wake");
    }

    #[tokio::test]
    async fn test_stats() {
        let queue = InvestigationQueue::new(10);
        queue.add(investigation("a", 13)).await;
        queue.add(investigation("b", 2)).await;
        let stats = queue.stats().await;
        assert_eq!(stats.size, 2);
        assert_eq!(stats.by_severity.get("critical"), Some(&1));
        assert_eq!(stats.by_severity.get("low"), Some(&1));
    }
}
