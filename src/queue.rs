use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<String>,
    /// Queued or currently being processed.
    active: HashSet<String>,
}

/// Shared FIFO of watch ids with a non-blocking pop.
///
/// A watch id that is already queued or in flight is not enqueued again;
/// it becomes eligible once `task_done` is called for it.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    state: Arc<Mutex<QueueState>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the id was already queued or in flight.
    pub async fn push(&self, uuid: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.active.insert(uuid.to_string()) {
            return false;
        }
        state.pending.push_back(uuid.to_string());
        true
    }

    pub async fn try_pop(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        state.pending.pop_front()
    }

    pub async fn task_done(&self, uuid: &str) {
        let mut state = self.state.lock().await;
        state.active.remove(uuid);
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Queued plus in-flight ids.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new();
        assert!(queue.push("a").await);
        assert!(queue.push("b").await);

        assert_eq!(queue.try_pop().await.as_deref(), Some("a"));
        assert_eq!(queue.try_pop().await.as_deref(), Some("b"));
        assert_eq!(queue.try_pop().await, None);
    }

    #[tokio::test]
    async fn test_in_flight_ids_are_not_requeued() {
        let queue = WorkQueue::new();
        assert!(queue.push("a").await);
        assert!(!queue.push("a").await);
        assert_eq!(queue.len().await, 1);

        let popped = queue.try_pop().await.unwrap();
        // Still in flight until marked done
        assert!(!queue.push("a").await);
        assert_eq!(queue.active_count().await, 1);

        queue.task_done(&popped).await;
        assert_eq!(queue.active_count().await, 0);
        assert!(queue.push("a").await);
    }

    #[tokio::test]
    async fn test_concurrent_consumers_pop_each_id_once() {
        let queue = WorkQueue::new();
        for i in 0..50 {
            queue.push(&format!("w{}", i)).await;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(id) = queue.try_pop().await {
                    seen.push(id);
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
        assert!(queue.is_empty().await);
    }
}
