/// Bounded MPMC queue backing the runner's worker pool. A full queue makes
/// callers wait or give up instead of stacking unbounded work behind the
/// sandbox.
pub struct Queue<T> {
    tx: async_channel::Sender<T>,
    rx: async_channel::Receiver<T>,
}

impl<T: Send> Queue<T> {
    pub fn bounded(cap: usize) -> Self {
        let (tx, rx) = async_channel::bounded(cap);
        Self { tx, rx }
    }

    /// Waits for a free slot. Fails only when the queue is closed.
    pub async fn push(&self, value: T) -> Result<(), T> {
        self.tx.send(value).await.map_err(|e| e.into_inner())
    }

    /// Waits for the next item; `None` when the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    pub fn close(&self) {
        self.tx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_pop_fifo() {
        let q = Queue::bounded(4);
        q.push(1).await.unwrap();
        q.push(2).await.unwrap();
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, Some(2));
    }

    #[tokio::test]
    async fn closed_queue_rejects_and_drains() {
        let q = Queue::bounded(2);
        q.push(9).await.unwrap();
        q.close();
        assert!(q.push(10).await.is_err());
        assert_eq!(q.pop().await, Some(9));
        assert_eq!(q.pop().await, None);
    }
}
