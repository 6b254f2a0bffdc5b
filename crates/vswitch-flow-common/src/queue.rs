//! Named single-consumer work queues.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Error type for queue operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue has been shut down; further posts are refused.
    #[error("queue '{0}' is shut down")]
    ShutDown(String),
}

/// Producer side of a named FIFO work queue.
///
/// Cloning the handle yields another producer for the same queue. Items
/// posted by one producer are delivered to the consumer in posting order;
/// ordering between producers is not guaranteed.
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: Arc<str>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Returns the queue name (the task the consumer is bound to).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Posts an item to the queue. Non-blocking.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ShutDown`] if [`WorkQueue::shutdown`] has been
    /// called or the consumer has been dropped.
    pub fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let guard = self.tx.lock().expect("work queue lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx
                .send(item)
                .map_err(|_| QueueError::ShutDown(self.name.to_string())),
            None => Err(QueueError::ShutDown(self.name.to_string())),
        }
    }

    /// Shuts the queue down.
    ///
    /// Items already posted remain in the queue and are drained by the
    /// consumer; any later post is refused. All clones of this handle
    /// observe the shutdown.
    pub fn shutdown(&self) {
        let mut guard = self.tx.lock().expect("work queue lock poisoned");
        if guard.take().is_some() {
            debug!(queue = %self.name, "work queue shut down");
        }
    }

    /// Returns true if the queue no longer accepts posts.
    pub fn is_shut_down(&self) -> bool {
        self.tx.lock().expect("work queue lock poisoned").is_none()
    }
}

/// Consumer side of a work queue. There is exactly one per queue.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    name: Arc<str>,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> QueueConsumer<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receives the next item, waiting if the queue is empty.
    ///
    /// Returns `None` once the queue has been shut down and fully drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Receives the next item if one is immediately available.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drains every item currently queued.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            items.push(item);
        }
        items
    }
}

/// Creates a work queue bound to the named consumer task.
pub fn work_queue<T>(name: &str) -> (WorkQueue<T>, QueueConsumer<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let name: Arc<str> = Arc::from(name);
    (
        WorkQueue {
            name: Arc::clone(&name),
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        QueueConsumer { name, rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let (queue, mut consumer) = work_queue::<u32>("test");
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        queue.enqueue(3).unwrap();
        assert_eq!(consumer.drain(), vec![1, 2, 3]);
    }

    #[test]
    fn test_shutdown_refuses_posts_but_drains() {
        let (queue, mut consumer) = work_queue::<u32>("test");
        queue.enqueue(1).unwrap();
        queue.shutdown();
        assert!(queue.is_shut_down());
        assert_eq!(
            queue.enqueue(2),
            Err(QueueError::ShutDown("test".to_string()))
        );
        // Already-posted items survive the shutdown.
        assert_eq!(consumer.drain(), vec![1]);
    }

    #[test]
    fn test_clone_shares_shutdown() {
        let (queue, _consumer) = work_queue::<u32>("test");
        let other = queue.clone();
        queue.shutdown();
        assert!(other.is_shut_down());
        assert!(other.enqueue(1).is_err());
    }

    #[tokio::test]
    async fn test_async_recv_ends_after_shutdown() {
        let (queue, mut consumer) = work_queue::<u32>("test");
        queue.enqueue(7).unwrap();
        queue.shutdown();
        assert_eq!(consumer.recv().await, Some(7));
        assert_eq!(consumer.recv().await, None);
    }
}
