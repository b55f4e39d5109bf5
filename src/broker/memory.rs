use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

use super::{Broker, Delivery, JobRequest};
use crate::error::BrokerError;

#[derive(Debug, Default)]
struct Inner {
    queue: VecDeque<JobRequest>,
    in_flight: HashMap<String, JobRequest>,
    closed: bool,
}

/// In-process FIFO broker shared between tasks of one runtime.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    notify: Notify,
    next_receipt: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse new requests. Waiting consumers drain what is queued, then get
    /// [`BrokerError::Closed`].
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliveries handed out but not yet acked.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_take(&self) -> Option<Result<Delivery, BrokerError>> {
        let mut inner = self.lock();
        if let Some(request) = inner.queue.pop_front() {
            let receipt = self.next_receipt.fetch_add(1, Ordering::Relaxed).to_string();
            inner.in_flight.insert(receipt.clone(), request.clone());
            return Some(Ok(Delivery { request, receipt }));
        }
        inner.closed.then_some(Err(BrokerError::Closed))
    }
}

impl Broker for MemoryBroker {
    async fn enqueue(&self, request: &JobRequest) -> Result<(), BrokerError> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(BrokerError::Closed);
            }
            inner.queue.push_back(request.clone());
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery, BrokerError> {
        loop {
            // Register interest before looking, so a concurrent enqueue or
            // close between the check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(taken) = self.try_take() {
                return taken;
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.lock().in_flight.remove(&delivery.receipt);
        Ok(())
    }

    /// Requeues at the back, even after `close`, so a draining consumer
    /// still sees it.
    async fn nack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        {
            let mut inner = self.lock();
            let request = inner
                .in_flight
                .remove(&delivery.receipt)
                .unwrap_or_else(|| delivery.request.clone());
            inner.queue.push_back(request);
        }
        self.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn request(id: &str) -> JobRequest {
        JobRequest {
            job_id: id.to_string(),
            input_reference: format!("uploads/{id}.csv").into(),
        }
    }

    #[tokio::test]
    async fn fifo_delivery_and_ack() {
        let broker = MemoryBroker::new();
        broker.enqueue(&request("a")).await.unwrap();
        broker.enqueue(&request("b")).await.unwrap();

        let first = broker.dequeue().await.unwrap();
        let second = broker.dequeue().await.unwrap();
        assert_eq!(first.request.job_id, "a");
        assert_eq!(second.request.job_id, "b");
        assert_ne!(first.receipt, second.receipt);
        assert_eq!(broker.in_flight(), 2);

        broker.ack(&first).await.unwrap();
        broker.ack(&second).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
    }

    #[tokio::test]
    async fn nack_redelivers_after_close() {
        let broker = MemoryBroker::new();
        broker.enqueue(&request("a")).await.unwrap();
        broker.close();

        let first = broker.dequeue().await.unwrap();
        broker.nack(&first).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.len(), 1);

        let again = broker.dequeue().await.unwrap();
        assert_eq!(again.request, first.request);
        assert_ne!(again.receipt, first.receipt);
        broker.ack(&again).await.unwrap();
        assert!(matches!(broker.dequeue().await, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn dequeue_waits_for_enqueue() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.enqueue(&request("late")).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer never woke")
            .unwrap()
            .unwrap();
        assert_eq!(delivery.request.job_id, "late");
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let broker = MemoryBroker::new();
        broker.enqueue(&request("a")).await.unwrap();
        broker.close();

        assert!(matches!(
            broker.enqueue(&request("b")).await,
            Err(BrokerError::Closed)
        ));
        assert_eq!(broker.dequeue().await.unwrap().request.job_id, "a");
        assert!(matches!(broker.dequeue().await, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn close_wakes_idle_consumers() {
        let broker = Arc::new(MemoryBroker::new());
        let consumer = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer never woke")
            .unwrap();
        assert!(matches!(result, Err(BrokerError::Closed)));
    }
}
