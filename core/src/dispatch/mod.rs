//! Dispatch Pipeline (spec §4.4): a bounded ingress queue drained by a
//! single batching worker task into a [`DataProvider`] sink.
//!
//! Batching follows the original's algorithm almost line for line — a
//! ~0.5 s timer, ~100 ms polls while filling, submit early once the queue
//! drains — hosted in a dispatcher task shaped like the teacher's
//! `TopicService` worker (single task, bounded queue, snapshot-then-send).

pub mod provider;

pub use provider::{DataProvider, GoogleSheetsProvider, SupabaseProvider};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::constants::{
    DISPATCH_BATCH_MAX_ITEMS, DISPATCH_BATCH_WINDOW_MS, DISPATCH_POLL_INTERVAL_MS, DISPATCH_QUEUE_CAPACITY,
};
use crate::error::DispatchError;

/// One queued item: application data plus the destination sheet name.
#[derive(Debug, Clone)]
pub struct DispatchItem {
    pub data: Value,
    pub sheet: String,
}

enum Command {
    Enqueue(DispatchItem),
    Stop,
}

/// Handle to the running dispatch pipeline. Cloning shares the same worker.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Command>,
}

impl DispatchQueue {
    pub fn start(provider: Arc<dyn DataProvider>) -> Self {
        let (tx, rx) = mpsc::channel(DISPATCH_QUEUE_CAPACITY);
        tokio::spawn(worker_loop(rx, provider));
        Self { tx }
    }

    /// Enqueue `data` for batched delivery under `sheet` (read from
    /// `data["sheet"]`, falling back to `event_type`). Non-blocking: a full
    /// queue drops the item with a warning rather than applying
    /// backpressure to the caller, matching the "enqueue never blocks"
    /// contract.
    pub fn enqueue(&self, data: Value, event_type: &str) -> Result<(), DispatchError> {
        let sheet = data
            .get("sheet")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| event_type.to_string());
        let item = DispatchItem { data, sheet };
        match self.tx.try_send(Command::Enqueue(item)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("dispatch queue full, dropping item");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DispatchError::QueueClosed),
        }
    }

    /// Asks the worker to stop after submitting whatever batch it is
    /// already holding (spec §4.4 step 4, "clean shutdown can join the
    /// queue").
    pub fn stop(&self) {
        let _ = self.tx.try_send(Command::Stop);
    }
}

async fn worker_loop(mut rx: mpsc::Receiver<Command>, provider: Arc<dyn DataProvider>) {
    'outer: loop {
        let mut batch = Vec::with_capacity(DISPATCH_BATCH_MAX_ITEMS);
        let deadline = Instant::now() + Duration::from_millis(DISPATCH_BATCH_WINDOW_MS);
        let poll = Duration::from_millis(DISPATCH_POLL_INTERVAL_MS);

        while batch.len() < DISPATCH_BATCH_MAX_ITEMS && Instant::now() < deadline {
            match tokio::time::timeout(poll, rx.recv()).await {
                Ok(Some(Command::Enqueue(item))) => {
                    batch.push(item);
                    if rx.is_empty() {
                        break;
                    }
                }
                Ok(Some(Command::Stop)) => {
                    if !batch.is_empty() {
                        submit_batch(&provider, batch).await;
                    }
                    break 'outer;
                }
                Ok(None) => break 'outer,
                Err(_elapsed) => {
                    if !batch.is_empty() {
                        break;
                    }
                }
            }
        }

        if !batch.is_empty() {
            submit_batch(&provider, batch).await;
        }
    }
    debug!("dispatch worker stopped");
}

async fn submit_batch(provider: &Arc<dyn DataProvider>, batch: Vec<DispatchItem>) {
    let size = batch.len();
    debug!(size, "processing dispatch batch");
    match provider.process_data(batch).await {
        Ok(()) => debug!(size, "dispatch batch processed"),
        Err(err) => error!(size, %err, "dispatch batch failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct CountingProvider {
        batches: Arc<std::sync::Mutex<Vec<usize>>>,
        total: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl DataProvider for CountingProvider {
        async fn is_connected(&self) -> bool {
            true
        }
        async fn fetch_data(&self, _sheet: &str, _username: Option<&str>) -> Result<Vec<Value>, DispatchError> {
            Ok(Vec::new())
        }
        async fn process_data(&self, batch: Vec<DispatchItem>) -> Result<(), DispatchError> {
            self.total.fetch_add(batch.len(), Ordering::SeqCst);
            self.batches.lock().unwrap().push(batch.len());
            Ok(())
        }
        async fn purge(&self, _sheet: &str) -> Result<(), DispatchError> {
            Ok(())
        }
        async fn fetch_record_hashes(&self, _sheet: &str) -> Result<HashMap<String, String>, DispatchError> {
            Ok(HashMap::new())
        }
        async fn ensure_dynamic_views(&self, _config: &Value) -> Result<(), DispatchError> {
            Ok(())
        }
        async fn view_exists(&self, _name: &str) -> Result<bool, DispatchError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn single_item_is_submitted_once_queue_drains() {
        let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
        let total = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(CountingProvider { batches: batches.clone(), total: total.clone() });
        let queue = DispatchQueue::start(provider);

        queue.enqueue(serde_json::json!({"sheet": "Kills"}), "kill").unwrap();

        for _ in 0..20 {
            if total.load(Ordering::SeqCst) == 1 {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(total.load(Ordering::SeqCst), 1);
        assert_eq!(batches.lock().unwrap().as_slice(), &[1]);
    }

    #[tokio::test]
    async fn stop_submits_the_partial_batch_before_exiting() {
        let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
        let total = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(CountingProvider { batches: batches.clone(), total: total.clone() });
        let queue = DispatchQueue::start(provider);

        queue.enqueue(serde_json::json!({}), "death").unwrap();
        queue.enqueue(serde_json::json!({}), "death").unwrap();
        queue.stop();

        for _ in 0..20 {
            if total.load(Ordering::SeqCst) == 2 {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(total.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sheet_falls_back_to_event_type_when_data_has_no_sheet_field() {
        let (tx, mut rx) = mpsc::channel(4);
        let queue = DispatchQueue { tx };
        queue.enqueue(serde_json::json!({"foo": "bar"}), "kill").unwrap();
        match rx.try_recv().unwrap() {
            Command::Enqueue(item) => assert_eq!(item.sheet, "kill"),
            Command::Stop => panic!("unexpected stop"),
        }
    }
}
