//! Background cost-log flushing.
//!
//! Persisting cost entries inline on the verification path adds a storage
//! round trip to every candidate. `CostLogFlusher` moves those writes onto
//! a dedicated task fed by a bounded queue: producers enqueue drained
//! entries and continue; the task owns the storage writes. A full queue
//! applies backpressure: `enqueue` waits for space rather than dropping
//! entries, so the cost log stays complete under load.
//!
//! The flusher is an ordinary owned value with an explicit start and stop.
//! Dropping every handle and calling `stop` drains whatever is still
//! queued before the task exits.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use openaid_common::CostEntry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::log::VerificationLog;

pub struct CostLogFlusher {
    tx: mpsc::Sender<Vec<CostEntry>>,
    task: JoinHandle<usize>,
}

/// Producer handle. Cheap to clone; one per component that meters spend.
#[derive(Clone)]
pub struct CostLogQueue {
    tx: mpsc::Sender<Vec<CostEntry>>,
}

impl CostLogQueue {
    /// Queue a batch of entries for the flush task. Waits when the queue
    /// is full; errors only after the flusher has been stopped.
    pub async fn enqueue(&self, entries: Vec<CostEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.tx
            .send(entries)
            .await
            .map_err(|_| anyhow!("cost log flusher is stopped"))
    }
}

impl CostLogFlusher {
    /// Spawn the flush task over a queue of `capacity` pending batches.
    pub fn start(log: Arc<dyn VerificationLog>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<CostEntry>>(capacity.max(1));

        let task = tokio::spawn(async move {
            let mut flushed = 0usize;
            while let Some(batch) = rx.recv().await {
                let len = batch.len();
                match log.record_costs(&batch).await {
                    Ok(()) => flushed += len,
                    Err(e) => warn!(entries = len, error = %e, "Cost log flush failed"),
                }
            }
            flushed
        });

        Self { tx, task }
    }

    pub fn handle(&self) -> CostLogQueue {
        CostLogQueue {
            tx: self.tx.clone(),
        }
    }

    /// Close the queue and wait for the task to drain it. Entries queued
    /// before the stop are flushed; handles error on enqueue afterwards.
    pub async fn stop(self) -> Result<usize> {
        drop(self.tx);
        let flushed = self.task.await?;
        info!(entries = flushed, "Cost log flusher stopped");
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryVerificationLog;
    use chrono::Utc;

    fn entry(purpose: &str) -> CostEntry {
        CostEntry {
            provider: "anthropic".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            purpose: purpose.to_string(),
            input_tokens: 1_000,
            output_tokens: 50,
            cost_usd: 0.001,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stop_drains_everything_enqueued() {
        let log = Arc::new(MemoryVerificationLog::new());
        let flusher = CostLogFlusher::start(log.clone(), 8);
        let queue = flusher.handle();

        queue
            .enqueue(vec![entry("content_match"), entry("url_repair")])
            .await
            .unwrap();
        queue.enqueue(vec![entry("content_match")]).await.unwrap();

        let flushed = flusher.stop().await.unwrap();
        assert_eq!(flushed, 3);
        assert_eq!(log.cost_entries().len(), 3);
    }

    #[tokio::test]
    async fn tiny_queue_applies_backpressure_without_dropping() {
        let log = Arc::new(MemoryVerificationLog::new());
        let flusher = CostLogFlusher::start(log.clone(), 1);
        let queue = flusher.handle();

        for i in 0..20 {
            queue.enqueue(vec![entry(&format!("call_{i}"))]).await.unwrap();
        }

        assert_eq!(flusher.stop().await.unwrap(), 20);
        assert_eq!(log.cost_entries().len(), 20);
    }

    #[tokio::test]
    async fn enqueue_after_stop_errors() {
        let log = Arc::new(MemoryVerificationLog::new());
        let flusher = CostLogFlusher::start(log, 4);
        let queue = flusher.handle();
        flusher.stop().await.unwrap();

        assert!(queue.enqueue(vec![entry("late")]).await.is_err());
    }

    #[tokio::test]
    async fn empty_batches_are_not_queued() {
        let log = Arc::new(MemoryVerificationLog::new());
        let flusher = CostLogFlusher::start(log.clone(), 4);
        let queue = flusher.handle();

        queue.enqueue(Vec::new()).await.unwrap();

        assert_eq!(flusher.stop().await.unwrap(), 0);
    }
}
