//! Bounded, non-blocking alert dispatch.
//!
//! The fusion loop hands jobs over with [`Dispatcher::submit`], which never
//! waits: a full queue drops the job. A fixed pool of worker tasks drains
//! the queue, sends to every firing channel concurrently, and appends one
//! [`Incident`] per job to the incident log once all sends have settled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertChannel, ChannelError};
use crate::config::DispatchConfig;
use crate::detect::{ChannelOutcome, Incident, IncidentLog};

/// A fired alert and the channels it must go out on.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub alert: Alert,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub send_timeout: Duration,
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(cfg: &DispatchConfig) -> Self {
        Self {
            queue_capacity: cfg.queue_capacity,
            workers: cfg.workers,
            send_timeout: Duration::from_secs(cfg.send_timeout_sec),
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

type Registry = Arc<HashMap<String, Arc<dyn AlertChannel>>>;

pub struct Dispatcher {
    sender: Option<mpsc::Sender<DispatchJob>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Spawn the worker pool. Must be called from within a Tokio runtime.
    pub fn start(
        channels: Vec<Arc<dyn AlertChannel>>,
        log: IncidentLog,
        settings: DispatchSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let registry: Registry = Arc::new(
            channels
                .into_iter()
                .map(|c| (c.id().to_string(), c))
                .collect(),
        );
        let counters = Arc::new(Counters::default());

        let workers = (0..settings.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let registry = registry.clone();
                let log = log.clone();
                let counters = counters.clone();
                let send_timeout = settings.send_timeout;
                tokio::spawn(async move {
                    worker_loop(worker, rx, registry, log, counters, send_timeout).await;
                })
            })
            .collect();

        info!(
            workers = settings.workers.max(1),
            queue_capacity = settings.queue_capacity.max(1),
            "alert dispatcher started"
        );

        Self {
            sender: Some(tx),
            workers,
            counters,
        }
    }

    /// Queue a job without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, job: DispatchJob) -> bool {
        let Some(sender) = &self.sender else {
            warn!(alert_id = %job.alert.id, "dispatcher is shut down, dropping alert");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    alert_id = %job.alert.id,
                    channels = ?job.channels,
                    "dispatch queue full, dropping alert"
                );
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                error!(alert_id = %job.alert.id, "dispatch workers gone, dropping alert");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Stop accepting jobs and give queued/in-flight ones up to `grace` to
    /// finish. Workers still busy after that are aborted.
    pub async fn shutdown(mut self, grace: Duration) -> DispatchStats {
        drop(self.sender.take());

        let workers = std::mem::take(&mut self.workers);
        let aborts: Vec<_> = workers.iter().map(|h| h.abort_handle()).collect();

        if tokio::time::timeout(grace, join_all(workers)).await.is_err() {
            warn!(
                grace_sec = grace.as_secs_f64(),
                "dispatch workers did not finish within grace period, aborting"
            );
            for handle in aborts {
                handle.abort();
            }
        }

        let stats = self.counters.snapshot();
        info!(?stats, "alert dispatcher stopped");
        stats
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    registry: Registry,
    log: IncidentLog,
    counters: Arc<Counters>,
    send_timeout: Duration,
) {
    debug!(worker, "dispatch worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        let incident = deliver(&job, &registry, send_timeout, &counters).await;
        log.append(incident).await;
    }
    debug!(worker, "dispatch worker exiting");
}

/// Send one job on all of its channels concurrently and build its incident.
async fn deliver(
    job: &DispatchJob,
    registry: &Registry,
    send_timeout: Duration,
    counters: &Counters,
) -> Incident {
    let alert = &job.alert;

    let sends = job.channels.iter().map(|id| async move {
        let Some(channel) = registry.get(id) else {
            return ChannelOutcome::failed(id, "channel not configured");
        };
        let result = match tokio::time::timeout(send_timeout, channel.send(alert)).await {
            Ok(r) => r,
            Err(_) => Err(ChannelError::Timeout(send_timeout)),
        };
        match result {
            Ok(receipt) => {
                info!(channel = %id, alert_id = %alert.id, "alert delivered");
                ChannelOutcome::delivered(id, receipt.metadata)
            }
            Err(e) => {
                error!(channel = %id, alert_id = %alert.id, error = %e, "alert delivery failed");
                ChannelOutcome::failed(id, e.to_string())
            }
        }
    });
    let outcomes = join_all(sends).await;

    for o in &outcomes {
        let counter = if o.delivered {
            &counters.delivered
        } else {
            &counters.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    Incident {
        id: alert.id,
        timestamp: alert.created_at.with_timezone(&Utc),
        severity: alert.severity,
        confidence: alert.confidence,
        detection_count: alert.detection_count,
        message: alert.message.clone(),
        channels: outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ChannelReceipt;
    use crate::detect::SeverityLevel;
    use chrono::Local;
    use tokio::sync::Semaphore;

    struct Ok200(&'static str);

    #[async_trait::async_trait]
    impl AlertChannel for Ok200 {
        fn id(&self) -> &str {
            self.0
        }
        async fn send(&self, _alert: &Alert) -> Result<ChannelReceipt, ChannelError> {
            Ok(ChannelReceipt {
                metadata: Some(serde_json::json!({ "message_id": 7 })),
            })
        }
    }

    struct Broken(&'static str);

    #[async_trait::async_trait]
    impl AlertChannel for Broken {
        fn id(&self) -> &str {
            self.0
        }
        async fn send(&self, _alert: &Alert) -> Result<ChannelReceipt, ChannelError> {
            Err(ChannelError::Rejected {
                status: 503,
                body: "unavailable".to_string(),
            })
        }
    }

    /// Each send waits for one permit.
    struct Gate {
        id: &'static str,
        release: Arc<Semaphore>,
    }

    impl Gate {
        fn closed(id: &'static str) -> Self {
            Self {
                id,
                release: Arc::new(Semaphore::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl AlertChannel for Gate {
        fn id(&self) -> &str {
            self.id
        }
        async fn send(&self, _alert: &Alert) -> Result<ChannelReceipt, ChannelError> {
            if let Ok(permit) = self.release.acquire().await {
                permit.forget();
            }
            Ok(ChannelReceipt::default())
        }
    }

    fn alert() -> Alert {
        Alert {
            id: uuid::Uuid::new_v4(),
            created_at: Local::now(),
            severity: SeverityLevel::High,
            detection_count: 22,
            confidence: 0.9,
            message: "test".to_string(),
            annotations: Vec::new(),
            media: None,
        }
    }

    fn job(channels: &[&str]) -> DispatchJob {
        DispatchJob {
            alert: alert(),
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn settings(queue_capacity: usize, workers: usize) -> DispatchSettings {
        DispatchSettings {
            queue_capacity,
            workers,
            send_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_failure_on_one_channel_still_records_incident() {
        let log = IncidentLog::new(10);
        let dispatcher = Dispatcher::start(
            vec![Arc::new(Ok200("notification")), Arc::new(Broken("emergency-call"))],
            log.clone(),
            settings(4, 1),
        );

        assert!(dispatcher.submit(job(&["notification", "emergency-call"])));
        let stats = dispatcher.shutdown(Duration::from_secs(5)).await;

        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 1);

        let incidents = log.snapshot().await;
        assert_eq!(incidents.len(), 1);
        let i = &incidents[0];
        assert_eq!(i.channels_fired(), vec!["notification", "emergency-call"]);
        assert_eq!(i.failed_channels(), vec!["emergency-call"]);
        assert_eq!(
            i.channels[0].metadata,
            Some(serde_json::json!({ "message_id": 7 }))
        );
        assert!(i.channels[1].error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_unknown_channel_is_a_failed_outcome() {
        let log = IncidentLog::new(10);
        let dispatcher = Dispatcher::start(vec![], log.clone(), settings(4, 1));
        dispatcher.submit(job(&["pager"]));
        dispatcher.shutdown(Duration::from_secs(5)).await;

        let incidents = log.snapshot().await;
        assert_eq!(incidents[0].failed_channels(), vec!["pager"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let release = Arc::new(Semaphore::new(0));
        let log = IncidentLog::new(10);
        let dispatcher = Dispatcher::start(
            vec![Arc::new(Gate {
                id: "notification",
                release: release.clone(),
            })],
            log.clone(),
            settings(1, 1),
        );

        // First job is picked up by the worker and parks in send().
        assert!(dispatcher.submit(job(&["notification"])));
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Second fills the queue, third is dropped.
        assert!(dispatcher.submit(job(&["notification"])));
        assert!(!dispatcher.submit(job(&["notification"])));

        let stats = dispatcher.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.dropped, 1);

        release.add_permits(2);
        let stats = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(stats.delivered, 2);
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_send_timeout_counts_as_failure() {
        let log = IncidentLog::new(10);
        let dispatcher = Dispatcher::start(
            vec![Arc::new(Gate::closed("notification"))],
            log.clone(),
            DispatchSettings {
                queue_capacity: 1,
                workers: 1,
                send_timeout: Duration::from_millis(20),
            },
        );
        dispatcher.submit(job(&["notification"]));
        let stats = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert_eq!(stats.failed, 1);

        let incidents = log.snapshot().await;
        assert!(incidents[0].channels[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_grace() {
        let log = IncidentLog::new(10);
        let dispatcher = Dispatcher::start(
            vec![Arc::new(Gate::closed("notification"))],
            log.clone(),
            settings(1, 1),
        );
        dispatcher.submit(job(&["notification"]));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        dispatcher.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(log.is_empty().await);
    }
}
