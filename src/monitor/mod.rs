//! The fusion loop: detections in, severity and alerts out.
//!
//! [`Monitor`] is the single producer. It exclusively owns the severity
//! tracker and the dispatcher; everything readers may look at lives behind
//! a cloneable [`MonitorHandle`] whose locks are only held long enough to
//! copy or update a value.

pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{
    message, Alert, AlertChannel, AlertPolicy, CooldownStatus, DispatchJob, DispatchSettings,
    DispatchStats, Dispatcher, FireDecision, PolicyError,
};
use crate::config::{AlertConfig, Config};
use crate::detect::{
    Detection, FrameBatch, Incident, IncidentLog, SeverityAssessment, SeverityTracker,
    TrackerSettings,
};
use crate::source::{DetectionSource, SourceError};

use self::status::StatusBoard;
pub use self::status::StatusSnapshot;

/// Shared, read-mostly view of the monitor for status and report readers.
#[derive(Clone)]
pub struct MonitorHandle {
    status: Arc<RwLock<StatusBoard>>,
    incidents: IncidentLog,
    policy: Arc<Mutex<AlertPolicy>>,
}

impl MonitorHandle {
    fn new(policy: AlertPolicy, incident_capacity: usize, status_log_capacity: usize) -> Self {
        Self {
            status: Arc::new(RwLock::new(StatusBoard::new(status_log_capacity))),
            incidents: IncidentLog::new(incident_capacity),
            policy: Arc::new(Mutex::new(policy)),
        }
    }

    pub async fn current_status(&self) -> StatusSnapshot {
        self.status.read().await.snapshot()
    }

    /// Recorded incidents, oldest first.
    pub async fn incidents(&self) -> Vec<Incident> {
        self.incidents.snapshot().await
    }

    pub fn incident_log(&self) -> &IncidentLog {
        &self.incidents
    }

    pub async fn cooldowns(&self) -> Vec<CooldownStatus> {
        self.policy
            .lock()
            .await
            .cooldowns(tokio::time::Instant::now())
    }

    /// Apply new channel intervals (seconds). Either all apply or none do.
    pub async fn set_cooldowns(&self, intervals: &BTreeMap<String, u64>) -> Result<(), PolicyError> {
        let mut policy = self.policy.lock().await;
        let mut updated = policy.clone();
        for (channel, secs) in intervals {
            updated.set_interval(channel, Duration::from_secs(*secs))?;
        }
        *policy = updated;
        info!(?intervals, "channel cool-downs updated");
        Ok(())
    }
}

/// Totals for one [`Monitor::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub frames: u64,
    pub skipped: u64,
    pub alerts: u64,
    pub dispatch: DispatchStats,
}

pub struct Monitor {
    tracker: SeverityTracker,
    dispatcher: Dispatcher,
    handle: MonitorHandle,
    primary_detector: String,
    primary_classes: Vec<String>,
    alert: AlertConfig,
    shutdown_grace: Duration,
}

impl Monitor {
    /// Build the monitor and start its dispatch workers.
    ///
    /// `config` is expected to have passed [`Config::validate`].
    pub fn new(config: &Config, channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        let handle = MonitorHandle::new(
            AlertPolicy::from_channels(&config.channels),
            config.dispatch.incident_capacity,
            config.dispatch.status_log_capacity,
        );
        let dispatcher = Dispatcher::start(
            channels,
            handle.incidents.clone(),
            DispatchSettings::from(&config.dispatch),
        );

        Self {
            tracker: SeverityTracker::new(TrackerSettings::from(&config.fusion)),
            dispatcher,
            handle,
            primary_detector: config.fusion.primary_detector.clone(),
            primary_classes: config.fusion.primary_classes.clone(),
            alert: config.alert.clone(),
            shutdown_grace: Duration::from_secs(config.dispatch.shutdown_grace_sec),
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    fn counts_as_evidence(&self, classification: &str) -> bool {
        self.primary_classes.is_empty() || self.primary_classes.iter().any(|c| c == classification)
    }

    /// Run one tick of the fusion loop for `batch`.
    ///
    /// Never waits on channel delivery.
    pub async fn process_batch(&mut self, batch: &FrameBatch) -> FireDecision {
        let now = batch.timestamp;

        for record in batch.records_of(&self.primary_detector) {
            if !record.is_valid() {
                warn!(
                    detector = %self.primary_detector,
                    confidence = record.confidence,
                    "discarding detection with invalid confidence"
                );
                continue;
            }
            if self.counts_as_evidence(&record.classification) {
                self.tracker.admit(Detection::from_record(now, record));
            }
        }

        let assessment = self.tracker.assess_at(now);
        self.handle
            .status
            .write()
            .await
            .publish(&assessment, Utc::now());

        let decision = self.handle.policy.lock().await.evaluate(&assessment, now);
        if decision.is_empty() {
            self.handle.status.write().await.set_alert(String::new());
            return decision;
        }

        self.fire(batch, &assessment, &decision).await;
        decision
    }

    async fn fire(&mut self, batch: &FrameBatch, assessment: &SeverityAssessment, decision: &FireDecision) {
        let at = Local::now();
        let annotations = message::annotations(batch, &self.primary_detector);
        let text = message::compose(
            &self.alert.title,
            assessment,
            &annotations,
            &self.alert.sections,
            at,
        );
        let alert = Alert {
            id: uuid::Uuid::new_v4(),
            created_at: at,
            severity: assessment.level,
            detection_count: assessment.count,
            confidence: assessment.max_confidence,
            message: text,
            annotations,
            media: batch.media.clone(),
        };

        info!(
            alert_id = %alert.id,
            severity = %assessment.level,
            detections = assessment.count,
            confidence = assessment.max_confidence,
            channels = ?decision.channels,
            "alert triggered"
        );

        {
            let mut status = self.handle.status.write().await;
            status.push_line(message::log_line(
                at,
                assessment.level,
                assessment.max_confidence,
                assessment.count,
            ));
            status.set_alert(format!(
                "{} alert triggered: {}",
                assessment.level,
                decision.channels.join(", ")
            ));
        }

        self.dispatcher.submit(DispatchJob {
            alert,
            channels: decision.channels.clone(),
        });

        // Fresh evidence is required before the next alert.
        self.tracker.reset();
    }

    /// Drive the loop until the source ends or `shutdown` is cancelled,
    /// then stop the dispatcher within the configured grace period.
    pub async fn run<S>(mut self, source: &mut S, shutdown: CancellationToken) -> Result<RunSummary, SourceError>
    where
        S: DetectionSource + ?Sized,
    {
        info!(primary = %self.primary_detector, "fusion loop started");
        let mut summary = RunSummary::default();
        let mut failure = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping fusion loop");
                    break;
                }
                next = source.next_batch() => next,
            };

            match next {
                Ok(Some(batch)) => {
                    summary.frames += 1;
                    if !self.process_batch(&batch).await.is_empty() {
                        summary.alerts += 1;
                    }
                }
                Ok(None) => {
                    info!("detection source reached end of stream");
                    break;
                }
                Err(e) if e.is_transient() => {
                    summary.skipped += 1;
                    debug!(error = %e, "skipping tick");
                }
                Err(e) => {
                    error!(error = %e, "detection source failed");
                    failure = Some(e);
                    break;
                }
            }
        }

        summary.dispatch = self.dispatcher.shutdown(self.shutdown_grace).await;
        info!(?summary, "fusion loop stopped");

        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
