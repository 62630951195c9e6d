use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::info;

use crowd_types::EntityId;

/// A telemetry report that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("telemetry report failed: {0}")]
pub struct TelemetryError(pub String);

/// Receiver of stage lifecycle reports.
///
/// Reports are fire-and-forget: a stage logs a failed report and carries on,
/// so an implementation can never change what a pipeline emits.
pub trait Telemetry: Send + Sync {
    fn report_element_started(&self, stage: &str, id: Option<&EntityId>) -> Result<(), TelemetryError>;

    fn report_element_ended(&self, stage: &str, id: Option<&EntityId>) -> Result<(), TelemetryError>;

    fn report_stage_completed(&self, stage: &str) -> Result<(), TelemetryError>;

    fn report_stage_errored(&self, stage: &str) -> Result<(), TelemetryError>;
}

/// Discards every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn report_element_started(&self, _stage: &str, _id: Option<&EntityId>) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn report_element_ended(&self, _stage: &str, _id: Option<&EntityId>) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn report_stage_completed(&self, _stage: &str) -> Result<(), TelemetryError> {
        Ok(())
    }

    fn report_stage_errored(&self, _stage: &str) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Emits every report as a `tracing` event on the `crowd::telemetry` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn report_element_started(&self, stage: &str, id: Option<&EntityId>) -> Result<(), TelemetryError> {
        info!(target: "crowd::telemetry", stage, id = ?id, "element started");
        Ok(())
    }

    fn report_element_ended(&self, stage: &str, id: Option<&EntityId>) -> Result<(), TelemetryError> {
        info!(target: "crowd::telemetry", stage, id = ?id, "element ended");
        Ok(())
    }

    fn report_stage_completed(&self, stage: &str) -> Result<(), TelemetryError> {
        info!(target: "crowd::telemetry", stage, "stage completed");
        Ok(())
    }

    fn report_stage_errored(&self, stage: &str) -> Result<(), TelemetryError> {
        info!(target: "crowd::telemetry", stage, "stage errored");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingTelemetry
// ---------------------------------------------------------------------------

/// One recorded lifecycle report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelemetryEvent {
    ElementStarted(Option<EntityId>),
    ElementEnded(Option<EntityId>),
    StageCompleted,
    StageErrored,
}

/// Keeps every report in memory, in arrival order.
///
/// A recorder built with [`RecordingTelemetry::failing`] still records, but
/// answers every report with an error.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<(String, TelemetryEvent)>>,
    fail: AtomicBool,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    /// All reports so far, regardless of stage.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Reports from one stage.
    pub fn events_for(&self, stage: &str) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter(|(s, _)| s == stage)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn record(&self, stage: &str, event: TelemetryEvent) -> Result<(), TelemetryError> {
        self.events
            .lock()
            .expect("lock poisoned")
            .push((stage.to_string(), event));
        if self.fail.load(Ordering::SeqCst) {
            return Err(TelemetryError("collector unavailable".into()));
        }
        Ok(())
    }
}

impl Telemetry for RecordingTelemetry {
    fn report_element_started(&self, stage: &str, id: Option<&EntityId>) -> Result<(), TelemetryError> {
        self.record(stage, TelemetryEvent::ElementStarted(id.copied()))
    }

    fn report_element_ended(&self, stage: &str, id: Option<&EntityId>) -> Result<(), TelemetryError> {
        self.record(stage, TelemetryEvent::ElementEnded(id.copied()))
    }

    fn report_stage_completed(&self, stage: &str) -> Result<(), TelemetryError> {
        self.record(stage, TelemetryEvent::StageCompleted)
    }

    fn report_stage_errored(&self, stage: &str) -> Result<(), TelemetryError> {
        self.record(stage, TelemetryEvent::StageErrored)
    }
}
