use std::sync::Arc;

use tracing::{debug, warn};

use crowd_types::EntityId;

use crate::error::PipelineError;
use crate::telemetry::{Telemetry, TelemetryError};

/// Lifecycle reporting for one stage invocation.
///
/// Wraps the telemetry collaborator so that a failed report is logged and
/// dropped instead of reaching the stream.
#[derive(Clone)]
pub struct Lifecycle {
    stage: &'static str,
    telemetry: Arc<dyn Telemetry>,
}

impl Lifecycle {
    pub fn new(stage: &'static str, telemetry: Arc<dyn Telemetry>) -> Self {
        Self { stage, telemetry }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn element_started(&self, id: Option<&EntityId>) {
        self.deliver("element_started", self.telemetry.report_element_started(self.stage, id));
    }

    pub fn element_ended(&self, id: Option<&EntityId>) {
        self.deliver("element_ended", self.telemetry.report_element_ended(self.stage, id));
    }

    pub fn completed(&self) {
        debug!(stage = self.stage, "stage completed");
        self.deliver("stage_completed", self.telemetry.report_stage_completed(self.stage));
    }

    pub fn errored(&self, error: &PipelineError) {
        warn!(stage = self.stage, error = %error, "stage errored");
        self.deliver("stage_errored", self.telemetry.report_stage_errored(self.stage));
    }

    fn deliver(&self, report: &str, result: Result<(), TelemetryError>) {
        if let Err(e) = result {
            warn!(stage = self.stage, report, error = %e, "telemetry report dropped");
        }
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").field("stage", &self.stage).finish()
    }
}
