use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PhaseError;

/// Cost and token accounting reported by a phase that called an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl PhaseMetrics {
    pub fn add(&mut self, other: &PhaseMetrics) {
        self.cost_usd += other.cost_usd;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Outcome of one phase execution.
///
/// `needs_approval` is not a failure: such results carry `success = true`
/// and tell the coordinator to suspend the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub success: bool,
    pub phase_name: String,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(default)]
    pub needs_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PhaseMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl PhaseResult {
    fn base(phase_name: &str, success: bool) -> Self {
        Self {
            success,
            phase_name: phase_name.to_string(),
            duration: Duration::ZERO,
            needs_approval: false,
            error: None,
            warnings: Vec::new(),
            data: None,
            metrics: None,
            metadata: None,
        }
    }

    pub fn success(phase_name: &str) -> Self {
        Self::base(phase_name, true)
    }

    pub fn success_with_data(phase_name: &str, data: Value) -> Self {
        Self::base(phase_name, true).with_data(data)
    }

    pub fn failure(phase_name: &str, error: impl Into<String>) -> Self {
        let mut result = Self::base(phase_name, false);
        result.error = Some(error.into());
        result
    }

    pub fn cancelled(phase_name: &str) -> Self {
        let mut result = Self::failure(phase_name, PhaseError::Cancelled.to_string());
        result.metadata = Some(serde_json::json!({ "cancelled": true }));
        result
    }

    /// Successful suspension awaiting a human decision.
    pub fn needs_approval(phase_name: &str) -> Self {
        let mut result = Self::base(phase_name, true);
        result.needs_approval = true;
        result
    }

    pub fn skipped(phase_name: &str, reason: &str) -> Self {
        let mut result = Self::base(phase_name, true)
            .with_warning(format!("Phase {} skipped: {}", phase_name, reason));
        result.metadata = Some(serde_json::json!({ "skipped": true, "reason": reason }));
        result
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_metrics(mut self, metrics: PhaseMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        !self.success && self.metadata_flag("cancelled")
    }

    pub fn is_skipped(&self) -> bool {
        self.metadata_flag("skipped")
    }

    fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Boolean field of `data`, `false` when absent.
    pub fn data_flag(&self, key: &str) -> bool {
        self.data
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
