//! Categorisation of integration failures from free-form agent output.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrationErrorKind {
    EndpointNotFound,
    Cors,
    PayloadMismatch,
    MethodMismatch,
    Authentication,
    Generic,
}

impl IntegrationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationErrorKind::EndpointNotFound => "endpoint-not-found",
            IntegrationErrorKind::Cors => "cors",
            IntegrationErrorKind::PayloadMismatch => "payload-mismatch",
            IntegrationErrorKind::MethodMismatch => "method-mismatch",
            IntegrationErrorKind::Authentication => "authentication",
            IntegrationErrorKind::Generic => "generic",
        }
    }

    /// Unknown strings map to `Generic`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "endpoint-not-found" | "endpoint_not_found" | "not-found" | "404" => {
                IntegrationErrorKind::EndpointNotFound
            }
            "cors" => IntegrationErrorKind::Cors,
            "payload-mismatch" | "payload_mismatch" | "schema-mismatch" => {
                IntegrationErrorKind::PayloadMismatch
            }
            "method-mismatch" | "method_mismatch" | "405" => IntegrationErrorKind::MethodMismatch,
            "authentication" | "auth" | "401" | "403" => IntegrationErrorKind::Authentication,
            _ => IntegrationErrorKind::Generic,
        }
    }
}

impl std::fmt::Display for IntegrationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Maps error text to a category. Implementations must be deterministic.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error_output: &str) -> IntegrationErrorKind;
}

/// Ordered regex rules; the first matching rule wins.
pub struct RegexErrorClassifier {
    rules: Vec<(Regex, IntegrationErrorKind)>,
}

impl RegexErrorClassifier {
    pub fn new(rules: Vec<(Regex, IntegrationErrorKind)>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, pattern: Regex, kind: IntegrationErrorKind) -> Self {
        self.rules.push((pattern, kind));
        self
    }
}

impl Default for RegexErrorClassifier {
    fn default() -> Self {
        let patterns: [(&str, IntegrationErrorKind); 5] = [
            (
                r"(?i)\bcors\b|access-control-allow-origin|\bpreflight\b",
                IntegrationErrorKind::Cors,
            ),
            (
                r"(?i)\b405\b|method not allowed|method mismatch",
                IntegrationErrorKind::MethodMismatch,
            ),
            (
                r"(?i)\b404\b|\bnot found\b|\bno route\b|cannot (get|post|put|patch|delete) /|endpoint.*(missing|does not exist)",
                IntegrationErrorKind::EndpointNotFound,
            ),
            (
                r"(?i)\b(401|403)\b|unauthori[sz]ed|forbidden|invalid token|jwt|authentication",
                IntegrationErrorKind::Authentication,
            ),
            (
                r"(?i)\b(400|422)\b|payload|schema|validation (error|failed)|unexpected (field|property)|missing (field|property)|type mismatch|expected .* (got|but received)",
                IntegrationErrorKind::PayloadMismatch,
            ),
        ];
        let rules = patterns
            .into_iter()
            .filter_map(|(pattern, kind)| match Regex::new(pattern) {
                Ok(re) => Some((re, kind)),
                Err(e) => {
                    tracing::error!(pattern, error = %e, "Invalid classifier pattern");
                    None
                }
            })
            .collect();
        Self { rules }
    }
}

impl ErrorClassifier for RegexErrorClassifier {
    fn classify(&self, error_output: &str) -> IntegrationErrorKind {
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(error_output))
            .map(|(_, kind)| *kind)
            .unwrap_or(IntegrationErrorKind::Generic)
    }
}
