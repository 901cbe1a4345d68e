use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

/// How strongly a directive should steer the next agent prompt.
///
/// Ordering follows urgency: `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectivePriority {
    Critical,
    High,
    Normal,
    Suggestion,
}

impl DirectivePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectivePriority::Critical => "critical",
            DirectivePriority::High => "high",
            DirectivePriority::Normal => "normal",
            DirectivePriority::Suggestion => "suggestion",
        }
    }
}

impl std::str::FromStr for DirectivePriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(DirectivePriority::Critical),
            "high" => Ok(DirectivePriority::High),
            "normal" => Ok(DirectivePriority::Normal),
            "suggestion" => Ok(DirectivePriority::Suggestion),
            _ => Err(ParseEnumError {
                kind: "directive priority",
                value: s.to_string(),
                expected: "critical, high, normal, suggestion",
            }),
        }
    }
}

/// Instruction injected by a human while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub id: String,
    pub content: String,
    pub priority: DirectivePriority,
    /// Restrict the directive to one agent type; `None` applies to all agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Directive {
    pub fn new(content: &str, priority: DirectivePriority, target_agent: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            priority,
            target_agent: target_agent.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    /// Whether this directive should be shown to `agent_type`.
    pub fn applies_to(&self, agent_type: Option<&str>) -> bool {
        match (&self.target_agent, agent_type) {
            (None, _) => true,
            (Some(target), Some(agent)) => target.eq_ignore_ascii_case(agent),
            (Some(_), None) => false,
        }
    }
}
