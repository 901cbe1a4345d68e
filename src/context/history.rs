//! Bounded conversation history for context compaction.
//!
//! Phases append the prompts they send and the answers they get back. When
//! the transcript grows past its character budget the oldest turns are
//! folded into a one-line summary so later prompts can still reference
//! what happened without carrying the full text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default character budget, roughly 50k tokens.
pub const DEFAULT_HISTORY_BUDGET_CHARS: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Prompt,
    Response,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub agent: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
    budget_chars: usize,
    summary: Vec<String>,
    turns_compacted: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::with_budget(DEFAULT_HISTORY_BUDGET_CHARS)
    }
}

impl ConversationHistory {
    pub fn with_budget(budget_chars: usize) -> Self {
        Self {
            turns: Vec::new(),
            budget_chars,
            summary: Vec::new(),
            turns_compacted: 0,
        }
    }

    pub fn push(&mut self, role: TurnRole, agent: &str, content: &str) {
        self.turns.push(ConversationTurn {
            role,
            agent: agent.to_string(),
            content: content.to_string(),
            at: Utc::now(),
        });
        self.compact_if_needed();
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn total_chars(&self) -> usize {
        self.turns.iter().map(|t| t.content.len()).sum()
    }

    pub fn turns_compacted(&self) -> usize {
        self.turns_compacted
    }

    /// Drop the oldest turns until the transcript fits the budget.
    /// The newest turn is always kept, even if it alone exceeds the budget.
    fn compact_if_needed(&mut self) {
        let mut total = self.total_chars();
        let mut drop_count = 0;
        while total > self.budget_chars && drop_count + 1 < self.turns.len() {
            total -= self.turns[drop_count].content.len();
            drop_count += 1;
        }
        if drop_count == 0 {
            return;
        }

        let dropped: Vec<ConversationTurn> = self.turns.drain(..drop_count).collect();
        let mut agents: Vec<&str> = Vec::new();
        for turn in &dropped {
            if !agents.contains(&turn.agent.as_str()) {
                agents.push(turn.agent.as_str());
            }
        }
        self.summary.push(format!(
            "{} earlier turn(s) from {} compacted ({} chars)",
            dropped.len(),
            agents.join(", "),
            dropped.iter().map(|t| t.content.len()).sum::<usize>()
        ));
        self.turns_compacted += dropped.len();
        tracing::debug!(
            dropped = dropped.len(),
            remaining_chars = total,
            "compacted conversation history"
        );
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.summary.is_empty()
    }

    /// Render the whole transcript.
    pub fn render(&self) -> String {
        self.render_recent(usize::MAX)
    }

    /// Render the newest turns that fit in `max_chars`, oldest first.
    ///
    /// Turns that do not fit are counted in a trailing-omission note. The
    /// newest turn is cut down to the budget rather than dropped.
    pub fn render_recent(&self, max_chars: usize) -> String {
        let mut blocks: Vec<String> = Vec::new();
        let mut used = 0usize;
        for turn in self.turns.iter().rev() {
            let block = render_turn(turn);
            let len = block.chars().count();
            if used.saturating_add(len) > max_chars {
                if blocks.is_empty() {
                    blocks.push(block.chars().take(max_chars).collect());
                }
                break;
            }
            used += len;
            blocks.push(block);
        }
        let omitted = self.turns.len() - blocks.len();

        let mut out = String::new();
        for line in &self.summary {
            out.push('[');
            out.push_str(line);
            out.push_str("]\n");
        }
        if omitted > 0 {
            out.push_str(&format!("[{} older turn(s) omitted]\n", omitted));
        }
        for block in blocks.iter().rev() {
            out.push_str(block);
        }
        out
    }
}

fn render_turn(turn: &ConversationTurn) -> String {
    let label = match turn.role {
        TurnRole::Prompt => "prompt",
        TurnRole::Response => "response",
    };
    format!("--- {} ({}) ---\n{}\n", turn.agent, label, turn.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_under_budget_keeps_everything() {
        let mut h = ConversationHistory::with_budget(100);
        h.push(TurnRole::Prompt, "fixer", "abc");
        h.push(TurnRole::Response, "fixer", "def");
        assert_eq!(h.turns().len(), 2);
        assert_eq!(h.turns_compacted(), 0);
        assert!(!h.render().contains("compacted"));
    }

    #[test]
    fn test_over_budget_drops_oldest_and_summarizes() {
        let mut h = ConversationHistory::with_budget(10);
        h.push(TurnRole::Prompt, "e2e", "aaaaaa");
        h.push(TurnRole::Response, "e2e", "bbbbbb");
        h.push(TurnRole::Prompt, "fixer", "cccc");
        assert!(h.total_chars() <= 10);
        assert_eq!(h.turns_compacted(), 1);
        let rendered = h.render();
        assert!(rendered.contains("1 earlier turn(s) from e2e compacted"));
        assert!(rendered.contains("cccc"));
        assert!(!rendered.contains("aaaaaa"));
    }

    #[test]
    fn test_render_recent_keeps_newest_turns() {
        let mut h = ConversationHistory::default();
        h.push(TurnRole::Prompt, "e2e", "first run");
        h.push(TurnRole::Response, "e2e", "404 on /api/orders");
        h.push(TurnRole::Prompt, "contract-fixer", "fix attempt 1");
        h.push(TurnRole::Response, "contract-fixer", "added route");

        let full = h.render();
        assert!(full.find("first run").unwrap() < full.find("added route").unwrap());

        let recent = h.render_recent(100);
        assert!(recent.contains("added route"));
        assert!(recent.contains("fix attempt 1"));
        assert!(!recent.contains("first run"));
        assert!(recent.starts_with("[2 older turn(s) omitted]"));
    }

    #[test]
    fn test_render_recent_truncates_single_oversized_turn() {
        let mut h = ConversationHistory::default();
        h.push(TurnRole::Response, "e2e", &"x".repeat(500));
        let recent = h.render_recent(50);
        assert_eq!(recent.chars().count(), 50);
        assert!(ConversationHistory::default().render_recent(50).is_empty());
        assert!(ConversationHistory::default().is_empty());
    }

    #[test]
    fn test_newest_turn_survives_even_when_too_large() {
        let mut h = ConversationHistory::with_budget(4);
        h.push(TurnRole::Prompt, "e2e", "ab");
        h.push(TurnRole::Response, "e2e", "0123456789");
        assert_eq!(h.turns().len(), 1);
        assert_eq!(h.turns()[0].content, "0123456789");
    }
}
