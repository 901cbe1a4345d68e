//! Concrete pipeline phases.

pub mod approval;
pub mod classify;
pub mod conflict_resolver;
pub mod contract_fixer;
pub mod e2e_testing;

pub use approval::ApprovalPhase;
pub use classify::{ErrorClassifier, IntegrationErrorKind, RegexErrorClassifier};
pub use conflict_resolver::{ConflictRequest, ConflictResolverPhase};
pub use contract_fixer::{ContractFixerPhase, FixOutcome, error_fingerprint};
pub use e2e_testing::E2ETestingPhase;

pub const CONFLICT_RESOLVER: &str = "conflict-resolver";
pub const CONTRACT_FIXER: &str = "contract-fixer";
pub const E2E_TESTING: &str = "e2e-testing";

/// First `max_chars` characters of `s`, with a marker when cut.
pub(crate) fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
