//! Well-known shared-data keys exchanged between phases.

/// Error text captured by the integration test phase.
pub const E2E_ERRORS: &str = "e2eErrors";
/// Inferred [`IntegrationErrorKind`](crate::phases::classify::IntegrationErrorKind) of `E2E_ERRORS`.
pub const E2E_ERROR_TYPE: &str = "e2eErrorType";
/// Set by the integration test phase when the contract fixer should run.
pub const E2E_REQUESTS_FIX: &str = "e2eRequestsFix";
/// Set by the contract fixer when the integration tests should run again.
pub const E2E_RERUN_REQUESTED: &str = "e2eRerunRequested";
/// Structured issues reported by the integration test agent.
pub const E2E_ISSUES: &str = "e2eIssues";
/// Set once the contract fixer abandoned a recurring error.
pub const CONTRACT_FIXER_MAX_RETRIES_REACHED: &str = "contractFixerMaxRetriesReached";
/// Outcome of the last contract fixer run.
pub const CONTRACT_FIXER_RESULT: &str = "contractFixerResult";
/// [`ConflictRequest`](crate::phases::conflict_resolver::ConflictRequest) from a rejecting review.
pub const MERGE_CONFLICT: &str = "mergeConflict";
/// Name of the phase a phase asks the coordinator to run next.
pub const NEXT_PHASE: &str = "nextPhase";
