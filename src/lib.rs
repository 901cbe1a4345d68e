pub mod agent;
pub mod conductor_config;
pub mod context;
pub mod errors;
pub mod git;
pub mod notify;
pub mod orchestrator;
pub mod phase;
pub mod phases;
pub mod store;

pub use conductor_common as common;
