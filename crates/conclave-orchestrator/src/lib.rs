//! Round-based multi-agent debate orchestration.
//!
//! A job runs a fixed panel of agents through analysis rounds, then debate
//! rounds, then one synthesis call (or a forced-choice decision when the job
//! compares candidates). Invocations inside a round run concurrently; rounds
//! run in order; every outcome lands in the job's append-only step log.
//!
//! # Main types
//!
//! - [`JobManager`]: Create, observe, cancel, delete and await jobs.
//! - [`JobController`]: Drives one job through its lifecycle.
//! - [`RoundDispatcher`]: Bounded concurrent execution of one round.
//! - [`MemoryAssembler`]: Builds analysis and debate prompts from the step log.
//! - [`SynthesisStage`]: Final report or decision, with a deterministic fallback.
//! - [`ParticipantMonitor`]: Per-agent invocation counters.
//! - [`AgentProfile`] / [`AgentDirectory`]: Agent roles and their lookup.

/// Subject context builders.
pub mod context;
/// Bounded concurrent round execution.
pub mod dispatcher;
/// Job lifecycle controller.
pub mod engine;
/// Boundary operations on jobs.
pub mod manager;
pub mod memory;
/// Per-participant invocation monitoring.
pub mod monitor;
/// Default agent roster and the agent directory.
pub mod profiles;
pub mod synthesis;
/// Shared orchestration types.
pub mod types;

pub use context::{FileContextBuilder, StaticContextBuilder, SubjectContextBuilder};
pub use dispatcher::{round_progress, RoundDispatcher};
pub use engine::JobController;
pub use manager::{JobManager, FORCE_CANCEL_REASON};
pub use memory::MemoryAssembler;
pub use monitor::{InvocationMetrics, ParticipantMonitor, ParticipantState, ParticipantStatus};
pub use profiles::{default_profiles, synthesizer_profile, AgentDirectory, InMemoryAgentDirectory};
pub use synthesis::{Decision, SynthesisStage};
pub use types::{
    AgentProfile, JobRequest, OrchestratorConfig, DECISION_AGENT_ID, DECISION_AGENT_NAME,
    SYNTHESIZER_ROLE,
};
