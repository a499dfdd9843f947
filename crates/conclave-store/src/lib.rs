//! Job records and job stores for Conclave.
//!
//! # Main types
//!
//! - [`Job`]: A unit of orchestrated work and its append-only [`Step`] log.
//! - [`JobPatch`]: Partial update of a job's scalar fields, validated by [`Job::apply`].
//! - [`JobStore`]: Storage trait with atomic update and atomic step append.
//! - [`InMemoryJobStore`] / [`FileJobStore`]: The two bundled backends.

/// File-backed store (JSON record + JSONL step log per job).
pub mod file;
/// Job, step, and status types.
pub mod job;
/// The `JobStore` trait and the in-memory backend.
pub mod store;

pub use file::FileJobStore;
pub use job::{
    Job, JobPatch, JobStatus, ParticipantRef, Phase, StatusFilter, Step, Subject, SubjectMode,
    ERROR_PREFIX,
};
pub use store::{InMemoryJobStore, JobStore};
