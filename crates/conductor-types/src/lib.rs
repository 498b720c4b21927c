//! Shared domain types for conductor.
//!
//! This crate contains the core domain types used across the workflow engine:
//! Workflow, Step, WorkflowExecution, WorkflowEvent, Job, and their
//! associated error and configuration types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod job;
pub mod workflow;
