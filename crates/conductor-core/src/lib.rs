//! Workflow engine logic and repository trait definitions for conductor.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements. It depends only on `conductor-types` -- never on
//! `conductor-infra` or any database crate.

pub mod execution;
pub mod expression;
pub mod repository;
pub mod workflow;
