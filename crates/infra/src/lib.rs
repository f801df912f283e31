//! Infrastructure layer: stores, job queue, wake channel, orchestration.
//!
//! Every store has an in-memory implementation for tests and local runs and a
//! Postgres implementation for deployments.

pub mod approval;
pub mod audit;
pub mod config;
pub mod db;
pub mod jobs;
pub mod orchestrator;
pub mod publish;
pub mod registry;
pub mod wake;

#[cfg(test)]
mod integration_tests;
