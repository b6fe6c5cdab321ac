//! Asynchronous machine-translation pipeline for organization profiles.
//!
//! Pending translation jobs are claimed in batches, their organization fields
//! are sent through a pipeline-based MT provider, and the results are stored
//! per (organization, language, field).

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline_config;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod store;
pub mod translation;
