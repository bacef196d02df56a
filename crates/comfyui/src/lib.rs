//! Client library for the remote node-graph image-generation server.
//!
//! Provides the workflow template store, the generic workflow patcher,
//! the low-level REST wrapper, and the polling execution client used to
//! submit graphs and retrieve output artifacts.

pub mod api;
pub mod client;
pub mod graph;
pub mod patch;
pub mod templates;
