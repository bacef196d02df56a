//! Diffusion backend engine.
//!
//! Owns the seam between the service and its model runtimes: the
//! [`backend::DiffusionBackend`] trait, the runtime-independent load
//! planning, the mutex-guarded resident-backend manager with its
//! primary→fallback loading chain, the remote node-graph backend, and
//! the caption/prompt-optimization LLM client.
//!
//! In-process pipelines live behind the `local` cargo feature; the
//! default build serves every generation through the remote backend.

pub mod backend;
pub mod caption;
pub mod loader;
pub mod manager;
pub mod plan;
pub mod remote;

#[cfg(feature = "local")]
pub mod local;
