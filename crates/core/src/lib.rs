//! Domain types for the promokit content-generation service.
//!
//! This crate has zero internal dependencies so it can be used by the
//! workflow client, the inference engine, and the API layer alike. It
//! holds the error taxonomy, the generation parameter types, and the
//! model registry (declarative model-list file, validation report, and
//! the layered runtime settings resolver).

pub mod error;
pub mod params;
pub mod registry;
