//! HTTP request handlers, one module per resource.

pub mod captions;
pub mod edit;
pub mod generation;
pub mod health;
pub mod models;
pub mod render;
