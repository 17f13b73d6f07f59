//! Core trait abstractions for the extraction library.
//!
//! Applications implement these to plug in a model provider and a
//! durable store.

pub mod extractor;
pub mod store;
