//! Model provider implementations for the extraction library.
//!
//! This module provides reference implementations of the `Extractor` trait.
//! Users can use these directly or implement their own.

mod credentials;
mod openai;

pub use credentials::ApiKey;
pub use openai::OpenAiExtractor;
