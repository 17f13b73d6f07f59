// CSRD Indicator Extraction - CLI and dashboard API
//
// This crate wires the extraction library to a SQLite store and an
// OpenAI-compatible model, and serves the results over HTTP.

pub mod config;
pub mod discovery;
pub mod server;

pub use config::*;
