//! Data types for the extraction library.

pub mod catalog;
pub mod config;
pub mod indicator;
pub mod observation;
pub mod page;
pub mod summary;
