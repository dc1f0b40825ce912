//! Core engine: document types, parsing, stage ordering, run context, execution.

pub mod context;
pub mod error;
pub mod executor;
pub mod locator;
pub mod parser;
pub mod resolver;
pub mod types;
