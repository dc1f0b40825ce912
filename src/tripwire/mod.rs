//! Tripwire: provenance tracing and BLAKE3 document digests.

pub mod eventlog;
pub mod hasher;
