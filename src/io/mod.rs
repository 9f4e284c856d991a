//! Diagnostic writers.

pub mod obj;
