//! Utility functions

pub mod log_sanitizer;
