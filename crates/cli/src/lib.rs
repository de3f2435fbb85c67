//! qarun CLI
//!
//! Command-line runner for browser scenarios, with helpers for remote case
//! lookup, scenario generation and failure classification.

pub mod commands;
pub mod output;
