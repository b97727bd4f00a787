//! Subcommand implementations

pub mod alerts;
pub mod inspect;
pub mod predict;
