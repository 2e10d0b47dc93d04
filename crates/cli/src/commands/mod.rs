//! Subcommand implementations

pub mod analyze;
pub mod ledger;
pub mod roofline;
pub mod summary;
