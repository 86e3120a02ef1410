//! GPU process census.
//!
//! Joins the compute processes every device reports with what the host knows
//! about them: command line, owners, CPU time and resident memory.

pub mod census;
pub mod config;
pub mod procinfo;
pub mod report;
pub mod users;
