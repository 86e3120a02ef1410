//! Shared helpers for the GPU tool binaries: logging setup, version string and
//! unit conversion between raw quantities and their human-readable forms.

mod build_info;
pub mod logging;
pub mod units;
pub mod version;
