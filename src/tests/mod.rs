//! Cross-module test suites.
//!
//! Unit tests live next to the code they cover; these suites drive the
//! global scheduler end to end, check containers against reference models
//! and hammer the locks from several host threads at once.

#[macro_use]
mod helpers;

mod stress;
