// crates/davz-sim/src/lib.rs

//! Synthetic multi-vertex track events for davz benches, tests and the CLI.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

pub mod generator;

// (Intentionally no broad re-exports so downstream callers import
// stable module paths like `davz_sim::generator::generate_event`.)
