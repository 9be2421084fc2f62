//! tidegated: assembles the Tidegate admin plane into one process.
//!
//! The binary lives in `main.rs`; [`node`] holds the wiring so it can be
//! driven in-process by tests.

pub mod node;

pub use node::{Node, run_node};
