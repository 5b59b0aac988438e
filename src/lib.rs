//! Rampack library exports.
//!
//! The CLI in `main.rs` is a thin layer over these modules; they are
//! exported so integration tests can drive image assembly directly and
//! inspect the resulting archives in memory.

pub mod archive;
pub mod builder;
pub mod cpio;
pub mod env;
pub mod image;
pub mod process;
pub mod resolve;
pub mod stats;
pub mod template;
pub mod tree;
