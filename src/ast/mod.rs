//! AST node definitions for parsed Jakefiles.

pub mod types;

pub use types::*;
