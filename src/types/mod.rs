//! Core types and data structures for the loop-prevention engine.

pub mod detection;
pub mod execution;
pub mod health;
pub mod prevention;
pub mod recovery;

pub use detection::*;
pub use execution::*;
pub use health::*;
pub use prevention::*;
pub use recovery::*;
