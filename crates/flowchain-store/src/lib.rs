//! # Flowchain Store
//!
//! File-system persistence for execution records, so a run suspended in one
//! process can be resumed or cancelled from another.

pub mod file;

pub use file::FileExecutionStore;
