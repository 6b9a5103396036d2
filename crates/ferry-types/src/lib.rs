//! Pure data types for ferry: values, call descriptions, error kinds and jobs.
//!
//! This crate is a leaf dependency with no async runtime and no I/O, so
//! front ends can describe calls and read job records without pulling in
//! ferry-kernel.

pub mod call;
pub mod error;
pub mod job;
pub mod value;

pub use call::*;
pub use error::*;
pub use job::*;
pub use value::*;
