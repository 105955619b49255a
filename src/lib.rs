
//! Compress large, read-mostly `f64` matrices into bitmap-encoded column
//! groups, and run linear-algebra kernels directly on the compressed
//! representation.
//!
//! Columns that share a small set of distinct values are grouped and encoded
//! together, either as segmented offset lists or as run-length encoded row
//! ranges. Columns that do not compress stay in a plain sub-matrix. Matrix
//! kernels (matrix-vector products, transpose-self products, aggregates,
//! scalar maps) operate on the encoded form without decompressing it.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::restriction,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    missing_copy_implementations,
    trivial_numeric_casts,
    redundant_semicolon
)]

#![forbid(unsafe_code)]

pub mod io;
pub mod error;
pub mod matrix;
pub mod bitmap;
pub mod estimate;
pub mod cocode;
pub mod group;
pub mod compressed;
pub mod parallel;

#[macro_use]
extern crate smallvec;

/// Re-exports of the types commonly required to compress a matrix
/// and run kernels on it.
pub mod prelude {

    // main exports
    pub use crate::compressed::{CompressedMatrixBlock, Block};
    pub use crate::matrix::MatrixBlock;

    // secondary data types
    pub use crate::group::{ColGroup, AggFn, Reduce, ScalarOp, SEGMENT_SIZE};
    pub use crate::estimate::{CompressedSizeInfo, SizeEstimator};
    pub use crate::error::{Result, Error};
}
