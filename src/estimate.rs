
//! Compressed size estimation for candidate column sets.
//!
//! The sample estimator projects encoded sizes from a fixed row sample,
//! which is drawn once per compression call so that all planning decisions
//! see the same data. The exact estimator scans every row instead and is
//! also used to re-check groups once their exact bitmap exists.

use crate::bitmap::Bitmap;
use crate::group::SEGMENT_SIZE;
use crate::matrix::MatrixBlock;


/// Sample rows per compression call; the fraction wins for large matrices.
const MIN_SAMPLE_ROWS: usize = 2048;
const SAMPLE_FRACTION: f64 = 0.05;


/// Projected encoded sizes for one candidate column set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedSizeInfo {

    /// Estimated number of distinct non-zero value tuples.
    pub est_cardinality: usize,

    /// Estimated number of rows covered by any non-zero tuple.
    pub nonzero_rows: usize,

    /// Projected bytes for segmented offset-list encoding.
    pub ole_size: usize,

    /// Projected bytes for run-length encoding.
    pub rle_size: usize,
}

impl CompressedSizeInfo {

    /// The smaller of the two encoded sizes.
    pub fn min_size(&self) -> usize {
        self.ole_size.min(self.rle_size)
    }

    /// Exact size info for a fully extracted bitmap.
    pub fn from_bitmap(bitmap: &Bitmap, rows: usize) -> CompressedSizeInfo {
        let cardinality = bitmap.cardinality();
        let nonzero_rows = bitmap.covered_rows();

        CompressedSizeInfo {
            est_cardinality: cardinality,
            nonzero_rows,
            ole_size: ole_bytes(cardinality, nonzero_rows, rows, bitmap.column_count()),
            rle_size: rle_bytes(cardinality, bitmap.run_count(), bitmap.column_count()),
        }
    }
}


/// Offset-list bytes: tuple values, per-tuple bookkeeping,
/// two bytes per covered row, and one segment header per tuple and segment.
pub fn ole_bytes(cardinality: usize, nonzero_rows: usize, rows: usize, column_count: usize) -> usize {
    let segments = (rows + SEGMENT_SIZE - 1) / SEGMENT_SIZE;
    8 * column_count * cardinality + 8 * cardinality
        + 2 * nonzero_rows
        + 2 * cardinality * segments
}

/// Run-length bytes: tuple values, per-tuple bookkeeping, four bytes per run.
pub fn rle_bytes(cardinality: usize, runs: usize, column_count: usize) -> usize {
    8 * column_count * cardinality + 8 * cardinality + 4 * runs
}

/// The bytes one uncompressed column occupies,
/// using the matrix-wide sparsity as a conservative stand-in.
pub fn uncompressed_column_bytes(rows: usize, sparsity: f64) -> usize {
    (8.0 * rows as f64 * sparsity).ceil() as usize
}


/// Projects `CompressedSizeInfo` for arbitrary column sets of one matrix.
pub trait SizeEstimator {
    fn estimate(&self, columns: &[usize]) -> CompressedSizeInfo;
}


/// Estimates from a fixed row sample, extrapolating cardinality with a
/// Good-Turing style coverage correction and scaling run statistics linearly.
#[derive(Debug)]
pub struct SampleEstimator<'m> {
    source: &'m MatrixBlock,
    columns_are_rows: bool,
    rows: usize,
    sample_rows: Vec<usize>,
}

impl<'m> SampleEstimator<'m> {

    /// When `columns_are_rows` is set, the source is the transposed matrix.
    pub fn new(source: &'m MatrixBlock, columns_are_rows: bool) -> Self {
        let rows = if columns_are_rows { source.columns() } else { source.rows() };

        let sample_size = MIN_SAMPLE_ROWS
            .max((rows as f64 * SAMPLE_FRACTION) as usize)
            .min(rows);

        // evenly strided rows, deterministic across calls
        let sample_rows = (0..sample_size)
            .map(|index| index * rows / sample_size)
            .collect();

        SampleEstimator { source, columns_are_rows, rows, sample_rows }
    }

    pub fn sample_size(&self) -> usize { self.sample_rows.len() }
}

impl SizeEstimator for SampleEstimator<'_> {
    fn estimate(&self, columns: &[usize]) -> CompressedSizeInfo {
        let bitmap = Bitmap::extract_sample(self.source, columns, self.columns_are_rows, &self.sample_rows);

        let sample_size = self.sample_rows.len().max(1);
        let scale = self.rows as f64 / sample_size as f64;

        let sample_cardinality = bitmap.cardinality();
        let covered = bitmap.covered_rows();
        let nonzero_rows = ((covered as f64 * scale).round() as usize).min(self.rows);

        let est_cardinality = if covered == 0 { 0 } else {
            let singletons = (0..sample_cardinality)
                .filter(|&tuple| bitmap.offsets(tuple).len() == 1)
                .count();

            // sample coverage after Good-Turing: the mass of unseen tuples
            // roughly equals the mass of tuples seen exactly once
            let coverage = (1.0 - singletons as f64 / covered as f64).max(0.05);

            ((sample_cardinality as f64 / coverage).round() as usize)
                .max(sample_cardinality)
                .min(nonzero_rows)
        };

        let est_runs = ((bitmap.run_count() as f64 * scale).round() as usize)
            .max(est_cardinality)
            .min(nonzero_rows);

        CompressedSizeInfo {
            est_cardinality,
            nonzero_rows,
            ole_size: ole_bytes(est_cardinality, nonzero_rows, self.rows, columns.len()),
            rle_size: rle_bytes(est_cardinality, est_runs, columns.len()),
        }
    }
}


/// Scans every row. Slower than sampling, exact in return.
#[derive(Debug, Clone, Copy)]
pub struct ExactEstimator<'m> {
    source: &'m MatrixBlock,
    columns_are_rows: bool,
    rows: usize,
}

impl<'m> ExactEstimator<'m> {
    pub fn new(source: &'m MatrixBlock, columns_are_rows: bool) -> Self {
        let rows = if columns_are_rows { source.columns() } else { source.rows() };
        ExactEstimator { source, columns_are_rows, rows }
    }
}

impl SizeEstimator for ExactEstimator<'_> {
    fn estimate(&self, columns: &[usize]) -> CompressedSizeInfo {
        let bitmap = Bitmap::extract(self.source, columns, self.columns_are_rows);
        CompressedSizeInfo::from_bitmap(&bitmap, self.rows)
    }
}
