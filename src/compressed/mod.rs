
//! The compressed matrix block: an immutable list of encoded column groups
//! with compression, decompression, kernels and binary serialization.

pub mod plan;
pub mod kernels;

use log::warn;

use crate::error::{Error, Result, UnitResult, i32_to_usize, i64_to_u64, usize_to_i32};
use crate::group::ColGroup;
use crate::io::{Data, Read, Write};
use crate::matrix::{MatrixBlock, SPARSITY_TURN_POINT};

pub use self::plan::{CompressionSettings, CompressionStatistics};


/// Whether compression works on a transposed copy of the input,
/// making per-column scans contiguous.
pub const TRANSPOSE_INPUT: bool = true;

/// Rows not covered by any tuple of a group are implicitly zero;
/// the all-zero tuple is never stored.
pub const MATERIALIZE_ZEROS: bool = false;

/// Aggregates on blocks smaller than this stay single-threaded.
pub const MIN_PAR_AGG_THRESHOLD: usize = 16 * 1024 * 1024;


/// A matrix held as compressed column groups. Immutable once built;
/// operations that would mutate it decompress into a fresh
/// [`MatrixBlock`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedMatrixBlock {
    rows: usize,
    columns: usize,
    nonzeros: u64,

    /// Disjoint groups covering all columns.
    /// The uncompressed group, if any, comes first.
    groups: Vec<ColGroup>,
}

impl CompressedMatrixBlock {

    /// Compress with default settings: single-threaded, sample-based estimation.
    pub fn compress(source: &MatrixBlock) -> Result<Self> {
        Self::compress_with(source, CompressionSettings::default())
    }

    /// Compress using a pool of `threads` workers for the
    /// classification and encoding phases.
    pub fn compress_multi_threaded(source: &MatrixBlock, threads: usize) -> Result<Self> {
        Self::compress_with(source, CompressionSettings { threads, .. CompressionSettings::default() })
    }

    pub fn compress_with(source: &MatrixBlock, settings: CompressionSettings) -> Result<Self> {
        plan::compress(source, settings).map(|(compressed, _)| compressed)
    }

    /// Compress and report what each phase did and how long it took.
    pub fn compress_with_stats(source: &MatrixBlock, settings: CompressionSettings)
        -> Result<(Self, CompressionStatistics)>
    {
        plan::compress(source, settings)
    }

    pub(crate) fn from_parts(rows: usize, columns: usize, groups: Vec<ColGroup>) -> Self {
        let nonzeros = groups.iter().map(|group| group.count_nonzeros()).sum();
        CompressedMatrixBlock { rows, columns, nonzeros, groups }
    }

    pub fn rows(&self) -> usize { self.rows }
    pub fn columns(&self) -> usize { self.columns }
    pub fn nonzeros(&self) -> u64 { self.nonzeros }
    pub fn groups(&self) -> &[ColGroup] { &self.groups }

    pub fn sparsity(&self) -> f64 {
        if self.rows == 0 || self.columns == 0 { 0.0 }
        else { self.nonzeros as f64 / (self.rows as f64 * self.columns as f64) }
    }

    /// The cell value, resolved through the owning group.
    pub fn get(&self, row: usize, column: usize) -> f64 {
        debug_assert!(row < self.rows && column < self.columns, "cell index out of range");

        self.groups.iter()
            .find(|group| group.columns().binary_search(&column).is_ok())
            .map(|group| group.get(row, column))
            .unwrap_or(0.0)
    }

    /// The approximate number of bytes the compressed form occupies in memory.
    pub fn in_memory_size(&self) -> usize {
        self.groups.iter().map(|group| group.in_memory_size()).sum()
    }

    /// Materialize the full uncompressed matrix.
    /// Chooses sparse storage for sufficiently sparse content,
    /// preallocating each row from the per-row non-zero counts.
    pub fn decompress(&self) -> Result<MatrixBlock> {
        let mut target = if self.sparsity() > SPARSITY_TURN_POINT {
            MatrixBlock::dense_zeros(self.rows, self.columns)
        }
        else {
            let mut counts = vec![0_usize; self.rows];
            for group in &self.groups {
                group.count_nonzeros_per_row(&mut counts, 0, self.rows);
            }

            let mut target = MatrixBlock::sparse_empty(self.rows, self.columns);
            target.preallocate_sparse_rows(&counts)?;
            target
        };

        for group in &self.groups {
            group.decompress_into(&mut target, 0, self.rows);
        }

        target.sort_sparse_rows();
        target.recompute_nonzeros();
        Ok(target)
    }

    /// Decompress on behalf of an operation the compressed form
    /// does not implement. Logs one warning naming the operation.
    pub fn decompress_for(&self, operation: &str) -> Result<MatrixBlock> {
        warn!("operation {} is not supported on the compressed form, decompressing", operation);
        self.decompress()
    }

    /// Unsupported on the compressed form: decompresses and delegates.
    pub fn transpose(&self) -> Result<MatrixBlock> {
        Ok(self.decompress_for("transpose")?.transpose())
    }

    /// Unsupported on the compressed form: decompresses and delegates.
    pub fn slice_rows(&self, row_low: usize, row_high: usize) -> Result<MatrixBlock> {
        self.decompress_for("slice_rows")?.slice_rows(row_low, row_high)
    }

    /// Append the columns of another compressed matrix to the right of this
    /// one. Group structure is kept, no columns are re-grouped.
    pub fn cbind(&self, other: &CompressedMatrixBlock) -> Result<CompressedMatrixBlock> {
        if self.rows != other.rows {
            return Err(Error::invalid("appended matrices must have the same row count"));
        }

        let mut groups = self.groups.clone();
        groups.extend(other.groups.iter().map(|group| {
            let mut shifted = group.clone();
            shifted.shift_columns(self.columns);
            shifted
        }));

        Ok(CompressedMatrixBlock {
            rows: self.rows,
            columns: self.columns + other.columns,
            nonzeros: self.nonzeros + other.nonzeros,
            groups,
        })
    }

    /// Append an uncompressed matrix, compressing it first.
    pub fn cbind_uncompressed(&self, other: &MatrixBlock) -> Result<CompressedMatrixBlock> {
        self.cbind(&Self::compress(other)?)
    }


    // binary layout: u8 compressed flag, i32 rows, i32 columns, i64 nonzeros,
    // i32 group count, then each group

    /// The exact number of bytes `write` will produce.
    pub fn exact_size_on_disk(&self) -> usize {
        u8::BYTE_SIZE + 3 * i32::BYTE_SIZE + i64::BYTE_SIZE
            + self.groups.iter().map(|group| group.byte_size()).sum::<usize>()
    }

    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        1_u8.write(write)?;
        usize_to_i32(self.rows, "row count too large for stream")?.write(write)?;
        usize_to_i32(self.columns, "column count too large for stream")?.write(write)?;
        (self.nonzeros as i64).write(write)?;
        usize_to_i32(self.groups.len(), "group count too large for stream")?.write(write)?;

        for group in &self.groups {
            group.write(write)?;
        }

        Ok(())
    }

    /// Read a compressed matrix. Fails if the stream holds an uncompressed
    /// block; use [`Block::read`] to accept both.
    pub fn read(read: &mut impl Read) -> Result<Self> {
        match Block::read(read)? {
            Block::Compressed(compressed) => Ok(compressed),
            Block::Uncompressed(_) => Err(Error::invalid("stream holds an uncompressed block")),
        }
    }

    fn read_body(read: &mut impl Read) -> Result<Self> {
        let rows = i32_to_usize(i32::read(read)?, "negative row count")?;
        let columns = i32_to_usize(i32::read(read)?, "negative column count")?;
        let nonzeros = i64_to_u64(i64::read(read)?, "negative non-zero count")?;
        let group_count = i32_to_usize(i32::read(read)?, "negative group count")?;

        let mut groups = Vec::with_capacity(group_count.min(columns));
        for _ in 0..group_count {
            groups.push(ColGroup::read(read, rows, columns)?);
        }

        validate_group_coverage(&groups, columns)?;

        Ok(CompressedMatrixBlock { rows, columns, nonzeros, groups })
    }
}


/// Groups must cover every column exactly once.
fn validate_group_coverage(groups: &[ColGroup], columns: usize) -> UnitResult {
    let mut seen = vec![false; columns];

    for group in groups {
        for &column in group.columns() {
            if seen[column] {
                return Err(Error::invalid("column appears in more than one group"));
            }
            seen[column] = true;
        }
    }

    if seen.iter().any(|&covered| !covered) {
        return Err(Error::invalid("some columns are not covered by any group"));
    }

    Ok(())
}


/// A serialized matrix: compressed groups, or a plain block for matrices
/// that were never compressed. The one-byte flag at the start of the
/// stream distinguishes the two.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Uncompressed(MatrixBlock),
    Compressed(CompressedMatrixBlock),
}

impl Block {

    pub fn exact_size_on_disk(&self) -> usize {
        match self {
            Block::Uncompressed(block) => u8::BYTE_SIZE + block.byte_size(),
            Block::Compressed(compressed) => compressed.exact_size_on_disk(),
        }
    }

    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        match self {
            Block::Uncompressed(block) => {
                0_u8.write(write)?;
                block.write(write)
            }
            Block::Compressed(compressed) => compressed.write(write),
        }
    }

    pub fn read(read: &mut impl Read) -> Result<Self> {
        let compressed = u8::read(read)?;
        match compressed {
            0 => Ok(Block::Uncompressed(MatrixBlock::read(read)?)),
            1 => Ok(Block::Compressed(CompressedMatrixBlock::read_body(read)?)),
            _ => Err(Error::invalid("compressed flag out of range")),
        }
    }
}
