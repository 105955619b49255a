
//! Column groups: the encoded unit of a compressed matrix.
//!
//! Each group owns a disjoint set of columns and encodes them either as
//! segmented offset lists, run-length encoded row ranges, or a plain
//! sub-matrix for columns that do not compress. All matrix kernels are
//! implemented per group and dispatched over this variant.

pub mod uncompressed;
pub mod ole;
pub mod rle;

use smallvec::SmallVec;

use crate::error::{Error, Result, UnitResult, i32_to_usize};
use crate::io::{Data, Read, Write};
use crate::matrix::MatrixBlock;

pub use self::uncompressed::UncompressedGroup;
pub use self::ole::OleGroup;
pub use self::rle::RleGroup;


/// Rows per segment. Offsets within a segment fit into 16 bits.
pub const SEGMENT_SIZE: usize = 65536;

/// Sorted global column indices of one group.
pub type ColumnIndices = SmallVec<[usize; 8]>;

/// The number of segments a matrix with this many rows spans.
pub fn segment_count(rows: usize) -> usize {
    (rows + SEGMENT_SIZE - 1) / SEGMENT_SIZE
}


/// The aggregation function of a unary aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    Sum,
    SumSquares,
    Min,
    Max,
}

impl AggFn {

    /// The value an accumulator starts from.
    pub fn identity(self) -> f64 {
        match self {
            AggFn::Sum | AggFn::SumSquares => 0.0,
            AggFn::Min => f64::INFINITY,
            AggFn::Max => f64::NEG_INFINITY,
        }
    }

    /// Transform one cell before accumulation.
    pub fn map(self, value: f64) -> f64 {
        match self {
            AggFn::SumSquares => value * value,
            _ => value,
        }
    }

    /// Commutative combination of two partial results.
    pub fn combine(self, left: f64, right: f64) -> f64 {
        match self {
            AggFn::Sum | AggFn::SumSquares => left + right,
            AggFn::Min => left.min(right),
            AggFn::Max => left.max(right),
        }
    }

    /// Whether partial counts can be multiplied in instead of iterated.
    pub fn is_additive(self) -> bool {
        matches!(self, AggFn::Sum | AggFn::SumSquares)
    }
}


/// The shape of a unary aggregate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {

    /// One value over all cells.
    All,

    /// One value per row.
    PerRow,

    /// One value per column.
    PerColumn,
}


/// A scalar operation applied to every cell of the matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarOp {
    Multiply(f64),
    Divide(f64),
    Add(f64),
    Subtract(f64),
}

impl ScalarOp {
    pub fn apply(self, value: f64) -> f64 {
        match self {
            ScalarOp::Multiply(operand) => value * operand,
            ScalarOp::Divide(operand) => value / operand,
            ScalarOp::Add(operand) => value + operand,
            ScalarOp::Subtract(operand) => value - operand,
        }
    }

    /// Whether the operation maps zero to zero,
    /// keeping implicitly encoded zero cells valid.
    pub fn preserves_zero(self) -> bool {
        self.apply(0.0) == 0.0
    }
}


// on-disk group type tags
const TAG_UNCOMPRESSED: u8 = 0;
const TAG_OLE: u8 = 1;
const TAG_RLE: u8 = 2;


/// One encoded column group of a compressed matrix.
#[derive(Debug, Clone, PartialEq)]
pub enum ColGroup {
    Uncompressed(UncompressedGroup),
    Ole(OleGroup),
    Rle(RleGroup),
}

impl ColGroup {

    /// The sorted global column indices this group covers.
    pub fn columns(&self) -> &[usize] {
        match self {
            ColGroup::Uncompressed(group) => group.columns(),
            ColGroup::Ole(group) => group.columns(),
            ColGroup::Rle(group) => group.columns(),
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            ColGroup::Uncompressed(group) => group.rows(),
            ColGroup::Ole(group) => group.rows(),
            ColGroup::Rle(group) => group.rows(),
        }
    }

    pub fn encoding_name(&self) -> &'static str {
        match self {
            ColGroup::Uncompressed(_) => "uncompressed",
            ColGroup::Ole(_) => "ole",
            ColGroup::Rle(_) => "rle",
        }
    }

    /// The cell value at a global column of this group.
    pub fn get(&self, row: usize, column: usize) -> f64 {
        let position = match self.columns().binary_search(&column) {
            Ok(position) => position,
            Err(_) => return 0.0,
        };

        match self {
            ColGroup::Uncompressed(group) => group.get(row, position),
            ColGroup::Ole(group) => group.get(row, position),
            ColGroup::Rle(group) => group.get(row, position),
        }
    }

    /// The number of cells that are not zero.
    pub fn count_nonzeros(&self) -> u64 {
        match self {
            ColGroup::Uncompressed(group) => group.count_nonzeros(),
            ColGroup::Ole(group) => group.count_nonzeros(),
            ColGroup::Rle(group) => group.count_nonzeros(),
        }
    }

    /// Add the per-row non-zero counts of rows `row_low .. row_high`
    /// into `counts`, indexed relative to `row_low`.
    pub fn count_nonzeros_per_row(&self, counts: &mut [usize], row_low: usize, row_high: usize) {
        match self {
            ColGroup::Uncompressed(group) => group.count_nonzeros_per_row(counts, row_low, row_high),
            ColGroup::Ole(group) => group.count_nonzeros_per_row(counts, row_low, row_high),
            ColGroup::Rle(group) => group.count_nonzeros_per_row(counts, row_low, row_high),
        }
    }

    /// Write this group's columns of rows `row_low .. row_high` into the
    /// full-width target block. Sparse targets must be preallocated and
    /// sorted afterwards.
    pub fn decompress_into(&self, target: &mut MatrixBlock, row_low: usize, row_high: usize) {
        match self {
            ColGroup::Uncompressed(group) => group.decompress_into(target, row_low, row_high),
            ColGroup::Ole(group) => group.decompress_into(target, row_low, row_high),
            ColGroup::Rle(group) => group.decompress_into(target, row_low, row_high),
        }
    }

    /// Extract one column of this group as a dense vector.
    pub(crate) fn decompress_column(&self, position: usize, target: &mut [f64]) {
        match self {
            ColGroup::Uncompressed(group) => group.decompress_column(position, target),
            ColGroup::Ole(group) => group.decompress_column(position, target),
            ColGroup::Rle(group) => group.decompress_column(position, target),
        }
    }

    /// Accumulate `target[row - row_low] += sum_c cell(row, c) * vector[c]`
    /// for the rows covered by `target`. The uncompressed variant overwrites
    /// its slice instead when `accumulate` is false; encoded variants always add.
    pub fn right_mult_by_vector(&self, vector: &[f64], target: &mut [f64], row_low: usize, accumulate: bool) {
        match self {
            ColGroup::Uncompressed(group) => group.right_mult_by_vector(vector, target, row_low, accumulate),
            ColGroup::Ole(group) => group.right_mult_by_vector(vector, target, row_low),
            ColGroup::Rle(group) => group.right_mult_by_vector(vector, target, row_low),
        }
    }

    /// Accumulate `target[c] += sum_r vector[r] * cell(r, c)`
    /// into the full-width target, for this group's columns.
    pub fn left_mult_by_row_vector(&self, vector: &[f64], target: &mut [f64]) {
        self.left_mult_from_position(vector, target, 0)
    }

    /// Like `left_mult_by_row_vector`, restricted to the group columns
    /// at or after the given position.
    pub(crate) fn left_mult_from_position(&self, vector: &[f64], target: &mut [f64], first_position: usize) {
        match self {
            ColGroup::Uncompressed(group) => group.left_mult_from_position(vector, target, first_position),
            ColGroup::Ole(group) => group.left_mult_from_position(vector, target, first_position),
            ColGroup::Rle(group) => group.left_mult_from_position(vector, target, first_position),
        }
    }

    /// Fold the cells of rows `row_low .. row_high` into the accumulator.
    /// The target holds one value for `Reduce::All`, one per row relative to
    /// `row_low` for `Reduce::PerRow`, and one per global column for
    /// `Reduce::PerColumn`. Accumulators start at `function.identity()`.
    pub fn unary_aggregate(&self, function: AggFn, reduce: Reduce, target: &mut [f64], row_low: usize, row_high: usize) {
        match self {
            ColGroup::Uncompressed(group) => group.unary_aggregate(function, reduce, target, row_low, row_high),
            ColGroup::Ole(group) => group.unary_aggregate(function, reduce, target, row_low, row_high),
            ColGroup::Rle(group) => group.unary_aggregate(function, reduce, target, row_low, row_high),
        }
    }

    /// Apply a scalar operation to every cell of this group.
    ///
    /// For encoded groups this only rewrites the tuple values, unless the
    /// operation moves zero while some rows are implicitly zero; those
    /// groups are materialized into an uncompressed group instead.
    pub fn scalar_op(&self, op: ScalarOp) -> ColGroup {
        match self {
            ColGroup::Uncompressed(group) => ColGroup::Uncompressed(group.scalar_op(op)),
            ColGroup::Ole(group) => group.scalar_op(op),
            ColGroup::Rle(group) => group.scalar_op(op),
        }
    }

    /// Move all column indices right, for appending groups to a wider matrix.
    pub(crate) fn shift_columns(&mut self, offset: usize) {
        match self {
            ColGroup::Uncompressed(group) => group.shift_columns(offset),
            ColGroup::Ole(group) => group.shift_columns(offset),
            ColGroup::Rle(group) => group.shift_columns(offset),
        }
    }

    /// The approximate number of bytes this group occupies in memory.
    pub fn in_memory_size(&self) -> usize {
        match self {
            ColGroup::Uncompressed(group) => group.in_memory_size(),
            ColGroup::Ole(group) => group.in_memory_size(),
            ColGroup::Rle(group) => group.in_memory_size(),
        }
    }


    // binary layout: u8 type tag, i32-sized ascending column list, then the
    // variant body. `rows` is stored once on the containing matrix and passed
    // back in when reading.

    pub fn byte_size(&self) -> usize {
        let header = u8::BYTE_SIZE + i32::BYTE_SIZE + self.columns().len() * i32::BYTE_SIZE;

        header + match self {
            ColGroup::Uncompressed(group) => group.body_byte_size(),
            ColGroup::Ole(group) => group.body_byte_size(),
            ColGroup::Rle(group) => group.body_byte_size(),
        }
    }

    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        let tag = match self {
            ColGroup::Uncompressed(_) => TAG_UNCOMPRESSED,
            ColGroup::Ole(_) => TAG_OLE,
            ColGroup::Rle(_) => TAG_RLE,
        };

        tag.write(write)?;

        let columns: Vec<i32> = self.columns().iter()
            .map(|&column| crate::error::usize_to_i32(column, "column index too large for stream"))
            .collect::<Result<_>>()?;

        i32::write_i32_sized_slice(write, &columns)?;

        match self {
            ColGroup::Uncompressed(group) => group.write_body(write),
            ColGroup::Ole(group) => group.write_body(write),
            ColGroup::Rle(group) => group.write_body(write),
        }
    }

    pub fn read(read: &mut impl Read, rows: usize, matrix_columns: usize) -> Result<Self> {
        let tag = u8::read(read)?;

        let columns = i32::read_i32_sized_vec(read, matrix_columns)?;
        let columns: ColumnIndices = columns.into_iter()
            .map(|column| i32_to_usize(column, "negative column index"))
            .collect::<Result<_>>()?;

        validate_columns(&columns, matrix_columns)?;

        match tag {
            TAG_UNCOMPRESSED => Ok(ColGroup::Uncompressed(UncompressedGroup::read_body(read, columns, rows)?)),
            TAG_OLE => Ok(ColGroup::Ole(OleGroup::read_body(read, columns, rows)?)),
            TAG_RLE => Ok(ColGroup::Rle(RleGroup::read_body(read, columns, rows)?)),
            _ => Err(Error::invalid("column group type tag")),
        }
    }
}


/// Column lists must be non-empty, strictly ascending, and in range.
pub fn validate_columns(columns: &[usize], matrix_columns: usize) -> UnitResult {
    if columns.is_empty() {
        return Err(Error::invalid("empty column group"));
    }

    if !columns.windows(2).all(|pair| pair[0] < pair[1]) {
        return Err(Error::invalid("column indices must be strictly ascending"));
    }

    if *columns.last().unwrap_or(&0) >= matrix_columns {
        return Err(Error::invalid("column index out of range"));
    }

    Ok(())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalar_op_zero_preservation(){
        assert!(ScalarOp::Multiply(3.0).preserves_zero());
        assert!(ScalarOp::Subtract(0.0).preserves_zero());
        assert!(!ScalarOp::Add(1.0).preserves_zero());
        assert!(!ScalarOp::Divide(0.0).preserves_zero()); // zero over zero is not zero
    }

    #[test]
    fn aggregation_identities(){
        assert_eq!(AggFn::Sum.identity(), 0.0);
        assert_eq!(AggFn::Min.combine(AggFn::Min.identity(), 3.0), 3.0);
        assert_eq!(AggFn::Max.combine(AggFn::Max.identity(), -3.0), -3.0);
        assert_eq!(AggFn::SumSquares.map(-2.0), 4.0);
    }

    #[test]
    fn column_validation(){
        assert!(validate_columns(&[0, 1, 4], 5).is_ok());
        assert!(validate_columns(&[], 5).is_err());
        assert!(validate_columns(&[1, 1], 5).is_err());
        assert!(validate_columns(&[2, 1], 5).is_err());
        assert!(validate_columns(&[0, 5], 5).is_err());
    }
}
