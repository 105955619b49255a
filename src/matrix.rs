
//! The plain, uncompressed matrix block.
//!
//! This is the representation matrices have before compression and after
//! decompression. It stores `f64` cells either dense in row-major order
//! or sparse as per-row index and value lists.

use crate::io::{Data, Read, Write};
use crate::error::{Error, Result, UnitResult, i32_to_usize, i64_to_u64, usize_to_i32};


/// Matrices sparser than this are decompressed into sparse storage.
pub const SPARSITY_TURN_POINT: f64 = 0.4;


/// A single row of a sparse matrix.
/// Indices are ascending and unique. Stored values may include explicit zeros.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseRow {
    pub column_indices: Vec<u32>,
    pub values: Vec<f64>,
}

impl SparseRow {
    fn reserve(&mut self, additional: usize) {
        self.column_indices.reserve(additional);
        self.values.reserve(additional);
    }

    fn sort_by_column(&mut self) {
        let mut pairs: Vec<(u32, f64)> = self.column_indices.iter().cloned()
            .zip(self.values.iter().cloned()).collect();

        pairs.sort_by_key(|&(column, _)| column);

        for (index, (column, value)) in pairs.into_iter().enumerate() {
            self.column_indices[index] = column;
            self.values[index] = value;
        }
    }
}


#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Dense(Vec<f64>),
    Sparse(Vec<SparseRow>),
}


/// An uncompressed `rows × columns` matrix of `f64` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixBlock {
    rows: usize,
    columns: usize,
    nonzeros: u64,
    storage: Storage,
}


impl MatrixBlock {

    /// Create a dense matrix from row-major values.
    pub fn dense(rows: usize, columns: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != rows * columns {
            return Err(Error::invalid("dense value count does not match dimensions"));
        }

        let mut block = MatrixBlock { rows, columns, nonzeros: 0, storage: Storage::Dense(values) };
        block.recompute_nonzeros();
        Ok(block)
    }

    /// Create a dense all-zero matrix.
    pub fn dense_zeros(rows: usize, columns: usize) -> Self {
        MatrixBlock { rows, columns, nonzeros: 0, storage: Storage::Dense(vec![0.0; rows * columns]) }
    }

    /// Create a sparse matrix without any stored cells.
    pub fn sparse_empty(rows: usize, columns: usize) -> Self {
        MatrixBlock { rows, columns, nonzeros: 0, storage: Storage::Sparse(vec![SparseRow::default(); rows]) }
    }

    pub fn rows(&self) -> usize { self.rows }
    pub fn columns(&self) -> usize { self.columns }
    pub fn nonzeros(&self) -> u64 { self.nonzeros }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, Storage::Sparse(_))
    }

    /// The fraction of cells that are not zero.
    pub fn sparsity(&self) -> f64 {
        if self.rows == 0 || self.columns == 0 { 0.0 }
        else { self.nonzeros as f64 / (self.rows as f64 * self.columns as f64) }
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        debug_assert!(row < self.rows && column < self.columns, "cell index out of range");

        match &self.storage {
            Storage::Dense(values) => values[row * self.columns + column],
            Storage::Sparse(sparse_rows) => {
                let sparse_row = &sparse_rows[row];
                match sparse_row.column_indices.binary_search(&(column as u32)) {
                    Ok(position) => sparse_row.values[position],
                    Err(_) => 0.0,
                }
            }
        }
    }

    pub fn set(&mut self, row: usize, column: usize, value: f64) {
        debug_assert!(row < self.rows && column < self.columns, "cell index out of range");

        match &mut self.storage {
            Storage::Dense(values) => values[row * self.columns + column] = value,
            Storage::Sparse(sparse_rows) => {
                let sparse_row = &mut sparse_rows[row];
                match sparse_row.column_indices.binary_search(&(column as u32)) {
                    Ok(position) => sparse_row.values[position] = value,
                    Err(position) => {
                        sparse_row.column_indices.insert(position, column as u32);
                        sparse_row.values.insert(position, value);
                    }
                }
            }
        }
    }

    /// Append a cell to a sparse row without keeping the row sorted.
    /// Call `sort_sparse_rows` once all appends are done.
    pub(crate) fn sparse_append(&mut self, row: usize, column: usize, value: f64) {
        match &mut self.storage {
            Storage::Sparse(sparse_rows) => {
                let sparse_row = &mut sparse_rows[row];
                sparse_row.column_indices.push(column as u32);
                sparse_row.values.push(value);
            }
            Storage::Dense(values) => values[row * self.columns + column] = value,
        }
    }

    /// Reserve capacity per sparse row before decompressing into this block.
    pub fn preallocate_sparse_rows(&mut self, counts: &[usize]) -> UnitResult {
        match &mut self.storage {
            Storage::Sparse(sparse_rows) => {
                if counts.len() != sparse_rows.len() {
                    return Err(Error::invalid("row count mismatch in preallocation"));
                }

                for (sparse_row, &count) in sparse_rows.iter_mut().zip(counts) {
                    sparse_row.reserve(count);
                }

                Ok(())
            }
            Storage::Dense(_) => Ok(()),
        }
    }

    /// Restore ascending column order within each sparse row.
    pub fn sort_sparse_rows(&mut self) {
        if let Storage::Sparse(sparse_rows) = &mut self.storage {
            for sparse_row in sparse_rows {
                if !sparse_row.column_indices.windows(2).all(|pair| pair[0] < pair[1]) {
                    sparse_row.sort_by_column();
                }
            }
        }
    }

    pub fn recompute_nonzeros(&mut self) {
        self.nonzeros = match &self.storage {
            Storage::Dense(values) => values.iter().filter(|value| **value != 0.0).count() as u64,
            Storage::Sparse(sparse_rows) => sparse_rows.iter()
                .flat_map(|sparse_row| sparse_row.values.iter())
                .filter(|value| **value != 0.0).count() as u64,
        };
    }

    /// A new matrix with rows and columns exchanged. Keeps the storage kind.
    pub fn transpose(&self) -> MatrixBlock {
        match &self.storage {
            Storage::Dense(values) => {
                let mut transposed = vec![0.0; self.rows * self.columns];
                for row in 0..self.rows {
                    for column in 0..self.columns {
                        transposed[column * self.rows + row] = values[row * self.columns + column];
                    }
                }

                MatrixBlock {
                    rows: self.columns, columns: self.rows,
                    nonzeros: self.nonzeros, storage: Storage::Dense(transposed),
                }
            }

            Storage::Sparse(sparse_rows) => {
                let mut transposed = MatrixBlock::sparse_empty(self.columns, self.rows);

                let mut counts = vec![0_usize; self.columns];
                for sparse_row in sparse_rows {
                    for &column in &sparse_row.column_indices {
                        counts[column as usize] += 1;
                    }
                }

                // errors are impossible, the count vector was sized above
                let _ = transposed.preallocate_sparse_rows(&counts);

                // appending in row order keeps each transposed row sorted
                for (row, sparse_row) in sparse_rows.iter().enumerate() {
                    for (&column, &value) in sparse_row.column_indices.iter().zip(&sparse_row.values) {
                        transposed.sparse_append(column as usize, row, value);
                    }
                }

                transposed.nonzeros = self.nonzeros;
                transposed
            }
        }
    }

    /// A new `rows × selected.len()` matrix containing the selected columns,
    /// in the order given.
    pub fn slice_columns(&self, selected: &[usize]) -> Result<MatrixBlock> {
        if selected.iter().any(|&column| column >= self.columns) {
            return Err(Error::invalid("column index out of range"));
        }

        let mut sliced = match self.storage {
            Storage::Dense(_) => MatrixBlock::dense_zeros(self.rows, selected.len()),
            Storage::Sparse(_) => MatrixBlock::sparse_empty(self.rows, selected.len()),
        };

        for row in 0..self.rows {
            for (position, &column) in selected.iter().enumerate() {
                let value = self.get(row, column);
                if value != 0.0 { sliced.set(row, position, value); }
            }
        }

        sliced.recompute_nonzeros();
        Ok(sliced)
    }

    /// A new matrix containing the rows `row_low .. row_high`.
    pub fn slice_rows(&self, row_low: usize, row_high: usize) -> Result<MatrixBlock> {
        if row_low >= row_high || row_high > self.rows {
            return Err(Error::invalid("row range out of range"));
        }

        let rows = row_high - row_low;
        let mut sliced = match self.storage {
            Storage::Dense(_) => MatrixBlock::dense_zeros(rows, self.columns),
            Storage::Sparse(_) => MatrixBlock::sparse_empty(rows, self.columns),
        };

        for row in row_low..row_high {
            for column in 0..self.columns {
                let value = self.get(row, column);
                if value != 0.0 { sliced.set(row - row_low, column, value); }
            }
        }

        sliced.recompute_nonzeros();
        Ok(sliced)
    }

    /// Apply a function to every cell, including zero cells.
    /// Sparse storage is densified when the function moves zero.
    pub fn map_values(&mut self, function: impl Fn(f64) -> f64) {
        let preserves_zero = function(0.0) == 0.0;

        if self.is_sparse() && !preserves_zero {
            *self = self.to_dense();
        }

        match &mut self.storage {
            Storage::Dense(values) => {
                for value in values.iter_mut() { *value = function(*value); }
            }
            Storage::Sparse(sparse_rows) => {
                for sparse_row in sparse_rows {
                    for value in sparse_row.values.iter_mut() { *value = function(*value); }
                }
            }
        }

        self.recompute_nonzeros();
    }

    /// A dense copy of this matrix.
    pub fn to_dense(&self) -> MatrixBlock {
        match &self.storage {
            Storage::Dense(_) => self.clone(),
            Storage::Sparse(sparse_rows) => {
                let mut values = vec![0.0; self.rows * self.columns];
                for (row, sparse_row) in sparse_rows.iter().enumerate() {
                    for (&column, &value) in sparse_row.column_indices.iter().zip(&sparse_row.values) {
                        values[row * self.columns + column as usize] = value;
                    }
                }

                MatrixBlock {
                    rows: self.rows, columns: self.columns,
                    nonzeros: self.nonzeros, storage: Storage::Dense(values),
                }
            }
        }
    }

    /// Compare cell-wise with a relative tolerance, ignoring storage kind.
    pub fn equals_with_tolerance(&self, other: &MatrixBlock, tolerance: f64) -> bool {
        if self.rows != other.rows || self.columns != other.columns { return false; }

        for row in 0..self.rows {
            for column in 0..self.columns {
                let left = self.get(row, column);
                let right = other.get(row, column);
                let scale = left.abs().max(right.abs()).max(1.0);
                if (left - right).abs() > tolerance * scale { return false; }
            }
        }

        true
    }


    // binary layout:
    // u8 sparse flag, i32 rows, i32 columns, i64 nonzeros,
    // then either all dense values, or per row an i32 count with indices and values.

    pub fn byte_size(&self) -> usize {
        let header = u8::BYTE_SIZE + 2 * i32::BYTE_SIZE + i64::BYTE_SIZE;

        header + match &self.storage {
            Storage::Dense(values) => values.len() * f64::BYTE_SIZE,
            Storage::Sparse(sparse_rows) => sparse_rows.iter()
                .map(|row| i32::BYTE_SIZE + row.column_indices.len() * (u32::BYTE_SIZE + f64::BYTE_SIZE))
                .sum(),
        }
    }

    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        (self.is_sparse() as u8).write(write)?;
        usize_to_i32(self.rows, "row count too large for stream")?.write(write)?;
        usize_to_i32(self.columns, "column count too large for stream")?.write(write)?;
        (self.nonzeros as i64).write(write)?;

        match &self.storage {
            Storage::Dense(values) => f64::write_slice(write, values)?,
            Storage::Sparse(sparse_rows) => {
                for sparse_row in sparse_rows {
                    u32::write_i32_sized_slice(write, &sparse_row.column_indices)?;
                    f64::write_slice(write, &sparse_row.values)?;
                }
            }
        }

        Ok(())
    }

    pub fn read(read: &mut impl Read) -> Result<Self> {
        let sparse = u8::read(read)? != 0;
        let rows = i32_to_usize(i32::read(read)?, "negative row count")?;
        let columns = i32_to_usize(i32::read(read)?, "negative column count")?;
        let nonzeros = i64_to_u64(i64::read(read)?, "negative non-zero count")?;

        let storage = if sparse {
            let mut sparse_rows = Vec::with_capacity(rows);
            for _ in 0..rows {
                let column_indices = u32::read_i32_sized_vec(read, columns)?;
                if column_indices.iter().any(|&column| column as usize >= columns) {
                    return Err(Error::invalid("sparse column index out of range"));
                }

                let values = f64::read_vec(read, column_indices.len())?;
                sparse_rows.push(SparseRow { column_indices, values });
            }

            Storage::Sparse(sparse_rows)
        }
        else {
            Storage::Dense(f64::read_vec(read, rows * columns)?)
        };

        Ok(MatrixBlock { rows, columns, nonzeros, storage })
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn small_dense() -> MatrixBlock {
        MatrixBlock::dense(2, 3, vec![
            1.0, 0.0, 2.0,
            0.0, 3.0, 0.0,
        ]).unwrap()
    }

    #[test]
    fn nonzeros_and_sparsity(){
        let block = small_dense();
        assert_eq!(block.nonzeros(), 3);
        assert!((block.sparsity() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn transpose_dense(){
        let transposed = small_dense().transpose();
        assert_eq!(transposed.rows(), 3);
        assert_eq!(transposed.columns(), 2);
        assert_eq!(transposed.get(2, 0), 2.0);
        assert_eq!(transposed.get(1, 1), 3.0);
    }

    #[test]
    fn transpose_sparse(){
        let mut block = MatrixBlock::sparse_empty(3, 2);
        block.set(0, 1, 4.0);
        block.set(2, 0, 5.0);
        block.recompute_nonzeros();

        let transposed = block.transpose();
        assert_eq!(transposed.get(1, 0), 4.0);
        assert_eq!(transposed.get(0, 2), 5.0);
        assert_eq!(transposed.nonzeros(), 2);
    }

    #[test]
    fn slice_columns_reorders(){
        let sliced = small_dense().slice_columns(&[2, 0]).unwrap();
        assert_eq!(sliced.get(0, 0), 2.0);
        assert_eq!(sliced.get(0, 1), 1.0);
        assert_eq!(sliced.nonzeros(), 2);
    }

    #[test]
    fn map_values_densifies_sparse(){
        let mut block = MatrixBlock::sparse_empty(2, 2);
        block.set(0, 0, 1.0);
        block.recompute_nonzeros();

        block.map_values(|value| value + 1.0);
        assert!(!block.is_sparse());
        assert_eq!(block.get(0, 0), 2.0);
        assert_eq!(block.get(1, 1), 1.0);
        assert_eq!(block.nonzeros(), 4);
    }

    #[test]
    fn serialization_roundtrip_dense(){
        let block = small_dense();

        let mut bytes = Vec::new();
        block.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), block.byte_size());

        let restored = MatrixBlock::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(block, restored);
    }

    #[test]
    fn serialization_roundtrip_sparse(){
        let mut block = MatrixBlock::sparse_empty(4, 3);
        block.set(1, 2, -7.5);
        block.set(3, 0, 0.25);
        block.recompute_nonzeros();

        let mut bytes = Vec::new();
        block.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), block.byte_size());

        let restored = MatrixBlock::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(block, restored);
    }
}
