
//! Extraction of distinct value tuples and their row positions
//! for a set of columns. The result only lives during compression;
//! the encoders turn it into offset-list or run-length form.

use std::collections::HashMap;

use crate::matrix::MatrixBlock;


/// The distinct non-zero value tuples of a column set, each with the
/// sorted list of rows at which the tuple appears. The all-zero tuple
/// is never collected; rows not listed under any tuple are implicitly zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    column_count: usize,
    values: Vec<f64>,       // tuple-major, cardinality × column_count
    offsets: Vec<Vec<u32>>, // strictly ascending rows per tuple
}

impl Bitmap {

    /// Scan all rows of the source for the given columns.
    /// When `columns_are_rows` is set, the source is the transposed matrix
    /// and each requested column is read as a contiguous row.
    pub fn extract(source: &MatrixBlock, columns: &[usize], columns_are_rows: bool) -> Bitmap {
        let row_count = if columns_are_rows { source.columns() } else { source.rows() };
        Self::extract_positions(source, columns, columns_are_rows, (0..row_count).map(|row| (row, row)))
    }

    /// Scan only the given sample rows. The collected offsets are positions
    /// within the sample, not absolute rows, so run statistics stay meaningful.
    pub fn extract_sample(source: &MatrixBlock, columns: &[usize], columns_are_rows: bool, sample_rows: &[usize]) -> Bitmap {
        Self::extract_positions(
            source, columns, columns_are_rows,
            sample_rows.iter().enumerate().map(|(position, &row)| (row, position))
        )
    }

    fn extract_positions(
        source: &MatrixBlock, columns: &[usize], columns_are_rows: bool,
        rows: impl Iterator<Item = (usize, usize)>
    ) -> Bitmap
    {
        let column_count = columns.len();
        let mut tuple_ids: HashMap<Vec<u64>, usize> = HashMap::new();

        let mut values = Vec::new();
        let mut offsets: Vec<Vec<u32>> = Vec::new();
        let mut tuple = vec![0.0_f64; column_count];

        for (row, position) in rows {
            let mut all_zero = true;
            for (index, &column) in columns.iter().enumerate() {
                let value = if columns_are_rows { source.get(column, row) }
                            else { source.get(row, column) };

                tuple[index] = value;
                all_zero &= value == 0.0;
            }

            if all_zero { continue; }

            // hash by bit pattern so that -0.0 and 0.0 stay distinct from each other
            let key: Vec<u64> = tuple.iter().map(|value| value.to_bits()).collect();
            let next_id = tuple_ids.len();

            let id = *tuple_ids.entry(key).or_insert(next_id);
            if id == next_id {
                values.extend_from_slice(&tuple);
                offsets.push(Vec::new());
            }

            offsets[id].push(position as u32);
        }

        Bitmap { column_count, values, offsets }
    }

    /// The number of distinct non-zero tuples.
    pub fn cardinality(&self) -> usize { self.offsets.len() }

    pub fn column_count(&self) -> usize { self.column_count }

    pub fn tuple_values(&self, tuple: usize) -> &[f64] {
        &self.values[tuple * self.column_count .. (tuple + 1) * self.column_count]
    }

    pub fn all_values(&self) -> &[f64] { &self.values }

    pub fn offsets(&self, tuple: usize) -> &[u32] { &self.offsets[tuple] }

    /// The number of rows covered by any tuple.
    pub fn covered_rows(&self) -> usize {
        self.offsets.iter().map(|offsets| offsets.len()).sum()
    }

    /// The total number of consecutive-row runs across all tuples.
    pub fn run_count(&self) -> usize {
        self.offsets.iter().map(|offsets| {
            offsets.windows(2).filter(|pair| pair[1] != pair[0] + 1).count()
                + usize::from(!offsets.is_empty())
        }).sum()
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn block() -> MatrixBlock {
        MatrixBlock::dense(6, 2, vec![
            1.0, 2.0,
            0.0, 0.0,
            1.0, 2.0,
            3.0, 0.0,
            1.0, 2.0,
            3.0, 0.0,
        ]).unwrap()
    }

    #[test]
    fn collects_distinct_tuples(){
        let bitmap = Bitmap::extract(&block(), &[0, 1], false);

        assert_eq!(bitmap.cardinality(), 2);
        assert_eq!(bitmap.tuple_values(0), &[1.0, 2.0]);
        assert_eq!(bitmap.tuple_values(1), &[3.0, 0.0]);
        assert_eq!(bitmap.offsets(0), &[0, 2, 4]);
        assert_eq!(bitmap.offsets(1), &[3, 5]);
        assert_eq!(bitmap.covered_rows(), 5); // row 1 is all zero
    }

    #[test]
    fn skips_zero_tuple_in_transposed_scan(){
        let transposed = block().transpose();
        let bitmap = Bitmap::extract(&transposed, &[0, 1], true);

        assert_eq!(bitmap.cardinality(), 2);
        assert_eq!(bitmap.offsets(0), &[0, 2, 4]);
    }

    #[test]
    fn run_statistics(){
        let bitmap = Bitmap::extract(&block(), &[0], false);

        // column 0: tuple 1.0 at rows {0, 2, 4}, tuple 3.0 at rows {3, 5}
        assert_eq!(bitmap.run_count(), 5);
    }

    #[test]
    fn sample_offsets_are_positions(){
        let bitmap = Bitmap::extract_sample(&block(), &[0], false, &[0, 3, 4]);

        assert_eq!(bitmap.cardinality(), 2);
        assert_eq!(bitmap.offsets(0), &[0, 2]); // sample positions of rows 0 and 4
        assert_eq!(bitmap.offsets(1), &[1]);
    }
}
