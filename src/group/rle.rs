
//! Run-length encoding of row offsets.
//!
//! Each tuple's rows are stored as `(gap, run)` pairs of 16 bit values:
//! `gap` rows to skip, then `run` consecutive rows holding the tuple.
//! Gaps wider than 16 bits are split with `(65535, 0)` filler pairs, runs
//! longer than 16 bits with `(0, 65535)` continuation pairs. A per-tuple
//! skip table holds, for every segment boundary, the first relevant pair
//! and the absolute row at which that pair starts.

use crate::bitmap::Bitmap;
use crate::error::{Error, Result, UnitResult, i32_to_usize};
use crate::io::{Data, Read, Write};
use crate::matrix::MatrixBlock;
use super::{AggFn, ColGroup, ColumnIndices, Reduce, ScalarOp, SEGMENT_SIZE, segment_count};

const MAX_FIELD: usize = u16::MAX as usize;


#[derive(Debug, Clone, PartialEq)]
pub struct RleGroup {
    columns: ColumnIndices,
    rows: usize,

    /// Tuple-major distinct values, `cardinality × columns.len()`.
    values: Vec<f64>,

    /// Flattened `(gap, run)` pairs for all tuples.
    stream: Vec<u16>,

    /// Per tuple and segment boundary, two entries: the index of the first
    /// pair reaching past the boundary, and the absolute row at which that
    /// pair begins. The per-tuple sentinel marks the end of its pair range.
    skip_table: Vec<u32>,
}

impl RleGroup {

    /// Encode an extracted bitmap. The bitmap's offsets must be absolute rows.
    pub fn encode(bitmap: &Bitmap, columns: ColumnIndices, rows: usize) -> RleGroup {
        let segments = segment_count(rows);

        let mut stream: Vec<u16> = Vec::new();
        let mut skip_table = Vec::with_capacity(bitmap.cardinality() * (segments + 1) * 2);

        for tuple in 0..bitmap.cardinality() {
            let pairs_start = stream.len() / 2;
            let mut cursor_row = 0_usize;

            let offsets = bitmap.offsets(tuple);
            let mut index = 0;

            while index < offsets.len() {
                let start = offsets[index] as usize;

                let mut length = 1;
                while index + length < offsets.len()
                    && offsets[index + length] == offsets[index] + length as u32 {
                    length += 1;
                }
                index += length;

                let mut gap = start - cursor_row;
                while gap > MAX_FIELD {
                    stream.push(MAX_FIELD as u16);
                    stream.push(0);
                    gap -= MAX_FIELD;
                }

                let first = length.min(MAX_FIELD);
                stream.push(gap as u16);
                stream.push(first as u16);

                let mut remaining = length - first;
                while remaining > 0 {
                    let continuation = remaining.min(MAX_FIELD);
                    stream.push(0);
                    stream.push(continuation as u16);
                    remaining -= continuation;
                }

                cursor_row = start + length;
            }

            // replay the pairs to find each segment boundary's entry point
            let pairs_end = stream.len() / 2;
            let mut pair = pairs_start;
            let mut row = 0_usize;

            for segment in 0..segments {
                let boundary = segment * SEGMENT_SIZE;

                while pair < pairs_end {
                    let gap = stream[2 * pair] as usize;
                    let run = stream[2 * pair + 1] as usize;
                    if row + gap + run > boundary { break; }

                    row += gap + run;
                    pair += 1;
                }

                skip_table.push(pair as u32);
                skip_table.push(row as u32);
            }

            skip_table.push(pairs_end as u32);
            skip_table.push(cursor_row as u32);
        }

        RleGroup { columns, rows, values: bitmap.all_values().to_vec(), stream, skip_table }
    }

    pub fn columns(&self) -> &[usize] { &self.columns }
    pub fn rows(&self) -> usize { self.rows }

    pub(crate) fn shift_columns(&mut self, offset: usize) {
        for column in self.columns.iter_mut() { *column += offset; }
    }

    pub fn cardinality(&self) -> usize {
        if self.columns.is_empty() { 0 }
        else { self.values.len() / self.columns.len() }
    }

    fn tuple_values(&self, tuple: usize) -> &[f64] {
        let width = self.columns.len();
        &self.values[tuple * width .. (tuple + 1) * width]
    }

    /// Visit the runs of one tuple clipped to `row_low .. row_high`,
    /// as half-open `(start, end)` row ranges in ascending order.
    fn for_each_run(&self, tuple: usize, row_low: usize, row_high: usize, mut action: impl FnMut(usize, usize)) {
        if row_low >= row_high { return; }

        let segments = segment_count(self.rows);
        let base = tuple * (segments + 1) * 2;

        let segment = (row_low / SEGMENT_SIZE).min(segments - 1);
        let mut pair = self.skip_table[base + segment * 2] as usize;
        let mut row = self.skip_table[base + segment * 2 + 1] as usize;
        let pair_end = self.skip_table[base + segments * 2] as usize;

        while pair < pair_end {
            let gap = self.stream[2 * pair] as usize;
            let run = self.stream[2 * pair + 1] as usize;

            let start = row + gap;
            let end = start + run;
            row = end;
            pair += 1;

            if start >= row_high { break; }

            if end > row_low && run > 0 {
                action(start.max(row_low), end.min(row_high));
            }
        }
    }

    /// The number of rows holding this tuple within the range.
    fn count_in_range(&self, tuple: usize, row_low: usize, row_high: usize) -> usize {
        let mut count = 0;
        self.for_each_run(tuple, row_low, row_high, |start, end| count += end - start);
        count
    }

    pub fn get(&self, row: usize, position: usize) -> f64 {
        for tuple in 0..self.cardinality() {
            let mut found = false;
            self.for_each_run(tuple, row, row + 1, |_, _| found = true);

            if found {
                return self.tuple_values(tuple)[position];
            }
        }

        0.0
    }

    pub fn count_nonzeros(&self) -> u64 {
        (0..self.cardinality()).map(|tuple| {
            let nonzero_values = self.tuple_values(tuple).iter().filter(|value| **value != 0.0).count();
            (self.count_in_range(tuple, 0, self.rows) * nonzero_values) as u64
        }).sum()
    }

    pub fn count_nonzeros_per_row(&self, counts: &mut [usize], row_low: usize, row_high: usize) {
        for tuple in 0..self.cardinality() {
            let nonzero_values = self.tuple_values(tuple).iter().filter(|value| **value != 0.0).count();
            if nonzero_values == 0 { continue; }

            self.for_each_run(tuple, row_low, row_high, |start, end| {
                for row in start..end {
                    counts[row - row_low] += nonzero_values;
                }
            });
        }
    }

    pub fn decompress_into(&self, target: &mut MatrixBlock, row_low: usize, row_high: usize) {
        for tuple in 0..self.cardinality() {
            let values = self.tuple_values(tuple).to_vec();

            self.for_each_run(tuple, row_low, row_high, |start, end| {
                for row in start..end {
                    for (position, &column) in self.columns.iter().enumerate() {
                        if values[position] != 0.0 {
                            target.sparse_append(row, column, values[position]);
                        }
                    }
                }
            });
        }
    }

    pub(crate) fn decompress_column(&self, position: usize, target: &mut [f64]) {
        for tuple in 0..self.cardinality() {
            let value = self.tuple_values(tuple)[position];
            if value == 0.0 { continue; }

            self.for_each_run(tuple, 0, target.len(), |start, end| {
                for slot in &mut target[start..end] { *slot = value; }
            });
        }
    }

    pub fn right_mult_by_vector(&self, vector: &[f64], target: &mut [f64], row_low: usize) {
        let row_high = row_low + target.len();

        for tuple in 0..self.cardinality() {
            let scalar: f64 = self.tuple_values(tuple).iter()
                .zip(self.columns.iter())
                .map(|(&value, &column)| value * vector[column])
                .sum();

            if scalar == 0.0 { continue; }

            self.for_each_run(tuple, row_low, row_high, |start, end| {
                for slot in &mut target[start - row_low .. end - row_low] { *slot += scalar; }
            });
        }
    }

    pub(crate) fn left_mult_from_position(&self, vector: &[f64], target: &mut [f64], first_position: usize) {
        for tuple in 0..self.cardinality() {
            let mut scalar = 0.0;
            self.for_each_run(tuple, 0, self.rows, |start, end| {
                scalar += vector[start..end].iter().sum::<f64>();
            });

            if scalar == 0.0 { continue; }

            let values = self.tuple_values(tuple);
            for position in first_position..self.columns.len() {
                target[self.columns[position]] += scalar * values[position];
            }
        }
    }

    pub fn unary_aggregate(&self, function: AggFn, reduce: Reduce, target: &mut [f64], row_low: usize, row_high: usize) {
        super::ole::bitmap_aggregate(
            function, reduce, target, row_low, row_high,
            &self.columns, self.cardinality(),
            |tuple| self.tuple_values(tuple),
            |tuple, action| self.for_each_run(tuple, row_low, row_high, |start, end| {
                for row in start..end { action(row); }
            }),
        )
    }

    pub fn scalar_op(&self, op: ScalarOp) -> ColGroup {
        let covered = (0..self.cardinality())
            .map(|tuple| self.count_in_range(tuple, 0, self.rows))
            .sum::<usize>();

        if op.preserves_zero() || covered == self.rows {
            let values = self.values.iter().map(|&value| op.apply(value)).collect();
            return ColGroup::Rle(RleGroup { values, ..self.clone() });
        }

        ColGroup::Uncompressed(super::ole::materialize(
            &self.columns, self.rows, op, self.cardinality(),
            |tuple| self.tuple_values(tuple),
            |tuple, action| self.for_each_run(tuple, 0, self.rows, |start, end| {
                for row in start..end { action(row); }
            }),
        ))
    }

    pub fn in_memory_size(&self) -> usize {
        self.values.len() * f64::BYTE_SIZE
            + self.stream.len() * u16::BYTE_SIZE
            + self.skip_table.len() * u32::BYTE_SIZE
            + self.columns.len() * std::mem::size_of::<usize>()
    }


    // body layout: i32 cardinality, tuple values,
    // i32-sized run pair stream, i32-sized skip table

    pub(crate) fn body_byte_size(&self) -> usize {
        i32::BYTE_SIZE + self.values.len() * f64::BYTE_SIZE
            + i32::BYTE_SIZE + self.stream.len() * u16::BYTE_SIZE
            + i32::BYTE_SIZE + self.skip_table.len() * u32::BYTE_SIZE
    }

    pub(crate) fn write_body(&self, write: &mut impl Write) -> UnitResult {
        crate::error::usize_to_i32(self.cardinality(), "tuple count too large for stream")?.write(write)?;
        f64::write_slice(write, &self.values)?;
        u16::write_i32_sized_slice(write, &self.stream)?;
        u32::write_i32_sized_slice(write, &self.skip_table)
    }

    pub(crate) fn read_body(read: &mut impl Read, columns: ColumnIndices, rows: usize) -> Result<Self> {
        let cardinality = i32_to_usize(i32::read(read)?, "negative tuple count")?;
        let values = f64::read_vec(read, cardinality * columns.len())?;

        let stream = u16::read_i32_sized_vec(read, u32::MAX as usize)?;
        if stream.len() % 2 != 0 {
            return Err(Error::invalid("run pair stream must hold complete pairs"));
        }

        let skip_table = u32::read_i32_sized_vec(read, u32::MAX as usize)?;
        if skip_table.len() != cardinality * (segment_count(rows) + 1) * 2 {
            return Err(Error::invalid("skip table length does not match tuple count"));
        }

        let pairs = stream.len() / 2;
        if skip_table.iter().step_by(2).any(|&pair| pair as usize > pairs) {
            return Err(Error::invalid("skip table entry beyond stream end"));
        }

        Ok(RleGroup { columns, rows, values, stream, skip_table })
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::group::ColGroup;

    fn encode(rows: usize, column: Vec<f64>) -> RleGroup {
        let block = MatrixBlock::dense(rows, 1, column).unwrap();
        let bitmap = Bitmap::extract(&block, &[0], false);
        RleGroup::encode(&bitmap, smallvec![0], rows)
    }

    #[test]
    fn encode_and_get(){
        let group = encode(8, vec![0.0, 5.0, 5.0, 5.0, 0.0, 7.0, 7.0, 0.0]);

        assert_eq!(group.cardinality(), 2);
        assert_eq!(group.stream, vec![1, 3, 5, 2]); // each tuple starts its gaps at row zero
        assert_eq!(group.get(0, 0), 0.0);
        assert_eq!(group.get(2, 0), 5.0);
        assert_eq!(group.get(6, 0), 7.0);
        assert_eq!(group.get(7, 0), 0.0);
    }

    #[test]
    fn clips_runs_to_requested_range(){
        let group = encode(8, vec![0.0, 5.0, 5.0, 5.0, 0.0, 7.0, 7.0, 0.0]);

        let mut ranges = Vec::new();
        group.for_each_run(0, 2, 7, |start, end| ranges.push((start, end)));
        assert_eq!(ranges, vec![(2, 4)]);
    }

    #[test]
    fn splits_wide_gaps(){
        let rows = 3 * SEGMENT_SIZE;
        let mut column = vec![0.0; rows];
        column[0] = 1.0;
        column[2 * SEGMENT_SIZE + 7] = 1.0;

        let group = encode(rows, column);

        // the gap of 2 * 65536 + 6 rows needs two filler pairs
        assert_eq!(group.stream.len(), 2 * 4);
        assert_eq!(group.get(0, 0), 1.0);
        assert_eq!(group.get(2 * SEGMENT_SIZE + 7, 0), 1.0);
        assert_eq!(group.get(2 * SEGMENT_SIZE + 6, 0), 0.0);

        // the skip table jumps straight into the last segment
        let mut visited = Vec::new();
        group.for_each_run(0, 2 * SEGMENT_SIZE, rows, |start, end| visited.push((start, end)));
        assert_eq!(visited, vec![(2 * SEGMENT_SIZE + 7, 2 * SEGMENT_SIZE + 8)]);
    }

    #[test]
    fn run_straddling_a_segment_boundary_is_found_from_both_sides(){
        let rows = 2 * SEGMENT_SIZE;
        let mut column = vec![0.0; rows];
        for row in SEGMENT_SIZE - 5 .. SEGMENT_SIZE + 5 { column[row] = 2.0; }

        let group = encode(rows, column);

        assert_eq!(group.count_in_range(0, 0, SEGMENT_SIZE), 5);
        assert_eq!(group.count_in_range(0, SEGMENT_SIZE, rows), 5);
        assert_eq!(group.count_in_range(0, 0, rows), 10);
    }

    #[test]
    fn right_mult_over_runs(){
        let group = encode(6, vec![2.0, 2.0, 0.0, 0.0, 3.0, 3.0]);

        let mut target = vec![0.0; 6];
        group.right_mult_by_vector(&[10.0], &mut target, 0);
        assert_eq!(target, vec![20.0, 20.0, 0.0, 0.0, 30.0, 30.0]);
    }

    #[test]
    fn scalar_multiply_stays_encoded(){
        let group = encode(6, vec![2.0, 2.0, 0.0, 0.0, 3.0, 3.0]);

        match group.scalar_op(ScalarOp::Multiply(0.5)) {
            ColGroup::Rle(scaled) => {
                assert_eq!(scaled.get(0, 0), 1.0);
                assert_eq!(scaled.get(4, 0), 1.5);
            }
            other => panic!("expected metadata-only result, got {}", other.encoding_name()),
        }
    }

    #[test]
    fn serialization_roundtrip(){
        let group = ColGroup::Rle(encode(8, vec![0.0, 5.0, 5.0, 5.0, 0.0, 7.0, 7.0, 0.0]));

        let mut bytes = Vec::new();
        group.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), group.byte_size());

        let restored = ColGroup::read(&mut bytes.as_slice(), 8, 1).unwrap();
        assert_eq!(group, restored);
    }
}
