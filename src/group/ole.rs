
//! Segmented offset-list encoding.
//!
//! Each tuple's row positions are split into segments of `SEGMENT_SIZE`
//! rows. The stream stores, per non-empty segment, a 16 bit count followed
//! by that many 16 bit offsets relative to the segment start. A per-tuple
//! skip table maps each segment to its stream position, so row ranges can
//! be reached without scanning preceding segments. Segments holding more
//! rows than a 16 bit count can express are split into multiple
//! count-prefixed chunks.

use crate::bitmap::Bitmap;
use crate::error::{Error, Result, UnitResult, i32_to_usize};
use crate::io::{Data, Read, Write};
use crate::matrix::MatrixBlock;
use super::{AggFn, ColGroup, ColumnIndices, Reduce, ScalarOp, SEGMENT_SIZE, segment_count};


#[derive(Debug, Clone, PartialEq)]
pub struct OleGroup {
    columns: ColumnIndices,
    rows: usize,

    /// Tuple-major distinct values, `cardinality × columns.len()`.
    values: Vec<f64>,

    /// Count-prefixed offset chunks for all tuples and segments.
    stream: Vec<u16>,

    /// Per tuple, `segment_count + 1` stream positions; the sentinel entry
    /// marks the end of the tuple's stream range. Empty segments occupy
    /// no stream space, their entry equals the next one.
    skip_table: Vec<u32>,
}

impl OleGroup {

    /// Encode an extracted bitmap. The bitmap's offsets must be absolute rows.
    pub fn encode(bitmap: &Bitmap, columns: ColumnIndices, rows: usize) -> OleGroup {
        let segments = segment_count(rows);

        let mut stream = Vec::with_capacity(bitmap.covered_rows() + bitmap.cardinality() * segments);
        let mut skip_table = Vec::with_capacity(bitmap.cardinality() * (segments + 1));

        for tuple in 0..bitmap.cardinality() {
            let offsets = bitmap.offsets(tuple);
            let mut cursor = 0;

            for segment in 0..segments {
                skip_table.push(stream.len() as u32);
                let segment_end = ((segment + 1) * SEGMENT_SIZE) as u32;

                let begin = cursor;
                while cursor < offsets.len() && offsets[cursor] < segment_end { cursor += 1; }

                let mut chunk = begin;
                while chunk < cursor {
                    let chunk_length = (cursor - chunk).min(u16::MAX as usize);
                    stream.push(chunk_length as u16);

                    for &row in &offsets[chunk .. chunk + chunk_length] {
                        stream.push((row as usize % SEGMENT_SIZE) as u16);
                    }

                    chunk += chunk_length;
                }
            }

            skip_table.push(stream.len() as u32);
        }

        OleGroup { columns, rows, values: bitmap.all_values().to_vec(), stream, skip_table }
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

    /// Visit every row of one tuple within `row_low .. row_high`, ascending.
    fn for_each_row(&self, tuple: usize, row_low: usize, row_high: usize, mut action: impl FnMut(usize)) {
        if row_low >= row_high { return; }

        let segments = segment_count(self.rows);
        let base = tuple * (segments + 1);

        let first_segment = row_low / SEGMENT_SIZE;
        let last_segment = (row_high - 1) / SEGMENT_SIZE;

        for segment in first_segment..=last_segment.min(segments - 1) {
            let mut position = self.skip_table[base + segment] as usize;
            let end = self.skip_table[base + segment + 1] as usize;
            let segment_base = segment * SEGMENT_SIZE;

            while position < end {
                let count = self.stream[position] as usize;
                position += 1;

                for &offset in &self.stream[position .. position + count] {
                    let row = segment_base + offset as usize;
                    if row >= row_low && row < row_high { action(row); }
                }

                position += count;
            }
        }
    }

    /// The number of rows holding this tuple within the range.
    fn count_in_range(&self, tuple: usize, row_low: usize, row_high: usize) -> usize {
        let mut count = 0;
        self.for_each_row(tuple, row_low, row_high, |_| count += 1);
        count
    }

    pub fn get(&self, row: usize, position: usize) -> f64 {
        let segment = row / SEGMENT_SIZE;
        let segment_offset = (row % SEGMENT_SIZE) as u16;
        let segments = segment_count(self.rows);

        for tuple in 0..self.cardinality() {
            let base = tuple * (segments + 1);
            let mut stream_position = self.skip_table[base + segment] as usize;
            let end = self.skip_table[base + segment + 1] as usize;

            while stream_position < end {
                let count = self.stream[stream_position] as usize;
                stream_position += 1;

                let chunk = &self.stream[stream_position .. stream_position + count];
                if chunk.binary_search(&segment_offset).is_ok() {
                    return self.tuple_values(tuple)[position];
                }

                stream_position += count;
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

            self.for_each_row(tuple, row_low, row_high, |row| counts[row - row_low] += nonzero_values);
        }
    }

    pub fn decompress_into(&self, target: &mut MatrixBlock, row_low: usize, row_high: usize) {
        for tuple in 0..self.cardinality() {
            let values = self.tuple_values(tuple).to_vec();

            self.for_each_row(tuple, row_low, row_high, |row| {
                for (position, &column) in self.columns.iter().enumerate() {
                    if values[position] != 0.0 {
                        target.sparse_append(row, column, values[position]);
                    }
                }
            });
        }
    }

    pub(crate) fn decompress_column(&self, position: usize, target: &mut [f64]) {
        for tuple in 0..self.cardinality() {
            let value = self.tuple_values(tuple)[position];
            if value == 0.0 { continue; }

            self.for_each_row(tuple, 0, target.len(), |row| target[row] = value);
        }
    }

    pub fn right_mult_by_vector(&self, vector: &[f64], target: &mut [f64], row_low: usize) {
        let row_high = row_low + target.len();

        for tuple in 0..self.cardinality() {
            // one dot product per tuple instead of one per row
            let scalar: f64 = self.tuple_values(tuple).iter()
                .zip(self.columns.iter())
                .map(|(&value, &column)| value * vector[column])
                .sum();

            if scalar == 0.0 { continue; }

            self.for_each_row(tuple, row_low, row_high, |row| target[row - row_low] += scalar);
        }
    }

    pub(crate) fn left_mult_from_position(&self, vector: &[f64], target: &mut [f64], first_position: usize) {
        for tuple in 0..self.cardinality() {
            let mut scalar = 0.0;
            self.for_each_row(tuple, 0, self.rows, |row| scalar += vector[row]);

            if scalar == 0.0 { continue; }

            let values = self.tuple_values(tuple);
            for position in first_position..self.columns.len() {
                target[self.columns[position]] += scalar * values[position];
            }
        }
    }

    pub fn unary_aggregate(&self, function: AggFn, reduce: Reduce, target: &mut [f64], row_low: usize, row_high: usize) {
        bitmap_aggregate(
            function, reduce, target, row_low, row_high,
            &self.columns, self.cardinality(),
            |tuple| self.tuple_values(tuple),
            |tuple, action| self.for_each_row(tuple, row_low, row_high, action),
        )
    }

    pub fn scalar_op(&self, op: ScalarOp) -> ColGroup {
        let covered = (0..self.cardinality())
            .map(|tuple| self.count_in_range(tuple, 0, self.rows))
            .sum::<usize>();

        if op.preserves_zero() || covered == self.rows {
            let values = self.values.iter().map(|&value| op.apply(value)).collect();
            return ColGroup::Ole(OleGroup { values, ..self.clone() });
        }

        ColGroup::Uncompressed(materialize(
            &self.columns, self.rows, op, self.cardinality(),
            |tuple| self.tuple_values(tuple),
            |tuple, action| self.for_each_row(tuple, 0, self.rows, action),
        ))
    }

    pub fn in_memory_size(&self) -> usize {
        self.values.len() * f64::BYTE_SIZE
            + self.stream.len() * u16::BYTE_SIZE
            + self.skip_table.len() * u32::BYTE_SIZE
            + self.columns.len() * std::mem::size_of::<usize>()
    }


    // body layout: i32 cardinality, tuple values,
    // i32-sized offset stream, i32-sized skip table

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
        let skip_table = u32::read_i32_sized_vec(read, u32::MAX as usize)?;

        let segments = segment_count(rows);
        if skip_table.len() != cardinality * (segments + 1) {
            return Err(Error::invalid("skip table length does not match tuple count"));
        }

        if skip_table.iter().any(|&position| position as usize > stream.len()) {
            return Err(Error::invalid("skip table entry beyond stream end"));
        }

        // verify the chunk structure, so that later scans stay in bounds
        for tuple in 0..cardinality {
            let base = tuple * (segments + 1);

            for segment in 0..segments {
                let mut position = skip_table[base + segment] as usize;
                let end = skip_table[base + segment + 1] as usize;

                if end < position {
                    return Err(Error::invalid("skip table entries must not decrease"));
                }

                while position < end {
                    position += 1 + stream[position] as usize;
                }

                if position != end {
                    return Err(Error::invalid("offset chunk extends beyond its segment"));
                }
            }
        }

        Ok(OleGroup { columns, rows, values, stream, skip_table })
    }
}


/// Shared aggregate folding for both encoded group kinds.
/// `visit_rows` only visits rows within the aggregation range.
pub(super) fn bitmap_aggregate<'v>(
    function: AggFn, reduce: Reduce, target: &mut [f64],
    row_low: usize, row_high: usize,
    columns: &[usize], cardinality: usize,
    tuple_values: impl Fn(usize) -> &'v [f64],
    mut visit_rows: impl FnMut(usize, &mut dyn FnMut(usize)),
) {
    let range = row_high - row_low;
    let mut covered = 0_usize;

    match reduce {
        Reduce::All | Reduce::PerColumn if function.is_additive() => {
            for tuple in 0..cardinality {
                let mut count = 0_usize;
                visit_rows(tuple, &mut |_| count += 1);

                for (position, &column) in columns.iter().enumerate() {
                    let value = function.map(tuple_values(tuple)[position]);
                    let slot = match reduce {
                        Reduce::All => &mut target[0],
                        _ => &mut target[column],
                    };
                    *slot = function.combine(*slot, count as f64 * value);
                }
            }
        }

        Reduce::All | Reduce::PerColumn => {
            // min or max: each occurring tuple contributes its values once,
            // and implicit zeros join in when any row is uncovered
            for tuple in 0..cardinality {
                let mut count = 0_usize;
                visit_rows(tuple, &mut |_| count += 1);
                if count == 0 { continue; }

                covered += count;

                for (position, &column) in columns.iter().enumerate() {
                    let value = function.map(tuple_values(tuple)[position]);
                    let slot = match reduce {
                        Reduce::All => &mut target[0],
                        _ => &mut target[column],
                    };
                    *slot = function.combine(*slot, value);
                }
            }

            if covered < range {
                let zero = function.map(0.0);
                match reduce {
                    Reduce::All => target[0] = function.combine(target[0], zero),
                    _ => for &column in columns {
                        target[column] = function.combine(target[column], zero);
                    }
                }
            }
        }

        Reduce::PerRow if function.is_additive() => {
            for tuple in 0..cardinality {
                let row_value: f64 = tuple_values(tuple).iter().map(|&value| function.map(value)).sum();
                visit_rows(tuple, &mut |row| target[row - row_low] += row_value);
            }
        }

        Reduce::PerRow => {
            let mut row_covered = vec![false; range];

            for tuple in 0..cardinality {
                let row_value = tuple_values(tuple).iter()
                    .map(|&value| function.map(value))
                    .fold(function.identity(), |folded, value| function.combine(folded, value));

                visit_rows(tuple, &mut |row| {
                    target[row - row_low] = function.combine(target[row - row_low], row_value);
                    row_covered[row - row_low] = true;
                });
            }

            let zero = function.map(0.0);
            for (index, &was_covered) in row_covered.iter().enumerate() {
                if !was_covered {
                    target[index] = function.combine(target[index], zero);
                }
            }
        }
    }
}


/// Decompress an encoded group into an uncompressed one,
/// applying a scalar operation to every cell including implicit zeros.
pub(super) fn materialize<'v>(
    columns: &ColumnIndices, rows: usize, op: ScalarOp, cardinality: usize,
    tuple_values: impl Fn(usize) -> &'v [f64],
    mut visit_rows: impl FnMut(usize, &mut dyn FnMut(usize)),
) -> super::UncompressedGroup
{
    let width = columns.len();
    let mut cells = vec![0.0; rows * width];

    for tuple in 0..cardinality {
        let values = tuple_values(tuple).to_vec();
        visit_rows(tuple, &mut |row| {
            cells[row * width .. (row + 1) * width].copy_from_slice(&values);
        });
    }

    for cell in cells.iter_mut() { *cell = op.apply(*cell); }

    let data = MatrixBlock::dense(rows, width, cells)
        .expect("cell buffer matches the requested dimensions");

    super::UncompressedGroup::from_parts(columns.clone(), data)
}
