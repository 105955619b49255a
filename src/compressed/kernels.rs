
//! Linear-algebra kernels running directly on the compressed groups.
//!
//! Multi-threaded variants fan out over row partitions aligned to segment
//! boundaries (right multiply, per-column aggregates) or over whole groups
//! (left multiply, transpose-self multiply, other aggregates), so that no
//! two tasks ever write the same output cell and partial results combine
//! by plain element-wise folding.

use crate::error::{Error, Result};
use crate::group::{AggFn, ColGroup, Reduce, ScalarOp};
use crate::matrix::MatrixBlock;
use crate::parallel::{fan_out, round_robin, segment_aligned_partitions, with_pool};
use super::{CompressedMatrixBlock, MIN_PAR_AGG_THRESHOLD};


impl CompressedMatrixBlock {

    /// The matrix-vector product `A v` as a dense column.
    pub fn right_mult_by_vector(&self, vector: &[f64]) -> Result<Vec<f64>> {
        if vector.len() != self.columns() {
            return Err(Error::invalid("vector length must match the column count"));
        }

        let mut target = vec![0.0; self.rows()];
        self.right_mult_range(vector, &mut target, 0);
        Ok(target)
    }

    /// Like `right_mult_by_vector`, with the rows partitioned over a pool of
    /// `threads` workers. Partitions align to segment boundaries so the
    /// encoded groups jump there through their skip tables.
    pub fn right_mult_by_vector_multi_threaded(&self, vector: &[f64], threads: usize) -> Result<Vec<f64>> {
        if vector.len() != self.columns() {
            return Err(Error::invalid("vector length must match the column count"));
        }

        let partitions = segment_aligned_partitions(self.rows(), threads);
        if threads <= 1 || partitions.len() <= 1 {
            return self.right_mult_by_vector(vector);
        }

        let parts = with_pool(threads, |pool| {
            fan_out(pool, partitions.len(), |index| {
                let (row_low, row_high) = partitions[index];
                let mut part = vec![0.0; row_high - row_low];
                self.right_mult_range(vector, &mut part, row_low);
                Ok(part)
            })
        })?;

        let mut target = Vec::with_capacity(self.rows());
        for part in parts { target.extend(part); }
        Ok(target)
    }

    /// All groups accumulate into the rows covered by `target`.
    /// The uncompressed group runs first and overwrites, so callers only
    /// need zeroed buffers when no uncompressed group exists.
    fn right_mult_range(&self, vector: &[f64], target: &mut [f64], row_low: usize) {
        let mut overwritten = false;

        for group in self.groups() {
            if matches!(group, ColGroup::Uncompressed(_)) {
                group.right_mult_by_vector(vector, target, row_low, overwritten);
                overwritten = true;
            }
        }

        for group in self.groups() {
            if !matches!(group, ColGroup::Uncompressed(_)) {
                group.right_mult_by_vector(vector, target, row_low, true);
            }
        }
    }

    /// The vector-matrix product `v^T A` as a dense row.
    pub fn left_mult_by_row_vector(&self, vector: &[f64]) -> Result<Vec<f64>> {
        if vector.len() != self.rows() {
            return Err(Error::invalid("vector length must match the row count"));
        }

        let mut target = vec![0.0; self.columns()];
        for group in self.groups() {
            group.left_mult_by_row_vector(vector, &mut target);
        }

        Ok(target)
    }

    /// Like `left_mult_by_row_vector` with one task per group.
    /// Groups own disjoint columns, partial rows merge without conflicts.
    pub fn left_mult_by_row_vector_multi_threaded(&self, vector: &[f64], threads: usize) -> Result<Vec<f64>> {
        if vector.len() != self.rows() {
            return Err(Error::invalid("vector length must match the row count"));
        }

        if threads <= 1 || self.groups().len() <= 1 {
            return self.left_mult_by_row_vector(vector);
        }

        let parts = with_pool(threads, |pool| {
            fan_out(pool, self.groups().len(), |index| {
                let mut part = vec![0.0; self.columns()];
                self.groups()[index].left_mult_by_row_vector(vector, &mut part);
                Ok(part)
            })
        })?;

        let mut target = vec![0.0; self.columns()];
        for part in parts {
            for (slot, value) in target.iter_mut().zip(part) { *slot += value; }
        }

        Ok(target)
    }

    /// The chain `A^T (w ⊙ (A v))`, reusing the two multiply kernels.
    /// `weights`, if given, scales the intermediate element-wise.
    pub fn mm_chain(&self, vector: &[f64], weights: Option<&[f64]>) -> Result<Vec<f64>> {
        let intermediate = self.right_mult_by_vector(vector)?;
        let intermediate = apply_chain_weights(intermediate, weights, self.rows())?;
        self.left_mult_by_row_vector(&intermediate)
    }

    pub fn mm_chain_multi_threaded(&self, vector: &[f64], weights: Option<&[f64]>, threads: usize) -> Result<Vec<f64>> {
        let intermediate = self.right_mult_by_vector_multi_threaded(vector, threads)?;
        let intermediate = apply_chain_weights(intermediate, weights, self.rows())?;
        self.left_mult_by_row_vector_multi_threaded(&intermediate, threads)
    }

    /// The product `A^T A` as a full dense matrix.
    pub fn transpose_self_mult_left(&self) -> Result<MatrixBlock> {
        let outer: Vec<usize> = (0..self.groups().len()).collect();
        let mut cells = vec![0.0; self.columns() * self.columns()];
        self.transpose_self_mult_outer(&outer, &mut cells);

        MatrixBlock::dense(self.columns(), self.columns(), cells)
    }

    /// Like `transpose_self_mult_left`, partitioning the outer group range
    /// over the pool. Each pair of columns belongs to exactly one outer
    /// group, so the per-task partial products overlay without conflicts.
    pub fn transpose_self_mult_left_multi_threaded(&self, threads: usize) -> Result<MatrixBlock> {
        if threads <= 1 || self.groups().len() <= 1 {
            return self.transpose_self_mult_left();
        }

        let assignments = round_robin(self.groups().len(), threads);
        let parts = with_pool(threads, |pool| {
            fan_out(pool, assignments.len(), |index| {
                let mut cells = vec![0.0; self.columns() * self.columns()];
                self.transpose_self_mult_outer(&assignments[index], &mut cells);
                Ok(cells)
            })
        })?;

        let mut cells = vec![0.0; self.columns() * self.columns()];
        for part in parts {
            for (slot, value) in cells.iter_mut().zip(part) { *slot += value; }
        }

        MatrixBlock::dense(self.columns(), self.columns(), cells)
    }

    /// The right-side variant is not available on the compressed form.
    pub fn transpose_self_mult_right(&self) -> Result<MatrixBlock> {
        Err(Error::unsupported("transpose-self multiply from the right on a compressed matrix"))
    }

    /// For every column of every outer group: decompress that column, multiply
    /// it against the remaining columns of its own group and all later groups,
    /// and scatter the partial row into both triangles of the output. The loop
    /// order visits each unordered column pair exactly once.
    fn transpose_self_mult_outer(&self, outer_groups: &[usize], cells: &mut [f64]) {
        let columns = self.columns();
        let mut lhs = vec![0.0; self.rows()];
        let mut row_out = vec![0.0; columns];

        for &group_index in outer_groups {
            let group = &self.groups()[group_index];

            for (position, &column) in group.columns().iter().enumerate() {
                for value in lhs.iter_mut() { *value = 0.0; }
                group.decompress_column(position, &mut lhs);

                for value in row_out.iter_mut() { *value = 0.0; }
                group.left_mult_from_position(&lhs, &mut row_out, position);
                for later in &self.groups()[group_index + 1 ..] {
                    later.left_mult_by_row_vector(&lhs, &mut row_out);
                }

                for &other in group.columns()[position..].iter() {
                    cells[column * columns + other] = row_out[other];
                    cells[other * columns + column] = row_out[other];
                }

                for later in &self.groups()[group_index + 1 ..] {
                    for &other in later.columns() {
                        cells[column * columns + other] = row_out[other];
                        cells[other * columns + column] = row_out[other];
                    }
                }
            }
        }
    }

    /// A unary aggregate over all cells, rows, or columns.
    /// Returns one value for `Reduce::All`, one per row for `Reduce::PerRow`,
    /// one per column for `Reduce::PerColumn`.
    pub fn unary_aggregate(&self, function: AggFn, reduce: Reduce) -> Result<Vec<f64>> {
        let mut target = self.aggregate_accumulator(function, reduce);

        // per-row reductions want the uncompressed group folded first
        for group in self.groups() {
            if matches!(group, ColGroup::Uncompressed(_)) {
                group.unary_aggregate(function, reduce, &mut target, 0, self.rows());
            }
        }

        for group in self.groups() {
            if !matches!(group, ColGroup::Uncompressed(_)) {
                group.unary_aggregate(function, reduce, &mut target, 0, self.rows());
            }
        }

        Ok(target)
    }

    /// Threaded aggregate. Small blocks stay single-threaded; per-column
    /// reductions partition rows, all others partition groups round-robin.
    /// Partials merge through the aggregate's commutative combiner.
    pub fn unary_aggregate_multi_threaded(&self, function: AggFn, reduce: Reduce, threads: usize) -> Result<Vec<f64>> {
        if threads <= 1 || self.in_memory_size() < MIN_PAR_AGG_THRESHOLD {
            return self.unary_aggregate(function, reduce);
        }

        let parts = match reduce {
            Reduce::PerColumn => {
                let partitions = segment_aligned_partitions(self.rows(), threads);
                if partitions.len() <= 1 {
                    return self.unary_aggregate(function, reduce);
                }

                with_pool(threads, |pool| {
                    fan_out(pool, partitions.len(), |index| {
                        let (row_low, row_high) = partitions[index];

                        let mut part = self.aggregate_accumulator(function, reduce);
                        for group in self.groups() {
                            group.unary_aggregate(function, reduce, &mut part, row_low, row_high);
                        }

                        Ok(part)
                    })
                })?
            }

            _ => {
                let assignments = round_robin(self.groups().len(), threads);
                with_pool(threads, |pool| {
                    fan_out(pool, assignments.len(), |index| {
                        let mut part = self.aggregate_accumulator(function, reduce);
                        for &group_index in &assignments[index] {
                            self.groups()[group_index]
                                .unary_aggregate(function, reduce, &mut part, 0, self.rows());
                        }

                        Ok(part)
                    })
                })?
            }
        };

        let mut target = self.aggregate_accumulator(function, reduce);
        for part in parts {
            for (slot, value) in target.iter_mut().zip(part) {
                *slot = function.combine(*slot, value);
            }
        }

        Ok(target)
    }

    fn aggregate_accumulator(&self, function: AggFn, reduce: Reduce) -> Vec<f64> {
        let size = match reduce {
            Reduce::All => 1,
            Reduce::PerRow => self.rows(),
            Reduce::PerColumn => self.columns(),
        };

        vec![function.identity(); size]
    }

    /// Apply a scalar operation to every cell, producing a new compressed
    /// matrix. Groups stay encoded where the operation allows, otherwise
    /// they materialize. When the operation moved zero into implicitly-zero
    /// rows, the non-zero count is conservatively `rows * columns`;
    /// otherwise it is recounted exactly.
    pub fn scalar_op(&self, op: ScalarOp) -> CompressedMatrixBlock {
        let groups: Vec<ColGroup> = self.groups().iter()
            .map(|group| group.scalar_op(op))
            .collect();

        // an encoded group only turns uncompressed here when it had
        // implicitly-zero rows that the operation moved
        let moved_implicit_zeros = !op.preserves_zero()
            && self.groups().iter().zip(&groups).any(|(before, after)| {
                !matches!(before, ColGroup::Uncompressed(_))
                    && matches!(after, ColGroup::Uncompressed(_))
            });

        if moved_implicit_zeros {
            CompressedMatrixBlock {
                rows: self.rows(),
                columns: self.columns(),
                nonzeros: (self.rows() * self.columns()) as u64,
                groups,
            }
        }
        else {
            CompressedMatrixBlock::from_parts(self.rows(), self.columns(), groups)
        }
    }
}


fn apply_chain_weights(mut intermediate: Vec<f64>, weights: Option<&[f64]>, rows: usize) -> Result<Vec<f64>> {
    if let Some(weights) = weights {
        if weights.len() != rows {
            return Err(Error::invalid("weight vector length must match the row count"));
        }

        for (value, &weight) in intermediate.iter_mut().zip(weights) {
            *value *= weight;
        }
    }

    Ok(intermediate)
}
