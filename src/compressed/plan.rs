
//! The compression pipeline.
//!
//! Four phases run in order: classify each column by estimated compression
//! ratio, plan co-coded groups over the compressible ones, encode each group
//! from its exact bitmap (shrinking groups whose exact sizes disappoint),
//! and bundle whatever remains into one uncompressed group. The classify and
//! encode phases optionally fan out over a thread pool.

use std::time::{Duration, Instant};

use log::debug;

use crate::bitmap::Bitmap;
use crate::cocode;
use crate::error::{Error, Result};
use crate::estimate::{
    uncompressed_column_bytes, CompressedSizeInfo,
    ExactEstimator, SampleEstimator, SizeEstimator,
};
use crate::group::{ColGroup, ColumnIndices, OleGroup, RleGroup, UncompressedGroup};
use crate::matrix::MatrixBlock;
use crate::parallel::{fan_out, with_pool};
use super::{CompressedMatrixBlock, TRANSPOSE_INPUT};


/// How a matrix is compressed.
#[derive(Debug, Clone, Copy)]
pub struct CompressionSettings {

    /// Worker count for the classification and encoding phases.
    pub threads: usize,

    /// Scan all rows for size estimation instead of sampling.
    pub exact_estimator: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        CompressionSettings { threads: 1, exact_estimator: false }
    }
}


/// What each compression phase did, and how long it took.
#[derive(Debug, Clone, Default)]
pub struct CompressionStatistics {
    pub classify_time: Duration,
    pub group_time: Duration,
    pub encode_time: Duration,
    pub cleanup_time: Duration,

    /// Estimated footprint of the uncompressed input.
    pub input_bytes: usize,

    /// In-memory size of the compressed result.
    pub output_bytes: usize,

    /// Encoding chosen per emitted group.
    pub group_encodings: Vec<&'static str>,
}


/// Size estimation strategy chosen by the settings.
enum Estimator<'m> {
    Sample(SampleEstimator<'m>),
    Exact(ExactEstimator<'m>),
}

impl SizeEstimator for Estimator<'_> {
    fn estimate(&self, columns: &[usize]) -> CompressedSizeInfo {
        match self {
            Estimator::Sample(estimator) => estimator.estimate(columns),
            Estimator::Exact(estimator) => estimator.estimate(columns),
        }
    }
}


pub(crate) fn compress(source: &MatrixBlock, settings: CompressionSettings)
    -> Result<(CompressedMatrixBlock, CompressionStatistics)>
{
    let rows = source.rows();
    let columns = source.columns();

    if rows == 0 || columns == 0 {
        return Err(Error::invalid("cannot compress an empty matrix"));
    }

    // the transposed working copy makes column scans contiguous;
    // it is dropped as soon as this function returns
    let transposed;
    let (working, columns_are_rows) = if TRANSPOSE_INPUT {
        transposed = source.transpose();
        (&transposed, true)
    }
    else {
        (source, false)
    };

    let estimator = if settings.exact_estimator {
        Estimator::Exact(ExactEstimator::new(working, columns_are_rows))
    }
    else {
        Estimator::Sample(SampleEstimator::new(working, columns_are_rows))
    };

    let mut statistics = CompressionStatistics::default();
    let column_bytes = uncompressed_column_bytes(rows, source.sparsity());
    statistics.input_bytes = column_bytes * columns;

    // phase 1: per-column size estimation and classification
    let timer = Instant::now();

    let infos: Vec<CompressedSizeInfo> = if settings.threads > 1 {
        with_pool(settings.threads, |pool| {
            fan_out(pool, columns, |column| Ok(estimator.estimate(&[column])))
        })?
    }
    else {
        (0..columns).map(|column| estimator.estimate(&[column])).collect()
    };

    let mut ratios = vec![0.0_f64; columns];
    let mut compressible: Vec<(usize, CompressedSizeInfo)> = Vec::new();
    let mut leftover: Vec<usize> = Vec::new();

    for (column, info) in infos.iter().enumerate() {
        let ratio = column_bytes as f64 / info.min_size().max(1) as f64;
        ratios[column] = ratio;

        if ratio > 1.0 { compressible.push((column, *info)); }
        else { leftover.push(column); }
    }

    statistics.classify_time = timer.elapsed();
    debug!(
        "classified {} of {} columns as compressible in {:?}",
        compressible.len(), columns, statistics.classify_time
    );

    // phase 2: co-coding, most promising columns first
    let timer = Instant::now();

    compressible.sort_by(|left, right| {
        ratios[right.0].partial_cmp(&ratios[left.0]).unwrap_or(std::cmp::Ordering::Equal)
    });

    let planned = cocode::plan_groups(&compressible, &estimator);

    statistics.group_time = timer.elapsed();
    debug!("planned {} co-coded groups in {:?}", planned.len(), statistics.group_time);

    // phase 3: exact extraction and encoding, with refinement
    let timer = Instant::now();

    let encoded: Vec<(Option<ColGroup>, Vec<usize>)> = if settings.threads > 1 {
        with_pool(settings.threads, |pool| {
            fan_out(pool, planned.len(), |index| {
                Ok(encode_group(working, columns_are_rows, rows, planned[index].clone(), &ratios, column_bytes))
            })
        })?
    }
    else {
        planned.into_iter()
            .map(|group| encode_group(working, columns_are_rows, rows, group, &ratios, column_bytes))
            .collect()
    };

    let mut groups: Vec<ColGroup> = Vec::new();
    for (group, rejected) in encoded {
        groups.extend(group);
        leftover.extend(rejected);
    }

    statistics.encode_time = timer.elapsed();
    debug!("encoded {} groups in {:?}", groups.len(), statistics.encode_time);

    // phase 4: bundle the remaining columns into one uncompressed group
    let timer = Instant::now();

    leftover.sort_unstable();
    if !leftover.is_empty() {
        let data = source.slice_columns(&leftover)?;
        let uncompressed = UncompressedGroup::new(ColumnIndices::from_slice(&leftover), data)?;

        // kernels run the uncompressed group first; keep it at the front
        groups.insert(0, ColGroup::Uncompressed(uncompressed));
    }

    let compressed = CompressedMatrixBlock::from_parts(rows, columns, groups);

    statistics.cleanup_time = timer.elapsed();
    statistics.output_bytes = compressed.in_memory_size();
    statistics.group_encodings = compressed.groups().iter()
        .map(|group| group.encoding_name())
        .collect();

    debug!(
        "compressed {} x {} matrix from {} to {} bytes",
        rows, columns, statistics.input_bytes, statistics.output_bytes
    );

    Ok((compressed, statistics))
}


/// Extract the exact bitmap for one planned group and encode it with the
/// smaller of the two encodings. If the exact sizes no longer beat the
/// uncompressed footprint, shed the column with the worst standalone ratio
/// and retry until the group passes or runs empty. Returns the encoded
/// group, if any, and the columns that fell back to the uncompressed pool.
fn encode_group(
    working: &MatrixBlock, columns_are_rows: bool, rows: usize,
    mut columns: Vec<usize>, ratios: &[f64], column_bytes: usize,
) -> (Option<ColGroup>, Vec<usize>)
{
    let mut rejected = Vec::new();

    loop {
        if columns.is_empty() {
            return (None, rejected);
        }

        let bitmap = Bitmap::extract(working, &columns, columns_are_rows);
        let info = CompressedSizeInfo::from_bitmap(&bitmap, rows);

        let uncompressed = column_bytes * columns.len();
        if uncompressed > info.min_size() {
            let group_columns = ColumnIndices::from_slice(&columns);

            let group = if info.rle_size < info.ole_size {
                ColGroup::Rle(RleGroup::encode(&bitmap, group_columns, rows))
            }
            else {
                ColGroup::Ole(OleGroup::encode(&bitmap, group_columns, rows))
            };

            return (Some(group), rejected);
        }

        let worst = columns.iter().enumerate()
            .min_by(|left, right| {
                ratios[*left.1].partial_cmp(&ratios[*right.1]).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(position, _)| position)
            .unwrap_or(0);

        rejected.push(columns.remove(worst));
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn low_cardinality_column(rows: usize, period: usize) -> Vec<f64> {
        (0..rows).map(|row| (row % period) as f64).collect()
    }

    #[test]
    fn refinement_sheds_the_worst_column(){
        let rows = 500;

        // two well-behaved columns and one effectively unique column
        let mut values = Vec::new();
        for row in 0..rows {
            values.push((row % 3) as f64);
            values.push((row % 4) as f64);
            values.push(1.0 + row as f64);
        }

        let block = MatrixBlock::dense(rows, 3, values).unwrap();
        let transposed = block.transpose();

        let column_bytes = uncompressed_column_bytes(rows, block.sparsity());
        let ratios = vec![4.0, 3.0, 0.5];

        let (group, rejected) = encode_group(
            &transposed, true, rows,
            vec![0, 1, 2], &ratios, column_bytes,
        );

        assert_eq!(rejected, vec![2], "the unique column must be shed");

        let group = group.expect("the remaining columns compress");
        assert_eq!(group.columns(), &[0, 1]);
    }

    #[test]
    fn refinement_can_empty_a_group(){
        let rows = 400;
        let values: Vec<f64> = (0..rows).map(|row| row as f64 + 1.0).collect();
        let block = MatrixBlock::dense(rows, 1, values).unwrap();
        let transposed = block.transpose();

        let column_bytes = uncompressed_column_bytes(rows, block.sparsity());
        let (group, rejected) = encode_group(&transposed, true, rows, vec![0], &[0.2], column_bytes);

        assert!(group.is_none());
        assert_eq!(rejected, vec![0]);
    }

    #[test]
    fn continuous_columns_end_up_uncompressed(){
        let rows = 800;
        let values = (0..rows).flat_map(|row| {
            vec![(row % 2) as f64, (row as f64).sqrt()]
        }).collect();

        let block = MatrixBlock::dense(rows, 2, values).unwrap();
        let (compressed, statistics) = compress(&block, CompressionSettings::default()).unwrap();

        let uncompressed_group = compressed.groups().iter()
            .find(|group| group.encoding_name() == "uncompressed")
            .expect("the square root column cannot compress");

        assert_eq!(uncompressed_group.columns(), &[1]);
        assert!(statistics.output_bytes < statistics.input_bytes * 2);
    }

    #[test]
    fn exact_estimation_is_available(){
        let rows = 300;
        let values = low_cardinality_column(rows, 5);
        let block = MatrixBlock::dense(rows, 1, values).unwrap();

        let settings = CompressionSettings { exact_estimator: true, ..CompressionSettings::default() };
        let (compressed, _) = compress(&block, settings).unwrap();

        assert_eq!(compressed.groups().len(), 1);
        assert_ne!(compressed.groups()[0].encoding_name(), "uncompressed");
    }

    #[test]
    fn empty_matrices_are_rejected(){
        assert!(compress(&MatrixBlock::dense_zeros(0, 4), CompressionSettings::default()).is_err());
        assert!(compress(&MatrixBlock::dense_zeros(4, 0), CompressionSettings::default()).is_err());
    }
}
