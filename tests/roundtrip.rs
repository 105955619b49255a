
//! Compression, decompression and serialization roundtrips
//! over randomly generated matrices.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cla::prelude::*;
use cla::bitmap::Bitmap;
use cla::estimate::CompressedSizeInfo;


/// Low-cardinality matrix: every column drawn uniformly from {0, 1, 2}.
fn low_cardinality_matrix(rows: usize, columns: usize, seed: u64) -> MatrixBlock {
    let mut random: StdRng = StdRng::seed_from_u64(seed);
    let values = (0..rows * columns)
        .map(|_| random.random_range(0..3) as f64)
        .collect();

    MatrixBlock::dense(rows, columns, values).unwrap()
}

/// Dense continuous matrix: uniform values from [0, 1).
fn continuous_matrix(rows: usize, columns: usize, seed: u64) -> MatrixBlock {
    let mut random: StdRng = StdRng::seed_from_u64(seed);
    let values = (0..rows * columns)
        .map(|_| random.random::<f64>())
        .collect();

    MatrixBlock::dense(rows, columns, values).unwrap()
}

fn assert_group_columns_partition(compressed: &CompressedMatrixBlock) {
    let mut covered: Vec<usize> = compressed.groups().iter()
        .flat_map(|group| group.columns().iter().cloned())
        .collect();

    covered.sort_unstable();
    assert_eq!(covered, (0..compressed.columns()).collect::<Vec<_>>(),
        "group columns must partition the column range");

    for group in compressed.groups() {
        assert!(group.columns().windows(2).all(|pair| pair[0] < pair[1]),
            "group columns must be strictly ascending");
    }
}


#[test]
fn low_cardinality_matrix_compresses_into_one_group(){
    let block = low_cardinality_matrix(10_000, 5, 1);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    assert_eq!(compressed.groups().len(), 1, "all five columns should co-code into one group");

    let group = &compressed.groups()[0];
    assert_ne!(group.encoding_name(), "uncompressed");
    assert_eq!(group.columns(), &[0, 1, 2, 3, 4]);

    assert_eq!(compressed.nonzeros(), block.nonzeros());
    assert_group_columns_partition(&compressed);
}

#[test]
fn chosen_encoding_is_the_smaller_one(){
    let block = low_cardinality_matrix(10_000, 5, 1);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    for group in compressed.groups() {
        if group.encoding_name() == "uncompressed" { continue; }

        let columns: Vec<usize> = group.columns().to_vec();
        let bitmap = Bitmap::extract(&block, &columns, false);
        let info = CompressedSizeInfo::from_bitmap(&bitmap, block.rows());

        let expected = if info.rle_size < info.ole_size { "rle" } else { "ole" };
        assert_eq!(group.encoding_name(), expected);
    }
}

#[test]
fn continuous_matrix_stays_uncompressed(){
    let block = continuous_matrix(1000, 10, 2);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    assert_eq!(compressed.groups().len(), 1);
    assert_eq!(compressed.groups()[0].encoding_name(), "uncompressed");
    assert_eq!(compressed.nonzeros(), block.nonzeros());
    assert_group_columns_partition(&compressed);
}

#[test]
fn compression_roundtrips_cell_for_cell(){
    for (rows, columns, seed) in [(10_000, 5, 1), (513, 3, 7), (64, 12, 9)] {
        let block = low_cardinality_matrix(rows, columns, seed);
        let compressed = CompressedMatrixBlock::compress(&block).unwrap();
        let restored = compressed.decompress().unwrap();

        assert_eq!(restored.rows(), rows);
        assert_eq!(restored.columns(), columns);
        assert_eq!(restored.nonzeros(), block.nonzeros());

        for row in 0..rows {
            for column in 0..columns {
                assert_eq!(restored.get(row, column), block.get(row, column),
                    "cell ({}, {})", row, column);
            }
        }
    }
}

#[test]
fn mixed_matrices_roundtrip(){
    // compressible columns interleaved with continuous ones
    let rows = 2000;
    let mut random: StdRng = StdRng::seed_from_u64(17);

    let values = (0..rows).flat_map(|_| {
        let shared = random.random_range(0..4) as f64;
        vec![
            shared,
            random.random::<f64>(),
            shared * 2.0,
            random.random_range(0..2) as f64,
        ]
    }).collect();

    let block = MatrixBlock::dense(rows, 4, values).unwrap();
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();
    assert_group_columns_partition(&compressed);

    let restored = compressed.decompress().unwrap();
    assert!(restored.equals_with_tolerance(&block, 0.0));
}

#[test]
fn sparse_matrices_roundtrip(){
    let rows = 3000;
    let mut random: StdRng = StdRng::seed_from_u64(23);

    let mut block = MatrixBlock::sparse_empty(rows, 6);
    for row in 0..rows {
        for column in 0..6 {
            if random.random_range(0..20) == 0 {
                block.set(row, column, random.random_range(1..4) as f64);
            }
        }
    }
    block.recompute_nonzeros();

    let compressed = CompressedMatrixBlock::compress(&block).unwrap();
    assert_eq!(compressed.nonzeros(), block.nonzeros());

    let restored = compressed.decompress().unwrap();
    assert!(restored.is_sparse(), "a very sparse matrix should decompress sparse");
    assert!(restored.equals_with_tolerance(&block, 0.0));
}

#[test]
fn serialization_roundtrips_and_sizes_match(){
    let block = low_cardinality_matrix(10_000, 5, 1);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let mut bytes = Vec::new();
    compressed.write(&mut bytes).unwrap();
    assert_eq!(bytes.len(), compressed.exact_size_on_disk());

    let restored = CompressedMatrixBlock::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(restored, compressed);

    // the decompressed content survives the disk trip unchanged
    let decompressed = restored.decompress().unwrap();
    assert!(decompressed.equals_with_tolerance(&block, 0.0));
}

#[test]
fn serialized_stream_also_carries_uncompressed_blocks(){
    let block = continuous_matrix(50, 4, 3);

    let mut bytes = Vec::new();
    Block::Uncompressed(block.clone()).write(&mut bytes).unwrap();

    match Block::read(&mut bytes.as_slice()).unwrap() {
        Block::Uncompressed(restored) => assert!(restored.equals_with_tolerance(&block, 0.0)),
        Block::Compressed(_) => panic!("the stream was written uncompressed"),
    }
}

#[test]
fn truncated_streams_fail_cleanly(){
    let block = low_cardinality_matrix(500, 3, 4);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let mut bytes = Vec::new();
    compressed.write(&mut bytes).unwrap();

    for length in [0, 1, 5, bytes.len() / 2, bytes.len() - 1] {
        assert!(CompressedMatrixBlock::read(&mut &bytes[..length]).is_err(),
            "a stream cut to {} bytes must not parse", length);
    }
}

#[test]
fn multi_threaded_compression_matches_single_threaded(){
    let block = low_cardinality_matrix(4096, 8, 5);
    let reference = CompressedMatrixBlock::compress(&block).unwrap();

    for threads in [2, 4, 8] {
        let threaded = CompressedMatrixBlock::compress_multi_threaded(&block, threads).unwrap();
        assert_eq!(threaded, reference, "compression with {} threads diverged", threads);
    }
}

#[test]
fn cbind_appends_compressed_columns(){
    let left = low_cardinality_matrix(1500, 3, 11);
    let right = low_cardinality_matrix(1500, 2, 12);

    let compressed_left = CompressedMatrixBlock::compress(&left).unwrap();
    let appended = compressed_left.cbind_uncompressed(&right).unwrap();

    assert_eq!(appended.columns(), 5);
    assert_eq!(appended.nonzeros(), left.nonzeros() + right.nonzeros());
    assert_group_columns_partition(&appended);

    let restored = appended.decompress().unwrap();
    for row in [0, 100, 1499] {
        for column in 0..3 { assert_eq!(restored.get(row, column), left.get(row, column)); }
        for column in 0..2 { assert_eq!(restored.get(row, column + 3), right.get(row, column)); }
    }
}
