
//! Kernel results on the compressed form compared against
//! naive computations on the uncompressed matrix.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use cla::prelude::*;


fn low_cardinality_matrix(rows: usize, columns: usize, seed: u64) -> MatrixBlock {
    let mut random: StdRng = StdRng::seed_from_u64(seed);
    let values = (0..rows * columns)
        .map(|_| random.random_range(0..3) as f64)
        .collect();

    MatrixBlock::dense(rows, columns, values).unwrap()
}

fn assert_close(left: &[f64], right: &[f64], context: &str) {
    assert_eq!(left.len(), right.len(), "{}: length mismatch", context);

    for (index, (l, r)) in left.iter().zip(right).enumerate() {
        let scale = l.abs().max(r.abs()).max(1.0);
        assert!((l - r).abs() <= 1e-9 * scale,
            "{}: element {} is {} but should be {}", context, index, l, r);
    }
}


#[test]
fn right_mult_computes_row_sums_for_ones(){
    let block = low_cardinality_matrix(10_000, 5, 1);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let result = compressed.right_mult_by_vector(&[1.0; 5]).unwrap();

    let expected: Vec<f64> = (0..10_000).map(|row| {
        (0..5).map(|column| block.get(row, column)).sum()
    }).collect();

    assert_close(&result, &expected, "row sums");
}

#[test]
fn left_mult_with_one_hot_extracts_a_row(){
    let block = low_cardinality_matrix(10_000, 5, 1);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let mut one_hot = vec![0.0; 10_000];
    one_hot[42] = 1.0;

    let result = compressed.left_mult_by_row_vector(&one_hot).unwrap();
    let expected: Vec<f64> = (0..5).map(|column| block.get(42, column)).collect();

    assert_close(&result, &expected, "row 42");
}

#[test]
fn sum_and_min_aggregates_match_naive(){
    let block = low_cardinality_matrix(10_000, 5, 1);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let sum = compressed.unary_aggregate(AggFn::Sum, Reduce::All).unwrap();
    let expected: f64 = (0..10_000)
        .map(|row| (0..5).map(|column| block.get(row, column)).sum::<f64>())
        .sum();
    assert_close(&sum, &[expected], "total sum");

    // rows missing a tuple are implicitly zero and must show up in the minimum
    let min = compressed.unary_aggregate(AggFn::Min, Reduce::All).unwrap();
    assert_eq!(min[0], 0.0);

    let column_sums = compressed.unary_aggregate(AggFn::Sum, Reduce::PerColumn).unwrap();
    for column in 0..5 {
        let expected: f64 = (0..10_000).map(|row| block.get(row, column)).sum();
        let scale = expected.abs().max(1.0);
        assert!((column_sums[column] - expected).abs() <= 1e-9 * scale, "column {}", column);
    }
}

#[test]
fn parallel_transpose_self_mult_matches_dense_reference(){
    let rows = 4096;
    let columns = 32;
    let block = low_cardinality_matrix(rows, columns, 8);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let result = compressed.transpose_self_mult_left_multi_threaded(4).unwrap();

    assert_eq!(result.rows(), columns);
    assert_eq!(result.columns(), columns);

    for left in 0..columns {
        for right in 0..columns {
            let expected: f64 = (0..rows)
                .map(|row| block.get(row, left) * block.get(row, right))
                .sum();

            let actual = result.get(left, right);
            let scale = expected.abs().max(1.0);
            assert!((actual - expected).abs() <= 1e-9 * scale,
                "cell ({}, {}) is {} but should be {}", left, right, actual, expected);
        }
    }
}

#[test]
fn mm_chain_matches_composed_kernels(){
    let block = low_cardinality_matrix(5000, 4, 13);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let vector = vec![0.5, -1.0, 2.0, 0.25];
    let weights: Vec<f64> = (0..5000).map(|row| ((row % 11) as f64) / 11.0).collect();

    let chained = compressed.mm_chain(&vector, Some(&weights)).unwrap();

    let mut intermediate = compressed.right_mult_by_vector(&vector).unwrap();
    for (value, weight) in intermediate.iter_mut().zip(&weights) { *value *= weight; }
    let composed = compressed.left_mult_by_row_vector(&intermediate).unwrap();

    assert_close(&chained, &composed, "weighted chain");
}

#[test]
fn threaded_kernels_match_across_thread_counts(){
    let block = low_cardinality_matrix(4096, 8, 21);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let vector: Vec<f64> = (0..8).map(|index| index as f64 - 3.5).collect();
    let row_vector: Vec<f64> = (0..4096).map(|row| ((row % 17) as f64) - 8.0).collect();

    let right = compressed.right_mult_by_vector(&vector).unwrap();
    let left = compressed.left_mult_by_row_vector(&row_vector).unwrap();
    let chain = compressed.mm_chain(&vector, None).unwrap();
    let tsmm = compressed.transpose_self_mult_left().unwrap();

    for threads in [1, 2, 4, 8] {
        let context = format!("{} threads", threads);

        assert_close(
            &compressed.right_mult_by_vector_multi_threaded(&vector, threads).unwrap(),
            &right, &context,
        );

        assert_close(
            &compressed.left_mult_by_row_vector_multi_threaded(&row_vector, threads).unwrap(),
            &left, &context,
        );

        assert_close(
            &compressed.mm_chain_multi_threaded(&vector, None, threads).unwrap(),
            &chain, &context,
        );

        assert!(compressed.transpose_self_mult_left_multi_threaded(threads).unwrap()
            .equals_with_tolerance(&tsmm, 1e-9), "{}", context);

        for &function in &[AggFn::Sum, AggFn::SumSquares, AggFn::Min, AggFn::Max] {
            for &reduce in &[Reduce::All, Reduce::PerRow, Reduce::PerColumn] {
                let sequential = compressed.unary_aggregate(function, reduce).unwrap();
                let threaded = compressed.unary_aggregate_multi_threaded(function, reduce, threads).unwrap();

                match function {
                    AggFn::Min | AggFn::Max => assert_eq!(threaded, sequential, "{}", context),
                    _ => assert_close(&threaded, &sequential, &context),
                }
            }
        }
    }
}

#[test]
fn scalar_operations_match_cell_wise_application(){
    let block = low_cardinality_matrix(2000, 4, 34);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    for op in [ScalarOp::Multiply(3.0), ScalarOp::Divide(4.0), ScalarOp::Add(2.5), ScalarOp::Subtract(1.0)] {
        let applied = compressed.scalar_op(op).decompress().unwrap();

        for row in (0..2000).step_by(97) {
            for column in 0..4 {
                assert_eq!(applied.get(row, column), op.apply(block.get(row, column)),
                    "cell ({}, {}) after {:?}", row, column, op);
            }
        }
    }
}

#[test]
fn unsupported_operations_fall_back_to_decompression(){
    let block = low_cardinality_matrix(1000, 3, 55);
    let compressed = CompressedMatrixBlock::compress(&block).unwrap();

    let transposed = compressed.transpose().unwrap();
    assert!(transposed.equals_with_tolerance(&block.transpose(), 1e-9));

    let sliced = compressed.slice_rows(100, 200).unwrap();
    assert!(sliced.equals_with_tolerance(&block.slice_rows(100, 200).unwrap(), 1e-9));
}
