
//! Partitioning of compressible columns into co-coded groups.
//!
//! Columns whose values correlate compress better together, since their
//! joint tuples share one set of row offsets. The planner greedily merges
//! candidate groups while the merged estimate beats the parts and the
//! tuple space stays manageable.

use std::collections::HashMap;

use crate::estimate::{CompressedSizeInfo, SizeEstimator};


/// Upper bound for the product of per-column cardinalities in one group.
/// Beyond this, the joint tuple space outgrows any co-coding benefit.
pub const MAX_GROUP_CARDINALITY: usize = 1 << 16;


#[derive(Debug, Clone)]
struct CandidateGroup {
    id: usize,
    columns: Vec<usize>,
    min_size: usize,

    /// Product of the member columns' estimated cardinalities, each counted
    /// with one extra slot for the zero tuple. Saturates instead of overflowing.
    cardinality_product: usize,
}


/// Partition the candidate columns into groups to encode together.
///
/// `candidates` pairs each compressible column with its estimated size info,
/// ordered by descending compression ratio so that the most promising
/// columns seed the first groups. Returns sorted column index lists.
pub fn plan_groups(
    candidates: &[(usize, CompressedSizeInfo)],
    estimator: &impl SizeEstimator,
) -> Vec<Vec<usize>>
{
    let mut next_id = candidates.len();
    let mut groups: Vec<CandidateGroup> = candidates.iter().enumerate()
        .map(|(id, &(column, info))| CandidateGroup {
            id,
            columns: vec![column],
            min_size: info.min_size(),
            cardinality_product: info.est_cardinality.saturating_add(1),
        })
        .collect();

    // joint sizes already computed this planning round, keyed by group ids
    let mut joint_sizes: HashMap<(usize, usize), usize> = HashMap::new();

    loop {
        let mut best: Option<(usize, usize, usize)> = None; // (left, right, joint size)
        let mut best_gain = 0_usize;

        for left in 0..groups.len() {
            for right in left + 1 .. groups.len() {
                let product = groups[left].cardinality_product
                    .saturating_mul(groups[right].cardinality_product);

                if product > MAX_GROUP_CARDINALITY { continue; }

                let key = (groups[left].id, groups[right].id);
                let joint_size = *joint_sizes.entry(key).or_insert_with(|| {
                    let mut columns = groups[left].columns.clone();
                    columns.extend_from_slice(&groups[right].columns);
                    columns.sort_unstable();
                    estimator.estimate(&columns).min_size()
                });

                let parts_size = groups[left].min_size + groups[right].min_size;
                if joint_size < parts_size {
                    let gain = parts_size - joint_size;
                    if gain > best_gain {
                        best_gain = gain;
                        best = Some((left, right, joint_size));
                    }
                }
            }
        }

        let (left, right, joint_size) = match best {
            Some(merge) => merge,
            None => break,
        };

        let removed = groups.swap_remove(right);
        let merged = &mut groups[left];

        merged.columns.extend_from_slice(&removed.columns);
        merged.columns.sort_unstable();
        merged.min_size = joint_size;
        merged.cardinality_product = merged.cardinality_product
            .saturating_mul(removed.cardinality_product);

        merged.id = next_id;
        next_id += 1;
    }

    groups.into_iter().map(|group| group.columns).collect()
}
