
//! Scoped thread pool helpers for data-parallel fan-out.
//!
//! All parallelism in this crate is fan-out and join: a bounded pool is
//! built for one call, tasks produce independent partial results over a
//! channel, and the pool shuts down when the call returns, on every exit
//! path. Workers never suspend and never share mutable state.

use crate::error::{Error, Result};
use crate::group::SEGMENT_SIZE;


/// Build a pool of exactly `threads` workers, run the job, and tear the
/// pool down afterwards. A single thread skips the pool entirely.
pub fn with_pool<T>(threads: usize, job: impl FnOnce(&rayon::ThreadPool) -> Result<T>) -> Result<T> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|error| Error::invalid(format!("thread pool unavailable: {}", error)))?;

    job(&pool)
}

/// Run `task_count` independent tasks on the pool and collect their results
/// in task order. All tasks are joined before returning; if any of them
/// failed, the first failure (by task index) is returned after the join.
pub fn fan_out<T, F>(pool: &rayon::ThreadPool, task_count: usize, run_task: F) -> Result<Vec<T>>
    where T: Send, F: Fn(usize) -> Result<T> + Sync
{
    let (sender, receiver) = std::sync::mpsc::channel();

    pool.scope(|scope| {
        for index in 0..task_count {
            let sender = sender.clone();
            let run_task = &run_task;

            scope.spawn(move |_| {
                // receiver outlives the scope, sending cannot fail
                let _ = sender.send((index, run_task(index)));
            });
        }
    });

    drop(sender);

    let mut results: Vec<Option<Result<T>>> = (0..task_count).map(|_| None).collect();
    for (index, result) in receiver {
        results[index] = Some(result);
    }

    results.into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(Error::invalid("worker task produced no result"))))
        .collect()
}


/// Split `rows` into at most `tasks` contiguous ranges whose lengths are
/// multiples of the segment size, so that encoded groups can use their skip
/// tables at the partition boundaries. Returns half-open `(low, high)` pairs.
pub fn segment_aligned_partitions(rows: usize, tasks: usize) -> Vec<(usize, usize)> {
    if rows == 0 { return Vec::new(); }

    let segments = (rows + SEGMENT_SIZE - 1) / SEGMENT_SIZE;
    let task_count = tasks.max(1).min(segments);
    let segments_per_task = (segments + task_count - 1) / task_count;
    let rows_per_task = segments_per_task * SEGMENT_SIZE;

    (0..task_count)
        .map(|task| {
            let low = task * rows_per_task;
            let high = (low + rows_per_task).min(rows);
            (low, high)
        })
        .filter(|&(low, high)| low < high)
        .collect()
}

/// Assign `count` items to `tasks` workers round-robin,
/// returning the item indices per worker.
pub fn round_robin(count: usize, tasks: usize) -> Vec<Vec<usize>> {
    let task_count = tasks.max(1).min(count.max(1));
    let mut assignments = vec![Vec::new(); task_count];

    for item in 0..count {
        assignments[item % task_count].push(item);
    }

    assignments
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fan_out_keeps_task_order(){
        let results = with_pool(4, |pool| {
            fan_out(pool, 16, |index| Ok(index * 2))
        }).unwrap();

        assert_eq!(results, (0..16).map(|index| index * 2).collect::<Vec<_>>());
    }

    #[test]
    fn fan_out_surfaces_the_first_failure(){
        let result: Result<Vec<usize>> = with_pool(4, |pool| {
            fan_out(pool, 8, |index| {
                if index % 3 == 2 { Err(Error::invalid(format!("task {}", index))) }
                else { Ok(index) }
            })
        });

        match result {
            Err(Error::Invalid(message)) => assert_eq!(message, "task 2"),
            other => panic!("expected the first failure, got {:?}", other),
        }
    }

    #[test]
    fn partitions_align_to_segments(){
        let partitions = segment_aligned_partitions(3 * SEGMENT_SIZE + 17, 2);
        assert_eq!(partitions, vec![
            (0, 2 * SEGMENT_SIZE),
            (2 * SEGMENT_SIZE, 3 * SEGMENT_SIZE + 17),
        ]);

        // small matrices stay in one partition
        assert_eq!(segment_aligned_partitions(5000, 8), vec![(0, 5000)]);
    }

    #[test]
    fn round_robin_spreads_items(){
        assert_eq!(round_robin(5, 2), vec![vec![0, 2, 4], vec![1, 3]]);
        assert_eq!(round_robin(2, 8).len(), 2);
    }
}
