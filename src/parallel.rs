use rayon::prelude::*;

/// Fans `count` work items out to `workers` parallel workers with
/// strided ownership: item `j` is processed by worker `j % workers`.
/// The closure receives `(worker, index)`; results come back in input
/// order. The collect is the join barrier.
pub fn strided_map<T, F>(count: usize, workers: usize, op: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, usize) -> T + Sync,
{
    let workers = workers.max(1);

    let buckets: Vec<Vec<(usize, T)>> = (0..workers)
        .into_par_iter()
        .map(|worker| {
            (worker..count)
                .step_by(workers)
                .map(|index| (index, op(worker, index)))
                .collect()
        })
        .collect();

    let mut slots: Vec<Option<T>> = Vec::with_capacity(count);
    slots.resize_with(count, || None);
    for bucket in buckets {
        for (index, value) in bucket {
            slots[index] = Some(value);
        }
    }

    slots
        .into_iter()
        .map(|slot| slot.expect("every index is owned by exactly one worker"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_input_order() {
        let out = strided_map(100, 12, |_, index| index * 2);
        assert_eq!(out.len(), 100);
        for (index, value) in out.iter().enumerate() {
            assert_eq!(*value, index * 2);
        }
    }

    #[test]
    fn assigns_strided_ownership() {
        let out = strided_map(50, 7, |worker, index| (worker, index));
        for (index, (worker, seen)) in out.iter().enumerate() {
            assert_eq!(*seen, index);
            assert_eq!(*worker, index % 7);
        }
    }

    #[test]
    fn handles_empty_input_and_single_worker() {
        assert!(strided_map(0, 12, |_, index| index).is_empty());
        let out = strided_map(5, 0, |worker, _| worker);
        assert_eq!(out, vec![0, 0, 0, 0, 0]);
    }
}
