//! Bounded-parallelism executor returning positionally-ordered results (C3).

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

/// Run `items` through `f` with at most `max_parallel` in flight at once.
/// `results[i]` corresponds to `items[i]`; a failed item yields `None` in
/// its slot and never cancels its peers.
pub async fn run<T, R, F, Fut>(items: Vec<T>, f: F, max_parallel: usize) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Option<R>> + Send,
{
    let max_parallel = max_parallel.max(1);
    let mut results: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
    let mut pending: FuturesUnordered<_> = FuturesUnordered::new();
    let mut iter = items.into_iter().enumerate();

    for (idx, item) in iter.by_ref().take(max_parallel) {
        pending.push(async move { (idx, f(item).await) });
    }

    while let Some((idx, outcome)) = pending.next().await {
        results[idx] = outcome;
        if let Some((idx, item)) = iter.next() {
            pending.push(async move { (idx, f(item).await) });
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn preserves_result_order_matching_input() {
        let items: Vec<u32> = (0..10).collect();
        let results = run(
            items,
            |n| async move { Some(n * 2) },
            3,
        )
        .await;
        let expected: Vec<Option<u32>> = (0..10).map(|n| Some(n * 2)).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn failed_items_yield_none_without_cancelling_peers() {
        let items: Vec<u32> = (0..5).collect();
        let results = run(
            items,
            |n| async move { if n == 2 { None } else { Some(n) } },
            2,
        )
        .await;
        assert_eq!(results, vec![Some(0), Some(1), None, Some(3), Some(4)]);
    }

    #[tokio::test]
    async fn never_exceeds_max_parallel() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let items: Vec<u32> = (0..20).collect();

        let in_flight_cl = in_flight.clone();
        let max_observed_cl = max_observed.clone();
        let results = run(
            items,
            move |n| {
                let in_flight = in_flight_cl.clone();
                let max_observed = max_observed_cl.clone();
                async move {
                    let cur = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(cur, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Some(n)
                }
            },
            4,
        )
        .await;

        assert_eq!(results.len(), 20);
        assert!(max_observed.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn result_length_always_equals_input_length() {
        let results = run(Vec::<u32>::new(), |n| async move { Some(n) }, 4).await;
        assert_eq!(results.len(), 0);

        let results = run(vec![1u32], |n| async move { Some(n) }, 4).await;
        assert_eq!(results.len(), 1);
    }
}
