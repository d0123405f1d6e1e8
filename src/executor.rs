//! Bounded-concurrency worker pool over a slice
//!
//! [`run_bounded`] drives `min(concurrency, items.len())` workers on the calling
//! task. Each worker claims the next unclaimed index from a shared cursor until the
//! slice is exhausted. Completion order is unspecified; the returned vector is
//! index-stable.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default number of items a worker processes before yielding to the scheduler
pub const DEFAULT_YIELD_EVERY: usize = 20;

/// Run `worker` over every item with at most `concurrency` in flight
///
/// `results[i]` is always `worker(&items[i], i)`'s output, regardless of which
/// worker ran it or when it finished.
///
/// # Examples
///
/// ```
/// use batch_translator::executor::run_bounded;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let words = vec!["a", "bb", "ccc"];
/// let lengths = run_bounded(&words, 2, |w, _| async move { w.len() }).await;
/// assert_eq!(lengths, vec![1, 2, 3]);
/// # }
/// ```
pub async fn run_bounded<'a, T, R, F, Fut>(items: &'a [T], concurrency: usize, worker: F) -> Vec<R>
where
    F: Fn(&'a T, usize) -> Fut,
    Fut: Future<Output = R> + 'a,
{
    run_bounded_with_yield(items, concurrency, DEFAULT_YIELD_EVERY, worker).await
}

/// [`run_bounded`] with an explicit yield cadence
pub async fn run_bounded_with_yield<'a, T, R, F, Fut>(
    items: &'a [T],
    concurrency: usize,
    yield_every: usize,
    worker: F,
) -> Vec<R>
where
    F: Fn(&'a T, usize) -> Fut,
    Fut: Future<Output = R> + 'a,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = concurrency.clamp(1, items.len());
    let yield_every = yield_every.max(1);
    let cursor = AtomicUsize::new(0);
    let worker = &worker;
    let cursor = &cursor;

    tracing::debug!(items = items.len(), workers, "Starting bounded executor");

    let lanes = (0..workers).map(|_| async move {
        let mut finished = Vec::new();
        let mut processed = 0usize;
        loop {
            let index = cursor.fetch_add(1, Ordering::SeqCst);
            let Some(item) = items.get(index) else {
                break;
            };
            finished.push((index, worker(item, index).await));

            processed += 1;
            if processed % yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        finished
    });

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    for (index, result) in futures::future::join_all(lanes).await.into_iter().flatten() {
        slots[index] = Some(result);
    }
    slots.into_iter().flatten().collect()
}
