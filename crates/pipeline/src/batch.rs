//! Fixed-size batch execution.

use futures::future::join_all;
use std::future::Future;

/// Default number of requests run together
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Run `f` over `items` in batches of `batch_size`.
///
/// Each batch is awaited in full before the next one starts. Results come
/// back in input order. A `batch_size` of 0 is treated as 1.
pub async fn run_in_batches<T, R, F, Fut>(items: Vec<T>, batch_size: usize, mut f: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    let batch_size = batch_size.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        let batch: Vec<Fut> = items.by_ref().take(batch_size).map(&mut f).collect();
        results.extend(join_all(batch).await);
    }

    results
}
