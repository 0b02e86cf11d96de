//! Bounded, order-preserving execution of per-item work.

use futures::{StreamExt, stream};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `work` for each item with at most `workers` futures in flight.
///
/// Results come back in input order whatever the completion order. Once
/// `cancel` fires no further items are started; items already running are
/// driven to completion, so the output holds exactly the attempted prefix of
/// `items`.
pub async fn run_ordered<I, F, Fut>(items: I, workers: usize, cancel: &CancellationToken, work: F) -> Vec<Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    stream::iter(items)
        .take_until(cancel.cancelled())
        .map(work)
        .buffered(workers.max(1))
        .collect()
        .await
}
