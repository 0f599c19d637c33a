//! Bounded-concurrency runner shared by both dispatch layers.
//!
//! The same primitive drives units within a document and documents within a
//! batch. At most `concurrency` futures are in flight; results come back
//! indexed by input position, not completion order. A failing or panicking
//! item becomes that item's own `Err` and never disturbs its siblings.
//!
//! Everything runs cooperatively on the calling task: the unit of
//! concurrency is an outstanding network call, so no threads are spawned.

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Why a dispatched item did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFailure<E> {
    /// The item's own processing returned an error.
    Failed(E),
    /// The item's processing panicked; the payload message is kept.
    Panicked(String),
}

impl<E: fmt::Display> fmt::Display for TaskFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Failed(e) => write!(f, "{e}"),
            TaskFailure::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Run `process(item, index)` over `items` with at most `concurrency`
/// invocations in flight.
///
/// The returned vector has exactly one entry per input item, in input order.
pub async fn run_bounded<I, T, E, F, Fut>(
    items: impl IntoIterator<Item = I>,
    concurrency: usize,
    process: F,
) -> Vec<Result<T, TaskFailure<E>>>
where
    F: Fn(I, usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let process = &process;
    stream::iter(items.into_iter().enumerate().map(move |(index, item)| {
        // Building the future happens inside the guard as well.
        AssertUnwindSafe(async move { process(item, index).await })
            .catch_unwind()
            .map(classify_outcome)
    }))
    .buffered(concurrency.max(1))
    .collect()
    .await
}

fn classify_outcome<T, E>(caught: std::thread::Result<Result<T, E>>) -> Result<T, TaskFailure<E>> {
    match caught {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskFailure::Failed(e)),
        Err(payload) => Err(TaskFailure::Panicked(panic_message(payload))),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
