use std::{
    borrow::Cow,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{StreamExt, stream::FuturesUnordered};
use tokio::task::JoinHandle;
use tracing::{Instrument, info, warn};

/// A thin wrapper around [`tokio::task::JoinHandle`] which carries a name for
/// debuggability and propagates panics instead of swallowing them: awaiting a
/// `NamedTask` whose inner task panicked resumes the panic on the awaiter.
///
/// Long-lived tasks (listeners, sweepers) are collected and drained at
/// shutdown via [`join_all_with_deadline`]; fire-and-forget tasks can be
/// [`detach`]ed.
///
/// [`detach`]: NamedTask::detach
#[must_use]
pub struct NamedTask {
    handle: JoinHandle<()>,
    name: Cow<'static, str>,
}

impl NamedTask {
    /// Spawn a named task, propagating the current tracing span into it.
    pub fn spawn<F>(name: impl Into<Cow<'static, str>>, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future.in_current_span());
        Self { handle, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Let the task run to completion without ever joining it.
    pub fn detach(self) {
        drop(self.handle);
    }

    /// Abort the inner task.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

impl Future for NamedTask {
    /// The name of the finished task.
    type Output = Cow<'static, str>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(std::mem::take(&mut self.name)),
            Poll::Ready(Err(join_err)) => match join_err.try_into_panic() {
                Ok(panic) => std::panic::resume_unwind(panic),
                // Aborted; treat as finished.
                Err(_) => Poll::Ready(std::mem::take(&mut self.name)),
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Drain a set of tasks, waiting at most `deadline` for all of them to
/// finish. Tasks which fail to finish in time are logged and abandoned.
/// Intended to be called after the shutdown signal has been sent.
pub async fn join_all_with_deadline(
    tasks: impl IntoIterator<Item = NamedTask>,
    deadline: Duration,
) {
    let mut remaining = tasks.into_iter().collect::<FuturesUnordered<_>>();

    let timeout = tokio::time::sleep(deadline);
    tokio::pin!(timeout);

    while !remaining.is_empty() {
        tokio::select! {
            Some(name) = remaining.next() => info!("Task finished: {name}"),
            () = &mut timeout => {
                let hung = remaining
                    .iter()
                    .map(NamedTask::name)
                    .collect::<Vec<_>>();
                warn!("Tasks failed to finish before deadline: {hung:?}");
                return;
            }
        }
    }
}
