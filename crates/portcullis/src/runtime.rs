//! Engine-owned tokio runtime.
//!
//! The public API is blocking. Network work runs on this runtime and the
//! caller's thread parks on a std channel, which keeps the engine usable from
//! plain threads and from inside other async runtimes alike.

use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{Error, Result};

pub(crate) fn build(worker_threads: usize) -> Result<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("portcullis-worker")
        .enable_all()
        .build()
        .map_err(|e| Error::Runtime(format!("failed to start runtime: {}", e)))
}

/// Run `future` on the engine runtime and block until it completes.
pub(crate) fn block_on<F>(handle: &Handle, future: F) -> Result<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::sync_channel(1);
    handle.spawn(async move {
        let _ = tx.send(future.await);
    });
    rx.recv()
        .map_err(|_| Error::Runtime("engine task was cancelled".into()))
}
