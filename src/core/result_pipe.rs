//! Bounded, cancellation-aware result channel for streaming job output.
//!
//! A [`ResultPipe`] lets a long-running job stream partial results (e.g.
//! paginated search batches) while remaining cancellable and safe against the
//! caller closing or abandoning the pipe mid-write.
//!
//! # Design
//!
//! - **Single owner closes**: `close()` is idempotent under concurrency,
//!   guarded by compare-and-swap on an atomic flag. The physical close is the
//!   drop of the stored sender plus a one-shot close notification.
//! - **Drain after close**: readers keep receiving buffered values after
//!   close, then observe end-of-stream.
//! - **No lock across await**: the sender is cloned under a brief
//!   `parking_lot` lock; only the clone is held across the blocking send.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::core::error::EngineError;

/// One streamed outcome of a job attempt: a success value or an error.
/// Never both.
#[derive(Debug)]
pub enum JobResult<T> {
    /// A success value produced by the work function.
    Item(T),
    /// A terminal error delivered by the manager.
    Failed(anyhow::Error),
}

impl<T> JobResult<T> {
    /// True if this result carries a success value.
    #[must_use]
    pub fn is_item(&self) -> bool {
        matches!(self, Self::Item(_))
    }

    /// Convert into a standard `Result`.
    pub fn into_result(self) -> Result<T, anyhow::Error> {
        match self {
            Self::Item(value) => Ok(value),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Bounded FIFO channel carrying [`JobResult`]s from a job to its consumer.
///
/// At most one attempt writes at any instant (attempts for a single job are
/// sequential), so writes within an attempt preserve program order.
pub struct ResultPipe<T> {
    /// Stored sender; taken on close so readers observe end-of-stream.
    tx: Mutex<Option<mpsc::Sender<JobResult<T>>>>,
    /// Receiver half, serialized across concurrent readers.
    rx: tokio::sync::Mutex<mpsc::Receiver<JobResult<T>>>,
    /// Set exactly once by the first close.
    closed: AtomicBool,
    /// Fired on close to unblock a writer waiting for buffer space.
    closed_token: CancellationToken,
}

impl<T> ResultPipe<T> {
    /// Create a pipe with the given buffer size (minimum 1).
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            closed: AtomicBool::new(false),
            closed_token: CancellationToken::new(),
        }
    }

    /// Whether the pipe has been closed by its owner.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue a result, blocking until buffer space is available.
    ///
    /// Performs a non-blocking pre-check of `ctx` so an already-cancelled
    /// context never attempts the enqueue.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ChannelClosed`] if the pipe was closed (including a
    ///   close that races a blocked write)
    /// - [`EngineError::Cancelled`] if `ctx` fires before space is available
    pub async fn write(
        &self,
        ctx: &CancellationToken,
        result: JobResult<T>,
    ) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::ChannelClosed);
        }
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Brief lock; only the clone is held across the await below.
        let tx = {
            let guard = self.tx.lock();
            guard.as_ref().cloned()
        };
        let Some(tx) = tx else {
            return Err(EngineError::ChannelClosed);
        };

        tokio::select! {
            () = ctx.cancelled() => Err(EngineError::Cancelled),
            () = self.closed_token.cancelled() => Err(EngineError::ChannelClosed),
            sent = tx.send(result) => sent.map_err(|_| EngineError::ChannelClosed),
        }
    }

    /// Receive the next result.
    ///
    /// Returns `None` once the pipe is closed and drained, or once `ctx`
    /// cancels. Buffered values remain readable after close.
    pub async fn read(&self, ctx: &CancellationToken) -> Option<JobResult<T>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            () = ctx.cancelled() => None,
            received = rx.recv() => received,
        }
    }

    /// Drain every remaining result into a vector.
    ///
    /// Convenience for consumers that want all output at once; stops on
    /// closure or cancellation like [`ResultPipe::read`].
    pub async fn drain(&self, ctx: &CancellationToken) -> Vec<JobResult<T>> {
        let mut results = Vec::new();
        while let Some(result) = self.read(ctx).await {
            results.push(result);
        }
        results
    }

    /// Close the pipe.
    ///
    /// Idempotent: concurrent calls perform exactly one physical close and
    /// never panic or block. Readers continue to drain buffered values.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.tx.lock().take();
        self.closed_token.cancel();
        trace!("result pipe closed");
    }
}
