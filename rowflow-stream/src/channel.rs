//! Bounded channels with wait-based backpressure and fault completion
//!
//! A channel is created with [`channel`] and split into a [`ChannelWriter`]
//! and a [`ChannelReader`]. The queue itself is a `tokio::sync::mpsc`
//! channel. A full bounded channel never drops items: the writer waits in
//! [`ChannelWriter::wait_to_write`] until a reader makes room. Completing
//! the channel releases the sender, so readers keep draining what is queued
//! and then observe the completion fault, if one was recorded.
//!
//! Threads outside an async runtime use the `blocking_*` variants.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use rowflow_core::{Error, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Capacity of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capacity {
    /// At most this many queued items; writers wait when full
    Bounded(usize),
    /// No limit on queued items
    Unbounded,
}

impl Capacity {
    /// Bounded capacity for `Some(n)`, unbounded for `None`
    pub fn from_option(capacity: Option<usize>) -> Self {
        capacity.map_or(Capacity::Unbounded, Capacity::Bounded)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Bounded(limit) => write!(f, "bounded({limit})"),
            Capacity::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Options for creating a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Queue capacity
    pub capacity: Capacity,

    /// Name used in log events
    pub name: String,
}

impl ChannelOptions {
    /// Options for a channel holding at most `capacity` items
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Capacity::Bounded(capacity),
            name: "channel".to_string(),
        }
    }

    /// Options for a channel without a capacity limit
    pub fn unbounded() -> Self {
        Self {
            capacity: Capacity::Unbounded,
            name: "channel".to_string(),
        }
    }

    /// Set the name used in log events
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Observable lifecycle of a channel
#[derive(Debug, Clone)]
pub enum ChannelState {
    /// Accepting writes
    Open,
    /// Completed, with items still queued for readers
    Completing {
        /// Fault readers will see once the queue is drained
        fault: Option<Error>,
    },
    /// Completed and drained
    Completed {
        /// Fault every further read observes
        fault: Option<Error>,
    },
}

impl ChannelState {
    /// Whether writes are still accepted
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    /// Whether the channel is completed and drained
    pub fn is_completed(&self) -> bool {
        matches!(self, ChannelState::Completed { .. })
    }
}

/// Why a non-blocking write was refused; the item is handed back
#[derive(Error, PartialEq, Eq, Clone, Copy)]
pub enum TryWriteError<T> {
    /// The bounded queue is at capacity
    #[error("channel is full")]
    Full(T),
    /// The channel was completed or every reader is gone
    #[error("channel is closed")]
    Closed(T),
}

impl<T> TryWriteError<T> {
    /// Take back the item that was not written
    pub fn into_inner(self) -> T {
        match self {
            TryWriteError::Full(item) | TryWriteError::Closed(item) => item,
        }
    }

    /// Whether the refusal is permanent
    pub fn is_closed(&self) -> bool {
        matches!(self, TryWriteError::Closed(_))
    }
}

impl<T> fmt::Debug for TryWriteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryWriteError::Full(_) => f.write_str("Full(..)"),
            TryWriteError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Why a non-blocking read returned no item
#[derive(Error, Debug, Clone)]
pub enum TryReadError {
    /// Nothing queued yet; the channel is still open
    #[error("channel is empty")]
    Empty,
    /// The channel is completed and drained
    #[error("channel is drained")]
    Drained(Option<Error>),
}

enum Tx<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

impl<T> Clone for Tx<T> {
    fn clone(&self) -> Self {
        match self {
            Tx::Bounded(tx) => Tx::Bounded(tx.clone()),
            Tx::Unbounded(tx) => Tx::Unbounded(tx.clone()),
        }
    }
}

impl<T> Tx<T> {
    fn try_send(&self, item: T) -> std::result::Result<(), TryWriteError<T>> {
        match self {
            Tx::Bounded(tx) => tx.try_send(item).map_err(|e| match e {
                TrySendError::Full(item) => TryWriteError::Full(item),
                TrySendError::Closed(item) => TryWriteError::Closed(item),
            }),
            Tx::Unbounded(tx) => tx.send(item).map_err(|e| TryWriteError::Closed(e.0)),
        }
    }

    fn is_closed(&self) -> bool {
        match self {
            Tx::Bounded(tx) => tx.is_closed(),
            Tx::Unbounded(tx) => tx.is_closed(),
        }
    }

    /// Items held by the bounded queue, counting reserved slots
    fn occupied(&self) -> Option<usize> {
        match self {
            Tx::Bounded(tx) => Some(tx.max_capacity() - tx.capacity()),
            Tx::Unbounded(_) => None,
        }
    }
}

enum Rx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

impl<T> Rx<T> {
    async fn recv(&mut self) -> Option<T> {
        match self {
            Rx::Bounded(rx) => rx.recv().await,
            Rx::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> std::result::Result<T, TryRecvError> {
        match self {
            Rx::Bounded(rx) => rx.try_recv(),
            Rx::Unbounded(rx) => rx.try_recv(),
        }
    }

    fn blocking_recv(&mut self) -> Option<T> {
        match self {
            Rx::Bounded(rx) => rx.blocking_recv(),
            Rx::Unbounded(rx) => rx.blocking_recv(),
        }
    }
}

/// State visible to both ends
struct Status {
    name: String,
    capacity: Capacity,
    /// Set once, by the first completion
    outcome: OnceLock<Option<Error>>,
    /// Fires on completion so waiting writers let go of their sender
    done: CancellationToken,
    /// Items written and not yet handed to a reader
    queued: AtomicUsize,
    high_water_mark: AtomicUsize,
    abandoned: AtomicBool,
}

impl Status {
    fn fault(&self) -> Option<Error> {
        self.outcome.get().cloned().flatten()
    }

    fn is_completed(&self) -> bool {
        self.outcome.get().is_some()
    }

    fn took_one(&self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }

    /// What a read past the last item returns
    fn end<T>(&self) -> Result<Option<T>> {
        match self.fault() {
            Some(fault) => Err(fault),
            None => Ok(None),
        }
    }
}

/// Create a channel and split it into its writer and reader ends
///
/// A bounded capacity of zero is an invalid argument.
pub fn channel<T>(options: ChannelOptions) -> Result<(ChannelWriter<T>, ChannelReader<T>)> {
    let (tx, rx) = match options.capacity {
        Capacity::Bounded(0) => {
            return Err(Error::InvalidArgument(format!(
                "channel '{}' needs a capacity of at least 1",
                options.name
            )));
        }
        Capacity::Bounded(limit) => {
            let (tx, rx) = mpsc::channel(limit);
            (Tx::Bounded(tx), Rx::Bounded(rx))
        }
        Capacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
    };

    let status = Arc::new(Status {
        name: options.name,
        capacity: options.capacity,
        outcome: OnceLock::new(),
        done: CancellationToken::new(),
        queued: AtomicUsize::new(0),
        high_water_mark: AtomicUsize::new(0),
        abandoned: AtomicBool::new(false),
    });

    let writer = ChannelWriter {
        side: Arc::new(WriteSide {
            tx: Mutex::new(Some(tx)),
            status: Arc::clone(&status),
        }),
    };
    let reader = ChannelReader {
        shared: Arc::new(ReadShared {
            side: tokio::sync::Mutex::new(ReadSide { rx, peeked: None }),
            status,
        }),
    };
    Ok((writer, reader))
}

struct WriteSide<T> {
    /// Taken on completion; readers see the end once the queue is drained
    tx: Mutex<Option<Tx<T>>>,
    status: Arc<Status>,
}

impl<T> WriteSide<T> {
    fn lock(&self) -> MutexGuard<'_, Option<Tx<T>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, fault: Option<Error>) -> bool {
        let released = {
            let mut tx = self.lock();
            if self.status.outcome.set(fault).is_err() {
                return false;
            }
            tx.take()
        };
        drop(released);
        self.status.done.cancel();
        tracing::trace!(
            channel = %self.status.name,
            queued = self.status.queued.load(Ordering::Acquire),
            fault = self.status.fault().as_ref().map(tracing::field::display),
            "channel completed"
        );
        true
    }
}

impl<T> Drop for WriteSide<T> {
    fn drop(&mut self) {
        if self.complete(Some(Error::WriterDropped)) {
            tracing::debug!(channel = %self.status.name, "last writer dropped without completing the channel");
        }
    }
}

/// Writing end of a channel
///
/// Cloning adds a writer. When the last writer is dropped while the channel
/// is still open, the channel completes with [`Error::WriterDropped`].
pub struct ChannelWriter<T> {
    side: Arc<WriteSide<T>>,
}

impl<T> ChannelWriter<T> {
    /// Queue `item` without waiting
    pub fn try_write(&self, item: T) -> std::result::Result<(), TryWriteError<T>> {
        let tx = self.side.lock();
        let Some(sender) = tx.as_ref() else {
            return Err(TryWriteError::Closed(item));
        };

        let status = &self.side.status;
        status.queued.fetch_add(1, Ordering::AcqRel);
        match sender.try_send(item) {
            Ok(()) => {
                let depth = sender
                    .occupied()
                    .unwrap_or_else(|| status.queued.load(Ordering::Acquire));
                status.high_water_mark.fetch_max(depth, Ordering::AcqRel);
                Ok(())
            }
            Err(refused) => {
                status.queued.fetch_sub(1, Ordering::AcqRel);
                Err(refused)
            }
        }
    }

    /// Wait until an item could be written
    ///
    /// Returns `false` once the channel no longer accepts writes, and
    /// [`Error::Cancelled`] if `cancel` fires first.
    pub async fn wait_to_write(&self, cancel: &CancellationToken) -> Result<bool> {
        let sender = self.side.lock().clone();
        let Some(sender) = sender else {
            return Ok(false);
        };
        let Tx::Bounded(tx) = &sender else {
            return Ok(!sender.is_closed());
        };

        tokio::select! {
            biased;
            permit = tx.reserve() => Ok(permit.is_ok()),
            () = self.side.status.done.cancelled() => Ok(false),
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Write `item`, waiting for capacity
    ///
    /// Returns `false`, dropping the item, when the channel stops accepting
    /// writes before there is room.
    pub async fn write(&self, mut item: T, cancel: &CancellationToken) -> Result<bool> {
        loop {
            match self.try_write(item) {
                Ok(()) => return Ok(true),
                Err(TryWriteError::Closed(_)) => return Ok(false),
                Err(TryWriteError::Full(back)) => item = back,
            }
            if !self.wait_to_write(cancel).await? {
                return Ok(false);
            }
        }
    }

    /// Blocking form of [`wait_to_write`](Self::wait_to_write)
    ///
    /// Parks the calling thread; do not call it from an async task.
    pub fn blocking_wait_to_write(&self, cancel: &CancellationToken) -> Result<bool> {
        futures::executor::block_on(self.wait_to_write(cancel))
    }

    /// Blocking form of [`write`](Self::write)
    pub fn blocking_write(&self, item: T, cancel: &CancellationToken) -> Result<bool> {
        futures::executor::block_on(self.write(item, cancel))
    }

    /// Complete the channel, recording `fault` for readers
    ///
    /// Returns `true` if this call completed the channel and `false` if it
    /// was already completed, in which case the first fault is kept.
    pub fn complete(&self, fault: Option<Error>) -> bool {
        self.side.complete(fault)
    }

    /// Whether writes are refused
    pub fn is_closed(&self) -> bool {
        self.side.lock().as_ref().map_or(true, Tx::is_closed)
    }

    /// Whether every reader has been dropped
    pub fn is_abandoned(&self) -> bool {
        self.side.status.abandoned.load(Ordering::Acquire)
    }

    /// Channel capacity
    pub fn capacity(&self) -> Capacity {
        self.side.status.capacity
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.side.status.name
    }
}

impl<T> Clone for ChannelWriter<T> {
    fn clone(&self) -> Self {
        Self {
            side: Arc::clone(&self.side),
        }
    }
}

impl<T> fmt::Debug for ChannelWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("name", &self.side.status.name)
            .field("capacity", &self.side.status.capacity)
            .finish_non_exhaustive()
    }
}

struct ReadSide<T> {
    rx: Rx<T>,
    /// Item taken off the queue by `wait_to_read`
    peeked: Option<T>,
}

impl<T> ReadSide<T> {
    async fn next(&mut self) -> Option<T> {
        match self.peeked.take() {
            Some(item) => Some(item),
            None => self.rx.recv().await,
        }
    }
}

struct ReadShared<T> {
    side: tokio::sync::Mutex<ReadSide<T>>,
    status: Arc<Status>,
}

impl<T> Drop for ReadShared<T> {
    fn drop(&mut self) {
        self.status.abandoned.store(true, Ordering::Release);
        tracing::debug!(
            channel = %self.status.name,
            discarded = self.status.queued.load(Ordering::Acquire),
            "last reader dropped"
        );
    }
}

/// Reading end of a channel
///
/// Reading is the only way to drain a channel. Every item is delivered to
/// exactly one reader. Dropping the last reader discards whatever is still
/// queued and makes further writes fail.
pub struct ChannelReader<T> {
    shared: Arc<ReadShared<T>>,
}

impl<T> ChannelReader<T> {
    fn status(&self) -> &Status {
        &self.shared.status
    }

    fn delivered(&self, item: T) -> T {
        self.status().took_one();
        item
    }

    /// Take the next item without waiting
    ///
    /// Reports [`TryReadError::Empty`] while another reader is waiting.
    pub fn try_read(&self) -> std::result::Result<T, TryReadError> {
        let Ok(mut side) = self.shared.side.try_lock() else {
            return Err(TryReadError::Empty);
        };
        if let Some(item) = side.peeked.take() {
            return Ok(self.delivered(item));
        }
        match side.rx.try_recv() {
            Ok(item) => Ok(self.delivered(item)),
            Err(TryRecvError::Disconnected) => Err(TryReadError::Drained(self.status().fault())),
            Err(TryRecvError::Empty) if self.status().is_completed() && self.is_empty() => {
                Err(TryReadError::Drained(self.status().fault()))
            }
            Err(TryRecvError::Empty) => Err(TryReadError::Empty),
        }
    }

    /// Wait for the next item
    ///
    /// Returns `Ok(None)` at the end of a cleanly completed channel and the
    /// completion fault at the end of a faulted one.
    pub async fn read(&self) -> Result<Option<T>> {
        let item = self.shared.side.lock().await.next().await;
        match item {
            Some(item) => Ok(Some(self.delivered(item))),
            None => self.status().end(),
        }
    }

    /// Wait for the next item, giving up with [`Error::Cancelled`] when
    /// `cancel` fires
    pub async fn read_cancellable(&self, cancel: &CancellationToken) -> Result<Option<T>> {
        tokio::select! {
            biased;
            item = self.read() => item,
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Wait until an item is available
    ///
    /// Returns `false` at the end of a cleanly completed channel, the
    /// completion fault at the end of a faulted one.
    pub async fn wait_to_read(&self, cancel: &CancellationToken) -> Result<bool> {
        let peek = async {
            let mut side = self.shared.side.lock().await;
            if side.peeked.is_none() {
                side.peeked = side.rx.recv().await;
            }
            side.peeked.is_some()
        };
        let ready = tokio::select! {
            biased;
            ready = peek => ready,
            () = cancel.cancelled() => return Err(Error::Cancelled),
        };
        match (ready, self.status().fault()) {
            (true, _) => Ok(true),
            (false, Some(fault)) => Err(fault),
            (false, None) => Ok(false),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        let status = self.status();
        match status.outcome.get() {
            None => ChannelState::Open,
            Some(fault) if self.is_empty() => ChannelState::Completed { fault: fault.clone() },
            Some(fault) => ChannelState::Completing { fault: fault.clone() },
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.status().queued.load(Ordering::Acquire)
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest number of items ever queued at once
    pub fn high_water_mark(&self) -> usize {
        self.status().high_water_mark.load(Ordering::Acquire)
    }

    /// Fault recorded at completion, even while items remain queued
    pub fn completion_fault(&self) -> Option<Error> {
        self.status().fault()
    }

    /// Channel capacity
    pub fn capacity(&self) -> Capacity {
        self.status().capacity
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.status().name
    }

    /// Iterate by parking the current thread between items
    ///
    /// Must not be used from inside an async runtime. The iterator yields
    /// the completion fault once and then ends.
    pub fn blocking_iter(self) -> BlockingIter<T> {
        BlockingIter { reader: Some(self) }
    }
}

impl<T: Send + 'static> ChannelReader<T> {
    /// Consume the reader as a stream of items
    ///
    /// The stream yields the completion fault once and then ends.
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        stream::unfold(Some(self), |reader| async move {
            let reader = reader?;
            match reader.read().await {
                Ok(Some(item)) => Some((Ok(item), Some(reader))),
                Ok(None) => None,
                Err(fault) => Some((Err(fault), None)),
            }
        })
        .boxed()
    }
}

impl<T> Clone for ChannelReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ChannelReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReader")
            .field("name", &self.status().name)
            .field("capacity", &self.status().capacity)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Iterator returned by [`ChannelReader::blocking_iter`]
#[derive(Debug)]
pub struct BlockingIter<T> {
    reader: Option<ChannelReader<T>>,
}

impl<T> Iterator for BlockingIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_ref()?;
        let item = {
            let mut side = reader.shared.side.blocking_lock();
            match side.peeked.take() {
                Some(item) => Some(item),
                None => side.rx.blocking_recv(),
            }
        };
        if let Some(item) = item {
            return Some(Ok(reader.delivered(item)));
        }
        let end = reader.status().end::<T>();
        self.reader = None;
        end.err().map(Err)
    }
}

static_assertions::assert_impl_all!(ChannelWriter<rowflow_core::Row>: Send, Sync, Clone);
static_assertions::assert_impl_all!(ChannelReader<rowflow_core::Row>: Send, Sync, Clone);
