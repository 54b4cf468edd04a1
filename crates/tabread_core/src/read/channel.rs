//! Bounded result channel between read workers and the consumer.
//!
//! A thin layer over `std::sync::mpsc::sync_channel`: the buffer holds at
//! most `capacity` rows and a full buffer either blocks the producer or
//! fails it, per [`OverflowPolicy`].

use super::options::OverflowPolicy;
use super::ResultRecord;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::time::Duration;

/// Why a row could not be handed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendFailure {
    /// The consumer is gone (read torn down).
    Closed,
    /// Buffer full under `OverflowPolicy::FailFast`.
    Full,
}

/// Result of one consumer-side poll.
#[derive(Debug)]
pub(crate) enum Poll {
    Record(ResultRecord),
    Empty,
    Closed,
}

pub(crate) fn bounded(
    capacity: usize,
    policy: OverflowPolicy,
) -> (ResultSender, ResultReceiver) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (
        ResultSender {
            inner: sender,
            policy,
        },
        ResultReceiver { inner: receiver },
    )
}

#[derive(Debug, Clone)]
pub(crate) struct ResultSender {
    inner: SyncSender<ResultRecord>,
    policy: OverflowPolicy,
}

impl ResultSender {
    pub(crate) fn send(&self, record: ResultRecord) -> Result<(), SendFailure> {
        match self.policy {
            OverflowPolicy::Block => self.inner.send(record).map_err(|_| SendFailure::Closed),
            OverflowPolicy::FailFast => self.inner.try_send(record).map_err(|err| match err {
                TrySendError::Full(_) => SendFailure::Full,
                TrySendError::Disconnected(_) => SendFailure::Closed,
            }),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ResultReceiver {
    inner: Receiver<ResultRecord>,
}

impl ResultReceiver {
    /// Takes a row if one is buffered, without waiting.
    pub(crate) fn try_next(&self) -> Poll {
        match self.inner.try_recv() {
            Ok(record) => Poll::Record(record),
            Err(TryRecvError::Empty) => Poll::Empty,
            Err(TryRecvError::Disconnected) => Poll::Closed,
        }
    }

    /// Waits up to `timeout` for a row.
    pub(crate) fn poll(&self, timeout: Duration) -> Poll {
        match self.inner.recv_timeout(timeout) {
            Ok(record) => Poll::Record(record),
            Err(RecvTimeoutError::Timeout) => Poll::Empty,
            Err(RecvTimeoutError::Disconnected) => Poll::Closed,
        }
    }
}
