//! Bounded drop-oldest frame queue
//!
//! A flume channel whose producer keeps a receiver clone: when the channel is
//! full the oldest entry is evicted and counted, so a slow consumer only ever
//! sees the most recent frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::error::{PipelineError, Result};

#[derive(Default)]
struct Stats {
    written: AtomicU64,
    read: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Queue counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub written: u64,
    pub read: u64,
    pub dropped: u64,
}

/// Producer half; cheap to clone
pub struct FrameSender<T> {
    tx: Sender<T>,
    evict: Receiver<T>,
    stats: Arc<CachePadded<Stats>>,
}

/// Consumer half; disconnects once every sender is gone
pub struct FrameReceiver<T> {
    rx: Receiver<T>,
    stats: Arc<CachePadded<Stats>>,
}

/// Creates a queue holding at most `capacity` items (minimum 1)
pub fn frame_queue<T>(capacity: usize) -> (FrameSender<T>, FrameReceiver<T>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    let stats = Arc::new(CachePadded::new(Stats::default()));
    (
        FrameSender {
            tx,
            evict: rx.clone(),
            stats: Arc::clone(&stats),
        },
        FrameReceiver { rx, stats },
    )
}

impl<T> FrameSender<T> {
    /// Enqueues `item`, returning the evicted oldest entry if the queue was full.
    /// Fails with `Closed` once the consumer has called [`FrameReceiver::close`].
    pub fn push(&self, item: T) -> Result<Option<T>> {
        if self.is_closed() {
            return Err(PipelineError::Closed);
        }
        let mut item = item;
        let mut evicted = None;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => {
                    self.stats.written.fetch_add(1, Ordering::Relaxed);
                    return Ok(evicted);
                }
                Err(TrySendError::Full(back)) => {
                    item = back;
                    match self.evict.try_recv() {
                        Ok(old) => {
                            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                            evicted = Some(old);
                        }
                        Err(TryRecvError::Empty) => {}
                        Err(TryRecvError::Disconnected) => return Err(PipelineError::Closed),
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Err(PipelineError::Closed),
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stats.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        snapshot(&self.stats)
    }
}

impl<T> Clone for FrameSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> FrameReceiver<T> {
    /// Blocks for the next item; `None` once all senders are dropped
    pub fn recv(&self) -> Option<T> {
        let item = self.rx.recv().ok()?;
        self.stats.read.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<T, RecvTimeoutError> {
        let item = self.rx.recv_timeout(timeout)?;
        self.stats.read.fetch_add(1, Ordering::Relaxed);
        Ok(item)
    }

    pub fn try_recv(&self) -> Option<T> {
        let item = self.rx.try_recv().ok()?;
        self.stats.read.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Drains everything queued and returns the newest item
    pub fn latest(&self) -> Option<T> {
        let mut newest = None;
        while let Some(item) = self.try_recv() {
            newest = Some(item);
        }
        newest
    }

    /// Refuses further pushes and discards whatever is still queued
    pub fn close(&self) {
        self.stats.closed.store(true, Ordering::Release);
        while self.rx.try_recv().is_ok() {}
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        snapshot(&self.stats)
    }
}

impl<T> Clone for FrameReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

fn snapshot(stats: &Stats) -> QueueStats {
    QueueStats {
        written: stats.written.load(Ordering::Relaxed),
        read: stats.read.load(Ordering::Relaxed),
        dropped: stats.dropped.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_within_capacity() {
        let (tx, rx) = frame_queue(3);
        for i in 0..3 {
            assert_eq!(tx.push(i).unwrap(), None);
        }
        assert_eq!(rx.try_recv(), Some(0));
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let (tx, rx) = frame_queue(2);
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(tx.push(3).unwrap(), Some(1));
        assert_eq!(tx.push(4).unwrap(), Some(2));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.latest(), Some(4));
        assert_eq!(
            rx.stats(),
            QueueStats {
                written: 4,
                read: 2,
                dropped: 2,
            }
        );
    }

    #[test]
    fn test_receiver_disconnects_after_senders_drop() {
        let (tx, rx) = frame_queue::<u8>(1);
        let second = tx.clone();
        drop(tx);
        second.push(9).unwrap();
        drop(second);
        assert_eq!(rx.recv(), Some(9));
        assert_eq!(rx.recv(), None);
    }

    #[test]
    fn test_push_after_close_fails() {
        let (tx, rx) = frame_queue(2);
        tx.push(1).unwrap();
        rx.close();
        assert!(tx.is_closed());
        assert!(rx.is_empty());
        assert!(matches!(tx.push(2), Err(PipelineError::Closed)));
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let (tx, rx) = frame_queue(0);
        tx.push('a').unwrap();
        assert_eq!(tx.push('b').unwrap(), Some('a'));
        assert_eq!(rx.recv_timeout(Duration::from_millis(10)).unwrap(), 'b');
    }
}
