//! `PacketQueue`: the hand-off between the hardware callback thread and the
//! writer thread.
//!
//! ```text
//! capture callback ──put──► [ pkt pkt pkt … ABORT ] ──get──► writer thread
//!                   (admission control)         (sentinel stays at head)
//! ```
//!
//! One mutex guards the FIFO, its byte size, and the counters. `ready` wakes
//! a consumer blocked in [`PacketQueue::get`]; `space` wakes a producer
//! blocked by [`AdmissionPolicy::Block`].

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::packet::{MediaPacket, StreamKind};

/// Default memory ceiling: 1 GiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 1 << 30;

// ── Admission policy ──────────────────────────────────────────────────────────

/// What `put` does with a video packet that would take the queue over its
/// memory ceiling. Audio is always admitted while the queue is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Refuse the incoming frame.
    #[default]
    DropNewest,
    /// Evict queued video frames, oldest first, to make room.
    DropOldest,
    /// Block the producer until the writer frees space.
    Block,
}

impl FromStr for AdmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" | "drop-newest" | "drop_newest" => Ok(Self::DropNewest),
            "oldest" | "drop-oldest" | "drop_oldest" => Ok(Self::DropOldest),
            "block" => Ok(Self::Block),
            other => Err(format!("unknown drop policy '{other}' (expected newest, oldest or block)")),
        }
    }
}

impl fmt::Display for AdmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DropNewest => "newest",
            Self::DropOldest => "oldest",
            Self::Block => "block",
        })
    }
}

// ── Errors / results ──────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue full ({queued} bytes queued, limit {limit})")]
    Full { queued: usize, limit: usize },
    #[error("queue aborted")]
    Aborted,
}

/// Result of [`PacketQueue::get`].
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Packet(MediaPacket),
    /// Non-blocking get on an empty queue.
    Empty,
    /// The abort sentinel is at the head. It is not consumed.
    Aborted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub packets:       usize,
    pub bytes:         usize,
    pub high_water:    usize,
    pub admitted:      u64,
    pub dropped_video: u64,
    pub dropped_audio: u64,
    pub flushed:       u64,
}

// ── PacketQueue ───────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Entry {
    Packet(MediaPacket),
    Abort,
}

#[derive(Debug, Default)]
struct State {
    entries:  VecDeque<Entry>,
    size:     usize,
    aborted:  bool,
    next_seq: u64,
    stats:    QueueStats,
}

impl State {
    fn push(&mut self, mut packet: MediaPacket) {
        packet.seq = self.next_seq;
        self.next_seq += 1;
        self.size += packet.size();
        self.entries.push_back(Entry::Packet(packet));
        self.stats.admitted += 1;
        self.stats.high_water = self.stats.high_water.max(self.size);
    }

    /// Remove the oldest queued video packet. Returns its size.
    fn evict_oldest_video(&mut self) -> Option<usize> {
        let at = self
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Packet(p) if p.is_video()))?;
        let Some(Entry::Packet(packet)) = self.entries.remove(at) else {
            return None;
        };
        let size = packet.size();
        self.size -= size;
        self.stats.dropped_video += 1;
        Some(size)
    }
}

#[derive(Debug)]
pub struct PacketQueue {
    state:  Mutex<State>,
    ready:  Condvar,
    space:  Condvar,
    limit:  usize,
    policy: AdmissionPolicy,
}

impl PacketQueue {
    pub fn new(limit: usize, policy: AdmissionPolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ready: Condvar::new(),
            space: Condvar::new(),
            limit,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Append `packet` at the tail and wake one waiting consumer.
    pub fn put(&self, packet: MediaPacket) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.aborted {
            if packet.stream == StreamKind::Audio {
                state.stats.dropped_audio += 1;
            } else {
                state.stats.dropped_video += 1;
            }
            return Err(QueueError::Aborted);
        }

        let need = packet.size();
        if packet.is_video() && state.size + need > self.limit {
            match self.policy {
                AdmissionPolicy::DropNewest => {
                    state.stats.dropped_video += 1;
                    return Err(QueueError::Full { queued: state.size, limit: self.limit });
                }
                AdmissionPolicy::DropOldest => {
                    while state.size + need > self.limit {
                        if state.evict_oldest_video().is_none() {
                            break;
                        }
                    }
                    if state.size + need > self.limit {
                        state.stats.dropped_video += 1;
                        return Err(QueueError::Full { queued: state.size, limit: self.limit });
                    }
                }
                AdmissionPolicy::Block => {
                    // An oversized packet is let into an empty queue.
                    while state.size > 0 && state.size + need > self.limit && !state.aborted {
                        state = self.space.wait(state).unwrap_or_else(PoisonError::into_inner);
                    }
                    if state.aborted {
                        state.stats.dropped_video += 1;
                        return Err(QueueError::Aborted);
                    }
                }
            }
        }

        state.push(packet);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Pop the head packet.
    ///
    /// With `block`, waits for a packet or the abort sentinel. The sentinel is
    /// left in place, so every later call also returns [`Pop::Aborted`].
    pub fn get(&self, block: bool) -> Pop {
        let mut state = self.lock();
        loop {
            match state.entries.pop_front() {
                Some(Entry::Packet(packet)) => {
                    state.size -= packet.size();
                    drop(state);
                    self.space.notify_all();
                    return Pop::Packet(packet);
                }
                Some(Entry::Abort) => {
                    state.entries.push_front(Entry::Abort);
                    return Pop::Aborted;
                }
                None if !block => return Pop::Empty,
                None => {
                    state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Enqueue the abort sentinel behind everything already queued.
    ///
    /// Later calls are no-ops. Producers blocked on space are released.
    pub fn abort(&self) {
        let mut state = self.lock();
        if state.aborted {
            return;
        }
        state.aborted = true;
        state.entries.push_back(Entry::Abort);
        drop(state);
        self.ready.notify_one();
        self.space.notify_all();
    }

    /// Discard every queued packet. A pending abort sentinel is kept.
    /// Returns the number of packets released.
    pub fn flush(&self) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|e| matches!(e, Entry::Abort));
        let released = before - state.entries.len();
        state.size = 0;
        state.stats.flushed += released as u64;
        drop(state);
        self.space.notify_all();
        if released > 0 {
            debug!("Flushed {} queued packets", released);
        }
        released
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Number of media packets queued (the sentinel is not counted).
    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| matches!(e, Entry::Packet(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued bytes, including per-packet overhead.
    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        let packets = state.entries.iter().filter(|e| matches!(e, Entry::Packet(_))).count();
        QueueStats { packets, bytes: state.size, ..state.stats }
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT, AdmissionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use bytes::Bytes;

    use crate::packet::PACKET_OVERHEAD;

    fn video(len: usize, pts: i64) -> MediaPacket {
        MediaPacket::video(Bytes::from(vec![0u8; len]), pts, 1)
    }

    fn audio(len: usize, pts: i64) -> MediaPacket {
        MediaPacket::audio(Bytes::from(vec![0u8; len]), pts)
    }

    fn pts_of(pop: Pop) -> i64 {
        match pop {
            Pop::Packet(p) => p.pts,
            other => panic!("expected a packet, got {other:?}"),
        }
    }

    #[test]
    fn fifo_order_and_size_accounting() {
        let q = PacketQueue::default();
        let sizes = [100, 7, 3000, 1];
        let mut expected = 0;
        for (i, len) in sizes.iter().enumerate() {
            q.put(if i % 2 == 0 { video(*len, i as i64) } else { audio(*len, i as i64) }).unwrap();
            expected += len + PACKET_OVERHEAD;
            assert_eq!(q.size(), expected);
        }
        for (i, len) in sizes.iter().enumerate() {
            let Pop::Packet(p) = q.get(true) else { panic!("queue drained early") };
            assert_eq!(p.pts, i as i64);
            assert_eq!(p.seq, i as u64);
            expected -= len + PACKET_OVERHEAD;
            assert_eq!(q.size(), expected);
        }
        assert_eq!(q.size(), 0);
    }

    #[test]
    fn non_blocking_get_on_empty_returns_immediately() {
        let q = PacketQueue::default();
        assert_eq!(q.get(false), Pop::Empty);
    }

    #[test]
    fn flush_releases_everything_once() {
        let q = PacketQueue::default();
        let data = Bytes::from(vec![1u8; 64]);
        for i in 0..5 {
            q.put(MediaPacket::video(data.clone(), i, 1)).unwrap();
        }
        assert_eq!(q.flush(), 5);
        assert_eq!(q.len(), 0);
        assert_eq!(q.size(), 0);
        assert_eq!(q.get(false), Pop::Empty);
        assert_eq!(q.flush(), 0);
    }

    #[test]
    fn flush_keeps_pending_sentinel() {
        let q = PacketQueue::default();
        q.put(video(10, 0)).unwrap();
        q.abort();
        assert_eq!(q.flush(), 1);
        assert_eq!(q.get(false), Pop::Aborted);
    }

    #[test]
    fn packets_before_sentinel_drain_in_order() {
        let q = PacketQueue::default();
        q.put(video(10, 0)).unwrap();
        q.put(audio(10, 1)).unwrap();
        q.abort();
        assert_eq!(q.put(video(10, 2)), Err(QueueError::Aborted));
        assert_eq!(pts_of(q.get(true)), 0);
        assert_eq!(pts_of(q.get(true)), 1);
        assert_eq!(q.get(true), Pop::Aborted);
        assert_eq!(q.get(false), Pop::Aborted);
        assert!(q.is_aborted());
    }

    #[test]
    fn abort_wakes_blocked_consumer() {
        let q = Arc::new(PacketQueue::default());
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.get(true))
        };
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert_eq!(consumer.join().unwrap(), Pop::Aborted);
    }

    #[test]
    fn put_wakes_blocked_consumer() {
        let q = Arc::new(PacketQueue::default());
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.get(true))
        };
        thread::sleep(Duration::from_millis(50));
        q.put(video(4, 42)).unwrap();
        assert_eq!(pts_of(consumer.join().unwrap()), 42);
    }

    #[test]
    fn drop_newest_refuses_video_but_admits_audio() {
        let limit = 2 * (100 + PACKET_OVERHEAD);
        let q = PacketQueue::new(limit, AdmissionPolicy::DropNewest);
        q.put(video(100, 0)).unwrap();
        q.put(video(100, 1)).unwrap();
        assert!(matches!(q.put(video(100, 2)), Err(QueueError::Full { .. })));
        q.put(audio(100, 3)).unwrap();
        let stats = q.stats();
        assert_eq!(stats.dropped_video, 1);
        assert_eq!(stats.dropped_audio, 0);
        assert_eq!(stats.packets, 3);
        assert_eq!(stats.high_water, 3 * (100 + PACKET_OVERHEAD));
    }

    #[test]
    fn drop_oldest_evicts_queued_video() {
        let limit = 2 * (100 + PACKET_OVERHEAD);
        let q = PacketQueue::new(limit, AdmissionPolicy::DropOldest);
        q.put(video(100, 0)).unwrap();
        q.put(audio(10, 1)).unwrap();
        q.put(video(100, 2)).unwrap();
        q.put(video(100, 3)).unwrap();
        assert_eq!(q.stats().dropped_video, 2);
        assert_eq!(pts_of(q.get(false)), 1);
        assert_eq!(pts_of(q.get(false)), 3);
        assert_eq!(q.get(false), Pop::Empty);
    }

    #[test]
    fn block_policy_waits_for_space() {
        let limit = 100 + PACKET_OVERHEAD;
        let q = Arc::new(PacketQueue::new(limit, AdmissionPolicy::Block));
        q.put(video(100, 0)).unwrap();
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.put(video(100, 1)))
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 1);
        assert_eq!(pts_of(q.get(true)), 0);
        producer.join().unwrap().unwrap();
        assert_eq!(pts_of(q.get(true)), 1);
    }

    #[test]
    fn abort_releases_blocked_producer() {
        let limit = 100 + PACKET_OVERHEAD;
        let q = Arc::new(PacketQueue::new(limit, AdmissionPolicy::Block));
        q.put(video(100, 0)).unwrap();
        let producer = {
            let q = q.clone();
            thread::spawn(move || q.put(video(100, 1)))
        };
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert_eq!(producer.join().unwrap(), Err(QueueError::Aborted));
    }

    #[test]
    fn policy_parses_from_cli_names() {
        assert_eq!("newest".parse::<AdmissionPolicy>(), Ok(AdmissionPolicy::DropNewest));
        assert_eq!("oldest".parse::<AdmissionPolicy>(), Ok(AdmissionPolicy::DropOldest));
        assert_eq!("block".parse::<AdmissionPolicy>(), Ok(AdmissionPolicy::Block));
        assert!("sometimes".parse::<AdmissionPolicy>().is_err());
    }
}
