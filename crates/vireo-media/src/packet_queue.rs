// crates/vireo-media/src/packet_queue.rs
//
// Bounded-by-duration FIFO of compressed packets between the demux worker
// and a decode worker. The queue itself is unbounded in count (the demuxer
// applies backpressure from `buffered_seconds()` instead) and keeps a
// running duration tally so that check is O(1).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::Rational;

/// Outcome of a pop.
pub enum Popped {
    Packet(ffmpeg::Packet),
    /// Nothing arrived within the wait interval; queue still running.
    Empty,
    /// Queue stopped and drained — the end-of-stream sentinel.
    Stopped,
}

struct Inner {
    packets:        VecDeque<ffmpeg::Packet>,
    /// Σ effective duration (ticks) of held packets. Unset/negative packet
    /// durations count as 0 so the tally never goes negative.
    total_duration: i64,
    running:        bool,
}

pub struct PacketQueue {
    inner: Mutex<Inner>,
    cond:  Condvar,
}

fn effective_duration(packet: &ffmpeg::Packet) -> i64 {
    packet.duration().max(0)
}

impl PacketQueue {
    /// A new queue starts stopped; `start()` opens it for traffic.
    pub fn new() -> Self {
        PacketQueue {
            inner: Mutex::new(Inner {
                packets: VecDeque::new(),
                total_duration: 0,
                running: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn start(&self) {
        self.inner.lock().unwrap().running = true;
    }

    /// Close the queue and wake every waiter. Held packets stay until
    /// popped or flushed; consumers observe `Stopped` once drained.
    pub fn stop(&self) {
        self.inner.lock().unwrap().running = false;
        self.cond.notify_all();
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    /// Append a packet. Fails only when the queue is stopped (the packet is
    /// handed back so the caller can decide what to do with it).
    pub fn push(&self, packet: ffmpeg::Packet) -> Result<(), ffmpeg::Packet> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.running {
            return Err(packet);
        }
        inner.total_duration += effective_duration(&packet);
        inner.packets.push_back(packet);
        self.cond.notify_one();
        Ok(())
    }

    /// Pop the head, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Popped {
        let mut inner = self.inner.lock().unwrap();
        if inner.packets.is_empty() && inner.running {
            let (guard, _) = self
                .cond
                .wait_timeout_while(inner, timeout, |i| i.packets.is_empty() && i.running)
                .unwrap();
            inner = guard;
        }
        match inner.packets.pop_front() {
            Some(packet) => {
                inner.total_duration -= effective_duration(&packet);
                Popped::Packet(packet)
            }
            None if !inner.running => Popped::Stopped,
            None => Popped::Empty,
        }
    }

    /// Pop the head, blocking until a packet arrives or the queue stops.
    pub fn pop_blocking(&self) -> Popped {
        let mut inner = self.inner.lock().unwrap();
        while inner.packets.is_empty() && inner.running {
            inner = self.cond.wait(inner).unwrap();
        }
        match inner.packets.pop_front() {
            Some(packet) => {
                inner.total_duration -= effective_duration(&packet);
                Popped::Packet(packet)
            }
            None => Popped::Stopped,
        }
    }

    /// Release every held packet and zero the duration tally. The running
    /// flag is untouched.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.packets.clear();
        inner.total_duration = 0;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_ticks(&self) -> i64 {
        self.inner.lock().unwrap().total_duration
    }

    /// Buffered duration in seconds for the given stream time base — the
    /// demuxer's backpressure probe.
    pub fn buffered_seconds(&self, time_base: Rational) -> f64 {
        self.duration_ticks() as f64 * f64::from(time_base)
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn packet(duration: i64) -> ffmpeg::Packet {
        let mut p = ffmpeg::Packet::new(16);
        p.set_duration(duration);
        p
    }

    fn started() -> PacketQueue {
        let q = PacketQueue::new();
        q.start();
        q
    }

    #[test]
    fn duration_tally_tracks_held_packets() {
        let q = started();
        let durations = [40i64, 0, 33, 7, 120];
        let mut held = 0i64;
        for &d in &durations {
            q.push(packet(d)).unwrap();
            held += d;
            // invariant: tally equals the sum of held durations
            assert_eq!(q.duration_ticks(), held);
        }
        let mut remaining: i64 = durations.iter().sum();
        for &d in &durations {
            match q.pop_timeout(Duration::from_millis(1)) {
                Popped::Packet(p) => assert_eq!(p.duration(), d),
                _ => panic!("expected packet"),
            }
            remaining -= d;
            assert_eq!(q.duration_ticks(), remaining);
        }
        assert_eq!(q.duration_ticks(), 0);
    }

    #[test]
    fn negative_durations_do_not_corrupt_tally() {
        let q = started();
        q.push(packet(-1)).unwrap();
        q.push(packet(25)).unwrap();
        assert_eq!(q.duration_ticks(), 25);
        let _ = q.pop_timeout(Duration::from_millis(1));
        let _ = q.pop_timeout(Duration::from_millis(1));
        assert_eq!(q.duration_ticks(), 0);
    }

    #[test]
    fn flush_releases_everything() {
        let q = started();
        for d in [10, 20, 30] {
            q.push(packet(d)).unwrap();
        }
        q.flush();
        assert_eq!(q.duration_ticks(), 0);
        assert!(q.is_empty());
        // nothing held before the flush may come back
        assert!(matches!(
            q.pop_timeout(Duration::from_millis(1)),
            Popped::Empty
        ));
        // queue is still usable after a flush
        q.push(packet(5)).unwrap();
        assert!(matches!(
            q.pop_timeout(Duration::from_millis(1)),
            Popped::Packet(_)
        ));
    }

    #[test]
    fn push_fails_when_stopped() {
        let q = started();
        q.stop();
        assert!(q.push(packet(1)).is_err());
    }

    #[test]
    fn stopped_and_empty_pops_sentinel() {
        let q = started();
        q.push(packet(8)).unwrap();
        q.stop();
        // packets queued before the stop still drain
        assert!(matches!(q.pop_blocking(), Popped::Packet(_)));
        assert!(matches!(q.pop_blocking(), Popped::Stopped));
        assert!(matches!(
            q.pop_timeout(Duration::from_millis(1)),
            Popped::Stopped
        ));
    }

    #[test]
    fn stop_wakes_a_blocked_consumer() {
        let q = Arc::new(started());
        let q2 = Arc::clone(&q);
        let consumer = thread::spawn(move || matches!(q2.pop_blocking(), Popped::Stopped));
        thread::sleep(Duration::from_millis(30));
        q.stop();
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn buffered_seconds_scales_by_time_base() {
        let q = started();
        // 500 ticks at 1/1000 s per tick = 0.5 s
        q.push(packet(500)).unwrap();
        let secs = q.buffered_seconds(Rational::new(1, 1000));
        assert!((secs - 0.5).abs() < 1e-9);
    }
}
