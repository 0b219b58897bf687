// crates/vireo-media/src/clock.rs
//
// Playback clocks. Each decoding worker owns one clock as its single
// writer; the synchronizer reads both. All fields are milliseconds, f64,
// guarded by one short critical section per access — the writer publishes
// a (pts, wall-time) pair and readers extrapolate from it.

use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::Mutex;

/// Monotonic wall time in milliseconds since the first call in this process.
pub fn now_ms() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs_f64() * 1000.0
}

/// Snapshot of the clock fields, taken under the lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockState {
    /// PTS of the frame before the current one (ms).
    pub last_pts:    f64,
    /// PTS of the most recently observed frame (ms).
    pub cur_pts:     f64,
    /// Wall time at which `cur_pts` was observed (ms).
    pub wall_base:   f64,
    /// Wall time at which the last frame was actually presented (ms).
    pub frame_timer: f64,
}

/// A per-stream playback clock.
///
/// `get()` extrapolates: current pts plus the wall time elapsed since it was
/// set. During a pause the owning worker repeatedly shifts `wall_base`
/// forward by the waited interval so the extrapolation stands still instead
/// of drifting.
#[derive(Default)]
pub struct MediaClock {
    inner: Mutex<ClockState>,
}

impl MediaClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a newly observed frame pts at wall time `wall_now_ms`.
    pub fn set(&self, pts_ms: f64, wall_now_ms: f64) {
        let mut s = self.inner.lock();
        s.last_pts = s.cur_pts;
        s.cur_pts = pts_ms;
        s.wall_base = wall_now_ms;
    }

    /// Extrapolated playback position at wall time `wall_now_ms`.
    pub fn get_at(&self, wall_now_ms: f64) -> f64 {
        let s = self.inner.lock();
        s.cur_pts + (wall_now_ms - s.wall_base)
    }

    /// Extrapolated playback position now.
    pub fn get(&self) -> f64 {
        self.get_at(now_ms())
    }

    /// Shift the wall base forward by `delta_ms` of paused time, so the
    /// clock does not advance across the pause.
    pub fn advance_base(&self, delta_ms: f64) {
        self.inner.lock().wall_base += delta_ms;
    }

    /// Rewind to zero at wall time `wall_now_ms` (seek).
    pub fn reset(&self, wall_now_ms: f64) {
        let mut s = self.inner.lock();
        s.last_pts = 0.0;
        s.cur_pts = 0.0;
        s.wall_base = wall_now_ms;
        s.frame_timer = wall_now_ms;
    }

    pub fn snapshot(&self) -> ClockState {
        *self.inner.lock()
    }

    /// Sync bookkeeping: advance `last_pts` to `cur_pts` (done after the
    /// audio/video difference has been computed) and stamp the frame timer.
    pub fn mark_presented(&self, wall_now_ms: f64) {
        let mut s = self.inner.lock();
        s.last_pts = s.cur_pts;
        s.frame_timer = wall_now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_extrapolates_from_wall_base() {
        let c = MediaClock::new();
        c.set(1000.0, 50_000.0);
        assert_eq!(c.get_at(50_000.0), 1000.0);
        assert_eq!(c.get_at(50_040.0), 1040.0);
    }

    #[test]
    fn get_is_non_decreasing_between_sets() {
        let c = MediaClock::new();
        c.set(500.0, 10_000.0);
        let mut prev = f64::MIN;
        for t in 0..100 {
            let v = c.get_at(10_000.0 + t as f64);
            assert!(v >= prev);
            prev = v;
        }
    }

    #[test]
    fn pause_compensation_keeps_position_fixed() {
        let c = MediaClock::new();
        c.set(2000.0, 10_000.0);
        // pause for 3 s, compensated in 10 ms poll slices
        let mut now = 10_000.0;
        for _ in 0..300 {
            now += 10.0;
            c.advance_base(10.0);
        }
        // position may only have drifted by up to one poll interval
        assert!((c.get_at(now) - 2000.0).abs() <= 10.0);
    }

    #[test]
    fn set_tracks_last_pts() {
        let c = MediaClock::new();
        c.set(40.0, 1.0);
        c.set(80.0, 2.0);
        let s = c.snapshot();
        assert_eq!(s.last_pts, 40.0);
        assert_eq!(s.cur_pts, 80.0);
    }

    #[test]
    fn reset_rewinds_everything() {
        let c = MediaClock::new();
        c.set(9000.0, 123.0);
        c.reset(456.0);
        let s = c.snapshot();
        assert_eq!(s.cur_pts, 0.0);
        assert_eq!(s.last_pts, 0.0);
        assert_eq!(s.wall_base, 456.0);
        assert_eq!(c.get_at(456.0), 0.0);
    }
}
