//! Wall-clock pacing helper (§4.1) and the shared media-clock quantization
//! rule (§3 Media clock) used by both the PS muxer (GB28181) and the TS
//! muxer (SRT) to keep a common 1024-sample granularity between video and
//! audio.

use std::time::{Duration, Instant};

/// Below this residual, callers don't bother sleeping — scheduler jitter on
/// commodity hosts eats anything smaller anyway, and AAC/Opus frames are
/// ~21-23ms, so a sub-30ms residual is within one audio frame.
pub const WALL_CLOCK_SLEEP_THRESHOLD: Duration = Duration::from_millis(30);

/// Amortizes scheduled sample durations against real elapsed time.
pub struct WallClock {
    start: Instant,
    duration: Duration,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            duration: Duration::ZERO,
        }
    }

    /// Accumulate `d` of scheduled playback time and return how long the
    /// caller should sleep to stay in step with the wall clock, or
    /// `Duration::ZERO` if we're already behind (or within threshold).
    pub fn tick(&mut self, d: Duration) -> Duration {
        self.duration += d;
        let elapsed = self.start.elapsed();
        let residual = self.duration.saturating_sub(elapsed);
        if residual > WALL_CLOCK_SLEEP_THRESHOLD {
            residual
        } else {
            Duration::ZERO
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One video "frame" is defined to carry 1024 samples regardless of true
/// fps, so that video and AAC audio (1024 samples/frame by construction)
/// share a common DTS granularity. This is intentional and must be
/// preserved exactly for GB28181 PS timing — do not "fix" it to use the
/// real video sample count.
pub fn video_sample_rate(fps: u32) -> u64 {
    1024 * 1000 / fps as u64
}

/// DTS = clock_rate * samples / sample_rate, in clock-rate ticks.
pub fn dts_from_samples(clock_rate: u64, samples: u64, sample_rate: u64) -> u64 {
    (clock_rate * samples) / sample_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_returns_zero_when_caught_up() {
        let mut clock = WallClock::new();
        // First tick: no time has passed yet, duration jumps ahead of elapsed.
        let sleep = clock.tick(Duration::from_millis(40));
        assert!(sleep > Duration::ZERO);
    }

    #[test]
    fn tick_returns_zero_below_threshold() {
        let mut clock = WallClock::new();
        let sleep = clock.tick(Duration::from_millis(10));
        assert_eq!(sleep, Duration::ZERO);
    }

    #[test]
    fn video_sample_rate_matches_spec_formula() {
        assert_eq!(video_sample_rate(25), 1024 * 1000 / 25);
        assert_eq!(video_sample_rate(30), 1024 * 1000 / 30);
    }

    #[test]
    fn dts_is_monotonic_for_increasing_samples() {
        let rate = video_sample_rate(25);
        let d1 = dts_from_samples(90_000, 1024, rate);
        let d2 = dts_from_samples(90_000, 2048, rate);
        assert!(d2 > d1);
    }
}
