// FPS tracking for the window title

use std::time::{Duration, Instant};

/// Counts presented frames and reports once per interval
pub struct FrameStats {
    interval: Duration,
    frame_count: u32,
    last_report: Instant,
    last_frame: Instant,
}

/// Averages over one reporting interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsReport {
    pub fps: f32,
    /// Duration of the latest frame
    pub frame_time_ms: f32,
}

impl FrameStats {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, Duration::from_secs(1))
    }

    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self {
            interval,
            frame_count: 0,
            last_report: now,
            last_frame: now,
        }
    }

    /// Record a presented frame; returns a report once per interval
    pub fn frame_presented(&mut self, now: Instant) -> Option<FpsReport> {
        let frame_time = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;

        let elapsed = now.duration_since(self.last_report);
        if elapsed < self.interval {
            return None;
        }

        let report = FpsReport {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            frame_time_ms: frame_time.as_secs_f32() * 1000.0,
        };
        self.frame_count = 0;
        self.last_report = now;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_once_per_interval() {
        let start = Instant::now();
        let mut stats = FrameStats::new(start);

        for i in 1..60 {
            assert!(stats.frame_presented(start + Duration::from_millis(i * 16)).is_none());
        }
        let report = stats
            .frame_presented(start + Duration::from_millis(1000))
            .expect("report after one second");
        assert!((report.fps - 60.0).abs() < 0.01);
        assert!((report.frame_time_ms - 56.0).abs() < 0.01);

        assert!(stats.frame_presented(start + Duration::from_millis(1016)).is_none());
    }

    #[test]
    fn test_counter_resets_after_report() {
        let start = Instant::now();
        let mut stats = FrameStats::with_interval(start, Duration::from_millis(100));
        stats.frame_presented(start + Duration::from_millis(100));

        let report = stats.frame_presented(start + Duration::from_millis(300)).unwrap();
        assert!((report.fps - 5.0).abs() < 0.01);
    }
}
