//! Rolling per-frame timing.
//!
//! Each presented frame records how long the pose wait blocked, how long both
//! eyes took to render, and how long submission plus flush took. A frame
//! misses its budget when render and submit together exceed it; the wait is
//! the runtime's pacing and is excluded.

use std::collections::VecDeque;
use std::time::Duration;

/// Rolling frame timing statistics over a window of samples.
#[derive(Debug)]
pub struct FrameTiming {
    wait_ms: VecDeque<f64>,
    render_ms: VecDeque<f64>,
    submit_ms: VecDeque<f64>,
    window_size: usize,
    total_frames: u64,
    missed_frames: u64,
    budget_ms: f64,
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(1000, Duration::from_micros(11_100))
    }
}

impl FrameTiming {
    pub fn new(window_size: usize, budget: Duration) -> Self {
        let window_size = window_size.max(1);
        Self {
            wait_ms: VecDeque::with_capacity(window_size),
            render_ms: VecDeque::with_capacity(window_size),
            submit_ms: VecDeque::with_capacity(window_size),
            window_size,
            total_frames: 0,
            missed_frames: 0,
            budget_ms: millis(budget),
        }
    }

    /// Record a frame's timing data.
    pub fn record_frame(&mut self, wait: Duration, render: Duration, submit: Duration) {
        let (wait, render, submit) = (millis(wait), millis(render), millis(submit));

        Self::push_sample(&mut self.wait_ms, wait, self.window_size);
        Self::push_sample(&mut self.render_ms, render, self.window_size);
        Self::push_sample(&mut self.submit_ms, submit, self.window_size);

        self.total_frames += 1;
        if render + submit > self.budget_ms {
            self.missed_frames += 1;
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn missed_frames(&self) -> u64 {
        self.missed_frames
    }

    fn push_sample(samples: &mut VecDeque<f64>, value: f64, window_size: usize) {
        if samples.len() == window_size {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    fn sorted(samples: &VecDeque<f64>) -> Vec<f64> {
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    /// Compute percentile from a sorted slice.
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn stats(&self) -> FrameTimingStats {
        let wait = Self::sorted(&self.wait_ms);
        let render = Self::sorted(&self.render_ms);
        let submit = Self::sorted(&self.submit_ms);

        FrameTimingStats {
            wait_p50: Self::percentile(&wait, 50.0),
            render_p50: Self::percentile(&render, 50.0),
            render_p99: Self::percentile(&render, 99.0),
            submit_p50: Self::percentile(&submit, 50.0),
            missed_pct: if self.total_frames > 0 {
                (self.missed_frames as f64 / self.total_frames as f64) * 100.0
            } else {
                0.0
            },
            total_frames: self.total_frames,
            missed_frames: self.missed_frames,
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Computed frame timing statistics, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameTimingStats {
    pub wait_p50: f64,
    pub render_p50: f64,
    pub render_p99: f64,
    pub submit_p50: f64,
    pub missed_pct: f64,
    pub total_frames: u64,
    pub missed_frames: u64,
}

impl std::fmt::Display for FrameTimingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} frames, wait p50 {:.2}ms, render p50 {:.2}ms p99 {:.2}ms, submit p50 {:.2}ms, missed {:.1}%",
            self.total_frames, self.wait_p50, self.render_p50, self.render_p99, self.submit_p50, self.missed_pct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(value: f64) -> Duration {
        Duration::from_secs_f64(value / 1000.0)
    }

    #[test]
    fn empty_stats() {
        let stats = FrameTiming::default().stats();
        assert_eq!(stats, FrameTimingStats::default());
    }

    #[test]
    fn record_frame() {
        let mut ft = FrameTiming::new(100, ms(11.1));
        ft.record_frame(ms(2.0), ms(3.0), ms(0.5));
        assert_eq!(ft.total_frames(), 1);
        assert_eq!(ft.missed_frames(), 0);
        let stats = ft.stats();
        assert!((stats.wait_p50 - 2.0).abs() < 0.01);
        assert!((stats.render_p50 - 3.0).abs() < 0.01);
        assert!((stats.submit_p50 - 0.5).abs() < 0.01);
    }

    #[test]
    fn wait_does_not_count_against_budget() {
        let mut ft = FrameTiming::new(100, ms(11.1));
        ft.record_frame(ms(10.0), ms(3.0), ms(1.0));
        assert_eq!(ft.missed_frames(), 0);
        ft.record_frame(ms(0.5), ms(10.0), ms(2.0));
        assert_eq!(ft.missed_frames(), 1);
        assert!((ft.stats().missed_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn window_keeps_latest_samples() {
        let mut ft = FrameTiming::new(5, ms(11.1));
        for i in 0..10 {
            ft.record_frame(ms(1.0), ms(i as f64), ms(0.0));
        }
        assert_eq!(ft.total_frames(), 10);
        let stats = ft.stats();
        assert!((stats.render_p50 - 7.0).abs() < 0.01);
        assert!((stats.render_p99 - 9.0).abs() < 0.01);
    }
}
