//! # Progress Reconciler
//!
//! Masks uneven server progress reporting with a smooth, monotonically
//! increasing curve. The simulated value decelerates as it rises and stops
//! at 90 on its own — only a real server report (or completion) can push
//! it past that, so the bar never claims work the server has not
//! confirmed.
//!
//! The reconciler owns all of its state; callers feed it real progress via
//! [`observe`](ProgressReconciler::observe), drive the animation via
//! [`tick`](ProgressReconciler::tick), and display whatever comes back.

/// Simulated progress stops advancing on its own at this value.
const SIMULATED_CEILING: f32 = 90.0;

#[derive(Debug, Default, Clone)]
pub struct ProgressReconciler {
    /// Locally simulated progress, snapped up whenever the server is ahead
    simulated: f32,
    /// Greatest value ever handed to the display; never regresses
    displayed: f32,
}

impl ProgressReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the animation one step. Steps shrink as the bar fills:
    /// 2 below 30, 1 below 60, 0.5 above — a decelerating approach that
    /// signals "still working" without finishing.
    pub fn tick(&mut self) -> f32 {
        if self.simulated < SIMULATED_CEILING {
            let step = if self.simulated < 30.0 {
                2.0
            } else if self.simulated < 60.0 {
                1.0
            } else {
                0.5
            };
            self.simulated = (self.simulated + step).min(SIMULATED_CEILING);
        }
        self.display()
    }

    /// Feed a real server-reported progress value. The server is
    /// authoritative whenever it is ahead; a server value behind the
    /// animation changes nothing.
    pub fn observe(&mut self, real: f32) -> f32 {
        let real = real.clamp(0.0, 100.0);
        if real > self.simulated {
            self.simulated = real;
        }
        self.display()
    }

    /// Force the bar to 100 on a completed job.
    pub fn complete(&mut self) -> f32 {
        self.simulated = 100.0;
        self.display()
    }

    /// The value currently shown.
    pub fn value(&self) -> f32 {
        self.displayed
    }

    fn display(&mut self) -> f32 {
        self.displayed = self.displayed.max(self.simulated);
        self.displayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_decelerate() {
        let mut r = ProgressReconciler::new();
        assert_eq!(r.tick(), 2.0);
        assert_eq!(r.tick(), 4.0);

        r.observe(29.0);
        assert_eq!(r.tick(), 31.0); // still a 2-step from below 30
        assert_eq!(r.tick(), 32.0); // then 1-steps

        r.observe(60.0);
        assert_eq!(r.tick(), 60.5); // 0.5-steps above 60
    }

    #[test]
    fn test_animation_stops_at_90() {
        let mut r = ProgressReconciler::new();
        for _ in 0..500 {
            r.tick();
        }
        assert_eq!(r.value(), 90.0);
    }

    #[test]
    fn test_server_can_push_past_90() {
        let mut r = ProgressReconciler::new();
        for _ in 0..500 {
            r.tick();
        }
        assert_eq!(r.observe(97.0), 97.0);
        // And the animation does not advance further on its own
        assert_eq!(r.tick(), 97.0);
    }

    #[test]
    fn test_observe_behind_animation_is_ignored() {
        let mut r = ProgressReconciler::new();
        r.tick();
        r.tick();
        r.tick(); // simulated = 6
        assert_eq!(r.observe(3.0), 6.0);
    }

    #[test]
    fn test_real_report_sequence_never_regresses() {
        // Reports [0, 0, 5, 40] interleaved with no-report ticks:
        // displayed never decreases and is always >= the latest report.
        let mut r = ProgressReconciler::new();
        let mut last = 0.0f32;

        for real in [0.0, 0.0, 5.0, 40.0] {
            for _ in 0..3 {
                let shown = r.tick();
                assert!(shown >= last);
                last = shown;
            }
            let shown = r.observe(real);
            assert!(shown >= last);
            assert!(shown >= real);
            last = shown;
        }
        assert!(r.value() >= 40.0);
    }

    #[test]
    fn test_complete_forces_100() {
        let mut r = ProgressReconciler::new();
        r.observe(42.0);
        assert_eq!(r.complete(), 100.0);
        assert_eq!(r.value(), 100.0);
    }

    #[test]
    fn test_out_of_range_reports_clamped() {
        let mut r = ProgressReconciler::new();
        assert_eq!(r.observe(250.0), 100.0);
        let mut r = ProgressReconciler::new();
        r.observe(-10.0);
        assert_eq!(r.value(), 0.0);
    }
}
