//! Mapping script durations onto the rendered video's timeline.

use crate::model::TimeWindow;

/// Windows narrower than this are skipped rather than extracted.
pub const MIN_WINDOW_SECS: f64 = 0.01;

/// Ratio of the rendered duration to the script's estimated total.
///
/// Returns `1.0` when the estimates sum to zero (or to something unusable), so windows are laid
/// out at their nominal lengths.
pub fn scale_factor(video_duration: f64, durations: &[f64]) -> f64 {
    let total: f64 = durations.iter().copied().map(usable).sum();
    if total == 0.0 || !total.is_finite() {
        return 1.0;
    }
    video_duration / total
}

// NaN or infinite estimates count as zero-length segments.
fn usable(duration: f64) -> f64 {
    if duration.is_finite() { duration } else { 0.0 }
}

/// What happens to one segment during the per-segment walk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WindowDecision {
    Assigned(TimeWindow),
    /// The timeline cursor had already reached the end of the video.
    SkippedPastEnd { start: f64 },
    /// The window would be narrower than [`MIN_WINDOW_SECS`].
    SkippedDegenerate { start: f64, end: f64 },
}

impl WindowDecision {
    pub fn window(&self) -> Option<TimeWindow> {
        match self {
            Self::Assigned(w) => Some(*w),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedSegment {
    /// Position of the segment in script order.
    pub index: usize,
    pub scaled_duration: f64,
    pub decision: WindowDecision,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimelinePlan {
    pub video_duration: f64,
    pub scale_factor: f64,
    pub segments: Vec<PlannedSegment>,
}

impl TimelinePlan {
    pub fn windows(&self) -> impl Iterator<Item = (usize, TimeWindow)> + '_ {
        self.segments
            .iter()
            .filter_map(|s| s.decision.window().map(|w| (s.index, w)))
    }

    /// Sum of assigned window widths.
    pub fn covered_secs(&self) -> f64 {
        self.windows().map(|(_, w)| w.width()).sum()
    }
}

/// Walk the segments in order and assign each a contiguous window of the rendered video.
///
/// Each segment gets `duration * scale` seconds, cut off at `video_duration`. Skipped segments
/// do not move the cursor; assigned ones always do, even if extraction later fails.
pub fn plan_windows(video_duration: f64, durations: &[f64]) -> TimelinePlan {
    let scale = scale_factor(video_duration, durations);
    let mut current = 0.0f64;
    let mut segments = Vec::with_capacity(durations.len());

    for (index, &duration) in durations.iter().enumerate() {
        let scaled_duration = usable(duration) * scale;
        let decision = if current >= video_duration {
            WindowDecision::SkippedPastEnd { start: current }
        } else {
            let end = (current + scaled_duration).min(video_duration);
            if end - current <= MIN_WINDOW_SECS {
                WindowDecision::SkippedDegenerate {
                    start: current,
                    end,
                }
            } else {
                let window = TimeWindow::new(current, end);
                current = end;
                WindowDecision::Assigned(window)
            }
        };
        segments.push(PlannedSegment {
            index,
            scaled_duration,
            decision,
        });
    }

    TimelinePlan {
        video_duration,
        scale_factor: scale,
        segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-2
    }

    #[test]
    fn exact_fit_keeps_nominal_windows() {
        let plan = plan_windows(10.0, &[5.0, 5.0]);
        assert_eq!(plan.scale_factor, 1.0);
        let windows: Vec<_> = plan.windows().map(|(_, w)| w).collect();
        assert_eq!(
            windows,
            vec![TimeWindow::new(0.0, 5.0), TimeWindow::new(5.0, 10.0)]
        );
    }

    #[test]
    fn longer_video_stretches_windows_uniformly() {
        let plan = plan_windows(8.0, &[2.0, 2.0, 2.0]);
        assert!(approx(plan.scale_factor, 4.0 / 3.0));
        let windows: Vec<_> = plan.windows().map(|(_, w)| w).collect();
        assert_eq!(windows.len(), 3);
        assert!(approx(windows[0].start, 0.0) && approx(windows[0].end, 2.67));
        assert!(approx(windows[1].start, 2.67) && approx(windows[1].end, 5.33));
        assert!(approx(windows[2].start, 5.33) && approx(windows[2].end, 8.0));
        assert!(windows[2].end <= 8.0);
    }

    #[test]
    fn zero_total_uses_unit_scale() {
        assert_eq!(scale_factor(6.0, &[0.0, 0.0]), 1.0);
        assert_eq!(scale_factor(6.0, &[]), 1.0);
        let plan = plan_windows(6.0, &[0.0, 0.0]);
        assert!(
            plan.segments
                .iter()
                .all(|s| matches!(s.decision, WindowDecision::SkippedDegenerate { .. }))
        );
    }

    #[test]
    fn tiny_segments_are_skipped_without_advancing() {
        // 0.001 of a 10s script on a 10s video is a 1ms window.
        let plan = plan_windows(10.0, &[4.0, 0.001, 5.999]);
        assert!(matches!(
            plan.segments[1].decision,
            WindowDecision::SkippedDegenerate { .. }
        ));
        let windows: Vec<_> = plan.windows().collect();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].0, 2);
        assert_eq!(windows[1].1.start, windows[0].1.end);
    }

    #[test]
    fn cursor_at_end_skips_remaining_segments() {
        // A negative estimate shrinks the total, so the first window already reaches the end.
        let plan = plan_windows(4.0, &[6.0, -2.0, 1.0]);
        assert!((plan.scale_factor - 0.8).abs() < 1e-12);
        assert_eq!(
            plan.segments[0].decision,
            WindowDecision::Assigned(TimeWindow::new(0.0, 4.0))
        );
        assert_eq!(
            plan.segments[1].decision,
            WindowDecision::SkippedPastEnd { start: 4.0 }
        );
        assert_eq!(
            plan.segments[2].decision,
            WindowDecision::SkippedPastEnd { start: 4.0 }
        );
    }

    #[test]
    fn non_finite_estimates_do_not_swallow_the_video() {
        let plan = plan_windows(4.0, &[f64::NAN, 2.0, f64::INFINITY, 2.0]);
        assert_eq!(plan.scale_factor, 1.0);
        assert!(matches!(
            plan.segments[0].decision,
            WindowDecision::SkippedDegenerate { .. }
        ));
        assert!(matches!(
            plan.segments[2].decision,
            WindowDecision::SkippedDegenerate { .. }
        ));
        let windows: Vec<_> = plan.windows().collect();
        assert_eq!(
            windows,
            vec![
                (1, TimeWindow::new(0.0, 2.0)),
                (3, TimeWindow::new(2.0, 4.0))
            ]
        );
    }

    #[test]
    fn windows_are_ordered_contiguous_and_bounded() {
        let cases: &[(f64, &[f64])] = &[
            (10.0, &[1.0, 2.0, 3.0, 4.0]),
            (3.3, &[5.0, 5.0, 5.0]),
            (60.0, &[0.5, 12.0, 0.2, 7.0]),
            (1.0, &[0.001, 0.001, 10.0]),
        ];
        for &(d, durations) in cases {
            let plan = plan_windows(d, durations);
            let windows: Vec<_> = plan.windows().map(|(_, w)| w).collect();
            let mut prev_end = 0.0;
            for w in &windows {
                assert!(w.is_valid());
                assert!(w.start >= prev_end - 1e-12);
                assert!(w.end <= d + 1e-12);
                prev_end = w.end;
            }
            assert!(plan.covered_secs() <= d + 1e-9);
        }
    }
}
