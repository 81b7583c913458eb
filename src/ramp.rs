//! Time-segmented speed-ramp scheduler.
//!
//! Drives a scalar value through a sorted checkpoint schedule in discrete
//! ticks. Each checkpoint's target is reached *exactly at that checkpoint's
//! time*: the segment toward checkpoint `i` spans from the previous
//! checkpoint's offset to `offset_i`, interpolated linearly over
//! `floor(duration / tick_interval)` ticks (minimum 1) with the final tick
//! snapping to the target so floating error never accumulates.
//!
//! Activation/deactivation semantics:
//! - activation saves the current value for release-restore; a first
//!   checkpoint at offset 0 is applied immediately (subject to the
//!   no-increase policy), otherwise the scheduler waits for its time,
//! - re-press while active restarts the whole schedule when configured (the
//!   saved restore value is kept from the *first* activation),
//! - release restores the saved value exactly when stop-on-release is
//!   configured,
//! - under the no-increase policy a checkpoint that would raise the value is
//!   skipped outright; ramps then only ever lower the scalar,
//! - once all checkpoints are exhausted the scheduler idles at the last
//!   reached value until deactivated.

use tracing::debug;

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Scheduler configuration; see [`crate::config::RampConfig`] for the serde
/// surface.
#[derive(Clone, Debug)]
pub struct RampParams {
    /// (relative_time_offset, target_value), ascending by offset.
    pub schedule: Vec<(f64, f64)>,
    pub tick_seconds: f64,
    pub allow_increase: bool,
    pub restart_on_press: bool,
    pub stop_on_release: bool,
    pub min_value: f64,
    pub max_value: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Phase {
    Inactive,
    /// First checkpoint has a positive offset; waiting for its absolute time.
    Waiting { until: f64 },
    Running,
    /// All checkpoints consumed; holding the last reached value.
    Exhausted,
}

/// Owns all ramp state; single-writer (the control loop).
pub struct RampScheduler {
    params: RampParams,
    phase: Phase,
    press_t: f64,
    /// Value at activation, restored on release. Survives restarts.
    restore: Option<f64>,
    /// Index of the last consumed (or skipped) checkpoint.
    consumed: isize,
    seg_start_t: f64,
    seg_start_val: f64,
    seg_target: f64,
    ticks_total: u32,
    tick_idx: u32,
    next_tick: f64,
}

impl RampScheduler {
    pub fn new(mut params: RampParams) -> Self {
        params
            .schedule
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        params.tick_seconds = params.tick_seconds.max(1e-6);
        Self {
            params,
            phase: Phase::Inactive,
            press_t: 0.0,
            restore: None,
            consumed: -1,
            seg_start_t: 0.0,
            seg_start_val: 0.0,
            seg_target: 0.0,
            ticks_total: 0,
            tick_idx: 0,
            next_tick: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase != Phase::Inactive
    }

    /// Record a value change made outside the ramp (e.g. wheel adjust) so a
    /// later release restores the adjusted value instead of a stale one.
    pub fn note_external_value(&mut self, value: f64) {
        if !self.is_active() {
            self.restore = Some(value);
        }
    }

    /// Activation edge. Restarts the schedule when already active and
    /// restart-on-press is configured; otherwise a repeat press is ignored.
    pub fn press(&mut self, value: &mut f64, now: f64) {
        if self.params.schedule.is_empty() {
            return;
        }
        if self.is_active() && !self.params.restart_on_press {
            return;
        }
        let restarted = self.is_active();
        self.press_t = now;
        if self.restore.is_none() {
            self.restore = Some(*value);
        }
        self.consumed = -1;

        let (t0, v0) = self.params.schedule[0];
        if t0 <= 1e-6 {
            self.apply_checkpoint(value, v0);
            self.consumed = 0;
            self.phase = Phase::Running;
            self.prepare_segment(value, now);
        } else {
            self.phase = Phase::Waiting { until: now + t0 };
        }
        debug!(
            restarted,
            restore = self.restore.unwrap_or(0.0),
            "ramp activated"
        );
    }

    /// Deactivation edge: restores the activation-time value if configured.
    pub fn release(&mut self, value: &mut f64) {
        if !self.is_active() {
            return;
        }
        self.phase = Phase::Inactive;
        if self.params.stop_on_release {
            if let Some(r) = self.restore.take() {
                *value = clamp(r, self.params.min_value, self.params.max_value);
                debug!(restore = *value, "ramp released, value restored");
            }
        } else {
            self.restore = None;
        }
    }

    /// Advance the schedule; fires every due tick between the last call and
    /// `now` so a stalled loop catches up deterministically.
    pub fn tick(&mut self, value: &mut f64, now: f64) {
        match self.phase {
            Phase::Inactive | Phase::Exhausted => return,
            Phase::Waiting { until } => {
                if now < until {
                    return;
                }
                // first checkpoint's time arrived: apply it and move on
                let v0 = self.params.schedule[0].1;
                self.apply_checkpoint(value, v0);
                self.consumed = 0;
                self.phase = Phase::Running;
                self.prepare_segment(value, now);
                if self.phase != Phase::Running {
                    return;
                }
            }
            Phase::Running => {}
        }

        while self.tick_idx < self.ticks_total && now >= self.next_tick {
            let k = f64::from(self.tick_idx + 1);
            let total = f64::from(self.ticks_total);
            let new = if self.tick_idx + 1 == self.ticks_total {
                // exact snap on the final tick
                self.seg_target
            } else if !self.params.allow_increase {
                let drop = (self.seg_start_val - self.seg_target).max(0.0);
                (self.seg_start_val - drop * k / total).max(self.seg_target)
            } else {
                self.seg_start_val + (self.seg_target - self.seg_start_val) * k / total
            };
            *value = clamp(new, self.params.min_value, self.params.max_value);
            self.tick_idx += 1;
            self.next_tick += self.params.tick_seconds;
        }

        if self.tick_idx >= self.ticks_total {
            *value = clamp(self.seg_target, self.params.min_value, self.params.max_value);
            self.prepare_segment(value, now);
        }
    }

    fn apply_checkpoint(&self, value: &mut f64, target: f64) {
        let tgt = if self.params.allow_increase || target <= *value {
            target
        } else {
            *value
        };
        *value = clamp(tgt, self.params.min_value, self.params.max_value);
    }

    /// Advance to the next checkpoint's segment, skipping (under the
    /// no-increase policy) any checkpoint that would raise the value.
    fn prepare_segment(&mut self, value: &mut f64, now: f64) {
        loop {
            let next = (self.consumed + 1) as usize;
            if next >= self.params.schedule.len() {
                self.phase = Phase::Exhausted;
                debug!(value = *value, "ramp schedule exhausted");
                return;
            }
            let (offset, target) = self.params.schedule[next];
            let prev_offset = if self.consumed >= 0 {
                self.params.schedule[self.consumed as usize].0
            } else {
                0.0
            };
            if !self.params.allow_increase && target > *value + 1e-9 {
                debug!(checkpoint = next, target, "checkpoint skipped (would increase)");
                self.consumed = next as isize;
                continue;
            }
            if !self.params.allow_increase && *value <= target + 1e-9 {
                // already at/below this target, nothing to ramp
                self.consumed = next as isize;
                continue;
            }

            self.consumed = next as isize;
            self.seg_start_t = self.press_t + prev_offset;
            self.seg_start_val = *value;
            self.seg_target = target;
            let duration = (self.press_t + offset - self.seg_start_t).max(0.0);
            self.ticks_total =
                ((duration / self.params.tick_seconds).floor() as u32).max(1);

            if now <= self.seg_start_t {
                self.tick_idx = 0;
            } else {
                let already = ((now - self.seg_start_t) / self.params.tick_seconds).floor() as u32;
                self.tick_idx = already.min(self.ticks_total);
            }
            self.next_tick =
                self.seg_start_t + f64::from(self.tick_idx + 1) * self.params.tick_seconds;

            debug!(
                checkpoint = next,
                target,
                ticks = self.ticks_total,
                "ramp segment prepared"
            );
            return;
        }
    }
}
