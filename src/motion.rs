//! Velocity integration for key-driven pointer motion.
//!
//! Turns a resolved direction (`-1`, `0`, `+1`) plus modifier multipliers into
//! smooth relative pointer displacement. Per frame:
//! 1. pick the accel or decel time constant depending on whether the desired
//!    speed is moving away from or toward zero relative to the current one,
//! 2. smooth with `alpha = eased(1 - e^(-dt / tc))`,
//! 3. snap to zero inside the deadzone when nothing is desired,
//! 4. accumulate sub-pixel remainder in a carry, clamp to the max step and
//!    emit whole pixels.
//!
//! With noise disabled the integrator is fully deterministic for a fixed `dt`
//! sequence, which is what the tests rely on.

use rand::Rng;

use crate::easing::Easing;

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

/// Shaping parameters; see [`crate::config::MotionConfig`] for the serde
/// surface with defaults.
#[derive(Clone, Copy, Debug)]
pub struct MotionParams {
    pub accel_time_s: f64,
    pub decel_time_s: f64,
    pub easing: Easing,
    pub max_step_px: f64,
    pub deadzone_vel_px_s: f64,
    pub noise_per_step_px: f64,
    pub humanize_noise: bool,
    pub invert_axis: bool,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            accel_time_s: 0.001,
            decel_time_s: 0.001,
            easing: Easing::ExpInOut,
            max_step_px: 12.0,
            deadzone_vel_px_s: 0.5,
            noise_per_step_px: 0.35,
            humanize_noise: false,
            invert_axis: false,
        }
    }
}

/// Per-frame velocity integrator with sub-pixel carry.
pub struct MotionIntegrator {
    params: MotionParams,
    velocity: f64,
    carry: f64,
    paused: bool,
}

impl MotionIntegrator {
    pub fn new(params: MotionParams) -> Self {
        Self { params, velocity: 0.0, carry: 0.0, paused: false }
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Freeze or unfreeze motion. Freezing zeroes the velocity so resuming
    /// re-accelerates from rest.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        if paused {
            self.velocity = 0.0;
        }
    }

    /// Drop all motion immediately (direction released or axis cleared).
    pub fn halt(&mut self) {
        self.velocity = 0.0;
        self.carry = 0.0;
    }

    /// Advance one frame of width `dt` seconds toward `desired` px/s (already
    /// including direction sign and modifier multipliers). Returns the whole
    /// pixels to emit this frame.
    pub fn step(&mut self, desired: f64, dt: f64) -> i32 {
        if self.paused {
            self.velocity = 0.0;
            return 0;
        }

        let tc = if desired.abs() > self.velocity.abs() {
            self.params.accel_time_s
        } else {
            self.params.decel_time_s
        };
        let alpha = 1.0 - (-dt / tc.max(1e-4)).exp();
        let alpha = self.params.easing.apply(alpha);
        self.velocity += (desired - self.velocity) * alpha;

        if desired == 0.0 && self.velocity.abs() <= self.params.deadzone_vel_px_s {
            // residual drift would otherwise leak out of the carry
            self.velocity = 0.0;
            self.carry = 0.0;
            return 0;
        }

        let mut delta = self.velocity * dt + self.carry;
        if self.params.humanize_noise && self.params.noise_per_step_px > 0.0 && desired != 0.0 {
            let n = self.params.noise_per_step_px;
            delta += rand::thread_rng().gen_range(-n..=n);
        }

        delta = clamp(delta, -self.params.max_step_px, self.params.max_step_px);
        let step = delta.round() as i32;
        self.carry = delta - f64::from(step);

        if self.params.invert_axis {
            -step
        } else {
            step
        }
    }
}

/// Compute the desired speed for a frame from direction and modifier state.
///
/// Boost and slow stack multiplicatively.
pub fn desired_velocity(
    direction: i8,
    base_speed: f64,
    boost: bool,
    slow: bool,
    boost_mult: f64,
    slow_mult: f64,
) -> f64 {
    let mut v = f64::from(direction) * base_speed;
    if v != 0.0 {
        if boost {
            v *= boost_mult;
        }
        if slow {
            v *= slow_mult;
        }
    }
    v
}
