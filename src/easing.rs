//! Easing curves.
//!
//! Monotonic maps from normalized progress `[0, 1]` to normalized output
//! `[0, 1]`, used to shape the integrator's acceleration feel. Every curve
//! satisfies `f(0) == 0`, `f(1) == 1` and never leaves `[0, 1]`, which is what
//! keeps the velocity update free of overshoot.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    Linear,
    CubicOut,
    CubicInOut,
    QuadOut,
    QuartOut,
    QuintOut,
    SineInOut,
    ExpIn,
    ExpOut,
    #[default]
    ExpInOut,
}

impl Easing {
    /// Resolve a configured curve name; unknown names fall back to the
    /// default (`exp_in_out`) rather than failing the run.
    pub fn by_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "linear" => Easing::Linear,
            "cubic_out" => Easing::CubicOut,
            "cubic_in_out" => Easing::CubicInOut,
            "quad_out" => Easing::QuadOut,
            "quart_out" => Easing::QuartOut,
            "quint_out" => Easing::QuintOut,
            "sine_in_out" => Easing::SineInOut,
            "exp_in" => Easing::ExpIn,
            "exp_out" => Easing::ExpOut,
            _ => Easing::ExpInOut,
        }
    }

    pub fn apply(self, t: f64) -> f64 {
        if t <= 0.0 {
            return 0.0;
        }
        if t >= 1.0 {
            return 1.0;
        }
        match self {
            Easing::Linear => t,
            Easing::CubicOut => 1.0 - (1.0 - t).powi(3),
            Easing::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            Easing::QuadOut => 1.0 - (1.0 - t) * (1.0 - t),
            Easing::QuartOut => 1.0 - (1.0 - t).powi(4),
            Easing::QuintOut => 1.0 - (1.0 - t).powi(5),
            Easing::SineInOut => -((std::f64::consts::PI * t).cos() - 1.0) / 2.0,
            Easing::ExpIn => (2.0f64).powf(10.0 * t - 10.0),
            Easing::ExpOut => 1.0 - (2.0f64).powf(-10.0 * t),
            Easing::ExpInOut => {
                if t < 0.5 {
                    0.5 * (2.0f64).powf(20.0 * t - 10.0)
                } else {
                    1.0 - 0.5 * (2.0f64).powf(-20.0 * t + 10.0)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[Easing] = &[
        Easing::Linear,
        Easing::CubicOut,
        Easing::CubicInOut,
        Easing::QuadOut,
        Easing::QuartOut,
        Easing::QuintOut,
        Easing::SineInOut,
        Easing::ExpIn,
        Easing::ExpOut,
        Easing::ExpInOut,
    ];

    #[test]
    fn endpoints_are_exact() {
        for e in ALL {
            assert_eq!(e.apply(0.0), 0.0, "{e:?}");
            assert_eq!(e.apply(1.0), 1.0, "{e:?}");
            assert_eq!(e.apply(-0.5), 0.0, "{e:?}");
            assert_eq!(e.apply(1.5), 1.0, "{e:?}");
        }
    }

    #[test]
    fn curves_are_monotonic_within_unit_interval() {
        for e in ALL {
            let mut prev = 0.0;
            for i in 1..=100 {
                let v = e.apply(i as f64 / 100.0);
                assert!(v >= prev - 1e-12, "{e:?} not monotonic at {i}");
                assert!((0.0..=1.0).contains(&v), "{e:?} out of range at {i}");
                prev = v;
            }
        }
    }

    #[test]
    fn by_name_falls_back_to_default() {
        assert_eq!(Easing::by_name("cubic_in_out"), Easing::CubicInOut);
        assert_eq!(Easing::by_name("LINEAR"), Easing::Linear);
        assert_eq!(Easing::by_name("warp9"), Easing::ExpInOut);
    }
}
