//! Configuration types.
//!
//! Loading/saving config files belongs to the embedding tool; the core only
//! defines the serde surface and the documented defaults, and validates units
//! at load time. Validation follows the degrade-don't-abort rule: a malformed
//! axis group is disabled with a logged warning, while an unresolvable key
//! name in the bindings is a hard configuration error (names are supposed to
//! be checked once, up front, never at runtime).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::axis::{AxisMode, AxisResolver};
use crate::easing::Easing;
use crate::error::{Error, Result};
use crate::event::KeyCode;
use crate::keysym;
use crate::motion::MotionParams;
use crate::ramp::RampParams;
use crate::worker::ClickParams;

/// One group of mutually-exclusive keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisGroupConfig {
    pub name: String,
    /// Key names; at least 2 must resolve or the group is disabled.
    pub keys: Vec<String>,
    pub mode: AxisMode,
    /// Priority order for `priority` mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swap_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_neutral_ms: Option<u64>,
}

impl Default for AxisGroupConfig {
    fn default() -> Self {
        Self {
            name: "axis".into(),
            keys: Vec::new(),
            mode: AxisMode::Recent,
            priority: None,
            swap_delay_ms: None,
            timeout_neutral_ms: None,
        }
    }
}

impl AxisGroupConfig {
    fn resolve_keys(&self, names: &[String]) -> Vec<KeyCode> {
        let mut out = Vec::new();
        for n in names {
            match keysym::lookup(n) {
                Some(c) => out.push(c),
                None => warn!(axis = %self.name, key = %n, "unknown key name, skipping"),
            }
        }
        out
    }

    /// Build the resolver, or `None` (with a warning) when the group is
    /// malformed. The run continues without it.
    pub fn build(&self) -> Option<AxisResolver> {
        let keys = self.resolve_keys(&self.keys);
        let mut resolver = match AxisResolver::new(self.name.clone(), &keys, self.mode) {
            Ok(r) => r,
            Err(err) => {
                warn!(axis = %self.name, %err, "axis group disabled");
                return None;
            }
        };
        if let Some(priority) = &self.priority {
            resolver = resolver.with_priority(&self.resolve_keys(priority));
        }
        if let Some(ms) = self.swap_delay_ms {
            resolver = resolver.with_swap_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.timeout_neutral_ms {
            resolver = resolver.with_neutral_timeout(Duration::from_millis(ms));
        }
        Some(resolver)
    }
}

/// Motion shaping and pacing. Defaults mirror the strafer macro.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub base_speed_px_s: f64,
    pub min_speed_px_s: f64,
    pub max_speed_px_s: f64,
    pub boost_multiplier: f64,
    pub slow_multiplier: f64,
    pub invert_x: bool,
    pub accel_time_s: f64,
    pub decel_time_s: f64,
    pub easing: Easing,
    /// Lower bound on the control-loop frame width.
    pub min_frame_time_s: f64,
    pub max_step_px: f64,
    pub deadzone_vel_px_s: f64,
    pub humanize_noise: bool,
    pub noise_per_step_px: f64,
    /// Motion suppression window after the held direction key switches.
    pub start_move_delay_s: f64,
    /// Base-speed change per wheel detent in adjust mode.
    pub scroll_speed_step: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            base_speed_px_s: 2000.0,
            min_speed_px_s: 100.0,
            max_speed_px_s: 20_000.0,
            boost_multiplier: 2.0,
            slow_multiplier: 0.5,
            invert_x: false,
            accel_time_s: 0.001,
            decel_time_s: 0.001,
            easing: Easing::ExpInOut,
            min_frame_time_s: 0.0015,
            max_step_px: 12.0,
            deadzone_vel_px_s: 0.5,
            humanize_noise: false,
            noise_per_step_px: 0.35,
            start_move_delay_s: 0.01,
            scroll_speed_step: 100.0,
        }
    }
}

impl MotionConfig {
    pub fn params(&self) -> MotionParams {
        MotionParams {
            accel_time_s: self.accel_time_s,
            decel_time_s: self.decel_time_s,
            easing: self.easing,
            max_step_px: self.max_step_px,
            deadzone_vel_px_s: self.deadzone_vel_px_s,
            noise_per_step_px: self.noise_per_step_px,
            humanize_noise: self.humanize_noise,
            invert_axis: self.invert_x,
        }
    }

    pub fn min_frame_time(&self) -> Duration {
        Duration::from_secs_f64(self.min_frame_time_s.max(1e-4))
    }
}

/// Checkpoint schedule for the ramp trigger.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// (relative_time_offset_s, target_value) pairs, ascending.
    pub schedule: Vec<(f64, f64)>,
    pub tick_seconds: f64,
    pub allow_increase: bool,
    pub restart_on_press: bool,
    pub stop_on_release: bool,
    /// Forward the trigger key itself to the virtual keyboard.
    pub mirror_trigger: bool,
    pub trigger_key: String,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            schedule: vec![
                (0.0, 2500.0),
                (2.0, 2200.0),
                (4.0, 1800.0),
                (6.0, 1500.0),
                (8.0, 1150.0),
            ],
            tick_seconds: 1.0,
            allow_increase: false,
            restart_on_press: true,
            stop_on_release: true,
            mirror_trigger: true,
            trigger_key: "KEY_SPACE".into(),
        }
    }
}

impl RampConfig {
    pub fn params(&self, min_value: f64, max_value: f64) -> RampParams {
        RampParams {
            schedule: self.schedule.clone(),
            tick_seconds: self.tick_seconds,
            allow_increase: self.allow_increase,
            restart_on_press: self.restart_on_press,
            stop_on_release: self.stop_on_release,
            min_value,
            max_value,
        }
    }
}

/// Auto-click worker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickerConfig {
    pub trigger_button: String,
    pub target_button: String,
    pub clicks_per_second: f64,
    pub click_duration_ms: u64,
}

impl Default for ClickerConfig {
    fn default() -> Self {
        Self {
            trigger_button: "BTN_EXTRA".into(),
            target_button: "BTN_LEFT".into(),
            clicks_per_second: 25.0,
            click_duration_ms: 1,
        }
    }
}

impl ClickerConfig {
    pub fn params(&self) -> Result<(KeyCode, ClickParams)> {
        let trigger = resolve_name("clicker trigger", &self.trigger_button)?;
        let target = resolve_name("clicker target", &self.target_button)?;
        Ok((
            trigger,
            ClickParams {
                target,
                clicks_per_second: self.clicks_per_second,
                hold: Duration::from_millis(self.click_duration_ms),
            },
        ))
    }
}

/// Special-key bindings understood by the control loop. Any of them can be
/// disabled by setting the field to `null`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingsConfig {
    /// Name of the axis group whose winner drives pointer motion; first
    /// configured key moves -x, second moves +x.
    pub motion_axis: Option<String>,
    pub pause_key: Option<String>,
    pub boost_key: Option<String>,
    pub slow_key: Option<String>,
    /// Mouse button that freezes pointer motion while held.
    pub freeze_button: Option<String>,
    pub wheel_adjust_toggle: Option<String>,
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            motion_axis: Some("horizontal".into()),
            pause_key: Some("KEY_ESC".into()),
            boost_key: Some("KEY_LEFTCTRL".into()),
            slow_key: Some("KEY_LEFTSHIFT".into()),
            freeze_button: Some("BTN_EXTRA".into()),
            wheel_adjust_toggle: Some("KEY_F9".into()),
        }
    }
}

/// Resolved counterpart of [`BindingsConfig`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolvedBindings {
    pub pause: Option<KeyCode>,
    pub boost: Option<KeyCode>,
    pub slow: Option<KeyCode>,
    pub freeze: Option<KeyCode>,
    pub wheel_toggle: Option<KeyCode>,
}

fn resolve_name(what: &str, name: &str) -> Result<KeyCode> {
    keysym::lookup(name)
        .ok_or_else(|| Error::ConfigurationInvalid(format!("{what}: unknown key '{name}'")))
}

fn resolve_opt(what: &str, name: &Option<String>) -> Result<Option<KeyCode>> {
    name.as_deref().map(|n| resolve_name(what, n)).transpose()
}

impl BindingsConfig {
    pub fn resolve(&self) -> Result<ResolvedBindings> {
        Ok(ResolvedBindings {
            pause: resolve_opt("pause_key", &self.pause_key)?,
            boost: resolve_opt("boost_key", &self.boost_key)?,
            slow: resolve_opt("slow_key", &self.slow_key)?,
            freeze: resolve_opt("freeze_button", &self.freeze_button)?,
            wheel_toggle: resolve_opt("wheel_adjust_toggle", &self.wheel_adjust_toggle)?,
        })
    }
}

/// Top-level configuration for one engine instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub axes: Vec<AxisGroupConfig>,
    pub motion: MotionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ramp: Option<RampConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clicker: Option<ClickerConfig>,
    pub bindings: BindingsConfig,
    /// Exclusive-grab the physical devices (best-effort).
    pub grab_inputs: bool,
    /// Re-scan for matching devices after a disconnection.
    pub auto_detect_devices: bool,
    /// Explicit device path; `null` means auto-detect by capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_path: Option<String>,
    pub virtual_keyboard_name: String,
    pub virtual_mouse_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            axes: vec![
                AxisGroupConfig {
                    name: "horizontal".into(),
                    keys: vec!["a".into(), "d".into()],
                    ..AxisGroupConfig::default()
                },
                AxisGroupConfig {
                    name: "vertical".into(),
                    keys: vec!["w".into(), "s".into()],
                    ..AxisGroupConfig::default()
                },
            ],
            motion: MotionConfig::default(),
            ramp: None,
            clicker: None,
            bindings: BindingsConfig::default(),
            grab_inputs: true,
            auto_detect_devices: true,
            device_path: None,
            virtual_keyboard_name: "keymux-kb".into(),
            virtual_mouse_name: "keymux-mouse".into(),
        }
    }
}

impl EngineConfig {
    /// Build resolvers for every well-formed axis group; malformed groups are
    /// dropped here with a warning.
    pub fn build_axes(&self) -> Vec<AxisResolver> {
        self.axes.iter().filter_map(|a| a.build()).collect()
    }
}
