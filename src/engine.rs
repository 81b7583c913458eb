//! Control loop tying the multiplexer, axis resolvers, motion integrator and
//! ramp scheduler to a virtual sink.
//!
//! One frame = wait for input (bounded by the frame-time floor), drain and
//! classify events, resolve every axis, advance the ramp, integrate motion,
//! emit. All mutable state lives on this single thread; the only other thread
//! is the optional auto-click worker, which owns its own sink handle.
//!
//! Emission failures never stop the loop: the frame's output is dropped with
//! a warning and the next frame recomputes from current state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::axis::AxisResolver;
use crate::config::{EngineConfig, ResolvedBindings};
use crate::error::{Error, Result};
use crate::event::{rel, KeyCode, RawEvent, RawKind};
use crate::keysym;
use crate::motion::{desired_velocity, MotionIntegrator};
use crate::mux::DeviceMultiplexer;
use crate::ramp::RampScheduler;
use crate::sink::{ExclusiveHold, VirtualSink};
use crate::worker::{ClickParams, ClickWorker};

/// Cloneable stop handle for the running engine.
#[derive(Clone)]
pub struct EngineHandle {
    running: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Engine {
    mux: DeviceMultiplexer,
    sink: Box<dyn VirtualSink + Send>,

    axes: Vec<AxisResolver>,
    /// Index into `axes` of the group that drives pointer motion, plus its
    /// (negative, positive) direction keys.
    motion_axis: Option<(usize, KeyCode, KeyCode)>,
    hold: ExclusiveHold,
    motion: MotionIntegrator,

    ramp: Option<RampScheduler>,
    ramp_trigger: Option<KeyCode>,
    mirror_trigger: bool,

    clicker: Option<ClickWorker>,
    clicker_trigger: Option<KeyCode>,

    bindings: ResolvedBindings,

    base_speed: f64,
    min_speed: f64,
    max_speed: f64,
    boost_mult: f64,
    slow_mult: f64,
    scroll_step: f64,

    boost_held: bool,
    slow_held: bool,
    wheel_adjust: bool,
    /// Once a hi-res wheel event is seen, low-res detents from the same
    /// device are ignored to avoid double counting.
    saw_hi_res_wheel: bool,
    paused: bool,

    frame_floor: Duration,
    start_move_delay: Duration,
    move_allowed_at: Option<Instant>,

    started: Instant,
    running: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        cfg: &EngineConfig,
        mux: DeviceMultiplexer,
        sink: Box<dyn VirtualSink + Send>,
    ) -> Result<Self> {
        let bindings = cfg.bindings.resolve()?;
        let axes = cfg.build_axes();

        let motion_axis = match cfg.bindings.motion_axis.as_deref() {
            None => None,
            Some(name) => match axes.iter().position(|a| a.name() == name) {
                Some(i) => {
                    let keys: Vec<KeyCode> = axes[i].keys().collect();
                    Some((i, keys[0], keys[1]))
                }
                None => {
                    warn!(axis = name, "motion axis not configured, pointer motion disabled");
                    None
                }
            },
        };

        let (ramp, ramp_trigger, mirror_trigger) = match &cfg.ramp {
            None => (None, None, false),
            Some(r) => {
                let trigger = keysym::lookup(&r.trigger_key).ok_or_else(|| {
                    Error::ConfigurationInvalid(format!(
                        "ramp trigger: unknown key '{}'",
                        r.trigger_key
                    ))
                })?;
                let mut sched = RampScheduler::new(
                    r.params(cfg.motion.min_speed_px_s, cfg.motion.max_speed_px_s),
                );
                sched.note_external_value(cfg.motion.base_speed_px_s);
                (Some(sched), Some(trigger), r.mirror_trigger)
            }
        };

        Ok(Self {
            mux,
            sink,
            axes,
            motion_axis,
            hold: ExclusiveHold::default(),
            motion: MotionIntegrator::new(cfg.motion.params()),
            ramp,
            ramp_trigger,
            mirror_trigger,
            clicker: None,
            clicker_trigger: None,
            bindings,
            base_speed: cfg.motion.base_speed_px_s,
            min_speed: cfg.motion.min_speed_px_s,
            max_speed: cfg.motion.max_speed_px_s,
            boost_mult: cfg.motion.boost_multiplier,
            slow_mult: cfg.motion.slow_multiplier,
            scroll_step: cfg.motion.scroll_speed_step,
            boost_held: false,
            slow_held: false,
            wheel_adjust: false,
            saw_hi_res_wheel: false,
            paused: false,
            frame_floor: cfg.motion.min_frame_time(),
            start_move_delay: Duration::from_secs_f64(cfg.motion.start_move_delay_s.max(0.0)),
            move_allowed_at: None,
            started: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Attach the auto-click worker. The worker thread needs its own sink
    /// handle; backends hand out a second handle to the same virtual device.
    pub fn attach_clicker(
        &mut self,
        sink: Box<dyn VirtualSink + Send>,
        trigger: KeyCode,
        params: ClickParams,
    ) {
        self.clicker = Some(ClickWorker::spawn(sink, params));
        self.clicker_trigger = Some(trigger);
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle { running: Arc::clone(&self.running) }
    }

    pub fn base_speed(&self) -> f64 {
        self.base_speed
    }

    /// Run until [`EngineHandle::stop`] is called. Always releases every
    /// synthetic key and closes every device on the way out.
    pub fn run(&mut self) {
        info!(
            axes = self.axes.len(),
            sources = self.mux.len(),
            base_speed = self.base_speed,
            "engine started"
        );
        let mut last = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            self.mux.wait_ready(self.frame_floor);
            let mut now = Instant::now();
            let elapsed = now - last;
            if elapsed < self.frame_floor {
                std::thread::sleep(self.frame_floor - elapsed);
                now = Instant::now();
            }
            let dt = (now - last).as_secs_f64().max(self.frame_floor.as_secs_f64());
            last = now;
            self.pump(now, dt);
        }
        self.shutdown();
    }

    /// One full iteration: drain, classify, resolve, integrate, emit.
    fn pump(&mut self, now: Instant, dt: f64) {
        for (_, ev) in self.mux.drain() {
            self.process_event(ev, now);
        }
        self.mux.rescan();
        if !self.paused {
            self.frame(now, dt);
        }
    }

    fn process_event(&mut self, ev: RawEvent, now: Instant) {
        match ev.kind {
            RawKind::Key => self.process_key(ev, now),
            RawKind::RelativeMotion => self.process_relative(ev),
            RawKind::Other(_) => self.forward(&ev),
        }
    }

    fn process_key(&mut self, ev: RawEvent, now: Instant) {
        let code = ev.code;

        if self.bindings.pause == Some(code) {
            if ev.is_press() {
                self.toggle_pause(now);
            }
            // the key still belongs to the application
            self.forward(&ev);
            return;
        }
        if self.paused {
            // devices may be grabbed; keep the keyboard usable while paused
            self.forward(&ev);
            return;
        }

        if self.bindings.boost == Some(code) {
            match ev.value {
                1 => self.boost_held = true,
                0 => self.boost_held = false,
                _ => {}
            }
            self.forward(&ev); // modifiers stay visible to applications
            return;
        }
        if self.bindings.slow == Some(code) {
            match ev.value {
                1 => self.slow_held = true,
                0 => self.slow_held = false,
                _ => {}
            }
            self.forward(&ev);
            return;
        }
        if self.bindings.freeze == Some(code) {
            match ev.value {
                1 => self.motion.set_paused(true),
                0 => self.motion.set_paused(false),
                _ => {}
            }
            return;
        }
        if self.bindings.wheel_toggle == Some(code) {
            if ev.is_press() {
                self.wheel_adjust = !self.wheel_adjust;
                info!(enabled = self.wheel_adjust, "wheel speed adjust");
            }
            self.forward(&ev);
            return;
        }
        if self.clicker_trigger == Some(code) {
            if let Some(worker) = &self.clicker {
                match ev.value {
                    1 => worker.set_active(true),
                    0 => worker.set_active(false),
                    _ => {}
                }
            }
            return;
        }
        if self.ramp_trigger == Some(code) {
            let t = self.elapsed(now);
            match ev.value {
                1 => {
                    if let Some(r) = self.ramp.as_mut() {
                        r.press(&mut self.base_speed, t);
                    }
                    debug!(base_speed = self.base_speed, "ramp trigger down");
                    if self.mirror_trigger {
                        self.emit_key(code, true);
                    }
                }
                0 => {
                    if let Some(r) = self.ramp.as_mut() {
                        r.release(&mut self.base_speed);
                    }
                    debug!(base_speed = self.base_speed, "ramp trigger up");
                    if self.mirror_trigger {
                        self.emit_key(code, false);
                    }
                }
                // auto-repeat: irrelevant to the ramp, forward for the app
                _ => {
                    if self.mirror_trigger {
                        self.forward(&ev);
                    }
                }
            }
            return;
        }

        let mut claimed = false;
        for axis in &mut self.axes {
            if !axis.contains(code) {
                continue;
            }
            claimed = true;
            // auto-repeat is not an edge
            if ev.value == 1 || ev.value == 0 {
                axis.on_key(code, ev.value == 1, now);
            }
        }
        if !claimed {
            self.forward(&ev);
        }
    }

    fn process_relative(&mut self, ev: RawEvent) {
        if self.paused {
            self.forward(&ev);
            return;
        }
        let wheel_steps = match ev.code {
            rel::REL_WHEEL_HI_RES => {
                self.saw_hi_res_wheel = true;
                // whole detents only; a partial hi-res event still counts as one
                let whole = (f64::from(ev.value.abs()) / 120.0).floor().max(1.0);
                Some(f64::from(ev.value.signum()) * whole)
            }
            rel::REL_WHEEL if !self.saw_hi_res_wheel => Some(f64::from(ev.value)),
            rel::REL_WHEEL => None, // hi-res companion already counted
            _ => {
                self.forward(&ev);
                return;
            }
        };
        if !self.wheel_adjust {
            self.forward(&ev);
            return;
        }
        if let Some(steps) = wheel_steps {
            self.bump_speed(steps);
        }
    }

    fn bump_speed(&mut self, steps: f64) {
        let next =
            (self.base_speed + steps * self.scroll_step).clamp(self.min_speed, self.max_speed);
        if next != self.base_speed {
            self.base_speed = next;
            if let Some(r) = self.ramp.as_mut() {
                r.note_external_value(next);
            }
            info!(base_speed = self.base_speed, "speed adjusted");
        }
    }

    fn toggle_pause(&mut self, now: Instant) {
        self.paused = !self.paused;
        info!(paused = self.paused, "pause toggled");
        if self.paused {
            self.release_everything(now);
        }
    }

    /// Neutralize all synthetic output: axis keys, the exclusive hold, the
    /// clicker, and the motion integrator.
    fn release_everything(&mut self, now: Instant) {
        let mut transitions = Vec::new();
        for axis in &mut self.axes {
            transitions.extend(axis.clear(now));
        }
        for (code, down) in transitions {
            self.emit_key(code, down);
        }
        if let Err(err) = self.hold.release(self.sink.as_mut()) {
            warn!(%err, "release failed");
        }
        if let Some(worker) = &self.clicker {
            worker.set_active(false);
        }
        self.motion.halt();
        self.move_allowed_at = None;
    }

    fn frame(&mut self, now: Instant, dt: f64) {
        // Non-motion axes emit their cleaned transitions directly. Releases
        // go out before presses so opposing keys never overlap on the wire.
        let motion_idx = self.motion_axis.map(|(i, _, _)| i);
        let mut transitions = Vec::new();
        for (i, axis) in self.axes.iter_mut().enumerate() {
            let diff = axis.resolve(now);
            if Some(i) != motion_idx {
                transitions.extend(diff);
            }
        }
        transitions.sort_by_key(|(_, down)| *down);
        for (code, down) in transitions {
            self.emit_key(code, down);
        }

        // Motion axis: mirror the winner as a held key and derive direction.
        let mut direction: i8 = 0;
        if let Some((i, neg, pos)) = self.motion_axis {
            match self.axes[i].winner() {
                Some(code) => {
                    direction = if code == neg { -1 } else { i8::from(code == pos) };
                    match self.hold.press(self.sink.as_mut(), code) {
                        Ok(true) => {
                            self.move_allowed_at = Some(now + self.start_move_delay);
                        }
                        Ok(false) => {}
                        Err(err) => warn!(%err, "winner emit failed"),
                    }
                }
                None => {
                    if let Err(err) = self.hold.release(self.sink.as_mut()) {
                        warn!(%err, "winner release failed");
                    }
                    self.move_allowed_at = None;
                }
            }
        }
        if let Some(at) = self.move_allowed_at {
            if now < at {
                direction = 0;
            }
        }

        if let Some(r) = self.ramp.as_mut() {
            let t = (now - self.started).as_secs_f64();
            r.tick(&mut self.base_speed, t);
        }

        let desired = desired_velocity(
            direction,
            self.base_speed,
            self.boost_held,
            self.slow_held,
            self.boost_mult,
            self.slow_mult,
        );
        let dx = self.motion.step(desired, dt);
        if dx != 0 {
            if let Err(err) = self.sink.move_relative(dx, 0) {
                warn!(%err, "motion emit failed");
            }
        }
    }

    fn elapsed(&self, now: Instant) -> f64 {
        (now - self.started).as_secs_f64()
    }

    fn emit_key(&mut self, code: KeyCode, down: bool) {
        if let Err(err) = self.sink.set_key(code, down) {
            warn!(key = %keysym::name_of(code), down, %err, "key emit failed");
        }
    }

    fn forward(&mut self, ev: &RawEvent) {
        if let Err(err) = self.sink.passthrough(ev) {
            warn!(%err, "passthrough failed");
        }
    }

    fn shutdown(&mut self) {
        info!("engine stopping");
        let now = Instant::now();
        if let Some(mut worker) = self.clicker.take() {
            worker.stop();
        }
        self.release_everything(now);
        if let Err(err) = self.sink.release_all() {
            warn!(%err, "final release failed");
        }
        self.mux.close_all();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisGroupConfig, BindingsConfig, RampConfig};
    use crate::mux::testing::FakeSource;
    use crate::sink::testing::{Emitted, RecordingSink};

    const KEY_A: KeyCode = 30;
    const KEY_D: KeyCode = 32;
    const KEY_ESC: KeyCode = 1;
    const KEY_SPACE: KeyCode = 57;
    const KEY_F9: KeyCode = 67;

    fn base_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.axes = vec![AxisGroupConfig {
            name: "horizontal".into(),
            keys: vec!["a".into(), "d".into()],
            ..AxisGroupConfig::default()
        }];
        cfg.motion.humanize_noise = false;
        cfg.motion.accel_time_s = 0.000_01;
        cfg.motion.decel_time_s = 0.000_01;
        cfg.motion.start_move_delay_s = 0.0;
        cfg
    }

    fn build(cfg: EngineConfig) -> (Engine, FakeSource, RecordingSink) {
        let mut mux = DeviceMultiplexer::new();
        let src = FakeSource::named("kb");
        mux.add_source(Box::new(src.clone()));
        let sink = RecordingSink::default();
        let engine = Engine::new(&cfg, mux, Box::new(sink.clone())).unwrap();
        (engine, src, sink)
    }

    fn key_events(sink: &RecordingSink) -> Vec<(KeyCode, bool)> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                Emitted::Key(c, d) => Some((c, d)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn cleaned_keys_flow_for_non_motion_axis() {
        let mut cfg = base_config();
        cfg.bindings = BindingsConfig { motion_axis: None, ..BindingsConfig::default() };
        let (mut engine, src, sink) = build(cfg);
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_A, 1));
        engine.pump(t0, 0.002);
        assert_eq!(key_events(&sink), vec![(KEY_A, true)]);

        src.feed(RawEvent::key(KEY_D, 1));
        engine.pump(t0 + Duration::from_millis(10), 0.002);
        // release precedes the new press
        assert_eq!(
            key_events(&sink),
            vec![(KEY_A, true), (KEY_A, false), (KEY_D, true)]
        );
    }

    #[test]
    fn motion_axis_winner_drives_relative_motion() {
        let (mut engine, src, sink) = build(base_config());
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_A, 1));
        engine.pump(t0, 0.01);
        // one more frame so the near-instant smoothing settles
        engine.pump(t0 + Duration::from_millis(10), 0.01);

        let rels: Vec<_> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Emitted::Rel(dx, dy) => Some((dx, dy)),
                _ => None,
            })
            .collect();
        assert!(!rels.is_empty());
        // 'a' is the first group key: negative x, clamped per-step
        assert!(rels.iter().all(|(dx, dy)| *dx < 0 && *dy == 0));
        assert!(rels.iter().all(|(dx, _)| *dx >= -12));
        // winner mirrored as a held key
        assert!(key_events(&sink).contains(&(KEY_A, true)));
    }

    #[test]
    fn pause_releases_outputs_and_forwards_input() {
        let mut cfg = base_config();
        cfg.bindings = BindingsConfig { motion_axis: None, ..BindingsConfig::default() };
        let (mut engine, src, sink) = build(cfg);
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_A, 1));
        engine.pump(t0, 0.002);
        src.feed(RawEvent::key(KEY_ESC, 1));
        engine.pump(t0 + Duration::from_millis(5), 0.002);
        assert_eq!(
            key_events(&sink),
            vec![(KEY_A, true), (KEY_A, false)]
        );

        // while paused, axis keys pass through untouched
        src.feed(RawEvent::key(KEY_A, 1));
        engine.pump(t0 + Duration::from_millis(10), 0.002);
        assert!(sink
            .events()
            .contains(&Emitted::Passthrough(RawEvent::key(KEY_A, 1))));
    }

    #[test]
    fn wheel_adjust_bumps_base_speed_only_when_enabled() {
        let (mut engine, src, sink) = build(base_config());
        let t0 = Instant::now();

        // adjust off: wheel passes through
        src.feed(RawEvent::relative(rel::REL_WHEEL, 1));
        engine.pump(t0, 0.002);
        assert_eq!(engine.base_speed(), 2000.0);
        assert!(sink
            .events()
            .contains(&Emitted::Passthrough(RawEvent::relative(rel::REL_WHEEL, 1))));

        src.feed(RawEvent::key(KEY_F9, 1));
        src.feed(RawEvent::relative(rel::REL_WHEEL, 2));
        engine.pump(t0 + Duration::from_millis(5), 0.002);
        assert_eq!(engine.base_speed(), 2200.0);
    }

    #[test]
    fn hi_res_wheel_supersedes_low_res_detents() {
        let (mut engine, src, _sink) = build(base_config());
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_F9, 1));
        src.feed(RawEvent::relative(rel::REL_WHEEL_HI_RES, 120));
        src.feed(RawEvent::relative(rel::REL_WHEEL, 1));
        engine.pump(t0, 0.002);
        // one detent total, not two
        assert_eq!(engine.base_speed(), 2100.0);
    }

    #[test]
    fn ramp_trigger_applies_first_checkpoint_and_mirrors_key() {
        let mut cfg = base_config();
        cfg.motion.base_speed_px_s = 3000.0;
        cfg.ramp = Some(RampConfig::default());
        let (mut engine, src, sink) = build(cfg);
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_SPACE, 1));
        engine.pump(t0, 0.002);
        assert_eq!(engine.base_speed(), 2500.0);
        assert!(key_events(&sink).contains(&(KEY_SPACE, true)));

        src.feed(RawEvent::key(KEY_SPACE, 0));
        engine.pump(t0 + Duration::from_millis(5), 0.002);
        // release restores the pre-press value
        assert_eq!(engine.base_speed(), 3000.0);
        assert!(key_events(&sink).contains(&(KEY_SPACE, false)));
    }

    #[test]
    fn unrelated_keys_pass_through() {
        let (mut engine, src, sink) = build(base_config());
        let t0 = Instant::now();

        let ev = RawEvent::key(16, 1); // 'q', not bound anywhere
        src.feed(ev);
        engine.pump(t0, 0.002);
        assert!(sink.events().contains(&Emitted::Passthrough(ev)));
    }

    #[test]
    fn pause_and_wheel_toggle_keys_are_forwarded() {
        let (mut engine, src, sink) = build(base_config());
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_F9, 1));
        src.feed(RawEvent::key(KEY_F9, 0));
        src.feed(RawEvent::key(KEY_ESC, 1));
        engine.pump(t0, 0.002);

        // applications must still see both keys even while they toggle state
        let events = sink.events();
        assert!(events.contains(&Emitted::Passthrough(RawEvent::key(KEY_F9, 1))));
        assert!(events.contains(&Emitted::Passthrough(RawEvent::key(KEY_F9, 0))));
        assert!(events.contains(&Emitted::Passthrough(RawEvent::key(KEY_ESC, 1))));
    }

    #[test]
    fn partial_hi_res_detent_counts_as_a_whole_step() {
        let (mut engine, src, _sink) = build(base_config());
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_F9, 1));
        src.feed(RawEvent::relative(rel::REL_WHEEL_HI_RES, 60));
        engine.pump(t0, 0.002);
        assert_eq!(engine.base_speed(), 2100.0);

        // 2.5 detents truncate to 2 whole steps, sign preserved
        src.feed(RawEvent::relative(rel::REL_WHEEL_HI_RES, -300));
        engine.pump(t0 + Duration::from_millis(5), 0.002);
        assert_eq!(engine.base_speed(), 1900.0);
    }

    #[test]
    fn stop_handle_ends_run_and_releases_held_keys() {
        let (mut engine, src, sink) = build(base_config());
        src.feed(RawEvent::key(KEY_A, 1));

        let handle = engine.handle();
        let runner = std::thread::spawn(move || engine.run());
        std::thread::sleep(Duration::from_millis(50));
        handle.stop();
        runner.join().unwrap();

        // shutdown released the mirrored winner
        let keys = key_events(&sink);
        assert!(keys.contains(&(KEY_A, true)));
        assert!(keys.contains(&(KEY_A, false)));
        assert!(sink.held_keys().is_empty());
    }

    #[test]
    fn start_move_delay_suppresses_first_frames() {
        let mut cfg = base_config();
        cfg.motion.start_move_delay_s = 0.05;
        let (mut engine, src, sink) = build(cfg);
        let t0 = Instant::now();

        src.feed(RawEvent::key(KEY_A, 1));
        engine.pump(t0, 0.01);
        engine.pump(t0 + Duration::from_millis(10), 0.01);
        let before: usize = sink
            .events()
            .iter()
            .filter(|e| matches!(e, Emitted::Rel(..)))
            .count();
        assert_eq!(before, 0);

        engine.pump(t0 + Duration::from_millis(60), 0.01);
        engine.pump(t0 + Duration::from_millis(70), 0.01);
        let after: usize = sink
            .events()
            .iter()
            .filter(|e| matches!(e, Emitted::Rel(..)))
            .count();
        assert!(after > 0);
    }
}
