//! Linux backend: evdev event sources and uinput virtual devices.
//!
//! Physical devices are opened read-only through evdev, switched to
//! non-blocking mode and (optionally, best-effort) grabbed so the compositor
//! never sees the raw keys. Output goes through two uinput devices, one
//! keyboard and one mouse, because some consumers refuse devices that mix
//! key and relative capabilities.

use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::path::Path;
use std::time::Duration;

use evdev::{Device, EventType, InputEvent, Key, RelativeAxisType};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::event::{RawEvent, RawKind};
use crate::keysym;
use crate::mux::{CapabilityFilter, DeviceMultiplexer, EventSource, SourceScanner};

/// Block until any of `fds` is readable or `timeout` elapses.
pub fn wait_readable(fds: &[RawFd], timeout: Duration) -> bool {
    // fds come from sources owned by the caller for the duration of the wait
    let borrowed: Vec<BorrowedFd<'_>> = fds
        .iter()
        .map(|fd| unsafe { BorrowedFd::borrow_raw(*fd) })
        .collect();
    let mut poll_fds: Vec<PollFd> = borrowed
        .iter()
        .map(|fd| PollFd::new(fd, PollFlags::POLLIN))
        .collect();
    let ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    match poll(&mut poll_fds, ms) {
        Ok(n) => n > 0,
        Err(err) => {
            warn!(%err, "poll failed");
            false
        }
    }
}

fn convert(ev: InputEvent) -> Option<RawEvent> {
    match ev.event_type() {
        EventType::SYNCHRONIZATION => None,
        EventType::KEY => Some(RawEvent::key(ev.code(), ev.value())),
        EventType::RELATIVE => Some(RawEvent::relative(ev.code(), ev.value())),
        other => Some(RawEvent { kind: RawKind::Other(other.0), code: ev.code(), value: ev.value() }),
    }
}

/// One physical evdev device.
pub struct EvdevSource {
    device: Device,
    name: String,
    path: String,
    grabbed: bool,
}

impl EvdevSource {
    pub fn open(path: &Path, grab: bool) -> Result<Self> {
        let device = Device::open(path).map_err(|source| Error::DeviceUnavailable {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_device(path, device, grab)
    }

    fn from_device(path: &Path, mut device: Device, grab: bool) -> Result<Self> {
        let path_str = path.display().to_string();
        fcntl(device.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(|errno| {
            Error::DeviceUnavailable { path: path_str.clone(), source: errno.into() }
        })?;

        let mut grabbed = false;
        if grab {
            // best-effort: another grabber may hold the device
            match device.grab() {
                Ok(()) => grabbed = true,
                Err(err) => warn!(path = %path_str, %err, "grab failed, running ungrabbed"),
            }
        }

        let name = device.name().unwrap_or("unknown device").to_string();
        info!(name = %name, path = %path_str, grabbed, "device opened");
        Ok(Self { device, name, path: path_str, grabbed })
    }
}

impl EventSource for EvdevSource {
    fn poll(&mut self) -> Result<Vec<RawEvent>> {
        match self.device.fetch_events() {
            Ok(events) => Ok(events.filter_map(convert).collect()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(err) => {
                debug!(path = %self.path, %err, "read failed");
                Err(Error::DeviceDisconnected { path: self.path.clone() })
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn close(&mut self) {
        if self.grabbed {
            if let Err(err) = self.device.ungrab() {
                warn!(path = %self.path, %err, "ungrab failed");
            }
            self.grabbed = false;
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.device.as_raw_fd())
    }
}

fn has_keyboard(device: &Device) -> bool {
    device.supported_keys().map_or(false, |keys| {
        (keysym::KEY_A..=keysym::KEY_Z).all(|c| keys.contains(Key::new(c)))
    })
}

fn has_mouse_buttons(device: &Device) -> bool {
    device
        .supported_keys()
        .map_or(false, |keys| keys.contains(Key::BTN_LEFT))
}

fn has_wheel(device: &Device) -> bool {
    device.supported_relative_axes().map_or(false, |axes| {
        axes.contains(RelativeAxisType::REL_WHEEL)
            || axes.contains(RelativeAxisType::REL_WHEEL_HI_RES)
    })
}

pub(crate) fn matches_filter(
    keyboard: bool,
    mouse_buttons: bool,
    wheel: bool,
    filter: &CapabilityFilter,
) -> bool {
    (filter.keyboard && keyboard)
        || (filter.mouse_buttons && mouse_buttons)
        || (filter.wheel && wheel)
}

/// Enumerates `/dev/input` for devices matching a capability filter.
pub struct LinuxScanner {
    grab: bool,
    /// Device names never to open (our own virtual devices).
    skip_names: Vec<String>,
}

impl LinuxScanner {
    pub fn new(grab: bool, skip_names: Vec<String>) -> Self {
        Self { grab, skip_names }
    }
}

impl SourceScanner for LinuxScanner {
    fn scan(&mut self, filter: &CapabilityFilter, exclude: &[String]) -> Vec<Box<dyn EventSource>> {
        let mut found: Vec<Box<dyn EventSource>> = Vec::new();
        for (path, device) in evdev::enumerate() {
            let path_str = path.display().to_string();
            if exclude.contains(&path_str) {
                continue;
            }
            if let Some(name) = device.name() {
                if self.skip_names.iter().any(|s| s == name) {
                    continue;
                }
            }
            if !matches_filter(
                has_keyboard(&device),
                has_mouse_buttons(&device),
                has_wheel(&device),
                filter,
            ) {
                continue;
            }
            match EvdevSource::from_device(&path, device, self.grab) {
                Ok(source) => found.push(Box::new(source)),
                Err(err) => warn!(path = %path_str, %err, "skipping device"),
            }
        }
        found
    }
}

/// Open the configured input devices and wire up reconnection.
pub fn open_inputs(cfg: &EngineConfig, filter: CapabilityFilter) -> Result<DeviceMultiplexer> {
    let skip = vec![cfg.virtual_keyboard_name.clone(), cfg.virtual_mouse_name.clone()];
    let mut mux = DeviceMultiplexer::new();
    if cfg.auto_detect_devices {
        mux = mux.with_scanner(Box::new(LinuxScanner::new(cfg.grab_inputs, skip.clone())), filter);
    }

    if let Some(path) = &cfg.device_path {
        let source = EvdevSource::open(Path::new(path), cfg.grab_inputs)?;
        mux.add_source(Box::new(source));
        return Ok(mux);
    }

    let mut scanner = LinuxScanner::new(cfg.grab_inputs, skip);
    for source in scanner.scan(&filter, &[]) {
        mux.add_source(source);
    }
    if mux.is_empty() {
        return Err(Error::DeviceUnavailable {
            path: "/dev/input".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no matching input device"),
        });
    }
    Ok(mux)
}

#[cfg(feature = "uinput")]
mod uinput {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
    use evdev::AttributeSet;

    use crate::event::{rel, KeyCode};
    use crate::sink::VirtualSink;

    const KEYBOARD_KEY_RANGE: std::ops::RangeInclusive<u16> = 1..=248;
    const BUTTON_RANGE: std::ops::RangeInclusive<u16> = 0x110..=0x117; // BTN_LEFT..BTN_TASK

    fn build_keyboard(name: &str) -> io::Result<VirtualDevice> {
        let mut keys = AttributeSet::<Key>::new();
        for code in KEYBOARD_KEY_RANGE {
            keys.insert(Key::new(code));
        }
        VirtualDeviceBuilder::new()?.name(name).with_keys(&keys)?.build()
    }

    fn build_mouse(name: &str) -> io::Result<VirtualDevice> {
        let mut keys = AttributeSet::<Key>::new();
        for code in BUTTON_RANGE {
            keys.insert(Key::new(code));
        }
        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        axes.insert(RelativeAxisType::REL_HWHEEL);
        axes.insert(RelativeAxisType::REL_WHEEL);
        axes.insert(RelativeAxisType::REL_WHEEL_HI_RES);
        VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .with_relative_axes(&axes)?
            .build()
    }

    /// uinput-backed sink. Cloneable: the click worker gets its own handle to
    /// the same pair of virtual devices.
    #[derive(Clone)]
    pub struct UinputSink {
        keyboard: Arc<Mutex<VirtualDevice>>,
        mouse: Arc<Mutex<VirtualDevice>>,
        held: Arc<Mutex<BTreeSet<KeyCode>>>,
    }

    impl UinputSink {
        pub fn create(cfg: &EngineConfig) -> Result<Self> {
            let map = |source: io::Error| Error::DeviceUnavailable {
                path: "/dev/uinput".into(),
                source,
            };
            let keyboard = build_keyboard(&cfg.virtual_keyboard_name).map_err(map)?;
            let mouse = build_mouse(&cfg.virtual_mouse_name).map_err(map)?;
            info!(
                keyboard = %cfg.virtual_keyboard_name,
                mouse = %cfg.virtual_mouse_name,
                "virtual devices created"
            );
            Ok(Self {
                keyboard: Arc::new(Mutex::new(keyboard)),
                mouse: Arc::new(Mutex::new(mouse)),
                held: Arc::new(Mutex::new(BTreeSet::new())),
            })
        }

        fn device_for(&self, code: KeyCode) -> &Arc<Mutex<VirtualDevice>> {
            if keysym::is_button(code) {
                &self.mouse
            } else {
                &self.keyboard
            }
        }
    }

    /// Update held-state tracking from a key event value. Auto-repeat (2)
    /// leaves the set untouched.
    fn track_key_edge(held: &mut BTreeSet<KeyCode>, code: KeyCode, value: i32) {
        match value {
            1 => {
                held.insert(code);
            }
            0 => {
                held.remove(&code);
            }
            _ => {}
        }
    }


    impl VirtualSink for UinputSink {
        fn set_key(&mut self, code: KeyCode, pressed: bool) -> Result<()> {
            let ev = InputEvent::new(EventType::KEY, code, i32::from(pressed));
            self.device_for(code)
                .lock()
                .expect("sink mutex poisoned")
                .emit(&[ev])
                .map_err(Error::Emission)?;
            let mut held = self.held.lock().expect("sink mutex poisoned");
            track_key_edge(&mut held, code, i32::from(pressed));
            Ok(())
        }

        fn move_relative(&mut self, dx: i32, dy: i32) -> Result<()> {
            let mut events = Vec::with_capacity(2);
            if dx != 0 {
                events.push(InputEvent::new(EventType::RELATIVE, rel::REL_X, dx));
            }
            if dy != 0 {
                events.push(InputEvent::new(EventType::RELATIVE, rel::REL_Y, dy));
            }
            if events.is_empty() {
                return Ok(());
            }
            self.mouse
                .lock()
                .expect("sink mutex poisoned")
                .emit(&events)
                .map_err(Error::Emission)
        }

        fn passthrough(&mut self, ev: &RawEvent) -> Result<()> {
            match ev.kind {
                // value is forwarded verbatim so auto-repeat (2) survives
                RawKind::Key => {
                    let raw = InputEvent::new(EventType::KEY, ev.code, ev.value);
                    self.device_for(ev.code)
                        .lock()
                        .expect("sink mutex poisoned")
                        .emit(&[raw])
                        .map_err(Error::Emission)?;
                    let mut held = self.held.lock().expect("sink mutex poisoned");
                    track_key_edge(&mut held, ev.code, ev.value);
                    Ok(())
                }
                RawKind::RelativeMotion => {
                    let raw = InputEvent::new(EventType::RELATIVE, ev.code, ev.value);
                    self.mouse
                        .lock()
                        .expect("sink mutex poisoned")
                        .emit(&[raw])
                        .map_err(Error::Emission)
                }
                RawKind::Other(t) => {
                    let raw = InputEvent::new(EventType(t), ev.code, ev.value);
                    self.keyboard
                        .lock()
                        .expect("sink mutex poisoned")
                        .emit(&[raw])
                        .map_err(Error::Emission)
                }
            }
        }

        fn held_keys(&self) -> Vec<KeyCode> {
            self.held
                .lock()
                .expect("sink mutex poisoned")
                .iter()
                .copied()
                .collect()
        }
    }
}

#[cfg(feature = "uinput")]
pub use uinput::UinputSink;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_readable_reports_socket_data() {
        use std::io::Write;
        use std::os::unix::net::UnixStream;

        let (mut tx, rx) = UnixStream::pair().unwrap();
        let fds = [rx.as_raw_fd()];
        assert!(!wait_readable(&fds, Duration::from_millis(5)));
        tx.write_all(&[1]).unwrap();
        assert!(wait_readable(&fds, Duration::from_millis(100)));
    }

    #[test]
    fn filter_matching_is_any_of() {
        let kb = CapabilityFilter::keyboard_only();
        assert!(matches_filter(true, false, false, &kb));
        assert!(!matches_filter(false, true, true, &kb));

        let any = CapabilityFilter::any();
        assert!(matches_filter(false, false, true, &any));
        assert!(!matches_filter(false, false, false, &any));
    }
}
