//! Event sources and the device multiplexer.
//!
//! [`EventSource`] is the seam over one physical device: a non-blocking
//! `poll()` that drains whatever is ready, and a distinct disconnected signal
//! (never a silent empty read) when the device goes away.
//!
//! [`DeviceMultiplexer`] owns a set of sources, blocks in `wait_ready` (the
//! only suspension point in the system) and merges ready events into one
//! stream. Per-source order is preserved; across sources the only guarantee
//! is readiness order. A disconnected source is dropped without disturbing
//! the rest; when a [`SourceScanner`] is attached, the multiplexer then
//! re-scans for newly appeared devices matching the capability filter,
//! best-effort and bounded by one polling timeout.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;
use crate::event::{RawEvent, SourceId};

/// Capability filter used for auto-detection and re-scans.
///
/// A device qualifies when it matches at least one requested capability.
#[derive(Clone, Copy, Debug, Default)]
pub struct CapabilityFilter {
    /// Exposes the alphabetic key range (`KEY_A..=KEY_Z`).
    pub keyboard: bool,
    /// Exposes named mouse buttons (`BTN_LEFT` etc.).
    pub mouse_buttons: bool,
    /// Exposes a wheel axis (`REL_WHEEL`, including hi-res).
    pub wheel: bool,
}

impl CapabilityFilter {
    pub fn any() -> Self {
        Self { keyboard: true, mouse_buttons: true, wheel: true }
    }

    pub fn keyboard_only() -> Self {
        Self { keyboard: true, ..Self::default() }
    }
}

/// One physical input device.
pub trait EventSource: Send {
    /// Drain ready events without blocking. An empty vec means "nothing
    /// ready"; a device failure is [`Error::DeviceDisconnected`].
    fn poll(&mut self) -> Result<Vec<RawEvent>>;

    fn name(&self) -> &str;

    /// Diagnostic path/identifier (e.g. `/dev/input/event3`).
    fn path(&self) -> &str;

    /// Release the device and any exclusive-grab lock.
    fn close(&mut self);

    /// Readable file descriptor for the readiness wait, when the backend has
    /// one. Fake sources return `None` and rely on [`EventSource::has_pending`].
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        None
    }

    /// Queue hint for sources without a pollable descriptor.
    fn has_pending(&self) -> bool {
        false
    }
}

/// Opens sources matching a capability filter; implemented by the platform
/// backend, attached to the multiplexer for reconnect support.
pub trait SourceScanner: Send {
    /// Scan for devices matching `filter`, skipping the given paths (already
    /// open). Must be cheap enough to run inline with the control loop.
    fn scan(&mut self, filter: &CapabilityFilter, exclude: &[String]) -> Vec<Box<dyn EventSource>>;
}

struct Slot {
    id: SourceId,
    source: Box<dyn EventSource>,
}

/// Merges a set of event sources into one ordered stream.
pub struct DeviceMultiplexer {
    slots: Vec<Slot>,
    next_id: SourceId,
    scanner: Option<Box<dyn SourceScanner>>,
    filter: CapabilityFilter,
    lost_any: bool,
}

impl DeviceMultiplexer {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 0,
            scanner: None,
            filter: CapabilityFilter::any(),
            lost_any: false,
        }
    }

    /// Enable best-effort reconnection of devices matching `filter`.
    pub fn with_scanner(mut self, scanner: Box<dyn SourceScanner>, filter: CapabilityFilter) -> Self {
        self.scanner = Some(scanner);
        self.filter = filter;
        self
    }

    pub fn add_source(&mut self, source: Box<dyn EventSource>) -> SourceId {
        let id = self.next_id;
        self.next_id += 1;
        info!(id, name = source.name(), path = source.path(), "source attached");
        self.slots.push(Slot { id, source });
        id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Block until at least one source has data or `timeout` elapses.
    /// Returns `true` when something is (probably) ready.
    ///
    /// This is the only blocking call in the engine. Sources that expose a
    /// file descriptor are waited on with `poll(2)`; descriptor-less sources
    /// (fakes) are covered by their queue hint, checked in bounded slices.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        if self.slots.iter().any(|s| s.source.has_pending()) {
            return true;
        }

        #[cfg(target_os = "linux")]
        {
            let fds: Vec<_> = self.slots.iter().filter_map(|s| s.source.raw_fd()).collect();
            if !fds.is_empty() {
                return crate::backends::linux::wait_readable(&fds, timeout);
            }
        }

        // No descriptors to wait on: sleep in bounded slices so a fake
        // source feeding from another thread is noticed promptly.
        let slice = Duration::from_millis(1).min(timeout);
        let mut remaining = timeout;
        while !remaining.is_zero() {
            std::thread::sleep(slice.min(remaining));
            remaining = remaining.saturating_sub(slice);
            if self.slots.iter().any(|s| s.source.has_pending()) {
                return true;
            }
        }
        false
    }

    /// Drain all pending events across sources, preserving per-source order.
    ///
    /// Disconnected sources are closed and removed here; the caller keeps
    /// running with whatever remains.
    pub fn drain(&mut self) -> Vec<(SourceId, RawEvent)> {
        let mut out = Vec::new();
        let mut gone: Vec<usize> = Vec::new();

        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot.source.poll() {
                Ok(events) => out.extend(events.into_iter().map(|e| (slot.id, e))),
                Err(err) if err.is_device_local() => {
                    warn!(
                        id = slot.id,
                        path = slot.source.path(),
                        %err,
                        "source lost, dropping"
                    );
                    slot.source.close();
                    gone.push(i);
                }
                Err(err) => {
                    warn!(id = slot.id, %err, "source poll error");
                }
            }
        }
        for i in gone.into_iter().rev() {
            self.slots.remove(i);
            self.lost_any = true;
        }
        out
    }

    /// Attempt to re-open devices after a disconnection. No-op unless a
    /// scanner is attached and a source was actually lost since the last
    /// scan. Best-effort: failures are logged, never fatal.
    pub fn rescan(&mut self) {
        if !self.lost_any {
            return;
        }
        let Some(scanner) = self.scanner.as_mut() else {
            return;
        };
        self.lost_any = false;
        let open: Vec<String> = self.slots.iter().map(|s| s.source.path().to_string()).collect();
        let found = scanner.scan(&self.filter, &open);
        for source in found {
            let id = self.next_id;
            self.next_id += 1;
            info!(id, name = source.name(), path = source.path(), "source reattached");
            self.slots.push(Slot { id, source });
        }
    }

    /// Close every source (ungrab + release). Called on shutdown.
    pub fn close_all(&mut self) {
        for slot in &mut self.slots {
            slot.source.close();
        }
        self.slots.clear();
    }
}

impl Default for DeviceMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeSource;
    use super::*;
    use crate::event::RawEvent;

    #[test]
    fn drain_preserves_per_source_order() {
        let mut mux = DeviceMultiplexer::new();
        let kb = FakeSource::named("kb");
        let mouse = FakeSource::named("mouse");
        let kb_id = mux.add_source(Box::new(kb.clone()));
        let mouse_id = mux.add_source(Box::new(mouse.clone()));

        kb.feed(RawEvent::key(30, 1));
        kb.feed(RawEvent::key(30, 0));
        mouse.feed(RawEvent::relative(0, 5));

        let events = mux.drain();
        let kb_events: Vec<_> = events.iter().filter(|(id, _)| *id == kb_id).collect();
        assert_eq!(kb_events.len(), 2);
        assert_eq!(kb_events[0].1, RawEvent::key(30, 1));
        assert_eq!(kb_events[1].1, RawEvent::key(30, 0));
        assert_eq!(events.iter().filter(|(id, _)| *id == mouse_id).count(), 1);
    }

    #[test]
    fn disconnected_source_is_dropped_and_closed() {
        let mut mux = DeviceMultiplexer::new();
        let kb = FakeSource::named("kb");
        let mouse = FakeSource::named("mouse");
        mux.add_source(Box::new(kb.clone()));
        mux.add_source(Box::new(mouse.clone()));

        kb.disconnect();
        mouse.feed(RawEvent::key(272, 1));

        let events = mux.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(mux.len(), 1);
        assert!(*kb.closed.lock().unwrap());
    }

    #[test]
    fn wait_ready_sees_pending_fake_data() {
        let mut mux = DeviceMultiplexer::new();
        let kb = FakeSource::named("kb");
        mux.add_source(Box::new(kb.clone()));

        assert!(!mux.wait_ready(Duration::from_millis(2)));
        kb.feed(RawEvent::key(30, 1));
        assert!(mux.wait_ready(Duration::from_millis(2)));
    }

    struct OneShotScanner {
        replacement: Option<Box<dyn EventSource>>,
    }

    impl SourceScanner for OneShotScanner {
        fn scan(
            &mut self,
            _filter: &CapabilityFilter,
            exclude: &[String],
        ) -> Vec<Box<dyn EventSource>> {
            match self.replacement.take() {
                Some(s) if !exclude.contains(&s.path().to_string()) => vec![s],
                _ => Vec::new(),
            }
        }
    }

    #[test]
    fn rescan_reattaches_after_loss() {
        let kb = FakeSource::named("kb");
        let replacement = FakeSource::named("kb2");
        let scanner = OneShotScanner { replacement: Some(Box::new(replacement.clone())) };
        let mut mux = DeviceMultiplexer::new()
            .with_scanner(Box::new(scanner), CapabilityFilter::keyboard_only());
        mux.add_source(Box::new(kb.clone()));

        // nothing lost yet: rescan is a no-op
        mux.rescan();
        assert_eq!(mux.len(), 1);

        kb.disconnect();
        mux.drain();
        assert_eq!(mux.len(), 0);

        mux.rescan();
        assert_eq!(mux.len(), 1);
        replacement.feed(RawEvent::key(30, 1));
        assert_eq!(mux.drain().len(), 1);
    }

    #[test]
    fn close_all_closes_every_source() {
        let mut mux = DeviceMultiplexer::new();
        let a = FakeSource::named("a");
        let b = FakeSource::named("b");
        mux.add_source(Box::new(a.clone()));
        mux.add_source(Box::new(b.clone()));
        mux.close_all();
        assert!(mux.is_empty());
        assert!(*a.closed.lock().unwrap());
        assert!(*b.closed.lock().unwrap());
    }
}
