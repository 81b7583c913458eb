//! Virtual output devices.
//!
//! [`VirtualSink`] is the seam between the engine and whatever synthesizes
//! events for the OS (uinput on Linux, a recording fake in tests). Every
//! emission method must end with an explicit synchronization barrier so
//! downstream consumers observe a consistent event boundary; implementations
//! own that barrier, callers never see it.
//!
//! On shutdown the sink must release every key it still reports as held;
//! otherwise the desktop is left with phantom "stuck" keys.

use crate::error::Result;
use crate::event::{KeyCode, RawEvent};

pub trait VirtualSink {
    /// Press or release a key/button, followed by a sync barrier.
    fn set_key(&mut self, code: KeyCode, pressed: bool) -> Result<()>;

    /// Emit relative pointer motion, followed by a sync barrier.
    fn move_relative(&mut self, dx: i32, dy: i32) -> Result<()>;

    /// Forward an event unmodified (used for keys/axes the engine does not
    /// manage), followed by a sync barrier.
    fn passthrough(&mut self, ev: &RawEvent) -> Result<()>;

    /// Keys currently reported as pressed on the virtual side.
    fn held_keys(&self) -> Vec<KeyCode>;

    /// Release everything still held. Called unconditionally on shutdown.
    fn release_all(&mut self) -> Result<()> {
        for code in self.held_keys() {
            self.set_key(code, false)?;
        }
        Ok(())
    }
}

/// Single-owner exclusive key channel on top of a sink.
///
/// Used for the motion axis: when the winner changes, the previous key is
/// released before the new one is pressed, so the virtual keyboard never
/// reports two direction keys at once.
#[derive(Default)]
pub struct ExclusiveHold {
    held: Option<KeyCode>,
}

impl ExclusiveHold {
    pub fn held(&self) -> Option<KeyCode> {
        self.held
    }

    /// Switch the held key. Returns `true` when the hold actually changed
    /// (the caller uses this to arm the start-move delay).
    pub fn press(&mut self, sink: &mut dyn VirtualSink, code: KeyCode) -> Result<bool> {
        if self.held == Some(code) {
            return Ok(false);
        }
        if let Some(prev) = self.held.take() {
            sink.set_key(prev, false)?;
        }
        sink.set_key(code, true)?;
        self.held = Some(code);
        Ok(true)
    }

    pub fn release(&mut self, sink: &mut dyn VirtualSink) -> Result<()> {
        if let Some(prev) = self.held.take() {
            sink.set_key(prev, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording sink used by engine/worker tests.

    use super::*;
    use std::collections::BTreeSet;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Emitted {
        Key(KeyCode, bool),
        Rel(i32, i32),
        Passthrough(RawEvent),
    }

    /// Shared so a worker thread and the test body can both observe it.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub log: Arc<Mutex<Vec<Emitted>>>,
        held: Arc<Mutex<BTreeSet<KeyCode>>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<Emitted> {
            self.log.lock().unwrap().clone()
        }
    }

    impl VirtualSink for RecordingSink {
        fn set_key(&mut self, code: KeyCode, pressed: bool) -> Result<()> {
            let mut held = self.held.lock().unwrap();
            if pressed {
                held.insert(code);
            } else {
                held.remove(&code);
            }
            self.log.lock().unwrap().push(Emitted::Key(code, pressed));
            Ok(())
        }

        fn move_relative(&mut self, dx: i32, dy: i32) -> Result<()> {
            self.log.lock().unwrap().push(Emitted::Rel(dx, dy));
            Ok(())
        }

        fn passthrough(&mut self, ev: &RawEvent) -> Result<()> {
            self.log.lock().unwrap().push(Emitted::Passthrough(*ev));
            Ok(())
        }

        fn held_keys(&self) -> Vec<KeyCode> {
            self.held.lock().unwrap().iter().copied().collect()
        }
    }
}
