//! Raw events and event-type constants.
//!
//! keymux represents device input as small, backend-agnostic deltas
//! ([`RawEvent`]) tagged with the source they came from by the multiplexer.
//!
//! ## Value conventions
//! - **Key events:** `value` is `0` (release), `1` (press) or `2` (auto-repeat).
//! - **Relative motion:** `value` is raw counts (pixels for `REL_X`/`REL_Y`,
//!   detents for `REL_WHEEL`, 1/120 detents for `REL_WHEEL_HI_RES`).
//! - **Other:** anything else a device reports (MSC, ABS, ...) carried
//!   opaquely so it can be passed through unmodified.
//!
//! Events are ephemeral: produced by an `EventSource`, consumed once by the
//! control loop, never persisted.

/// Opaque integer identifying a physical/virtual key or mouse button.
///
/// Values follow the Linux input-event-codes `KEY_*`/`BTN_*` numbering and are
/// stable for the process lifetime. See [`crate::keysym`] for name resolution.
pub type KeyCode = u16;

/// Multiplexer-assigned identity of an event source.
pub type SourceId = usize;

/// Relative-axis codes the engine cares about (input-event-codes numbering).
pub mod rel {
    pub const REL_X: u16 = 0x00;
    pub const REL_Y: u16 = 0x01;
    pub const REL_HWHEEL: u16 = 0x06;
    pub const REL_WHEEL: u16 = 0x08;
    pub const REL_WHEEL_HI_RES: u16 = 0x0b;
}

/// Classified event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawKind {
    /// Key or button edge (`code` is a [`KeyCode`]).
    Key,
    /// Relative motion (`code` is a `REL_*` axis).
    RelativeMotion,
    /// Anything else; the inner value is the backend's raw event type so the
    /// event can be forwarded unmodified.
    Other(u16),
}

/// One raw input delta read from a physical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawKind,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn key(code: KeyCode, value: i32) -> Self {
        Self { kind: RawKind::Key, code, value }
    }

    pub fn relative(code: u16, value: i32) -> Self {
        Self { kind: RawKind::RelativeMotion, code, value }
    }

    /// True for a clean press edge (value 1, not auto-repeat).
    pub fn is_press(&self) -> bool {
        self.kind == RawKind::Key && self.value == 1
    }

    /// True for a release edge.
    pub fn is_release(&self) -> bool {
        self.kind == RawKind::Key && self.value == 0
    }
}
