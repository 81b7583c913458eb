//! Platform backends.
//!
//! A backend supplies concrete [`crate::mux::EventSource`] and
//! [`crate::sink::VirtualSink`] implementations; everything above this module
//! is platform-neutral and testable with fakes.

#[cfg(target_os = "linux")]
pub mod linux;
