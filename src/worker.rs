//! Background periodic click worker.
//!
//! Decouples fixed-rate clicking from input latency: the worker owns its own
//! sink and thread, sleeps in bounded increments, and checks two atomics each
//! wake-up: `running` (process lifetime) and `active` (trigger held). The
//! control loop only ever flips the `active` flag; no other state crosses the
//! thread boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::event::KeyCode;
use crate::sink::VirtualSink;

/// Idle poll interval while the trigger is not held.
const IDLE_SLEEP: Duration = Duration::from_millis(50);
/// Sleep slice while waiting for the next scheduled click.
const PACING_SLEEP: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug)]
pub struct ClickParams {
    pub target: KeyCode,
    pub clicks_per_second: f64,
    /// How long the button stays down within one click.
    pub hold: Duration,
}

impl Default for ClickParams {
    fn default() -> Self {
        Self {
            target: crate::keysym::BTN_LEFT,
            clicks_per_second: 25.0,
            hold: Duration::from_millis(1),
        }
    }
}

/// Handle to the spawned worker; dropping it stops the thread.
pub struct ClickWorker {
    active: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ClickWorker {
    /// Spawn the worker with its own sink. The sink must route `target` to a
    /// mouse-shaped device; the engine passes a dedicated one.
    pub fn spawn(mut sink: Box<dyn VirtualSink + Send>, params: ClickParams) -> Self {
        let active = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let thread_active = Arc::clone(&active);
        let thread_running = Arc::clone(&running);
        let interval = Duration::from_secs_f64(1.0 / params.clicks_per_second.max(0.1));

        let handle = thread::spawn(move || {
            info!(cps = params.clicks_per_second, "click worker started");
            let mut next = Instant::now();
            while thread_running.load(Ordering::Relaxed) {
                if !thread_active.load(Ordering::Relaxed) {
                    thread::sleep(IDLE_SLEEP);
                    next = Instant::now();
                    continue;
                }
                let now = Instant::now();
                if now < next {
                    thread::sleep(PACING_SLEEP.min(next - now));
                    continue;
                }
                let click = sink
                    .set_key(params.target, true)
                    .and_then(|()| {
                        thread::sleep(params.hold);
                        sink.set_key(params.target, false)
                    });
                if let Err(err) = click {
                    // the frame's output is dropped; keep pacing
                    warn!(%err, "click emission failed");
                }
                next = now + interval;
            }
            // never leave the button stuck down
            let _ = sink.release_all();
            info!("click worker stopped");
        });

        Self { active, running, handle: Some(handle) }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ClickWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::testing::{Emitted, RecordingSink};
    use crate::sink::VirtualSink;

    #[test]
    fn clicks_only_while_active_and_releases_on_stop() {
        let sink = RecordingSink::default();
        let mut worker = ClickWorker::spawn(
            Box::new(sink.clone()),
            ClickParams {
                target: 272,
                clicks_per_second: 200.0,
                hold: Duration::from_micros(100),
            },
        );

        // inactive: nothing should be emitted
        thread::sleep(Duration::from_millis(30));
        assert!(sink.events().is_empty());

        worker.set_active(true);
        thread::sleep(Duration::from_millis(120));
        worker.set_active(false);
        thread::sleep(Duration::from_millis(30));
        let after_deactivate = sink.events().len();
        thread::sleep(Duration::from_millis(60));
        // allow one in-flight click to finish, then the stream must be quiet
        assert!(sink.events().len() <= after_deactivate + 2);

        worker.stop();
        let events = sink.events();
        // press/release pairs only, ending released
        let presses = events.iter().filter(|e| matches!(e, Emitted::Key(272, true))).count();
        let releases = events.iter().filter(|e| matches!(e, Emitted::Key(272, false))).count();
        assert!(presses >= 2, "expected several clicks, got {presses}");
        assert_eq!(presses, releases);
        assert!(sink.held_keys().is_empty());
    }
}
