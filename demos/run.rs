//! Run the engine against real devices. Linux only; needs access to
//! /dev/input and /dev/uinput (root or an `input`/`uinput` group membership).
//!
//!     cargo run --example run [config.json]
//!
//! Without an argument the built-in defaults are used (a/d and w/s axis
//! groups, a/d driving pointer motion). `RUST_LOG=keymux=debug` for detail.
//! SIGINT/SIGTERM stop the loop cooperatively so devices are ungrabbed and
//! every synthetic key is released on the way out.

#[cfg(target_os = "linux")]
fn main() -> keymux::Result<()> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use nix::libc::c_int;
    use nix::sys::signal::{self, SigHandler, Signal};

    use keymux::backends::linux::{open_inputs, UinputSink};
    use keymux::{CapabilityFilter, Engine, EngineConfig};

    static STOP: AtomicBool = AtomicBool::new(false);
    extern "C" fn on_signal(_sig: c_int) {
        STOP.store(true, Ordering::SeqCst);
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| keymux::Error::ConfigurationInvalid(format!("{path}: {e}")))?;
            serde_json::from_str::<EngineConfig>(&text)
                .map_err(|e| keymux::Error::ConfigurationInvalid(format!("{path}: {e}")))?
        }
        None => EngineConfig::default(),
    };

    let mux = open_inputs(&cfg, CapabilityFilter::any())?;
    let sink = UinputSink::create(&cfg)?;
    let mut engine = Engine::new(&cfg, mux, Box::new(sink.clone()))?;
    if let Some(clicker) = &cfg.clicker {
        let (trigger, params) = clicker.params()?;
        engine.attach_clicker(Box::new(sink), trigger, params);
    }

    unsafe {
        signal::signal(Signal::SIGINT, SigHandler::Handler(on_signal))
            .expect("install SIGINT handler");
        signal::signal(Signal::SIGTERM, SigHandler::Handler(on_signal))
            .expect("install SIGTERM handler");
    }
    let handle = engine.handle();
    std::thread::spawn(move || {
        while !STOP.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(50));
        }
        handle.stop();
    });

    engine.run();
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("this demo only runs on Linux");
}
