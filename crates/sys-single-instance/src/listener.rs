//! Background thread that delivers handed-off arguments to the owner.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use signal_hook::iterator::{Handle, Signals};

use crate::handoff;
use crate::signal::WakeSignal;

/// Receives the argument list of a later invocation.
pub type Callback = Box<dyn FnMut(Vec<String>) + Send + 'static>;

/// Callback kept by the claim handle and lent to each listener it starts.
pub(crate) type SharedCallback = Arc<Mutex<Callback>>;

/// Registers the wake signal.
///
/// Done before the claim is written so a fast second instance finds a
/// handler in place instead of the signal's default action.
pub(crate) fn register(signal: WakeSignal) -> io::Result<Signals> {
    Signals::new([signal.as_raw()])
}

/// Handle to a running listener thread.
pub struct Listener {
    signals: Handle,
    thread: Option<JoinHandle<()>>,
}

impl Listener {
    /// Consumes `payload` on every wake-up and hands its contents to `on_args`.
    /// Without a callback the payload is still consumed, then dropped, so
    /// publishers are never left waiting. Wake-ups without a payload are ignored.
    pub(crate) fn spawn(
        mut signals: Signals,
        payload: PathBuf,
        on_args: Option<SharedCallback>,
    ) -> io::Result<Self> {
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("instance-handoff".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match handoff::consume(&payload) {
                        Ok(Some(args)) => match &on_args {
                            Some(callback) => {
                                debug!("signal {} delivered {} args", signal, args.len());
                                let mut callback =
                                    callback.lock().unwrap_or_else(PoisonError::into_inner);
                                callback(args);
                            }
                            None => debug!("no callback, dropping {} handed-off args", args.len()),
                        },
                        Ok(None) => debug!("signal {} with no pending handoff", signal),
                        Err(e) => warn!("failed to read handoff {}: {}", payload.display(), e),
                    }
                }
            })?;

        Ok(Self {
            signals: handle,
            thread: Some(thread),
        })
    }

    /// Stop listening and wait for the thread to exit.
    pub fn stop(mut self) {
        self.signals.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.signals.close();
        // Don't join in drop - a callback could be running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn shared(callback: impl FnMut(Vec<String>) + Send + 'static) -> Option<SharedCallback> {
        Some(Arc::new(Mutex::new(Box::new(callback) as Callback)))
    }

    #[test]
    fn test_listener_delivers_payload_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("listener.pid.args");
        let (tx, rx) = mpsc::channel();

        let signals = register(WakeSignal::WindowChange).unwrap();
        let listener = Listener::spawn(
            signals,
            payload.clone(),
            shared(move |args| tx.send(args).unwrap()),
        )
        .unwrap();

        std::fs::write(&payload, handoff::encode(&["--open", "file.txt"])).unwrap();
        nix::sys::signal::raise(WakeSignal::WindowChange.as_nix()).unwrap();

        let args = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(args, vec!["--open", "file.txt"]);
        assert!(!payload.exists());

        listener.stop();
    }

    #[test]
    fn test_spurious_wakeup_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel::<Vec<String>>();

        let signals = register(WakeSignal::WindowChange).unwrap();
        let payload = dir.path().join("none.pid.args");
        let listener = Listener::spawn(
            signals,
            payload,
            shared(move |args| {
                let _ = tx.send(args);
            }),
        )
        .unwrap();

        nix::sys::signal::raise(WakeSignal::WindowChange.as_nix()).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        listener.stop();
    }

    #[test]
    fn test_payload_is_consumed_without_callback() {
        let dir = tempfile::tempdir().unwrap();
        let payload = dir.path().join("silent.pid.args");

        let signals = register(WakeSignal::WindowChange).unwrap();
        let listener = Listener::spawn(signals, payload.clone(), None).unwrap();

        std::fs::write(&payload, handoff::encode(&["ignored"])).unwrap();
        let consumed = (0..100).any(|_| {
            nix::sys::signal::raise(WakeSignal::WindowChange.as_nix()).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            !payload.exists()
        });
        assert!(consumed);

        listener.stop();
    }
}
