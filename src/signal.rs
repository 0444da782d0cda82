//! Signal management (spec.md §4.7 C7).
//!
//! A dedicated thread owns a [`signal_hook::iterator::Signals`] iterator
//! over a caller-chosen watch set; each delivered signal is published into
//! an atomic flags block (readable without synchronizing with the manager
//! thread) and then run through every registered handler. A signal counts
//! as "handled" if *any* handler returns `true` — spec.md's Open Questions
//! section flags the OR-vs-replace choice explicitly and resolves it to OR,
//! so that is what [`SignalManager::dispatch_once`] implements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use signal_hook::iterator::Signals;

/// A caller-chosen set of signal numbers to watch, plus one atomic flag per
/// signal recording whether it has fired since last cleared (spec.md §3
/// "Signal watch set" / "Signal flags block").
pub struct WatchSet {
    signals: Vec<i32>,
    flags: Vec<AtomicBool>,
}

impl WatchSet {
    pub fn new(signals: Vec<i32>) -> Self {
        let flags = signals.iter().map(|_| AtomicBool::new(false)).collect();
        WatchSet { signals, flags }
    }

    pub fn signals(&self) -> &[i32] {
        &self.signals
    }

    fn index_of(&self, signo: i32) -> Option<usize> {
        self.signals.iter().position(|&s| s == signo)
    }

    /// True if `signo`'s flag is set (spec.md
    /// `ARCHI_SIGNAL_IS_FLAG_SET`-equivalent, acquire ordering).
    pub fn is_set(&self, signo: i32) -> bool {
        self.index_of(signo)
            .map(|i| self.flags[i].load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn set(&self, signo: i32) {
        if let Some(i) = self.index_of(signo) {
            self.flags[i].store(true, Ordering::Release);
        }
    }

    pub fn unset(&self, signo: i32) {
        if let Some(i) = self.index_of(signo) {
            self.flags[i].store(false, Ordering::Release);
        }
    }
}

/// A registered handler: returns `true` if it considers the signal handled.
/// Handlers run synchronously, in registration order, on the manager
/// thread — they must not block (spec.md §5 Concurrency & Resource Model).
pub type HandlerFn = Box<dyn Fn(i32, &WatchSet) -> bool + Send>;

struct HandlerTable {
    handlers: Mutex<Vec<HandlerFn>>,
}

/// Owns the dedicated signal-watching thread (spec.md §4.7).
pub struct SignalManager {
    watch_set: Arc<WatchSet>,
    handlers: Arc<HandlerTable>,
    thread: Option<JoinHandle<()>>,
    signals_handle: signal_hook::iterator::Handle,
}

impl SignalManager {
    /// Spawns the manager thread watching `signals`. Fails if the
    /// underlying `signal_hook::iterator::Signals` registration fails (e.g.
    /// an invalid or unblockable signal number).
    pub fn start(signals: Vec<i32>) -> std::io::Result<Self> {
        let watch_set = Arc::new(WatchSet::new(signals.clone()));
        let handlers = Arc::new(HandlerTable {
            handlers: Mutex::new(Vec::new()),
        });

        let mut iterator = Signals::new(&signals)?;
        let signals_handle = iterator.handle();

        let watch_set_thread = watch_set.clone();
        let handlers_thread = handlers.clone();
        let thread = std::thread::Builder::new()
            .name("signal-management".into())
            .spawn(move || {
                for signo in &mut iterator {
                    // The flag is spec.md §4.7's OR-aggregate of handler
                    // verdicts, not an unconditional "a signal arrived"
                    // marker — setting it regardless would be exactly the
                    // spurious transition Testable Property 7 forbids.
                    if dispatch_once(&handlers_thread, signo, &watch_set_thread) {
                        watch_set_thread.set(signo);
                    }
                }
            })
            .expect("failed to spawn the signal management thread");

        Ok(SignalManager {
            watch_set,
            handlers,
            thread: Some(thread),
            signals_handle,
        })
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    /// Registers a handler, run on every subsequent signal delivery.
    pub fn register(&self, handler: HandlerFn) {
        self.handlers.handlers.lock().unwrap().push(handler);
    }

    /// Stops watching and joins the manager thread (spec.md §4.7 "stop
    /// sequence").
    pub fn stop(mut self) {
        self.signals_handle.close();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn dispatch_once(handlers: &HandlerTable, signo: i32, watch_set: &WatchSet) -> bool {
    let guard = handlers.handlers.lock().unwrap();
    let mut handled = false;
    for handler in guard.iter() {
        // OR-aggregation: every handler runs regardless of earlier verdicts
        // (spec.md Open Questions: "implementers should document and stick
        // to OR").
        handled = handler(signo, watch_set) || handled;
    }
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn watch_set_flags_are_independent_per_signal() {
        let ws = WatchSet::new(vec![1, 2, 3]);
        assert!(!ws.is_set(2));
        ws.set(2);
        assert!(ws.is_set(2));
        assert!(!ws.is_set(1));
        ws.unset(2);
        assert!(!ws.is_set(2));
    }

    #[test]
    fn dispatch_once_ors_handler_verdicts() {
        let ws = WatchSet::new(vec![10]);
        let handlers = HandlerTable {
            handlers: Mutex::new(vec![
                Box::new(|_signo, _ws| false) as HandlerFn,
                Box::new(|_signo, _ws| true) as HandlerFn,
                Box::new(|_signo, _ws| false) as HandlerFn,
            ]),
        };
        assert!(dispatch_once(&handlers, 10, &ws));
    }

    #[test]
    fn manager_starts_and_stops_cleanly() {
        // SIGUSR1 is safe to watch in a test process.
        let manager = SignalManager::start(vec![signal_hook::consts::SIGUSR1]).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_thread = seen.clone();
        manager.register(Box::new(move |_signo, _ws| {
            seen_thread.fetch_add(1, Ordering::SeqCst);
            true
        }));

        unsafe {
            libc::raise(signal_hook::consts::SIGUSR1);
        }
        std::thread::sleep(Duration::from_millis(200));
        manager.stop();
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }
}
