//! Single-shot closure event shared by a transport and its listeners.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Why a transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client asked for termination (HTTP DELETE).
    ClientTerminated,
    /// The connection dropped or an I/O error occurred.
    Disconnected,
    /// The input stream reached EOF.
    EndOfStream,
    /// The process is shutting down.
    Shutdown,
    /// The session's opening `initialize` was answered with an error.
    HandshakeFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ClientTerminated => "client terminated",
            Self::Disconnected => "disconnected",
            Self::EndOfStream => "end of stream",
            Self::Shutdown => "shutdown",
            Self::HandshakeFailed => "handshake failed",
        };
        f.write_str(text)
    }
}

type Listener = Box<dyn FnOnce(CloseReason) + Send>;

#[derive(Default)]
struct State {
    reason: Option<CloseReason>,
    listeners: Vec<Listener>,
}

struct Inner {
    state: Mutex<State>,
    token: CancellationToken,
}

/// A close event that fires at most once.
///
/// Synchronous listeners registered with [`on_close`](Self::on_close) run
/// exactly once, on the thread that wins the [`close`](Self::close) call.
/// Async waiters observe the same event through [`closed`](Self::closed).
#[derive(Clone)]
pub struct CloseSignal {
    inner: Arc<Inner>,
}

impl CloseSignal {
    /// Creates an open signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Registers `listener`. If the signal already fired it runs immediately.
    pub fn on_close<F>(&self, listener: F)
    where
        F: FnOnce(CloseReason) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if let Some(reason) = state.reason {
            drop(state);
            listener(reason);
            return;
        }
        state.listeners.push(Box::new(listener));
    }

    /// Fires the signal. Returns `false` if it had already fired.
    pub fn close(&self, reason: CloseReason) -> bool {
        let listeners = {
            let mut state = self.inner.state.lock();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason);
            std::mem::take(&mut state.listeners)
        };

        self.inner.token.cancel();
        for listener in listeners {
            listener(reason);
        }
        true
    }

    /// Returns `true` once the signal has fired.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().reason.is_some()
    }

    /// The reason given to the winning [`close`](Self::close) call.
    #[must_use]
    pub fn reason(&self) -> Option<CloseReason> {
        self.inner.state.lock().reason
    }

    /// Completes when the signal fires.
    pub async fn closed(&self) {
        self.inner.token.cancelled().await;
    }

    /// A cancellation token cancelled when the signal fires.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CloseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseSignal")
            .field("reason", &self.reason())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn listeners_run_exactly_once() {
        let signal = CloseSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        signal.on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(signal.close(CloseReason::ClientTerminated));
        assert!(!signal.close(CloseReason::Disconnected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.reason(), Some(CloseReason::ClientTerminated));
    }

    #[test]
    fn late_listener_runs_immediately_with_first_reason() {
        let signal = CloseSignal::new();
        signal.close(CloseReason::Shutdown);

        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        signal.on_close(move |reason| *slot.lock() = Some(reason));
        assert_eq!(*seen.lock(), Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn async_waiters_wake_on_close() {
        let signal = CloseSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.closed().await })
        };

        assert!(!signal.is_closed());
        signal.close(CloseReason::EndOfStream);
        waiter.await.unwrap();
        assert!(signal.token().is_cancelled());
    }

    #[test]
    fn concurrent_close_fires_once() {
        let signal = CloseSignal::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        signal.on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| usize::from(signal.close(CloseReason::Disconnected))))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(winners, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
