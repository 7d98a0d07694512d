//! Lazily established, cached transport handle.
//!
//! # State Machine
//!
//! ```text
//!            get()                connect ok
//!   Idle ───────────► Connecting ────────────► Ready
//!    ▲                    │                      │
//!    │   connect failed   │                      │ handle disconnected,
//!    └────────────────────┘◄─────────────────────┘ release()
//! ```
//!
//! Callers arriving while `Connecting` queue behind the attempt in flight.
//! The attempt runs in its own task, so a caller dropping its future cannot
//! leave the link stuck in `Connecting`. When the attempt fails every
//! queued caller receives a [`Error::TransportFailure`].

// ============================================================================
// Imports
// ============================================================================

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{Connect, Handle};
use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

type Waiter<T> = oneshot::Sender<Result<Arc<T>>>;

enum State<T: ?Sized> {
    Idle,
    Connecting { attempt: u64, waiters: Vec<Waiter<T>> },
    Ready(Arc<T>),
}

/// Observable phase of a [`Link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No handle and no attempt in flight.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// A handle is cached.
    Ready,
}

struct Inner<T: ?Sized> {
    state: Mutex<State<T>>,
    connector: Arc<dyn Connect<T>>,
    attempts: AtomicU64,
}

// ============================================================================
// Link
// ============================================================================

/// Owns at most one live handle of type `T`.
pub struct Link<T: ?Sized> {
    inner: Arc<Inner<T>>,
}

impl<T: ?Sized> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Link<T>
where
    T: ?Sized + Handle + 'static,
{
    /// Creates an idle link that opens handles with `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connect<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Idle),
                connector,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the cached handle, connecting first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFailure`] if the connect attempt this call
    /// waited on failed.
    pub async fn get(&self) -> Result<Arc<T>> {
        let rx = {
            let mut state = self.inner.state.lock();

            if let State::Ready(handle) = &*state {
                if handle.is_connected() {
                    return Ok(Arc::clone(handle));
                }
                debug!("Cached handle disconnected, reconnecting");
                *state = State::Idle;
            }

            let (tx, rx) = oneshot::channel();
            if let State::Connecting { waiters, .. } = &mut *state {
                waiters.push(tx);
            } else {
                let attempt = self.inner.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                *state = State::Connecting {
                    attempt,
                    waiters: vec![tx],
                };
                self.spawn_connect(attempt);
            }
            rx
        };

        rx.await
            .map_err(|_| Error::unexpected_state("connect task dropped its waiters"))?
    }

    /// Drops the cached handle and closes it.
    ///
    /// Callers queued on an attempt in flight receive a transport failure.
    pub fn release(&self) {
        let previous = mem::replace(&mut *self.inner.state.lock(), State::Idle);
        match previous {
            State::Ready(handle) => handle.close(),
            State::Connecting { waiters, .. } => {
                for waiter in waiters {
                    let _ = waiter.send(Err(Error::transport("link released while connecting")));
                }
            }
            State::Idle => {}
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match &*self.inner.state.lock() {
            State::Idle => Phase::Idle,
            State::Connecting { .. } => Phase::Connecting,
            State::Ready(_) => Phase::Ready,
        }
    }

    /// Returns the number of connect attempts started so far.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    fn spawn_connect(&self, attempt: u64) {
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            debug!(attempt, "Connecting transport");
            let result = inner.connector.connect().await;

            let waiters = {
                let mut state = inner.state.lock();
                match &*state {
                    State::Connecting { attempt: current, .. } if *current == attempt => {}
                    _ => {
                        // Released while connecting.
                        drop(state);
                        if let Ok(handle) = &result {
                            handle.close();
                        }
                        debug!(attempt, "Discarding stale connect result");
                        return;
                    }
                }

                let next = match &result {
                    Ok(handle) => State::Ready(Arc::clone(handle)),
                    Err(_) => State::Idle,
                };
                match mem::replace(&mut *state, next) {
                    State::Connecting { waiters, .. } => waiters,
                    _ => Vec::new(),
                }
            };

            match result {
                Ok(handle) => {
                    debug!(attempt, waiters = waiters.len(), "Transport connected");
                    for waiter in waiters {
                        let _ = waiter.send(Ok(Arc::clone(&handle)));
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(attempt, waiters = waiters.len(), error = %message, "Transport connect failed");
                    for waiter in waiters {
                        let _ = waiter.send(Err(Error::transport(message.clone())));
                    }
                }
            }
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    #[derive(Debug)]
    struct FakeHandle {
        connected: AtomicBool,
        closed: AtomicBool,
    }

    impl Handle for FakeHandle {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakeConnector {
        calls: AtomicU64,
        fail: AtomicBool,
        gate: Notify,
        gated: bool,
    }

    impl FakeConnector {
        fn new(gated: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                fail: AtomicBool::new(false),
                gate: Notify::new(),
                gated,
            })
        }
    }

    #[async_trait]
    impl Connect<FakeHandle> for FakeConnector {
        async fn connect(&self) -> Result<Arc<FakeHandle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.gated {
                self.gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::transport("refused"));
            }
            Ok(Arc::new(FakeHandle {
                connected: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }))
        }
    }

    async fn wait_for_phase(link: &Link<FakeHandle>, phase: Phase) {
        for _ in 0..100 {
            if link.phase() == phase {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("link never reached {phase:?}");
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_attempt() {
        let connector = FakeConnector::new(true);
        let link: Link<FakeHandle> = Link::new(connector.clone());

        let first = tokio::spawn({
            let link = link.clone();
            async move { link.get().await }
        });
        let second = tokio::spawn({
            let link = link.clone();
            async move { link.get().await }
        });

        wait_for_phase(&link, Phase::Connecting).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        connector.gate.notify_one();

        let a = first.await.expect("join").expect("first");
        let b = second.await.expect("join").expect("second");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(link.attempts(), 1);
        assert_eq!(link.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn test_failure_notifies_all_waiters() {
        let connector = FakeConnector::new(true);
        connector.fail.store(true, Ordering::SeqCst);
        let link: Link<FakeHandle> = Link::new(connector.clone());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let link = link.clone();
                tokio::spawn(async move { link.get().await })
            })
            .collect();

        wait_for_phase(&link, Phase::Connecting).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        connector.gate.notify_one();

        for waiter in waiters {
            let err = waiter.await.expect("join").unwrap_err();
            assert!(err.is_transport_error());
        }
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
        assert_eq!(link.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_disconnected_handle_is_replaced() {
        let connector = FakeConnector::new(false);
        let link: Link<FakeHandle> = Link::new(connector.clone());

        let first = link.get().await.expect("first");
        let again = link.get().await.expect("cached");
        assert!(Arc::ptr_eq(&first, &again));

        first.connected.store(false, Ordering::SeqCst);
        let second = link.get().await.expect("second");

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_closes_handle() {
        let connector = FakeConnector::new(false);
        let link: Link<FakeHandle> = Link::new(connector);

        let handle = link.get().await.expect("handle");
        link.release();

        assert!(handle.closed.load(Ordering::SeqCst));
        assert_eq!(link.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_wedge_link() {
        let connector = FakeConnector::new(true);
        let link: Link<FakeHandle> = Link::new(connector.clone());

        let mut cancelled = tokio_test::task::spawn(link.get());
        tokio_test::assert_pending!(cancelled.poll());
        drop(cancelled);

        connector.gate.notify_one();
        wait_for_phase(&link, Phase::Ready).await;

        link.get().await.expect("cached handle");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_while_connecting_fails_waiters() {
        let connector = FakeConnector::new(true);
        let link: Link<FakeHandle> = Link::new(connector.clone());

        let waiter = tokio::spawn({
            let link = link.clone();
            async move { link.get().await }
        });
        wait_for_phase(&link, Phase::Connecting).await;

        link.release();
        assert!(waiter.await.expect("join").unwrap_err().is_transport_error());

        connector.gate.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(link.phase(), Phase::Idle);
    }
}
