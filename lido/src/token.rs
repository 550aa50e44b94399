// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

//! Operation tokens and cancellation handles.
//!
//! Every outbound operation returns a [`Token`]: a future-like handle
//! resolved by the acknowledgement router when the matching ack arrives,
//! or failed early by client-side validation, cancellation or session
//! teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codec::ReasonCode;
use tokio::sync::Notify;

use crate::error::{Error, ErrorKind};

/// Which operation produced a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    Publish,
    Subscribe,
    Unsubscribe,
    Disconnect,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenStatus {
    Pending,
    Complete,
    Failed,
}

type CompletionCallback = Box<dyn FnOnce(Result<&[ReasonCode], &Error>) + Send>;

struct TokenState {
    status: TokenStatus,
    error: Option<Error>,
    reasons: Vec<ReasonCode>,
    callbacks: Vec<CompletionCallback>,
}

struct TokenInner {
    kind: TokenKind,
    state: Mutex<TokenState>,
    notify: Notify,
}

/// Future-like handle of one outbound operation.
///
/// Clones share completion state. A QoS 0 publish token resolves once the
/// bytes enter the writer queue; QoS 1 on PUBACK; QoS 2 on PUBCOMP;
/// subscribe and unsubscribe tokens carry the per-filter reason codes of
/// their acknowledgement.
#[derive(Clone)]
pub struct Token {
    inner: Arc<TokenInner>,
}

impl Token {
    pub(crate) fn new(kind: TokenKind) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                kind,
                state: Mutex::new(TokenState {
                    status: TokenStatus::Pending,
                    error: None,
                    reasons: Vec::new(),
                    callbacks: Vec::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> TokenKind {
        self.inner.kind
    }

    /// Returns true once the operation has completed or failed.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.lock_state().status != TokenStatus::Pending
    }

    /// Non-blocking error accessor.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.lock_state().error.clone()
    }

    /// Per-filter reason codes granted by the broker, one per topic filter
    /// of the operation. Empty for publish tokens.
    ///
    /// Per-filter failures (0x80 and above) do not fail the token as a
    /// whole; inspect this list to find them.
    #[must_use]
    pub fn granted(&self) -> Vec<ReasonCode> {
        self.lock_state().reasons.clone()
    }

    /// Block until the operation resolves.
    ///
    /// # Errors
    ///
    /// Returns the operation's failure, if it failed.
    pub async fn wait(&self) -> Result<(), Error> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a completion racing
            // with this check cannot be missed.
            notified.as_mut().enable();
            {
                let state = self.lock_state();
                match state.status {
                    TokenStatus::Complete => return Ok(()),
                    TokenStatus::Failed => {
                        return Err(state.error.clone().unwrap_or_else(|| {
                            Error::new(ErrorKind::ConnectionAborted, "Operation failed")
                        }));
                    }
                    TokenStatus::Pending => (),
                }
            }
            notified.await;
        }
    }

    /// Block until the operation resolves or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `OperationCancelled` on timeout, or the operation's failure.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), Error> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::new(
                ErrorKind::OperationCancelled,
                "Timed out waiting for operation",
            )),
        }
    }

    /// Register a completion callback.
    ///
    /// Runs exactly once, immediately if the token is already resolved.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(Result<&[ReasonCode], &Error>) + Send + 'static,
    {
        let run_now = {
            let mut state = self.lock_state();
            if state.status == TokenStatus::Pending {
                state.callbacks.push(Box::new(callback));
                None
            } else {
                Some(callback)
            }
        };
        if let Some(callback) = run_now {
            let state = self.lock_state();
            match state.status {
                TokenStatus::Failed => {
                    if let Some(err) = &state.error {
                        callback(Err(err));
                    }
                }
                _ => callback(Ok(&state.reasons)),
            }
        }
    }

    pub(crate) fn complete(&self, reasons: Vec<ReasonCode>) {
        let callbacks = {
            let mut state = self.lock_state();
            if state.status != TokenStatus::Pending {
                return;
            }
            state.status = TokenStatus::Complete;
            state.reasons = reasons;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            let state = self.lock_state();
            let reasons = state.reasons.clone();
            drop(state);
            callback(Ok(&reasons));
        }
        self.inner.notify.notify_waiters();
    }

    pub(crate) fn fail(&self, error: Error) {
        let callbacks = {
            let mut state = self.lock_state();
            if state.status != TokenStatus::Pending {
                return;
            }
            state.status = TokenStatus::Failed;
            state.error = Some(error.clone());
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(Err(&error));
        }
        self.inner.notify.notify_waiters();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TokenState> {
        // Lock poisoning cannot happen: no panic path runs under the lock.
        self.inner
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Token")
            .field("kind", &self.inner.kind)
            .field("status", &state.status)
            .field("error", &state.error)
            .finish()
    }
}

struct CancelShared {
    notify: Notify,
    fired: AtomicBool,
}

/// Cancellation handle accepted by every public operation: a deadline, a
/// manual trigger, both, or neither.
///
/// Cancellation unblocks the caller but never rolls back bytes already on
/// the wire; a cancelled subscribe whose SUBACK later arrives is simply
/// dropped by the acknowledgement router.
#[derive(Clone, Default)]
pub struct Cancellation {
    deadline: Option<Duration>,
    shared: Option<Arc<CancelShared>>,
}

impl Cancellation {
    /// A handle that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Cancel automatically after `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            shared: None,
        }
    }

    /// A manually triggered handle; call [`Cancellation::cancel`] to fire.
    #[must_use]
    pub fn with_trigger() -> Self {
        Self {
            deadline: None,
            shared: Some(Arc::new(CancelShared {
                notify: Notify::new(),
                fired: AtomicBool::new(false),
            })),
        }
    }

    /// Attach a deadline to this handle as well.
    #[must_use]
    pub fn and_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Fire the trigger. No effect on deadline-only or empty handles.
    pub fn cancel(&self) {
        if let Some(shared) = &self.shared {
            shared.fired.store(true, Ordering::SeqCst);
            shared.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|shared| shared.fired.load(Ordering::SeqCst))
    }

    /// Resolves when the handle fires; pends forever on an empty handle.
    pub(crate) async fn cancelled(&self) {
        let trigger = async {
            match &self.shared {
                Some(shared) => loop {
                    let notified = shared.notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if shared.fired.load(Ordering::SeqCst) {
                        return;
                    }
                    notified.await;
                },
                None => futures::future::pending().await,
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = tokio::time::sleep(deadline) => (),
                    () = trigger => (),
                }
            }
            None => trigger.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_resolves_waiters() {
        let token = Token::new(TokenKind::Publish);
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });
        tokio::task::yield_now().await;
        token.complete(Vec::new());
        assert!(handle.await.unwrap().is_ok());
        assert!(token.is_resolved());
    }

    #[tokio::test]
    async fn test_fail_propagates_error() {
        let token = Token::new(TokenKind::Subscribe);
        token.fail(Error::new(ErrorKind::ValidationError, "bad filter"));
        let err = token.wait().await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ValidationError);
        assert_eq!(token.error().unwrap().kind(), &ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_wait_timeout() {
        let token = Token::new(TokenKind::Publish);
        let err = token
            .wait_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::OperationCancelled);
    }

    #[tokio::test]
    async fn test_on_complete_after_resolution() {
        let token = Token::new(TokenKind::Subscribe);
        token.complete(vec![ReasonCode::GrantedQoS1]);
        let (tx, rx) = std::sync::mpsc::channel();
        token.on_complete(move |result| {
            tx.send(result.unwrap().to_vec()).unwrap();
        });
        assert_eq!(rx.recv().unwrap(), vec![ReasonCode::GrantedQoS1]);
    }

    #[tokio::test]
    async fn test_double_resolution_ignored() {
        let token = Token::new(TokenKind::Publish);
        token.complete(Vec::new());
        token.fail(Error::new(ErrorKind::SessionClosed, "late"));
        assert!(token.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_trigger() {
        let cancel = Cancellation::with_trigger();
        let watched = cancel.clone();
        let handle = tokio::spawn(async move { watched.cancelled().await });
        tokio::task::yield_now().await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancellation_deadline() {
        let cancel = Cancellation::with_deadline(Duration::from_millis(5));
        cancel.cancelled().await;
    }
}
