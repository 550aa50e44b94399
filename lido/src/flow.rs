// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

use crate::error::{Error, ErrorKind};
use crate::token::Cancellation;

/// Outbound flow control against the peer's advertised limits.
///
/// A quota slot is held for every QoS 1/2 publication from acceptance
/// until its final acknowledgement, so outstanding publications never
/// exceed the peer's Receive Maximum. Serialized packet sizes are checked
/// against the peer's Maximum Packet Size before any byte is written.
pub(crate) struct FlowController {
    /// Peer's Receive Maximum for the current connection.
    limit: AtomicUsize,

    /// Peer's Maximum Packet Size; zero when the peer did not bound it.
    max_packet_size: AtomicUsize,

    outstanding: AtomicUsize,

    released: Notify,
}

impl FlowController {
    pub fn new() -> Self {
        Self {
            limit: AtomicUsize::new(usize::from(u16::MAX)),
            max_packet_size: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    /// Install the peer limits of a fresh CONNACK.
    pub fn set_peer_limits(&self, receive_maximum: u16, max_packet_size: Option<u32>) {
        self.limit
            .store(usize::from(receive_maximum), Ordering::SeqCst);
        self.max_packet_size
            .store(max_packet_size.map_or(0, |v| v as usize), Ordering::SeqCst);
        // A larger window may unblock queued publishers. The stored permit
        // covers a publisher racing between its quota check and its await.
        self.released.notify_waiters();
        self.released.notify_one();
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Re-occupy quota slots for inflight publications restored from the
    /// session store.
    pub fn restore(&self, count: usize) {
        self.outstanding.store(count, Ordering::SeqCst);
    }

    fn try_acquire(&self) -> bool {
        let limit = self.limit.load(Ordering::SeqCst);
        let mut current = self.outstanding.load(Ordering::SeqCst);
        loop {
            if current >= limit {
                return false;
            }
            match self.outstanding.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Take one quota slot, waiting for an acknowledgement to free one if
    /// the window is full.
    ///
    /// # Errors
    ///
    /// Returns `OperationCancelled` if `cancel` fires first.
    pub async fn acquire(&self, cancel: &Cancellation) -> Result<(), Error> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register interest before the check so a release racing with
            // it is not lost.
            released.as_mut().enable();
            if self.try_acquire() {
                return Ok(());
            }
            tokio::select! {
                () = &mut released => (),
                () = cancel.cancelled() => {
                    return Err(Error::new(
                        ErrorKind::OperationCancelled,
                        "Cancelled while waiting for send quota",
                    ));
                }
            }
        }
    }

    /// Return one quota slot after a final acknowledgement.
    pub fn release(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0);
        // notify_one stores a permit, so a publisher that checked the
        // window just before this release still wakes up.
        self.released.notify_one();
    }

    /// Drop all quota state on session teardown.
    pub fn reset(&self) {
        self.outstanding.store(0, Ordering::SeqCst);
        self.released.notify_waiters();
        self.released.notify_one();
    }

    /// Check a serialized packet against the peer's Maximum Packet Size.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` before any bytes are sent.
    pub fn check_size(&self, serialized_len: usize) -> Result<(), Error> {
        let limit = self.max_packet_size.load(Ordering::SeqCst);
        if limit > 0 && serialized_len > limit {
            return Err(Error::from_string(
                ErrorKind::ValidationError,
                format!("Packet of {serialized_len} bytes exceeds peer maximum {limit}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_until_limit() {
        let flow = FlowController::new();
        flow.set_peer_limits(2, None);
        flow.acquire(&Cancellation::none()).await.unwrap();
        flow.acquire(&Cancellation::none()).await.unwrap();
        assert_eq!(flow.outstanding(), 2);

        // Third acquire must wait for a release.
        let cancel = Cancellation::with_deadline(Duration::from_millis(20));
        let err = flow.acquire(&cancel).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::OperationCancelled);
    }

    #[tokio::test]
    async fn test_release_unblocks_waiter() {
        let flow = Arc::new(FlowController::new());
        flow.set_peer_limits(1, None);
        flow.acquire(&Cancellation::none()).await.unwrap();

        let waiter = Arc::clone(&flow);
        let handle =
            tokio::spawn(async move { waiter.acquire(&Cancellation::none()).await });
        tokio::task::yield_now().await;
        flow.release();
        handle.await.unwrap().unwrap();
        assert_eq!(flow.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_check_size() {
        let flow = FlowController::new();
        flow.set_peer_limits(10, Some(100));
        assert!(flow.check_size(100).is_ok());
        assert_eq!(
            flow.check_size(101).unwrap_err().kind(),
            &ErrorKind::ValidationError
        );

        flow.set_peer_limits(10, None);
        assert!(flow.check_size(usize::MAX).is_ok());
    }

    #[tokio::test]
    async fn test_restore() {
        let flow = FlowController::new();
        flow.set_peer_limits(3, None);
        flow.restore(3);
        let cancel = Cancellation::with_deadline(Duration::from_millis(10));
        assert!(flow.acquire(&cancel).await.is_err());
        flow.release();
        flow.acquire(&Cancellation::none()).await.unwrap();
    }
}
