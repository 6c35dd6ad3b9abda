//! Per-connection tracking of in-flight calls.
//!
//! Every call runs in its own task. The pool keeps, per call id, the
//! inbound message sender (dropped on half-close), a cancellation token
//! and the join handle. Finished calls report back over an event channel
//! so the connection loop can forget them.

use std::collections::HashMap;
use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Inbound messages buffered per call before the reader waits.
pub const INBOUND_DEPTH: usize = 64;

#[derive(Debug)]
pub enum CallEvent {
    Finished(u64),
}

struct TrackedCall {
    inbound: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct CallPool {
    calls: HashMap<u64, TrackedCall>,
    parent: CancellationToken,
    event_tx: mpsc::Sender<CallEvent>,
    event_rx: mpsc::Receiver<CallEvent>,
}

impl CallPool {
    /// Calls spawned from this pool are cancelled when `parent` is.
    pub fn new(parent: CancellationToken) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1024);
        Self {
            calls: HashMap::new(),
            parent,
            event_tx,
            event_rx,
        }
    }

    pub fn contains(&self, call_id: u64) -> bool {
        self.calls.contains_key(&call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Spawn a call. `run` receives the inbound receiver and the call's
    /// cancellation token.
    pub fn spawn<F, Fut>(&mut self, call_id: u64, run: F) -> Result<()>
    where
        F: FnOnce(mpsc::Receiver<Bytes>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.calls.contains_key(&call_id) {
            return Err(GatewayError::protocol(format!("call id {call_id} already in use")));
        }
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
        let cancel = self.parent.child_token();
        let fut = run(inbound_rx, cancel.clone());
        let event_tx = self.event_tx.clone();
        let handle = tokio::spawn(async move {
            fut.await;
            let _ = event_tx.send(CallEvent::Finished(call_id)).await;
        });
        self.calls.insert(
            call_id,
            TrackedCall {
                inbound: Some(inbound_tx),
                cancel,
                handle,
            },
        );
        Ok(())
    }

    /// Hand one client message to a call's inbound stream.
    ///
    /// Waits while the call's inbound buffer is full. Messages for unknown
    /// or already half-closed calls are dropped.
    pub async fn feed(&mut self, call_id: u64, message: Bytes) {
        let Some(tx) = self.calls.get(&call_id).and_then(|c| c.inbound.clone()) else {
            debug!(call_id, "message for unknown or half-closed call dropped");
            return;
        };
        if tx.send(message).await.is_err() {
            debug!(call_id, "call stopped reading inbound messages");
        }
    }

    /// End a call's inbound stream.
    pub fn half_close(&mut self, call_id: u64) {
        if let Some(call) = self.calls.get_mut(&call_id) {
            call.inbound = None;
        }
    }

    pub fn cancel(&mut self, call_id: u64) {
        if let Some(call) = self.calls.get(&call_id) {
            debug!(call_id, "cancelling call");
            call.cancel.cancel();
        }
    }

    /// Cancel every in-flight call.
    pub fn cancel_all(&mut self) {
        for call in self.calls.values_mut() {
            call.inbound = None;
            call.cancel.cancel();
        }
    }

    /// Next completion event.
    pub async fn recv(&mut self) -> Option<CallEvent> {
        self.event_rx.recv().await
    }

    pub fn process_event(&mut self, event: CallEvent) {
        match event {
            CallEvent::Finished(call_id) => {
                self.calls.remove(&call_id);
            }
        }
    }

    /// Cancel everything and wait for the call tasks to exit.
    pub async fn shutdown(mut self) {
        self.cancel_all();
        for (_, call) in self.calls.drain() {
            let _ = call.handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn finished_calls_are_reaped() {
        let mut pool = CallPool::new(CancellationToken::new());
        pool.spawn(1, |_, _| async {}).unwrap();
        assert!(pool.contains(1));
        let event = pool.recv().await.unwrap();
        pool.process_event(event);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn duplicate_call_id_rejected() {
        let mut pool = CallPool::new(CancellationToken::new());
        pool.spawn(5, |_, cancel| async move { cancel.cancelled().await })
            .unwrap();
        assert!(pool.spawn(5, |_, _| async {}).is_err());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn feed_then_half_close_ends_inbound() {
        let mut pool = CallPool::new(CancellationToken::new());
        let (done_tx, done_rx) = oneshot::channel();
        pool.spawn(2, |mut rx, _| async move {
            let mut got = Vec::new();
            while let Some(m) = rx.recv().await {
                got.extend_from_slice(&m);
            }
            let _ = done_tx.send(got);
        })
        .unwrap();

        pool.feed(2, Bytes::from_static(b"AB")).await;
        pool.feed(2, Bytes::from_static(b"CD")).await;
        pool.half_close(2);
        pool.feed(2, Bytes::from_static(b"ignored")).await;

        assert_eq!(done_rx.await.unwrap(), b"ABCD");
    }

    #[tokio::test]
    async fn cancel_reaches_the_call() {
        let mut pool = CallPool::new(CancellationToken::new());
        let (done_tx, done_rx) = oneshot::channel();
        pool.spawn(3, |_, cancel| async move {
            cancel.cancelled().await;
            let _ = done_tx.send(());
        })
        .unwrap();
        pool.cancel(3);
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let mut pool = CallPool::new(parent.clone());
        let (done_tx, done_rx) = oneshot::channel();
        pool.spawn(4, |_, cancel| async move {
            cancel.cancelled().await;
            let _ = done_tx.send(());
        })
        .unwrap();
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }
}
