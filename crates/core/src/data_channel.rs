use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tokio::runtime::Handle;
use tracing::warn;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

use rtc_proto::{CoreError, CoreResult};

/// Bounded receive-queue capacity. Power-of-two per the design note; once
/// full, the oldest buffered message is dropped to make room for the new one.
const QUEUE_CAPACITY: usize = 64;

/// Transport kind, for the dynamic-dispatch abstraction in `Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    DataChannel,
}

/// An opaque, reliable, in-order, message-framed byte duct. `DataChannel
/// Transport` is the only implementation today; `Transport` exists so a
/// future plain-socket transport can be swapped in without touching the
/// Peer Manager.
pub trait Transport: Send + Sync {
    fn send(&self, bytes: &[u8]) -> CoreResult<()>;
    /// Blocks until a full message is available or the channel closes.
    fn recv(&self) -> CoreResult<Vec<u8>>;
    fn close(&self);
    fn is_connected(&self) -> bool;
    fn kind(&self) -> TransportKind;
}

/// Bridges the engine's push-delivery DataChannel into a blocking pull
/// interface for plain application threads. Built on a bounded `VecDeque`
/// behind a mutex + condvar (not async primitives — `recv` must work for
/// callers with no event loop of their own).
pub struct DataChannelTransport {
    dc: Arc<RTCDataChannel>,
    runtime: Handle,
    connected: Arc<AtomicBool>,
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    condvar: Arc<Condvar>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    /// One-shot "channel is open" notification for the Peer Manager. Fired
    /// either from the real `on_open` trampoline or synthesized immediately
    /// by `on_ready_once` if the channel was already open when observed.
    on_ready: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl DataChannelTransport {
    /// Wraps `dc`, registering open/message/close/error trampolines. If the
    /// channel is already open at registration time (the creator-side
    /// "received, not created" case), `connected` starts `true` immediately
    /// rather than waiting for an `on_open` that may never re-fire.
    pub fn new(dc: Arc<RTCDataChannel>, runtime: Handle) -> Arc<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let condvar = Arc::new(Condvar::new());
        let pool = Arc::new(Mutex::new(Vec::new()));
        let connected = Arc::new(AtomicBool::new(dc.ready_state() == RTCDataChannelState::Open));

        let transport = Arc::new(DataChannelTransport {
            dc: Arc::clone(&dc),
            runtime,
            connected: Arc::clone(&connected),
            queue: Arc::clone(&queue),
            condvar: Arc::clone(&condvar),
            pool: Arc::clone(&pool),
            on_close: Mutex::new(None),
            on_ready: Mutex::new(None),
        });

        let transport_open = Arc::clone(&transport);
        dc.on_open(Box::new(move || {
            // Holds `on_ready` across the connected-flag flip so a
            // concurrent `on_ready_once` registration can't land in the gap
            // and miss this firing.
            let mut slot = transport_open.on_ready.lock().unwrap_or_else(|e| e.into_inner());
            transport_open.connected.store(true, Ordering::SeqCst);
            let ready = slot.take();
            drop(slot);
            if let Some(f) = ready {
                f();
            }
            Box::pin(async {})
        }));

        let queue_msg = Arc::clone(&queue);
        let condvar_msg = Arc::clone(&condvar);
        let pool_msg = Arc::clone(&pool);
        dc.on_message(Box::new(move |msg| {
            let mut buf = pool_msg.lock().unwrap_or_else(|e| e.into_inner()).pop().unwrap_or_default();
            buf.clear();
            buf.extend_from_slice(&msg.data);

            let mut q = queue_msg.lock().unwrap_or_else(|e| e.into_inner());
            if q.len() >= QUEUE_CAPACITY {
                if let Some(dropped) = q.pop_front() {
                    pool_msg.lock().unwrap_or_else(|e| e.into_inner()).push(dropped);
                }
            }
            q.push_back(buf);
            drop(q);
            condvar_msg.notify_one();
            Box::pin(async {})
        }));

        let connected_close = Arc::clone(&connected);
        let condvar_close = Arc::clone(&condvar);
        dc.on_close(Box::new(move || {
            connected_close.store(false, Ordering::SeqCst);
            condvar_close.notify_all();
            Box::pin(async {})
        }));

        let connected_err = Arc::clone(&connected);
        let condvar_err = Arc::clone(&condvar);
        dc.on_error(Box::new(move |err| {
            warn!("data channel error: {err}");
            connected_err.store(false, Ordering::SeqCst);
            condvar_err.notify_all();
            Box::pin(async {})
        }));

        transport
    }

    /// Registers a one-shot "channel opened" notification. If the channel is
    /// already open, `f` runs immediately (synthesizing the open event);
    /// otherwise it runs from the `on_open` trampoline. The check-and-store
    /// happens under the same lock `on_open` uses, so a concurrent open
    /// can't be missed between the check and the registration.
    pub fn on_ready_once(&self, f: impl FnOnce() + Send + 'static) {
        let mut slot = self.on_ready.lock().unwrap_or_else(|e| e.into_inner());
        if self.connected.load(Ordering::SeqCst) {
            drop(slot);
            f();
        } else {
            *slot = Some(Box::new(f));
        }
    }

    /// Registers a callback the Peer Manager uses to cascade a transport
    /// close into closing the owning Peer Connection. Non-owning by design
    /// (see the cyclic-reference design note) — the transport never holds a
    /// strong reference back to its connection.
    pub fn set_close_cascade(&self, f: impl FnOnce() + Send + 'static) {
        *self.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(f));
    }
}

impl Transport for DataChannelTransport {
    fn send(&self, bytes: &[u8]) -> CoreResult<()> {
        if !self.is_connected() {
            return Err(CoreError::Network("data channel is not open".into()));
        }
        let dc = Arc::clone(&self.dc);
        let data = bytes::Bytes::copy_from_slice(bytes);
        self.runtime
            .block_on(async move { dc.send(&data).await })
            .map(|_| ())
            .map_err(|e| CoreError::Network(format!("data channel send failed: {e}")))
    }

    fn recv(&self) -> CoreResult<Vec<u8>> {
        let mut q = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(buf) = q.pop_front() {
                return Ok(buf);
            }
            if !self.is_connected() {
                return Err(CoreError::Network("data channel closed".into()));
            }
            q = self.condvar.wait(q).unwrap();
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.condvar.notify_all();

        let dc = Arc::clone(&self.dc);
        self.runtime.spawn(async move {
            let _ = dc.close().await;
        });

        if let Some(cascade) = self.on_close.lock().unwrap_or_else(|e| e.into_inner()).take() {
            cascade();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::DataChannel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque as Deque;

    // Exercises the bounded-queue drop-oldest policy and ownership transfer
    // directly, without a live RTCDataChannel — there is no engine-driven
    // integration test covering the push path end to end yet.
    #[test]
    fn queue_drops_oldest_when_full_and_transfers_ownership() {
        let queue: Arc<Mutex<Deque<Vec<u8>>>> = Arc::new(Mutex::new(Deque::new()));
        let pool: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        for i in 0..(QUEUE_CAPACITY + 5) {
            let mut buf = pool.lock().unwrap_or_else(|e| e.into_inner()).pop().unwrap_or_default();
            buf.clear();
            buf.push(i as u8);

            let mut q = queue.lock().unwrap_or_else(|e| e.into_inner());
            if q.len() >= QUEUE_CAPACITY {
                if let Some(dropped) = q.pop_front() {
                    pool.lock().unwrap_or_else(|e| e.into_inner()).push(dropped);
                }
            }
            q.push_back(buf);
        }

        let q = queue.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(q.len(), QUEUE_CAPACITY);
        // The oldest 5 entries (values 0..5) were dropped to make room.
        assert_eq!(q.front().unwrap()[0], 5);
    }
}
