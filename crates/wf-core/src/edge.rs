use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreReason, CoreResult};
use crate::message::Message;

/// What an edge does when its buffer is full (spec.md §5 shared-resource
/// policy): a slow downstream node either back-pressures its upstream, or
/// silently drops the newest message and is marked degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// `send` waits for capacity. Used for ordinary node-to-node edges,
    /// where losing data silently would violate per-group ordering
    /// invariants.
    Block,
    /// `send` drops the message immediately if the edge is full. Used for
    /// the ingest fork edge, where a wedged task must never stall the
    /// firehose for every other task.
    DropNewest,
}

/// Counters shared between the two ends of an [`Edge`].
#[derive(Debug, Default)]
pub struct EdgeStats {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
}

/// State shared between an edge's two ends so either one can call `abort`
/// and have it observed by the other (spec.md §4.1: "`abort(err)`
/// immediately unblocks both ends with an error").
#[derive(Default)]
struct EdgeShared {
    stats: EdgeStats,
    cancel: CancellationToken,
    abort_detail: Mutex<Option<String>>,
}

impl EdgeShared {
    fn abort(&self, err: CoreError) {
        let mut detail = self.abort_detail.lock().expect("edge abort lock poisoned");
        if detail.is_none() {
            *detail = Some(err.to_string());
        }
        self.cancel.cancel();
    }

    fn abort_error(&self) -> CoreError {
        let detail = self.abort_detail.lock().expect("edge abort lock poisoned").clone();
        let err = CoreError::from(CoreReason::Aborted);
        match detail {
            Some(detail) => err.with_detail(detail),
            None => err,
        }
    }
}

/// A handle that can `abort` an edge without owning either of its channel
/// ends — held by the runtime alongside a node's `JoinHandle` so a sibling
/// node's panic can unblock this edge's other side immediately rather than
/// waiting on the slower implicit close-on-drop (spec.md §4.1).
#[derive(Clone)]
pub struct EdgeAbortHandle(Arc<EdgeShared>);

impl EdgeAbortHandle {
    pub fn abort(&self, err: CoreError) {
        self.0.abort(err);
    }
}

/// A bounded, ordered channel carrying [`Message`]s between two nodes
/// (spec.md §4.1 C1).
pub struct EdgeSender {
    inner: mpsc::Sender<Message>,
    policy: OverflowPolicy,
    shared: Arc<EdgeShared>,
}

pub struct EdgeReceiver {
    inner: mpsc::Receiver<Message>,
    shared: Arc<EdgeShared>,
}

pub fn edge(capacity: usize, policy: OverflowPolicy) -> (EdgeSender, EdgeReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(EdgeShared::default());
    (
        EdgeSender {
            inner: tx,
            policy,
            shared: shared.clone(),
        },
        EdgeReceiver { inner: rx, shared },
    )
}

impl EdgeSender {
    /// Send a message according to this edge's overflow policy. Returns
    /// `Ok(false)` when the message was dropped rather than delivered, and
    /// an error immediately if the edge has been aborted or closed.
    pub async fn send(&self, msg: Message) -> CoreResult<bool> {
        if self.shared.cancel.is_cancelled() {
            return Err(self.shared.abort_error());
        }
        match self.policy {
            OverflowPolicy::Block => {
                tokio::select! {
                    res = self.inner.send(msg) => {
                        res.map_err(|_| CoreError::from(CoreReason::DataFormat))?;
                        self.shared.stats.sent.fetch_add(1, Ordering::Relaxed);
                        Ok(true)
                    }
                    _ = self.shared.cancel.cancelled() => Err(self.shared.abort_error()),
                }
            }
            OverflowPolicy::DropNewest => match self.inner.try_send(msg) {
                Ok(()) => {
                    self.shared.stats.sent.fetch_add(1, Ordering::Relaxed);
                    Ok(true)
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.shared.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    Ok(false)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Err(CoreError::from(CoreReason::DataFormat))
                }
            },
        }
    }

    /// Immediately unblocks any in-flight `send`/`recv` on this edge (on
    /// either end) with `err`, and any future one until the edge is
    /// recreated (spec.md §4.1).
    pub fn abort(&self, err: CoreError) {
        self.shared.abort(err);
    }

    pub fn stats(&self) -> &EdgeStats {
        &self.shared.stats
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed() || self.shared.cancel.is_cancelled()
    }

    pub fn abort_handle(&self) -> EdgeAbortHandle {
        EdgeAbortHandle(self.shared.clone())
    }
}

impl Clone for EdgeSender {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            policy: self.policy,
            shared: self.shared.clone(),
        }
    }
}

impl EdgeReceiver {
    /// Returns `None` once the edge is closed or aborted. Use
    /// [`EdgeReceiver::aborted`] after a `None` to distinguish a clean close
    /// from an abort.
    pub async fn recv(&mut self) -> Option<Message> {
        if self.shared.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            msg = self.inner.recv() => msg,
            _ = self.shared.cancel.cancelled() => None,
        }
    }

    /// Same as [`EdgeSender::abort`] — either end may terminate the edge.
    pub fn abort(&self, err: CoreError) {
        self.shared.abort(err);
    }

    /// `Some(err)` if this edge was terminated via `abort` rather than a
    /// clean drop of the sender.
    pub fn aborted(&self) -> Option<CoreError> {
        self.shared
            .abort_detail
            .lock()
            .expect("edge abort lock poisoned")
            .is_some()
            .then(|| self.shared.abort_error())
    }

    pub fn stats(&self) -> &EdgeStats {
        &self.shared.stats
    }

    pub fn abort_handle(&self) -> EdgeAbortHandle {
        EdgeAbortHandle(self.shared.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupKey;
    use crate::message::Barrier;
    use chrono::Utc;

    fn barrier() -> Message {
        Message::Barrier(GroupKey::singleton(), Barrier { time: Utc::now() })
    }

    #[tokio::test]
    async fn block_policy_delivers_in_order() {
        let (tx, mut rx) = edge(2, OverflowPolicy::Block);
        tx.send(barrier()).await.unwrap();
        tx.send(barrier()).await.unwrap();
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert_eq!(tx.stats().sent.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn drop_newest_drops_on_full_buffer() {
        let (tx, mut rx) = edge(1, OverflowPolicy::DropNewest);
        assert!(tx.send(barrier()).await.unwrap());
        assert!(!tx.send(barrier()).await.unwrap());
        assert_eq!(tx.stats().dropped.load(Ordering::Relaxed), 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn abort_unblocks_receiver_and_is_observable() {
        let (tx, mut rx) = edge(4, OverflowPolicy::Block);
        tx.abort(CoreError::from(CoreReason::DataFormat));
        assert!(rx.recv().await.is_none());
        assert!(rx.aborted().is_some());
    }

    #[tokio::test]
    async fn abort_fails_subsequent_sends() {
        let (tx, rx) = edge(4, OverflowPolicy::Block);
        rx.abort(CoreError::from(CoreReason::UdfBridge));
        assert!(tx.send(barrier()).await.is_err());
    }
}
