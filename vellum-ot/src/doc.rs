//! The shared-document boundary.
//!
//! The OT library and server live behind [`SharedDoc`]: the pipeline only
//! needs a versioned submit with asynchronous acknowledgement and a remote
//! subscription. [`InMemorySharedDoc`] is the reference implementation the
//! tests and single-process setups run against.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use vellum_core::NodeContent;

use crate::apply::apply_to_content;
use crate::op::Op;

/// Identity of an editing session, used to filter self-originated remote
/// batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a submission was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// The base version was behind the document; `latest` is current.
    Stale { latest: u64 },
    /// The document is gone or refused the batch outright.
    Closed(String),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale { latest } => write!(f, "Stale base version, document is at {latest}"),
            Self::Closed(e) => write!(f, "Document closed: {e}"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// A batch accepted by the shared document, fanned out to subscribers.
#[derive(Debug, Clone)]
pub struct RemoteBatch {
    /// The session that submitted the batch.
    pub source: SessionId,
    /// The document version after the batch.
    pub version: u64,
    pub ops: Vec<Op>,
}

/// Handle to the shared, server-mediated document replica.
///
/// One handle per editing session, rebindable via the controller's
/// `set_doc`; submission acknowledgements are asynchronous.
pub trait SharedDoc: Send + Sync {
    /// Current document version.
    fn version(&self) -> u64;

    /// Snapshot of the current document content.
    fn snapshot(&self) -> NodeContent;

    /// Submit one op batch against `base_version`.
    ///
    /// The returned receiver resolves to the new version on acceptance.
    fn submit(
        &self,
        source: SessionId,
        base_version: u64,
        ops: Vec<Op>,
    ) -> oneshot::Receiver<Result<u64, SubmitError>>;

    /// Subscribe to batches accepted from any session (including the
    /// caller's own; filtering by `source` is the subscriber's job).
    fn subscribe_remote(&self) -> mpsc::UnboundedReceiver<RemoteBatch>;
}

pub type DocHandle = Arc<dyn SharedDoc>;

struct DocInner {
    content: NodeContent,
    version: u64,
    subscribers: Vec<mpsc::UnboundedSender<RemoteBatch>>,
    injected_rejections: VecDeque<SubmitError>,
}

/// In-process shared document.
///
/// Applies accepted batches to a content tree under a version check and
/// fans them out to subscribers. Batches apply atomically: a failing op
/// leaves the document untouched.
pub struct InMemorySharedDoc {
    inner: Mutex<DocInner>,
}

impl InMemorySharedDoc {
    pub fn new(content: NodeContent) -> Self {
        Self {
            inner: Mutex::new(DocInner {
                content,
                version: 0,
                subscribers: Vec::new(),
                injected_rejections: VecDeque::new(),
            }),
        }
    }

    /// Queue a rejection for the next submission, for exercising the
    /// retry and fault paths.
    pub fn inject_rejection(&self, error: SubmitError) {
        self.lock().injected_rejections.push_back(error);
    }

    fn lock(&self) -> MutexGuard<'_, DocInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SharedDoc for InMemorySharedDoc {
    fn version(&self) -> u64 {
        self.lock().version
    }

    fn snapshot(&self) -> NodeContent {
        self.lock().content.clone()
    }

    fn submit(
        &self,
        source: SessionId,
        base_version: u64,
        ops: Vec<Op>,
    ) -> oneshot::Receiver<Result<u64, SubmitError>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let mut inner = self.lock();

        let result = if let Some(err) = inner.injected_rejections.pop_front() {
            Err(err)
        } else if base_version != inner.version {
            Err(SubmitError::Stale { latest: inner.version })
        } else {
            let mut staged = inner.content.clone();
            match ops.iter().try_for_each(|op| apply_to_content(&mut staged, op)) {
                Ok(()) => {
                    inner.content = staged;
                    inner.version += 1;
                    let batch = RemoteBatch {
                        source,
                        version: inner.version,
                        ops,
                    };
                    inner.subscribers.retain(|tx| tx.send(batch.clone()).is_ok());
                    Ok(inner.version)
                }
                Err(e) => Err(SubmitError::Closed(e.to_string())),
            }
        };
        let _ = ack_tx.send(result);
        ack_rx
    }

    fn subscribe_remote(&self) -> mpsc::UnboundedReceiver<RemoteBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> InMemorySharedDoc {
        InMemorySharedDoc::new(
            NodeContent::element("root").with_child(NodeContent::text("hello")),
        )
    }

    fn insert_op() -> Op {
        Op::InsertNode {
            path: vec![1],
            content: NodeContent::element("p"),
        }
    }

    #[tokio::test]
    async fn test_submit_bumps_version() {
        let doc = doc();
        let session = SessionId::new();
        let version = doc.submit(session, 0, vec![insert_op()]).await.unwrap();
        assert_eq!(version, Ok(1));
        assert_eq!(doc.version(), 1);
        assert_eq!(doc.snapshot().children().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_base_version_rejected() {
        let doc = doc();
        let session = SessionId::new();
        doc.submit(session, 0, vec![insert_op()]).await.unwrap().unwrap();

        let result = doc.submit(session, 0, vec![insert_op()]).await.unwrap();
        assert!(matches!(result, Err(SubmitError::Stale { latest: 1 })));
        assert_eq!(doc.version(), 1);
    }

    #[tokio::test]
    async fn test_failing_batch_leaves_document_untouched() {
        let doc = doc();
        let before = doc.snapshot();
        let ops = vec![
            insert_op(),
            Op::DeleteNode { path: vec![9], count: 1 },
        ];
        let result = doc.submit(SessionId::new(), 0, ops).await.unwrap();
        assert!(matches!(result, Err(SubmitError::Closed(_))));
        assert_eq!(doc.snapshot(), before);
        assert_eq!(doc.version(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_to_subscribers() {
        let doc = doc();
        let mut rx = doc.subscribe_remote();
        let session = SessionId::new();
        doc.submit(session, 0, vec![insert_op()]).await.unwrap().unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.source, session);
        assert_eq!(batch.version, 1);
        assert_eq!(batch.ops, vec![insert_op()]);
    }

    #[tokio::test]
    async fn test_injected_rejection() {
        let doc = doc();
        doc.inject_rejection(SubmitError::Stale { latest: 7 });
        let result = doc.submit(SessionId::new(), 0, vec![insert_op()]).await.unwrap();
        assert!(matches!(result, Err(SubmitError::Stale { latest: 7 })));
        // The next submission goes through.
        let result = doc.submit(SessionId::new(), 0, vec![insert_op()]).await.unwrap();
        assert_eq!(result, Ok(1));
    }
}
