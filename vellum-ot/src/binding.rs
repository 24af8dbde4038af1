//! The shared-document binding.
//!
//! Consumes the controller's op-batch stream, composes each batch, and
//! submits to the shared document one acknowledgement at a time so the
//! document's version history stays linear. The reverse direction,
//! [`DocBinding::apply_remote`], stops observation around the renderer's
//! application of remote ops so they are never re-captured as local edits.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vellum_core::LiveTreeHandle;

use crate::apply::apply_to_tree;
use crate::doc::{DocHandle, SessionId, SubmitError};
use crate::error::OtError;
use crate::observer::Mutation;
use crate::op::{compose, Op, OpBatch};

/// Outcome events for the editor session.
#[derive(Debug, Clone)]
pub enum BindingEvent {
    /// A batch was accepted; the document is now at `version`.
    Submitted { seq: u64, version: u64 },
    /// A batch was rejected beyond the retry policy and dropped from the
    /// wire. The session must re-sync from authoritative state.
    SyncFault { seq: u64, reason: String },
}

/// Applies a remote op batch to the live tree.
pub trait RemoteRenderer: Send + Sync {
    fn apply(&self, tree: &LiveTreeHandle, ops: &[Op]) -> Result<(), OtError>;
}

/// Built-in renderer: applies ops directly to the live tree.
///
/// Application is best-effort sequential; a failing op surfaces an error
/// with earlier ops of the batch already applied.
pub struct DirectRenderer;

impl RemoteRenderer for DirectRenderer {
    fn apply(&self, tree: &LiveTreeHandle, ops: &[Op]) -> Result<(), OtError> {
        let mut guard = tree.write()?;
        for op in ops {
            apply_to_tree(&mut guard, op)?;
        }
        Ok(())
    }
}

/// Owns submission of local op batches to the shared document.
pub struct DocBinding {
    event_rx: Option<mpsc::UnboundedReceiver<BindingEvent>>,
    worker: JoinHandle<()>,
}

impl DocBinding {
    /// Spawn the submission loop. `doc_rx` is the controller's rebindable
    /// document handle; submission waits until a handle is attached.
    pub fn new(
        session: SessionId,
        ops_rx: mpsc::UnboundedReceiver<OpBatch>,
        doc_rx: watch::Receiver<Option<DocHandle>>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(submit_loop(session, ops_rx, doc_rx, event_tx));
        Self {
            event_rx: Some(event_rx),
            worker,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<BindingEvent>> {
        self.event_rx.take()
    }

    /// Abort the submission loop. For session teardown.
    pub fn shutdown(&self) {
        self.worker.abort();
    }

    /// Apply a remote op batch to the live tree.
    ///
    /// The order is mandatory: stop observation, render, restart. Anything
    /// else re-captures the application and submits it back as a local
    /// edit.
    pub fn apply_remote(
        mutation: &Mutation,
        renderer: &dyn RemoteRenderer,
        tree: &LiveTreeHandle,
        ops: &[Op],
    ) -> Result<(), OtError> {
        mutation.stop();
        let result = renderer.apply(tree, ops);
        mutation.start()?;
        result
    }
}

/// One batch in flight at a time: the next submission only starts after
/// the previous acknowledgement resolves.
async fn submit_loop(
    session: SessionId,
    mut ops_rx: mpsc::UnboundedReceiver<OpBatch>,
    mut doc_rx: watch::Receiver<Option<DocHandle>>,
    event_tx: mpsc::UnboundedSender<BindingEvent>,
) {
    while let Some(batch) = ops_rx.recv().await {
        let seq = batch.seq;
        let ops = compose(batch.ops);

        let doc = match doc_rx.wait_for(|d| d.is_some()).await {
            Ok(guard) => match guard.as_ref() {
                Some(doc) => doc.clone(),
                None => continue,
            },
            Err(_) => {
                log::warn!("Document handle source closed, dropping batch seq={seq}");
                break;
            }
        };

        let event = submit_with_retry(&doc, session, seq, ops).await;
        if event_tx.send(event).is_err() {
            break;
        }
    }
}

async fn submit_with_retry(
    doc: &DocHandle,
    session: SessionId,
    seq: u64,
    ops: Vec<Op>,
) -> BindingEvent {
    let base = doc.version();
    match doc.submit(session, base, ops.clone()).await {
        Ok(Ok(version)) => BindingEvent::Submitted { seq, version },
        Ok(Err(SubmitError::Stale { latest })) => {
            log::warn!("Batch seq={seq} rejected at base {base}, retrying at {latest}");
            match doc.submit(session, latest, ops).await {
                Ok(Ok(version)) => BindingEvent::Submitted { seq, version },
                Ok(Err(e)) => fault(seq, e.to_string()),
                Err(_) => fault(seq, "acknowledgement channel closed".to_string()),
            }
        }
        Ok(Err(e)) => fault(seq, e.to_string()),
        Err(_) => fault(seq, "acknowledgement channel closed".to_string()),
    }
}

fn fault(seq: u64, reason: String) -> BindingEvent {
    log::error!("Synchronization fault on batch seq={seq}: {reason}");
    BindingEvent::SyncFault { seq, reason }
}
