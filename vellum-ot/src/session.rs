//! The editor session: constructs and wires the whole pipeline.
//!
//! One session owns one live tree, one observer controller, one
//! synthesizer and one binding, plus every session-scoped counter. Nothing
//! here is process-global; sessions are fully independent.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vellum_core::{LiveTree, LiveTreeHandle};

use crate::binding::{BindingEvent, DocBinding, DirectRenderer, RemoteRenderer};
use crate::creator::OpSynthesizer;
use crate::doc::{DocHandle, SessionId};
use crate::error::OtError;
use crate::observer::{Mutation, MutationConfig};

/// One editing session over one live tree.
pub struct EditorSession {
    id: SessionId,
    tree: LiveTreeHandle,
    mutation: Arc<Mutation>,
    binding: DocBinding,
    renderer: Arc<dyn RemoteRenderer>,
    remote_task: Mutex<Option<JoinHandle<()>>>,
}

impl EditorSession {
    /// Create a session with the built-in direct renderer. Must be called
    /// within a tokio runtime.
    pub fn new(tree: LiveTree) -> Self {
        Self::with_renderer(tree, Arc::new(DirectRenderer))
    }

    pub fn with_renderer(tree: LiveTree, renderer: Arc<dyn RemoteRenderer>) -> Self {
        let id = SessionId::new();
        let handle = LiveTreeHandle::new(tree);
        let synthesizer = Arc::new(OpSynthesizer::new(handle.clone()));
        let mut mutation = Mutation::new(handle.clone(), synthesizer, MutationConfig::default());
        // A fresh controller always yields its receiver.
        let ops_rx = mutation
            .take_ops_rx()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);
        let binding = DocBinding::new(id, ops_rx, mutation.subscribe_doc());
        Self {
            id,
            tree: handle,
            mutation: Arc::new(mutation),
            binding,
            renderer,
            remote_task: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Handle to the live tree for performing edits.
    pub fn tree(&self) -> LiveTreeHandle {
        self.tree.clone()
    }

    /// Begin capturing local edits.
    pub fn start(&self) -> Result<(), OtError> {
        self.mutation.start()
    }

    /// Stop capturing. Edits made while stopped are invisible to the
    /// shared document; callers reconcile them through another path.
    pub fn stop(&self) {
        self.mutation.stop();
    }

    pub fn start_cache(&self) {
        self.mutation.start_cache();
    }

    pub fn submit_cache(&self) {
        self.mutation.submit_cache();
    }

    pub fn destroy_cache(&self) {
        self.mutation.destroy_cache();
    }

    /// Binding outcome events (can only be taken once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<BindingEvent>> {
        self.binding.take_event_rx()
    }

    /// Attach or rebind the shared document.
    ///
    /// Wires the document's remote subscription to the live tree:
    /// incoming batches from other sessions are applied with observation
    /// suppressed. Rebinding replaces the previous subscription.
    pub fn set_doc(&self, doc: DocHandle) {
        self.mutation.set_doc(doc.clone());

        let mut remote_rx = doc.subscribe_remote();
        let session = self.id;
        let mutation = self.mutation.clone();
        let renderer = self.renderer.clone();
        let tree = self.tree.clone();
        let task = tokio::spawn(async move {
            while let Some(batch) = remote_rx.recv().await {
                if batch.source == session {
                    continue;
                }
                if let Err(e) =
                    DocBinding::apply_remote(&mutation, renderer.as_ref(), &tree, &batch.ops)
                {
                    log::error!("Remote batch at version {} failed to apply: {e}", batch.version);
                }
            }
        });
        if let Some(old) = self.lock_remote_task().replace(task) {
            old.abort();
        }
    }

    /// Tear the session down: force-stop observation and abort every
    /// pipeline task. Pending cache timers are abandoned.
    pub fn destroy(&self) {
        self.mutation.shutdown();
        self.binding.shutdown();
        if let Some(task) = self.lock_remote_task().take() {
            task.abort();
        }
    }

    fn lock_remote_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.remote_task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.destroy();
    }
}
