//! The change observer controller.
//!
//! [`Mutation`] owns the lifecycle of observing a live tree: start/stop,
//! and the two-phase cache used to defer emission across compound
//! operations (a drag-resize, a multi-node paste). Synthesis runs inside
//! the observer callback, at the burst boundary, so every op list depends
//! only on its own burst's records and end state. The synthesized lists
//! flow over an unbounded channel to a dedicated sequencing task; channel
//! FIFO is the ordering guarantee, and op batches come out in the same
//! relative order the triggering bursts occurred.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vellum_core::{ChangeBatch, LiveTreeHandle, ObserverCallback};

use crate::creator::OpSynthesizer;
use crate::doc::DocHandle;
use crate::error::OtError;
use crate::op::{Op, OpBatch};

/// Observation tuning.
#[derive(Debug, Clone)]
pub struct MutationConfig {
    /// How long `submit_cache`/`destroy_cache` wait before acting, so
    /// observation callbacks already queued when the call was made still
    /// land in the cache instead of leaking to live processing.
    pub cache_flush_delay: Duration,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            cache_flush_delay: Duration::from_millis(20),
        }
    }
}

struct MutationState {
    stopped: bool,
    caching: bool,
    cache: Vec<Op>,
    /// Bumped by `start_cache`; a pending cache timer only acts if the
    /// generation it captured is still current.
    generation: u64,
    /// Bumped by `stop`; op lists are tagged with the epoch current at
    /// capture time and lists from a previous epoch are dropped unemitted.
    epoch: u64,
    /// Session-scoped op-batch sequence, assigned in emission order.
    seq: u64,
}

/// Observes one live tree and drives op synthesis.
pub struct Mutation {
    tree: LiveTreeHandle,
    synthesizer: Arc<OpSynthesizer>,
    config: MutationConfig,
    state: Arc<Mutex<MutationState>>,
    raw_tx: mpsc::UnboundedSender<(u64, Vec<Op>)>,
    ops_tx: mpsc::UnboundedSender<OpBatch>,
    ops_rx: Option<mpsc::UnboundedReceiver<OpBatch>>,
    doc_tx: watch::Sender<Option<DocHandle>>,
    doc_rx: watch::Receiver<Option<DocHandle>>,
    worker: JoinHandle<()>,
}

impl Mutation {
    /// Create a controller for `tree`. Observation starts stopped; call
    /// [`Mutation::start`]. Must be called within a tokio runtime.
    pub fn new(tree: LiveTreeHandle, synthesizer: Arc<OpSynthesizer>, config: MutationConfig) -> Self {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(u64, Vec<Op>)>();
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (doc_tx, doc_rx) = watch::channel(None);
        let state = Arc::new(Mutex::new(MutationState {
            stopped: true,
            caching: false,
            cache: Vec::new(),
            generation: 0,
            epoch: 0,
            seq: 0,
        }));

        let worker = tokio::spawn({
            let state = state.clone();
            let ops_tx = ops_tx.clone();
            async move {
                while let Some((epoch, ops)) = raw_rx.recv().await {
                    let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
                    if st.stopped || epoch != st.epoch {
                        log::debug!("Dropping ops from a stopped observation epoch");
                        continue;
                    }
                    if st.caching {
                        st.cache.extend(ops);
                        continue;
                    }
                    // Emission runs under the state lock so cache-timer
                    // flushes cannot interleave with live batches.
                    Self::emit(&mut st, &ops_tx, ops);
                }
            }
        });

        Self {
            tree,
            synthesizer,
            config,
            state,
            raw_tx,
            ops_tx,
            ops_rx: Some(ops_rx),
            doc_tx,
            doc_rx,
            worker,
        }
    }

    /// Take the op-batch receiver (can only be called once).
    pub fn take_ops_rx(&mut self) -> Option<mpsc::UnboundedReceiver<OpBatch>> {
        self.ops_rx.take()
    }

    /// Receiver side of the rebindable shared-document handle.
    pub fn subscribe_doc(&self) -> watch::Receiver<Option<DocHandle>> {
        self.doc_rx.clone()
    }

    /// Begin observing. No-op if already observing.
    pub fn start(&self) -> Result<(), OtError> {
        let mut st = self.lock_state();
        if !st.stopped {
            return Ok(());
        }
        let epoch = st.epoch;
        let raw_tx = self.raw_tx.clone();
        let synthesizer = self.synthesizer.clone();
        let callback: ObserverCallback = Arc::new(move |batch: ChangeBatch| {
            // Synthesize here, at the burst boundary, so the ops never see
            // tree state from a later burst.
            let ops = synthesizer.synthesize(&batch);
            if ops.is_empty() {
                return;
            }
            let _ = raw_tx.send((epoch, ops));
        });
        self.tree.write()?.observe(callback)?;
        st.stopped = false;
        log::debug!("Observation started (epoch {epoch})");
        Ok(())
    }

    /// Stop observing. No-op if already stopped.
    ///
    /// No op batch is emitted for any raw batch delivered after this
    /// returns, including batches already queued for processing.
    pub fn stop(&self) {
        let mut st = self.lock_state();
        if st.stopped {
            return;
        }
        st.stopped = true;
        st.epoch += 1;
        match self.tree.write() {
            Ok(mut tree) => tree.unobserve(),
            Err(e) => log::error!("Failed to detach tree observer: {e}"),
        }
        log::debug!("Observation stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    /// Enter buffering mode, resetting any existing buffer. Idempotent.
    pub fn start_cache(&self) {
        let mut st = self.lock_state();
        st.cache.clear();
        st.generation += 1;
        st.caching = true;
    }

    pub fn is_caching(&self) -> bool {
        self.lock_state().caching
    }

    /// Schedule the buffer for emission as one logical batch, after the
    /// configured delay. No-op when not buffering.
    pub fn submit_cache(&self) {
        self.finish_cache(true);
    }

    /// Schedule the buffer for discard, after the configured delay.
    /// No-op when not buffering.
    pub fn destroy_cache(&self) {
        self.finish_cache(false);
    }

    /// Rebind the shared-document handle. Observation state is untouched.
    pub fn set_doc(&self, doc: DocHandle) {
        self.doc_tx.send_replace(Some(doc));
    }

    /// Force-stop and abort the processing task. For session teardown.
    pub fn shutdown(&self) {
        self.stop();
        self.worker.abort();
    }

    fn finish_cache(&self, submit: bool) {
        let generation = {
            let st = self.lock_state();
            if !st.caching {
                log::debug!("Cache finish requested with no active cache");
                return;
            }
            st.generation
        };

        let state = self.state.clone();
        let ops_tx = self.ops_tx.clone();
        let delay = self.config.cache_flush_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut st = state.lock().unwrap_or_else(|e| e.into_inner());
            if !st.caching || st.generation != generation {
                // A later start_cache superseded this timer.
                return;
            }
            st.caching = false;
            let cached = std::mem::take(&mut st.cache);
            if !submit {
                log::debug!("Discarding {} buffered ops", cached.len());
                return;
            }
            if st.stopped {
                log::debug!("Dropping {} buffered ops: observation stopped", cached.len());
                return;
            }
            Mutation::emit(&mut st, &ops_tx, cached);
        });
    }

    fn emit(state: &mut MutationState, ops_tx: &mpsc::UnboundedSender<OpBatch>, ops: Vec<Op>) {
        if ops.is_empty() {
            return;
        }
        let seq = state.seq;
        state.seq += 1;
        log::debug!("Emitting op batch seq={seq} with {} ops", ops.len());
        let _ = ops_tx.send(OpBatch { seq, ops });
    }

    fn lock_state(&self) -> MutexGuard<'_, MutationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
