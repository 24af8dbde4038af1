//! # vellum-ot — local-edit capture and OT synthesis
//!
//! The pipeline between a live editable tree and a shared, server-mediated
//! document replica:
//!
//! ```text
//!   local edits          remote batches
//!       |                      ^
//!       v                      |
//!   LiveTree --raw batches--> Mutation --ops--> DocBinding --submit--> SharedDoc
//!   (vellum-core)           (observer.rs)       (binding.rs)          (doc.rs)
//!                               |                     |
//!                           OpSynthesizer        stop/render/start
//!                           (creator.rs)         on remote apply
//! ```
//!
//! - [`Mutation`] owns observation lifecycle and the two-phase cache.
//! - [`OpSynthesizer`] turns ordered raw-record batches into ordered op
//!   batches, resolving paths lazily against the live tree.
//! - [`DocBinding`] serializes submissions to the shared document and
//!   suppresses feedback while remote batches are rendered.
//! - [`EditorSession`] constructs and wires one independent session.
//!
//! Guarantees: op batches are emitted in the order their triggering bursts
//! occurred; an emitted batch replays against the pre-batch shared state
//! into the post-batch live tree; no batch is submitted before the
//! previous acknowledgement resolves.

pub mod apply;
pub mod binding;
pub mod creator;
pub mod doc;
pub mod error;
pub mod observer;
pub mod op;
pub mod session;

pub use apply::{apply_to_content, apply_to_tree};
pub use binding::{BindingEvent, DirectRenderer, DocBinding, RemoteRenderer};
pub use creator::OpSynthesizer;
pub use doc::{DocHandle, InMemorySharedDoc, RemoteBatch, SessionId, SharedDoc, SubmitError};
pub use error::OtError;
pub use observer::{Mutation, MutationConfig};
pub use op::{compose, Op, OpBatch};
pub use session::EditorSession;
