//! End-to-end pipeline tests: live tree -> observation -> synthesis ->
//! submission -> shared document, and the remote direction back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use vellum_core::{LiveTree, LiveTreeHandle, NodeContent};
use vellum_ot::{
    BindingEvent, EditorSession, InMemorySharedDoc, Op, RemoteBatch, SessionId, SharedDoc,
    SubmitError,
};

const WAIT: Duration = Duration::from_millis(500);
const SILENCE: Duration = Duration::from_millis(150);

fn initial() -> NodeContent {
    NodeContent::element("doc").with_child(
        NodeContent::element("p")
            .with_attribute("align", "left")
            .with_child(NodeContent::text("hello world")),
    )
}

fn session_with_doc() -> (
    EditorSession,
    Arc<InMemorySharedDoc>,
    mpsc::UnboundedReceiver<BindingEvent>,
) {
    let tree = LiveTree::from_content(&initial()).unwrap();
    let mut session = EditorSession::new(tree);
    let events = session.take_event_rx().unwrap();
    let doc = Arc::new(InMemorySharedDoc::new(initial()));
    session.set_doc(doc.clone());
    session.start().unwrap();
    (session, doc, events)
}

fn tree_content(handle: &LiveTreeHandle) -> NodeContent {
    let tree = handle.read().unwrap();
    tree.to_content(tree.root()).unwrap()
}

fn append_paragraph(handle: &LiveTreeHandle, text: &str) {
    let mut tree = handle.write().unwrap();
    let root = tree.root();
    let p = tree.create_element("p");
    let t = tree.create_text(text);
    tree.append_child(p, t).unwrap();
    tree.append_child(root, p).unwrap();
    drop(tree);
    handle.flush_changes().unwrap();
}

async fn expect_submitted(rx: &mut mpsc::UnboundedReceiver<BindingEvent>) -> (u64, u64) {
    match timeout(WAIT, rx.recv()).await.unwrap().unwrap() {
        BindingEvent::Submitted { seq, version } => (seq, version),
        BindingEvent::SyncFault { seq, reason } => {
            panic!("unexpected sync fault on seq {seq}: {reason}")
        }
    }
}

async fn expect_silence(rx: &mut mpsc::UnboundedReceiver<BindingEvent>) {
    assert!(timeout(SILENCE, rx.recv()).await.is_err());
}

#[tokio::test]
async fn test_round_trip_fidelity() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();

    append_paragraph(&handle, "second paragraph");
    {
        let mut tree = handle.write().unwrap();
        let first = tree.resolve_path(&[0]).unwrap();
        tree.set_attribute(first, "class", "lead").unwrap();
        drop(tree);
        handle.flush_changes().unwrap();
    }
    {
        let mut tree = handle.write().unwrap();
        let text = tree.resolve_path(&[0, 0]).unwrap();
        tree.set_text(text, "hello brave world").unwrap();
        drop(tree);
        handle.flush_changes().unwrap();
    }

    for expected_version in 1..=3 {
        let (_, version) = expect_submitted(&mut events).await;
        assert_eq!(version, expected_version);
    }
    assert_eq!(doc.snapshot(), tree_content(&handle));
}

#[tokio::test]
async fn test_stopped_mutations_are_invisible() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();

    session.stop();
    {
        let mut tree = handle.write().unwrap();
        let first = tree.resolve_path(&[0]).unwrap();
        tree.set_attribute(first, "class", "hidden").unwrap();
        drop(tree);
        handle.flush_changes().unwrap();
    }
    session.start().unwrap();
    expect_silence(&mut events).await;
    assert_eq!(doc.version(), 0);

    // Capture resumes for edits after the restart.
    append_paragraph(&handle, "visible");
    let (_, version) = expect_submitted(&mut events).await;
    assert_eq!(version, 1);
}

#[tokio::test]
async fn test_buffered_bursts_submit_as_one_batch() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();

    session.start_cache();
    append_paragraph(&handle, "one");
    append_paragraph(&handle, "two");
    {
        let mut tree = handle.write().unwrap();
        let text = tree.resolve_path(&[0, 0]).unwrap();
        tree.set_text(text, "hello brave world").unwrap();
        drop(tree);
        handle.flush_changes().unwrap();
    }
    expect_silence(&mut events).await;

    session.submit_cache();
    let (_, version) = expect_submitted(&mut events).await;
    assert_eq!(version, 1);
    expect_silence(&mut events).await;
    assert_eq!(doc.snapshot(), tree_content(&handle));
}

#[tokio::test]
async fn test_destroyed_cache_synthesizes_nothing() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();

    session.start_cache();
    append_paragraph(&handle, "discarded");
    session.destroy_cache();
    expect_silence(&mut events).await;
    assert_eq!(doc.version(), 0);
}

#[tokio::test]
async fn test_noop_records_are_suppressed() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();

    {
        let mut tree = handle.write().unwrap();
        let first = tree.resolve_path(&[0]).unwrap();
        let text = tree.resolve_path(&[0, 0]).unwrap();
        // Attribute rewritten to its current value and text rewritten to
        // itself: semantically nothing happened.
        tree.set_attribute(first, "align", "left").unwrap();
        tree.set_text(text, "hello world").unwrap();
        drop(tree);
        handle.flush_changes().unwrap();
    }
    expect_silence(&mut events).await;
    assert_eq!(doc.version(), 0);
}

#[tokio::test]
async fn test_keystroke_becomes_minimal_splice() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();
    let mut remote_rx = doc.subscribe_remote();

    {
        let mut tree = handle.write().unwrap();
        let text = tree.resolve_path(&[0, 0]).unwrap();
        tree.set_text(text, "hello brave world").unwrap();
        drop(tree);
        handle.flush_changes().unwrap();
    }
    expect_submitted(&mut events).await;

    let batch = timeout(WAIT, remote_rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        batch.ops,
        vec![Op::SpliceText {
            path: vec![0, 0],
            offset: 6,
            delete: 0,
            insert: "brave ".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_batches_reach_the_document_in_burst_order() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();
    let mut remote_rx = doc.subscribe_remote();

    append_paragraph(&handle, "first");
    append_paragraph(&handle, "second");

    let a = timeout(WAIT, remote_rx.recv()).await.unwrap().unwrap();
    let b = timeout(WAIT, remote_rx.recv()).await.unwrap().unwrap();
    assert_eq!(a.version, 1);
    assert_eq!(b.version, 2);
    // The earlier batch is what it was, unaffected by the later burst.
    assert_eq!(
        a.ops,
        vec![Op::InsertNode {
            path: vec![1],
            content: NodeContent::element("p").with_child(NodeContent::text("first")),
        }]
    );
    expect_submitted(&mut events).await;
    expect_submitted(&mut events).await;
}

#[tokio::test]
async fn test_listener_reaction_forms_a_separate_batch() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();
    let mut remote_rx = doc.subscribe_remote();

    append_paragraph(&handle, "trigger");
    let (seq, _) = expect_submitted(&mut events).await;
    assert_eq!(seq, 0);
    // The event consumer reacts to the delivered batch with an edit of
    // its own; that edit must form a distinct later batch.
    append_paragraph(&handle, "reaction");
    let (seq, _) = expect_submitted(&mut events).await;
    assert_eq!(seq, 1);

    let first = timeout(WAIT, remote_rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        first.ops,
        vec![Op::InsertNode {
            path: vec![1],
            content: NodeContent::element("p").with_child(NodeContent::text("trigger")),
        }]
    );
    let second = timeout(WAIT, remote_rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        second.ops,
        vec![Op::InsertNode {
            path: vec![2],
            content: NodeContent::element("p").with_child(NodeContent::text("reaction")),
        }]
    );
    assert_eq!(doc.snapshot(), tree_content(&handle));
}

#[tokio::test]
async fn test_stale_rejection_retries_then_faults() {
    let (session, doc, mut events) = session_with_doc();
    let handle = session.tree();

    doc.inject_rejection(SubmitError::Stale { latest: 0 });
    append_paragraph(&handle, "retried");
    let (_, version) = expect_submitted(&mut events).await;
    assert_eq!(version, 1);

    doc.inject_rejection(SubmitError::Stale { latest: 1 });
    doc.inject_rejection(SubmitError::Stale { latest: 1 });
    append_paragraph(&handle, "faulted");
    match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
        BindingEvent::SyncFault { .. } => {}
        other => panic!("expected a sync fault, got {other:?}"),
    }
    // The faulted batch was dropped from the wire.
    assert_eq!(doc.version(), 1);
}

#[tokio::test]
async fn test_remote_application_is_not_recaptured() {
    let doc = Arc::new(InMemorySharedDoc::new(initial()));

    let mut session_a = EditorSession::new(LiveTree::from_content(&initial()).unwrap());
    let mut events_a = session_a.take_event_rx().unwrap();
    session_a.set_doc(doc.clone());
    session_a.start().unwrap();

    let mut session_b = EditorSession::new(LiveTree::from_content(&initial()).unwrap());
    let mut events_b = session_b.take_event_rx().unwrap();
    session_b.set_doc(doc.clone());
    session_b.start().unwrap();

    append_paragraph(&session_a.tree(), "from a");
    expect_submitted(&mut events_a).await;

    // B converges without echoing the remote batch back.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if tree_content(&session_b.tree()) == doc.snapshot() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "session B never converged");
        sleep(Duration::from_millis(10)).await;
    }
    expect_silence(&mut events_b).await;
    assert_eq!(doc.version(), 1);

    // B keeps observing its own edits after the remote apply.
    append_paragraph(&session_b.tree(), "from b");
    expect_submitted(&mut events_b).await;
    assert_eq!(doc.version(), 2);
}

/// A shared document that holds acknowledgements until the test releases
/// them.
struct SlowDoc {
    version: Mutex<u64>,
    pending: Mutex<VecDeque<(u64, Vec<Op>, oneshot::Sender<Result<u64, SubmitError>>)>>,
}

impl SlowDoc {
    fn new() -> Self {
        Self {
            version: Mutex::new(0),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn ack_front(&self) -> Vec<Op> {
        let (_, ops, tx) = self.pending.lock().unwrap().pop_front().unwrap();
        let mut version = self.version.lock().unwrap();
        *version += 1;
        tx.send(Ok(*version)).unwrap();
        ops
    }
}

impl SharedDoc for SlowDoc {
    fn version(&self) -> u64 {
        *self.version.lock().unwrap()
    }

    fn snapshot(&self) -> NodeContent {
        NodeContent::element("doc")
    }

    fn submit(
        &self,
        _source: SessionId,
        base_version: u64,
        ops: Vec<Op>,
    ) -> oneshot::Receiver<Result<u64, SubmitError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back((base_version, ops, tx));
        rx
    }

    fn subscribe_remote(&self) -> mpsc::UnboundedReceiver<RemoteBatch> {
        mpsc::unbounded_channel().1
    }
}

#[tokio::test]
async fn test_submissions_serialize_under_delayed_acks() {
    let tree = LiveTree::from_content(&initial()).unwrap();
    let mut session = EditorSession::new(tree);
    let mut events = session.take_event_rx().unwrap();
    let doc = Arc::new(SlowDoc::new());
    session.set_doc(doc.clone());
    session.start().unwrap();
    let handle = session.tree();

    append_paragraph(&handle, "first");
    append_paragraph(&handle, "second");

    // Only the first batch may be in flight before its acknowledgement.
    sleep(Duration::from_millis(100)).await;
    assert_eq!(doc.pending_count(), 1);

    let first_ops = doc.ack_front();
    assert!(matches!(&first_ops[0], Op::InsertNode { path, .. } if path == &vec![1]));
    let (seq, version) = expect_submitted(&mut events).await;
    assert_eq!((seq, version), (0, 1));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(doc.pending_count(), 1);
    let second_ops = doc.ack_front();
    assert!(matches!(&second_ops[0], Op::InsertNode { path, .. } if path == &vec![2]));
    let (seq, version) = expect_submitted(&mut events).await;
    assert_eq!((seq, version), (1, 2));
}
