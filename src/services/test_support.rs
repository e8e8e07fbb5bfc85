//! Shared fixtures for hub, join and progression tests: an in-process
//! harness over the memory backends and a scriptable catalog stub.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    dao::{
        quiz_cache::MemoryQuizCache,
        quiz_catalog::{CatalogResult, InstanceBundle, QuizCatalog},
        session_store::memory::MemorySessionStore,
    },
    dto::{
        quiz::{InstanceInfo, InstanceStatus, QuestionKind, QuestionSpec, QuizSettings, QuizType},
        ws::{ClientCommand, ServerMessage},
    },
    services::hub_service,
    state::{
        AppState, SharedState,
        hub::{ClientHandle, HubCommand},
    },
};

/// Catalog double backed by a mutable instance status, recording every
/// status write so lifecycle assertions can check the transition order.
#[derive(Clone)]
pub struct StubCatalog {
    inner: Arc<StubCatalogInner>,
}

struct StubCatalogInner {
    instance_id: Uuid,
    creator_id: Uuid,
    quiz_type: QuizType,
    questions: Vec<QuestionSpec>,
    status: Mutex<InstanceStatus>,
    status_writes: Mutex<Vec<InstanceStatus>>,
}

impl StubCatalog {
    pub fn new(quiz_type: QuizType, questions: Vec<QuestionSpec>) -> Self {
        Self {
            inner: Arc::new(StubCatalogInner {
                instance_id: Uuid::new_v4(),
                creator_id: Uuid::new_v4(),
                quiz_type,
                questions,
                status: Mutex::new(InstanceStatus::Waiting),
                status_writes: Mutex::new(vec![]),
            }),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.inner.instance_id
    }

    pub fn creator_id(&self) -> Uuid {
        self.inner.creator_id
    }

    pub fn set_status(&self, status: InstanceStatus) {
        *self.inner.status.lock().unwrap() = status;
    }

    pub fn status_writes(&self) -> Vec<InstanceStatus> {
        self.inner.status_writes.lock().unwrap().clone()
    }

    fn bundle(&self) -> InstanceBundle {
        InstanceBundle {
            instance: InstanceInfo {
                id: self.inner.instance_id,
                creator_id: self.inner.creator_id,
                quiz_type: self.inner.quiz_type,
                status: *self.inner.status.lock().unwrap(),
                settings: QuizSettings::default(),
            },
            questions: self.inner.questions.clone(),
        }
    }
}

impl QuizCatalog for StubCatalog {
    fn get_instance(
        &self,
        _instance_id: Uuid,
        _user_id: Uuid,
    ) -> BoxFuture<'static, CatalogResult<InstanceBundle>> {
        let bundle = self.bundle();
        Box::pin(async move { Ok(bundle) })
    }

    fn get_instance_by_access_code(
        &self,
        _access_code: String,
        _user_id: Uuid,
    ) -> BoxFuture<'static, CatalogResult<InstanceBundle>> {
        let bundle = self.bundle();
        Box::pin(async move { Ok(bundle) })
    }

    fn update_instance_status(
        &self,
        _instance_id: Uuid,
        status: InstanceStatus,
    ) -> BoxFuture<'static, CatalogResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            *inner.status.lock().unwrap() = status;
            inner.status_writes.lock().unwrap().push(status);
            Ok(())
        })
    }
}

/// One running hub over memory backends, plus handles to every layer.
pub struct TestHarness {
    pub state: SharedState,
    pub catalog: StubCatalog,
    pub store: MemorySessionStore,
    pub cache: MemoryQuizCache,
}

pub async fn harness(quiz_type: QuizType, questions: Vec<QuestionSpec>) -> TestHarness {
    let catalog = StubCatalog::new(quiz_type, questions);
    let cache = MemoryQuizCache::new();
    let store = MemorySessionStore::new();

    let state = AppState::new(Arc::new(cache.clone()), Arc::new(catalog.clone()));
    state.set_session_store(Arc::new(store.clone())).await;
    tokio::spawn(hub_service::run(state.clone()));

    TestHarness {
        state,
        catalog,
        store,
        cache,
    }
}

impl TestHarness {
    /// Register a new connection for `user_id`, returning its handle and
    /// the stream of messages the server pushes to it.
    pub fn connect(
        &self,
        user_id: Uuid,
        is_creator: bool,
    ) -> (ClientHandle, mpsc::Receiver<ServerMessage>) {
        let (client, outbound_rx, _close_rx) =
            ClientHandle::new(user_id, self.catalog.instance_id(), is_creator);
        self.state
            .hub()
            .dispatch(HubCommand::Register(client.clone()));
        (client, outbound_rx)
    }

    pub fn disconnect(&self, client: &ClientHandle) {
        self.state.hub().dispatch(HubCommand::Unregister {
            instance_id: client.instance_id,
            conn_id: client.conn_id,
        });
    }

    pub fn send(&self, client: &ClientHandle, command: ClientCommand) {
        self.state.hub().dispatch(HubCommand::Inbound {
            client: client.clone(),
            command,
        });
    }

    pub fn submit_answer(&self, client: &ClientHandle, question_id: &str, answer: &str) {
        self.send(
            client,
            ClientCommand::Answer(serde_json::json!({
                "question_id": question_id,
                "answer": answer,
            })),
        );
    }
}

pub fn question(
    id: &str,
    order_index: usize,
    correct_answer: &str,
    max_score: i64,
    time_limit_sec: u32,
) -> QuestionSpec {
    QuestionSpec {
        id: id.to_owned(),
        text: format!("Question {order_index}"),
        kind: QuestionKind::Open,
        options: vec![],
        correct_answer: correct_answer.to_owned(),
        order_index,
        max_score,
        time_limit_sec,
    }
}

/// Next pushed message, failing the test after a generous deadline.
pub async fn recv_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for server message")
        .expect("client channel closed")
}

/// Skip messages until one satisfies `pred`.
pub async fn wait_for(
    rx: &mut mpsc::Receiver<ServerMessage>,
    pred: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let message = recv_message(rx).await;
        if pred(&message) {
            return message;
        }
    }
}

/// Assert that no message matching `pred` arrives within `window`.
pub async fn assert_no_message_matching(
    rx: &mut mpsc::Receiver<ServerMessage>,
    window: Duration,
    pred: impl Fn(&ServerMessage) -> bool,
) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) => return,
            Ok(None) => return,
            Ok(Some(message)) => {
                assert!(!pred(&message), "unexpected message: {message:?}");
            }
        }
    }
}
