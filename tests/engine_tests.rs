use std::{
    sync::atomic::{AtomicI64, AtomicUsize, Ordering},
    sync::{Arc, Mutex},
    time::Duration,
};

use movie_match::{
    db::{sqlite::memory_pool, SessionStore, SqliteSessionStore},
    error::{AppError, AppResult},
    models::{questionnaire::SKIP_ANSWER, AnswerSet, SessionStatus, UserId},
    services::{PairingEngine, Recommender, UserState},
    transport::{commands, Keyboard, MessageId, Transport},
};

/// Transport double that records every outbound message per user
struct RecordingTransport {
    outbox: Mutex<Vec<(UserId, String)>>,
    next_id: AtomicI64,
    fail_edits: bool,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            outbox: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_edits: false,
        }
    }

    fn failing_edits() -> Self {
        Self {
            fail_edits: true,
            ..Self::new()
        }
    }

    fn messages_for(&self, user_id: UserId) -> Vec<String> {
        self.outbox
            .lock()
            .unwrap()
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        user_id: UserId,
        text: &str,
        _keyboard: Keyboard,
    ) -> AppResult<MessageId> {
        self.outbox.lock().unwrap().push((user_id, text.to_string()));
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn edit(&self, user_id: UserId, _message_id: MessageId, text: &str) -> AppResult<()> {
        if self.fail_edits {
            return Err(AppError::Delivery("edit rejected".to_string()));
        }
        self.outbox.lock().unwrap().push((user_id, text.to_string()));
        Ok(())
    }
}

/// Recommender double that counts invocations and captures its inputs
struct CountingRecommender {
    calls: AtomicUsize,
    seen: Mutex<Vec<(AnswerSet, AnswerSet)>>,
    delay: Duration,
}

impl CountingRecommender {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay,
        }
    }
}

#[async_trait::async_trait]
impl Recommender for CountingRecommender {
    async fn generate(&self, answers_a: &AnswerSet, answers_b: &AnswerSet) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((answers_a.clone(), answers_b.clone()));
        tokio::time::sleep(self.delay).await;
        Ok("🎬 Joint picks: The Matrix (1999)".to_string())
    }
}

struct Harness {
    engine: PairingEngine,
    store: Arc<SqliteSessionStore>,
    transport: Arc<RecordingTransport>,
    recommender: Arc<CountingRecommender>,
}

async fn harness_with(transport: RecordingTransport, ttl: Duration) -> Harness {
    let store = Arc::new(SqliteSessionStore::new(memory_pool().await.unwrap()));
    let transport = Arc::new(transport);
    let recommender = Arc::new(CountingRecommender::new(Duration::from_millis(50)));

    let engine = PairingEngine::new(
        store.clone(),
        recommender.clone(),
        transport.clone(),
        ttl,
    );

    Harness {
        engine,
        store,
        transport,
        recommender,
    }
}

async fn harness() -> Harness {
    harness_with(RecordingTransport::new(), Duration::from_secs(3600)).await
}

/// Drives a user through create-session and returns the issued code
async fn create_session_for(h: &Harness, user_id: UserId) -> String {
    h.engine.handle_message(user_id, commands::CREATE_SESSION).await;
    h.store
        .find_active_by_creator(user_id)
        .await
        .unwrap()
        .expect("session created")
        .code
}

/// Drives a user through the join flow with the given raw code input
async fn join_with(h: &Harness, user_id: UserId, raw_code: &str) {
    h.engine.handle_message(user_id, commands::JOIN_SESSION).await;
    h.engine.handle_message(user_id, raw_code).await;
}

#[tokio::test]
async fn test_unknown_code_reports_not_found_without_creating_session() {
    let h = harness().await;

    join_with(&h, 2, "Q9Z4XW").await;

    assert!(h.store.get("Q9Z4XW").await.unwrap().is_none());
    assert_eq!(h.engine.state_of(2).await, None);

    let messages = h.transport.messages_for(2);
    assert!(messages.iter().any(|m| m.contains("Session not found")));
}

#[tokio::test]
async fn test_duplicate_create_leaves_original_session_untouched() {
    let h = harness().await;

    let code = create_session_for(&h, 1).await;
    h.engine.handle_message(1, commands::CREATE_SESSION).await;

    let session = h.store.get(&code).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Waiting);

    let messages = h.transport.messages_for(1);
    assert!(messages
        .iter()
        .any(|m| m.contains("already have an active session") && m.contains(&code)));
}

#[tokio::test]
async fn test_concurrent_joins_exactly_one_succeeds() {
    let h = harness().await;
    let code = create_session_for(&h, 1).await;

    h.engine.handle_message(2, commands::JOIN_SESSION).await;
    h.engine.handle_message(3, commands::JOIN_SESSION).await;

    tokio::join!(
        h.engine.handle_message(2, &code),
        h.engine.handle_message(3, &code),
    );

    let session = h.store.get(&code).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    let partner = session.partner_id.expect("one partner joined");
    assert!(partner == 2 || partner == 3);

    let loser = if partner == 2 { 3 } else { 2 };
    assert!(matches!(
        h.engine.state_of(partner).await,
        Some(UserState::Answering(_))
    ));
    assert_eq!(h.engine.state_of(loser).await, None);
    assert!(h
        .transport
        .messages_for(loser)
        .iter()
        .any(|m| m.contains("already has two participants")));
}

#[tokio::test]
async fn test_self_join_rejected() {
    let h = harness().await;
    let code = create_session_for(&h, 1).await;

    join_with(&h, 1, &code).await;

    let session = h.store.get(&code).await.unwrap().unwrap();
    assert_eq!(session.partner_id, None);
    assert_eq!(session.status, SessionStatus::Waiting);
    assert!(h
        .transport
        .messages_for(1)
        .iter()
        .any(|m| m.contains("cannot join your own session")));
}

#[tokio::test]
async fn test_skip_stores_sentinel_and_advances_one_question() {
    let h = harness().await;
    let code = create_session_for(&h, 1).await;
    join_with(&h, 2, &code).await;

    h.engine.handle_message(2, commands::SKIP).await;

    match h.engine.state_of(2).await {
        Some(UserState::Answering(progress)) => {
            assert_eq!(progress.current_index, 1);
            assert_eq!(
                progress.answers.get("genre").map(String::as_str),
                Some(SKIP_ANSWER)
            );
        }
        other => panic!("expected answering state, got {:?}", other),
    }

    // The next question went out
    assert!(h
        .transport
        .messages_for(2)
        .iter()
        .any(|m| m.starts_with("(2/6)")));
}

#[tokio::test]
async fn test_dispatch_fires_exactly_once_on_simultaneous_final_answers() {
    let h = harness().await;
    let code = create_session_for(&h, 1).await;
    join_with(&h, 2, &code).await;

    for _ in 0..5 {
        h.engine.handle_message(1, "answer").await;
        h.engine.handle_message(2, "answer").await;
    }

    // Both sixth answers land in the same instant
    tokio::join!(
        h.engine.handle_message(1, "final"),
        h.engine.handle_message(2, "final"),
    );

    // Dispatch runs out-of-line; give it time to finish
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.recommender.calls.load(Ordering::SeqCst), 1);

    let session = h.store.get(&code).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.completed_at.is_some());

    // Each user received the recommendation exactly once
    for user_id in [1, 2] {
        let hits = h
            .transport
            .messages_for(user_id)
            .iter()
            .filter(|m| m.contains("Joint picks"))
            .count();
        assert_eq!(hits, 1, "user {} recommendation count", user_id);
    }
}

#[tokio::test]
async fn test_unjoined_session_expires_and_creator_is_notified() {
    let h = harness_with(RecordingTransport::new(), Duration::from_millis(100)).await;
    let code = create_session_for(&h, 1).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(h.store.get(&code).await.unwrap().is_none());
    assert_eq!(h.engine.state_of(1).await, None);
    assert!(h
        .transport
        .messages_for(1)
        .iter()
        .any(|m| m.contains("session expired")));
}

#[tokio::test]
async fn test_joined_session_is_never_auto_deleted() {
    let h = harness_with(RecordingTransport::new(), Duration::from_millis(100)).await;
    let code = create_session_for(&h, 1).await;
    join_with(&h, 2, &code).await;

    tokio::time::sleep(Duration::from_millis(300)).await;

    let session = h.store.get(&code).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn test_end_to_end_case_insensitive_join_and_interleaved_answers() {
    let h = harness().await;
    let code = create_session_for(&h, 1).await;

    // Partner submits the code in lower case
    join_with(&h, 2, &code.to_lowercase()).await;
    let session = h.store.get(&code).await.unwrap().unwrap();
    assert_eq!(session.partner_id, Some(2));

    // Interleaved answers, partner skips two questions
    let creator_answers = ["comedy", "The Matrix", "relaxed", "90-120 min", "2000s", "no horror"];
    for (i, answer) in creator_answers.iter().enumerate() {
        h.engine.handle_message(1, answer).await;
        let partner_input = if i % 3 == 0 { commands::SKIP } else { "sci-fi" };
        h.engine.handle_message(2, partner_input).await;
    }

    tokio::time::sleep(Duration::from_millis(400)).await;

    // Recommender ran once with both full answer maps
    assert_eq!(h.recommender.calls.load(Ordering::SeqCst), 1);
    let seen = h.recommender.seen.lock().unwrap();
    let (creator_map, partner_map) = &seen[0];
    assert_eq!(creator_map.len(), 6);
    assert_eq!(partner_map.len(), 6);
    assert_eq!(creator_map.get("genre").map(String::as_str), Some("comedy"));
    assert_eq!(partner_map.get("genre").map(String::as_str), Some(SKIP_ANSWER));
    drop(seen);

    // Both users received the same recommendation text
    let text_for = |user_id: UserId| {
        h.transport
            .messages_for(user_id)
            .into_iter()
            .find(|m| m.contains("Joint picks"))
            .expect("recommendation delivered")
    };
    assert_eq!(text_for(1), text_for(2));

    // Session is completed and both users are idle again
    let session = h.store.get(&code).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(h.engine.state_of(1).await, None);
    assert_eq!(h.engine.state_of(2).await, None);
}

#[tokio::test]
async fn test_failed_edit_falls_back_to_plain_send() {
    let h = harness_with(RecordingTransport::failing_edits(), Duration::from_secs(3600)).await;
    let code = create_session_for(&h, 1).await;
    join_with(&h, 2, &code).await;

    for _ in 0..6 {
        h.engine.handle_message(1, "answer").await;
        h.engine.handle_message(2, "answer").await;
    }

    tokio::time::sleep(Duration::from_millis(400)).await;

    // The recommendation still arrived via the plain-send fallback
    for user_id in [1, 2] {
        assert!(h
            .transport
            .messages_for(user_id)
            .iter()
            .any(|m| m.contains("Joint picks")));
    }
}

#[tokio::test]
async fn test_list_sessions_shows_roles() {
    let h = harness().await;
    let code = create_session_for(&h, 1).await;
    join_with(&h, 2, &code).await;

    h.engine.handle_message(1, commands::MY_SESSIONS).await;
    h.engine.handle_message(2, commands::MY_SESSIONS).await;

    assert!(h
        .transport
        .messages_for(1)
        .iter()
        .any(|m| m.contains("👑") && m.contains(&code)));
    assert!(h
        .transport
        .messages_for(2)
        .iter()
        .any(|m| m.contains("👤") && m.contains(&code)));
}
