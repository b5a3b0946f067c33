use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::RwLock;

use crate::{
    db::SessionStore,
    error::{AppError, AppResult},
    models::{
        generate_code, normalize_code,
        questionnaire::prompt_for,
        AnswerSet, QuestionnaireProgress, Session, SessionStatus, UserId,
    },
    services::recommender::{Recommender, FALLBACK_RECOMMENDATION},
    transport::{commands, Keyboard, MessageId, Transport},
};

const MAX_CODE_ATTEMPTS: usize = 5;

const WELCOME_TEXT: &str = "👋 Hi!\n\n\
🎥 Welcome to the movie match bot!\n\n\
I help you and a friend pick a movie you will both enjoy.\n\
Create a session and share the code with a friend to get started!";

const HELP_TEXT: &str = "🤖 How to use the bot:\n\n\
1. 🎬 Create session\n\
   • Press \"Create session\"\n\
   • You get a 6-character code\n\
   • Share the code with a friend\n\n\
2. 🔗 Join\n\
   • Press \"Join\"\n\
   • Enter the code from your friend\n\
   • Start the questionnaire\n\n\
3. 📊 My sessions\n\
   • Shows your active sessions and their codes\n\n\
4. ⏭️ Skip\n\
   • Any question can be skipped\n\
   • It is taken into account when matching\n\n\
🎬 The flow:\n\
1. Both participants answer 6 questions\n\
2. The AI weighs both sets of preferences\n\
3. You receive a personalized joint shortlist\n\n\
🍿 Enjoy the movie!";

const GENERATING_TEXT: &str = "🎭 Analyzing your preferences... picking movies \
you will both enjoy!\n\nThis can take 10-15 seconds ⏳";

/// Per-user position in the pairing flow, orthogonal to session status
///
/// Idle is represented by absence from the state map.
#[derive(Debug, Clone, PartialEq)]
pub enum UserState {
    /// Created a session, waiting for a partner to join
    AwaitingPartner { code: String },
    /// Asked to join, next message is interpreted as a session code
    EnteringCode,
    /// Running through the question sequence
    Answering(QuestionnaireProgress),
    /// Answers persisted, waiting for the partner / dispatch
    Done { code: String },
}

/// Orchestrates session lifecycle: creation, join, questionnaire progress,
/// completion detection, expiry and recommendation dispatch
///
/// One instance per process, cheap to clone (shared inner state), driving
/// the store, transport and recommender collaborators.
#[derive(Clone)]
pub struct PairingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn SessionStore>,
    recommender: Arc<dyn Recommender>,
    transport: Arc<dyn Transport>,
    states: RwLock<HashMap<UserId, UserState>>,
    session_ttl: Duration,
}

/// What `answer_or_skip` decided while holding the state lock
enum AnswerStep {
    AskNext(usize),
    Persist { code: String, answers: AnswerSet },
    Ignore,
}

impl PairingEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        recommender: Arc<dyn Recommender>,
        transport: Arc<dyn Transport>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                recommender,
                transport,
                states: RwLock::new(HashMap::new()),
                session_ttl,
            }),
        }
    }

    /// Current state of a user, `None` when idle
    pub async fn state_of(&self, user_id: UserId) -> Option<UserState> {
        self.inner.states.read().await.get(&user_id).cloned()
    }

    /// Entry point for inbound `{user_id, text}` events
    ///
    /// No per-session error is fatal: failures are logged and the user is
    /// left in a retryable state.
    pub async fn handle_message(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.route(user_id, text.trim()).await {
            tracing::error!(user_id, error = %e, "Message handling failed");
        }
    }

    async fn route(&self, user_id: UserId, text: &str) -> AppResult<()> {
        match text {
            commands::START => self.show_welcome(user_id).await,
            commands::HELP | commands::HELP_CMD => self.show_help(user_id).await,
            commands::CREATE_SESSION => self.create_session(user_id).await,
            commands::JOIN_SESSION => self.join_prompt(user_id).await,
            commands::CANCEL => self.cancel(user_id).await,
            commands::BACK => self.back(user_id).await,
            commands::MY_SESSIONS => self.list_sessions(user_id).await,
            _ => {
                let state = self.state_of(user_id).await;
                match state {
                    Some(UserState::EnteringCode) => self.submit_code(user_id, text).await,
                    Some(UserState::Answering(_)) => self.answer_or_skip(user_id, text).await,
                    // Duplicate message after finishing: guarded no-op
                    Some(UserState::Done { .. }) => Ok(()),
                    Some(UserState::AwaitingPartner { .. }) => {
                        self.send_quiet(
                            user_id,
                            "⚠️ Please use the buttons while waiting for your partner.",
                            Keyboard::Cancel,
                        )
                        .await;
                        Ok(())
                    }
                    None => {
                        self.send_quiet(
                            user_id,
                            "👋 I did not understand that.\n\nUse the menu buttons:",
                            Keyboard::Main,
                        )
                        .await;
                        Ok(())
                    }
                }
            }
        }
    }

    async fn show_welcome(&self, user_id: UserId) -> AppResult<()> {
        self.send_quiet(user_id, WELCOME_TEXT, Keyboard::Main).await;
        Ok(())
    }

    async fn show_help(&self, user_id: UserId) -> AppResult<()> {
        self.send_quiet(user_id, HELP_TEXT, Keyboard::Main).await;
        Ok(())
    }

    /// Creates a waiting session with a fresh random code and schedules
    /// its one-shot expiry
    pub async fn create_session(&self, user_id: UserId) -> AppResult<()> {
        if let Some(existing) = self.inner.store.find_active_by_creator(user_id).await? {
            self.send_quiet(
                user_id,
                &format!(
                    "⚠️ You already have an active session!\n\n\
                     Code: {}\n\n\
                     Wait for a partner to join or cancel the session.",
                    existing.code
                ),
                Keyboard::Main,
            )
            .await;
            return Ok(());
        }

        let mut code = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = generate_code();
            match self.inner.store.create(&candidate, user_id).await {
                Ok(()) => {
                    code = Some(candidate);
                    break;
                }
                Err(AppError::CodeTaken(taken)) => {
                    tracing::debug!(code = %taken, "Code collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        let Some(code) = code else {
            self.send_quiet(
                user_id,
                "⚠️ Could not create a session right now. Please try again.",
                Keyboard::Main,
            )
            .await;
            return Err(AppError::Internal(
                "Exhausted session code generation attempts".to_string(),
            ));
        };

        self.inner
            .states
            .write()
            .await
            .insert(user_id, UserState::AwaitingPartner { code: code.clone() });

        self.send_quiet(
            user_id,
            &format!(
                "✅ Session created!\n\n\
                 🎯 Session code: {}\n\n\
                 📋 What to do next:\n\
                 1. Share this code with a friend\n\
                 2. They press \"Join\" and enter the code\n\
                 3. You both answer the questions\n\n\
                 ⏰ The code is valid for 1 hour",
                code
            ),
            Keyboard::Cancel,
        )
        .await;

        // One-shot expiry; state is re-validated at fire time, so no
        // cancellation is needed when the session is joined earlier.
        let engine = self.clone();
        let ttl = self.inner.session_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Err(e) = engine.expire_session(&code).await {
                tracing::error!(code = %code, error = %e, "Session expiry failed");
            }
        });

        Ok(())
    }

    /// Fired once per session at creation time + TTL
    ///
    /// Deletes the session and notifies the creator only if it is still
    /// unjoined; a no-op otherwise.
    pub async fn expire_session(&self, code: &str) -> AppResult<()> {
        let Some(session) = self.inner.store.get(code).await? else {
            return Ok(()); // already cancelled or completed-and-pruned
        };

        if session.status != SessionStatus::Waiting {
            return Ok(());
        }

        self.inner.store.delete(code).await?;

        {
            let mut states = self.inner.states.write().await;
            if matches!(
                states.get(&session.creator_id),
                Some(UserState::AwaitingPartner { code: c }) if c.as_str() == code
            ) {
                states.remove(&session.creator_id);
            }
        }

        tracing::info!(code = %code, creator_id = session.creator_id, "Session expired");

        self.send_quiet(
            session.creator_id,
            "⏰ Your session expired: nobody joined within an hour.\n\n\
             Create a new session!",
            Keyboard::Main,
        )
        .await;

        Ok(())
    }

    /// Asks the user for a session code
    pub async fn join_prompt(&self, user_id: UserId) -> AppResult<()> {
        if matches!(self.state_of(user_id).await, Some(UserState::Answering(_))) {
            self.send_quiet(
                user_id,
                "⚠️ Finish the current questionnaire first.",
                Keyboard::Skip,
            )
            .await;
            return Ok(());
        }

        self.inner
            .states
            .write()
            .await
            .insert(user_id, UserState::EnteringCode);

        self.send_quiet(
            user_id,
            "🔢 Joining a session\n\n\
             Enter the 6-character code your friend sent you:\n\n\
             Example: A1B2C3",
            Keyboard::Cancel,
        )
        .await;

        Ok(())
    }

    /// Validates a submitted code and joins the session
    ///
    /// Malformed input is reported inline without consuming state; every
    /// rejection reason (not found / full / own session) gets a distinct
    /// message and clears the user back to idle.
    pub async fn submit_code(&self, user_id: UserId, raw: &str) -> AppResult<()> {
        let Some(code) = normalize_code(raw) else {
            self.send_quiet(
                user_id,
                "❌ Invalid code format.\n\n\
                 The code is 6 letters and digits.\n\
                 Example: A1B2C3\n\n\
                 Try again:",
                Keyboard::Cancel,
            )
            .await;
            return Ok(());
        };

        // Self-join is checked before attempting the join itself
        let rejection = match self.inner.store.get(&code).await? {
            None => Some("❌ Session not found.\n\nCheck the code or create a new session."),
            Some(s) if s.creator_id == user_id => {
                Some("❌ You cannot join your own session.\n\nWait for your friend to join.")
            }
            Some(s) if s.partner_id.is_some() => {
                Some("❌ This session already has two participants.\n\nCreate a new session or join another one.")
            }
            Some(_) => None,
        };

        if let Some(reason) = rejection {
            self.inner.states.write().await.remove(&user_id);
            self.send_quiet(user_id, reason, Keyboard::Main).await;
            return Ok(());
        }

        let session = match self.inner.store.join(&code, user_id).await {
            Ok(session) => session,
            // Lost the join race to another partner
            Err(AppError::SessionFull(_)) | Err(AppError::NotFound(_)) => {
                self.inner.states.write().await.remove(&user_id);
                self.send_quiet(
                    user_id,
                    "❌ This session already has two participants.\n\n\
                     Create a new session or join another one.",
                    Keyboard::Main,
                )
                .await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        // Both participants run the questionnaire concurrently with
        // independent progress.
        self.start_questionnaire(user_id, &code, Some("🎬 Let's start picking movies!"))
            .await?;
        self.start_questionnaire(
            session.creator_id,
            &code,
            Some("🎉 A partner joined your session!"),
        )
        .await?;

        Ok(())
    }

    /// Resets a user's progress to question 0 and sends the first prompt
    pub async fn start_questionnaire(
        &self,
        user_id: UserId,
        code: &str,
        greeting: Option<&str>,
    ) -> AppResult<()> {
        let progress = QuestionnaireProgress::new(code);
        self.inner
            .states
            .write()
            .await
            .insert(user_id, UserState::Answering(progress));

        let prompt = prompt_for(0)
            .ok_or_else(|| AppError::Internal("Empty question sequence".to_string()))?;
        let text = match greeting {
            Some(greeting) => format!("{}\n\n{}", greeting, prompt),
            None => prompt,
        };

        self.send_quiet(user_id, &text, Keyboard::Skip).await;

        Ok(())
    }

    /// Stores one answer (or the skip sentinel) and advances the sequence
    ///
    /// On the sixth answer the accumulated set is persisted and the
    /// completion check runs; a user already in Done is a guarded no-op.
    pub async fn answer_or_skip(&self, user_id: UserId, text: &str) -> AppResult<()> {
        let step = {
            let mut states = self.inner.states.write().await;
            let step = match states.get_mut(&user_id) {
                Some(UserState::Answering(progress)) => {
                    if text == commands::SKIP {
                        progress.skip();
                    } else {
                        progress.record(text);
                    }

                    if progress.is_complete() {
                        AnswerStep::Persist {
                            code: progress.session_code.clone(),
                            answers: progress.answers.clone(),
                        }
                    } else {
                        AnswerStep::AskNext(progress.current_index)
                    }
                }
                _ => AnswerStep::Ignore,
            };

            // Local progress is discarded once the answers head for the store
            if let AnswerStep::Persist { code, .. } = &step {
                states.insert(user_id, UserState::Done { code: code.clone() });
            }

            step
        };

        match step {
            AnswerStep::AskNext(index) => {
                if let Some(prompt) = prompt_for(index) {
                    self.send_quiet(user_id, &prompt, Keyboard::Skip).await;
                }
                Ok(())
            }
            AnswerStep::Persist { code, answers } => {
                self.inner
                    .store
                    .record_answers(&code, user_id, &answers)
                    .await?;

                self.send_quiet(
                    user_id,
                    "✅ Thanks! Your answers are saved. Waiting for the second participant...",
                    Keyboard::Remove,
                )
                .await;

                self.check_completion(&code).await
            }
            AnswerStep::Ignore => Ok(()),
        }
    }

    /// Completion check and exactly-once dispatch
    ///
    /// Both submission paths run this; the atomic `complete` claim decides
    /// which caller dispatches. The loser observes `false` and stops.
    async fn check_completion(&self, code: &str) -> AppResult<()> {
        let Some((answers_creator, answers_partner)) =
            self.inner.store.both_answers(code).await?
        else {
            return Ok(());
        };

        if !self.inner.store.complete(code).await? {
            tracing::debug!(code = %code, "Dispatch already claimed");
            return Ok(());
        }

        let Some(session) = self.inner.store.get(code).await? else {
            return Err(AppError::NotFound(code.to_string()));
        };

        // Generation is slow; run it out-of-line so other sessions keep
        // making progress.
        let engine = self.clone();
        let code = code.to_string();
        tokio::spawn(async move {
            engine
                .dispatch(&code, session, answers_creator, answers_partner)
                .await;
        });

        Ok(())
    }

    /// Generates the joint recommendation and delivers it to both users
    ///
    /// Runs only in the task that claimed completion. Recommender failure
    /// degrades to the canned fallback; delivery failures degrade from
    /// edit to plain send and are then given up on.
    async fn dispatch(
        &self,
        code: &str,
        session: Session,
        answers_creator: AnswerSet,
        answers_partner: AnswerSet,
    ) {
        let creator_id = session.creator_id;
        let Some(partner_id) = session.partner_id else {
            tracing::error!(code = %code, "Completed session has no partner");
            return;
        };

        let msg_creator = self.send_quiet(creator_id, GENERATING_TEXT, Keyboard::Remove).await;
        let msg_partner = self.send_quiet(partner_id, GENERATING_TEXT, Keyboard::Remove).await;

        let recommendation = match self
            .inner
            .recommender
            .generate(&answers_creator, &answers_partner)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(code = %code, error = %e, "Recommendation generation failed, using fallback");
                FALLBACK_RECOMMENDATION.to_string()
            }
        };

        self.deliver_result(creator_id, msg_creator, &recommendation).await;
        self.deliver_result(partner_id, msg_partner, &recommendation).await;

        {
            let mut states = self.inner.states.write().await;
            states.remove(&creator_id);
            states.remove(&partner_id);
        }

        for user_id in [creator_id, partner_id] {
            self.send_quiet(user_id, "🎬 Want to pick more movies?", Keyboard::Main)
                .await;
        }

        tracing::info!(code = %code, "Recommendation dispatched");
    }

    /// Edits the progress message with the result, falling back to a plain
    /// send; gives up silently after that
    async fn deliver_result(&self, user_id: UserId, message_id: Option<MessageId>, text: &str) {
        if let Some(message_id) = message_id {
            match self.inner.transport.edit(user_id, message_id, text).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Edit failed, retrying as plain send");
                }
            }
        }

        if let Err(e) = self
            .inner
            .transport
            .send(user_id, text, Keyboard::Remove)
            .await
        {
            tracing::error!(user_id, error = %e, "Failed to deliver recommendation");
        }
    }

    /// Cancels from AwaitingPartner (deleting the session) or EnteringCode
    pub async fn cancel(&self, user_id: UserId) -> AppResult<()> {
        let state = {
            let states = self.inner.states.read().await;
            states.get(&user_id).cloned()
        };

        match state {
            Some(UserState::AwaitingPartner { code }) => {
                self.inner.store.delete(&code).await?;
                self.inner.states.write().await.remove(&user_id);
                self.send_quiet(
                    user_id,
                    "❌ Session cancelled.\n\nYou can create a new one.",
                    Keyboard::Main,
                )
                .await;
            }
            Some(UserState::EnteringCode) => {
                self.inner.states.write().await.remove(&user_id);
                self.send_quiet(user_id, "❌ Code entry cancelled.", Keyboard::Main)
                    .await;
            }
            _ => {
                self.send_quiet(user_id, "Nothing to cancel.", Keyboard::Main)
                    .await;
            }
        }

        Ok(())
    }

    /// Returns to the main menu from code entry
    async fn back(&self, user_id: UserId) -> AppResult<()> {
        {
            let mut states = self.inner.states.write().await;
            if matches!(states.get(&user_id), Some(UserState::EnteringCode)) {
                states.remove(&user_id);
            }
        }

        self.send_quiet(user_id, "🔙 Back to the main menu.", Keyboard::Main)
            .await;

        Ok(())
    }

    /// Lists the user's non-completed sessions
    pub async fn list_sessions(&self, user_id: UserId) -> AppResult<()> {
        let sessions = self.inner.store.sessions_for_user(user_id).await?;

        let mut response = String::from("📊 Your active sessions\n\n");

        if sessions.is_empty() {
            response.push_str("You have no active sessions.\nCreate a new one!");
        } else {
            for session in &sessions {
                if session.creator_id == user_id {
                    if session.partner_id.is_some() {
                        response.push_str(&format!(
                            "👑 Code: {} — partner joined ✅\n",
                            session.code
                        ));
                    } else {
                        response.push_str(&format!(
                            "👑 Code: {} — waiting for a partner ⏳\n",
                            session.code
                        ));
                    }
                } else {
                    response.push_str(&format!("👤 Code: {} — active\n", session.code));
                }
            }
        }

        self.send_quiet(user_id, &response, Keyboard::Main).await;

        Ok(())
    }

    /// Send that logs and swallows delivery failures
    async fn send_quiet(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Keyboard,
    ) -> Option<MessageId> {
        match self.inner.transport.send(user_id, text, keyboard).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Message delivery failed");
                None
            }
        }
    }
}
