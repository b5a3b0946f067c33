use crate::{error::AppResult, models::UserId};

/// Identifier of a delivered message, used for later edits
pub type MessageId = i64;

/// Reply keyboard hint attached to outbound messages
///
/// Mirrors the reply keyboards of the chat UI; transports that have no
/// keyboard concept may ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyboard {
    /// Create session / join / help / my sessions
    Main,
    /// Cancel the current operation
    Cancel,
    /// Back to the main menu
    Back,
    /// Skip the current question
    Skip,
    /// Remove any visible keyboard
    Remove,
}

/// Chat transport consumed by the engine
///
/// Delivery failures are reported as errors; the engine logs and swallows
/// them so no session ever crashes on a flaky send.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends a message to a user, returning its id for later edits
    async fn send(&self, user_id: UserId, text: &str, keyboard: Keyboard)
        -> AppResult<MessageId>;

    /// Edits a previously sent message in place
    async fn edit(&self, user_id: UserId, message_id: MessageId, text: &str) -> AppResult<()>;
}

/// Recognized command and button texts
pub mod commands {
    pub const START: &str = "/start";
    pub const HELP_CMD: &str = "/help";
    pub const CREATE_SESSION: &str = "🎬 Create session";
    pub const JOIN_SESSION: &str = "🔗 Join";
    pub const HELP: &str = "ℹ️ Help";
    pub const MY_SESSIONS: &str = "📊 My sessions";
    pub const CANCEL: &str = "❌ Cancel";
    pub const BACK: &str = "🔙 Back";
    pub const SKIP: &str = "⏭️ Skip";
}
