use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt::Display};

pub mod questionnaire;

pub use questionnaire::QuestionnaireProgress;

/// Chat-platform numeric user identifier
pub type UserId = i64;

/// Free-form answers keyed by question key
pub type AnswerSet = HashMap<String, String>;

/// Number of characters in a session code
pub const CODE_LENGTH: usize = 6;

/// Alphabet used for session codes (uppercase letters and digits)
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Lifecycle status of a pairing session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, waiting for a partner to join
    Waiting,
    /// Partner joined, questionnaires in progress
    Active,
    /// Recommendation dispatched
    Completed,
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

impl SessionStatus {
    /// Parses the lowercase database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(SessionStatus::Waiting),
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            _ => None,
        }
    }
}

/// A pairing session between two users, identified by a 6-character code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub code: String,
    pub creator_id: UserId,
    pub partner_id: Option<UserId>,
    pub answers_creator: Option<AnswerSet>,
    pub answers_partner: Option<AnswerSet>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Returns true if the user is the creator or the joined partner
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.creator_id == user_id || self.partner_id == Some(user_id)
    }

    /// The other participant, if both sides are present
    pub fn partner_of(&self, user_id: UserId) -> Option<UserId> {
        if self.creator_id == user_id {
            self.partner_id
        } else if self.partner_id == Some(user_id) {
            Some(self.creator_id)
        } else {
            None
        }
    }
}

/// Normalizes raw user input into a canonical session code
///
/// Trims whitespace and uppercases. Returns `None` when the input is not
/// exactly 6 ASCII alphanumeric characters; callers report that as a
/// validation error without consuming state.
pub fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        Some(code)
    } else {
        None
    }
}

/// Generates a fresh random 6-character session code
///
/// Uniform over uppercase letters and digits. Uniqueness against live
/// sessions is enforced at creation time with collision retry.
pub fn generate_code() -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
