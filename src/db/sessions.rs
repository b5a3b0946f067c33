use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    error::{AppError, AppResult},
    models::{AnswerSet, Session, SessionStatus, UserId},
};

/// Durable record of pairing sessions and submitted answers
///
/// All operations are point lookups/writes keyed by the session code.
/// `join` is a single compare-and-set so two partners racing for the same
/// code cannot both succeed, and `complete` reports whether this caller
/// performed the transition, which gates recommendation dispatch.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new waiting session
    ///
    /// Fails with `ActiveSessionExists` if the creator already has a
    /// non-completed session, and with `CodeTaken` if the code collides
    /// with a stored session (callers retry with a fresh code).
    async fn create(&self, code: &str, creator_id: UserId) -> AppResult<()>;

    /// Atomically joins a waiting session as its partner
    ///
    /// Succeeds only while the session is waiting with no partner set and
    /// the joiner is not the creator. Returns the joined session.
    async fn join(&self, code: &str, partner_id: UserId) -> AppResult<Session>;

    /// Writes the answer set for whichever side matches `user_id`
    ///
    /// Overwrites prior answers for that side, so re-submission is
    /// idempotent per side.
    async fn record_answers(
        &self,
        code: &str,
        user_id: UserId,
        answers: &AnswerSet,
    ) -> AppResult<()>;

    /// Point lookup by code
    async fn get(&self, code: &str) -> AppResult<Option<Session>>;

    /// Both answer sets, or `None` while either side is missing
    async fn both_answers(&self, code: &str) -> AppResult<Option<(AnswerSet, AnswerSet)>>;

    /// Marks the session completed and stamps the completion time
    ///
    /// Returns true only for the caller that performed the transition;
    /// repeated calls are no-ops returning false.
    async fn complete(&self, code: &str) -> AppResult<bool>;

    /// Removes a session (cancellation and expiry cleanup)
    async fn delete(&self, code: &str) -> AppResult<()>;

    /// The creator's non-completed session, if any
    async fn find_active_by_creator(&self, user_id: UserId) -> AppResult<Option<Session>>;

    /// Non-completed sessions the user participates in, newest first
    async fn sessions_for_user(&self, user_id: UserId) -> AppResult<Vec<Session>>;
}

/// Raw row shape; answers stay JSON text until converted to a `Session`
#[derive(sqlx::FromRow)]
struct SessionRow {
    code: String,
    creator_id: i64,
    partner_id: Option<i64>,
    answers_creator: Option<String>,
    answers_partner: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for Session {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::parse(&row.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown session status: {}", row.status)))?;

        let parse_answers = |json: Option<String>| -> AppResult<Option<AnswerSet>> {
            json.map(|j| {
                serde_json::from_str(&j)
                    .map_err(|e| AppError::Internal(format!("Answer deserialization error: {}", e)))
            })
            .transpose()
        };

        Ok(Session {
            code: row.code,
            creator_id: row.creator_id,
            partner_id: row.partner_id,
            answers_creator: parse_answers(row.answers_creator)?,
            answers_partner: parse_answers(row.answers_partner)?,
            status,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

/// SQLite-backed session store
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, code: &str) -> AppResult<Option<Session>> {
        let row: Option<SessionRow> =
            sqlx::query_as("SELECT * FROM sessions WHERE code = ?")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Session::try_from).transpose()
    }
}

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, code: &str, creator_id: UserId) -> AppResult<()> {
        if let Some(existing) = self.find_active_by_creator(creator_id).await? {
            return Err(AppError::ActiveSessionExists(existing.code));
        }

        let result = sqlx::query(
            "INSERT INTO sessions (code, creator_id, status, created_at) \
             VALUES (?, ?, 'waiting', ?)",
        )
        .bind(code)
        .bind(creator_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(code = %code, creator_id, "Session created");
                Ok(())
            }
            Err(e)
                if e.as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(AppError::CodeTaken(code.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn join(&self, code: &str, partner_id: UserId) -> AppResult<Session> {
        // Single CAS: only one concurrent joiner can flip waiting -> active
        let result = sqlx::query(
            "UPDATE sessions SET partner_id = ?1, status = 'active' \
             WHERE code = ?2 AND status = 'waiting' AND partner_id IS NULL \
               AND creator_id != ?1",
        )
        .bind(partner_id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            tracing::info!(code = %code, partner_id, "Partner joined session");
            return self
                .fetch(code)
                .await?
                .ok_or_else(|| AppError::NotFound(code.to_string()));
        }

        // CAS missed: distinguish why for the user-facing message
        match self.fetch(code).await? {
            None => Err(AppError::NotFound(code.to_string())),
            Some(s) if s.creator_id == partner_id => Err(AppError::SelfJoin(code.to_string())),
            Some(_) => Err(AppError::SessionFull(code.to_string())),
        }
    }

    async fn record_answers(
        &self,
        code: &str,
        user_id: UserId,
        answers: &AnswerSet,
    ) -> AppResult<()> {
        let session = self
            .fetch(code)
            .await?
            .ok_or_else(|| AppError::NotFound(code.to_string()))?;

        let json = serde_json::to_string(answers)
            .map_err(|e| AppError::Internal(format!("Answer serialization error: {}", e)))?;

        let query = if session.creator_id == user_id {
            "UPDATE sessions SET answers_creator = ? WHERE code = ?"
        } else if session.partner_id == Some(user_id) {
            "UPDATE sessions SET answers_partner = ? WHERE code = ?"
        } else {
            return Err(AppError::NotFound(format!(
                "user {} is not a participant of {}",
                user_id, code
            )));
        };

        sqlx::query(query)
            .bind(json)
            .bind(code)
            .execute(&self.pool)
            .await?;

        tracing::debug!(code = %code, user_id, "Answers recorded");

        Ok(())
    }

    async fn get(&self, code: &str) -> AppResult<Option<Session>> {
        self.fetch(code).await
    }

    async fn both_answers(&self, code: &str) -> AppResult<Option<(AnswerSet, AnswerSet)>> {
        let session = self
            .fetch(code)
            .await?
            .ok_or_else(|| AppError::NotFound(code.to_string()))?;

        Ok(match (session.answers_creator, session.answers_partner) {
            (Some(creator), Some(partner)) => Some((creator, partner)),
            _ => None,
        })
    }

    async fn complete(&self, code: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'completed', completed_at = ? \
             WHERE code = ? AND status != 'completed'",
        )
        .bind(Utc::now())
        .bind(code)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        if claimed {
            tracing::info!(code = %code, "Session completed");
        }

        Ok(claimed)
    }

    async fn delete(&self, code: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;

        tracing::info!(code = %code, "Session deleted");

        Ok(())
    }

    async fn find_active_by_creator(&self, user_id: UserId) -> AppResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions WHERE creator_id = ? AND status != 'completed'",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn sessions_for_user(&self, user_id: UserId) -> AppResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM sessions \
             WHERE (creator_id = ?1 OR partner_id = ?1) AND status != 'completed' \
             ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }
}
