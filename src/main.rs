use std::{
    sync::atomic::{AtomicI64, Ordering},
    sync::Arc,
    time::Duration,
};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use movie_match::{
    config::Config,
    db::{create_pool, SqliteSessionStore},
    error::AppResult,
    models::UserId,
    services::{CannedRecommender, GeminiRecommender, PairingEngine, Recommender},
    transport::{Keyboard, MessageId, Transport},
};

/// Console transport for local runs
///
/// Outbound messages are printed; inbound lines are `<user_id> <text>`,
/// which lets two "users" be driven from one terminal.
struct ConsoleTransport {
    next_message_id: AtomicI64,
}

#[async_trait::async_trait]
impl Transport for ConsoleTransport {
    async fn send(
        &self,
        user_id: UserId,
        text: &str,
        keyboard: Keyboard,
    ) -> AppResult<MessageId> {
        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        println!("→ [{}] ({:?})\n{}\n", user_id, keyboard, text);
        Ok(message_id)
    }

    async fn edit(&self, user_id: UserId, message_id: MessageId, text: &str) -> AppResult<()> {
        println!("✎ [{}] (message {})\n{}\n", user_id, message_id, text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    let store = Arc::new(SqliteSessionStore::new(pool));

    let recommender: Arc<dyn Recommender> = match &config.gemini_api_key {
        Some(key) => Arc::new(GeminiRecommender::new(
            key.clone(),
            config.gemini_api_url.clone(),
            config.gemini_model.clone(),
        )),
        None => {
            tracing::warn!("GEMINI_API_KEY not set, using canned recommendations");
            Arc::new(CannedRecommender)
        }
    };

    let transport = Arc::new(ConsoleTransport {
        next_message_id: AtomicI64::new(1),
    });

    let engine = PairingEngine::new(
        store,
        recommender,
        transport,
        Duration::from_secs(config.session_ttl_secs),
    );

    tracing::info!("Movie match engine started (console transport)");
    println!("Type messages as: <user_id> <text>    e.g.  1 /start");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.split_once(' ') {
            Some((id, text)) if !text.trim().is_empty() => match id.parse::<UserId>() {
                Ok(user_id) => engine.handle_message(user_id, text).await,
                Err(_) => eprintln!("expected: <user_id> <text>"),
            },
            _ => eprintln!("expected: <user_id> <text>"),
        }
    }

    Ok(())
}
