pub mod sessions;
pub mod sqlite;

pub use sessions::{SessionStore, SqliteSessionStore};
pub use sqlite::create_pool;
