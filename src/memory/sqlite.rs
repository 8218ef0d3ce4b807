//! SQLite 持久化的 Episode 日志
//!
//! 每条 Episode 一行（完整 JSON 存于 payload），单条 INSERT 即原子追加；WAL 模式。
//! rusqlite 为同步 API，调用统一放入 spawn_blocking。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use crate::core::TaskSignature;
use crate::memory::{Episode, EpisodeStore, MemoryError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS episodes (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    id          TEXT NOT NULL UNIQUE,
    signature   TEXT NOT NULL,
    platform    TEXT NOT NULL,
    description TEXT NOT NULL,
    status      TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    payload     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_episodes_signature ON episodes(signature);
";

#[derive(Debug, Clone)]
pub struct SqliteEpisodeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEpisodeStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MemoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, MemoryError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| MemoryError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| MemoryError::Join(e.to_string()))?
    }

    fn read_rows(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Episode>, MemoryError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut episodes = Vec::new();
        for row in rows {
            let (seq, payload) = row?;
            let mut episode: Episode = serde_json::from_str(&payload)?;
            episode.sequence = seq as u64;
            episodes.push(episode);
        }
        Ok(episodes)
    }
}

#[async_trait]
impl EpisodeStore for SqliteEpisodeStore {
    async fn append(&self, episode: &Episode) -> Result<u64, MemoryError> {
        let payload = serde_json::to_string(episode)?;
        let episode = episode.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO episodes (id, signature, platform, description, status, recorded_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    episode.id,
                    episode.signature.as_str(),
                    episode.platform.as_str(),
                    episode.description,
                    episode.status.as_str(),
                    episode.recorded_at.to_rfc3339(),
                    payload,
                ],
            )?;
            Ok(conn.last_insert_rowid() as u64)
        })
        .await
    }

    async fn load(&self, signature: &TaskSignature) -> Result<Vec<Episode>, MemoryError> {
        let signature = signature.as_str().to_string();
        self.with_conn(move |conn| {
            Self::read_rows(
                conn,
                "SELECT seq, payload FROM episodes WHERE signature = ?1 ORDER BY seq",
                params![signature],
            )
        })
        .await
    }

    async fn all(&self) -> Result<Vec<Episode>, MemoryError> {
        self.with_conn(|conn| {
            Self::read_rows(conn, "SELECT seq, payload FROM episodes ORDER BY seq", params![])
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;
    use crate::core::{Plan, Task, TaskStatus};

    #[tokio::test]
    async fn test_append_assigns_sequence() {
        let store = SqliteEpisodeStore::open_in_memory().unwrap();
        let task = Task::new("open settings", Platform::Android);
        let a = Episode::new(&task, Plan::new(vec![]), vec![], TaskStatus::Failed);
        let b = Episode::new(&task, Plan::new(vec![]), vec![], TaskStatus::Failed);
        assert_eq!(store.append(&a).await.unwrap(), 1);
        assert_eq!(store.append(&b).await.unwrap(), 2);
        let loaded = store.load(&task.signature).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].sequence, 2);
        assert_eq!(loaded[1].id, b.id);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = SqliteEpisodeStore::open_in_memory().unwrap();
        let task = Task::new("open settings", Platform::Web);
        let a = Episode::new(&task, Plan::new(vec![]), vec![], TaskStatus::Failed);
        store.append(&a).await.unwrap();
        assert!(matches!(store.append(&a).await, Err(MemoryError::Sqlite(_))));
        assert_eq!(store.all().await.unwrap().len(), 1);
    }
}
