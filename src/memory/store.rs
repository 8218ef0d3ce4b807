//! Episode 存储抽象与内存实现
//!
//! 只追加：record 一次写入一条完整 Episode，读取时再排序（ranking::rank）。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::core::TaskSignature;
use crate::memory::{rank, Episode};

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    Join(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// 原子追加一条 Episode，返回分配的写入序号
    async fn append(&self, episode: &Episode) -> Result<u64, MemoryError>;

    /// 某签名下的全部 Episode（未排序）
    async fn load(&self, signature: &TaskSignature) -> Result<Vec<Episode>, MemoryError>;

    /// 全部 Episode，按写入顺序
    async fn all(&self) -> Result<Vec<Episode>, MemoryError>;

    /// 某签名下排好序的 Episode
    async fn lookup(&self, signature: &TaskSignature) -> Result<Vec<Episode>, MemoryError> {
        Ok(rank(self.load(signature).await?))
    }

    async fn record(&self, episode: &Episode) -> Result<u64, MemoryError> {
        self.append(episode).await
    }
}

/// 进程内存储（试跑 / 测试）
#[derive(Debug, Default)]
pub struct InMemoryEpisodeStore {
    episodes: RwLock<Vec<Episode>>,
    next_seq: AtomicU64,
}

impl InMemoryEpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodeStore for InMemoryEpisodeStore {
    async fn append(&self, episode: &Episode) -> Result<u64, MemoryError> {
        let mut episodes = self.episodes.write().await;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = episode.clone();
        stored.sequence = seq;
        episodes.push(stored);
        Ok(seq)
    }

    async fn load(&self, signature: &TaskSignature) -> Result<Vec<Episode>, MemoryError> {
        Ok(self
            .episodes
            .read()
            .await
            .iter()
            .filter(|e| &e.signature == signature)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Episode>, MemoryError> {
        Ok(self.episodes.read().await.clone())
    }
}
