//! 经验记忆：按任务签名追加的 Episode 日志，读取时排序
//!
//! 精确签名是主匹配；可选的描述近似匹配（同平台、Jaccard ≥ 阈值）只作为分解提示，从不直接替代计划。

pub mod episode;
pub mod ranking;
pub mod similarity;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

pub use episode::Episode;
pub use ranking::rank;
pub use similarity::{jaccard, tokenize_lower};
pub use sqlite::SqliteEpisodeStore;
pub use store::{EpisodeStore, InMemoryEpisodeStore, MemoryError};

use crate::core::Task;

/// 一次召回的结果
#[derive(Debug, Clone, Default)]
pub struct Recall {
    /// 同签名，已排序
    pub exact: Vec<Episode>,
    /// 近似描述（同平台、不同签名），按相似度降序
    pub similar: Vec<Episode>,
}

impl Recall {
    /// 排名第一的精确匹配
    pub fn best(&self) -> Option<&Episode> {
        self.exact.first()
    }

    /// 注入分解 prompt 的 Episode：精确匹配优先，不足时用近似补齐
    pub fn hints(&self, max: usize) -> Vec<Episode> {
        self.exact
            .iter()
            .chain(self.similar.iter())
            .take(max)
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.similar.is_empty()
    }
}

/// 记忆门面：持有存储与召回策略
#[derive(Clone)]
pub struct Memory {
    store: Arc<dyn EpisodeStore>,
    near_match: Option<f64>,
}

impl Memory {
    pub fn new(store: Arc<dyn EpisodeStore>) -> Self {
        Self {
            store,
            near_match: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEpisodeStore::new()))
    }

    /// 启用近似匹配，阈值取 (0, 1]
    pub fn with_near_match(mut self, threshold: f64) -> Self {
        self.near_match = Some(threshold.clamp(f64::EPSILON, 1.0));
        self
    }

    pub fn store(&self) -> &Arc<dyn EpisodeStore> {
        &self.store
    }

    pub async fn lookup(&self, task: &Task) -> Result<Vec<Episode>, MemoryError> {
        self.store.lookup(&task.signature).await
    }

    pub async fn recall(&self, task: &Task) -> Result<Recall, MemoryError> {
        let exact = self.store.lookup(&task.signature).await?;
        let similar = match self.near_match {
            Some(threshold) => {
                let mut scored: Vec<(f64, Episode)> = rank(self.store.all().await?)
                    .into_iter()
                    .filter(|e| e.platform == task.platform && e.signature != task.signature)
                    .map(|e| (jaccard(&e.description, &task.description), e))
                    .filter(|(sim, _)| *sim >= threshold)
                    .collect();
                scored.sort_by(|a, b| b.0.total_cmp(&a.0));
                scored.into_iter().map(|(_, e)| e).collect()
            }
            None => Vec::new(),
        };
        tracing::debug!(
            signature = %task.signature,
            exact = exact.len(),
            similar = similar.len(),
            "memory recall"
        );
        Ok(Recall { exact, similar })
    }

    pub async fn record(&self, episode: &Episode) -> Result<u64, MemoryError> {
        let seq = self.store.record(episode).await?;
        tracing::info!(
            episode = %episode.id,
            signature = %episode.signature,
            status = %episode.status,
            seq,
            "episode recorded"
        );
        Ok(seq)
    }

    pub async fn all(&self) -> Result<Vec<Episode>, MemoryError> {
        self.store.all().await
    }
}
