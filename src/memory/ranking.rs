//! Episode 排序：纯函数，对同一输入集合重复调用结果一致
//!
//! 排序键：score 降序 → recorded_at 降序 → sequence 降序。

use std::cmp::Ordering;

use crate::memory::Episode;

pub fn rank(mut episodes: Vec<Episode>) -> Vec<Episode> {
    episodes.sort_by(compare);
    episodes
}

fn compare(a: &Episode, b: &Episode) -> Ordering {
    b.score()
        .total_cmp(&a.score())
        .then_with(|| b.recorded_at.cmp(&a.recorded_at))
        .then_with(|| b.sequence.cmp(&a.sequence))
}
