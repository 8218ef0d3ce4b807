//! 描述近似匹配：小写分词 + Jaccard 相似度

use std::collections::HashSet;

pub fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// |A ∩ B| / |A ∪ B|，两边都为空时为 0
pub fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokenize_lower(a);
    let tb = tokenize_lower(b);
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("Click login", "click LOGIN"), 1.0);
        assert!((jaccard("click login button", "click login") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(jaccard("", ""), 0.0);
        assert_eq!(jaccard("open settings", "close app"), 0.0);
    }
}
