//! Client-side relevance ranking of board items against a free-text query.

use qboard_core::{Item, Snapshot};

pub use strsim::levenshtein;

#[derive(Debug, Clone, Copy)]
pub struct RankConfig {
    /// Minimum edit-distance similarity (exclusive) for a non-substring match.
    pub threshold: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedItem {
    pub item: Item,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FuzzyRanker {
    config: RankConfig,
}

impl FuzzyRanker {
    pub fn new(config: RankConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> RankConfig {
        self.config
    }

    pub fn normalize(input: &str) -> String {
        input.trim().to_lowercase()
    }

    /// `1 - distance / longest`, in `[0, 1]`. Expects normalized inputs.
    pub fn similarity(query: &str, content: &str) -> f64 {
        let longest = query
            .chars()
            .count()
            .max(content.chars().count())
            .max(1);
        1.0 - levenshtein(query, content) as f64 / longest as f64
    }

    /// Score of one item, or `None` when it does not match the normalized query.
    pub fn score(&self, normalized_query: &str, content: &str) -> Option<f64> {
        self.score_normalized(normalized_query, &Self::normalize(content))
    }

    fn score_normalized(&self, query: &str, content: &str) -> Option<f64> {
        if content.contains(query) {
            return Some(1.0);
        }
        let ratio = Self::similarity(query, content);
        (ratio > self.config.threshold).then_some(ratio)
    }

    /// Matching items, best first. Ties keep their input order.
    pub fn rank(&self, query: &str, items: &[Item]) -> Vec<RankedItem> {
        let query = Self::normalize(query);

        if query.is_empty() {
            let mut ranked = items
                .iter()
                .map(|item| RankedItem {
                    item: item.clone(),
                    score: 1.0,
                })
                .collect::<Vec<_>>();
            ranked.sort_by(|a, b| b.item.votes.cmp(&a.item.votes));
            return ranked;
        }

        let mut scored = items
            .iter()
            .filter_map(|item| {
                let content = Self::normalize(&item.content);
                let exact = content == query;
                self.score_normalized(&query, &content).map(|score| {
                    (
                        exact,
                        RankedItem {
                            item: item.clone(),
                            score,
                        },
                    )
                })
            })
            .collect::<Vec<_>>();
        // An exact match leads the other full-score substring matches.
        scored.sort_by(|(exact_a, a), (exact_b, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| exact_b.cmp(exact_a))
        });
        scored.into_iter().map(|(_, ranked)| ranked).collect()
    }

    pub fn rank_snapshot(&self, query: &str, items: &[Item]) -> Snapshot {
        self.rank(query, items)
            .into_iter()
            .map(|ranked| ranked.item)
            .collect()
    }
}
