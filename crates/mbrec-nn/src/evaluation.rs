//! Leave-one-out ranking evaluation.
//!
//! Each test user contributes one candidate list: sampled unlabelled items
//! followed by the held-out item. Candidates are ordered by descending score
//! (stable, so a tie ranks the held-out item after the negatives it ties
//! with) and the held-out item's position decides the metrics.
//!
//! | Metric | Range | Per user |
//! |--------|-------|----------|
//! | HR@K   | [0, 1] | 1 if rank < K else 0 |
//! | NDCG@K | [0, 1] | 1 / log2(rank + 2) on a hit, else 0 |
//!
//! `rank` is 0-based, so a top-ranked positive scores NDCG 1.
//!
//! Scores are ordered with `f32::total_cmp`, so a NaN never breaks the sort:
//! positive NaNs rank first and negative NaNs last. The trainer rejects
//! non-finite scores before they get here.

/// Outcome for a single user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserRanking {
    /// 0-based position of the held-out item.
    pub rank: usize,
    pub hit: f64,
    pub ndcg: f64,
}

/// Rank the candidate at `positive` among `scores` with cutoff `k`.
pub fn rank_candidates(scores: &[f32], positive: usize, k: usize) -> UserRanking {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let rank = order
        .iter()
        .position(|&i| i == positive)
        .unwrap_or(scores.len());

    if rank < k {
        UserRanking {
            rank,
            hit: 1.0,
            ndcg: 1.0 / ((rank + 2) as f64).log2(),
        }
    } else {
        UserRanking {
            rank,
            hit: 0.0,
            ndcg: 0.0,
        }
    }
}

/// Mean hit rate and NDCG over users.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RankingMetrics {
    pub hr: f64,
    pub ndcg: f64,
    pub num_users: usize,
}

impl RankingMetrics {
    pub fn from_rankings(rankings: &[UserRanking]) -> Self {
        if rankings.is_empty() {
            return Self::default();
        }
        let n = rankings.len() as f64;
        Self {
            hr: rankings.iter().map(|r| r.hit).sum::<f64>() / n,
            ndcg: rankings.iter().map(|r| r.ndcg).sum::<f64>() / n,
            num_users: rankings.len(),
        }
    }

    /// User-weighted mean of several partial results.
    pub fn merge(parts: &[Self]) -> Self {
        let total: usize = parts.iter().map(|m| m.num_users).sum();
        if total == 0 {
            return Self::default();
        }
        let total_f = total as f64;
        Self {
            hr: parts.iter().map(|m| m.hr * m.num_users as f64).sum::<f64>() / total_f,
            ndcg: parts.iter().map(|m| m.ndcg * m.num_users as f64).sum::<f64>() / total_f,
            num_users: total,
        }
    }

    pub fn summary(&self) -> String {
        format!("HR: {:.4} | NDCG: {:.4} (n={})", self.hr, self.ndcg, self.num_users)
    }
}
