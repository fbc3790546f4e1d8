//! Scoring engine: pure, deterministic, no I/O
//!
//! Per answer: base + time bonus (linear decay) + streak bonus
//! (percentage of base, capped). Aggregation re-computes every answer
//! from its recorded time remaining so the total depends only on the
//! answer log, never on when finalization runs.

use crate::model::{AnswerRecord, Score};

/// Configurable scoring constants
#[derive(Debug, Clone, Copy)]
pub struct ScoringConfig {
    pub base: Score,
    pub max_time_bonus: Score,
    /// Bonus fraction of base per consecutive correct answer
    pub streak_bonus_per_correct: f64,
    /// Cap on the streak multiplier
    pub streak_bonus_cap: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base: 100,
            max_time_bonus: 50,
            streak_bonus_per_correct: 0.05,
            streak_bonus_cap: 0.50,
        }
    }
}

/// Aggregated outcome for one player's answer log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalScore {
    pub total: Score,
    /// correct / total questions, in [0, 1]
    pub accuracy: f64,
    /// min(max streak * per-correct bonus, cap)
    pub streak_bonus_pct: f64,
}

/// Computes server-side scores with configurable constants
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Points for a single answer. `streak` counts consecutive correct
    /// answers including this one.
    pub fn score_answer(
        &self,
        is_correct: bool,
        time_remaining_ms: u64,
        per_question_timeout_ms: u64,
        streak: usize,
    ) -> Score {
        if !is_correct {
            return 0;
        }

        let mut score = self.config.base;

        if per_question_timeout_ms > 0 {
            let ratio =
                (time_remaining_ms as f64 / per_question_timeout_ms as f64).clamp(0.0, 1.0);
            score += (self.config.max_time_bonus as f64 * ratio).floor() as Score;
        }

        if streak > 0 {
            let multiplier = (streak as f64 * self.config.streak_bonus_per_correct)
                .min(self.config.streak_bonus_cap);
            score += (self.config.base as f64 * multiplier).floor() as Score;
        }

        score
    }

    /// Aggregate an N-length answer log into the final totals. Each
    /// answer is re-scored from its recorded time remaining and the
    /// streak implied by the ordered log, which reproduces the value
    /// stored at submission time.
    pub fn compute_final(
        &self,
        answers: &[AnswerRecord],
        per_question_timeout_ms: u64,
    ) -> FinalScore {
        if answers.is_empty() {
            return FinalScore {
                total: 0,
                accuracy: 0.0,
                streak_bonus_pct: 0.0,
            };
        }

        let mut total: Score = 0;
        let mut correct = 0usize;
        let mut streak = 0usize;
        let mut max_streak = 0usize;

        for ans in answers {
            if ans.is_correct {
                correct += 1;
                streak += 1;
                max_streak = max_streak.max(streak);
            } else {
                streak = 0;
            }

            total += self.score_answer(
                ans.is_correct,
                ans.time_remaining_ms,
                per_question_timeout_ms,
                streak,
            );
        }

        let streak_bonus_pct = if max_streak > 0 {
            (max_streak as f64 * self.config.streak_bonus_per_correct)
                .min(self.config.streak_bonus_cap)
        } else {
            0.0
        };

        FinalScore {
            total,
            accuracy: correct as f64 / answers.len() as f64,
            streak_bonus_pct,
        }
    }

    /// Upper bound for a single correct answer
    pub fn max_answer_score(&self) -> Score {
        self.config.base
            + self.config.max_time_bonus
            + (self.config.base as f64 * self.config.streak_bonus_cap).floor() as Score
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT_MS: u64 = 15_000;

    fn engine() -> ScoringEngine {
        ScoringEngine::default()
    }

    fn record(order: usize, correct: bool, time_remaining_ms: u64) -> AnswerRecord {
        AnswerRecord {
            question_order: order,
            question_token: format!("tok-{}", order),
            answer: "x".to_string(),
            submitted_at: 0,
            time_remaining_ms,
            is_correct: correct,
            score_earned: 0,
        }
    }

    #[test]
    fn test_incorrect_scores_zero() {
        assert_eq!(engine().score_answer(false, TIMEOUT_MS, TIMEOUT_MS, 5), 0);
    }

    #[test]
    fn test_instant_answer_gets_full_time_bonus() {
        assert_eq!(engine().score_answer(true, TIMEOUT_MS, TIMEOUT_MS, 0), 150);
    }

    #[test]
    fn test_expired_answer_gets_base_only() {
        assert_eq!(engine().score_answer(true, 0, TIMEOUT_MS, 0), 100);
    }

    #[test]
    fn test_time_bonus_decays_linearly() {
        // Two thirds of the budget left -> floor(50 * 2/3) = 33
        assert_eq!(engine().score_answer(true, 10_000, TIMEOUT_MS, 0), 133);
    }

    #[test]
    fn test_streak_bonus_caps_at_fifty_percent() {
        let e = engine();
        // Streak 3 -> +15
        assert_eq!(e.score_answer(true, 0, TIMEOUT_MS, 3), 115);
        // Streak 20 -> capped at +50
        assert_eq!(e.score_answer(true, 0, TIMEOUT_MS, 20), 150);
    }

    #[test]
    fn test_time_ratio_clamped_above_one() {
        // A client-reported instant earlier than the server clock must
        // not earn more than the full bonus
        assert_eq!(engine().score_answer(true, TIMEOUT_MS * 2, TIMEOUT_MS, 0), 150);
    }

    #[test]
    fn test_perfect_five_question_game() {
        // Five instant correct answers: 5 * 150 + (5+10+15+20+25) = 825
        let answers: Vec<AnswerRecord> =
            (1..=5).map(|i| record(i, true, TIMEOUT_MS)).collect();
        let result = engine().compute_final(&answers, TIMEOUT_MS);
        assert_eq!(result.total, 825);
        assert_eq!(result.accuracy, 1.0);
        assert!((result.streak_bonus_pct - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_streak_resets_on_miss() {
        let answers = vec![
            record(1, true, TIMEOUT_MS),  // streak 1 -> 155
            record(2, false, 0),          // 0
            record(3, true, TIMEOUT_MS),  // streak 1 -> 155
        ];
        let result = engine().compute_final(&answers, TIMEOUT_MS);
        assert_eq!(result.total, 310);
        assert!((result.accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert!((result.streak_bonus_pct - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_matches_submission_scores() {
        let e = engine();
        let mut answers = Vec::new();
        let mut streak = 0usize;
        let mut expected: Score = 0;
        for (i, (correct, remaining)) in [
            (true, 12_000),
            (true, 8_000),
            (false, 3_000),
            (true, 15_000),
            (true, 500),
        ]
        .iter()
        .enumerate()
        {
            streak = if *correct { streak + 1 } else { 0 };
            let score = e.score_answer(*correct, *remaining, TIMEOUT_MS, streak);
            expected += score;
            let mut rec = record(i + 1, *correct, *remaining);
            rec.score_earned = score;
            answers.push(rec);
        }

        let result = e.compute_final(&answers, TIMEOUT_MS);
        assert_eq!(result.total, expected);
        let stored: Score = answers.iter().map(|a| a.score_earned).sum();
        assert_eq!(result.total, stored);
    }

    #[test]
    fn test_score_bounds() {
        let e = engine();
        assert_eq!(e.max_answer_score(), 200);
        for streak in 0..30 {
            for remaining in [0u64, 1, 7_500, TIMEOUT_MS] {
                let s = e.score_answer(true, remaining, TIMEOUT_MS, streak);
                assert!(s >= 100 && s <= 200, "score {} out of bounds", s);
            }
        }
    }

    #[test]
    fn test_empty_log() {
        let result = engine().compute_final(&[], TIMEOUT_MS);
        assert_eq!(result.total, 0);
        assert_eq!(result.accuracy, 0.0);
        assert_eq!(result.streak_bonus_pct, 0.0);
    }
}
