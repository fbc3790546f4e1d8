//! Question sourcing: curated pool, AI fallback, pack assembly

pub mod ai;
pub mod assembler;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::MatchMode;

/// Question difficulty buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// A sourced multiple-choice question, options and answer normalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub options: Vec<String>,
    pub answer: String,
    /// "curated" or "ai"
    pub source: String,
}

/// Request for one match's worth of questions
#[derive(Debug, Clone)]
pub struct PackRequest {
    pub category: String,
    pub difficulty_counts: HashMap<Difficulty, usize>,
    pub total_questions: usize,
    pub seed: String,
    /// Both participants for cross-match uniqueness; empty for private
    /// rooms
    pub user_ids: Vec<Uuid>,
    pub match_mode: MatchMode,
}

/// Normalization applied to options, answers, and submissions so the
/// correctness check is an exact string equality.
pub fn normalize_text(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Bring a sourced question into canonical form: normalized options and
/// answer, answer guaranteed present among the options, id defaulted.
pub fn normalize_question(mut q: Question) -> Question {
    q.prompt = q.prompt.trim().to_string();
    q.answer = normalize_text(&q.answer);
    q.options = q.options.iter().map(|o| normalize_text(o)).collect();
    if !q.answer.is_empty() && !q.options.iter().any(|o| *o == q.answer) {
        q.options.push(q.answer.clone());
    }
    if q.id.is_empty() {
        q.id = Uuid::new_v4().to_string();
    }
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Paris "), "paris");
        assert_eq!(normalize_text("TOKYO"), "tokyo");
    }

    #[test]
    fn test_normalize_question_ensures_answer_in_options() {
        let q = normalize_question(Question {
            id: String::new(),
            prompt: " Capital of France? ".to_string(),
            options: vec!["London".into(), "Berlin".into(), "Madrid".into()],
            answer: " Paris".to_string(),
            source: "ai".to_string(),
        });
        assert!(!q.id.is_empty());
        assert_eq!(q.prompt, "Capital of France?");
        assert_eq!(q.answer, "paris");
        assert!(q.options.contains(&"paris".to_string()));
        assert!(q.options.contains(&"london".to_string()));
    }

    #[test]
    fn test_difficulty_serializes_lowercase() {
        let json = serde_json::to_string(&Difficulty::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
