//! Question pack assembly
//!
//! Priority ladder per difficulty bucket: curated pool first, then one
//! AI call carrying the whole shortfall vector. Two uniqueness layers
//! follow: within-match id dedupe (mandatory) and a cross-match filter
//! against both 1v1 players' recently-seen sets. Every served item is
//! bound to a server-signed token.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{info, warn};

use crate::error::{MatchError, Result};
use crate::model::{MatchMode, QuestionPackItem};
use crate::questions::ai::{AiGenerateRequest, QuestionGenerator};
use crate::questions::{normalize_question, Difficulty, PackRequest, Question};
use crate::storage::QuestionRepository;
use crate::store::MatchStateStore;

type HmacSha256 = Hmac<Sha256>;

/// Duplicates tolerated against the players' combined history
const DUPLICATE_TOLERANCE: usize = 3;

/// Regeneration budget for within-match dedupe
const LEVEL1_REGEN_ATTEMPTS: u32 = 2;

/// Builds signed, unique question packs
pub struct PackAssembler {
    repo: Arc<dyn QuestionRepository>,
    generator: Option<Arc<dyn QuestionGenerator>>,
    store: Arc<MatchStateStore>,
    hmac_key: Vec<u8>,
}

impl PackAssembler {
    pub fn new(
        repo: Arc<dyn QuestionRepository>,
        generator: Option<Arc<dyn QuestionGenerator>>,
        store: Arc<MatchStateStore>,
        secret: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            repo,
            generator,
            store,
            hmac_key: secret.as_ref().to_vec(),
        }
    }

    /// Assemble an ordered pack of `total_questions` items
    pub async fn assemble(&self, req: &PackRequest) -> Result<Vec<QuestionPackItem>> {
        let mut result: Vec<Question> = Vec::with_capacity(req.total_questions);
        let mut shortfall: HashMap<Difficulty, usize> = HashMap::new();

        for (diff, count) in &req.difficulty_counts {
            if *count == 0 {
                continue;
            }
            let curated = self.repo.fetch_pool(*count).await?;
            let got = curated.len();
            result.extend(curated.into_iter().map(normalize_question));
            if got < *count {
                shortfall.insert(*diff, count - got);
            }
        }

        let total_short: usize = shortfall.values().sum();
        if total_short > 0 {
            let generated = self
                .generate(&req.category, shortfall, req.seed.clone())
                .await
                .map_err(|e| {
                    MatchError::InsufficientQuestions(format!(
                        "curated pool short by {} and ai fallback failed: {}",
                        total_short,
                        e.message()
                    ))
                })?;
            self.record_verified(&generated).await;
            result.extend(generated);
            self.prewarm_generator(req);
        }

        result = self.dedupe_within_match(req, result).await;
        if result.len() < req.total_questions {
            return Err(MatchError::InsufficientQuestions(format!(
                "need {} questions, assembled {}",
                req.total_questions,
                result.len()
            )));
        }
        result.truncate(req.total_questions);

        if req.match_mode == MatchMode::Random1v1 && req.user_ids.len() >= 2 {
            result = self.filter_recently_seen(req, result).await?;
        }

        let items: Vec<QuestionPackItem> = result
            .into_iter()
            .enumerate()
            .map(|(i, q)| QuestionPackItem {
                order: i + 1,
                token: self.sign_token(&q.id, &q.answer),
                id: q.id,
                prompt: q.prompt,
                options: q.options,
                correct_answer: q.answer,
            })
            .collect();

        if req.match_mode == MatchMode::Random1v1 {
            let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
            for user_id in &req.user_ids {
                self.store.add_recent_questions(*user_id, &ids).await;
            }
        }

        info!(
            total = items.len(),
            seed = %req.seed,
            mode = req.match_mode.as_str(),
            "question pack assembled"
        );
        Ok(items)
    }

    /// Sign a question token: hex HMAC over `id:answer`
    pub fn sign_token(&self, question_id: &str, correct_answer: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key)
            .expect("hmac accepts any key length");
        mac.update(question_id.as_bytes());
        mac.update(b":");
        mac.update(correct_answer.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a token against the (id, answer) pair it should bind
    pub fn verify_token(&self, token: &str, question_id: &str, correct_answer: &str) -> bool {
        self.sign_token(question_id, correct_answer) == token
    }

    async fn generate(
        &self,
        category: &str,
        needs: HashMap<Difficulty, usize>,
        seed: String,
    ) -> Result<Vec<Question>> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| MatchError::upstream("ai generator unavailable"))?;
        let count = needs.values().sum();
        generator
            .generate_pack(AiGenerateRequest {
                category: category.to_string(),
                count,
                seed,
                difficulty_counts: needs,
            })
            .await
    }

    /// Level 1: ids must be distinct within the match. Regenerates the
    /// gap proportionally per difficulty, appending only unseen ids.
    async fn dedupe_within_match(&self, req: &PackRequest, result: Vec<Question>) -> Vec<Question> {
        let mut seen = HashSet::new();
        let mut filtered: Vec<Question> = Vec::with_capacity(result.len());
        let had_duplicates = {
            let before = result.len();
            for q in result {
                if seen.insert(q.id.clone()) {
                    filtered.push(q);
                }
            }
            filtered.len() != before
        };

        if !had_duplicates || filtered.len() >= req.total_questions {
            return filtered;
        }

        for attempt in 1..=LEVEL1_REGEN_ATTEMPTS {
            let needed = req.total_questions - filtered.len();
            if needed == 0 {
                break;
            }
            let needs =
                proportional_needs(&req.difficulty_counts, req.total_questions, needed);
            let seed = format!("{}-retry{}", req.seed, attempt);
            match self.generate(&req.category, needs, seed).await {
                Ok(extra) => {
                    self.record_verified(&extra).await;
                    for q in extra {
                        if filtered.len() >= req.total_questions {
                            break;
                        }
                        if seen.insert(q.id.clone()) {
                            filtered.push(q);
                        }
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "dedupe regeneration failed");
                }
            }
        }

        filtered
    }

    /// Level 2 (random 1v1 only): keep repetition across matches rare.
    /// Up to three history duplicates are tolerated; beyond that the
    /// pack is rebuilt from ids neither player has seen.
    async fn filter_recently_seen(
        &self,
        req: &PackRequest,
        result: Vec<Question>,
    ) -> Result<Vec<Question>> {
        let first = req.user_ids[0];
        let second = req.user_ids[1];

        let ids: Vec<String> = result.iter().map(|q| q.id.clone()).collect();
        let check = self.store.check_recent_for_pair(first, second, &ids).await;
        let max_dup = check.max_duplicates();
        if max_dup == 0 {
            return Ok(result);
        }

        let unseen: HashSet<&String> = check.unseen_by_both.iter().collect();
        let mut filtered: Vec<Question> = Vec::with_capacity(req.total_questions);
        let mut duplicates: Vec<Question> = Vec::new();
        for q in &result {
            if unseen.contains(&q.id) {
                filtered.push(q.clone());
            } else {
                duplicates.push(q.clone());
            }
        }

        if max_dup > DUPLICATE_TOLERANCE {
            // Too much repetition: replace history hits with fresh ids
            let mut in_match: HashSet<String> =
                filtered.iter().map(|q| q.id.clone()).collect();
            let needed = req.total_questions.saturating_sub(filtered.len());
            if needed > 0 {
                let needs =
                    proportional_needs(&req.difficulty_counts, req.total_questions, needed);
                let seed = format!("{}-unique", req.seed);
                match self.generate(&req.category, needs, seed).await {
                    Ok(extra) => {
                        self.record_verified(&extra).await;
                        for q in extra {
                            if filtered.len() >= req.total_questions {
                                break;
                            }
                            if in_match.contains(&q.id) {
                                continue;
                            }
                            let seen_first = self.store.recent_contains(first, &q.id).await;
                            let seen_second = self.store.recent_contains(second, &q.id).await;
                            if !seen_first && !seen_second {
                                in_match.insert(q.id.clone());
                                filtered.push(q);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "uniqueness regeneration failed");
                    }
                }
            }
        } else {
            // Tolerated: pull duplicates back in as needed to fill
            for q in duplicates {
                if filtered.len() >= req.total_questions {
                    break;
                }
                filtered.push(q);
            }
        }

        if filtered.len() < req.total_questions {
            return Err(MatchError::InsufficientUniqueQuestions(format!(
                "need {} unseen questions, found {}",
                req.total_questions,
                filtered.len()
            )));
        }
        filtered.truncate(req.total_questions);
        Ok(filtered)
    }

    /// The curated pool ran dry, so nudge the generator to prep the
    /// next pack off the request path. Fire-and-forget.
    fn prewarm_generator(&self, req: &PackRequest) {
        let Some(generator) = self.generator.clone() else {
            return;
        };
        let enqueue = AiGenerateRequest {
            category: req.category.clone(),
            count: req.total_questions,
            seed: format!("{}-next", req.seed),
            difficulty_counts: req.difficulty_counts.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = generator.enqueue_pack(enqueue).await {
                warn!(error = %e, "generator pre-warm enqueue failed");
            }
        });
    }

    /// Newly generated questions feed back into the curated pool
    async fn record_verified(&self, questions: &[Question]) {
        let ai_sourced: Vec<Question> = questions
            .iter()
            .filter(|q| q.source == "ai")
            .cloned()
            .collect();
        if ai_sourced.is_empty() {
            return;
        }
        if let Err(e) = self.repo.insert_verified(&ai_sourced).await {
            warn!(error = %e, "failed to persist generated questions");
        }
    }
}

/// Split `needed` across difficulties in proportion to the original
/// request, flooring at one for every bucket the original used.
fn proportional_needs(
    original: &HashMap<Difficulty, usize>,
    total: usize,
    needed: usize,
) -> HashMap<Difficulty, usize> {
    let mut needs = HashMap::new();
    for (diff, count) in original {
        if *count == 0 {
            continue;
        }
        let share = (needed as f64 * (*count as f64 / total as f64)).floor() as usize;
        needs.insert(*diff, share.max(1));
    }
    needs
}
