//! Practice state machine.
//!
//! The central controller: serves `next_prompt` pulls and consumes
//! `submit_answer` pushes across the three difficulty modes. There are no
//! in-memory session objects — every operation reloads the session row,
//! transitions, and persists before responding. Per-session transitions are
//! serialized by an async mutex held for the whole read-modify-write,
//! including the variation-service call; the call happens before any state
//! write so a failed blanking step leaves the cursor where it was.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::blanking::{BlankRequest, Variation, VariationGenerator};
use crate::shuffle;

use super::completion;
use super::error::{PracticeError, Result};
use super::models::*;
use super::ordering;
use super::storage::PracticeStore;
use super::timing::{self, MAX_SPEED_MODIFIER, MIN_SPEED_MODIFIER};

/// Inputs to `start_session`. Optional fields fall back to the session and
/// settings defaults.
#[derive(Debug, Clone, Default)]
pub struct StartSession {
    pub display_time_secs: Option<f64>,
    pub answer_time_limit_secs: Option<u32>,
    pub group_size: Option<u32>,
    pub randomize_order: bool,
    pub adaptive_preview: Option<bool>,
    pub adaptive_answer: Option<bool>,
    /// Legacy single toggle; maps onto both split flags when they are unset
    pub adaptive_timing: Option<bool>,
    pub speed_modifier: Option<f64>,
    pub prompt_type: Option<PromptType>,
    pub blank_ratio: Option<f64>,
    pub seed: Option<u64>,
}

pub struct PracticeEngine {
    store: Mutex<PracticeStore>,
    generator: Arc<dyn VariationGenerator>,
    /// One lock per live session; transitions for the same session are
    /// serialized, different sessions proceed in parallel.
    session_locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl PracticeEngine {
    pub fn new(store: PracticeStore, generator: Arc<dyn VariationGenerator>) -> Self {
        Self {
            store: Mutex::new(store),
            generator,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, PracticeStore>> {
        self.store
            .lock()
            .map_err(|_| PracticeError::Integrity("store lock poisoned".to_string()))
    }

    fn session_lock(&self, session_id: Uuid) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .session_locks
            .lock()
            .map_err(|_| PracticeError::Integrity("session lock table poisoned".to_string()))?;
        Ok(Arc::clone(
            locks.entry(session_id).or_default(),
        ))
    }

    /// Load a session, enforcing ownership. A session owned by another user
    /// is indistinguishable from a missing one.
    fn load_session(store: &PracticeStore, session_id: Uuid, user_id: Uuid) -> Result<Session> {
        let session = store.get_session(session_id)?;
        if session.user_id != user_id {
            return Err(PracticeError::NotFound(format!("session {}", session_id)));
        }
        Ok(session)
    }

    // ==================== Sets ====================

    /// Thin wrapper for creating a set with its cards in one call — just
    /// enough surface to drive sessions.
    pub fn create_set(
        &self,
        user_id: Uuid,
        name: String,
        cards: Vec<(String, String)>,
    ) -> Result<(CardSet, usize)> {
        if name.trim().is_empty() {
            return Err(PracticeError::InvalidInput("set name is required".to_string()));
        }
        let store = self.store()?;
        let set = CardSet::new(user_id, name);
        store.create_set(&set)?;
        let count = cards.len();
        for (question, answer) in cards {
            store.create_card(&Card::new(set.id, question, answer))?;
        }
        Ok((set, count))
    }

    // ==================== Session lifecycle ====================

    /// Create a session over a set: snapshot the card ids, freeze the order
    /// (optionally shuffled with the seed), persist session + settings.
    pub fn start_session(
        &self,
        user_id: Uuid,
        set_id: Uuid,
        mode: Mode,
        params: StartSession,
    ) -> Result<Session> {
        let mut store = self.store()?;
        let set = store.get_set(set_id)?;
        if set.user_id != user_id {
            return Err(PracticeError::NotFound(format!("set {}", set_id)));
        }
        let cards = store.list_cards(set_id)?;
        if cards.is_empty() {
            return Err(PracticeError::InvalidInput(
                "cannot practice an empty set".to_string(),
            ));
        }

        let mut session = Session::new(user_id, set_id, mode);
        if let Some(display) = params.display_time_secs {
            if display > 0.0 && display.is_finite() {
                session.display_time_secs = display;
            }
        }
        if let Some(limit) = params.answer_time_limit_secs {
            session.answer_time_limit_secs = limit.clamp(30, 300);
        }

        let mut settings = SessionSettings::new(session.id);
        if let Some(size) = params.group_size {
            settings.group_size = size.max(1);
        }
        settings.randomize_order = params.randomize_order;
        let legacy = params.adaptive_timing.unwrap_or(false);
        settings.adaptive_preview = params.adaptive_preview.unwrap_or(legacy);
        settings.adaptive_answer = params.adaptive_answer.unwrap_or(legacy);
        if let Some(modifier) = params.speed_modifier {
            settings.speed_modifier =
                timing::clamp_or(modifier, MIN_SPEED_MODIFIER, MAX_SPEED_MODIFIER, 1.0);
        }
        if let Some(prompt_type) = params.prompt_type {
            settings.prompt_type = prompt_type;
        }
        settings.blank_ratio = params.blank_ratio.filter(|r| r.is_finite());
        if let Some(seed) = params.seed {
            settings.seed = seed;
        }

        let card_ids: Vec<Uuid> = cards.iter().map(|c| c.id).collect();
        session.card_order =
            ordering::build_card_order(card_ids, settings.randomize_order, settings.seed);

        store.create_session(&session, &settings)?;
        log::info!(
            "Started {} session {} over set {} ({} cards, seed {})",
            mode.as_str(),
            session.id,
            set_id,
            session.card_order.len(),
            settings.seed
        );
        Ok(session)
    }

    /// Current session state, ownership-checked. Used by clients resuming a
    /// session and by tests asserting cursor positions.
    pub fn get_session(&self, session_id: Uuid, user_id: Uuid) -> Result<Session> {
        let store = self.store()?;
        Self::load_session(&store, session_id, user_id)
    }

    // ==================== Next prompt ====================

    pub async fn next_prompt(&self, session_id: Uuid, user_id: Uuid) -> Result<NextPrompt> {
        let lock = self.session_lock(session_id)?;
        let guard = lock.lock().await;
        let prompt = self.next_prompt_locked(session_id, user_id).await;
        drop(guard);

        // a terminal payload means no further transitions; drop the lock
        // entry so the table does not grow with every session ever touched.
        // Late waiters still hold the old Arc and only ever read from here.
        if matches!(prompt, Ok(NextPrompt::Done { .. })) {
            if let Ok(mut locks) = self.session_locks.lock() {
                locks.remove(&session_id);
            }
        }
        prompt
    }

    async fn next_prompt_locked(&self, session_id: Uuid, user_id: Uuid) -> Result<NextPrompt> {
        let (session, settings) = {
            let store = self.store()?;
            let session = Self::load_session(&store, session_id, user_id)?;
            let settings = store.get_settings(session_id)?;
            (session, settings)
        };

        if session.is_completed() {
            return self.stored_completion(&session);
        }

        match session.mode {
            Mode::Easy => self.next_easy(session, settings).await,
            Mode::Moderate => self.next_moderate(session, settings).await,
            Mode::Hard => self.next_hard(session, settings).await,
        }
    }

    /// Terminal payload for an already-completed session, rebuilt from the
    /// stored score and the attempt rows — nothing is recomputed.
    fn stored_completion(&self, session: &Session) -> Result<NextPrompt> {
        let final_score = session.final_score.ok_or_else(|| {
            PracticeError::Integrity(format!("session {} completed without a score", session.id))
        })?;
        let store = self.store()?;
        let aggregates = store.aggregate_attempts(session.id)?;
        let total_attempts = aggregates.iter().map(|a| a.attempts).sum();
        let total_correct = aggregates.iter().map(|a| a.correct).sum();
        Ok(NextPrompt::Done {
            final_score,
            total_attempts,
            total_correct,
        })
    }

    fn complete(&self, mut session: Session) -> Result<NextPrompt> {
        let mut store = self.store()?;
        let summary = completion::complete_session(&mut store, &mut session)?;
        Ok(NextPrompt::Done {
            final_score: summary.final_score,
            total_attempts: summary.total_attempts,
            total_correct: summary.total_correct,
        })
    }

    async fn next_easy(&self, mut session: Session, settings: SessionSettings) -> Result<NextPrompt> {
        let total = session.card_order.len();
        if session.easy_index >= total {
            return self.complete(session);
        }
        let card_id = session.card_order[session.easy_index];
        let progress = Progress {
            total_cards: total,
            completed_cards: session.easy_index,
            group_index: None,
            group_count: None,
            queue_remaining: None,
        };

        match session.phase {
            Phase::Preview => {
                let store = self.store()?;
                let card = Self::ordered_card(&store, &session, card_id)?;
                let (seconds, breakdown) =
                    Self::preview_budget(&store, &session, &settings, &card);
                session.phase = Phase::Test;
                store.update_session(&session)?;
                Ok(NextPrompt::Preview {
                    card_id,
                    question: card.question,
                    answer: card.answer,
                    seconds,
                    mode: Mode::Easy,
                    progress,
                    timing: breakdown,
                })
            }
            Phase::Test => {
                // reads only; the cursor moves on submit
                let step = session.easy_index;
                self.serve_test(&session, &settings, card_id, step, progress, Mode::Easy)
                    .await
            }
        }
    }

    async fn next_moderate(
        &self,
        mut session: Session,
        settings: SessionSettings,
    ) -> Result<NextPrompt> {
        let total = session.card_order.len();
        let size = settings.effective_group_size();
        if session.group_index * size >= total {
            return self.complete(session);
        }
        let chunk: Vec<Uuid> =
            ordering::group_slice(&session.card_order, size, session.group_index).to_vec();
        let progress = |session: &Session| Progress {
            total_cards: total,
            completed_cards: (session.group_index * size).min(total) + session.test_index,
            group_index: Some(session.group_index),
            group_count: Some(ordering::group_count(total, size)),
            queue_remaining: None,
        };

        match session.phase {
            Phase::Preview => {
                if session.preview_index >= chunk.len() {
                    // chunk fully previewed: flip to test and tell the
                    // caller to come right back
                    session.phase = Phase::Test;
                    session.test_index = 0;
                    let store = self.store()?;
                    store.update_session(&session)?;
                    let progress = progress(&session);
                    return Ok(NextPrompt::Transition {
                        mode: Mode::Moderate,
                        phase: Phase::Test,
                        progress,
                    });
                }
                let card_id = chunk[session.preview_index];
                let store = self.store()?;
                let card = Self::ordered_card(&store, &session, card_id)?;
                let (seconds, breakdown) =
                    Self::preview_budget(&store, &session, &settings, &card);
                session.preview_index += 1;
                store.update_session(&session)?;
                let progress = progress(&session);
                Ok(NextPrompt::Preview {
                    card_id,
                    question: card.question,
                    answer: card.answer,
                    seconds,
                    mode: Mode::Moderate,
                    progress,
                    timing: breakdown,
                })
            }
            Phase::Test => {
                let card_id = *chunk.get(session.test_index).ok_or_else(|| {
                    PracticeError::Integrity(format!(
                        "test cursor {} past group of {} in session {}",
                        session.test_index,
                        chunk.len(),
                        session.id
                    ))
                })?;
                let step = session.group_index * size + session.test_index;
                let progress = progress(&session);
                self.serve_test(&session, &settings, card_id, step, progress, Mode::Moderate)
                    .await
            }
        }
    }

    async fn next_hard(&self, mut session: Session, settings: SessionSettings) -> Result<NextPrompt> {
        let total = session.card_order.len();
        match session.phase {
            Phase::Preview => {
                if session.preview_index >= total {
                    // study pass done: build an independent test permutation
                    // from the same seed and flip phases
                    let queue = shuffle::shuffled(&session.card_order, settings.seed);
                    session.test_queue = Some(queue);
                    session.phase = Phase::Test;
                    let store = self.store()?;
                    store.update_session(&session)?;
                    return Ok(NextPrompt::Transition {
                        mode: Mode::Hard,
                        phase: Phase::Test,
                        progress: Progress {
                            total_cards: total,
                            completed_cards: 0,
                            group_index: None,
                            group_count: None,
                            queue_remaining: Some(total),
                        },
                    });
                }
                let card_id = session.card_order[session.preview_index];
                let store = self.store()?;
                let card = Self::ordered_card(&store, &session, card_id)?;
                let (seconds, breakdown) =
                    Self::preview_budget(&store, &session, &settings, &card);
                session.preview_index += 1;
                store.update_session(&session)?;
                let progress = Progress {
                    total_cards: total,
                    completed_cards: session.preview_index,
                    group_index: None,
                    group_count: None,
                    queue_remaining: None,
                };
                Ok(NextPrompt::Preview {
                    card_id,
                    question: card.question,
                    answer: card.answer,
                    seconds,
                    mode: Mode::Hard,
                    progress,
                    timing: breakdown,
                })
            }
            Phase::Test => {
                let queue = session.test_queue.clone().ok_or_else(|| {
                    PracticeError::Integrity(format!(
                        "session {} in hard test phase without a queue",
                        session.id
                    ))
                })?;
                let Some(&card_id) = queue.first() else {
                    return self.complete(session);
                };
                let step = total - queue.len();
                let progress = Progress {
                    total_cards: total,
                    completed_cards: total - queue.len() + 1,
                    group_index: None,
                    group_count: None,
                    queue_remaining: Some(queue.len() - 1),
                };
                // variation first — only a successful serve consumes the card
                let prompt = self
                    .serve_test(&session, &settings, card_id, step, progress, Mode::Hard)
                    .await?;
                session.test_queue = Some(queue[1..].to_vec());
                let store = self.store()?;
                store.update_session(&session)?;
                Ok(prompt)
            }
        }
    }

    /// Build the test payload for a card: optional variation call, then the
    /// answer-time budget. Performs no session writes.
    async fn serve_test(
        &self,
        session: &Session,
        settings: &SessionSettings,
        card_id: Uuid,
        step: usize,
        progress: Progress,
        mode: Mode,
    ) -> Result<NextPrompt> {
        let (card, rating, wps, attempt_count) = {
            let store = self.store()?;
            let card = Self::ordered_card(&store, session, card_id)?;
            let rating = store.difficulty_rating(session.user_id, card_id);
            let wps = store.words_per_second(session.user_id);
            let attempts = store.attempt_count(session.id, card_id)?;
            (card, rating, wps, attempts)
        };

        let variation = self
            .generate_variation(settings, rating, attempt_count, step, &card)
            .await?;
        let (blanked_text, clues) = match variation {
            Some(v) => (Some(v.blanked_text), v.clues),
            None => (None, None),
        };

        let (time_limit_secs, breakdown) = if settings.adaptive_answer {
            let b = timing::answer_time_limit(
                &card.question,
                &card.answer,
                blanked_text.as_deref(),
                session.answer_time_limit_secs as f64,
                wps,
                rating,
                settings.speed_modifier,
            );
            (b.final_secs, Some(b))
        } else {
            (session.answer_time_limit_secs, None)
        };

        Ok(NextPrompt::Test {
            card_id,
            question: card.question,
            blanked_text,
            clues,
            time_limit_secs,
            mode,
            progress,
            timing: breakdown,
        })
    }

    async fn generate_variation(
        &self,
        settings: &SessionSettings,
        rating: f64,
        attempt_count: u32,
        step: usize,
        card: &Card,
    ) -> Result<Option<Variation>> {
        let mut request = BlankRequest {
            text: card.answer.clone(),
            variation: settings.prompt_type.as_str().to_string(),
            blank_ratio: None,
            seed: None,
            attempt_number: None,
            difficulty_level: None,
        };
        match settings.prompt_type {
            PromptType::Plain => return Ok(None),
            PromptType::Blanked => {
                request.blank_ratio = settings.blank_ratio;
                request.seed = Some(settings.seed.wrapping_add(step as u64));
            }
            PromptType::Progressive => {
                request.attempt_number = Some(attempt_count + 1);
            }
            PromptType::Adaptive => {
                request.difficulty_level = Some(difficulty_level(rating));
            }
        }
        let variation = self.generator.blank(&request).await?;
        Ok(Some(variation))
    }

    /// Resolve a card referenced by the frozen order. A missing card means
    /// the order points at something that no longer exists — an invariant
    /// violation, not a 404.
    fn ordered_card(store: &PracticeStore, session: &Session, card_id: Uuid) -> Result<Card> {
        match store.get_card(card_id) {
            Ok(card) => Ok(card),
            Err(PracticeError::NotFound(_)) => Err(PracticeError::Integrity(format!(
                "session {} order references missing card {}",
                session.id, card_id
            ))),
            Err(e) => Err(e),
        }
    }

    fn preview_budget(
        store: &PracticeStore,
        session: &Session,
        settings: &SessionSettings,
        card: &Card,
    ) -> (f64, Option<timing::PreviewBreakdown>) {
        if settings.adaptive_preview {
            let text = format!("{} {}", card.question, card.answer);
            let wps = store.words_per_second(session.user_id);
            let rating = store.difficulty_rating(session.user_id, card.id);
            let breakdown = timing::preview_time(&text, wps, rating, settings.speed_modifier);
            (breakdown.final_secs, Some(breakdown))
        } else {
            (session.display_time_secs, None)
        }
    }

    // ==================== Submit answer ====================

    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        card_id: Uuid,
        answer_text: &str,
        time_taken_secs: Option<f64>,
    ) -> Result<AnswerOutcome> {
        let lock = self.session_lock(session_id)?;
        let _guard = lock.lock().await;

        let mut store = self.store()?;
        let mut session = Self::load_session(&store, session_id, user_id)?;
        if session.is_completed() {
            return Err(PracticeError::InvalidInput(
                "session is already completed".to_string(),
            ));
        }
        if session.phase != Phase::Test {
            return Err(PracticeError::PhaseViolation {
                phase: session.phase.as_str(),
            });
        }
        let settings = store.get_settings(session_id)?;

        // expected-card validation per mode
        match session.mode {
            Mode::Easy => {
                let expected = session.card_order.get(session.easy_index).copied().ok_or_else(
                    || PracticeError::InvalidInput("no card awaiting an answer".to_string()),
                )?;
                if expected != card_id {
                    return Err(PracticeError::WrongCard {
                        expected,
                        got: card_id,
                    });
                }
            }
            Mode::Moderate => {
                let size = settings.effective_group_size();
                let chunk =
                    ordering::group_slice(&session.card_order, size, session.group_index);
                let expected = chunk.get(session.test_index).copied().ok_or_else(|| {
                    PracticeError::InvalidInput("no card awaiting an answer".to_string())
                })?;
                if expected != card_id {
                    return Err(PracticeError::WrongCard {
                        expected,
                        got: card_id,
                    });
                }
            }
            Mode::Hard => {
                // the queue defines ordering; membership is the only check
                if !session.card_order.contains(&card_id) {
                    return Err(PracticeError::InvalidInput(format!(
                        "card {} is not part of this session",
                        card_id
                    )));
                }
            }
        }

        let card = Self::ordered_card(&store, &session, card_id)?;
        let correct = answers_match(answer_text, &card.answer);
        let attempt =
            store.record_attempt(session_id, card_id, correct, answer_text, time_taken_secs)?;

        // advance cursors
        match session.mode {
            Mode::Easy => {
                session.easy_index += 1;
                session.phase = Phase::Preview;
            }
            Mode::Moderate => {
                let size = settings.effective_group_size();
                let chunk_len =
                    ordering::group_slice(&session.card_order, size, session.group_index).len();
                session.test_index += 1;
                if session.test_index >= chunk_len {
                    session.group_index += 1;
                    session.phase = Phase::Preview;
                    session.preview_index = 0;
                    session.test_index = 0;
                }
            }
            Mode::Hard => {
                // queue consumption happens on serve, not on submit
            }
        }
        store.update_session(&session)?;

        log::debug!(
            "Session {} card {} attempt {}: {}",
            session_id,
            card_id,
            attempt.attempt_number,
            if correct { "correct" } else { "incorrect" }
        );

        Ok(AnswerOutcome {
            correct,
            correct_answer: card.answer,
            attempt_number: attempt.attempt_number,
        })
    }

    // ==================== Review & calibration ====================

    /// Top-N hardest cards of the session's set for its user.
    pub fn review_hardest(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<HardestCard>> {
        let limit = limit.unwrap_or(3).clamp(1, 20);
        let store = self.store()?;
        let session = Self::load_session(&store, session_id, user_id)?;
        store.hardest_cards(session.user_id, session.set_id, limit)
    }

    /// Store a reading-speed calibration from a timed reading sample.
    pub fn calibrate(
        &self,
        user_id: Uuid,
        total_words: u32,
        total_seconds: f64,
    ) -> Result<UserCalibration> {
        if total_words == 0 || !(total_seconds > 0.0) {
            return Err(PracticeError::InvalidInput(
                "calibration requires positive word and second counts".to_string(),
            ));
        }
        let calibration = UserCalibration {
            user_id,
            words_per_second: (total_words as f64 / total_seconds).clamp(1.0, 6.0),
            calibrated_at: Utc::now(),
        };
        let store = self.store()?;
        store.set_calibration(&calibration)?;
        Ok(calibration)
    }

    pub fn get_calibration(&self, user_id: Uuid) -> Result<Option<UserCalibration>> {
        let store = self.store()?;
        store.get_calibration(user_id)
    }
}

/// Case-insensitive, whitespace-trimmed answer comparison
fn answers_match(submitted: &str, expected: &str) -> bool {
    submitted.trim().to_lowercase() == expected.trim().to_lowercase()
}

/// Bucket a 0–100 difficulty rating into the collaborator's 4 levels
fn difficulty_level(rating: f64) -> u8 {
    if rating <= 25.0 {
        1
    } else if rating <= 50.0 {
        2
    } else if rating <= 75.0 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blanking::BlankingError;
    use async_trait::async_trait;

    /// Deterministic stand-in for the NLP service: first letter kept, rest
    /// blanked, per word.
    struct StubGenerator;

    #[async_trait]
    impl VariationGenerator for StubGenerator {
        async fn blank(&self, request: &BlankRequest) -> std::result::Result<Variation, BlankingError> {
            let blanked = request
                .text
                .split_whitespace()
                .map(|w| {
                    let mut out: String = w.chars().take(1).collect();
                    out.push_str(&"_".repeat(w.chars().count().saturating_sub(1)));
                    out
                })
                .collect::<Vec<_>>()
                .join(" ");
            Ok(Variation {
                blanked_text: blanked,
                clues: None,
            })
        }
    }

    /// Always fails, as a timed-out or dead collaborator would.
    struct FailingGenerator;

    #[async_trait]
    impl VariationGenerator for FailingGenerator {
        async fn blank(&self, _request: &BlankRequest) -> std::result::Result<Variation, BlankingError> {
            Err(BlankingError::MissingBlankedText)
        }
    }

    fn engine_with_cards(
        n: usize,
        generator: Arc<dyn VariationGenerator>,
    ) -> (PracticeEngine, Uuid, Uuid, Vec<Card>) {
        let store = PracticeStore::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let set = CardSet::new(user, "test".to_string());
        store.create_set(&set).unwrap();
        let mut cards = Vec::new();
        for i in 0..n {
            let card = Card::new(set.id, format!("question {}", i), format!("answer {}", i));
            store.create_card(&card).unwrap();
            cards.push(card);
        }
        cards.sort_by_key(|c| c.id);
        (PracticeEngine::new(store, generator), user, set.id, cards)
    }

    fn expect_preview(prompt: &NextPrompt) -> (Uuid, f64) {
        match prompt {
            NextPrompt::Preview { card_id, seconds, .. } => (*card_id, *seconds),
            other => panic!("expected preview, got {:?}", other),
        }
    }

    fn expect_test(prompt: &NextPrompt) -> (Uuid, u32) {
        match prompt {
            NextPrompt::Test { card_id, time_limit_secs, .. } => (*card_id, *time_limit_secs),
            other => panic!("expected test, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_easy_two_card_scenario() {
        // the canonical 2-card walkthrough: A previewed, A answered right,
        // B previewed, B answered wrong, final score 50
        let (engine, user, set_id, cards) = engine_with_cards(2, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Easy, StartSession::default())
            .unwrap();
        let sid = session.id;
        let [a, b] = [cards[0].clone(), cards[1].clone()];

        let (card, seconds) = expect_preview(&engine.next_prompt(sid, user).await.unwrap());
        assert_eq!(card, a.id);
        assert_eq!(seconds, 10.0);

        let (card, limit) = expect_test(&engine.next_prompt(sid, user).await.unwrap());
        assert_eq!(card, a.id);
        assert_eq!(limit, 120);

        let outcome = engine
            .submit_answer(sid, user, a.id, &a.answer, Some(3.0))
            .await
            .unwrap();
        assert!(outcome.correct);
        assert_eq!(outcome.attempt_number, 1);

        let (card, _) = expect_preview(&engine.next_prompt(sid, user).await.unwrap());
        assert_eq!(card, b.id);
        let (card, _) = expect_test(&engine.next_prompt(sid, user).await.unwrap());
        assert_eq!(card, b.id);

        let outcome = engine
            .submit_answer(sid, user, b.id, "definitely wrong", Some(3.0))
            .await
            .unwrap();
        assert!(!outcome.correct);
        assert_eq!(outcome.correct_answer, b.answer);

        match engine.next_prompt(sid, user).await.unwrap() {
            NextPrompt::Done {
                final_score,
                total_attempts,
                total_correct,
            } => {
                assert_eq!(final_score, 50);
                assert_eq!(total_attempts, 2);
                assert_eq!(total_correct, 1);
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_easy_test_phase_does_not_advance_without_submit() {
        let (engine, user, set_id, cards) = engine_with_cards(2, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Easy, StartSession::default())
            .unwrap();
        engine.next_prompt(session.id, user).await.unwrap(); // preview

        for _ in 0..3 {
            let (card, _) = expect_test(&engine.next_prompt(session.id, user).await.unwrap());
            assert_eq!(card, cards[0].id);
        }
        let state = engine.get_session(session.id, user).unwrap();
        assert_eq!(state.easy_index, 0);
        assert_eq!(state.phase, Phase::Test);
    }

    #[tokio::test]
    async fn test_wrong_card_rejected_with_expected_id() {
        let (engine, user, set_id, cards) = engine_with_cards(2, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Easy, StartSession::default())
            .unwrap();
        engine.next_prompt(session.id, user).await.unwrap();
        engine.next_prompt(session.id, user).await.unwrap();

        match engine
            .submit_answer(session.id, user, cards[1].id, "x", None)
            .await
        {
            Err(PracticeError::WrongCard { expected, got }) => {
                assert_eq!(expected, cards[0].id);
                assert_eq!(got, cards[1].id);
            }
            other => panic!("expected WrongCard, got {:?}", other),
        }
        // rejection left the cursor alone
        assert_eq!(engine.get_session(session.id, user).unwrap().easy_index, 0);
    }

    #[tokio::test]
    async fn test_submit_during_preview_is_phase_violation() {
        let (engine, user, set_id, cards) = engine_with_cards(1, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Easy, StartSession::default())
            .unwrap();
        match engine
            .submit_answer(session.id, user, cards[0].id, "x", None)
            .await
        {
            Err(PracticeError::PhaseViolation { phase }) => assert_eq!(phase, "preview"),
            other => panic!("expected PhaseViolation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_moderate_group_cycles() {
        // 5 cards, groups of 2 -> ceil(5/2) = 3 group cycles
        let (engine, user, set_id, _) = engine_with_cards(5, Arc::new(StubGenerator));
        let session = engine
            .start_session(
                user,
                set_id,
                Mode::Moderate,
                StartSession {
                    group_size: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        let sid = session.id;

        // group rollover into the next preview happens inside submit, so
        // the caller observes exactly one Transition (into Test) per group
        let mut test_transitions = 0;
        loop {
            match engine.next_prompt(sid, user).await.unwrap() {
                NextPrompt::Preview { .. } => {}
                NextPrompt::Transition { phase, .. } => {
                    assert_eq!(phase, Phase::Test);
                    test_transitions += 1;
                }
                NextPrompt::Test { card_id, .. } => {
                    let outcome = engine
                        .submit_answer(sid, user, card_id, "whatever", Some(2.0))
                        .await
                        .unwrap();
                    assert!(!outcome.correct);
                }
                NextPrompt::Done { final_score, total_attempts, .. } => {
                    assert_eq!(final_score, 0);
                    assert_eq!(total_attempts, 5);
                    break;
                }
            }
        }
        assert_eq!(test_transitions, 3);
    }

    #[tokio::test]
    async fn test_moderate_rejects_out_of_position_card() {
        let (engine, user, set_id, _) = engine_with_cards(4, Arc::new(StubGenerator));
        let session = engine
            .start_session(
                user,
                set_id,
                Mode::Moderate,
                StartSession {
                    group_size: Some(2),
                    ..Default::default()
                },
            )
            .unwrap();
        let sid = session.id;

        // preview both cards of group 0, cross the transition
        expect_preview(&engine.next_prompt(sid, user).await.unwrap());
        expect_preview(&engine.next_prompt(sid, user).await.unwrap());
        assert!(matches!(
            engine.next_prompt(sid, user).await.unwrap(),
            NextPrompt::Transition { phase: Phase::Test, .. }
        ));

        let (first, _) = expect_test(&engine.next_prompt(sid, user).await.unwrap());
        let order = engine.get_session(sid, user).unwrap().card_order;
        let second = order[1];
        assert_eq!(first, order[0]);

        match engine.submit_answer(sid, user, second, "x", None).await {
            Err(PracticeError::WrongCard { expected, .. }) => assert_eq!(expected, first),
            other => panic!("expected WrongCard, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hard_queue_shrinks_and_is_permutation() {
        let (engine, user, set_id, _) = engine_with_cards(8, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Hard, StartSession::default())
            .unwrap();
        let sid = session.id;

        // preview the whole set, then the flip
        let mut previewed = Vec::new();
        for _ in 0..8 {
            let (card, _) = expect_preview(&engine.next_prompt(sid, user).await.unwrap());
            previewed.push(card);
        }
        assert!(matches!(
            engine.next_prompt(sid, user).await.unwrap(),
            NextPrompt::Transition { phase: Phase::Test, .. }
        ));

        let queue = engine
            .get_session(sid, user)
            .unwrap()
            .test_queue
            .expect("queue built at flip");
        assert_eq!(queue.len(), 8);
        let mut sorted_queue = queue.clone();
        sorted_queue.sort();
        let mut sorted_previewed = previewed.clone();
        sorted_previewed.sort();
        assert_eq!(sorted_queue, sorted_previewed);
        assert_ne!(queue, previewed, "test order must be reshuffled");

        // each successful next consumes exactly one card, in queue order
        let mut served = Vec::new();
        for remaining in (0..8).rev() {
            let (card, _) = expect_test(&engine.next_prompt(sid, user).await.unwrap());
            served.push(card);
            let state = engine.get_session(sid, user).unwrap();
            assert_eq!(state.test_queue.unwrap().len(), remaining);
            engine
                .submit_answer(sid, user, card, "answer", Some(1.0))
                .await
                .unwrap();
        }
        assert_eq!(served, queue);

        assert!(matches!(
            engine.next_prompt(sid, user).await.unwrap(),
            NextPrompt::Done { .. }
        ));
    }

    #[tokio::test]
    async fn test_hard_accepts_any_session_card_on_submit() {
        let (engine, user, set_id, cards) = engine_with_cards(3, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Hard, StartSession::default())
            .unwrap();
        let sid = session.id;
        for _ in 0..3 {
            engine.next_prompt(sid, user).await.unwrap();
        }
        engine.next_prompt(sid, user).await.unwrap(); // transition
        engine.next_prompt(sid, user).await.unwrap(); // serve first queued

        // answering a different card of the set is allowed in hard mode
        let outcome = engine
            .submit_answer(sid, user, cards[2].id, &cards[2].answer, None)
            .await
            .unwrap();
        assert!(outcome.correct);

        // but a foreign card is not
        assert!(matches!(
            engine
                .submit_answer(sid, user, Uuid::new_v4(), "x", None)
                .await,
            Err(PracticeError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_hard_drained_without_answers_cannot_be_scored() {
        // a client that only calls next consumes the whole queue without
        // recording a single attempt; the session then has no performance
        // data to score, and every further next repeats that rejection
        let (engine, user, set_id, _) = engine_with_cards(2, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Hard, StartSession::default())
            .unwrap();
        let sid = session.id;
        for _ in 0..2 {
            expect_preview(&engine.next_prompt(sid, user).await.unwrap());
        }
        engine.next_prompt(sid, user).await.unwrap(); // transition
        for _ in 0..2 {
            expect_test(&engine.next_prompt(sid, user).await.unwrap());
        }

        for _ in 0..2 {
            match engine.next_prompt(sid, user).await {
                Err(PracticeError::NoPerformanceData(id)) => assert_eq!(id, sid),
                other => panic!("expected NoPerformanceData, got {:?}", other),
            }
        }
        assert!(!engine.get_session(sid, user).unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let (engine, user, set_id, cards) = engine_with_cards(1, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Easy, StartSession::default())
            .unwrap();
        let sid = session.id;
        engine.next_prompt(sid, user).await.unwrap();
        engine.next_prompt(sid, user).await.unwrap();
        engine
            .submit_answer(sid, user, cards[0].id, &cards[0].answer, Some(4.0))
            .await
            .unwrap();

        let first = engine.next_prompt(sid, user).await.unwrap();
        let stat_after_first = {
            let store = engine.store().unwrap();
            store.get_stat(user, cards[0].id).unwrap().unwrap()
        };

        let second = engine.next_prompt(sid, user).await.unwrap();
        match (&first, &second) {
            (
                NextPrompt::Done { final_score: a, .. },
                NextPrompt::Done { final_score: b, .. },
            ) => assert_eq!(a, b),
            other => panic!("expected two done payloads, got {:?}", other),
        }

        // the stat row was not folded twice
        let stat_after_second = {
            let store = engine.store().unwrap();
            store.get_stat(user, cards[0].id).unwrap().unwrap()
        };
        assert_eq!(stat_after_first.times_seen, stat_after_second.times_seen);
        assert_eq!(stat_after_first.rating, stat_after_second.rating);
    }

    #[tokio::test]
    async fn test_completed_sessions_release_their_locks() {
        let (engine, user, set_id, cards) = engine_with_cards(1, Arc::new(StubGenerator));
        for _ in 0..5 {
            let session = engine
                .start_session(user, set_id, Mode::Easy, StartSession::default())
                .unwrap();
            let sid = session.id;
            engine.next_prompt(sid, user).await.unwrap();
            engine.next_prompt(sid, user).await.unwrap();
            engine
                .submit_answer(sid, user, cards[0].id, &cards[0].answer, Some(1.0))
                .await
                .unwrap();
            assert!(matches!(
                engine.next_prompt(sid, user).await.unwrap(),
                NextPrompt::Done { .. }
            ));
        }
        // no lock entries linger once sessions reach their terminal payload
        assert!(engine.session_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_leaves_cursor_unchanged() {
        let (engine, user, set_id, _) = engine_with_cards(2, Arc::new(FailingGenerator));
        let session = engine
            .start_session(
                user,
                set_id,
                Mode::Easy,
                StartSession {
                    prompt_type: Some(PromptType::Blanked),
                    blank_ratio: Some(0.5),
                    ..Default::default()
                },
            )
            .unwrap();
        let sid = session.id;

        // preview succeeds (no collaborator involved)
        expect_preview(&engine.next_prompt(sid, user).await.unwrap());
        // test serve fails upstream, repeatedly, without moving anything
        for _ in 0..2 {
            assert!(matches!(
                engine.next_prompt(sid, user).await,
                Err(PracticeError::Upstream(_))
            ));
            let state = engine.get_session(sid, user).unwrap();
            assert_eq!(state.easy_index, 0);
            assert_eq!(state.phase, Phase::Test);
        }
    }

    #[tokio::test]
    async fn test_variation_payload_served_in_test_phase() {
        let (engine, user, set_id, _) = engine_with_cards(1, Arc::new(StubGenerator));
        let session = engine
            .start_session(
                user,
                set_id,
                Mode::Easy,
                StartSession {
                    prompt_type: Some(PromptType::Adaptive),
                    ..Default::default()
                },
            )
            .unwrap();
        engine.next_prompt(session.id, user).await.unwrap();
        match engine.next_prompt(session.id, user).await.unwrap() {
            NextPrompt::Test { blanked_text, .. } => {
                let blanked = blanked_text.expect("variation requested");
                assert!(blanked.contains('_'));
            }
            other => panic!("expected test, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_adaptive_timing_budgets_are_bounded() {
        let (engine, user, set_id, _) = engine_with_cards(1, Arc::new(StubGenerator));
        let session = engine
            .start_session(
                user,
                set_id,
                Mode::Easy,
                StartSession {
                    adaptive_timing: Some(true), // legacy flag maps to both
                    ..Default::default()
                },
            )
            .unwrap();
        let (_, seconds) = expect_preview(&engine.next_prompt(session.id, user).await.unwrap());
        assert!((3.0..=20.0).contains(&seconds));
        let (_, limit) = expect_test(&engine.next_prompt(session.id, user).await.unwrap());
        assert!((30..=300).contains(&limit));
    }

    #[tokio::test]
    async fn test_randomized_order_is_seeded_and_frozen() {
        let (engine, user, set_id, _) = engine_with_cards(8, Arc::new(StubGenerator));
        let params = StartSession {
            randomize_order: true,
            seed: Some(1234),
            ..Default::default()
        };
        let a = engine
            .start_session(user, set_id, Mode::Easy, params.clone())
            .unwrap();
        let b = engine
            .start_session(user, set_id, Mode::Easy, params)
            .unwrap();
        assert_eq!(a.card_order, b.card_order);

        let mut sorted = a.card_order.clone();
        sorted.sort();
        assert_ne!(a.card_order, sorted, "seeded shuffle should reorder 8 cards");
    }

    #[tokio::test]
    async fn test_foreign_user_sees_nothing() {
        let (engine, user, set_id, _) = engine_with_cards(2, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Easy, StartSession::default())
            .unwrap();
        let stranger = Uuid::new_v4();
        assert!(matches!(
            engine.next_prompt(session.id, stranger).await,
            Err(PracticeError::NotFound(_))
        ));
        assert!(matches!(
            engine.start_session(stranger, set_id, Mode::Easy, StartSession::default()),
            Err(PracticeError::NotFound(_))
        ));
    }

    #[test]
    fn test_calibrate_clamps_words_per_second() {
        let (engine, user, _, _) = engine_with_cards(1, Arc::new(StubGenerator));
        let calibration = engine.calibrate(user, 120, 60.0).unwrap();
        assert!((calibration.words_per_second - 2.0).abs() < 1e-9);

        // absurdly fast reading clamps to the ceiling
        let fast = engine.calibrate(user, 1200, 60.0).unwrap();
        assert_eq!(fast.words_per_second, 6.0);

        let read = engine.get_calibration(user).unwrap().unwrap();
        assert_eq!(read.words_per_second, 6.0);
        assert!(engine.get_calibration(Uuid::new_v4()).unwrap().is_none());

        assert!(matches!(
            engine.calibrate(user, 0, 60.0),
            Err(PracticeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_review_hardest_defaults_and_clamps() {
        let (engine, user, set_id, _) = engine_with_cards(10, Arc::new(StubGenerator));
        let session = engine
            .start_session(user, set_id, Mode::Easy, StartSession::default())
            .unwrap();
        assert_eq!(engine.review_hardest(session.id, user, None).unwrap().len(), 3);
        assert_eq!(
            engine
                .review_hardest(session.id, user, Some(100))
                .unwrap()
                .len(),
            10
        );
        assert_eq!(
            engine
                .review_hardest(session.id, user, Some(0))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_difficulty_level_buckets() {
        assert_eq!(difficulty_level(0.0), 1);
        assert_eq!(difficulty_level(25.0), 1);
        assert_eq!(difficulty_level(50.0), 2);
        assert_eq!(difficulty_level(75.0), 3);
        assert_eq!(difficulty_level(76.0), 4);
    }

    #[test]
    fn test_answers_match_normalizes() {
        assert!(answers_match("  The Answer ", "the answer"));
        assert!(!answers_match("other", "the answer"));
    }
}
