//! Completion & stats update engine.
//!
//! Runs exactly once per session, when the state machine first detects
//! exhaustion. Aggregates the session's attempts per card, folds each
//! card's session score into the user's smoothed difficulty rating, and
//! stamps the session with its final score. A session with no attempt rows
//! cannot be completed — that only happens when completion is invoked out
//! of band, and it is rejected rather than scored 0.

use chrono::Utc;
use uuid::Uuid;

use super::error::{PracticeError, Result};
use super::models::{Session, UserCardStat};
use super::storage::{CardAggregate, PracticeStore};

/// History weight of the exponential smoothing (30% of the new session
/// score flows into the rating each completion).
const SMOOTHING_OLD_WEIGHT: f64 = 0.7;
const SMOOTHING_NEW_WEIGHT: f64 = 0.3;

/// What the completion run produced
#[derive(Debug, Clone)]
pub struct CompletionSummary {
    pub final_score: u32,
    pub total_attempts: u32,
    pub total_correct: u32,
    pub cards_updated: usize,
}

/// Difficulty contribution of one session for one card, 0–100.
///
/// Mostly the incorrect rate, nudged by how long answers took
/// (10 s of average response time ⇒ the full time factor).
pub fn card_session_score(aggregate: &CardAggregate) -> f64 {
    let incorrect = aggregate.attempts.saturating_sub(aggregate.correct) as f64;
    let incorrect_rate = incorrect / aggregate.attempts.max(1) as f64;
    let time_factor = (aggregate.avg_time_secs / 10.0).clamp(0.0, 2.0);
    (incorrect_rate * 80.0 + time_factor * 10.0).clamp(0.0, 100.0)
}

/// Exponential smoothing of the per-user rating: 70% history, 30% session.
pub fn smooth_rating(old_rating: f64, session_score: f64) -> f64 {
    (old_rating * SMOOTHING_OLD_WEIGHT + session_score * SMOOTHING_NEW_WEIGHT).clamp(0.0, 100.0)
}

/// Merge a session's per-card aggregate into the durable stat row, creating
/// it from this session's numbers when none exists yet.
pub fn merge_stat(
    existing: Option<UserCardStat>,
    user_id: Uuid,
    aggregate: &CardAggregate,
) -> UserCardStat {
    let session_score = card_session_score(aggregate);
    let incorrect = aggregate.attempts.saturating_sub(aggregate.correct);
    let now = Utc::now();
    match existing {
        None => UserCardStat {
            user_id,
            card_id: aggregate.card_id,
            rating: session_score,
            times_seen: aggregate.attempts,
            times_correct: aggregate.correct,
            times_incorrect: incorrect,
            avg_response_secs: aggregate.avg_time_secs,
            last_seen_at: now,
        },
        Some(old) => {
            let total_seen = old.times_seen + aggregate.attempts;
            // attempts-weighted running mean keeps the average drift-free
            let avg = if total_seen > 0 {
                (old.avg_response_secs * old.times_seen as f64
                    + aggregate.avg_time_secs * aggregate.attempts as f64)
                    / total_seen as f64
            } else {
                old.avg_response_secs
            };
            UserCardStat {
                user_id,
                card_id: aggregate.card_id,
                rating: smooth_rating(old.rating, session_score),
                times_seen: total_seen,
                times_correct: old.times_correct + aggregate.correct,
                times_incorrect: old.times_incorrect + incorrect,
                avg_response_secs: avg,
                last_seen_at: now,
            }
        }
    }
}

/// Finalize a session: upsert every touched stat row, stamp `completed_at`
/// and the final score. The caller guarantees this runs under the session's
/// transition lock and only for sessions not yet completed.
pub fn complete_session(
    store: &mut PracticeStore,
    session: &mut Session,
) -> Result<CompletionSummary> {
    let aggregates = store.aggregate_attempts(session.id)?;
    if aggregates.is_empty() {
        return Err(PracticeError::NoPerformanceData(session.id));
    }

    let mut total_attempts = 0u32;
    let mut total_correct = 0u32;
    for aggregate in &aggregates {
        total_attempts += aggregate.attempts;
        total_correct += aggregate.correct;
        let existing = store.get_stat(session.user_id, aggregate.card_id)?;
        let merged = merge_stat(existing, session.user_id, aggregate);
        store.upsert_stat(&merged)?;
    }

    let final_score =
        ((total_correct as f64 / total_attempts.max(1) as f64) * 100.0).round() as u32;

    session.completed_at = Some(Utc::now());
    session.final_score = Some(final_score);
    store.update_session(session)?;

    log::info!(
        "Completed session {}: score {} over {} attempts ({} cards)",
        session.id,
        final_score,
        total_attempts,
        aggregates.len()
    );

    Ok(CompletionSummary {
        final_score,
        total_attempts,
        total_correct,
        cards_updated: aggregates.len(),
    })
}
