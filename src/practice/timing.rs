//! Adaptive timing model.
//!
//! Converts text length, the user's calibrated reading speed, and the
//! per-(user, card) difficulty rating into preview and answer time budgets.
//! Both calculators return the final value together with a full breakdown
//! of the factors that produced it, so a session trace shows exactly why a
//! card got the budget it did.
//!
//! The answer limit is an additive floor (60% of the configured base) plus
//! a multiplicative reading/difficulty term, so short answers never get an
//! unreasonably tiny limit while long or struggled-with content still
//! scales up.

use serde::{Deserialize, Serialize};

/// Default reading speed when no calibration exists
pub const DEFAULT_WORDS_PER_SECOND: f64 = 2.5;

/// Default difficulty rating when no stat row exists
pub const DEFAULT_RATING: f64 = 50.0;

/// Preview time bounds in seconds
pub const MIN_PREVIEW_SECS: f64 = 3.0;
pub const MAX_PREVIEW_SECS: f64 = 20.0;

/// Answer time limit bounds in seconds
pub const MIN_ANSWER_SECS: f64 = 30.0;
pub const MAX_ANSWER_SECS: f64 = 300.0;

/// Reading-speed modifier bounds
pub const MIN_SPEED_MODIFIER: f64 = 0.5;
pub const MAX_SPEED_MODIFIER: f64 = 2.0;

/// Clamp a possibly non-finite value into a range, falling back to
/// `fallback` when the stored value is NaN or infinite.
pub fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback.clamp(min, max)
    }
}

/// Whitespace word count, never below 1
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count().max(1)
}

/// Number of runs of 2+ consecutive blank-marker characters.
/// A single underscore is punctuation, not a blank.
pub fn count_blank_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut current = 0usize;
    for c in text.chars() {
        if c == '_' {
            current += 1;
        } else {
            if current >= 2 {
                runs += 1;
            }
            current = 0;
        }
    }
    if current >= 2 {
        runs += 1;
    }
    runs
}

/// Factor trace for a preview-time computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewBreakdown {
    pub word_count: usize,
    pub words_per_second: f64,
    pub rating: f64,
    pub difficulty_multiplier: f64,
    pub speed_modifier: f64,
    pub base_secs: f64,
    pub raw_secs: f64,
    pub final_secs: f64,
}

/// Preview/reveal time budget in seconds, clamped to [3, 20].
///
/// `base = words / wps`, scaled by a 0.9–1.6 difficulty multiplier and the
/// user's reading-speed modifier.
pub fn preview_time(
    text: &str,
    words_per_second: f64,
    rating: f64,
    speed_modifier: f64,
) -> PreviewBreakdown {
    let words = word_count(text);
    let wps = clamp_or(words_per_second, 1.0, 6.0, DEFAULT_WORDS_PER_SECOND);
    let rating = clamp_or(rating, 0.0, 100.0, DEFAULT_RATING);
    let modifier = clamp_or(speed_modifier, MIN_SPEED_MODIFIER, MAX_SPEED_MODIFIER, 1.0);

    let base = words as f64 / wps;
    let difficulty_multiplier = 0.9 + (rating / 100.0) * 0.7;
    let raw = base * difficulty_multiplier * modifier;
    let final_secs = raw.clamp(MIN_PREVIEW_SECS, MAX_PREVIEW_SECS);

    PreviewBreakdown {
        word_count: words,
        words_per_second: wps,
        rating,
        difficulty_multiplier,
        speed_modifier: modifier,
        base_secs: base,
        raw_secs: raw,
        final_secs,
    }
}

/// Factor trace for an answer-time-limit computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerBreakdown {
    pub total_words: usize,
    pub blanks_count: usize,
    pub words_per_second: f64,
    pub rating: f64,
    pub difficulty_multiplier: f64,
    pub speed_modifier: f64,
    pub base_secs: f64,
    pub reading_thinking_secs: f64,
    pub raw_secs: f64,
    pub final_secs: u32,
}

/// Answer time limit in whole seconds, clamped to [30, 300].
///
/// Word-processes the question plus the blanked text (or the answer when no
/// blanked text exists), counts blank runs, and combines a 60%-of-base
/// floor with a reading/thinking term scaled by a 1.0–1.8 difficulty
/// multiplier.
pub fn answer_time_limit(
    question: &str,
    answer: &str,
    blanked_text: Option<&str>,
    base_limit_secs: f64,
    words_per_second: f64,
    rating: f64,
    speed_modifier: f64,
) -> AnswerBreakdown {
    let wps = clamp_or(words_per_second, 1.0, 6.0, DEFAULT_WORDS_PER_SECOND);
    let rating = clamp_or(rating, 0.0, 100.0, DEFAULT_RATING);
    let modifier = clamp_or(speed_modifier, MIN_SPEED_MODIFIER, MAX_SPEED_MODIFIER, 1.0);
    let base = clamp_or(base_limit_secs, MIN_ANSWER_SECS, MAX_ANSWER_SECS, 120.0);

    let processed = blanked_text.unwrap_or(answer);
    let total_words = word_count(question) + word_count(processed);
    let blanks_count = blanked_text.map(count_blank_runs).unwrap_or(0);

    let difficulty_multiplier = 1.0 + (rating / 100.0) * 0.8;
    let reading_thinking = (total_words.max(1) as f64 / wps) * 2.0;
    let raw = base * 0.6 + reading_thinking * difficulty_multiplier * 4.0 + blanks_count as f64 * 1.5;
    let final_secs = (raw * modifier).clamp(MIN_ANSWER_SECS, MAX_ANSWER_SECS).round() as u32;

    AnswerBreakdown {
        total_words,
        blanks_count,
        words_per_second: wps,
        rating,
        difficulty_multiplier,
        speed_modifier: modifier,
        base_secs: base,
        reading_thinking_secs: reading_thinking,
        raw_secs: raw,
        final_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_count_minimum_one() {
        assert_eq!(word_count(""), 1);
        assert_eq!(word_count("   "), 1);
        assert_eq!(word_count("one two three"), 3);
    }

    #[test]
    fn test_count_blank_runs() {
        assert_eq!(count_blank_runs("the ____ sat on the ___"), 2);
        assert_eq!(count_blank_runs("no blanks here"), 0);
        // single underscores are not blanks
        assert_eq!(count_blank_runs("snake_case_name"), 0);
        assert_eq!(count_blank_runs("____"), 1);
        assert_eq!(count_blank_runs("a __ b __ c"), 2);
    }

    #[test]
    fn test_preview_time_defaults() {
        // 10 words at 2.5 wps, rating 50 -> base 4, mult 1.25, raw 5.0
        let b = preview_time(
            "one two three four five six seven eight nine ten",
            DEFAULT_WORDS_PER_SECOND,
            DEFAULT_RATING,
            1.0,
        );
        assert_eq!(b.word_count, 10);
        assert!((b.base_secs - 4.0).abs() < 1e-9);
        assert!((b.difficulty_multiplier - 1.25).abs() < 1e-9);
        assert!((b.final_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_preview_time_clamped_low() {
        let b = preview_time("hi", 6.0, 0.0, 0.5);
        assert_eq!(b.final_secs, MIN_PREVIEW_SECS);
    }

    #[test]
    fn test_preview_time_clamped_high() {
        let long = "word ".repeat(500);
        let b = preview_time(&long, 1.0, 100.0, 2.0);
        assert_eq!(b.final_secs, MAX_PREVIEW_SECS);
    }

    #[test]
    fn test_preview_multiplier_range() {
        assert!((preview_time("x", 2.5, 0.0, 1.0).difficulty_multiplier - 0.9).abs() < 1e-9);
        assert!((preview_time("x", 2.5, 100.0, 1.0).difficulty_multiplier - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_inputs_fall_back() {
        let b = preview_time("a b c", f64::NAN, f64::INFINITY, f64::NAN);
        assert_eq!(b.words_per_second, DEFAULT_WORDS_PER_SECOND);
        assert_eq!(b.rating, DEFAULT_RATING);
        assert_eq!(b.speed_modifier, 1.0);
    }

    #[test]
    fn test_answer_limit_in_bounds_under_extremes() {
        let tiny = answer_time_limit("q", "a", None, 30.0, 6.0, 0.0, 0.5);
        assert!(tiny.final_secs >= MIN_ANSWER_SECS as u32);

        let long = "word ".repeat(2000);
        let big = answer_time_limit(&long, &long, None, 300.0, 1.0, 100.0, 2.0);
        assert_eq!(big.final_secs, MAX_ANSWER_SECS as u32);
    }

    #[test]
    fn test_answer_limit_uses_blanked_text_when_present() {
        let with_blanks =
            answer_time_limit("what is it", "the answer", Some("t__ a____"), 120.0, 2.5, 50.0, 1.0);
        assert_eq!(with_blanks.blanks_count, 2);
        // question (3) + blanked (2)
        assert_eq!(with_blanks.total_words, 5);

        let without = answer_time_limit("what is it", "the answer", None, 120.0, 2.5, 50.0, 1.0);
        assert_eq!(without.blanks_count, 0);
        assert_eq!(without.total_words, 5);
    }

    #[test]
    fn test_answer_base_is_clamped() {
        let b = answer_time_limit("q", "a", None, 10_000.0, 2.5, 50.0, 1.0);
        assert_eq!(b.base_secs, MAX_ANSWER_SECS);
        let b = answer_time_limit("q", "a", None, 1.0, 2.5, 50.0, 1.0);
        assert_eq!(b.base_secs, MIN_ANSWER_SECS);
    }

    #[test]
    fn test_answer_multiplier_range() {
        let low = answer_time_limit("q", "a", None, 120.0, 2.5, 0.0, 1.0);
        assert!((low.difficulty_multiplier - 1.0).abs() < 1e-9);
        let high = answer_time_limit("q", "a", None, 120.0, 2.5, 100.0, 1.0);
        assert!((high.difficulty_multiplier - 1.8).abs() < 1e-9);
    }
}
