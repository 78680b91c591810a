//! Data models for the practice-session engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A set is a collection of cards belonging to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl CardSet {
    pub fn new(user_id: Uuid, name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name,
            created_at: Utc::now(),
        }
    }
}

/// A flashcard with question and answer text.
/// Immutable for the lifetime of any session drilling it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub set_id: Uuid,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

impl Card {
    pub fn new(set_id: Uuid, question: String, answer: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            set_id,
            question,
            answer,
            created_at: Utc::now(),
        }
    }
}

/// Difficulty mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Per-card preview/test cycle
    Easy,
    /// Preview then test within fixed-size groups of cards
    Moderate,
    /// Preview the whole set once, then test a shuffled queue
    Hard,
}

impl Mode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "easy" => Some(Self::Easy),
            "moderate" => Some(Self::Moderate),
            "hard" => Some(Self::Hard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Moderate => "moderate",
            Self::Hard => "hard",
        }
    }
}

/// Sub-state within a mode's card-serving cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Question and answer shown together for study
    Preview,
    /// Question served alone, awaiting an answer submission
    Test,
}

impl Phase {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preview" => Some(Self::Preview),
            "test" => Some(Self::Test),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Test => "test",
        }
    }
}

/// How test prompts are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromptType {
    /// Question text as-is; no collaborator call
    Plain,
    /// Answer blanked at a configured ratio with a per-request seed
    Blanked,
    /// Blanking grows with the attempt number for the card
    Progressive,
    /// Blanking scaled to the user's difficulty level for the card
    Adaptive,
}

impl Default for PromptType {
    fn default() -> Self {
        Self::Plain
    }
}

impl PromptType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "plain" => Some(Self::Plain),
            "blanked" => Some(Self::Blanked),
            "progressive" => Some(Self::Progressive),
            "adaptive" => Some(Self::Adaptive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Blanked => "blanked",
            Self::Progressive => "progressive",
            Self::Adaptive => "adaptive",
        }
    }
}

fn default_display_time() -> f64 {
    10.0
}

fn default_answer_time_limit() -> u32 {
    120
}

/// One practice run by a user over a set, from start to completion.
///
/// All mode cursors live here and are persisted on every transition; there
/// is no in-memory session object between requests. Cursors only ever move
/// forward until `completed_at` is stamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub set_id: Uuid,
    pub mode: Mode,
    /// Static per-card display time used when adaptive preview timing is off
    #[serde(default = "default_display_time")]
    pub display_time_secs: f64,
    /// Static answer time limit used when adaptive answer timing is off
    #[serde(default = "default_answer_time_limit")]
    pub answer_time_limit_secs: u32,
    /// Permutation of the set's card ids, frozen at session start
    pub card_order: Vec<Uuid>,
    pub phase: Phase,
    /// EASY cursor over `card_order`
    #[serde(default)]
    pub easy_index: usize,
    /// MODERATE: which group_size-chunk of `card_order` is active
    #[serde(default)]
    pub group_index: usize,
    /// MODERATE/HARD preview position within the active scope
    #[serde(default)]
    pub preview_index: usize,
    /// MODERATE test position within the active chunk
    #[serde(default)]
    pub test_index: usize,
    /// HARD: independently shuffled queue consumed during the test phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_queue: Option<Vec<Uuid>>,
    /// Set exactly once, when the completion engine runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Percentage score, stored at completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: Uuid, set_id: Uuid, mode: Mode) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            set_id,
            mode,
            display_time_secs: default_display_time(),
            answer_time_limit_secs: default_answer_time_limit(),
            card_order: Vec::new(),
            phase: Phase::Preview,
            easy_index: 0,
            group_index: 0,
            preview_index: 0,
            test_index: 0,
            test_queue: None,
            completed_at: None,
            final_score: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

fn default_group_size() -> u32 {
    3
}

fn default_speed_modifier() -> f64 {
    1.0
}

/// Immutable per-session configuration, created together with the session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSettings {
    pub session_id: Uuid,
    /// MODERATE chunk size (minimum 1)
    #[serde(default = "default_group_size")]
    pub group_size: u32,
    #[serde(default)]
    pub randomize_order: bool,
    /// Adaptive preview/reveal timing toggle
    #[serde(default)]
    pub adaptive_preview: bool,
    /// Adaptive answer-time-limit toggle
    #[serde(default)]
    pub adaptive_answer: bool,
    /// Reading-speed multiplier, clamped to 0.5–2.0
    #[serde(default = "default_speed_modifier")]
    pub speed_modifier: f64,
    #[serde(default)]
    pub prompt_type: PromptType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blank_ratio: Option<f64>,
    /// Deterministic seed for every ordering decision in the session
    pub seed: u64,
}

impl SessionSettings {
    /// Defaults for a session; the seed falls back to the low 64 bits of
    /// the session id so unseeded sessions are still reproducible.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            group_size: default_group_size(),
            randomize_order: false,
            adaptive_preview: false,
            adaptive_answer: false,
            speed_modifier: default_speed_modifier(),
            prompt_type: PromptType::Plain,
            blank_ratio: None,
            seed: session_id.as_u128() as u64,
        }
    }

    pub fn effective_group_size(&self) -> usize {
        (self.group_size.max(1)) as usize
    }
}

/// One answer submission. Append-only; rows are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: Uuid,
    pub session_id: Uuid,
    pub card_id: Uuid,
    pub correct: bool,
    pub answer_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken_secs: Option<f64>,
    /// 1-based, counted per session+card
    pub attempt_number: u32,
    pub created_at: DateTime<Utc>,
}

/// Durable per-(user, card) learning signal.
///
/// Created lazily by the first completion that touches the card; after that
/// only the completion engine mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCardStat {
    pub user_id: Uuid,
    pub card_id: Uuid,
    /// Smoothed difficulty rating, 0 (easy) to 100 (struggling)
    pub rating: f64,
    pub times_seen: u32,
    pub times_correct: u32,
    pub times_incorrect: u32,
    /// Attempts-weighted running mean response time
    pub avg_response_secs: f64,
    pub last_seen_at: DateTime<Utc>,
}

/// Per-user reading-speed calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCalibration {
    pub user_id: Uuid,
    /// Words per second, clamped to 1.0–6.0
    pub words_per_second: f64,
    pub calibrated_at: DateTime<Utc>,
}

/// Position indicators returned with every prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Cards in the frozen order
    pub total_cards: usize,
    /// Cards fully answered so far (EASY/MODERATE) or consumed from the
    /// test queue (HARD)
    pub completed_cards: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_remaining: Option<usize>,
}

/// Payload served by `next_prompt`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NextPrompt {
    /// Question and answer shown together, with a reveal-time budget
    #[serde(rename_all = "camelCase")]
    Preview {
        card_id: Uuid,
        question: String,
        answer: String,
        seconds: f64,
        mode: Mode,
        progress: Progress,
        #[serde(skip_serializing_if = "Option::is_none")]
        timing: Option<super::timing::PreviewBreakdown>,
    },
    /// Question served for answering, optionally with a blanked variation
    #[serde(rename_all = "camelCase")]
    Test {
        card_id: Uuid,
        question: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        blanked_text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        clues: Option<Vec<String>>,
        time_limit_secs: u32,
        mode: Mode,
        progress: Progress,
        #[serde(skip_serializing_if = "Option::is_none")]
        timing: Option<super::timing::AnswerBreakdown>,
    },
    /// A phase or group boundary was crossed; the caller should re-request
    #[serde(rename_all = "camelCase")]
    Transition {
        mode: Mode,
        phase: Phase,
        progress: Progress,
    },
    /// Terminal payload; repeated calls return this idempotently
    #[serde(rename_all = "camelCase")]
    Done {
        final_score: u32,
        total_attempts: u32,
        total_correct: u32,
    },
}

/// Outcome of a `submit_answer`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub correct: bool,
    /// Echoed back so the client can show feedback
    pub correct_answer: String,
    pub attempt_number: u32,
}

/// Entry in the review-hardest listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardestCard {
    pub card_id: Uuid,
    pub question: String,
    pub answer: String,
    pub rating: f64,
}
