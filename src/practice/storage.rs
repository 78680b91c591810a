//! SQLite persistence for sessions, attempts, and per-user stats.
//!
//! Single-connection store; callers serialize access (the engine keeps the
//! store behind a mutex and additionally holds a per-session lock across a
//! whole read-modify-write, see `engine.rs`). Ordered-sequence fields (the
//! frozen card order, the HARD test queue) are JSON-serialized into TEXT
//! columns and kept strongly typed at this boundary.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::error::{PracticeError, Result};
use super::models::*;
use super::timing::{clamp_or, DEFAULT_RATING, DEFAULT_WORDS_PER_SECOND};

/// Per-card aggregate of a session's attempts, input to the completion
/// engine.
#[derive(Debug, Clone)]
pub struct CardAggregate {
    pub card_id: Uuid,
    pub attempts: u32,
    pub correct: u32,
    /// Mean of recorded response times; 0 when no attempt carried one
    pub avg_time_secs: f64,
}

pub struct PracticeStore {
    conn: Connection,
}

impl PracticeStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PracticeError::InvalidInput(format!("cannot create db directory: {}", e))
                })?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS card_sets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                set_id TEXT NOT NULL REFERENCES card_sets(id) ON DELETE CASCADE,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                set_id TEXT NOT NULL REFERENCES card_sets(id) ON DELETE CASCADE,
                mode TEXT NOT NULL,
                display_time_secs REAL NOT NULL,
                answer_time_limit_secs INTEGER NOT NULL,
                -- JSON array of card ids, frozen at creation
                card_order TEXT NOT NULL,
                phase TEXT NOT NULL,
                easy_index INTEGER NOT NULL DEFAULT 0,
                group_index INTEGER NOT NULL DEFAULT 0,
                preview_index INTEGER NOT NULL DEFAULT 0,
                test_index INTEGER NOT NULL DEFAULT 0,
                -- JSON array; present only for HARD sessions in test phase
                test_queue TEXT,
                completed_at TEXT,
                final_score INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_settings (
                session_id TEXT PRIMARY KEY REFERENCES sessions(id) ON DELETE CASCADE,
                group_size INTEGER NOT NULL,
                randomize_order INTEGER NOT NULL,
                adaptive_preview INTEGER NOT NULL,
                adaptive_answer INTEGER NOT NULL,
                speed_modifier REAL NOT NULL,
                prompt_type TEXT NOT NULL,
                blank_ratio REAL,
                -- u64 stored as decimal text (SQLite INTEGER is signed)
                seed TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS attempts (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                card_id TEXT NOT NULL,
                correct INTEGER NOT NULL,
                answer_text TEXT NOT NULL,
                time_taken_secs REAL,
                attempt_number INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_card_stats (
                user_id TEXT NOT NULL,
                card_id TEXT NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
                rating REAL NOT NULL,
                times_seen INTEGER NOT NULL,
                times_correct INTEGER NOT NULL,
                times_incorrect INTEGER NOT NULL,
                avg_response_secs REAL NOT NULL,
                last_seen_at TEXT NOT NULL,
                PRIMARY KEY (user_id, card_id)
            );

            CREATE TABLE IF NOT EXISTS user_calibration (
                user_id TEXT PRIMARY KEY,
                words_per_second REAL NOT NULL,
                calibrated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cards_set_id ON cards(set_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_attempts_session_id ON attempts(session_id);
            CREATE INDEX IF NOT EXISTS idx_stats_user_id ON user_card_stats(user_id);
            "#,
        )?;
        Ok(Self { conn })
    }

    // ==================== Sets & Cards ====================

    pub fn create_set(&self, set: &CardSet) -> Result<()> {
        self.conn.execute(
            "INSERT INTO card_sets (id, user_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                set.id.to_string(),
                set.user_id.to_string(),
                set.name,
                set.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn get_set(&self, set_id: Uuid) -> Result<CardSet> {
        self.conn
            .query_row(
                "SELECT id, user_id, name, created_at FROM card_sets WHERE id = ?1",
                params![set_id.to_string()],
                |row| {
                    Ok(CardSet {
                        id: parse_uuid(row, 0)?,
                        user_id: parse_uuid(row, 1)?,
                        name: row.get(2)?,
                        created_at: parse_time(row, 3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| PracticeError::NotFound(format!("set {}", set_id)))
    }

    pub fn create_card(&self, card: &Card) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cards (id, set_id, question, answer, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                card.id.to_string(),
                card.set_id.to_string(),
                card.question,
                card.answer,
                card.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// All cards of a set in ascending identity order — the base order every
    /// session is built from.
    pub fn list_cards(&self, set_id: Uuid) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, set_id, question, answer, created_at
             FROM cards WHERE set_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![set_id.to_string()], map_card)?;
        let mut cards = Vec::new();
        for row in rows {
            cards.push(row?);
        }
        Ok(cards)
    }

    pub fn get_card(&self, card_id: Uuid) -> Result<Card> {
        self.conn
            .query_row(
                "SELECT id, set_id, question, answer, created_at FROM cards WHERE id = ?1",
                params![card_id.to_string()],
                map_card,
            )
            .optional()?
            .ok_or_else(|| PracticeError::NotFound(format!("card {}", card_id)))
    }

    // ==================== Sessions ====================

    /// Persist a new session together with its settings, atomically.
    pub fn create_session(&mut self, session: &Session, settings: &SessionSettings) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO sessions (id, user_id, set_id, mode, display_time_secs,
                 answer_time_limit_secs, card_order, phase, easy_index, group_index,
                 preview_index, test_index, test_queue, completed_at, final_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                session.id.to_string(),
                session.user_id.to_string(),
                session.set_id.to_string(),
                session.mode.as_str(),
                session.display_time_secs,
                session.answer_time_limit_secs,
                serde_json::to_string(&session.card_order)?,
                session.phase.as_str(),
                session.easy_index as i64,
                session.group_index as i64,
                session.preview_index as i64,
                session.test_index as i64,
                session
                    .test_queue
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                session.completed_at.map(|t| t.to_rfc3339()),
                session.final_score,
                session.created_at.to_rfc3339()
            ],
        )?;
        tx.execute(
            "INSERT INTO session_settings (session_id, group_size, randomize_order,
                 adaptive_preview, adaptive_answer, speed_modifier, prompt_type,
                 blank_ratio, seed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                settings.session_id.to_string(),
                settings.group_size,
                settings.randomize_order,
                settings.adaptive_preview,
                settings.adaptive_answer,
                settings.speed_modifier,
                settings.prompt_type.as_str(),
                settings.blank_ratio,
                settings.seed.to_string()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_session(&self, session_id: Uuid) -> Result<Session> {
        self.conn
            .query_row(
                "SELECT id, user_id, set_id, mode, display_time_secs, answer_time_limit_secs,
                        card_order, phase, easy_index, group_index, preview_index, test_index,
                        test_queue, completed_at, final_score, created_at
                 FROM sessions WHERE id = ?1",
                params![session_id.to_string()],
                map_session,
            )
            .optional()?
            .ok_or_else(|| PracticeError::NotFound(format!("session {}", session_id)))
    }

    /// Write back a session's mutable state (cursors, phase, queue,
    /// completion fields). Identity and frozen order are immutable but the
    /// order is rewritten verbatim; settings are never touched.
    pub fn update_session(&self, session: &Session) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sessions SET phase = ?2, easy_index = ?3, group_index = ?4,
                 preview_index = ?5, test_index = ?6, test_queue = ?7,
                 completed_at = ?8, final_score = ?9
             WHERE id = ?1",
            params![
                session.id.to_string(),
                session.phase.as_str(),
                session.easy_index as i64,
                session.group_index as i64,
                session.preview_index as i64,
                session.test_index as i64,
                session
                    .test_queue
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                session.completed_at.map(|t| t.to_rfc3339()),
                session.final_score,
            ],
        )?;
        if updated == 0 {
            return Err(PracticeError::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    pub fn get_settings(&self, session_id: Uuid) -> Result<SessionSettings> {
        self.conn
            .query_row(
                "SELECT session_id, group_size, randomize_order, adaptive_preview,
                        adaptive_answer, speed_modifier, prompt_type, blank_ratio, seed
                 FROM session_settings WHERE session_id = ?1",
                params![session_id.to_string()],
                map_settings,
            )
            .optional()?
            // a session without settings is a broken write, not a 404
            .ok_or_else(|| {
                PracticeError::Integrity(format!("settings missing for session {}", session_id))
            })
    }

    // ==================== Attempts ====================

    /// Append an attempt row, assigning the next per-(session, card)
    /// attempt number.
    pub fn record_attempt(
        &mut self,
        session_id: Uuid,
        card_id: Uuid,
        correct: bool,
        answer_text: &str,
        time_taken_secs: Option<f64>,
    ) -> Result<Attempt> {
        let tx = self.conn.transaction()?;
        let prior: u32 = tx.query_row(
            "SELECT COUNT(*) FROM attempts WHERE session_id = ?1 AND card_id = ?2",
            params![session_id.to_string(), card_id.to_string()],
            |row| row.get(0),
        )?;
        let attempt = Attempt {
            id: Uuid::new_v4(),
            session_id,
            card_id,
            correct,
            answer_text: answer_text.to_string(),
            time_taken_secs,
            attempt_number: prior + 1,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO attempts (id, session_id, card_id, correct, answer_text,
                 time_taken_secs, attempt_number, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                attempt.id.to_string(),
                attempt.session_id.to_string(),
                attempt.card_id.to_string(),
                attempt.correct,
                attempt.answer_text,
                attempt.time_taken_secs,
                attempt.attempt_number,
                attempt.created_at.to_rfc3339()
            ],
        )?;
        tx.commit()?;
        Ok(attempt)
    }

    /// Attempts so far for a card in a session (next attempt is this + 1).
    pub fn attempt_count(&self, session_id: Uuid, card_id: Uuid) -> Result<u32> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM attempts WHERE session_id = ?1 AND card_id = ?2",
            params![session_id.to_string(), card_id.to_string()],
            |row| row.get(0),
        )?)
    }

    /// Per-card aggregates for the completion engine.
    pub fn aggregate_attempts(&self, session_id: Uuid) -> Result<Vec<CardAggregate>> {
        let mut stmt = self.conn.prepare(
            "SELECT card_id, COUNT(*), SUM(correct), AVG(time_taken_secs)
             FROM attempts WHERE session_id = ?1 GROUP BY card_id",
        )?;
        let rows = stmt.query_map(params![session_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, Option<f64>>(3)?,
            ))
        })?;
        let mut aggregates = Vec::new();
        for row in rows {
            let (card_id, attempts, correct, avg_time) = row?;
            aggregates.push(CardAggregate {
                card_id: uuid_from_str(&card_id)?,
                attempts,
                correct,
                avg_time_secs: avg_time.unwrap_or(0.0),
            });
        }
        Ok(aggregates)
    }

    // ==================== Stats & Calibration ====================

    pub fn get_stat(&self, user_id: Uuid, card_id: Uuid) -> Result<Option<UserCardStat>> {
        Ok(self
            .conn
            .query_row(
                "SELECT user_id, card_id, rating, times_seen, times_correct,
                        times_incorrect, avg_response_secs, last_seen_at
                 FROM user_card_stats WHERE user_id = ?1 AND card_id = ?2",
                params![user_id.to_string(), card_id.to_string()],
                |row| {
                    Ok(UserCardStat {
                        user_id: parse_uuid(row, 0)?,
                        card_id: parse_uuid(row, 1)?,
                        rating: row.get(2)?,
                        times_seen: row.get(3)?,
                        times_correct: row.get(4)?,
                        times_incorrect: row.get(5)?,
                        avg_response_secs: row.get(6)?,
                        last_seen_at: parse_time(row, 7)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn upsert_stat(&self, stat: &UserCardStat) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_card_stats (user_id, card_id, rating, times_seen,
                 times_correct, times_incorrect, avg_response_secs, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_id, card_id) DO UPDATE SET
                 rating = excluded.rating,
                 times_seen = excluded.times_seen,
                 times_correct = excluded.times_correct,
                 times_incorrect = excluded.times_incorrect,
                 avg_response_secs = excluded.avg_response_secs,
                 last_seen_at = excluded.last_seen_at",
            params![
                stat.user_id.to_string(),
                stat.card_id.to_string(),
                stat.rating,
                stat.times_seen,
                stat.times_correct,
                stat.times_incorrect,
                stat.avg_response_secs,
                stat.last_seen_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Calibrated reading speed with safe fallback; never fails the caller.
    pub fn words_per_second(&self, user_id: Uuid) -> f64 {
        let stored: Option<f64> = self
            .conn
            .query_row(
                "SELECT words_per_second FROM user_calibration WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        clamp_or(
            stored.unwrap_or(DEFAULT_WORDS_PER_SECOND),
            1.0,
            6.0,
            DEFAULT_WORDS_PER_SECOND,
        )
    }

    /// Smoothed difficulty rating with safe fallback; never fails the caller.
    pub fn difficulty_rating(&self, user_id: Uuid, card_id: Uuid) -> f64 {
        let stored: Option<f64> = self
            .conn
            .query_row(
                "SELECT rating FROM user_card_stats WHERE user_id = ?1 AND card_id = ?2",
                params![user_id.to_string(), card_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten();
        clamp_or(stored.unwrap_or(DEFAULT_RATING), 0.0, 100.0, DEFAULT_RATING)
    }

    pub fn get_calibration(&self, user_id: Uuid) -> Result<Option<UserCalibration>> {
        Ok(self
            .conn
            .query_row(
                "SELECT user_id, words_per_second, calibrated_at
                 FROM user_calibration WHERE user_id = ?1",
                params![user_id.to_string()],
                |row| {
                    Ok(UserCalibration {
                        user_id: parse_uuid(row, 0)?,
                        words_per_second: row.get(1)?,
                        calibrated_at: parse_time(row, 2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn set_calibration(&self, calibration: &UserCalibration) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_calibration (user_id, words_per_second, calibrated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                 words_per_second = excluded.words_per_second,
                 calibrated_at = excluded.calibrated_at",
            params![
                calibration.user_id.to_string(),
                calibration.words_per_second,
                calibration.calibrated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Top-N cards of a set by descending per-user difficulty rating,
    /// ties broken by descending card id. Cards without a stat row count
    /// as the default rating.
    pub fn hardest_cards(&self, user_id: Uuid, set_id: Uuid, limit: usize) -> Result<Vec<HardestCard>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.question, c.answer, COALESCE(s.rating, ?3)
             FROM cards c
             LEFT JOIN user_card_stats s ON s.card_id = c.id AND s.user_id = ?2
             WHERE c.set_id = ?1
             ORDER BY COALESCE(s.rating, ?3) DESC, c.id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                set_id.to_string(),
                user_id.to_string(),
                DEFAULT_RATING,
                limit as i64
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?;
        let mut cards = Vec::new();
        for row in rows {
            let (id, question, answer, rating) = row?;
            cards.push(HardestCard {
                card_id: uuid_from_str(&id)?,
                question,
                answer,
                rating,
            });
        }
        Ok(cards)
    }
}

// ==================== Row mapping ====================

fn parse_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            }),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    text: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn uuid_from_str(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| PracticeError::Integrity(format!("malformed uuid {}: {}", s, e)))
}

fn map_card(row: &Row<'_>) -> rusqlite::Result<Card> {
    Ok(Card {
        id: parse_uuid(row, 0)?,
        set_id: parse_uuid(row, 1)?,
        question: row.get(2)?,
        answer: row.get(3)?,
        created_at: parse_time(row, 4)?,
    })
}

fn map_session(row: &Row<'_>) -> rusqlite::Result<Session> {
    let mode: String = row.get(3)?;
    let phase: String = row.get(7)?;
    let order_json: String = row.get(6)?;
    let queue_json: Option<String> = row.get(12)?;
    Ok(Session {
        id: parse_uuid(row, 0)?,
        user_id: parse_uuid(row, 1)?,
        set_id: parse_uuid(row, 2)?,
        mode: Mode::parse(&mode).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown mode {}", mode).into(),
            )
        })?,
        display_time_secs: row.get(4)?,
        answer_time_limit_secs: row.get(5)?,
        card_order: parse_json(6, &order_json)?,
        phase: Phase::parse(&phase).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                7,
                rusqlite::types::Type::Text,
                format!("unknown phase {}", phase).into(),
            )
        })?,
        easy_index: row.get::<_, i64>(8)? as usize,
        group_index: row.get::<_, i64>(9)? as usize,
        preview_index: row.get::<_, i64>(10)? as usize,
        test_index: row.get::<_, i64>(11)? as usize,
        test_queue: queue_json.map(|q| parse_json(12, &q)).transpose()?,
        completed_at: parse_opt_time(row, 13)?,
        final_score: row.get(14)?,
        created_at: parse_time(row, 15)?,
    })
}

fn map_settings(row: &Row<'_>) -> rusqlite::Result<SessionSettings> {
    let prompt: String = row.get(6)?;
    let seed: String = row.get(8)?;
    Ok(SessionSettings {
        session_id: parse_uuid(row, 0)?,
        group_size: row.get(1)?,
        randomize_order: row.get(2)?,
        adaptive_preview: row.get(3)?,
        adaptive_answer: row.get(4)?,
        speed_modifier: row.get(5)?,
        prompt_type: PromptType::parse(&prompt).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown prompt type {}", prompt).into(),
            )
        })?,
        blank_ratio: row.get(7)?,
        seed: seed.parse().map_err(|e: std::num::ParseIntError| {
            rusqlite::Error::FromSqlConversionFailure(
                8,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded_store(cards: usize) -> (PracticeStore, CardSet, Vec<Card>) {
        let store = PracticeStore::open_in_memory().unwrap();
        let set = CardSet::new(Uuid::new_v4(), "test set".to_string());
        store.create_set(&set).unwrap();
        let mut created = Vec::new();
        for i in 0..cards {
            let card = Card::new(set.id, format!("question {}", i), format!("answer {}", i));
            store.create_card(&card).unwrap();
            created.push(card);
        }
        (store, set, created)
    }

    #[test]
    fn test_open_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = PracticeStore::open(dir.path().join("practice.db")).unwrap();
        let set = CardSet::new(Uuid::new_v4(), "persisted".to_string());
        store.create_set(&set).unwrap();
        assert_eq!(store.get_set(set.id).unwrap().name, "persisted");
    }

    #[test]
    fn test_list_cards_ascending_by_id() {
        let (store, set, _) = seeded_store(10);
        let cards = store.list_cards(set.id).unwrap();
        let ids: Vec<Uuid> = cards.iter().map(|c| c.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_session_round_trip() {
        let (mut store, set, cards) = seeded_store(3);
        let user = set.user_id;
        let mut session = Session::new(user, set.id, Mode::Hard);
        session.card_order = cards.iter().map(|c| c.id).collect();
        session.test_queue = Some(vec![cards[1].id, cards[0].id]);
        let settings = SessionSettings::new(session.id);
        store.create_session(&session, &settings).unwrap();

        let loaded = store.get_session(session.id).unwrap();
        assert_eq!(loaded.card_order, session.card_order);
        assert_eq!(loaded.test_queue, session.test_queue);
        assert_eq!(loaded.mode, Mode::Hard);
        assert!(loaded.completed_at.is_none());

        let loaded_settings = store.get_settings(session.id).unwrap();
        assert_eq!(loaded_settings.seed, settings.seed);
        assert_eq!(loaded_settings.group_size, 3);
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let store = PracticeStore::open_in_memory().unwrap();
        match store.get_session(Uuid::new_v4()) {
            Err(PracticeError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|s| s.id)),
        }
    }

    #[test]
    fn test_missing_settings_is_integrity_failure() {
        let store = PracticeStore::open_in_memory().unwrap();
        match store.get_settings(Uuid::new_v4()) {
            Err(PracticeError::Integrity(_)) => {}
            other => panic!("expected Integrity, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_attempt_numbers_count_per_card() {
        let (mut store, set, cards) = seeded_store(2);
        let mut session = Session::new(set.user_id, set.id, Mode::Easy);
        session.card_order = cards.iter().map(|c| c.id).collect();
        let settings = SessionSettings::new(session.id);
        store.create_session(&session, &settings).unwrap();

        let a1 = store
            .record_attempt(session.id, cards[0].id, false, "x", Some(4.0))
            .unwrap();
        let a2 = store
            .record_attempt(session.id, cards[0].id, true, "answer 0", Some(6.0))
            .unwrap();
        let b1 = store
            .record_attempt(session.id, cards[1].id, true, "answer 1", None)
            .unwrap();
        assert_eq!(a1.attempt_number, 1);
        assert_eq!(a2.attempt_number, 2);
        assert_eq!(b1.attempt_number, 1);

        let aggregates = store.aggregate_attempts(session.id).unwrap();
        assert_eq!(aggregates.len(), 2);
        let card0 = aggregates.iter().find(|a| a.card_id == cards[0].id).unwrap();
        assert_eq!(card0.attempts, 2);
        assert_eq!(card0.correct, 1);
        assert!((card0.avg_time_secs - 5.0).abs() < 1e-9);
        let card1 = aggregates.iter().find(|a| a.card_id == cards[1].id).unwrap();
        assert_eq!(card1.avg_time_secs, 0.0);
    }

    #[test]
    fn test_lookup_defaults() {
        let (store, set, cards) = seeded_store(1);
        assert_eq!(store.words_per_second(set.user_id), 2.5);
        assert_eq!(store.difficulty_rating(set.user_id, cards[0].id), 50.0);
    }

    #[test]
    fn test_calibration_round_trip_and_clamp() {
        let (store, set, _) = seeded_store(1);
        store
            .set_calibration(&UserCalibration {
                user_id: set.user_id,
                words_per_second: 2.0,
                calibrated_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(store.words_per_second(set.user_id), 2.0);

        // out-of-range stored values clamp on read
        store
            .set_calibration(&UserCalibration {
                user_id: set.user_id,
                words_per_second: 9.0,
                calibrated_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(store.words_per_second(set.user_id), 6.0);
    }

    #[test]
    fn test_stat_upsert() {
        let (store, set, cards) = seeded_store(1);
        let stat = UserCardStat {
            user_id: set.user_id,
            card_id: cards[0].id,
            rating: 62.0,
            times_seen: 2,
            times_correct: 1,
            times_incorrect: 1,
            avg_response_secs: 5.5,
            last_seen_at: Utc::now(),
        };
        store.upsert_stat(&stat).unwrap();
        assert_eq!(store.difficulty_rating(set.user_id, cards[0].id), 62.0);

        let updated = UserCardStat { rating: 70.0, times_seen: 3, ..stat };
        store.upsert_stat(&updated).unwrap();
        let loaded = store.get_stat(set.user_id, cards[0].id).unwrap().unwrap();
        assert_eq!(loaded.rating, 70.0);
        assert_eq!(loaded.times_seen, 3);
    }

    #[test]
    fn test_hardest_cards_ordering() {
        let (store, set, cards) = seeded_store(4);
        let user = set.user_id;
        let now = Utc::now();
        for (card, rating) in [(&cards[0], 80.0), (&cards[2], 30.0)] {
            store
                .upsert_stat(&UserCardStat {
                    user_id: user,
                    card_id: card.id,
                    rating,
                    times_seen: 1,
                    times_correct: 0,
                    times_incorrect: 1,
                    avg_response_secs: 3.0,
                    last_seen_at: now,
                })
                .unwrap();
        }

        let hardest = store.hardest_cards(user, set.id, 3).unwrap();
        assert_eq!(hardest.len(), 3);
        assert_eq!(hardest[0].card_id, cards[0].id);
        assert_eq!(hardest[0].rating, 80.0);
        // unrated cards come next at the default rating, higher id first
        assert_eq!(hardest[1].rating, 50.0);
        assert_eq!(hardest[2].rating, 50.0);
        assert!(hardest[1].card_id > hardest[2].card_id);
    }

    #[test]
    fn test_set_cascade_deletes_sessions_and_cards() {
        let (mut store, set, cards) = seeded_store(2);
        let mut session = Session::new(set.user_id, set.id, Mode::Easy);
        session.card_order = cards.iter().map(|c| c.id).collect();
        let settings = SessionSettings::new(session.id);
        store.create_session(&session, &settings).unwrap();
        store
            .record_attempt(session.id, cards[0].id, true, "a", None)
            .unwrap();

        store
            .conn
            .execute("DELETE FROM card_sets WHERE id = ?1", params![set.id.to_string()])
            .unwrap();
        assert!(matches!(
            store.get_session(session.id),
            Err(PracticeError::NotFound(_))
        ));
        assert!(store.list_cards(set.id).unwrap().is_empty());
        assert_eq!(store.attempt_count(session.id, cards[0].id).unwrap(), 0);
    }
}
