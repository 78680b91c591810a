//! Adaptive practice sessions: state machine, timing model, and stats.

pub mod completion;
pub mod engine;
pub mod error;
pub mod models;
pub mod ordering;
pub mod storage;
pub mod timing;

pub use engine::{PracticeEngine, StartSession};
pub use error::{PracticeError, Result};
pub use models::{
    AnswerOutcome, Attempt, Card, CardSet, HardestCard, Mode, NextPrompt, Phase, Progress,
    PromptType, Session, SessionSettings, UserCalibration, UserCardStat,
};
pub use storage::PracticeStore;
