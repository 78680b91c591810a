//! recalld — adaptive practice-session engine for graduated flashcard
//! drilling.
//!
//! Sessions run in one of three difficulty modes (easy, moderate, hard),
//! each with its own preview/test phase progression over a card order
//! frozen at session start. Time budgets adapt to the user's calibrated
//! reading speed and a per-card difficulty rating that is smoothed at
//! every session completion. Test prompts can be routed through an
//! external blanking service for fill-in-the-blank variations.

pub mod blanking;
pub mod practice;
pub mod server;
pub mod shuffle;

pub use practice::{
    Mode, NextPrompt, Phase, PracticeEngine, PracticeError, PracticeStore, PromptType,
    StartSession,
};
