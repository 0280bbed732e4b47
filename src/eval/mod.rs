pub mod classify;
pub mod profile;
pub mod scorer;

pub use classify::{classify, classify_transcript, Classification, Outcome, OutcomeSignals};
pub use profile::{ArgumentCheck, FieldRule, OrderingRule, ScoringProfile};
pub use scorer::{Criterion, Grade, ScoreCard, Scores, TranscriptScorer};
