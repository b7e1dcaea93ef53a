//! Text mining: turns extracted text into language-filtered token streams

pub mod language;
pub mod lemmatize;
pub mod normalize;
pub mod pipeline;
pub mod stopwords;

pub use lemmatize::{Lemmatizer, SnowballLemmatizer};
pub use pipeline::{MiningPipeline, MiningSummary, Stage, StageError};
