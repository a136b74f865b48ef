//! Chat orchestration
//!
//! Classifies intent, runs retrieval, dispatches slash-command tools,
//! assembles the system prompt with citations, and streams the model's
//! answer. Per-turn ordering: intent -> retrieval -> tools -> prompt ->
//! stream.

pub mod intent;
pub mod orchestrator;
pub mod prompt;

pub use intent::{classify_intent, Intent, IntentClassification};
pub use orchestrator::ChatOrchestrator;
