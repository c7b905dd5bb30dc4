//! Persona-flavored use cases on top of a [`CompletionBackend`].
//!
//! Every operation is one request/response exchange with no retries. Failures
//! never escape: they come back as [`Generated::Fallback`] or
//! [`Relevance::Unavailable`] and are logged.

use std::sync::Arc;

use crate::config::RelevanceMatch;
use crate::llm_client::CompletionBackend;
use crate::persona::Persona;
use crate::turn::Turn;

pub const LOADING_FALLBACK: &str = "🤖 gears are spinning… beep boop!";
pub const GREETING_FALLBACK: &str = "Strikes a dramatic pose, hands on hips. Ready for action!";
pub const REPLY_FALLBACK: &str = "🤖 Oops! I couldn't reach my AI brain...";

const LOADING_INSTRUCTION: &str =
    "Generate a short fun 'loading' message in the persona's voice.";
const GREETING_INSTRUCTION: &str = "Generate a fun greeting message in the persona's voice.";
const RELEVANCE_INSTRUCTION: &str =
    "You are a helpful AI. Decide if the next message is related to the current conversation.";

/// Text produced by the model, or the fixed fallback used in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    Fresh(String),
    Fallback { text: String, error: String },
}

impl Generated {
    pub fn text(&self) -> &str {
        match self {
            Generated::Fresh(text) => text,
            Generated::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Generated::Fresh(text) => text,
            Generated::Fallback { text, .. } => text,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Generated::Fallback { .. })
    }

    /// The generated text, or `None` when the fallback was used.
    pub fn fresh(self) -> Option<String> {
        match self {
            Generated::Fresh(text) => Some(text),
            Generated::Fallback { .. } => None,
        }
    }
}

/// Verdict of the relevance gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relevance {
    Related,
    OffTopic,
    /// The check could not run. Treated as related so history is kept.
    Unavailable { error: String },
}

impl Relevance {
    pub fn should_reset(&self) -> bool {
        matches!(self, Relevance::OffTopic)
    }
}

#[derive(Clone)]
pub struct LlmGateway {
    backend: Arc<dyn CompletionBackend>,
    relevance_window: usize,
    relevance_match: RelevanceMatch,
}

impl LlmGateway {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            relevance_window: 6,
            relevance_match: RelevanceMatch::Substring,
        }
    }

    pub fn with_relevance(mut self, window: usize, matching: RelevanceMatch) -> Self {
        self.relevance_window = window;
        self.relevance_match = matching;
        self
    }

    pub fn relevance_window(&self) -> usize {
        self.relevance_window
    }

    pub async fn generate_loading_message(&self, persona: &Persona) -> Generated {
        self.generate_flavor(persona, LOADING_INSTRUCTION, LOADING_FALLBACK, "loading message")
            .await
    }

    pub async fn generate_greeting_message(&self, persona: &Persona) -> Generated {
        self.generate_flavor(persona, GREETING_INSTRUCTION, GREETING_FALLBACK, "greeting message")
            .await
    }

    async fn generate_flavor(
        &self,
        persona: &Persona,
        instruction: &str,
        fallback: &str,
        label: &str,
    ) -> Generated {
        let messages = vec![
            Turn::system(instruction),
            Turn::user(format!("Persona: {} - {}", persona.name, persona.description)),
        ];

        match self.backend.complete(messages).await {
            Ok(text) => Generated::Fresh(text),
            Err(e) => {
                tracing::warn!("Error generating {}: {:#}", label, e);
                Generated::Fallback {
                    text: fallback.to_string(),
                    error: format!("{:#}", e),
                }
            }
        }
    }

    /// Ask the model whether `candidate` continues the conversation in `history`.
    /// Only the last `relevance_window` turns are sent.
    pub async fn check_relevance(&self, history: &[Turn], candidate: &str) -> Relevance {
        let start = history.len().saturating_sub(self.relevance_window);
        let mut messages: Vec<Turn> = history[start..].to_vec();
        messages.push(Turn::system(RELEVANCE_INSTRUCTION));
        messages.push(Turn::user(format!("Message to check: '{}'", candidate)));

        match self.backend.complete(messages).await {
            Ok(answer) => {
                if answer_is_affirmative(&answer, self.relevance_match) {
                    Relevance::Related
                } else {
                    tracing::debug!("Relevance check answered {:?}", answer.trim());
                    Relevance::OffTopic
                }
            }
            Err(e) => {
                tracing::warn!("Relevance check error: {:#}", e);
                Relevance::Unavailable {
                    error: format!("{:#}", e),
                }
            }
        }
    }

    /// Produce the persona's next message for `history`.
    pub async fn reply(&self, persona: &Persona, history: &[Turn]) -> Generated {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(persona.system_turn());
        messages.extend_from_slice(history);

        match self.backend.complete(messages).await {
            Ok(text) => Generated::Fresh(text),
            Err(e) => {
                tracing::warn!("LLM reply error: {:#}", e);
                Generated::Fallback {
                    text: REPLY_FALLBACK.to_string(),
                    error: format!("{:#}", e),
                }
            }
        }
    }
}

fn answer_is_affirmative(answer: &str, matching: RelevanceMatch) -> bool {
    let answer = answer.trim().to_lowercase();
    match matching {
        RelevanceMatch::Substring => answer.contains("yes"),
        RelevanceMatch::Token => answer
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == "yes"),
    }
}
