use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::llm_gateway::{LlmGateway, GREETING_FALLBACK, LOADING_FALLBACK};
use crate::turn::Turn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// The system turn that opens every reply request.
    pub fn system_turn(&self) -> Turn {
        Turn::system(format!("You are {}, {}.", self.name, self.description))
    }
}

/// Cosmetic texts spoken in the persona's voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorMessages {
    /// Placeholder shown while a reply is generated.
    pub loading: String,
    /// Sent to a channel when it is allowed.
    pub greeting: String,
}

impl Default for FlavorMessages {
    fn default() -> Self {
        Self {
            loading: LOADING_FALLBACK.to_string(),
            greeting: GREETING_FALLBACK.to_string(),
        }
    }
}

/// What a persona switch left in effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaChange {
    pub persona: Persona,
    pub flavor: FlavorMessages,
    pub loading_regenerated: bool,
    pub greeting_regenerated: bool,
}

struct PersonaState {
    persona: Persona,
    flavor: FlavorMessages,
}

pub struct PersonaStore {
    state: RwLock<PersonaState>,
}

impl PersonaStore {
    pub fn new(persona: Persona) -> Self {
        Self {
            state: RwLock::new(PersonaState {
                persona,
                flavor: FlavorMessages::default(),
            }),
        }
    }

    pub async fn current_persona(&self) -> Persona {
        self.state.read().await.persona.clone()
    }

    pub async fn flavor(&self) -> FlavorMessages {
        self.state.read().await.flavor.clone()
    }

    pub async fn loading_message(&self) -> String {
        self.state.read().await.flavor.loading.clone()
    }

    pub async fn greeting_message(&self) -> String {
        self.state.read().await.flavor.greeting.clone()
    }

    /// Switch persona and regenerate both flavor messages in its voice.
    ///
    /// A flavor message whose generation fails keeps its previous text.
    /// The persona itself is replaced regardless. Replies keep using the
    /// old persona until the switch is committed.
    pub async fn set_persona(
        &self,
        name: &str,
        description: &str,
        gateway: &LlmGateway,
    ) -> PersonaChange {
        let persona = Persona::new(name, description);

        // Generated outside the lock so replies in flight are not blocked.
        let loading = gateway.generate_loading_message(&persona).await.fresh();
        let greeting = gateway.generate_greeting_message(&persona).await.fresh();

        // Persona and flavor commit together under one write lock.
        let mut state = self.state.write().await;
        state.persona = persona;
        let loading_regenerated = loading.is_some();
        let greeting_regenerated = greeting.is_some();
        if let Some(loading) = loading {
            state.flavor.loading = loading;
        }
        if let Some(greeting) = greeting {
            state.flavor.greeting = greeting;
        }
        tracing::info!("Persona changed to {}", state.persona.name);

        PersonaChange {
            persona: state.persona.clone(),
            flavor: state.flavor.clone(),
            loading_regenerated,
            greeting_regenerated,
        }
    }
}
