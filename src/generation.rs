use async_trait::async_trait;
use rig::{agent::Agent, client::CompletionClient, completion::Prompt, providers::openrouter};

const MODEL_NAME: &str = "openai/gpt-4o-mini";

const PREAMBLE: &str =
    "You are an educational assistant that creates high-quality study flashcards from source material.";

/// Narrow seam over the generative model. The production engine is built once
/// at startup and injected into the flashcard service; tests substitute a
/// scripted engine.
#[async_trait]
pub trait GenerationEngine: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

pub struct OpenRouterEngine {
    agent: Agent<openrouter::CompletionModel>,
}

impl OpenRouterEngine {
    pub fn new(api_key: &str) -> Self {
        let client = openrouter::Client::new(api_key);
        let agent = client.agent(MODEL_NAME).preamble(PREAMBLE).build();
        Self { agent }
    }
}

#[async_trait]
impl GenerationEngine for OpenRouterEngine {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self.agent.prompt(prompt).await?;
        Ok(response)
    }
}
