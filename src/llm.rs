//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! Un único punto de configuración (`LLM_PROVIDER`) sirve a todo el motor.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;

use crate::config::{AppConfig, LlmProvider};

/// Modelo de lenguaje usado por el motor para extraer conocimiento y responder.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String>;
}

/// Gestor de LLMs.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let key_var = match cfg.llm_provider {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        };
        // Rig entra en pánico si falta la clave: mejor fallar aquí con un error.
        std::env::var(key_var)
            .map_err(|_| anyhow!("Falta {key_var} en el entorno para el proveedor {:?}", cfg.llm_provider))?;

        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn complete_with_openai(&self, system_prompt: &str, prompt: &str) -> Result<String> {
        use rig::client::{CompletionClient as _, ProviderClient as _};
        use rig::providers::openai;

        let client = openai::Client::from_env();
        let agent = client
            .agent(&self.chat_model)
            .preamble(system_prompt)
            .build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    async fn complete_with_gemini(&self, system_prompt: &str, prompt: &str) -> Result<String> {
        use rig::client::{CompletionClient as _, ProviderClient as _};
        use rig::providers::gemini;

        let client = gemini::Client::from_env();
        let agent = client
            .agent(&self.chat_model)
            .preamble(system_prompt)
            .temperature(0.1)
            .build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }
}

#[async_trait]
impl LanguageModel for LlmManager {
    async fn complete(&self, system_prompt: &str, prompt: &str) -> Result<String> {
        let answer = match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(system_prompt, prompt).await?,
            LlmProvider::Gemini => self.complete_with_gemini(system_prompt, prompt).await?,
        };
        Ok(answer.trim().to_string())
    }
}
