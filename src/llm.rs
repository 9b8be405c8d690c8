//! Abstracción sobre Rig para obtener completados de texto de distintos proveedores
//! de LLM (Gemini y OpenAI).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::{gemini, openai};
use tracing::debug;

use crate::config::{AppConfig, LlmProvider};
use crate::error::{QaError, QaResult};

/// Servicio de completado de texto: prompt → texto.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> QaResult<String>;
}

/// Agente de chat ya construido para el proveedor configurado.
#[derive(Clone)]
enum ChatAgent {
    Gemini(Agent<gemini::completion::CompletionModel>),
    OpenAI(Agent<openai::responses_api::ResponsesCompletionModel>),
}

/// Gestor de LLMs. El cliente y el agente se construyen una sola vez.
#[derive(Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    agent: ChatAgent,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let key_var = cfg.llm_provider.api_key_var();
        let api_key = std::env::var(key_var).with_context(|| format!("Falta {key_var} en el entorno"))?;
        let model = if cfg.llm_chat_model.is_empty() {
            cfg.llm_provider.default_chat_model()
        } else {
            cfg.llm_chat_model.as_str()
        };

        let agent = match cfg.llm_provider {
            LlmProvider::Gemini => {
                let client = gemini::Client::builder(&api_key)
                    .build()
                    .map_err(|e| anyhow!("No se pudo crear el cliente de Gemini: {e}"))?;
                ChatAgent::Gemini(client.agent(model).temperature(0.0).build())
            }
            LlmProvider::OpenAI => {
                let client = openai::Client::new(&api_key);
                ChatAgent::OpenAI(client.agent(model).temperature(0.0).build())
            }
        };

        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: model.to_string(),
            agent,
        })
    }
}

#[async_trait]
impl CompletionService for LlmManager {
    async fn complete(&self, prompt: &str) -> QaResult<String> {
        debug!(
            "Solicitando completado a {:?} ({}), {} caracteres de prompt",
            self.provider,
            self.chat_model,
            prompt.len()
        );

        match &self.agent {
            ChatAgent::Gemini(agent) => agent
                .prompt(prompt)
                .await
                .map_err(|e| QaError::Service(format!("Gemini: {e}"))),
            ChatAgent::OpenAI(agent) => agent
                .prompt(prompt)
                .await
                .map_err(|e| QaError::Service(format!("OpenAI: {e}"))),
        }
    }
}

/// Aplica un tiempo límite a cualquier servicio de completado.
pub struct TimedCompletion {
    inner: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl TimedCompletion {
    pub fn new(inner: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl CompletionService for TimedCompletion {
    async fn complete(&self, prompt: &str) -> QaResult<String> {
        tokio::time::timeout(self.timeout, self.inner.complete(prompt))
            .await
            .map_err(|_| {
                QaError::Service(format!(
                    "sin respuesta del LLM tras {} s",
                    self.timeout.as_secs_f32()
                ))
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::testing::{FailingCompletion, ScriptedCompletion};

    #[tokio::test]
    async fn slow_services_time_out_as_service_errors() {
        let slow = Arc::new(ScriptedCompletion::new(["MATCH (n) RETURN n"]).with_delay(Duration::from_millis(500)));
        let timed = TimedCompletion::new(slow.clone(), Duration::from_millis(20));

        let err = timed.complete("¿Quién?").await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::ServiceUnavailable);
        assert!(err.to_string().contains("sin respuesta del LLM"));
        assert_eq!(slow.prompts(), vec!["¿Quién?".to_string()]);
    }

    #[tokio::test]
    async fn fast_services_pass_through() {
        let timed = TimedCompletion::new(
            Arc::new(ScriptedCompletion::new(["MATCH (n) RETURN n"])),
            Duration::from_secs(5),
        );
        assert_eq!(timed.complete("¿Quién?").await.unwrap(), "MATCH (n) RETURN n");

        let failing = TimedCompletion::new(Arc::new(FailingCompletion), Duration::from_secs(5));
        let err = failing.complete("¿Quién?").await.unwrap_err();
        assert!(err.to_string().contains("429"));
    }
}
