//! Carga y validación de la configuración de la aplicación (Neo4j + LLM + pipeline).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    Gemini,
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// Variable de entorno de la que Rig lee la clave del proveedor.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }

    pub fn default_chat_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAI => "gpt-4o-mini",
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub llm_timeout: Duration,

    pub max_attempts: usize,
    pub top_k: usize,
    pub batch_concurrency: usize,
    pub query_timeout: Duration,
    pub allow_writes: bool,
    pub seed_demo_data: bool,
}

fn required(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(anyhow!("Falta {name} en el entorno")),
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "si" | "sí" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn bool_or(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => parse_bool(&raw).ok_or_else(|| anyhow!("Valor inválido para {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe)
    /// y la valida.
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = required("NEO4J_URI")?;
        let neo4j_user = required("NEO4J_USERNAME")?;
        let neo4j_password = required("NEO4J_PASSWORD")?;

        let llm_provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        required(llm_provider.api_key_var())?;

        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .unwrap_or_else(|_| llm_provider.default_chat_model().to_string());

        let cfg = Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            llm_provider,
            llm_chat_model,
            llm_timeout: Duration::from_secs(parse_or("QA_LLM_TIMEOUT_SECS", 60)?),
            max_attempts: parse_or("QA_MAX_ATTEMPTS", 3)?,
            top_k: parse_or("QA_TOP_K", 10)?,
            batch_concurrency: parse_or("QA_BATCH_CONCURRENCY", 1)?,
            query_timeout: Duration::from_secs(parse_or("QA_QUERY_TIMEOUT_SECS", 30)?),
            allow_writes: bool_or("QA_ALLOW_WRITES", false)?,
            seed_demo_data: bool_or("SEED_DEMO_DATA", true)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Comprueba rangos y formato. Se ejecuta antes de cualquier trabajo del pipeline.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.neo4j_uri)
            .map_err(|e| anyhow!("NEO4J_URI inválida ('{}'): {e}", self.neo4j_uri))?;
        if url.host_str().is_none() {
            bail!("NEO4J_URI no contiene host: '{}'", self.neo4j_uri);
        }
        if self.max_attempts == 0 {
            bail!("QA_MAX_ATTEMPTS debe ser al menos 1");
        }
        if self.top_k == 0 {
            bail!("QA_TOP_K debe ser al menos 1");
        }
        if self.batch_concurrency == 0 {
            bail!("QA_BATCH_CONCURRENCY debe ser al menos 1");
        }
        if self.llm_timeout.is_zero() || self.query_timeout.is_zero() {
            bail!("Los tiempos límite deben ser mayores que cero");
        }
        Ok(())
    }
}
