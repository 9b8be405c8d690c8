//! Dobles de prueba: almacén en memoria y servicios de completado guionizados.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{QaError, QaResult};
use crate::llm::CompletionService;
use crate::models::{Record, ResultSet};
use crate::neo4j_client::GraphStore;
use crate::schema::SchemaDescription;
use crate::seed;

/// Esquema de la demo BigCo.
pub fn bigco_schema() -> SchemaDescription {
    seed::demo_schema()
}

/// Construye un registro con valores de texto.
pub fn record(fields: &[(&str, &str)]) -> Record {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

/// Devuelve las respuestas en orden y guarda los prompts recibidos.
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Tarda `delay` en contestar cada prompt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> QaResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| QaError::Service("guion agotado".into()))
    }
}

/// Responde según el primer fragmento contenido en el prompt. Sin coincidencia
/// devuelve el propio prompt, como un modelo que sólo repite su entrada.
#[derive(Default)]
pub struct RoutedCompletion {
    routes: Vec<(String, Result<String, String>)>,
    prompts: Mutex<Vec<String>>,
}

impl RoutedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, needle: &str, reply: &str) -> Self {
        self.routes.push((needle.to_string(), Ok(reply.to_string())));
        self
    }

    pub fn fail_on(mut self, needle: &str, message: &str) -> Self {
        self.routes.push((needle.to_string(), Err(message.to_string())));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for RoutedCompletion {
    async fn complete(&self, prompt: &str) -> QaResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.routes.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, Ok(reply))) => Ok(reply.clone()),
            Some((_, Err(message))) => Err(QaError::Service(message.clone())),
            None => Ok(prompt.to_string()),
        }
    }
}

/// Servicio caído.
pub struct FailingCompletion;

#[async_trait]
impl CompletionService for FailingCompletion {
    async fn complete(&self, _prompt: &str) -> QaResult<String> {
        Err(QaError::Service("429 Too Many Requests".into()))
    }
}

/// Almacén en memoria: responde por subcadena de la consulta.
pub struct InMemoryStore {
    schema: SchemaDescription,
    available: bool,
    delay: Option<Duration>,
    responses: Vec<(String, ResultSet)>,
    rejections: Vec<(String, String)>,
    queries: Mutex<Vec<String>>,
    limits: Mutex<Vec<usize>>,
    served: Mutex<usize>,
}

impl InMemoryStore {
    pub fn new(schema: SchemaDescription) -> Self {
        Self {
            schema,
            available: true,
            delay: None,
            responses: Vec::new(),
            rejections: Vec::new(),
            queries: Mutex::new(Vec::new()),
            limits: Mutex::new(Vec::new()),
            served: Mutex::new(0),
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn respond(mut self, needle: &str, rows: ResultSet) -> Self {
        self.responses.push((needle.to_string(), rows));
        self
    }

    pub fn reject(mut self, needle: &str, message: &str) -> Self {
        self.rejections.push((needle.to_string(), message.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Consultas recibidas, en orden.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Límite de registros pedido en cada consulta.
    pub fn limits(&self) -> Vec<usize> {
        self.limits.lock().unwrap().clone()
    }

    /// Registros entregados en total.
    pub fn rows_served(&self) -> usize {
        *self.served.lock().unwrap()
    }

    async fn wait(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryStore {
    async fn schema(&self) -> QaResult<SchemaDescription> {
        self.wait().await;
        if !self.available {
            return Err(QaError::StoreUnavailable("connection refused".into()));
        }
        Ok(self.schema.clone())
    }

    async fn query(&self, text: &str, limit: usize) -> QaResult<ResultSet> {
        self.queries.lock().unwrap().push(text.to_string());
        self.limits.lock().unwrap().push(limit);
        self.wait().await;
        if !self.available {
            return Err(QaError::StoreUnavailable("connection refused".into()));
        }
        if let Some((_, message)) = self.rejections.iter().find(|(n, _)| text.contains(n.as_str())) {
            return Err(QaError::Execution {
                query: text.to_string(),
                message: message.clone(),
            });
        }
        let rows: ResultSet = self
            .responses
            .iter()
            .find(|(n, _)| text.contains(n.as_str()))
            .map(|(_, rows)| rows.iter().take(limit).cloned().collect())
            .unwrap_or_default();
        *self.served.lock().unwrap() += rows.len();
        Ok(rows)
    }
}
