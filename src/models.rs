//! Modelos de dominio del pipeline (consultas generadas, resultados, etapas).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{FailureKind, QaError};

/// Un registro devuelto por el almacén: nombre de columna → valor.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Secuencia ordenada de registros. Vacía significa "sin coincidencias", no error.
pub type ResultSet = Vec<Record>;

/// Origen de una consulta candidata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOrigin {
    Synthesized,
    Repaired { attempt: usize },
}

/// Consulta Cypher candidata junto con el prompt y la respuesta cruda que la produjeron.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedQuery {
    pub query: String,
    pub prompt: String,
    pub raw_completion: String,
    pub origin: QueryOrigin,
}

/// Resultado de validar una consulta contra el esquema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    Invalid { reasons: Vec<String> },
}

/// Etapas de la máquina de estados del orquestador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Describing,
    Synthesizing,
    Validating,
    Repairing,
    Executing,
    Answering,
    Done,
    Failed(FailureKind),
}

/// Resultado completo de una pregunta respondida.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub id: Uuid,
    pub question: String,
    /// Consulta que produjo `result_set`.
    pub final_query: String,
    pub result_set: ResultSet,
    pub answer: String,
    pub attempts: Vec<GeneratedQuery>,
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

/// Pregunta que no pudo responderse, con lo que se llegó a producir.
#[derive(Debug, Clone)]
pub struct QuestionFailure {
    pub id: Uuid,
    pub question: String,
    pub stages: Vec<Stage>,
    pub attempts: Vec<GeneratedQuery>,
    pub error: QaError,
}

impl QuestionFailure {
    pub fn kind(&self) -> FailureKind {
        self.error.kind()
    }

    /// Última consulta conocida: la del error o el último intento generado.
    pub fn last_query(&self) -> Option<&str> {
        self.error
            .query()
            .or_else(|| self.attempts.last().map(|a| a.query.as_str()))
    }
}

impl std::fmt::Display for QuestionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "No se pudo responder a '{}': {}",
            self.question, self.error
        )
    }
}

/// Salida de una pregunta dentro de un lote.
#[derive(Debug, Clone)]
pub struct QuestionOutcome(pub Result<PipelineResult, QuestionFailure>);

impl QuestionOutcome {
    pub fn question(&self) -> &str {
        match &self.0 {
            Ok(result) => &result.question,
            Err(failure) => &failure.question,
        }
    }

    pub fn is_answered(&self) -> bool {
        self.0.is_ok()
    }

    /// Respuesta visible para el usuario: nunca vacía ni inventada.
    pub fn display_answer(&self) -> String {
        match &self.0 {
            Ok(result) => result.answer.clone(),
            Err(failure) => failure.to_string(),
        }
    }
}
