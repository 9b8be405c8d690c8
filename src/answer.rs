//! Redacción de la respuesta final a partir exclusivamente del conjunto de resultados.

use std::sync::Arc;

use tracing::warn;

use crate::error::QaResult;
use crate::llm::CompletionService;
use crate::models::ResultSet;
use crate::synthesizer::fill_template;

pub const QA_TEMPLATE: &str = r#"Eres un asistente que ayuda a responder preguntas a partir de datos de un grafo.
El "Contexto" contiene los resultados exactos de una consulta a la base de datos hecha específicamente para responder a la "Pregunta".
No cuestiones si el contexto corresponde a la pregunta ni uses conocimiento propio. Sólo transforma los datos del contexto en una respuesta natural.
Si el contexto está vacío (lista vacía `[]`), di claramente que no encontraste la respuesta.

Contexto:
{context}

Pregunta: {question}
Respuesta útil:"#;

/// Respuesta usada si el LLM devuelve texto vacío.
pub const NOT_FOUND_ANSWER: &str = "No encontré información en el grafo para responder a esta pregunta.";

/// Representación JSON del conjunto de resultados (`[]` si está vacío).
pub fn render_context(result_set: &ResultSet) -> String {
    serde_json::to_string(result_set).unwrap_or_else(|_| "[]".to_string())
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn CompletionService>,
}

impl AnswerSynthesizer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub fn prompt(question: &str, result_set: &ResultSet) -> String {
        let context = render_context(result_set);
        fill_template(QA_TEMPLATE, &[("context", &context), ("question", question.trim())])
    }

    /// Redacta la respuesta. Sólo recibe la pregunta y los registros recuperados.
    pub async fn synthesize(&self, question: &str, result_set: &ResultSet) -> QaResult<String> {
        let prompt = Self::prompt(question, result_set);
        let answer = self.llm.complete(&prompt).await?;
        let answer = answer.trim();

        if answer.is_empty() {
            warn!("El LLM devolvió una respuesta vacía; se usa la respuesta por defecto.");
            return Ok(NOT_FOUND_ANSWER.to_string());
        }
        Ok(answer.to_string())
    }
}
