//! Generación de Cypher a partir de una pregunta en lenguaje natural y del esquema.

use std::sync::Arc;

use tracing::debug;

use crate::cypher;
use crate::error::QaResult;
use crate::llm::CompletionService;
use crate::models::{GeneratedQuery, QueryOrigin};
use crate::schema::SchemaDescription;

pub const CYPHER_GENERATION_TEMPLATE: &str = r#"Eres un experto en Neo4j y Cypher. Dada una pregunta en lenguaje natural y un esquema de grafo,
genera una consulta Cypher que la responda. NO RESPONDAS A LA PREGUNTA, sólo genera la consulta.
Usa únicamente las etiquetas, tipos de relación y propiedades del esquema, y sólo lo necesario según la pregunta.
No incluyas ejemplos ni explicaciones. No pongas la consulta dentro de bloques de código markdown.
Devuelve columnas con alias explícitos (p. ej. `RETURN p.name AS name`), nunca `RETURN *`.

Esquema del grafo:
{schema}

Pregunta: {question}
Consulta Cypher:"#;

/// Sustituye los marcadores `{clave}` de una plantilla.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

pub struct QuerySynthesizer {
    llm: Arc<dyn CompletionService>,
}

impl QuerySynthesizer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub fn prompt(question: &str, schema: &SchemaDescription) -> String {
        fill_template(
            CYPHER_GENERATION_TEMPLATE,
            &[("schema", schema.render().trim_end()), ("question", question.trim())],
        )
    }

    /// Pide al LLM una consulta y la limpia de artefactos de formato. Sin reintentos.
    pub async fn synthesize(&self, question: &str, schema: &SchemaDescription) -> QaResult<GeneratedQuery> {
        let prompt = Self::prompt(question, schema);
        let raw_completion = self.llm.complete(&prompt).await?;
        let query = cypher::extract_query(&raw_completion);
        debug!("Consulta sintetizada: {query}");

        Ok(GeneratedQuery {
            query,
            prompt,
            raw_completion,
            origin: QueryOrigin::Synthesized,
        })
    }
}
