//! Orquestador: pregunta → esquema → Cypher → validación/reparación → ejecución → respuesta.
//!
//! Cada pregunta recorre la máquina de estados
//! `Describing → Synthesizing → Validating ⇄ Repairing → Executing → Answering → Done`,
//! con `Failed(kind)` como estado terminal alcanzable desde cualquier etapa.
//! Los fallos de una pregunta quedan aislados: el lote continúa con las siguientes.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{stream, StreamExt};
use tokio::sync::RwLock;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::answer::{render_context, AnswerSynthesizer};
use crate::config::AppConfig;
use crate::error::{QaError, QaResult};
use crate::executor::QueryExecutor;
use crate::llm::{CompletionService, TimedCompletion};
use crate::models::{
    GeneratedQuery, PipelineResult, QuestionFailure, QuestionOutcome, ResultSet, Stage,
    ValidationOutcome,
};
use crate::neo4j_client::GraphStore;
use crate::schema::{self, SchemaDescription};
use crate::synthesizer::QuerySynthesizer;
use crate::validator::{self, QueryRepairer, ValidationRules};

/// Parámetros del orquestador.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Candidatas validadas como máximo (la sintetizada más las reparaciones).
    pub max_attempts: usize,
    pub top_k: usize,
    pub query_timeout: Duration,
    /// Tiempo límite de cada completado del LLM.
    pub llm_timeout: Duration,
    pub allow_writes: bool,
    /// Preguntas de un lote en vuelo a la vez.
    pub concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            top_k: 10,
            query_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(60),
            allow_writes: false,
            concurrency: 1,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            top_k: cfg.top_k,
            query_timeout: cfg.query_timeout,
            llm_timeout: cfg.llm_timeout,
            allow_writes: cfg.allow_writes,
            concurrency: cfg.batch_concurrency,
        }
    }
}

/// Estado de una pregunta en curso.
struct Run {
    id: Uuid,
    question: String,
    stages: Vec<Stage>,
    attempts: Vec<GeneratedQuery>,
}

impl Run {
    fn new(id: Uuid, question: &str) -> Self {
        Self {
            id,
            question: question.to_string(),
            stages: Vec::new(),
            attempts: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Etapa: {:?}", stage);
        self.stages.push(stage);
    }

    fn record(&mut self, candidate: &GeneratedQuery) {
        info!("Consulta generada ({:?}): {}", candidate.origin, candidate.query);
        self.attempts.push(candidate.clone());
    }

    fn fail(mut self, error: QaError) -> QuestionFailure {
        self.enter(Stage::Failed(error.kind()));
        let failure = QuestionFailure {
            id: self.id,
            question: self.question,
            stages: self.stages,
            attempts: self.attempts,
            error,
        };
        error!(
            "Pregunta {} fallida '{}' (consulta: {}): {}",
            failure.id,
            failure.question,
            failure.last_query().unwrap_or("-"),
            failure.error
        );
        failure
    }
}

pub struct Pipeline {
    store: Arc<dyn GraphStore>,
    synthesizer: QuerySynthesizer,
    repairer: QueryRepairer,
    executor: QueryExecutor,
    answerer: AnswerSynthesizer,
    rules: ValidationRules,
    settings: PipelineSettings,
    schema: RwLock<Option<Arc<SchemaDescription>>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn GraphStore>,
        llm: Arc<dyn CompletionService>,
        settings: PipelineSettings,
    ) -> Self {
        let llm: Arc<dyn CompletionService> = Arc::new(TimedCompletion::new(llm, settings.llm_timeout));
        Self {
            executor: QueryExecutor::new(store.clone(), settings.query_timeout, settings.top_k),
            store,
            synthesizer: QuerySynthesizer::new(llm.clone()),
            repairer: QueryRepairer::new(llm.clone()),
            answerer: AnswerSynthesizer::new(llm),
            rules: ValidationRules {
                allow_writes: settings.allow_writes,
            },
            settings,
            schema: RwLock::new(None),
        }
    }

    /// Vuelve a leer el esquema del almacén y reemplaza la instantánea.
    pub async fn refresh_schema(&self) -> QaResult<Arc<SchemaDescription>> {
        let fetched = tokio::time::timeout(self.settings.query_timeout, schema::describe(self.store.as_ref()))
            .await
            .map_err(|_| QaError::StoreUnavailable("tiempo límite agotado leyendo el esquema".into()))??;
        if fetched.is_empty() {
            warn!("El grafo no tiene etiquetas ni relaciones; ninguna consulta será válida.");
        }
        let fetched = Arc::new(fetched);
        *self.schema.write().await = Some(fetched.clone());
        Ok(fetched)
    }

    async fn current_schema(&self) -> QaResult<Arc<SchemaDescription>> {
        if let Some(schema) = self.schema.read().await.as_ref() {
            return Ok(schema.clone());
        }
        self.refresh_schema().await
    }

    /// Responde una pregunta. Nunca devuelve una respuesta sin haber ejecutado su consulta.
    pub async fn ask(&self, question: &str) -> Result<PipelineResult, QuestionFailure> {
        let id = Uuid::new_v4();
        let span = info_span!("pregunta", %id, question = %question);
        async move {
            let started_at = Utc::now();
            let mut run = Run::new(id, question);
            match self.drive(&mut run).await {
                Ok((final_query, result_set, answer)) => {
                    let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
                    info!("Respuesta ({} ms): {}", elapsed_ms, answer);
                    Ok(PipelineResult {
                        id,
                        question: run.question,
                        final_query,
                        result_set,
                        answer,
                        attempts: run.attempts,
                        stages: run.stages,
                        started_at,
                        elapsed_ms,
                    })
                }
                Err(error) => Err(run.fail(error)),
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run: &mut Run) -> QaResult<(String, ResultSet, String)> {
        run.enter(Stage::Describing);
        let schema = self.current_schema().await?;

        run.enter(Stage::Synthesizing);
        let mut candidate = self.synthesizer.synthesize(&run.question, &schema).await?;
        run.record(&candidate);

        let mut validated = 0;
        loop {
            run.enter(Stage::Validating);
            validated += 1;
            let reasons = match validator::validate(&candidate.query, &schema, &self.rules) {
                ValidationOutcome::Valid => break,
                ValidationOutcome::Invalid { reasons } => reasons,
            };
            warn!(
                "Consulta inválida (intento {}/{}): {}",
                validated,
                self.settings.max_attempts,
                reasons.join("; ")
            );
            if validated >= self.settings.max_attempts {
                return Err(QaError::ValidationExhausted {
                    attempts: validated,
                    last_query: candidate.query,
                    reasons,
                });
            }

            run.enter(Stage::Repairing);
            candidate = self
                .repairer
                .repair(&candidate.query, &reasons, &schema, validated)
                .await?;
            run.record(&candidate);
        }

        run.enter(Stage::Executing);
        let result_set = self.executor.execute(&candidate.query).await?;
        info!("Contexto ({} registros): {}", result_set.len(), render_context(&result_set));

        run.enter(Stage::Answering);
        let answer = self.answerer.synthesize(&run.question, &result_set).await?;
        run.enter(Stage::Done);

        Ok((candidate.query, result_set, answer))
    }

    /// Procesa un lote en orden. Si `shutdown` se completa, se detiene y devuelve
    /// las preguntas ya terminadas.
    pub async fn ask_batch<F>(&self, questions: &[String], shutdown: F) -> Vec<QuestionOutcome>
    where
        F: Future<Output = ()>,
    {
        let concurrency = self.settings.concurrency.max(1);
        let pending = stream::iter(questions)
            .map(|question| self.ask(question))
            .buffered(concurrency);
        let mut outcomes = Vec::with_capacity(questions.len());

        tokio::pin!(pending);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(
                        "Lote interrumpido: {} de {} preguntas procesadas.",
                        outcomes.len(),
                        questions.len()
                    );
                    break;
                }
                next = pending.next() => match next {
                    Some(result) => outcomes.push(QuestionOutcome(result)),
                    None => break,
                },
            }
        }

        let answered = outcomes.iter().filter(|o| o.is_answered()).count();
        info!("Lote completado: {}/{} preguntas respondidas.", answered, outcomes.len());
        outcomes
    }
}
