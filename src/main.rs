// Módulos de la aplicación
mod answer;
mod config;
mod cypher;
mod error;
mod executor;
mod llm;
mod models;
mod neo4j_client;
mod pipeline;
mod schema;
mod seed;
mod synthesizer;
mod validator;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::llm::LlmManager;
use crate::neo4j_client::Neo4jStore;
use crate::pipeline::{Pipeline, PipelineSettings};

/// Preguntas de la demo, usadas cuando no se pasan argumentos.
const DEMO_QUESTIONS: &[&str] = &[
    "¿Quiénes son los empleados de BigCo?",
    "¿Qué libros les gustan a los empleados de BigCo?",
    "¿Quiénes son los autores de los libros que les gustan a los empleados de BigCo?",
    "¿A quién le gustan los libros sobre Databases?",
    "¿Quiénes son los amigos de Barbara?",
    "¿Existe un libro llamado 'Innovate Ltd'?",
];

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Conectar a Neo4j y cargar los datos de demostración
    let graph = Arc::new(neo4j_client::connect_from_config(&cfg).await?);
    if cfg.seed_demo_data {
        seed::seed_demo_graph(&graph)
            .await
            .context("Error cargando los datos de demostración")?;
    }

    // 4. Inicializar gestor de LLMs y pipeline
    let llm = LlmManager::from_config(&cfg).context("Error al inicializar el LLM")?;
    info!("LLM: {:?} / {}", llm.provider, llm.chat_model);
    let pipeline = Pipeline::new(
        Arc::new(Neo4jStore::new(graph)),
        Arc::new(llm),
        PipelineSettings::from_config(&cfg),
    );

    let schema = pipeline
        .refresh_schema()
        .await
        .context("No se pudo obtener el esquema del grafo")?;
    info!("Esquema del grafo:\n{}", schema);
    if cfg.seed_demo_data && !seed::demo_schema().labels.is_subset(&schema.labels) {
        warn!("El esquema leído no contiene todas las etiquetas de los datos de demostración.");
    }

    // 5. Preguntas: argumentos de línea de comandos o las de la demo
    let args: Vec<String> = std::env::args().skip(1).collect();
    let questions: Vec<String> = if args.is_empty() {
        DEMO_QUESTIONS.iter().map(|q| q.to_string()).collect()
    } else {
        args
    };

    // 6. Procesar el lote; Ctrl-C lo detiene entre preguntas
    let outcomes = pipeline
        .ask_batch(&questions, async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("No se pudo escuchar Ctrl-C; el lote no podrá interrumpirse.");
                std::future::pending::<()>().await;
            }
            info!("Señal de apagado recibida, deteniendo el lote.");
        })
        .await;

    for outcome in &outcomes {
        match &outcome.0 {
            Ok(result) => match serde_json::to_string_pretty(result) {
                Ok(json) => debug!("Resultado completo:\n{json}"),
                Err(e) => warn!("No se pudo serializar el resultado: {e}"),
            },
            Err(failure) => debug!(
                "Pregunta {} sin respuesta ({:?}), etapas: {:?}",
                failure.id,
                failure.kind(),
                failure.stages
            ),
        }
        println!("\n> {}\n{}", outcome.question(), outcome.display_answer());
    }

    let answered = outcomes.iter().filter(|o| o.is_answered()).count();
    info!("✅ {}/{} preguntas respondidas.", answered, questions.len());
    Ok(())
}
