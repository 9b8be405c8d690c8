//! Ejecución de consultas validadas contra el almacén, con tiempo límite y
//! recorte a los `top_k` primeros registros.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{QaError, QaResult};
use crate::models::ResultSet;
use crate::neo4j_client::GraphStore;

pub struct QueryExecutor {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
    top_k: usize,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn GraphStore>, timeout: Duration, top_k: usize) -> Self {
        Self { store, timeout, top_k }
    }

    /// Ejecuta la consulta. Un resultado vacío no es un error.
    ///
    /// Al almacén se le pide un registro más que `top_k`, sólo para saber si hubo recorte.
    pub async fn execute(&self, query: &str) -> QaResult<ResultSet> {
        let limit = self.top_k.saturating_add(1);
        let mut records = tokio::time::timeout(self.timeout, self.store.query(query, limit))
            .await
            .map_err(|_| QaError::Execution {
                query: query.to_string(),
                message: format!("tiempo límite de {} s agotado", self.timeout.as_secs_f32()),
            })??;

        if records.len() > self.top_k {
            warn!(
                "La consulta devolvió más de {} registros; se conservan los {} primeros",
                self.top_k, self.top_k
            );
            records.truncate(self.top_k);
        }
        debug!("Ejecución completada con {} registros", records.len());
        Ok(records)
    }
}
