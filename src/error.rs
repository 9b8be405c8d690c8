//! Taxonomía de errores del pipeline de preguntas sobre el grafo.

use serde::Serialize;
use thiserror::Error;

/// Errores que puede producir una pregunta (o la obtención del esquema).
#[derive(Error, Debug, Clone)]
pub enum QaError {
    /// El almacén de grafos no responde o no se pudo leer su esquema.
    #[error("Almacén de grafos no disponible: {0}")]
    StoreUnavailable(String),

    /// El servicio de completado (LLM) falló, limitó la tasa o agotó el tiempo.
    #[error("Servicio de completado no disponible: {0}")]
    Service(String),

    /// No se consiguió una consulta coherente con el esquema dentro del límite de intentos.
    #[error("Consulta inválida tras {attempts} intentos: {}", reasons.join("; "))]
    ValidationExhausted {
        attempts: usize,
        last_query: String,
        reasons: Vec<String>,
    },

    /// El almacén rechazó la consulta o falló al ejecutarla.
    #[error("Error ejecutando la consulta: {message}")]
    Execution { query: String, message: String },
}

impl QaError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::StoreUnavailable(_) => FailureKind::StoreUnavailable,
            Self::Service(_) => FailureKind::ServiceUnavailable,
            Self::ValidationExhausted { .. } => FailureKind::ValidationExhausted,
            Self::Execution { .. } => FailureKind::ExecutionError,
        }
    }

    /// Consulta implicada en el error, si la hay.
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::ValidationExhausted { last_query, .. } => Some(last_query),
            Self::Execution { query, .. } => Some(query),
            _ => None,
        }
    }
}

/// Clase de fallo terminal de una pregunta (estado `Failed(kind)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    StoreUnavailable,
    ServiceUnavailable,
    ValidationExhausted,
    ExecutionError,
}

pub type QaResult<T> = Result<T, QaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(QaError::Service("429".into()).kind(), FailureKind::ServiceUnavailable);
        assert_eq!(
            QaError::StoreUnavailable("down".into()).kind(),
            FailureKind::StoreUnavailable
        );

        let exhausted = QaError::ValidationExhausted {
            attempts: 3,
            last_query: "MATCH (x:Ghost) RETURN x".into(),
            reasons: vec!["a".into(), "b".into()],
        };
        assert_eq!(exhausted.kind(), FailureKind::ValidationExhausted);
        assert_eq!(exhausted.query(), Some("MATCH (x:Ghost) RETURN x"));
        assert!(exhausted.to_string().contains("3 intentos"));
        assert!(exhausted.to_string().contains("a; b"));
    }

    #[test]
    fn service_errors_carry_no_query() {
        assert!(QaError::Service("timeout".into()).query().is_none());
    }
}
