//! Acceso a Neo4j: conexión, introspección del esquema y ejecución de consultas
//! devolviendo registros como valores JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph, Node, Path, Relation, Row, UnboundedRelation};
use serde_json::{Map, Number, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::config::AppConfig;
use crate::cypher;
use crate::error::{QaError, QaResult};
use crate::models::{Record, ResultSet};
use crate::schema::{normalize_rel_type, SchemaDescription};

/// Almacén de grafos consultable por el pipeline.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Describe etiquetas, tipos de relación y propiedades. Falla con `StoreUnavailable`.
    async fn schema(&self) -> QaResult<SchemaDescription>;

    /// Ejecuta una consulta y devuelve como mucho `limit` registros. Falla con `Execution`.
    async fn query(&self, text: &str, limit: usize) -> QaResult<ResultSet>;
}

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password)
        .await
        .with_context(|| format!("No se pudo conectar a Neo4j en {addr}"))?;
    graph
        .run(query("RETURN 1"))
        .await
        .context("Neo4j no respondió a la comprobación de salud")?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Implementación de [`GraphStore`] sobre el pool de conexiones de `neo4rs`.
///
/// Guarda el último esquema leído: `neo4rs` no enumera las claves de un nodo, así
/// que las propiedades que se devuelven son las que el esquema registra para sus
/// etiquetas.
pub struct Neo4jStore {
    graph: Arc<Graph>,
    cache: RwLock<Option<Arc<SchemaDescription>>>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            graph,
            cache: RwLock::new(None),
        }
    }

    async fn fetch<T, F>(&self, cypher: &str, read: F) -> Result<Vec<T>, neo4rs::Error>
    where
        F: Fn(&Row) -> Option<T>,
    {
        let mut cursor = self.graph.execute(query(cypher)).await?;
        let mut items = Vec::new();
        while let Some(row) = cursor.next().await? {
            if let Some(item) = read(&row) {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn introspect(&self) -> Result<SchemaDescription, neo4rs::Error> {
        let mut schema = SchemaDescription::default();

        schema.labels.extend(
            self.fetch("CALL db.labels() YIELD label RETURN label", |row| {
                row.get::<String>("label")
            })
            .await?,
        );

        schema.relationship_types.extend(
            self.fetch(
                "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType",
                |row| row.get::<String>("relationshipType"),
            )
            .await?,
        );

        let node_props = self
            .fetch(
                "CALL db.schema.nodeTypeProperties() YIELD nodeLabels, propertyName
                 RETURN nodeLabels, propertyName",
                |row| {
                    let labels = row.get::<Vec<String>>("nodeLabels")?;
                    Some((labels, row.get::<String>("propertyName")))
                },
            )
            .await?;
        for (labels, property) in node_props {
            for label in labels {
                let entry = schema.node_properties.entry(label).or_default();
                entry.extend(property.clone());
            }
        }

        let rel_props = self
            .fetch(
                "CALL db.schema.relTypeProperties() YIELD relType, propertyName
                 RETURN relType, propertyName",
                |row| {
                    let rel_type = row.get::<String>("relType")?;
                    Some((normalize_rel_type(&rel_type), row.get::<String>("propertyName")))
                },
            )
            .await?;
        for (rel_type, property) in rel_props {
            schema.rel_properties.entry(rel_type).or_default().extend(property);
        }

        let patterns = self
            .fetch(
                "MATCH (a)-[r]->(b)
                 UNWIND labels(a) AS from_label
                 UNWIND labels(b) AS to_label
                 RETURN DISTINCT from_label, type(r) AS rel_type, to_label",
                |row| {
                    Some((
                        row.get::<String>("from_label")?,
                        row.get::<String>("rel_type")?,
                        row.get::<String>("to_label")?,
                    ))
                },
            )
            .await?;
        for (from, rel_type, to) in patterns {
            schema = schema.with_pattern(&from, &rel_type, &to);
        }

        Ok(schema)
    }

    /// Esquema en caché; si aún no se ha leído, lo lee ahora.
    async fn cached_schema(&self) -> QaResult<Arc<SchemaDescription>> {
        if let Some(schema) = self.cache.read().await.as_ref() {
            return Ok(schema.clone());
        }
        Ok(Arc::new(self.schema().await?))
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn schema(&self) -> QaResult<SchemaDescription> {
        let schema = self
            .introspect()
            .await
            .map_err(|e| QaError::StoreUnavailable(e.to_string()))?;
        *self.cache.write().await = Some(Arc::new(schema.clone()));
        Ok(schema)
    }

    async fn query(&self, text: &str, limit: usize) -> QaResult<ResultSet> {
        let execution_error = |e: neo4rs::Error| QaError::Execution {
            query: text.to_string(),
            message: e.to_string(),
        };

        let schema = self.cached_schema().await?;
        // Los nombres de columna salen del RETURN; sin él (escrituras) no hay registros.
        let columns = cypher::return_columns(text).unwrap_or_default();
        let mut cursor = self.graph.execute(query(text)).await.map_err(execution_error)?;

        // El pool reinicia la conexión al devolverla, así que se puede dejar el cursor a medias.
        let mut records = Vec::new();
        while records.len() < limit {
            let Some(row) = cursor.next().await.map_err(execution_error)? else {
                break;
            };
            let mut record = Record::new();
            for column in &columns {
                record.insert(column.clone(), column_value(&row, column, &schema));
            }
            records.push(record);
        }
        debug!("Consulta devolvió {} registros (límite {})", records.len(), limit);
        Ok(records)
    }
}

/// Prueba, en orden, los tipos simples que `neo4rs` sabe convertir: texto, enteros,
/// reales, booleanos, listas homogéneas de ellos y fechas.
macro_rules! plain_value {
    ($source:expr, $key:expr) => {{
        let source = $source;
        let key: &str = $key;
        if let Some(s) = source.get::<String>(key) {
            Some(Value::String(s))
        } else if let Some(i) = source.get::<i64>(key) {
            Some(Value::from(i))
        } else if let Some(f) = source.get::<f64>(key) {
            Some(float_to_json(f))
        } else if let Some(b) = source.get::<bool>(key) {
            Some(Value::Bool(b))
        } else if let Some(items) = source.get::<Vec<String>>(key) {
            Some(Value::from(items))
        } else if let Some(items) = source.get::<Vec<i64>>(key) {
            Some(Value::from(items))
        } else if let Some(items) = source.get::<Vec<f64>>(key) {
            Some(Value::Array(items.into_iter().map(float_to_json).collect()))
        } else if let Some(items) = source.get::<Vec<bool>>(key) {
            Some(Value::from(items))
        } else if let Some(date) = source.get::<chrono::NaiveDate>(key) {
            Some(Value::String(date.to_string()))
        } else if let Some(at) = source.get::<chrono::DateTime<chrono::FixedOffset>>(key) {
            Some(Value::String(at.to_rfc3339()))
        } else if let Some(at) = source.get::<chrono::NaiveDateTime>(key) {
            Some(Value::String(at.to_string()))
        } else {
            None
        }
    }};
}

/// Mapa con las propiedades presentes de `$source`, entre las que el esquema
/// registra para sus dueños.
macro_rules! properties_of {
    ($source:expr, $known:expr, $owners:expr) => {{
        let source = $source;
        let mut props = Map::new();
        for key in property_keys($known, $owners) {
            if let Some(value) = plain_value!(source, key) {
                props.insert(key.to_string(), value);
            }
        }
        props
    }};
}

/// Valor de una columna en JSON: nodos como mapas de propiedades, relaciones como
/// `{type, properties}` y rutas como `{nodes, relationships}`. Ausente, `null` o sin
/// conversión (mapas, listas mixtas) dan `null`.
fn column_value(row: &Row, column: &str, schema: &SchemaDescription) -> Value {
    if let Some(value) = plain_value!(row, column) {
        return value;
    }
    if let Some(node) = row.get::<Node>(column) {
        return node_to_json(&node, schema);
    }
    if let Some(rel) = row.get::<Relation>(column) {
        return relation_to_json(&rel.typ(), properties_of!(&rel, &schema.rel_properties, &[rel.typ()]));
    }
    if let Some(path) = row.get::<Path>(column) {
        return path_to_json(&path, schema);
    }
    if let Some(nodes) = row.get::<Vec<Node>>(column) {
        return Value::Array(nodes.iter().map(|n| node_to_json(n, schema)).collect());
    }
    if let Some(rels) = row.get::<Vec<Relation>>(column) {
        return Value::Array(
            rels.iter()
                .map(|r| relation_to_json(&r.typ(), properties_of!(r, &schema.rel_properties, &[r.typ()])))
                .collect(),
        );
    }
    Value::Null
}

fn node_to_json(node: &Node, schema: &SchemaDescription) -> Value {
    Value::Object(properties_of!(node, &schema.node_properties, &node.labels()))
}

fn relation_to_json(rel_type: &str, properties: Map<String, Value>) -> Value {
    let mut out = Map::new();
    out.insert("type".to_string(), Value::String(rel_type.to_string()));
    out.insert("properties".to_string(), Value::Object(properties));
    Value::Object(out)
}

fn unbounded_to_json(rel: &UnboundedRelation, schema: &SchemaDescription) -> Value {
    relation_to_json(&rel.typ(), properties_of!(rel, &schema.rel_properties, &[rel.typ()]))
}

fn path_to_json(path: &Path, schema: &SchemaDescription) -> Value {
    let mut out = Map::new();
    out.insert(
        "nodes".to_string(),
        Value::Array(path.nodes().iter().map(|n| node_to_json(n, schema)).collect()),
    );
    out.insert(
        "relationships".to_string(),
        Value::Array(path.rels().iter().map(|r| unbounded_to_json(r, schema)).collect()),
    );
    Value::Object(out)
}

/// Claves de propiedad registradas para cualquiera de los dueños, sin repetir.
fn property_keys<'a>(known: &'a BTreeMap<String, BTreeSet<String>>, owners: &[String]) -> BTreeSet<&'a str> {
    owners
        .iter()
        .filter_map(|owner| known.get(owner))
        .flatten()
        .map(String::as_str)
        .collect()
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed;

    #[test]
    fn property_keys_follow_the_node_labels() {
        let schema = seed::demo_schema()
            .with_label("Author", &["name", "born"])
            .with_relationship("rated", &["stars"]);

        let keys = property_keys(&schema.node_properties, &["Book".to_string()]);
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["title"]);

        let keys = property_keys(
            &schema.node_properties,
            &["Person".to_string(), "Author".to_string()],
        );
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["born", "name"]);

        let keys = property_keys(&schema.rel_properties, &["rated".to_string()]);
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["stars"]);
    }

    #[test]
    fn unknown_owners_have_no_property_keys() {
        let schema = seed::demo_schema();
        assert!(property_keys(&schema.node_properties, &["Ghost".to_string()]).is_empty());
        assert!(property_keys(&schema.rel_properties, &[]).is_empty());
    }

    #[test]
    fn relations_render_as_type_and_properties() {
        let mut props = Map::new();
        props.insert("stars".to_string(), Value::from(5));
        assert_eq!(
            relation_to_json("rated", props),
            serde_json::json!({"type": "rated", "properties": {"stars": 5}})
        );
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert_eq!(float_to_json(f64::NAN), Value::Null);
        assert_eq!(float_to_json(1.5), serde_json::json!(1.5));
    }
}
