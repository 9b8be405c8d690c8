//! Descripción estructural del grafo (etiquetas, tipos de relación y propiedades)
//! y su representación textual para incluirla en los prompts.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

use crate::error::QaResult;
use crate::neo4j_client::GraphStore;

/// Patrón de relación observado en los datos: `(:From)-[:TYPE]->(:To)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RelationshipTriple {
    pub from: String,
    pub rel_type: String,
    pub to: String,
}

/// Instantánea inmutable del esquema del grafo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDescription {
    pub labels: BTreeSet<String>,
    pub relationship_types: BTreeSet<String>,
    /// Etiqueta → claves de propiedad conocidas.
    pub node_properties: BTreeMap<String, BTreeSet<String>>,
    /// Tipo de relación → claves de propiedad conocidas.
    pub rel_properties: BTreeMap<String, BTreeSet<String>>,
    pub patterns: Vec<RelationshipTriple>,
}

impl SchemaDescription {
    pub fn with_label(mut self, label: &str, properties: &[&str]) -> Self {
        self.labels.insert(label.to_string());
        add_properties(&mut self.node_properties, label, properties);
        self
    }

    pub fn with_relationship(mut self, rel_type: &str, properties: &[&str]) -> Self {
        self.relationship_types.insert(rel_type.to_string());
        add_properties(&mut self.rel_properties, rel_type, properties);
        self
    }

    pub fn with_pattern(mut self, from: &str, rel_type: &str, to: &str) -> Self {
        let triple = RelationshipTriple {
            from: from.to_string(),
            rel_type: rel_type.to_string(),
            to: to.to_string(),
        };
        if !self.patterns.contains(&triple) {
            self.patterns.push(triple);
            self.patterns.sort();
        }
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn has_relationship_type(&self, rel_type: &str) -> bool {
        self.relationship_types.contains(rel_type)
    }

    /// Propiedades conocidas de una etiqueta; `None` si no se registró ninguna.
    pub fn node_properties_of(&self, label: &str) -> Option<&BTreeSet<String>> {
        self.node_properties.get(label).filter(|props| !props.is_empty())
    }

    pub fn rel_properties_of(&self, rel_type: &str) -> Option<&BTreeSet<String>> {
        self.rel_properties.get(rel_type).filter(|props| !props.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.relationship_types.is_empty()
    }

    /// Texto compacto del esquema para los prompts.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn add_properties(map: &mut BTreeMap<String, BTreeSet<String>>, owner: &str, properties: &[&str]) {
    map.entry(owner.to_string())
        .or_default()
        .extend(properties.iter().map(|p| p.to_string()));
}

fn write_owner(f: &mut fmt::Formatter<'_>, owner: &str, props: Option<&BTreeSet<String>>) -> fmt::Result {
    match props {
        Some(props) => {
            let keys: Vec<&str> = props.iter().map(String::as_str).collect();
            writeln!(f, "{} {{{}}}", owner, keys.join(", "))
        }
        None => writeln!(f, "{}", owner),
    }
}

impl fmt::Display for SchemaDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Node properties:")?;
        for label in &self.labels {
            write_owner(f, label, self.node_properties_of(label))?;
        }
        writeln!(f, "Relationship properties:")?;
        for rel_type in &self.relationship_types {
            if let Some(props) = self.rel_properties_of(rel_type) {
                write_owner(f, rel_type, Some(props))?;
            }
        }
        writeln!(f, "The relationships:")?;
        for triple in &self.patterns {
            writeln!(f, "(:{})-[:{}]->(:{})", triple.from, triple.rel_type, triple.to)?;
        }
        // Tipos sin patrón observado (p. ej. relaciones aún sin datos).
        for rel_type in &self.relationship_types {
            if !self.patterns.iter().any(|t| &t.rel_type == rel_type) {
                writeln!(f, "[:{}]", rel_type)?;
            }
        }
        Ok(())
    }
}

/// Obtiene el esquema del almacén. Un fallo aquí impide responder cualquier pregunta.
pub async fn describe(store: &dyn GraphStore) -> QaResult<SchemaDescription> {
    let schema = store.schema().await?;
    info!(
        "Esquema obtenido: {} etiquetas, {} tipos de relación, {} patrones.",
        schema.labels.len(),
        schema.relationship_types.len(),
        schema.patterns.len()
    );
    debug!("Esquema del grafo:\n{}", schema);
    Ok(schema)
}

/// Normaliza el tipo de relación que devuelve `db.schema.relTypeProperties()`
/// (p. ej. ":`employee`") a su nombre desnudo.
pub fn normalize_rel_type(raw: &str) -> String {
    raw.trim().trim_start_matches(':').trim_matches('`').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryStore;

    fn sample() -> SchemaDescription {
        SchemaDescription::default()
            .with_label("Person", &["name"])
            .with_label("Company", &["name"])
            .with_label("Topic", &[])
            .with_relationship("employee", &[])
            .with_relationship("rated", &["stars"])
            .with_pattern("Person", "employee", "Company")
    }

    #[test]
    fn renders_nodes_relationships_and_patterns() {
        let text = sample().render();
        assert_eq!(
            text,
            "Node properties:\n\
             Company {name}\n\
             Person {name}\n\
             Topic\n\
             Relationship properties:\n\
             rated {stars}\n\
             The relationships:\n\
             (:Person)-[:employee]->(:Company)\n\
             [:rated]\n"
        );
    }

    #[test]
    fn lookups_distinguish_labels_and_types() {
        let schema = sample();
        assert!(schema.has_label("Person"));
        assert!(!schema.has_label("employee"));
        assert!(schema.has_relationship_type("employee"));
        assert!(schema.node_properties_of("Topic").is_none());
        assert!(schema.node_properties_of("Person").is_some_and(|p| p.contains("name")));
        assert!(schema.rel_properties_of("rated").is_some_and(|p| p.contains("stars")));
        assert!(schema.node_properties_of("rated").is_none());
    }

    #[test]
    fn label_and_type_with_the_same_name_keep_their_own_properties() {
        let schema = SchemaDescription::default()
            .with_label("Review", &["title"])
            .with_relationship("Review", &["stars"]);

        assert_eq!(
            schema.node_properties_of("Review").map(|p| p.iter().cloned().collect::<Vec<_>>()),
            Some(vec!["title".to_string()])
        );
        assert_eq!(
            schema.rel_properties_of("Review").map(|p| p.iter().cloned().collect::<Vec<_>>()),
            Some(vec!["stars".to_string()])
        );
        let text = schema.render();
        assert!(text.contains("Node properties:\nReview {title}\n"));
        assert!(text.contains("Relationship properties:\nReview {stars}\n"));
    }

    #[test]
    fn patterns_are_deduplicated() {
        let schema = sample().with_pattern("Person", "employee", "Company");
        assert_eq!(schema.patterns.len(), 1);
    }

    #[test]
    fn normalizes_rel_type_names() {
        assert_eq!(normalize_rel_type(":`employee`"), "employee");
        assert_eq!(normalize_rel_type("friend"), "friend");
    }

    #[tokio::test]
    async fn describe_returns_store_schema() {
        let store = InMemoryStore::new(sample());
        let schema = describe(&store).await.unwrap();
        assert_eq!(schema, sample());
    }

    #[tokio::test]
    async fn describe_surfaces_store_unavailable() {
        let store = InMemoryStore::new(sample()).unavailable();
        let err = describe(&store).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::StoreUnavailable);
    }
}
