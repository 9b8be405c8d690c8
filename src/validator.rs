//! Validación estática de las consultas generadas contra el esquema y reparación
//! guiada por el LLM.
//!
//! La validación no ejecuta nada: comprueba que las etiquetas, tipos de relación y
//! propiedades referenciados existan en el esquema (y, salvo que se permitan, que no
//! haya cláusulas de escritura). Si algo falla, [`QueryRepairer`] vuelve a pedir la
//! consulta al LLM con la lista concreta de defectos.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::cypher;
use crate::error::QaResult;
use crate::llm::CompletionService;
use crate::models::{GeneratedQuery, QueryOrigin, ValidationOutcome};
use crate::schema::SchemaDescription;
use crate::synthesizer::fill_template;

/// Reglas adicionales a las del esquema.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationRules {
    pub allow_writes: bool,
}

/// Procedimientos que sólo leen metadatos del grafo.
const READ_ONLY_PROCEDURES: &[&str] = &["db.labels", "db.relationshipTypes", "db.propertyKeys"];
const READ_ONLY_PROCEDURE_PREFIXES: &[&str] = &["db.schema."];

fn is_read_only_procedure(name: &str) -> bool {
    READ_ONLY_PROCEDURES.contains(&name)
        || READ_ONLY_PROCEDURE_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Etiquetas y tipos de relación a los que está ligada una variable.
#[derive(Default)]
struct Owners {
    labels: BTreeSet<String>,
    rel_types: BTreeSet<String>,
}

impl Owners {
    fn of_labels(labels: &[String]) -> Self {
        Self {
            labels: labels.iter().cloned().collect(),
            ..Self::default()
        }
    }

    fn of_rel_types(rel_types: &[String]) -> Self {
        Self {
            rel_types: rel_types.iter().cloned().collect(),
            ..Self::default()
        }
    }

    fn names(&self) -> String {
        self.labels
            .iter()
            .chain(&self.rel_types)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Propiedades conocidas de todos los dueños; `None` si ninguno las registra.
    fn known_properties<'a>(&self, schema: &'a SchemaDescription) -> Option<BTreeSet<&'a str>> {
        let registered: Vec<&BTreeSet<String>> = self
            .labels
            .iter()
            .filter_map(|label| schema.node_properties_of(label))
            .chain(self.rel_types.iter().filter_map(|t| schema.rel_properties_of(t)))
            .collect();
        if registered.is_empty() {
            return None;
        }
        Some(registered.into_iter().flatten().map(String::as_str).collect())
    }
}

#[derive(Default)]
struct Bindings(HashMap<String, Owners>);

impl Bindings {
    fn bind(&mut self, variable: Option<&str>, owners: &Owners) {
        if let Some(variable) = variable {
            let entry = self.0.entry(variable.to_string()).or_default();
            entry.labels.extend(owners.labels.iter().cloned());
            entry.rel_types.extend(owners.rel_types.iter().cloned());
        }
    }
}

#[derive(Default)]
struct Reasons(Vec<String>);

impl Reasons {
    fn push(&mut self, reason: String) {
        if !self.0.contains(&reason) {
            self.0.push(reason);
        }
    }
}

fn check_keys(schema: &SchemaDescription, owners: &Owners, keys: &[String], reasons: &mut Reasons) {
    if let Some(known) = owners.known_properties(schema) {
        for key in keys {
            if !known.contains(key.as_str()) {
                reasons.push(format!(
                    "La propiedad `{}` no existe para `{}` en el esquema",
                    key,
                    owners.names()
                ));
            }
        }
    }
}

/// Etiquetas que existen en el esquema; las demás se anotan como defectos.
fn known_labels(schema: &SchemaDescription, labels: &[String], reasons: &mut Reasons) -> Vec<String> {
    labels
        .iter()
        .filter(|label| {
            let exists = schema.has_label(label);
            if !exists {
                reasons.push(format!("La etiqueta `{label}` no existe en el esquema"));
            }
            exists
        })
        .cloned()
        .collect()
}

/// Valida la consulta contra el esquema. Pura: no toca el almacén.
pub fn validate(query: &str, schema: &SchemaDescription, rules: &ValidationRules) -> ValidationOutcome {
    let mut reasons = Reasons::default();

    if query.trim().is_empty() {
        return ValidationOutcome::Invalid {
            reasons: vec!["La consulta está vacía".to_string()],
        };
    }

    let masked = cypher::mask_literals(query);
    let mut bindings = Bindings::default();

    for node in cypher::node_patterns(&masked) {
        let owners = Owners::of_labels(&known_labels(schema, &node.labels, &mut reasons));
        check_keys(schema, &owners, &node.map_keys, &mut reasons);
        bindings.bind(node.variable.as_deref(), &owners);
    }

    for rel in cypher::relationship_patterns(&masked) {
        let known: Vec<String> = rel
            .types
            .iter()
            .filter(|rel_type| {
                let exists = schema.has_relationship_type(rel_type);
                if !exists {
                    reasons.push(format!(
                        "El tipo de relación `{rel_type}` no existe en el esquema"
                    ));
                }
                exists
            })
            .cloned()
            .collect();
        let owners = Owners::of_rel_types(&known);
        check_keys(schema, &owners, &rel.map_keys, &mut reasons);
        bindings.bind(rel.variable.as_deref(), &owners);
    }

    for predicate in cypher::label_predicates(&masked) {
        let owners = Owners::of_labels(&known_labels(schema, &predicate.labels, &mut reasons));
        bindings.bind(Some(predicate.variable.as_str()), &owners);
    }

    for access in cypher::property_accesses(&masked) {
        if let Some(owners) = bindings.0.get(&access.variable) {
            check_keys(schema, owners, &[access.property], &mut reasons);
        }
    }

    if !rules.allow_writes {
        let writes = cypher::write_clauses(&masked);
        if !writes.is_empty() {
            reasons.push(format!(
                "La consulta debe ser de sólo lectura; contiene {}",
                writes.join(", ")
            ));
        }
        for procedure in cypher::procedure_calls(&masked) {
            if !is_read_only_procedure(&procedure) {
                reasons.push(format!(
                    "El procedimiento `{procedure}` no está permitido en modo de sólo lectura"
                ));
            }
        }
    }

    if cypher::return_columns(query).is_none() {
        if cypher::returns_star(&masked) {
            reasons.push("Usa columnas con alias explícitos en lugar de `RETURN *`".to_string());
        } else if !rules.allow_writes {
            reasons.push("La consulta no tiene cláusula RETURN".to_string());
        }
    }

    if reasons.0.is_empty() {
        ValidationOutcome::Valid
    } else {
        ValidationOutcome::Invalid { reasons: reasons.0 }
    }
}

pub const CYPHER_REPAIR_TEMPLATE: &str = r#"Eres un experto en Neo4j y Cypher. La siguiente consulta Cypher no es coherente con el esquema del grafo.
Corrígela usando únicamente las etiquetas, tipos de relación y propiedades del esquema.
NO RESPONDAS A LA PREGUNTA ni expliques los cambios: devuelve sólo la consulta corregida, sin bloques de código markdown.

Esquema del grafo:
{schema}

Consulta original:
{query}

Problemas detectados:
{reasons}

Consulta Cypher corregida:"#;

/// Reparación de consultas inválidas a través del LLM.
pub struct QueryRepairer {
    llm: Arc<dyn CompletionService>,
}

impl QueryRepairer {
    pub fn new(llm: Arc<dyn CompletionService>) -> Self {
        Self { llm }
    }

    pub fn prompt(query: &str, reasons: &[String], schema: &SchemaDescription) -> String {
        let bullet_list = reasons
            .iter()
            .map(|r| format!("- {r}"))
            .collect::<Vec<_>>()
            .join("\n");
        fill_template(
            CYPHER_REPAIR_TEMPLATE,
            &[
                ("schema", schema.render().trim_end()),
                ("query", query),
                ("reasons", &bullet_list),
            ],
        )
    }

    /// Pide una versión corregida de `query`. `attempt` numera la reparación (1, 2, ...).
    pub async fn repair(
        &self,
        query: &str,
        reasons: &[String],
        schema: &SchemaDescription,
        attempt: usize,
    ) -> QaResult<GeneratedQuery> {
        let prompt = Self::prompt(query, reasons, schema);
        let raw_completion = self.llm.complete(&prompt).await?;
        let repaired = cypher::extract_query(&raw_completion);
        debug!("Reparación {attempt}: {repaired}");

        Ok(GeneratedQuery {
            query: repaired,
            prompt,
            raw_completion,
            origin: QueryOrigin::Repaired { attempt },
        })
    }
}
