//! Datos de demostración: personas, la empresa BigCo, libros y el tema Databases,
//! con sus relaciones. La carga usa `MERGE`, así que es idempotente.

use anyhow::Result;
use neo4rs::{query, Graph, Query};
use tracing::info;

use crate::schema::SchemaDescription;

pub const PEOPLE: &[&str] = &[
    "Anna", "Barbara", "Carol", "Dawn", "Elizabeth", "Jill", "Martin", "Pramod",
];
pub const COMPANIES: &[&str] = &["BigCo"];
pub const BOOKS: &[&str] = &["Refactoring", "NoSQL Distilled", "Database Refactoring"];
pub const TOPICS: &[&str] = &["Databases"];

/// Etiqueta y propiedad identificadora de cada tipo de nodo.
const NODE_KINDS: &[(&str, &str, &[&str])] = &[
    ("Person", "name", PEOPLE),
    ("Company", "name", COMPANIES),
    ("Book", "title", BOOKS),
    ("Topic", "name", TOPICS),
];

/// Arista de la demo: (etiqueta origen, origen, tipo, etiqueta destino, destino).
pub type DemoEdge = (&'static str, &'static str, &'static str, &'static str, &'static str);

pub const EDGES: &[DemoEdge] = &[
    ("Person", "Anna", "employee", "Company", "BigCo"),
    ("Person", "Barbara", "employee", "Company", "BigCo"),
    ("Person", "Carol", "employee", "Company", "BigCo"),
    ("Person", "Barbara", "friend", "Person", "Anna"),
    ("Person", "Barbara", "friend", "Person", "Carol"),
    ("Person", "Barbara", "friend", "Person", "Elizabeth"),
    ("Person", "Carol", "friend", "Person", "Dawn"),
    ("Person", "Dawn", "friend", "Person", "Jill"),
    ("Person", "Elizabeth", "friend", "Person", "Jill"),
    ("Person", "Pramod", "friend", "Person", "Martin"),
    ("Person", "Anna", "likes", "Book", "Refactoring"),
    ("Person", "Barbara", "likes", "Book", "Refactoring"),
    ("Person", "Barbara", "likes", "Book", "NoSQL Distilled"),
    ("Person", "Carol", "likes", "Book", "NoSQL Distilled"),
    ("Person", "Dawn", "likes", "Book", "NoSQL Distilled"),
    ("Person", "Elizabeth", "likes", "Book", "NoSQL Distilled"),
    ("Book", "Refactoring", "author", "Person", "Martin"),
    ("Book", "NoSQL Distilled", "author", "Person", "Martin"),
    ("Book", "Database Refactoring", "author", "Person", "Pramod"),
    ("Book", "NoSQL Distilled", "author", "Person", "Pramod"),
    ("Book", "NoSQL Distilled", "category", "Topic", "Databases"),
    ("Book", "Database Refactoring", "category", "Topic", "Databases"),
];

fn key_of(label: &str) -> &'static str {
    NODE_KINDS
        .iter()
        .find(|(l, _, _)| *l == label)
        .map(|(_, key, _)| *key)
        .unwrap_or("name")
}

/// Sentencias `MERGE` para nodos y relaciones, en orden de ejecución.
pub fn seed_statements() -> Vec<Query> {
    let mut statements = Vec::new();

    for (label, key, values) in NODE_KINDS {
        let cypher = format!("UNWIND $values AS value MERGE (:{label} {{{key}: value}})");
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        statements.push(query(&cypher).param("values", values));
    }

    for (from_label, from, rel_type, to_label, to) in EDGES {
        let cypher = format!(
            "MATCH (a:{from_label} {{{from_key}: $from}}), (b:{to_label} {{{to_key}: $to}})
             MERGE (a)-[:{rel_type}]->(b)",
            from_key = key_of(from_label),
            to_key = key_of(to_label),
        );
        statements.push(query(&cypher).param("from", *from).param("to", *to));
    }

    statements
}

/// Carga los datos de demostración en una única transacción.
pub async fn seed_demo_graph(graph: &Graph) -> Result<()> {
    let statements = seed_statements();
    let total = statements.len();

    let tx = graph.start_txn().await?;
    for statement in statements {
        tx.run(statement).await?;
    }
    tx.commit().await?;

    info!(
        "Datos de demostración cargados/verificados ({} nodos, {} relaciones, {} sentencias).",
        NODE_KINDS.iter().map(|(_, _, v)| v.len()).sum::<usize>(),
        EDGES.len(),
        total
    );
    Ok(())
}

/// Esquema que resulta de cargar los datos de demostración.
pub fn demo_schema() -> SchemaDescription {
    let mut schema = SchemaDescription::default();
    for (label, key, _) in NODE_KINDS {
        schema = schema.with_label(label, &[*key]);
    }
    for (from_label, _, rel_type, to_label, _) in EDGES {
        schema = schema
            .with_relationship(rel_type, &[])
            .with_pattern(from_label, rel_type, to_label);
    }
    schema
}
