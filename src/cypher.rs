//! Análisis léxico ligero de Cypher: limpieza de la salida del LLM, enmascarado de
//! literales y extracción de patrones (etiquetas, tipos de relación, propiedades y
//! columnas del `RETURN`).
//!
//! No es un parser completo: trabaja sobre una copia de la consulta con los literales
//! de texto y los comentarios sustituidos por espacios, de modo que los desplazamientos
//! siguen siendo válidos sobre el texto original.

use regex::Regex;
use std::sync::LazyLock;

const IDENT: &str = r"(?:`[^`]+`|[A-Za-z_][A-Za-z0-9_]*)";

static NODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\(\s*([A-Za-z_][A-Za-z0-9_]*)?\s*(:\s*{IDENT}(?:\s*[:|&]\s*{IDENT})*)\s*(\{{[^{{}}]*\}})?"
    ))
    .expect("regex de nodo válida")
});

static REL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\[\s*([A-Za-z_][A-Za-z0-9_]*)?\s*(:\s*{IDENT}(?:\s*\|\s*:?\s*{IDENT})*)\s*(?:\*[0-9.\s]*)?\s*(\{{[^{{}}]*\}})?"
    ))
    .expect("regex de relación válida")
});

static MAP_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"({IDENT})\s*:")).expect("regex de clave válida"));

static PROPERTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b([A-Za-z_][A-Za-z0-9_]*)\.({IDENT})")).expect("regex de propiedad válida")
});

static WRITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP)\b").expect("regex de escritura válida")
});

static LABEL_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:cypher\s+query|query\s+cypher|consulta\s+cypher|cypher)\s*:\s*")
        .expect("regex de prefijo válida")
});

static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(RETURN|ORDER\s+BY|SKIP|LIMIT|UNION)\b").expect("regex de cláusula válida")
});

static STAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bRETURN\s+(?:DISTINCT\s+)?\*").expect("regex de RETURN * válida")
});

static LABEL_PREDICATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b([A-Za-z_][A-Za-z0-9_]*)\s*(:\s*{IDENT}(?:\s*[:|&]\s*{IDENT})*)"
    ))
    .expect("regex de predicado de etiqueta válida")
});

static SUBQUERY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:CALL|EXISTS|COUNT|COLLECT)\s*$").expect("regex de subconsulta válida")
});

static PROCEDURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bCALL\s+([A-Za-z_][A-Za-z0-9_]*(?:\s*\.\s*[A-Za-z_][A-Za-z0-9_]*)*)")
        .expect("regex de procedimiento válida")
});

static AS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bAS\b").expect("regex de alias válida"));

/// Patrón de nodo con etiquetas, p. ej. `(a:Person {name: 'Anna'})`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub map_keys: Vec<String>,
}

/// Patrón de relación tipada, p. ej. `[r:employee|friend*1..2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipPattern {
    pub variable: Option<String>,
    pub types: Vec<String>,
    pub map_keys: Vec<String>,
}

/// Predicado de etiqueta fuera de un patrón, p. ej. `WHERE n:Person`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPredicate {
    pub variable: String,
    pub labels: Vec<String>,
}

/// Acceso `variable.propiedad`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAccess {
    pub variable: String,
    pub property: String,
}

/// Limpia la salida cruda del LLM: bloques de código, etiquetas tipo
/// "Cypher query:", comillas invertidas envolventes y `;` final.
pub fn extract_query(raw: &str) -> String {
    let trimmed = raw.trim();

    let body = match trimmed.find("```") {
        Some(start) => {
            let after_fence = &trimmed[start + 3..];
            let code = match after_fence.find("```") {
                Some(end) => &after_fence[..end],
                None => after_fence,
            };
            strip_language_tag(code)
        }
        None => trimmed,
    };

    let body = LABEL_PREFIX_RE.replace(body.trim(), "");
    let mut body = body.trim();

    if body.len() >= 2 && body.starts_with('`') && body.ends_with('`') && !body[1..].starts_with('`') {
        let inner = &body[1..body.len() - 1];
        if !inner.contains('`') {
            body = inner.trim();
        }
    }

    body.trim_end_matches(';').trim().to_string()
}

fn strip_language_tag(code: &str) -> &str {
    let first_line_end = code.find('\n').unwrap_or(code.len());
    let first_line = code[..first_line_end].trim();
    if matches!(
        first_line.to_ascii_lowercase().as_str(),
        "cypher" | "cql" | "neo4j" | "sql" | "text"
    ) {
        return &code[first_line_end..];
    }
    // Bloque en una sola línea: "```cypher MATCH ... ```"
    for tag in ["cypher", "Cypher", "CYPHER", "sql"] {
        if let Some(rest) = code.strip_prefix(tag) {
            if rest.starts_with(char::is_whitespace) {
                return rest;
            }
        }
    }
    code
}

/// Sustituye por espacios el contenido de literales de texto y comentarios,
/// conservando la longitud en bytes (y las comillas) del original.
pub fn mask_literals(query: &str) -> String {
    let bytes = query.as_bytes();
    let mut out = bytes.to_vec();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' && i + 1 < bytes.len() {
                        out[i] = b' ';
                        i += 1;
                    }
                    out[i] = b' ';
                    i += 1;
                }
                i += 1;
            }
            b'`' => {
                // Identificadores escapados: se conservan tal cual.
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    out[i] = b' ';
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    out[i] = b' ';
                    i += 1;
                }
                for _ in 0..2 {
                    if i < bytes.len() {
                        out[i] = b' ';
                        i += 1;
                    }
                }
            }
            _ => i += 1,
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn unquote(ident: &str) -> String {
    ident.trim().trim_matches('`').to_string()
}

fn split_names(group: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = String::new();
    let mut in_backticks = false;
    for c in group.chars() {
        match c {
            '`' => {
                in_backticks = !in_backticks;
                current.push(c);
            }
            ':' | '|' | '&' if !in_backticks => {
                if !current.trim().is_empty() {
                    names.push(unquote(&current));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        names.push(unquote(&current));
    }
    names
}

fn map_keys(map: Option<regex::Match<'_>>) -> Vec<String> {
    map.map(|m| {
        MAP_KEY_RE
            .captures_iter(m.as_str())
            .map(|c| unquote(&c[1]))
            .collect()
    })
    .unwrap_or_default()
}

/// Patrones de nodo con al menos una etiqueta, sobre la consulta enmascarada.
pub fn node_patterns(masked: &str) -> Vec<NodePattern> {
    NODE_RE
        .captures_iter(masked)
        .map(|caps| NodePattern {
            variable: caps.get(1).map(|m| m.as_str().to_string()),
            labels: split_names(&caps[2]),
            map_keys: map_keys(caps.get(3)),
        })
        .collect()
}

/// Patrones de relación con al menos un tipo, sobre la consulta enmascarada.
pub fn relationship_patterns(masked: &str) -> Vec<RelationshipPattern> {
    REL_RE
        .captures_iter(masked)
        .map(|caps| RelationshipPattern {
            variable: caps.get(1).map(|m| m.as_str().to_string()),
            types: split_names(&caps[2]),
            map_keys: map_keys(caps.get(3)),
        })
        .collect()
}

/// Para cada byte, si su delimitador más interno es la llave de un mapa literal
/// (y no la de una subconsulta `CALL { ... }` o `EXISTS { ... }`).
fn inside_maps(masked: &str) -> Vec<bool> {
    let mut stack: Vec<bool> = Vec::new();
    masked
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let inside = stack.last().copied().unwrap_or(false);
            match b {
                b'{' => stack.push(!SUBQUERY_RE.is_match(&masked[..i])),
                b'(' | b'[' => stack.push(false),
                b'}' | b')' | b']' => {
                    stack.pop();
                }
                _ => {}
            }
            inside
        })
        .collect()
}

/// Predicados `v:Etiqueta` que no forman parte de un patrón de nodo o relación ni
/// de la clave de un mapa, sobre la consulta enmascarada.
pub fn label_predicates(masked: &str) -> Vec<LabelPredicate> {
    let patterns: Vec<std::ops::Range<usize>> = NODE_RE
        .find_iter(masked)
        .chain(REL_RE.find_iter(masked))
        .map(|m| m.range())
        .collect();
    let in_map = inside_maps(masked);
    let bytes = masked.as_bytes();

    LABEL_PREDICATE_RE
        .captures_iter(masked)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let start = whole.start();
            if start > 0 && matches!(bytes[start - 1], b'.' | b'$' | b'`' | b':') {
                return None;
            }
            if in_map[start] || patterns.iter().any(|span| span.contains(&start)) {
                return None;
            }
            Some(LabelPredicate {
                variable: caps[1].to_string(),
                labels: split_names(&caps[2]),
            })
        })
        .collect()
}

/// Procedimientos invocados con `CALL nombre(...)`, sin repetir.
pub fn procedure_calls(masked: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for caps in PROCEDURE_RE.captures_iter(masked) {
        let name: String = caps[1].chars().filter(|c| !c.is_whitespace()).collect();
        if !found.contains(&name) {
            found.push(name);
        }
    }
    found
}

/// Accesos `v.prop` sobre la consulta enmascarada.
pub fn property_accesses(masked: &str) -> Vec<PropertyAccess> {
    PROPERTY_RE
        .captures_iter(masked)
        .filter(|caps| {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
            // `a.b.c`: sólo cuenta el primer tramo.
            start == 0 || masked.as_bytes()[start - 1] != b'.'
        })
        .map(|caps| PropertyAccess {
            variable: caps[1].to_string(),
            property: unquote(&caps[2]),
        })
        .collect()
}

/// Cláusulas de escritura presentes, en mayúsculas y sin repetir.
pub fn write_clauses(masked: &str) -> Vec<String> {
    let bytes = masked.as_bytes();
    let mut found: Vec<String> = Vec::new();
    for m in WRITE_RE.find_iter(masked) {
        if m.start() > 0 && matches!(bytes[m.start() - 1], b'.' | b':' | b'`' | b'$') {
            continue;
        }
        let clause = m.as_str().to_uppercase();
        if !found.contains(&clause) {
            found.push(clause);
        }
    }
    found
}

/// Profundidad de anidamiento (paréntesis, corchetes, llaves) antes de cada byte.
fn depths(masked: &str) -> Vec<i32> {
    let mut depth = 0;
    masked
        .bytes()
        .map(|b| {
            let before = depth;
            match b {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                _ => {}
            }
            before
        })
        .collect()
}

/// Nombres de las columnas que devolverá la consulta, según su último `RETURN`
/// de nivel superior: el alias si existe o el texto literal de la expresión.
///
/// Devuelve `None` si no hay `RETURN` o si se usa `RETURN *`.
pub fn return_columns(query: &str) -> Option<Vec<String>> {
    let masked = mask_literals(query);
    let depth = depths(&masked);

    let top_level: Vec<regex::Match<'_>> = CLAUSE_RE
        .find_iter(&masked)
        .filter(|m| depth[m.start()] == 0)
        .collect();

    let return_idx = top_level
        .iter()
        .rposition(|m| m.as_str().eq_ignore_ascii_case("RETURN"))?;
    let start = top_level[return_idx].end();
    let end = top_level
        .get(return_idx + 1)
        .map(|m| m.start())
        .unwrap_or(masked.len());

    let mut offset = start;
    let projection = &masked[start..end];
    let trimmed_start = projection.len() - projection.trim_start().len();
    offset += trimmed_start;
    let mut body = projection.trim_start();
    let distinct = body
        .get(..8)
        .is_some_and(|kw| kw.eq_ignore_ascii_case("DISTINCT"))
        && body[8..].starts_with(char::is_whitespace);
    if distinct {
        offset += 8;
        body = &body[8..];
    }

    let mut columns = Vec::new();
    let mut item_start = offset;
    for (i, b) in body.bytes().enumerate() {
        let pos = offset + i;
        if b == b',' && depth[pos] == 0 {
            columns.push(column_name(query, &masked, item_start, pos)?);
            item_start = pos + 1;
        }
    }
    columns.push(column_name(query, &masked, item_start, offset + body.len())?);
    Some(columns)
}

/// `RETURN *` (o `RETURN DISTINCT *`) en la consulta enmascarada.
pub fn returns_star(masked: &str) -> bool {
    STAR_RE.is_match(masked)
}

fn column_name(query: &str, masked: &str, start: usize, end: usize) -> Option<String> {
    let item = &masked[start..end];
    let item_depth = depths(item);
    let alias = AS_RE
        .find_iter(item)
        .filter(|m| item_depth[m.start()] == 0)
        .last();

    let name = match alias {
        Some(m) => unquote(&item[m.end()..]),
        None => query[start..end].trim().to_string(),
    };

    if name.is_empty() || name == "*" {
        None
    } else {
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_block_with_language_tag() {
        let raw = "```cypher\nMATCH (p:Person) RETURN p.name\n```";
        assert_eq!(extract_query(raw), "MATCH (p:Person) RETURN p.name");
    }

    #[test]
    fn strips_fence_surrounded_by_prose() {
        let raw = "Aquí está la consulta:\n```\nMATCH (n) RETURN n;\n```\nEspero que sirva.";
        assert_eq!(extract_query(raw), "MATCH (n) RETURN n");
    }

    #[test]
    fn strips_single_line_fence_and_label() {
        assert_eq!(
            extract_query("```cypher MATCH (n) RETURN n```"),
            "MATCH (n) RETURN n"
        );
        assert_eq!(
            extract_query("Cypher query: MATCH (n) RETURN count(n)"),
            "MATCH (n) RETURN count(n)"
        );
        assert_eq!(extract_query("`MATCH (n) RETURN n`"), "MATCH (n) RETURN n");
    }

    #[test]
    fn leaves_clean_queries_untouched() {
        let q = "MATCH (p:`Person`)-[:employee]->(c:Company) RETURN p.name AS name";
        assert_eq!(extract_query(q), q);
    }

    #[test]
    fn masking_preserves_length_and_hides_literals() {
        let q = "MATCH (b:Book {title: 'Ação (:Fake)'}) // (:Other)\nRETURN b";
        let masked = mask_literals(q);
        assert_eq!(masked.len(), q.len());
        assert!(!masked.contains("Fake"));
        assert!(!masked.contains("Other"));
        assert!(masked.contains("(b:Book"));
    }

    #[test]
    fn extracts_node_and_relationship_patterns() {
        let masked = mask_literals(
            "MATCH (a:Person:Employee {name: 'Anna'})-[r:employee|:friend*1..2]->(:Company) RETURN a",
        );
        let nodes = node_patterns(&masked);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].variable.as_deref(), Some("a"));
        assert_eq!(nodes[0].labels, vec!["Person", "Employee"]);
        assert_eq!(nodes[0].map_keys, vec!["name"]);
        assert_eq!(nodes[1].variable, None);
        assert_eq!(nodes[1].labels, vec!["Company"]);

        let rels = relationship_patterns(&masked);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].variable.as_deref(), Some("r"));
        assert_eq!(rels[0].types, vec!["employee", "friend"]);
    }

    #[test]
    fn ignores_function_calls_and_list_comprehensions() {
        let masked = mask_literals("MATCH p = (a)-->(b) RETURN count(a), [x IN nodes(p) | x.name]");
        assert!(node_patterns(&masked).is_empty());
        assert!(relationship_patterns(&masked).is_empty());
    }

    #[test]
    fn finds_property_accesses() {
        let masked = mask_literals("MATCH (p:Person) WHERE p.name = 'x.y' RETURN p.`full name`, db.labels()");
        let accesses = property_accesses(&masked);
        assert_eq!(
            accesses,
            vec![
                PropertyAccess { variable: "p".into(), property: "name".into() },
                PropertyAccess { variable: "p".into(), property: "full name".into() },
                PropertyAccess { variable: "db".into(), property: "labels".into() },
            ]
        );
    }

    #[test]
    fn finds_label_predicates_outside_patterns() {
        let masked = mask_literals(
            "MATCH (n)-[r:employee]->(c:Company {name: 'BigCo'}) WHERE n:Person:Employee OR c:`Big Co` RETURN n",
        );
        assert_eq!(
            label_predicates(&masked),
            vec![
                LabelPredicate { variable: "n".into(), labels: vec!["Person".into(), "Employee".into()] },
                LabelPredicate { variable: "c".into(), labels: vec!["Big Co".into()] },
            ]
        );
    }

    #[test]
    fn label_predicates_skip_map_keys_but_not_subqueries() {
        let masked = mask_literals("MATCH (b:Book) WITH {title: b.title} AS m RETURN m {.title, copy: m}");
        assert!(label_predicates(&masked).is_empty());

        let masked = mask_literals("CALL { MATCH (n) WHERE n:Ghost RETURN n } RETURN n");
        assert_eq!(
            label_predicates(&masked),
            vec![LabelPredicate { variable: "n".into(), labels: vec!["Ghost".into()] }]
        );
    }

    #[test]
    fn lists_called_procedures() {
        let masked = mask_literals(
            "CALL db.labels() YIELD label CALL apoc.create.node(['X'], {}) YIELD node CALL { RETURN 1 AS one } RETURN label",
        );
        assert_eq!(procedure_calls(&masked), vec!["db.labels", "apoc.create.node"]);
    }

    #[test]
    fn detects_write_clauses_but_not_properties() {
        let masked = mask_literals("MATCH (n) WHERE n.created_at > 1 SET n.x = 1 MERGE (m) RETURN n.set");
        assert_eq!(write_clauses(&masked), vec!["SET", "MERGE"]);
        assert!(write_clauses(&mask_literals("MATCH (n {note: 'CREATE'}) RETURN n")).is_empty());
    }

    #[test]
    fn return_columns_use_aliases_and_expression_text() {
        let cols = return_columns(
            "MATCH (p:Person)-[:likes]->(b:Book) RETURN DISTINCT p.name AS person, count(b), b.title ORDER BY person LIMIT 5",
        );
        assert_eq!(
            cols,
            Some(vec!["person".to_string(), "count(b)".to_string(), "b.title".to_string()])
        );
    }

    #[test]
    fn return_columns_skip_nested_returns_and_commas() {
        let cols = return_columns(
            "CALL { MATCH (n) RETURN n LIMIT 1 } RETURN collect(n.name) AS names, {a: 1, b: 2} AS `the map`",
        );
        assert_eq!(cols, Some(vec!["names".to_string(), "the map".to_string()]));
    }

    #[test]
    fn return_columns_reject_star_and_missing_return() {
        assert_eq!(return_columns("MATCH (n) RETURN *"), None);
        assert_eq!(return_columns("MATCH (n) DETACH DELETE n"), None);
        assert!(returns_star("MATCH (n) RETURN DISTINCT *"));
        assert!(!returns_star("MATCH (n) RETURN n.x * 2 AS doubled"));
    }
}
