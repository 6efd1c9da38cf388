//! Store-side form of a compiled filter.
//!
//! [`QueryExpr`] is what a record store evaluates natively. The in-memory
//! store runs [`QueryExpr::eval`] over stored documents; the SurrealDB store
//! renders [`QueryExpr::to_surrealql`] into a `WHERE` clause.

use serde_json::Value;

use crate::util::format_ms_rfc3339;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DocField {
    FormId,
    CreatedAt,
    Answer(String),
}

impl DocField {
    fn lookup<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        match self {
            Self::FormId => document.get("form_id"),
            Self::CreatedAt => document.get("created_at_ms"),
            Self::Answer(question_id) => document
                .get("answers")
                .and_then(Value::as_object)
                .and_then(|answers| answers.get(question_id)),
        }
    }

    fn render(&self, bindings: &mut Bindings) -> String {
        match self {
            Self::FormId => "form_id".to_string(),
            Self::CreatedAt => "created_at".to_string(),
            Self::Answer(question_id) => {
                let param = bindings.bind(Value::String(question_id.clone()));
                format!("answers[{param}]")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryExpr {
    All(Vec<QueryExpr>),
    Any(Vec<QueryExpr>),
    Not(Box<QueryExpr>),
    Eq(DocField, Value),
    Gte(DocField, i64),
    Lte(DocField, i64),
    /// Absent or null.
    Missing(DocField),
    IsArray(DocField),
    /// The field is an array sharing at least one element with the values.
    Intersects(DocField, Vec<String>),
    /// The field is an array holding exactly this many strings.
    LenEq(DocField, usize),
    /// The field is an array containing every one of the values.
    ContainsAll(DocField, Vec<String>),
}

impl QueryExpr {
    pub fn not(inner: QueryExpr) -> Self {
        Self::Not(Box::new(inner))
    }

    pub fn eval(&self, document: &Value) -> bool {
        match self {
            Self::All(parts) => parts.iter().all(|part| part.eval(document)),
            Self::Any(parts) => parts.iter().any(|part| part.eval(document)),
            Self::Not(inner) => !inner.eval(document),
            Self::Eq(field, expected) => field.lookup(document) == Some(expected),
            Self::Gte(field, bound) => field
                .lookup(document)
                .and_then(Value::as_i64)
                .is_some_and(|value| value >= *bound),
            Self::Lte(field, bound) => field
                .lookup(document)
                .and_then(Value::as_i64)
                .is_some_and(|value| value <= *bound),
            Self::Missing(field) => field.lookup(document).is_none_or(Value::is_null),
            Self::IsArray(field) => array_at(field, document).is_some(),
            Self::Intersects(field, values) => array_at(field, document).is_some_and(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|item| values.iter().any(|value| value == item))
            }),
            Self::LenEq(field, len) => array_at(field, document)
                .is_some_and(|items| items.iter().filter(|item| item.is_string()).count() == *len),
            Self::ContainsAll(field, values) => array_at(field, document).is_some_and(|items| {
                values
                    .iter()
                    .all(|value| items.iter().any(|item| item.as_str() == Some(value.as_str())))
            }),
        }
    }

    /// Renders a SurrealQL condition. Every literal, question ids included,
    /// goes through `bindings`.
    pub fn to_surrealql(&self, bindings: &mut Bindings) -> String {
        match self {
            Self::All(parts) => join(parts, " AND ", "true", bindings),
            Self::Any(parts) => join(parts, " OR ", "false", bindings),
            Self::Not(inner) => format!("!({})", inner.to_surrealql(bindings)),
            Self::Eq(field, expected) => {
                let field = field.render(bindings);
                let param = bindings.bind(expected.clone());
                format!("{field} = {param}")
            }
            Self::Gte(field, bound) => range_clause(field, ">=", *bound, bindings),
            Self::Lte(field, bound) => range_clause(field, "<=", *bound, bindings),
            Self::Missing(field) => {
                let field = field.render(bindings);
                format!("({field} IS NONE OR {field} IS NULL)")
            }
            Self::IsArray(field) => format!("type::is::array({})", field.render(bindings)),
            Self::Intersects(field, values) => {
                let field = field.render(bindings);
                let param = bindings.bind(strings(values));
                format!("(type::is::array({field}) AND {field} CONTAINSANY {param})")
            }
            Self::LenEq(field, len) => {
                let field = field.render(bindings);
                let param = bindings.bind(Value::from(*len as u64));
                format!(
                    "(type::is::array({field}) AND \
                     array::len({field}[WHERE type::is::string($this)]) = {param})"
                )
            }
            Self::ContainsAll(field, values) => {
                let field = field.render(bindings);
                let param = bindings.bind(strings(values));
                format!("(type::is::array({field}) AND {field} CONTAINSALL {param})")
            }
        }
    }
}

fn array_at<'a>(field: &DocField, document: &'a Value) -> Option<&'a Vec<Value>> {
    field.lookup(document).and_then(Value::as_array)
}

fn strings(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn join(parts: &[QueryExpr], separator: &str, empty: &str, bindings: &mut Bindings) -> String {
    if parts.is_empty() {
        return empty.to_string();
    }
    let rendered: Vec<String> = parts
        .iter()
        .map(|part| part.to_surrealql(bindings))
        .collect();
    format!("({})", rendered.join(separator))
}

fn range_clause(field: &DocField, op: &str, bound: i64, bindings: &mut Bindings) -> String {
    let field_sql = field.render(bindings);
    match field {
        DocField::CreatedAt => {
            let param = bindings.bind(Value::String(format_ms_rfc3339(bound)));
            format!("{field_sql} {op} <datetime>{param}")
        }
        _ => {
            let param = bindings.bind(Value::from(bound));
            format!("{field_sql} {op} {param}")
        }
    }
}

/// Named query parameters collected while rendering.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bindings {
    values: Vec<(String, Value)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&mut self, value: Value) -> String {
        let name = format!("p{}", self.values.len());
        let placeholder = format!("${name}");
        self.values.push((name, value));
        placeholder
    }

    pub fn into_vec(self) -> Vec<(String, Value)> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(answers: Value) -> Value {
        json!({"form_id": 3, "created_at_ms": 500, "answers": answers})
    }

    #[test]
    fn missing_covers_absent_null_and_non_object_answers() {
        let field = DocField::Answer("q1".into());
        let expr = QueryExpr::Missing(field);
        assert!(expr.eval(&document(json!({}))));
        assert!(expr.eval(&document(json!({"q1": null}))));
        assert!(expr.eval(&document(json!("broken"))));
        assert!(!expr.eval(&document(json!({"q1": "a"}))));
    }

    #[test]
    fn array_operators_require_arrays() {
        let field = DocField::Answer("q1".into());
        let doc = document(json!({"q1": "a"}));
        assert!(!QueryExpr::Intersects(field.clone(), vec!["a".into()]).eval(&doc));
        assert!(!QueryExpr::LenEq(field.clone(), 1).eval(&doc));
        assert!(!QueryExpr::ContainsAll(field.clone(), vec!["a".into()]).eval(&doc));
        assert!(!QueryExpr::IsArray(field).eval(&doc));
    }

    #[test]
    fn is_array_guards_negated_intersection() {
        let field = DocField::Answer("q1".into());
        let expr = QueryExpr::All(vec![
            QueryExpr::IsArray(field.clone()),
            QueryExpr::not(QueryExpr::Intersects(field, vec!["a".into()])),
        ]);
        assert!(expr.eval(&document(json!({"q1": ["b"]}))));
        assert!(expr.eval(&document(json!({"q1": []}))));
        assert!(!expr.eval(&document(json!({"q1": ["a", 2]}))));
        assert!(!expr.eval(&document(json!({}))));
        assert!(!expr.eval(&document(json!({"q1": null}))));

        let mut bindings = Bindings::new();
        assert_eq!(
            expr.to_surrealql(&mut bindings),
            "(type::is::array(answers[$p0]) AND \
             !((type::is::array(answers[$p1]) AND answers[$p1] CONTAINSANY $p2)))"
        );
        assert_eq!(bindings.len(), 3);
    }

    #[test]
    fn length_counts_only_string_elements() {
        let field = DocField::Answer("q1".into());
        let doc = document(json!({"q1": ["a", 1, null, "b"]}));
        assert!(QueryExpr::LenEq(field.clone(), 2).eval(&doc));
        assert!(!QueryExpr::LenEq(field, 4).eval(&doc));
    }

    #[test]
    fn bounds_compare_numerically() {
        assert!(QueryExpr::Gte(DocField::CreatedAt, 500).eval(&document(json!({}))));
        assert!(!QueryExpr::Gte(DocField::CreatedAt, 501).eval(&document(json!({}))));
        assert!(QueryExpr::Lte(DocField::CreatedAt, 500).eval(&document(json!({}))));
    }

    #[test]
    fn surrealql_binds_question_ids_and_values() {
        let expr = QueryExpr::All(vec![
            QueryExpr::Eq(DocField::FormId, json!(3)),
            QueryExpr::Gte(DocField::CreatedAt, 0),
            QueryExpr::Any(vec![
                QueryExpr::Missing(DocField::Answer("q'1".into())),
                QueryExpr::not(QueryExpr::Eq(DocField::Answer("q'1".into()), json!("x"))),
            ]),
        ]);
        let mut bindings = Bindings::new();
        let sql = expr.to_surrealql(&mut bindings);
        assert_eq!(
            sql,
            "(form_id = $p0 AND created_at >= <datetime>$p1 AND \
             ((answers[$p2] IS NONE OR answers[$p2] IS NULL) OR !(answers[$p3] = $p4)))"
        );
        assert!(!sql.contains("q'1"));
        let values = bindings.into_vec();
        assert_eq!(values[1].1, json!("1970-01-01T00:00:00Z"));
        assert_eq!(values[2].1, json!("q'1"));
        assert_eq!(values[4].1, json!("x"));
    }

    #[test]
    fn empty_conjunction_renders_true() {
        let mut bindings = Bindings::new();
        assert_eq!(QueryExpr::All(vec![]).to_surrealql(&mut bindings), "true");
        assert!(bindings.is_empty());
    }
}
