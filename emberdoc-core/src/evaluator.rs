//! Query expression evaluation against stored documents.
//!
//! This module provides the evaluation engine for filter expressions,
//! enabling filtering and comparison operations on BSON documents. Backends that
//! cannot push filters down to their own query engine use it directly.

use std::{
    cmp::Ordering,
    collections::{HashMap, hash_map::Entry},
};

use bson::{Bson, datetime::DateTime};
use regex::Regex;

use crate::{
    document::{RawDocument, lookup_path},
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `30`, `30i64` and `30.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Translates a SQL `LIKE` pattern into an anchored regular expression.
pub(crate) fn like_to_regex(pattern: &str) -> DocumentStoreResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push_str("(?s)^");

    for c in pattern.chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            c => source.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }

    source.push('$');
    Ok(Regex::new(&source)?)
}

/// Evaluates filters against documents, compiling each pattern once.
///
/// One evaluator can be pointed at many documents in turn with [`evaluate_on`], so a query
/// over a whole collection compiles its `LIKE` and regex patterns a single time.
///
/// [`evaluate_on`]: DocumentEvaluator::evaluate_on
pub struct DocumentEvaluator<'a> {
    document: &'a RawDocument,
    patterns: HashMap<(FieldOp, String), Regex>,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a RawDocument) -> Self {
        Self {
            document,
            patterns: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Switches to `document` and evaluates `expr` against it.
    pub fn evaluate_on(&mut self, document: &'a RawDocument, expr: &Expr) -> DocumentStoreResult<bool> {
        self.document = document;
        self.visit_expr(expr)
    }

    /// Keeps the documents matching `expr`, in their original order.
    ///
    /// # Errors
    ///
    /// Fails on the first evaluation error (an invalid regular expression, for instance)
    /// instead of silently treating it as a non-match.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a RawDocument>,
        expr: &Expr,
    ) -> DocumentStoreResult<Vec<RawDocument>> {
        let mut evaluator: Option<DocumentEvaluator<'a>> = None;
        let mut matched = Vec::new();

        for document in documents {
            let evaluator = evaluator.get_or_insert_with(|| DocumentEvaluator::new(document));
            if evaluator.evaluate_on(document, expr)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn pattern(&mut self, op: FieldOp, source: &str) -> DocumentStoreResult<&Regex> {
        let regex = match self.patterns.entry((op, source.to_string())) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(match op {
                FieldOp::Like => like_to_regex(source)?,
                _ => Regex::new(source)?,
            }),
        };

        Ok(regex)
    }

    #[cfg(test)]
    fn compiled_patterns(&self) -> usize {
        self.patterns.len()
    }
}

/// Evaluates a filter against a single document.
pub fn evaluate(expr: &Expr, document: &RawDocument) -> DocumentStoreResult<bool> {
    DocumentEvaluator::new(document).evaluate(expr)
}

/// Stable sort of documents by a field path.
///
/// Values are ordered by kind first (missing/null, numbers, strings, booleans, dates,
/// everything else) and by value within a kind, which keeps the ordering total.
pub fn sort_documents(documents: &mut [RawDocument], sort: &Sort) {
    documents.sort_by(|a, b| {
        let ordering = compare_sort_keys(lookup_path(a, &sort.field), lookup_path(b, &sort.field));

        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

fn compare_sort_keys(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    fn rank(value: &Comparable<'_>) -> u8 {
        match value {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Bool(_) => 3,
            Comparable::DateTime(_) => 4,
            Comparable::Array(_) | Comparable::Map(_) => 5,
        }
    }

    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    rank(&left).cmp(&rank(&right)).then_with(|| match (&left, &right) {
        (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
        (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
        (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
        (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
        _ => Ordering::Equal,
    })
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = lookup_path(self.document, field) else {
            return Ok(*op == FieldOp::Ne);
        };

        match op {
            FieldOp::Eq => Ok(Comparable::from(field_value) == Comparable::from(value)),
            FieldOp::Ne => Ok(Comparable::from(field_value) != Comparable::from(value)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                match Comparable::from(field_value).partial_cmp(&Comparable::from(value)) {
                    Some(ordering) => Ok(match op {
                        FieldOp::Gt => ordering == Ordering::Greater,
                        FieldOp::Gte => ordering != Ordering::Less,
                        FieldOp::Lt => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    }),
                    None => Ok(false),
                }
            }
            FieldOp::In => {
                let Bson::Array(candidates) = value else {
                    return Err(DocumentStoreError::malformed(
                        0,
                        format!("membership test on {field} needs a list"),
                    ));
                };
                let candidates = candidates.iter().map(Comparable::from).collect::<Vec<_>>();

                Ok(match Comparable::from(field_value) {
                    Comparable::Array(items) => items.iter().any(|item| candidates.contains(item)),
                    single => candidates.contains(&single),
                })
            }
            FieldOp::Like | FieldOp::Regex => {
                let Bson::String(pattern) = value else {
                    return Err(DocumentStoreError::malformed(
                        0,
                        format!("pattern on {field} must be a string"),
                    ));
                };
                let regex = self.pattern(*op, pattern)?;

                Ok(match field_value {
                    Bson::String(text) => regex.is_match(text),
                    _ => false,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use bson::doc;

    fn john() -> RawDocument {
        doc! {
            "id": "u-1",
            "name": "John",
            "age": 30,
            "score": 7.5,
            "tags": ["admin", "ops"],
            "address": { "city": "Lund" },
        }
    }

    #[test]
    fn numbers_compare_across_representations() {
        let document = john();

        assert!(evaluate(&Filter::eq("age", 30i64), &document).unwrap());
        assert!(evaluate(&Filter::eq("age", 30.0), &document).unwrap());
        assert!(evaluate(&Filter::gte("age", 18), &document).unwrap());
        assert!(evaluate(&Filter::lte("age", 30), &document).unwrap());
        assert!(!evaluate(&Filter::lt("age", 30), &document).unwrap());
        assert!(evaluate(&Filter::gt("score", 7), &document).unwrap());
    }

    #[test]
    fn mismatched_types_never_order() {
        let document = john();

        assert!(!evaluate(&Filter::gt("name", 3), &document).unwrap());
        assert!(!evaluate(&Filter::lt("name", 3), &document).unwrap());
    }

    #[test]
    fn missing_fields_only_satisfy_ne() {
        let document = john();

        assert!(!evaluate(&Filter::eq("nickname", "Jo"), &document).unwrap());
        assert!(!evaluate(&Filter::gt("nickname", 1), &document).unwrap());
        assert!(evaluate(&Filter::ne("nickname", "Jo"), &document).unwrap());
    }

    #[test]
    fn membership_checks_scalars_and_arrays() {
        let document = john();

        assert!(evaluate(&Filter::in_("name", ["Jane", "John"]), &document).unwrap());
        assert!(!evaluate(&Filter::in_("name", ["Jane"]), &document).unwrap());
        assert!(evaluate(&Filter::in_("tags", ["ops"]), &document).unwrap());
        assert!(evaluate(&Filter::in_("age", [10, 30]), &document).unwrap());
    }

    #[test]
    fn like_patterns_use_percent_and_underscore() {
        let document = john();

        assert!(evaluate(&Filter::like("name", "J%"), &document).unwrap());
        assert!(evaluate(&Filter::like("name", "J_hn"), &document).unwrap());
        assert!(!evaluate(&Filter::like("name", "J_n"), &document).unwrap());
        assert!(!evaluate(&Filter::like("name", "ohn"), &document).unwrap());
        assert!(evaluate(&Filter::text("name", "%oh%"), &document).unwrap());
    }

    #[test]
    fn like_escapes_regex_metacharacters() {
        let document = doc! { "expr": "a.b*c" };

        assert!(evaluate(&Filter::like("expr", "a.b*c"), &document).unwrap());
        assert!(!evaluate(&Filter::like("expr", "a.b*"), &document).unwrap());
        assert!(!evaluate(&Filter::like("expr", "axb*c"), &document).unwrap());
    }

    #[test]
    fn regex_matches_strings_only() {
        let document = john();

        assert!(evaluate(&Filter::regex("name", "^J.*n$"), &document).unwrap());
        assert!(!evaluate(&Filter::regex("age", "3"), &document).unwrap());
        assert!(evaluate(&Filter::regex("name", "(unclosed"), &document).is_err());
    }

    #[test]
    fn patterns_compile_once_per_evaluator() {
        let documents = vec![john(), doc! { "name": "Jane" }, doc! { "name": "Bob" }];
        let expr = Filter::or([Filter::like("name", "J%"), Filter::regex("name", "^B")]);
        let mut evaluator = DocumentEvaluator::new(&documents[0]);

        let hits = documents
            .iter()
            .map(|document| evaluator.evaluate_on(document, &expr).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(hits, [true, true, true]);
        assert_eq!(evaluator.compiled_patterns(), 2);

        let matched = DocumentEvaluator::filter_documents(&documents, &Filter::like("name", "J%")).unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn dotted_paths_reach_nested_values() {
        assert!(evaluate(&Filter::eq("address.city", "Lund"), &john()).unwrap());
    }

    #[test]
    fn logical_operators_short_circuit() {
        let document = john();
        let yes = Filter::eq("name", "John");
        let no = Filter::eq("name", "Jane");

        assert!(evaluate(&Filter::and([yes.clone(), yes.clone()]), &document).unwrap());
        assert!(!evaluate(&Filter::and([yes.clone(), no.clone()]), &document).unwrap());
        assert!(evaluate(&Filter::or([no.clone(), yes.clone()]), &document).unwrap());
        assert!(evaluate(&Filter::not(no), &document).unwrap());
    }

    #[test]
    fn sort_is_stable_and_direction_aware() {
        let mut documents = vec![
            doc! { "n": "b", "age": 2 },
            doc! { "n": "a", "age": 1 },
            doc! { "n": "x" },
            doc! { "n": "c", "age": 2 },
        ];

        sort_documents(&mut documents, &Sort { field: "age".into(), direction: SortDirection::Asc });
        let names = documents.iter().map(|d| d.get_str("n").unwrap()).collect::<Vec<_>>();
        assert_eq!(names, ["x", "a", "b", "c"]);

        sort_documents(&mut documents, &Sort { field: "age".into(), direction: SortDirection::Desc });
        let names = documents.iter().map(|d| d.get_str("n").unwrap()).collect::<Vec<_>>();
        assert_eq!(names, ["b", "c", "a", "x"]);
    }
}
