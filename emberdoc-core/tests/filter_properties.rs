//! Property tests for filter text and filter evaluation.

use bson::{Bson, DateTime, doc};
use proptest::prelude::*;

use emberdoc_core::{
    document::RawDocument,
    dsl::compile,
    evaluator::evaluate,
    query::{Expr, FieldOp},
};

const FIELDS: [&str; 8] = [
    "age",
    "name",
    "score",
    "tags",
    "address.city",
    "missing",
    "first name",
    "odd`key",
];

fn word_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,5}").expect("Invalid regex")
}

fn date_strategy() -> impl Strategy<Value = Bson> {
    prop_oneof![
        4 => (0i64..4_000_000_000_000).prop_map(|millis| Bson::DateTime(DateTime::from_millis(millis))),
        1 => any::<i64>().prop_map(|millis| Bson::DateTime(DateTime::from_millis(millis))),
    ]
}

fn scalar_strategy() -> impl Strategy<Value = Bson> {
    prop_oneof![
        (-50i64..50).prop_map(Bson::Int64),
        (-50i32..50).prop_map(Bson::Int32),
        (-50.0f64..50.0).prop_map(Bson::Double),
        prop::sample::select(vec![f64::INFINITY, f64::NEG_INFINITY]).prop_map(Bson::Double),
        word_strategy().prop_map(Bson::String),
        any::<bool>().prop_map(Bson::Boolean),
        Just(Bson::Null),
        date_strategy(),
    ]
}

/// Scalars plus whole arrays and embedded documents.
fn value_strategy() -> impl Strategy<Value = Bson> {
    prop_oneof![
        4 => scalar_strategy(),
        1 => prop::collection::vec(scalar_strategy(), 0..3).prop_map(Bson::Array),
        1 => prop::option::of(scalar_strategy()).prop_map(|city| match city {
            Some(city) => Bson::Document(doc! { "city": city }),
            None => Bson::Document(doc! {}),
        }),
    ]
}

fn field_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(FIELDS.to_vec()).prop_map(str::to_string)
}

fn comparison_strategy() -> impl Strategy<Value = Expr> {
    let op = prop::sample::select(vec![
        FieldOp::Eq,
        FieldOp::Ne,
        FieldOp::Gt,
        FieldOp::Gte,
        FieldOp::Lt,
        FieldOp::Lte,
    ]);

    prop_oneof![
        4 => (field_strategy(), op, value_strategy())
            .prop_map(|(field, op, value)| Expr::field(field, op, value)),
        1 => (field_strategy(), prop::collection::vec(value_strategy(), 0..4))
            .prop_map(|(field, values)| Expr::field(field, FieldOp::In, Bson::Array(values))),
        1 => (field_strategy(), prop::string::string_regex("[a-z%_]{1,4}").expect("Invalid regex"))
            .prop_map(|(field, pattern)| Expr::field(field, FieldOp::Like, Bson::String(pattern))),
        1 => (field_strategy(), prop::string::string_regex("\\^?[a-z]{1,3}\\$?").expect("Invalid regex"))
            .prop_map(|(field, pattern)| Expr::field(field, FieldOp::Regex, Bson::String(pattern))),
    ]
}

fn expr_strategy() -> impl Strategy<Value = Expr> {
    comparison_strategy().prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..4).prop_map(Expr::And),
            prop::collection::vec(inner.clone(), 1..4).prop_map(Expr::Or),
            inner.prop_map(|expr| Expr::Not(Box::new(expr))),
        ]
    })
}

fn document_strategy() -> impl Strategy<Value = RawDocument> {
    (
        prop::option::of(value_strategy()),
        prop::option::of(value_strategy()),
        prop::option::of(value_strategy()),
        prop::option::of(prop::collection::vec(value_strategy(), 0..3)),
        prop::option::of(value_strategy()),
        prop::option::of(value_strategy()),
    )
        .prop_map(|(age, name, score, tags, city, first_name)| {
            let mut document = RawDocument::new();
            for (field, value) in [("age", age), ("name", name), ("score", score), ("first name", first_name)] {
                if let Some(value) = value {
                    document.insert(field, value);
                }
            }
            if let Some(tags) = tags {
                document.insert("tags", tags);
            }
            if let Some(city) = city {
                document.insert("address", doc! { "city": city });
            }
            document
        })
}

fn corpus_strategy() -> impl Strategy<Value = Vec<RawDocument>> {
    prop::collection::vec(document_strategy(), 1..12)
}

fn matches(expr: &Expr, corpus: &[RawDocument]) -> Vec<bool> {
    corpus
        .iter()
        .map(|document| evaluate(expr, document).unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn printed_filters_compile_to_equivalent_trees(
        expr in expr_strategy(),
        corpus in corpus_strategy(),
    ) {
        let text = expr.to_string();
        let compiled = compile(&text).unwrap();

        prop_assert_eq!(matches(&compiled, &corpus), matches(&expr, &corpus), "filter text: {}", text);
    }

    #[test]
    fn compiled_filters_print_back_to_themselves(expr in expr_strategy()) {
        let compiled = compile(&expr.to_string()).unwrap();

        prop_assert_eq!(compile(&compiled.to_string()).unwrap(), compiled);
    }

    #[test]
    fn negated_conjunction_is_disjunction_of_negations(
        a in expr_strategy(),
        b in expr_strategy(),
        corpus in corpus_strategy(),
    ) {
        let left = Expr::Not(Box::new(Expr::And(vec![a.clone(), b.clone()])));
        let right = Expr::Or(vec![Expr::Not(Box::new(a)), Expr::Not(Box::new(b))]);

        prop_assert_eq!(matches(&left, &corpus), matches(&right, &corpus));
    }

    #[test]
    fn negated_disjunction_is_conjunction_of_negations(
        a in expr_strategy(),
        b in expr_strategy(),
        corpus in corpus_strategy(),
    ) {
        let left = Expr::Not(Box::new(Expr::Or(vec![a.clone(), b.clone()])));
        let right = Expr::And(vec![Expr::Not(Box::new(a)), Expr::Not(Box::new(b))]);

        prop_assert_eq!(matches(&left, &corpus), matches(&right, &corpus));
    }

    #[test]
    fn double_negation_cancels(expr in expr_strategy(), corpus in corpus_strategy()) {
        let doubled = Expr::Not(Box::new(Expr::Not(Box::new(expr.clone()))));

        prop_assert_eq!(matches(&doubled, &corpus), matches(&expr, &corpus));
    }

    #[test]
    fn garbage_never_panics(text in "\\PC{0,40}") {
        let _ = compile(&text);
    }
}
