//! Query construction and filtering API for collections.
//!
//! This module provides the filter expression tree, the builder functions that produce it,
//! and [`FindOptions`] for sorting and pagination.
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides a collection of static methods for building filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - Membership: `in_`
//! - Pattern: `like` (alias `text`), `regex`
//! - Logical: `and`, `or`, `not`
//!
//! Every tree built this way has a textual twin in the filter DSL (see [`crate::dsl`]):
//!
//! ```ignore
//! use emberdoc::query::Filter;
//!
//! let built = Filter::gte("age", 18).and(Filter::like("name", "J%"));
//! let parsed: Expr = "age>=18 && name=~'J%'".parse()?;
//! ```
//!
//! # Find options
//!
//! ```ignore
//! use emberdoc::query::{FindOptions, Filter, SortDirection};
//!
//! let options = FindOptions::builder()
//!     .filter(Filter::eq("status", "active"))
//!     .sort("created_at", SortDirection::Desc)
//!     .limit(10)
//!     .offset(20)
//!     .build();
//! ```

use bson::Bson;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name (or dotted path) to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Field equals one of the listed values.
    In,
    /// SQL `LIKE` pattern: `%` matches any run of characters, `_` exactly one.
    Like,
    /// Regular expression match.
    Regex,
}

impl FieldOp {
    /// The DSL spelling of this operator.
    pub fn symbol(&self) -> &'static str {
        match self {
            FieldOp::Eq | FieldOp::In => "==",
            FieldOp::Ne => "!=",
            FieldOp::Gt => ">",
            FieldOp::Gte => ">=",
            FieldOp::Lt => "<",
            FieldOp::Lte => "<=",
            FieldOp::Like => "=~",
            FieldOp::Regex => "~~",
        }
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates. `Not` always wraps exactly one child;
/// `And` and `Or` must hold at least one, see [`Expr::validate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Field comparison expression.
    Field {
        /// The field name or dotted path to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// `self && other`, appending to an existing `And` instead of nesting.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// `self || other`, appending to an existing `Or` instead of nesting.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Checks the structural invariants of the tree.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::MalformedFilter`] for empty `And`/`Or` nodes, `In`
    /// comparisons without a list, and pattern operators without a string.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        match self {
            Expr::And(children) | Expr::Or(children) => {
                if children.is_empty() {
                    return Err(DocumentStoreError::malformed(
                        0,
                        "logical combinator needs at least one operand",
                    ));
                }
                children.iter().try_for_each(Expr::validate)
            }
            Expr::Not(child) => child.validate(),
            Expr::Field { field, op, value } => {
                if field.is_empty() {
                    return Err(DocumentStoreError::malformed(0, "empty field name"));
                }
                check_value(field, value)?;
                match (op, value) {
                    (FieldOp::In, Bson::Array(_)) => Ok(()),
                    (FieldOp::In, _) => Err(DocumentStoreError::malformed(
                        0,
                        format!("membership test on {field} needs a list"),
                    )),
                    (FieldOp::Like | FieldOp::Regex, Bson::String(_)) => Ok(()),
                    (FieldOp::Like | FieldOp::Regex, _) => Err(DocumentStoreError::malformed(
                        0,
                        format!("pattern on {field} must be a string"),
                    )),
                    _ => Ok(()),
                }
            }
        }
    }
}

/// Filter values are limited to the kinds the filter text can spell.
fn check_value(field: &str, value: &Bson) -> DocumentStoreResult<()> {
    match value {
        Bson::Null
        | Bson::Boolean(_)
        | Bson::Int32(_)
        | Bson::Int64(_)
        | Bson::Double(_)
        | Bson::String(_)
        | Bson::DateTime(_) => Ok(()),
        Bson::Array(items) => items.iter().try_for_each(|item| check_value(field, item)),
        Bson::Document(document) => document.values().try_for_each(|item| check_value(field, item)),
        other => Err(DocumentStoreError::malformed(
            0,
            format!("unsupported value of type {:?} for {field}", other.element_type()),
        )),
    }
}

/// Builders for [`Expr`] trees.
///
/// ```ignore
/// let adults_named_j = Filter::gte("age", 18).and(Filter::like("name", "J%"));
/// ```
pub struct Filter;

impl Filter {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// `field != value`; also matches documents without the field.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the field equals any of the given values.
    pub fn in_<V: Into<Bson>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(
            field.into(),
            FieldOp::In,
            Bson::Array(values.into_iter().map(Into::into).collect()),
        )
    }

    /// Matches string fields against a SQL `LIKE` pattern.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Like, Bson::String(pattern.into()))
    }

    /// Text match, same as [`Filter::like`].
    pub fn text(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Filter::like(field, pattern)
    }

    /// Matches string fields against a regular expression.
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Expr {
        Expr::field(field.into(), FieldOp::Regex, Bson::String(pattern.into()))
    }

    /// Every operand must match. Needs at least one operand to be valid.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// At least one operand must match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Inverts an expression.
    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }
}

/// Filtering, sorting and pagination for a find call.
///
/// A `limit` of zero means "no limit".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub filter: Option<Expr>,
    pub sort: Option<Sort>,
    /// Maximum number of documents to return, `0` for all.
    pub limit: usize,
    /// Number of documents to skip.
    pub offset: usize,
}

impl FindOptions {
    /// Creates options matching every document in stored order.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new builder for fluent construction.
    pub fn builder() -> FindOptionsBuilder {
        FindOptionsBuilder::new()
    }

    /// Options holding only a filter.
    pub fn filtered(filter: Expr) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    /// Parses a `field` or `field:asc|desc` sort spec.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::MalformedFilter`] for an empty field or unknown direction.
    pub fn parse_sort(spec: &str) -> DocumentStoreResult<Sort> {
        let (field, direction) = match spec.split_once(':') {
            Some((field, direction)) => (field.trim(), direction.trim()),
            None => (spec.trim(), "asc"),
        };

        if field.is_empty() {
            return Err(DocumentStoreError::malformed(0, "sort field is empty"));
        }

        let direction = match direction.to_ascii_lowercase().as_str() {
            "asc" | "" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => {
                return Err(DocumentStoreError::malformed(
                    field.len() + 1,
                    format!("unknown sort direction '{other}'"),
                ));
            }
        };

        Ok(Sort { field: field.to_string(), direction })
    }

    /// Applies offset and limit to an already filtered and sorted result.
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        let take = if self.limit == 0 { usize::MAX } else { self.limit };

        items.into_iter().skip(self.offset).take(take).collect()
    }
}

impl From<Expr> for FindOptions {
    fn from(filter: Expr) -> Self {
        FindOptions::filtered(filter)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOptionsBuilder {
    options: FindOptions,
}

impl FindOptionsBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        FindOptionsBuilder { options: FindOptions::default() }
    }

    /// Sets the filter expression.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.options.filter = Some(filter);
        self
    }

    /// Sets the maximum number of documents to return (`0` for no limit).
    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = limit;
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.options.offset = offset;
        self
    }

    /// Sets the sort specification.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.options.sort = Some(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final options.
    pub fn build(self) -> FindOptions {
        self.options
    }
}

pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}
