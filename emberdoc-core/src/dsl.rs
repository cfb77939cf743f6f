//! A compact text syntax for filter expressions.
//!
//! ```text
//! age>=18 && (name=~'J%' || !(status=="banned")) && role==[admin,editor]
//! ```
//!
//! | syntax            | meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `f==v`, `f!=v`    | equality / inequality                     |
//! | `f>v` `f>=v` `f<v` `f<=v` | ordering                          |
//! | `f==[a,b,c]`      | membership                                |
//! | `f!=[a,b,c]`      | negated membership                        |
//! | `f=~pattern`      | SQL `LIKE` (`%` any run, `_` one char)    |
//! | `f~~regex`        | regular expression                        |
//! | `!x`, `a && b`, `a \|\| b` | logic, binding in that order     |
//!
//! Field names may be dotted paths (`address.city`). Names with other characters are
//! written between backticks (`` `first name`==Ann ``). Values are numbers, `true`, `false`,
//! `null`, quoted strings (`"..."` or `'...'`, with `\"`, `\'` and `\\` escapes) or bare
//! words, which are read as strings. Pattern operators always read their value as a string.
//!
//! Typed literals cover the remaining value kinds:
//!
//! | literal                         | value                              |
//! |---------------------------------|------------------------------------|
//! | `list(a, b)`                    | an array, compared as a whole      |
//! | `object("k": v, ...)`           | an embedded document               |
//! | `date("2024-01-01T00:00:00Z")`  | a date-time (RFC 3339)             |
//! | `date(1704067200000)`           | a date-time (epoch milliseconds)   |
//! | `double(inf)`, `double(NaN)`    | a non-finite double                |
//!
//! [`compile`] turns text into an [`Expr`]; the `Display` impl of [`Expr`] produces text that
//! compiles back to an equivalent tree for every expression that passes
//! [`Expr::validate`](crate::query::Expr::validate).

use std::{fmt, str::FromStr};

use bson::{Bson, DateTime, Document};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp},
};

/// Parses filter text into an expression tree.
///
/// # Errors
///
/// Returns [`DocumentStoreError::MalformedFilter`] with the byte position of the problem.
pub fn compile(text: &str) -> DocumentStoreResult<Expr> {
    let mut parser = Parser { input: text, pos: 0 };

    parser.skip_ws();
    if parser.at_end() {
        return Err(DocumentStoreError::malformed(0, "empty filter"));
    }

    let expr = parser.parse_or()?;

    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }

    Ok(expr)
}

impl FromStr for Expr {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        compile(s)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, message: impl Into<String>) -> DocumentStoreError {
        DocumentStoreError::malformed(self.pos, message)
    }

    fn parse_or(&mut self) -> DocumentStoreResult<Expr> {
        let mut operands = vec![self.parse_and()?];

        loop {
            self.skip_ws();
            if !self.eat("||") {
                break;
            }
            operands.push(self.parse_and()?);
        }

        Ok(collapse(operands, Expr::Or))
    }

    fn parse_and(&mut self) -> DocumentStoreResult<Expr> {
        let mut operands = vec![self.parse_unary()?];

        loop {
            self.skip_ws();
            if !self.eat("&&") {
                break;
            }
            operands.push(self.parse_unary()?);
        }

        Ok(collapse(operands, Expr::And))
    }

    fn parse_unary(&mut self) -> DocumentStoreResult<Expr> {
        self.skip_ws();

        if self.rest().starts_with('!') && !self.rest().starts_with("!=") {
            self.bump();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> DocumentStoreResult<Expr> {
        self.skip_ws();

        if self.eat("(") {
            let inner = self.parse_or()?;
            self.skip_ws();
            if !self.eat(")") {
                return Err(self.error("expected ')'"));
            }
            return Ok(inner);
        }

        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> DocumentStoreResult<Expr> {
        let field = self.parse_field()?;

        self.skip_ws();
        let op = self.parse_operator()?;
        self.skip_ws();

        if self.rest().starts_with('[') {
            let start = self.pos;
            self.bump();
            let values = Bson::Array(self.parse_items("]", |parser| parser.parse_scalar(false))?);

            return match op {
                FieldOp::Eq => Ok(Expr::field(field, FieldOp::In, values)),
                FieldOp::Ne => Ok(Expr::Not(Box::new(Expr::field(field, FieldOp::In, values)))),
                _ => Err(DocumentStoreError::malformed(
                    start,
                    "lists are only allowed with '==' or '!='",
                )),
            };
        }

        let pattern = matches!(op, FieldOp::Like | FieldOp::Regex);
        let value = self.parse_scalar(pattern)?;

        Ok(Expr::field(field, op, value))
    }

    fn parse_field(&mut self) -> DocumentStoreResult<String> {
        let start = self.pos;

        if self.eat("`") {
            let field = self.parse_quoted('`')?;
            if field.is_empty() {
                return Err(DocumentStoreError::malformed(start, "empty field name"));
            }
            return Ok(field);
        }

        while self.peek().is_some_and(is_field_char) {
            self.bump();
        }
        let field = &self.input[start..self.pos];

        if field.is_empty() {
            return Err(self.error("expected field name"));
        }
        if !is_bare_field(field) {
            return Err(DocumentStoreError::malformed(start, "invalid field path"));
        }

        Ok(field.to_string())
    }

    fn parse_operator(&mut self) -> DocumentStoreResult<FieldOp> {
        const OPERATORS: [(&str, FieldOp); 8] = [
            (">=", FieldOp::Gte),
            ("<=", FieldOp::Lte),
            ("==", FieldOp::Eq),
            ("!=", FieldOp::Ne),
            ("=~", FieldOp::Like),
            ("~~", FieldOp::Regex),
            (">", FieldOp::Gt),
            ("<", FieldOp::Lt),
        ];

        for (symbol, op) in OPERATORS {
            if self.eat(symbol) {
                return Ok(op);
            }
        }

        Err(self.error("expected comparison operator"))
    }

    /// Reads comma separated items up to `close`; the opening token is already consumed.
    fn parse_items<T>(
        &mut self,
        close: &str,
        mut item: impl FnMut(&mut Self) -> DocumentStoreResult<T>,
    ) -> DocumentStoreResult<Vec<T>> {
        let mut items = Vec::new();

        self.skip_ws();
        if self.eat(close) {
            return Ok(items);
        }

        loop {
            self.skip_ws();
            items.push(item(self)?);
            self.skip_ws();

            if self.eat(",") {
                continue;
            }
            if self.eat(close) {
                return Ok(items);
            }
            return Err(self.error(format!("expected ',' or '{close}'")));
        }
    }

    fn parse_scalar(&mut self, pattern: bool) -> DocumentStoreResult<Bson> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.parse_quoted(quote).map(Bson::String)
            }
            Some(_) => {
                let start = self.pos;
                let word = self.parse_bare();
                if word.is_empty() {
                    return Err(self.error("expected value"));
                }
                if pattern {
                    return Ok(Bson::String(word.to_string()));
                }
                if self.rest().starts_with('(') {
                    return self.parse_typed(start, word);
                }
                Ok(classify(word))
            }
            None => Err(self.error("expected value")),
        }
    }

    fn parse_typed(&mut self, start: usize, name: &str) -> DocumentStoreResult<Bson> {
        self.eat("(");
        self.skip_ws();

        match name {
            "list" => Ok(Bson::Array(
                self.parse_items(")", |parser| parser.parse_scalar(false))?,
            )),
            "object" => Ok(Bson::Document(
                self.parse_items(")", Self::parse_entry)?
                    .into_iter()
                    .collect::<Document>(),
            )),
            "date" => self.parse_closed(Self::parse_date),
            "double" => self.parse_closed(Self::parse_double),
            _ => Err(DocumentStoreError::malformed(
                start,
                format!("unknown literal `{name}(..)`"),
            )),
        }
    }

    fn parse_closed(&mut self, inner: fn(&mut Self) -> DocumentStoreResult<Bson>) -> DocumentStoreResult<Bson> {
        let value = inner(self)?;

        self.skip_ws();
        if !self.eat(")") {
            return Err(self.error("expected ')'"));
        }

        Ok(value)
    }

    fn parse_entry(&mut self) -> DocumentStoreResult<(String, Bson)> {
        let key = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                self.parse_quoted(quote)?
            }
            _ => return Err(self.error("expected quoted key")),
        };

        self.skip_ws();
        if !self.eat(":") {
            return Err(self.error("expected ':'"));
        }
        self.skip_ws();

        Ok((key, self.parse_scalar(false)?))
    }

    fn parse_date(&mut self) -> DocumentStoreResult<Bson> {
        let start = self.pos;

        let at = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                let text = self.parse_quoted(quote)?;
                DateTime::parse_rfc3339_str(&text).map_err(|err| {
                    DocumentStoreError::malformed(start, format!("invalid date: {err}"))
                })?
            }
            _ => {
                let millis = self.parse_bare().parse::<i64>().map_err(|_| {
                    DocumentStoreError::malformed(start, "expected RFC 3339 text or epoch milliseconds")
                })?;
                DateTime::from_millis(millis)
            }
        };

        Ok(Bson::DateTime(at))
    }

    fn parse_double(&mut self) -> DocumentStoreResult<Bson> {
        let start = self.pos;

        self.parse_bare()
            .parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| DocumentStoreError::malformed(start, "expected a number"))
    }

    fn parse_quoted(&mut self, quote: char) -> DocumentStoreResult<String> {
        let start = self.pos;
        let mut value = String::new();

        loop {
            match self.bump() {
                Some('\\') => match self.peek() {
                    Some(c) if c == '\\' || c == '"' || c == '\'' || c == quote => {
                        self.bump();
                        value.push(c);
                    }
                    _ => value.push('\\'),
                },
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
                None => {
                    return Err(DocumentStoreError::malformed(
                        start.saturating_sub(1),
                        "unterminated string",
                    ));
                }
            }
        }
    }

    fn parse_bare(&mut self) -> &'a str {
        let start = self.pos;

        while let Some(c) = self.peek() {
            let rest = self.rest();
            if c.is_whitespace()
                || matches!(c, '(' | ')' | '[' | ']' | ',')
                || rest.starts_with("&&")
                || rest.starts_with("||")
            {
                break;
            }
            self.bump();
        }

        &self.input[start..self.pos]
    }
}

fn is_field_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '-')
}

/// Whether a field name can be written without backticks.
fn is_bare_field(field: &str) -> bool {
    !field.is_empty()
        && field.chars().all(is_field_char)
        && !field.starts_with('.')
        && !field.ends_with('.')
        && !field.contains("..")
}

fn collapse(mut operands: Vec<Expr>, combine: fn(Vec<Expr>) -> Expr) -> Expr {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        combine(operands)
    }
}

fn classify(word: &str) -> Bson {
    match word {
        "true" => return Bson::Boolean(true),
        "false" => return Bson::Boolean(false),
        "null" => return Bson::Null,
        _ => {}
    }

    let numeric = word
        .trim_start_matches(['-', '+'])
        .starts_with(|c: char| c.is_ascii_digit());

    if numeric {
        if let Ok(value) = word.parse::<i64>() {
            return Bson::Int64(value);
        }
        if let Ok(value) = word.parse::<f64>() {
            if value.is_finite() {
                return Bson::Double(value);
            }
        }
    }

    Bson::String(word.to_string())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Field { field, op, value } => {
                if is_bare_field(field) {
                    f.write_str(field)?;
                } else {
                    write_delimited(f, field, '`')?;
                }
                f.write_str(op.symbol())?;

                match (op, value) {
                    (FieldOp::In, Bson::Array(items)) => {
                        f.write_str("[")?;
                        write_items(f, items)?;
                        f.write_str("]")
                    }
                    _ => write_value(f, value),
                }
            }
            Expr::Not(inner) => write!(f, "!({inner})"),
            Expr::And(children) => write_joined(f, children, " && "),
            Expr::Or(children) => write_joined(f, children, " || "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Expr], separator: &str) -> fmt::Result {
    if children.is_empty() {
        return f.write_str("()");
    }

    for (index, child) in children.iter().enumerate() {
        if index > 0 {
            f.write_str(separator)?;
        }
        match child {
            Expr::And(_) | Expr::Or(_) => write!(f, "({child})")?,
            _ => write!(f, "{child}")?,
        }
    }

    Ok(())
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Bson]) -> fmt::Result {
    for (index, item) in items.iter().enumerate() {
        if index > 0 {
            f.write_str(",")?;
        }
        write_value(f, item)?;
    }

    Ok(())
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Bson) -> fmt::Result {
    match value {
        Bson::Null => f.write_str("null"),
        Bson::Boolean(b) => write!(f, "{b}"),
        Bson::Int32(n) => write!(f, "{n}"),
        Bson::Int64(n) => write!(f, "{n}"),
        Bson::Double(n) if n.is_finite() => write!(f, "{n:?}"),
        Bson::Double(n) => write!(f, "double({n:?})"),
        Bson::String(s) => write_delimited(f, s, '"'),
        Bson::Array(items) => {
            f.write_str("list(")?;
            write_items(f, items)?;
            f.write_str(")")
        }
        Bson::Document(document) => {
            f.write_str("object(")?;
            for (index, (key, item)) in document.iter().enumerate() {
                if index > 0 {
                    f.write_str(",")?;
                }
                write_delimited(f, key, '"')?;
                f.write_str(":")?;
                write_value(f, item)?;
            }
            f.write_str(")")
        }
        Bson::DateTime(at) => match at.try_to_rfc3339_string() {
            Ok(text) if DateTime::parse_rfc3339_str(&text).ok() == Some(*at) => {
                f.write_str("date(")?;
                write_delimited(f, &text, '"')?;
                f.write_str(")")
            }
            _ => write!(f, "date({})", at.timestamp_millis()),
        },
        // No text form; `Expr::validate` rejects these.
        other => write_delimited(f, &other.to_string(), '"'),
    }
}

fn write_delimited(f: &mut fmt::Formatter<'_>, s: &str, delimiter: char) -> fmt::Result {
    write!(f, "{delimiter}")?;
    for c in s.chars() {
        if c == '\\' || c == delimiter {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    write!(f, "{delimiter}")
}
