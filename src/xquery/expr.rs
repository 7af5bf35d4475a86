//! Filter expressions.
//!
//! Translated query text is parsed with `sqlparser` and converted into a
//! [`Predicate`] tree, which is evaluated column-wise against a [`Frame`].
use regex::Regex;
use sqlparser::ast as sp;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser as SqlParser;
use sqlparser::tokenizer::Token;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::frame::{CellValue, Frame};

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("Could not parse query '{query}': {message}")]
    Parse { query: String, message: String },
    #[error("Unsupported expression: {0}")]
    Unsupported(String),
    #[error("{function}() expects {expected}")]
    BadArguments {
        function: String,
        expected: &'static str,
    },
    #[error("Invalid pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("Unknown column: {0}")]
    UnknownColumn(String),
}

pub type ExprResult<T> = std::result::Result<T, ExprError>;

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(CellValue),
    Arith {
        left: Box<Expr>,
        op: ArithOp,
        right: Box<Expr>,
    },
    Neg(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Contains,
    Match,
    FullMatch,
    StartsWith,
    EndsWith,
    Like,
    ILike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringTest {
    Alnum,
    Alpha,
    Numeric,
    Digit,
    Decimal,
    Lower,
    Upper,
    Title,
    Space,
}

/// Which occurrences of a repeated value count as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    /// Every occurrence.
    None,
    /// All but the first.
    First,
    /// All but the last.
    Last,
}

/// A boolean expression over the rows of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare {
        left: Expr,
        op: CompareOp,
        right: Expr,
    },
    IsNull {
        expr: Expr,
        negated: bool,
    },
    InList {
        expr: Expr,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Expr,
        low: Expr,
        high: Expr,
        negated: bool,
    },
    Pattern {
        expr: Expr,
        op: PatternOp,
        pattern: String,
    },
    StringTest {
        expr: Expr,
        test: StringTest,
    },
    Duplicated {
        expr: Expr,
        keep: Keep,
    },
    /// A boolean column or literal.
    Truthy(Expr),
}

/// Parse a translated query into a predicate.
pub fn parse_predicate(text: &str) -> ExprResult<Predicate> {
    let parse_error = |e: sqlparser::parser::ParserError| ExprError::Parse {
        query: text.to_string(),
        message: e.to_string(),
    };
    let dialect = PostgreSqlDialect {};
    let mut parser = SqlParser::new(&dialect)
        .try_with_sql(text)
        .map_err(parse_error)?;
    let expr = parser.parse_expr().map_err(parse_error)?;
    parser.expect_token(&Token::EOF).map_err(parse_error)?;
    convert_predicate(expr)
}

fn convert_predicate(expr: sp::Expr) -> ExprResult<Predicate> {
    match expr {
        sp::Expr::Nested(inner) => convert_predicate(*inner),
        sp::Expr::BinaryOp { left, op, right } => match op {
            sp::BinaryOperator::And => Ok(Predicate::And(
                Box::new(convert_predicate(*left)?),
                Box::new(convert_predicate(*right)?),
            )),
            sp::BinaryOperator::Or => Ok(Predicate::Or(
                Box::new(convert_predicate(*left)?),
                Box::new(convert_predicate(*right)?),
            )),
            op => match convert_compare_op(&op) {
                Some(op) => Ok(Predicate::Compare {
                    left: convert_expr(*left)?,
                    op,
                    right: convert_expr(*right)?,
                }),
                None => Err(ExprError::Unsupported(format!("{} as a condition", op))),
            },
        },
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Not,
            expr,
        } => Ok(Predicate::Not(Box::new(convert_predicate(*expr)?))),
        sp::Expr::IsNull(expr) => Ok(Predicate::IsNull {
            expr: convert_expr(*expr)?,
            negated: false,
        }),
        sp::Expr::IsNotNull(expr) => Ok(Predicate::IsNull {
            expr: convert_expr(*expr)?,
            negated: true,
        }),
        sp::Expr::InList {
            expr,
            list,
            negated,
        } => Ok(Predicate::InList {
            expr: convert_expr(*expr)?,
            list: list
                .into_iter()
                .map(convert_expr)
                .collect::<ExprResult<Vec<_>>>()?,
            negated,
        }),
        sp::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Predicate::Between {
            expr: convert_expr(*expr)?,
            low: convert_expr(*low)?,
            high: convert_expr(*high)?,
            negated,
        }),
        sp::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => like_predicate(*expr, *pattern, PatternOp::Like, negated),
        sp::Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => like_predicate(*expr, *pattern, PatternOp::ILike, negated),
        sp::Expr::Function(func) => convert_function(func),
        other => Ok(Predicate::Truthy(convert_expr(other)?)),
    }
}

fn like_predicate(
    expr: sp::Expr,
    pattern: sp::Expr,
    op: PatternOp,
    negated: bool,
) -> ExprResult<Predicate> {
    let pattern = match pattern {
        sp::Expr::Value(sp::Value::SingleQuotedString(s)) => s,
        other => return Err(ExprError::Unsupported(format!("LIKE pattern {}", other))),
    };
    let predicate = Predicate::Pattern {
        expr: convert_expr(expr)?,
        op,
        pattern,
    };
    Ok(if negated {
        Predicate::Not(Box::new(predicate))
    } else {
        predicate
    })
}

fn convert_function(func: sp::Function) -> ExprResult<Predicate> {
    let name = func.name.to_string().to_lowercase();
    let args: Vec<sp::Expr> = match func.args {
        sp::FunctionArguments::List(list) => list
            .args
            .into_iter()
            .filter_map(|a| match a {
                sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => Some(e),
                _ => None,
            })
            .collect(),
        _ => vec![],
    };

    let pattern_op = match name.as_str() {
        "str_contains" => Some(PatternOp::Contains),
        "str_match" => Some(PatternOp::Match),
        "str_fullmatch" => Some(PatternOp::FullMatch),
        "str_startswith" => Some(PatternOp::StartsWith),
        "str_endswith" => Some(PatternOp::EndsWith),
        _ => None,
    };
    if let Some(op) = pattern_op {
        let (expr, pattern) = two_args(&name, args, "a column and a quoted pattern")?;
        return Ok(Predicate::Pattern {
            expr: convert_expr(expr)?,
            op,
            pattern,
        });
    }

    let test = match name.as_str() {
        "str_isalnum" => Some(StringTest::Alnum),
        "str_isalpha" => Some(StringTest::Alpha),
        "str_isnumeric" => Some(StringTest::Numeric),
        "str_isdigit" => Some(StringTest::Digit),
        "str_isdecimal" => Some(StringTest::Decimal),
        "str_islower" => Some(StringTest::Lower),
        "str_isupper" => Some(StringTest::Upper),
        "str_istitle" => Some(StringTest::Title),
        "str_isspace" => Some(StringTest::Space),
        _ => None,
    };
    if let Some(test) = test {
        let expr = one_arg(&name, args)?;
        return Ok(Predicate::StringTest {
            expr: convert_expr(expr)?,
            test,
        });
    }

    if name == "duplicated" {
        let (expr, keep) = two_args(&name, args, "a column and 'none', 'first' or 'last'")?;
        let keep = match keep.as_str() {
            "first" => Keep::First,
            "last" => Keep::Last,
            _ => Keep::None,
        };
        return Ok(Predicate::Duplicated {
            expr: convert_expr(expr)?,
            keep,
        });
    }

    Err(ExprError::Unsupported(format!("function {}()", name)))
}

fn one_arg(name: &str, args: Vec<sp::Expr>) -> ExprResult<sp::Expr> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(expr), None) => Ok(expr),
        _ => Err(ExprError::BadArguments {
            function: name.to_string(),
            expected: "a single column",
        }),
    }
}

/// A column-like expression followed by a string literal.
fn two_args(
    name: &str,
    args: Vec<sp::Expr>,
    expected: &'static str,
) -> ExprResult<(sp::Expr, String)> {
    let bad = || ExprError::BadArguments {
        function: name.to_string(),
        expected,
    };
    let mut args = args.into_iter();
    match (args.next(), args.next(), args.next()) {
        (Some(expr), Some(sp::Expr::Value(sp::Value::SingleQuotedString(s))), None) => {
            Ok((expr, s))
        }
        _ => Err(bad()),
    }
}

fn convert_expr(expr: sp::Expr) -> ExprResult<Expr> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(Expr::Column(ident.value)),
        sp::Expr::CompoundIdentifier(parts) => Ok(Expr::Column(
            parts
                .into_iter()
                .map(|p| p.value)
                .collect::<Vec<_>>()
                .join("."),
        )),
        sp::Expr::Nested(inner) => convert_expr(*inner),
        sp::Expr::Value(value) => convert_value(value),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Minus,
            expr,
        } => Ok(Expr::Neg(Box::new(convert_expr(*expr)?))),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Plus,
            expr,
        } => convert_expr(*expr),
        sp::Expr::BinaryOp { left, op, right } => {
            let op = match op {
                sp::BinaryOperator::Plus => ArithOp::Add,
                sp::BinaryOperator::Minus => ArithOp::Sub,
                sp::BinaryOperator::Multiply => ArithOp::Mul,
                sp::BinaryOperator::Divide => ArithOp::Div,
                sp::BinaryOperator::Modulo => ArithOp::Mod,
                other => return Err(ExprError::Unsupported(format!("operator {}", other))),
            };
            Ok(Expr::Arith {
                left: Box::new(convert_expr(*left)?),
                op,
                right: Box::new(convert_expr(*right)?),
            })
        }
        other => Err(ExprError::Unsupported(other.to_string())),
    }
}

fn convert_value(value: sp::Value) -> ExprResult<Expr> {
    let cell = match value {
        sp::Value::Null => CellValue::Null,
        sp::Value::Boolean(b) => CellValue::Bool(b),
        sp::Value::Number(n, _) => match n.parse::<i64>() {
            Ok(i) => CellValue::Int64(i),
            Err(_) => n
                .parse::<f64>()
                .map(CellValue::Float64)
                .map_err(|_| ExprError::Unsupported(format!("number {}", n)))?,
        },
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => CellValue::Text(s),
        other => return Err(ExprError::Unsupported(format!("value {}", other))),
    };
    Ok(Expr::Literal(cell))
}

fn convert_compare_op(op: &sp::BinaryOperator) -> Option<CompareOp> {
    match op {
        sp::BinaryOperator::Eq => Some(CompareOp::Eq),
        sp::BinaryOperator::NotEq => Some(CompareOp::NotEq),
        sp::BinaryOperator::Lt => Some(CompareOp::Lt),
        sp::BinaryOperator::LtEq => Some(CompareOp::LtEq),
        sp::BinaryOperator::Gt => Some(CompareOp::Gt),
        sp::BinaryOperator::GtEq => Some(CompareOp::GtEq),
        _ => None,
    }
}

impl Expr {
    /// One value per row.
    pub fn evaluate(&self, frame: &Frame) -> ExprResult<Vec<CellValue>> {
        match self {
            Expr::Column(name) => {
                let idx = frame
                    .column_index(name)
                    .map_err(|_| ExprError::UnknownColumn(name.clone()))?;
                Ok(frame.rows.iter().map(|r| r[idx].clone()).collect())
            }
            Expr::Literal(value) => Ok(vec![value.clone(); frame.height()]),
            Expr::Neg(inner) => Ok(inner
                .evaluate(frame)?
                .into_iter()
                .map(|v| match v.as_f64() {
                    Some(f) => numeric(-f, &v),
                    None => CellValue::Null,
                })
                .collect()),
            Expr::Arith { left, op, right } => {
                let left = left.evaluate(frame)?;
                let right = right.evaluate(frame)?;
                Ok(left
                    .iter()
                    .zip(&right)
                    .map(|(a, b)| op.apply(a, b))
                    .collect())
            }
        }
    }
}

impl ArithOp {
    fn apply(&self, a: &CellValue, b: &CellValue) -> CellValue {
        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return CellValue::Null;
        };
        let integral = matches!(
            (a, b),
            (
                CellValue::Int16(_) | CellValue::Int32(_) | CellValue::Int64(_),
                CellValue::Int16(_) | CellValue::Int32(_) | CellValue::Int64(_)
            )
        );
        let result = match self {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => return CellValue::Float64(x / y),
            ArithOp::Mod => x % y,
        };
        if integral && result.fract() == 0.0 {
            CellValue::Int64(result as i64)
        } else {
            CellValue::Float64(result)
        }
    }
}

fn numeric(value: f64, like: &CellValue) -> CellValue {
    match like {
        CellValue::Int16(_) | CellValue::Int32(_) | CellValue::Int64(_) => {
            CellValue::Int64(value as i64)
        }
        _ => CellValue::Float64(value),
    }
}

impl CompareOp {
    fn test(&self, a: &CellValue, b: &CellValue) -> bool {
        let ordering = a.compare(b);
        match self {
            CompareOp::Eq => ordering == Some(Ordering::Equal),
            CompareOp::NotEq => ordering != Some(Ordering::Equal),
            CompareOp::Lt => ordering == Some(Ordering::Less),
            CompareOp::LtEq => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Gt => ordering == Some(Ordering::Greater),
            CompareOp::GtEq => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        }
    }
}

impl StringTest {
    fn test(&self, s: &str) -> bool {
        if s.is_empty() {
            return false;
        }
        match self {
            StringTest::Alnum => s.chars().all(char::is_alphanumeric),
            StringTest::Alpha => s.chars().all(char::is_alphabetic),
            StringTest::Numeric => s.chars().all(char::is_numeric),
            StringTest::Digit => s.chars().all(is_digit),
            StringTest::Decimal => s.chars().all(|c| c.is_ascii_digit()),
            StringTest::Lower => {
                s.chars().any(char::is_lowercase) && !s.chars().any(char::is_uppercase)
            }
            StringTest::Upper => {
                s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)
            }
            StringTest::Title => is_title(s),
            StringTest::Space => s.chars().all(char::is_whitespace),
        }
    }
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit() || "⁰¹²³⁴⁵⁶⁷⁸⁹₀₁₂₃₄₅₆₇₈₉".contains(c)
}

/// Uppercase letters only start words, lowercase letters only continue them.
fn is_title(s: &str) -> bool {
    let mut cased = false;
    let mut previous_cased = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if previous_cased {
                return false;
            }
            previous_cased = true;
            cased = true;
        } else if c.is_lowercase() {
            if !previous_cased {
                return false;
            }
            previous_cased = true;
            cased = true;
        } else {
            previous_cased = false;
        }
    }
    cased
}

/// Translate a SQL LIKE pattern into an anchored regex.
fn like_to_regex(pattern: &str, case_insensitive: bool) -> String {
    let mut out = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    for c in pattern.chars() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push('$');
    out
}

enum Matcher {
    Regex(Regex),
    Prefix(String),
    Suffix(String),
}

impl Matcher {
    fn new(op: PatternOp, pattern: &str) -> ExprResult<Self> {
        let compile = |p: String| {
            Regex::new(&p).map_err(|source| ExprError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
        };
        Ok(match op {
            PatternOp::Contains => Matcher::Regex(compile(pattern.to_string())?),
            PatternOp::Match => Matcher::Regex(compile(format!("^(?:{})", pattern))?),
            PatternOp::FullMatch => Matcher::Regex(compile(format!("^(?:{})$", pattern))?),
            PatternOp::StartsWith => Matcher::Prefix(pattern.to_string()),
            PatternOp::EndsWith => Matcher::Suffix(pattern.to_string()),
            PatternOp::Like => Matcher::Regex(compile(like_to_regex(pattern, false))?),
            PatternOp::ILike => Matcher::Regex(compile(like_to_regex(pattern, true))?),
        })
    }

    fn is_match(&self, s: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(s),
            Matcher::Prefix(p) => s.starts_with(p.as_str()),
            Matcher::Suffix(p) => s.ends_with(p.as_str()),
        }
    }
}

impl Predicate {
    /// One boolean per row. A comparison with a null is false except for
    /// `!=`, which is true; a negation flips either.
    pub fn evaluate(&self, frame: &Frame) -> ExprResult<Vec<bool>> {
        match self {
            Predicate::And(a, b) => {
                let (a, b) = (a.evaluate(frame)?, b.evaluate(frame)?);
                Ok(a.iter().zip(&b).map(|(x, y)| *x && *y).collect())
            }
            Predicate::Or(a, b) => {
                let (a, b) = (a.evaluate(frame)?, b.evaluate(frame)?);
                Ok(a.iter().zip(&b).map(|(x, y)| *x || *y).collect())
            }
            Predicate::Not(inner) => Ok(inner.evaluate(frame)?.into_iter().map(|x| !x).collect()),
            Predicate::Compare { left, op, right } => {
                let (a, b) = (left.evaluate(frame)?, right.evaluate(frame)?);
                Ok(a.iter().zip(&b).map(|(x, y)| op.test(x, y)).collect())
            }
            Predicate::IsNull { expr, negated } => Ok(expr
                .evaluate(frame)?
                .iter()
                .map(|v| v.is_null() != *negated)
                .collect()),
            Predicate::InList {
                expr,
                list,
                negated,
            } => {
                let values = expr.evaluate(frame)?;
                let options = list
                    .iter()
                    .map(|e| e.evaluate(frame))
                    .collect::<ExprResult<Vec<_>>>()?;
                Ok(values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let found = options
                            .iter()
                            .any(|o| v.compare(&o[i]) == Some(Ordering::Equal));
                        found != *negated
                    })
                    .collect())
            }
            Predicate::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let values = expr.evaluate(frame)?;
                let (low, high) = (low.evaluate(frame)?, high.evaluate(frame)?);
                Ok(values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let inside = CompareOp::GtEq.test(v, &low[i])
                            && CompareOp::LtEq.test(v, &high[i]);
                        inside != *negated
                    })
                    .collect())
            }
            Predicate::Pattern { expr, op, pattern } => {
                let matcher = Matcher::new(*op, pattern)?;
                Ok(expr
                    .evaluate(frame)?
                    .iter()
                    .map(|v| v.as_str().is_some_and(|s| matcher.is_match(s)))
                    .collect())
            }
            Predicate::StringTest { expr, test } => Ok(expr
                .evaluate(frame)?
                .iter()
                .map(|v| v.as_str().is_some_and(|s| test.test(s)))
                .collect()),
            Predicate::Duplicated { expr, keep } => {
                let keys: Vec<String> = expr.evaluate(frame)?.iter().map(CellValue::key).collect();
                Ok(duplicated(&keys, *keep))
            }
            Predicate::Truthy(expr) => Ok(expr
                .evaluate(frame)?
                .iter()
                .map(|v| v.as_bool().unwrap_or(false))
                .collect()),
        }
    }
}

fn duplicated(keys: &[String], keep: Keep) -> Vec<bool> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for key in keys {
        *counts.entry(key.as_str()).or_insert(0) += 1;
    }
    let mut seen: HashMap<&str, usize> = HashMap::new();
    keys.iter()
        .map(|key| {
            let total = counts[key.as_str()];
            let position = seen.entry(key.as_str()).or_insert(0);
            *position += 1;
            match keep {
                Keep::None => total > 1,
                Keep::First => *position > 1,
                Keep::Last => *position < total,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::students;

    fn mask(query: &str) -> Vec<bool> {
        parse_predicate(query).unwrap().evaluate(&students()).unwrap()
    }

    #[test]
    fn test_compare_and_logic() {
        assert_eq!(mask("id = 2"), vec![false, true, false, true]);
        assert_eq!(mask("id > 1 AND course = 'math'"), vec![false, true, false, true]);
        assert_eq!(mask("id = 1 OR course = 'physics'"), vec![true, false, true, false]);
        assert_eq!(mask("NOT (id = 1)"), vec![false, true, true, true]);
    }

    #[test]
    fn test_null_comparisons() {
        assert_eq!(mask("name = 'Bob'"), vec![false, true, false, true]);
        assert_eq!(mask("name != 'Bob'"), vec![true, false, true, false]);
        assert_eq!(mask("name IS NULL"), vec![false, false, true, false]);
        assert_eq!(mask("name > 'A'"), vec![true, true, false, true]);
        assert_eq!(mask("NOT (name = 'Bob')"), vec![true, false, true, false]);
    }

    #[test]
    fn test_in_list_and_between() {
        assert_eq!(mask("id IN (1, 3)"), vec![true, false, true, false]);
        assert_eq!(mask("id NOT IN (1, 3)"), vec![false, true, false, true]);
        assert_eq!(mask("id BETWEEN 2 AND 3"), vec![false, true, true, true]);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(mask("id * 2 = 4"), vec![false, true, false, true]);
        assert_eq!(mask("id % 2 = 1"), vec![true, false, true, false]);
    }

    #[test]
    fn test_dates_compare_with_text() {
        let frame = students().parse_dates(&["enrolled"]).unwrap();
        let predicate = parse_predicate("enrolled >= '2024-01-01'").unwrap();
        assert_eq!(
            predicate.evaluate(&frame).unwrap(),
            vec![false, true, false, true]
        );
    }

    #[test]
    fn test_patterns_skip_nulls() {
        assert_eq!(mask("str_contains(name, 'o')"), vec![false, true, false, true]);
        assert_eq!(mask("str_match(name, 'A')"), vec![true, false, false, false]);
        assert_eq!(mask("str_fullmatch(name, 'B')"), vec![false, false, false, false]);
        assert_eq!(mask("str_endswith(course, 'ics')"), vec![false, false, true, false]);
        assert_eq!(mask("NOT str_startswith(name, 'A')"), vec![false, true, true, true]);
        assert_eq!(mask("name LIKE 'B_b'"), vec![false, true, false, true]);
        assert_eq!(mask("name ILIKE 'a%'"), vec![true, false, false, false]);
    }

    #[test]
    fn test_string_tests() {
        assert!(StringTest::Title.test("Hello World"));
        assert!(!StringTest::Title.test("Hello world"));
        assert!(StringTest::Upper.test("ABC 1"));
        assert!(!StringTest::Lower.test("123"));
        assert!(StringTest::Digit.test("12²"));
        assert!(!StringTest::Decimal.test("12²"));
        assert!(!StringTest::Space.test(""));
        assert_eq!(mask("str_isalpha(name)"), vec![true, true, false, true]);
    }

    #[test]
    fn test_duplicated() {
        assert_eq!(mask("duplicated(id, 'none')"), vec![false, true, false, true]);
        assert_eq!(mask("duplicated(id, 'first')"), vec![false, false, false, true]);
        assert_eq!(mask("duplicated(id, 'last')"), vec![false, true, false, false]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_predicate("id = 1 extra"),
            Err(ExprError::Parse { .. })
        ));
        assert!(matches!(
            parse_predicate("lower(name) = 'x'"),
            Err(ExprError::Unsupported(_))
        ));
        let predicate = parse_predicate("missing = 1").unwrap();
        assert!(matches!(
            predicate.evaluate(&students()),
            Err(ExprError::UnknownColumn(_))
        ));
    }
}
