// SPDX-FileCopyrightText: Copyright © 2020-2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Evaluator for the `${{ expr }}` placeholder language and `if` conditions.
//!
//! The grammar is a small recursive-descent expression language over field
//! access paths (`Env.NAME`, `Modules.id.Output.key`, `Version.Major`),
//! literals, and the usual arithmetic/comparison/boolean operators. Field
//! resolution is delegated to a [`Lookup`] implementation so this crate has
//! no knowledge of the manifest or executor types that own the data.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{cut, map, opt, recognize, value},
    multi::{many0, many0_count, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use thiserror::Error;

mod value;

pub use value::Value;

/// Resolves `Env.NAME`, `Modules.<id>.Output.<key>`, `Version.Major` style
/// field-access paths into a [`Value`].
pub trait Lookup {
    fn lookup(&self, path: &[&str]) -> Option<Value>;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse expression `{0}`")]
    Parse(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("expression did not evaluate to a boolean: `{0}`")]
    NotBoolean(String),
    #[error("expression produced an unsupported output type: `{0}`")]
    UnknownExprOutputType(String),
}

/// Evaluate `expr` (the body between `${{` and `}}`, already trimmed) and
/// stringify the scalar result.
pub fn eval(expr: &str, ctx: &impl Lookup) -> Result<String, Error> {
    let value = eval_value(expr, ctx)?;
    value
        .stringify()
        .ok_or_else(|| Error::UnknownExprOutputType(expr.to_owned()))
}

/// Evaluate `expr` and require a boolean result, as used by `if` conditions.
pub fn eval_bool(expr: &str, ctx: &impl Lookup) -> Result<bool, Error> {
    match eval_value(expr, ctx)? {
        Value::Bool(b) => Ok(b),
        _ => Err(Error::NotBoolean(expr.to_owned())),
    }
}

fn eval_value(expr: &str, ctx: &impl Lookup) -> Result<Value, Error> {
    let ast = parse(expr).map_err(|_| Error::Parse(expr.to_owned()))?;
    ast.eval(ctx)
}

fn parse(input: &str) -> Result<Expr, nom::Err<nom::error::Error<&str>>> {
    let (rest, expr) = delimited(multispace0, or_expr, multispace0)(input)?;
    if !rest.is_empty() {
        return Err(nom::Err::Error(nom::error::Error::new(
            rest,
            nom::error::ErrorKind::Eof,
        )));
    }
    Ok(expr)
}

/// Scans `template` for `${{ ... }}` occurrences and replaces each with its
/// stringified evaluation. Strings without placeholders are returned
/// unchanged (the function is idempotent on placeholder-free input).
pub fn resolve_placeholders(template: &str, ctx: &impl Lookup) -> Result<String, Error> {
    const OPEN: &str = "${{";
    const CLOSE: &str = "}}";

    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        let Some(start) = rest.find(OPEN) else {
            output.push_str(rest);
            break;
        };

        output.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let Some(end) = after_open.find(CLOSE) else {
            // No closing delimiter; treat the rest as plain text.
            output.push_str(&rest[start..]);
            break;
        };

        let inner = after_open[..end].trim();
        let value = eval(inner, ctx)?;
        output.push_str(&value);

        rest = &after_open[end + CLOSE.len()..];
    }

    Ok(output)
}

/// True if `template` contains a `${{ Modules. ... }}` reference, meaning its
/// resolved value depends on another module's runtime output and is
/// therefore not cacheable.
pub fn references_module_output(template: &str) -> bool {
    let mut rest = template;
    while let Some(start) = rest.find("${{") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("}}") else { break };
        let inner = after[..end].trim();
        if inner.starts_with("Modules.") || inner.starts_with("Modules ") {
            return true;
        }
        rest = &after[end + 2..];
    }
    false
}

/// True if `template` contains any `${{ ... }}` placeholder at all.
pub fn has_placeholder(template: &str) -> bool {
    template.contains("${{") && template.contains("}}")
}

/// Recursively resolves placeholders in every string (including strings
/// nested in arrays/objects) of a `serde_json::Value`, mirroring the
/// reflection-driven walk spec.md §4.1 describes for arbitrary module
/// bodies: string, slice-of-string, and string-map fields are rewritten;
/// every other kind of field passes through untouched.
pub fn resolve_json(value: serde_json::Value, ctx: &impl Lookup) -> Result<serde_json::Value, Error> {
    Ok(match value {
        serde_json::Value::String(s) => serde_json::Value::String(resolve_placeholders(&s, ctx)?),
        serde_json::Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve_json(item, ctx)?);
            }
            serde_json::Value::Array(resolved)
        }
        serde_json::Value::Object(map) => {
            let mut resolved = serde_json::Map::new();
            for (k, v) in map {
                resolved.insert(k, resolve_json(v, ctx)?);
            }
            serde_json::Value::Object(resolved)
        }
        other => other,
    })
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Field(Vec<String>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        };
        f.write_str(s)
    }
}

impl Expr {
    fn eval(&self, ctx: &impl Lookup) -> Result<Value, Error> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field(path) => {
                let refs = path.iter().map(String::as_str).collect::<Vec<_>>();
                ctx.lookup(&refs)
                    .ok_or_else(|| Error::UnknownField(path.join(".")))
            }
            Expr::Unary(op, inner) => {
                let value = inner.eval(ctx)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnaryOp::Neg => value.negate().ok_or_else(|| Error::Parse("unary -".to_owned())),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = lhs.eval(ctx)?;
                // Short-circuit && / ||.
                match op {
                    BinOp::And if !lhs.truthy() => return Ok(Value::Bool(false)),
                    BinOp::Or if lhs.truthy() => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let rhs = rhs.eval(ctx)?;
                value::apply_binop(*op_tag(op), lhs, rhs).ok_or_else(|| Error::Parse(op.to_string()))
            }
        }
    }
}

fn op_tag(op: &BinOp) -> &BinOp {
    op
}

// --- grammar, lowest to highest precedence ---

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("||")), cut(and_expr)))(input)?;
    Ok((input, fold_left(first, rest, BinOp::Or)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = equality_expr(input)?;
    let (input, rest) = many0(preceded(ws(tag("&&")), cut(equality_expr)))(input)?;
    Ok((input, fold_left(first, rest, BinOp::And)))
}

fn equality_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = relational_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((value(BinOp::Eq, tag("==")), value(BinOp::Ne, tag("!="))))),
        cut(relational_expr),
    ))(input)?;
    Ok((input, fold_pairs(first, rest)))
}

fn relational_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = additive_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::Le, tag("<=")),
            value(BinOp::Ge, tag(">=")),
            value(BinOp::Lt, tag("<")),
            value(BinOp::Gt, tag(">")),
        ))),
        cut(additive_expr),
    ))(input)?;
    Ok((input, fold_pairs(first, rest)))
}

fn additive_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = multiplicative_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((value(BinOp::Add, tag("+")), value(BinOp::Sub, tag("-"))))),
        cut(multiplicative_expr),
    ))(input)?;
    Ok((input, fold_pairs(first, rest)))
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary_expr(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinOp::Mul, tag("*")),
            value(BinOp::Div, tag("/")),
            value(BinOp::Rem, tag("%")),
        ))),
        cut(unary_expr),
    ))(input)?;
    Ok((input, fold_pairs(first, rest)))
}

fn unary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('!')), unary_expr), |e| {
            Expr::Unary(UnaryOp::Not, Box::new(e))
        }),
        map(preceded(ws(char('-')), unary_expr), |e| {
            Expr::Unary(UnaryOp::Neg, Box::new(e))
        }),
        primary_expr,
    ))(input)
}

fn primary_expr(input: &str) -> IResult<&str, Expr> {
    delimited(
        multispace0,
        alt((
            delimited(char('('), or_expr, cut(ws(char(')')))),
            map(float_literal, |f| Expr::Literal(Value::Float(f))),
            map(int_literal, |i| Expr::Literal(Value::Int(i))),
            map(bool_literal, |b| Expr::Literal(Value::Bool(b))),
            map(string_literal, |s| Expr::Literal(Value::Str(s))),
            map(field_path, Expr::Field),
        )),
        multispace0,
    )(input)
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn field_path(input: &str) -> IResult<&str, Vec<String>> {
    map(separated_list1(char('.'), identifier), |parts| {
        parts.into_iter().map(str::to_owned).collect()
    })(input)
}

fn bool_literal(input: &str) -> IResult<&str, bool> {
    alt((value(true, tag("true")), value(false, tag("false"))))(input)
}

fn int_literal(input: &str) -> IResult<&str, i64> {
    map(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse().unwrap_or_default()
    })(input)
}

fn float_literal(input: &str) -> IResult<&str, f64> {
    map(
        recognize(tuple((opt(char('-')), digit1, char('.'), digit1))),
        |s: &str| s.parse().unwrap_or_default(),
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    alt((quoted('\''), quoted('"')))(input)
}

fn quoted<'a>(q: char) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    move |input: &'a str| {
        let (input, s) = delimited(
            char(q),
            nom::bytes::complete::take_till(move |c| c == q),
            char(q),
        )(input)?;
        Ok((input, s.to_owned()))
    }
}

fn fold_left(first: Expr, rest: Vec<Expr>, op: BinOp) -> Expr {
    rest.into_iter().fold(first, |acc, next| Expr::Binary(op, Box::new(acc), Box::new(next)))
}

fn fold_pairs(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter()
        .fold(first, |acc, (op, next)| Expr::Binary(op, Box::new(acc), Box::new(next)))
}

#[cfg(test)]
mod test {
    use super::*;

    struct Fixed;

    impl Lookup for Fixed {
        fn lookup(&self, path: &[&str]) -> Option<Value> {
            match path {
                ["Env", "NAME"] => Some(Value::Str("buddy".into())),
                ["Version", "Major"] => Some(Value::Int(2)),
                ["Modules", "base", "Output", "id"] => Some(Value::Str("abc123".into())),
                _ => None,
            }
        }
    }

    #[test]
    fn literal_roundtrip() {
        assert_eq!(eval("1 + 2", &Fixed).unwrap(), "3");
        assert_eq!(eval("'hi' ", &Fixed).unwrap(), "hi");
        assert_eq!(eval_bool("true && !false", &Fixed).unwrap(), true);
    }

    #[test]
    fn field_access() {
        assert_eq!(eval("Env.NAME", &Fixed).unwrap(), "buddy");
        assert_eq!(eval("Version.Major", &Fixed).unwrap(), "2");
        assert_eq!(eval("Modules.base.Output.id", &Fixed).unwrap(), "abc123");
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval_bool("Version.Major >= 2", &Fixed).unwrap(), true);
        assert_eq!(eval_bool("Env.NAME == 'buddy'", &Fixed).unwrap(), true);
        assert_eq!(eval_bool("Env.NAME != 'buddy'", &Fixed).unwrap(), false);
    }

    #[test]
    fn resolves_placeholders_in_templates() {
        let resolved = resolve_placeholders("hello ${{ Env.NAME }}, v${{ Version.Major }}", &Fixed).unwrap();
        assert_eq!(resolved, "hello buddy, v2");
    }

    #[test]
    fn idempotent_without_placeholders() {
        let plain = "no placeholders here";
        assert_eq!(resolve_placeholders(plain, &Fixed).unwrap(), plain);
    }

    #[test]
    fn detects_module_output_refs() {
        assert!(references_module_output("${{ Modules.base.Output.id }}"));
        assert!(!references_module_output("${{ Env.NAME }}"));
    }

    #[test]
    fn unknown_field_errors() {
        assert!(eval("Env.MISSING", &Fixed).is_err());
    }
}
