use minijinja::value::{Value, ValueKind, ViaDeserialize};
use minijinja::{Environment, Error};

use crate::aggspec::AggSpec;
use crate::frame::quote_literal;

pub fn register(env: &mut Environment<'_>) {
    env.add_filter("aggregate", aggregate);
    env.add_filter("quote", quote);
    env.add_filter("in_list", in_list);
    env.add_filter("ident", ident);
    env.add_filter("conditions", conditions);
}

/// `{{ spec | aggregate }}` renders one aggregation spec.
fn aggregate(spec: ViaDeserialize<AggSpec>) -> String {
    spec.0.to_sql()
}

fn quote(value: Value) -> String {
    literal(&value)
}

/// `('a', 'b', 3)`
fn in_list(values: Vec<Value>) -> String {
    let items: Vec<String> = values.iter().map(literal).collect();
    format!("({})", items.join(", "))
}

fn literal(value: &Value) -> String {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None => "NULL".to_string(),
        ValueKind::Number => value.to_string(),
        ValueKind::Bool => {
            if value.is_true() {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        _ => match value.as_str() {
            Some(s) => quote_literal(s),
            None => quote_literal(&value.to_string()),
        },
    }
}

/// Quote each dotted part of an identifier unless it is a plain lowercase name.
pub fn ident(name: String) -> String {
    name.split('.')
        .map(|part| {
            let plain = part
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if plain {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// A single condition as is, or a list of conditions joined with AND.
fn conditions(value: Value) -> Result<String, Error> {
    if let Some(s) = value.as_str() {
        return Ok(s.to_string());
    }
    let parts: Vec<String> = value
        .try_iter()?
        .map(|item| match item.as_str() {
            Some(s) => format!("({})", s),
            None => format!("({})", item),
        })
        .collect();
    Ok(parts.join("\n  AND "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    fn env() -> Environment<'static> {
        let mut env = Environment::new();
        register(&mut env);
        env
    }

    #[test]
    fn test_quote_and_in_list() {
        let env = env();
        let out = env
            .render_str(
                "{{ name | quote }} {{ ids | in_list }}",
                context! { name => "O'Brien", ids => vec![Value::from("a"), Value::from(3)] },
            )
            .unwrap();
        assert_eq!(out, "'O''Brien' ('a', 3)");
    }

    #[test]
    fn test_ident() {
        assert_eq!(ident("students".into()), "students");
        assert_eq!(ident("public.Students".into()), "public.\"Students\"");
        assert_eq!(ident("my table".into()), "\"my table\"");
    }

    #[test]
    fn test_conditions() {
        let env = env();
        let single = env
            .render_str("{{ w | conditions }}", context! { w => "a = 1" })
            .unwrap();
        assert_eq!(single, "a = 1");
        let many = env
            .render_str("{{ w | conditions }}", context! { w => vec!["a = 1", "b = 2"] })
            .unwrap();
        assert_eq!(many, "(a = 1)\n  AND (b = 2)");
    }

    #[test]
    fn test_aggregate_filter() {
        let env = env();
        let out = env
            .render_str(
                "{{ spec | aggregate }}",
                context! { spec => serde_json::json!({"aggfunc": "SUM", "column": "amount", "name": "total"}) },
            )
            .unwrap();
        assert_eq!(out, "SUM(amount) AS total");
    }
}
