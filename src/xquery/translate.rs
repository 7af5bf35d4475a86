//! Rewrites the filter DSL into a boolean SQL expression.
//!
//! Quoted text is set aside first, so nothing inside a literal or a quoted
//! column name is rewritten. Double-quoted strings come back as single-quoted
//! literals and backticked names as double-quoted identifiers.
//!
//! Each translator is a regex plus a rewrite, applied in pipeline order:
//!
//! ```text
//! translator        input                       output
//! ----------------  --------------------------  -------------------------------
//! multiline         multiline text              single line
//! equals            ==  &&  &  ||  |  in [a,b]  =  AND  AND  OR  OR  IN (a,b)
//! is_na             col is na / is null         col IS NULL
//! is_not_na         col is not na / null        col IS NOT NULL
//! pattern_match     col contains 'x'            str_contains(col, 'x')
//!                   col matches 'x'             str_match(col, 'x')
//!                   col full matches 'x'        str_fullmatch(col, 'x')
//!                   col starts with 'x'         str_startswith(col, 'x')
//!                   col ends with 'x'           str_endswith(col, 'x')
//! string_test       col is alphanumeric         str_isalnum(col)
//!                   (alphabetic numeric digit decimal lowercase uppercase
//!                    titlecase space)
//! is_duplicated     col is [first|last] dup..   duplicated(col, 'none'|'first'|'last')
//! date              2023-12-27                  '2023-12-27'
//! ```
//!
//! Pattern matches take a `not col ...` negation, string tests a
//! `col is not ...` negation.
use anyhow::Result;
use regex::{Captures, Regex};
use std::sync::OnceLock;

type Rewrite = fn(&Captures) -> String;

struct TranslatorDef {
    name: &'static str,
    pattern: &'static str,
    rewrite: Rewrite,
}

const LITERAL: &str = r"'(?:[^']|'')*'";

// `{col}`, `{lit}`, `{pm}` and `{st}` are substituted when the pipeline is
// built.
static TRANSLATORS: &[TranslatorDef] = &[
    TranslatorDef {
        name: "multiline",
        pattern: r"\s+",
        rewrite: |_| " ".to_string(),
    },
    TranslatorDef {
        name: "equals",
        pattern: r"{lit}|==|\s*(&&?)\s*|\s*(\|\|?)\s*|(?i:\bin)\s*\[([^\]]*)\]",
        rewrite: |caps| {
            if caps.get(1).is_some() {
                " AND ".to_string()
            } else if caps.get(2).is_some() {
                " OR ".to_string()
            } else if let Some(items) = caps.get(3) {
                format!("IN ({})", items.as_str())
            } else if &caps[0] == "==" {
                "=".to_string()
            } else {
                caps[0].to_string()
            }
        },
    },
    TranslatorDef {
        name: "is_na",
        pattern: r"(?i)\s+is\s+(?:null|na)\b",
        rewrite: |_| " IS NULL".to_string(),
    },
    TranslatorDef {
        name: "is_not_na",
        pattern: r"(?i)\s+is\s+not\s+(?:null|na)\b",
        rewrite: |_| " IS NOT NULL".to_string(),
    },
    TranslatorDef {
        name: "pattern_match_negation",
        pattern: r"(?i)\bnot\s+({col})\s+({pm})\s+({lit})",
        rewrite: |caps| format!("NOT {}({}, {})", pattern_fn(&caps[2]), &caps[1], &caps[3]),
    },
    TranslatorDef {
        name: "pattern_match",
        pattern: r"(?i)({col})\s+({pm})\s+({lit})",
        rewrite: |caps| format!("{}({}, {})", pattern_fn(&caps[2]), &caps[1], &caps[3]),
    },
    TranslatorDef {
        name: "string_test_negation",
        pattern: r"(?i)({col})\s+is\s+not\s+({st})\b",
        rewrite: |caps| format!("NOT {}({})", string_test_fn(&caps[2]), &caps[1]),
    },
    TranslatorDef {
        name: "string_test",
        pattern: r"(?i)({col})\s+is\s+({st})\b",
        rewrite: |caps| format!("{}({})", string_test_fn(&caps[2]), &caps[1]),
    },
    TranslatorDef {
        name: "is_duplicated",
        pattern: r"(?i)({col})\s+is\s+(?:(first|last)\s+)?duplicated\b",
        rewrite: |caps| {
            let keep = caps
                .get(2)
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_else(|| "none".to_string());
            format!("duplicated({}, '{}')", &caps[1], keep)
        },
    },
    TranslatorDef {
        name: "date",
        pattern: r"(^|[^'\d-])(\d{4}-\d{2}-\d{2})\b",
        rewrite: |caps| format!("{}'{}'", &caps[1], &caps[2]),
    },
];

const COLUMN: &str = r#""[^"]+"|[\w.]+"#;
const PATTERN_OPS: &str = r"full\s+matches|matches|contains|starts\s+with|ends\s+with";
const STRING_TESTS: &str =
    r"alphanumeric|alphabetic|numeric|digit|decimal|lowercase|uppercase|titlecase|space";

fn pattern_fn(op: &str) -> &'static str {
    let op = op.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    match op.as_str() {
        "full matches" => "str_fullmatch",
        "matches" => "str_match",
        "starts with" => "str_startswith",
        "ends with" => "str_endswith",
        _ => "str_contains",
    }
}

fn string_test_fn(op: &str) -> &'static str {
    match op.to_lowercase().as_str() {
        "alphanumeric" => "str_isalnum",
        "alphabetic" => "str_isalpha",
        "numeric" => "str_isnumeric",
        "digit" => "str_isdigit",
        "decimal" => "str_isdecimal",
        "lowercase" => "str_islower",
        "uppercase" => "str_isupper",
        "titlecase" => "str_istitle",
        _ => "str_isspace",
    }
}

struct Translator {
    name: &'static str,
    regex: Regex,
    rewrite: Rewrite,
}

impl Translator {
    fn compile(def: &TranslatorDef) -> Result<Self> {
        let pattern = def
            .pattern
            .replace("{col}", COLUMN)
            .replace("{lit}", LITERAL)
            .replace("{pm}", PATTERN_OPS)
            .replace("{st}", STRING_TESTS);
        Ok(Self {
            name: def.name,
            regex: Regex::new(&pattern)?,
            rewrite: def.rewrite,
        })
    }

    fn apply(&self, text: &str) -> String {
        let rewrite = self.rewrite;
        self.regex
            .replace_all(text, |caps: &Captures| rewrite(caps))
            .into_owned()
    }
}

const QUOTED: &str = r#"'(?:[^']|'')*'|"([^"]*)"|`([^`]*)`"#;
const PLACEHOLDER: &str = r#"['"]#(\d+)['"]"#;

/// The compiled translator pipeline.
pub struct Pipeline {
    translators: Vec<Translator>,
    quoted: Regex,
    placeholder: Regex,
}

static PIPELINE: OnceLock<Pipeline> = OnceLock::new();

impl Pipeline {
    fn new() -> Result<Self> {
        let translators = TRANSLATORS
            .iter()
            .map(Translator::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            translators,
            quoted: Regex::new(QUOTED)?,
            placeholder: Regex::new(PLACEHOLDER)?,
        })
    }

    /// Shared pipeline, compiled on first use.
    pub fn get() -> Result<&'static Pipeline> {
        if let Some(pipeline) = PIPELINE.get() {
            return Ok(pipeline);
        }
        let pipeline = Self::new()?;
        Ok(PIPELINE.get_or_init(|| pipeline))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.translators.iter().map(|t| t.name).collect()
    }

    pub fn translate(&self, query: &str) -> String {
        let (mut text, quoted) = self.mask(query.trim());
        for translator in &self.translators {
            text = translator.apply(&text);
        }
        self.unmask(text.trim(), &quoted)
    }

    /// Replace every quoted string with a numbered placeholder that still
    /// reads as a literal (`'#0'`) or a quoted column (`"#1"`).
    fn mask(&self, query: &str) -> (String, Vec<String>) {
        let mut quoted = Vec::new();
        let text = self
            .quoted
            .replace_all(query, |caps: &Captures| {
                let n = quoted.len();
                if let Some(name) = caps.get(2) {
                    quoted.push(format!("\"{}\"", name.as_str()));
                    format!("\"#{}\"", n)
                } else {
                    let literal = match caps.get(1) {
                        Some(text) => format!("'{}'", text.as_str().replace('\'', "''")),
                        None => caps[0].to_string(),
                    };
                    quoted.push(literal);
                    format!("'#{}'", n)
                }
            })
            .into_owned();
        (text, quoted)
    }

    fn unmask(&self, text: &str, quoted: &[String]) -> String {
        self.placeholder
            .replace_all(text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| quoted.get(n))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Translate a filter query into a boolean SQL expression.
pub fn compile_query(query: &str) -> Result<String> {
    Ok(Pipeline::get()?.translate(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(query: &str) -> String {
        compile_query(query).unwrap()
    }

    #[test]
    fn test_pipeline_order() {
        let names = Pipeline::get().unwrap().names();
        assert_eq!(names.first(), Some(&"multiline"));
        assert_eq!(names.last(), Some(&"date"));
    }

    #[test]
    fn test_multiline_and_equals() {
        assert_eq!(compile("a == 1\n   &&   b != 2"), "a = 1 AND b != 2");
        assert_eq!(compile("a == 1 || b == 2"), "a = 1 OR b = 2");
    }

    #[test]
    fn test_quotes() {
        assert_eq!(compile(r#"name == "it's""#), "name = 'it''s'");
        assert_eq!(compile("`first name` == 'x'"), "\"first name\" = 'x'");
    }

    #[test]
    fn test_literals_are_left_alone() {
        assert_eq!(compile("name == 'a || b'"), "name = 'a || b'");
        assert_eq!(compile("name == 'this is na'"), "name = 'this is na'");
        assert_eq!(compile("note == 'from 2024-01-01'"), "note = 'from 2024-01-01'");
        assert_eq!(compile("note == \"a  &&  b\""), "note = 'a  &&  b'");
        assert_eq!(
            compile("`first name` contains 'is null'"),
            "str_contains(\"first name\", 'is null')"
        );
    }

    #[test]
    fn test_lists() {
        assert_eq!(compile("course in ['math', 'art']"), "course IN ('math', 'art')");
        assert_eq!(compile("id not in [1, 2]"), "id not IN (1, 2)");
    }

    #[test]
    fn test_is_na() {
        assert_eq!(compile("name is na"), "name IS NULL");
        assert_eq!(compile("name is NOT null and id > 1"), "name IS NOT NULL and id > 1");
    }

    #[test]
    fn test_pattern_match() {
        assert_eq!(compile("name contains 'li'"), "str_contains(name, 'li')");
        assert_eq!(compile("name full matches '^A.*'"), "str_fullmatch(name, '^A.*')");
        assert_eq!(compile("name starts with 'A'"), "str_startswith(name, 'A')");
        assert_eq!(compile("not name ends with 'b'"), "NOT str_endswith(name, 'b')");
    }

    #[test]
    fn test_string_test() {
        assert_eq!(compile("code is numeric"), "str_isnumeric(code)");
        assert_eq!(compile("code is not uppercase"), "NOT str_isupper(code)");
    }

    #[test]
    fn test_is_duplicated() {
        assert_eq!(compile("id is duplicated"), "duplicated(id, 'none')");
        assert_eq!(compile("id is first duplicated"), "duplicated(id, 'first')");
        assert_eq!(compile("id is last duplicated"), "duplicated(id, 'last')");
    }

    #[test]
    fn test_date() {
        assert_eq!(compile("enrolled >= 2024-01-01"), "enrolled >= '2024-01-01'");
        assert_eq!(compile("enrolled >= '2024-01-01'"), "enrolled >= '2024-01-01'");
    }
}
