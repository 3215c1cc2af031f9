//! Minimal sandboxed expression language for `$where`-style filters.
//!
//! ```text
//! script  := ["return"] clause ("&&" clause)* [";"]
//! clause  := "true" | "false" | "sleep(" ms ")" | "this." path op literal
//! op      := "==" | "===" | "!=" | "!==" | "<" | "<=" | ">" | ">="
//! literal := number | 'text' | "text" | true | false | null
//! ```
//!
//! `sleep` does not block; it adds to the outcome's delay, which the store
//! awaits after releasing its locks, inside the query time bound.

use std::cmp::Ordering;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tessera_core::{EngineError, EngineResult};

use super::eval::{compare_values, values_equal};
use crate::native::{get_path, NativeDocument, NativeValue};

/// Result of evaluating a script against one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptOutcome {
    pub matched: bool,
    pub delay: Duration,
}

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^this\.([A-Za-z_][A-Za-z0-9_.]*)\s*(===|!==|==|!=|<=|>=|<|>)\s*(.+)$")
        .expect("comparison pattern is a valid regex")
});

fn script_error(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidQuery(format!("sandboxed expression: {}", msg.into()))
}

fn parse_literal(text: &str) -> EngineResult<NativeValue> {
    let text = text.trim();
    match text {
        "true" => return Ok(NativeValue::Bool(true)),
        "false" => return Ok(NativeValue::Bool(false)),
        "null" => return Ok(NativeValue::Null),
        _ => {}
    }
    for quote in ['\'', '"'] {
        if let Some(inner) = text
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(NativeValue::String(inner.to_string()));
        }
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(NativeValue::Int64(i));
    }
    text.parse::<f64>()
        .map(NativeValue::Double)
        .map_err(|_| script_error(format!("unsupported literal '{text}'")))
}

fn eval_clause(clause: &str, doc: &NativeDocument, delay: &mut Duration) -> EngineResult<bool> {
    match clause {
        "true" => return Ok(true),
        "false" => return Ok(false),
        _ => {}
    }
    if let Some(ms) = clause
        .strip_prefix("sleep(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let ms: u64 = ms
            .trim()
            .parse()
            .map_err(|_| script_error(format!("bad sleep argument '{ms}'")))?;
        *delay += Duration::from_millis(ms);
        return Ok(true);
    }
    let caps = COMPARISON
        .captures(clause)
        .ok_or_else(|| script_error(format!("unsupported clause '{clause}'")))?;
    let path = &caps[1];
    let literal = parse_literal(&caps[3])?;
    let actual = get_path(doc, path).unwrap_or(&NativeValue::Null);
    let ordering = compare_values(actual, &literal, None);
    Ok(match &caps[2] {
        "==" | "===" => values_equal(actual, &literal, None),
        "!=" | "!==" => !values_equal(actual, &literal, None),
        "<" => ordering == Some(Ordering::Less),
        "<=" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        ">" => ordering == Some(Ordering::Greater),
        ">=" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        op => return Err(script_error(format!("unsupported operator '{op}'"))),
    })
}

/// Evaluates `script` against `doc`. Clauses short-circuit left to right.
///
/// # Errors
///
/// Returns `InvalidQuery` for scripts outside the grammar.
pub fn evaluate(script: &str, doc: &NativeDocument) -> EngineResult<ScriptOutcome> {
    let mut body = script.trim();
    body = body.strip_prefix("return ").unwrap_or(body).trim();
    body = body.strip_suffix(';').unwrap_or(body).trim();
    if body.is_empty() {
        return Err(script_error("empty expression"));
    }
    let mut outcome = ScriptOutcome {
        matched: true,
        delay: Duration::ZERO,
    };
    for clause in body.split("&&") {
        if !eval_clause(clause.trim(), doc, &mut outcome.delay)? {
            outcome.matched = false;
            break;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> NativeDocument {
        let mut d = NativeDocument::new();
        d.insert("score".to_string(), NativeValue::Int64(10));
        d.insert("name".to_string(), NativeValue::str("ann"));
        d
    }

    #[test]
    fn comparisons() {
        assert!(evaluate("this.score > 5", &doc()).unwrap().matched);
        assert!(!evaluate("return this.score >= 11;", &doc()).unwrap().matched);
        assert!(evaluate("this.name == 'ann'", &doc()).unwrap().matched);
        assert!(evaluate("this.missing == null", &doc()).unwrap().matched);
    }

    #[test]
    fn sleep_accumulates_delay() {
        let out = evaluate("sleep(125) && true", &doc()).unwrap();
        assert!(out.matched);
        assert_eq!(out.delay, Duration::from_millis(125));
    }

    #[test]
    fn false_short_circuits() {
        let out = evaluate("false && sleep(500)", &doc()).unwrap();
        assert!(!out.matched);
        assert_eq!(out.delay, Duration::ZERO);
    }

    #[test]
    fn unsupported_input_is_rejected() {
        assert!(evaluate("db.dropDatabase()", &doc()).is_err());
        assert!(evaluate("", &doc()).is_err());
        assert!(evaluate("this.score > abc", &doc()).is_err());
    }
}
