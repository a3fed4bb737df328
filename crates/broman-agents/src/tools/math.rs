use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::calc;

static ALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9\s+\-*/()%.,]+$").expect("math charset regex should compile")
});

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MathArgs {
    pub expr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MathOutcome {
    pub expr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn run(args: &MathArgs) -> MathOutcome {
    if !ALLOWED.is_match(&args.expr) {
        return MathOutcome {
            expr: args.expr.clone(),
            result: None,
            error: Some("only digits and the characters +-*/()%., are allowed".to_string()),
        };
    }

    match calc::evaluate(&args.expr) {
        Ok(value) => MathOutcome {
            expr: args.expr.clone(),
            result: Some(value),
            error: None,
        },
        Err(e) => MathOutcome {
            expr: args.expr.clone(),
            result: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_expr(expr: &str) -> MathOutcome {
        run(&MathArgs {
            expr: expr.to_string(),
        })
    }

    #[test]
    fn rejects_letters_before_evaluating() {
        let outcome = run_expr("2 + sqrt(4)");
        assert!(outcome.result.is_none());
        assert!(outcome.error.unwrap().contains("only digits"));
    }

    #[test]
    fn captures_evaluator_errors() {
        let outcome = run_expr("1/0");
        assert_eq!(outcome.error.as_deref(), Some("math error: non-finite"));
    }

    #[test]
    fn evaluates_allowed_input() {
        assert_eq!(run_expr("(1,5 + 2) * 2").result, Some(7.0));
    }
}
