//! Safe arithmetic over `+ - * / % ( )` and decimal numerals.
//!
//! Input is tokenized, rearranged into postfix order with the shunting-yard
//! algorithm, then evaluated on a value stack. Nothing is ever handed to a
//! general-purpose interpreter.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("math error: {0}")]
    Math(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Op {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(Op::Add),
            '-' => Some(Op::Sub),
            '*' => Some(Op::Mul),
            '/' => Some(Op::Div),
            '%' => Some(Op::Rem),
            _ => None,
        }
    }

    /// Higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Op::Add | Op::Sub => 1,
            Op::Mul | Op::Div | Op::Rem => 2,
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Op::Add => a + b,
            Op::Sub => a - b,
            Op::Mul => a * b,
            Op::Div => a / b,
            Op::Rem => a % b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Num(f64),
    Op(Op),
    LParen,
    RParen,
}

/// Evaluate an infix expression to a finite number.
pub fn evaluate(expr: &str) -> Result<f64, ExprError> {
    let normalized: String = expr
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if normalized.is_empty() {
        return Err(ExprError::Parse("empty expression".to_string()));
    }

    let tokens = tokenize(&normalized)?;
    let postfix = to_postfix(&tokens)?;
    eval_postfix(&postfix)
}

/// Split a whitespace-free expression into tokens, left to right.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            if literal.matches('.').count() > 1 {
                return Err(ExprError::Parse(format!("malformed number '{literal}'")));
            }
            let value = literal
                .parse::<f64>()
                .map_err(|_| ExprError::Parse(format!("malformed number '{literal}'")))?;
            tokens.push(Token::Num(value));
            continue;
        }

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            _ => match Op::from_char(c) {
                Some(op) => Token::Op(op),
                None => return Err(ExprError::Parse(format!("invalid char '{c}'"))),
            },
        };
        tokens.push(token);
        i += 1;
    }

    Ok(tokens)
}

/// Shunting-yard. Equal precedence pops first, so operators are left-associative.
pub fn to_postfix(tokens: &[Token]) -> Result<Vec<Token>, ExprError> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::new();

    for &token in tokens {
        match token {
            Token::Num(_) => output.push(token),
            Token::Op(incoming) => {
                while let Some(&Token::Op(top)) = stack.last() {
                    if top.precedence() < incoming.precedence() {
                        break;
                    }
                    output.push(Token::Op(top));
                    stack.pop();
                }
                stack.push(token);
            }
            Token::LParen => stack.push(token),
            Token::RParen => loop {
                match stack.pop() {
                    Some(Token::LParen) => break,
                    Some(op) => output.push(op),
                    None => return Err(ExprError::Parse("unbalanced )".to_string())),
                }
            },
        }
    }

    while let Some(token) = stack.pop() {
        if token == Token::LParen {
            return Err(ExprError::Parse("unbalanced (".to_string()));
        }
        output.push(token);
    }

    Ok(output)
}

pub fn eval_postfix(postfix: &[Token]) -> Result<f64, ExprError> {
    let mut values: Vec<f64> = Vec::new();

    for &token in postfix {
        match token {
            Token::Num(value) => values.push(value),
            Token::Op(op) => {
                let (Some(b), Some(a)) = (values.pop(), values.pop()) else {
                    return Err(ExprError::Parse("bad expression".to_string()));
                };
                let result = op.apply(a, b);
                if !result.is_finite() {
                    return Err(ExprError::Math("non-finite".to_string()));
                }
                values.push(result);
            }
            Token::LParen | Token::RParen => {
                return Err(ExprError::Parse("bad expression".to_string()));
            }
        }
    }

    match values.as_slice() {
        [value] => Ok(*value),
        _ => Err(ExprError::Parse("bad expression".to_string())),
    }
}
