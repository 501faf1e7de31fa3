//! Restricted arithmetic expression evaluator (`calc_eval`).
//!
//! Accepts numeric literals, parentheses, unary `+`/`-`, and the operators
//! `+ - * / // % **` (with `^` as a synonym for `**`). Anything else is
//! `ErrSyntax`; division, floor-division, and modulo by zero are `ErrMath`.
//! `**` is right-associative and binds tighter than unary minus, so
//! `-2**2` is `-4`.

use super::{arg, Args, OpContext, OpRegistry};
use alp_core::value::float_value;
use alp_core::{AlpError, Result};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    Percent,
    Power,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = expr.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    tokens.push(Token::Power);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '^' => {
                tokens.push(Token::Power);
                i += 1;
            }
            '/' => {
                if bytes.get(i + 1) == Some(&b'/') {
                    tokens.push(Token::FloorDiv);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && matches!(bytes[i] as char, '0'..='9' | '.') {
                    i += 1;
                }
                // exponent suffix: 1e9, 2.5E-3
                if i < bytes.len() && matches!(bytes[i] as char, 'e' | 'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && matches!(bytes[j] as char, '+' | '-') {
                        j += 1;
                    }
                    if j < bytes.len() && (bytes[j] as char).is_ascii_digit() {
                        i = j;
                        while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal = &expr[start..i];
                let value: f64 = literal.parse().map_err(|_| {
                    AlpError::syntax(format!("invalid numeric literal '{literal}'"))
                })?;
                tokens.push(Token::Number(value));
            }
            other => {
                return Err(AlpError::syntax(format!(
                    "unexpected character '{other}' in expression"
                )))
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser / evaluator
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr := term (('+'|'-') term)*
    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat(Token::Plus) {
                value += self.term()?;
            } else if self.eat(Token::Minus) {
                value -= self.term()?;
            } else {
                break;
            }
        }
        Ok(value)
    }

    // term := factor (('*'|'/'|'//'|'%') factor)*
    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        loop {
            if self.eat(Token::Star) {
                value *= self.factor()?;
            } else if self.eat(Token::Slash) {
                let divisor = self.factor()?;
                if divisor == 0.0 {
                    return Err(AlpError::math("division by zero"));
                }
                value /= divisor;
            } else if self.eat(Token::FloorDiv) {
                let divisor = self.factor()?;
                if divisor == 0.0 {
                    return Err(AlpError::math("floor division by zero"));
                }
                value = (value / divisor).floor();
            } else if self.eat(Token::Percent) {
                let divisor = self.factor()?;
                if divisor == 0.0 {
                    return Err(AlpError::math("modulo by zero"));
                }
                // sign follows the divisor
                value -= divisor * (value / divisor).floor();
            } else {
                break;
            }
        }
        Ok(value)
    }

    // factor := ('+'|'-') factor | power
    fn factor(&mut self) -> Result<f64> {
        if self.eat(Token::Plus) {
            self.factor()
        } else if self.eat(Token::Minus) {
            Ok(-self.factor()?)
        } else {
            self.power()
        }
    }

    // power := atom ('**' factor)?   — right-associative, signed exponents
    fn power(&mut self) -> Result<f64> {
        let base = self.atom()?;
        if self.eat(Token::Power) {
            let exponent = self.factor()?;
            Ok(base.powf(exponent))
        } else {
            Ok(base)
        }
    }

    fn atom(&mut self) -> Result<f64> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                if self.eat(Token::RParen) {
                    Ok(value)
                } else {
                    Err(AlpError::syntax("missing closing parenthesis"))
                }
            }
            Some(other) => Err(AlpError::syntax(format!(
                "unexpected token {other:?} in expression"
            ))),
            None => Err(AlpError::syntax("unexpected end of expression")),
        }
    }
}

/// Evaluate a restricted arithmetic expression to a float.
pub fn eval_expr(expr: &str) -> Result<f64> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(AlpError::syntax("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(AlpError::syntax("trailing tokens in expression"));
    }
    Ok(value)
}

fn op_calc_eval(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let expr = match arg(args, "expr") {
        // Tolerate a nested {expr: …} object, as emitted by some models.
        Some(Value::Object(inner)) => inner.get("expr").and_then(Value::as_str),
        Some(Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
    .ok_or_else(|| AlpError::op("calc_eval requires string 'expr'"))?;
    Ok(json!({"value": float_value(eval_expr(expr)?)}))
}

fn op_to_calc_result(args: &Args, _ctx: &OpContext<'_>) -> Result<Value> {
    let value = arg(args, "value")
        .and_then(alp_core::value::as_number)
        .unwrap_or(0.0);
    Ok(json!({"value": float_value(value)}))
}

pub fn register(registry: &mut OpRegistry) {
    registry.register("calc_eval", op_calc_eval);
    registry.register("to_calc_result", op_to_calc_result);
}

#[cfg(test)]
mod tests {
    use super::super::testing::invoke;
    use super::*;
    use alp_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn precedence_and_parens() {
        assert_eq!(eval_expr("2+2*3").unwrap(), 8.0);
        assert_eq!(eval_expr("(2+2)*3").unwrap(), 12.0);
        assert_eq!(eval_expr("10-4-3").unwrap(), 3.0);
    }

    #[test]
    fn power_is_right_associative() {
        assert_eq!(eval_expr("2**3**2").unwrap(), 512.0);
        assert_eq!(eval_expr("2^3^2").unwrap(), 512.0);
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        assert_eq!(eval_expr("-2**2").unwrap(), -4.0);
        assert_eq!(eval_expr("2**-1").unwrap(), 0.5);
        assert_eq!(eval_expr("--3").unwrap(), 3.0);
    }

    #[test]
    fn floor_div_and_modulo() {
        assert_eq!(eval_expr("7//2").unwrap(), 3.0);
        assert_eq!(eval_expr("-7//2").unwrap(), -4.0);
        assert_eq!(eval_expr("7%3").unwrap(), 1.0);
        // modulo takes the sign of the divisor
        assert_eq!(eval_expr("-7%3").unwrap(), 2.0);
    }

    #[test]
    fn division_by_zero_is_math_error() {
        assert_eq!(eval_expr("1/0").unwrap_err().kind(), ErrorKind::Math);
        assert_eq!(eval_expr("1//0").unwrap_err().kind(), ErrorKind::Math);
        assert_eq!(eval_expr("1%0").unwrap_err().kind(), ErrorKind::Math);
    }

    #[test]
    fn non_arithmetic_tokens_are_syntax_errors() {
        assert_eq!(
            eval_expr("os.system('x')").unwrap_err().kind(),
            ErrorKind::Syntax
        );
        assert_eq!(eval_expr("1 + x").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(eval_expr("(1+2").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(eval_expr("1 2").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(eval_expr("").unwrap_err().kind(), ErrorKind::Syntax);
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(eval_expr("1e3").unwrap(), 1000.0);
        assert_eq!(eval_expr("2.5e-1").unwrap(), 0.25);
    }

    #[test]
    fn calc_eval_op_wraps_value() {
        assert_eq!(
            invoke("calc_eval", json!({"expr": "2+2*3"})).unwrap(),
            json!({"value": 8.0})
        );
        assert_eq!(
            invoke("calc_eval", json!({"expr": {"expr": "3*3"}})).unwrap(),
            json!({"value": 9.0})
        );
        assert_eq!(
            invoke("calc_eval", json!({"expr": "1/0"})).unwrap_err().kind(),
            ErrorKind::Math
        );
    }

    #[test]
    fn to_calc_result_coerces() {
        assert_eq!(
            invoke("to_calc_result", json!({"value": 4})).unwrap(),
            json!({"value": 4.0})
        );
        assert_eq!(
            invoke("to_calc_result", json!({})).unwrap(),
            json!({"value": 0.0})
        );
    }
}
