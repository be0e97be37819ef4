//! Condition evaluation for step gating
//!
//! Small boolean expression language over the variable context:
//! comparisons (`==`, `!=`, `<`, `<=`, `>`, `>=`), logical `&&`/`||`/`!`,
//! parentheses, `exists(name)`, string/number/bool literals, and bare
//! variable references. An undefined variable evaluates as null, and null
//! never satisfies a comparison, so a condition over missing variables is
//! simply false — conditions gate optional steps, they are not assertions.

use crate::error::{EngineError, EngineResult};
use crate::variables::{VariableContext, VariableValue};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Bool(bool),
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Variable(String),
    Literal(VariableValue),
    Exists(String),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Evaluate a condition expression against the context.
pub fn evaluate(expression: &str, context: &VariableContext) -> EngineResult<bool> {
    let expr = parse(expression)?;
    Ok(eval(&expr, context).is_truthy())
}

fn parse(expression: &str) -> EngineResult<Expr> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::Validation(format!(
            "unexpected trailing input in condition '{expression}'"
        )));
    }
    Ok(expr)
}

fn tokenize(input: &str) -> EngineResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i == chars.len() {
                    return Err(EngineError::Validation(format!(
                        "unterminated string in condition '{input}'"
                    )));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| {
                    EngineError::Validation(format!("invalid number '{text}' in condition"))
                })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(word)),
                }
            }
            other => {
                return Err(EngineError::Validation(format!(
                    "unexpected character '{other}' in condition '{input}'"
                )))
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> EngineResult<Expr> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.next();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> EngineResult<Expr> {
        let mut left = self.comparison()?;
        while self.peek() == Some(&Token::And) {
            self.next();
            let right = self.comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comparison(&mut self) -> EngineResult<Expr> {
        let left = self.unary()?;
        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            _ => return Ok(left),
        };
        self.next();
        let right = self.unary()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn unary(&mut self) -> EngineResult<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.next();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> EngineResult<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(expr),
                    _ => Err(EngineError::Validation(
                        "missing closing parenthesis in condition".to_string(),
                    )),
                }
            }
            Some(Token::Ident(name)) if name == "exists" && self.peek() == Some(&Token::LParen) => {
                self.next();
                let inner = match self.next() {
                    Some(Token::Ident(var)) => var,
                    Some(Token::Str(var)) => var,
                    _ => {
                        return Err(EngineError::Validation(
                            "exists() requires a variable name".to_string(),
                        ))
                    }
                };
                match self.next() {
                    Some(Token::RParen) => Ok(Expr::Exists(inner)),
                    _ => Err(EngineError::Validation(
                        "missing closing parenthesis after exists(".to_string(),
                    )),
                }
            }
            Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
            Some(Token::Str(s)) => Ok(Expr::Literal(VariableValue::String(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(VariableValue::Number(n))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(VariableValue::Bool(b))),
            other => Err(EngineError::Validation(format!(
                "unexpected token {other:?} in condition"
            ))),
        }
    }
}

fn eval(expr: &Expr, context: &VariableContext) -> VariableValue {
    match expr {
        Expr::Variable(name) => context
            .resolve(name)
            .cloned()
            .unwrap_or(VariableValue::Null),
        Expr::Literal(value) => value.clone(),
        Expr::Exists(name) => VariableValue::Bool(context.resolve(name).is_some()),
        Expr::Compare { left, op, right } => {
            let l = eval(left, context);
            let r = eval(right, context);
            VariableValue::Bool(compare(&l, *op, &r))
        }
        Expr::And(left, right) => {
            if !eval(left, context).is_truthy() {
                return VariableValue::Bool(false);
            }
            VariableValue::Bool(eval(right, context).is_truthy())
        }
        Expr::Or(left, right) => {
            if eval(left, context).is_truthy() {
                return VariableValue::Bool(true);
            }
            VariableValue::Bool(eval(right, context).is_truthy())
        }
        Expr::Not(inner) => VariableValue::Bool(!eval(inner, context).is_truthy()),
    }
}

fn compare(left: &VariableValue, op: CompareOp, right: &VariableValue) -> bool {
    use VariableValue::*;

    // Null satisfies only an equality check against null itself.
    if matches!(left, Null) || matches!(right, Null) {
        return match op {
            CompareOp::Eq => matches!((left, right), (Null, Null)),
            CompareOp::Ne => !matches!((left, right), (Null, Null)),
            _ => false,
        };
    }

    let (l, r) = coerce_pair(left.clone(), right.clone());
    match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            let ordering = match (&l, &r) {
                (Number(a), Number(b)) => a.partial_cmp(b),
                (String(a), String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match ordering {
                Some(ord) => match op {
                    CompareOp::Gt => ord.is_gt(),
                    CompareOp::Ge => ord.is_ge(),
                    CompareOp::Lt => ord.is_lt(),
                    CompareOp::Le => ord.is_le(),
                    _ => unreachable!(),
                },
                None => false,
            }
        }
    }
}

/// Coerce mismatched operands toward a comparable pair: strings that parse
/// as the other side's type are converted, otherwise both are left alone.
fn coerce_pair(left: VariableValue, right: VariableValue) -> (VariableValue, VariableValue) {
    use VariableValue::*;
    match (&left, &right) {
        (String(s), Number(_)) => match s.parse::<f64>() {
            Ok(n) => (Number(n), right),
            Err(_) => (left, right),
        },
        (Number(_), String(s)) => match s.parse::<f64>() {
            Ok(n) => (left, Number(n)),
            Err(_) => (left, right),
        },
        (String(s), Bool(_)) => match s.as_str() {
            "true" => (Bool(true), right),
            "false" => (Bool(false), right),
            _ => (left, right),
        },
        (Bool(_), String(s)) => match s.as_str() {
            "true" => (left, Bool(true)),
            "false" => (left, Bool(false)),
            _ => (left, right),
        },
        _ => (left, right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableTier;

    fn ctx() -> VariableContext {
        let mut ctx = VariableContext::new();
        ctx.set("os_name", "linux".into(), VariableTier::RuntimeProduced);
        ctx.set("cpu_count", 8.into(), VariableTier::SystemFact);
        ctx.set("flag", true.into(), VariableTier::Configuration);
        ctx
    }

    #[test]
    fn equality_and_ordering() {
        let ctx = ctx();
        assert!(evaluate("os_name == 'linux'", &ctx).unwrap());
        assert!(evaluate("os_name != 'darwin'", &ctx).unwrap());
        assert!(evaluate("cpu_count > 4", &ctx).unwrap());
        assert!(evaluate("cpu_count <= 8", &ctx).unwrap());
        assert!(!evaluate("cpu_count < 8", &ctx).unwrap());
    }

    #[test]
    fn logical_operators_and_grouping() {
        let ctx = ctx();
        assert!(evaluate("os_name == 'linux' && cpu_count > 4", &ctx).unwrap());
        assert!(evaluate("os_name == 'bsd' || flag", &ctx).unwrap());
        assert!(evaluate("!(os_name == 'bsd')", &ctx).unwrap());
        assert!(evaluate("(flag || os_name == 'bsd') && cpu_count == 8", &ctx).unwrap());
    }

    #[test]
    fn undefined_variable_makes_condition_false() {
        let ctx = VariableContext::new();
        assert!(!evaluate("flag == true", &ctx).unwrap());
        assert!(!evaluate("missing > 3", &ctx).unwrap());
        assert!(!evaluate("missing", &ctx).unwrap());
        // But inequality against a value holds for null.
        assert!(evaluate("missing != 'x'", &ctx).unwrap());
    }

    #[test]
    fn exists_checks_presence_not_truthiness() {
        let mut ctx = VariableContext::new();
        ctx.set("empty", "".into(), VariableTier::RuntimeProduced);
        assert!(evaluate("exists(empty)", &ctx).unwrap());
        assert!(!evaluate("exists(ghost)", &ctx).unwrap());
        assert!(!evaluate("empty", &ctx).unwrap());
    }

    #[test]
    fn string_number_coercion() {
        let mut ctx = VariableContext::new();
        ctx.set("count", "5".into(), VariableTier::RuntimeProduced);
        assert!(evaluate("count == 5", &ctx).unwrap());
        assert!(evaluate("count >= 2", &ctx).unwrap());
    }

    #[test]
    fn truthiness_of_bare_variables() {
        let mut ctx = VariableContext::new();
        ctx.set("on", "yes".into(), VariableTier::Configuration);
        ctx.set("off", "0".into(), VariableTier::Configuration);
        assert!(evaluate("on", &ctx).unwrap());
        assert!(!evaluate("off", &ctx).unwrap());
    }

    #[test]
    fn syntax_errors_are_validation_errors() {
        let ctx = VariableContext::new();
        assert!(matches!(
            evaluate("a == ", &ctx),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            evaluate("(a == 1", &ctx),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            evaluate("a ==== b", &ctx),
            Err(EngineError::Validation(_))
        ));
    }
}
