//! Boolean condition expressions (spec §4.3): literals, dot-notated
//! variable paths, comparison/boolean operators, and parentheses.
//!
//! Hand-written recursive-descent parser — no parser-combinator crate in
//! the dependency stack this workspace already carries, and the grammar
//! is small enough that one isn't warranted.

use serde_json::Value;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CmpOp {
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Gt,
    Lt,
    Ge,
    Le,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Lit(Literal),
    Path(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    Undefined,
    And,
    Or,
    Not,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Gt,
    Lt,
    Ge,
    Le,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();
    let mut depth: i32 = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                depth += 1;
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced parens".to_string());
                }
                toks.push(Tok::RParen);
                i += 1;
            }
            '&' if i + 1 < chars.len() && chars[i + 1] == '&' => {
                toks.push(Tok::And);
                i += 2;
            }
            '|' if i + 1 < chars.len() && chars[i + 1] == '|' => {
                toks.push(Tok::Or);
                i += 2;
            }
            '!' => {
                if i + 2 < chars.len() && chars[i + 1] == '=' && chars[i + 2] == '=' {
                    toks.push(Tok::StrictNe);
                    i += 3;
                } else if i + 1 < chars.len() && chars[i + 1] == '=' {
                    toks.push(Tok::Ne);
                    i += 2;
                } else {
                    toks.push(Tok::Not);
                    i += 1;
                }
            }
            '=' => {
                if i + 2 < chars.len() && chars[i + 1] == '=' && chars[i + 2] == '=' {
                    toks.push(Tok::StrictEq);
                    i += 3;
                } else if i + 1 < chars.len() && chars[i + 1] == '=' {
                    toks.push(Tok::Eq);
                    i += 2;
                } else {
                    return Err(format!("unexpected '=' at position {i}"));
                }
            }
            '>' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            '<' => {
                if i + 1 < chars.len() && chars[i + 1] == '=' {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                let mut closed = false;
                while i < chars.len() {
                    if chars[i] == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    s.push(chars[i]);
                    i += 1;
                }
                if !closed {
                    return Err("unterminated string literal".to_string());
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()) => {
                let start = i;
                if c == '-' {
                    i += 1;
                }
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| format!("invalid number literal \"{text}\""))?;
                toks.push(Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.' || chars[i] == '[' || chars[i] == ']')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                toks.push(match text.as_str() {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    "undefined" => Tok::Undefined,
                    _ => Tok::Ident(text),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    if depth != 0 {
        return Err("unbalanced parens".to_string());
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    // precedence: `!` > `&&` > `||`
    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Tok::Or)) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Tok::And)) {
            self.next();
            let rhs = self.parse_cmp()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_unary()?;
        let op = match self.peek() {
            Some(Tok::Eq) => Some(CmpOp::Eq),
            Some(Tok::Ne) => Some(CmpOp::Ne),
            Some(Tok::StrictEq) => Some(CmpOp::StrictEq),
            Some(Tok::StrictNe) => Some(CmpOp::StrictNe),
            Some(Tok::Gt) => Some(CmpOp::Gt),
            Some(Tok::Lt) => Some(CmpOp::Lt),
            Some(Tok::Ge) => Some(CmpOp::Ge),
            Some(Tok::Le) => Some(CmpOp::Le),
            _ => None,
        };
        if let Some(op) = op {
            self.next();
            let rhs = self.parse_unary()?;
            return Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Some(Tok::Not)) {
            self.next();
            if self.peek().is_none() || matches!(self.peek(), Some(Tok::RParen)) {
                return Err("dangling '!' with no operand".to_string());
            }
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Tok::RParen) => Ok(inner),
                    _ => Err("unbalanced parens".to_string()),
                }
            }
            Some(Tok::Num(n)) => Ok(Expr::Lit(Literal::Num(n))),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Literal::Str(s))),
            Some(Tok::True) => Ok(Expr::Lit(Literal::Bool(true))),
            Some(Tok::False) => Ok(Expr::Lit(Literal::Bool(false))),
            Some(Tok::Null) => Ok(Expr::Lit(Literal::Null)),
            Some(Tok::Undefined) => Ok(Expr::Lit(Literal::Undefined)),
            Some(Tok::Ident(path)) => Ok(Expr::Path(path)),
            Some(other) => Err(format!("empty operand before {other:?}")),
            None => Err("empty expression".to_string()),
        }
    }
}

pub fn parse(src: &str) -> Result<Expr, String> {
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Err("empty expression".to_string());
    }
    let toks = tokenize(trimmed)?;
    if toks.is_empty() {
        return Err("empty expression".to_string());
    }
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.toks.len() {
        return Err("trailing tokens after expression".to_string());
    }
    Ok(expr)
}

/// Returns `[]` when `expr` parses cleanly; otherwise at least one error
/// message describing the first problem found (spec §8).
pub fn validate_condition(expr: &str) -> Vec<String> {
    match parse(expr) {
        Ok(_) => Vec::new(),
        Err(e) => vec![e],
    }
}

/// A resolved value during expression evaluation. Distinguishes
/// `Undefined` (missing path) from JSON `Null` per spec §4.3.
#[derive(Clone, Debug)]
pub enum EvalValue {
    Undefined,
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Json(Value),
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalValue::Undefined => write!(f, ""),
            EvalValue::Null => write!(f, ""),
            EvalValue::Bool(b) => write!(f, "{b}"),
            EvalValue::Num(n) => write!(f, "{n}"),
            EvalValue::Str(s) => write!(f, "{s}"),
            EvalValue::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<Option<Value>> for EvalValue {
    fn from(v: Option<Value>) -> Self {
        match v {
            None => EvalValue::Undefined,
            Some(Value::Null) => EvalValue::Null,
            Some(Value::Bool(b)) => EvalValue::Bool(b),
            Some(Value::Number(n)) => EvalValue::Num(n.as_f64().unwrap_or(f64::NAN)),
            Some(Value::String(s)) => EvalValue::Str(s),
            Some(other) => EvalValue::Json(other),
        }
    }
}

pub fn is_truthy(v: &EvalValue) -> bool {
    match v {
        EvalValue::Undefined | EvalValue::Null => false,
        EvalValue::Bool(b) => *b,
        EvalValue::Num(n) => *n != 0.0,
        EvalValue::Str(s) => !s.is_empty(),
        EvalValue::Json(Value::Array(a)) => !a.is_empty(),
        EvalValue::Json(_) => true,
    }
}

fn nullish(v: &EvalValue) -> bool {
    matches!(v, EvalValue::Undefined | EvalValue::Null)
}

fn loose_eq(a: &EvalValue, b: &EvalValue) -> bool {
    if nullish(a) || nullish(b) {
        return nullish(a) && nullish(b);
    }
    strict_eq(a, b)
}

fn strict_eq(a: &EvalValue, b: &EvalValue) -> bool {
    match (a, b) {
        (EvalValue::Undefined, EvalValue::Undefined) => true,
        (EvalValue::Null, EvalValue::Null) => true,
        (EvalValue::Bool(x), EvalValue::Bool(y)) => x == y,
        (EvalValue::Num(x), EvalValue::Num(y)) => x == y,
        (EvalValue::Str(x), EvalValue::Str(y)) => x == y,
        (EvalValue::Json(x), EvalValue::Json(y)) => x == y,
        _ => false,
    }
}

fn ordering(a: &EvalValue, b: &EvalValue) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (EvalValue::Num(x), EvalValue::Num(y)) => x.partial_cmp(y),
        (EvalValue::Str(x), EvalValue::Str(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Evaluate `expr` against a path resolver. Missing paths never throw;
/// they resolve to `Undefined` and participate in comparisons/truthiness
/// accordingly.
pub fn evaluate<F>(expr: &Expr, resolve: &F) -> bool
where
    F: Fn(&str) -> Option<Value>,
{
    is_truthy(&eval_value(expr, resolve))
}

fn eval_value<F>(expr: &Expr, resolve: &F) -> EvalValue
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Lit(Literal::Num(n)) => EvalValue::Num(*n),
        Expr::Lit(Literal::Str(s)) => EvalValue::Str(s.clone()),
        Expr::Lit(Literal::Bool(b)) => EvalValue::Bool(*b),
        Expr::Lit(Literal::Null) => EvalValue::Null,
        Expr::Lit(Literal::Undefined) => EvalValue::Undefined,
        Expr::Path(p) => EvalValue::from(resolve(p)),
        Expr::Not(inner) => EvalValue::Bool(!is_truthy(&eval_value(inner, resolve))),
        Expr::And(l, r) => {
            let lv = eval_value(l, resolve);
            if !is_truthy(&lv) {
                EvalValue::Bool(false)
            } else {
                EvalValue::Bool(is_truthy(&eval_value(r, resolve)))
            }
        }
        Expr::Or(l, r) => {
            let lv = eval_value(l, resolve);
            if is_truthy(&lv) {
                EvalValue::Bool(true)
            } else {
                EvalValue::Bool(is_truthy(&eval_value(r, resolve)))
            }
        }
        Expr::Cmp(op, l, r) => {
            let lv = eval_value(l, resolve);
            let rv = eval_value(r, resolve);
            let result = match op {
                CmpOp::Eq => loose_eq(&lv, &rv),
                CmpOp::Ne => !loose_eq(&lv, &rv),
                CmpOp::StrictEq => strict_eq(&lv, &rv),
                CmpOp::StrictNe => !strict_eq(&lv, &rv),
                CmpOp::Gt => ordering(&lv, &rv) == Some(std::cmp::Ordering::Greater),
                CmpOp::Lt => ordering(&lv, &rv) == Some(std::cmp::Ordering::Less),
                CmpOp::Ge => matches!(
                    ordering(&lv, &rv),
                    Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                ),
                CmpOp::Le => matches!(
                    ordering(&lv, &rv),
                    Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                ),
            };
            EvalValue::Bool(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(vars: &Value) -> impl Fn(&str) -> Option<Value> + '_ {
        move |path: &str| {
            let mut cur = vars;
            for seg in path.split('.') {
                cur = cur.get(seg)?;
            }
            Some(cur.clone())
        }
    }

    #[test]
    fn literals_and_truthiness() {
        let vars = json!({});
        let r = resolver(&vars);
        assert!(evaluate(&parse("true").unwrap(), &r));
        assert!(!evaluate(&parse("false").unwrap(), &r));
        assert!(!evaluate(&parse("0").unwrap(), &r));
        assert!(evaluate(&parse("1").unwrap(), &r));
        assert!(!evaluate(&parse("''").unwrap(), &r));
        assert!(evaluate(&parse("'x'").unwrap(), &r));
    }

    #[test]
    fn missing_path_is_falsy_never_throws() {
        let vars = json!({});
        let r = resolver(&vars);
        assert!(!evaluate(&parse("nope.missing").unwrap(), &r));
        assert!(evaluate(&parse("!nope.missing").unwrap(), &r));
    }

    #[test]
    fn comparisons() {
        let vars = json!({"review": {"hasActionableIssues": true}, "count": 3});
        let r = resolver(&vars);
        assert!(evaluate(&parse("review.hasActionableIssues").unwrap(), &r));
        assert!(evaluate(&parse("count > 2").unwrap(), &r));
        assert!(!evaluate(&parse("count > 3").unwrap(), &r));
        assert!(evaluate(&parse("count >= 3").unwrap(), &r));
        assert!(evaluate(&parse("count == 3").unwrap(), &r));
        assert!(evaluate(&parse("count === 3").unwrap(), &r));
        assert!(evaluate(&parse("null == undefined").unwrap(), &r));
        assert!(!evaluate(&parse("null === undefined").unwrap(), &r));
    }

    #[test]
    fn precedence_not_and_or() {
        let vars = json!({"a": true, "b": false, "c": false});
        let r = resolver(&vars);
        // !a && b || c  =>  ((!a) && b) || c  =>  (false && false) || false => false
        assert!(!evaluate(&parse("!a && b || c").unwrap(), &r));
        // a || b && c => a || (b && c) => true
        assert!(evaluate(&parse("a || b && c").unwrap(), &r));
    }

    #[test]
    fn parens() {
        let vars = json!({"a": true, "b": false, "c": true});
        let r = resolver(&vars);
        assert!(evaluate(&parse("(a || b) && c").unwrap(), &r));
    }

    #[test]
    fn validate_condition_reports_errors() {
        assert_eq!(validate_condition("a == 1"), Vec::<String>::new());
        assert!(!validate_condition("(a == 1").is_empty());
        assert!(!validate_condition("").is_empty());
        assert!(!validate_condition("!").is_empty());
        assert!(!validate_condition("a &&").is_empty());
    }
}
