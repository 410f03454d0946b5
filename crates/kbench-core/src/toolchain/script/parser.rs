//! Parser and checker for `kbs` programs.
//!
//! Programs are line oriented: declarations first, then a `forward`
//! header followed by `let` statements and exactly one `return`.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::tensor::{numel, MAX_ELEMENTS};

/// A compile-time diagnostic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Built-in functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Func {
    Relu,
    Exp,
    Tanh,
    Sigmoid,
    Abs,
    Sqrt,
    Neg,
    Sum,
    Mean,
    Max,
    Min,
    Matmul,
}

impl Func {
    pub const ALL: [Func; 12] = [
        Func::Relu,
        Func::Exp,
        Func::Tanh,
        Func::Sigmoid,
        Func::Abs,
        Func::Sqrt,
        Func::Neg,
        Func::Sum,
        Func::Mean,
        Func::Max,
        Func::Min,
        Func::Matmul,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Func::Relu => "relu",
            Func::Exp => "exp",
            Func::Tanh => "tanh",
            Func::Sigmoid => "sigmoid",
            Func::Abs => "abs",
            Func::Sqrt => "sqrt",
            Func::Neg => "neg",
            Func::Sum => "sum",
            Func::Mean => "mean",
            Func::Max => "max",
            Func::Min => "min",
            Func::Matmul => "matmul",
        }
    }

    pub fn lookup(name: &str) -> Option<Func> {
        Func::ALL.iter().copied().find(|f| f.name() == name)
    }

    pub fn arity(&self) -> usize {
        match self {
            Func::Matmul => 2,
            _ => 1,
        }
    }

    pub fn is_reduction(&self) -> bool {
        matches!(self, Func::Sum | Func::Mean | Func::Max | Func::Min)
    }

    /// Scalar semantics of an elementwise function.
    pub fn elementwise(&self) -> Option<fn(f32) -> f32> {
        let f: fn(f32) -> f32 = match self {
            Func::Relu => |v| v.max(0.0),
            Func::Exp => f32::exp,
            Func::Tanh => f32::tanh,
            Func::Sigmoid => |v| 1.0 / (1.0 + (-v).exp()),
            Func::Abs => f32::abs,
            Func::Sqrt => f32::sqrt,
            Func::Neg => |v| -v,
            _ => return None,
        };
        Some(f)
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn apply(&self, a: f32, b: f32) -> f32 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Num(f32),
    Var(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Func,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Visit every variable reference.
    pub fn for_each_var(&self, f: &mut impl FnMut(&str)) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => f(name),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_var(f);
                rhs.for_each_var(f);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.for_each_var(f)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitDecl {
    pub name: String,
    pub default: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDecl {
    pub name: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Let {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forward {
    pub params: Vec<String>,
    pub body: Vec<Let>,
    pub ret: Expr,
}

/// A checked program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub inits: Vec<InitDecl>,
    pub params: Vec<TensorDecl>,
    /// Declared input shapes, reordered to match `forward.params`.
    pub inputs: Vec<TensorDecl>,
    pub forward: Forward,
}

const KEYWORDS: [&str; 6] = ["init", "param", "input", "forward", "let", "return"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f32),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Eq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(v) => write!(f, "{v}"),
            Token::Ident(name) => write!(f, "{name}"),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::LBracket => f.write_str("["),
            Token::RBracket => f.write_str("]"),
            Token::Comma => f.write_str(","),
            Token::Colon => f.write_str(":"),
            Token::Eq => f.write_str("="),
        }
    }
}

fn lex(line_no: usize, text: &str) -> ParseResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let simple = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '=' => Some(Token::Eq),
            _ => None,
        };
        if let Some(tok) = simple {
            tokens.push(tok);
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f32>()
                .ok()
                .filter(|v: &f32| v.is_finite())
                .ok_or_else(|| ParseError::new(line_no, format!("invalid number `{literal}`")))?;
            tokens.push(Token::Num(value));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(ParseError::new(line_no, format!("unexpected character `{c}`")));
        }
    }
    Ok(tokens)
}

/// Cursor over one line's tokens.
struct Cursor<'a> {
    line: usize,
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(line: usize, tokens: &'a [Token]) -> Self {
        Self {
            line,
            tokens,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, message)
    }

    fn expect(&mut self, want: Token) -> ParseResult<()> {
        match self.next() {
            Some(tok) if *tok == want => Ok(()),
            Some(tok) => {
                let found = tok.to_string();
                Err(self.err(format!("expected `{want}`, found `{found}`")))
            }
            None => Err(self.err(format!("expected `{want}`, found end of line"))),
        }
    }

    fn ident(&mut self) -> ParseResult<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name.clone()),
            Some(tok) => {
                let found = tok.to_string();
                Err(self.err(format!("expected a name, found `{found}`")))
            }
            None => Err(self.err("expected a name, found end of line")),
        }
    }

    fn finish(&self) -> ParseResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(tok) => Err(self.err(format!("unexpected `{tok}`"))),
        }
    }

    fn number(&mut self) -> ParseResult<f32> {
        let negative = matches!(self.peek(), Some(Token::Minus));
        if negative {
            self.pos += 1;
        }
        match self.next() {
            Some(Token::Num(v)) => Ok(if negative { -*v } else { *v }),
            _ => Err(self.err("expected a number")),
        }
    }

    fn shape(&mut self) -> ParseResult<Vec<usize>> {
        self.expect(Token::LBracket)?;
        let mut dims = Vec::new();
        if matches!(self.peek(), Some(Token::RBracket)) {
            self.pos += 1;
            return Ok(dims);
        }
        loop {
            let dim = match self.next() {
                Some(Token::Num(v)) if *v >= 1.0 && v.fract() == 0.0 => *v as usize,
                _ => return Err(self.err("dimensions must be positive integers")),
            };
            dims.push(dim);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => break,
                _ => return Err(self.err("expected `,` or `]` in shape")),
            }
        }
        match numel(&dims) {
            Some(n) if n <= MAX_ELEMENTS => Ok(dims),
            _ => Err(self.err(format!("shape exceeds {MAX_ELEMENTS} elements"))),
        }
    }

    fn expr(&mut self, scope: &Scope) -> ParseResult<Expr> {
        let mut lhs = self.term(scope)?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term(scope)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self, scope: &Scope) -> ParseResult<Expr> {
        let mut lhs = self.unary(scope)?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary(scope)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self, scope: &Scope) -> ParseResult<Expr> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            let inner = self.unary(scope)?;
            return Ok(Expr::Call {
                func: Func::Neg,
                args: vec![inner],
            });
        }
        self.primary(scope)
    }

    fn primary(&mut self, scope: &Scope) -> ParseResult<Expr> {
        match self.next().cloned() {
            Some(Token::Num(v)) => Ok(Expr::Num(v)),
            Some(Token::LParen) => {
                let inner = self.expr(scope)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    self.call(&name, scope)
                } else if scope.contains(&name) {
                    Ok(Expr::Var(name))
                } else {
                    Err(self.err(format!("undefined name `{name}`")))
                }
            }
            Some(tok) => Err(self.err(format!("unexpected `{tok}` in expression"))),
            None => Err(self.err("unexpected end of line in expression")),
        }
    }

    fn call(&mut self, name: &str, scope: &Scope) -> ParseResult<Expr> {
        let func =
            Func::lookup(name).ok_or_else(|| self.err(format!("unknown function `{name}`")))?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.expr(scope)?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        if args.len() != func.arity() {
            return Err(self.err(format!(
                "`{func}` takes {} argument(s), got {}",
                func.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call { func, args })
    }
}

#[derive(Default)]
struct Scope {
    names: HashSet<String>,
}

impl Scope {
    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn declare(&mut self, line: usize, name: &str) -> ParseResult<()> {
        if KEYWORDS.contains(&name) || Func::lookup(name).is_some() {
            return Err(ParseError::new(line, format!("`{name}` is a reserved name")));
        }
        if !self.names.insert(name.to_string()) {
            return Err(ParseError::new(line, format!("duplicate declaration of `{name}`")));
        }
        Ok(())
    }
}

struct PendingForward {
    line: usize,
    params: Vec<String>,
    body: Vec<Let>,
    ret: Option<Expr>,
}

/// Parse and check a program.
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let mut scope = Scope::default();
    let mut inits = Vec::new();
    let mut params = Vec::new();
    let mut inputs: Vec<(usize, TensorDecl)> = Vec::new();
    let mut input_names = HashSet::new();
    let mut forward: Option<PendingForward> = None;
    let mut last_line = 0;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let text = raw.split('#').next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let tokens = lex(line_no, text)?;
        let mut cur = Cursor::new(line_no, &tokens);
        let keyword = cur.ident()?;

        if let Some(fwd) = forward.as_mut() {
            if fwd.ret.is_some() {
                return Err(cur.err("statement after `return`"));
            }
            match keyword.as_str() {
                "let" => {
                    let name = cur.ident()?;
                    cur.expect(Token::Eq)?;
                    let expr = cur.expr(&scope)?;
                    cur.finish()?;
                    scope.declare(line_no, &name)?;
                    fwd.body.push(Let { name, expr });
                }
                "return" => {
                    let expr = cur.expr(&scope)?;
                    cur.finish()?;
                    fwd.ret = Some(expr);
                }
                "init" | "param" | "input" => {
                    return Err(cur.err("declarations must precede `forward`"));
                }
                "forward" => return Err(cur.err("duplicate `forward` definition")),
                other => {
                    return Err(cur.err(format!("expected `let` or `return`, found `{other}`")))
                }
            }
            continue;
        }

        match keyword.as_str() {
            "init" => {
                let name = cur.ident()?;
                let default = if matches!(cur.peek(), Some(Token::Eq)) {
                    cur.pos += 1;
                    Some(cur.number()?)
                } else {
                    None
                };
                cur.finish()?;
                scope.declare(line_no, &name)?;
                inits.push(InitDecl { name, default });
            }
            "param" => {
                let name = cur.ident()?;
                cur.expect(Token::Colon)?;
                let shape = cur.shape()?;
                cur.finish()?;
                scope.declare(line_no, &name)?;
                params.push(TensorDecl { name, shape });
            }
            "input" => {
                let name = cur.ident()?;
                cur.expect(Token::Colon)?;
                let shape = cur.shape()?;
                cur.finish()?;
                if !input_names.insert(name.clone()) {
                    return Err(cur.err(format!("duplicate input declaration `{name}`")));
                }
                inputs.push((line_no, TensorDecl { name, shape }));
            }
            "forward" => {
                cur.expect(Token::LParen)?;
                let mut fwd_params = Vec::new();
                if !matches!(cur.peek(), Some(Token::RParen)) {
                    loop {
                        let name = cur.ident()?;
                        scope.declare(line_no, &name)?;
                        fwd_params.push(name);
                        if matches!(cur.peek(), Some(Token::Comma)) {
                            cur.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                cur.expect(Token::RParen)?;
                cur.expect(Token::Colon)?;
                cur.finish()?;
                forward = Some(PendingForward {
                    line: line_no,
                    params: fwd_params,
                    body: Vec::new(),
                    ret: None,
                });
            }
            "let" | "return" => return Err(cur.err(format!("`{keyword}` outside `forward`"))),
            other => return Err(cur.err(format!("unknown statement `{other}`"))),
        }
    }

    let fwd = forward.ok_or_else(|| ParseError::new(last_line.max(1), "missing `forward`"))?;
    let ret = fwd
        .ret
        .ok_or_else(|| ParseError::new(last_line.max(fwd.line), "missing `return` in `forward`"))?;

    let inputs = order_inputs(inputs, &fwd.params, fwd.line)?;

    Ok(Program {
        inits,
        params,
        inputs,
        forward: Forward {
            params: fwd.params,
            body: fwd.body,
            ret,
        },
    })
}

/// Match input declarations to forward parameters by name.
fn order_inputs(
    declared: Vec<(usize, TensorDecl)>,
    forward_params: &[String],
    forward_line: usize,
) -> ParseResult<Vec<TensorDecl>> {
    if declared.is_empty() {
        return Ok(Vec::new());
    }
    if let Some((line, decl)) = declared
        .iter()
        .find(|(_, decl)| !forward_params.contains(&decl.name))
    {
        return Err(ParseError::new(
            *line,
            format!("input `{}` is not a forward parameter", decl.name),
        ));
    }
    forward_params
        .iter()
        .map(|param| {
            declared
                .iter()
                .find(|(_, decl)| &decl.name == param)
                .map(|(_, decl)| decl.clone())
                .ok_or_else(|| {
                    ParseError::new(
                        forward_line,
                        format!("forward parameter `{param}` has no input declaration"),
                    )
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_ONE: &str = "\
input x: [16]
forward(x):
    return x + 1
";

    #[test]
    fn test_parse_minimal_program() {
        let program = parse_program(ADD_ONE).unwrap();
        assert_eq!(program.forward.params, vec!["x"]);
        assert_eq!(program.inputs[0].shape, vec![16]);
        assert!(matches!(
            program.forward.ret,
            Expr::Binary { op: BinOp::Add, .. }
        ));
    }

    #[test]
    fn test_precedence_and_unary() {
        let program = parse_program("forward(a, b):\n return -a + b * 2\n").unwrap();
        match program.forward.ret {
            Expr::Binary { op, lhs, rhs } => {
                assert_eq!(op, BinOp::Add);
                assert!(matches!(*lhs, Expr::Call { func: Func::Neg, .. }));
                assert!(matches!(*rhs, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_declarations_and_comments() {
        let src = "\
# scaled relu
init alpha = -0.5   # slope
init beta
param w: [4, 4]
forward(x):
    let h = matmul(x, w)
    return relu(h) * alpha + beta
";
        let program = parse_program(src).unwrap();
        assert_eq!(program.inits[0].default, Some(-0.5));
        assert_eq!(program.inits[1].default, None);
        assert_eq!(program.params[0].shape, vec![4, 4]);
        assert_eq!(program.forward.body.len(), 1);
        assert!(program.inputs.is_empty());
    }

    #[test]
    fn test_scientific_literals() {
        let program = parse_program("forward(x):\n return x * 1e-3 + 2.5E2\n").unwrap();
        let mut nums = Vec::new();
        fn collect(e: &Expr, out: &mut Vec<f32>) {
            match e {
                Expr::Num(v) => out.push(*v),
                Expr::Var(_) => {}
                Expr::Binary { lhs, rhs, .. } => {
                    collect(lhs, out);
                    collect(rhs, out);
                }
                Expr::Call { args, .. } => args.iter().for_each(|a| collect(a, out)),
            }
        }
        collect(&program.forward.ret, &mut nums);
        assert_eq!(nums, vec![1e-3, 250.0]);
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = parse_program("forward(x):\n  return x +\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_undefined_name() {
        let err = parse_program("forward(x):\n  return y\n").unwrap_err();
        assert!(err.message.contains("undefined name `y`"));
    }

    #[test]
    fn test_duplicate_declaration() {
        let err = parse_program("param w: [2]\nforward(w):\n return w\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn test_missing_forward_and_return() {
        assert!(parse_program("param w: [2]\n")
            .unwrap_err()
            .message
            .contains("missing `forward`"));
        assert!(parse_program("forward(x):\n let y = x\n")
            .unwrap_err()
            .message
            .contains("missing `return`"));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        let err = parse_program("forward(x):\n return softmax(x)\n").unwrap_err();
        assert!(err.message.contains("unknown function"));
        let err = parse_program("forward(x):\n return matmul(x)\n").unwrap_err();
        assert!(err.message.contains("takes 2"));
    }

    #[test]
    fn test_statement_after_return() {
        let err = parse_program("forward(x):\n return x\n let y = x\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_inputs_reordered_to_forward_params() {
        let src = "input b: [3]\ninput a: [2]\nforward(a, b):\n return sum(a) + sum(b)\n";
        let program = parse_program(src).unwrap();
        let names: Vec<_> = program.inputs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_partial_input_declarations_rejected() {
        let err = parse_program("input a: [2]\nforward(a, b):\n return a\n").unwrap_err();
        assert!(err.message.contains("`b` has no input declaration"));
    }

    #[test]
    fn test_bad_shape_rejected() {
        assert!(parse_program("input x: [0]\nforward(x):\n return x\n").is_err());
        assert!(parse_program("input x: [1.5]\nforward(x):\n return x\n").is_err());
    }

    #[test]
    fn test_oversized_shape_is_diagnostic() {
        let src = "input x: [4]\nparam w: [1e30, 2]\nforward(x):\n return x\n";
        let err = parse_program(src).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("exceeds"), "{err}");

        let src = "param w: [65536, 65536]\ninput x: [4]\nforward(x):\n return x\n";
        assert_eq!(parse_program(src).unwrap_err().line, 1);
    }
}
