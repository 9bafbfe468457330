//! Recursive-descent parser for action code.
//!
//! Grammar (indentation handled by the lexer):
//! ```text
//! program   := stmt*
//! stmt      := compound | simple (';' simple)* NEWLINE
//! compound  := if | for | while | def
//! if        := 'if' expr ':' suite ('elif' expr ':' suite)* ['else' ':' suite]
//! for       := 'for' targets 'in' expr ':' suite
//! while     := 'while' expr ':' suite
//! def       := 'def' NAME '(' [param (',' param)*] ')' ':' suite
//! suite     := simple (';' simple)* NEWLINE | NEWLINE INDENT stmt+ DEDENT
//! simple    := import | from | 'return' [exprs] | 'break' | 'continue' | 'pass'
//!            | 'assert' expr [',' expr] | exprs [('=' | '+=' | '-=' | '*=' | '/=') exprs]
//! expr      := or ['if' or 'else' expr]
//! or        := and ('or' and)*
//! and       := not ('and' not)*
//! not       := 'not' not | compare
//! compare   := arith (cmp_op arith)*
//! arith     := term (('+' | '-') term)*
//! term      := factor (('*' | '/' | '//' | '%') factor)*
//! factor    := ('-' | '+') factor | power
//! power     := ['await'] postfix ['**' factor]
//! postfix   := primary ('.' NAME | '[' subscript ']' | '(' args ')')*
//! primary   := NUMBER | STRING | FSTRING | NAME | 'True' | 'False' | 'None'
//!            | '(' [exprs] ')' | '[' [exprs | expr 'for' targets 'in' or ['if' or]] ']'
//!            | '{' [expr ':' expr (',' expr ':' expr)*] '}'
//! ```

use serde_json::Value;
use std::sync::Arc;

use super::ast::{BinOp, CmpOp, Expr, FPart, FunctionDef, Program, Stmt, StmtKind, Target};
use super::lexer::{Kw, Tok, Token, tokenize};
use crate::error::{ScriptError, ScriptResult};

/// Parse a complete action.
///
/// Common leading indentation is removed first, so code copied out of an
/// indented block still parses.
pub fn parse_program(source: &str) -> ScriptResult<Program> {
    let tokens = tokenize(&dedent(source))?;
    let mut parser = Parser::new(tokens);
    let body = parser.statements_until(&Tok::Eof)?;
    Ok(Program { body })
}

/// Parse a single expression (used for the `{...}` parts of f-strings).
pub fn parse_expression(source: &str, line: usize) -> ScriptResult<Expr> {
    let tokens = tokenize(source.trim()).map_err(|e| relocate(e, line))?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expr().map_err(|e| relocate(e, line))?;
    parser.skip_newlines();
    if !parser.at(&Tok::Eof) {
        return Err(ScriptError::syntax(line, format!("unexpected text in f-string expression '{source}'")));
    }
    Ok(expr)
}

fn relocate(err: ScriptError, line: usize) -> ScriptError {
    match err {
        ScriptError::Syntax { message, .. } => ScriptError::syntax(line, message),
        other => other,
    }
}

/// Strip the indentation shared by every non-blank line.
pub(super) fn dedent(source: &str) -> String {
    let common = source
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    if common == 0 {
        return source.to_string();
    }
    source
        .lines()
        .map(|l| if l.len() >= common { &l[common..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            loop_depth: 0,
        }
    }

    // ─── Token helpers ───────────────────────────────────────────────

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn peek_next(&self) -> &Tok {
        self.tokens
            .get(self.pos + 1)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_kw(&self, kw: Kw) -> bool {
        matches!(self.peek(), Tok::Kw(k) if *k == kw)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: Kw) -> bool {
        if self.at_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> ScriptResult<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_kw(&mut self, kw: Kw, what: &str) -> ScriptResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn ident(&mut self, what: &str) -> ScriptResult<String> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        let found = match self.peek() {
            Tok::Newline => "end of line".to_string(),
            Tok::Eof => "end of input".to_string(),
            Tok::Indent => "unexpected indent".to_string(),
            Tok::Dedent => "end of block".to_string(),
            other => describe(other),
        };
        ScriptError::syntax(self.line(), format!("expected {expected}, found {found}"))
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Semi) {
            self.pos += 1;
        }
    }

    // ─── Statements ──────────────────────────────────────────────────

    fn statements_until(&mut self, end: &Tok) -> ScriptResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at(end) || self.at(&Tok::Eof) {
                break;
            }
            if self.at(&Tok::Indent) {
                return Err(ScriptError::syntax(self.line(), "unexpected indent"));
            }
            self.statement(&mut body)?;
        }
        Ok(body)
    }

    fn statement(&mut self, out: &mut Vec<Stmt>) -> ScriptResult<()> {
        let line = self.line();
        let kind = match self.peek() {
            Tok::Kw(Kw::If) => self.if_stmt()?,
            Tok::Kw(Kw::For) => self.for_stmt()?,
            Tok::Kw(Kw::While) => self.while_stmt()?,
            Tok::Kw(Kw::Def) => self.def_stmt()?,
            _ => return self.simple_line(out),
        };
        out.push(Stmt { line, kind });
        Ok(())
    }

    /// One or more `;`-separated simple statements ending the line.
    fn simple_line(&mut self, out: &mut Vec<Stmt>) -> ScriptResult<()> {
        loop {
            let line = self.line();
            let kind = self.simple()?;
            out.push(Stmt { line, kind });
            if self.eat(&Tok::Semi) {
                if matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Dedent) {
                    break;
                }
                continue;
            }
            break;
        }
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof | Tok::Dedent => Ok(()),
            _ => Err(self.unexpected("end of statement")),
        }
    }

    fn simple(&mut self) -> ScriptResult<StmtKind> {
        match self.peek() {
            Tok::Kw(Kw::Import) => self.import_stmt(),
            Tok::Kw(Kw::From) => self.from_stmt(),
            Tok::Kw(Kw::Return) => {
                self.pos += 1;
                if matches!(self.peek(), Tok::Newline | Tok::Semi | Tok::Eof | Tok::Dedent) {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.exprs()?)))
                }
            }
            Tok::Kw(Kw::Break) => {
                if self.loop_depth == 0 {
                    return Err(ScriptError::syntax(self.line(), "'break' outside loop"));
                }
                self.pos += 1;
                Ok(StmtKind::Break)
            }
            Tok::Kw(Kw::Continue) => {
                if self.loop_depth == 0 {
                    return Err(ScriptError::syntax(self.line(), "'continue' not properly in loop"));
                }
                self.pos += 1;
                Ok(StmtKind::Continue)
            }
            Tok::Kw(Kw::Pass) => {
                self.pos += 1;
                Ok(StmtKind::Pass)
            }
            Tok::Kw(Kw::Assert) => {
                self.pos += 1;
                let cond = self.expr()?;
                let message = if self.eat(&Tok::Comma) {
                    Some(self.expr()?)
                } else {
                    None
                };
                Ok(StmtKind::Assert { cond, message })
            }
            _ => self.expr_or_assign(),
        }
    }

    fn import_stmt(&mut self) -> ScriptResult<StmtKind> {
        self.expect_kw(Kw::Import, "'import'")?;
        let module = self.dotted_name()?;
        let alias = if self.eat_kw(Kw::As) {
            Some(self.ident("an alias after 'as'")?)
        } else {
            None
        };
        if self.at(&Tok::Comma) {
            return Err(ScriptError::syntax(
                self.line(),
                "import one module per statement",
            ));
        }
        Ok(StmtKind::Import { module, alias })
    }

    fn from_stmt(&mut self) -> ScriptResult<StmtKind> {
        self.expect_kw(Kw::From, "'from'")?;
        let module = self.dotted_name()?;
        self.expect_kw(Kw::Import, "'import'")?;
        let parenthesized = self.eat(&Tok::LParen);
        let mut names = Vec::new();
        loop {
            if self.at(&Tok::Star) {
                return Err(ScriptError::syntax(self.line(), "wildcard imports are not supported"));
            }
            let name = self.ident("a name to import")?;
            let alias = if self.eat_kw(Kw::As) {
                Some(self.ident("an alias after 'as'")?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.eat(&Tok::Comma) {
                break;
            }
            if parenthesized && self.at(&Tok::RParen) {
                break;
            }
        }
        if parenthesized {
            self.expect(&Tok::RParen, "')'")?;
        }
        Ok(StmtKind::FromImport { module, names })
    }

    fn dotted_name(&mut self) -> ScriptResult<String> {
        let mut name = self.ident("a module name")?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.ident("a module name")?);
        }
        Ok(name)
    }

    fn expr_or_assign(&mut self) -> ScriptResult<StmtKind> {
        let line = self.line();
        let first = self.exprs()?;
        let op = match self.peek() {
            Tok::Assign => None,
            Tok::PlusAssign => Some(BinOp::Add),
            Tok::MinusAssign => Some(BinOp::Sub),
            Tok::StarAssign => Some(BinOp::Mul),
            Tok::SlashAssign => Some(BinOp::Div),
            _ => return Ok(StmtKind::Expr(first)),
        };
        self.pos += 1;
        let target = to_target(first, line)?;
        let value = self.exprs()?;
        if self.at(&Tok::Assign) {
            return Err(ScriptError::syntax(line, "chained assignment is not supported"));
        }
        match op {
            None => Ok(StmtKind::Assign { target, value }),
            Some(op) => {
                if matches!(target, Target::Tuple(_)) {
                    return Err(ScriptError::syntax(
                        line,
                        "illegal expression for augmented assignment",
                    ));
                }
                Ok(StmtKind::AugAssign { target, op, value })
            }
        }
    }

    fn suite(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect(&Tok::Colon, "':'")?;
        if !self.eat(&Tok::Newline) {
            let mut body = Vec::new();
            self.simple_line(&mut body)?;
            return Ok(body);
        }
        if !self.eat(&Tok::Indent) {
            return Err(ScriptError::syntax(self.line(), "expected an indented block"));
        }
        let body = self.statements_until(&Tok::Dedent)?;
        self.eat(&Tok::Dedent);
        if body.is_empty() {
            return Err(ScriptError::syntax(self.line(), "expected an indented block"));
        }
        Ok(body)
    }

    fn if_stmt(&mut self) -> ScriptResult<StmtKind> {
        self.expect_kw(Kw::If, "'if'")?;
        let mut branches = vec![(self.expr()?, self.suite()?)];
        let mut orelse = Vec::new();
        loop {
            self.skip_blank_lines();
            if self.eat_kw(Kw::Elif) {
                branches.push((self.expr()?, self.suite()?));
            } else if self.eat_kw(Kw::Else) {
                orelse = self.suite()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    /// Newlines between a block and its `elif`/`else` only come from `;`
    /// endings, but tolerate them.
    fn skip_blank_lines(&mut self) {
        let save = self.pos;
        self.skip_newlines();
        if !(self.at_kw(Kw::Elif) || self.at_kw(Kw::Else)) {
            self.pos = save;
        }
    }

    fn for_stmt(&mut self) -> ScriptResult<StmtKind> {
        let line = self.line();
        self.expect_kw(Kw::For, "'for'")?;
        let target = self.targets(line)?;
        self.expect_kw(Kw::In, "'in'")?;
        let iter = self.exprs()?;
        self.loop_depth += 1;
        let body = self.suite();
        self.loop_depth -= 1;
        Ok(StmtKind::For { target, iter, body: body? })
    }

    fn while_stmt(&mut self) -> ScriptResult<StmtKind> {
        self.expect_kw(Kw::While, "'while'")?;
        let cond = self.expr()?;
        self.loop_depth += 1;
        let body = self.suite();
        self.loop_depth -= 1;
        Ok(StmtKind::While { cond, body: body? })
    }

    fn def_stmt(&mut self) -> ScriptResult<StmtKind> {
        self.expect_kw(Kw::Def, "'def'")?;
        let name = self.ident("a function name")?;
        self.expect(&Tok::LParen, "'('")?;
        let mut params: Vec<(String, Option<Expr>)> = Vec::new();
        while !self.at(&Tok::RParen) {
            let param = self.ident("a parameter name")?;
            if params.iter().any(|(p, _)| *p == param) {
                return Err(ScriptError::syntax(
                    self.line(),
                    format!("duplicate argument '{param}' in function definition"),
                ));
            }
            let default = if self.eat(&Tok::Assign) {
                Some(self.expr()?)
            } else {
                if params.iter().any(|(_, d)| d.is_some()) {
                    return Err(ScriptError::syntax(
                        self.line(),
                        "non-default argument follows default argument",
                    ));
                }
                None
            };
            params.push((param, default));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;

        // loops do not extend into the function body
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.suite();
        self.loop_depth = saved_loops;

        Ok(StmtKind::FunctionDef(Arc::new(FunctionDef {
            name,
            params,
            body: body?,
        })))
    }

    /// Loop targets: `x`, `k, v`, `(i, (a, b))`.
    fn targets(&mut self, line: usize) -> ScriptResult<Target> {
        let mut items = vec![self.postfix()?];
        while self.eat(&Tok::Comma) {
            if self.at_kw(Kw::In) {
                break;
            }
            items.push(self.postfix()?);
        }
        if items.len() == 1 {
            to_target(items.remove(0), line)
        } else {
            to_target(Expr::List(items), line)
        }
    }

    // ─── Expressions ─────────────────────────────────────────────────

    /// A comma-separated expression list; more than one item becomes a list.
    fn exprs(&mut self) -> ScriptResult<Expr> {
        let first = self.expr()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.ends_expression_list() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::List(items))
    }

    fn ends_expression_list(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Newline
                | Tok::Semi
                | Tok::Eof
                | Tok::Dedent
                | Tok::Assign
                | Tok::RParen
                | Tok::Colon
                | Tok::PlusAssign
                | Tok::MinusAssign
                | Tok::StarAssign
                | Tok::SlashAssign
        )
    }

    fn expr(&mut self) -> ScriptResult<Expr> {
        let value = self.or_expr()?;
        if self.eat_kw(Kw::If) {
            let cond = self.or_expr()?;
            self.expect_kw(Kw::Else, "'else' in conditional expression")?;
            let otherwise = self.expr()?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(value),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> ScriptResult<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_kw(Kw::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> ScriptResult<Expr> {
        let mut left = self.not_expr()?;
        while self.eat_kw(Kw::And) {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> ScriptResult<Expr> {
        if self.eat_kw(Kw::Not) {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ScriptResult<Expr> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::EqEq => CmpOp::Eq,
                Tok::NotEq => CmpOp::NotEq,
                Tok::Lt => CmpOp::Lt,
                Tok::Le => CmpOp::Le,
                Tok::Gt => CmpOp::Gt,
                Tok::Ge => CmpOp::Ge,
                Tok::Kw(Kw::In) => CmpOp::In,
                Tok::Kw(Kw::Not) if matches!(self.peek_next(), Tok::Kw(Kw::In)) => {
                    self.pos += 1;
                    CmpOp::NotIn
                }
                Tok::Kw(Kw::Is) => {
                    if matches!(self.peek_next(), Tok::Kw(Kw::Not)) {
                        self.pos += 1;
                        CmpOp::NotEq
                    } else {
                        CmpOp::Eq
                    }
                }
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn arith(&mut self) -> ScriptResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> ScriptResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> ScriptResult<Expr> {
        if self.eat(&Tok::Minus) {
            return Ok(match self.factor()? {
                Expr::Literal(Value::Number(n)) => negate_literal(&n),
                other => Expr::Neg(Box::new(other)),
            });
        }
        if self.eat(&Tok::Plus) {
            return self.factor();
        }
        self.power()
    }

    fn power(&mut self) -> ScriptResult<Expr> {
        let base = if self.eat_kw(Kw::Await) {
            Expr::Await(Box::new(self.postfix()?))
        } else {
            self.postfix()?
        };
        if self.eat(&Tok::DoubleStar) {
            let exponent = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.pos += 1;
                    let name = self.ident("an attribute name after '.'")?;
                    expr = Expr::Attr {
                        base: Box::new(expr),
                        name,
                    };
                }
                Tok::LBracket => {
                    self.pos += 1;
                    expr = self.subscript(expr)?;
                }
                Tok::LParen => {
                    self.pos += 1;
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn subscript(&mut self, base: Expr) -> ScriptResult<Expr> {
        let start = if self.at(&Tok::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        if self.eat(&Tok::Colon) {
            let end = if self.at(&Tok::RBracket) {
                None
            } else {
                Some(Box::new(self.expr()?))
            };
            if self.at(&Tok::Colon) {
                return Err(ScriptError::syntax(self.line(), "slice steps are not supported"));
            }
            self.expect(&Tok::RBracket, "']'")?;
            return Ok(Expr::Slice {
                base: Box::new(base),
                start,
                end,
            });
        }
        self.expect(&Tok::RBracket, "']'")?;
        let index = start.ok_or_else(|| self.unexpected("an index"))?;
        Ok(Expr::Index {
            base: Box::new(base),
            index,
        })
    }

    fn call_args(&mut self) -> ScriptResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.at(&Tok::RParen) {
            if matches!(self.peek(), Tok::Star | Tok::DoubleStar) {
                return Err(ScriptError::syntax(
                    self.line(),
                    "argument unpacking is not supported",
                ));
            }
            let keyword = match (self.peek(), self.peek_next()) {
                (Tok::Ident(name), Tok::Assign) => Some(name.clone()),
                _ => None,
            };
            if let Some(name) = keyword {
                self.pos += 2;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(ScriptError::syntax(
                        self.line(),
                        format!("keyword argument repeated: {name}"),
                    ));
                }
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(ScriptError::syntax(
                        self.line(),
                        "positional argument follows keyword argument",
                    ));
                }
                args.push(self.expr()?);
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn primary(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        match self.advance() {
            Tok::Int(i) => Ok(Expr::Literal(Value::from(i))),
            Tok::Float(f) => Ok(Expr::Literal(Value::from(f))),
            Tok::Str(s) => {
                // implicit concatenation: "a" "b"
                let mut s = s;
                while let Tok::Str(next) = self.peek().clone() {
                    self.pos += 1;
                    s.push_str(&next);
                }
                Ok(Expr::Literal(Value::String(s)))
            }
            Tok::FStr(raw) => Ok(Expr::FString(parse_fstring(&raw, line)?)),
            Tok::Ident(name) => Ok(Expr::Name(name)),
            Tok::Kw(Kw::True) => Ok(Expr::Literal(Value::Bool(true))),
            Tok::Kw(Kw::False) => Ok(Expr::Literal(Value::Bool(false))),
            Tok::Kw(Kw::None) => Ok(Expr::Literal(Value::Null)),
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::List(Vec::new()));
                }
                let inner = self.exprs()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => self.list_display(line),
            Tok::LBrace => self.map_display(),
            _ => {
                self.pos -= 1;
                Err(self.unexpected("an expression"))
            }
        }
    }

    fn list_display(&mut self, line: usize) -> ScriptResult<Expr> {
        if self.eat(&Tok::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expr()?;
        if self.eat_kw(Kw::For) {
            let target = self.targets(line)?;
            self.expect_kw(Kw::In, "'in'")?;
            let iter = self.or_expr()?;
            let cond = if self.eat_kw(Kw::If) {
                Some(Box::new(self.or_expr()?))
            } else {
                None
            };
            self.expect(&Tok::RBracket, "']'")?;
            return Ok(Expr::ListComp {
                expr: Box::new(first),
                target: Box::new(target),
                iter: Box::new(iter),
                cond,
            });
        }
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::RBracket) {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect(&Tok::RBracket, "']'")?;
        Ok(Expr::List(items))
    }

    fn map_display(&mut self) -> ScriptResult<Expr> {
        let mut entries = Vec::new();
        while !self.at(&Tok::RBrace) {
            let key = self.expr()?;
            if !self.eat(&Tok::Colon) {
                return Err(ScriptError::syntax(self.line(), "sets are not supported, use a list"));
            }
            let value = self.expr()?;
            entries.push((key, value));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(&Tok::RBrace, "'}'")?;
        Ok(Expr::Map(entries))
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn negate_literal(n: &serde_json::Number) -> Expr {
    if let Some(i) = n.as_i64().and_then(|i| i.checked_neg()) {
        Expr::Literal(Value::from(i))
    } else if let Some(f) = n.as_f64() {
        Expr::Literal(Value::from(-f))
    } else {
        Expr::Neg(Box::new(Expr::Literal(Value::Number(n.clone()))))
    }
}

fn to_target(expr: Expr, line: usize) -> ScriptResult<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Index { base, index } => Ok(Target::Index {
            base: *base,
            index: *index,
        }),
        Expr::Attr { base, name } => Ok(Target::Attr { base: *base, name }),
        Expr::List(items) if !items.is_empty() => Ok(Target::Tuple(
            items
                .into_iter()
                .map(|e| to_target(e, line))
                .collect::<ScriptResult<_>>()?,
        )),
        Expr::Call { .. } => Err(ScriptError::syntax(line, "cannot assign to function call")),
        Expr::Literal(_) => Err(ScriptError::syntax(line, "cannot assign to literal")),
        _ => Err(ScriptError::syntax(line, "cannot assign to expression")),
    }
}

/// Split an f-string body into text and `{expr[:spec]}` parts.
fn parse_fstring(raw: &str, line: usize) -> ScriptResult<Vec<FPart>> {
    let chars: Vec<char> = raw.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                text.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                text.push('}');
                i += 2;
            }
            '{' => {
                if !text.is_empty() {
                    parts.push(FPart::Text(std::mem::take(&mut text)));
                }
                let (inner, next) = fstring_field(&chars, i + 1, line)?;
                let (source, spec) = split_format_spec(&inner);
                let source = source.strip_suffix("!r").or_else(|| source.strip_suffix("!s")).unwrap_or(source);
                let source = source.strip_suffix('=').unwrap_or(source);
                parts.push(FPart::Expr {
                    expr: parse_expression(source, line)?,
                    spec,
                });
                i = next;
            }
            '}' => return Err(ScriptError::syntax(line, "f-string: single '}' is not allowed")),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        parts.push(FPart::Text(text));
    }
    Ok(parts)
}

/// The text of one `{...}` field and the index just past its closing brace.
fn fstring_field(chars: &[char], start: usize, line: usize) -> ScriptResult<(String, usize)> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' => depth = depth.saturating_sub(1),
                '}' if depth == 0 => {
                    let inner: String = chars[start..i].iter().collect();
                    if inner.trim().is_empty() {
                        return Err(ScriptError::syntax(line, "f-string: empty expression not allowed"));
                    }
                    return Ok((inner, i + 1));
                }
                '}' => depth -= 1,
                _ => {}
            },
        }
        i += 1;
    }
    Err(ScriptError::syntax(line, "f-string: expecting '}'"))
}

/// Split `expr:spec` at the first colon outside brackets and strings.
fn split_format_spec(field: &str) -> (&str, Option<String>) {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in field.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth = depth.saturating_sub(1),
                ':' if depth == 0 => return (&field[..i], Some(field[i + 1..].to_string())),
                _ => {}
            },
        }
    }
    (field, None)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(name) => format!("'{name}'"),
        Tok::Kw(kw) => format!("keyword '{}'", format!("{kw:?}").to_lowercase()),
        Tok::Int(i) => format!("number {i}"),
        Tok::Float(f) => format!("number {f}"),
        Tok::Str(_) | Tok::FStr(_) => "string".to_string(),
        other => {
            let symbol = match other {
                Tok::LParen => "(",
                Tok::RParen => ")",
                Tok::LBracket => "[",
                Tok::RBracket => "]",
                Tok::LBrace => "{",
                Tok::RBrace => "}",
                Tok::Comma => ",",
                Tok::Colon => ":",
                Tok::Dot => ".",
                Tok::Semi => ";",
                Tok::Plus => "+",
                Tok::Minus => "-",
                Tok::Star => "*",
                Tok::Slash => "/",
                Tok::DoubleSlash => "//",
                Tok::Percent => "%",
                Tok::DoubleStar => "**",
                Tok::Assign => "=",
                Tok::PlusAssign => "+=",
                Tok::MinusAssign => "-=",
                Tok::StarAssign => "*=",
                Tok::SlashAssign => "/=",
                Tok::EqEq => "==",
                Tok::NotEq => "!=",
                Tok::Lt => "<",
                Tok::Le => "<=",
                Tok::Gt => ">",
                Tok::Ge => ">=",
                _ => "token",
            };
            format!("'{symbol}'")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        parse_program(source).unwrap()
    }

    fn syntax_line(source: &str) -> usize {
        match parse_program(source).unwrap_err() {
            ScriptError::Syntax { line, .. } => line,
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn parses_statements_with_lines() {
        let program = parse("import math\nx = 1\n\ny = math.sqrt(x)\nreturn complete(y)\n");
        let lines: Vec<usize> = program.body.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2, 4, 5]);
        assert!(matches!(program.body[0].kind, StmtKind::Import { .. }));
        assert!(matches!(program.body[3].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn precedence() {
        let program = parse("x = 1 + 2 * 3 ** 2");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        let Expr::Binary { op: BinOp::Add, right, .. } = value else {
            panic!("expected addition at the top, got {value:?}");
        };
        assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn negative_literals_fold() {
        let program = parse("x = -3");
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Literal(v) if v == &serde_json::json!(-3)));
    }

    #[test]
    fn compound_statements() {
        let source = "\
total = 0
for i, item in enumerate(items):
    if item > 2:
        total += item
    elif item == 0:
        continue
    else:
        pass
while total > 10: total -= 1
def double(n, factor=2):
    return n * factor
";
        let program = parse(source);
        assert_eq!(program.body.len(), 4);
        let StmtKind::For { target, body, .. } = &program.body[1].kind else {
            panic!("expected for loop");
        };
        assert!(matches!(target, Target::Tuple(t) if t.len() == 2));
        assert!(matches!(&body[0].kind, StmtKind::If { branches, orelse } if branches.len() == 2 && orelse.len() == 1));
        assert!(matches!(&program.body[3].kind, StmtKind::FunctionDef(def) if def.params.len() == 2));
    }

    #[test]
    fn semicolons_and_shared_indent() {
        let program = parse("    a = 1; b = 2\n    c = a + b\n");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn comprehension_and_conditional_expression() {
        let program = parse("evens = [x * 2 for x in range(10) if x % 2 == 0]\nlabel = 'big' if n > 5 else 'small'");
        assert!(matches!(
            &program.body[0].kind,
            StmtKind::Assign { value: Expr::ListComp { cond: Some(_), .. }, .. }
        ));
        assert!(matches!(
            &program.body[1].kind,
            StmtKind::Assign { value: Expr::IfElse { .. }, .. }
        ));
    }

    #[test]
    fn calls_with_keywords_and_subscripts() {
        let program = parse("r = files.write('a.txt', content=text[1:], append=True)\nd['k'] = xs[-1]");
        let StmtKind::Assign { value: Expr::Call { args, kwargs, .. }, .. } = &program.body[0].kind else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs.len(), 2);
        assert!(matches!(&program.body[1].kind, StmtKind::Assign { target: Target::Index { .. }, .. }));
    }

    #[test]
    fn fstrings() {
        let program = parse("s = f\"{name!r} has {count:>3} items, {{literal}} {data['k']}\"");
        let StmtKind::Assign { value: Expr::FString(parts), .. } = &program.body[0].kind else {
            panic!("expected f-string");
        };
        let specs: Vec<Option<&str>> = parts
            .iter()
            .filter_map(|p| match p {
                FPart::Expr { spec, .. } => Some(spec.as_deref()),
                FPart::Text(_) => None,
            })
            .collect();
        assert_eq!(specs, vec![None, Some(">3"), None]);
        assert!(parts.iter().any(|p| matches!(p, FPart::Text(t) if t.contains("{literal}"))));
    }

    #[test]
    fn imports_are_collected_everywhere() {
        let program = parse("import json\nif x:\n    import os\ndef f():\n    from subprocess import run\n");
        assert_eq!(program.imports(), vec!["json", "os", "subprocess"]);
    }

    #[test]
    fn forbidden_names_are_found() {
        assert_eq!(
            parse("x = eval('1')").first_forbidden_name().as_deref(),
            Some("eval")
        );
        assert_eq!(
            parse("y = x.__class__").first_forbidden_name().as_deref(),
            Some("__class__")
        );
        assert!(parse("y = evaluate(1)").first_forbidden_name().is_none());
    }

    #[test]
    fn syntax_errors_report_lines() {
        assert_eq!(syntax_line("x = 1\ny = (2 +\n"), 3);
        assert_eq!(syntax_line("x = 1\nif x\n    y = 2"), 2);
        assert_eq!(syntax_line("x = 1\nbreak"), 2);
        assert_eq!(syntax_line("x = 1\n1 = x"), 2);
        assert_eq!(syntax_line("def f(a=1, b):\n    pass"), 1);
    }
}
