//! Syntax tree for action code.

use serde_json::Value;
use std::sync::Arc;

/// A parsed action.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// A statement and the source line it starts on.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// `import module [as alias]`
    Import { module: String, alias: Option<String> },
    /// `from module import name [as alias], ...`
    FromImport {
        module: String,
        names: Vec<(String, Option<String>)>,
    },
    /// `target = value`
    Assign { target: Target, value: Expr },
    /// `target op= value`
    AugAssign { target: Target, op: BinOp, value: Expr },
    /// A bare expression, evaluated for its effect (and remembered as the
    /// action's value when it is the last one run).
    Expr(Expr),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    FunctionDef(Arc<FunctionDef>),
    Return(Option<Expr>),
    Assert { cond: Expr, message: Option<Expr> },
    Break,
    Continue,
    Pass,
}

/// `def name(params): body`
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    /// Parameters in order, with their default expressions.
    pub params: Vec<(String, Option<Expr>)>,
    pub body: Vec<Stmt>,
}

/// The left-hand side of an assignment or a `for` loop.
#[derive(Debug, Clone)]
pub enum Target {
    Name(String),
    /// `base[index]`
    Index { base: Expr, index: Expr },
    /// `base.name` on a map
    Attr { base: Expr, name: String },
    /// `a, b`
    Tuple(Vec<Target>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    FString(Vec<FPart>),
    Name(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    /// `[expr for target in iter if cond]`
    ListComp {
        expr: Box<Expr>,
        target: Box<Target>,
        iter: Box<Expr>,
        cond: Option<Box<Expr>>,
    },
    Attr { base: Box<Expr>, name: String },
    Index { base: Box<Expr>, index: Box<Expr> },
    Slice {
        base: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    /// `a < b <= c` keeps every operand so each is evaluated once.
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `then if cond else otherwise`
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `await expr`; tool calls are awaited anyway, so this is transparent.
    Await(Box<Expr>),
}

/// One piece of an f-string.
#[derive(Debug, Clone)]
pub enum FPart {
    Text(String),
    Expr { expr: Expr, spec: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl Program {
    /// Every module the program imports, in source order, including imports
    /// nested inside blocks and function bodies.
    pub fn imports(&self) -> Vec<&str> {
        let mut found = Vec::new();
        walk_stmts(
            &self.body,
            &mut |stmt| {
                if let StmtKind::Import { module, .. } | StmtKind::FromImport { module, .. } =
                    &stmt.kind
                {
                    found.push(module.as_str());
                }
            },
            &mut |_| {},
        );
        found
    }

    /// The first reference to a name the sandbox refuses to expose.
    pub fn first_forbidden_name(&self) -> Option<String> {
        let mut found: Option<String> = None;
        walk_stmts(&self.body, &mut |_| {}, &mut |expr| {
            if found.is_some() {
                return;
            }
            let name = match expr {
                Expr::Name(name) => name,
                Expr::Attr { name, .. } => name,
                _ => return,
            };
            if is_forbidden_name(name) {
                found = Some(name.clone());
            }
        });
        found
    }
}

/// Builtins that would let code escape the sandbox in a general-purpose
/// interpreter. None of them exist here, but reaching for them is reported
/// as a violation rather than a missing name.
pub const FORBIDDEN_NAMES: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "open",
    "__import__",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "input",
    "breakpoint",
];

pub fn is_forbidden_name(name: &str) -> bool {
    FORBIDDEN_NAMES.contains(&name) || (name.starts_with("__") && name.ends_with("__"))
}

fn walk_stmts<'a>(
    stmts: &'a [Stmt],
    on_stmt: &mut dyn FnMut(&'a Stmt),
    on_expr: &mut dyn FnMut(&Expr),
) {
    for stmt in stmts {
        on_stmt(stmt);
        match &stmt.kind {
            StmtKind::Import { .. }
            | StmtKind::FromImport { .. }
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass => {}
            StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
                walk_target(target, on_expr);
                walk_expr(value, on_expr);
            }
            StmtKind::Expr(expr) => walk_expr(expr, on_expr),
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    walk_expr(cond, on_expr);
                    walk_stmts(body, on_stmt, on_expr);
                }
                walk_stmts(orelse, on_stmt, on_expr);
            }
            StmtKind::For { target, iter, body } => {
                walk_target(target, on_expr);
                walk_expr(iter, on_expr);
                walk_stmts(body, on_stmt, on_expr);
            }
            StmtKind::While { cond, body } => {
                walk_expr(cond, on_expr);
                walk_stmts(body, on_stmt, on_expr);
            }
            StmtKind::FunctionDef(def) => {
                on_expr(&Expr::Name(def.name.clone()));
                for (_, default) in &def.params {
                    if let Some(default) = default {
                        walk_expr(default, on_expr);
                    }
                }
                walk_stmts(&def.body, on_stmt, on_expr);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    walk_expr(value, on_expr);
                }
            }
            StmtKind::Assert { cond, message } => {
                walk_expr(cond, on_expr);
                if let Some(message) = message {
                    walk_expr(message, on_expr);
                }
            }
        }
    }
}

fn walk_target(target: &Target, on_expr: &mut dyn FnMut(&Expr)) {
    match target {
        Target::Name(name) => on_expr(&Expr::Name(name.clone())),
        Target::Index { base, index } => {
            walk_expr(base, on_expr);
            walk_expr(index, on_expr);
        }
        Target::Attr { base, name } => {
            walk_expr(base, on_expr);
            on_expr(&Expr::Name(name.clone()));
        }
        Target::Tuple(targets) => {
            for t in targets {
                walk_target(t, on_expr);
            }
        }
    }
}

fn walk_expr(expr: &Expr, on_expr: &mut dyn FnMut(&Expr)) {
    on_expr(expr);
    match expr {
        Expr::Literal(_) | Expr::Name(_) => {}
        Expr::FString(parts) => {
            for part in parts {
                if let FPart::Expr { expr, .. } = part {
                    walk_expr(expr, on_expr);
                }
            }
        }
        Expr::List(items) => items.iter().for_each(|e| walk_expr(e, on_expr)),
        Expr::Map(entries) => {
            for (k, v) in entries {
                walk_expr(k, on_expr);
                walk_expr(v, on_expr);
            }
        }
        Expr::ListComp { expr, target, iter, cond } => {
            walk_expr(expr, on_expr);
            walk_target(target, on_expr);
            walk_expr(iter, on_expr);
            if let Some(cond) = cond {
                walk_expr(cond, on_expr);
            }
        }
        Expr::Attr { base, .. } => walk_expr(base, on_expr),
        Expr::Index { base, index } => {
            walk_expr(base, on_expr);
            walk_expr(index, on_expr);
        }
        Expr::Slice { base, start, end } => {
            walk_expr(base, on_expr);
            for bound in [start, end].into_iter().flatten() {
                walk_expr(bound, on_expr);
            }
        }
        Expr::Call { func, args, kwargs } => {
            walk_expr(func, on_expr);
            args.iter().for_each(|e| walk_expr(e, on_expr));
            kwargs.iter().for_each(|(_, e)| walk_expr(e, on_expr));
        }
        Expr::Neg(inner) | Expr::Not(inner) | Expr::Await(inner) => walk_expr(inner, on_expr),
        Expr::Binary { left, right, .. } | Expr::And(left, right) | Expr::Or(left, right) => {
            walk_expr(left, on_expr);
            walk_expr(right, on_expr);
        }
        Expr::Compare { first, rest } => {
            walk_expr(first, on_expr);
            rest.iter().for_each(|(_, e)| walk_expr(e, on_expr));
        }
        Expr::IfElse { cond, then, otherwise } => {
            walk_expr(cond, on_expr);
            walk_expr(then, on_expr);
            walk_expr(otherwise, on_expr);
        }
    }
}
