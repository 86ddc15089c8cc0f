//! Lowering of lamgamma syntax trees into [`Expression`]s.
//!
//! The grammar has three named expression nodes: `identifier`, `lambda`
//! and `application`. Parentheses leave no node behind. A lambda with
//! several parameters is curried, so `fn x y -> x` lowers to the same
//! expression as `fn x -> fn y -> x`.
//!
//! Lowering, printing and dropping walk the tree with explicit stacks, so
//! nesting depth is bounded by memory rather than by the call stack.

use std::fmt;
use std::mem;
use std::ops::Range;
use std::rc::Rc;

use thiserror::Error;
use tree_sitter::{Node, Point, Tree};

use crate::LoadError;

/// A variable name. Cloning shares the underlying string.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Rc<str>);

impl Identifier {
    pub fn new(name: &str) -> Self {
        Identifier(Rc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identifier {
    fn from(name: &str) -> Self {
        Identifier::new(name)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A lowered lamgamma term. Every lambda binds exactly one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Variable(Identifier),
    Lambda {
        param: Identifier,
        body: Rc<Expression>,
    },
    Application {
        func: Rc<Expression>,
        arg: Rc<Expression>,
    },
}

impl Expression {
    pub fn var(name: &str) -> Self {
        Expression::Variable(name.into())
    }

    pub fn lambda(param: &str, body: Expression) -> Self {
        Expression::Lambda {
            param: param.into(),
            body: Rc::new(body),
        }
    }

    pub fn apply(func: Expression, arg: Expression) -> Self {
        Expression::Application {
            func: Rc::new(func),
            arg: Rc::new(arg),
        }
    }

    /// Moves the uniquely owned children out, leaving cheap leaves behind.
    fn detach_children(&mut self, pending: &mut Vec<Rc<Expression>>) {
        match self {
            Expression::Variable(_) => {}
            Expression::Lambda { param, body } => {
                pending.push(mem::replace(body, leaf(param)));
            }
            Expression::Application { func, arg } => {
                let hole = leaf(&Identifier::new(""));
                pending.push(mem::replace(func, hole.clone()));
                pending.push(mem::replace(arg, hole));
            }
        }
    }
}

fn leaf(name: &Identifier) -> Rc<Expression> {
    Rc::new(Expression::Variable(name.clone()))
}

impl Drop for Expression {
    fn drop(&mut self) {
        if matches!(self, Expression::Variable(_)) {
            return;
        }
        let mut pending = Vec::new();
        self.detach_children(&mut pending);
        while let Some(child) = pending.pop() {
            if let Ok(mut child) = Rc::try_unwrap(child) {
                child.detach_children(&mut pending);
            }
        }
    }
}

/// Prints the expression back in source syntax. Nested lambdas are merged
/// into a single `fn` with several parameters.
impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Variable(name) => write!(f, "{name}"),
            Expression::Lambda { param, body } => {
                write!(f, "fn {param}")?;
                let mut body = body;
                while let Expression::Lambda { param, body: inner } = &**body {
                    write!(f, " {param}")?;
                    body = inner;
                }
                write!(f, " -> {body}")
            }
            Expression::Application { .. } => {
                let mut args = Vec::new();
                let mut head = self;
                while let Expression::Application { func, arg } = head {
                    args.push(arg);
                    head = &**func;
                }
                match head {
                    Expression::Lambda { .. } => write!(f, "({head})")?,
                    _ => write!(f, "{head}")?,
                }
                for arg in args.into_iter().rev() {
                    match &**arg {
                        Expression::Variable(_) => write!(f, " {arg}")?,
                        _ => write!(f, " ({arg})")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Why a source text or tree could not be lowered. Positions are those of
/// the offending node.
#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("syntax error at {}:{}", .point.row + 1, .point.column + 1)]
    Invalid { point: Point, bytes: Range<usize> },
    #[error("unexpected `{kind}` node at {}:{}", .point.row + 1, .point.column + 1)]
    UnexpectedNode {
        kind: &'static str,
        point: Point,
        bytes: Range<usize>,
    },
    #[error("`{parent}` at {}:{} is missing its {child}", .point.row + 1, .point.column + 1)]
    MissingChild {
        parent: &'static str,
        child: &'static str,
        point: Point,
    },
    #[error("no expression in input")]
    Empty,
    #[error("parser returned no tree")]
    ParseAborted,
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Parses `source` with a fresh parser and lowers the result.
pub fn parse(source: &str) -> Result<Expression, SyntaxError> {
    if source.trim().is_empty() {
        return Err(SyntaxError::Empty);
    }
    let mut parser = crate::parser()?;
    let tree = parser
        .parse(source, None)
        .ok_or(SyntaxError::ParseAborted)?;
    tracing::debug!(bytes = source.len(), "parsed lamgamma source");
    lower(&tree, source)
}

/// Lowers a tree produced by this grammar from `source`. Any ERROR or
/// MISSING node is reported before lowering starts. An identifier whose
/// byte range does not fall on `source` is reported as
/// [`SyntaxError::Invalid`], which only happens when `tree` was parsed from
/// some other text.
pub fn lower(tree: &Tree, source: &str) -> Result<Expression, SyntaxError> {
    let root = tree.root_node();
    if root.has_error() {
        let node = first_invalid(root).unwrap_or(root);
        return Err(invalid(node));
    }

    let mut tasks = vec![Task::Visit(root)];
    let mut done: Vec<Expression> = Vec::new();
    while let Some(task) = tasks.pop() {
        match task {
            Task::Visit(node) => visit(node, source, &mut tasks, &mut done)?,
            Task::Apply => {
                let (Some(arg), Some(func)) = (done.pop(), done.pop()) else {
                    unreachable!("application operands are lowered before the application");
                };
                done.push(Expression::apply(func, arg));
            }
            Task::Abstract(names) => {
                let Some(body) = done.pop() else {
                    unreachable!("a lambda body is lowered before the lambda");
                };
                done.push(names.into_iter().rev().fold(body, |body, param| {
                    Expression::Lambda {
                        param,
                        body: Rc::new(body),
                    }
                }));
            }
        }
    }
    done.pop().ok_or(SyntaxError::Empty)
}

enum Task<'tree> {
    Visit(Node<'tree>),
    /// Pops argument then function and pushes their application.
    Apply,
    /// Pops a body and wraps it in one lambda per name.
    Abstract(Vec<Identifier>),
}

fn first_invalid(root: Node<'_>) -> Option<Node<'_>> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        stack.extend(
            (0..node.child_count())
                .rev()
                .filter_map(|i| node.child(i))
                .filter(|child| child.has_error() || child.is_missing()),
        );
    }
    None
}

fn visit<'tree>(
    node: Node<'tree>,
    source: &str,
    tasks: &mut Vec<Task<'tree>>,
    done: &mut Vec<Expression>,
) -> Result<(), SyntaxError> {
    match node.kind() {
        "source_file" => match node.named_child(0) {
            Some(expr) => tasks.push(Task::Visit(expr)),
            None => return Err(SyntaxError::Empty),
        },
        "identifier" => done.push(Expression::Variable(Identifier::new(text(node, source)?))),
        "lambda" => {
            let params = named_child(node, 0, "parameters")?;
            if params.kind() != "parameters" {
                return Err(unexpected(params));
            }
            let body = named_child(node, 1, "body")?;

            let mut cursor = params.walk();
            let names = params
                .named_children(&mut cursor)
                .map(|param| -> Result<Identifier, SyntaxError> {
                    match param.kind() {
                        "identifier" => Ok(Identifier::new(text(param, source)?)),
                        _ => Err(unexpected(param)),
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            if names.is_empty() {
                return Err(SyntaxError::MissingChild {
                    parent: "parameters",
                    child: "identifier",
                    point: params.start_position(),
                });
            }

            tasks.push(Task::Abstract(names));
            tasks.push(Task::Visit(body));
        }
        "application" => {
            let func = named_child(node, 0, "function")?;
            let arg = named_child(node, 1, "argument")?;
            tasks.push(Task::Apply);
            tasks.push(Task::Visit(arg));
            tasks.push(Task::Visit(func));
        }
        _ => return Err(unexpected(node)),
    }
    Ok(())
}

fn text<'a>(node: Node<'_>, source: &'a str) -> Result<&'a str, SyntaxError> {
    source.get(node.byte_range()).ok_or_else(|| invalid(node))
}

fn named_child<'tree>(
    node: Node<'tree>,
    index: usize,
    child: &'static str,
) -> Result<Node<'tree>, SyntaxError> {
    node.named_child(index)
        .ok_or_else(|| SyntaxError::MissingChild {
            parent: node.kind(),
            child,
            point: node.start_position(),
        })
}

fn invalid(node: Node<'_>) -> SyntaxError {
    SyntaxError::Invalid {
        point: node.start_position(),
        bytes: node.byte_range(),
    }
}

fn unexpected(node: Node<'_>) -> SyntaxError {
    SyntaxError::UnexpectedNode {
        kind: node.kind(),
        point: node.start_position(),
        bytes: node.byte_range(),
    }
}
