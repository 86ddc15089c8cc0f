//! A CK machine for lamgamma expressions.
//!
//! The control is either an expression under evaluation or a value being
//! returned; the continuation is a stack of frames. Closures capture the
//! environment they were created in, so variables never need renaming.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::syntax::{Expression, Identifier};

/// Why a machine could not take a step or reach a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unbound variable: {0}")]
    Unbound(String),
    #[error("empty continuation")]
    EmptyContinuation,
    #[error("evaluation did not finish within {0} steps")]
    StepLimit(usize),
}

/// The only kind of value: a lambda paired with its environment.
#[derive(Clone)]
pub struct Closure {
    pub param: Identifier,
    pub body: Rc<Expression>,
    pub env: Env,
}

impl Closure {
    pub fn lambda(&self) -> Expression {
        Expression::Lambda {
            param: self.param.clone(),
            body: self.body.clone(),
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("lambda", &self.lambda().to_string())
            .field("env", &self.env)
            .finish()
    }
}

impl fmt::Display for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lambda())
    }
}

/// Persistent variable bindings, newest first. Extending shares the tail.
#[derive(Clone, Default)]
pub struct Env(Option<Rc<Binding>>);

struct Binding {
    name: Identifier,
    value: Closure,
    next: Env,
}

impl Env {
    pub fn empty() -> Self {
        Env(None)
    }

    pub fn extend(&self, name: Identifier, value: Closure) -> Self {
        Env(Some(Rc::new(Binding {
            name,
            value,
            next: self.clone(),
        })))
    }

    pub fn lookup(&self, name: &Identifier) -> Option<&Closure> {
        self.iter()
            .find(|(bound, _)| *bound == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &Closure)> {
        std::iter::successors(self.0.as_deref(), |binding| binding.next.0.as_deref())
            .map(|binding| (&binding.name, &binding.value))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// Unlinks uniquely owned bindings one at a time, so long environments do
/// not recurse on drop.
impl Drop for Env {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(binding) = next {
            next = match Rc::try_unwrap(binding) {
                Ok(mut binding) => binding.next.0.take(),
                Err(_) => None,
            };
        }
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Frame {
    /// Waiting for the function; the argument is evaluated next in `env`.
    AppL { arg: Rc<Expression>, env: Env },
    /// Waiting for the argument to pass to `closure`.
    AppR { closure: Closure },
}

/// Frames with the innermost one last.
pub type Cont = Vec<Frame>;

#[derive(Debug, Clone)]
pub enum State {
    Eval {
        expr: Rc<Expression>,
        env: Env,
        cont: Cont,
    },
    ApplyCont {
        value: Closure,
        cont: Cont,
    },
}

impl State {
    /// A value with nothing left to do.
    pub fn is_final(&self) -> bool {
        matches!(self, State::ApplyCont { cont, .. } if cont.is_empty())
    }

    fn kind(&self) -> &'static str {
        match self {
            State::Eval { .. } => "eval",
            State::ApplyCont { .. } => "apply",
        }
    }

    fn depth(&self) -> usize {
        match self {
            State::Eval { cont, .. } | State::ApplyCont { cont, .. } => cont.len(),
        }
    }
}

/// Bounds on a single [`Machine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_steps: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits { max_steps: 100_000 }
    }
}

/// Evaluates expressions by stepping [`State`]s within its [`Limits`].
#[derive(Debug, Clone, Default)]
pub struct Machine {
    limits: Limits,
}

impl Machine {
    pub fn new(limits: Limits) -> Self {
        Machine { limits }
    }

    pub fn init_state(expr: Expression) -> State {
        State::Eval {
            expr: Rc::new(expr),
            env: Env::empty(),
            cont: Cont::new(),
        }
    }

    /// Performs one transition.
    pub fn step(&self, state: State) -> Result<State, EvalError> {
        match state {
            State::Eval { expr, env, mut cont } => match &*expr {
                Expression::Variable(name) => match env.lookup(name) {
                    Some(value) => Ok(State::ApplyCont {
                        value: value.clone(),
                        cont,
                    }),
                    None => Err(EvalError::Unbound(name.to_string())),
                },
                Expression::Lambda { param, body } => Ok(State::ApplyCont {
                    value: Closure {
                        param: param.clone(),
                        body: body.clone(),
                        env,
                    },
                    cont,
                }),
                Expression::Application { func, arg } => {
                    cont.push(Frame::AppL {
                        arg: arg.clone(),
                        env: env.clone(),
                    });
                    Ok(State::Eval {
                        expr: func.clone(),
                        env,
                        cont,
                    })
                }
            },
            State::ApplyCont { value, mut cont } => match cont.pop() {
                Some(Frame::AppL { arg, env }) => {
                    cont.push(Frame::AppR { closure: value });
                    Ok(State::Eval {
                        expr: arg,
                        env,
                        cont,
                    })
                }
                Some(Frame::AppR { closure }) => Ok(State::Eval {
                    expr: closure.body,
                    env: closure.env.extend(closure.param, value),
                    cont,
                }),
                None => Err(EvalError::EmptyContinuation),
            },
        }
    }

    /// Steps until a final state and returns its value.
    pub fn run(&self, mut state: State) -> Result<Closure, EvalError> {
        let mut steps = 0;
        loop {
            if let State::ApplyCont { value, cont } = &state {
                if cont.is_empty() {
                    tracing::debug!(steps, "evaluation finished");
                    return Ok(value.clone());
                }
            }
            if steps == self.limits.max_steps {
                return Err(EvalError::StepLimit(self.limits.max_steps));
            }
            tracing::trace!(step = steps, kind = state.kind(), depth = state.depth(), "ck step");
            state = self.step(state)?;
            steps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tracing_subscriber::EnvFilter;

    use super::*;
    use crate::syntax::parse;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn run(source: &str) -> Result<Closure, EvalError> {
        init_tracing();
        Machine::default().run(Machine::init_state(parse(source).unwrap()))
    }

    #[test]
    fn lambda_steps_to_closure_then_halts() {
        let machine = Machine::default();
        let state = Machine::init_state(parse("fn x -> x").unwrap());

        let state = machine.step(state).unwrap();
        assert!(state.is_final());
        match &state {
            State::ApplyCont { value, cont } => {
                assert_eq!(value.to_string(), "fn x -> x");
                assert!(value.env.is_empty());
                assert!(cont.is_empty());
            }
            other => panic!("expected a value, got {other:?}"),
        }

        assert_eq!(
            machine.step(state).unwrap_err(),
            EvalError::EmptyContinuation
        );
    }

    #[test]
    fn application_pushes_frames() {
        let machine = Machine::default();
        let state = Machine::init_state(parse("(fn x -> x) (fn y -> y)").unwrap());

        let state = machine.step(state).unwrap();
        assert!(matches!(&state, State::Eval { cont, .. } if matches!(cont[..], [Frame::AppL { .. }])));
        let state = machine.step(state).unwrap();
        assert!(matches!(&state, State::ApplyCont { cont, .. } if cont.len() == 1));
        let state = machine.step(state).unwrap();
        assert!(matches!(&state, State::Eval { cont, .. } if matches!(cont[..], [Frame::AppR { .. }])));
        let state = machine.step(state).unwrap();
        let state = machine.step(state).unwrap();
        match state {
            State::Eval { expr, env, cont } => {
                assert_eq!(*expr, Expression::var("x"));
                assert_eq!(env.len(), 1);
                assert!(cont.is_empty());
            }
            other => panic!("expected the body under evaluation, got {other:?}"),
        }
    }

    #[test]
    fn identity_applied_to_identity() {
        let value = run("(fn x -> x) (fn y -> y)").unwrap();
        assert_eq!(value.to_string(), "fn y -> y");
        assert!(value.env.is_empty());
    }

    #[test]
    fn closures_capture_their_environment() {
        let value = run("(fn x y -> x) (fn a -> a)").unwrap();
        assert_eq!(value.to_string(), "fn y -> x");
        assert_eq!(value.env.len(), 1);
        let bound = value.env.lookup(&Identifier::new("x")).unwrap();
        assert_eq!(bound.to_string(), "fn a -> a");
    }

    #[test]
    fn church_booleans_select() {
        let t = "(fn x y -> x)";
        let e = "(fn x y -> y)";
        let value = run(&format!("{t} (fn a -> a) (fn b -> b)")).unwrap();
        assert_eq!(value.to_string(), "fn a -> a");
        let value = run(&format!("{e} (fn a -> a) (fn b -> b)")).unwrap();
        assert_eq!(value.to_string(), "fn b -> b");
    }

    #[test]
    fn church_numeral_applies_twice() {
        let value = run("(fn s z -> s (s z)) (fn x -> x) (fn y -> y)").unwrap();
        assert_eq!(value.to_string(), "fn y -> y");
    }

    #[test]
    fn free_variable_is_unbound() {
        assert_eq!(run("g").unwrap_err(), EvalError::Unbound("g".into()));
        assert_eq!(
            run("(fn x -> y) (fn z -> z)").unwrap_err(),
            EvalError::Unbound("y".into())
        );
    }

    #[test]
    fn divergence_hits_step_limit() {
        init_tracing();
        let machine = Machine::new(Limits { max_steps: 1_000 });
        let state = Machine::init_state(parse("(fn x -> x x) (fn x -> x x)").unwrap());
        assert_eq!(machine.run(state).unwrap_err(), EvalError::StepLimit(1_000));
    }

    #[test]
    fn long_application_chain_evaluates() {
        let source = format!("(fn y -> y){}", " (fn y -> y)".repeat(10_000));
        let value = run(&source).unwrap();
        assert_eq!(value.to_string(), "fn y -> y");
    }

    #[test]
    fn deeply_nested_lambda_evaluates_to_closure() {
        let source = format!("{}x", "fn x -> ".repeat(10_000));
        let value = crate::evaluate(&source).unwrap();
        assert!(value.to_string().ends_with(" x -> x"));
        assert!(value.env.is_empty());
    }

    #[test]
    fn drops_long_environment() {
        let value = Closure {
            param: "a".into(),
            body: Rc::new(Expression::var("a")),
            env: Env::empty(),
        };
        let x = Identifier::new("x");
        let mut env = Env::empty();
        for _ in 0..100_000 {
            env = env.extend(x.clone(), value.clone());
        }
        assert_eq!(env.len(), 100_000);
        let shared = env.clone();
        drop(env);
        assert_eq!(shared.len(), 100_000);
        drop(shared);
    }

    #[test]
    fn env_shadows_older_bindings() {
        let id = |name: &str| Closure {
            param: name.into(),
            body: Rc::new(Expression::Variable(name.into())),
            env: Env::empty(),
        };
        let x = Identifier::new("x");
        let env = Env::empty()
            .extend(x.clone(), id("a"))
            .extend(x.clone(), id("b"));
        assert_eq!(env.len(), 2);
        assert_eq!(env.lookup(&x).unwrap().to_string(), "fn b -> b");
        assert!(env.lookup(&Identifier::new("y")).is_none());
    }
}
