use thiserror::Error;

use crate::machine::EvalError;
use crate::syntax::SyntaxError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The grammar handle could not be turned into a usable language.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("grammar ABI version {found} is outside the supported range {min}..={max}")]
    IncompatibleVersion { found: usize, min: usize, max: usize },
    #[error("runtime rejected the grammar: {0}")]
    Rejected(#[from] tree_sitter::LanguageError),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}
