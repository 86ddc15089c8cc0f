//! Rust bindings for the `tree-sitter-lamgamma-parser` grammar.
//!
//! This follows the standard layout used by Tree-sitter grammars so that
//! consumers can link the generated parser and obtain a
//! [`tree_sitter::Language`] handle:
//!
//! ```
//! let mut parser = tree_sitter::Parser::new();
//! parser
//!     .set_language(&tree_sitter_lamgamma_parser::language())
//!     .expect("Error loading LamgammaParser grammar");
//! let tree = parser.parse("fn x -> x", None).unwrap();
//! assert_eq!(tree.root_node().kind(), "source_file");
//! ```
//!
//! On top of the raw handle the crate lowers syntax trees into
//! [`Expression`]s ([`syntax`]) and evaluates them with a CK machine
//! ([`machine`]).

use tree_sitter::{Language, Parser};

mod error;
pub mod machine;
pub mod syntax;

pub use error::{Error, LoadError, Result};
pub use machine::{Closure, EvalError, Limits, Machine};
pub use syntax::{Expression, Identifier, SyntaxError};

extern "C" {
    fn tree_sitter_lamgamma_parser() -> Language;
}

/// Returns the Tree-sitter [`Language`] for this grammar.
pub fn language() -> Language {
    unsafe { tree_sitter_lamgamma_parser() }
}

/// The content of the [`node-types.json`][] file for this grammar.
///
/// [`node-types.json`]: https://tree-sitter.github.io/tree-sitter/using-parsers#static-node-types
pub const NODE_TYPES: &str = include_str!("../../src/node-types.json");

/// Fails unless `version` is an ABI version the linked runtime can load.
pub fn check_version(version: usize) -> Result<(), LoadError> {
    let min = tree_sitter::MIN_COMPATIBLE_LANGUAGE_VERSION;
    let max = tree_sitter::LANGUAGE_VERSION;
    if (min..=max).contains(&version) {
        Ok(())
    } else {
        Err(LoadError::IncompatibleVersion {
            found: version,
            min,
            max,
        })
    }
}

/// Checks that the runtime accepts `language` by installing it into a
/// scratch parser.
pub fn check_language(language: &Language) -> Result<(), LoadError> {
    check_version(language.version())?;
    Parser::new().set_language(language)?;
    Ok(())
}

/// Returns the grammar handle after checking that the runtime accepts it.
pub fn load() -> Result<Language, LoadError> {
    let language = language();
    check_language(&language)?;
    tracing::debug!(
        version = language.version(),
        node_kinds = language.node_kind_count(),
        "loaded lamgamma grammar"
    );
    Ok(language)
}

/// Creates a parser with this grammar installed.
pub fn parser() -> Result<Parser, LoadError> {
    let mut parser = Parser::new();
    parser.set_language(&load()?)?;
    Ok(parser)
}

/// Parses, lowers and evaluates `source` with the default [`Limits`].
pub fn evaluate(source: &str) -> Result<Closure> {
    let expr = syntax::parse(source)?;
    let machine = Machine::default();
    let value = machine.run(Machine::init_state(expr))?;
    Ok(value)
}
