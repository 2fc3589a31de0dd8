#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Compiler for query expressions embedded in spreadsheet formulas.
//!
//! End users type compact query-like expressions (e.g.
//! `A1:B10.values.where(v => v > 0).sum()`) inside larger formulas; this
//! crate turns one such expression into a callable Rhai function over
//! tabular cell data. The pipeline is lex → parse → analyze → emit, each
//! stage a pure function of its inputs; see [`compile`] for the one-call
//! entry point and [`parser`], [`analysis`], [`codegen`] for the stages.
//!
//! The crate deliberately stops at code generation. It does not execute the
//! generated unit (the execution backend compiles [`codegen::RUNTIME_SUPPORT`]
//! plus the unit's source and invokes the function by name), does not read
//! spreadsheet data, and does not decide when to recompile; the
//! deterministic content-addressed [`CompileOutput::name`] is what makes a
//! caller-side cache correct.
//!
//! Malformed input never panics or errors out of [`compile`]: lexical and
//! syntactic problems come back as structured [`ParseError`]s so interactive
//! tooling can display them mid-keystroke. The only `Err` this crate
//! produces is [`EmitError`], which signals a defect in the compiler itself.

pub mod analysis;
pub mod ast;
pub mod codegen;
mod error;
pub mod parser;

use serde::{Deserialize, Serialize};

pub use analysis::{analyze, BindingFacts};
pub use ast::{Expr, ParseError, Span};
pub use codegen::{
    deterministic_name, emit, sanitize_name, GeneratedUnit, NameRegistry, RUNTIME_SUPPORT,
};
pub use error::EmitError;
pub use parser::{lex, parse, parse_source, ParseOutcome, Token, TokenKind};

/// Caller-supplied context for one compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Names bound by an enclosing binding construct (e.g. a LET-style
    /// multi-binding formula); treated as already bound at the outermost
    /// scope.
    pub known_external_names: Vec<String>,
    /// Preferred name for the generated function; sanitized before use.
    /// When absent the name is derived from a hash of the source text.
    pub preferred_name: Option<String>,
}

/// Everything the caller needs from one compilation.
///
/// When `parse_errors` is non-empty the expression failed to parse and all
/// other fields are empty; a partial parse is never presented as success.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompileOutput {
    pub source_text: String,
    pub name: String,
    pub requires_cell_metadata: bool,
    /// Parameter names in call order; range-literal placeholders appear
    /// under their synthesized names.
    pub inputs: Vec<String>,
    pub free_variables: Vec<String>,
    /// Placeholder → literal range text, for the caller to supply as actual
    /// arguments.
    pub range_reference_map: Vec<(String, String)>,
    pub parse_errors: Vec<ParseError>,
}

/// Compile one DSL expression with a private name registry.
///
/// Callers compiling several expressions that must not collide (e.g. all
/// fragments of one formula) should use [`compile_with_registry`] and share
/// a [`NameRegistry`].
pub fn compile(source: &str, options: &CompileOptions) -> Result<CompileOutput, EmitError> {
    let mut registry = NameRegistry::new();
    compile_with_registry(source, options, &mut registry)
}

/// Compile one DSL expression, arbitrating name collisions through the
/// caller's `registry`.
pub fn compile_with_registry(
    source: &str,
    options: &CompileOptions,
    registry: &mut NameRegistry,
) -> Result<CompileOutput, EmitError> {
    let tokens = parser::lex(source);
    let outcome = parser::parse(source, tokens);
    let Some(expr) = outcome.expr else {
        return Ok(CompileOutput {
            parse_errors: outcome.errors,
            ..CompileOutput::default()
        });
    };
    let facts = analysis::analyze(&expr, &options.known_external_names);
    let unit = codegen::emit(
        &expr,
        &facts,
        source,
        options.preferred_name.as_deref(),
        registry,
    )?;
    Ok(CompileOutput {
        source_text: unit.source_text,
        name: unit.name,
        requires_cell_metadata: unit.requires_cell_metadata,
        inputs: facts.ordered_inputs,
        free_variables: facts.free_variables,
        range_reference_map: facts.range_reference_map,
        parse_errors: outcome.errors,
    })
}
