use thiserror::Error;

/// Code-generation failure.
///
/// Unlike lexical and syntactic problems (which are recovered into
/// diagnostics and returned to the caller), these indicate a defect in the
/// compiler itself: the generator was handed an AST shape the earlier stages
/// should never produce. They surface loudly as `Err` rather than emitting
/// invalid output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    #[error("range literal `{0}` has no hoisted placeholder")]
    UnhoistedRange(String),
    #[error("cannot emit {0} as a value-producing expression")]
    UnsupportedShape(&'static str),
}
