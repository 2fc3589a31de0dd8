use serde::{Deserialize, Serialize};

/// Byte range in the original expression source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A recoverable diagnostic produced during lexing/parsing.
///
/// Parsing never throws for malformed input; it accumulates zero or more of
/// these and returns a null expression instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (at {}..{})",
            self.message, self.span.start, self.span.end
        )
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Expression tree for the query DSL.
///
/// The node set is closed: downstream stages match exhaustively, so adding a
/// variant is a compile-time ripple through the analyzer and the generator.
/// Nodes own their children outright (`Box`), giving a strict tree with no
/// sharing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Identifier(String),
    Number(f64),
    Str(String),
    RangeRef(RangeRef),
    Member(MemberExpr),
    Call(CallExpr),
    Index(IndexExpr),
    Lambda(LambdaExpr),
    OpaqueLambda(OpaqueLambdaExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Grouping(Box<Expr>),
}

impl Expr {
    /// Stable JSON serialization useful for debugging/tests.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("Expr should be JSON-serializable")
    }
}

/// A literal two-corner cell-address pair, e.g. `A1:B10` or `$A$1:$B10`.
///
/// Corner lexemes are kept verbatim, including absolute-reference `$`
/// markers, so the hoisted literal round-trips exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRef {
    pub start: String,
    pub end: String,
}

impl RangeRef {
    /// The literal text of the reference as written in the source.
    #[must_use]
    pub fn text(&self) -> String {
        format!("{}:{}", self.start, self.end)
    }
}

/// Property access, e.g. `tbl.cells` or `x.@Raw`.
///
/// `escaped` marks members introduced via the `.@` escape marker: the name
/// bypasses keyword/alias interpretation and is passed through unresolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberExpr {
    pub target: Box<Expr>,
    pub member: String,
    pub escaped: bool,
}

/// Method call, e.g. `data.where(v => v > 0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    pub target: Box<Expr>,
    pub method: String,
    pub escaped: bool,
    pub args: Vec<Expr>,
}

/// Bracket indexing, e.g. `row["Price"]` or `r[-1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexExpr {
    pub target: Box<Expr>,
    pub index: Box<Expr>,
}

/// Single-parameter, expression-bodied lambda: `v => v > 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaExpr {
    pub param: String,
    pub body: Box<Expr>,
}

/// Lambda carried through unparsed.
///
/// Covers the brace-delimited statement body and the parenthesized parameter
/// forms. `body_text` is a verbatim slice of the source and is re-emitted
/// as-is; the contract is that it must already be valid target-language
/// syntax.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueLambdaExpr {
    pub params: Vec<String>,
    pub body_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub left: Box<Expr>,
    pub op: BinaryOp,
    pub right: Box<Expr>,
}
