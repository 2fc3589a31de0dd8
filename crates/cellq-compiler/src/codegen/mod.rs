//! Code generation: lowering an analyzed expression into a Rhai function.
//!
//! Two strategies share one operator/method table. Values-only units operate
//! on flat sequences of scalars and route every operator through explicit
//! spreadsheet-style coercion; cell-metadata-aware units operate on per-cell
//! maps whose property names map one-to-one onto the DSL's cell properties.
//! Which strategy a unit gets is decided by the analyzer's
//! `requires_cell_metadata` flag and is reported to the caller, because the
//! execution backend must grant the richer (more expensive) data shape.
//!
//! Generated units call into [`RUNTIME_SUPPORT`], which the backend loads
//! alongside each unit; the `cq_arg` adapter there is the single place
//! generated code depends on the host's forward-reference shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analysis::BindingFacts;
use crate::ast::{BinaryOp, CallExpr, Expr, MemberExpr, UnaryOp};
use crate::error::EmitError;

/// Rhai support script the execution backend must compile together with
/// generated units (plain concatenation is sufficient).
pub const RUNTIME_SUPPORT: &str = include_str!("runtime.rhai");

/// The compiled artifact handed back to the caller. Immutable; the core
/// keeps no further state about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedUnit {
    /// Rhai source of one `fn` definition.
    pub source_text: String,
    /// The function's deterministic name.
    pub name: String,
    /// Capability the backend must provide when invoking the unit.
    pub requires_cell_metadata: bool,
    /// Free variables consumed as trailing parameters, in declaration order.
    pub free_variables: Vec<String>,
}

/// Caller-owned table that makes name disambiguation deterministic.
///
/// Two different source texts contending for the same base name get stable
/// `_2`, `_3`, ... suffixes; repeating a claim for the same (source, base)
/// pair always returns the same name. Callers sharing one registry across
/// threads must serialize access to it.
#[derive(Debug, Default)]
pub struct NameRegistry {
    assigned: HashMap<(String, String), String>,
    owners: HashMap<String, (String, String)>,
}

impl NameRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `base` for `source_text`, applying a numeric suffix if another
    /// source already owns the name.
    pub fn claim(&mut self, source_text: &str, base: &str) -> String {
        let key = (base.to_string(), source_text.to_string());
        if let Some(name) = self.assigned.get(&key) {
            return name.clone();
        }
        let mut candidate = base.to_string();
        let mut suffix = 1u32;
        while self.owners.contains_key(&candidate) {
            suffix += 1;
            candidate = format!("{base}_{suffix}");
        }
        self.owners.insert(candidate.clone(), key.clone());
        self.assigned.insert(key, candidate.clone());
        candidate
    }
}

/// Content-addressed name: repeated compilation of byte-identical source
/// always yields the same name, which is what makes caller-side caching
/// correct.
#[must_use]
pub fn deterministic_name(source_text: &str) -> String {
    let digest = Sha256::digest(source_text.as_bytes());
    let mut hex = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("qfn_{hex}")
}

/// Rhai keywords plus builtins a generated function must not shadow.
const RESERVED_NAMES: &[&str] = &[
    "fn", "let", "const", "if", "else", "switch", "while", "loop", "for", "in", "do", "until",
    "continue", "break", "return", "throw", "try", "catch", "import", "export", "as", "global",
    "private", "true", "false", "this", "Fn", "call", "curry", "type_of", "print", "debug", "eval",
    "parse_int", "parse_float", "to_string", "to_int", "to_float", "is_def_fn", "is_def_var",
];

fn is_reserved(name: &str) -> bool {
    // The cq_ namespace belongs to the runtime support script.
    name.starts_with("cq_") || RESERVED_NAMES.contains(&name)
}

/// Reduce a caller-preferred name to a safe Rhai identifier.
#[must_use]
pub fn sanitize_name(preferred: &str) -> String {
    let mut out: String = preferred
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if out.is_empty() {
        out.push('q');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if is_reserved(&out) {
        out.insert(0, '_');
    }
    out
}

/// Lower `expr` into a generated unit.
///
/// `source_text` is the original DSL source, used for content-addressed
/// naming; `registry` arbitrates name collisions across the caller's other
/// units.
pub fn emit(
    expr: &Expr,
    facts: &BindingFacts,
    source_text: &str,
    preferred_name: Option<&str>,
    registry: &mut NameRegistry,
) -> Result<GeneratedUnit, EmitError> {
    if matches!(expr, Expr::Lambda(_) | Expr::OpaqueLambda(_)) {
        return Err(EmitError::UnsupportedShape("a lambda"));
    }

    let base = match preferred_name {
        Some(p) => sanitize_name(p),
        None => deterministic_name(source_text),
    };
    let name = registry.claim(source_text, &base);

    let lowerer = Lowerer { facts };
    let result = lowerer.lower(expr)?;

    let params: Vec<&str> = facts.parameters().collect();
    let mut source = String::new();
    source.push_str(&format!("fn {name}({}) {{\n", params.join(", ")));
    for p in &params {
        // The adapter resolves forward references; everything after this
        // line sees plain grids/scalars.
        source.push_str(&format!("    let {p} = cq_arg({p});\n"));
    }
    source.push_str(&format!("    cq_marshal({result})\n"));
    source.push_str("}\n");

    Ok(GeneratedUnit {
        source_text: source,
        name,
        requires_cell_metadata: facts.requires_cell_metadata,
        free_variables: facts.free_variables.clone(),
    })
}

fn format_number(value: f64) -> String {
    // `{:?}` keeps a decimal point (`1.0`, `0.5`), so the literal stays a
    // float on the Rhai side.
    format!("{value:?}")
}

fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// DSL cell-property name → key on the per-cell map abstraction.
fn cell_property_key(member: &str) -> Option<&'static str> {
    let known: &[(&str, &str)] = &[
        ("value", "value"),
        ("color", "color"),
        ("rgb", "rgb"),
        ("row", "row"),
        ("col", "col"),
        ("bold", "bold"),
        ("italic", "italic"),
        ("fontsize", "font_size"),
        ("format", "format"),
        ("formula", "formula"),
        ("address", "address"),
    ];
    known
        .iter()
        .find(|(dsl, _)| member.eq_ignore_ascii_case(dsl))
        .map(|(_, key)| *key)
}

struct Lowerer<'a> {
    facts: &'a BindingFacts,
}

impl Lowerer<'_> {
    fn lower(&self, expr: &Expr) -> Result<String, EmitError> {
        match expr {
            Expr::Identifier(name) => Ok(name.clone()),
            Expr::Number(value) => Ok(format_number(*value)),
            Expr::Str(value) => Ok(quote_string(value)),
            Expr::RangeRef(range) => {
                let literal = range.text();
                self.facts
                    .placeholder_for(&literal)
                    .map(str::to_string)
                    .ok_or(EmitError::UnhoistedRange(literal))
            }
            Expr::Grouping(inner) => Ok(format!("({})", self.lower(inner)?)),
            Expr::Unary(u) => {
                let operand = self.lower(&u.operand)?;
                Ok(match u.op {
                    UnaryOp::Neg => format!("cq_neg({operand})"),
                    UnaryOp::Not => format!("!cq_bool({operand})"),
                })
            }
            Expr::Binary(b) => {
                let left = self.lower(&b.left)?;
                let right = self.lower(&b.right)?;
                Ok(match b.op {
                    // Native `&&`/`||` keep short-circuiting; operands are
                    // coerced to booleans first.
                    BinaryOp::And => format!("(cq_bool({left}) && cq_bool({right}))"),
                    BinaryOp::Or => format!("(cq_bool({left}) || cq_bool({right}))"),
                    BinaryOp::Eq => format!("cq_eq({left}, {right})"),
                    BinaryOp::Ne => format!("cq_ne({left}, {right})"),
                    BinaryOp::Lt => format!("cq_lt({left}, {right})"),
                    BinaryOp::Le => format!("cq_le({left}, {right})"),
                    BinaryOp::Gt => format!("cq_gt({left}, {right})"),
                    BinaryOp::Ge => format!("cq_ge({left}, {right})"),
                    BinaryOp::Add => format!("cq_add({left}, {right})"),
                    BinaryOp::Sub => format!("cq_sub({left}, {right})"),
                    BinaryOp::Mul => format!("cq_mul({left}, {right})"),
                    BinaryOp::Div => format!("cq_div({left}, {right})"),
                    BinaryOp::Mod => format!("cq_mod({left}, {right})"),
                })
            }
            Expr::Lambda(l) => {
                let body = self.lower(&l.body)?;
                Ok(format!("|{}| {body}", l.param))
            }
            // Opaque bodies are re-emitted verbatim; the contract is that
            // they are already valid Rhai.
            Expr::OpaqueLambda(l) => Ok(format!("|{}| {}", l.params.join(", "), l.body_text)),
            Expr::Index(i) => Ok(format!(
                "cq_index({}, {})",
                self.lower(&i.target)?,
                self.lower(&i.index)?
            )),
            Expr::Member(m) => self.lower_member(m),
            Expr::Call(c) => self.lower_call(c),
        }
    }

    fn lower_member(&self, m: &MemberExpr) -> Result<String, EmitError> {
        let target = self.lower(&m.target)?;
        if m.escaped {
            // Escape marker: the literal name passes through unresolved.
            return Ok(format!("{target}.{}", m.member));
        }
        if m.member.eq_ignore_ascii_case("values") {
            return Ok(format!("cq_values({target})"));
        }
        if m.member.eq_ignore_ascii_case("cells") {
            return Ok(format!("cq_cells({target})"));
        }
        if m.member.eq_ignore_ascii_case("rows") {
            return Ok(self.lower_rows(&target));
        }
        if let Some(key) = cell_property_key(&m.member) {
            return Ok(format!("{target}.{key}"));
        }
        Ok(format!("{target}.{}", m.member))
    }

    fn lower_rows(&self, target: &str) -> String {
        if self.facts.has_string_keyed_access {
            format!("cq_rows_keyed({target})")
        } else {
            format!("cq_rows({target})")
        }
    }

    fn lower_call(&self, c: &CallExpr) -> Result<String, EmitError> {
        let target = self.lower(&c.target)?;
        let args: Vec<String> = c
            .args
            .iter()
            .map(|a| self.lower(a))
            .collect::<Result<_, _>>()?;
        if c.escaped {
            return Ok(format!("{target}.{}({})", c.method, args.join(", ")));
        }
        let method = c.method.to_ascii_lowercase();
        let code = match (method.as_str(), args.len()) {
            ("where" | "filter", 1) => format!("cq_where({target}, {})", args[0]),
            ("where" | "filter", _) => arity_error(&c.method, "one predicate"),
            ("select" | "map", 1) => format!("cq_select({target}, {})", args[0]),
            ("select" | "map", _) => arity_error(&c.method, "one projection"),
            ("first", 0) => format!("cq_first({target})"),
            ("first", 1) => format!("cq_first(cq_where({target}, {}))", args[0]),
            ("firstordefault", 0) => format!("cq_first_or({target})"),
            ("firstordefault", 1) => format!("cq_first_or(cq_where({target}, {}))", args[0]),
            ("last", 0) => format!("cq_last({target})"),
            ("last", 1) => format!("cq_last(cq_where({target}, {}))", args[0]),
            ("lastordefault", 0) => format!("cq_last_or({target})"),
            ("lastordefault", 1) => format!("cq_last_or(cq_where({target}, {}))", args[0]),
            ("any", 0) => format!("cq_any({target})"),
            ("any", 1) => format!("cq_any(cq_where({target}, {}))", args[0]),
            ("all", 1) => format!("cq_all({target}, {})", args[0]),
            ("all", _) => arity_error(&c.method, "one predicate"),
            ("orderby" | "sortby", 0) => format!("cq_sort({target}, false)"),
            ("orderby" | "sortby", 1) => format!("cq_order_by({target}, {}, false)", args[0]),
            ("orderbydescending" | "sortbydescending", 0) => format!("cq_sort({target}, true)"),
            ("orderbydescending" | "sortbydescending", 1) => {
                format!("cq_order_by({target}, {}, true)", args[0])
            }
            ("take", 1) => format!("cq_take({target}, {})", args[0]),
            ("take", _) => arity_error(&c.method, "one count"),
            ("skip", 1) => format!("cq_skip({target}, {})", args[0]),
            ("skip", _) => arity_error(&c.method, "one count"),
            ("distinct", 0) => format!("cq_distinct({target})"),
            ("groupby", 1) => format!("cq_group_by({target}, {})", args[0]),
            ("groupby", _) => arity_error(&c.method, "one key selector"),
            ("aggregate" | "reduce" | "fold", 1) => format!("cq_reduce({target}, {})", args[0]),
            ("aggregate" | "reduce" | "fold", 2) => {
                format!("cq_fold({target}, {}, {})", args[0], args[1])
            }
            ("aggregate" | "reduce" | "fold", _) => {
                arity_error(&c.method, "a combiner and optional seed")
            }
            ("scan" | "runningfold", 2) => format!("cq_scan({target}, {}, {})", args[0], args[1]),
            ("scan" | "runningfold", _) => arity_error(&c.method, "a seed and a combiner"),
            ("sum", 0) => format!("cq_sum({target})"),
            ("average" | "avg", 0) => format!("cq_avg({target})"),
            ("min", 0) => format!("cq_min({target})"),
            ("max", 0) => format!("cq_max({target})"),
            ("count", 0) => format!("cq_count({target})"),
            ("count", 1) => format!("cq_count(cq_where({target}, {}))", args[0]),
            ("toarray" | "tolist", 0) => format!("cq_to_array({target})"),
            ("values", 0) => format!("cq_values({target})"),
            ("cells", 0) => format!("cq_cells({target})"),
            ("rows", 0) => self.lower_rows(&target),
            // Anything else passes through as a raw method call for the
            // backend to resolve.
            _ => format!("{target}.{}({})", c.method, args.join(", ")),
        };
        Ok(code)
    }
}

/// A recognized method used with the wrong argument count lowers to a
/// data-level error value, not a compile failure: header presence and
/// similar facts are only known at execution time, and the unit must still
/// display something in its cell.
fn arity_error(method: &str, expected: &str) -> String {
    let message = format!("{method}() expects {expected}");
    format!("cq_err({})", quote_string(&message))
}
