//! Capability and binding analysis.
//!
//! A single walk over the AST computes everything the code generator needs
//! beyond the tree itself: the ordered top-level inputs, the free variables
//! referenced inside lambda bodies, whether the expression touches per-cell
//! metadata (which selects the lowering strategy and must propagate to the
//! caller so the execution backend can grant the extra capability), the
//! hoisted range literals, and whether string-keyed column access occurs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ast::{Expr, RangeRef};

/// Facts derived from one expression. Computed once, immutable afterward,
/// discarded after code generation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BindingFacts {
    /// Top-level input names in first-seen order, deduplicated. Range-literal
    /// placeholders appear here at the position of the literal's first use.
    pub ordered_inputs: Vec<String>,
    /// Identifiers referenced inside a lambda body that are bound neither by
    /// that lambda nor any enclosing one, nor already a top-level input.
    pub free_variables: Vec<String>,
    /// True when any cell-metadata property or the `cells` chain entry is
    /// reached anywhere in the tree.
    pub requires_cell_metadata: bool,
    /// Placeholder name → literal range text, in hoisting order. The literal
    /// round-trips verbatim, `$` markers included.
    pub range_reference_map: Vec<(String, String)>,
    /// True when a bracket index with a string-literal key occurs; the
    /// generated unit then needs a header row to resolve column names.
    pub has_string_keyed_access: bool,
}

impl BindingFacts {
    /// The synthesized placeholder standing in for `literal`, if hoisted.
    #[must_use]
    pub fn placeholder_for(&self, literal: &str) -> Option<&str> {
        self.range_reference_map
            .iter()
            .find(|(_, text)| text == literal)
            .map(|(name, _)| name.as_str())
    }

    /// Generated-function parameters: ordered inputs first, then free
    /// variables.
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.ordered_inputs
            .iter()
            .chain(self.free_variables.iter())
            .map(String::as_str)
    }
}

/// Member names whose presence switches code generation to the
/// cell-metadata-aware strategy. Matched case-insensitively; `cells` is the
/// chain entry into metadata mode, the rest are per-cell properties. The
/// `values` chain entry keeps the expression in values-only mode and is
/// deliberately absent.
fn is_metadata_member(name: &str) -> bool {
    name.eq_ignore_ascii_case("value")
        || name.eq_ignore_ascii_case("color")
        || name.eq_ignore_ascii_case("rgb")
        || name.eq_ignore_ascii_case("row")
        || name.eq_ignore_ascii_case("col")
        || name.eq_ignore_ascii_case("bold")
        || name.eq_ignore_ascii_case("italic")
        || name.eq_ignore_ascii_case("fontSize")
        || name.eq_ignore_ascii_case("format")
        || name.eq_ignore_ascii_case("formula")
        || name.eq_ignore_ascii_case("address")
        || name.eq_ignore_ascii_case("cells")
}

/// Analyze `expr`, treating `known_external_names` (e.g. names bound by an
/// enclosing binding construct) as already bound at the outermost scope:
/// they never surface as free variables and instead flow into
/// `ordered_inputs` on first use.
#[must_use]
pub fn analyze(expr: &Expr, known_external_names: &[String]) -> BindingFacts {
    let mut used_names = HashSet::new();
    collect_used_names(expr, &mut used_names);

    let mut walker = Walker {
        known: known_external_names,
        scopes: Vec::new(),
        used_names,
        placeholder_seq: 0,
        facts: BindingFacts::default(),
    };
    walker.walk(expr);
    walker.facts
}

/// Every identifier and lambda parameter in the expression; hoisted
/// placeholders must not collide with any of them.
fn collect_used_names(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Identifier(name) => {
            out.insert(name.clone());
        }
        Expr::Number(_) | Expr::Str(_) | Expr::RangeRef(_) => {}
        Expr::Member(m) => collect_used_names(&m.target, out),
        Expr::Call(c) => {
            collect_used_names(&c.target, out);
            for arg in &c.args {
                collect_used_names(arg, out);
            }
        }
        Expr::Index(i) => {
            collect_used_names(&i.target, out);
            collect_used_names(&i.index, out);
        }
        Expr::Lambda(l) => {
            out.insert(l.param.clone());
            collect_used_names(&l.body, out);
        }
        Expr::OpaqueLambda(l) => {
            for p in &l.params {
                out.insert(p.clone());
            }
        }
        Expr::Unary(u) => collect_used_names(&u.operand, out),
        Expr::Binary(b) => {
            collect_used_names(&b.left, out);
            collect_used_names(&b.right, out);
        }
        Expr::Grouping(inner) => collect_used_names(inner, out),
    }
}

struct Walker<'a> {
    known: &'a [String],
    /// Names bound by the lambdas currently enclosing the walk position.
    scopes: Vec<String>,
    used_names: HashSet<String>,
    placeholder_seq: u32,
    facts: BindingFacts,
}

impl Walker<'_> {
    fn walk(&mut self, expr: &Expr) {
        match expr {
            Expr::Identifier(name) => self.record_identifier(name),
            Expr::Number(_) | Expr::Str(_) => {}
            Expr::RangeRef(range) => self.record_range(range),
            Expr::Member(m) => {
                self.walk(&m.target);
                if !m.escaped && is_metadata_member(&m.member) {
                    self.facts.requires_cell_metadata = true;
                }
            }
            Expr::Call(c) => {
                self.walk(&c.target);
                if !c.escaped && is_metadata_member(&c.method) {
                    self.facts.requires_cell_metadata = true;
                }
                for arg in &c.args {
                    self.walk(arg);
                }
            }
            Expr::Index(i) => {
                self.walk(&i.target);
                if matches!(*i.index, Expr::Str(_)) {
                    self.facts.has_string_keyed_access = true;
                }
                self.walk(&i.index);
            }
            Expr::Lambda(l) => {
                self.scopes.push(l.param.clone());
                self.walk(&l.body);
                self.scopes.pop();
            }
            // Opaque bodies are target-language text and are not scanned;
            // their parameters bind nothing the walk can see.
            Expr::OpaqueLambda(_) => {}
            Expr::Unary(u) => self.walk(&u.operand),
            Expr::Binary(b) => {
                self.walk(&b.left);
                self.walk(&b.right);
            }
            Expr::Grouping(inner) => self.walk(inner),
        }
    }

    fn record_identifier(&mut self, name: &str) {
        if self.scopes.iter().any(|bound| bound == name) {
            return;
        }
        let known = self.known.iter().any(|k| k == name);
        if self.scopes.is_empty() || known {
            self.push_input(name);
        } else if !self.facts.ordered_inputs.iter().any(|i| i == name)
            && !self.facts.free_variables.iter().any(|f| f == name)
        {
            self.facts.free_variables.push(name.to_string());
        }
    }

    fn push_input(&mut self, name: &str) {
        if !self.facts.ordered_inputs.iter().any(|i| i == name) {
            self.facts.ordered_inputs.push(name.to_string());
        }
        // A name promoted to input must not stay listed as free, or it would
        // appear twice in the parameter list.
        self.facts.free_variables.retain(|f| f != name);
    }

    fn record_range(&mut self, range: &RangeRef) {
        let literal = range.text();
        if self
            .facts
            .range_reference_map
            .iter()
            .any(|(_, text)| *text == literal)
        {
            let placeholder = self
                .facts
                .placeholder_for(&literal)
                .map(str::to_string)
                .unwrap_or_default();
            self.push_input(&placeholder);
            return;
        }
        let placeholder = self.next_placeholder();
        self.facts
            .range_reference_map
            .push((placeholder.clone(), literal));
        self.push_input(&placeholder);
    }

    /// Synthesized placeholder names are stable (`range_1`, `range_2`, ...)
    /// and skip anything already used as an identifier or parameter in the
    /// expression.
    fn next_placeholder(&mut self) -> String {
        loop {
            self.placeholder_seq += 1;
            let candidate = format!("range_{}", self.placeholder_seq);
            if !self.used_names.contains(&candidate) {
                self.used_names.insert(candidate.clone());
                return candidate;
            }
        }
    }
}
