use cellq_compiler::ast::{
    BinaryExpr, BinaryOp, CallExpr, Expr, IndexExpr, LambdaExpr, MemberExpr, OpaqueLambdaExpr,
    RangeRef, UnaryExpr, UnaryOp,
};
use cellq_compiler::parser::parse_source;
use pretty_assertions::assert_eq;

fn ident(name: &str) -> Expr {
    Expr::Identifier(name.to_string())
}

fn num(value: f64) -> Expr {
    Expr::Number(value)
}

fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary(BinaryExpr {
        left: Box::new(left),
        op,
        right: Box::new(right),
    })
}

fn member(target: Expr, name: &str) -> Expr {
    Expr::Member(MemberExpr {
        target: Box::new(target),
        member: name.to_string(),
        escaped: false,
    })
}

fn call(target: Expr, method: &str, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        target: Box::new(target),
        method: method.to_string(),
        escaped: false,
        args,
    })
}

fn lambda(param: &str, body: Expr) -> Expr {
    Expr::Lambda(LambdaExpr {
        param: param.to_string(),
        body: Box::new(body),
    })
}

fn parse_ok(source: &str) -> Expr {
    let outcome = parse_source(source);
    assert_eq!(outcome.errors, vec![], "unexpected errors for `{source}`");
    outcome.expr.expect("expected a successful parse")
}

fn parse_fails(source: &str) -> Vec<cellq_compiler::ParseError> {
    let outcome = parse_source(source);
    assert_eq!(outcome.expr, None, "expected a null parse for `{source}`");
    assert!(
        !outcome.errors.is_empty(),
        "a failed parse must carry at least one error"
    );
    outcome.errors
}

#[test]
fn parse_precedence_multiplicative_over_additive() {
    assert_eq!(
        parse_ok("a + b * c"),
        binary(
            ident("a"),
            BinaryOp::Add,
            binary(ident("b"), BinaryOp::Mul, ident("c"))
        )
    );
}

#[test]
fn parse_precedence_logical_tiers() {
    // `&&` binds tighter than `||`.
    assert_eq!(
        parse_ok("a && b || c"),
        binary(
            binary(ident("a"), BinaryOp::And, ident("b")),
            BinaryOp::Or,
            ident("c")
        )
    );
}

#[test]
fn parse_precedence_relational_over_equality() {
    assert_eq!(
        parse_ok("a == b < c"),
        binary(
            ident("a"),
            BinaryOp::Eq,
            binary(ident("b"), BinaryOp::Lt, ident("c"))
        )
    );
}

#[test]
fn parse_grouping_overrides_precedence() {
    assert_eq!(
        parse_ok("(a + b) * c"),
        binary(
            Expr::Grouping(Box::new(binary(ident("a"), BinaryOp::Add, ident("b")))),
            BinaryOp::Mul,
            ident("c")
        )
    );
}

#[test]
fn parse_unary_binds_tighter_than_binary_looser_than_postfix() {
    assert_eq!(
        parse_ok("-a.b + c"),
        binary(
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Neg,
                operand: Box::new(member(ident("a"), "b")),
            }),
            BinaryOp::Add,
            ident("c")
        )
    );
}

#[test]
fn parse_range_reference_from_identifier_colon_identifier() {
    assert_eq!(
        parse_ok("A1:B10.values"),
        member(
            Expr::RangeRef(RangeRef {
                start: "A1".to_string(),
                end: "B10".to_string(),
            }),
            "values"
        )
    );
}

#[test]
fn parse_range_reference_preserves_absolute_markers() {
    assert_eq!(
        parse_ok("$A$1:$B10"),
        Expr::RangeRef(RangeRef {
            start: "$A$1".to_string(),
            end: "$B10".to_string(),
        })
    );
}

#[test]
fn parse_range_lookahead_does_not_consume_on_mismatch() {
    // `A1` followed by a colon and a non-cell identifier stays a plain
    // identifier; the stray colon is then a trailing-input error.
    parse_fails("A1:threshold");
}

#[test]
fn parse_escaped_member_chain() {
    assert_eq!(
        parse_ok("x.@A.@B"),
        Expr::Member(MemberExpr {
            target: Box::new(Expr::Member(MemberExpr {
                target: Box::new(ident("x")),
                member: "A".to_string(),
                escaped: true,
            })),
            member: "B".to_string(),
            escaped: true,
        })
    );
}

#[test]
fn parse_method_call_with_lambda_argument() {
    assert_eq!(
        parse_ok("data.where(v => v > 0)"),
        call(
            ident("data"),
            "where",
            vec![lambda("v", binary(ident("v"), BinaryOp::Gt, num(0.0)))]
        )
    );
}

#[test]
fn parse_lambda_body_extends_to_end_of_argument() {
    assert_eq!(
        parse_ok("data.where(v => v > 0 && v < 9, 1)"),
        call(
            ident("data"),
            "where",
            vec![
                lambda(
                    "v",
                    binary(
                        binary(ident("v"), BinaryOp::Gt, num(0.0)),
                        BinaryOp::And,
                        binary(ident("v"), BinaryOp::Lt, num(9.0))
                    )
                ),
                num(1.0),
            ]
        )
    );
}

#[test]
fn parse_multi_parameter_lambda_is_opaque() {
    assert_eq!(
        parse_ok("data.aggregate(0, (acc, v) => acc + v)"),
        call(
            ident("data"),
            "aggregate",
            vec![
                num(0.0),
                Expr::OpaqueLambda(OpaqueLambdaExpr {
                    params: vec!["acc".to_string(), "v".to_string()],
                    body_text: "acc + v".to_string(),
                }),
            ]
        )
    );
}

#[test]
fn parse_statement_bodied_lambda_captures_braces_verbatim() {
    let expr = parse_ok("data.select(v => { let t = v; t })");
    assert_eq!(
        expr,
        call(
            ident("data"),
            "select",
            vec![Expr::OpaqueLambda(OpaqueLambdaExpr {
                params: vec!["v".to_string()],
                body_text: "{ let t = v; t }".to_string(),
            })]
        )
    );
}

#[test]
fn parse_index_with_negative_literal() {
    assert_eq!(
        parse_ok("r[-1]"),
        Expr::Index(IndexExpr {
            target: Box::new(ident("r")),
            index: Box::new(Expr::Unary(UnaryExpr {
                op: UnaryOp::Neg,
                operand: Box::new(num(1.0)),
            })),
        })
    );
}

#[test]
fn parse_index_with_string_key() {
    assert_eq!(
        parse_ok("row[\"Price\"]"),
        Expr::Index(IndexExpr {
            target: Box::new(ident("row")),
            index: Box::new(Expr::Str("Price".to_string())),
        })
    );
}

#[test]
fn parse_empty_argument_list() {
    assert_eq!(parse_ok("data.first()"), call(ident("data"), "first", vec![]));
}

#[test]
fn parse_trailing_dot_reports_error_at_the_dot() {
    let errors = parse_fails("data.");
    assert_eq!(errors[0].message, "Expected member name after `.`");
    assert_eq!(errors[0].span.start, 4);
    assert_eq!(errors[0].span.end, 5);
}

#[test]
fn parse_unmatched_paren_is_an_error() {
    let errors = parse_fails("(a");
    assert_eq!(errors[0].message, "Expected `)` to close grouping");
}

#[test]
fn parse_collects_multiple_argument_errors() {
    // Recovery at the argument separator surfaces both bad arguments.
    let errors = parse_fails("f.g(~, ~)");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].message, "Unexpected character `~`");
    assert_eq!(errors[1].message, "Unexpected character `~`");
}

#[test]
fn parse_lambda_outside_argument_position_fails() {
    parse_fails("v => v");
}

#[test]
fn parse_trailing_input_fails() {
    parse_fails("a b");
}

#[test]
fn parse_unterminated_string_fails_with_lexer_diagnostic() {
    let errors = parse_fails("data.where(v => v == \"x");
    assert!(errors
        .iter()
        .any(|e| e.message == "Unterminated string literal"));
}

#[test]
fn parse_nesting_ceiling_is_a_diagnostic_not_a_crash() {
    let source = format!("{}a{}", "(".repeat(200), ")".repeat(200));
    let errors = parse_fails(&source);
    assert!(errors[0].message.contains("nesting"));
}

#[test]
fn parse_opaque_lambda_does_not_leak_inner_tokens_as_errors() {
    // `=` and `;` are not DSL tokens, but inside an opaque body they are
    // carried through without diagnostics.
    let outcome = parse_source("data.select(v => { let t = v * 2; t })");
    assert_eq!(outcome.errors, vec![]);
    assert!(outcome.expr.is_some());
}
