//! Property tests for the trigger DSL parser.

use proptest::prelude::*;
use vigil::domain::ast::{
    Action, BandState, CmpOp, Condition, Expression, Options, TriggerAst,
};
use vigil::domain::parser::parse;

fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

fn cmp_op() -> impl Strategy<Value = CmpOp> {
    prop_oneof![
        Just(CmpOp::Gt),
        Just(CmpOp::Ge),
        Just(CmpOp::Lt),
        Just(CmpOp::Le),
        Just(CmpOp::Eq),
        Just(CmpOp::Ne),
    ]
}

fn band_state() -> impl Strategy<Value = BandState> {
    prop_oneof![
        Just(BandState::Below),
        Just(BandState::InBand),
        Just(BandState::Above),
    ]
}

/// Threshold values with two decimal places, so their text form survives a
/// display/parse cycle exactly.
fn threshold() -> impl Strategy<Value = f64> {
    (-100_000i32..100_000).prop_map(|n| n as f64 / 100.0)
}

fn expression() -> impl Strategy<Value = Expression> {
    prop_oneof![
        (ident(), cmp_op(), threshold()).prop_map(|(name, op, value)| Expression::Indicator {
            name,
            region: None,
            cohort: None,
            op,
            value,
        }),
        (ident(), 1u32..400, cmp_op(), threshold()).prop_map(
            |(name, window_days, op, value)| Expression::Slope {
                name,
                window_days,
                op,
                value,
            }
        ),
        (ident(), band_state()).prop_map(|(name, expected)| Expression::Band { name, expected }),
        (ident(), ident(), cmp_op(), threshold()).prop_map(|(left, right, op, value)| {
            Expression::Gap {
                left,
                right,
                op,
                value,
            }
        }),
    ]
}

/// Conditions in the shape the parser itself produces: an OR of left-folded
/// AND chains.
fn condition() -> impl Strategy<Value = Condition> {
    let and_chain = proptest::collection::vec(expression(), 1..4).prop_map(|exprs| {
        exprs
            .into_iter()
            .map(Condition::Expr)
            .reduce(|acc, next| Condition::And(Box::new(acc), Box::new(next)))
            .unwrap()
    });
    proptest::collection::vec(and_chain, 1..4).prop_map(|chains| {
        chains
            .into_iter()
            .reduce(|acc, next| Condition::Or(Box::new(acc), Box::new(next)))
            .unwrap()
    })
}

fn options() -> impl Strategy<Value = Options> {
    (
        proptest::option::of(1u32..365),
        proptest::option::of(1u32..30),
        proptest::option::of(1u32..30),
    )
        .prop_map(|(cooldown_days, persistence_days, window_days)| Options {
            cooldown_days,
            persistence_days,
            window_days,
        })
}

fn trigger_ast() -> impl Strategy<Value = TriggerAst> {
    (condition(), 1u32..30, ident(), ident(), options()).prop_map(
        |(condition, persistence_days, template_key, capacity, options)| TriggerAst {
            condition,
            persistence_days,
            action: Action {
                template_key,
                capacity,
            },
            options,
        },
    )
}

proptest! {
    /// Re-serializing a parser-shaped AST and parsing it back is lossless.
    #[test]
    fn display_parse_round_trip(ast in trigger_ast()) {
        let text = ast.to_string();
        let reparsed = parse(&text).unwrap_or_else(|e| {
            panic!("failed to reparse {:?}: {}", text, e)
        });
        prop_assert_eq!(reparsed, ast);
    }

    /// Structurally equivalent means identical canonical form as well.
    #[test]
    fn canonical_form_stable_through_round_trip(ast in trigger_ast()) {
        let reparsed = parse(&ast.to_string()).unwrap();
        prop_assert_eq!(
            reparsed.condition.canonical(),
            ast.condition.canonical()
        );
    }

    /// AND always binds tighter than OR, regardless of the leaves.
    #[test]
    fn and_binds_tighter_than_or(
        a in ident(), b in ident(), c in ident(),
        v in threshold(),
    ) {
        let text = format!(
            "IF IND({a}) > {v} AND IND({b}) > {v} OR IND({c}) > {v} \
             FOR 1d THEN START pack IN responsive"
        );
        let ast = parse(&text).unwrap();
        match &ast.condition {
            Condition::Or(left, _) => {
                prop_assert!(matches!(**left, Condition::And(_, _)));
            }
            other => prop_assert!(false, "expected Or at top, got {:?}", other),
        }
    }

    /// Keyword case never changes the parse.
    #[test]
    fn keywords_are_case_insensitive(ast in trigger_ast()) {
        let text = ast.to_string();
        // Lowercasing the whole line also lowercases identifiers, which the
        // generator already emits in lowercase.
        let lowered = text.to_lowercase();
        let reparsed = parse(&lowered).unwrap();
        prop_assert_eq!(reparsed.condition.canonical(), ast.condition.canonical());
    }

    /// Arbitrary input never panics the parser; it returns a SyntaxError.
    #[test]
    fn garbage_never_panics(input in "\\PC{0,80}") {
        let _ = parse(&input);
    }
}
