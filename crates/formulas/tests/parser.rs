use voxcel_formulas::{
    extract_references, parse_formula, BinaryOp, Expr, MacroTable, ParseError,
};
use voxcel_primitives::{CellCoord, CellKey};

fn anchor() -> CellKey {
    CellKey::at(3, 2, 2, 1)
}

fn parse(text: &str) -> voxcel_formulas::ParsedFormula {
    parse_formula(text, anchor(), &MacroTable::new())
}

#[test]
fn test_cell_reference_inherits_anchor_layer_and_array() {
    let parsed = parse("=A1");
    match parsed.expr {
        Expr::CellRef(r) => {
            assert_eq!(r.key, CellKey::at(3, 0, 0, 1));
            assert_eq!(r.raw, "A1");
        }
        other => panic!("expected cell ref, got {other:?}"),
    }
}

#[test]
fn test_range_is_order_independent() {
    let forward = parse("=B2:D4").expr.as_box().expect("box");
    let backward = parse("=D4:B2").expr.as_box().expect("box");
    assert_eq!(forward, backward);
    assert_eq!(forward.min, CellCoord::new(1, 1, 1));
    assert_eq!(forward.max, CellCoord::new(3, 3, 1));
}

#[test]
fn test_absolute_range_literal() {
    let parsed = parse("=ADD(@[1,1,1,2]:@[2,2,1,2])");
    let call = parsed.expr.as_call().expect("call");
    let range = call.args[0].as_box().expect("range");
    assert_eq!(range.arr, 2);
    assert_eq!(range.cell_count(), 4);
}

#[test]
fn test_absolute_zero_means_anchor() {
    let parsed = parse("=@[0,0,0,3]");
    assert_eq!(parsed.expr.as_cell(), Some(anchor()));
}

#[test]
fn test_block_call_with_options() {
    let parsed = parse("=DO{ SET_GLOBAL(\"a\", 1); GET_GLOBAL(\"a\") } WITH speed: 2, mode: \"x\"");
    assert!(parsed.is_ok(), "{:?}", parsed.errors);
    let call = parsed.expr.as_call().expect("call");
    assert!(call.block);
    assert_eq!(call.name, "DO");
    assert_eq!(call.args.len(), 2);
    let keys: Vec<&str> = call.with_options.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["speed", "mode"]);
}

#[test]
fn test_braces_on_other_names_are_not_blocks() {
    let parsed = parse("=FOO{1}");
    assert!(!parsed.is_ok());
}

#[test]
fn test_concat_and_negation() {
    let parsed = parse("=-A1 & \"x\"");
    match parsed.expr {
        Expr::Binary {
            op: BinaryOp::Concat,
            lhs,
            ..
        } => assert!(matches!(*lhs, Expr::Negate(_))),
        other => panic!("expected concat, got {other:?}"),
    }
}

#[test]
fn test_unmatched_delimiters_recover() {
    for text in ["=ADD(1, 2", "=DO{ 1; 2", "=((1)", "=ADD(1))", "=)"] {
        let parsed = parse(text);
        assert!(!parsed.errors.is_empty(), "{text}");
        assert!(!parsed.is_fatal(), "{text}");
    }
}

#[test]
fn test_illegal_character_is_reported() {
    let parsed = parse("=ADD(1, 2) $");
    assert!(parsed.is_fatal());
    assert!(matches!(
        parsed.first_error(),
        Some(ParseError::IllegalCharacter { ch: '$', .. })
    ));
}

#[test]
fn test_bad_reference_degrades_to_literal() {
    let parsed = parse("=@[1,1,1,x]");
    assert!(matches!(
        parsed.first_error(),
        Some(ParseError::InvalidReference { .. })
    ));
    assert_eq!(parsed.expr, Expr::Literal("@[1,1,1,x]".to_string()));
}

#[test]
fn test_heredoc_argument() {
    let parsed = parse("=ARRAY(\"csv\", <<<a,b\nc,d>>>)");
    let call = parsed.expr.as_call().expect("call");
    assert_eq!(call.args[1], Expr::String("a,b\nc,d".to_string()));
}

#[test]
fn test_references_inside_with_and_macro() {
    let anchor = anchor();
    let mut macros = MacroTable::new();
    macros.define("HOME", "B1", anchor).expect("define");
    let parsed = parse_formula("=SEQ{ HOME } WITH at: C3", anchor, &macros);
    let refs = extract_references(&parsed.expr);
    assert_eq!(refs.len(), 2);
}

#[test]
fn test_empty_arguments() {
    let parsed = parse("=F(,1,)");
    let call = parsed.expr.as_call().expect("call");
    assert_eq!(call.args.len(), 3);
    assert_eq!(call.args[0], Expr::Literal(String::new()));
    assert_eq!(call.args[2], Expr::Literal(String::new()));
}
