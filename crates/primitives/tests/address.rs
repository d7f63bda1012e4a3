use voxcel_primitives::address::{
    column_to_letters, format_absolute, format_local, format_spreadsheet, letters_to_column,
    parse_absolute, parse_address, parse_spreadsheet, AbsoluteComponent, AbsoluteLiteral,
};
use voxcel_primitives::{AddressError, CellCoord, CellKey};

fn executing() -> CellKey {
    CellKey::at(2, 7, 8, 3)
}

#[test]
fn test_spreadsheet_round_trip() {
    let samples = [
        CellKey::at(1, 0, 0, 0),
        CellKey::at(9, 25, 99, 23),
        CellKey::at(3, 26, 4, 1),
        CellKey::at(12, 727, 1_000, 11),
    ];
    for key in samples {
        let text = format_spreadsheet(key).expect("format");
        assert_eq!(parse_spreadsheet(&text, executing()).expect("parse"), key, "{text}");
    }
}

#[test]
fn test_absolute_round_trip() {
    let samples = [
        CellKey::at(1, 0, 0, 0),
        CellKey::at(4, 15, 16, 17),
        CellKey::at(88, 4_000, 0, 31),
    ];
    for key in samples {
        let text = format_absolute(key);
        assert_eq!(parse_absolute(&text, executing()).expect("parse"), key, "{text}");
    }
}

#[test]
fn test_layer_defaults_to_executing_cell() {
    let key = parse_spreadsheet("A1", executing()).expect("parse");
    assert_eq!(key, CellKey::at(2, 0, 0, 3));
}

#[test]
fn test_zero_component_means_executing_cell() {
    let key = parse_absolute("@[0,0,0,5]", executing()).expect("parse");
    assert_eq!(key, CellKey::at(5, 7, 8, 3));
}

#[test]
fn test_empty_component_means_first_cell() {
    let key = parse_absolute("@[,,,5]", executing()).expect("parse");
    assert_eq!(key, CellKey::at(5, 0, 0, 0));
}

#[test]
fn test_parse_address_dispatches_on_prefix() {
    assert_eq!(
        parse_address("@[2,1,1,1]", executing()).expect("absolute"),
        CellKey::at(1, 1, 0, 0)
    );
    assert_eq!(
        parse_address("B1β^1", executing()).expect("spreadsheet"),
        CellKey::at(1, 1, 0, 1)
    );
}

#[test]
fn test_malformed_inputs_fail_fast() {
    assert_eq!(
        parse_spreadsheet("  ", executing()),
        Err(AddressError::Empty)
    );
    assert!(matches!(
        parse_spreadsheet("A1z", executing()),
        Err(AddressError::InvalidLayer(_))
    ));
    assert!(parse_absolute("@[1,1,1,x]", executing()).is_err());
    assert!(parse_absolute("[1,1,1,1]", executing()).is_err());
    assert!(parse_absolute("@[+1,1,1,1]", executing()).is_err());
}

#[test]
fn test_literal_components() {
    let lit = AbsoluteLiteral::parse("@[4,,0,1]").expect("literal");
    assert_eq!(lit.x, AbsoluteComponent::Index(4));
    assert_eq!(lit.y, AbsoluteComponent::Missing);
    assert_eq!(lit.z, AbsoluteComponent::Current);
    assert_eq!(lit.arr, 1);
    assert_eq!(
        lit.resolve(CellCoord::new(0, 0, 2)).expect("resolve"),
        CellKey::at(1, 3, 0, 2)
    );
}

#[test]
fn test_column_helpers_are_inverse() {
    for index in [0, 1, 25, 26, 27, 51, 52, 701, 702, 18_277] {
        assert_eq!(letters_to_column(&column_to_letters(index)).expect("letters"), index);
    }
}

#[test]
fn test_format_local() {
    assert_eq!(format_local(CellCoord::new(1, 2, 1)).expect("local"), "B3β");
}
