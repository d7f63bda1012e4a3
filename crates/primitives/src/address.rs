//! Address helpers for the two textual cell notations.
//!
//! * spreadsheet form: `<Columns><Row><Layer>[^arrayId]`, e.g. `B3β^2`. Columns
//!   are base-26 letters, rows are 1-based, the optional Greek letter selects
//!   the z layer and `^N` selects the array.
//! * absolute form: `@[x,y,z,id]` with 1-based components, where `0` means
//!   "same as the executing cell" and an empty component means `1`.

use std::fmt;

use crate::{AddressError, ArrayId, CellCoord, CellKey};

/// Layer letters, indexed by z.
pub const GREEK_LAYERS: [char; 24] = [
    'α', 'β', 'γ', 'δ', 'ε', 'ζ', 'η', 'θ', 'ι', 'κ', 'λ', 'μ', 'ν', 'ξ', 'ο', 'π', 'ρ', 'σ',
    'τ', 'υ', 'φ', 'χ', 'ψ', 'ω',
];

/// Convert a zero-based column index to letters (0 => "A", 26 => "AA").
pub fn column_to_letters(index: u32) -> String {
    let mut n = index;
    let mut out = String::new();
    loop {
        let rem = (n % 26) as u8;
        out.push((b'A' + rem) as char);
        n /= 26;
        if n == 0 {
            break;
        }
        n -= 1;
    }
    out.chars().rev().collect()
}

/// Convert column letters to a zero-based index ("A" => 0).
pub fn letters_to_column(letters: &str) -> Result<u32, AddressError> {
    if letters.is_empty() {
        return Err(AddressError::InvalidColumn(letters.to_string()));
    }
    let mut result: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return Err(AddressError::InvalidColumn(letters.to_string()));
        }
        let value = u32::from(ch.to_ascii_uppercase() as u8 - b'A' + 1);
        result = result
            .checked_mul(26)
            .and_then(|v| v.checked_add(value))
            .ok_or_else(|| AddressError::InvalidColumn(letters.to_string()))?;
    }
    Ok(result - 1)
}

/// Layer letter for `z`; the alphabet repeats past `ω`.
pub fn layer_to_greek(z: u32) -> char {
    GREEK_LAYERS[z as usize % GREEK_LAYERS.len()]
}

pub fn greek_to_layer(ch: char) -> Option<u32> {
    GREEK_LAYERS.iter().position(|g| *g == ch).map(|i| i as u32)
}

pub fn is_greek_layer(ch: char) -> bool {
    greek_to_layer(ch).is_some()
}

/// Parse spreadsheet notation. The layer defaults to `current.coord.z` and the
/// array id to `current.arr`.
pub fn parse_spreadsheet(text: &str, current: CellKey) -> Result<CellKey, AddressError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AddressError::Empty);
    }

    let mut chars = trimmed.char_indices().peekable();

    let mut col_end = 0;
    while let Some((i, ch)) = chars.peek().copied() {
        if ch.is_ascii_alphabetic() {
            col_end = i + ch.len_utf8();
            chars.next();
        } else {
            break;
        }
    }
    let column = letters_to_column(&trimmed[..col_end])?;

    let row_start = col_end;
    let mut row_end = row_start;
    while let Some((i, ch)) = chars.peek().copied() {
        if ch.is_ascii_digit() {
            row_end = i + 1;
            chars.next();
        } else {
            break;
        }
    }
    let row_digits = &trimmed[row_start..row_end];
    let row: u32 = row_digits
        .parse()
        .map_err(|_| AddressError::InvalidRow(trimmed.to_string()))?;
    if row == 0 {
        return Err(AddressError::InvalidRow(trimmed.to_string()));
    }

    let mut z = current.coord.z;
    if let Some((_, ch)) = chars.peek().copied() {
        if let Some(layer) = greek_to_layer(ch) {
            z = layer;
            chars.next();
        }
    }

    let rest = chars.peek().map_or("", |(i, _)| &trimmed[*i..]);
    let arr = if rest.is_empty() {
        current.arr
    } else if let Some(digits) = rest.strip_prefix('^') {
        parse_array_id(digits)?
    } else if rest.starts_with(char::is_alphabetic) {
        return Err(AddressError::InvalidLayer(rest.to_string()));
    } else {
        return Err(AddressError::Malformed(trimmed.to_string()));
    };

    Ok(CellKey::new(arr, CellCoord::new(column, row - 1, z)))
}

/// Format a coordinate as `A1α` (no array suffix).
pub fn format_local(coord: CellCoord) -> Result<String, AddressError> {
    let layer = layer_to_greek(coord.z);
    let row = coord
        .y
        .checked_add(1)
        .ok_or_else(|| AddressError::OutOfRange(format!("row {}", coord.y)))?;
    Ok(format!("{}{}{}", column_to_letters(coord.x), row, layer))
}

/// Format a key in spreadsheet notation, always qualified with `^arrayId`.
///
/// Layers past the 24-letter alphabet wrap, so `z = 24` prints as `α`.
pub fn format_spreadsheet(key: CellKey) -> Result<String, AddressError> {
    Ok(format!("{}^{}", format_local(key.coord)?, key.arr))
}

/// One x/y/z component of an absolute literal, before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsoluteComponent {
    /// Empty slot, resolves to the first cell.
    Missing,
    /// Literal `0`, resolves to the executing cell's coordinate.
    Current,
    /// 1-based index as written.
    Index(i64),
}

impl AbsoluteComponent {
    fn parse(raw: &str) -> Result<Self, AddressError> {
        if raw.is_empty() {
            return Ok(Self::Missing);
        }
        let n = parse_signed(raw).ok_or_else(|| AddressError::Malformed(raw.to_string()))?;
        Ok(if n == 0 { Self::Current } else { Self::Index(n) })
    }

    fn resolve(self, current: u32) -> Result<u32, AddressError> {
        match self {
            Self::Missing => Ok(0),
            Self::Current => Ok(current),
            Self::Index(n) => u32::try_from(n - 1)
                .map_err(|_| AddressError::OutOfRange(n.to_string())),
        }
    }
}

impl fmt::Display for AbsoluteComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => Ok(()),
            Self::Current => f.write_str("0"),
            Self::Index(n) => write!(f, "{n}"),
        }
    }
}

/// An `@[x,y,z,id]` literal exactly as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsoluteLiteral {
    pub x: AbsoluteComponent,
    pub y: AbsoluteComponent,
    pub z: AbsoluteComponent,
    pub arr: ArrayId,
}

impl AbsoluteLiteral {
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix("@[")
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| AddressError::Malformed(trimmed.to_string()))?;
        let parts: Vec<&str> = inner.split(',').collect();
        if parts.len() != 4 {
            return Err(AddressError::Malformed(trimmed.to_string()));
        }
        Ok(Self {
            x: AbsoluteComponent::parse(parts[0])?,
            y: AbsoluteComponent::parse(parts[1])?,
            z: AbsoluteComponent::parse(parts[2])?,
            arr: parse_array_id(parts[3])?,
        })
    }

    /// Resolve against the executing cell.
    pub fn resolve(&self, current: CellCoord) -> Result<CellKey, AddressError> {
        Ok(CellKey::new(
            self.arr,
            CellCoord::new(
                self.x.resolve(current.x)?,
                self.y.resolve(current.y)?,
                self.z.resolve(current.z)?,
            ),
        ))
    }
}

impl fmt::Display for AbsoluteLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@[{},{},{},{}]", self.x, self.y, self.z, self.arr)
    }
}

/// Parse an absolute literal relative to the executing cell.
pub fn parse_absolute(text: &str, current: CellKey) -> Result<CellKey, AddressError> {
    AbsoluteLiteral::parse(text)?.resolve(current.coord)
}

/// Format a key as a fully explicit absolute literal.
pub fn format_absolute(key: CellKey) -> String {
    format!(
        "@[{},{},{},{}]",
        u64::from(key.coord.x) + 1,
        u64::from(key.coord.y) + 1,
        u64::from(key.coord.z) + 1,
        key.arr
    )
}

/// Parse either notation, picking the form from the leading character.
pub fn parse_address(text: &str, current: CellKey) -> Result<CellKey, AddressError> {
    if text.trim_start().starts_with('@') {
        parse_absolute(text, current)
    } else {
        parse_spreadsheet(text, current)
    }
}

fn parse_array_id(raw: &str) -> Result<ArrayId, AddressError> {
    match parse_signed(raw) {
        Some(n) if n > 0 => {
            ArrayId::try_from(n).map_err(|_| AddressError::InvalidArrayId(raw.to_string()))
        }
        _ => Err(AddressError::InvalidArrayId(raw.to_string())),
    }
}

/// `-?[0-9]+` without surrounding whitespace or a leading `+`.
fn parse_signed(raw: &str) -> Option<i64> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> CellKey {
        CellKey::at(1, 0, 0, 0)
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(column_to_letters(0), "A");
        assert_eq!(column_to_letters(25), "Z");
        assert_eq!(column_to_letters(26), "AA");
        assert_eq!(column_to_letters(701), "ZZ");
        assert_eq!(letters_to_column("aa").unwrap(), 26);
        assert!(letters_to_column("A1").is_err());
    }

    #[test]
    fn test_parse_spreadsheet_defaults() {
        let current = CellKey::at(4, 9, 9, 2);
        let key = parse_spreadsheet("B3", current).unwrap();
        assert_eq!(key, CellKey::at(4, 1, 2, 2));
    }

    #[test]
    fn test_parse_spreadsheet_layer_and_array() {
        let key = parse_spreadsheet("C2γ^7", origin()).unwrap();
        assert_eq!(key, CellKey::at(7, 2, 1, 2));
    }

    #[test]
    fn test_parse_spreadsheet_rejects_garbage() {
        assert!(parse_spreadsheet("", origin()).is_err());
        assert!(parse_spreadsheet("A0", origin()).is_err());
        assert!(parse_spreadsheet("12", origin()).is_err());
        assert!(parse_spreadsheet("A1^-2", origin()).is_err());
        assert!(parse_spreadsheet("A1^", origin()).is_err());
        assert!(parse_spreadsheet("A1x", origin()).is_err());
    }

    #[test]
    fn test_absolute_components() {
        let current = CellKey::at(1, 4, 5, 6);
        assert_eq!(
            parse_absolute("@[0,,3,2]", current).unwrap(),
            CellKey::at(2, 4, 0, 2)
        );
        assert!(parse_absolute("@[-1,1,1,1]", current).is_err());
        assert!(parse_absolute("@[1,1,1]", current).is_err());
        assert!(parse_absolute("@[1, 1,1,1]", current).is_err());
        assert!(parse_absolute("@[1,1,1,0]", current).is_err());
    }

    #[test]
    fn test_literal_display_preserves_shorthand() {
        let lit = AbsoluteLiteral::parse("@[0,,3,2]").unwrap();
        assert_eq!(lit.to_string(), "@[0,,3,2]");
    }

    #[test]
    fn test_format_local_cycles_deep_layers() {
        assert_eq!(format_local(CellCoord::new(0, 0, 23)).unwrap(), "A1ω");
        assert_eq!(format_local(CellCoord::new(0, 0, 24)).unwrap(), "A1α");
        assert_eq!(format_local(CellCoord::new(1, 2, 49)).unwrap(), "B3β");
    }
}
