use std::borrow::Cow;

use regex::{Captures, Regex};

use voxcel_primitives::address::{AbsoluteComponent, AbsoluteLiteral};
use voxcel_primitives::{ArrayId, CellBox, CellKey, Size3};

use crate::ast::Expr;

/// Every reference in a tree, as boxes, in source order.
///
/// Single-cell references become one-cell boxes. This is the structural half
/// of a formula's dependency set; reads computed at evaluation time (offsets,
/// indirect lookups) are tracked separately by the evaluator.
pub fn extract_references(expr: &Expr) -> Vec<CellBox> {
    let mut boxes = Vec::new();
    expr.walk(&mut |node| {
        if matches!(
            node,
            Expr::CellRef(_) | Expr::RangeRef(_) | Expr::Range { .. }
        ) {
            if let Some(b) = node.as_box() {
                boxes.push(b);
            }
        }
    });
    boxes
}

/// Growth of one array from `old` to `new`, used to rewrite references that
/// pointed at or past the old boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayGrowth {
    pub arr: ArrayId,
    pub old: Size3,
    pub new: Size3,
}

impl ArrayGrowth {
    pub fn new(arr: ArrayId, old: Size3, new: Size3) -> Self {
        Self { arr, old, new }
    }

    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }

    /// Per-axis growth.
    pub fn delta(&self) -> (u32, u32, u32) {
        (
            self.new.x.saturating_sub(self.old.x),
            self.new.y.saturating_sub(self.old.y),
            self.new.z.saturating_sub(self.old.z),
        )
    }

    /// Shift a key that sits at or beyond the old bound on a grown axis.
    pub fn shift_key(&self, key: CellKey) -> CellKey {
        if key.arr != self.arr {
            return key;
        }
        let (dx, dy, dz) = self.delta();
        let shift = |c: u32, old: u32, d: u32| if c >= old { c.saturating_add(d) } else { c };
        CellKey::at(
            key.arr,
            shift(key.coord.x, self.old.x, dx),
            shift(key.coord.y, self.old.y, dy),
            shift(key.coord.z, self.old.z, dz),
        )
    }

    fn shift_component(component: AbsoluteComponent, old: u32, d: u32) -> AbsoluteComponent {
        match component {
            // Components are 1-based; compare the 0-based index with the old size.
            AbsoluteComponent::Index(n) if n.saturating_sub(1) >= i64::from(old) => {
                AbsoluteComponent::Index(n.saturating_add(i64::from(d)))
            }
            other => other,
        }
    }

    fn shift_literal(&self, literal: AbsoluteLiteral) -> AbsoluteLiteral {
        if literal.arr != self.arr {
            return literal;
        }
        let (dx, dy, dz) = self.delta();
        AbsoluteLiteral {
            x: Self::shift_component(literal.x, self.old.x, dx),
            y: Self::shift_component(literal.y, self.old.y, dy),
            z: Self::shift_component(literal.z, self.old.z, dz),
            arr: literal.arr,
        }
    }
}

/// Rewrite the absolute literals in `formula` that point into the grown area.
///
/// Literals for other arrays, `0` (self) components, empty components and
/// in-bound indices are left exactly as written.
pub fn shift_absolute_refs<'a>(formula: &'a str, growth: &ArrayGrowth) -> Cow<'a, str> {
    if growth.is_noop() || !formula.contains("@[") {
        return Cow::Borrowed(formula);
    }
    absolute_regex().replace_all(formula, |caps: &Captures<'_>| {
        let text = &caps[0];
        match AbsoluteLiteral::parse(text) {
            Ok(literal) => growth.shift_literal(literal).to_string(),
            Err(_) => text.to_string(),
        }
    })
}

/// Absolute literals that appear in raw formula text.
pub fn extract_absolute_literals(formula: &str) -> Vec<AbsoluteLiteral> {
    absolute_regex()
        .find_iter(formula)
        .filter_map(|m| AbsoluteLiteral::parse(m.as_str()).ok())
        .collect()
}

fn absolute_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"@\[(-?\d*),(-?\d*),(-?\d*),(-?\d+)\]").expect("valid regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::MacroTable;
    use voxcel_primitives::CellCoord;
    use crate::parser::parse_formula;

    fn growth() -> ArrayGrowth {
        ArrayGrowth::new(1, Size3::new(3, 3, 3), Size3::new(5, 3, 3))
    }

    #[test]
    fn test_shift_only_beyond_old_bound() {
        let out = shift_absolute_refs("=ADD(@[4,1,1,1], @[2,1,1,1], @[4,1,1,2])", &growth());
        assert_eq!(out, "=ADD(@[6,1,1,1], @[2,1,1,1], @[4,1,1,2])");
    }

    #[test]
    fn test_shift_keeps_shorthand() {
        let out = shift_absolute_refs("=GET(@[0,,3,1])", &growth());
        assert_eq!(out, "=GET(@[0,,3,1])");
    }

    #[test]
    fn test_shift_key() {
        let g = growth();
        assert_eq!(g.shift_key(CellKey::at(1, 3, 0, 0)), CellKey::at(1, 5, 0, 0));
        assert_eq!(g.shift_key(CellKey::at(1, 2, 0, 0)), CellKey::at(1, 2, 0, 0));
        assert_eq!(g.shift_key(CellKey::at(2, 3, 0, 0)), CellKey::at(2, 3, 0, 0));
    }

    #[test]
    fn test_extract_references() {
        let parsed = parse_formula(
            "=ADD(A1, B1:C2, @[1,1,1,2])",
            CellKey::at(1, 4, 4, 0),
            &MacroTable::new(),
        );
        let refs = extract_references(&parsed.expr);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[1].cell_count(), 4);
        assert_eq!(refs[2].arr, 2);
        assert_eq!(refs[2].min, CellCoord::new(0, 0, 0));
    }
}
