//! Typed cell values and column types.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Stable identifier of a row within a table.
///
/// Row keys are assigned monotonically and never reused, so a key that is no
/// longer present in its table always means the row was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(pub u64);

impl RowKey {
    /// Creates a new row key.
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    /// Returns the raw key value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row:{}", self.0)
    }
}

/// The storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// 64-bit signed integer.
    Int,
    /// Boolean.
    Bool,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 string.
    String,
    /// Opaque bytes.
    Binary,
    /// Milliseconds since the Unix epoch.
    Date,
    /// Any scalar cell.
    Mixed,
    /// Optional link to a row of the target table.
    Link,
    /// Ordered list of links to rows of the target table.
    LinkList,
}

impl ColumnType {
    /// Returns the value new rows receive in a column of this type.
    #[must_use]
    pub fn default_cell(self) -> Cell {
        match self {
            Self::Int => Cell::Int(0),
            Self::Bool => Cell::Bool(false),
            Self::Float => Cell::Float(0.0),
            Self::Double => Cell::Double(0.0),
            Self::String => Cell::String(String::new()),
            Self::Binary => Cell::Binary(Vec::new()),
            Self::Date => Cell::Date(0),
            Self::Mixed => Cell::Mixed(Box::new(Cell::Null)),
            Self::Link => Cell::Link(None),
            Self::LinkList => Cell::LinkList(Vec::new()),
        }
    }

    /// Returns true if a cell may be stored in a column of this type.
    #[must_use]
    pub fn accepts(self, cell: &Cell) -> bool {
        matches!(
            (self, cell),
            (Self::Int, Cell::Int(_))
                | (Self::Bool, Cell::Bool(_))
                | (Self::Float, Cell::Float(_))
                | (Self::Double, Cell::Double(_))
                | (Self::String, Cell::String(_))
                | (Self::Binary, Cell::Binary(_))
                | (Self::Date, Cell::Date(_))
                | (Self::Mixed, Cell::Mixed(_))
                | (Self::Link, Cell::Link(_))
                | (Self::LinkList, Cell::LinkList(_))
        )
    }

    /// Returns true if a search index can be maintained for this type.
    #[must_use]
    pub fn is_indexable(self) -> bool {
        matches!(self, Self::Int | Self::Bool | Self::String | Self::Date)
    }

    /// Returns true for link and link-list columns.
    #[must_use]
    pub fn is_link(self) -> bool {
        matches!(self, Self::Link | Self::LinkList)
    }
}

/// A single typed value stored in a table cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// No value. Only valid inside a `Mixed` cell.
    Null,
    /// Integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
    /// Single-precision float.
    Float(f32),
    /// Double-precision float.
    Double(f64),
    /// String value.
    String(String),
    /// Binary value.
    Binary(Vec<u8>),
    /// Date as milliseconds since the Unix epoch.
    Date(i64),
    /// Dynamically typed scalar.
    Mixed(Box<Cell>),
    /// Link to a row, or `None`.
    Link(Option<RowKey>),
    /// Ordered links to rows.
    LinkList(Vec<RowKey>),
}

impl Cell {
    /// Returns the integer value, if this is an integer cell.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string value, if this is a string cell.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean cell.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the link target, if this is a link cell.
    #[must_use]
    pub fn as_link(&self) -> Option<Option<RowKey>> {
        match self {
            Self::Link(key) => Some(*key),
            _ => None,
        }
    }

    /// Returns the link list, if this is a link-list cell.
    #[must_use]
    pub fn as_link_list(&self) -> Option<&[RowKey]> {
        match self {
            Self::LinkList(keys) => Some(keys),
            _ => None,
        }
    }

    /// Returns the numeric value widened to `f64`, if this cell is numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(f64::from(*f)),
            Self::Double(d) => Some(*d),
            Self::Mixed(inner) => inner.as_f64(),
            _ => None,
        }
    }

    /// Returns true for `Null` and for a `Mixed` cell holding `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null | Self::Link(None) => true,
            Self::Mixed(inner) => inner.is_null(),
            _ => false,
        }
    }

    /// Compares two cells of compatible types.
    ///
    /// Numbers compare across integer and floating types. Returns `None` for
    /// incomparable pairs (including NaN).
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Mixed(a), b) => a.compare(b),
            (a, Self::Mixed(b)) => a.compare(b),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Binary(a), Self::Binary(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Link(a), Self::Link(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Total order used for sorting.
    ///
    /// Cells rank by kind first: null, bool, number, string, binary, date,
    /// link, link list. Numbers compare exactly across integer and floating
    /// types, and NaN sorts after every other number.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Mixed(a), b) => a.sort_cmp(b),
            (a, Self::Mixed(b)) => a.sort_cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(a), b) if b.sort_rank() == 2 => cmp_int_float(*a, b.as_f64().unwrap_or(f64::NAN)),
            (a, Self::Int(b)) if a.sort_rank() == 2 => {
                cmp_int_float(*b, a.as_f64().unwrap_or(f64::NAN)).reverse()
            }
            (a, b) if a.sort_rank() == 2 && b.sort_rank() == 2 => {
                cmp_floats(a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN))
            }
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Link(a), Self::Link(b)) => a.cmp(b),
            (Self::LinkList(a), Self::LinkList(b)) => a.cmp(b),
            (a, b) => a.sort_rank().cmp(&b.sort_rank()),
        }
    }

    fn sort_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) | Self::Double(_) => 2,
            Self::String(_) => 3,
            Self::Binary(_) => 4,
            Self::Date(_) => 5,
            Self::Link(_) => 6,
            Self::LinkList(_) => 7,
            Self::Mixed(inner) => inner.sort_rank(),
        }
    }

    /// Returns the key used by search indexes, for indexable cells.
    pub(crate) fn index_key(&self) -> Option<IndexKey> {
        match self {
            Self::Int(n) => Some(IndexKey::Int(*n)),
            Self::Bool(b) => Some(IndexKey::Bool(*b)),
            Self::String(s) => Some(IndexKey::String(s.clone())),
            Self::Date(d) => Some(IndexKey::Date(*d)),
            _ => None,
        }
    }
}

/// Orders floats with NaN after every other value, NaNs equal.
fn cmp_floats(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Compares an integer with a float without rounding the integer.
#[allow(clippy::cast_possible_truncation)]
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63, the first float above i64::MAX.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() || f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => whole.partial_cmp(&f).unwrap_or(Ordering::Equal),
        ordering => ordering,
    }
}

/// Hashable projection of an indexable cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum IndexKey {
    Int(i64),
    Bool(bool),
    String(String),
    Date(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cells_are_accepted() {
        for ty in [
            ColumnType::Int,
            ColumnType::Bool,
            ColumnType::Float,
            ColumnType::Double,
            ColumnType::String,
            ColumnType::Binary,
            ColumnType::Date,
            ColumnType::Mixed,
            ColumnType::Link,
            ColumnType::LinkList,
        ] {
            assert!(ty.accepts(&ty.default_cell()), "{ty:?}");
        }
    }

    #[test]
    fn numeric_cells_compare_across_types() {
        assert_eq!(
            Cell::Int(2).compare(&Cell::Double(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Cell::Float(3.0).compare(&Cell::Int(3)),
            Some(Ordering::Equal)
        );
        assert_eq!(Cell::String("a".into()).compare(&Cell::Int(1)), None);
    }

    #[test]
    fn sort_order_is_total() {
        let nan = Cell::Double(f64::NAN);
        assert_eq!(nan.sort_cmp(&Cell::Double(1e300)), Ordering::Greater);
        assert_eq!(Cell::Int(i64::MAX).sort_cmp(&nan), Ordering::Less);
        assert_eq!(nan.sort_cmp(&Cell::Double(f64::NAN)), Ordering::Equal);

        // 2^53 + 1 is not representable as f64.
        let big = 9_007_199_254_740_993_i64;
        assert_eq!(
            Cell::Int(big).sort_cmp(&Cell::Double(9_007_199_254_740_992.0)),
            Ordering::Greater
        );
        assert_eq!(Cell::Double(-2.5).sort_cmp(&Cell::Int(-2)), Ordering::Less);
        assert_eq!(Cell::Int(3).sort_cmp(&Cell::Float(3.0)), Ordering::Equal);

        let mixed = |cell: Cell| Cell::Mixed(Box::new(cell));
        let mut cells = vec![
            mixed(Cell::String("b".into())),
            mixed(Cell::Int(10)),
            mixed(Cell::Bool(false)),
            mixed(Cell::Double(-1.5)),
            mixed(Cell::String("a".into())),
            mixed(Cell::Null),
        ];
        cells.sort_by(Cell::sort_cmp);
        assert_eq!(
            cells,
            [
                mixed(Cell::Null),
                mixed(Cell::Bool(false)),
                mixed(Cell::Double(-1.5)),
                mixed(Cell::Int(10)),
                mixed(Cell::String("a".into())),
                mixed(Cell::String("b".into())),
            ]
        );
    }

    #[test]
    fn mixed_null_is_null() {
        assert!(Cell::Mixed(Box::new(Cell::Null)).is_null());
        assert!(Cell::Link(None).is_null());
        assert!(!Cell::Int(0).is_null());
    }

    #[test]
    fn row_key_display() {
        assert_eq!(RowKey::new(7).to_string(), "row:7");
    }
}
