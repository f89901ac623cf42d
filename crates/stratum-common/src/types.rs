//! Key and scan operator types shared across the index surface.

/// Datatype of the attribute an index is declared over.
///
/// The on-disk tag keeps the full alphabet for format compatibility;
/// only the integer specialisation is currently built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KeyType {
    /// 32-bit signed integer keys.
    Integer = 0,
    /// 64-bit floating point keys.
    Double = 1,
    /// Fixed-capacity string keys.
    Text = 2,
}

impl KeyType {
    /// Returns the on-disk tag value.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Decodes an on-disk tag, if it names a known datatype.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(KeyType::Integer),
            1 => Some(KeyType::Double),
            2 => Some(KeyType::Text),
            _ => None,
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KeyType::Integer => "integer",
            KeyType::Double => "double",
            KeyType::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// Comparison operator bounding one side of a range scan.
///
/// `Gt`/`Gte` are admissible for the lower bound, `Lt`/`Lte` for the upper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl RangeOp {
    /// Returns true if this operator may bound the low end of a scan.
    pub fn is_lower(self) -> bool {
        matches!(self, RangeOp::Gt | RangeOp::Gte)
    }

    /// Returns true if this operator may bound the high end of a scan.
    pub fn is_upper(self) -> bool {
        matches!(self, RangeOp::Lt | RangeOp::Lte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_type_tag_roundtrip() {
        for kt in [KeyType::Integer, KeyType::Double, KeyType::Text] {
            assert_eq!(KeyType::from_tag(kt.tag()), Some(kt));
        }
    }

    #[test]
    fn test_key_type_unknown_tag() {
        assert_eq!(KeyType::from_tag(3), None);
        assert_eq!(KeyType::from_tag(u32::MAX), None);
    }

    #[test]
    fn test_key_type_display() {
        assert_eq!(KeyType::Integer.to_string(), "integer");
        assert_eq!(KeyType::Double.to_string(), "double");
        assert_eq!(KeyType::Text.to_string(), "text");
    }

    #[test]
    fn test_range_op_sides() {
        assert!(RangeOp::Gt.is_lower());
        assert!(RangeOp::Gte.is_lower());
        assert!(!RangeOp::Lt.is_lower());
        assert!(!RangeOp::Lte.is_lower());

        assert!(RangeOp::Lt.is_upper());
        assert!(RangeOp::Lte.is_upper());
        assert!(!RangeOp::Gt.is_upper());
        assert!(!RangeOp::Gte.is_upper());
    }
}
