//! Value-type lattice.
//!
//! `Unknown` is the bottom element and `General` the top. Scalars form a
//! widening chain (`UnsignedByte < Int < Long`, `Int < Double < Complex`)
//! meeting at `Scalar`; everything except arrays converts to `String`.
//! Array types are ordered by their element type.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    Unknown,
    Boolean,
    UnsignedByte,
    Int,
    Long,
    Double,
    Complex,
    Scalar,
    String,
    Array(Box<ValueType>),
    General,
}

impl ValueType {
    pub fn array_of(element: ValueType) -> Self {
        ValueType::Array(Box::new(element))
    }

    /// Immediate supertypes in the lattice.
    fn parents(&self) -> Vec<ValueType> {
        use ValueType::*;
        match self {
            Unknown => vec![
                Boolean,
                UnsignedByte,
                ValueType::array_of(Unknown),
            ],
            Boolean => vec![String],
            UnsignedByte => vec![Int],
            Int => vec![Long, Double],
            Long => vec![Scalar],
            Double => vec![Complex],
            Complex => vec![Scalar],
            Scalar => vec![String],
            String => vec![General],
            Array(_) => vec![General],
            General => Vec::new(),
        }
    }

    /// Partial order of the lattice.
    pub fn leq(&self, other: &ValueType) -> bool {
        use ValueType::*;
        match (self, other) {
            (a, b) if a == b => true,
            (Unknown, _) | (_, General) => true,
            (General, _) | (_, Unknown) => false,
            (Array(a), Array(b)) => a.leq(b),
            (Array(_), _) | (_, Array(_)) => false,
            _ => self.parents().iter().any(|p| p.leq(other)),
        }
    }

    /// Every element reachable upwards from `self`, including `self`.
    fn upper_set(&self) -> Vec<ValueType> {
        let mut seen = vec![self.clone()];
        let mut i = 0;
        while i < seen.len() {
            for parent in seen[i].parents() {
                if !seen.contains(&parent) {
                    seen.push(parent);
                }
            }
            i += 1;
        }
        seen
    }

    /// Least upper bound.
    pub fn join(&self, other: &ValueType) -> ValueType {
        use ValueType::*;
        if self.leq(other) {
            return other.clone();
        }
        if other.leq(self) {
            return self.clone();
        }
        match (self, other) {
            (Array(a), Array(b)) => return ValueType::array_of(a.join(b)),
            (Array(_), _) | (_, Array(_)) => return General,
            _ => {}
        }
        let bounds: Vec<ValueType> = self
            .upper_set()
            .into_iter()
            .filter(|t| other.leq(t))
            .collect();
        bounds
            .iter()
            .find(|candidate| bounds.iter().all(|b| candidate.leq(b)))
            .cloned()
            .unwrap_or(General)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ValueType::Array(_))
    }

    pub fn element(&self) -> Option<&ValueType> {
        match self {
            ValueType::Array(element) => Some(element),
            _ => None,
        }
    }

    /// True for types that name exactly one token class.
    pub fn is_concrete(&self) -> bool {
        !matches!(
            self,
            ValueType::Unknown | ValueType::General | ValueType::Scalar
        )
    }

    /// Name of the token class carrying values of this type.
    pub fn token_class(&self) -> &'static str {
        match self {
            ValueType::Boolean => "BooleanToken",
            ValueType::UnsignedByte => "UnsignedByteToken",
            ValueType::Int => "IntToken",
            ValueType::Long => "LongToken",
            ValueType::Double => "DoubleToken",
            ValueType::Complex => "ComplexToken",
            ValueType::Scalar => "ScalarToken",
            ValueType::String => "StringToken",
            ValueType::Array(_) => "ArrayToken",
            ValueType::Unknown | ValueType::General => "Token",
        }
    }

    /// Inverse of [`ValueType::token_class`]; array element types are not
    /// recoverable from a class name and come back as `Unknown`.
    pub fn from_token_class(class: &str) -> Option<ValueType> {
        Some(match class {
            "BooleanToken" => ValueType::Boolean,
            "UnsignedByteToken" => ValueType::UnsignedByte,
            "IntToken" => ValueType::Int,
            "LongToken" => ValueType::Long,
            "DoubleToken" => ValueType::Double,
            "ComplexToken" => ValueType::Complex,
            "ScalarToken" => ValueType::Scalar,
            "StringToken" => ValueType::String,
            "ArrayToken" => ValueType::array_of(ValueType::Unknown),
            "Token" => ValueType::General,
            _ => return None,
        })
    }

    /// The non-array elements, used by property tests and exhaustive checks.
    pub fn scalar_elements() -> Vec<ValueType> {
        use ValueType::*;
        vec![
            Unknown,
            Boolean,
            UnsignedByte,
            Int,
            Long,
            Double,
            Complex,
            Scalar,
            String,
            General,
        ]
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Unknown => write!(f, "unknown"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::UnsignedByte => write!(f, "unsignedByte"),
            ValueType::Int => write!(f, "int"),
            ValueType::Long => write!(f, "long"),
            ValueType::Double => write!(f, "double"),
            ValueType::Complex => write!(f, "complex"),
            ValueType::Scalar => write!(f, "scalar"),
            ValueType::String => write!(f, "string"),
            ValueType::Array(element) => write!(f, "{{{}}}", element),
            ValueType::General => write!(f, "general"),
        }
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            return Ok(ValueType::array_of(inner.parse()?));
        }
        Ok(match s {
            "unknown" => ValueType::Unknown,
            "boolean" => ValueType::Boolean,
            "unsignedByte" => ValueType::UnsignedByte,
            "int" => ValueType::Int,
            "long" => ValueType::Long,
            "double" => ValueType::Double,
            "complex" => ValueType::Complex,
            "scalar" => ValueType::Scalar,
            "string" => ValueType::String,
            "general" => ValueType::General,
            other => return Err(format!("unknown value type `{}`", other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use ValueType::*;

    #[test]
    fn test_chain_order() {
        assert!(UnsignedByte.leq(&Int));
        assert!(Int.leq(&Double));
        assert!(Int.leq(&Long));
        assert!(Double.leq(&Complex));
        assert!(Complex.leq(&Scalar));
        assert!(Boolean.leq(&String));
        assert!(!Long.leq(&Double));
        assert!(!Double.leq(&Long));
        assert!(!String.leq(&Int));
    }

    #[test]
    fn test_join_of_incomparable_scalars() {
        assert_eq!(Long.join(&Double), Scalar);
        assert_eq!(Long.join(&Complex), Scalar);
        assert_eq!(Boolean.join(&Int), String);
        assert_eq!(UnsignedByte.join(&Double), Double);
    }

    #[test]
    fn test_join_arrays() {
        assert_eq!(
            ValueType::array_of(Int).join(&ValueType::array_of(Double)),
            ValueType::array_of(Double)
        );
        assert_eq!(ValueType::array_of(Int).join(&String), General);
    }

    #[test]
    fn test_unknown_is_identity() {
        for t in ValueType::scalar_elements() {
            assert_eq!(t.join(&Unknown), t);
            assert_eq!(Unknown.join(&t), t);
        }
    }

    #[test]
    fn test_parse_round_trip_names() {
        assert_eq!("{int}".parse::<ValueType>().unwrap(), ValueType::array_of(Int));
        assert_eq!("unsignedByte".parse::<ValueType>().unwrap(), UnsignedByte);
        assert!("float".parse::<ValueType>().is_err());
    }

    fn any_type() -> impl Strategy<Value = ValueType> {
        let leaf = prop::sample::select(ValueType::scalar_elements());
        leaf.prop_recursive(2, 4, 1, |inner| inner.prop_map(ValueType::array_of))
    }

    proptest! {
        #[test]
        fn join_is_commutative(a in any_type(), b in any_type()) {
            prop_assert_eq!(a.join(&b), b.join(&a));
        }

        #[test]
        fn join_is_an_upper_bound(a in any_type(), b in any_type()) {
            let j = a.join(&b);
            prop_assert!(a.leq(&j));
            prop_assert!(b.leq(&j));
        }

        #[test]
        fn join_is_idempotent(a in any_type()) {
            prop_assert_eq!(a.join(&a), a);
        }

        #[test]
        fn join_is_associative(a in any_type(), b in any_type(), c in any_type()) {
            prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
        }
    }
}
