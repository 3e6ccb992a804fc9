//! Immutable data tokens and their operations.
//!
//! Tokens are the values that flow between actors. The same operations back
//! three consumers: the expression evaluator, compile-time folding of token
//! method calls, and the interpreter's native token classes.

use super::lattice::ValueType;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("unknown token method `{method}` on {receiver}")]
    UnknownMethod { receiver: ValueType, method: String },

    #[error("operation `{operation}` is not defined for {left} and {right}")]
    Incompatible {
        operation: &'static str,
        left: ValueType,
        right: ValueType,
    },

    #[error("cannot convert {from} to {to} without loss")]
    Conversion { from: ValueType, to: ValueType },

    #[error("division by zero")]
    DivideByZero,

    #[error("index {index} out of bounds for array of length {length}")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("wrong arguments for `{method}`: {message}")]
    Arguments { method: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Boolean(bool),
    UnsignedByte(u8),
    Int(i32),
    Long(i64),
    Double(f64),
    Complex { re: f64, im: f64 },
    String(String),
    Array {
        element: ValueType,
        values: Vec<Token>,
    },
}

/// Plain (non-token) value crossing the token method boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvokeArg {
    Token(Token),
    Primitive(Primitive),
}

/// Result shape of a reflective token method invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResult {
    Token(Token),
    Primitive(Primitive),
    /// The method returns something that is neither a token, a primitive
    /// nor a string; `0` names the returned kind.
    Unmappable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl Arith {
    fn name(self) -> &'static str {
        match self {
            Arith::Add => "add",
            Arith::Subtract => "subtract",
            Arith::Multiply => "multiply",
            Arith::Divide => "divide",
            Arith::Modulo => "modulo",
        }
    }
}

impl Token {
    pub fn int(value: i32) -> Self {
        Token::Int(value)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Token::String(value.into())
    }

    /// Build an array token; elements are widened to their joined type
    /// when that type names a single token class.
    pub fn array(values: Vec<Token>) -> Self {
        let element = values
            .iter()
            .fold(ValueType::Unknown, |acc, t| acc.join(&t.value_type()));
        let values = if element.is_concrete() {
            values
                .iter()
                .map(|v| v.convert(&element).unwrap_or_else(|_| v.clone()))
                .collect()
        } else {
            values
        };
        Token::Array { element, values }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Token::Boolean(_) => ValueType::Boolean,
            Token::UnsignedByte(_) => ValueType::UnsignedByte,
            Token::Int(_) => ValueType::Int,
            Token::Long(_) => ValueType::Long,
            Token::Double(_) => ValueType::Double,
            Token::Complex { .. } => ValueType::Complex,
            Token::String(_) => ValueType::String,
            Token::Array { element, .. } => ValueType::array_of(element.clone()),
        }
    }

    /// Lossless conversion to a type at or above this token's type.
    pub fn convert(&self, to: &ValueType) -> Result<Token, TokenError> {
        let from = self.value_type();
        let fail = || TokenError::Conversion {
            from: from.clone(),
            to: to.clone(),
        };
        if &from == to || matches!(to, ValueType::General) {
            return Ok(self.clone());
        }
        if !from.leq(to) {
            return Err(fail());
        }
        Ok(match (self, to) {
            (_, ValueType::Scalar) => self.clone(),
            (_, ValueType::String) => Token::String(self.string_value_or_display()),
            (Token::UnsignedByte(b), ValueType::Int) => Token::Int(i32::from(*b)),
            (Token::UnsignedByte(b), ValueType::Long) => Token::Long(i64::from(*b)),
            (Token::UnsignedByte(b), ValueType::Double) => Token::Double(f64::from(*b)),
            (Token::UnsignedByte(b), ValueType::Complex) => Token::Complex {
                re: f64::from(*b),
                im: 0.0,
            },
            (Token::Int(i), ValueType::Long) => Token::Long(i64::from(*i)),
            (Token::Int(i), ValueType::Double) => Token::Double(f64::from(*i)),
            (Token::Int(i), ValueType::Complex) => Token::Complex {
                re: f64::from(*i),
                im: 0.0,
            },
            (Token::Double(d), ValueType::Complex) => Token::Complex { re: *d, im: 0.0 },
            (Token::Array { values, .. }, ValueType::Array(element)) => Token::Array {
                element: (**element).clone(),
                values: values
                    .iter()
                    .map(|v| v.convert(element))
                    .collect::<Result<Vec<_>, _>>()?,
            },
            _ => return Err(fail()),
        })
    }

    fn string_value_or_display(&self) -> String {
        match self {
            Token::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn unify(&self, other: &Token, operation: &'static str) -> Result<(Token, Token), TokenError> {
        let target = self.value_type().join(&other.value_type());
        let incompatible = || TokenError::Incompatible {
            operation,
            left: self.value_type(),
            right: other.value_type(),
        };
        if !target.is_concrete() {
            return Err(incompatible());
        }
        let left = self.convert(&target).map_err(|_| incompatible())?;
        let right = other.convert(&target).map_err(|_| incompatible())?;
        Ok((left, right))
    }

    pub fn arithmetic(&self, op: Arith, other: &Token) -> Result<Token, TokenError> {
        let (left, right) = self.unify(other, op.name())?;
        let incompatible = || TokenError::Incompatible {
            operation: op.name(),
            left: self.value_type(),
            right: other.value_type(),
        };
        Ok(match (&left, &right) {
            (Token::UnsignedByte(a), Token::UnsignedByte(b)) => Token::UnsignedByte(match op {
                Arith::Add => a.wrapping_add(*b),
                Arith::Subtract => a.wrapping_sub(*b),
                Arith::Multiply => a.wrapping_mul(*b),
                Arith::Divide => a.checked_div(*b).ok_or(TokenError::DivideByZero)?,
                Arith::Modulo => a.checked_rem(*b).ok_or(TokenError::DivideByZero)?,
            }),
            (Token::Int(a), Token::Int(b)) => Token::Int(match op {
                Arith::Add => a.wrapping_add(*b),
                Arith::Subtract => a.wrapping_sub(*b),
                Arith::Multiply => a.wrapping_mul(*b),
                Arith::Divide => a.checked_div(*b).ok_or(TokenError::DivideByZero)?,
                Arith::Modulo => a.checked_rem(*b).ok_or(TokenError::DivideByZero)?,
            }),
            (Token::Long(a), Token::Long(b)) => Token::Long(match op {
                Arith::Add => a.wrapping_add(*b),
                Arith::Subtract => a.wrapping_sub(*b),
                Arith::Multiply => a.wrapping_mul(*b),
                Arith::Divide => a.checked_div(*b).ok_or(TokenError::DivideByZero)?,
                Arith::Modulo => a.checked_rem(*b).ok_or(TokenError::DivideByZero)?,
            }),
            (Token::Double(a), Token::Double(b)) => Token::Double(match op {
                Arith::Add => a + b,
                Arith::Subtract => a - b,
                Arith::Multiply => a * b,
                Arith::Divide => a / b,
                Arith::Modulo => a % b,
            }),
            (Token::Complex { re: ar, im: ai }, Token::Complex { re: br, im: bi }) => match op {
                Arith::Add => Token::Complex {
                    re: ar + br,
                    im: ai + bi,
                },
                Arith::Subtract => Token::Complex {
                    re: ar - br,
                    im: ai - bi,
                },
                Arith::Multiply => Token::Complex {
                    re: ar * br - ai * bi,
                    im: ar * bi + ai * br,
                },
                Arith::Divide => {
                    let denominator = br * br + bi * bi;
                    Token::Complex {
                        re: (ar * br + ai * bi) / denominator,
                        im: (ai * br - ar * bi) / denominator,
                    }
                }
                Arith::Modulo => return Err(incompatible()),
            },
            (Token::String(a), Token::String(b)) if op == Arith::Add => {
                Token::String(format!("{}{}", a, b))
            }
            (
                Token::Array {
                    element,
                    values: a,
                },
                Token::Array { values: b, .. },
            ) => {
                if a.len() != b.len() {
                    return Err(incompatible());
                }
                Token::Array {
                    element: element.clone(),
                    values: a
                        .iter()
                        .zip(b)
                        .map(|(x, y)| x.arithmetic(op, y))
                        .collect::<Result<Vec<_>, _>>()?,
                }
            }
            _ => return Err(incompatible()),
        })
    }

    pub fn negate(&self) -> Result<Token, TokenError> {
        Ok(match self {
            Token::Int(i) => Token::Int(i.wrapping_neg()),
            Token::Long(l) => Token::Long(l.wrapping_neg()),
            Token::Double(d) => Token::Double(-d),
            Token::Complex { re, im } => Token::Complex { re: -re, im: -im },
            Token::UnsignedByte(b) => Token::UnsignedByte(b.wrapping_neg()),
            other => {
                return Err(TokenError::Incompatible {
                    operation: "negate",
                    left: other.value_type(),
                    right: ValueType::Unknown,
                })
            }
        })
    }

    pub fn is_equal_to(&self, other: &Token) -> Result<Token, TokenError> {
        let (left, right) = self.unify(other, "isEqualTo")?;
        Ok(Token::Boolean(left == right))
    }

    fn compare(&self, other: &Token, operation: &'static str) -> Result<std::cmp::Ordering, TokenError> {
        let (left, right) = self.unify(other, operation)?;
        let incompatible = || TokenError::Incompatible {
            operation,
            left: self.value_type(),
            right: other.value_type(),
        };
        match (&left, &right) {
            (Token::UnsignedByte(a), Token::UnsignedByte(b)) => Ok(a.cmp(b)),
            (Token::Int(a), Token::Int(b)) => Ok(a.cmp(b)),
            (Token::Long(a), Token::Long(b)) => Ok(a.cmp(b)),
            (Token::Double(a), Token::Double(b)) => a.partial_cmp(b).ok_or_else(incompatible),
            _ => Err(incompatible()),
        }
    }

    pub fn is_less_than(&self, other: &Token) -> Result<Token, TokenError> {
        Ok(Token::Boolean(
            self.compare(other, "isLessThan")? == std::cmp::Ordering::Less,
        ))
    }

    pub fn is_greater_than(&self, other: &Token) -> Result<Token, TokenError> {
        Ok(Token::Boolean(
            self.compare(other, "isGreaterThan")? == std::cmp::Ordering::Greater,
        ))
    }

    pub fn not(&self) -> Result<Token, TokenError> {
        Ok(Token::Boolean(!self.boolean_value()?))
    }

    pub fn and(&self, other: &Token) -> Result<Token, TokenError> {
        Ok(Token::Boolean(
            self.boolean_value()? && other.boolean_value()?,
        ))
    }

    pub fn or(&self, other: &Token) -> Result<Token, TokenError> {
        Ok(Token::Boolean(
            self.boolean_value()? || other.boolean_value()?,
        ))
    }

    pub fn boolean_value(&self) -> Result<bool, TokenError> {
        match self {
            Token::Boolean(b) => Ok(*b),
            other => Err(TokenError::Conversion {
                from: other.value_type(),
                to: ValueType::Boolean,
            }),
        }
    }

    pub fn int_value(&self) -> Result<i32, TokenError> {
        match self.convert(&ValueType::Int)? {
            Token::Int(v) => Ok(v),
            other => Err(TokenError::Conversion {
                from: other.value_type(),
                to: ValueType::Int,
            }),
        }
    }


    pub fn long_value(&self) -> Result<i64, TokenError> {
        match self.convert(&ValueType::Long)? {
            Token::Long(v) => Ok(v),
            other => Err(TokenError::Conversion {
                from: other.value_type(),
                to: ValueType::Long,
            }),
        }
    }


    pub fn double_value(&self) -> Result<f64, TokenError> {
        match self.convert(&ValueType::Double)? {
            Token::Double(v) => Ok(v),
            other => Err(TokenError::Conversion {
                from: other.value_type(),
                to: ValueType::Double,
            }),
        }
    }


    pub fn string_value(&self) -> Result<String, TokenError> {
        match self {
            Token::String(s) => Ok(s.clone()),
            other => Err(TokenError::Conversion {
                from: other.value_type(),
                to: ValueType::String,
            }),
        }
    }

    pub fn zero(&self) -> Result<Token, TokenError> {
        Ok(match self {
            Token::Boolean(_) => Token::Boolean(false),
            Token::UnsignedByte(_) => Token::UnsignedByte(0),
            Token::Int(_) => Token::Int(0),
            Token::Long(_) => Token::Long(0),
            Token::Double(_) => Token::Double(0.0),
            Token::Complex { .. } => Token::Complex { re: 0.0, im: 0.0 },
            Token::String(_) => Token::String(String::new()),
            Token::Array { element, values } => Token::Array {
                element: element.clone(),
                values: values.iter().map(Token::zero).collect::<Result<_, _>>()?,
            },
        })
    }

    pub fn one(&self) -> Result<Token, TokenError> {
        Ok(match self {
            Token::Boolean(_) => Token::Boolean(true),
            Token::UnsignedByte(_) => Token::UnsignedByte(1),
            Token::Int(_) => Token::Int(1),
            Token::Long(_) => Token::Long(1),
            Token::Double(_) => Token::Double(1.0),
            Token::Complex { .. } => Token::Complex { re: 1.0, im: 0.0 },
            other => {
                return Err(TokenError::Incompatible {
                    operation: "one",
                    left: other.value_type(),
                    right: ValueType::Unknown,
                })
            }
        })
    }

    pub fn get_element(&self, index: i64) -> Result<Token, TokenError> {
        match self {
            Token::Array { values, .. } => usize::try_from(index)
                .ok()
                .and_then(|i| values.get(i))
                .cloned()
                .ok_or(TokenError::IndexOutOfBounds {
                    index,
                    length: values.len(),
                }),
            other => Err(TokenError::UnknownMethod {
                receiver: other.value_type(),
                method: "getElement".to_string(),
            }),
        }
    }

    /// Reflective invocation by method name.
    pub fn invoke(&self, method: &str, args: &[InvokeArg]) -> Result<InvokeResult, TokenError> {
        let token_arg = |i: usize| -> Result<&Token, TokenError> {
            match args.get(i) {
                Some(InvokeArg::Token(t)) => Ok(t),
                _ => Err(TokenError::Arguments {
                    method: method.to_string(),
                    message: format!("argument {} must be a token", i),
                }),
            }
        };
        let int_arg = |i: usize| -> Result<i64, TokenError> {
            match args.get(i) {
                Some(InvokeArg::Primitive(Primitive::Int(v))) => Ok(i64::from(*v)),
                Some(InvokeArg::Primitive(Primitive::Long(v))) => Ok(*v),
                _ => Err(TokenError::Arguments {
                    method: method.to_string(),
                    message: format!("argument {} must be an integer", i),
                }),
            }
        };
        let arity = |n: usize| -> Result<(), TokenError> {
            if args.len() == n {
                Ok(())
            } else {
                Err(TokenError::Arguments {
                    method: method.to_string(),
                    message: format!("expected {} arguments, got {}", n, args.len()),
                })
            }
        };

        let token = |t: Token| Ok(InvokeResult::Token(t));
        let primitive = |p: Primitive| Ok(InvokeResult::Primitive(p));

        match method {
            "add" | "subtract" | "multiply" | "divide" | "modulo" => {
                arity(1)?;
                let op = match method {
                    "add" => Arith::Add,
                    "subtract" => Arith::Subtract,
                    "multiply" => Arith::Multiply,
                    "divide" => Arith::Divide,
                    _ => Arith::Modulo,
                };
                token(self.arithmetic(op, token_arg(0)?)?)
            }
            "negate" => {
                arity(0)?;
                token(self.negate()?)
            }
            "not" => {
                arity(0)?;
                token(self.not()?)
            }
            "and" => {
                arity(1)?;
                token(self.and(token_arg(0)?)?)
            }
            "or" => {
                arity(1)?;
                token(self.or(token_arg(0)?)?)
            }
            "isEqualTo" => {
                arity(1)?;
                token(self.is_equal_to(token_arg(0)?)?)
            }
            "isLessThan" => {
                arity(1)?;
                token(self.is_less_than(token_arg(0)?)?)
            }
            "isGreaterThan" => {
                arity(1)?;
                token(self.is_greater_than(token_arg(0)?)?)
            }
            "zero" => {
                arity(0)?;
                token(self.zero()?)
            }
            "one" => {
                arity(0)?;
                token(self.one()?)
            }
            "getElement" => {
                arity(1)?;
                token(self.get_element(int_arg(0)?)?)
            }
            "booleanValue" => {
                arity(0)?;
                primitive(Primitive::Boolean(self.boolean_value()?))
            }
            "intValue" => {
                arity(0)?;
                primitive(Primitive::Int(self.int_value()?))
            }
            "longValue" => {
                arity(0)?;
                primitive(Primitive::Long(self.long_value()?))
            }
            "doubleValue" => {
                arity(0)?;
                primitive(Primitive::Double(self.double_value()?))
            }
            "stringValue" => {
                arity(0)?;
                primitive(Primitive::Str(self.string_value()?))
            }
            "toString" => {
                arity(0)?;
                primitive(Primitive::Str(self.to_string()))
            }
            "length" => {
                arity(0)?;
                match self {
                    Token::Array { values, .. } => {
                        primitive(Primitive::Int(i32::try_from(values.len()).unwrap_or(i32::MAX)))
                    }
                    other => Err(TokenError::UnknownMethod {
                        receiver: other.value_type(),
                        method: method.to_string(),
                    }),
                }
            }
            "isNil" => {
                arity(0)?;
                primitive(Primitive::Boolean(false))
            }
            "getType" => {
                arity(0)?;
                Ok(InvokeResult::Unmappable("Type".to_string()))
            }
            _ => Err(TokenError::UnknownMethod {
                receiver: self.value_type(),
                method: method.to_string(),
            }),
        }
    }
}

fn format_double(d: f64) -> String {
    if d.is_finite() && d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{:.1}", d)
    } else {
        format!("{}", d)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Boolean(b) => write!(f, "{}", b),
            Token::UnsignedByte(b) => write!(f, "{}ub", b),
            Token::Int(i) => write!(f, "{}", i),
            Token::Long(l) => write!(f, "{}L", l),
            Token::Double(d) => write!(f, "{}", format_double(*d)),
            Token::Complex { re, im } => {
                if *im < 0.0 {
                    write!(f, "{} - {}i", format_double(*re), format_double(-im))
                } else {
                    write!(f, "{} + {}i", format_double(*re), format_double(*im))
                }
            }
            Token::String(s) => write!(f, "\"{}\"", s),
            Token::Array { values, .. } => {
                write!(f, "{{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_arithmetic_widens() {
        let sum = Token::Int(2).arithmetic(Arith::Add, &Token::Double(0.5)).unwrap();
        assert_eq!(sum, Token::Double(2.5));

        let product = Token::UnsignedByte(3)
            .arithmetic(Arith::Multiply, &Token::Int(4))
            .unwrap();
        assert_eq!(product, Token::Int(12));
    }

    #[test]
    fn test_long_and_double_do_not_mix() {
        let err = Token::Long(1).arithmetic(Arith::Add, &Token::Double(1.0));
        assert!(matches!(err, Err(TokenError::Incompatible { .. })));
    }

    #[test]
    fn test_integer_division_by_zero() {
        assert_eq!(
            Token::Int(1).arithmetic(Arith::Divide, &Token::Int(0)),
            Err(TokenError::DivideByZero)
        );
    }

    #[test]
    fn test_string_concatenation_converts() {
        let s = Token::string("n=").arithmetic(Arith::Add, &Token::Int(3)).unwrap();
        assert_eq!(s, Token::string("n=3"));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(Token::Int(1).is_less_than(&Token::Double(1.5)).unwrap(), Token::Boolean(true));
        assert_eq!(Token::Int(2).is_equal_to(&Token::Long(2)).unwrap(), Token::Boolean(true));
        assert!(Token::Boolean(true).is_less_than(&Token::Boolean(false)).is_err());
    }

    #[test]
    fn test_invoke_result_shapes() {
        let five = Token::Int(5);
        assert_eq!(
            five.invoke("intValue", &[]).unwrap(),
            InvokeResult::Primitive(Primitive::Int(5))
        );
        assert_eq!(
            five.invoke("add", &[InvokeArg::Token(Token::Int(1))]).unwrap(),
            InvokeResult::Token(Token::Int(6))
        );
        assert_eq!(
            five.invoke("toString", &[]).unwrap(),
            InvokeResult::Primitive(Primitive::Str("5".to_string()))
        );
        assert!(matches!(
            five.invoke("getType", &[]).unwrap(),
            InvokeResult::Unmappable(_)
        ));
        assert!(matches!(
            five.invoke("frobnicate", &[]),
            Err(TokenError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Token::Double(2.0).to_string(), "2.0");
        assert_eq!(Token::Long(7).to_string(), "7L");
        assert_eq!(Token::array(vec![Token::Int(1), Token::Int(2)]).to_string(), "{1, 2}");
        assert_eq!(Token::Complex { re: 1.0, im: -2.0 }.to_string(), "1.0 - 2.0i");
    }

    #[test]
    fn test_array_element_type_is_joined() {
        let array = Token::array(vec![Token::Int(1), Token::Double(2.0)]);
        assert_eq!(array.value_type(), ValueType::array_of(ValueType::Double));
    }
}
