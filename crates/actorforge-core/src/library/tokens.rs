//! Moving tokens between compile-time values and IR.

use crate::data::{Primitive, Token, ValueType};
use crate::ir::{BodyBuilder, Const, Expr, Operand, Place, Stmt, Type};

pub fn token_type() -> Type {
    Type::object("Token")
}

/// Emit the construction of `token` and return the local holding it.
pub fn emit_token(b: &mut BodyBuilder<'_>, token: &Token) -> String {
    match token {
        Token::Boolean(v) => b.new_object("BooleanToken", vec![Operand::bool(*v)]),
        Token::UnsignedByte(v) => {
            b.new_object("UnsignedByteToken", vec![Operand::int(i32::from(*v))])
        }
        Token::Int(v) => b.new_object("IntToken", vec![Operand::int(*v)]),
        Token::Long(v) => b.new_object("LongToken", vec![Operand::Const(Const::Long(*v))]),
        Token::Double(v) => b.new_object("DoubleToken", vec![Operand::Const(Const::Double(*v))]),
        Token::Complex { re, im } => b.new_object(
            "ComplexToken",
            vec![
                Operand::Const(Const::Double(*re)),
                Operand::Const(Const::Double(*im)),
            ],
        ),
        Token::String(s) => b.new_object("StringToken", vec![Operand::str(s.clone())]),
        Token::Array { values, .. } => {
            let length = i32::try_from(values.len()).unwrap_or(i32::MAX);
            let array = b.eval(
                "$a",
                Type::array_of(token_type()),
                Expr::NewArray(token_type(), Operand::int(length)),
            );
            for (i, value) in values.iter().enumerate() {
                let element = emit_token(b, value);
                b.push(Stmt::Assign(
                    Place::ArrayElem(
                        Operand::local(&array),
                        Operand::int(i32::try_from(i).unwrap_or(i32::MAX)),
                    ),
                    Expr::local(element),
                ));
            }
            b.new_object("ArrayToken", vec![Operand::local(array)])
        }
    }
}

/// The token built by `new class; <init>(args)` for a scalar token class.
pub fn token_from_construction(class: &str, args: &[Const]) -> Option<Token> {
    Some(match (class, args) {
        ("BooleanToken", [c]) => Token::Boolean(c.as_i64()? != 0),
        ("UnsignedByteToken", [c]) => Token::UnsignedByte(u8::try_from(c.as_i64()?).ok()?),
        ("IntToken", [c]) => Token::Int(i32::try_from(c.as_i64()?).ok()?),
        ("LongToken", [c]) => Token::Long(c.as_i64()?),
        ("DoubleToken", [c]) => Token::Double(c.as_f64()?),
        ("ComplexToken", [re, im]) => Token::Complex {
            re: re.as_f64()?,
            im: im.as_f64()?,
        },
        ("StringToken", [Const::Str(s)]) => Token::String(s.clone()),
        _ => return None,
    })
}

pub fn primitive_to_const(value: &Primitive) -> Const {
    match value {
        Primitive::Boolean(b) => Const::Bool(*b),
        Primitive::Int(i) => Const::Int(*i),
        Primitive::Long(l) => Const::Long(*l),
        Primitive::Double(d) => Const::Double(*d),
        Primitive::Str(s) => Const::Str(s.clone()),
    }
}

pub fn const_to_primitive(value: &Const) -> Option<Primitive> {
    Some(match value {
        Const::Bool(b) => Primitive::Boolean(*b),
        Const::Int(i) => Primitive::Int(*i),
        Const::Long(l) => Primitive::Long(*l),
        Const::Double(d) => Primitive::Double(*d),
        Const::Str(s) => Primitive::Str(s.clone()),
        Const::Null => return None,
    })
}

/// IR type of a local holding a value of `value_type`.
pub fn ir_type_of(value_type: &ValueType) -> Type {
    Type::object(value_type.token_class())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Body;

    #[test]
    fn test_array_token_construction() {
        let mut body = Body::new();
        let mut b = BodyBuilder::new(&mut body);
        let local = emit_token(&mut b, &Token::array(vec![Token::Int(1), Token::Int(2)]));
        let stmts = b.finish();
        // newarray, two element constructions and stores, the array token
        assert_eq!(stmts.len(), 1 + 2 * 3 + 2);
        assert_eq!(body.local_type(&local), Some(&Type::object("ArrayToken")));
    }

    #[test]
    fn test_token_from_construction() {
        assert_eq!(
            token_from_construction("BooleanToken", &[Const::Bool(true)]),
            Some(Token::Boolean(true))
        );
        assert_eq!(
            token_from_construction("DoubleToken", &[Const::Int(2)]),
            Some(Token::Double(2.0))
        );
        assert_eq!(token_from_construction("IntToken", &[]), None);
        assert_eq!(token_from_construction("UnsignedByteToken", &[Const::Int(300)]), None);
    }
}
