use super::ast::{BinaryOp, Expr, UnaryOp, PSEUDO_VARIABLES};
use super::ExprError;
use crate::data::{Arith, Token};

/// Identifier bindings visible to an expression.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Token>;
}

/// A scope with no bindings.
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn lookup(&self, _name: &str) -> Option<Token> {
        None
    }
}

impl<F> Scope for F
where
    F: Fn(&str) -> Option<Token>,
{
    fn lookup(&self, name: &str) -> Option<Token> {
        self(name)
    }
}

pub fn builtin_constant(name: &str) -> Option<Token> {
    match name {
        "PI" => Some(Token::Double(std::f64::consts::PI)),
        "E" => Some(Token::Double(std::f64::consts::E)),
        _ => None,
    }
}

pub fn arith_of(op: BinaryOp) -> Option<Arith> {
    Some(match op {
        BinaryOp::Add => Arith::Add,
        BinaryOp::Subtract => Arith::Subtract,
        BinaryOp::Multiply => Arith::Multiply,
        BinaryOp::Divide => Arith::Divide,
        BinaryOp::Modulo => Arith::Modulo,
        _ => return None,
    })
}

/// Evaluate `expr` with every identifier bound by `scope`.
pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Token, ExprError> {
    match expr {
        Expr::Literal(token) => Ok(token.clone()),
        Expr::Identifier(name) => {
            if let Some(token) = builtin_constant(name) {
                return Ok(token);
            }
            if PSEUDO_VARIABLES.contains(&name.as_str()) {
                return Err(ExprError::Unsupported(format!(
                    "`{}` is not available in a static context",
                    name
                )));
            }
            scope
                .lookup(name)
                .ok_or_else(|| ExprError::Unbound(name.clone()))
        }
        Expr::Unary(op, operand) => {
            let value = evaluate(operand, scope)?;
            Ok(match op {
                UnaryOp::Negate => value.negate()?,
                UnaryOp::Not => value.not()?,
            })
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            if !evaluate(left, scope)?.boolean_value()? {
                return Ok(Token::Boolean(false));
            }
            Ok(Token::Boolean(evaluate(right, scope)?.boolean_value()?))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if evaluate(left, scope)?.boolean_value()? {
                return Ok(Token::Boolean(true));
            }
            Ok(Token::Boolean(evaluate(right, scope)?.boolean_value()?))
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, scope)?;
            let right = evaluate(right, scope)?;
            if let Some(arith) = arith_of(*op) {
                return Ok(left.arithmetic(arith, &right)?);
            }
            Ok(match op {
                BinaryOp::Equal => left.is_equal_to(&right)?,
                BinaryOp::NotEqual => left.is_equal_to(&right)?.not()?,
                BinaryOp::Less => left.is_less_than(&right)?,
                BinaryOp::Greater => left.is_greater_than(&right)?,
                BinaryOp::LessEqual => left.is_greater_than(&right)?.not()?,
                BinaryOp::GreaterEqual => left.is_less_than(&right)?.not()?,
                _ => unreachable_binary(*op)?,
            })
        }
        Expr::Conditional(condition, then, otherwise) => {
            if evaluate(condition, scope)?.boolean_value()? {
                evaluate(then, scope)
            } else {
                evaluate(otherwise, scope)
            }
        }
        Expr::Array(elements) => {
            let values = elements
                .iter()
                .map(|e| evaluate(e, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Token::array(values))
        }
    }
}

fn unreachable_binary(op: BinaryOp) -> Result<Token, ExprError> {
    Err(ExprError::Unsupported(format!(
        "operator {:?} has no token evaluation",
        op
    )))
}
