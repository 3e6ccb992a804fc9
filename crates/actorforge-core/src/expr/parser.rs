use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::{LexToken, Lexer, TokenKind};
use super::ExprError;
use crate::data::Token;

/// Recursive-descent parser for the expression language.
///
/// Precedence, loosest first: `?:`, `||`, `&&`, equality, comparison,
/// additive, multiplicative, unary.
pub struct Parser {
    tokens: Vec<LexToken>,
    position: usize,
    source: String,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, ExprError> {
        Ok(Parser {
            tokens: Lexer::new(source).tokenize()?,
            position: 0,
            source: source.to_string(),
        })
    }

    pub fn parse(mut self) -> Result<Expr, ExprError> {
        let expr = self.parse_conditional()?;
        if !self.is_at_end() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    // Token stream management
    fn current(&self) -> &LexToken {
        // The lexer always terminates the stream with `Eof`.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.position.min(last)]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.current().kind.clone();
        if !self.is_at_end() {
            self.position += 1;
        }
        kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kinds: &[TokenKind]) -> Option<TokenKind> {
        for kind in kinds {
            if self.check(kind) {
                return Some(self.advance());
            }
        }
        None
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<(), ExprError> {
        if self.check(&kind) {
            self.advance();
            return Ok(());
        }
        Err(self.error(message))
    }

    fn error(&self, message: &str) -> ExprError {
        ExprError::Parse {
            offset: self.current().offset,
            message: message.to_string(),
            source_text: self.source.clone(),
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, ExprError> {
        let condition = self.parse_or()?;
        if self.match_token(&[TokenKind::Question]).is_some() {
            let then = self.parse_conditional()?;
            self.consume(TokenKind::Colon, "expected `:` in conditional expression")?;
            let otherwise = self.parse_conditional()?;
            return Ok(Expr::Conditional(
                Box::new(condition),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(condition)
    }

    fn parse_binary_level(
        &mut self,
        operators: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut left = next(self)?;
        'outer: loop {
            for (kind, op) in operators {
                if self.check(kind) {
                    self.advance();
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&[(TokenKind::OrOr, BinaryOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(&[(TokenKind::AndAnd, BinaryOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(
            &[
                (TokenKind::EqualEqual, BinaryOp::Equal),
                (TokenKind::BangEqual, BinaryOp::NotEqual),
            ],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(
            &[
                (TokenKind::LessEqual, BinaryOp::LessEqual),
                (TokenKind::GreaterEqual, BinaryOp::GreaterEqual),
                (TokenKind::Less, BinaryOp::Less),
                (TokenKind::Greater, BinaryOp::Greater),
            ],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Subtract),
            ],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        self.parse_binary_level(
            &[
                (TokenKind::Star, BinaryOp::Multiply),
                (TokenKind::Slash, BinaryOp::Divide),
                (TokenKind::Percent, BinaryOp::Modulo),
            ],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.match_token(&[TokenKind::Minus]).is_some() {
            let operand = self.parse_unary()?;
            // Fold negative literals so `-1` stays a constant.
            return Ok(match operand {
                Expr::Literal(Token::Int(i)) => Expr::Literal(Token::Int(i.wrapping_neg())),
                Expr::Literal(Token::Long(l)) => Expr::Literal(Token::Long(l.wrapping_neg())),
                Expr::Literal(Token::Double(d)) => Expr::Literal(Token::Double(-d)),
                other => Expr::Unary(UnaryOp::Negate, Box::new(other)),
            });
        }
        if self.match_token(&[TokenKind::Bang]).is_some() {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let offset = self.current().offset;
        match self.advance() {
            TokenKind::Integer(i) => i32::try_from(i)
                .map(|i| Expr::Literal(Token::Int(i)))
                .map_err(|_| ExprError::Parse {
                    offset,
                    message: format!("integer `{}` does not fit in an int; use a long suffix", i),
                    source_text: self.source.clone(),
                }),
            TokenKind::Long(l) => Ok(Expr::Literal(Token::Long(l))),
            TokenKind::UnsignedByte(b) => Ok(Expr::Literal(Token::UnsignedByte(b))),
            TokenKind::Double(d) => Ok(Expr::Literal(Token::Double(d))),
            TokenKind::Str(s) => Ok(Expr::Literal(Token::String(s))),
            TokenKind::True => Ok(Expr::Literal(Token::Boolean(true))),
            TokenKind::False => Ok(Expr::Literal(Token::Boolean(false))),
            TokenKind::Identifier(name) => Ok(Expr::Identifier(name)),
            TokenKind::LeftParen => {
                let inner = self.parse_conditional()?;
                self.consume(TokenKind::RightParen, "expected `)`")?;
                Ok(inner)
            }
            TokenKind::LeftBrace => {
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RightBrace) {
                    loop {
                        elements.push(self.parse_conditional()?);
                        if self.match_token(&[TokenKind::Comma]).is_none() {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightBrace, "expected `}` after array elements")?;
                Ok(Expr::Array(elements))
            }
            TokenKind::Eof => Err(self.error("unexpected end of expression")),
            _ => Err(ExprError::Parse {
                offset,
                message: "expected an expression".to_string(),
                source_text: self.source.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Expr {
        Parser::new(source).unwrap().parse().unwrap()
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3");
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Add,
                Box::new(Expr::Literal(Token::Int(1))),
                Box::new(Expr::Binary(
                    BinaryOp::Multiply,
                    Box::new(Expr::Literal(Token::Int(2))),
                    Box::new(Expr::Literal(Token::Int(3)))
                ))
            )
        );
    }

    #[test]
    fn test_left_associative_subtraction() {
        let expr = parse("a - b - c");
        match expr {
            Expr::Binary(BinaryOp::Subtract, left, _) => {
                assert!(matches!(*left, Expr::Binary(BinaryOp::Subtract, _, _)));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn test_conditional_and_arrays() {
        let expr = parse("x > 0 ? {1, 2} : {}");
        assert!(matches!(expr, Expr::Conditional(_, _, _)));
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(parse("-4"), Expr::Literal(Token::Int(-4)));
    }

    #[test]
    fn test_trailing_input_is_an_error() {
        let result = Parser::new("1 2").unwrap().parse();
        assert!(matches!(result, Err(ExprError::Parse { .. })));
    }

    #[test]
    fn test_unbalanced_parenthesis() {
        assert!(Parser::new("(1 + 2").unwrap().parse().is_err());
    }
}
