use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Integer(i64),
    Long(i64),
    UnsignedByte(u8),
    Double(f64),
    Str(String),
    Identifier(String),
    True,
    False,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    AndAnd,
    OrOr,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Question,
    Colon,
    Comma,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexToken {
    pub kind: TokenKind,
    pub offset: usize,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Vec<char>,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            chars: source.chars().collect(),
            position: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<LexToken>, ExprError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let offset = self.position;
            let Some(c) = self.peek() else {
                tokens.push(LexToken {
                    kind: TokenKind::Eof,
                    offset,
                });
                return Ok(tokens);
            };
            let kind = match c {
                '0'..='9' | '.' if self.starts_number() => self.number()?,
                '"' => self.string()?,
                c if c.is_alphabetic() || c == '_' => self.identifier(),
                _ => self.operator()?,
            };
            tokens.push(LexToken { kind, offset });
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.position += 1;
        }
    }

    fn starts_number(&self) -> bool {
        match self.peek() {
            Some(c) if c.is_ascii_digit() => true,
            Some('.') => matches!(self.peek_next(), Some(d) if d.is_ascii_digit()),
            _ => false,
        }
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Lex {
            offset: self.position,
            message: message.into(),
            source_text: self.source.to_string(),
        }
    }

    fn number(&mut self) -> Result<TokenKind, ExprError> {
        let start = self.position;
        let mut is_double = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.position += 1;
            } else if c == '.' && !is_double {
                is_double = true;
                self.position += 1;
            } else if (c == 'e' || c == 'E')
                && matches!(self.peek_next(), Some(d) if d.is_ascii_digit() || d == '-' || d == '+')
            {
                is_double = true;
                self.position += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.position].iter().collect();

        if is_double {
            return text
                .parse::<f64>()
                .map(TokenKind::Double)
                .map_err(|_| self.error(format!("malformed number `{}`", text)));
        }

        let value = text
            .parse::<i64>()
            .map_err(|_| self.error(format!("integer literal `{}` out of range", text)))?;

        match self.peek() {
            Some('L') | Some('l') => {
                self.position += 1;
                Ok(TokenKind::Long(value))
            }
            Some('u') if self.peek_next() == Some('b') => {
                self.position += 2;
                u8::try_from(value)
                    .map(TokenKind::UnsignedByte)
                    .map_err(|_| self.error(format!("unsigned byte `{}` out of range", value)))
            }
            _ => Ok(TokenKind::Integer(value)),
        }
    }

    fn string(&mut self) -> Result<TokenKind, ExprError> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some('"') => return Ok(TokenKind::Str(value)),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c) => value.push(c),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn identifier(&mut self) -> TokenKind {
        let start = self.position;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '$') {
            self.position += 1;
        }
        let text: String = self.chars[start..self.position].iter().collect();
        match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier(text),
        }
    }

    fn operator(&mut self) -> Result<TokenKind, ExprError> {
        let c = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        let next = self.peek();
        let two = |lexer: &mut Self, kind: TokenKind| {
            lexer.position += 1;
            kind
        };
        Ok(match (c, next) {
            ('&', Some('&')) => two(self, TokenKind::AndAnd),
            ('|', Some('|')) => two(self, TokenKind::OrOr),
            ('=', Some('=')) => two(self, TokenKind::EqualEqual),
            ('!', Some('=')) => two(self, TokenKind::BangEqual),
            ('<', Some('=')) => two(self, TokenKind::LessEqual),
            ('>', Some('=')) => two(self, TokenKind::GreaterEqual),
            ('+', _) => TokenKind::Plus,
            ('-', _) => TokenKind::Minus,
            ('*', _) => TokenKind::Star,
            ('/', _) => TokenKind::Slash,
            ('%', _) => TokenKind::Percent,
            ('!', _) => TokenKind::Bang,
            ('<', _) => TokenKind::Less,
            ('>', _) => TokenKind::Greater,
            ('?', _) => TokenKind::Question,
            (':', _) => TokenKind::Colon,
            (',', _) => TokenKind::Comma,
            ('(', _) => TokenKind::LeftParen,
            (')', _) => TokenKind::RightParen,
            ('{', _) => TokenKind::LeftBrace,
            ('}', _) => TokenKind::RightBrace,
            (other, _) => {
                self.position -= 1;
                return Err(self.error(format!("unexpected character `{}`", other)));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_numeric_suffixes() {
        assert_eq!(
            kinds("1 2L 3ub 4.5 1e3"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Long(2),
                TokenKind::UnsignedByte(3),
                TokenKind::Double(4.5),
                TokenKind::Double(1000.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_operators_and_identifiers() {
        assert_eq!(
            kinds("a_isPresent && !b >= 2"),
            vec![
                TokenKind::Identifier("a_isPresent".to_string()),
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Identifier("b".to_string()),
                TokenKind::GreaterEqual,
                TokenKind::Integer(2),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            Lexer::new("\"abc").tokenize(),
            Err(ExprError::Lex { .. })
        ));
    }

    #[test]
    fn test_unsigned_byte_range() {
        assert!(Lexer::new("300ub").tokenize().is_err());
    }
}
