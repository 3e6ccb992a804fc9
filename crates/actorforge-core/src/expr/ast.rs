use crate::data::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

/// Parse tree of the expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Token),
    Identifier(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
}

/// Identifiers with a fixed meaning that are never free variables.
pub const BUILTIN_CONSTANTS: &[&str] = &["PI", "E"];

/// Identifiers bound by the execution environment; they cannot be
/// evaluated ahead of time.
pub const PSEUDO_VARIABLES: &[&str] = &["time", "iteration"];

impl Expr {
    /// Free identifiers in first-occurrence order, without duplicates.
    pub fn free_variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_identifiers(&mut names);
        names
    }

    fn collect_identifiers(&self, names: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Identifier(name) => {
                if !BUILTIN_CONSTANTS.contains(&name.as_str()) && !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::Unary(_, operand) => operand.collect_identifiers(names),
            Expr::Binary(_, left, right) => {
                left.collect_identifiers(names);
                right.collect_identifiers(names);
            }
            Expr::Conditional(cond, then, otherwise) => {
                cond.collect_identifiers(names);
                then.collect_identifiers(names);
                otherwise.collect_identifiers(names);
            }
            Expr::Array(elements) => {
                for element in elements {
                    element.collect_identifiers(names);
                }
            }
        }
    }
}
