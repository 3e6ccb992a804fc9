//! Three-address statement language.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Boolean,
    Int,
    Long,
    Double,
    Ref(String),
    Array(Box<Type>),
    Null,
}

impl Type {
    pub fn object(class: impl Into<String>) -> Self {
        Type::Ref(class.into())
    }

    pub fn array_of(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Ref(name) => Some(name),
            _ => None,
        }
    }

    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Array(element) => Some(element),
            _ => None,
        }
    }

    /// The innermost class name of a reference or (nested) array type.
    pub fn base_class(&self) -> Option<&str> {
        match self {
            Type::Ref(name) => Some(name),
            Type::Array(element) => element.base_class(),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Ref(_) | Type::Array(_) | Type::Null)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Boolean => write!(f, "boolean"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::Double => write!(f, "double"),
            Type::Ref(name) => write!(f, "{}", name),
            Type::Array(element) => write!(f, "{}[]", element),
            Type::Null => write!(f, "null_type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
}

impl Const {
    pub fn ty(&self) -> Type {
        match self {
            Const::Null => Type::Null,
            Const::Bool(_) => Type::Boolean,
            Const::Int(_) => Type::Int,
            Const::Long(_) => Type::Long,
            Const::Double(_) => Type::Double,
            Const::Str(_) => Type::object("String"),
        }
    }

    /// Integral value of an int, long or boolean constant.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Const::Bool(b) => Some(i64::from(*b)),
            Const::Int(i) => Some(i64::from(*i)),
            Const::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Const::Double(d) => Some(*d),
            other => other.as_i64().map(|i| i as f64),
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Null => write!(f, "null"),
            Const::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            Const::Int(i) => write!(f, "{}", i),
            Const::Long(l) => write!(f, "{}L", l),
            Const::Double(d) => write!(f, "{:?}", d),
            Const::Str(s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Local(String),
    Const(Const),
}

impl Operand {
    pub fn local(name: impl Into<String>) -> Self {
        Operand::Local(name.into())
    }

    pub fn int(value: i32) -> Self {
        Operand::Const(Const::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Operand::Const(Const::Bool(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Operand::Const(Const::Str(value.into()))
    }

    pub fn null() -> Self {
        Operand::Const(Const::Null)
    }

    pub fn as_local(&self) -> Option<&str> {
        match self {
            Operand::Local(name) => Some(name),
            Operand::Const(_) => None,
        }
    }

    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Operand::Const(c) => Some(c),
            Operand::Local(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Local(name) => write!(f, "{}", name),
            Operand::Const(c) => write!(f, "{}", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        FieldRef {
            class: class.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {}>", self.class, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Cmp(CondOp),
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Cmp(op) => op.symbol(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CondOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CondOp::Eq => "==",
            CondOp::Ne => "!=",
            CondOp::Lt => "<",
            CondOp::Le => "<=",
            CondOp::Gt => ">",
            CondOp::Ge => ">=",
        }
    }

    pub fn negate(self) -> Self {
        match self {
            CondOp::Eq => CondOp::Ne,
            CondOp::Ne => CondOp::Eq,
            CondOp::Lt => CondOp::Ge,
            CondOp::Le => CondOp::Gt,
            CondOp::Gt => CondOp::Le,
            CondOp::Ge => CondOp::Lt,
        }
    }

    pub fn test<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            CondOp::Eq => lhs == rhs,
            CondOp::Ne => lhs != rhs,
            CondOp::Lt => lhs < rhs,
            CondOp::Le => lhs <= rhs,
            CondOp::Gt => lhs > rhs,
            CondOp::Ge => lhs >= rhs,
        }
    }

    /// Evaluate a comparison of two constants; `None` when the operands are
    /// not comparable at compile time.
    pub fn eval(self, lhs: &Const, rhs: &Const) -> Option<bool> {
        match (lhs, rhs) {
            (Const::Null, Const::Null) => Some(self.test(0, 0)),
            (Const::Str(a), Const::Str(b)) if matches!(self, CondOp::Eq | CondOp::Ne) => {
                Some(self.test(a, b))
            }
            (Const::Double(_), _) | (_, Const::Double(_)) => {
                Some(self.test(lhs.as_f64()?, rhs.as_f64()?))
            }
            _ => Some(self.test(lhs.as_i64()?, rhs.as_i64()?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeExpr {
    pub kind: InvokeKind,
    /// Declared class of the callee.
    pub class: String,
    pub method: String,
    pub base: Option<Operand>,
    pub args: Vec<Operand>,
    pub ret: Type,
}

impl InvokeExpr {
    pub fn virtual_call(
        base: Operand,
        class: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Operand>,
        ret: Type,
    ) -> Self {
        InvokeExpr {
            kind: InvokeKind::Virtual,
            class: class.into(),
            method: method.into(),
            base: Some(base),
            args,
            ret,
        }
    }

    pub fn special(
        base: Operand,
        class: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Operand>,
    ) -> Self {
        InvokeExpr {
            kind: InvokeKind::Special,
            class: class.into(),
            method: method.into(),
            base: Some(base),
            args,
            ret: Type::Void,
        }
    }

    pub fn static_call(
        class: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Operand>,
        ret: Type,
    ) -> Self {
        InvokeExpr {
            kind: InvokeKind::Static,
            class: class.into(),
            method: method.into(),
            base: None,
            args,
            ret,
        }
    }

    pub fn base_local(&self) -> Option<&str> {
        self.base.as_ref().and_then(Operand::as_local)
    }

    fn operands(&self) -> impl Iterator<Item = &Operand> {
        self.base.iter().chain(self.args.iter())
    }

    fn operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
        self.base.iter_mut().chain(self.args.iter_mut())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Use(Operand),
    Binary(BinOp, Operand, Operand),
    Unary(UnOp, Operand),
    Cast(Type, Operand),
    InstanceOf(Operand, Type),
    New(String),
    NewArray(Type, Operand),
    Length(Operand),
    InstanceField(Operand, FieldRef),
    StaticField(FieldRef),
    ArrayRead(Operand, Operand),
    Invoke(InvokeExpr),
}

impl Expr {
    pub fn local(name: impl Into<String>) -> Self {
        Expr::Use(Operand::local(name))
    }

    pub fn constant(c: Const) -> Self {
        Expr::Use(Operand::Const(c))
    }

    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Expr::Use(a) | Expr::Unary(_, a) | Expr::Cast(_, a) | Expr::InstanceOf(a, _) => {
                vec![a]
            }
            Expr::NewArray(_, a) | Expr::Length(a) | Expr::InstanceField(a, _) => vec![a],
            Expr::Binary(_, a, b) | Expr::ArrayRead(a, b) => vec![a, b],
            Expr::New(_) | Expr::StaticField(_) => Vec::new(),
            Expr::Invoke(invoke) => invoke.operands().collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Expr::Use(a) | Expr::Unary(_, a) | Expr::Cast(_, a) | Expr::InstanceOf(a, _) => {
                vec![a]
            }
            Expr::NewArray(_, a) | Expr::Length(a) | Expr::InstanceField(a, _) => vec![a],
            Expr::Binary(_, a, b) | Expr::ArrayRead(a, b) => vec![a, b],
            Expr::New(_) | Expr::StaticField(_) => Vec::new(),
            Expr::Invoke(invoke) => invoke.operands_mut().collect(),
        }
    }

    pub fn field(&self) -> Option<&FieldRef> {
        match self {
            Expr::InstanceField(_, field) | Expr::StaticField(field) => Some(field),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Local(String),
    InstanceField(Operand, FieldRef),
    StaticField(FieldRef),
    ArrayElem(Operand, Operand),
}

impl Place {
    pub fn local(name: impl Into<String>) -> Self {
        Place::Local(name.into())
    }

    pub fn field(&self) -> Option<&FieldRef> {
        match self {
            Place::InstanceField(_, field) | Place::StaticField(field) => Some(field),
            _ => None,
        }
    }

    fn operands(&self) -> Vec<&Operand> {
        match self {
            Place::Local(_) | Place::StaticField(_) => Vec::new(),
            Place::InstanceField(base, _) => vec![base],
            Place::ArrayElem(array, index) => vec![array, index],
        }
    }

    fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Place::Local(_) | Place::StaticField(_) => Vec::new(),
            Place::InstanceField(base, _) => vec![base],
            Place::ArrayElem(array, index) => vec![array, index],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cond {
    pub op: CondOp,
    pub lhs: Operand,
    pub rhs: Operand,
}

impl Cond {
    pub fn new(op: CondOp, lhs: Operand, rhs: Operand) -> Self {
        Cond { op, lhs, rhs }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign(Place, Expr),
    Invoke(InvokeExpr),
    If(Cond, String),
    Goto(String),
    Switch {
        key: Operand,
        cases: Vec<(i64, String)>,
        default: String,
    },
    Label(String),
    Return(Option<Operand>),
    Throw(Operand),
    Nop,
}

impl Stmt {
    pub fn assign_local(name: impl Into<String>, expr: Expr) -> Self {
        Stmt::Assign(Place::Local(name.into()), expr)
    }

    /// The local this statement defines, if any.
    pub fn def(&self) -> Option<&str> {
        match self {
            Stmt::Assign(Place::Local(name), _) => Some(name),
            _ => None,
        }
    }

    /// Every operand read by the statement, including bases of assigned
    /// fields and array elements.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Stmt::Assign(place, expr) => {
                let mut ops = place.operands();
                ops.extend(expr.operands());
                ops
            }
            Stmt::Invoke(invoke) => invoke.operands().collect(),
            Stmt::If(cond, _) => vec![&cond.lhs, &cond.rhs],
            Stmt::Switch { key, .. } => vec![key],
            Stmt::Return(Some(value)) | Stmt::Throw(value) => vec![value],
            Stmt::Goto(_) | Stmt::Label(_) | Stmt::Return(None) | Stmt::Nop => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Stmt::Assign(place, expr) => {
                let mut ops = place.operands_mut();
                ops.extend(expr.operands_mut());
                ops
            }
            Stmt::Invoke(invoke) => invoke.operands_mut().collect(),
            Stmt::If(cond, _) => vec![&mut cond.lhs, &mut cond.rhs],
            Stmt::Switch { key, .. } => vec![key],
            Stmt::Return(Some(value)) | Stmt::Throw(value) => vec![value],
            Stmt::Goto(_) | Stmt::Label(_) | Stmt::Return(None) | Stmt::Nop => Vec::new(),
        }
    }

    /// Locals read by the statement.
    pub fn uses(&self) -> Vec<&str> {
        self.operands()
            .into_iter()
            .filter_map(Operand::as_local)
            .collect()
    }

    pub fn uses_local(&self, name: &str) -> bool {
        self.uses().contains(&name) || self.def() == Some(name)
    }

    pub fn invoke(&self) -> Option<&InvokeExpr> {
        match self {
            Stmt::Invoke(invoke) | Stmt::Assign(_, Expr::Invoke(invoke)) => Some(invoke),
            _ => None,
        }
    }

    pub fn invoke_mut(&mut self) -> Option<&mut InvokeExpr> {
        match self {
            Stmt::Invoke(invoke) | Stmt::Assign(_, Expr::Invoke(invoke)) => Some(invoke),
            _ => None,
        }
    }

    /// Fields read or written by the statement.
    pub fn fields(&self) -> Vec<&FieldRef> {
        match self {
            Stmt::Assign(place, expr) => place.field().into_iter().chain(expr.field()).collect(),
            _ => Vec::new(),
        }
    }

    /// Labels this statement may jump to.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Stmt::If(_, target) | Stmt::Goto(target) => vec![target],
            Stmt::Switch { cases, default, .. } => cases
                .iter()
                .map(|(_, l)| l.as_str())
                .chain(std::iter::once(default.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn targets_mut(&mut self) -> Vec<&mut String> {
        match self {
            Stmt::If(_, target) | Stmt::Goto(target) => vec![target],
            Stmt::Switch { cases, default, .. } => cases
                .iter_mut()
                .map(|(_, l)| l)
                .chain(std::iter::once(default))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// False for statements after which control never reaches the next one.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Stmt::Goto(_) | Stmt::Switch { .. } | Stmt::Return(_) | Stmt::Throw(_)
        )
    }

    /// Rename every local through `f`, definitions included.
    pub fn rename_locals(&mut self, f: &mut impl FnMut(&str) -> String) {
        for operand in self.operands_mut() {
            if let Operand::Local(name) = operand {
                *name = f(name);
            }
        }
        if let Stmt::Assign(Place::Local(name), _) = self {
            *name = f(name);
        }
    }

    pub fn rename_labels(&mut self, f: &mut impl FnMut(&str) -> String) {
        if let Stmt::Label(name) = self {
            *name = f(name);
        }
        for target in self.targets_mut() {
            *target = f(target);
        }
    }

    /// Replace every read of `local` with `value`.
    pub fn substitute(&mut self, local: &str, value: &Operand) -> bool {
        let mut changed = false;
        for operand in self.operands_mut() {
            if operand.as_local() == Some(local) {
                *operand = value.clone();
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uses_include_place_bases() {
        let stmt = Stmt::Assign(
            Place::ArrayElem(Operand::local("buf"), Operand::local("i")),
            Expr::local("t"),
        );
        assert_eq!(stmt.uses(), vec!["buf", "i", "t"]);
        assert_eq!(stmt.def(), None);
    }

    #[test]
    fn test_substitute_replaces_reads_only() {
        let mut stmt = Stmt::assign_local(
            "x",
            Expr::Binary(BinOp::Add, Operand::local("x"), Operand::int(1)),
        );
        assert!(stmt.substitute("x", &Operand::int(4)));
        assert_eq!(
            stmt,
            Stmt::assign_local("x", Expr::Binary(BinOp::Add, Operand::int(4), Operand::int(1)))
        );
    }

    #[test]
    fn test_cond_eval() {
        assert_eq!(CondOp::Lt.eval(&Const::Int(1), &Const::Long(2)), Some(true));
        assert_eq!(CondOp::Eq.eval(&Const::Double(1.0), &Const::Int(1)), Some(true));
        assert_eq!(CondOp::Lt.eval(&Const::Str("a".into()), &Const::Str("b".into())), None);
        assert_eq!(CondOp::Ge.negate(), CondOp::Lt);
    }

    #[test]
    fn test_switch_targets() {
        let stmt = Stmt::Switch {
            key: Operand::local("s"),
            cases: vec![(0, "a".into()), (1, "b".into())],
            default: "d".into(),
        };
        assert_eq!(stmt.targets(), vec!["a", "b", "d"]);
        assert!(!stmt.falls_through());
    }
}
