use super::scene::Body;
use super::types::{Cond, Const, Expr, FieldRef, InvokeExpr, Operand, Place, Stmt, Type};

/// Appends statements with fresh locals and labels drawn from a body.
///
/// Statements accumulate in the builder; [`BodyBuilder::finish`] hands them
/// back for splicing, [`BodyBuilder::append`] pushes them onto the body.
pub struct BodyBuilder<'a> {
    body: &'a mut Body,
    stmts: Vec<Stmt>,
}

impl<'a> BodyBuilder<'a> {
    pub fn new(body: &'a mut Body) -> Self {
        BodyBuilder {
            body,
            stmts: Vec::new(),
        }
    }

    pub fn body(&self) -> &Body {
        self.body
    }

    pub fn local(&mut self, prefix: &str, ty: Type) -> String {
        self.body.new_local(prefix, ty)
    }

    /// Labels share the body's counter, so names handed out here never
    /// collide with ones emitted earlier but not yet spliced in.
    pub fn label(&mut self) -> String {
        self.body.new_label()
    }

    pub fn push(&mut self, stmt: Stmt) -> &mut Self {
        self.stmts.push(stmt);
        self
    }

    pub fn extend(&mut self, stmts: impl IntoIterator<Item = Stmt>) -> &mut Self {
        self.stmts.extend(stmts);
        self
    }

    pub fn assign(&mut self, local: &str, expr: Expr) -> &mut Self {
        self.push(Stmt::assign_local(local, expr))
    }

    /// Evaluate `expr` into a fresh local of type `ty`.
    pub fn eval(&mut self, prefix: &str, ty: Type, expr: Expr) -> String {
        let local = self.local(prefix, ty);
        self.assign(&local, expr);
        local
    }

    pub fn invoke(&mut self, invoke: InvokeExpr) -> &mut Self {
        self.push(Stmt::Invoke(invoke))
    }

    /// Call `invoke` and keep its result in a fresh local.
    pub fn call(&mut self, prefix: &str, invoke: InvokeExpr) -> String {
        let ty = invoke.ret.clone();
        self.eval(prefix, ty, Expr::Invoke(invoke))
    }

    /// `r = new class; r.<init>(args)`
    pub fn new_object(&mut self, class: &str, args: Vec<Operand>) -> String {
        let local = self.eval("$r", Type::object(class), Expr::New(class.to_string()));
        self.invoke(InvokeExpr::special(
            Operand::local(&local),
            class,
            "<init>",
            args,
        ));
        local
    }

    pub fn get_field(&mut self, base: Operand, field: FieldRef, ty: Type) -> String {
        self.eval("$f", ty, Expr::InstanceField(base, field))
    }

    pub fn set_field(&mut self, base: Operand, field: FieldRef, value: Operand) -> &mut Self {
        self.push(Stmt::Assign(Place::InstanceField(base, field), Expr::Use(value)))
    }

    pub fn get_static(&mut self, field: FieldRef, ty: Type) -> String {
        self.eval("$s", ty, Expr::StaticField(field))
    }

    pub fn set_static(&mut self, field: FieldRef, value: Operand) -> &mut Self {
        self.push(Stmt::Assign(Place::StaticField(field), Expr::Use(value)))
    }

    pub fn if_goto(&mut self, cond: Cond, target: &str) -> &mut Self {
        self.push(Stmt::If(cond, target.to_string()))
    }

    pub fn goto(&mut self, target: &str) -> &mut Self {
        self.push(Stmt::Goto(target.to_string()))
    }

    pub fn place_label(&mut self, label: &str) -> &mut Self {
        self.push(Stmt::Label(label.to_string()))
    }

    pub fn ret(&mut self, value: Option<Operand>) -> &mut Self {
        self.push(Stmt::Return(value))
    }

    /// Throw a runtime exception carrying `message`.
    pub fn throw_error(&mut self, message: &str) -> &mut Self {
        let error = self.new_object(
            "RuntimeException",
            vec![Operand::Const(Const::Str(message.to_string()))],
        );
        self.push(Stmt::Throw(Operand::local(error)))
    }

    pub fn finish(self) -> Vec<Stmt> {
        self.stmts
    }

    pub fn append(self) {
        let BodyBuilder { body, stmts } = self;
        body.stmts.extend(stmts);
    }
}
