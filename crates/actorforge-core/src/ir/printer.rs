//! Jimple-like textual rendering of classes.

use super::scene::{Body, Class, Method, Scene};
use super::types::{BinOp, Expr, InvokeExpr, InvokeKind, Place, Stmt, UnOp};

pub struct Printer {
    output: String,
    indent_level: usize,
    indent_str: String,
}

impl Default for Printer {
    fn default() -> Self {
        Printer {
            output: String::new(),
            indent_level: 0,
            indent_str: "    ".to_string(),
        }
    }
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&mut self, s: &str) {
        self.output.push_str(s);
    }

    fn writeln(&mut self, s: &str) {
        self.write_indent();
        self.output.push_str(s);
        self.output.push('\n');
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent_level {
            let indent = self.indent_str.clone();
            self.write(&indent);
        }
    }

    /// Render every application class of the scene.
    pub fn print_scene(mut self, scene: &Scene) -> String {
        let mut first = true;
        for class in scene.classes().filter(|c| c.is_application()) {
            if !first {
                self.output.push('\n');
            }
            first = false;
            self.print_class(class);
        }
        self.output
    }

    pub fn class_to_string(mut self, class: &Class) -> String {
        self.print_class(class);
        self.output
    }

    fn print_class(&mut self, class: &Class) {
        let mut header = format!("class {}", class.name);
        if let Some(superclass) = &class.superclass {
            header.push_str(&format!(" extends {}", superclass));
        }
        if !class.interfaces.is_empty() {
            header.push_str(&format!(" implements {}", class.interfaces.join(", ")));
        }
        self.writeln(&format!("{} {{", header));
        self.indent();
        for field in class.fields.values() {
            let modifier = if field.is_static { "static " } else { "" };
            self.writeln(&format!("{}{} {};", modifier, field.ty, field.name));
        }
        for method in class.methods.values() {
            self.output.push('\n');
            self.print_method(method);
        }
        self.dedent();
        self.writeln("}");
    }

    fn print_method(&mut self, method: &Method) {
        let params: Vec<String> = method
            .params
            .iter()
            .map(|(name, ty)| format!("{} {}", ty, name))
            .collect();
        let modifier = if method.is_static { "static " } else { "" };
        let signature = format!(
            "{}{} {}({})",
            modifier,
            method.ret,
            method.name,
            params.join(", ")
        );
        match &method.body {
            None => self.writeln(&format!("native {};", signature)),
            Some(body) => {
                self.writeln(&format!("{} {{", signature));
                self.indent();
                self.print_body(body);
                self.dedent();
                self.writeln("}");
            }
        }
    }

    fn print_body(&mut self, body: &Body) {
        for (name, ty) in &body.locals {
            self.writeln(&format!("{} {};", ty, name));
        }
        if !body.locals.is_empty() && !body.stmts.is_empty() {
            self.output.push('\n');
        }
        for stmt in &body.stmts {
            match stmt {
                Stmt::Label(label) => {
                    self.dedent();
                    self.writeln(&format!("{}:", label));
                    self.indent();
                }
                other => self.writeln(&format!("{};", stmt_to_string(other))),
            }
        }
    }
}

pub fn stmt_to_string(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Assign(place, expr) => format!("{} = {}", place_to_string(place), expr_to_string(expr)),
        Stmt::Invoke(invoke) => invoke_to_string(invoke),
        Stmt::If(cond, target) => format!(
            "if {} {} {} goto {}",
            cond.lhs,
            cond.op.symbol(),
            cond.rhs,
            target
        ),
        Stmt::Goto(target) => format!("goto {}", target),
        Stmt::Switch {
            key,
            cases,
            default,
        } => {
            let arms: Vec<String> = cases
                .iter()
                .map(|(value, label)| format!("case {}: goto {}", value, label))
                .collect();
            format!(
                "tableswitch({}) {{ {}; default: goto {} }}",
                key,
                arms.join("; "),
                default
            )
        }
        Stmt::Label(label) => format!("{}:", label),
        Stmt::Return(None) => "return".to_string(),
        Stmt::Return(Some(value)) => format!("return {}", value),
        Stmt::Throw(value) => format!("throw {}", value),
        Stmt::Nop => "nop".to_string(),
    }
}

fn place_to_string(place: &Place) -> String {
    match place {
        Place::Local(name) => name.clone(),
        Place::InstanceField(base, field) => format!("{}.{}", base, field),
        Place::StaticField(field) => field.to_string(),
        Place::ArrayElem(array, index) => format!("{}[{}]", array, index),
    }
}

pub fn expr_to_string(expr: &Expr) -> String {
    match expr {
        Expr::Use(operand) => operand.to_string(),
        Expr::Binary(BinOp::Cmp(op), a, b) => format!("{} {} {}", a, op.symbol(), b),
        Expr::Binary(op, a, b) => format!("{} {} {}", a, op.symbol(), b),
        Expr::Unary(UnOp::Neg, a) => format!("neg {}", a),
        Expr::Unary(UnOp::Not, a) => format!("!{}", a),
        Expr::Cast(ty, a) => format!("({}) {}", ty, a),
        Expr::InstanceOf(a, ty) => format!("{} instanceof {}", a, ty),
        Expr::New(class) => format!("new {}", class),
        Expr::NewArray(ty, size) => format!("newarray ({})[{}]", ty, size),
        Expr::Length(a) => format!("lengthof {}", a),
        Expr::InstanceField(base, field) => format!("{}.{}", base, field),
        Expr::StaticField(field) => field.to_string(),
        Expr::ArrayRead(array, index) => format!("{}[{}]", array, index),
        Expr::Invoke(invoke) => invoke_to_string(invoke),
    }
}

fn invoke_to_string(invoke: &InvokeExpr) -> String {
    let kind = match invoke.kind {
        InvokeKind::Virtual => "virtualinvoke",
        InvokeKind::Special => "specialinvoke",
        InvokeKind::Static => "staticinvoke",
        InvokeKind::Interface => "interfaceinvoke",
    };
    let args: Vec<String> = invoke.args.iter().map(|a| a.to_string()).collect();
    let target = format!("<{}: {} {}>", invoke.class, invoke.ret, invoke.method);
    match &invoke.base {
        Some(base) => format!("{} {}.{}({})", kind, base, target, args.join(", ")),
        None => format!("{} {}({})", kind, target, args.join(", ")),
    }
}
