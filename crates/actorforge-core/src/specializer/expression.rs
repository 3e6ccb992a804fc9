//! Compile-time expression evaluation.
//!
//! Guard, action and parameter expressions reach generated code as
//! `parser.evaluate("text")` calls. Each one is parsed once here. A text
//! that depends only on constants is folded to its token; anything else
//! becomes straight-line token arithmetic over the fields that hold the
//! changing values.

use super::fsm::{port_present_field, port_token_field};
use super::{rewrite_bodies, Context, Pass};
use crate::data::Token;
use crate::errors::{Location, Result, SpecializeError};
use crate::expr::{
    eval::builtin_constant, BinaryOp, Expr as ParsedExpr, UnaryOp, PSEUDO_VARIABLES,
};
use crate::ir::{
    Body, BodyBuilder, Cond, CondOp, Const, Expr, InvokeExpr, LocalDefs, Operand, Place, Stmt,
    Type,
};
use crate::library::tokens::{emit_token, token_type};
use crate::model::{AttributeId, ComponentId, PortId};
use tracing::{debug, info};

pub struct ExpressionPass;

impl Pass for ExpressionPass {
    fn name(&self) -> &'static str {
        "expressions"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let mut replaced = 0;
        rewrite_bodies(ctx, |ctx, class, method, body| {
            let n = rewrite_body(ctx, class, method, body)?;
            replaced += n;
            Ok(n > 0)
        })?;
        info!("Compiled {} expressions", replaced);
        Ok(replaced > 0)
    }
}

/// How identifiers in one body are bound.
#[derive(Clone, Copy)]
enum Scope {
    /// The expression of a non-constant attribute, evaluated in its
    /// compute method.
    Attribute(AttributeId),
    /// Guards, actions and anything else evaluated inside a component.
    Component(ComponentId),
}

/// What an identifier stands for.
enum Binding {
    Constant(Token),
    Attribute(AttributeId),
    PortToken(PortId),
    PortPresent(PortId),
}

fn rewrite_body(ctx: &Context<'_>, class: &str, method: &str, body: &mut Body) -> Result<usize> {
    let scope = match (ctx.compute_attribute(class, method), ctx.component_of_class(class)) {
        (Some(attribute), _) => Scope::Attribute(attribute),
        (None, Some(component)) => Scope::Component(component),
        (None, None) => return Ok(0),
    };
    let sites: Vec<(usize, String, String)> = {
        let defs = LocalDefs::compute(body)?;
        let mut sites = Vec::new();
        for (i, stmt) in body.stmts.iter().enumerate() {
            let Stmt::Assign(Place::Local(def), Expr::Invoke(invoke)) = stmt else {
                continue;
            };
            if invoke.class != "PtParser" || invoke.method != "evaluate" {
                continue;
            }
            let text = match invoke.args.first().and_then(|a| defs.constant_at(a, i, body)) {
                Some(Const::Str(text)) => text,
                _ => {
                    return Err(SpecializeError::unsupported(
                        Location::method(class, method).at(i),
                        "expression text is not a compile-time constant",
                    ))
                }
            };
            sites.push((i, def.clone(), text));
        }
        sites
    };

    let component = match scope {
        Scope::Attribute(attribute) => ctx.model.attribute_component(attribute),
        Scope::Component(component) => component,
    };
    for (index, def, text) in sites.iter().rev() {
        let parsed = ctx.parser.parse(text)?;
        let mut b = BodyBuilder::new(body);
        let mut compiler = Compiler {
            ctx,
            scope,
            component,
            class,
        };
        let value = compiler.compile(&mut b, &parsed).map_err(|e| {
            e.located(Location::method(class, method).at(*index))
        })?;
        b.assign(def, Expr::local(value));
        let stmts = b.finish();
        debug!("{}.{}: `{}` compiled to {} statements", class, method, text, stmts.len());
        body.splice(*index, stmts);
    }
    Ok(sites.len())
}

struct Compiler<'a, 'm> {
    ctx: &'a Context<'m>,
    scope: Scope,
    component: ComponentId,
    class: &'a str,
}

impl Compiler<'_, '_> {
    fn bind(&self, name: &str) -> Result<Binding> {
        let model = self.ctx.model;
        if let Some(token) = builtin_constant(name) {
            return Ok(Binding::Constant(token));
        }
        if PSEUDO_VARIABLES.contains(&name) {
            return Err(SpecializeError::unsupported(
                Location::none(),
                format!("`{}` is only known while the model runs", name),
            ));
        }
        if let (Scope::Component(component), Some(_)) = (self.scope, model.fsm(self.component)) {
            if let Some(port) = input_port(self.ctx, component, name) {
                return Ok(Binding::PortToken(port));
            }
            if let Some(port) = name
                .strip_suffix("_isPresent")
                .and_then(|p| input_port(self.ctx, component, p))
            {
                return Ok(Binding::PortPresent(port));
            }
        }
        let attribute = match self.scope {
            Scope::Attribute(attribute) => model.lookup_in_scope(attribute, name),
            Scope::Component(component) => model.resolve_identifier(component, name),
        }
        .ok_or_else(|| {
            SpecializeError::unresolvable(Location::none(), format!("unknown identifier `{}`", name))
        })?;
        if self.ctx.constants.is_constant(attribute) {
            if let Some(value) = &model.attribute(attribute).value {
                return Ok(Binding::Constant(value.clone()));
            }
        }
        Ok(Binding::Attribute(attribute))
    }

    /// The whole expression as a token, if every identifier is constant.
    fn fold(&self, expr: &ParsedExpr) -> Result<Option<Token>> {
        for name in self.ctx.parser.free_variables(expr) {
            if !matches!(self.bind(&name)?, Binding::Constant(_)) {
                return Ok(None);
            }
        }
        let lookup = |name: &str| match self.bind(name) {
            Ok(Binding::Constant(token)) => Some(token),
            _ => None,
        };
        Ok(Some(self.ctx.parser.evaluate(expr, &lookup)?))
    }

    /// Emit code computing `expr`; returns the local holding the token.
    fn compile(&mut self, b: &mut BodyBuilder<'_>, expr: &ParsedExpr) -> Result<String> {
        if let Some(token) = self.fold(expr)? {
            return Ok(emit_token(b, &token));
        }
        match expr {
            ParsedExpr::Literal(token) => Ok(emit_token(b, token)),
            ParsedExpr::Identifier(name) => self.identifier(b, name),
            ParsedExpr::Unary(op, operand) => {
                let value = self.compile(b, operand)?;
                let method = match op {
                    UnaryOp::Negate => "negate",
                    UnaryOp::Not => "not",
                };
                Ok(token_call(b, &value, method, Vec::new(), token_type()))
            }
            ParsedExpr::Binary(BinaryOp::And, left, right) => self.short_circuit(b, left, right, false),
            ParsedExpr::Binary(BinaryOp::Or, left, right) => self.short_circuit(b, left, right, true),
            ParsedExpr::Binary(op, left, right) => {
                let left = self.compile(b, left)?;
                let right = self.compile(b, right)?;
                Ok(binary(b, *op, &left, &right))
            }
            ParsedExpr::Conditional(condition, then, otherwise) => {
                let condition = self.compile(b, condition)?;
                let flag = boolean_value(b, &condition);
                let result = b.local("$t", token_type());
                let other = b.label();
                let end = b.label();
                b.if_goto(
                    Cond::new(CondOp::Eq, Operand::local(flag), Operand::bool(false)),
                    &other,
                );
                let value = self.compile(b, then)?;
                b.assign(&result, Expr::local(value));
                b.goto(&end);
                b.place_label(&other);
                let value = self.compile(b, otherwise)?;
                b.assign(&result, Expr::local(value));
                b.place_label(&end);
                Ok(result)
            }
            ParsedExpr::Array(elements) => {
                let length = i32::try_from(elements.len()).map_err(|_| {
                    SpecializeError::unsupported(Location::none(), "array literal too long")
                })?;
                let array = b.eval(
                    "$a",
                    Type::array_of(token_type()),
                    Expr::NewArray(token_type(), Operand::int(length)),
                );
                for (i, element) in elements.iter().enumerate() {
                    let value = self.compile(b, element)?;
                    b.push(Stmt::Assign(
                        Place::ArrayElem(Operand::local(&array), Operand::int(i as i32)),
                        Expr::local(value),
                    ));
                }
                Ok(b.new_object("ArrayToken", vec![Operand::local(array)]))
            }
        }
    }

    fn identifier(&self, b: &mut BodyBuilder<'_>, name: &str) -> Result<String> {
        let this = Operand::local("this");
        match self.bind(name)? {
            Binding::Constant(token) => Ok(emit_token(b, &token)),
            Binding::PortToken(port) => {
                let field = port_token_field(self.class, &self.ctx.model.port(port).name);
                Ok(b.get_field(this, field, token_type()))
            }
            Binding::PortPresent(port) => {
                let field = port_present_field(self.class, &self.ctx.model.port(port).name);
                let present = b.get_field(this, field, Type::Boolean);
                Ok(b.new_object("BooleanToken", vec![Operand::local(present)]))
            }
            Binding::Attribute(attribute) => self.attribute_value(b, attribute),
        }
    }

    /// Current token of a non-constant attribute, from its cached field or
    /// by recomputing it.
    fn attribute_value(&self, b: &mut BodyBuilder<'_>, attribute: AttributeId) -> Result<String> {
        let ctx = self.ctx;
        let owner = ctx.model.attribute_component(attribute);
        if let Some(field) = ctx.token_field(attribute).cloned() {
            let base = ctx.emit_component_ref(b, Some(self.component), owner)?;
            return Ok(b.get_field(base, field, token_type()));
        }
        if let Some((class, method)) = ctx.compute_method(attribute) {
            let base = ctx.emit_component_ref(b, Some(self.component), owner)?;
            return Ok(b.call(
                "$t",
                InvokeExpr::virtual_call(base, class, method, Vec::new(), token_type()),
            ));
        }
        Err(SpecializeError::unresolvable(
            Location::component(ctx.model.attribute_full_name(attribute)),
            "attribute changes at run time but has no token field or compute method",
        ))
    }

    /// `a && b` and `a || b`; the right operand only runs when it decides
    /// the result.
    fn short_circuit(
        &mut self,
        b: &mut BodyBuilder<'_>,
        left: &ParsedExpr,
        right: &ParsedExpr,
        is_or: bool,
    ) -> Result<String> {
        let left = self.compile(b, left)?;
        let left_flag = boolean_value(b, &left);
        let flag = b.local("$z", Type::Boolean);
        let decided = b.label();
        let end = b.label();
        b.if_goto(
            Cond::new(CondOp::Eq, Operand::local(left_flag), Operand::bool(is_or)),
            &decided,
        );
        let right = self.compile(b, right)?;
        let right_flag = boolean_value(b, &right);
        b.assign(&flag, Expr::local(right_flag));
        b.goto(&end);
        b.place_label(&decided);
        b.assign(&flag, Expr::constant(Const::Bool(is_or)));
        b.place_label(&end);
        Ok(b.new_object("BooleanToken", vec![Operand::local(flag)]))
    }
}

fn input_port(ctx: &Context<'_>, component: ComponentId, name: &str) -> Option<PortId> {
    ctx.model
        .port_by_name(component, name)
        .filter(|p| ctx.model.port(*p).input)
}

fn token_call(
    b: &mut BodyBuilder<'_>,
    receiver: &str,
    method: &str,
    args: Vec<Operand>,
    ret: Type,
) -> String {
    b.call(
        "$t",
        InvokeExpr::virtual_call(Operand::local(receiver), "Token", method, args, ret),
    )
}

fn boolean_value(b: &mut BodyBuilder<'_>, token: &str) -> String {
    b.call(
        "$z",
        InvokeExpr::virtual_call(
            Operand::local(token),
            "Token",
            "booleanValue",
            Vec::new(),
            Type::Boolean,
        ),
    )
}

fn binary(b: &mut BodyBuilder<'_>, op: BinaryOp, left: &str, right: &str) -> String {
    let boolean = Type::object("BooleanToken");
    let arg = vec![Operand::local(right)];
    let (method, negate) = match op {
        BinaryOp::Add => ("add", false),
        BinaryOp::Subtract => ("subtract", false),
        BinaryOp::Multiply => ("multiply", false),
        BinaryOp::Divide => ("divide", false),
        BinaryOp::Modulo => ("modulo", false),
        BinaryOp::Equal => ("isEqualTo", false),
        BinaryOp::NotEqual => ("isEqualTo", true),
        BinaryOp::Less => ("isLessThan", false),
        BinaryOp::Greater => ("isGreaterThan", false),
        BinaryOp::LessEqual => ("isGreaterThan", true),
        BinaryOp::GreaterEqual => ("isLessThan", true),
        BinaryOp::And => ("and", false),
        BinaryOp::Or => ("or", false),
    };
    let ret = if method.starts_with("is") {
        boolean
    } else {
        token_type()
    };
    let result = token_call(b, left, method, arg, ret);
    if negate {
        token_call(b, &result, "not", Vec::new(), token_type())
    } else {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specializer::test_support::{context_for, model_from_yaml};
    use crate::specializer::{AttributeSlotPass, ComponentSlotPass, CompositePass, InstanceClassPass};
    use indoc::indoc;

    fn fsm_model(guard: &str, commit: &str) -> crate::model::Model {
        model_from_yaml(&format!(
            indoc! {"
                name: top
                parameters: {{ gain: '1', limit: '4' }}
                entities:
                  - {{ kind: atomic, name: source, class: Const }}
                  - kind: fsm
                    name: control
                    ports:
                      - {{ name: in, direction: input, type: int }}
                    initialState: a
                    states:
                      - {{ name: a }}
                      - {{ name: b }}
                    transitions:
                      - {{ from: a, to: b, guard: '{}', commit: [{{ destination: gain, expression: '{}' }}] }}
                connections:
                  - {{ from: source.output, to: control.in, bufferSize: 1 }}
            "},
            guard, commit
        ))
    }

    fn prepared(model: &crate::model::Model) -> Context<'_> {
        let mut ctx = context_for(model);
        InstanceClassPass.run(&mut ctx).unwrap();
        CompositePass.run(&mut ctx).unwrap();
        AttributeSlotPass.run(&mut ctx).unwrap();
        ComponentSlotPass.run(&mut ctx).unwrap();
        ctx
    }

    fn stmts<'a>(ctx: &'a Context<'_>, method: &str) -> &'a [Stmt] {
        &ctx.scene
            .method("generated.top_control", method)
            .and_then(|m| m.body.as_ref())
            .unwrap()
            .stmts
    }

    fn called(stmts: &[Stmt]) -> Vec<&str> {
        stmts
            .iter()
            .filter_map(Stmt::invoke)
            .map(|i| i.method.as_str())
            .collect()
    }

    #[test]
    fn test_port_identifiers_read_input_fields() {
        let model = fsm_model("in_isPresent && in > limit", "gain");
        let mut ctx = prepared(&model);
        assert!(ExpressionPass.run(&mut ctx).unwrap());
        let fire = stmts(&ctx, "fire");
        let calls = called(fire);
        assert!(!calls.contains(&"evaluate"));
        assert!(calls.contains(&"isGreaterThan"));
        let fields: Vec<&str> = fire
            .iter()
            .filter_map(|s| match s {
                Stmt::Assign(_, Expr::InstanceField(_, f)) => Some(f.name.as_str()),
                _ => None,
            })
            .collect();
        assert!(fields.contains(&"inIsPresent"));
        assert!(fields.contains(&"inToken"));
        // The constant `limit` is inlined, not read.
        assert!(!fields.contains(&"limit"));
        assert!(fire
            .iter()
            .any(|s| matches!(s, Stmt::Assign(_, Expr::New(c)) if c == "IntToken")));
    }

    #[test]
    fn test_changing_parameter_reads_its_token_field() {
        let model = fsm_model("true", "gain + 1");
        let mut ctx = prepared(&model);
        ExpressionPass.run(&mut ctx).unwrap();
        let postfire = stmts(&ctx, "postfire");
        assert!(called(postfire).contains(&"add"));
        assert!(postfire.iter().any(|s| matches!(
            s,
            Stmt::Assign(_, Expr::InstanceField(_, f))
                if f.class == "generated.top" && f.name == "_CGtoken_gain"
        )));
    }

    #[test]
    fn test_constant_guard_folds_to_token() {
        let model = fsm_model("limit * 2 > 7", "gain");
        let mut ctx = prepared(&model);
        ExpressionPass.run(&mut ctx).unwrap();
        let fire = stmts(&ctx, "fire");
        let calls = called(fire);
        assert!(!calls.contains(&"isGreaterThan"));
        assert!(!calls.contains(&"multiply"));
        assert!(fire.iter().any(|s| matches!(
            s,
            Stmt::Invoke(i) if i.class == "BooleanToken"
                && i.args == vec![Operand::Const(Const::Bool(true))]
        )));
    }

    #[test]
    fn test_time_is_rejected() {
        let model = fsm_model("time > 1", "gain");
        let mut ctx = prepared(&model);
        let err = ExpressionPass.run(&mut ctx).unwrap_err();
        assert!(matches!(err, SpecializeError::Unsupported { .. }));
    }

    #[test]
    fn test_unknown_identifier_is_unresolvable() {
        let model = fsm_model("nothing > 1", "gain");
        let mut ctx = prepared(&model);
        let err = ExpressionPass.run(&mut ctx).unwrap_err();
        assert!(matches!(err, SpecializeError::Unresolvable { .. }));
    }
}
