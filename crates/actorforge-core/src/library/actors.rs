//! Actor classes written against the framework, plus the port and
//! parameter templates a model description instantiates them with.

use super::framework::{obj, token, ClassDef};
use crate::data::ValueType;
use crate::ir::{
    BinOp, BodyBuilder, Cond, CondOp, Const, Expr, FieldRef, InvokeExpr, IrError, Operand, Scene,
    Type,
};
use crate::model::PortSpec;

/// Ports and default parameters of an instantiable actor class.
#[derive(Debug, Clone)]
pub struct ActorTemplate {
    pub ports: Vec<(&'static str, PortSpec)>,
    pub parameters: Vec<(&'static str, &'static str)>,
}

/// Actor classes a model may instantiate.
pub const ACTOR_CLASSES: &[&str] = &[
    "Const",
    "Ramp",
    "Scale",
    "AddSubtract",
    "Discard",
    "Recorder",
];

pub fn actor_template(class: &str) -> Option<ActorTemplate> {
    let unknown = ValueType::Unknown;
    let trigger = || ("trigger", PortSpec::input(ValueType::Unknown).multiport());
    Some(match class {
        "Const" => ActorTemplate {
            ports: vec![
                ("output", PortSpec::output(unknown).derived_from(&["value"])),
                trigger(),
            ],
            parameters: vec![("value", "1"), ("firingCountLimit", "0")],
        },
        "Ramp" => ActorTemplate {
            ports: vec![
                (
                    "output",
                    PortSpec::output(unknown).derived_from(&["init", "step"]),
                ),
                trigger(),
            ],
            parameters: vec![("init", "0"), ("step", "1"), ("firingCountLimit", "0")],
        },
        "Scale" => ActorTemplate {
            ports: vec![
                ("input", PortSpec::input(unknown.clone())),
                (
                    "output",
                    PortSpec::output(unknown).derived_from(&["factor", "input"]),
                ),
            ],
            parameters: vec![("factor", "1")],
        },
        "AddSubtract" => ActorTemplate {
            ports: vec![
                ("plus", PortSpec::input(unknown.clone()).multiport()),
                ("minus", PortSpec::input(unknown.clone()).multiport()),
                (
                    "output",
                    PortSpec::output(unknown).derived_from(&["plus", "minus"]),
                ),
            ],
            parameters: Vec::new(),
        },
        "Discard" => ActorTemplate {
            ports: vec![("input", PortSpec::input(unknown).multiport())],
            parameters: Vec::new(),
        },
        "Recorder" => ActorTemplate {
            ports: vec![("input", PortSpec::input(unknown))],
            parameters: Vec::new(),
        },
        _ => return None,
    })
}

fn this() -> Operand {
    Operand::local("this")
}

fn port() -> Type {
    obj("TypedIOPort")
}

fn parameter() -> Type {
    obj("Parameter")
}

fn container_args() -> [(&'static str, Type); 2] {
    [
        ("container", obj("CompositeEntity")),
        ("name", obj("String")),
    ]
}

/// `specialinvoke this.<class: method>()`, keeping the result if the method
/// returns one.
fn call_super(b: &mut BodyBuilder<'_>, class: &str, method: &str, ret: Type) -> Option<String> {
    let mut invoke = InvokeExpr::special(this(), class, method, Vec::new());
    invoke.ret = ret.clone();
    if ret == Type::Void {
        b.invoke(invoke);
        None
    } else {
        Some(b.call("$z", invoke))
    }
}

/// `this.field = new TypedIOPort(this, name, input, output)`
fn create_port(b: &mut BodyBuilder<'_>, class: &str, name: &str, input: bool, output: bool) {
    let port = b.new_object(
        "TypedIOPort",
        vec![
            this(),
            Operand::str(name),
            Operand::bool(input),
            Operand::bool(output),
        ],
    );
    b.set_field(this(), FieldRef::new(class, name), Operand::local(port));
}

fn create_parameter(b: &mut BodyBuilder<'_>, class: &str, name: &str, expression: &str) {
    let param = b.new_object("Parameter", vec![this(), Operand::str(name)]);
    b.invoke(InvokeExpr::virtual_call(
        Operand::local(&param),
        "Variable",
        "setExpression",
        vec![Operand::str(expression)],
        Type::Void,
    ));
    b.set_field(this(), FieldRef::new(class, name), Operand::local(param));
}

fn read_field(b: &mut BodyBuilder<'_>, class: &str, name: &str, ty: Type) -> String {
    b.get_field(this(), FieldRef::new(class, name), ty)
}

fn port_call(
    b: &mut BodyBuilder<'_>,
    port: &str,
    method: &str,
    args: Vec<Operand>,
    ret: Type,
) -> Option<String> {
    let invoke = InvokeExpr::virtual_call(Operand::local(port), "IOPort", method, args, ret.clone());
    if ret == Type::Void {
        b.invoke(invoke);
        None
    } else {
        Some(b.call("$p", invoke))
    }
}

fn get_token(b: &mut BodyBuilder<'_>, param: &str) -> String {
    b.call(
        "$t",
        InvokeExpr::virtual_call(
            Operand::local(param),
            "Variable",
            "getToken",
            Vec::new(),
            token(),
        ),
    )
}

fn token_call(b: &mut BodyBuilder<'_>, receiver: &str, method: &str, args: Vec<Operand>) -> String {
    b.call(
        "$t",
        InvokeExpr::virtual_call(Operand::local(receiver), "Token", method, args, token()),
    )
}

/// A loop over every channel of `port`, consuming one token per channel
/// that has one; `body` receives the token local.
///
/// The width is read before the loop header so the loop keeps the shape
/// the unroller recognises.
fn for_each_channel(
    b: &mut BodyBuilder<'_>,
    port: &str,
    mut body: impl FnMut(&mut BodyBuilder<'_>, &str),
) {
    let width = port_call(b, port, "getWidth", Vec::new(), Type::Int).unwrap_or_default();
    let i = b.local("$i", Type::Int);
    b.assign(&i, Expr::constant(Const::Int(0)));
    let head = b.label();
    let next = b.label();
    let end = b.label();
    b.place_label(&head);
    b.if_goto(
        Cond::new(CondOp::Ge, Operand::local(&i), Operand::local(width)),
        &end,
    );
    let has = port_call(
        b,
        port,
        "hasToken",
        vec![Operand::local(&i)],
        Type::Boolean,
    )
    .unwrap_or_default();
    b.if_goto(
        Cond::new(CondOp::Eq, Operand::local(has), Operand::bool(false)),
        &next,
    );
    let value = port_call(b, port, "get", vec![Operand::local(&i)], token()).unwrap_or_default();
    body(b, &value);
    b.place_label(&next);
    b.assign(
        &i,
        Expr::Binary(BinOp::Add, Operand::local(&i), Operand::int(1)),
    );
    b.goto(&head);
    b.place_label(&end);
}

fn install_sources(scene: &mut Scene) -> Result<(), IrError> {
    ClassDef::new("Source", Some("TypedAtomicActor"))
        .field("output", port())?
        .field("trigger", port())?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "TypedAtomicActor",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_port(b, "Source", "output", false, true);
            create_port(b, "Source", "trigger", true, false);
            let trigger = read_field(b, "Source", "trigger", port());
            port_call(b, &trigger, "setMultiport", vec![Operand::bool(true)], Type::Void);
            b.ret(None);
        })?
        .method("fire", &[], Type::Void, |b| {
            call_super(b, "TypedAtomicActor", "fire", Type::Void);
            let trigger = read_field(b, "Source", "trigger", port());
            for_each_channel(b, &trigger, |_, _| {});
            b.ret(None);
        })?
        .install(scene)?;

    ClassDef::new("LimitedFiringSource", Some("Source"))
        .field("firingCountLimit", parameter())?
        .field("_iterationCount", Type::Int)?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "Source",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_parameter(b, "LimitedFiringSource", "firingCountLimit", "0");
            b.ret(None);
        })?
        .method("initialize", &[], Type::Void, |b| {
            call_super(b, "Source", "initialize", Type::Void);
            b.set_field(
                this(),
                FieldRef::new("LimitedFiringSource", "_iterationCount"),
                Operand::int(0),
            );
            b.ret(None);
        })?
        .method("postfire", &[], Type::Boolean, |b| {
            let done = b.label();
            let limit_param = read_field(b, "LimitedFiringSource", "firingCountLimit", parameter());
            let limit_token = get_token(b, &limit_param);
            let limit_int = b.eval(
                "$c",
                obj("IntToken"),
                Expr::Cast(obj("IntToken"), Operand::local(limit_token)),
            );
            let limit = b.call(
                "$n",
                InvokeExpr::virtual_call(
                    Operand::local(limit_int),
                    "Token",
                    "intValue",
                    Vec::new(),
                    Type::Int,
                ),
            );
            b.if_goto(
                Cond::new(CondOp::Le, Operand::local(&limit), Operand::int(0)),
                &done,
            );
            let count = read_field(b, "LimitedFiringSource", "_iterationCount", Type::Int);
            let next = b.eval(
                "$n",
                Type::Int,
                Expr::Binary(BinOp::Add, Operand::local(count), Operand::int(1)),
            );
            b.set_field(
                this(),
                FieldRef::new("LimitedFiringSource", "_iterationCount"),
                Operand::local(&next),
            );
            b.if_goto(
                Cond::new(CondOp::Ne, Operand::local(&next), Operand::local(&limit)),
                &done,
            );
            b.ret(Some(Operand::bool(false)));
            b.place_label(&done);
            let result = call_super(b, "Source", "postfire", Type::Boolean);
            b.ret(result.map(Operand::local));
        })?
        .install(scene)?;

    ClassDef::new("Const", Some("LimitedFiringSource"))
        .field("value", parameter())?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "LimitedFiringSource",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_parameter(b, "Const", "value", "1");
            b.ret(None);
        })?
        .method("fire", &[], Type::Void, |b| {
            call_super(b, "LimitedFiringSource", "fire", Type::Void);
            let value = read_field(b, "Const", "value", parameter());
            let token = get_token(b, &value);
            let output = read_field(b, "Source", "output", port());
            port_call(
                b,
                &output,
                "send",
                vec![Operand::int(0), Operand::local(token)],
                Type::Void,
            );
            b.ret(None);
        })?
        .install(scene)?;

    ClassDef::new("Ramp", Some("LimitedFiringSource"))
        .field("init", parameter())?
        .field("step", parameter())?
        .field("_stateToken", token())?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "LimitedFiringSource",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_parameter(b, "Ramp", "init", "0");
            create_parameter(b, "Ramp", "step", "1");
            b.ret(None);
        })?
        .method("initialize", &[], Type::Void, |b| {
            call_super(b, "LimitedFiringSource", "initialize", Type::Void);
            let init = read_field(b, "Ramp", "init", parameter());
            let token = get_token(b, &init);
            b.set_field(
                this(),
                FieldRef::new("Ramp", "_stateToken"),
                Operand::local(token),
            );
            b.ret(None);
        })?
        .method("fire", &[], Type::Void, |b| {
            call_super(b, "LimitedFiringSource", "fire", Type::Void);
            let state = read_field(b, "Ramp", "_stateToken", token());
            let output = read_field(b, "Source", "output", port());
            port_call(
                b,
                &output,
                "send",
                vec![Operand::int(0), Operand::local(state)],
                Type::Void,
            );
            b.ret(None);
        })?
        .method("postfire", &[], Type::Boolean, |b| {
            // The step is looked up by name rather than through the field.
            let attribute = b.call(
                "$a",
                InvokeExpr::virtual_call(
                    this(),
                    "NamedObj",
                    "getAttribute",
                    vec![Operand::str("step")],
                    obj("Attribute"),
                ),
            );
            let step_param = b.eval(
                "$a",
                parameter(),
                Expr::Cast(parameter(), Operand::local(attribute)),
            );
            let step = get_token(b, &step_param);
            let state = read_field(b, "Ramp", "_stateToken", token());
            let next = token_call(b, &state, "add", vec![Operand::local(step)]);
            b.set_field(
                this(),
                FieldRef::new("Ramp", "_stateToken"),
                Operand::local(next),
            );
            let result = call_super(b, "LimitedFiringSource", "postfire", Type::Boolean);
            b.ret(result.map(Operand::local));
        })?
        .install(scene)
}

fn install_transformers(scene: &mut Scene) -> Result<(), IrError> {
    ClassDef::new("Transformer", Some("TypedAtomicActor"))
        .field("input", port())?
        .field("output", port())?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "TypedAtomicActor",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_port(b, "Transformer", "input", true, false);
            create_port(b, "Transformer", "output", false, true);
            b.ret(None);
        })?
        .install(scene)?;

    ClassDef::new("Scale", Some("Transformer"))
        .field("factor", parameter())?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "Transformer",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_parameter(b, "Scale", "factor", "1");
            b.ret(None);
        })?
        .method("fire", &[], Type::Void, |b| {
            call_super(b, "Transformer", "fire", Type::Void);
            let end = b.label();
            let input = read_field(b, "Transformer", "input", port());
            let has = port_call(b, &input, "hasToken", vec![Operand::int(0)], Type::Boolean)
                .unwrap_or_default();
            b.if_goto(
                Cond::new(CondOp::Eq, Operand::local(has), Operand::bool(false)),
                &end,
            );
            let value = port_call(b, &input, "get", vec![Operand::int(0)], token())
                .unwrap_or_default();
            let factor_param = read_field(b, "Scale", "factor", parameter());
            let factor = get_token(b, &factor_param);
            let scaled = token_call(b, &factor, "multiply", vec![Operand::local(value)]);
            let output = read_field(b, "Transformer", "output", port());
            port_call(
                b,
                &output,
                "send",
                vec![Operand::int(0), Operand::local(scaled)],
                Type::Void,
            );
            b.place_label(&end);
            b.ret(None);
        })?
        .install(scene)?;

    ClassDef::new("AddSubtract", Some("TypedAtomicActor"))
        .field("plus", port())?
        .field("minus", port())?
        .field("output", port())?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "TypedAtomicActor",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_port(b, "AddSubtract", "plus", true, false);
            create_port(b, "AddSubtract", "minus", true, false);
            create_port(b, "AddSubtract", "output", false, true);
            b.ret(None);
        })?
        .method("fire", &[], Type::Void, |b| {
            call_super(b, "TypedAtomicActor", "fire", Type::Void);
            let sum = b.local("$sum", token());
            b.assign(&sum, Expr::constant(Const::Null));
            let plus = read_field(b, "AddSubtract", "plus", port());
            accumulate(b, &plus, &sum, "add", false);
            let minus = read_field(b, "AddSubtract", "minus", port());
            accumulate(b, &minus, &sum, "subtract", true);
            let end = b.label();
            b.if_goto(
                Cond::new(CondOp::Eq, Operand::local(&sum), Operand::null()),
                &end,
            );
            let output = read_field(b, "AddSubtract", "output", port());
            port_call(
                b,
                &output,
                "send",
                vec![Operand::int(0), Operand::local(&sum)],
                Type::Void,
            );
            b.place_label(&end);
            b.ret(None);
        })?
        .install(scene)
}

/// `sum = sum op token` for every available token on `port`, seeding an
/// empty sum with the first token (or its zero when subtracting).
fn accumulate(b: &mut BodyBuilder<'_>, port: &str, sum: &str, op: &str, from_zero: bool) {
    for_each_channel(b, port, |b, value| {
        let combine = b.label();
        let done = b.label();
        b.if_goto(
            Cond::new(CondOp::Ne, Operand::local(sum), Operand::null()),
            &combine,
        );
        if from_zero {
            let zero = token_call(b, value, "zero", Vec::new());
            b.assign(sum, Expr::local(zero));
        } else {
            b.assign(sum, Expr::local(value));
            b.goto(&done);
        }
        b.place_label(&combine);
        let combined = token_call(b, sum, op, vec![Operand::local(value)]);
        b.assign(sum, Expr::local(combined));
        b.place_label(&done);
    });
}

fn install_sinks(scene: &mut Scene) -> Result<(), IrError> {
    ClassDef::new("Sink", Some("TypedAtomicActor"))
        .field("input", port())?
        .method("<init>", &container_args(), Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                this(),
                "TypedAtomicActor",
                "<init>",
                vec![Operand::local("container"), Operand::local("name")],
            ));
            create_port(b, "Sink", "input", true, false);
            let input = read_field(b, "Sink", "input", port());
            port_call(b, &input, "setMultiport", vec![Operand::bool(true)], Type::Void);
            b.ret(None);
        })?
        .install(scene)?;

    ClassDef::new("Discard", Some("Sink"))
        .method("fire", &[], Type::Void, |b| {
            call_super(b, "Sink", "fire", Type::Void);
            let input = read_field(b, "Sink", "input", port());
            for_each_channel(b, &input, |_, _| {});
            b.ret(None);
        })?
        .install(scene)?;

    ClassDef::new("Recorder", Some("Sink"))
        .field("_last", token())?
        .field("_count", Type::Int)?
        .field("_source", obj("String"))?
        .method("initialize", &[], Type::Void, |b| {
            call_super(b, "Sink", "initialize", Type::Void);
            b.set_field(this(), FieldRef::new("Recorder", "_count"), Operand::int(0));
            b.set_field(this(), FieldRef::new("Recorder", "_last"), Operand::null());
            let name = b.call(
                "$s",
                InvokeExpr::virtual_call(
                    this(),
                    "NamedObj",
                    "getFullName",
                    Vec::new(),
                    obj("String"),
                ),
            );
            b.set_field(
                this(),
                FieldRef::new("Recorder", "_source"),
                Operand::local(name),
            );
            b.ret(None);
        })?
        .method("fire", &[], Type::Void, |b| {
            call_super(b, "Sink", "fire", Type::Void);
            let end = b.label();
            let input = read_field(b, "Sink", "input", port());
            let has = port_call(b, &input, "hasToken", vec![Operand::int(0)], Type::Boolean)
                .unwrap_or_default();
            b.if_goto(
                Cond::new(CondOp::Eq, Operand::local(has), Operand::bool(false)),
                &end,
            );
            let value = port_call(b, &input, "get", vec![Operand::int(0)], token())
                .unwrap_or_default();
            b.set_field(
                this(),
                FieldRef::new("Recorder", "_last"),
                Operand::local(value),
            );
            let count = read_field(b, "Recorder", "_count", Type::Int);
            let next = b.eval(
                "$n",
                Type::Int,
                Expr::Binary(BinOp::Add, Operand::local(count), Operand::int(1)),
            );
            b.set_field(
                this(),
                FieldRef::new("Recorder", "_count"),
                Operand::local(next),
            );
            b.place_label(&end);
            b.ret(None);
        })?
        .install(scene)
}

pub(crate) fn install(scene: &mut Scene) -> Result<(), IrError> {
    install_sources(scene)?;
    install_transformers(scene)?;
    install_sinks(scene)
}
