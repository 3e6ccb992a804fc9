//! Classes for state-machine components.
//!
//! The generated class reads its inputs into fields at the start of
//! `fire`, dispatches on the current state, runs the refinement of that
//! state and evaluates the outgoing guards. At most one guard may hold.
//! Choice actions run in `fire`; commit actions and the state change run
//! in `postfire`.

use super::constants::action_target;
use super::instance_class::{container_params, emit_member_init, layout_members};
use super::Context;
use crate::errors::{Result, SpecializeError};
use crate::ir::{
    BodyBuilder, Class, ClassKind, Cond, CondOp, Const, Expr, Field, FieldRef, InvokeExpr, Method,
    Operand, Stmt, Type,
};
use crate::library::tokens::token_type;
use crate::model::{naming, ActionSpec, AttributeOwner, ComponentId, FsmSpec, PortId};
use tracing::debug;

const CURRENT_STATE: &str = "_currentState";
const NEXT_TRANSITION: &str = "_nextTransition";
const NEXT_STATE: &str = "_nextState";

/// Field holding the last token read from input `port`.
pub fn port_token_field(class: &str, port: &str) -> FieldRef {
    FieldRef::new(class, format!("{}Token", naming::sanitize(port)))
}

/// Field recording whether input `port` had a token this firing.
pub fn port_present_field(class: &str, port: &str) -> FieldRef {
    FieldRef::new(class, format!("{}IsPresent", naming::sanitize(port)))
}

pub(crate) fn build_fsm_class(ctx: &mut Context<'_>, id: ComponentId) -> Result<()> {
    let model = ctx.model;
    let spec = model
        .fsm(id)
        .ok_or_else(|| SpecializeError::invariant(ctx.location(id), "not a state machine"))?;
    if spec.states.is_empty() {
        return Err(SpecializeError::unsupported(
            ctx.location(id),
            "state machine has no states",
        ));
    }
    let name = ctx.class_of(id).to_string();
    let mut class = Class::new(&name, Some("TypedAtomicActor"), ClassKind::Application);
    class.add_field(Field::new(CURRENT_STATE, Type::Int))?;
    class.add_field(Field::new(NEXT_TRANSITION, Type::Int))?;
    class.add_field(Field::new(NEXT_STATE, Type::Int))?;
    for port_id in &model.component(id).ports {
        let port = model.port(*port_id);
        if !port.input {
            continue;
        }
        let mut token = Field::new(port_token_field(&name, &port.name).name, token_type());
        token.set_type_tag(port.value_type.clone())?;
        class.add_field(token)?;
        class.add_field(Field::new(
            port_present_field(&name, &port.name).name,
            Type::Boolean,
        ))?;
    }
    layout_members(ctx, id, &mut class)?;

    let mut init = Method::new("<init>", container_params(), Type::Void, false, &name);
    if let Some(body) = init.body.as_mut() {
        let mut b = BodyBuilder::new(body);
        b.invoke(InvokeExpr::special(
            Operand::local("this"),
            "TypedAtomicActor",
            "<init>",
            vec![Operand::local("container"), Operand::local("name")],
        ));
        emit_member_init(ctx, &mut b, id)?;
        b.ret(None);
        b.append();
    }
    class.add_method(init)?;

    let writer = FsmWriter {
        ctx: &*ctx,
        id,
        spec,
        class: &name,
    };
    class.add_method(writer.initialize()?)?;
    class.add_method(writer.fire()?)?;
    class.add_method(writer.postfire()?)?;
    debug!(
        "{}: {} states, {} transitions",
        name,
        spec.states.len(),
        spec.transitions.len()
    );
    ctx.scene.add_class(class)?;
    Ok(())
}

struct FsmWriter<'a, 'm> {
    ctx: &'a Context<'m>,
    id: ComponentId,
    spec: &'a FsmSpec,
    class: &'a str,
}

fn this() -> Operand {
    Operand::local("this")
}

impl FsmWriter<'_, '_> {
    /// A state or transition number as an int constant.
    fn index(&self, i: usize) -> Result<Operand> {
        i32::try_from(i).map(Operand::int).map_err(|_| {
            SpecializeError::unsupported(
                self.ctx.location(self.id),
                format!("state machine index {} out of range", i),
            )
        })
    }

    fn field(&self, name: &str) -> FieldRef {
        FieldRef::new(self.class, name)
    }

    fn method(&self, name: &str, ret: Type) -> Method {
        Method::new(name, Vec::new(), ret, false, self.class)
    }

    fn initialize(&self) -> Result<Method> {
        let mut method = self.method("initialize", Type::Void);
        if let Some(body) = method.body.as_mut() {
            let mut b = BodyBuilder::new(body);
            b.set_field(this(), self.field(CURRENT_STATE), self.index(self.spec.initial_state)?);
            b.set_field(this(), self.field(NEXT_TRANSITION), Operand::int(-1));
            b.ret(None);
            b.append();
        }
        Ok(method)
    }

    fn fire(&self) -> Result<Method> {
        let model = self.ctx.model;
        let mut method = self.method("fire", Type::Void);
        let Some(body) = method.body.as_mut() else {
            return Ok(method);
        };
        let mut b = BodyBuilder::new(body);
        b.set_field(this(), self.field(NEXT_TRANSITION), Operand::int(-1));

        for port_id in &model.component(self.id).ports {
            let port = model.port(*port_id);
            if !port.input || model.port_width(*port_id) == 0 {
                continue;
            }
            let port_field = self.port_field(*port_id)?;
            let object = b.get_field(this(), port_field, Type::object("TypedIOPort"));
            let present = b.call(
                "$h",
                port_call(&object, "hasToken", vec![Operand::int(0)], Type::Boolean),
            );
            b.set_field(
                this(),
                port_present_field(self.class, &port.name),
                Operand::local(&present),
            );
            let skip = b.label();
            b.if_goto(
                Cond::new(CondOp::Eq, Operand::local(&present), Operand::bool(false)),
                &skip,
            );
            let token = b.call("$t", port_call(&object, "get", vec![Operand::int(0)], token_type()));
            b.set_field(
                this(),
                port_token_field(self.class, &port.name),
                Operand::local(token),
            );
            b.place_label(&skip);
        }

        let state = b.get_field(this(), self.field(CURRENT_STATE), Type::Int);
        let labels: Vec<String> = self.spec.states.iter().map(|_| b.label()).collect();
        let invalid = b.label();
        let ambiguous = b.label();
        let end = b.label();
        b.push(Stmt::Switch {
            key: Operand::local(state),
            cases: labels
                .iter()
                .enumerate()
                .map(|(i, l)| (i as i64, l.clone()))
                .collect(),
            default: invalid.clone(),
        });
        b.place_label(&invalid);
        b.throw_error("state error");

        for (state_index, state) in self.spec.states.iter().enumerate() {
            b.place_label(&labels[state_index]);
            if let Some(refinement) = state.refinement {
                let actor = self.refinement_ref(&mut b, refinement);
                let skip = b.label();
                let ready = b.call(
                    "$r",
                    actor_call(&actor.0, &actor.1, "prefire", Type::Boolean),
                );
                b.if_goto(
                    Cond::new(CondOp::Eq, Operand::local(ready), Operand::bool(false)),
                    &skip,
                );
                b.invoke(actor_call(&actor.0, &actor.1, "fire", Type::Void));
                b.invoke(actor_call(&actor.0, &actor.1, "postfire", Type::Boolean));
                b.place_label(&skip);
            }
            let taken = b.local("$taken", Type::Boolean);
            b.assign(&taken, Expr::constant(Const::Bool(false)));
            for (transition_index, transition) in self.spec.outgoing(state_index) {
                let next = b.label();
                let enabled = self.evaluate_guard(&mut b, &transition.guard);
                b.if_goto(
                    Cond::new(CondOp::Eq, Operand::local(enabled), Operand::bool(false)),
                    &next,
                );
                b.if_goto(
                    Cond::new(CondOp::Ne, Operand::local(&taken), Operand::bool(false)),
                    &ambiguous,
                );
                b.assign(&taken, Expr::constant(Const::Bool(true)));
                b.set_field(this(), self.field(NEXT_TRANSITION), self.index(transition_index)?);
                b.set_field(this(), self.field(NEXT_STATE), self.index(transition.destination)?);
                for action in &transition.choice_actions {
                    self.emit_action(&mut b, action)?;
                }
                b.place_label(&next);
            }
            b.goto(&end);
        }
        b.place_label(&ambiguous);
        b.throw_error("more than one enabled transition");
        b.place_label(&end);
        b.ret(None);
        b.append();
        Ok(method)
    }

    fn postfire(&self) -> Result<Method> {
        let mut method = self.method("postfire", Type::Boolean);
        let Some(body) = method.body.as_mut() else {
            return Ok(method);
        };
        let mut b = BodyBuilder::new(body);
        let chosen = b.get_field(this(), self.field(NEXT_TRANSITION), Type::Int);
        let labels: Vec<String> = self.spec.transitions.iter().map(|_| b.label()).collect();
        let done = b.label();
        b.push(Stmt::Switch {
            key: Operand::local(chosen),
            cases: labels
                .iter()
                .enumerate()
                .map(|(i, l)| (i as i64, l.clone()))
                .collect(),
            default: done.clone(),
        });
        for (transition_index, transition) in self.spec.transitions.iter().enumerate() {
            b.place_label(&labels[transition_index]);
            for action in &transition.commit_actions {
                self.emit_action(&mut b, action)?;
            }
            b.set_field(this(), self.field(CURRENT_STATE), self.index(transition.destination)?);
            let destination = &self.spec.states[transition.destination];
            if let (true, Some(refinement)) = (transition.reset, destination.refinement) {
                let actor = self.refinement_ref(&mut b, refinement);
                b.invoke(actor_call(&actor.0, &actor.1, "initialize", Type::Void));
            }
            b.goto(&done);
        }
        b.place_label(&done);
        b.ret(Some(Operand::bool(true)));
        b.append();
        Ok(method)
    }

    fn port_field(&self, port: PortId) -> Result<FieldRef> {
        self.ctx.port_field(port).cloned().ok_or_else(|| {
            SpecializeError::invariant(
                self.ctx.location(self.id),
                format!("no field for port {}", self.ctx.model.port(port).name),
            )
        })
    }

    /// `(local, class)` of a sibling refinement, reached by name through
    /// the container.
    fn refinement_ref(&self, b: &mut BodyBuilder<'_>, refinement: ComponentId) -> (String, String) {
        let model = self.ctx.model;
        let container = container_of(b, &this());
        let entity = b.call(
            "$e",
            InvokeExpr::virtual_call(
                Operand::local(container),
                "CompositeEntity",
                "getEntity",
                vec![Operand::str(model.component(refinement).name.clone())],
                Type::object("ComponentEntity"),
            ),
        );
        let class = if model.is_composite(refinement) {
            "TypedCompositeActor"
        } else {
            "TypedAtomicActor"
        };
        let actor = b.eval(
            "$a",
            Type::object(class),
            Expr::Cast(Type::object(class), Operand::local(entity)),
        );
        (actor, class.to_string())
    }

    fn evaluate_guard(&self, b: &mut BodyBuilder<'_>, guard: &str) -> String {
        let text = if guard.trim().is_empty() { "true" } else { guard };
        let value = evaluate(b, text);
        b.call(
            "$g",
            InvokeExpr::virtual_call(
                Operand::local(value),
                "Token",
                "booleanValue",
                Vec::new(),
                Type::Boolean,
            ),
        )
    }

    fn emit_action(&self, b: &mut BodyBuilder<'_>, action: &ActionSpec) -> Result<()> {
        let model = self.ctx.model;
        let value = evaluate(b, &action.expression);
        if let Some(port) = model.port_by_name(self.id, &action.destination) {
            if model.port(port).output {
                let object = b.get_field(this(), self.port_field(port)?, Type::object("TypedIOPort"));
                b.invoke(port_call(
                    &object,
                    "send",
                    vec![Operand::int(0), Operand::local(value)],
                    Type::Void,
                ));
                return Ok(());
            }
        }
        let target = action_target(model, self.id, &action.destination).ok_or_else(|| {
            SpecializeError::unresolvable(
                self.ctx.location(self.id),
                format!("action destination `{}` not found", action.destination),
            )
        })?;

        // Attribute path from the owning component down to the target.
        let mut path = vec![target];
        let owner = loop {
            let last = path[path.len() - 1];
            match model.attribute(last).owner {
                AttributeOwner::Attribute(parent) => path.push(parent),
                AttributeOwner::Component(component) => break component,
                AttributeOwner::Relation(_) => {
                    return Err(SpecializeError::unsupported(
                        self.ctx.location(self.id),
                        format!("action writes relation parameter `{}`", action.destination),
                    ))
                }
            }
        };
        path.reverse();

        let mut receiver = self.component_ref(b, owner)?;
        for attribute in path {
            receiver = b.call(
                "$p",
                InvokeExpr::virtual_call(
                    Operand::local(receiver),
                    "NamedObj",
                    "getAttribute",
                    vec![Operand::str(model.attribute(attribute).name.clone())],
                    Type::object("Attribute"),
                ),
            );
        }
        let parameter = b.eval(
            "$p",
            Type::object("Parameter"),
            Expr::Cast(Type::object("Parameter"), Operand::local(receiver)),
        );
        b.invoke(InvokeExpr::virtual_call(
            Operand::local(parameter),
            "Variable",
            "setToken",
            vec![Operand::local(value)],
            Type::Void,
        ));
        Ok(())
    }

    /// Walk from this state machine to `target` with `getContainer` and
    /// `getEntity` calls.
    fn component_ref(&self, b: &mut BodyBuilder<'_>, target: ComponentId) -> Result<String> {
        let model = self.ctx.model;
        let mut ancestors = vec![self.id];
        while let Some(parent) = model.component(ancestors[ancestors.len() - 1]).parent {
            ancestors.push(parent);
        }
        let mut down = Vec::new();
        let mut current = target;
        let climb = loop {
            if let Some(steps) = ancestors.iter().position(|a| *a == current) {
                break steps;
            }
            down.push(current);
            current = model.component(current).parent.ok_or_else(|| {
                SpecializeError::invariant(self.ctx.location(target), "component outside the model")
            })?;
        };

        let mut local = b.eval("$o", Type::object(self.class), Expr::Use(this()));
        for _ in 0..climb {
            local = container_of(b, &Operand::local(local));
        }
        for component in down.into_iter().rev() {
            let composite = b.eval(
                "$o",
                Type::object("CompositeEntity"),
                Expr::Cast(Type::object("CompositeEntity"), Operand::local(local)),
            );
            local = b.call(
                "$o",
                InvokeExpr::virtual_call(
                    Operand::local(composite),
                    "CompositeEntity",
                    "getEntity",
                    vec![Operand::str(model.component(component).name.clone())],
                    Type::object("ComponentEntity"),
                ),
            );
        }
        Ok(local)
    }
}

fn port_call(port: &str, method: &str, args: Vec<Operand>, ret: Type) -> InvokeExpr {
    InvokeExpr::virtual_call(Operand::local(port), "IOPort", method, args, ret)
}

fn actor_call(actor: &str, class: &str, method: &str, ret: Type) -> InvokeExpr {
    InvokeExpr::virtual_call(Operand::local(actor), class, method, Vec::new(), ret)
}

/// `(CompositeEntity) base.getContainer()`
fn container_of(b: &mut BodyBuilder<'_>, base: &Operand) -> String {
    let container = b.call(
        "$c",
        InvokeExpr::virtual_call(
            base.clone(),
            "NamedObj",
            "getContainer",
            Vec::new(),
            Type::object("NamedObj"),
        ),
    );
    b.eval(
        "$c",
        Type::object("CompositeEntity"),
        Expr::Cast(Type::object("CompositeEntity"), Operand::local(container)),
    )
}

fn evaluate(b: &mut BodyBuilder<'_>, text: &str) -> String {
    let parser = b.new_object("PtParser", Vec::new());
    b.call(
        "$v",
        InvokeExpr::virtual_call(
            Operand::local(parser),
            "PtParser",
            "evaluate",
            vec![Operand::str(text)],
            token_type(),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ValueType;
    use crate::ir::{Cfg, Printer};
    use crate::model::{Model, ModelBuilder, PortSpec, TransitionDesc};
    use crate::specializer::test_support::context_for;

    fn toggle_model() -> Model {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        builder.add_parameter(top, "gain", "1").unwrap();
        let fsm = builder.add_state_machine(top, "control").unwrap();
        builder
            .add_port(fsm, "in", PortSpec::input(ValueType::Int))
            .unwrap();
        builder
            .add_port(fsm, "out", PortSpec::output(ValueType::Int))
            .unwrap();
        builder.add_state(fsm, "off", None).unwrap();
        builder.add_state(fsm, "on", None).unwrap();
        builder.set_initial_state(fsm, "off").unwrap();
        builder
            .add_transition(
                fsm,
                TransitionDesc::new("off", "on", "in_isPresent && in > 0").choice("out", "1"),
            )
            .unwrap();
        builder
            .add_transition(
                fsm,
                TransitionDesc::new("on", "off", "true").commit("gain", "gain + 1"),
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_fsm_class_layout() {
        let model = toggle_model();
        let mut ctx = context_for(&model);
        let fsm = model.child_by_name(model.top(), "control").unwrap();
        build_fsm_class(&mut ctx, fsm).unwrap();
        let class = ctx.scene.class("generated.top_control").unwrap();
        for field in ["_currentState", "_nextTransition", "_nextState", "inToken", "inIsPresent", "out"] {
            assert!(class.fields.contains_key(field), "missing {}", field);
        }
        assert!(!class.fields.contains_key("outToken"));
        for method in ["<init>", "initialize", "fire", "postfire"] {
            let body = class.methods[method].body.as_ref().unwrap();
            Cfg::build(body).unwrap();
        }
    }

    #[test]
    fn test_fire_rejects_ambiguous_transitions() {
        let model = toggle_model();
        let mut ctx = context_for(&model);
        let fsm = model.child_by_name(model.top(), "control").unwrap();
        build_fsm_class(&mut ctx, fsm).unwrap();
        let text = Printer::new().class_to_string(ctx.scene.class("generated.top_control").unwrap());
        assert!(text.contains("more than one enabled transition"));
        assert!(text.contains("state error"));
        assert!(text.contains("\"in_isPresent && in > 0\""));
    }

    #[test]
    fn test_commit_action_reaches_container_parameter() {
        let model = toggle_model();
        let mut ctx = context_for(&model);
        let fsm = model.child_by_name(model.top(), "control").unwrap();
        build_fsm_class(&mut ctx, fsm).unwrap();
        let postfire = ctx
            .scene
            .method("generated.top_control", "postfire")
            .and_then(|m| m.body.as_ref())
            .unwrap();
        let calls: Vec<&str> = postfire
            .stmts
            .iter()
            .filter_map(Stmt::invoke)
            .map(|i| i.method.as_str())
            .collect();
        let container = calls.iter().position(|m| *m == "getContainer").unwrap();
        let attribute = calls.iter().position(|m| *m == "getAttribute").unwrap();
        let set = calls.iter().position(|m| *m == "setToken").unwrap();
        assert!(container < attribute && attribute < set);
    }

    #[test]
    fn test_index_out_of_int_range_is_unsupported() {
        let model = toggle_model();
        let ctx = context_for(&model);
        let fsm = model.child_by_name(model.top(), "control").unwrap();
        let writer = FsmWriter {
            ctx: &ctx,
            id: fsm,
            spec: model.fsm(fsm).unwrap(),
            class: "generated.top_control",
        };
        assert_eq!(writer.index(1).unwrap(), Operand::int(1));
        let err = writer.index(usize::MAX).unwrap_err();
        assert!(matches!(err, SpecializeError::Unsupported { .. }));
        assert!(err.to_string().contains("out of range"));
    }
}
