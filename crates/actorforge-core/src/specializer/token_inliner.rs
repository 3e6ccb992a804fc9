//! Token folding and token-type specialization.
//!
//! Parameter reads turn into token constructions; a token method called on
//! a constructed token with constant arguments is evaluated here and
//! replaced by its result. The two feed each other, so they alternate until
//! nothing changes. Type propagation then runs once over the result.

use super::parameters::inline_parameters;
use super::types::propagate_types;
use super::{rewrite_bodies, Context, Pass};
use crate::data::{InvokeArg, InvokeResult, Token, ValueType};
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{Body, BodyBuilder, Const, Expr, InvokeKind, LocalDefs, Operand, Stmt};
use crate::library::is_token_class;
use crate::library::tokens::{
    const_to_primitive, emit_token, primitive_to_const, token_from_construction,
};
use std::str::FromStr;
use tracing::{debug, info};

pub struct TokenTypePass;

impl Pass for TokenTypePass {
    fn name(&self) -> &'static str {
        "token-types"
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let mut parameters = 0;
        let mut folded = 0;
        let rounds = ctx.config.max_cleanup_rounds.max(1);
        let mut settled = false;
        for round in 0..rounds {
            let p = inline_parameters(ctx)?;
            let f = fold_token_calls(ctx)?;
            debug!("Token round {}: {} parameter accesses, {} calls folded", round, p, f);
            parameters += p;
            folded += f;
            if p == 0 && f == 0 {
                settled = true;
                break;
            }
        }
        if !settled {
            return Err(SpecializeError::invariant(
                Location::none(),
                format!("token folding still rewriting after {} rounds", rounds),
            ));
        }
        let report = propagate_types(ctx)?;
        info!(
            "Inlined {} parameter accesses, folded {} token calls, typed {} fields and {} locals, devirtualized {} calls",
            parameters, folded, report.fields, report.locals, report.calls
        );
        Ok(parameters + folded + report.total() > 0)
    }
}

fn fold_token_calls(ctx: &mut Context<'_>) -> Result<usize> {
    let mut folded = 0;
    rewrite_bodies(ctx, |_, class, method, body| {
        let n = fold_body(class, method, body)?;
        folded += n;
        Ok(n > 0)
    })?;
    Ok(folded)
}

enum Folded {
    Token(Token),
    Value(Const),
}

fn fold_body(class: &str, method: &str, body: &mut Body) -> Result<usize> {
    let folds: Vec<(usize, Folded)> = {
        let defs = LocalDefs::compute(body)?;
        let mut folds = Vec::new();
        for (i, stmt) in body.stmts.iter().enumerate() {
            let Some(invoke) = stmt.invoke() else {
                continue;
            };
            let receiver = match (invoke.kind, &invoke.base) {
                (InvokeKind::Virtual | InvokeKind::Interface, Some(base))
                    if is_token_class(&invoke.class) =>
                {
                    known_token(body, &defs, base, i)
                }
                (InvokeKind::Static, None)
                    if invoke.class == "Tokens" && invoke.method == "convert" =>
                {
                    if let Some(token) = fold_convert(body, &defs, &invoke.args, i) {
                        folds.push((i, Folded::Token(token)));
                    }
                    continue;
                }
                _ => continue,
            };
            let Some(receiver) = receiver else {
                continue;
            };
            let Some(args) = invoke
                .args
                .iter()
                .map(|a| argument(body, &defs, a, i))
                .collect::<Option<Vec<_>>>()
            else {
                continue;
            };
            match receiver.invoke(&invoke.method, &args) {
                Ok(InvokeResult::Token(t)) => folds.push((i, Folded::Token(t))),
                Ok(InvokeResult::Primitive(p)) => {
                    folds.push((i, Folded::Value(primitive_to_const(&p))))
                }
                Ok(InvokeResult::Unmappable(kind)) => {
                    return Err(SpecializeError::unsupported(
                        Location::method(class, method).at(i),
                        format!("unknown return type `{}` from `{}`", kind, invoke.method),
                    ))
                }
                // Left for the generated program to raise.
                Err(e) => debug!("{}.{}: `{}` not folded: {}", class, method, invoke.method, e),
            }
        }
        folds
    };

    for (index, folded) in folds.iter().rev() {
        let def = body.stmts[*index].def().map(str::to_string);
        let mut b = BodyBuilder::new(body);
        if let Some(def) = def {
            let value = match folded {
                Folded::Token(token) => Expr::local(emit_token(&mut b, token)),
                Folded::Value(c) => Expr::constant(c.clone()),
            };
            b.assign(&def, value);
        }
        let stmts = b.finish();
        body.splice(*index, stmts);
    }
    Ok(folds.len())
}

/// The token `operand` is known to hold at `at`: the result of a token
/// construction with constant arguments, possibly through copies and casts.
fn known_token(body: &Body, defs: &LocalDefs, operand: &Operand, at: usize) -> Option<Token> {
    let mut local = operand.as_local()?.to_string();
    let mut at = at;
    for _ in 0..body.stmts.len() {
        let def = defs.single_def(&local, at, body)?;
        match &body.stmts[def] {
            Stmt::Assign(_, Expr::Use(Operand::Local(next)))
            | Stmt::Assign(_, Expr::Cast(_, Operand::Local(next))) => {
                local = next.clone();
                at = def;
            }
            Stmt::Assign(_, Expr::New(class)) if is_token_class(class) => {
                let Some(Stmt::Invoke(init)) = body.stmts.get(def + 1) else {
                    return None;
                };
                if init.method != "<init>" || init.base_local() != Some(local.as_str()) {
                    return None;
                }
                let args = init
                    .args
                    .iter()
                    .map(|a| defs.constant_at(a, def + 1, body))
                    .collect::<Option<Vec<_>>>()?;
                return token_from_construction(class, &args);
            }
            _ => return None,
        }
    }
    None
}

fn argument(body: &Body, defs: &LocalDefs, operand: &Operand, at: usize) -> Option<InvokeArg> {
    if let Some(token) = known_token(body, defs, operand, at) {
        return Some(InvokeArg::Token(token));
    }
    let value = defs.constant_at(operand, at, body)?;
    const_to_primitive(&value).map(InvokeArg::Primitive)
}

/// `Tokens.convert(token, "type")` with both arguments known.
fn fold_convert(body: &Body, defs: &LocalDefs, args: &[Operand], at: usize) -> Option<Token> {
    let [token, ty] = args else {
        return None;
    };
    let token = known_token(body, defs, token, at)?;
    let ty = match defs.constant_at(ty, at, body)? {
        Const::Str(s) => ValueType::from_str(&s).ok()?,
        _ => return None,
    };
    token.convert(&ty).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecializerConfig;
    use crate::ir::{InvokeExpr, Type};
    use crate::library::tokens::token_type;
    use crate::specializer::test_support::{context_with_config, model_from_yaml};
    use crate::specializer::{
        AttributeSlotPass, ComponentSlotPass, CompositePass, ExpressionPass, InstanceClassPass,
        PortSlotPass,
    };
    use indoc::indoc;

    fn construct(body: &mut Body, class: &str, value: Operand) -> String {
        let mut b = BodyBuilder::new(body);
        let local = b.new_object(class, vec![value]);
        b.append();
        local
    }

    fn call(body: &mut Body, receiver: &str, method: &str, args: Vec<Operand>, ret: Type) -> String {
        let mut b = BodyBuilder::new(body);
        let local = b.call(
            "$v",
            InvokeExpr::virtual_call(Operand::local(receiver), "Token", method, args, ret),
        );
        b.append();
        local
    }

    #[test]
    fn test_arithmetic_on_constants_folds_to_construction() {
        let mut body = Body::new();
        let a = construct(&mut body, "IntToken", Operand::int(2));
        let b = construct(&mut body, "IntToken", Operand::int(5));
        let sum = call(&mut body, &a, "add", vec![Operand::local(&b)], token_type());
        body.stmts.push(Stmt::Return(Some(Operand::local(&sum))));

        assert_eq!(fold_body("C", "m", &mut body).unwrap(), 1);
        assert!(body
            .stmts
            .iter()
            .all(|s| s.invoke().map(|i| i.method != "add").unwrap_or(true)));
        assert!(body.stmts.iter().any(|s| matches!(
            s,
            Stmt::Invoke(i) if i.class == "IntToken" && i.args == vec![Operand::int(7)]
        )));
    }

    #[test]
    fn test_primitive_results_become_constants() {
        let mut body = Body::new();
        let flag = construct(&mut body, "BooleanToken", Operand::bool(true));
        let copy = body.new_local("$c", token_type());
        body.stmts.push(Stmt::assign_local(
            &copy,
            Expr::Cast(Type::object("BooleanToken"), Operand::local(&flag)),
        ));
        let value = call(&mut body, &copy, "booleanValue", Vec::new(), Type::Boolean);
        body.stmts.push(Stmt::Return(Some(Operand::local(&value))));

        fold_body("C", "m", &mut body).unwrap();
        assert!(body
            .stmts
            .contains(&Stmt::assign_local(&value, Expr::constant(Const::Bool(true)))));
    }

    #[test]
    fn test_unknown_receiver_is_left_alone() {
        let mut body = Body::new();
        body.declare("p", token_type());
        let a = construct(&mut body, "IntToken", Operand::int(2));
        let sum = call(&mut body, "p", "add", vec![Operand::local(&a)], token_type());
        body.stmts.push(Stmt::Return(Some(Operand::local(sum))));
        assert_eq!(fold_body("C", "m", &mut body).unwrap(), 0);
    }

    #[test]
    fn test_unmappable_result_is_unsupported() {
        let mut body = Body::new();
        let a = construct(&mut body, "IntToken", Operand::int(2));
        call(&mut body, &a, "getType", Vec::new(), Type::object("Type"));
        body.stmts.push(Stmt::Return(None));
        let err = fold_body("C", "m", &mut body).unwrap_err();
        assert!(matches!(err, SpecializeError::Unsupported { .. }));
        assert!(err.to_string().contains("unknown return type"));
    }

    #[test]
    fn test_convert_of_constant_widens() {
        let mut body = Body::new();
        let a = construct(&mut body, "IntToken", Operand::int(3));
        let mut b = BodyBuilder::new(&mut body);
        let converted = b.call(
            "$v",
            InvokeExpr::static_call(
                "Tokens",
                "convert",
                vec![Operand::local(&a), Operand::str("double")],
                token_type(),
            ),
        );
        b.append();
        body.stmts.push(Stmt::Return(Some(Operand::local(converted))));
        assert_eq!(fold_body("C", "m", &mut body).unwrap(), 1);
        assert!(body.stmts.iter().any(|s| matches!(
            s,
            Stmt::Invoke(i) if i.class == "DoubleToken"
                && i.args == vec![Operand::Const(Const::Double(3.0))]
        )));
    }

    #[test]
    fn test_round_bound_reached_is_an_error() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: ramp, class: Ramp, parameters: { init: '0', step: '2' } }
              - { kind: atomic, name: sink, class: Discard }
            relations:
              - { name: r, width: 1, bufferSize: 1, links: [ramp.output, sink.input] }
        "});
        let config = SpecializerConfig {
            max_cleanup_rounds: 1,
            ..SpecializerConfig::default()
        };
        let mut ctx = context_with_config(&model, config);
        for pass in [
            &mut InstanceClassPass as &mut dyn Pass,
            &mut CompositePass,
            &mut AttributeSlotPass,
            &mut PortSlotPass,
            &mut ComponentSlotPass,
            &mut ExpressionPass,
        ] {
            pass.run(&mut ctx).unwrap();
        }
        let err = TokenTypePass.run(&mut ctx).unwrap_err();
        assert!(matches!(err, SpecializeError::Invariant { .. }));
        assert!(err.to_string().contains("after 1 rounds"));
    }
}
