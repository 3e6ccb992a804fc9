//! Token-type propagation.
//!
//! A forward dataflow per method tracks the most specific value type of
//! every token local. Field types come from a whole-program fixed point:
//! each round re-solves every method against the field types of the last
//! round and joins in whatever was stored. The value types become field
//! type tags.
//!
//! Declarations are narrowed separately, by class: a field or local is
//! retyped to the least common class of everything assigned to it, so an
//! int token and a double token meeting in one local give `ScalarToken`.
//! Casts and token calls are then bound against the narrowed declarations.
//!
//! For locals holding ports or buffers, the tracked type is that of the
//! tokens they carry.

use super::{rewrite_bodies, Context};
use crate::data::ValueType;
use crate::errors::Result;
use crate::ir::{
    solve_forward, Body, Cfg, Const, Expr, FieldRef, ForwardAnalysis, InvokeExpr, InvokeKind,
    Operand, Place, Scene, Stmt, Type,
};
use crate::library::is_token_class;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct TypeReport {
    pub fields: usize,
    pub locals: usize,
    pub calls: usize,
    pub casts: usize,
}

impl TypeReport {
    pub fn total(&self) -> usize {
        self.fields + self.locals + self.calls + self.casts
    }
}

type FieldTypes = FxHashMap<FieldRef, ValueType>;

/// Result type of an arithmetic token operation: both operands are
/// converted to their join first.
pub(super) fn arithmetic_result(left: &ValueType, right: &ValueType) -> ValueType {
    left.join(right)
}

fn is_token_type(ty: &Type) -> bool {
    match ty {
        Type::Ref(class) => is_token_class(class),
        Type::Array(element) => is_token_type(element),
        _ => false,
    }
}

/// The value type a declared IR type promises, `General` for plain `Token`.
fn declared(ty: &Type) -> ValueType {
    match ty {
        Type::Ref(class) => ValueType::from_token_class(class).unwrap_or(ValueType::Unknown),
        Type::Array(element) => ValueType::array_of(declared(element)),
        _ => ValueType::Unknown,
    }
}

struct TokenTypes<'a> {
    fields: &'a FieldTypes,
}

impl TokenTypes<'_> {
    fn operand(&self, operand: &Operand, state: &BTreeMap<String, ValueType>) -> ValueType {
        match operand {
            Operand::Local(name) => state.get(name).cloned().unwrap_or(ValueType::Unknown),
            Operand::Const(_) => ValueType::Unknown,
        }
    }

    fn expr(&self, expr: &Expr, state: &BTreeMap<String, ValueType>) -> ValueType {
        match expr {
            Expr::Use(operand) => self.operand(operand, state),
            Expr::Cast(ty, operand) => {
                let from = self.operand(operand, state);
                if from.is_concrete() {
                    from
                } else {
                    declared(ty)
                }
            }
            Expr::New(class) if is_token_class(class) => declared(&Type::object(class.as_str())),
            Expr::InstanceField(_, field) | Expr::StaticField(field) => self
                .fields
                .get(field)
                .cloned()
                .unwrap_or(ValueType::Unknown),
            Expr::ArrayRead(array, _) => self
                .operand(array, state)
                .element()
                .cloned()
                .unwrap_or(ValueType::Unknown),
            Expr::Invoke(invoke) => self.invoke(invoke, state),
            _ => ValueType::Unknown,
        }
    }

    fn invoke(&self, invoke: &InvokeExpr, state: &BTreeMap<String, ValueType>) -> ValueType {
        let fallback = || {
            let ty = declared(&invoke.ret);
            if is_token_type(&invoke.ret) {
                ty
            } else {
                ValueType::Unknown
            }
        };
        let receiver = || {
            invoke
                .base
                .as_ref()
                .map(|b| self.operand(b, state))
                .unwrap_or(ValueType::Unknown)
        };
        let arg = |i: usize| {
            invoke
                .args
                .get(i)
                .map(|a| self.operand(a, state))
                .unwrap_or(ValueType::Unknown)
        };
        if invoke.kind == InvokeKind::Static {
            if invoke.class == "Tokens" && invoke.method == "convert" {
                if let Some(Operand::Const(Const::Str(s))) = invoke.args.get(1) {
                    return ValueType::from_str(s).unwrap_or(ValueType::General);
                }
            }
            return fallback();
        }
        if is_token_class(&invoke.class) {
            return match invoke.method.as_str() {
                "add" | "subtract" | "multiply" | "divide" | "modulo" => {
                    let joined = arithmetic_result(&receiver(), &arg(0));
                    if joined == ValueType::Unknown {
                        ValueType::General
                    } else {
                        joined
                    }
                }
                "isEqualTo" | "isLessThan" | "isGreaterThan" | "and" | "or" | "not" => {
                    ValueType::Boolean
                }
                "negate" | "zero" | "one" => match receiver() {
                    ValueType::Unknown => ValueType::General,
                    ty => ty,
                },
                "getElement" => receiver()
                    .element()
                    .cloned()
                    .unwrap_or(ValueType::General),
                _ => fallback(),
            };
        }
        if invoke.method == "get" && matches!(invoke.class.as_str(), "IOPort" | "TypedIOPort") {
            return match receiver() {
                ValueType::Unknown => ValueType::General,
                ty => ty,
            };
        }
        fallback()
    }
}

impl ForwardAnalysis for TokenTypes<'_> {
    type State = BTreeMap<String, ValueType>;

    fn entry(&self) -> Self::State {
        BTreeMap::new()
    }

    fn bottom(&self) -> Self::State {
        BTreeMap::new()
    }

    fn join_into(&self, acc: &mut Self::State, incoming: &Self::State) {
        for (local, ty) in incoming {
            let joined = match acc.get(local) {
                Some(existing) => existing.join(ty),
                None => ty.clone(),
            };
            acc.insert(local.clone(), joined);
        }
    }

    fn transfer(&self, _: usize, stmt: &Stmt, input: &Self::State) -> Self::State {
        let mut out = input.clone();
        if let Stmt::Assign(Place::Local(local), expr) = stmt {
            out.insert(local.clone(), self.expr(expr, input));
        }
        out
    }
}

/// Per-statement IN states for one body.
fn solve(fields: &FieldTypes, body: &Body) -> Result<Vec<BTreeMap<String, ValueType>>> {
    let cfg = Cfg::build(body)?;
    let (ins, _) = solve_forward(&TokenTypes { fields }, body, &cfg);
    Ok(ins)
}

/// Seed field types from type tags. Token fields without a tag start at the
/// bottom and are filled by the stores the fixed point finds.
fn initial_field_types(scene: &Scene) -> FieldTypes {
    let mut fields = FieldTypes::default();
    for class in scene.classes().filter(|c| c.is_application()) {
        for field in class.fields.values() {
            let ty = match (field.type_tag(), &field.ty) {
                (Some(tag), Type::Array(_)) => ValueType::array_of(tag.clone()),
                (Some(tag), _) => tag.clone(),
                (None, ty) if is_token_type(ty) => ValueType::Unknown,
                _ => continue,
            };
            fields.insert(FieldRef::new(class.name.clone(), field.name.clone()), ty);
        }
    }
    fields
}

fn field_fixed_point(ctx: &Context<'_>) -> Result<FieldTypes> {
    let initial = initial_field_types(&ctx.scene);
    let mut fields = initial.clone();
    let rounds = ctx.config.max_cleanup_rounds.max(1);
    for round in 0..rounds {
        let mut next = initial.clone();
        for (class, method) in ctx.scene.application_methods() {
            let Some(body) = ctx.scene.method(&class, &method).and_then(|m| m.body.as_ref()) else {
                continue;
            };
            let analysis = TokenTypes { fields: &fields };
            let ins = solve(&fields, body)?;
            for (i, stmt) in body.stmts.iter().enumerate() {
                let Stmt::Assign(Place::InstanceField(_, field) | Place::StaticField(field), expr) =
                    stmt
                else {
                    continue;
                };
                let Some(current) = next.get_mut(field) else {
                    continue;
                };
                let stored = match expr {
                    Expr::Use(Operand::Const(Const::Null)) => ValueType::Unknown,
                    other => match analysis.expr(other, &ins[i]) {
                        // A token of unknown origin can be anything.
                        ValueType::Unknown => ValueType::General,
                        ty => ty,
                    },
                };
                *current = current.join(&stored);
            }
        }
        if next == fields {
            debug!("Field types stable after {} rounds", round + 1);
            return Ok(fields);
        }
        if round + 1 == rounds {
            for (field, ty) in next.iter_mut() {
                if fields.get(field) != Some(ty) {
                    warn!("Type of {} did not settle in {} rounds; widening", field, rounds);
                    *ty = ValueType::General;
                }
            }
        }
        fields = next;
    }
    Ok(fields)
}

/// Upper bound on the runtime class of a token value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Bound {
    /// Only `null` seen so far.
    Nothing,
    Class(String),
    /// No better than the declaration of whatever holds the value.
    Declared,
}

impl Bound {
    fn join(&self, other: &Bound, scene: &Scene) -> Bound {
        match (self, other) {
            (Bound::Nothing, b) | (b, Bound::Nothing) => b.clone(),
            (Bound::Class(a), Bound::Class(b)) => scene
                .common_superclass(a, b)
                .map(Bound::Class)
                .unwrap_or(Bound::Declared),
            _ => Bound::Declared,
        }
    }
}

type FieldBounds = FxHashMap<FieldRef, Bound>;

fn token_ref(ty: &Type) -> Option<&str> {
    match ty {
        Type::Ref(class) if is_token_class(class) => Some(class),
        _ => None,
    }
}

fn declared_bound(ty: Option<&Type>) -> Bound {
    match ty {
        Some(Type::Ref(class)) => Bound::Class(class.clone()),
        _ => Bound::Declared,
    }
}

/// Class bounds of every token local of one body, given the field bounds.
///
/// Flow-insensitive: a local gets the least common class of everything
/// assigned to it anywhere, so retyping it keeps every assignment and every
/// use well typed. Locals with no defining statement keep their declaration.
struct LocalBounds<'a> {
    scene: &'a Scene,
    fields: &'a FieldBounds,
    body: &'a Body,
    locals: BTreeMap<String, Bound>,
}

impl<'a> LocalBounds<'a> {
    fn compute(scene: &'a Scene, fields: &'a FieldBounds, body: &'a Body) -> Self {
        let mut bounds = LocalBounds {
            scene,
            fields,
            body,
            locals: BTreeMap::new(),
        };
        for (name, ty) in &body.locals {
            if token_ref(ty).is_some() && !body.stmts.iter().any(|s| s.def() == Some(name.as_str()))
            {
                bounds.locals.insert(name.clone(), Bound::Declared);
            }
        }
        // Joins only climb a finite hierarchy, so this terminates.
        loop {
            let mut changed = false;
            for stmt in &body.stmts {
                let Stmt::Assign(Place::Local(local), expr) = stmt else {
                    continue;
                };
                if body.local_type(local).and_then(token_ref).is_none() {
                    continue;
                }
                let incoming = bounds.expr(expr);
                let joined = match bounds.locals.get(local) {
                    Some(existing) => existing.join(&incoming, scene),
                    None => incoming,
                };
                if bounds.locals.get(local) != Some(&joined) {
                    bounds.locals.insert(local.clone(), joined);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        bounds
    }

    /// The class a local can be retyped to, if narrower than declared.
    fn retyped(&self, local: &str) -> Option<&str> {
        let declared = self.body.local_type(local).and_then(token_ref)?;
        match self.locals.get(local) {
            Some(Bound::Class(class))
                if class != declared && self.scene.is_subtype(class, declared) =>
            {
                Some(class.as_str())
            }
            _ => None,
        }
    }

    fn local(&self, name: &str) -> Bound {
        let declared = self.body.local_type(name);
        match self.locals.get(name) {
            Some(Bound::Class(class)) => Bound::Class(class.clone()),
            Some(Bound::Declared) => declared_bound(declared),
            Some(Bound::Nothing) | None if declared.and_then(token_ref).is_some() => Bound::Nothing,
            _ => declared_bound(declared),
        }
    }

    fn field(&self, field: &FieldRef) -> Bound {
        match self.fields.get(field) {
            Some(Bound::Class(class)) => Bound::Class(class.clone()),
            Some(Bound::Nothing) => Bound::Nothing,
            _ => declared_bound(
                self.scene
                    .resolve_field(&field.class, &field.name)
                    .map(|(_, f)| &f.ty),
            ),
        }
    }

    fn expr(&self, expr: &Expr) -> Bound {
        match expr {
            Expr::Use(Operand::Const(Const::Null)) => Bound::Nothing,
            Expr::Use(Operand::Local(name)) => self.local(name),
            Expr::Cast(Type::Ref(target), operand) => match operand {
                Operand::Local(name) => match self.local(name) {
                    Bound::Class(class) if self.scene.is_subtype(&class, target) => {
                        Bound::Class(class)
                    }
                    Bound::Nothing => Bound::Nothing,
                    _ => Bound::Class(target.clone()),
                },
                Operand::Const(_) => Bound::Class(target.clone()),
            },
            Expr::New(class) => Bound::Class(class.clone()),
            Expr::InstanceField(_, field) | Expr::StaticField(field) => self.field(field),
            Expr::ArrayRead(Operand::Local(array), _) => match self.body.local_type(array) {
                Some(Type::Array(element)) => declared_bound(Some(element.as_ref())),
                _ => Bound::Declared,
            },
            Expr::Invoke(invoke) => self.invoke(invoke),
            _ => Bound::Declared,
        }
    }

    /// Token natives on leaf classes return a known class: arithmetic the
    /// class of the join, comparisons a boolean token.
    fn invoke(&self, invoke: &InvokeExpr) -> Bound {
        let returned = || declared_bound(Some(&invoke.ret));
        if invoke.kind == InvokeKind::Static {
            if invoke.class == "Tokens" && invoke.method == "convert" {
                if let Some(Operand::Const(Const::Str(s))) = invoke.args.get(1) {
                    if let Ok(ty) = ValueType::from_str(s) {
                        if ty.is_concrete() {
                            return Bound::Class(ty.token_class().to_string());
                        }
                    }
                }
            }
            return returned();
        }
        if !is_token_class(&invoke.class) {
            return returned();
        }
        let leaf = |operand: Option<&Operand>| -> Option<Option<ValueType>> {
            match operand {
                Some(Operand::Local(name)) => match self.local(name) {
                    Bound::Nothing => None,
                    Bound::Class(class) => Some(
                        ValueType::from_token_class(&class)
                            .filter(|ty| ty.is_concrete() && !matches!(ty, ValueType::Array(_))),
                    ),
                    Bound::Declared => Some(None),
                },
                _ => Some(None),
            }
        };
        match invoke.method.as_str() {
            "add" | "subtract" | "multiply" | "divide" | "modulo" => {
                match (leaf(invoke.base.as_ref()), leaf(invoke.args.first())) {
                    (None, _) | (_, None) => Bound::Nothing,
                    (Some(Some(left)), Some(Some(right))) => {
                        Bound::Class(arithmetic_result(&left, &right).token_class().to_string())
                    }
                    _ => returned(),
                }
            }
            "isEqualTo" | "isLessThan" | "isGreaterThan" => Bound::Class("BooleanToken".into()),
            "negate" | "zero" | "one" => match leaf(invoke.base.as_ref()) {
                None => Bound::Nothing,
                Some(Some(ty)) => Bound::Class(ty.token_class().to_string()),
                Some(None) => returned(),
            },
            _ => returned(),
        }
    }
}

/// Token fields of application classes whose declaration can narrow.
fn tracked_fields(scene: &Scene) -> FieldBounds {
    let mut fields = FieldBounds::default();
    for class in scene.classes().filter(|c| c.is_application()) {
        for field in class.fields.values() {
            if token_ref(&field.ty).is_some() {
                fields.insert(
                    FieldRef::new(class.name.clone(), field.name.clone()),
                    Bound::Nothing,
                );
            }
        }
    }
    fields
}

/// Whole-program class bounds of token fields: each round recomputes local
/// bounds in every body and joins in what is stored.
fn field_bounds(ctx: &Context<'_>) -> Result<FieldBounds> {
    let scene = &ctx.scene;
    let initial = tracked_fields(scene);
    let mut fields = initial.clone();
    let rounds = ctx.config.max_cleanup_rounds.max(1);
    for round in 0..rounds {
        let mut next = initial.clone();
        for (class, method) in scene.application_methods() {
            let Some(body) = scene.method(&class, &method).and_then(|m| m.body.as_ref()) else {
                continue;
            };
            let locals = LocalBounds::compute(scene, &fields, body);
            for stmt in &body.stmts {
                let Stmt::Assign(Place::InstanceField(_, field) | Place::StaticField(field), expr) =
                    stmt
                else {
                    continue;
                };
                if let Some(current) = next.get_mut(field) {
                    *current = current.join(&locals.expr(expr), scene);
                }
            }
        }
        if next == fields {
            return Ok(fields);
        }
        if round + 1 == rounds {
            for (field, bound) in next.iter_mut() {
                if fields.get(field) != Some(bound) {
                    warn!("Class of {} did not settle in {} rounds; keeping its declaration", field, rounds);
                    *bound = Bound::Declared;
                }
            }
        }
        fields = next;
    }
    Ok(fields)
}

/// Run the propagation and apply what it proves.
pub(super) fn propagate_types(ctx: &mut Context<'_>) -> Result<TypeReport> {
    let fields = field_fixed_point(ctx)?;
    let bounds = field_bounds(ctx)?;
    let mut report = TypeReport::default();

    for (field_ref, bound) in &bounds {
        let Bound::Class(class) = bound else {
            continue;
        };
        let Some(field) = ctx.scene.field(&field_ref.class, &field_ref.name) else {
            continue;
        };
        let narrower = matches!(token_ref(&field.ty), Some(declared)
            if declared != class && ctx.scene.is_subtype(class, declared));
        if narrower {
            if let Some(field) = ctx.scene.field_mut(&field_ref.class, &field_ref.name) {
                field.ty = Type::object(class.as_str());
                debug!("Field {} retyped {}", field_ref, class);
                report.fields += 1;
            }
        }
    }

    for (field_ref, ty) in &fields {
        if !ty.is_concrete() {
            continue;
        }
        let Some(field) = ctx.scene.field_mut(&field_ref.class, &field_ref.name) else {
            continue;
        };
        if token_ref(&field.ty).is_none() {
            continue;
        }
        let changed = match field.type_tag().cloned() {
            None => {
                field.set_type_tag(ty.clone())?;
                true
            }
            Some(existing) if ty.leq(&existing) && *ty != existing => {
                field.specialize_type_tag(ty.clone())?;
                true
            }
            Some(_) => false,
        };
        if changed {
            debug!("Field {} typed {}", field_ref, ty);
            report.fields += 1;
        }
    }

    let mut locals = 0;
    let mut calls = 0;
    let mut casts = 0;
    rewrite_bodies(ctx, |ctx, _, _, body| {
        let (l, c, k) = specialize_body(&ctx.scene, &bounds, body);
        locals += l;
        calls += c;
        casts += k;
        Ok(l + c + k > 0)
    })?;
    report.locals = locals;
    report.calls = calls;
    report.casts = casts;
    Ok(report)
}

/// Narrow local declarations to their class bounds, then drop casts and
/// bind token calls using the narrowed declarations.
fn specialize_body(scene: &Scene, fields: &FieldBounds, body: &mut Body) -> (usize, usize, usize) {
    let retyped: Vec<(String, String)> = {
        let bounds = LocalBounds::compute(scene, fields, body);
        body.locals
            .keys()
            .filter_map(|local| {
                bounds
                    .retyped(local)
                    .map(|class| (local.clone(), class.to_string()))
            })
            .collect()
    };
    let locals = retyped.len();
    for (local, class) in retyped {
        body.declare(local, Type::object(class));
    }

    let declared = body.locals.clone();

    let mut calls = 0;
    let mut casts = 0;
    for stmt in body.stmts.iter_mut() {
        if let Stmt::Assign(_, expr) = stmt {
            let redundant = match &*expr {
                Expr::Cast(Type::Ref(target), operand) => declared_class(&declared, operand)
                    .filter(|class| scene.is_subtype(class, target))
                    .map(|_| operand.clone()),
                _ => None,
            };
            if let Some(operand) = redundant {
                *expr = Expr::Use(operand);
                casts += 1;
            }
        }
        let Some(invoke) = stmt.invoke_mut() else {
            continue;
        };
        if invoke.kind != InvokeKind::Virtual || !is_token_class(&invoke.class) {
            continue;
        }
        let Some(class) = invoke
            .base
            .as_ref()
            .and_then(|base| declared_class(&declared, base))
        else {
            continue;
        };
        if invoke.class != class
            && scene.is_subtype(class, &invoke.class)
            && scene.resolve_method(class, &invoke.method).is_some()
        {
            invoke.class = class.to_string();
            calls += 1;
        }
    }
    (locals, calls, casts)
}

fn declared_class<'a>(locals: &'a IndexMap<String, Type>, operand: &Operand) -> Option<&'a str> {
    match operand {
        Operand::Local(name) => locals.get(name).and_then(token_ref),
        Operand::Const(_) => None,
    }
}
