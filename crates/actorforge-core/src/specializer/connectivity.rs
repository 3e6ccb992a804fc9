//! Port communication.
//!
//! In deep mode every port operation whose receiver is a known port and
//! whose channel is constant becomes a direct access to the static buffer
//! of that channel. Introspection calls fold to constants. Channels that
//! are not constant get one chance: the loops around them are unrolled
//! first.

use super::unroll::unroll_loops;
use super::{rewrite_bodies, BufferKey, Context, ModelRef, Pass, Resolver};
use crate::config::{CodegenMode, SpecializerConfig};
use crate::errors::{Location, Result, SpecializeError};
use crate::ir::{
    BinOp, Body, BodyBuilder, Const, Expr, FieldRef, InvokeExpr, Operand, Place, Stmt, Type,
};
use crate::library::tokens::token_type;
use crate::model::{PortId, RelationId};
use tracing::{debug, info};

pub struct ConnectivityPass;

const INTROSPECTION: &[&str] = &["getWidth", "isInput", "isOutput", "isMultiport"];
const TRANSFER: &[&str] = &["get", "send", "broadcast", "hasToken", "hasRoom"];

impl Pass for ConnectivityPass {
    fn name(&self) -> &'static str {
        "connectivity"
    }

    fn applies_to(&self, config: &SpecializerConfig) -> bool {
        config.mode == CodegenMode::Deep
    }

    fn run(&mut self, ctx: &mut Context<'_>) -> Result<bool> {
        let mut folded = 0;
        let mut inlined = 0;
        rewrite_bodies(ctx, |ctx, class, method, body| {
            let f = fold_introspection(ctx, class, method, body)?;
            let i = inline_transfers(ctx, class, method, body)?;
            folded += f;
            inlined += i;
            Ok(f + i > 0)
        })?;
        info!(
            "Folded {} port queries, inlined {} port transfers",
            folded, inlined
        );
        Ok(folded + inlined > 0)
    }
}

struct Site {
    index: usize,
    port: PortId,
    method: String,
    channel: Option<usize>,
}

/// Port calls in `body` among `methods`. A call on a port whose receiver
/// does not resolve to one port of the model is an error.
fn collect_sites(
    ctx: &Context<'_>,
    class: &str,
    method: &str,
    body: &Body,
    methods: &[&str],
) -> Result<Vec<Site>> {
    let resolver = Resolver::new(ctx.model, &ctx.scene, ctx.component_of_class(class), body)?;
    let mut sites = Vec::new();
    for (index, stmt) in body.stmts.iter().enumerate() {
        let Some(invoke) = stmt.invoke() else {
            continue;
        };
        if !methods.contains(&invoke.method.as_str()) {
            continue;
        }
        let port = match invoke.base.as_ref().and_then(|b| resolver.resolve(b, index)) {
            Some(ModelRef::Port(port)) => port,
            _ if ctx.scene.is_subtype(&invoke.class, "IOPort") => {
                return Err(SpecializeError::unresolvable(
                    Location::method(class, method).at(index),
                    format!("receiver of `{}` is not a known port", invoke.method),
                ));
            }
            _ => continue,
        };
        let channel = match invoke.method.as_str() {
            "get" | "send" | "hasToken" | "hasRoom" => invoke
                .args
                .first()
                .and_then(|a| resolver.constant(a, index))
                .and_then(|c| match c {
                    Const::Int(n) => usize::try_from(n).ok(),
                    _ => None,
                }),
            _ => Some(0),
        };
        sites.push(Site {
            index,
            port,
            method: invoke.method.clone(),
            channel,
        });
    }
    Ok(sites)
}

fn fold_introspection(
    ctx: &Context<'_>,
    class: &str,
    method: &str,
    body: &mut Body,
) -> Result<usize> {
    let sites = collect_sites(ctx, class, method, body, INTROSPECTION)?;
    for site in sites.iter().rev() {
        let port = ctx.model.port(site.port);
        let value = match site.method.as_str() {
            "getWidth" => {
                let width = ctx.model.port_width(site.port);
                Const::Int(i32::try_from(width).map_err(|_| {
                    SpecializeError::unsupported(
                        Location::component(ctx.model.port_full_name(site.port)),
                        "port width out of range",
                    )
                })?)
            }
            "isInput" => Const::Bool(port.input),
            "isOutput" => Const::Bool(port.output),
            _ => Const::Bool(port.multiport),
        };
        let replacement = match body.stmts[site.index].def() {
            Some(def) => vec![Stmt::assign_local(def, Expr::constant(value))],
            None => Vec::new(),
        };
        body.splice(site.index, replacement);
    }
    Ok(sites.len())
}

fn inline_transfers(ctx: &Context<'_>, class: &str, method: &str, body: &mut Body) -> Result<usize> {
    let mut sites = collect_sites(ctx, class, method, body, TRANSFER)?;
    if sites.iter().any(|s| s.channel.is_none()) {
        let unrolled = unroll_loops(body, ctx.config.max_unroll_trip_count)?;
        debug!("{}.{}: unrolled {} loops to fix channels", class, method, unrolled);
        if unrolled > 0 {
            sites = collect_sites(ctx, class, method, body, TRANSFER)?;
        }
    }
    if let Some(site) = sites.iter().find(|s| s.channel.is_none()) {
        return Err(SpecializeError::unresolvable(
            Location::method(class, method).at(site.index),
            format!(
                "channel of `{}` on {} is not constant",
                site.method,
                ctx.model.port_full_name(site.port)
            ),
        ));
    }

    for site in sites.iter().rev() {
        let stmt = body.stmts[site.index].clone();
        let Some(invoke) = stmt.invoke() else {
            continue;
        };
        let location = Location::method(class, method).at(site.index);
        let mut b = BodyBuilder::new(body);
        rewrite_transfer(ctx, &mut b, site, stmt.def(), invoke, location)?;
        let stmts = b.finish();
        debug!(
            "{}.{}: {} on {} became {} statements",
            class,
            method,
            site.method,
            ctx.model.port_full_name(site.port),
            stmts.len()
        );
        body.splice(site.index, stmts);
    }
    Ok(sites.len())
}

fn rewrite_transfer(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    site: &Site,
    def: Option<&str>,
    invoke: &InvokeExpr,
    location: Location,
) -> Result<()> {
    let model = ctx.model;
    let width = model.port_width(site.port);
    let channel = site.channel.unwrap_or_default();
    let name = model.port_full_name(site.port);

    if width == 0 {
        if site.method != "broadcast" {
            b.throw_error(&format!("{}: `{}` on a port of width zero", name, site.method));
        }
        return Ok(());
    }

    match site.method.as_str() {
        "hasToken" | "hasRoom" => {
            if channel >= width {
                b.throw_error(&format!("{}: no channel {}", name, channel));
            } else if let Some(def) = def {
                b.assign(def, Expr::constant(Const::Bool(true)));
            }
        }
        "get" => {
            if channel >= width {
                b.throw_error(&format!("{}: no channel {}", name, channel));
                return Ok(());
            }
            let value = read_buffer(ctx, b, site.port, channel, &location)?;
            if let Some(def) = def {
                b.assign(def, Expr::local(value));
            }
        }
        "send" => {
            // Sends past the last channel are dropped.
            if channel < width {
                let token = invoke.args.get(1).cloned().unwrap_or_else(Operand::null);
                write_buffers(ctx, b, site.port, channel, token, &location)?;
            }
        }
        _ => {
            let token = invoke.args.first().cloned().unwrap_or_else(Operand::null);
            for channel in 0..width {
                write_buffers(ctx, b, site.port, channel, token.clone(), &location)?;
            }
        }
    }
    Ok(())
}

/// The relation carrying port channel `channel`, with the channel number on
/// that relation. Channels are numbered across links in link order.
fn segment(ctx: &Context<'_>, port: PortId, channel: usize) -> Option<(RelationId, usize)> {
    let mut offset = 0;
    for relation in &ctx.model.port(port).links {
        let width = ctx.model.relation(*relation).width;
        if channel < offset + width {
            return Some((*relation, channel - offset));
        }
        offset += width;
    }
    None
}

fn buffer_size(ctx: &Context<'_>, net: RelationId, location: &Location) -> Result<usize> {
    ctx.buffer_size(net).ok_or_else(|| {
        SpecializeError::invariant(
            location.clone(),
            format!("no buffer size for {}", ctx.model.relation_full_name(net)),
        )
    })
}

/// Current slot of a port channel in a buffer of `size` slots, advancing
/// the port's index when there is more than one slot.
fn slot(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    port: PortId,
    channel: usize,
    size: usize,
    location: &Location,
) -> Result<(Operand, Option<Stmt>)> {
    if size <= 1 {
        return Ok((Operand::int(0), None));
    }
    let field = ctx.index_field(port).cloned().ok_or_else(|| {
        SpecializeError::invariant(
            location.clone(),
            format!("{} has no index field", ctx.model.port_full_name(port)),
        )
    })?;
    let channel = to_i32(channel, location)?;
    let size = to_i32(size, location)?;
    let indices = b.get_static(field, Type::array_of(Type::Int));
    let current = b.eval(
        "$i",
        Type::Int,
        Expr::ArrayRead(Operand::local(&indices), Operand::int(channel)),
    );
    let next = b.eval(
        "$i",
        Type::Int,
        Expr::Binary(BinOp::Add, Operand::local(&current), Operand::int(1)),
    );
    let wrapped = b.eval(
        "$i",
        Type::Int,
        Expr::Binary(BinOp::Rem, Operand::local(next), Operand::int(size)),
    );
    let store = Stmt::Assign(
        Place::ArrayElem(Operand::local(indices), Operand::int(channel)),
        Expr::local(wrapped),
    );
    Ok((Operand::local(current), Some(store)))
}

fn read_buffer(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    port: PortId,
    channel: usize,
    location: &Location,
) -> Result<String> {
    let (relation, local) = segment(ctx, port, channel).ok_or_else(|| {
        SpecializeError::invariant(location.clone(), "channel outside every link")
    })?;
    let net = ctx.net_key(relation);
    let key = BufferKey {
        net,
        channel: local,
        value_type: ctx.model.port(port).value_type.clone(),
    };
    let field = ctx.buffer(&key).cloned().ok_or_else(|| {
        SpecializeError::invariant(
            location.clone(),
            format!(
                "no buffer for channel {} of {} carrying {}",
                local,
                ctx.model.relation_full_name(net),
                key.value_type
            ),
        )
    })?;
    let size = buffer_size(ctx, net, location)?;
    let (index, advance) = slot(ctx, b, port, channel, size, location)?;
    let buffer = b.get_static(field, Type::array_of(token_type()));
    let value = b.eval("$v", token_type(), Expr::ArrayRead(Operand::local(buffer), index));
    if let Some(store) = advance {
        b.push(store);
    }
    Ok(value)
}

fn write_buffers(
    ctx: &Context<'_>,
    b: &mut BodyBuilder<'_>,
    port: PortId,
    channel: usize,
    token: Operand,
    location: &Location,
) -> Result<()> {
    let Some((relation, local)) = segment(ctx, port, channel) else {
        return Ok(());
    };
    let net = ctx.net_key(relation);
    let buffers: Vec<(BufferKey, FieldRef)> = ctx
        .buffers_for(net, local)
        .into_iter()
        .map(|(k, f)| (k.clone(), f.clone()))
        .collect();
    if buffers.is_empty() {
        // Nobody reads this channel.
        return Ok(());
    }
    let size = buffer_size(ctx, net, location)?;
    let (index, advance) = slot(ctx, b, port, channel, size, location)?;
    let sent_type = &ctx.model.port(port).value_type;
    for (key, field) in buffers {
        let value = if key.value_type != *sent_type && key.value_type.is_concrete() {
            Operand::local(b.call(
                "$c",
                InvokeExpr::static_call(
                    "Tokens",
                    "convert",
                    vec![token.clone(), Operand::str(key.value_type.to_string())],
                    token_type(),
                ),
            ))
        } else {
            token.clone()
        };
        let buffer = b.get_static(field, Type::array_of(token_type()));
        b.push(Stmt::Assign(
            Place::ArrayElem(Operand::local(buffer), index.clone()),
            Expr::Use(value),
        ));
    }
    if let Some(store) = advance {
        b.push(store);
    }
    Ok(())
}

fn to_i32(value: usize, location: &Location) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| SpecializeError::unsupported(location.clone(), "index out of range"))
}
