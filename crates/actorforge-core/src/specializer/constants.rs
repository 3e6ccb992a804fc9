//! Which attributes may change while the model runs.
//!
//! State-machine actions are the only writers of attribute values. Their
//! destinations seed the non-constant set, which then spreads to every
//! attribute whose expression mentions a non-constant one.

use crate::config::ConstantPolicy;
use crate::errors::{Location, Result, SpecializeError};
use crate::expr::{ExpressionParser, PSEUDO_VARIABLES};
use crate::model::{AttributeId, AttributeKind, ComponentId, Model};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

#[derive(Debug, Default, Clone)]
pub struct ConstantAttributes {
    non_constant: FxHashSet<AttributeId>,
    seeded: FxHashSet<AttributeId>,
}

impl ConstantAttributes {
    pub fn analyze(
        model: &Model,
        parser: &dyn ExpressionParser,
        policy: ConstantPolicy,
    ) -> Result<Self> {
        let mut seeded = FxHashSet::default();
        for (id, _) in model.components() {
            let Some(spec) = model.fsm(id) else {
                continue;
            };
            for transition in &spec.transitions {
                for action in transition
                    .choice_actions
                    .iter()
                    .chain(&transition.commit_actions)
                {
                    if is_output_port(model, id, &action.destination) {
                        continue;
                    }
                    let target = action_target(model, id, &action.destination).ok_or_else(|| {
                        SpecializeError::unresolvable(
                            Location::component(model.full_name(id)),
                            format!(
                                "action destination `{}` is neither an output port nor a parameter",
                                action.destination
                            ),
                        )
                    })?;
                    seeded.insert(target);
                }
            }
        }

        let mut non_constant = seeded.clone();
        let mut dependents: FxHashMap<AttributeId, Vec<AttributeId>> = FxHashMap::default();
        for (id, attribute) in model.attributes() {
            if attribute.kind != AttributeKind::Parameter {
                continue;
            }
            let Some(text) = attribute.expression.as_deref() else {
                continue;
            };
            if attribute.value.is_none() {
                debug!(
                    "{} has no static value and is non-constant",
                    model.attribute_full_name(id)
                );
                non_constant.insert(id);
            }
            let parsed = parser.parse(text)?;
            for name in parser.free_variables(&parsed) {
                if PSEUDO_VARIABLES.contains(&name.as_str()) {
                    non_constant.insert(id);
                    continue;
                }
                match model.lookup_in_scope(id, &name) {
                    Some(dependency) => dependents.entry(dependency).or_default().push(id),
                    None if policy == ConstantPolicy::Conservative => {
                        debug!(
                            "{} mentions unresolvable `{}` and is non-constant",
                            model.attribute_full_name(id),
                            name
                        );
                        non_constant.insert(id);
                    }
                    None => {}
                }
            }
        }

        let mut worklist: Vec<AttributeId> = non_constant.iter().copied().collect();
        while let Some(id) = worklist.pop() {
            for dependent in dependents.get(&id).into_iter().flatten() {
                if non_constant.insert(*dependent) {
                    worklist.push(*dependent);
                }
            }
        }

        Ok(ConstantAttributes {
            non_constant,
            seeded,
        })
    }

    pub fn is_constant(&self, id: AttributeId) -> bool {
        !self.non_constant.contains(&id)
    }

    /// True if a state-machine action writes the attribute directly.
    pub fn is_seeded(&self, id: AttributeId) -> bool {
        self.seeded.contains(&id)
    }

    pub fn non_constant_count(&self) -> usize {
        self.non_constant.len()
    }
}

fn is_output_port(model: &Model, fsm: ComponentId, name: &str) -> bool {
    model
        .port_by_name(fsm, name)
        .map(|p| model.port(p).output)
        .unwrap_or(false)
}

/// Parameter written by a state-machine action: a path relative to the
/// state machine, then to its container, then any visible identifier.
pub fn action_target(model: &Model, fsm: ComponentId, destination: &str) -> Option<AttributeId> {
    model
        .resolve_attribute_path(fsm, destination)
        .or_else(|| {
            model
                .component(fsm)
                .parent
                .and_then(|parent| model.resolve_attribute_path(parent, destination))
        })
        .or_else(|| model.resolve_identifier(fsm, destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ValueType;
    use crate::expr::DefaultExpressionParser;
    use crate::model::{ModelBuilder, PortSpec, TransitionDesc};

    fn analyze(model: &Model, policy: ConstantPolicy) -> ConstantAttributes {
        ConstantAttributes::analyze(model, &DefaultExpressionParser, policy).unwrap()
    }

    #[test]
    fn test_plain_parameters_are_constant() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let a = builder.add_parameter(top, "a", "2").unwrap();
        let b = builder.add_parameter(top, "b", "a * 3").unwrap();
        let model = builder.build().unwrap();
        let constants = analyze(&model, ConstantPolicy::Conservative);
        assert!(constants.is_constant(a));
        assert!(constants.is_constant(b));
        assert_eq!(constants.non_constant_count(), 0);
    }

    #[test]
    fn test_action_destinations_spread_to_dependents() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let gain = builder.add_parameter(top, "gain", "1").unwrap();
        let doubled = builder.add_parameter(top, "doubled", "gain * 2").unwrap();
        let other = builder.add_parameter(top, "other", "5").unwrap();
        let fsm = builder.add_state_machine(top, "control").unwrap();
        builder
            .add_port(fsm, "out", PortSpec::output(ValueType::Int))
            .unwrap();
        builder.add_state(fsm, "idle", None).unwrap();
        builder.set_initial_state(fsm, "idle").unwrap();
        builder
            .add_transition(
                fsm,
                TransitionDesc::new("idle", "idle", "true")
                    .choice("out", "1")
                    .commit("gain", "gain + 1"),
            )
            .unwrap();
        let model = builder.build().unwrap();

        let constants = analyze(&model, ConstantPolicy::Conservative);
        assert!(!constants.is_constant(gain));
        assert!(constants.is_seeded(gain));
        assert!(!constants.is_constant(doubled));
        assert!(!constants.is_seeded(doubled));
        assert!(constants.is_constant(other));
    }

    #[test]
    fn test_unknown_destination_is_unresolvable() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let fsm = builder.add_state_machine(top, "control").unwrap();
        builder.add_state(fsm, "idle", None).unwrap();
        builder
            .add_transition(
                fsm,
                TransitionDesc::new("idle", "idle", "true").commit("missing", "1"),
            )
            .unwrap();
        let model = builder.build().unwrap();
        let err = ConstantAttributes::analyze(
            &model,
            &DefaultExpressionParser,
            ConstantPolicy::Conservative,
        )
        .unwrap_err();
        assert!(matches!(err, SpecializeError::Unresolvable { .. }));
    }

    #[test]
    fn test_policy_decides_unresolvable_identifiers() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let p = builder.add_parameter(top, "p", "mystery + 1").unwrap();
        let model = builder.build().unwrap();
        assert!(!analyze(&model, ConstantPolicy::Conservative).is_constant(p));
        // Still non-constant: there is no static value to bake in.
        assert!(!analyze(&model, ConstantPolicy::Permissive).is_constant(p));
    }

    #[test]
    fn test_permissive_keeps_short_circuited_unknowns_constant() {
        let mut builder = ModelBuilder::new("top");
        let top = builder.top();
        let p = builder.add_parameter(top, "p", "true || mystery").unwrap();
        let q = builder.add_parameter(top, "q", "p && true").unwrap();
        let model = builder.build().unwrap();
        assert!(model.attribute(p).value.is_some());

        let conservative = analyze(&model, ConstantPolicy::Conservative);
        assert!(!conservative.is_constant(p));
        assert!(!conservative.is_constant(q));

        let permissive = analyze(&model, ConstantPolicy::Permissive);
        assert!(permissive.is_constant(p));
        assert!(permissive.is_constant(q));
        assert_eq!(permissive.non_constant_count(), 0);
    }
}
