//! Firing order of the children of a composite.

use crate::errors::{Location, Result, SpecializeError};
use crate::model::{ComponentId, Model};
use rustc_hash::FxHashMap;

/// Children of `composite` in data-dependency order, ties broken by
/// declaration order. Refinements are fired by their state machine and
/// are left out; their connections count as the state machine's.
pub fn schedule(model: &Model, composite: ComponentId) -> Result<Vec<ComponentId>> {
    let children = model.children(composite);
    let mut owner_of: FxHashMap<ComponentId, ComponentId> = FxHashMap::default();
    for child in children {
        owner_of.insert(*child, *child);
        if let Some(spec) = model.fsm(*child) {
            for refinement in spec.states.iter().filter_map(|s| s.refinement) {
                owner_of.insert(refinement, *child);
            }
        }
    }
    let nodes: Vec<ComponentId> = children
        .iter()
        .copied()
        .filter(|c| !model.is_refinement(*c))
        .collect();
    let position: FxHashMap<ComponentId, usize> =
        nodes.iter().enumerate().map(|(i, c)| (*c, i)).collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut in_degree = vec![0usize; nodes.len()];
    for relation in model.contained_relations(composite) {
        let ports = &model.relation(*relation).ports;
        for writer in ports {
            let writer = model.port(*writer);
            if !writer.output || writer.owner == composite {
                continue;
            }
            for reader in ports {
                let reader = model.port(*reader);
                if !reader.input || reader.owner == composite {
                    continue;
                }
                let (Some(from), Some(to)) = (
                    owner_of.get(&writer.owner).and_then(|o| position.get(o)),
                    owner_of.get(&reader.owner).and_then(|o| position.get(o)),
                ) else {
                    continue;
                };
                if from != to && !successors[*from].contains(to) {
                    successors[*from].push(*to);
                    in_degree[*to] += 1;
                }
            }
        }
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut done = vec![false; nodes.len()];
    while order.len() < nodes.len() {
        let next = (0..nodes.len()).find(|i| !done[*i] && in_degree[*i] == 0);
        let Some(next) = next else {
            let stuck: Vec<String> = (0..nodes.len())
                .filter(|i| !done[*i])
                .map(|i| model.component(nodes[i]).name.clone())
                .collect();
            return Err(SpecializeError::unsupported(
                Location::component(model.full_name(composite)),
                format!("dependency cycle among {}", stuck.join(", ")),
            ));
        };
        done[next] = true;
        order.push(nodes[next]);
        for successor in &successors[next] {
            in_degree[*successor] -= 1;
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specializer::test_support::model_from_yaml;
    use indoc::indoc;

    fn names(model: &Model, order: &[ComponentId]) -> Vec<String> {
        order.iter().map(|c| model.component(*c).name.clone()).collect()
    }

    #[test]
    fn test_readers_follow_writers() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: sink, class: Recorder }
              - { kind: atomic, name: scale, class: Scale }
              - { kind: atomic, name: ramp, class: Ramp }
            connections:
              - { from: ramp.output, to: scale.input, bufferSize: 1 }
              - { from: scale.output, to: sink.input, bufferSize: 1 }
        "});
        let order = schedule(&model, model.top()).unwrap();
        assert_eq!(names(&model, &order), vec!["ramp", "scale", "sink"]);
    }

    #[test]
    fn test_independent_children_keep_declaration_order() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: b, class: Discard }
              - { kind: atomic, name: a, class: Discard }
        "});
        let order = schedule(&model, model.top()).unwrap();
        assert_eq!(names(&model, &order), vec!["b", "a"]);
    }

    #[test]
    fn test_cycles_are_unsupported() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: a, class: Scale }
              - { kind: atomic, name: b, class: Scale }
            connections:
              - { from: a.output, to: b.input, bufferSize: 1 }
              - { from: b.output, to: a.input, bufferSize: 1 }
        "});
        let err = schedule(&model, model.top()).unwrap_err();
        assert!(matches!(err, SpecializeError::Unsupported { .. }));
    }

    #[test]
    fn test_refinements_are_not_scheduled() {
        let model = model_from_yaml(indoc! {"
            name: top
            entities:
              - { kind: atomic, name: work, class: Discard }
              - kind: fsm
                name: control
                initialState: run
                states:
                  - { name: run, refinement: work }
        "});
        let order = schedule(&model, model.top()).unwrap();
        assert_eq!(names(&model, &order), vec!["control"]);
    }
}
