use super::scene::Scene;
use rustc_hash::{FxHashMap, FxHashSet};

/// Class hierarchy snapshot used for dispatch queries.
///
/// Built from a [`Scene`] and stamped with the scene generation it was
/// built at, so holders can tell when it no longer describes the scene.
#[derive(Debug, Default)]
pub struct ClassHierarchy {
    /// class -> superclass (None for roots)
    parent_of: FxHashMap<String, Option<String>>,
    /// superclass -> direct subclasses, in registration order
    children_of: FxHashMap<String, Vec<String>>,
    /// (class, method) pairs declared directly on the class
    declares_method: FxHashSet<(String, String)>,
    interfaces_of: FxHashMap<String, Vec<String>>,
    generation: u64,
}

impl ClassHierarchy {
    pub fn build(scene: &Scene) -> Self {
        let mut hierarchy = ClassHierarchy {
            generation: scene.generation(),
            ..Default::default()
        };
        for class in scene.classes() {
            hierarchy
                .parent_of
                .insert(class.name.clone(), class.superclass.clone());
            if let Some(parent) = &class.superclass {
                hierarchy
                    .children_of
                    .entry(parent.clone())
                    .or_default()
                    .push(class.name.clone());
            }
            if !class.interfaces.is_empty() {
                hierarchy
                    .interfaces_of
                    .insert(class.name.clone(), class.interfaces.clone());
            }
            for method in class.methods.keys() {
                hierarchy
                    .declares_method
                    .insert((class.name.clone(), method.clone()));
            }
        }
        hierarchy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_known_class(&self, class: &str) -> bool {
        self.parent_of.contains_key(class)
    }

    pub fn superclass(&self, class: &str) -> Option<&str> {
        self.parent_of.get(class).and_then(|p| p.as_deref())
    }

    pub fn subclasses(&self, class: &str) -> &[String] {
        self.children_of
            .get(class)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn declares(&self, class: &str, method: &str) -> bool {
        self.declares_method
            .contains(&(class.to_string(), method.to_string()))
    }

    /// `class` and its superclasses, nearest first.
    pub fn ancestors(&self, class: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.parent_of.get_key_value(class).map(|(k, _)| k.as_str());
        while let Some(name) = current {
            if chain.contains(&name) {
                break;
            }
            chain.push(name);
            current = self.superclass(name);
        }
        chain
    }

    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class).iter().any(|name| {
            *name == ancestor
                || self
                    .interfaces_of
                    .get(*name)
                    .map(|is| is.iter().any(|i| self.is_subclass_of(i, ancestor)))
                    .unwrap_or(false)
        })
    }

    /// The class whose declaration a call of `method` on an object of
    /// exactly `class` runs.
    pub fn dispatch_target(&self, class: &str, method: &str) -> Option<&str> {
        self.ancestors(class)
            .into_iter()
            .find(|name| self.declares(name, method))
    }

    /// Recursively check if any descendant class declares (overrides) the method
    pub fn any_descendant_overrides(&self, class: &str, method: &str) -> bool {
        self.subclasses(class)
            .iter()
            .any(|child| self.declares(child, method) || self.any_descendant_overrides(child, method))
    }

    /// A virtual call through a receiver of static type `class` has a single
    /// possible target when no descendant overrides it.
    pub fn can_devirtualize(&self, class: &str, method: &str) -> bool {
        !self.any_descendant_overrides(class, method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Class, ClassKind, Method, Type};

    fn scene() -> Scene {
        let mut scene = Scene::new();
        let mut root = Class::new("Root", None, ClassKind::Library);
        root.add_method(Method::new("fire", Vec::new(), Type::Void, false, "Root"))
            .unwrap();
        scene.add_class(root).unwrap();
        let mut mid = Class::new("Mid", Some("Root"), ClassKind::Library);
        mid.add_method(Method::new("fire", Vec::new(), Type::Void, false, "Mid"))
            .unwrap();
        scene.add_class(mid).unwrap();
        scene
            .add_class(Class::new("Leaf", Some("Mid"), ClassKind::Application))
            .unwrap();
        scene
    }

    #[test]
    fn test_dispatch_target_walks_up() {
        let hierarchy = ClassHierarchy::build(&scene());
        assert_eq!(hierarchy.dispatch_target("Leaf", "fire"), Some("Mid"));
        assert_eq!(hierarchy.ancestors("Leaf"), vec!["Leaf", "Mid", "Root"]);
        assert!(hierarchy.is_subclass_of("Leaf", "Root"));
    }

    #[test]
    fn test_overrides_block_devirtualization() {
        let hierarchy = ClassHierarchy::build(&scene());
        assert!(!hierarchy.can_devirtualize("Root", "fire"));
        assert!(hierarchy.can_devirtualize("Mid", "fire"));
        assert!(hierarchy.can_devirtualize("Root", "wrapup"));
    }
}
