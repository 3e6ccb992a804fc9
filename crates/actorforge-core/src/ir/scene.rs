use super::hierarchy::ClassHierarchy;
use super::tags::ValueTag;
use super::types::{Stmt, Type};
use super::IrError;
use crate::data::ValueType;
use id_arena::{Arena, Id};
use indexmap::IndexMap;
use std::sync::Arc;

pub type ClassId = Id<Class>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Framework code; never emitted, may be native.
    Library,
    /// Generated code.
    Application,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    value_tag: Option<ValueTag>,
    type_tag: Option<ValueType>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Field {
            name: name.into(),
            ty,
            is_static: false,
            value_tag: None,
            type_tag: None,
        }
    }

    pub fn new_static(name: impl Into<String>, ty: Type) -> Self {
        Field {
            is_static: true,
            ..Field::new(name, ty)
        }
    }

    pub fn value_tag(&self) -> Option<&ValueTag> {
        self.value_tag.as_ref()
    }

    pub fn type_tag(&self) -> Option<&ValueType> {
        self.type_tag.as_ref()
    }

    /// Value tags are set once; setting the same tag again is a no-op.
    pub fn set_value_tag(&mut self, tag: ValueTag) -> Result<(), IrError> {
        match &self.value_tag {
            Some(existing) if *existing != tag => Err(IrError::TagConflict {
                field: self.name.clone(),
                message: format!("already tagged {:?}, cannot retag {:?}", existing, tag),
            }),
            _ => {
                self.value_tag = Some(tag);
                Ok(())
            }
        }
    }

    pub fn set_type_tag(&mut self, ty: ValueType) -> Result<(), IrError> {
        match &self.type_tag {
            Some(existing) if *existing != ty => Err(IrError::TagConflict {
                field: self.name.clone(),
                message: format!("type already tagged {}, cannot retag {}", existing, ty),
            }),
            _ => {
                self.type_tag = Some(ty);
                Ok(())
            }
        }
    }

    /// Replace the type tag with one at or below it in the lattice.
    pub fn specialize_type_tag(&mut self, ty: ValueType) -> Result<(), IrError> {
        match &self.type_tag {
            Some(existing) if !ty.leq(existing) => Err(IrError::TagConflict {
                field: self.name.clone(),
                message: format!("{} is not more specific than {}", ty, existing),
            }),
            _ => {
                self.type_tag = Some(ty);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Body {
    pub locals: IndexMap<String, Type>,
    pub stmts: Vec<Stmt>,
    next_id: usize,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a fresh local named `{prefix}{n}`.
    pub fn new_local(&mut self, prefix: &str, ty: Type) -> String {
        loop {
            let name = format!("{}{}", prefix, self.next_id);
            self.next_id += 1;
            if !self.locals.contains_key(&name) {
                self.locals.insert(name.clone(), ty);
                return name;
            }
        }
    }

    pub fn new_label(&mut self) -> String {
        let labels: Vec<&str> = self
            .stmts
            .iter()
            .filter_map(|s| match s {
                Stmt::Label(l) => Some(l.as_str()),
                _ => None,
            })
            .collect();
        loop {
            let name = format!("label{}", self.next_id);
            self.next_id += 1;
            if !labels.contains(&name.as_str()) {
                return name;
            }
        }
    }

    pub fn declare(&mut self, name: impl Into<String>, ty: Type) {
        self.locals.insert(name.into(), ty);
    }

    pub fn local_type(&self, name: &str) -> Option<&Type> {
        self.locals.get(name)
    }

    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.stmts
            .iter()
            .position(|s| matches!(s, Stmt::Label(l) if l == label))
    }

    /// Replace statement `index` with `replacement`.
    pub fn splice(&mut self, index: usize, replacement: Vec<Stmt>) {
        self.stmts.splice(index..=index, replacement);
    }
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub is_static: bool,
    /// Implemented by the interpreter rather than by a body.
    pub native: bool,
    pub body: Option<Body>,
}

impl Method {
    /// A method with an empty body whose locals already hold `this` (for
    /// instance methods) and the parameters.
    pub fn new(
        name: impl Into<String>,
        params: Vec<(String, Type)>,
        ret: Type,
        is_static: bool,
        owner: &str,
    ) -> Self {
        let mut body = Body::new();
        if !is_static {
            body.declare("this", Type::object(owner));
        }
        for (param, ty) in &params {
            body.declare(param.clone(), ty.clone());
        }
        Method {
            name: name.into(),
            params,
            ret,
            is_static,
            native: false,
            body: Some(body),
        }
    }

    pub fn native(
        name: impl Into<String>,
        params: Vec<(String, Type)>,
        ret: Type,
        is_static: bool,
    ) -> Self {
        Method {
            name: name.into(),
            params,
            ret,
            is_static,
            native: true,
            body: None,
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub kind: ClassKind,
    pub is_interface: bool,
    pub fields: IndexMap<String, Field>,
    pub methods: IndexMap<String, Method>,
}

impl Class {
    pub fn new(name: impl Into<String>, superclass: Option<&str>, kind: ClassKind) -> Self {
        Class {
            name: name.into(),
            superclass: superclass.map(str::to_string),
            interfaces: Vec::new(),
            kind,
            is_interface: false,
            fields: IndexMap::new(),
            methods: IndexMap::new(),
        }
    }

    pub fn is_application(&self) -> bool {
        self.kind == ClassKind::Application
    }

    pub fn add_field(&mut self, field: Field) -> Result<&mut Field, IrError> {
        if self.fields.contains_key(&field.name) {
            return Err(IrError::DuplicateField {
                class: self.name.clone(),
                field: field.name,
            });
        }
        let name = field.name.clone();
        Ok(self.fields.entry(name).or_insert(field))
    }

    pub fn add_method(&mut self, method: Method) -> Result<&mut Method, IrError> {
        if self.methods.contains_key(&method.name) {
            return Err(IrError::DuplicateMethod {
                class: self.name.clone(),
                method: method.name,
            });
        }
        let name = method.name.clone();
        Ok(self.methods.entry(name).or_insert(method))
    }

    /// Add or replace a method.
    pub fn set_method(&mut self, method: Method) {
        self.methods.insert(method.name.clone(), method);
    }
}

/// Every class of one specialization run.
///
/// Adding or removing classes and changing superclasses bumps the
/// generation; a cached [`ClassHierarchy`] built for an older generation is
/// rebuilt by [`Scene::hierarchy`] and rejected by
/// [`Scene::cached_hierarchy`].
#[derive(Debug, Default)]
pub struct Scene {
    classes: Arena<Class>,
    by_name: IndexMap<String, ClassId>,
    generation: u64,
    hierarchy: Option<Arc<ClassHierarchy>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn add_class(&mut self, class: Class) -> Result<ClassId, IrError> {
        if self.by_name.contains_key(&class.name) {
            return Err(IrError::DuplicateClass(class.name));
        }
        let name = class.name.clone();
        let id = self.classes.alloc(class);
        self.by_name.insert(name, id);
        self.invalidate();
        Ok(id)
    }

    pub fn remove_class(&mut self, name: &str) -> bool {
        let removed = self.by_name.shift_remove(name).is_some();
        if removed {
            self.invalidate();
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn class(&self, name: &str) -> Option<&Class> {
        self.by_name.get(name).map(|id| &self.classes[*id])
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut Class> {
        match self.by_name.get(name) {
            Some(id) => Some(&mut self.classes[*id]),
            None => None,
        }
    }

    pub fn expect_class(&self, name: &str) -> Result<&Class, IrError> {
        self.class(name)
            .ok_or_else(|| IrError::UnknownClass(name.to_string()))
    }

    pub fn expect_class_mut(&mut self, name: &str) -> Result<&mut Class, IrError> {
        self.class_mut(name)
            .ok_or_else(|| IrError::UnknownClass(name.to_string()))
    }

    /// Classes in registration order.
    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.by_name.values().map(move |id| &self.classes[*id])
    }

    pub fn application_classes(&self) -> Vec<String> {
        self.classes()
            .filter(|c| c.is_application())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn set_superclass(&mut self, class: &str, superclass: Option<&str>) -> Result<(), IrError> {
        self.expect_class_mut(class)?.superclass = superclass.map(str::to_string);
        self.invalidate();
        Ok(())
    }

    /// The hierarchy for the current generation, rebuilt if stale.
    pub fn hierarchy(&mut self) -> Arc<ClassHierarchy> {
        match &self.hierarchy {
            Some(h) if h.generation() == self.generation => Arc::clone(h),
            _ => {
                let built = Arc::new(ClassHierarchy::build(self));
                self.hierarchy = Some(Arc::clone(&built));
                built
            }
        }
    }

    /// The cached hierarchy, failing if classes changed since it was built.
    pub fn cached_hierarchy(&self) -> Result<Arc<ClassHierarchy>, IrError> {
        match &self.hierarchy {
            Some(h) if h.generation() == self.generation => Ok(Arc::clone(h)),
            Some(h) => Err(IrError::StaleHierarchy {
                built: h.generation(),
                current: self.generation,
            }),
            None => Err(IrError::StaleHierarchy {
                built: 0,
                current: self.generation,
            }),
        }
    }

    /// Superclass chain starting with `class` itself.
    pub fn ancestors(&self, class: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(class.to_string());
        while let Some(name) = current {
            if chain.contains(&name) {
                break;
            }
            current = self.class(&name).and_then(|c| c.superclass.clone());
            chain.push(name);
        }
        chain
    }

    /// True if `class` is `ancestor` or derives from it (interfaces included).
    pub fn is_subtype(&self, class: &str, ancestor: &str) -> bool {
        self.ancestors(class).iter().any(|name| {
            name == ancestor
                || self
                    .class(name)
                    .map(|c| c.interfaces.iter().any(|i| self.is_subtype(i, ancestor)))
                    .unwrap_or(false)
        })
    }

    /// Nearest class both `a` and `b` derive from, following superclasses
    /// only.
    pub fn common_superclass(&self, a: &str, b: &str) -> Option<String> {
        self.ancestors(a)
            .into_iter()
            .find(|candidate| self.ancestors(b).contains(candidate))
    }

    /// Find the declaration a call of `method` on `class` dispatches to.
    pub fn resolve_method(&self, class: &str, method: &str) -> Option<(&Class, &Method)> {
        self.ancestors(class).iter().find_map(|name| {
            let owner = self.class(name)?;
            owner.methods.get(method).map(|m| (owner, m))
        })
    }

    pub fn resolve_field(&self, class: &str, field: &str) -> Option<(&Class, &Field)> {
        self.ancestors(class).iter().find_map(|name| {
            let owner = self.class(name)?;
            owner.fields.get(field).map(|f| (owner, f))
        })
    }

    pub fn field(&self, class: &str, field: &str) -> Option<&Field> {
        self.class(class).and_then(|c| c.fields.get(field))
    }

    pub fn field_mut(&mut self, class: &str, field: &str) -> Option<&mut Field> {
        self.class_mut(class).and_then(|c| c.fields.get_mut(field))
    }

    pub fn method(&self, class: &str, method: &str) -> Option<&Method> {
        self.class(class).and_then(|c| c.methods.get(method))
    }

    pub fn method_mut(&mut self, class: &str, method: &str) -> Option<&mut Method> {
        self.class_mut(class).and_then(|c| c.methods.get_mut(method))
    }

    /// Every `(class, method)` with a body in application classes.
    pub fn application_methods(&self) -> Vec<(String, String)> {
        self.classes()
            .filter(|c| c.is_application())
            .flat_map(|c| {
                c.methods
                    .values()
                    .filter(|m| m.body.is_some())
                    .map(move |m| (c.name.clone(), m.name.clone()))
            })
            .collect()
    }

    /// Detach a body for editing while the rest of the scene stays
    /// readable. Pair with [`Scene::put_body`].
    pub fn take_body(&mut self, class: &str, method: &str) -> Result<Body, IrError> {
        let m = self
            .method_mut(class, method)
            .ok_or_else(|| IrError::UnknownMethod {
                class: class.to_string(),
                method: method.to_string(),
            })?;
        m.body.take().ok_or_else(|| IrError::MissingBody {
            class: class.to_string(),
            method: method.to_string(),
        })
    }

    pub fn put_body(&mut self, class: &str, method: &str, body: Body) -> Result<(), IrError> {
        let m = self
            .method_mut(class, method)
            .ok_or_else(|| IrError::UnknownMethod {
                class: class.to_string(),
                method: method.to_string(),
            })?;
        m.body = Some(body);
        Ok(())
    }

    /// Edit a body with read access to the rest of the scene.
    pub fn with_body<R>(
        &mut self,
        class: &str,
        method: &str,
        f: impl FnOnce(&Scene, &mut Body) -> R,
    ) -> Result<R, IrError> {
        let mut body = self.take_body(class, method)?;
        let result = f(self, &mut body);
        self.put_body(class, method, body)?;
        Ok(result)
    }
}
