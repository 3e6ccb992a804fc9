//! Library classes modelling the generic actor runtime.
//!
//! Most methods are native: the pipeline recognises them by name and either
//! folds them away or, for tokens, leaves them to the interpreter. Lifecycle
//! methods of the actor base classes have real (trivial) bodies so the call
//! inliner can flatten them.

use crate::ir::{
    BodyBuilder, Class, ClassKind, Cond, CondOp, Field, FieldRef, InvokeExpr, IrError, Method,
    Operand, Scene, Type,
};

/// Classes where instance-class folding stops.
pub const ROOT_CLASSES: &[&str] = &["Object", "TypedAtomicActor", "TypedCompositeActor"];

/// Generic base types with no meaning once a program is specialized.
pub const STRIPPED_TYPES: &[&str] = &[
    "Attribute",
    "Settable",
    "Relation",
    "Port",
    "Entity",
    "Manager",
    "InequalityTerm",
];

/// Library classes whose non-native methods may be inlined into generated
/// code.
pub const LIFECYCLE_CLASSES: &[&str] = &[
    "ComponentEntity",
    "AtomicActor",
    "TypedAtomicActor",
    "CompositeActor",
    "TypedCompositeActor",
];

pub const TOKEN_CLASSES: &[&str] = &[
    "Token",
    "ScalarToken",
    "BooleanToken",
    "UnsignedByteToken",
    "IntToken",
    "LongToken",
    "DoubleToken",
    "ComplexToken",
    "StringToken",
    "ArrayToken",
];

pub fn is_token_class(name: &str) -> bool {
    TOKEN_CLASSES.contains(&name)
}

/// Classes of objects that never change after construction, so an unused
/// instance can be dropped along with its constructor call.
pub fn is_immutable_class(name: &str) -> bool {
    is_token_class(name) || matches!(name, "PtParser" | "Type" | "BaseType")
}

pub(super) fn obj(class: &str) -> Type {
    Type::object(class)
}

pub(super) fn token() -> Type {
    obj("Token")
}

fn params(list: &[(&str, Type)]) -> Vec<(String, Type)> {
    list.iter()
        .map(|(name, ty)| (name.to_string(), ty.clone()))
        .collect()
}

pub(super) struct ClassDef {
    class: Class,
}

impl ClassDef {
    pub(super) fn new(name: &str, superclass: Option<&str>) -> Self {
        ClassDef {
            class: Class::new(name, superclass, ClassKind::Library),
        }
    }

    pub(super) fn interface(name: &str) -> Self {
        let mut def = ClassDef::new(name, None);
        def.class.is_interface = true;
        def
    }

    pub(super) fn implements(mut self, interface: &str) -> Self {
        self.class.interfaces.push(interface.to_string());
        self
    }

    pub(super) fn field(mut self, name: &str, ty: Type) -> Result<Self, IrError> {
        self.class.add_field(Field::new(name, ty))?;
        Ok(self)
    }

    pub(super) fn static_field(mut self, name: &str, ty: Type) -> Result<Self, IrError> {
        self.class.add_field(Field::new_static(name, ty))?;
        Ok(self)
    }

    pub(super) fn native(
        mut self,
        name: &str,
        args: &[(&str, Type)],
        ret: Type,
    ) -> Result<Self, IrError> {
        self.class
            .add_method(Method::native(name, params(args), ret, false))?;
        Ok(self)
    }

    pub(super) fn static_native(
        mut self,
        name: &str,
        args: &[(&str, Type)],
        ret: Type,
    ) -> Result<Self, IrError> {
        self.class
            .add_method(Method::native(name, params(args), ret, true))?;
        Ok(self)
    }

    /// A method whose body is built by `build`.
    pub(super) fn method(
        mut self,
        name: &str,
        args: &[(&str, Type)],
        ret: Type,
        build: impl FnOnce(&mut BodyBuilder<'_>),
    ) -> Result<Self, IrError> {
        let owner = self.class.name.clone();
        let method = self
            .class
            .add_method(Method::new(name, params(args), ret, false, &owner))?;
        if let Some(body) = method.body.as_mut() {
            let mut b = BodyBuilder::new(body);
            build(&mut b);
            b.append();
        }
        Ok(self)
    }

    /// A constructor that only chains to `superclass` with the leading
    /// `forwarded` arguments.
    pub(super) fn constructor(
        self,
        args: &[(&str, Type)],
        superclass: &str,
        forwarded: usize,
    ) -> Result<Self, IrError> {
        let names: Vec<Operand> = args
            .iter()
            .take(forwarded)
            .map(|(name, _)| Operand::local(*name))
            .collect();
        let superclass = superclass.to_string();
        self.method("<init>", args, Type::Void, move |b| {
            b.invoke(InvokeExpr::special(
                Operand::local("this"),
                &superclass,
                "<init>",
                names,
            ));
            b.ret(None);
        })
    }

    pub(super) fn install(self, scene: &mut Scene) -> Result<(), IrError> {
        scene.add_class(self.class)?;
        Ok(())
    }
}

fn lifecycle(def: ClassDef) -> Result<ClassDef, IrError> {
    def.method("preinitialize", &[], Type::Void, |b| {
        b.ret(None);
    })?
    .method("initialize", &[], Type::Void, |b| {
        b.ret(None);
    })?
    .method("prefire", &[], Type::Boolean, |b| {
        b.ret(Some(Operand::bool(true)));
    })?
    .method("fire", &[], Type::Void, |b| {
        let end = b.label();
        let debugging = b.get_field(
            Operand::local("this"),
            FieldRef::new("NamedObj", "_debugging"),
            Type::Boolean,
        );
        b.if_goto(
            Cond::new(CondOp::Eq, Operand::local(debugging), Operand::bool(false)),
            &end,
        );
        b.invoke(InvokeExpr::virtual_call(
            Operand::local("this"),
            "NamedObj",
            "_debug",
            vec![Operand::str("Called fire()")],
            Type::Void,
        ));
        b.place_label(&end);
        b.ret(None);
    })?
    .method("postfire", &[], Type::Boolean, |b| {
        b.ret(Some(Operand::bool(true)));
    })?
    .method("wrapup", &[], Type::Void, |b| {
        b.ret(None);
    })
}

fn install_core(scene: &mut Scene) -> Result<(), IrError> {
    let string = obj("String");

    ClassDef::new("Object", None)
        .method("<init>", &[], Type::Void, |b| {
            b.ret(None);
        })?
        .install(scene)?;
    ClassDef::new("String", Some("Object")).install(scene)?;
    ClassDef::new("RuntimeException", Some("Object"))
        .field("message", string.clone())?
        .method("<init>", &[("message", string.clone())], Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                Operand::local("this"),
                "Object",
                "<init>",
                Vec::new(),
            ));
            b.set_field(
                Operand::local("this"),
                FieldRef::new("RuntimeException", "message"),
                Operand::local("message"),
            );
            b.ret(None);
        })?
        .install(scene)?;

    ClassDef::new("NamedObj", Some("Object"))
        .field("_debugging", Type::Boolean)?
        .constructor(&[], "Object", 0)?
        .native("getName", &[], string.clone())?
        .native("getFullName", &[], string.clone())?
        .native("setName", &[("name", string.clone())], Type::Void)?
        .native("getContainer", &[], obj("NamedObj"))?
        .native("getAttribute", &[("name", string.clone())], obj("Attribute"))?
        .native(
            "attachText",
            &[("name", string.clone()), ("text", string.clone())],
            Type::Void,
        )?
        .method("_debug", &[("message", string.clone())], Type::Void, |b| {
            b.ret(None);
        })?
        .native(
            "handleModelError",
            &[("context", obj("NamedObj")), ("message", string.clone())],
            Type::Void,
        )?
        .install(scene)?;

    ClassDef::interface("Settable")
        .native("getExpression", &[], string.clone())?
        .native("setExpression", &[("expression", string.clone())], Type::Void)?
        .install(scene)?;
    ClassDef::interface("InequalityTerm").install(scene)?;

    let container = [("container", obj("NamedObj")), ("name", string.clone())];
    ClassDef::new("Attribute", Some("NamedObj"))
        .constructor(&container, "NamedObj", 0)?
        .install(scene)?;
    ClassDef::new("Variable", Some("Attribute"))
        .implements("Settable")
        .constructor(&container, "Attribute", 2)?
        .native("getToken", &[], token())?
        .native("setToken", &[("token", token())], Type::Void)?
        .native("getExpression", &[], string.clone())?
        .native("setExpression", &[("expression", string.clone())], Type::Void)?
        .native("setTypeEquals", &[("type", obj("Type"))], Type::Void)?
        .native(
            "setTypeAtLeast",
            &[("term", obj("InequalityTerm"))],
            Type::Void,
        )?
        .install(scene)?;
    ClassDef::new("Parameter", Some("Variable"))
        .constructor(&container, "Variable", 2)?
        .install(scene)?;
    ClassDef::new("StringParameter", Some("Parameter"))
        .constructor(&container, "Parameter", 2)?
        .install(scene)?;

    ClassDef::new("Type", Some("Object")).install(scene)?;
    let mut base_type = ClassDef::new("BaseType", Some("Type"));
    for name in ["BOOLEAN", "UNSIGNED_BYTE", "INT", "LONG", "DOUBLE", "COMPLEX", "STRING", "GENERAL"]
    {
        base_type = base_type.static_field(name, obj("Type"))?;
    }
    base_type.install(scene)?;

    ClassDef::new("PtParser", Some("Object"))
        .constructor(&[], "Object", 0)?
        .native("evaluate", &[("expression", string.clone())], token())?
        .install(scene)?;
    Ok(())
}

fn install_graph(scene: &mut Scene) -> Result<(), IrError> {
    let string = obj("String");
    let entity_container = [("container", obj("CompositeEntity")), ("name", string.clone())];

    ClassDef::new("Port", Some("NamedObj"))
        .constructor(
            &[("container", obj("Entity")), ("name", string.clone())],
            "NamedObj",
            0,
        )?
        .native("link", &[("relation", obj("Relation"))], Type::Void)?
        .install(scene)?;
    ClassDef::new("IOPort", Some("Port"))
        .constructor(
            &[("container", obj("Entity")), ("name", string.clone())],
            "Port",
            2,
        )?
        .native("getWidth", &[], Type::Int)?
        .native("isInput", &[], Type::Boolean)?
        .native("isOutput", &[], Type::Boolean)?
        .native("isMultiport", &[], Type::Boolean)?
        .native("setInput", &[("flag", Type::Boolean)], Type::Void)?
        .native("setOutput", &[("flag", Type::Boolean)], Type::Void)?
        .native("setMultiport", &[("flag", Type::Boolean)], Type::Void)?
        .native("hasToken", &[("channel", Type::Int)], Type::Boolean)?
        .native("hasRoom", &[("channel", Type::Int)], Type::Boolean)?
        .native("get", &[("channel", Type::Int)], token())?
        .native("send", &[("channel", Type::Int), ("token", token())], Type::Void)?
        .native("broadcast", &[("token", token())], Type::Void)?
        .install(scene)?;
    ClassDef::new("TypedIOPort", Some("IOPort"))
        .method(
            "<init>",
            &[
                ("container", obj("Entity")),
                ("name", string.clone()),
                ("isInput", Type::Boolean),
                ("isOutput", Type::Boolean),
            ],
            Type::Void,
            |b| {
                b.invoke(InvokeExpr::special(
                    Operand::local("this"),
                    "IOPort",
                    "<init>",
                    vec![Operand::local("container"), Operand::local("name")],
                ));
                for (setter, flag) in [("setInput", "isInput"), ("setOutput", "isOutput")] {
                    b.invoke(InvokeExpr::virtual_call(
                        Operand::local("this"),
                        "IOPort",
                        setter,
                        vec![Operand::local(flag)],
                        Type::Void,
                    ));
                }
                b.ret(None);
            },
        )?
        .native("setTypeEquals", &[("type", obj("Type"))], Type::Void)?
        .native(
            "setTypeAtLeast",
            &[("term", obj("InequalityTerm"))],
            Type::Void,
        )?
        .install(scene)?;

    ClassDef::new("Relation", Some("NamedObj"))
        .constructor(&entity_container, "NamedObj", 0)?
        .install(scene)?;
    ClassDef::new("IORelation", Some("Relation"))
        .constructor(&entity_container, "Relation", 2)?
        .native("setWidth", &[("width", Type::Int)], Type::Void)?
        .native("getWidth", &[], Type::Int)?
        .install(scene)?;
    ClassDef::new("TypedIORelation", Some("IORelation"))
        .constructor(&entity_container, "IORelation", 2)?
        .install(scene)?;

    ClassDef::new("Entity", Some("NamedObj"))
        .constructor(&[], "NamedObj", 0)?
        .native("getPort", &[("name", string.clone())], obj("Port"))?
        .install(scene)?;
    ClassDef::new("ComponentEntity", Some("Entity"))
        .method("<init>", &entity_container, Type::Void, |b| {
            b.invoke(InvokeExpr::special(
                Operand::local("this"),
                "Entity",
                "<init>",
                Vec::new(),
            ));
            b.invoke(InvokeExpr::virtual_call(
                Operand::local("this"),
                "NamedObj",
                "setName",
                vec![Operand::local("name")],
                Type::Void,
            ));
            b.ret(None);
        })?
        .method(
            "connectionsChanged",
            &[("port", obj("Port"))],
            Type::Void,
            |b| {
                b.ret(None);
            },
        )?
        .install(scene)?;
    ClassDef::new("CompositeEntity", Some("ComponentEntity"))
        .constructor(&entity_container, "ComponentEntity", 2)?
        .native("getEntity", &[("name", string.clone())], obj("ComponentEntity"))?
        .native("getRelation", &[("name", string.clone())], obj("Relation"))?
        .install(scene)?;

    lifecycle(ClassDef::new("AtomicActor", Some("ComponentEntity")))?
        .constructor(&entity_container, "ComponentEntity", 2)?
        .install(scene)?;
    ClassDef::new("TypedAtomicActor", Some("AtomicActor"))
        .constructor(&entity_container, "AtomicActor", 2)?
        .install(scene)?;
    lifecycle(ClassDef::new("CompositeActor", Some("CompositeEntity")))?
        .constructor(&entity_container, "CompositeEntity", 2)?
        .native("getManager", &[], obj("Manager"))?
        .install(scene)?;
    ClassDef::new("TypedCompositeActor", Some("CompositeActor"))
        .constructor(&entity_container, "CompositeActor", 2)?
        .install(scene)?;
    ClassDef::new("Manager", Some("NamedObj")).install(scene)?;
    Ok(())
}

fn install_tokens(scene: &mut Scene) -> Result<(), IrError> {
    let string = obj("String");
    let other = [("other", token())];
    let mut base = ClassDef::new("Token", Some("Object")).constructor(&[], "Object", 0)?;
    for name in ["add", "subtract", "multiply", "divide", "modulo", "and", "or"] {
        base = base.native(name, &other, token())?;
    }
    for name in ["isEqualTo", "isLessThan", "isGreaterThan"] {
        base = base.native(name, &other, obj("BooleanToken"))?;
    }
    for name in ["negate", "not", "zero", "one"] {
        base = base.native(name, &[], token())?;
    }
    base.native("booleanValue", &[], Type::Boolean)?
        .native("intValue", &[], Type::Int)?
        .native("longValue", &[], Type::Long)?
        .native("doubleValue", &[], Type::Double)?
        .native("stringValue", &[], string.clone())?
        .native("toString", &[], string.clone())?
        .native("length", &[], Type::Int)?
        .native("isNil", &[], Type::Boolean)?
        .native("getElement", &[("index", Type::Int)], token())?
        .native("getType", &[], obj("Type"))?
        .install(scene)?;

    ClassDef::new("ScalarToken", Some("Token")).install(scene)?;
    let constructors: [(&str, &str, Vec<(&str, Type)>); 8] = [
        ("BooleanToken", "Token", vec![("value", Type::Boolean)]),
        ("UnsignedByteToken", "ScalarToken", vec![("value", Type::Int)]),
        ("IntToken", "ScalarToken", vec![("value", Type::Int)]),
        ("LongToken", "ScalarToken", vec![("value", Type::Long)]),
        ("DoubleToken", "ScalarToken", vec![("value", Type::Double)]),
        (
            "ComplexToken",
            "ScalarToken",
            vec![("re", Type::Double), ("im", Type::Double)],
        ),
        ("StringToken", "Token", vec![("value", string.clone())]),
        ("ArrayToken", "Token", vec![("values", Type::array_of(token()))]),
    ];
    for (name, superclass, args) in constructors {
        ClassDef::new(name, Some(superclass))
            .native("<init>", &args, Type::Void)?
            .install(scene)?;
    }

    ClassDef::new("Tokens", Some("Object"))
        .static_native(
            "convert",
            &[("token", token()), ("type", string)],
            token(),
        )?
        .install(scene)?;
    Ok(())
}

pub(crate) fn install(scene: &mut Scene) -> Result<(), IrError> {
    install_core(scene)?;
    install_graph(scene)?;
    install_tokens(scene)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> Scene {
        let mut scene = Scene::new();
        install(&mut scene).unwrap();
        scene
    }

    #[test]
    fn test_token_methods_resolve_from_subclasses() {
        let scene = scene();
        let (owner, method) = scene.resolve_method("IntToken", "add").unwrap();
        assert_eq!(owner.name, "Token");
        assert!(method.native);
        assert!(scene.is_subtype("IntToken", "ScalarToken"));
        assert!(!scene.is_subtype("BooleanToken", "ScalarToken"));
    }

    #[test]
    fn test_parameters_are_settable_attributes() {
        let scene = scene();
        assert!(scene.is_subtype("StringParameter", "Settable"));
        assert!(scene.is_subtype("Parameter", "Attribute"));
        assert!(scene.is_subtype("TypedIOPort", "Port"));
        assert!(scene.is_subtype("TypedCompositeActor", "Entity"));
    }

    #[test]
    fn test_lifecycle_bodies_are_inlinable() {
        let scene = scene();
        let (owner, fire) = scene.resolve_method("TypedAtomicActor", "fire").unwrap();
        assert_eq!(owner.name, "AtomicActor");
        assert!(!fire.native);
        assert!(fire.body.is_some());
        assert!(LIFECYCLE_CLASSES.contains(&owner.name.as_str()));
    }
}
