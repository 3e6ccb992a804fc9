use actorforge_core::diagnostics::DiagnosticHandler;
use actorforge_core::{
    residual_framework_references, CancelFlag, CodegenMode, Container, SpecializeError,
    SpecializerConfig,
};
use actorforge_test_helpers::fixtures;
use actorforge_test_helpers::{load_model, specialize_collecting, specialize_model};

fn deep() -> SpecializerConfig {
    SpecializerConfig::default()
}

#[test]
fn test_pipe_produces_top_and_harness() {
    let specialized = specialize_model(fixtures::pipe(), deep()).unwrap();
    assert_eq!(specialized.top_class, "generated.top");
    assert_eq!(specialized.main_class, "generated.Main");

    let listing = specialized.print();
    assert!(listing.contains("class generated.top extends Object"));
    assert!(listing.contains("class generated.Main extends Object"));
    assert!(listing.contains("_CGbuffer_"));
}

#[test]
fn test_target_package_prefixes_every_class() {
    let config = SpecializerConfig {
        target_package: "demo".to_string(),
        ..deep()
    };
    let specialized = specialize_model(fixtures::pipe(), config).unwrap();
    assert_eq!(specialized.main_class, "demo.Main");
    for class in specialized.scene.application_classes() {
        assert!(class.starts_with("demo."), "{} escaped the package", class);
    }
}

#[test]
fn test_deep_programs_leave_the_framework_behind() {
    for yaml in [
        fixtures::pipe(),
        fixtures::scaled_ramp(),
        fixtures::fan_in(),
        fixtures::nested(),
        fixtures::toggle(),
    ] {
        let specialized = specialize_model(yaml, deep()).unwrap();
        let residue = residual_framework_references(&specialized.scene);
        assert!(residue.is_empty(), "residual references: {:?}", residue);
    }
}

#[test]
fn test_nested_composite_is_flattened_into_one_net() {
    let specialized = specialize_model(fixtures::nested(), deep()).unwrap();
    let top = specialized.scene.class("generated.top").unwrap();
    let buffers: Vec<&String> = top
        .fields
        .keys()
        .filter(|name| name.starts_with("_CGbuffer_"))
        .collect();
    assert_eq!(buffers.len(), 1, "{:?}", buffers);
    // A buffer of size two needs a rotating index.
    assert!(top.fields.keys().any(|name| name.starts_with("_CGindex_")));
}

#[test]
fn test_shallow_mode_keeps_graph_objects() {
    let config = SpecializerConfig {
        mode: CodegenMode::Shallow,
        ..deep()
    };
    let specialized = specialize_model(fixtures::pipe(), config).unwrap();
    let top = specialized.scene.class("generated.top").unwrap();
    assert!(!top.fields.keys().any(|name| name.starts_with("_CGbuffer_")));
    assert_eq!(specialized.main_class, "generated.Main");
}

#[test]
fn test_dependency_cycle_is_reported_with_its_component() {
    let model = load_model(fixtures::feedback_loop()).unwrap();
    let (result, diagnostics) = specialize_collecting(&model, deep());
    let err = result.unwrap_err();
    assert!(matches!(err, SpecializeError::Unsupported { .. }), "{}", err);
    assert!(err.to_string().contains("cycle"));

    assert_eq!(diagnostics.error_count(), 1);
    let reported = &diagnostics.get_diagnostics()[0];
    assert_eq!(reported.location.component.as_deref(), Some(".top"));
}

#[test]
fn test_unknown_action_destination_is_unresolvable() {
    let model = load_model(fixtures::unknown_action_destination()).unwrap();
    let (result, diagnostics) = specialize_collecting(&model, deep());
    assert!(matches!(result, Err(SpecializeError::Unresolvable { .. })));
    assert!(diagnostics.has_errors());
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let config = SpecializerConfig {
        target_package: String::new(),
        ..deep()
    };
    let err = specialize_model(fixtures::pipe(), config).unwrap_err();
    assert!(err.contains("targetPackage"), "{}", err);
}

#[test]
fn test_raised_cancel_flag_aborts_specialization() {
    let model = load_model(fixtures::pipe()).unwrap();
    let flag = CancelFlag::new();
    flag.set();
    let container = Container::new(deep()).with_cancel_flag(flag);
    let result = actorforge_core::specialize(&model, &container);
    assert!(matches!(result, Err(SpecializeError::Cancelled)));
}
