use actorforge_core::interp::{run_main, Interpreter, Value};
use actorforge_core::specializer::{Specialized, INSTANCE_FIELD, MAIN_METHOD};
use actorforge_core::{ExecError, SpecializerConfig};
use actorforge_test_helpers::fixtures;
use actorforge_test_helpers::{config_with_iterations, run_model, specialize_model};
use proptest::prelude::*;

#[test]
fn test_pipe_moves_one_token_per_iteration() {
    let trace = run_model(fixtures::pipe(), 3).unwrap();
    assert_eq!(trace.stores_matching("_CGbuffer_"), 3);
    assert_eq!(trace.loads_matching("_CGbuffer_"), 3);
}

#[test]
fn test_zero_iterations_move_nothing() {
    let trace = run_model(fixtures::pipe(), 0).unwrap();
    assert_eq!(trace.stores_matching("_CGbuffer_"), 0);
    assert_eq!(trace.loads_matching("_CGbuffer_"), 0);
    assert!(trace.steps > 0);
}

#[test]
fn test_fan_in_reads_every_channel() {
    let trace = run_model(fixtures::fan_in(), 2).unwrap();
    // Two sources into the adder, one result into the sink.
    assert_eq!(trace.stores_matching("_CGbuffer_"), 6);
    assert_eq!(trace.loads_matching("_CGbuffer_"), 6);
}

#[test]
fn test_scaled_ramp_runs() {
    let trace = run_model(fixtures::scaled_ramp(), 4).unwrap();
    assert_eq!(trace.stores_matching("_CGbuffer_"), 8);
    assert_eq!(trace.loads_matching("_CGbuffer_"), 8);
}

#[test]
fn test_state_machine_runs() {
    let trace = run_model(fixtures::toggle(), 5).unwrap();
    assert_eq!(trace.stores_matching("_CGbuffer_"), 5);
}

#[test]
fn test_zero_width_send_throws_at_run_time() {
    let specialized = specialize_model(fixtures::zero_width(), config_with_iterations(1)).unwrap();
    let err = run_main(&specialized.scene, &specialized.main_class).unwrap_err();
    match err {
        ExecError::Thrown(message) => {
            assert!(message.contains("width zero"), "{}", message);
            assert!(message.contains(".top.source.output"), "{}", message);
        }
        other => panic!("expected a thrown error, got {}", other),
    }
}

#[test]
fn test_two_enabled_transitions_throw_when_fired() {
    let err = run_model(fixtures::ambiguous_guards(), 1).unwrap_err();
    assert!(err.contains("more than one enabled transition"), "{}", err);
}

fn run_to_completion(specialized: &Specialized) -> Interpreter<'_> {
    let mut interpreter = Interpreter::new(&specialized.scene);
    interpreter
        .run_static(&specialized.main_class, MAIN_METHOD, Vec::new())
        .unwrap();
    interpreter
}

fn component_object(interpreter: &Interpreter<'_>, top_class: &str, name: &str) -> Value {
    let top = match interpreter.static_value(top_class, INSTANCE_FIELD) {
        Some(Value::Object(id)) => *id,
        other => panic!("top instance not set: {:?}", other),
    };
    interpreter.heap().object(top).fields[name].clone()
}

#[test]
fn test_only_the_enabled_transition_is_taken() {
    let specialized = specialize_model(fixtures::guarded_choice(), config_with_iterations(1)).unwrap();
    let interpreter = run_to_completion(&specialized);
    let Value::Object(control) = component_object(&interpreter, &specialized.top_class, "control") else {
        panic!("state machine instance missing");
    };
    let fields = &interpreter.heap().object(control).fields;
    // Transition 0 is idle -> busy under 'true'; transition 1 is never chosen.
    assert_eq!(fields["_nextTransition"], Value::Int(0));
    assert_eq!(fields["_currentState"], Value::Int(1));
}

#[test]
fn test_guarded_choice_settles_in_destination_state() {
    // In busy the only transition is guarded by 'false', so nothing is recorded.
    let specialized = specialize_model(fixtures::guarded_choice(), config_with_iterations(2)).unwrap();
    let interpreter = run_to_completion(&specialized);
    let Value::Object(control) = component_object(&interpreter, &specialized.top_class, "control") else {
        panic!("state machine instance missing");
    };
    let fields = &interpreter.heap().object(control).fields;
    assert_eq!(fields["_nextTransition"], Value::Int(-1));
    assert_eq!(fields["_currentState"], Value::Int(1));
}

fn index_slots(interpreter: &Interpreter<'_>, top_class: &str, field: &str) -> Vec<Value> {
    match interpreter.static_value(top_class, field) {
        Some(Value::Array(id)) => interpreter.heap().array(*id).values.clone(),
        other => panic!("{} not allocated: {:?}", field, other),
    }
}

#[test]
fn test_buffer_index_wraps_after_a_full_buffer() {
    let specialized = specialize_model(fixtures::buffered_pipe(), config_with_iterations(3)).unwrap();
    let interpreter = run_to_completion(&specialized);
    for field in ["_CGindex_top_source_output", "_CGindex_top_sink_input"] {
        assert_eq!(index_slots(&interpreter, &specialized.top_class, field), vec![Value::Int(0)]);
    }
}

#[test]
fn test_buffer_index_advances_per_iteration() {
    let specialized = specialize_model(fixtures::buffered_pipe(), config_with_iterations(2)).unwrap();
    let interpreter = run_to_completion(&specialized);
    for field in ["_CGindex_top_source_output", "_CGindex_top_sink_input"] {
        assert_eq!(index_slots(&interpreter, &specialized.top_class, field), vec![Value::Int(2)]);
    }
}

#[test]
fn test_interpreter_honours_cancel_flag() {
    // No iteration cap: the harness only stops when postfire says so.
    let specialized = specialize_model(fixtures::pipe(), SpecializerConfig::default()).unwrap();
    let flag = actorforge_core::CancelFlag::new();
    flag.set();
    let err = Interpreter::new(&specialized.scene)
        .with_cancel_flag(flag)
        .run_static(&specialized.main_class, MAIN_METHOD, Vec::new())
        .unwrap_err();
    assert!(matches!(err, ExecError::Cancelled));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn prop_buffer_traffic_matches_iteration_cap(iterations in 0u64..6) {
        let trace = run_model(fixtures::pipe(), iterations).unwrap();
        prop_assert_eq!(trace.stores_matching("_CGbuffer_") as u64, iterations);
        prop_assert_eq!(trace.loads_matching("_CGbuffer_") as u64, iterations);
    }
}
