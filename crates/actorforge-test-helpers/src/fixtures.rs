//! Model fixtures, as YAML descriptions

/// A constant source feeding a recorder over one width-1 relation
pub fn pipe() -> &'static str {
    r#"name: top
entities:
  - { kind: atomic, name: source, class: Const, parameters: { value: '5' } }
  - { kind: atomic, name: sink, class: Recorder }
relations:
  - { name: r, width: 1, bufferSize: 1, links: [source.output, sink.input] }
"#
}

/// A ramp scaled by a parameter expression of its container
pub fn scaled_ramp() -> &'static str {
    r#"name: top
parameters: { gain: '2' }
entities:
  - { kind: atomic, name: ramp, class: Ramp, parameters: { init: '0', step: '1' } }
  - { kind: atomic, name: scale, class: Scale, parameters: { factor: 'gain * 3' } }
  - { kind: atomic, name: sink, class: Recorder }
connections:
  - { from: ramp.output, to: scale.input, bufferSize: 1 }
  - { from: scale.output, to: sink.input, bufferSize: 1 }
"#
}

/// Two sources summed into one sink through multiport channels
pub fn fan_in() -> &'static str {
    r#"name: top
entities:
  - { kind: atomic, name: a, class: Const, parameters: { value: '1' } }
  - { kind: atomic, name: b, class: Const, parameters: { value: '2' } }
  - { kind: atomic, name: sum, class: AddSubtract }
  - { kind: atomic, name: sink, class: Recorder }
connections:
  - { from: a.output, to: sum.plus, bufferSize: 1 }
  - { from: b.output, to: sum.plus, bufferSize: 1 }
  - { from: sum.output, to: sink.input, bufferSize: 1 }
"#
}

/// A source behind a transparent composite boundary
pub fn nested() -> &'static str {
    r#"name: top
entities:
  - { kind: atomic, name: source, class: Const }
  - kind: composite
    name: inner
    ports:
      - { name: in, direction: input }
    entities:
      - { kind: atomic, name: sink, class: Recorder }
    connections:
      - { from: in, to: sink.input }
relations:
  - { name: wire, width: 1, bufferSize: 2, links: [source.output, inner.in] }
"#
}

/// A source whose only relation has width zero
pub fn zero_width() -> &'static str {
    r#"name: top
entities:
  - { kind: atomic, name: source, class: Const }
  - { kind: atomic, name: sink, class: Discard }
relations:
  - { name: r, width: 0, bufferSize: 1, links: [source.output, sink.input] }
"#
}

/// A two-state machine that bumps a parameter on every input
pub fn toggle() -> &'static str {
    r#"name: top
parameters: { gain: '1' }
entities:
  - { kind: atomic, name: source, class: Const }
  - kind: fsm
    name: control
    ports:
      - { name: in, direction: input, type: int }
    initialState: idle
    states:
      - { name: idle }
      - { name: busy }
    transitions:
      - { from: idle, to: busy, guard: 'in_isPresent', commit: [{ destination: gain, expression: 'gain + 1' }] }
      - { from: busy, to: idle }
connections:
  - { from: source.output, to: control.in, bufferSize: 1 }
"#
}

/// A dataflow cycle, which has no static schedule
pub fn feedback_loop() -> &'static str {
    r#"name: top
entities:
  - { kind: atomic, name: left, class: Scale }
  - { kind: atomic, name: right, class: Scale }
connections:
  - { from: left.output, to: right.input, bufferSize: 1 }
  - { from: right.output, to: left.input, bufferSize: 1 }
"#
}

/// A state machine assigning to a parameter that does not exist
pub fn unknown_action_destination() -> &'static str {
    r#"name: top
entities:
  - kind: fsm
    name: control
    initialState: idle
    states:
      - { name: idle }
    transitions:
      - { from: idle, to: idle, commit: [{ destination: missing, expression: '1' }] }
"#
}

/// A state with two transitions whose guards are always true
pub fn ambiguous_guards() -> &'static str {
    r#"name: top
entities:
  - kind: fsm
    name: control
    initialState: idle
    states:
      - { name: idle }
      - { name: busy }
    transitions:
      - { from: idle, to: busy, guard: 'true' }
      - { from: idle, to: idle, guard: 'true' }
      - { from: busy, to: idle, guard: 'false' }
"#
}

/// A state machine whose first state has one always-true and one
/// always-false outgoing transition
pub fn guarded_choice() -> &'static str {
    r#"name: top
entities:
  - kind: fsm
    name: control
    initialState: idle
    states:
      - { name: idle }
      - { name: busy }
    transitions:
      - { from: idle, to: busy, guard: 'true' }
      - { from: idle, to: idle, guard: 'false' }
      - { from: busy, to: busy, guard: 'false' }
"#
}

/// A constant source feeding a recorder through a three-slot buffer
pub fn buffered_pipe() -> &'static str {
    r#"name: top
entities:
  - { kind: atomic, name: source, class: Const, parameters: { value: '5' } }
  - { kind: atomic, name: sink, class: Recorder }
relations:
  - { name: r, width: 1, bufferSize: 3, links: [source.output, sink.input] }
"#
}
