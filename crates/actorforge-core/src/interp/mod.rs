//! Direct execution of specialized IR.
//!
//! The interpreter runs the harness produced by the pipeline so tests and
//! the CLI can check what the generated program actually does. It knows the
//! token natives and nothing else of the framework: a program that still
//! calls into the live object graph fails with
//! [`ExecError::UnsupportedNative`].

mod trace;
mod value;

pub use trace::ExecutionTrace;
pub use value::{ArrayData, ArrayId, Heap, Object, ObjectId, Value};

use crate::data::{InvokeArg, InvokeResult, Token, ValueType};
use crate::errors::{ExecError, Location};
use crate::ir::{
    BinOp, Body, Class, CondOp, Expr, InvokeExpr, InvokeKind, IrError, Method, Operand, Place,
    Scene, Stmt, Type, UnOp,
};
use crate::library::tokens::{const_to_primitive, primitive_to_const, token_from_construction};
use crate::library::is_token_class;
use crate::specializer::MAIN_METHOD;
use crate::watchdog::CancelFlag;
use rustc_hash::FxHashMap;
use std::str::FromStr;
use tracing::{debug, info};

pub const MAX_CALL_DEPTH: usize = 256;

/// Statements between two looks at the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

type Result<T> = std::result::Result<T, ExecError>;

/// Run the harness entry point of `class`.
pub fn run_main(scene: &Scene, class: &str) -> Result<ExecutionTrace> {
    let mut interpreter = Interpreter::new(scene);
    interpreter.run_static(class, MAIN_METHOD, Vec::new())?;
    Ok(interpreter.into_trace())
}

struct Frame<'f> {
    class: &'f str,
    method: &'f str,
    body: &'f Body,
    locals: FxHashMap<String, Value>,
    pc: usize,
}

impl Frame<'_> {
    fn location(&self) -> Location {
        Location::method(self.class, self.method).at(self.pc)
    }
}

pub struct Interpreter<'s> {
    scene: &'s Scene,
    heap: Heap,
    statics: FxHashMap<(String, String), Value>,
    trace: ExecutionTrace,
    cancel: Option<CancelFlag>,
    depth: usize,
}

impl<'s> Interpreter<'s> {
    pub fn new(scene: &'s Scene) -> Self {
        Interpreter {
            scene,
            heap: Heap::new(),
            statics: FxHashMap::default(),
            trace: ExecutionTrace::new(),
            cancel: None,
            depth: 0,
        }
    }

    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    pub fn into_trace(self) -> ExecutionTrace {
        self.trace
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn static_value(&self, class: &str, field: &str) -> Option<&Value> {
        let owner = self.field_owner(class, field);
        self.statics.get(&(owner, field.to_string()))
    }

    pub fn run_static(&mut self, class: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        info!("Running {}.{}", class, method);
        let (owner, target) = self.resolve(class, method)?;
        let result = self.call(owner, target, None, args, Location::method(class, method))?;
        info!(
            "{}.{} finished after {} steps",
            class, method, self.trace.steps
        );
        Ok(result)
    }

    fn resolve(&self, class: &str, method: &str) -> Result<(&'s Class, &'s Method)> {
        let scene: &'s Scene = self.scene;
        scene
            .resolve_method(class, method)
            .ok_or_else(|| ExecError::NoSuchMethod {
                class: class.to_string(),
                method: method.to_string(),
            })
    }

    fn field_owner(&self, class: &str, field: &str) -> String {
        self.scene
            .resolve_field(class, field)
            .map(|(owner, _)| owner.name.clone())
            .unwrap_or_else(|| class.to_string())
    }

    fn field_type(&self, class: &str, field: &str) -> Type {
        self.scene
            .resolve_field(class, field)
            .map(|(_, f)| f.ty.clone())
            .unwrap_or(Type::Null)
    }

    fn call(
        &mut self,
        owner: &'s Class,
        method: &'s Method,
        this: Option<Value>,
        args: Vec<Value>,
        caller: Location,
    ) -> Result<Value> {
        if method.native {
            return self.native(&owner.name, &method.name, this, args, caller);
        }
        let body = method.body.as_ref().ok_or_else(|| ExecError::NoSuchMethod {
            class: owner.name.clone(),
            method: method.name.clone(),
        })?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecError::StackOverflow(MAX_CALL_DEPTH));
        }
        if owner.is_application() {
            self.trace.record_call(&owner.name, &method.name);
        }

        let mut locals = FxHashMap::default();
        if let Some(this) = this {
            locals.insert("this".to_string(), this);
        }
        for ((param, _), arg) in method.params.iter().zip(args) {
            locals.insert(param.clone(), arg);
        }
        let mut frame = Frame {
            class: &owner.name,
            method: &method.name,
            body,
            locals,
            pc: 0,
        };
        self.depth += 1;
        let result = self.execute(&mut frame);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, frame: &mut Frame<'s>) -> Result<Value> {
        let body = frame.body;
        let labels: FxHashMap<&str, usize> = body
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Stmt::Label(l) => Some((l.as_str(), i)),
                _ => None,
            })
            .collect();
        let jump = |target: &str| -> Result<usize> {
            labels
                .get(target)
                .copied()
                .ok_or_else(|| IrError::UnknownLabel(target.to_string()).into())
        };

        while frame.pc < body.stmts.len() {
            self.tick()?;
            match &body.stmts[frame.pc] {
                Stmt::Assign(place, expr) => {
                    let value = self.eval(frame, expr)?;
                    self.store(frame, place, value)?;
                }
                Stmt::Invoke(invoke) => {
                    self.invoke(frame, invoke)?;
                }
                Stmt::If(cond, target) => {
                    let lhs = self.operand(frame, &cond.lhs);
                    let rhs = self.operand(frame, &cond.rhs);
                    if compare(cond.op, &lhs, &rhs, frame)? {
                        frame.pc = jump(target)?;
                        continue;
                    }
                }
                Stmt::Goto(target) => {
                    frame.pc = jump(target)?;
                    continue;
                }
                Stmt::Switch { key, cases, default } => {
                    let key = self.operand(frame, key);
                    let key = key.as_i64().ok_or_else(|| ExecError::Type {
                        location: frame.location(),
                        message: format!("switch on {}", key),
                    })?;
                    let target = cases
                        .iter()
                        .find(|(value, _)| *value == key)
                        .map(|(_, l)| l.as_str())
                        .unwrap_or(default.as_str());
                    frame.pc = jump(target)?;
                    continue;
                }
                Stmt::Label(_) | Stmt::Nop => {}
                Stmt::Return(value) => {
                    return Ok(value
                        .as_ref()
                        .map(|v| self.operand(frame, v))
                        .unwrap_or(Value::Null));
                }
                Stmt::Throw(value) => {
                    let value = self.operand(frame, value);
                    return Err(self.thrown(&value));
                }
            }
            frame.pc += 1;
        }
        Ok(Value::Null)
    }

    fn tick(&mut self) -> Result<()> {
        self.trace.steps += 1;
        if self.trace.steps % CANCEL_CHECK_INTERVAL == 0
            && self.cancel.as_ref().map(CancelFlag::is_set).unwrap_or(false)
        {
            return Err(ExecError::Cancelled);
        }
        Ok(())
    }

    fn thrown(&self, value: &Value) -> ExecError {
        if let Value::Object(id) = value {
            if let Some(Value::Str(message)) = self.heap.object(*id).fields.get("message") {
                return ExecError::Thrown(message.clone());
            }
        }
        ExecError::Thrown(value.to_string())
    }

    /// Unassigned locals read as the zero value of their declared type.
    fn operand(&self, frame: &Frame<'_>, operand: &Operand) -> Value {
        match operand {
            Operand::Const(c) => Value::from(c),
            Operand::Local(name) => frame.locals.get(name).cloned().unwrap_or_else(|| {
                frame
                    .body
                    .local_type(name)
                    .map(Value::default_for)
                    .unwrap_or(Value::Null)
            }),
        }
    }

    fn object(&self, frame: &Frame<'_>, value: &Value) -> Result<ObjectId> {
        match value {
            Value::Object(id) => Ok(*id),
            Value::Null => Err(ExecError::NullPointer(frame.location())),
            other => Err(ExecError::Type {
                location: frame.location(),
                message: format!("{} is not an object", other),
            }),
        }
    }

    fn array(&self, frame: &Frame<'_>, value: &Value) -> Result<ArrayId> {
        match value {
            Value::Array(id) => Ok(*id),
            Value::Null => Err(ExecError::NullPointer(frame.location())),
            other => Err(ExecError::Type {
                location: frame.location(),
                message: format!("{} is not an array", other),
            }),
        }
    }

    fn index(&self, frame: &Frame<'_>, array: ArrayId, index: &Value) -> Result<usize> {
        let length = self.heap.array(array).values.len();
        let raw = index.as_i64().ok_or_else(|| ExecError::Type {
            location: frame.location(),
            message: format!("array index {}", index),
        })?;
        usize::try_from(raw)
            .ok()
            .filter(|i| *i < length)
            .ok_or(ExecError::IndexOutOfBounds {
                location: frame.location(),
                index: raw,
                length,
            })
    }

    /// Arrays are traced under the first field they pass through.
    fn adopt(&mut self, value: &Value, field: &str) {
        if let Value::Array(id) = value {
            let array = self.heap.array_mut(*id);
            if array.origin.is_none() {
                array.origin = Some(field.to_string());
            }
        }
    }

    fn eval(&mut self, frame: &Frame<'_>, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Use(operand) => self.operand(frame, operand),
            Expr::Binary(op, a, b) => {
                let (a, b) = (self.operand(frame, a), self.operand(frame, b));
                binary(*op, &a, &b, frame)?
            }
            Expr::Unary(op, a) => match (op, self.operand(frame, a)) {
                (UnOp::Neg, Value::Int(v)) => Value::Int(v.wrapping_neg()),
                (UnOp::Neg, Value::Long(v)) => Value::Long(v.wrapping_neg()),
                (UnOp::Neg, Value::Double(v)) => Value::Double(-v),
                (UnOp::Not, Value::Bool(v)) => Value::Bool(!v),
                (_, other) => {
                    return Err(ExecError::Type {
                        location: frame.location(),
                        message: format!("unary operator on {}", other),
                    })
                }
            },
            Expr::Cast(ty, a) => {
                let value = self.operand(frame, a);
                self.cast(frame, ty, value)?
            }
            Expr::InstanceOf(a, ty) => {
                let value = self.operand(frame, a);
                Value::Bool(self.instance_of(&value, ty))
            }
            Expr::New(class) => Value::Object(self.heap.alloc(class)),
            Expr::NewArray(element, length) => {
                let length = self.operand(frame, length);
                let n = length
                    .as_i64()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| ExecError::Arithmetic {
                        location: frame.location(),
                        message: format!("array length {}", length),
                    })?;
                Value::Array(self.heap.alloc_array(element.clone(), n))
            }
            Expr::Length(a) => {
                let value = self.operand(frame, a);
                let id = self.array(frame, &value)?;
                let length = self.heap.array(id).values.len();
                Value::Int(i32::try_from(length).unwrap_or(i32::MAX))
            }
            Expr::InstanceField(base, field) => {
                let base = self.operand(frame, base);
                let id = self.object(frame, &base)?;
                let value = match self.heap.object(id).fields.get(&field.name) {
                    Some(value) => value.clone(),
                    None => Value::default_for(&self.field_type(&field.class, &field.name)),
                };
                self.adopt(&value, &field.name);
                value
            }
            Expr::StaticField(field) => {
                let key = (self.field_owner(&field.class, &field.name), field.name.clone());
                let value = match self.statics.get(&key) {
                    Some(value) => value.clone(),
                    None => Value::default_for(&self.field_type(&field.class, &field.name)),
                };
                self.adopt(&value, &field.name);
                value
            }
            Expr::ArrayRead(array, index) => {
                let array = self.operand(frame, array);
                let id = self.array(frame, &array)?;
                let index = self.operand(frame, index);
                let i = self.index(frame, id, &index)?;
                let data = self.heap.array(id);
                let value = data.values[i].clone();
                if let Some(origin) = data.origin.clone() {
                    self.trace.record_load(&origin);
                }
                value
            }
            Expr::Invoke(invoke) => self.invoke(frame, invoke)?,
        })
    }

    fn store(&mut self, frame: &mut Frame<'_>, place: &Place, value: Value) -> Result<()> {
        match place {
            Place::Local(name) => {
                frame.locals.insert(name.clone(), value);
            }
            Place::InstanceField(base, field) => {
                let base = self.operand(frame, base);
                let id = self.object(frame, &base)?;
                self.adopt(&value, &field.name);
                self.heap
                    .object_mut(id)
                    .fields
                    .insert(field.name.clone(), value);
            }
            Place::StaticField(field) => {
                self.adopt(&value, &field.name);
                let key = (self.field_owner(&field.class, &field.name), field.name.clone());
                self.statics.insert(key, value);
            }
            Place::ArrayElem(array, index) => {
                let array = self.operand(frame, array);
                let id = self.array(frame, &array)?;
                let index = self.operand(frame, index);
                let i = self.index(frame, id, &index)?;
                let data = self.heap.array_mut(id);
                data.values[i] = value;
                if let Some(origin) = data.origin.clone() {
                    self.trace.record_store(&origin);
                }
            }
        }
        Ok(())
    }

    fn runtime_class(&self, frame: &Frame<'_>, value: &Value) -> Result<String> {
        match value {
            Value::Object(id) => Ok(self.heap.object(*id).class.clone()),
            Value::Str(_) => Ok("String".to_string()),
            Value::Array(_) => Ok("Object".to_string()),
            Value::Null => Err(ExecError::NullPointer(frame.location())),
            other => Err(ExecError::Type {
                location: frame.location(),
                message: format!("call on primitive {}", other),
            }),
        }
    }

    fn invoke(&mut self, frame: &Frame<'_>, invoke: &InvokeExpr) -> Result<Value> {
        let args: Vec<Value> = invoke.args.iter().map(|a| self.operand(frame, a)).collect();
        let location = frame.location();
        match invoke.kind {
            InvokeKind::Static => {
                let (owner, method) = self.resolve(&invoke.class, &invoke.method)?;
                self.call(owner, method, None, args, location)
            }
            InvokeKind::Special => {
                let this = self.invoke_base(frame, invoke)?;
                let (owner, method) = self.resolve(&invoke.class, &invoke.method)?;
                self.call(owner, method, Some(this), args, location)
            }
            InvokeKind::Virtual | InvokeKind::Interface => {
                let this = self.invoke_base(frame, invoke)?;
                let class = self.runtime_class(frame, &this)?;
                let (owner, method) = match self.resolve(&class, &invoke.method) {
                    Ok(found) => found,
                    Err(_) => self.resolve(&invoke.class, &invoke.method)?,
                };
                self.call(owner, method, Some(this), args, location)
            }
        }
    }

    fn invoke_base(&self, frame: &Frame<'_>, invoke: &InvokeExpr) -> Result<Value> {
        let base = invoke
            .base
            .as_ref()
            .map(|b| self.operand(frame, b))
            .unwrap_or(Value::Null);
        if base.is_null() {
            return Err(ExecError::NullPointer(frame.location()));
        }
        Ok(base)
    }

    fn cast(&self, frame: &Frame<'_>, ty: &Type, value: Value) -> Result<Value> {
        let mismatch = |value: &Value| ExecError::ClassCast {
            location: frame.location(),
            from: value.to_string(),
            to: ty.to_string(),
        };
        Ok(match ty {
            Type::Int => match &value {
                Value::Double(d) => Value::Int(*d as i32),
                other => Value::Int(other.as_i64().ok_or_else(|| mismatch(other))? as i32),
            },
            Type::Long => match &value {
                Value::Double(d) => Value::Long(*d as i64),
                other => Value::Long(other.as_i64().ok_or_else(|| mismatch(other))?),
            },
            Type::Double => Value::Double(value.as_f64().ok_or_else(|| mismatch(&value))?),
            Type::Boolean => Value::Bool(value.as_bool().ok_or_else(|| mismatch(&value))?),
            Type::Ref(_) | Type::Array(_) => {
                if !value.is_null() && !self.instance_of(&value, ty) {
                    return Err(mismatch(&value));
                }
                value
            }
            Type::Void | Type::Null => value,
        })
    }

    fn instance_of(&self, value: &Value, ty: &Type) -> bool {
        match (value, ty) {
            (Value::Object(id), Type::Ref(class)) => {
                let object = self.heap.object(*id);
                object.class == *class || self.scene.is_subtype(&object.class, class)
            }
            (Value::Str(_), Type::Ref(class)) => class == "String" || class == "Object",
            (Value::Array(_), Type::Array(_)) => true,
            (Value::Array(_), Type::Ref(class)) => class == "Object",
            _ => false,
        }
    }

    fn native(
        &mut self,
        class: &str,
        method: &str,
        this: Option<Value>,
        args: Vec<Value>,
        location: Location,
    ) -> Result<Value> {
        debug!("native {}.{}", class, method);
        if is_token_class(class) {
            let this = this.ok_or_else(|| ExecError::NullPointer(location.clone()))?;
            return if method == "<init>" {
                self.construct_token(&this, &args, location)?;
                Ok(Value::Null)
            } else {
                self.token_method(&this, method, &args, location)
            };
        }
        if class == "Tokens" && method == "convert" {
            let token = args
                .first()
                .and_then(|a| self.heap.token(a))
                .cloned()
                .ok_or_else(|| ExecError::NullPointer(location.clone()))?;
            let Some(Value::Str(name)) = args.get(1) else {
                return Err(ExecError::Type {
                    location,
                    message: "conversion target must be a type name".to_string(),
                });
            };
            let to = ValueType::from_str(name).map_err(|_| ExecError::Type {
                location: location.clone(),
                message: format!("unknown type `{}`", name),
            })?;
            let converted = token.convert(&to)?;
            return Ok(Value::Object(self.heap.alloc_token(converted)));
        }
        Err(ExecError::UnsupportedNative {
            class: class.to_string(),
            method: method.to_string(),
        })
    }

    fn construct_token(&mut self, this: &Value, args: &[Value], location: Location) -> Result<()> {
        let Value::Object(id) = this else {
            return Err(ExecError::NullPointer(location));
        };
        let class = self.heap.object(*id).class.clone();
        let token = if class == "ArrayToken" {
            let Some(Value::Array(array)) = args.first() else {
                return Err(ExecError::NullPointer(location));
            };
            let values: Option<Vec<Token>> = self
                .heap
                .array(*array)
                .values
                .iter()
                .map(|v| self.heap.token(v).cloned())
                .collect();
            values.map(Token::array)
        } else {
            let consts: Option<Vec<_>> = args.iter().map(Value::to_const).collect();
            consts.and_then(|c| token_from_construction(&class, &c))
        };
        let token = token.ok_or_else(|| ExecError::Type {
            location,
            message: format!("bad constructor arguments for {}", class),
        })?;
        self.heap.object_mut(*id).token = Some(token);
        Ok(())
    }

    fn token_method(
        &mut self,
        this: &Value,
        method: &str,
        args: &[Value],
        location: Location,
    ) -> Result<Value> {
        let receiver = self
            .heap
            .token(this)
            .cloned()
            .ok_or_else(|| ExecError::NullPointer(location.clone()))?;
        let mut invoke_args = Vec::with_capacity(args.len());
        for arg in args {
            let converted = match self.heap.token(arg) {
                Some(token) => Some(InvokeArg::Token(token.clone())),
                None => arg
                    .to_const()
                    .as_ref()
                    .and_then(const_to_primitive)
                    .map(InvokeArg::Primitive),
            };
            invoke_args.push(converted.ok_or_else(|| ExecError::NullPointer(location.clone()))?);
        }
        match receiver.invoke(method, &invoke_args)? {
            InvokeResult::Token(token) => Ok(Value::Object(self.heap.alloc_token(token))),
            InvokeResult::Primitive(p) => Ok(Value::from(&primitive_to_const(&p))),
            InvokeResult::Unmappable(_) => Err(ExecError::UnsupportedNative {
                class: receiver.value_type().token_class().to_string(),
                method: method.to_string(),
            }),
        }
    }
}

fn type_error(frame: &Frame<'_>, message: String) -> ExecError {
    ExecError::Type {
        location: frame.location(),
        message,
    }
}

fn compare(op: CondOp, lhs: &Value, rhs: &Value, frame: &Frame<'_>) -> Result<bool> {
    match (lhs, rhs) {
        (Value::Double(_), _) | (_, Value::Double(_)) => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Ok(op.test(a, b)),
            _ => Err(type_error(frame, format!("compare {} {} {}", lhs, op.symbol(), rhs))),
        },
        _ => match (lhs.as_i64(), rhs.as_i64()) {
            (Some(a), Some(b)) => Ok(op.test(a, b)),
            _ if matches!(op, CondOp::Eq | CondOp::Ne) => Ok(op.test(lhs == rhs, true)),
            _ => Err(type_error(frame, format!("compare {} {} {}", lhs, op.symbol(), rhs))),
        },
    }
}

fn binary(op: BinOp, a: &Value, b: &Value, frame: &Frame<'_>) -> Result<Value> {
    if let BinOp::Cmp(cond) = op {
        return compare(cond, a, b, frame).map(Value::Bool);
    }
    let invalid = || type_error(frame, format!("{} {} {}", a, op.symbol(), b));
    let by_zero = || ExecError::Arithmetic {
        location: frame.location(),
        message: "division by zero".to_string(),
    };
    Ok(match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(match op {
            BinOp::And => *x && *y,
            BinOp::Or => *x || *y,
            BinOp::Xor => x != y,
            _ => return Err(invalid()),
        }),
        (Value::Double(_), _) | (_, Value::Double(_)) => {
            let (x, y) = (a.as_f64().ok_or_else(invalid)?, b.as_f64().ok_or_else(invalid)?);
            Value::Double(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                BinOp::Div => x / y,
                BinOp::Rem => x % y,
                _ => return Err(invalid()),
            })
        }
        (Value::Int(x), Value::Int(y)) => {
            let (x, y) = (*x, *y);
            Value::Int(match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::Div if y == 0 => return Err(by_zero()),
                BinOp::Div => x.wrapping_div(y),
                BinOp::Rem if y == 0 => return Err(by_zero()),
                BinOp::Rem => x.wrapping_rem(y),
                BinOp::And => x & y,
                BinOp::Or => x | y,
                BinOp::Xor => x ^ y,
                BinOp::Cmp(_) => return Err(invalid()),
            })
        }
        _ => {
            let (x, y) = (a.as_i64().ok_or_else(invalid)?, b.as_i64().ok_or_else(invalid)?);
            Value::Long(match op {
                BinOp::Add => x.wrapping_add(y),
                BinOp::Sub => x.wrapping_sub(y),
                BinOp::Mul => x.wrapping_mul(y),
                BinOp::Div if y == 0 => return Err(by_zero()),
                BinOp::Div => x.wrapping_div(y),
                BinOp::Rem if y == 0 => return Err(by_zero()),
                BinOp::Rem => x.wrapping_rem(y),
                BinOp::And => x & y,
                BinOp::Or => x | y,
                BinOp::Xor => x ^ y,
                BinOp::Cmp(_) => return Err(invalid()),
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BodyBuilder, ClassKind, Cond, Const, Field, FieldRef};
    use crate::library::library_scene;

    /// A library scene plus class `App` with static `main` built by `f`.
    fn program(f: impl FnOnce(&mut BodyBuilder<'_>)) -> Scene {
        let mut scene = library_scene().unwrap();
        let mut class = Class::new("App", Some("Object"), ClassKind::Application);
        class
            .add_field(Field::new_static("buffer", Type::array_of(Type::Int)))
            .unwrap();
        class
            .add_field(Field::new_static("result", Type::Int))
            .unwrap();
        let mut main = Method::new("main", Vec::new(), Type::Void, true, "App");
        {
            let mut b = BodyBuilder::new(main.body.as_mut().unwrap());
            f(&mut b);
            b.append();
        }
        class.add_method(main).unwrap();
        scene.add_class(class).unwrap();
        scene
    }

    fn result_of(scene: &Scene) -> Value {
        let mut interpreter = Interpreter::new(scene);
        interpreter.run_static("App", "main", Vec::new()).unwrap();
        interpreter.static_value("App", "result").cloned().unwrap()
    }

    #[test]
    fn test_counted_loop_and_buffer_traffic() {
        let scene = program(|b| {
            let buffer = FieldRef::new("App", "buffer");
            let array = b.eval(
                "$a",
                Type::array_of(Type::Int),
                Expr::NewArray(Type::Int, Operand::int(1)),
            );
            b.set_static(buffer.clone(), Operand::local(&array));
            let i = b.eval("$i", Type::Int, Expr::constant(Const::Int(0)));
            let (head, end) = (b.label(), b.label());
            b.place_label(&head);
            b.if_goto(Cond::new(CondOp::Ge, Operand::local(&i), Operand::int(3)), &end);
            let buf = b.get_static(buffer.clone(), Type::array_of(Type::Int));
            b.push(Stmt::Assign(
                Place::ArrayElem(Operand::local(&buf), Operand::int(0)),
                Expr::local(&i),
            ));
            let read = b.eval(
                "$v",
                Type::Int,
                Expr::ArrayRead(Operand::local(&buf), Operand::int(0)),
            );
            b.set_static(FieldRef::new("App", "result"), Operand::local(read));
            b.assign(&i, Expr::Binary(BinOp::Add, Operand::local(&i), Operand::int(1)));
            b.goto(&head);
            b.place_label(&end);
            b.ret(None);
        });
        let mut interpreter = Interpreter::new(&scene);
        interpreter.run_static("App", "main", Vec::new()).unwrap();
        assert_eq!(interpreter.static_value("App", "result"), Some(&Value::Int(2)));
        assert_eq!(interpreter.trace().stores_of("buffer"), 3);
        assert_eq!(interpreter.trace().loads_of("buffer"), 3);
        assert_eq!(interpreter.trace().calls_of("App", "main"), 1);
    }

    #[test]
    fn test_token_natives() {
        let scene = program(|b| {
            let one = b.new_object("IntToken", vec![Operand::int(1)]);
            let half = b.new_object("DoubleToken", vec![Operand::Const(Const::Double(0.5))]);
            let sum = b.call(
                "$s",
                InvokeExpr::virtual_call(
                    Operand::local(&one),
                    "Token",
                    "add",
                    vec![Operand::local(&half)],
                    Type::object("Token"),
                ),
            );
            let wide = b.call(
                "$w",
                InvokeExpr::static_call(
                    "Tokens",
                    "convert",
                    vec![Operand::local(&sum), Operand::str("double")],
                    Type::object("Token"),
                ),
            );
            let value = b.call(
                "$d",
                InvokeExpr::virtual_call(
                    Operand::local(&wide),
                    "Token",
                    "doubleValue",
                    Vec::new(),
                    Type::Double,
                ),
            );
            let tenfold = b.eval(
                "$m",
                Type::Double,
                Expr::Binary(BinOp::Mul, Operand::local(&value), Operand::Const(Const::Double(10.0))),
            );
            let scaled = b.eval("$x", Type::Int, Expr::Cast(Type::Int, Operand::local(tenfold)));
            b.set_static(FieldRef::new("App", "result"), Operand::local(scaled));
            b.ret(None);
        });
        assert_eq!(result_of(&scene), Value::Int(15));
    }

    #[test]
    fn test_throw_reports_message() {
        let scene = program(|b| {
            b.throw_error("port has no channel 1");
        });
        let err = Interpreter::new(&scene)
            .run_static("App", "main", Vec::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Thrown(ref m) if m == "port has no channel 1"), "{}", err);
    }

    #[test]
    fn test_index_out_of_bounds() {
        let scene = program(|b| {
            let array = b.eval(
                "$a",
                Type::array_of(Type::Int),
                Expr::NewArray(Type::Int, Operand::int(1)),
            );
            b.eval(
                "$v",
                Type::Int,
                Expr::ArrayRead(Operand::local(array), Operand::int(1)),
            );
            b.ret(None);
        });
        let err = Interpreter::new(&scene)
            .run_static("App", "main", Vec::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::IndexOutOfBounds { index: 1, length: 1, .. }));
    }

    #[test]
    fn test_framework_natives_are_rejected() {
        let scene = program(|b| {
            let port = b.eval("$p", Type::object("IOPort"), Expr::New("IOPort".to_string()));
            b.call(
                "$w",
                InvokeExpr::virtual_call(Operand::local(port), "IOPort", "getWidth", Vec::new(), Type::Int),
            );
            b.ret(None);
        });
        let err = Interpreter::new(&scene)
            .run_static("App", "main", Vec::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedNative { ref method, .. } if method == "getWidth"), "{}", err);
    }

    #[test]
    fn test_cancel_flag_stops_endless_loop() {
        let scene = program(|b| {
            let head = b.label();
            b.place_label(&head);
            b.goto(&head);
        });
        let flag = CancelFlag::new();
        flag.set();
        let err = Interpreter::new(&scene)
            .with_cancel_flag(flag)
            .run_static("App", "main", Vec::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
    }
}
