// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Callables: code objects and the stack machine executing them, functions
//! with closures, bound methods, method wrappers, natives and properties.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use byteorder::{ByteOrder, LittleEndian};
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

use crate::error::{ErrorCode, Result};
use crate::object::Super;
use crate::value::Value;

// Opcode bytes of the serialized instruction stream.
const OP_CONST      : u8 = 0x01;
const OP_ARG        : u8 = 0x02;
const OP_LOAD_CELL  : u8 = 0x03;
const OP_STORE_CELL : u8 = 0x04;
const OP_GET_ATTR   : u8 = 0x05;
const OP_SET_ATTR   : u8 = 0x06;
const OP_DEL_ATTR   : u8 = 0x07;
const OP_GET_ITEM   : u8 = 0x08;
const OP_SET_ITEM   : u8 = 0x09;
const OP_ADD        : u8 = 0x0a;
const OP_MUL        : u8 = 0x0b;
const OP_CALL       : u8 = 0x0c;
const OP_SUPER      : u8 = 0x0d;
const OP_BUILD_TUPLE: u8 = 0x0e;
const OP_POP        : u8 = 0x0f;
const OP_DUP        : u8 = 0x10;
const OP_RETURN     : u8 = 0x11;

const OP_WIDTH: usize = 5;

/// Instructions of the stack machine.
///
/// Attribute names are taken from the constant pool by index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// Push a constant.
    Const(u32),
    /// Push an argument.
    Arg(u32),
    /// Push the contents of a closure cell.
    LoadCell(u32),
    /// Pop a value into a closure cell.
    StoreCell(u32),
    /// Replace the top of stack by one of its attributes.
    GetAttr(u32),
    /// Pop value and object, assign the attribute.
    SetAttr(u32),
    /// Pop object, delete the attribute.
    DelAttr(u32),
    /// Pop key and object, push `object[key]`.
    GetItem,
    /// Pop value, key and object, assign `object[key]`.
    SetItem,
    Add,
    Mul,
    /// Pop n arguments and the callable, push the call result.
    Call(u32),
    /// Pop receiver and class, push a `super` proxy.
    Super,
    BuildTuple(u32),
    Pop,
    Dup,
    Return,
}

impl Op {
    fn encode(self, out: &mut Vec<u8>) {
        let (code, arg) = match self {
            Op::Const(n)      => (OP_CONST, n),
            Op::Arg(n)        => (OP_ARG, n),
            Op::LoadCell(n)   => (OP_LOAD_CELL, n),
            Op::StoreCell(n)  => (OP_STORE_CELL, n),
            Op::GetAttr(n)    => (OP_GET_ATTR, n),
            Op::SetAttr(n)    => (OP_SET_ATTR, n),
            Op::DelAttr(n)    => (OP_DEL_ATTR, n),
            Op::GetItem       => (OP_GET_ITEM, 0),
            Op::SetItem       => (OP_SET_ITEM, 0),
            Op::Add           => (OP_ADD, 0),
            Op::Mul           => (OP_MUL, 0),
            Op::Call(n)       => (OP_CALL, n),
            Op::Super         => (OP_SUPER, 0),
            Op::BuildTuple(n) => (OP_BUILD_TUPLE, n),
            Op::Pop           => (OP_POP, 0),
            Op::Dup           => (OP_DUP, 0),
            Op::Return        => (OP_RETURN, 0),
        };
        let mut buf = [0; OP_WIDTH];
        buf[0] = code;
        LittleEndian::write_u32(&mut buf[1..], arg);
        out.extend_from_slice(&buf);
    }

    fn decode_all(bytes: &[u8]) -> std::result::Result<Vec<Op>, ErrorCode> {
        if bytes.len() % OP_WIDTH != 0 {
            return Err(ErrorCode::CorruptStream("truncated instruction".into()));
        }
        bytes.chunks(OP_WIDTH).map(|chunk| {
            let arg = LittleEndian::read_u32(&chunk[1..]);
            Ok(match chunk[0] {
                OP_CONST       => Op::Const(arg),
                OP_ARG         => Op::Arg(arg),
                OP_LOAD_CELL   => Op::LoadCell(arg),
                OP_STORE_CELL  => Op::StoreCell(arg),
                OP_GET_ATTR    => Op::GetAttr(arg),
                OP_SET_ATTR    => Op::SetAttr(arg),
                OP_DEL_ATTR    => Op::DelAttr(arg),
                OP_GET_ITEM    => Op::GetItem,
                OP_SET_ITEM    => Op::SetItem,
                OP_ADD         => Op::Add,
                OP_MUL         => Op::Mul,
                OP_CALL        => Op::Call(arg),
                OP_SUPER       => Op::Super,
                OP_BUILD_TUPLE => Op::BuildTuple(arg),
                OP_POP         => Op::Pop,
                OP_DUP         => Op::Dup,
                OP_RETURN      => Op::Return,
                other => return Err(ErrorCode::CorruptStream(
                    format!("invalid opcode {:#04x}", other))),
            })
        }).collect()
    }
}

/// Executable body of a function.
pub struct Code {
    name: Rc<str>,
    params: Vec<Rc<str>>,
    consts: Vec<Value>,
    ops: Vec<Op>,
    bytecode: Rc<[u8]>,
}

impl Code {
    pub fn new(name: &str, params: &[&str], consts: Vec<Value>, ops: Vec<Op>) -> Rc<Code> {
        let mut bytecode = Vec::with_capacity(ops.len() * OP_WIDTH);
        for op in &ops {
            op.encode(&mut bytecode);
        }
        Rc::new(Code {
            name: Rc::from(name),
            params: params.iter().map(|&p| Rc::from(p)).collect(),
            consts,
            ops,
            bytecode: Rc::from(bytecode),
        })
    }

    /// Rebuild a code object from its serialized parts.
    pub(crate) fn from_parts(name: Rc<str>, params: Vec<Rc<str>>, consts: Vec<Value>,
                             bytecode: Rc<[u8]>) -> std::result::Result<Code, ErrorCode> {
        let ops = Op::decode_all(&bytecode)?;
        Ok(Code { name, params, consts, ops, bytecode })
    }

    pub fn name(&self) -> Rc<str> { self.name.clone() }
    pub fn params(&self) -> &[Rc<str>] { &self.params }
    pub fn consts(&self) -> &[Value] { &self.consts }
    pub fn ops(&self) -> &[Op] { &self.ops }
    pub fn bytecode(&self) -> Rc<[u8]> { self.bytecode.clone() }

    fn const_at(&self, index: u32) -> Result<Value> {
        self.consts.get(index as usize).cloned().ok_or_else(|| ErrorCode::IndexOutOfRange.into())
    }

    fn name_at(&self, index: u32) -> Result<Rc<str>> {
        match self.const_at(index)? {
            Value::Str(s) => Ok(s),
            other => Err(ErrorCode::TypeMismatch(
                format!("attribute name must be str, not '{}'", other.type_name())).into()),
        }
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Code").field("name", &self.name).field("params", &self.params)
         .field("ops", &self.ops).finish()
    }
}

/// Activation of a code object.
struct Frame<'a> {
    code: &'a Code,
    locals: Vec<Value>,
    closure: &'a [Rc<Cell>],
    stack: Vec<Value>,
}

impl<'a> Frame<'a> {
    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| ErrorCode::StackUnderflow.into())
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
        if self.stack.len() < n {
            return Err(ErrorCode::StackUnderflow.into());
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn cell(&self, index: u32) -> Result<&Rc<Cell>> {
        self.closure.get(index as usize).ok_or_else(|| ErrorCode::IndexOutOfRange.into())
    }

    fn run(&mut self) -> Result<Value> {
        let code = self.code;
        for &op in code.ops() {
            match op {
                Op::Const(n) => {
                    let value = self.code.const_at(n)?;
                    self.stack.push(value);
                }
                Op::Arg(n) => {
                    let value = self.locals.get(n as usize).cloned()
                                           .ok_or(ErrorCode::IndexOutOfRange)?;
                    self.stack.push(value);
                }
                Op::LoadCell(n) => {
                    let value = self.cell(n)?.get().ok_or(ErrorCode::EmptyCell)?;
                    self.stack.push(value);
                }
                Op::StoreCell(n) => {
                    let value = self.pop()?;
                    self.cell(n)?.set(value);
                }
                Op::GetAttr(n) => {
                    let name = self.code.name_at(n)?;
                    let obj = self.pop()?;
                    self.stack.push(obj.get_attr(&name)?);
                }
                Op::SetAttr(n) => {
                    let name = self.code.name_at(n)?;
                    let value = self.pop()?;
                    let obj = self.pop()?;
                    obj.set_attr(&name, value)?;
                }
                Op::DelAttr(n) => {
                    let name = self.code.name_at(n)?;
                    self.pop()?.del_attr(&name)?;
                }
                Op::GetItem => {
                    let key = self.pop()?;
                    let obj = self.pop()?;
                    self.stack.push(obj.get_item(&key)?);
                }
                Op::SetItem => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.pop()?.set_item(key, value)?;
                }
                Op::Add | Op::Mul => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.stack.push(if op == Op::Add { add(&a, &b)? } else { mul(&a, &b)? });
                }
                Op::Call(n) => {
                    let args = self.pop_n(n as usize)?;
                    let callable = self.pop()?;
                    self.stack.push(callable.call(&args)?);
                }
                Op::Super => {
                    let receiver = self.pop()?;
                    let class = match self.pop()? {
                        Value::Class(c) => c,
                        other => return Err(ErrorCode::TypeMismatch(
                            format!("super() argument 1 must be a class, not '{}'",
                                    other.type_name())).into()),
                    };
                    self.stack.push(Value::Super(Super::new(class, receiver)));
                }
                Op::BuildTuple(n) => {
                    let items = self.pop_n(n as usize)?;
                    self.stack.push(Value::tuple(items));
                }
                Op::Pop => { self.pop()?; }
                Op::Dup => {
                    let top = self.stack.last().cloned().ok_or(ErrorCode::StackUnderflow)?;
                    self.stack.push(top);
                }
                Op::Return => return self.pop(),
            }
        }
        Ok(Value::None)
    }
}

enum Number {
    Int(BigInt),
    Float(f64),
    Complex(f64, f64),
}

fn number(value: &Value) -> Option<Number> {
    match *value {
        Value::Bool(b) => Some(Number::Int(BigInt::from(b as u8))),
        Value::Int(ref i) => Some(Number::Int(i.clone())),
        Value::Float(f) => Some(Number::Float(f)),
        Value::Complex(re, im) => Some(Number::Complex(re, im)),
        _ => None,
    }
}

fn to_f64(i: &BigInt) -> f64 {
    i.to_f64().unwrap_or(if i.is_negative() { f64::NEG_INFINITY } else { f64::INFINITY })
}

fn as_complex(n: &Number) -> (f64, f64) {
    match *n {
        Number::Int(ref i) => (to_f64(i), 0.0),
        Number::Float(f) => (f, 0.0),
        Number::Complex(re, im) => (re, im),
    }
}

fn arith(a: Number, b: Number, multiply: bool) -> Value {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Value::Int(if multiply { x * y } else { x + y }),
        (a @ Number::Complex(..), b) | (a, b @ Number::Complex(..)) => {
            let ((ar, ai), (br, bi)) = (as_complex(&a), as_complex(&b));
            if multiply {
                Value::Complex(ar * br - ai * bi, ar * bi + ai * br)
            } else {
                Value::Complex(ar + br, ai + bi)
            }
        }
        (a, b) => {
            let (x, y) = (as_complex(&a).0, as_complex(&b).0);
            Value::Float(if multiply { x * y } else { x + y })
        }
    }
}

fn repeat_count(value: &Value) -> Option<usize> {
    match *value {
        Value::Int(ref i) => Some(if i.is_negative() { 0 } else { i.to_usize()? }),
        Value::Bool(b) => Some(b as usize),
        _ => None,
    }
}

/// The `+` operator.
pub fn add(a: &Value, b: &Value) -> Result<Value> {
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return Ok(arith(x, y, false));
    }
    match (a, b) {
        (&Value::Str(ref x), &Value::Str(ref y)) => Ok(Value::from(format!("{}{}", x, y))),
        (&Value::Bytes(ref x), &Value::Bytes(ref y)) => Ok(Value::bytes(&[&x[..], &y[..]].concat())),
        (&Value::List(ref x), &Value::List(ref y)) => {
            let mut items = x.borrow().clone();
            items.extend(y.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (&Value::Tuple(ref x), &Value::Tuple(ref y)) => {
            let mut items = x.items().clone();
            items.extend(y.items().iter().cloned());
            Ok(Value::tuple(items))
        }
        _ => Err(ErrorCode::TypeMismatch(format!("unsupported operand types for +: '{}' and '{}'",
                                                 a.type_name(), b.type_name())).into()),
    }
}

fn repeat_items(items: &[Value], count: usize) -> Vec<Value> {
    let mut result = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        result.extend(items.iter().cloned());
    }
    result
}

/// The `*` operator.
pub fn mul(a: &Value, b: &Value) -> Result<Value> {
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return Ok(arith(x, y, true));
    }
    let (seq, count) = match repeat_count(b) {
        Some(n) => (a, n),
        None => match repeat_count(a) {
            Some(n) => (b, n),
            None => return Err(ErrorCode::TypeMismatch(format!(
                "unsupported operand types for *: '{}' and '{}'", a.type_name(), b.type_name())).into()),
        },
    };
    match *seq {
        Value::Str(ref s) => Ok(Value::from(s.repeat(count))),
        Value::Bytes(ref s) => Ok(Value::bytes(&s.repeat(count))),
        Value::List(ref l) => Ok(Value::list(repeat_items(&l.borrow(), count))),
        Value::Tuple(ref t) => Ok(Value::tuple(repeat_items(&t.items(), count))),
        _ => Err(ErrorCode::TypeMismatch(format!("can't multiply sequence of type '{}'",
                                                 seq.type_name())).into()),
    }
}

/// A function: code body, default argument values and closure cells.
pub struct Function {
    name: RefCell<Rc<str>>,
    code: RefCell<Rc<Code>>,
    defaults: RefCell<Vec<Value>>,
    closure: RefCell<Vec<Rc<Cell>>>,
}

impl Function {
    pub fn new(code: Rc<Code>, defaults: Vec<Value>, closure: Vec<Rc<Cell>>) -> Rc<Function> {
        Rc::new(Function {
            name: RefCell::new(code.name()),
            code: RefCell::new(code),
            defaults: RefCell::new(defaults),
            closure: RefCell::new(closure),
        })
    }

    pub(crate) fn placeholder() -> Rc<Function> {
        Function::new(Code::new("", &[], vec![], vec![]), vec![], vec![])
    }

    pub fn name(&self) -> Rc<str> { self.name.borrow().clone() }
    pub fn code(&self) -> Rc<Code> { self.code.borrow().clone() }
    pub fn defaults(&self) -> Vec<Value> { self.defaults.borrow().clone() }
    pub fn closure(&self) -> Vec<Rc<Cell>> { self.closure.borrow().clone() }

    pub(crate) fn set_name(&self, name: Rc<str>) { *self.name.borrow_mut() = name; }
    pub(crate) fn set_code(&self, code: Rc<Code>) { *self.code.borrow_mut() = code; }
    pub(crate) fn set_defaults(&self, defaults: Vec<Value>) { *self.defaults.borrow_mut() = defaults; }
    pub(crate) fn set_closure(&self, closure: Vec<Rc<Cell>>) { *self.closure.borrow_mut() = closure; }

    /// Run the function body with positional arguments.  Missing trailing
    /// arguments are taken from the defaults.
    pub fn invoke(&self, args: &[Value]) -> Result<Value> {
        let code = self.code();
        let nparams = code.params().len();
        if args.len() > nparams {
            return Err(ErrorCode::ArgumentMismatch(format!(
                "{}() takes {} arguments but {} were given", self.name(), nparams, args.len())).into());
        }
        let defaults = self.defaults();
        let first_default = nparams.saturating_sub(defaults.len());
        let mut locals = args.to_vec();
        for i in args.len()..nparams {
            if i < first_default {
                return Err(ErrorCode::ArgumentMismatch(format!(
                    "{}() missing argument '{}'", self.name(), code.params()[i])).into());
            }
            locals.push(defaults[i - first_default].clone());
        }
        let closure = self.closure();
        let mut frame = Frame { code: &code, locals, closure: &closure, stack: Vec::new() };
        frame.run()
    }
}

/// Shared mutable storage of a closure variable.
#[derive(Default)]
pub struct Cell {
    contents: RefCell<Option<Value>>,
}

impl Cell {
    pub fn new(contents: Option<Value>) -> Cell {
        Cell { contents: RefCell::new(contents) }
    }

    pub fn get(&self) -> Option<Value> {
        self.contents.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.contents.borrow_mut() = Some(value);
    }

    pub fn clear(&self) {
        *self.contents.borrow_mut() = None;
    }
}

/// A callable bound to the receiver passed as its first argument.
pub struct BoundMethod {
    func: RefCell<Value>,
    receiver: RefCell<Value>,
}

impl BoundMethod {
    pub fn new(func: Value, receiver: Value) -> Value {
        Value::BoundMethod(Rc::new(BoundMethod {
            func: RefCell::new(func),
            receiver: RefCell::new(receiver),
        }))
    }

    pub fn func(&self) -> Value { self.func.borrow().clone() }
    pub fn receiver(&self) -> Value { self.receiver.borrow().clone() }

    pub(crate) fn set(&self, func: Value, receiver: Value) {
        *self.func.borrow_mut() = func;
        *self.receiver.borrow_mut() = receiver;
    }
}

/// Wrapper used for both `classmethod` and `staticmethod`.
pub struct MethodWrapper {
    func: RefCell<Value>,
}

impl MethodWrapper {
    pub fn new(func: Value) -> Rc<MethodWrapper> {
        Rc::new(MethodWrapper { func: RefCell::new(func) })
    }

    pub fn func(&self) -> Value { self.func.borrow().clone() }

    pub(crate) fn set_func(&self, func: Value) {
        *self.func.borrow_mut() = func;
    }
}

pub type NativeFn = fn(&[Value]) -> Result<Value>;

/// A function implemented by the host.  Natives are never reduced; they
/// are encoded by the name they are registered under.
pub struct Native {
    name: Rc<str>,
    func: NativeFn,
}

impl Native {
    pub fn new(name: &str, func: NativeFn) -> Rc<Native> {
        Rc::new(Native { name: Rc::from(name), func })
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }
}

/// Data descriptor with optional getter, setter and deleter.
pub struct Property {
    fget: RefCell<Value>,
    fset: RefCell<Value>,
    fdel: RefCell<Value>,
}

impl Property {
    pub fn new(fget: Option<Value>, fset: Option<Value>, fdel: Option<Value>) -> Rc<Property> {
        Rc::new(Property {
            fget: RefCell::new(fget.unwrap_or(Value::None)),
            fset: RefCell::new(fset.unwrap_or(Value::None)),
            fdel: RefCell::new(fdel.unwrap_or(Value::None)),
        })
    }

    pub fn fget(&self) -> Value { self.fget.borrow().clone() }
    pub fn fset(&self) -> Value { self.fset.borrow().clone() }
    pub fn fdel(&self) -> Value { self.fdel.borrow().clone() }

    pub(crate) fn fill(&self, fget: Value, fset: Value, fdel: Value) {
        *self.fget.borrow_mut() = fget;
        *self.fset.borrow_mut() = fset;
        *self.fdel.borrow_mut() = fdel;
    }

    pub fn get(&self, receiver: &Value, name: &str) -> Result<Value> {
        match self.fget() {
            Value::None => Err(ErrorCode::AttributeNotFound(receiver.type_name(),
                                                            name.into()).into()),
            fget => fget.call(&[receiver.clone()]),
        }
    }

    pub fn set(&self, receiver: &Value, name: &str, value: Value) -> Result<()> {
        match self.fset() {
            Value::None => Err(ErrorCode::ReadOnlyAttribute(name.into()).into()),
            fset => fset.call(&[receiver.clone(), value]).map(|_| ()),
        }
    }

    pub fn delete(&self, receiver: &Value, name: &str) -> Result<()> {
        match self.fdel() {
            Value::None => Err(ErrorCode::ReadOnlyAttribute(name.into()).into()),
            fdel => fdel.call(&[receiver.clone()]).map(|_| ()),
        }
    }
}

impl Value {
    /// Call the value with positional arguments.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match *self {
            Value::Function(ref f) => f.invoke(args),
            Value::BoundMethod(ref m) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(m.receiver());
                full.extend_from_slice(args);
                m.func().call(&full)
            }
            Value::Native(ref n) => n.call(args),
            Value::Class(ref c) => c.instantiate(args),
            Value::StaticMethod(ref w) => w.func().call(args),
            Value::Instance(ref i) => match i.class().lookup("__call__")? {
                Some(call) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(self.clone());
                    full.extend_from_slice(args);
                    call.call(&full)
                }
                None => Err(ErrorCode::NotCallable(self.type_name()).into()),
            },
            _ => Err(ErrorCode::NotCallable(self.type_name()).into()),
        }
    }

    /// Whether `call` can succeed on this value's kind.
    pub fn is_callable(&self) -> bool {
        match *self {
            Value::Function(_) | Value::BoundMethod(_) | Value::Native(_) |
            Value::Class(_) | Value::StaticMethod(_) => true,
            Value::Instance(ref i) => i.class().lookup("__call__").ok().flatten().is_some(),
            _ => false,
        }
    }
}
