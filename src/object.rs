// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Classes, instances and the other objects of the graph that carry
//! behavior: attribute lookup over the MRO, slots, `super`, ranges, slices
//! and iterators.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::code::BoundMethod;
use crate::error::{Error, ErrorCode, Result};
use crate::value::{release, Dict, Set, Value};

/// Built-in classes known to the object model.  Their class objects are
/// created by the `Registry` and are always encoded by name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BuiltinType {
    Object,
    Type,
    Bool,
    Int,
    Float,
    Complex,
    Str,
    Bytes,
    ByteArray,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Range,
    Slice,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 16] = [
        BuiltinType::Object, BuiltinType::Type, BuiltinType::Bool, BuiltinType::Int,
        BuiltinType::Float, BuiltinType::Complex, BuiltinType::Str, BuiltinType::Bytes,
        BuiltinType::ByteArray, BuiltinType::List, BuiltinType::Tuple, BuiltinType::Dict,
        BuiltinType::Set, BuiltinType::FrozenSet, BuiltinType::Range, BuiltinType::Slice,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::Object    => "object",
            BuiltinType::Type      => "type",
            BuiltinType::Bool      => "bool",
            BuiltinType::Int       => "int",
            BuiltinType::Float     => "float",
            BuiltinType::Complex   => "complex",
            BuiltinType::Str       => "str",
            BuiltinType::Bytes     => "bytes",
            BuiltinType::ByteArray => "bytearray",
            BuiltinType::List      => "list",
            BuiltinType::Tuple     => "tuple",
            BuiltinType::Dict      => "dict",
            BuiltinType::Set       => "set",
            BuiltinType::FrozenSet => "frozenset",
            BuiltinType::Range     => "range",
            BuiltinType::Slice     => "slice",
        }
    }

    /// Empty payload carried by instances of subclasses of this type.
    fn empty_payload(self) -> Option<Value> {
        match self {
            BuiltinType::List => Some(Value::list(vec![])),
            BuiltinType::Dict => Some(Value::Dict(Rc::new(RefCell::new(Dict::new())))),
            BuiltinType::Set => Some(Value::Set(Rc::new(RefCell::new(Set::new())))),
            BuiltinType::ByteArray => Some(Value::bytearray(b"")),
            _ => None,
        }
    }
}

/// A class: name, ordered bases, namespace and optional slot declaration.
///
/// All parts are mutable so that the decoder can allocate the class before
/// its bases and namespace, which may refer back to it.
pub struct Class {
    name: RefCell<Rc<str>>,
    bases: RefCell<Vec<Rc<Class>>>,
    namespace: RefCell<Rc<RefCell<Dict>>>,
    slots: RefCell<Option<Vec<Rc<str>>>>,
    builtin: Option<BuiltinType>,
}

impl Class {
    /// Create a class without slots.
    pub fn new(name: &str, bases: Vec<Rc<Class>>, namespace: Dict) -> Rc<Class> {
        Rc::new(Class {
            name: RefCell::new(Rc::from(name)),
            bases: RefCell::new(bases),
            namespace: RefCell::new(Rc::new(RefCell::new(namespace))),
            slots: RefCell::new(None),
            builtin: None,
        })
    }

    /// Create a class whose instances only accept the given attributes
    /// (plus the slots of its bases).
    pub fn with_slots(name: &str, bases: Vec<Rc<Class>>, namespace: Dict,
                      slots: &[&str]) -> Rc<Class> {
        let class = Class::new(name, bases, namespace);
        class.set_slots(Some(slots.iter().map(|&s| Rc::from(s)).collect()));
        class
    }

    pub(crate) fn builtin(ty: BuiltinType, bases: Vec<Rc<Class>>, namespace: Dict) -> Rc<Class> {
        Rc::new(Class {
            name: RefCell::new(Rc::from(ty.name())),
            bases: RefCell::new(bases),
            namespace: RefCell::new(Rc::new(RefCell::new(namespace))),
            slots: RefCell::new(None),
            builtin: Some(ty),
        })
    }

    pub(crate) fn placeholder() -> Rc<Class> {
        Class::new("", vec![], Dict::new())
    }

    pub fn name(&self) -> Rc<str> {
        self.name.borrow().clone()
    }

    pub fn bases(&self) -> Vec<Rc<Class>> {
        self.bases.borrow().clone()
    }

    pub fn namespace(&self) -> Rc<RefCell<Dict>> {
        self.namespace.borrow().clone()
    }

    /// Slots declared by this class itself.
    pub fn slots(&self) -> Option<Vec<Rc<str>>> {
        self.slots.borrow().clone()
    }

    pub fn builtin_type(&self) -> Option<BuiltinType> {
        self.builtin
    }

    pub(crate) fn set_name(&self, name: Rc<str>) {
        *self.name.borrow_mut() = name;
    }

    pub(crate) fn set_bases(&self, bases: Vec<Rc<Class>>) {
        *self.bases.borrow_mut() = bases;
    }

    pub(crate) fn set_namespace(&self, namespace: Rc<RefCell<Dict>>) {
        *self.namespace.borrow_mut() = namespace;
    }

    pub(crate) fn set_slots(&self, slots: Option<Vec<Rc<str>>>) {
        *self.slots.borrow_mut() = slots;
    }

    /// Method resolution order by C3 linearization of the declared bases.
    pub fn mro(self: &Rc<Self>) -> Result<Vec<Rc<Class>>> {
        linearize(self, &mut Vec::new())
    }

    /// Whether `self` is `other` or derives from it.
    pub fn is_subclass(self: &Rc<Self>, other: &Rc<Class>) -> Result<bool> {
        Ok(self.mro()?.iter().any(|c| Rc::ptr_eq(c, other)))
    }

    /// Find a name in the namespaces along the MRO, without binding.
    pub fn lookup(self: &Rc<Self>, name: &str) -> Result<Option<Value>> {
        for class in self.mro()? {
            let found = class.namespace().borrow().get_str(name);
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// The slot names of instances, or `None` if instances get a `__dict__`.
    ///
    /// Instances are slotted only when every user class along the MRO
    /// declares slots; a single class without them reintroduces a dict.
    pub fn slot_layout(self: &Rc<Self>) -> Result<Option<Vec<Rc<str>>>> {
        let mut layout: Vec<Rc<str>> = Vec::new();
        for class in self.mro()?.iter().rev() {
            if class.builtin.is_some() {
                continue;
            }
            match class.slots() {
                Some(slots) => for slot in slots {
                    if !layout.contains(&slot) {
                        layout.push(slot);
                    }
                },
                None => return Ok(None),
            }
        }
        Ok(Some(layout))
    }

    /// The built-in container type this class derives from, if any.
    pub fn builtin_base(self: &Rc<Self>) -> Result<Option<BuiltinType>> {
        Ok(self.mro()?.iter().filter_map(|c| c.builtin)
           .find(|&ty| ty != BuiltinType::Object))
    }

    /// Attribute lookup on the class object itself.
    pub fn get_attr(self: &Rc<Self>, name: &str) -> Result<Value> {
        match name {
            "__name__" => return Ok(Value::Str(self.name())),
            "__bases__" => return Ok(Value::tuple(
                self.bases().into_iter().map(Value::Class).collect())),
            "__mro__" => return Ok(Value::tuple(
                self.mro()?.into_iter().map(Value::Class).collect())),
            "__dict__" => return Ok(Value::MappingProxy(
                Rc::new(MappingProxy::new(self.namespace())))),
            "__slots__" => if let Some(slots) = self.slots() {
                return Ok(Value::tuple(slots.into_iter().map(Value::Str).collect()));
            },
            _ => {}
        }
        match self.lookup(name)? {
            Some(Value::ClassMethod(wrapper)) =>
                Ok(BoundMethod::new(wrapper.func(), Value::Class(self.clone()))),
            Some(Value::StaticMethod(wrapper)) => Ok(wrapper.func()),
            Some(value) => Ok(value),
            None => Err(ErrorCode::AttributeNotFound(format!("type object '{}'", self.name()),
                                                     name.into()).into()),
        }
    }

    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        match name {
            "__name__" | "__bases__" | "__mro__" | "__dict__" | "__slots__" =>
                Err(ErrorCode::ReadOnlyAttribute(name.into()).into()),
            _ => {
                self.namespace().borrow_mut().set_str(name, value);
                Ok(())
            }
        }
    }

    pub fn del_attr(&self, name: &str) -> Result<()> {
        match self.namespace().borrow_mut().remove_str(name) {
            Some(_) => Ok(()),
            None => Err(ErrorCode::AttributeNotFound(format!("type object '{}'", self.name()),
                                                     name.into()).into()),
        }
    }

    /// Create an instance and run `__init__` with the arguments.
    pub fn instantiate(self: &Rc<Self>, args: &[Value]) -> Result<Value> {
        if let Some(ty) = self.builtin {
            return construct_builtin(self, ty, args);
        }
        let instance = Value::Instance(Instance::new(self)?);
        if let Some(init) = self.lookup("__init__")? {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(instance.clone());
            full.extend_from_slice(args);
            init.call(&full)?;
        } else if !args.is_empty() {
            return Err(ErrorCode::ArgumentMismatch(
                format!("{}() takes no arguments", self.name())).into());
        }
        Ok(instance)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<class '{}'>", self.name())
    }
}

fn linearize(class: &Rc<Class>, active: &mut Vec<usize>) -> Result<Vec<Rc<Class>>> {
    let addr = Rc::as_ptr(class) as usize;
    if active.contains(&addr) {
        return Err(ErrorCode::InconsistentMro(class.name().to_string()).into());
    }
    active.push(addr);
    let bases = class.bases();
    let mut sequences = Vec::with_capacity(bases.len() + 1);
    for base in &bases {
        sequences.push(linearize(base, active)?);
    }
    sequences.push(bases);
    active.pop();

    let mut result = vec![class.clone()];
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        // first head that does not appear in the tail of any sequence
        let candidate = sequences.iter().map(|seq| &seq[0]).find(|head| {
            !sequences.iter().any(|seq| seq[1..].iter().any(|c| Rc::ptr_eq(c, head)))
        }).cloned();
        let next = match candidate {
            Some(next) => next,
            None => return Err(ErrorCode::InconsistentMro(class.name().to_string()).into()),
        };
        for seq in &mut sequences {
            if Rc::ptr_eq(&seq[0], &next) {
                seq.remove(0);
            }
        }
        result.push(next);
    }
}

fn construct_builtin(class: &Rc<Class>, ty: BuiltinType, args: &[Value]) -> Result<Value> {
    let arg = args.get(0);
    if args.len() > 1 {
        return Err(ErrorCode::ArgumentMismatch(
            format!("{}() takes at most 1 argument", ty.name())).into());
    }
    match (ty, arg) {
        (BuiltinType::Object, None) => Ok(Value::Instance(Instance::new(class)?)),
        (BuiltinType::Bool, None) => Ok(Value::Bool(false)),
        (BuiltinType::Bool, Some(v)) => Ok(Value::Bool(v.is_truthy())),
        (BuiltinType::Int, None) => Ok(Value::int(0)),
        (BuiltinType::Int, Some(&Value::Int(ref i))) => Ok(Value::Int(i.clone())),
        (BuiltinType::Int, Some(&Value::Bool(b))) => Ok(Value::int(b as i64)),
        (BuiltinType::Float, None) => Ok(Value::Float(0.0)),
        (BuiltinType::Float, Some(&Value::Float(f))) => Ok(Value::Float(f)),
        (BuiltinType::Float, Some(&Value::Int(ref i))) =>
            Ok(Value::Float(i.to_f64().unwrap_or(f64::NAN))),
        (BuiltinType::Str, None) => Ok(Value::str("")),
        (BuiltinType::Str, Some(&Value::Str(ref s))) => Ok(Value::Str(s.clone())),
        (BuiltinType::Str, Some(v)) => Ok(Value::from(v.to_string())),
        (BuiltinType::List, None) => Ok(Value::list(vec![])),
        (BuiltinType::List, Some(v)) => Ok(Value::list(collect_iterable(v)?)),
        (BuiltinType::Tuple, None) => Ok(Value::tuple(vec![])),
        (BuiltinType::Tuple, Some(v)) => Ok(Value::tuple(collect_iterable(v)?)),
        (BuiltinType::Set, None) => Value::set(vec![]),
        (BuiltinType::Set, Some(v)) => Value::set(collect_iterable(v)?),
        (BuiltinType::FrozenSet, None) => Value::frozenset(vec![]),
        (BuiltinType::FrozenSet, Some(v)) => Value::frozenset(collect_iterable(v)?),
        (BuiltinType::Dict, None) => Value::dict(vec![]),
        (BuiltinType::Dict, Some(v)) => {
            let target = Value::dict(vec![])?;
            update_dict(&target, v)?;
            Ok(target)
        }
        (BuiltinType::ByteArray, None) => Ok(Value::bytearray(b"")),
        (BuiltinType::ByteArray, Some(&Value::Bytes(ref b))) => Ok(Value::bytearray(b)),
        _ => Err(ErrorCode::TypeMismatch(
            format!("cannot create '{}' instances from these arguments", ty.name())).into()),
    }
}

/// Exhaust an iterable into a vector of its items.
pub fn collect_iterable(iterable: &Value) -> Result<Vec<Value>> {
    let iter = iterable.iter()?;
    let mut items = Vec::new();
    while let Some(item) = iter.next_item()? {
        items.push(item);
    }
    Ok(items)
}

/// Update a dict (or dict-derived instance) from a mapping or from an
/// iterable of pairs.
pub fn update_dict(target: &Value, source: &Value) -> Result<()> {
    let dict = match *target {
        Value::Dict(ref d) => d.clone(),
        Value::Instance(ref i) => match i.base_value() {
            Some(Value::Dict(d)) => d,
            _ => return Err(ErrorCode::TypeMismatch(
                format!("'{}' is not a dict", target.type_name())).into()),
        },
        _ => return Err(ErrorCode::TypeMismatch(
            format!("'{}' is not a dict", target.type_name())).into()),
    };
    let pairs: Vec<(Value, Value)> = match *source {
        Value::Dict(ref d) => d.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ref other => {
            let mut pairs = Vec::new();
            for item in collect_iterable(other)? {
                let pair = collect_iterable(&item)?;
                if pair.len() != 2 {
                    return Err(ErrorCode::InvalidValue(
                        "dictionary update sequence element must have length 2".into()).into());
                }
                let mut pair = pair.into_iter();
                if let (Some(k), Some(v)) = (pair.next(), pair.next()) {
                    pairs.push((k, v));
                }
            }
            pairs
        }
    };
    let mut dict = dict.borrow_mut();
    for (k, v) in pairs {
        dict.insert(k, v)?;
    }
    Ok(())
}

/// An instance of a class.
pub struct Instance {
    class: RefCell<Rc<Class>>,
    dict: RefCell<Option<Rc<RefCell<Dict>>>>,
    slots: RefCell<Vec<(Rc<str>, Option<Value>)>>,
    base: RefCell<Option<Value>>,
}

impl Instance {
    /// Create an empty instance with the layout its class prescribes.
    pub fn new(class: &Rc<Class>) -> Result<Rc<Instance>> {
        let instance = Instance::placeholder(class.clone());
        instance.bind_class(class)?;
        if let Some(ty) = class.builtin_base()? {
            *instance.base.borrow_mut() = ty.empty_payload();
        }
        Ok(instance)
    }

    pub(crate) fn placeholder(class: Rc<Class>) -> Rc<Instance> {
        Rc::new(Instance {
            class: RefCell::new(class),
            dict: RefCell::new(None),
            slots: RefCell::new(Vec::new()),
            base: RefCell::new(None),
        })
    }

    /// Set the class and derive the attribute layout from it.
    pub(crate) fn bind_class(&self, class: &Rc<Class>) -> Result<()> {
        *self.class.borrow_mut() = class.clone();
        match class.slot_layout()? {
            Some(layout) => {
                *self.dict.borrow_mut() = None;
                *self.slots.borrow_mut() = layout.into_iter().map(|s| (s, None)).collect();
            }
            None => {
                *self.dict.borrow_mut() = Some(Rc::new(RefCell::new(Dict::new())));
                self.slots.borrow_mut().clear();
            }
        }
        Ok(())
    }

    pub fn class(&self) -> Rc<Class> {
        self.class.borrow().clone()
    }

    /// The attribute dictionary, or `None` for slotted instances.
    pub fn dict(&self) -> Option<Rc<RefCell<Dict>>> {
        self.dict.borrow().clone()
    }

    pub fn is_slotted(&self) -> bool {
        self.dict.borrow().is_none()
    }

    pub(crate) fn set_dict(&self, dict: Rc<RefCell<Dict>>) -> Result<()> {
        if self.is_slotted() {
            return Err(ErrorCode::SlotViolation(self.class().name().to_string(),
                                                "__dict__".into()).into());
        }
        *self.dict.borrow_mut() = Some(dict);
        Ok(())
    }

    /// Payload of an instance whose class derives from a built-in container.
    pub fn base_value(&self) -> Option<Value> {
        self.base.borrow().clone()
    }

    pub(crate) fn set_base_value(&self, value: Value) {
        *self.base.borrow_mut() = Some(value);
    }

    pub fn slot(&self, name: &str) -> Option<Value> {
        self.slots.borrow().iter().find(|s| &*s.0 == name).and_then(|s| s.1.clone())
    }

    /// All declared slots with their values; unset slots are `None`.
    pub fn slot_values(&self) -> Vec<(Rc<str>, Option<Value>)> {
        self.slots.borrow().clone()
    }

    pub(crate) fn set_slot(&self, name: &str, value: Option<Value>) -> Result<()> {
        let mut slots = self.slots.borrow_mut();
        match slots.iter_mut().find(|s| &*s.0 == name) {
            Some(slot) => {
                slot.1 = value;
                Ok(())
            }
            None => Err(ErrorCode::SlotViolation(self.class().name().to_string(),
                                                 name.into()).into()),
        }
    }

    fn own_attr(&self, name: &str) -> Option<Value> {
        match self.dict() {
            Some(dict) => dict.borrow().get_str(name),
            None => self.slot(name),
        }
    }

    pub(crate) fn take_children(&mut self, out: &mut Vec<Value>) {
        if let Some(dict) = self.dict.get_mut().take() {
            out.push(Value::Dict(dict));
        }
        out.extend(self.slots.get_mut().drain(..).filter_map(|slot| slot.1));
        if let Some(base) = self.base.get_mut().take() {
            out.push(base);
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let mut children = Vec::new();
        self.take_children(&mut children);
        release(children);
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<{} object>", self.class().name())
    }
}

/// Bind an attribute found on a class to the receiver it was looked up on.
pub(crate) fn bind(attr: Value, receiver: &Value, class: &Rc<Class>) -> Value {
    match attr {
        Value::Function(_) | Value::Native(_) => BoundMethod::new(attr, receiver.clone()),
        Value::ClassMethod(wrapper) => BoundMethod::new(wrapper.func(), Value::Class(class.clone())),
        Value::StaticMethod(wrapper) => wrapper.func(),
        other => other,
    }
}

fn instance_get_attr(instance: &Rc<Instance>, this: &Value, name: &str) -> Result<Value> {
    let class = instance.class();
    match name {
        "__class__" => return Ok(Value::Class(class)),
        "__dict__" => if let Some(dict) = instance.dict() {
            return Ok(Value::Dict(dict));
        },
        _ => {}
    }
    let class_attr = class.lookup(name)?;
    if let Some(Value::Property(ref property)) = class_attr {
        return property.get(this, name);
    }
    if let Some(value) = instance.own_attr(name) {
        return Ok(value);
    }
    match class_attr {
        Some(attr) => Ok(bind(attr, this, &class)),
        None => Err(ErrorCode::AttributeNotFound(class.name().to_string(), name.into()).into()),
    }
}

fn instance_set_attr(instance: &Rc<Instance>, this: &Value, name: &str,
                     value: Value) -> Result<()> {
    let class = instance.class();
    if let Some(Value::Property(property)) = class.lookup(name)? {
        return property.set(this, name, value);
    }
    match instance.dict() {
        Some(dict) => {
            dict.borrow_mut().set_str(name, value);
            Ok(())
        }
        None => instance.set_slot(name, Some(value)),
    }
}

fn instance_del_attr(instance: &Rc<Instance>, this: &Value, name: &str) -> Result<()> {
    let class = instance.class();
    if let Some(Value::Property(property)) = class.lookup(name)? {
        return property.delete(this, name);
    }
    let removed = match instance.dict() {
        Some(dict) => dict.borrow_mut().remove_str(name).is_some(),
        None => {
            let present = instance.slot(name).is_some();
            instance.set_slot(name, None)?;
            present
        }
    };
    if removed {
        Ok(())
    } else {
        Err(ErrorCode::AttributeNotFound(class.name().to_string(), name.into()).into())
    }
}

/// Proxy resuming attribute lookup after `thisclass` in the MRO of the
/// receiver's type.
pub struct Super {
    thisclass: RefCell<Rc<Class>>,
    receiver: RefCell<Value>,
}

impl Super {
    pub fn new(thisclass: Rc<Class>, receiver: Value) -> Rc<Super> {
        Rc::new(Super { thisclass: RefCell::new(thisclass), receiver: RefCell::new(receiver) })
    }

    pub fn thisclass(&self) -> Rc<Class> {
        self.thisclass.borrow().clone()
    }

    pub fn receiver(&self) -> Value {
        self.receiver.borrow().clone()
    }

    pub(crate) fn set_thisclass(&self, class: Rc<Class>) {
        *self.thisclass.borrow_mut() = class;
    }

    pub(crate) fn set_receiver(&self, receiver: Value) {
        *self.receiver.borrow_mut() = receiver;
    }

    pub fn get_attr(&self, name: &str) -> Result<Value> {
        let thisclass = self.thisclass();
        let receiver = self.receiver();
        let ty = match receiver {
            Value::Instance(ref i) => i.class(),
            Value::Class(ref c) => c.clone(),
            ref other => return Err(ErrorCode::TypeMismatch(
                format!("super() receiver must be an instance or class, not '{}'",
                        other.type_name())).into()),
        };
        let mro = ty.mro()?;
        let start = match mro.iter().position(|c| Rc::ptr_eq(c, &thisclass)) {
            Some(pos) => pos + 1,
            None => return Err(ErrorCode::TypeMismatch(
                "super(type, obj): obj must be an instance or subtype of type".into()).into()),
        };
        for class in &mro[start..] {
            let found = class.namespace().borrow().get_str(name);
            match found {
                Some(Value::Property(ref property)) if matches!(receiver, Value::Instance(_)) =>
                    return property.get(&receiver, name),
                Some(attr) => return Ok(match receiver {
                    Value::Class(_) => match attr {
                        Value::ClassMethod(w) => BoundMethod::new(w.func(), receiver.clone()),
                        Value::StaticMethod(w) => w.func(),
                        other => other,
                    },
                    _ => bind(attr, &receiver, &ty),
                }),
                None => {}
            }
        }
        Err(ErrorCode::AttributeNotFound("super".into(), name.into()).into())
    }
}

/// Arithmetic progression of integers.
#[derive(Clone, Debug)]
pub struct Range {
    start: BigInt,
    stop: BigInt,
    step: BigInt,
}

impl Range {
    pub fn new(start: BigInt, stop: BigInt, step: BigInt) -> Result<Range> {
        if step.is_zero() {
            return Err(ErrorCode::InvalidValue("range() arg 3 must not be zero".into()).into());
        }
        Ok(Range { start, stop, step })
    }

    pub fn start(&self) -> &BigInt { &self.start }
    pub fn stop(&self) -> &BigInt { &self.stop }
    pub fn step(&self) -> &BigInt { &self.step }

    /// Number of elements.
    pub fn len(&self) -> BigInt {
        let zero = BigInt::zero();
        let one = BigInt::from(1);
        if self.step.is_positive() && self.start < self.stop {
            (&self.stop - &self.start - &one) / &self.step + one
        } else if self.step.is_negative() && self.start > self.stop {
            (&self.start - &self.stop - &one) / (-&self.step) + one
        } else {
            zero
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len().is_zero()
    }

    /// Element at a non-negative index, if within the range.
    pub fn get(&self, index: &BigInt) -> Option<BigInt> {
        if index.is_negative() || index >= &self.len() {
            None
        } else {
            Some(&self.start + index * &self.step)
        }
    }

    /// Iterator over the range's values.
    pub fn iter(self: &Rc<Self>) -> Value {
        Value::Iterator(Rc::new(SeqIter::new(Value::Range(self.clone()))))
    }
}

/// A slice object with arbitrary start, stop and step values.
pub struct Slice {
    start: RefCell<Value>,
    stop: RefCell<Value>,
    step: RefCell<Value>,
}

fn slice_index(value: &Value) -> Result<Option<isize>> {
    match *value {
        Value::None => Ok(None),
        Value::Bool(b) => Ok(Some(b as isize)),
        // out-of-range bounds are clamped anyway
        Value::Int(ref i) => Ok(Some(i.to_isize().unwrap_or(
            if i.is_negative() { isize::MIN } else { isize::MAX }))),
        ref other => Err(ErrorCode::TypeMismatch(
            format!("slice indices must be integers or None, not '{}'", other.type_name())).into()),
    }
}

impl Slice {
    pub fn new(start: Value, stop: Value, step: Value) -> Slice {
        Slice { start: RefCell::new(start), stop: RefCell::new(stop), step: RefCell::new(step) }
    }

    pub fn start(&self) -> Value { self.start.borrow().clone() }
    pub fn stop(&self) -> Value { self.stop.borrow().clone() }
    pub fn step(&self) -> Value { self.step.borrow().clone() }

    pub(crate) fn set(&self, start: Value, stop: Value, step: Value) {
        *self.start.borrow_mut() = start;
        *self.stop.borrow_mut() = stop;
        *self.step.borrow_mut() = step;
    }

    /// Resolve the slice against a sequence length into (start, stop, step),
    /// clamping the bounds the way sequence slicing does.
    pub fn indices(&self, len: usize) -> Result<(isize, isize, isize)> {
        let len = len as isize;
        let step = slice_index(&self.step())?.unwrap_or(1);
        if step == 0 {
            return Err(ErrorCode::InvalidValue("slice step cannot be zero".into()).into());
        }
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(i) if i < 0 => (i.saturating_add(len)).max(lower),
            Some(i) => i.min(upper),
        };
        let start = clamp(slice_index(&self.start())?, if step < 0 { upper } else { lower });
        let stop = clamp(slice_index(&self.stop())?, if step < 0 { lower } else { upper });
        Ok((start, stop, step))
    }

    /// The positions selected by the slice in a sequence of `len` items.
    pub fn positions(&self, len: usize) -> Result<Vec<usize>> {
        let (start, stop, step) = self.indices(len)?;
        let mut positions = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            positions.push(i as usize);
            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(positions)
    }
}

/// Iterator over a sequence, resuming at its cursor.
pub struct SeqIter {
    source: RefCell<Value>,
    index: RefCell<usize>,
}

impl SeqIter {
    pub fn new(source: Value) -> SeqIter {
        SeqIter::at(source, 0)
    }

    pub fn at(source: Value, index: usize) -> SeqIter {
        SeqIter { source: RefCell::new(source), index: RefCell::new(index) }
    }

    pub fn source(&self) -> Value {
        self.source.borrow().clone()
    }

    pub fn index(&self) -> usize {
        *self.index.borrow()
    }

    pub(crate) fn set(&self, source: Value, index: usize) {
        *self.source.borrow_mut() = source;
        *self.index.borrow_mut() = index;
    }

    pub fn next(&self) -> Result<Option<Value>> {
        let index = self.index();
        let item = match self.source() {
            Value::List(ref l) => l.borrow().get(index).cloned(),
            Value::Tuple(ref t) => t.items().get(index).cloned(),
            Value::Str(ref s) => s.chars().nth(index).map(|c| Value::from(c.to_string())),
            Value::Bytes(ref b) => b.get(index).map(|&c| Value::int(c)),
            Value::ByteArray(ref b) => b.borrow().get(index).map(|&c| Value::int(c)),
            Value::Range(ref r) => r.get(&BigInt::from(index)).map(Value::Int),
            Value::MemoryView(ref m) => m.get(index).map(Value::int),
            ref other => return Err(ErrorCode::TypeMismatch(
                format!("'{}' object is not iterable", other.type_name())).into()),
        };
        if item.is_some() {
            *self.index.borrow_mut() = index + 1;
        }
        Ok(item)
    }
}

/// Read-only view of a mapping.  Class namespaces are handed out this way,
/// so they can only be changed through attribute assignment on the class.
pub struct MappingProxy {
    mapping: RefCell<Rc<RefCell<Dict>>>,
}

impl MappingProxy {
    pub fn new(mapping: Rc<RefCell<Dict>>) -> MappingProxy {
        MappingProxy { mapping: RefCell::new(mapping) }
    }

    pub fn mapping(&self) -> Rc<RefCell<Dict>> {
        self.mapping.borrow().clone()
    }

    pub(crate) fn set_mapping(&self, mapping: Rc<RefCell<Dict>>) {
        *self.mapping.borrow_mut() = mapping;
    }
}

/// A window on the bytes of a `bytes` or `bytearray` object.
///
/// The view does not copy: changes to a `bytearray` source show through.
/// A window reaching past the end of the source is cut off there.
pub struct MemoryView {
    source: RefCell<Value>,
    offset: RefCell<usize>,
    /// `None` extends the window to the end of the source.
    length: RefCell<Option<usize>>,
}

fn check_view_source(source: &Value) -> Result<()> {
    match *source {
        Value::Bytes(_) | Value::ByteArray(_) => Ok(()),
        ref other => Err(ErrorCode::TypeMismatch(format!(
            "memoryview: a bytes-like object is required, not '{}'", other.type_name())).into()),
    }
}

impl MemoryView {
    pub fn new(source: Value, offset: usize, length: Option<usize>) -> Result<MemoryView> {
        check_view_source(&source)?;
        Ok(MemoryView {
            source: RefCell::new(source),
            offset: RefCell::new(offset),
            length: RefCell::new(length),
        })
    }

    pub(crate) fn placeholder() -> MemoryView {
        MemoryView {
            source: RefCell::new(Value::bytes(b"")),
            offset: RefCell::new(0),
            length: RefCell::new(None),
        }
    }

    pub fn source(&self) -> Value {
        self.source.borrow().clone()
    }

    pub fn offset(&self) -> usize {
        *self.offset.borrow()
    }

    pub fn length(&self) -> Option<usize> {
        *self.length.borrow()
    }

    pub(crate) fn set_source(&self, source: Value) -> Result<()> {
        check_view_source(&source)?;
        *self.source.borrow_mut() = source;
        Ok(())
    }

    pub(crate) fn set_window(&self, offset: usize, length: Option<usize>) {
        *self.offset.borrow_mut() = offset;
        *self.length.borrow_mut() = length;
    }

    /// Whether the source bytes can never change.
    pub fn is_readonly(&self) -> bool {
        match *self.source.borrow() {
            Value::ByteArray(_) => false,
            _ => true,
        }
    }

    fn window(&self, source_len: usize) -> (usize, usize) {
        let start = self.offset().min(source_len);
        let end = match self.length() {
            Some(length) => start.saturating_add(length).min(source_len),
            None => source_len,
        };
        (start, end)
    }

    /// Copy of the bytes currently visible through the view.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self.source.borrow() {
            Value::Bytes(ref b) => {
                let (start, end) = self.window(b.len());
                b[start..end].to_vec()
            }
            Value::ByteArray(ref b) => {
                let b = b.borrow();
                let (start, end) = self.window(b.len());
                b[start..end].to_vec()
            }
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.to_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.to_bytes().get(index).cloned()
    }
}

/// Pairs the items of an iterator with a running count.
pub struct Enumerate {
    iter: RefCell<Value>,
    count: RefCell<BigInt>,
}

impl Enumerate {
    pub fn new(iter: Value, count: BigInt) -> Enumerate {
        Enumerate { iter: RefCell::new(iter), count: RefCell::new(count) }
    }

    pub fn iter(&self) -> Value {
        self.iter.borrow().clone()
    }

    pub fn count(&self) -> BigInt {
        self.count.borrow().clone()
    }

    pub(crate) fn set(&self, iter: Value, count: BigInt) {
        *self.iter.borrow_mut() = iter;
        *self.count.borrow_mut() = count;
    }

    pub fn next(&self) -> Result<Option<Value>> {
        match self.iter().next_item()? {
            Some(item) => {
                let count = self.count();
                *self.count.borrow_mut() = &count + 1;
                Ok(Some(Value::tuple(vec![Value::Int(count), item])))
            }
            None => Ok(None),
        }
    }
}

/// Identity-only object, encoded by its registry name.
#[derive(Debug)]
pub struct Opaque {
    name: Rc<str>,
}

impl Opaque {
    pub fn new(name: &str) -> Rc<Opaque> {
        Rc::new(Opaque { name: Rc::from(name) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Host object of a type the object model does not know.
///
/// It can only be encoded if a `ForeignCodec` for its type name is
/// registered, or if the object itself is registered by name.
pub struct Foreign {
    type_name: Rc<str>,
    object: Box<dyn Any>,
}

impl Foreign {
    pub fn new<T: Any>(type_name: &str, object: T) -> Rc<Foreign> {
        Rc::new(Foreign { type_name: Rc::from(type_name), object: Box::new(object) })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref()
    }
}

impl Value {
    /// Attribute lookup (`obj.name`).
    pub fn get_attr(&self, name: &str) -> Result<Value> {
        let not_found = || -> Error { ErrorCode::AttributeNotFound(self.type_name(), name.into()).into() };
        match *self {
            Value::Instance(ref i) => instance_get_attr(i, self, name),
            Value::Class(ref c) => c.get_attr(name),
            Value::Super(ref s) => s.get_attr(name),
            Value::Function(ref f) => match name {
                "__name__" => Ok(Value::Str(f.name())),
                "__code__" => Ok(Value::Code(f.code())),
                "__defaults__" => Ok(Value::tuple(f.defaults())),
                "__closure__" => {
                    let closure = f.closure();
                    Ok(if closure.is_empty() {
                        Value::None
                    } else {
                        Value::tuple(closure.into_iter().map(Value::Cell).collect())
                    })
                }
                _ => Err(not_found()),
            },
            Value::BoundMethod(ref m) => match name {
                "__func__" => Ok(m.func()),
                "__self__" => Ok(m.receiver()),
                _ => m.func().get_attr(name),
            },
            Value::ClassMethod(ref w) | Value::StaticMethod(ref w) => match name {
                "__func__" => Ok(w.func()),
                _ => Err(not_found()),
            },
            Value::Property(ref p) => match name {
                "fget" => Ok(p.fget()),
                "fset" => Ok(p.fset()),
                "fdel" => Ok(p.fdel()),
                _ => Err(not_found()),
            },
            Value::Native(ref n) => match name {
                "__name__" => Ok(Value::str(n.name())),
                _ => Err(not_found()),
            },
            Value::Code(ref c) => match name {
                "co_name" => Ok(Value::Str(c.name())),
                "co_varnames" => Ok(Value::tuple(
                    c.params().iter().cloned().map(Value::Str).collect())),
                "co_consts" => Ok(Value::tuple(c.consts().to_vec())),
                "co_code" => Ok(Value::Bytes(c.bytecode())),
                _ => Err(not_found()),
            },
            Value::Cell(ref c) => match name {
                "cell_contents" => c.get().ok_or_else(|| ErrorCode::EmptyCell.into()),
                _ => Err(not_found()),
            },
            Value::Range(ref r) => match name {
                "start" => Ok(Value::Int(r.start().clone())),
                "stop" => Ok(Value::Int(r.stop().clone())),
                "step" => Ok(Value::Int(r.step().clone())),
                _ => Err(not_found()),
            },
            Value::Slice(ref s) => match name {
                "start" => Ok(s.start()),
                "stop" => Ok(s.stop()),
                "step" => Ok(s.step()),
                _ => Err(not_found()),
            },
            Value::Complex(re, im) => match name {
                "real" => Ok(Value::Float(re)),
                "imag" => Ok(Value::Float(im)),
                _ => Err(not_found()),
            },
            Value::MemoryView(ref m) => match name {
                "obj" => Ok(m.source()),
                "nbytes" => Ok(Value::int(m.len() as u64)),
                "readonly" => Ok(Value::Bool(m.is_readonly())),
                _ => Err(not_found()),
            },
            _ => Err(not_found()),
        }
    }

    /// Attribute assignment (`obj.name = value`).
    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        match *self {
            Value::Instance(ref i) => instance_set_attr(i, self, name, value),
            Value::Class(ref c) => c.set_attr(name, value),
            Value::Cell(ref c) if name == "cell_contents" => {
                c.set(value);
                Ok(())
            }
            _ => Err(ErrorCode::AttributeNotFound(self.type_name(), name.into()).into()),
        }
    }

    /// Attribute deletion (`del obj.name`).
    pub fn del_attr(&self, name: &str) -> Result<()> {
        match *self {
            Value::Instance(ref i) => instance_del_attr(i, self, name),
            Value::Class(ref c) => c.del_attr(name),
            Value::Cell(ref c) if name == "cell_contents" => {
                c.clear();
                Ok(())
            }
            _ => Err(ErrorCode::AttributeNotFound(self.type_name(), name.into()).into()),
        }
    }

    /// Subscription (`obj[key]`), including slicing of sequences.
    pub fn get_item(&self, key: &Value) -> Result<Value> {
        match *self {
            Value::List(ref l) => sequence_item(&l.borrow(), key, Value::list),
            Value::Tuple(ref t) => sequence_item(&t.items(), key, Value::tuple),
            Value::Str(ref s) => {
                let chars: Vec<char> = s.chars().collect();
                match *key {
                    Value::Slice(ref sl) => Ok(Value::from(
                        sl.positions(chars.len())?.into_iter().map(|i| chars[i]).collect::<String>())),
                    _ => Ok(Value::from(chars[sequence_index(chars.len(), key)?].to_string())),
                }
            }
            Value::Bytes(ref b) => match *key {
                Value::Slice(ref sl) => Ok(Value::bytes(
                    &sl.positions(b.len())?.into_iter().map(|i| b[i]).collect::<Vec<u8>>())),
                _ => Ok(Value::int(b[sequence_index(b.len(), key)?])),
            },
            Value::ByteArray(ref b) => {
                let b = b.borrow();
                match *key {
                    Value::Slice(ref sl) => Ok(Value::bytearray(
                        &sl.positions(b.len())?.into_iter().map(|i| b[i]).collect::<Vec<u8>>())),
                    _ => Ok(Value::int(b[sequence_index(b.len(), key)?])),
                }
            }
            Value::Range(ref r) => match *key {
                Value::Int(ref i) => {
                    let index = if i.is_negative() { r.len() + i } else { i.clone() };
                    r.get(&index).map(Value::Int).ok_or_else(|| ErrorCode::IndexOutOfRange.into())
                }
                _ => Err(ErrorCode::TypeMismatch("range indices must be integers".into()).into()),
            },
            Value::MemoryView(ref m) => {
                let b = m.to_bytes();
                match *key {
                    Value::Slice(ref sl) => Ok(Value::bytes(
                        &sl.positions(b.len())?.into_iter().map(|i| b[i]).collect::<Vec<u8>>())),
                    _ => Ok(Value::int(b[sequence_index(b.len(), key)?])),
                }
            }
            Value::Dict(ref d) => d.borrow().get(key)?
                .ok_or_else(|| ErrorCode::KeyNotFound(key.to_string()).into()),
            Value::MappingProxy(ref p) => p.mapping().borrow().get(key)?
                .ok_or_else(|| ErrorCode::KeyNotFound(key.to_string()).into()),
            Value::Instance(ref i) => match i.base_value() {
                Some(base) => base.get_item(key),
                None => Err(ErrorCode::TypeMismatch(
                    format!("'{}' object is not subscriptable", self.type_name())).into()),
            },
            _ => Err(ErrorCode::TypeMismatch(
                format!("'{}' object is not subscriptable", self.type_name())).into()),
        }
    }

    /// Item assignment (`obj[key] = value`).
    pub fn set_item(&self, key: Value, value: Value) -> Result<()> {
        match *self {
            Value::List(ref l) => {
                let mut items = l.borrow_mut();
                let index = sequence_index(items.len(), &key)?;
                items[index] = value;
                Ok(())
            }
            Value::Dict(ref d) => {
                d.borrow_mut().insert(key, value)?;
                Ok(())
            }
            Value::Instance(ref i) => match i.base_value() {
                Some(base) => base.set_item(key, value),
                None => Err(ErrorCode::TypeMismatch(format!(
                    "'{}' object does not support item assignment", self.type_name())).into()),
            },
            _ => Err(ErrorCode::TypeMismatch(format!(
                "'{}' object does not support item assignment", self.type_name())).into()),
        }
    }

    /// Number of items of a container.
    pub fn length(&self) -> Result<usize> {
        Ok(match *self {
            Value::Str(ref s) => s.chars().count(),
            Value::Bytes(ref b) => b.len(),
            Value::ByteArray(ref b) => b.borrow().len(),
            Value::List(ref l) => l.borrow().len(),
            Value::Tuple(ref t) => t.len(),
            Value::Dict(ref d) => d.borrow().len(),
            Value::Set(ref s) => s.borrow().len(),
            Value::FrozenSet(ref s) => s.items().len(),
            Value::MappingProxy(ref p) => p.mapping().borrow().len(),
            Value::MemoryView(ref m) => m.len(),
            Value::Range(ref r) => r.len().to_usize().ok_or_else(|| ErrorCode::InvalidValue(
                "range too large".into()))?,
            Value::Instance(ref i) => match i.base_value() {
                Some(base) => return base.length(),
                None => return Err(ErrorCode::TypeMismatch(
                    format!("object of type '{}' has no len()", self.type_name())).into()),
            },
            _ => return Err(ErrorCode::TypeMismatch(
                format!("object of type '{}' has no len()", self.type_name())).into()),
        })
    }

    /// Get an iterator over the value (`iter(obj)`).
    pub fn iter(&self) -> Result<Value> {
        let source = match *self {
            Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Bytes(_) |
            Value::ByteArray(_) | Value::Range(_) | Value::MemoryView(_) => self.clone(),
            // unordered and mapping kinds iterate over a snapshot
            Value::Dict(ref d) => Value::tuple(d.borrow().keys().cloned().collect()),
            Value::MappingProxy(ref p) => Value::tuple(p.mapping().borrow().keys().cloned().collect()),
            Value::Set(ref s) => Value::tuple(s.borrow().iter().cloned().collect()),
            Value::FrozenSet(ref s) => Value::tuple(s.items().iter().cloned().collect()),
            Value::Iterator(_) | Value::Enumerate(_) => return Ok(self.clone()),
            Value::Instance(ref i) => match i.base_value() {
                Some(base) => return base.iter(),
                None => return Err(ErrorCode::TypeMismatch(
                    format!("'{}' object is not iterable", self.type_name())).into()),
            },
            _ => return Err(ErrorCode::TypeMismatch(
                format!("'{}' object is not iterable", self.type_name())).into()),
        };
        Ok(Value::Iterator(Rc::new(SeqIter::new(source))))
    }

    /// Advance an iterator value; `None` when exhausted.
    pub fn next_item(&self) -> Result<Option<Value>> {
        match *self {
            Value::Iterator(ref it) => it.next(),
            Value::Enumerate(ref e) => e.next(),
            _ => Err(ErrorCode::TypeMismatch(
                format!("'{}' object is not an iterator", self.type_name())).into()),
        }
    }
}

fn sequence_index(len: usize, key: &Value) -> Result<usize> {
    let index = match *key {
        Value::Int(ref i) => i.to_isize().ok_or(ErrorCode::IndexOutOfRange)?,
        Value::Bool(b) => b as isize,
        ref other => return Err(ErrorCode::TypeMismatch(
            format!("indices must be integers, not '{}'", other.type_name())).into()),
    };
    let index = if index < 0 { index + len as isize } else { index };
    if index < 0 || index >= len as isize {
        return Err(ErrorCode::IndexOutOfRange.into());
    }
    Ok(index as usize)
}

fn sequence_item<F>(items: &[Value], key: &Value, make: F) -> Result<Value>
    where F: FnOnce(Vec<Value>) -> Value
{
    match *key {
        Value::Slice(ref s) => Ok(make(s.positions(items.len())?.into_iter()
                                        .map(|i| items[i].clone()).collect())),
        _ => Ok(items[sequence_index(items.len(), key)?].clone()),
    }
}
