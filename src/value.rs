// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Values of the object graph, and the containers they are built from.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt::{self, Write};
use std::mem;
use std::rc::Rc;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

pub use crate::value_impls::{to_value, from_value};

use crate::code::{BoundMethod, Cell, Code, Function, MethodWrapper, Native, Property};
use crate::error::{ErrorCode, Result};
use crate::object::{Class, Enumerate, Foreign, Instance, MappingProxy, MemoryView, Opaque, Range,
                    SeqIter, Slice, Super};

/// A node of an object graph.
///
/// Atomic values without identity (`None`, numbers, booleans) are stored
/// inline.  Everything else lives behind an `Rc`, and the pointer of that
/// `Rc` is the object's identity: cloning a `Value` clones the reference,
/// never the object.  Mutable kinds use `RefCell`s, so shared and cyclic
/// structures can be built and mutated in place.
#[derive(Clone)]
pub enum Value {
    /// None
    None,
    /// The `NotImplemented` singleton
    NotImplemented,
    /// The `Ellipsis` singleton
    Ellipsis,
    /// Boolean
    Bool(bool),
    /// Integer (unbounded length)
    Int(BigInt),
    /// Float
    Float(f64),
    /// Complex number (real, imaginary)
    Complex(f64, f64),
    /// Unicode string
    Str(Rc<str>),
    /// Bytestring
    Bytes(Rc<[u8]>),
    /// Mutable bytestring
    ByteArray(Rc<RefCell<Vec<u8>>>),
    /// List
    List(Rc<List>),
    /// Tuple
    Tuple(Rc<Tuple>),
    /// Dictionary (insertion ordered map)
    Dict(Rc<RefCell<Dict>>),
    /// Set
    Set(Rc<RefCell<Set>>),
    /// Frozen (immutable) set
    FrozenSet(Rc<FrozenSet>),
    /// Class object
    Class(Rc<Class>),
    /// Instance of a class
    Instance(Rc<Instance>),
    /// Function with code, defaults and closure
    Function(Rc<Function>),
    /// Code body of a function
    Code(Rc<Code>),
    /// Closure cell
    Cell(Rc<Cell>),
    /// Callable bound to a receiver
    BoundMethod(Rc<BoundMethod>),
    /// `classmethod` wrapper
    ClassMethod(Rc<MethodWrapper>),
    /// `staticmethod` wrapper
    StaticMethod(Rc<MethodWrapper>),
    /// Native function provided by the host
    Native(Rc<Native>),
    /// Property descriptor
    Property(Rc<Property>),
    /// `super` proxy
    Super(Rc<Super>),
    /// Integer range
    Range(Rc<Range>),
    /// Slice object
    Slice(Rc<Slice>),
    /// Iterator over a sequence
    Iterator(Rc<SeqIter>),
    /// `enumerate` iterator
    Enumerate(Rc<Enumerate>),
    /// Read-only view of a mapping
    MappingProxy(Rc<MappingProxy>),
    /// View on a window of the bytes of a `bytes` or `bytearray`
    MemoryView(Rc<MemoryView>),
    /// Identity-only singleton, resolved by name
    Opaque(Rc<Opaque>),
    /// Host object of a type unknown to the object model
    Foreign(Rc<Foreign>),
}

/// Mutable sequence.
#[derive(Default)]
pub struct List {
    items: RefCell<Vec<Value>>,
}

impl List {
    pub fn new(items: Vec<Value>) -> List {
        List { items: RefCell::new(items) }
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.items.borrow_mut()
    }
}

/// Immutable sequence.
///
/// The items can only be set once by the decoder, which has to hand out the
/// tuple before its items are known when the tuple is part of a cycle.
#[derive(Default)]
pub struct Tuple {
    items: RefCell<Vec<Value>>,
}

impl Tuple {
    pub fn new(items: Vec<Value>) -> Tuple {
        Tuple { items: RefCell::new(items) }
    }

    pub fn items(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub(crate) fn fill(&self, items: Vec<Value>) {
        *self.items.borrow_mut() = items;
    }
}

/// Insertion ordered mapping with keys unique by equality.
#[derive(Clone, Default)]
pub struct Dict {
    entries: IndexMap<HashKey, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Dict {
        Dict::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a pair, returning the previous value for an equal key.  The
    /// key object that was inserted first is kept.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<Option<Value>> {
        let hkey = key.hash_key()?;
        Ok(match self.entries.get_mut(&hkey) {
            Some(entry) => Some(mem::replace(&mut entry.1, value)),
            None => {
                self.entries.insert(hkey, (key, value));
                None
            }
        })
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        Ok(self.entries.get(&key.hash_key()?).map(|entry| entry.1.clone()))
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool> {
        Ok(self.entries.contains_key(&key.hash_key()?))
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>> {
        Ok(self.entries.shift_remove(&key.hash_key()?).map(|entry| entry.1))
    }

    /// Lookup by string key, as done for attribute dictionaries.
    pub fn get_str(&self, name: &str) -> Option<Value> {
        self.entries.get(&HashKey::Str(Rc::from(name))).map(|entry| entry.1.clone())
    }

    pub fn set_str(&mut self, name: &str, value: Value) {
        let name: Rc<str> = Rc::from(name);
        match self.entries.get_mut(&HashKey::Str(name.clone())) {
            Some(entry) => entry.1 = value,
            None => { self.entries.insert(HashKey::Str(name.clone()), (Value::Str(name), value)); }
        }
    }

    pub fn remove_str(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(&HashKey::Str(Rc::from(name))).map(|entry| entry.1)
    }

    pub fn iter(&self) -> impl Iterator<Item=(&Value, &Value)> {
        self.entries.values().map(|entry| (&entry.0, &entry.1))
    }

    pub fn keys(&self) -> impl Iterator<Item=&Value> {
        self.entries.values().map(|entry| &entry.0)
    }

    pub fn values(&self) -> impl Iterator<Item=&Value> {
        self.entries.values().map(|entry| &entry.1)
    }

    pub fn clear(&mut self) {
        let mut children = Vec::new();
        self.drain_into(&mut children);
        release(children);
    }

    fn drain_into(&mut self, out: &mut Vec<Value>) {
        for (_, (key, value)) in self.entries.drain(..) {
            out.push(key);
            out.push(value);
        }
    }
}

/// Collection of unique values.  Enumeration follows insertion order, but
/// only membership is significant.
#[derive(Clone, Default)]
pub struct Set {
    items: IndexMap<HashKey, Value>,
}

impl Set {
    pub fn new() -> Set {
        Set::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add an item; returns false if an equal item was already present.
    pub fn insert(&mut self, item: Value) -> Result<bool> {
        let hkey = item.hash_key()?;
        if self.items.contains_key(&hkey) {
            return Ok(false);
        }
        self.items.insert(hkey, item);
        Ok(true)
    }

    pub fn contains(&self, item: &Value) -> Result<bool> {
        Ok(self.items.contains_key(&item.hash_key()?))
    }

    pub fn remove(&mut self, item: &Value) -> Result<bool> {
        Ok(self.items.shift_remove(&item.hash_key()?).is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item=&Value> {
        self.items.values()
    }

    fn hash_keys(&self) -> impl Iterator<Item=&HashKey> {
        self.items.keys()
    }

    fn drain_into(&mut self, out: &mut Vec<Value>) {
        out.extend(self.items.drain(..).map(|(_, item)| item));
    }
}

/// Immutable set; filled once, like `Tuple`.
#[derive(Default)]
pub struct FrozenSet {
    set: RefCell<Set>,
}

impl FrozenSet {
    pub fn new(set: Set) -> FrozenSet {
        FrozenSet { set: RefCell::new(set) }
    }

    pub fn items(&self) -> Ref<'_, Set> {
        self.set.borrow()
    }

    pub(crate) fn fill(&self, set: Set) {
        *self.set.borrow_mut() = set;
    }
}

/// Key under which values are stored in dictionaries and sets.
///
/// Like in Python, numeric values with the same value (integral or not)
/// must compare equal, so booleans and integral floats are folded into
/// integers.  Immutable containers hash structurally; all other objects
/// hash by identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKey {
    None,
    NotImplemented,
    Ellipsis,
    Int(BigInt),
    Float(u64),
    Complex(u64, u64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Vec<HashKey>),
    FrozenSet(Vec<HashKey>),
    Range(BigInt, BigInt, BigInt),
    Identity(usize),
}

fn float_key(f: f64) -> HashKey {
    if f.is_finite() && f.fract() == 0.0 {
        if let Some(i) = BigInt::from_f64(f) {
            return HashKey::Int(i);
        }
    }
    HashKey::Float(f.to_bits())
}

fn rc_addr<T>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc) as usize
}

// Only the decoder can build a tuple that contains itself; such a tuple
// is unhashable.
fn tuple_key(t: &Rc<Tuple>, active: &mut Vec<usize>) -> Result<HashKey> {
    let addr = rc_addr(t);
    if active.contains(&addr) {
        return Err(ErrorCode::ValueNotHashable("tuple".into()).into());
    }
    active.push(addr);
    let mut keys = Vec::with_capacity(t.len());
    for item in t.items().iter() {
        keys.push(match *item {
            Value::Tuple(ref inner) => tuple_key(inner, active)?,
            ref other => other.hash_key()?,
        });
    }
    active.pop();
    Ok(HashKey::Tuple(keys))
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn bytes(b: &[u8]) -> Value {
        Value::Bytes(Rc::from(b))
    }

    pub fn bytearray(b: &[u8]) -> Value {
        Value::ByteArray(Rc::new(RefCell::new(b.to_vec())))
    }

    pub fn int<T: Into<BigInt>>(i: T) -> Value {
        Value::Int(i.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(List::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::new(Tuple::new(items)))
    }

    pub fn dict<I>(pairs: I) -> Result<Value> where I: IntoIterator<Item=(Value, Value)> {
        let mut dict = Dict::new();
        for (key, value) in pairs {
            dict.insert(key, value)?;
        }
        Ok(Value::Dict(Rc::new(RefCell::new(dict))))
    }

    pub fn set<I>(items: I) -> Result<Value> where I: IntoIterator<Item=Value> {
        let mut set = Set::new();
        for item in items {
            set.insert(item)?;
        }
        Ok(Value::Set(Rc::new(RefCell::new(set))))
    }

    pub fn frozenset<I>(items: I) -> Result<Value> where I: IntoIterator<Item=Value> {
        let mut set = Set::new();
        for item in items {
            set.insert(item)?;
        }
        Ok(Value::FrozenSet(Rc::new(FrozenSet::new(set))))
    }

    pub fn cell(contents: Option<Value>) -> Value {
        Value::Cell(Rc::new(Cell::new(contents)))
    }

    pub fn range<T: Into<BigInt>>(start: T, stop: T, step: T) -> Result<Value> {
        Ok(Value::Range(Rc::new(Range::new(start.into(), stop.into(), step.into())?)))
    }

    pub fn slice(start: Value, stop: Value, step: Value) -> Value {
        Value::Slice(Rc::new(Slice::new(start, stop, step)))
    }

    /// The identity of the object, if the value is a reference.
    pub fn id(&self) -> Option<usize> {
        match *self {
            Value::None | Value::NotImplemented | Value::Ellipsis | Value::Bool(_) |
            Value::Int(_) | Value::Float(_) | Value::Complex(..) => None,
            Value::Str(ref s)          => Some(Rc::as_ptr(s) as *const u8 as usize),
            Value::Bytes(ref b)        => Some(Rc::as_ptr(b) as *const u8 as usize),
            Value::ByteArray(ref b)    => Some(rc_addr(b)),
            Value::List(ref l)         => Some(rc_addr(l)),
            Value::Tuple(ref t)        => Some(rc_addr(t)),
            Value::Dict(ref d)         => Some(rc_addr(d)),
            Value::Set(ref s)          => Some(rc_addr(s)),
            Value::FrozenSet(ref s)    => Some(rc_addr(s)),
            Value::Class(ref c)        => Some(rc_addr(c)),
            Value::Instance(ref i)     => Some(rc_addr(i)),
            Value::Function(ref f)     => Some(rc_addr(f)),
            Value::Code(ref c)         => Some(rc_addr(c)),
            Value::Cell(ref c)         => Some(rc_addr(c)),
            Value::BoundMethod(ref m)  => Some(rc_addr(m)),
            Value::ClassMethod(ref m) |
            Value::StaticMethod(ref m) => Some(rc_addr(m)),
            Value::Native(ref n)       => Some(rc_addr(n)),
            Value::Property(ref p)     => Some(rc_addr(p)),
            Value::Super(ref s)        => Some(rc_addr(s)),
            Value::Range(ref r)        => Some(rc_addr(r)),
            Value::Slice(ref s)        => Some(rc_addr(s)),
            Value::Iterator(ref i)     => Some(rc_addr(i)),
            Value::Enumerate(ref e)    => Some(rc_addr(e)),
            Value::MappingProxy(ref p) => Some(rc_addr(p)),
            Value::MemoryView(ref m)   => Some(rc_addr(m)),
            Value::Opaque(ref o)       => Some(rc_addr(o)),
            Value::Foreign(ref f)      => Some(rc_addr(f)),
        }
    }

    /// Identity comparison (Python's `is`).
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (&Value::None, &Value::None) |
            (&Value::NotImplemented, &Value::NotImplemented) |
            (&Value::Ellipsis, &Value::Ellipsis) => true,
            (&Value::Bool(a), &Value::Bool(b)) => a == b,
            _ => match (self.id(), other.id()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Name of the value's type, for messages.
    pub fn type_name(&self) -> String {
        let name = match *self {
            Value::None           => "NoneType",
            Value::NotImplemented => "NotImplementedType",
            Value::Ellipsis       => "ellipsis",
            Value::Bool(_)        => "bool",
            Value::Int(_)         => "int",
            Value::Float(_)       => "float",
            Value::Complex(..)    => "complex",
            Value::Str(_)         => "str",
            Value::Bytes(_)       => "bytes",
            Value::ByteArray(_)   => "bytearray",
            Value::List(_)        => "list",
            Value::Tuple(_)       => "tuple",
            Value::Dict(_)        => "dict",
            Value::Set(_)         => "set",
            Value::FrozenSet(_)   => "frozenset",
            Value::Class(_)       => "type",
            Value::Instance(ref i) => return i.class().name().to_string(),
            Value::Function(_)    => "function",
            Value::Code(_)        => "code",
            Value::Cell(_)        => "cell",
            Value::BoundMethod(_) => "method",
            Value::ClassMethod(_) => "classmethod",
            Value::StaticMethod(_) => "staticmethod",
            Value::Native(_)      => "builtin_function_or_method",
            Value::Property(_)    => "property",
            Value::Super(_)       => "super",
            Value::Range(_)       => "range",
            Value::Slice(_)       => "slice",
            Value::Iterator(_)    => "iterator",
            Value::Enumerate(_)   => "enumerate",
            Value::MappingProxy(_) => "mappingproxy",
            Value::MemoryView(_)  => "memoryview",
            Value::Opaque(ref o)  => return o.name().to_string(),
            Value::Foreign(ref f) => return f.type_name().to_string(),
        };
        name.into()
    }

    /// Compute the key under which this value is stored in dicts and sets.
    pub fn hash_key(&self) -> Result<HashKey> {
        Ok(match *self {
            Value::None            => HashKey::None,
            Value::NotImplemented  => HashKey::NotImplemented,
            Value::Ellipsis        => HashKey::Ellipsis,
            Value::Bool(b)         => HashKey::Int(BigInt::from(b as u8)),
            Value::Int(ref i)      => HashKey::Int(i.clone()),
            Value::Float(f)        => float_key(f),
            Value::Complex(re, im) => if im == 0.0 {
                float_key(re)
            } else {
                HashKey::Complex(re.to_bits(), im.to_bits())
            },
            Value::Str(ref s)      => HashKey::Str(s.clone()),
            Value::Bytes(ref b)    => HashKey::Bytes(b.clone()),
            Value::Tuple(ref t)    => tuple_key(t, &mut Vec::new())?,
            Value::FrozenSet(ref s) => {
                let mut keys: Vec<HashKey> = s.items().hash_keys().cloned().collect();
                keys.sort();
                HashKey::FrozenSet(keys)
            }
            Value::Range(ref r)    => HashKey::Range(r.start().clone(), r.stop().clone(),
                                                     r.step().clone()),
            // a view hashes like its bytes, as long as they cannot change
            Value::MemoryView(ref m) if m.is_readonly() => HashKey::Bytes(Rc::from(m.to_bytes())),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::ByteArray(_) |
            Value::Slice(_) | Value::MappingProxy(_) | Value::MemoryView(_) => {
                return Err(ErrorCode::ValueNotHashable(self.type_name()).into());
            }
            _ => match self.id() {
                Some(id) => HashKey::Identity(id),
                None => return Err(ErrorCode::ValueNotHashable(self.type_name()).into()),
            },
        })
    }

    /// Python-like representation; cycles show as `[...]`, `{...}` or `(...)`.
    pub fn repr(&self) -> String {
        self.to_string()
    }

    /// Truth value, for evaluation.
    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::None | Value::Bool(false) => false,
            Value::Int(ref i) => i != &BigInt::from(0),
            Value::Float(f) => f != 0.0,
            Value::Complex(re, im) => re != 0.0 || im != 0.0,
            Value::Str(ref s) => !s.is_empty(),
            Value::Bytes(ref b) => !b.is_empty(),
            Value::ByteArray(ref b) => !b.borrow().is_empty(),
            Value::List(ref l) => !l.borrow().is_empty(),
            Value::Tuple(ref t) => !t.is_empty(),
            Value::Dict(ref d) => !d.borrow().is_empty(),
            Value::Set(ref s) => !s.borrow().is_empty(),
            Value::FrozenSet(ref s) => !s.items().is_empty(),
            Value::MappingProxy(ref p) => !p.mapping().borrow().is_empty(),
            Value::MemoryView(ref m) => !m.is_empty(),
            _ => true,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value { Value::Bool(b) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value { Value::Int(BigInt::from(i)) }
}

impl From<i32> for Value {
    fn from(i: i32) -> Value { Value::Int(BigInt::from(i)) }
}

impl From<BigInt> for Value {
    fn from(i: BigInt) -> Value { Value::Int(i) }
}

impl From<f64> for Value {
    fn from(f: f64) -> Value { Value::Float(f) }
}

impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Value { Value::str(s) }
}

impl From<String> for Value {
    fn from(s: String) -> Value { Value::Str(Rc::from(s)) }
}

// Numeric view used for cross-type comparisons.
enum Number {
    Int(BigInt),
    Float(f64),
    Complex(f64, f64),
}

fn as_number(value: &Value) -> Option<Number> {
    match *value {
        Value::Bool(b) => Some(Number::Int(BigInt::from(b as u8))),
        Value::Int(ref i) => Some(Number::Int(i.clone())),
        Value::Float(f) => Some(Number::Float(f)),
        Value::Complex(re, im) => Some(Number::Complex(re, im)),
        _ => None,
    }
}

fn numbers_equal(a: Number, b: Number) -> bool {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x == y,
        (Number::Int(i), Number::Float(f)) | (Number::Float(f), Number::Int(i)) =>
            f.is_finite() && f.fract() == 0.0 && BigInt::from_f64(f).map_or(false, |g| g == i),
        (Number::Float(x), Number::Float(y)) => x == y,
        (Number::Complex(re, im), other) | (other, Number::Complex(re, im)) => match other {
            Number::Complex(re2, im2) => re == re2 && im == im2,
            Number::Float(f) => im == 0.0 && re == f,
            Number::Int(i) => im == 0.0 && i.to_f64().map_or(false, |f| f == re),
        },
    }
}

/// Structural equality (Python's `==`).
///
/// Objects without value semantics (classes, instances, functions, ...)
/// compare by identity.  Pairs of objects that have been compared before
/// are assumed equal, so recursive structures terminate.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![(self.clone(), other.clone())];
        while let Some((a, b)) = pending.pop() {
            if !shallow_equal(&a, &b, &mut pending, &mut seen) {
                return false;
            }
        }
        true
    }
}

// Compare what can be compared without descending, and queue the pairs of
// children that must be equal as well.
fn shallow_equal(a: &Value, b: &Value, pending: &mut Vec<(Value, Value)>,
                 seen: &mut HashSet<(usize, usize)>) -> bool {
    if let (Some(x), Some(y)) = (a.id(), b.id()) {
        if x == y || !seen.insert((x, y)) {
            return true;
        }
    }
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return numbers_equal(x, y);
    }
    match (a, b) {
        (&Value::None, &Value::None) |
        (&Value::NotImplemented, &Value::NotImplemented) |
        (&Value::Ellipsis, &Value::Ellipsis) => true,
        (&Value::Str(ref x), &Value::Str(ref y)) => x == y,
        (&Value::Bytes(_), _) | (&Value::ByteArray(_), _) | (&Value::MemoryView(_), _) =>
            match (byte_contents(a), byte_contents(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        (&Value::List(ref x), &Value::List(ref y)) =>
            queue_pairs(&x.borrow(), &y.borrow(), pending),
        (&Value::Tuple(ref x), &Value::Tuple(ref y)) =>
            queue_pairs(&x.items(), &y.items(), pending),
        (&Value::Dict(_), _) | (&Value::MappingProxy(_), _) => match (mapping_of(a), mapping_of(b)) {
            (Some(x), Some(y)) => {
                let (x, y) = (x.borrow(), y.borrow());
                if x.len() != y.len() {
                    return false;
                }
                for (hkey, entry) in x.entries.iter() {
                    match y.entries.get(hkey) {
                        Some(other) => pending.push((entry.1.clone(), other.1.clone())),
                        None => return false,
                    }
                }
                true
            }
            _ => false,
        },
        (&Value::Set(_), _) | (&Value::FrozenSet(_), _) => match (set_keys(a), set_keys(b)) {
            (Some(x), Some(y)) => x.len() == y.len() && x.iter().all(|k| y.contains(k)),
            _ => false,
        },
        (&Value::Code(ref x), &Value::Code(ref y)) =>
            x.name() == y.name() && x.params() == y.params() &&
            x.bytecode() == y.bytecode() && queue_pairs(x.consts(), y.consts(), pending),
        (&Value::Cell(ref x), &Value::Cell(ref y)) => match (x.get(), y.get()) {
            (Some(x), Some(y)) => {
                pending.push((x, y));
                true
            }
            (None, None) => true,
            _ => false,
        },
        (&Value::Range(ref x), &Value::Range(ref y)) => {
            let (lx, ly) = (x.len(), y.len());
            lx == ly && (lx == BigInt::from(0) ||
                         (x.start() == y.start() && (lx == BigInt::from(1) || x.step() == y.step())))
        }
        (&Value::Slice(ref x), &Value::Slice(ref y)) => {
            pending.push((x.start(), y.start()));
            pending.push((x.stop(), y.stop()));
            pending.push((x.step(), y.step()));
            true
        }
        (&Value::BoundMethod(ref x), &Value::BoundMethod(ref y)) =>
            x.func().is(&y.func()) && x.receiver().is(&y.receiver()),
        _ => false,
    }
}

fn queue_pairs(x: &[Value], y: &[Value], pending: &mut Vec<(Value, Value)>) -> bool {
    if x.len() != y.len() {
        return false;
    }
    pending.extend(x.iter().cloned().zip(y.iter().cloned()));
    true
}

fn byte_contents(value: &Value) -> Option<Vec<u8>> {
    match *value {
        Value::Bytes(ref b) => Some(b.to_vec()),
        Value::ByteArray(ref b) => Some(b.borrow().clone()),
        Value::MemoryView(ref m) => Some(m.to_bytes()),
        _ => None,
    }
}

fn mapping_of(value: &Value) -> Option<Rc<RefCell<Dict>>> {
    match *value {
        Value::Dict(ref d) => Some(d.clone()),
        Value::MappingProxy(ref p) => Some(p.mapping()),
        _ => None,
    }
}

fn set_keys(value: &Value) -> Option<Vec<HashKey>> {
    match *value {
        Value::Set(ref s) => Some(s.borrow().hash_keys().cloned().collect()),
        Value::FrozenSet(ref s) => Some(s.items().hash_keys().cloned().collect()),
        _ => None,
    }
}

fn write_str_repr(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for ch in s.chars() {
        match ch {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => { f.write_char('\\')?; f.write_char(c)?; }
            c if (c as u32) < 0x20 || c == '\x7f' => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

fn write_bytes_repr(f: &mut fmt::Formatter, b: &[u8]) -> fmt::Result {
    let quote = if b.contains(&b'\'') && !b.contains(&b'"') { b'"' } else { b'\'' };
    f.write_char('b')?;
    f.write_char(quote as char)?;
    for &byte in b {
        match byte {
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            c if c == quote => { f.write_char('\\')?; f.write_char(c as char)?; }
            0x20..=0x7e => f.write_char(byte as char)?,
            _ => write!(f, "\\x{:02x}", byte)?,
        }
    }
    f.write_char(quote as char)
}

fn write_float(f: &mut fmt::Formatter, v: f64) -> fmt::Result {
    if v.is_nan() {
        f.write_str("nan")
    } else if v.is_infinite() {
        f.write_str(if v > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{:?}", v)
    }
}

// Like float repr, but integral values drop the ".0", as in complex reprs.
fn write_complex_part(f: &mut fmt::Formatter, v: f64) -> fmt::Result {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        write!(f, "{}", v as i64)
    } else {
        write_float(f, v)
    }
}

// Pieces of a repr still to be written.  Containers write their opening
// text right away and queue their items, so nesting depth does not grow
// the call stack.
enum Step {
    Repr(Value),
    Text(&'static str),
    Leave(usize),
}

fn queue_elements<'a, I>(steps: &mut Vec<Step>, it: I, suffix: &'static str, always_comma: bool)
    where I: ExactSizeIterator<Item=&'a Value>
{
    let len = it.len();
    for (i, item) in it.enumerate() {
        steps.push(Step::Repr(item.clone()));
        if i < len - 1 {
            steps.push(Step::Text(", "));
        } else if always_comma {
            steps.push(Step::Text(","));
        }
    }
    steps.push(Step::Text(suffix));
}

fn write_repr(f: &mut fmt::Formatter, value: &Value) -> fmt::Result {
    let mut active = HashSet::new();
    let mut steps = vec![Step::Repr(value.clone())];
    let mut children = Vec::new();
    while let Some(step) = steps.pop() {
        let value = match step {
            Step::Repr(value) => value,
            Step::Text(text) => {
                f.write_str(text)?;
                continue;
            }
            Step::Leave(id) => {
                active.remove(&id);
                continue;
            }
        };
        let id = value.id();
        if let Some(id) = id {
            if active.contains(&id) {
                f.write_str(match value {
                    Value::List(_) => "[...]",
                    Value::Dict(_) | Value::Set(_) => "{...}",
                    Value::Tuple(_) => "(...)",
                    _ => "...",
                })?;
                continue;
            }
        }
        write_head(f, &value, &mut children)?;
        if children.is_empty() {
            continue;
        }
        if let Some(id) = id {
            active.insert(id);
            steps.push(Step::Leave(id));
        }
        steps.extend(children.drain(..).rev());
    }
    Ok(())
}

// Write the repr of a value up to its first child, and queue the rest.
fn write_head(f: &mut fmt::Formatter, value: &Value, rest: &mut Vec<Step>) -> fmt::Result {
    match *value {
        Value::None            => f.write_str("None"),
        Value::NotImplemented  => f.write_str("NotImplemented"),
        Value::Ellipsis        => f.write_str("Ellipsis"),
        Value::Bool(b)         => f.write_str(if b { "True" } else { "False" }),
        Value::Int(ref i)      => write!(f, "{}", i),
        Value::Float(v)        => write_float(f, v),
        Value::Complex(re, im) => {
            if re == 0.0 && re.is_sign_positive() {
                write_complex_part(f, im)?;
                return f.write_str("j");
            }
            f.write_char('(')?;
            write_complex_part(f, re)?;
            if im >= 0.0 || im.is_nan() {
                f.write_char('+')?;
            }
            write_complex_part(f, im)?;
            f.write_str("j)")
        }
        Value::Str(ref s)       => write_str_repr(f, s),
        Value::Bytes(ref b)     => write_bytes_repr(f, b),
        Value::ByteArray(ref b) => {
            f.write_str("bytearray(")?;
            write_bytes_repr(f, &b.borrow())?;
            f.write_char(')')
        }
        Value::List(ref l) => {
            queue_elements(rest, l.borrow().iter(), "]", false);
            f.write_char('[')
        }
        Value::Tuple(ref t) => {
            let items = t.items();
            queue_elements(rest, items.iter(), ")", items.len() == 1);
            f.write_char('(')
        }
        Value::Dict(ref d) => {
            queue_pairs_repr(rest, &d.borrow(), "}");
            f.write_char('{')
        }
        Value::MappingProxy(ref p) => {
            queue_pairs_repr(rest, &p.mapping().borrow(), "})");
            f.write_str("mappingproxy({")
        }
        Value::Set(ref s) => {
            let s = s.borrow();
            if s.is_empty() {
                return f.write_str("set()");
            }
            queue_elements(rest, s.iter().collect::<Vec<_>>().into_iter(), "}", false);
            f.write_char('{')
        }
        Value::FrozenSet(ref s) => {
            let s = s.items();
            if s.is_empty() {
                return f.write_str("frozenset()");
            }
            queue_elements(rest, s.iter().collect::<Vec<_>>().into_iter(), "})", false);
            f.write_str("frozenset({")
        }
        Value::Class(ref c)       => write!(f, "<class '{}'>", c.name()),
        Value::Instance(ref i)    => write!(f, "<{} object>", i.class().name()),
        Value::Function(ref func) => write!(f, "<function {}>", func.name()),
        Value::Code(ref c)        => write!(f, "<code object {}>", c.name()),
        Value::Cell(ref c)        => match c.get() {
            Some(v) => write!(f, "<cell: {} object>", v.type_name()),
            None => f.write_str("<cell: empty>"),
        },
        Value::BoundMethod(ref m) => {
            rest.push(Step::Repr(m.receiver()));
            rest.push(Step::Text(">"));
            write!(f, "<bound method {} of ", callable_name(&m.func()))
        }
        Value::ClassMethod(_)     => f.write_str("<classmethod object>"),
        Value::StaticMethod(_)    => f.write_str("<staticmethod object>"),
        Value::Native(ref n)      => write!(f, "<built-in function {}>", n.name()),
        Value::Property(_)        => f.write_str("<property object>"),
        Value::Super(ref s)       => {
            rest.push(Step::Repr(s.receiver()));
            rest.push(Step::Text(">"));
            write!(f, "<super: <class '{}'>, ", s.thisclass().name())
        }
        Value::Range(ref r) => if r.step() == &BigInt::from(1) {
            write!(f, "range({}, {})", r.start(), r.stop())
        } else {
            write!(f, "range({}, {}, {})", r.start(), r.stop(), r.step())
        },
        Value::Slice(ref s) => {
            rest.extend(vec![
                Step::Repr(s.start()), Step::Text(", "),
                Step::Repr(s.stop()), Step::Text(", "),
                Step::Repr(s.step()), Step::Text(")"),
            ]);
            f.write_str("slice(")
        }
        Value::MemoryView(_)  => f.write_str("<memory>"),
        Value::Iterator(_)    => f.write_str("<iterator object>"),
        Value::Enumerate(_)   => f.write_str("<enumerate object>"),
        Value::Opaque(ref o)  => write!(f, "<{}>", o.name()),
        Value::Foreign(ref o) => write!(f, "<{} object>", o.type_name()),
    }
}

fn queue_pairs_repr(steps: &mut Vec<Step>, dict: &Dict, suffix: &'static str) {
    for (i, (key, value)) in dict.iter().enumerate() {
        if i > 0 {
            steps.push(Step::Text(", "));
        }
        steps.push(Step::Repr(key.clone()));
        steps.push(Step::Text(": "));
        steps.push(Step::Repr(value.clone()));
    }
    steps.push(Step::Text(suffix));
}

fn callable_name(value: &Value) -> String {
    match *value {
        Value::Function(ref func) => func.name().to_string(),
        Value::Native(ref n) => n.name().to_string(),
        ref other => other.type_name(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_repr(f, self)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_repr(f, self)
    }
}

// Dropping the last reference to a container drops its children, which may
// be the last references to containers themselves.  Children of containers
// about to go away are moved to a work list first, so each drop only goes
// one level deep however deep the graph is.
pub(crate) fn release(mut pending: Vec<Value>) {
    while let Some(mut value) = pending.pop() {
        value.take_children(&mut pending);
    }
}

impl Value {
    /// Move out the children of a container this is the last reference to.
    fn take_children(&mut self, out: &mut Vec<Value>) {
        match *self {
            Value::List(ref mut l) => if let Some(l) = Rc::get_mut(l) {
                out.append(l.items.get_mut());
            },
            Value::Tuple(ref mut t) => if let Some(t) = Rc::get_mut(t) {
                out.append(t.items.get_mut());
            },
            Value::Dict(ref mut d) => if let Some(d) = Rc::get_mut(d) {
                d.get_mut().drain_into(out);
            },
            Value::Set(ref mut s) => if let Some(s) = Rc::get_mut(s) {
                s.get_mut().drain_into(out);
            },
            Value::FrozenSet(ref mut s) => if let Some(s) = Rc::get_mut(s) {
                s.set.get_mut().drain_into(out);
            },
            Value::Instance(ref mut i) => if let Some(i) = Rc::get_mut(i) {
                i.take_children(out);
            },
            _ => {}
        }
    }
}

impl Drop for List {
    fn drop(&mut self) {
        release(mem::take(self.items.get_mut()));
    }
}

impl Drop for Tuple {
    fn drop(&mut self) {
        release(mem::take(self.items.get_mut()));
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        let mut children = Vec::new();
        self.drain_into(&mut children);
        release(children);
    }
}

impl Drop for Set {
    fn drop(&mut self) {
        let mut children = Vec::new();
        self.drain_into(&mut children);
        release(children);
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
