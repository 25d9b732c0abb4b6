// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! The type registry: value kinds and their wire layout, named objects and
//! foreign codecs.
//!
//! Every value reachable from an encoded root is classified into a `Kind`.
//! Kinds map one-to-one to record tags and carry a static description of
//! the fields their records hold.  Values whose identity is registered by
//! name (built-in classes, natives, singletons) are never taken apart; they
//! are written as a reference to their name and resolved against the
//! registry of the decoding side.

use std::collections::HashMap;
use std::rc::Rc;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::code::Native;
use crate::consts::*;
use crate::error::{ErrorCode, Result};
use crate::object::{collect_iterable, update_dict, BuiltinType, Class, Enumerate, Foreign,
                    MemoryView, Opaque};
use crate::value::{Dict, Value};

/// Kinds of values, as distinguished on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    None,
    NotImplemented,
    Ellipsis,
    Bool,
    Int,
    Float,
    Complex,
    Str,
    Bytes,
    ByteArray,
    Range,
    Opaque,
    List,
    Tuple,
    Dict,
    Set,
    FrozenSet,
    Class,
    Instance,
    Function,
    Code,
    Cell,
    BoundMethod,
    ClassMethod,
    StaticMethod,
    Super,
    Slice,
    Property,
    Iterator,
    Enumerate,
    Foreign,
    MappingProxy,
    MemoryView,
}

/// How a record of a kind is laid out and rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Written in place, no identity and no id.
    Inline,
    /// Identity with a self-contained payload; built as soon as read.
    Immediate,
    /// Placeholder is allocated and memoized before the children are read,
    /// then populated field by field.
    Eager,
    /// Built only after all children are read; cycles through it are
    /// not possible.
    Deferred,
}

/// Number of values a field holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    One,
    Any,
    Pairs,
}

impl Arity {
    pub fn accepts(self, count: u32) -> bool {
        match self {
            Arity::One => count == 1,
            Arity::Any => true,
            Arity::Pairs => count % 2 == 0,
        }
    }
}

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub arity: Arity,
    pub required: bool,
}

const fn field(name: &'static str, arity: Arity) -> FieldSpec {
    FieldSpec { name, arity, required: true }
}

const fn optional(name: &'static str) -> FieldSpec {
    FieldSpec { name, arity: Arity::One, required: false }
}

/// Static description of a kind.
#[derive(Debug)]
pub struct KindSpec {
    pub kind: Kind,
    pub tag: u8,
    pub name: &'static str,
    pub placement: Placement,
    pub fields: &'static [FieldSpec],
    /// Whether records may carry additional fields (instance slots) that
    /// are not listed above.  Those have arity one.
    pub open: bool,
}

impl KindSpec {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

const ITEMS: &[FieldSpec] = &[field("items", Arity::Any)];
const PAIRS: &[FieldSpec] = &[field("items", Arity::Pairs)];
const NO_FIELDS: &[FieldSpec] = &[];

// Field order is significant: the decoder applies fields in the order they
// are written, so everything an object's layout depends on comes first.
const CLASS_FIELDS: &[FieldSpec] = &[
    field("__name__", Arity::One),
    field("__bases__", Arity::Any),
    FieldSpec { name: "__slots__", arity: Arity::Any, required: false },
    field("__dict__", Arity::One),
];
const INSTANCE_FIELDS: &[FieldSpec] = &[
    field("__class__", Arity::One),
    optional("__dict__"),
    optional("__value__"),
];
const FUNCTION_FIELDS: &[FieldSpec] = &[
    field("__name__", Arity::One),
    field("__code__", Arity::One),
    field("__defaults__", Arity::Any),
    field("__closure__", Arity::Any),
];
const CODE_FIELDS: &[FieldSpec] = &[
    field("co_name", Arity::One),
    field("co_varnames", Arity::Any),
    field("co_consts", Arity::Any),
    field("co_code", Arity::One),
];
const CELL_FIELDS: &[FieldSpec] = &[optional("cell_contents")];
const BOUND_METHOD_FIELDS: &[FieldSpec] = &[
    field("__func__", Arity::One),
    field("__self__", Arity::One),
];
const WRAPPER_FIELDS: &[FieldSpec] = &[field("__func__", Arity::One)];
const SUPER_FIELDS: &[FieldSpec] = &[
    field("__thisclass__", Arity::One),
    field("__self__", Arity::One),
];
const SLICE_FIELDS: &[FieldSpec] = &[
    field("start", Arity::One),
    field("stop", Arity::One),
    field("step", Arity::One),
];
const PROPERTY_FIELDS: &[FieldSpec] = &[
    field("fget", Arity::One),
    field("fset", Arity::One),
    field("fdel", Arity::One),
];
const ITERATOR_FIELDS: &[FieldSpec] = &[
    field("__source__", Arity::One),
    field("__index__", Arity::One),
];
const ENUMERATE_FIELDS: &[FieldSpec] = &[
    field("__iter__", Arity::One),
    field("__count__", Arity::One),
];
const FOREIGN_FIELDS: &[FieldSpec] = &[
    field("__type__", Arity::One),
    field("__state__", Arity::One),
];
const MAPPINGPROXY_FIELDS: &[FieldSpec] = &[field("__mapping__", Arity::One)];
const MEMORYVIEW_FIELDS: &[FieldSpec] = &[
    field("obj", Arity::One),
    field("offset", Arity::One),
    field("length", Arity::One),
];

macro_rules! kinds {
    ($($kind:ident => $tag:expr, $name:expr, $placement:ident, $fields:expr, $open:expr;)*) => {
        static KINDS: &[KindSpec] = &[
            $(KindSpec { kind: Kind::$kind, tag: $tag, name: $name,
                         placement: Placement::$placement, fields: $fields, open: $open },)*
        ];
    }
}

kinds! {
    None           => NONE,            "NoneType",           Inline,    NO_FIELDS, false;
    NotImplemented => NOT_IMPLEMENTED, "NotImplementedType", Inline,    NO_FIELDS, false;
    Ellipsis       => ELLIPSIS,        "ellipsis",           Inline,    NO_FIELDS, false;
    Bool           => NEWTRUE,         "bool",               Inline,    NO_FIELDS, false;
    Int            => LONG,            "int",                Inline,    NO_FIELDS, false;
    Float          => BINFLOAT,        "float",              Inline,    NO_FIELDS, false;
    Complex        => COMPLEX,         "complex",            Inline,    NO_FIELDS, false;
    Str            => BINUNICODE,      "str",                Immediate, NO_FIELDS, false;
    Bytes          => BINBYTES,        "bytes",              Immediate, NO_FIELDS, false;
    ByteArray      => BYTEARRAY,       "bytearray",          Immediate, NO_FIELDS, false;
    Range          => RANGE,           "range",              Immediate, NO_FIELDS, false;
    Opaque         => OPAQUE,          "opaque",             Immediate, NO_FIELDS, false;
    List           => LIST,            "list",               Eager,     ITEMS, false;
    Tuple          => TUPLE,           "tuple",              Eager,     ITEMS, false;
    Dict           => DICT,            "dict",               Eager,     PAIRS, false;
    Set            => SET,             "set",                Eager,     ITEMS, false;
    FrozenSet      => FROZENSET,       "frozenset",          Eager,     ITEMS, false;
    Class          => CLASS,           "type",               Eager,     CLASS_FIELDS, false;
    Instance       => INSTANCE,        "instance",           Eager,     INSTANCE_FIELDS, true;
    Function       => FUNCTION,        "function",           Eager,     FUNCTION_FIELDS, false;
    Code           => CODE,            "code",               Deferred,  CODE_FIELDS, false;
    Cell           => CELL,            "cell",               Eager,     CELL_FIELDS, false;
    BoundMethod    => BOUND_METHOD,    "method",             Eager,     BOUND_METHOD_FIELDS, false;
    ClassMethod    => CLASSMETHOD,     "classmethod",        Eager,     WRAPPER_FIELDS, false;
    StaticMethod   => STATICMETHOD,    "staticmethod",       Eager,     WRAPPER_FIELDS, false;
    Super          => SUPER,           "super",              Eager,     SUPER_FIELDS, false;
    Slice          => SLICE,           "slice",              Eager,     SLICE_FIELDS, false;
    Property       => PROPERTY,        "property",           Eager,     PROPERTY_FIELDS, false;
    Iterator       => ITERATOR,        "iterator",           Eager,     ITERATOR_FIELDS, false;
    Enumerate      => ENUMERATE,       "enumerate",          Eager,     ENUMERATE_FIELDS, false;
    Foreign        => FOREIGN,         "foreign",            Deferred,  FOREIGN_FIELDS, false;
    MappingProxy   => MAPPINGPROXY,    "mappingproxy",       Eager,     MAPPINGPROXY_FIELDS, false;
    MemoryView     => MEMORYVIEW,      "memoryview",         Eager,     MEMORYVIEW_FIELDS, false;
}

impl Kind {
    pub fn spec(self) -> &'static KindSpec {
        // KINDS lists every kind exactly once, in declaration order
        &KINDS[self as usize]
    }

    /// Kind of a record tag, for tags that start an identity record.
    /// Inline tags are handled by the decoder directly.
    pub fn from_tag(tag: u8) -> Option<Kind> {
        KINDS.iter().find(|spec| spec.tag == tag && spec.placement != Placement::Inline)
             .map(|spec| spec.kind)
    }

    pub fn tag(self) -> u8 {
        self.spec().tag
    }

    pub fn placement(self) -> Placement {
        self.spec().placement
    }
}

/// Encoding support for foreign host objects of one type.
///
/// `reduce` describes an object as a state value built from other graph
/// values; `rebuild` creates an equivalent object from that state.
pub trait ForeignCodec {
    /// Type name the codec handles, as given to `Foreign::new`.
    fn type_name(&self) -> &str;
    fn reduce(&self, object: &Foreign) -> Result<Value>;
    fn rebuild(&self, state: Value) -> Result<Rc<Foreign>>;
}

/// Named objects and codecs shared by encoder and decoder.
///
/// Both sides of a stream must use registries with the same names
/// registered; a name the decoding side does not know fails with
/// `UnresolvedReference`.
pub struct Registry {
    by_name: HashMap<Rc<str>, Value>,
    by_id: HashMap<usize, Rc<str>>,
    codecs: HashMap<Rc<str>, Box<dyn ForeignCodec>>,
    builtins: Vec<(BuiltinType, Rc<Class>)>,
}

impl Default for Registry {
    fn default() -> Registry {
        Registry::new()
    }
}

fn expect_args<'a>(name: &str, args: &'a [Value], min: usize, max: usize) -> Result<&'a [Value]> {
    if args.len() < min || args.len() > max {
        return Err(ErrorCode::ArgumentMismatch(format!(
            "{}() takes {} to {} arguments ({} given)", name, min, max, args.len())).into());
    }
    Ok(args)
}

fn attr_name<'a>(value: &'a Value) -> Result<&'a str> {
    match *value {
        Value::Str(ref s) => Ok(&**s),
        ref other => Err(ErrorCode::TypeMismatch(
            format!("attribute name must be str, not '{}'", other.type_name())).into()),
    }
}

fn builtin_len(args: &[Value]) -> Result<Value> {
    let args = expect_args("len", args, 1, 1)?;
    Ok(Value::int(args[0].length()? as u64))
}

fn builtin_repr(args: &[Value]) -> Result<Value> {
    let args = expect_args("repr", args, 1, 1)?;
    Ok(Value::from(args[0].to_string()))
}

fn builtin_iter(args: &[Value]) -> Result<Value> {
    let args = expect_args("iter", args, 1, 1)?;
    args[0].iter()
}

fn builtin_next(args: &[Value]) -> Result<Value> {
    let args = expect_args("next", args, 1, 2)?;
    match args[0].next_item()? {
        Some(item) => Ok(item),
        None => args.get(1).cloned().ok_or_else(|| ErrorCode::StopIteration.into()),
    }
}

fn builtin_enumerate(args: &[Value]) -> Result<Value> {
    let args = expect_args("enumerate", args, 1, 2)?;
    let start = match args.get(1) {
        None => BigInt::from(0),
        Some(&Value::Int(ref i)) => i.clone(),
        Some(other) => return Err(ErrorCode::TypeMismatch(
            format!("enumerate() start must be int, not '{}'", other.type_name())).into()),
    };
    Ok(Value::Enumerate(Rc::new(Enumerate::new(args[0].iter()?, start))))
}

fn view_bound(name: &str, value: Option<&Value>) -> Result<Option<usize>> {
    match value {
        None | Some(&Value::None) => Ok(None),
        Some(&Value::Int(ref i)) => i.to_usize().map(Some).ok_or_else(|| ErrorCode::InvalidValue(
            format!("memoryview() {} must not be negative", name)).into()),
        Some(other) => Err(ErrorCode::TypeMismatch(format!(
            "memoryview() {} must be int, not '{}'", name, other.type_name())).into()),
    }
}

fn builtin_memoryview(args: &[Value]) -> Result<Value> {
    let args = expect_args("memoryview", args, 1, 3)?;
    let offset = view_bound("offset", args.get(1))?.unwrap_or(0);
    let length = view_bound("length", args.get(2))?;
    Ok(Value::MemoryView(Rc::new(MemoryView::new(args[0].clone(), offset, length)?)))
}

fn builtin_getattr(args: &[Value]) -> Result<Value> {
    let args = expect_args("getattr", args, 2, 3)?;
    match args[0].get_attr(attr_name(&args[1])?) {
        Err(err) => match (err.code(), args.get(2)) {
            (Some(&ErrorCode::AttributeNotFound(..)), Some(default)) => Ok(default.clone()),
            _ => Err(err),
        },
        ok => ok,
    }
}

fn builtin_setattr(args: &[Value]) -> Result<Value> {
    let args = expect_args("setattr", args, 3, 3)?;
    args[0].set_attr(attr_name(&args[1])?, args[2].clone())?;
    Ok(Value::None)
}

fn builtin_delattr(args: &[Value]) -> Result<Value> {
    let args = expect_args("delattr", args, 2, 2)?;
    args[0].del_attr(attr_name(&args[1])?)?;
    Ok(Value::None)
}

fn object_init(args: &[Value]) -> Result<Value> {
    expect_args("object.__init__", args, 1, 1)?;
    Ok(Value::None)
}

fn object_getattribute(args: &[Value]) -> Result<Value> {
    let args = expect_args("object.__getattribute__", args, 2, 2)?;
    args[0].get_attr(attr_name(&args[1])?)
}

fn object_setattr(args: &[Value]) -> Result<Value> {
    let args = expect_args("object.__setattr__", args, 3, 3)?;
    args[0].set_attr(attr_name(&args[1])?, args[2].clone())?;
    Ok(Value::None)
}

fn object_delattr(args: &[Value]) -> Result<Value> {
    let args = expect_args("object.__delattr__", args, 2, 2)?;
    args[0].del_attr(attr_name(&args[1])?)?;
    Ok(Value::None)
}

fn dict_init(args: &[Value]) -> Result<Value> {
    let args = expect_args("dict.__init__", args, 1, 2)?;
    if let Some(source) = args.get(1) {
        update_dict(&args[0], source)?;
    }
    Ok(Value::None)
}

fn list_extend(args: &[Value]) -> Result<Value> {
    let args = expect_args("list.extend", args, 2, 2)?;
    let items = collect_iterable(&args[1])?;
    let target = match args[0] {
        Value::Instance(ref i) => i.base_value(),
        ref other => Some(other.clone()),
    };
    match target {
        Some(Value::List(l)) => {
            l.borrow_mut().extend(items);
            Ok(Value::None)
        }
        _ => Err(ErrorCode::TypeMismatch("list.extend() requires a list".into()).into()),
    }
}

const NATIVES: &[(&str, fn(&[Value]) -> Result<Value>)] = &[
    ("builtins.len", builtin_len),
    ("builtins.repr", builtin_repr),
    ("builtins.iter", builtin_iter),
    ("builtins.next", builtin_next),
    ("builtins.enumerate", builtin_enumerate),
    ("builtins.memoryview", builtin_memoryview),
    ("builtins.getattr", builtin_getattr),
    ("builtins.setattr", builtin_setattr),
    ("builtins.delattr", builtin_delattr),
];

/// Interpreter singletons that can only ever be referenced.
const SINGLETONS: &[&str] = &[
    "sys.stdin",
    "sys.stdout",
    "sys.stderr",
    "sys.version_info",
    "sys.flags",
    "sys.float_info",
    "sys.long_info",
];

impl Registry {
    /// Create a registry with the built-in classes, native functions and
    /// interpreter singletons.
    pub fn new() -> Registry {
        let mut registry = Registry {
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            codecs: HashMap::new(),
            builtins: Vec::new(),
        };
        registry.install_builtins();
        registry
    }

    fn install_builtins(&mut self) {
        let object_natives = [
            Native::new("__init__", object_init),
            Native::new("__getattribute__", object_getattribute),
            Native::new("__setattr__", object_setattr),
            Native::new("__delattr__", object_delattr),
        ];
        let dict_init = Native::new("__init__", dict_init);
        let list_extend = Native::new("extend", list_extend);

        let mut object_ns = Dict::new();
        for native in object_natives.iter() {
            object_ns.set_str(native.name(), Value::Native(native.clone()));
        }
        let object = Class::builtin(BuiltinType::Object, vec![], object_ns);
        for &ty in BuiltinType::ALL.iter() {
            let class = match ty {
                BuiltinType::Object => object.clone(),
                BuiltinType::Dict => {
                    let mut ns = Dict::new();
                    ns.set_str("__init__", Value::Native(dict_init.clone()));
                    Class::builtin(ty, vec![object.clone()], ns)
                }
                BuiltinType::List => {
                    let mut ns = Dict::new();
                    ns.set_str("extend", Value::Native(list_extend.clone()));
                    Class::builtin(ty, vec![object.clone()], ns)
                }
                _ => Class::builtin(ty, vec![object.clone()], Dict::new()),
            };
            self.insert(&format!("builtins.{}", ty.name()), Value::Class(class.clone()));
            self.builtins.push((ty, class));
        }
        for native in object_natives.iter() {
            self.insert(&format!("builtins.object.{}", native.name()), Value::Native(native.clone()));
        }
        self.insert("builtins.dict.__init__", Value::Native(dict_init));
        self.insert("builtins.list.extend", Value::Native(list_extend));
        for &(name, func) in NATIVES {
            let short = &name[name.rfind('.').map_or(0, |i| i + 1)..];
            self.insert(name, Value::Native(Native::new(short, func)));
        }
        for &name in SINGLETONS {
            self.insert(name, Value::Opaque(Opaque::new(name)));
        }
    }

    fn insert(&mut self, name: &str, value: Value) {
        let name: Rc<str> = Rc::from(name);
        if let Some(id) = value.id() {
            self.by_id.insert(id, name.clone());
        }
        self.by_name.insert(name, value);
    }

    /// Register an existing object under a name.  It will be encoded as a
    /// reference to that name, and the decoder substitutes its own object
    /// registered under the same name.
    pub fn register(&mut self, name: &str, value: Value) -> Result<()> {
        let id = value.id().ok_or_else(|| ErrorCode::InvalidValue(
            format!("cannot register '{}' by name: it has no identity", value.type_name())))?;
        if self.by_name.contains_key(name) || self.by_id.contains_key(&id) {
            return Err(ErrorCode::DuplicateRegistration(name.into()).into());
        }
        self.insert(name, value);
        Ok(())
    }

    /// Create and register a new identity-only singleton.
    pub fn register_opaque(&mut self, name: &str) -> Result<Value> {
        let value = Value::Opaque(Opaque::new(name));
        self.register(name, value.clone())?;
        Ok(value)
    }

    /// Create and register a native function.
    pub fn register_native(&mut self, name: &str,
                           func: fn(&[Value]) -> Result<Value>) -> Result<Value> {
        let short = &name[name.rfind('.').map_or(0, |i| i + 1)..];
        let value = Value::Native(Native::new(short, func));
        self.register(name, value.clone())?;
        Ok(value)
    }

    /// Add a codec for foreign objects of its type name.
    pub fn register_foreign(&mut self, codec: Box<dyn ForeignCodec>) -> Result<()> {
        let name: Rc<str> = Rc::from(codec.type_name());
        if self.codecs.contains_key(&name) {
            return Err(ErrorCode::DuplicateRegistration(name.to_string()).into());
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.by_name.get(name).cloned()
    }

    /// The name a value is registered under, if any.
    pub fn name_of(&self, value: &Value) -> Option<Rc<str>> {
        value.id().and_then(|id| self.by_id.get(&id).cloned())
    }

    pub fn codec(&self, type_name: &str) -> Option<&dyn ForeignCodec> {
        self.codecs.get(type_name).map(|codec| &**codec)
    }

    pub fn builtin_class(&self, ty: BuiltinType) -> Rc<Class> {
        self.builtins.iter().find(|entry| entry.0 == ty)
            .map(|entry| entry.1.clone())
            .unwrap_or_else(|| Class::builtin(ty, vec![], Dict::new()))
    }

    pub fn object_class(&self) -> Rc<Class> {
        self.builtin_class(BuiltinType::Object)
    }

    /// The class of a value (`type(value)`).
    pub fn type_of(&self, value: &Value) -> Rc<Class> {
        let ty = match *value {
            Value::Instance(ref i) => return i.class(),
            Value::Class(_) => BuiltinType::Type,
            Value::Bool(_) => BuiltinType::Bool,
            Value::Int(_) => BuiltinType::Int,
            Value::Float(_) => BuiltinType::Float,
            Value::Complex(..) => BuiltinType::Complex,
            Value::Str(_) => BuiltinType::Str,
            Value::Bytes(_) => BuiltinType::Bytes,
            Value::ByteArray(_) => BuiltinType::ByteArray,
            Value::List(_) => BuiltinType::List,
            Value::Tuple(_) => BuiltinType::Tuple,
            Value::Dict(_) => BuiltinType::Dict,
            Value::Set(_) => BuiltinType::Set,
            Value::FrozenSet(_) => BuiltinType::FrozenSet,
            Value::Range(_) => BuiltinType::Range,
            Value::Slice(_) => BuiltinType::Slice,
            _ => BuiltinType::Object,
        };
        self.builtin_class(ty)
    }

    /// Determine the kind a value is encoded as.
    pub fn classify(&self, value: &Value) -> Result<Kind> {
        let kind = match *value {
            Value::None           => Kind::None,
            Value::NotImplemented => Kind::NotImplemented,
            Value::Ellipsis       => Kind::Ellipsis,
            Value::Bool(_)        => Kind::Bool,
            Value::Int(_)         => Kind::Int,
            Value::Float(_)       => Kind::Float,
            Value::Complex(..)    => Kind::Complex,
            _ if self.name_of(value).is_some() => Kind::Opaque,
            Value::Str(_)         => Kind::Str,
            Value::Bytes(_)       => Kind::Bytes,
            Value::ByteArray(_)   => Kind::ByteArray,
            Value::Range(_)       => Kind::Range,
            Value::List(_)        => Kind::List,
            Value::Tuple(_)       => Kind::Tuple,
            Value::Dict(_)        => Kind::Dict,
            Value::Set(_)         => Kind::Set,
            Value::FrozenSet(_)   => Kind::FrozenSet,
            Value::Instance(_)    => Kind::Instance,
            Value::Class(_)       => Kind::Class,
            Value::Function(_)    => Kind::Function,
            Value::Code(_)        => Kind::Code,
            Value::Cell(_)        => Kind::Cell,
            Value::BoundMethod(_) => Kind::BoundMethod,
            Value::ClassMethod(_) => Kind::ClassMethod,
            Value::StaticMethod(_) => Kind::StaticMethod,
            Value::Super(_)       => Kind::Super,
            Value::Slice(_)       => Kind::Slice,
            Value::Property(_)    => Kind::Property,
            Value::Iterator(_)    => Kind::Iterator,
            Value::Enumerate(_)   => Kind::Enumerate,
            Value::MappingProxy(_) => Kind::MappingProxy,
            Value::MemoryView(_)  => Kind::MemoryView,
            Value::Foreign(ref f) if self.codecs.contains_key(f.type_name()) => Kind::Foreign,
            Value::Native(_) | Value::Opaque(_) | Value::Foreign(_) =>
                return Err(ErrorCode::UnsupportedType(value.type_name()).into()),
        };
        Ok(kind)
    }
}
