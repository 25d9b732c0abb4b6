// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Rebuilders: the decode side of each kind.
//!
//! Eager kinds get an empty placeholder that is memoized before any child
//! is read, so that children can refer back to it.  Each field is patched
//! into the placeholder as soon as all of its values are known.  Deferred
//! kinds are constructed in one go from their complete field list.

use std::cell::RefCell;
use std::rc::Rc;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::code::{BoundMethod, Cell, Code, Function, MethodWrapper, Property};
use crate::error::{ErrorCode, Result};
use crate::object::{Class, Enumerate, Instance, MappingProxy, MemoryView, SeqIter, Super};
use crate::registry::{Kind, Registry};
use crate::value::{Dict, FrozenSet, Set, Tuple, Value};

fn corrupt(what: String) -> ErrorCode {
    ErrorCode::CorruptStream(what)
}

fn single(name: &str, values: Vec<Value>) -> Result<Value> {
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value),
        _ => Err(corrupt(format!("field '{}' must hold one value", name)).into()),
    }
}

fn expect_class(name: &str, value: Value) -> Result<Rc<Class>> {
    match value {
        Value::Class(c) => Ok(c),
        other => Err(corrupt(format!("field '{}' must be a class, not '{}'",
                                     name, other.type_name())).into()),
    }
}

fn expect_str(name: &str, value: Value) -> Result<Rc<str>> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(corrupt(format!("field '{}' must be a str, not '{}'",
                                     name, other.type_name())).into()),
    }
}

fn expect_dict(name: &str, value: Value) -> Result<Rc<RefCell<Dict>>> {
    match value {
        Value::Dict(d) => Ok(d),
        other => Err(corrupt(format!("field '{}' must be a dict, not '{}'",
                                     name, other.type_name())).into()),
    }
}

fn expect_int(name: &str, value: Value) -> Result<BigInt> {
    match value {
        Value::Int(i) => Ok(i),
        other => Err(corrupt(format!("field '{}' must be an int, not '{}'",
                                     name, other.type_name())).into()),
    }
}

fn expect_offset(name: &str, value: Value) -> Result<usize> {
    expect_int(name, value)?.to_usize().ok_or_else(
        || corrupt(format!("field '{}' out of range", name)).into())
}

fn unknown(kind: Kind, name: &str) -> ErrorCode {
    ErrorCode::UnknownField(format!("{}.{}", kind.spec().name, name))
}

/// Allocate the empty placeholder of an eager kind.
pub fn allocate(kind: Kind, registry: &Registry) -> Result<Value> {
    Ok(match kind {
        Kind::List         => Value::list(vec![]),
        Kind::Tuple        => Value::Tuple(Rc::new(Tuple::default())),
        Kind::Dict         => Value::Dict(Rc::new(RefCell::new(Dict::new()))),
        Kind::Set          => Value::Set(Rc::new(RefCell::new(Set::new()))),
        Kind::FrozenSet    => Value::FrozenSet(Rc::new(FrozenSet::default())),
        Kind::Class        => Value::Class(Class::placeholder()),
        Kind::Instance     => Value::Instance(Instance::placeholder(registry.object_class())),
        Kind::Function     => Value::Function(Function::placeholder()),
        Kind::Cell         => Value::Cell(Rc::new(Cell::default())),
        Kind::BoundMethod  => BoundMethod::new(Value::None, Value::None),
        Kind::ClassMethod  => Value::ClassMethod(MethodWrapper::new(Value::None)),
        Kind::StaticMethod => Value::StaticMethod(MethodWrapper::new(Value::None)),
        Kind::Super        => Value::Super(Super::new(registry.object_class(), Value::None)),
        Kind::Slice        => Value::slice(Value::None, Value::None, Value::None),
        Kind::Property     => Value::Property(Property::new(None, None, None)),
        Kind::Iterator     => Value::Iterator(Rc::new(SeqIter::new(Value::tuple(vec![])))),
        Kind::Enumerate    => Value::Enumerate(Rc::new(Enumerate::new(Value::None,
                                                                      BigInt::from(0)))),
        Kind::MappingProxy => Value::MappingProxy(Rc::new(MappingProxy::new(
            Rc::new(RefCell::new(Dict::new()))))),
        Kind::MemoryView   => Value::MemoryView(Rc::new(MemoryView::placeholder())),
        other => return Err(corrupt(format!("{} has no placeholder", other.spec().name)).into()),
    })
}

/// Patch one complete field into a placeholder.
pub fn apply_field(kind: Kind, target: &Value, name: &str, values: Vec<Value>) -> Result<()> {
    match (kind, target) {
        (Kind::List, &Value::List(ref l)) => *l.borrow_mut() = values,
        (Kind::Tuple, &Value::Tuple(ref t)) => t.fill(values),
        (Kind::Set, &Value::Set(ref s)) => {
            let mut set = s.borrow_mut();
            for item in values {
                set.insert(item)?;
            }
        }
        (Kind::FrozenSet, &Value::FrozenSet(ref s)) => {
            let mut set = Set::new();
            for item in values {
                set.insert(item)?;
            }
            s.fill(set);
        }
        (Kind::Dict, &Value::Dict(ref d)) => {
            let mut dict = d.borrow_mut();
            let mut values = values.into_iter();
            while let (Some(key), Some(value)) = (values.next(), values.next()) {
                dict.insert(key, value)?;
            }
        }
        (Kind::Class, &Value::Class(ref c)) => match name {
            "__name__" => c.set_name(expect_str(name, single(name, values)?)?),
            "__bases__" => c.set_bases(values.into_iter().map(|v| expect_class(name, v))
                                       .collect::<Result<_>>()?),
            "__slots__" => c.set_slots(Some(values.into_iter().map(|v| expect_str(name, v))
                                            .collect::<Result<_>>()?)),
            "__dict__" => c.set_namespace(expect_dict(name, single(name, values)?)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::Instance, &Value::Instance(ref i)) => match name {
            "__class__" => i.bind_class(&expect_class(name, single(name, values)?)?)?,
            "__dict__" => i.set_dict(expect_dict(name, single(name, values)?)?)?,
            "__value__" => i.set_base_value(single(name, values)?),
            slot => i.set_slot(slot, Some(single(name, values)?))?,
        },
        (Kind::Function, &Value::Function(ref f)) => match name {
            "__name__" => f.set_name(expect_str(name, single(name, values)?)?),
            "__code__" => match single(name, values)? {
                Value::Code(code) => f.set_code(code),
                other => return Err(corrupt(format!("field '__code__' must be code, not '{}'",
                                                    other.type_name())).into()),
            },
            "__defaults__" => f.set_defaults(values),
            "__closure__" => f.set_closure(values.into_iter().map(|v| match v {
                Value::Cell(cell) => Ok(cell),
                other => Err(corrupt(format!("closure must hold cells, not '{}'",
                                             other.type_name())).into()),
            }).collect::<Result<_>>()?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::Cell, &Value::Cell(ref c)) => match name {
            "cell_contents" => c.set(single(name, values)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::BoundMethod, &Value::BoundMethod(ref m)) => match name {
            "__func__" => m.set(single(name, values)?, m.receiver()),
            "__self__" => m.set(m.func(), single(name, values)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::ClassMethod, &Value::ClassMethod(ref w)) |
        (Kind::StaticMethod, &Value::StaticMethod(ref w)) => match name {
            "__func__" => w.set_func(single(name, values)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::Super, &Value::Super(ref s)) => match name {
            "__thisclass__" => s.set_thisclass(expect_class(name, single(name, values)?)?),
            "__self__" => s.set_receiver(single(name, values)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::Slice, &Value::Slice(ref s)) => {
            let value = single(name, values)?;
            match name {
                "start" => s.set(value, s.stop(), s.step()),
                "stop" => s.set(s.start(), value, s.step()),
                "step" => s.set(s.start(), s.stop(), value),
                _ => return Err(unknown(kind, name).into()),
            }
        }
        (Kind::Property, &Value::Property(ref p)) => {
            let value = single(name, values)?;
            match name {
                "fget" => p.fill(value, p.fset(), p.fdel()),
                "fset" => p.fill(p.fget(), value, p.fdel()),
                "fdel" => p.fill(p.fget(), p.fset(), value),
                _ => return Err(unknown(kind, name).into()),
            }
        }
        (Kind::Iterator, &Value::Iterator(ref it)) => match name {
            "__source__" => it.set(single(name, values)?, it.index()),
            "__index__" => it.set(it.source(), expect_offset(name, single(name, values)?)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::Enumerate, &Value::Enumerate(ref e)) => match name {
            "__iter__" => e.set(single(name, values)?, e.count()),
            "__count__" => e.set(e.iter(), expect_int(name, single(name, values)?)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::MappingProxy, &Value::MappingProxy(ref p)) => match name {
            "__mapping__" => p.set_mapping(expect_dict(name, single(name, values)?)?),
            _ => return Err(unknown(kind, name).into()),
        },
        (Kind::MemoryView, &Value::MemoryView(ref m)) => {
            let value = single(name, values)?;
            match name {
                "obj" => m.set_source(value).map_err(|_| corrupt(
                    "memoryview must view bytes or a bytearray".into()))?,
                "offset" => m.set_window(expect_offset(name, value)?, m.length()),
                "length" => m.set_window(m.offset(), match value {
                    Value::None => None,
                    other => Some(expect_offset(name, other)?),
                }),
                _ => return Err(unknown(kind, name).into()),
            }
        }
        _ => return Err(corrupt(format!("cannot patch {} into '{}'",
                                        kind.spec().name, target.type_name())).into()),
    }
    Ok(())
}

/// Build a deferred kind from all of its fields.
pub fn construct(kind: Kind, fields: Vec<(String, Vec<Value>)>,
                 registry: &Registry) -> Result<Value> {
    let mut name = None;
    let mut params = Vec::new();
    let mut consts = Vec::new();
    let mut bytecode = None;
    let mut type_name = None;
    let mut state = None;
    for (field, values) in fields {
        match (kind, &*field) {
            (Kind::Code, "co_name") => name = Some(expect_str(&field, single(&field, values)?)?),
            (Kind::Code, "co_varnames") => params = values.into_iter()
                .map(|v| expect_str(&field, v)).collect::<Result<_>>()?,
            (Kind::Code, "co_consts") => consts = values,
            (Kind::Code, "co_code") => bytecode = Some(match single(&field, values)? {
                Value::Bytes(b) => b,
                other => return Err(corrupt(format!("co_code must be bytes, not '{}'",
                                                    other.type_name())).into()),
            }),
            (Kind::Foreign, "__type__") =>
                type_name = Some(expect_str(&field, single(&field, values)?)?),
            (Kind::Foreign, "__state__") => state = Some(single(&field, values)?),
            _ => return Err(unknown(kind, &field).into()),
        }
    }
    match kind {
        Kind::Code => match (name, bytecode) {
            (Some(name), Some(bytecode)) =>
                Ok(Value::Code(Rc::new(Code::from_parts(name, params, consts, bytecode)?))),
            _ => Err(corrupt("incomplete code record".into()).into()),
        },
        Kind::Foreign => match (type_name, state) {
            (Some(type_name), Some(state)) => {
                let codec = registry.codec(&type_name).ok_or_else(
                    || ErrorCode::UnresolvedReference(type_name.to_string()))?;
                Ok(Value::Foreign(codec.rebuild(state)?))
            }
            _ => Err(corrupt("incomplete foreign record".into()).into()),
        },
        other => Err(corrupt(format!("{} is not constructed after its children",
                                     other.spec().name)).into()),
    }
}
