// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Reducers: the encode side of each kind, taking an object apart into
//! named fields of child values.

use std::borrow::Cow;
use num_bigint::BigInt;

use crate::error::{ErrorCode, Result};
use crate::registry::{Kind, Registry};
use crate::value::Value;

/// One field of a record: its name and the child values it holds.
pub struct Field {
    pub name: Cow<'static, str>,
    pub values: Vec<Value>,
}

impl Field {
    fn new(name: &'static str, values: Vec<Value>) -> Field {
        Field { name: Cow::Borrowed(name), values }
    }

    fn one(name: &'static str, value: Value) -> Field {
        Field::new(name, vec![value])
    }
}

fn mismatch(kind: Kind, value: &Value) -> ErrorCode {
    ErrorCode::TypeMismatch(format!("cannot reduce '{}' as {:?}", value.type_name(), kind))
}

/// Extract the fields of an aggregate value, in the order of its kind's
/// field table.
pub fn reduce(kind: Kind, value: &Value, registry: &Registry) -> Result<Vec<Field>> {
    let fields = match (kind, value) {
        (Kind::List, &Value::List(ref l)) => vec![Field::new("items", l.borrow().clone())],
        (Kind::Tuple, &Value::Tuple(ref t)) => vec![Field::new("items", t.items().clone())],
        (Kind::Set, &Value::Set(ref s)) =>
            vec![Field::new("items", s.borrow().iter().cloned().collect())],
        (Kind::FrozenSet, &Value::FrozenSet(ref s)) =>
            vec![Field::new("items", s.items().iter().cloned().collect())],
        (Kind::Dict, &Value::Dict(ref d)) => {
            let d = d.borrow();
            let mut items = Vec::with_capacity(2 * d.len());
            for (key, value) in d.iter() {
                items.push(key.clone());
                items.push(value.clone());
            }
            vec![Field::new("items", items)]
        }
        (Kind::Class, &Value::Class(ref c)) => {
            let mut fields = vec![
                Field::one("__name__", Value::Str(c.name())),
                Field::new("__bases__", c.bases().into_iter().map(Value::Class).collect()),
            ];
            if let Some(slots) = c.slots() {
                fields.push(Field::new("__slots__", slots.into_iter().map(Value::Str).collect()));
            }
            fields.push(Field::one("__dict__", Value::Dict(c.namespace())));
            fields
        }
        (Kind::Instance, &Value::Instance(ref i)) => {
            let mut fields = vec![Field::one("__class__", Value::Class(i.class()))];
            if let Some(dict) = i.dict() {
                fields.push(Field::one("__dict__", Value::Dict(dict)));
            }
            if let Some(base) = i.base_value() {
                fields.push(Field::one("__value__", base));
            }
            for (name, slot) in i.slot_values() {
                if let Some(value) = slot {
                    fields.push(Field { name: Cow::Owned(name.to_string()), values: vec![value] });
                }
            }
            fields
        }
        (Kind::Function, &Value::Function(ref f)) => vec![
            Field::one("__name__", Value::Str(f.name())),
            Field::one("__code__", Value::Code(f.code())),
            Field::new("__defaults__", f.defaults()),
            Field::new("__closure__", f.closure().into_iter().map(Value::Cell).collect()),
        ],
        (Kind::Code, &Value::Code(ref c)) => vec![
            Field::one("co_name", Value::Str(c.name())),
            Field::new("co_varnames", c.params().iter().cloned().map(Value::Str).collect()),
            Field::new("co_consts", c.consts().to_vec()),
            Field::one("co_code", Value::Bytes(c.bytecode())),
        ],
        (Kind::Cell, &Value::Cell(ref c)) => match c.get() {
            Some(contents) => vec![Field::one("cell_contents", contents)],
            None => vec![],
        },
        (Kind::BoundMethod, &Value::BoundMethod(ref m)) => vec![
            Field::one("__func__", m.func()),
            Field::one("__self__", m.receiver()),
        ],
        (Kind::ClassMethod, &Value::ClassMethod(ref w)) |
        (Kind::StaticMethod, &Value::StaticMethod(ref w)) =>
            vec![Field::one("__func__", w.func())],
        (Kind::Super, &Value::Super(ref s)) => vec![
            Field::one("__thisclass__", Value::Class(s.thisclass())),
            Field::one("__self__", s.receiver()),
        ],
        (Kind::Slice, &Value::Slice(ref s)) => vec![
            Field::one("start", s.start()),
            Field::one("stop", s.stop()),
            Field::one("step", s.step()),
        ],
        (Kind::Property, &Value::Property(ref p)) => vec![
            Field::one("fget", p.fget()),
            Field::one("fset", p.fset()),
            Field::one("fdel", p.fdel()),
        ],
        (Kind::Iterator, &Value::Iterator(ref it)) => vec![
            Field::one("__source__", it.source()),
            Field::one("__index__", Value::Int(BigInt::from(it.index()))),
        ],
        (Kind::Enumerate, &Value::Enumerate(ref e)) => vec![
            Field::one("__iter__", e.iter()),
            Field::one("__count__", Value::Int(e.count())),
        ],
        (Kind::MappingProxy, &Value::MappingProxy(ref p)) =>
            vec![Field::one("__mapping__", Value::Dict(p.mapping()))],
        (Kind::MemoryView, &Value::MemoryView(ref m)) => vec![
            Field::one("obj", m.source()),
            Field::one("offset", Value::int(m.offset() as u64)),
            Field::one("length", m.length().map_or(Value::None, |n| Value::int(n as u64))),
        ],
        (Kind::Foreign, &Value::Foreign(ref f)) => {
            let codec = registry.codec(f.type_name()).ok_or_else(
                || ErrorCode::UnsupportedType(f.type_name().into()))?;
            vec![
                Field::one("__type__", Value::str(f.type_name())),
                Field::one("__state__", codec.reduce(f)?),
            ]
        }
        _ => return Err(mismatch(kind, value).into()),
    };
    Ok(fields)
}
