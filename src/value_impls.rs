// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Serializer/Deserializer implementations for `value::Value`.
//!
//! Only tree-shaped parts of a graph map onto the serde data model: scalars,
//! strings and bytes, the containers, instances (as a map of their
//! attributes) and ranges and slices (as triples).  Everything else, and any
//! cycle, is an error.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::vec;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde::{de, ser};
use serde::de::{DeserializeOwned, DeserializeSeed, IntoDeserializer, Visitor};
use serde::ser::Serialize;

use crate::error::{Error, ErrorCode, Result};
use crate::value::{Dict, Value};

/// The children that a tree walk over `value` visits.
fn tree_children(value: &Value) -> Vec<Value> {
    match *value {
        Value::List(ref l) => l.borrow().clone(),
        Value::Tuple(ref t) => t.items().clone(),
        Value::Set(ref s) => s.borrow().iter().cloned().collect(),
        Value::FrozenSet(ref s) => s.items().iter().cloned().collect(),
        Value::Dict(ref d) => d.borrow().iter()
            .flat_map(|(k, v)| vec![k.clone(), v.clone()]).collect(),
        Value::MappingProxy(ref p) => p.mapping().borrow().iter()
            .flat_map(|(k, v)| vec![k.clone(), v.clone()]).collect(),
        Value::Instance(_) => attributes(value).into_iter().map(|(_, v)| v).collect(),
        Value::Cell(ref c) => c.get().into_iter().collect(),
        _ => vec![],
    }
}

/// Name/value pairs of an instance: its dict first, then its set slots.
fn attributes(value: &Value) -> Vec<(Value, Value)> {
    let mut attrs = Vec::new();
    if let Value::Instance(ref inst) = *value {
        if let Some(dict) = inst.dict() {
            attrs.extend(dict.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        for (name, slot) in inst.slot_values() {
            if let Some(v) = slot {
                attrs.push((Value::Str(name), v));
            }
        }
    }
    attrs
}

/// Whether some path through the value's containers leads back to itself.
fn is_recursive(root: &Value) -> bool {
    enum Visit {
        Enter(Value),
        Exit(usize),
    }
    let mut on_path = HashSet::new();
    let mut done = HashSet::new();
    let mut stack = vec![Visit::Enter(root.clone())];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Exit(id) => {
                on_path.remove(&id);
                done.insert(id);
            }
            Visit::Enter(value) => {
                let id = match value.id() {
                    Some(id) => id,
                    None => continue,
                };
                if on_path.contains(&id) {
                    return true;
                }
                if done.contains(&id) {
                    continue;
                }
                on_path.insert(id);
                stack.push(Visit::Exit(id));
                stack.extend(tree_children(&value).into_iter().map(Visit::Enter));
            }
        }
    }
    false
}

impl Serialize for Value {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if is_recursive(self) {
            return Err(ser::Error::custom(ErrorCode::Recursive));
        }
        Tree(self).serialize(serializer)
    }
}

/// A value known to be acyclic.
struct Tree<'a>(&'a Value);

impl<'a> Serialize for Tree<'a> {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::{SerializeMap, SerializeSeq, SerializeTuple};

        fn seq<S: ser::Serializer>(serializer: S, items: &[Value])
                                   -> std::result::Result<S::Ok, S::Error> {
            let mut state = serializer.serialize_seq(Some(items.len()))?;
            for item in items {
                state.serialize_element(&Tree(item))?;
            }
            state.end()
        }

        fn map<S: ser::Serializer>(serializer: S, pairs: &[(Value, Value)])
                                   -> std::result::Result<S::Ok, S::Error> {
            let mut state = serializer.serialize_map(Some(pairs.len()))?;
            for &(ref key, ref value) in pairs {
                state.serialize_entry(&Tree(key), &Tree(value))?;
            }
            state.end()
        }

        match *self.0 {
            Value::None => serializer.serialize_none(),
            Value::NotImplemented | Value::Ellipsis => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(b),
            Value::Int(ref i) => {
                if let Some(i) = i.to_i64() {
                    serializer.serialize_i64(i)
                } else if let Some(u) = i.to_u64() {
                    serializer.serialize_u64(u)
                } else if let Some(i) = i.to_i128() {
                    serializer.serialize_i128(i)
                } else if let Some(u) = i.to_u128() {
                    serializer.serialize_u128(u)
                } else {
                    Err(ser::Error::custom("integer too large"))
                }
            }
            Value::Float(f) => serializer.serialize_f64(f),
            Value::Complex(re, im) => {
                let mut state = serializer.serialize_tuple(2)?;
                state.serialize_element(&re)?;
                state.serialize_element(&im)?;
                state.end()
            }
            Value::Str(ref s) => serializer.serialize_str(s),
            Value::Bytes(ref b) => serializer.serialize_bytes(b),
            Value::ByteArray(ref b) => serializer.serialize_bytes(&b.borrow()),
            Value::MemoryView(ref m) => serializer.serialize_bytes(&m.to_bytes()),
            Value::List(_) | Value::Tuple(_) | Value::Set(_) | Value::FrozenSet(_) =>
                seq(serializer, &tree_children(self.0)),
            Value::Dict(ref d) => {
                let pairs: Vec<_> = d.borrow().iter()
                    .map(|(k, v)| (k.clone(), v.clone())).collect();
                map(serializer, &pairs)
            }
            Value::MappingProxy(ref p) => {
                let pairs: Vec<_> = p.mapping().borrow().iter()
                    .map(|(k, v)| (k.clone(), v.clone())).collect();
                map(serializer, &pairs)
            }
            Value::Instance(_) => map(serializer, &attributes(self.0)),
            Value::Cell(ref c) => match c.get() {
                Some(v) => serializer.serialize_some(&Tree(&v)),
                None => serializer.serialize_none(),
            },
            Value::Range(ref r) => seq(serializer, &[Value::Int(r.start().clone()),
                                                    Value::Int(r.stop().clone()),
                                                    Value::Int(r.step().clone())]),
            Value::Slice(ref s) => seq(serializer, &[s.start(), s.stop(), s.step()]),
            ref other => Err(ser::Error::custom(ErrorCode::UnsupportedType(other.type_name()))),
        }
    }
}

impl<'de> de::Deserialize<'de> for Value {
    #[inline]
    fn deserialize<D: de::Deserializer<'de>>(deser: D) -> std::result::Result<Value, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                fmt.write_str("any value")
            }

            #[inline]
            fn visit_bool<E>(self, value: bool) -> std::result::Result<Value, E> {
                Ok(Value::Bool(value))
            }

            #[inline]
            fn visit_i64<E>(self, value: i64) -> std::result::Result<Value, E> {
                Ok(Value::Int(BigInt::from(value)))
            }

            #[inline]
            fn visit_u64<E>(self, value: u64) -> std::result::Result<Value, E> {
                Ok(Value::Int(BigInt::from(value)))
            }

            #[inline]
            fn visit_i128<E>(self, value: i128) -> std::result::Result<Value, E> {
                Ok(Value::Int(BigInt::from(value)))
            }

            #[inline]
            fn visit_u128<E>(self, value: u128) -> std::result::Result<Value, E> {
                Ok(Value::Int(BigInt::from(value)))
            }

            #[inline]
            fn visit_f64<E>(self, value: f64) -> std::result::Result<Value, E> {
                Ok(Value::Float(value))
            }

            #[inline]
            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Value, E> {
                Ok(Value::str(value))
            }

            #[inline]
            fn visit_bytes<E: de::Error>(self, value: &[u8]) -> std::result::Result<Value, E> {
                Ok(Value::bytes(value))
            }

            #[inline]
            fn visit_none<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::None)
            }

            #[inline]
            fn visit_some<D: de::Deserializer<'de>>(self, deser: D)
                                                    -> std::result::Result<Value, D::Error> {
                de::Deserialize::deserialize(deser)
            }

            #[inline]
            fn visit_unit<E>(self) -> std::result::Result<Value, E> {
                Ok(Value::None)
            }

            #[inline]
            fn visit_seq<V: de::SeqAccess<'de>>(self, mut visitor: V)
                                                -> std::result::Result<Value, V::Error> {
                let mut values = Vec::with_capacity(visitor.size_hint().unwrap_or(0).min(4096));
                while let Some(elem) = visitor.next_element()? {
                    values.push(elem);
                }
                Ok(Value::list(values))
            }

            #[inline]
            fn visit_map<V: de::MapAccess<'de>>(self, mut visitor: V)
                                                -> std::result::Result<Value, V::Error> {
                let mut dict = Dict::new();
                while let Some((key, value)) = visitor.next_entry::<Value, Value>()? {
                    dict.insert(key, value).map_err(|e| <V::Error as de::Error>::custom(e))?;
                }
                Ok(Value::Dict(Rc::new(dict.into())))
            }
        }

        deser.deserialize_any(ValueVisitor)
    }
}

/// Deserializes a decoded value into any serde supported value.
pub struct Deserializer {
    value: Option<Value>,
}

impl Deserializer {
    /// Creates a new deserializer instance for deserializing the specified value.
    pub fn new(value: Value) -> Deserializer {
        Deserializer {
            value: Some(value),
        }
    }

    fn take(&mut self) -> Result<Value> {
        self.value.take().ok_or_else(|| ErrorCode::Structure("value already consumed".into()).into())
    }
}

impl<'de> de::Deserializer<'de> for Deserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value> {
        let value = self.take()?;
        match value {
            Value::None | Value::NotImplemented | Value::Ellipsis => visitor.visit_unit(),
            Value::Bool(v) => visitor.visit_bool(v),
            Value::Int(ref v) => {
                if let Some(i) = v.to_i64() {
                    visitor.visit_i64(i)
                } else if let Some(u) = v.to_u64() {
                    visitor.visit_u64(u)
                } else if let Some(i) = v.to_i128() {
                    visitor.visit_i128(i)
                } else if let Some(u) = v.to_u128() {
                    visitor.visit_u128(u)
                } else {
                    Err(ErrorCode::InvalidValue("integer too large".into()).into())
                }
            }
            Value::Float(v) => visitor.visit_f64(v),
            Value::Complex(re, im) => visitor.visit_seq(SeqDeserializer::new(
                vec![Value::Float(re), Value::Float(im)])),
            Value::Str(ref s) => visitor.visit_string(s.to_string()),
            Value::Bytes(ref b) => visitor.visit_byte_buf(b.to_vec()),
            Value::ByteArray(ref b) => visitor.visit_byte_buf(b.borrow().clone()),
            Value::MemoryView(ref m) => visitor.visit_byte_buf(m.to_bytes()),
            Value::List(_) | Value::Tuple(_) | Value::Set(_) | Value::FrozenSet(_) =>
                visitor.visit_seq(SeqDeserializer::new(tree_children(&value))),
            Value::Dict(ref d) => {
                let pairs: Vec<_> = d.borrow().iter()
                    .map(|(k, v)| (k.clone(), v.clone())).collect();
                visitor.visit_map(MapDeserializer::new(pairs))
            }
            Value::MappingProxy(ref p) => {
                let pairs: Vec<_> = p.mapping().borrow().iter()
                    .map(|(k, v)| (k.clone(), v.clone())).collect();
                visitor.visit_map(MapDeserializer::new(pairs))
            }
            Value::Instance(_) => visitor.visit_map(MapDeserializer::new(attributes(&value))),
            Value::Cell(ref c) => match c.get() {
                Some(v) => Deserializer::new(v).deserialize_any(visitor),
                None => visitor.visit_unit(),
            },
            Value::Range(ref r) => visitor.visit_seq(SeqDeserializer::new(vec![
                Value::Int(r.start().clone()),
                Value::Int(r.stop().clone()),
                Value::Int(r.step().clone()),
            ])),
            Value::Slice(ref s) => visitor.visit_seq(SeqDeserializer::new(
                vec![s.start(), s.stop(), s.step()])),
            ref other => Err(ErrorCode::UnsupportedType(other.type_name()).into()),
        }
    }

    #[inline]
    fn deserialize_option<V: Visitor<'de>>(mut self, visitor: V) -> Result<V::Value> {
        match self.take()? {
            Value::None => visitor.visit_none(),
            value => visitor.visit_some(Deserializer::new(value)),
        }
    }

    #[inline]
    fn deserialize_newtype_struct<V: Visitor<'de>>(self, _name: &'static str, visitor: V)
                                                   -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(mut self, _name: &'static str,
                                         _variants: &'static [&'static str],
                                         visitor: V) -> Result<V::Value> {
        let (variant, data) = match self.take()? {
            Value::Str(s) => (Value::Str(s), None),
            // (name, data) tuples, or a single-entry dict like serde_json
            Value::Tuple(ref t) if t.len() == 1 || t.len() == 2 => {
                let items = t.items().clone();
                variant_pair(items)
            }
            Value::List(ref l) if l.borrow().len() == 1 || l.borrow().len() == 2 => {
                let items = l.borrow().clone();
                variant_pair(items)
            }
            Value::Dict(ref d) if d.borrow().len() == 1 => {
                let items: Vec<Value> = tree_children(&Value::Dict(d.clone()));
                variant_pair(items)
            }
            other => return Err(ErrorCode::Structure(
                format!("enums must be represented as strings, tuples or mappings, not {}",
                        other.type_name())).into()),
        };
        visitor.visit_enum(EnumDeserializer { variant, data })
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

fn variant_pair(items: Vec<Value>) -> (Value, Option<Value>) {
    let mut items = items.into_iter();
    let variant = items.next().unwrap_or(Value::None);
    (variant, items.next())
}

struct EnumDeserializer {
    variant: Value,
    data: Option<Value>,
}

impl<'de> de::EnumAccess<'de> for EnumDeserializer {
    type Error = Error;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(self, seed: V)
                                             -> Result<(V::Value, VariantDeserializer)> {
        let variant = seed.deserialize(Deserializer::new(self.variant))?;
        Ok((variant, VariantDeserializer { data: self.data }))
    }
}

struct VariantDeserializer {
    data: Option<Value>,
}

impl VariantDeserializer {
    fn data(self) -> Result<Deserializer> {
        match self.data {
            Some(value) => Ok(Deserializer::new(value)),
            None => Err(ErrorCode::Structure("missing enum variant data".into()).into()),
        }
    }
}

impl<'de> de::VariantAccess<'de> for VariantDeserializer {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        match self.data {
            None | Some(Value::None) => Ok(()),
            Some(other) => Err(ErrorCode::Structure(
                format!("unit variant with data of type {}", other.type_name())).into()),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(self.data()?)
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        de::Deserializer::deserialize_any(self.data()?, visitor)
    }

    fn struct_variant<V: Visitor<'de>>(self, _fields: &'static [&'static str], visitor: V)
                                       -> Result<V::Value> {
        de::Deserializer::deserialize_any(self.data()?, visitor)
    }
}

struct SeqDeserializer {
    iter: vec::IntoIter<Value>,
}

impl SeqDeserializer {
    fn new(items: Vec<Value>) -> SeqDeserializer {
        SeqDeserializer { iter: items.into_iter() }
    }
}

impl<'de> de::SeqAccess<'de> for SeqDeserializer {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Deserializer::new(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapDeserializer {
    iter: vec::IntoIter<(Value, Value)>,
    value: Option<Value>,
}

impl MapDeserializer {
    fn new(pairs: Vec<(Value, Value)>) -> MapDeserializer {
        MapDeserializer { iter: pairs.into_iter(), value: None }
    }
}

impl<'de> de::MapAccess<'de> for MapDeserializer {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(Deserializer::new(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        match self.value.take() {
            Some(value) => seed.deserialize(Deserializer::new(value)),
            None => Err(ErrorCode::Structure("map value requested before key".into()).into()),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

impl<'de> IntoDeserializer<'de, Error> for Value {
    type Deserializer = Deserializer;

    fn into_deserializer(self) -> Deserializer {
        Deserializer::new(self)
    }
}


/// Create a `serde::Serializer` that serializes a `Serialize`e into a `Value`.
#[derive(Default)]
pub struct Serializer;

impl Serializer {
    /// Construct a new `Serializer`.
    pub fn new() -> Serializer {
        Serializer
    }
}

#[doc(hidden)]
pub struct SerializeVec {
    tuple: bool,
    items: Vec<Value>,
}

#[doc(hidden)]
pub struct SerializeTupleVariant {
    name: &'static str,
    items: Vec<Value>,
}

#[doc(hidden)]
pub struct SerializeDict {
    dict: Dict,
    key: Option<Value>,
}

#[doc(hidden)]
pub struct SerializeStructVariant {
    name: &'static str,
    dict: Dict,
}

fn dict_value(dict: Dict) -> Value {
    Value::Dict(Rc::new(dict.into()))
}

impl ser::Serializer for Serializer {
    type Ok = Value;
    type Error = Error;
    type SerializeSeq = SerializeVec;
    type SerializeTuple = SerializeVec;
    type SerializeTupleStruct = SerializeVec;
    type SerializeTupleVariant = SerializeTupleVariant;
    type SerializeMap = SerializeDict;
    type SerializeStruct = SerializeDict;
    type SerializeStructVariant = SerializeStructVariant;

    #[inline]
    fn serialize_bool(self, value: bool) -> Result<Value> {
        Ok(Value::Bool(value))
    }

    #[inline]
    fn serialize_i8(self, v: i8) -> Result<Value> {
        self.serialize_i64(v as i64)
    }

    #[inline]
    fn serialize_i16(self, v: i16) -> Result<Value> {
        self.serialize_i64(v as i64)
    }

    #[inline]
    fn serialize_i32(self, v: i32) -> Result<Value> {
        self.serialize_i64(v as i64)
    }

    #[inline]
    fn serialize_i64(self, value: i64) -> Result<Value> {
        Ok(Value::Int(BigInt::from(value)))
    }

    #[inline]
    fn serialize_i128(self, value: i128) -> Result<Value> {
        Ok(Value::Int(BigInt::from(value)))
    }

    #[inline]
    fn serialize_u8(self, v: u8) -> Result<Value> {
        self.serialize_u64(v as u64)
    }

    #[inline]
    fn serialize_u16(self, v: u16) -> Result<Value> {
        self.serialize_u64(v as u64)
    }

    #[inline]
    fn serialize_u32(self, v: u32) -> Result<Value> {
        self.serialize_u64(v as u64)
    }

    #[inline]
    fn serialize_u64(self, value: u64) -> Result<Value> {
        Ok(Value::Int(BigInt::from(value)))
    }

    #[inline]
    fn serialize_u128(self, value: u128) -> Result<Value> {
        Ok(Value::Int(BigInt::from(value)))
    }

    #[inline]
    fn serialize_f32(self, value: f32) -> Result<Value> {
        self.serialize_f64(value as f64)
    }

    #[inline]
    fn serialize_f64(self, value: f64) -> Result<Value> {
        Ok(Value::Float(value))
    }

    #[inline]
    fn serialize_char(self, value: char) -> Result<Value> {
        let mut buf = [0; 4];
        Ok(Value::str(value.encode_utf8(&mut buf)))
    }

    #[inline]
    fn serialize_str(self, value: &str) -> Result<Value> {
        Ok(Value::str(value))
    }

    #[inline]
    fn serialize_bytes(self, value: &[u8]) -> Result<Value> {
        Ok(Value::bytes(value))
    }

    #[inline]
    fn serialize_none(self) -> Result<Value> {
        Ok(Value::None)
    }

    #[inline]
    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value> {
        value.serialize(self)
    }

    #[inline]
    fn serialize_unit(self) -> Result<Value> {
        Ok(Value::None)
    }

    #[inline]
    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value> {
        Ok(Value::None)
    }

    #[inline]
    fn serialize_unit_variant(self, _name: &'static str, _variant_index: u32,
                              variant: &'static str) -> Result<Value> {
        Ok(Value::str(variant))
    }

    #[inline]
    fn serialize_newtype_struct<T: Serialize + ?Sized>(self, _name: &'static str, value: &T)
                                                       -> Result<Value> {
        value.serialize(self)
    }

    #[inline]
    fn serialize_newtype_variant<T: Serialize + ?Sized>(self, _name: &'static str,
                                                        _variant_index: u32,
                                                        variant: &'static str, value: &T)
                                                        -> Result<Value> {
        Ok(Value::tuple(vec![Value::str(variant), value.serialize(self)?]))
    }

    #[inline]
    fn serialize_seq(self, len: Option<usize>) -> Result<SerializeVec> {
        Ok(SerializeVec { tuple: false, items: Vec::with_capacity(len.unwrap_or(0)) })
    }

    #[inline]
    fn serialize_tuple(self, len: usize) -> Result<SerializeVec> {
        Ok(SerializeVec { tuple: true, items: Vec::with_capacity(len) })
    }

    #[inline]
    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SerializeVec> {
        self.serialize_tuple(len)
    }

    #[inline]
    fn serialize_tuple_variant(self, _name: &'static str, _variant_index: u32,
                               variant: &'static str, len: usize)
                               -> Result<SerializeTupleVariant> {
        Ok(SerializeTupleVariant { name: variant, items: Vec::with_capacity(len) })
    }

    #[inline]
    fn serialize_map(self, _len: Option<usize>) -> Result<SerializeDict> {
        Ok(SerializeDict { dict: Dict::new(), key: None })
    }

    #[inline]
    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<SerializeDict> {
        self.serialize_map(Some(len))
    }

    #[inline]
    fn serialize_struct_variant(self, _name: &'static str, _variant_index: u32,
                                variant: &'static str, _len: usize)
                                -> Result<SerializeStructVariant> {
        Ok(SerializeStructVariant { name: variant, dict: Dict::new() })
    }
}

impl ser::SerializeSeq for SerializeVec {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(if self.tuple { Value::tuple(self.items) } else { Value::list(self.items) })
    }
}

impl ser::SerializeTuple for SerializeVec {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SerializeVec {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleVariant for SerializeTupleVariant {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::tuple(vec![Value::str(self.name), Value::tuple(self.items)]))
    }
}

impl ser::SerializeMap for SerializeDict {
    type Ok = Value;
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        self.key = Some(key.serialize(Serializer)?);
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = self.key.take().ok_or_else(
            || ErrorCode::Structure("map value serialized before key".into()))?;
        self.dict.insert(key, value.serialize(Serializer)?)?;
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(dict_value(self.dict))
    }
}

impl ser::SerializeStruct for SerializeDict {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T)
                                              -> Result<()> {
        self.dict.set_str(key, value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(dict_value(self.dict))
    }
}

impl ser::SerializeStructVariant for SerializeStructVariant {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, key: &'static str, value: &T)
                                              -> Result<()> {
        self.dict.set_str(key, value.serialize(Serializer)?);
        Ok(())
    }

    fn end(self) -> Result<Value> {
        Ok(Value::tuple(vec![Value::str(self.name), dict_value(self.dict)]))
    }
}


/// Serialize any serde serializable object into a `value::Value`.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    value.serialize(Serializer::new())
}

/// Deserialize a `value::Value` into any serde deserializable object.
///
/// Graphs with cycles have no tree representation and are rejected.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    if is_recursive(&value) {
        return Err(ErrorCode::Recursive.into());
    }
    de::Deserialize::deserialize(Deserializer::new(value))
}
