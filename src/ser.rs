// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Object graph serialization
//!
//! The encoder walks the graph depth-first with an explicit work list, so
//! arbitrarily deep graphs do not exhaust the call stack.  Every object
//! with identity is written once; later occurrences become backreferences
//! to the id it was given.  A record header is always written before the
//! record's children, so a child referring to one of its ancestors finds
//! that ancestor already memoized.

use std::collections::HashSet;
use std::io;
use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use log::{debug, trace};
use num_bigint::BigInt;
use num_traits::Signed;
use serde::ser::Serialize;

use crate::consts::*;
use crate::error::{ErrorCode, Result};
use crate::memo::EncodeMemo;
use crate::reduce::reduce;
use crate::registry::{Kind, Placement, Registry};
use crate::value::{to_value, Value};

/// Options for serializing.
#[derive(Clone, Debug, Default)]
pub struct SerOptions {
    trace: bool,
}

impl SerOptions {
    /// Construct with default options:
    ///
    /// - no tracing of emitted records
    pub fn new() -> Self {
        Default::default()
    }

    /// Log every emitted record at trace level.
    pub fn trace(mut self) -> Self {
        self.trace = true;
        self
    }
}

/// A structure for serializing object graphs into a byte stream.
pub struct Serializer<'r, W> {
    writer: W,
    registry: &'r Registry,
    memo: EncodeMemo,
    options: SerOptions,
    backrefs: usize,
}

impl<'r, W: io::Write> Serializer<'r, W> {
    pub fn new(writer: W, registry: &'r Registry, options: SerOptions) -> Self {
        Serializer {
            writer,
            registry,
            memo: EncodeMemo::new(),
            options,
            backrefs: 0,
        }
    }

    /// Unwrap the `Writer` from the `Serializer`.
    pub fn into_inner(self) -> W {
        self.writer
    }

    #[inline]
    fn write_opcode(&mut self, opcode: u8) -> Result<()> {
        self.writer.write_all(&[opcode]).map_err(From::from)
    }

    #[inline]
    fn write_u32(&mut self, n: usize) -> Result<()> {
        if n > u32::MAX as usize {
            return Err(ErrorCode::InvalidValue(format!("length {} exceeds format limit", n)).into());
        }
        self.writer.write_u32::<LittleEndian>(n as u32).map_err(From::from)
    }

    fn write_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u32(bytes.len())?;
        self.writer.write_all(bytes).map_err(From::from)
    }

    fn serialize_bigint(&mut self, i: &BigInt) -> Result<()> {
        let bytes = if i.is_negative() {
            let n_bytes = i.to_bytes_le().1.len();
            let pos = i + (BigInt::from(1) << (n_bytes * 8));
            let mut bytes = pos.to_bytes_le().1;
            while bytes.len() < n_bytes {
                bytes.push(0x00);
            }
            if bytes.last().map_or(true, |&b| b < 0x80) {
                bytes.push(0xff);
            }
            bytes
        } else {
            let mut bytes = i.to_bytes_le().1;
            if bytes.last().map_or(false, |&b| b >= 0x80) {
                bytes.push(0x00);
            }
            bytes
        };
        self.write_prefixed_bytes(&bytes)
    }

    fn serialize_inline(&mut self, value: &Value) -> Result<()> {
        match *value {
            Value::None => self.write_opcode(NONE),
            Value::NotImplemented => self.write_opcode(NOT_IMPLEMENTED),
            Value::Ellipsis => self.write_opcode(ELLIPSIS),
            Value::Bool(b) => self.write_opcode(if b { NEWTRUE } else { NEWFALSE }),
            Value::Int(ref i) => {
                self.write_opcode(LONG)?;
                self.serialize_bigint(i)
            }
            Value::Float(f) => {
                self.write_opcode(BINFLOAT)?;
                self.writer.write_f64::<BigEndian>(f).map_err(From::from)
            }
            Value::Complex(re, im) => {
                self.write_opcode(COMPLEX)?;
                self.writer.write_f64::<BigEndian>(re)?;
                self.writer.write_f64::<BigEndian>(im).map_err(From::from)
            }
            ref other => Err(ErrorCode::UnsupportedType(other.type_name()).into()),
        }
    }

    fn serialize_immediate(&mut self, kind: Kind, value: &Value) -> Result<()> {
        match (kind, value) {
            (Kind::Opaque, _) => match self.registry.name_of(value) {
                Some(name) => self.write_prefixed_bytes(name.as_bytes()),
                None => Err(ErrorCode::UnsupportedType(value.type_name()).into()),
            },
            (_, &Value::Str(ref s)) => self.write_prefixed_bytes(s.as_bytes()),
            (_, &Value::Bytes(ref b)) => self.write_prefixed_bytes(b),
            (_, &Value::ByteArray(ref b)) => {
                let bytes = b.borrow().clone();
                self.write_prefixed_bytes(&bytes)
            }
            (_, &Value::Range(ref r)) => {
                self.serialize_bigint(r.start())?;
                self.serialize_bigint(r.stop())?;
                self.serialize_bigint(r.step())
            }
            _ => Err(ErrorCode::UnsupportedType(value.type_name()).into()),
        }
    }

    /// Write the record stream of a graph, without the framing.
    pub fn serialize(&mut self, root: &Value) -> Result<()> {
        let mut work = vec![Work::Value(root.clone())];
        // deferred records whose children are being written
        let mut open = HashSet::new();
        while let Some(item) = work.pop() {
            let value = match item {
                Work::Value(value) => value,
                Work::Close(id) => {
                    open.remove(&id);
                    continue;
                }
            };
            let kind = self.registry.classify(&value)?;
            let spec = kind.spec();
            if spec.placement == Placement::Inline {
                self.serialize_inline(&value)?;
                continue;
            }
            if let Some(id) = self.memo.get(&value) {
                if open.contains(&id) {
                    // the decoder builds it only after all of its children
                    return Err(ErrorCode::UnsupportedType(
                        format!("{} containing itself", spec.name)).into());
                }
                if self.options.trace {
                    trace!("backref to #{} ({})", id, spec.name);
                }
                self.backrefs += 1;
                self.write_opcode(BACKREF)?;
                self.write_u32(id as usize)?;
                continue;
            }
            let id = self.memo.insert(&value);
            if self.options.trace {
                trace!("record #{}: {}", id, spec.name);
            }
            self.write_opcode(spec.tag)?;
            self.write_u32(id as usize)?;
            if spec.placement == Placement::Immediate {
                self.serialize_immediate(kind, &value)?;
                continue;
            }
            let fields = reduce(kind, &value, self.registry)?;
            self.write_u32(fields.len())?;
            for field in &fields {
                self.write_prefixed_bytes(field.name.as_bytes())?;
                self.write_u32(field.values.len())?;
            }
            if spec.placement == Placement::Deferred {
                open.insert(id);
                work.push(Work::Close(id));
            }
            for field in fields.into_iter().rev() {
                work.extend(field.values.into_iter().rev().map(Work::Value));
            }
        }
        Ok(())
    }
}

enum Work {
    Value(Value),
    /// All children of a record have been written.
    Close(u32),
}

fn wrap_write<W: io::Write, F>(mut writer: W, inner: F) -> Result<()>
    where F: FnOnce(&mut W) -> Result<()>
{
    writer.write_all(&[PROTO, FORMAT_VERSION])?;
    inner(&mut writer)?;
    writer.write_all(&[STOP]).map_err(From::from)
}

/// Encode the object graph reachable from `value` into a stream.
pub fn value_to_writer<W: io::Write>(writer: &mut W, value: &Value, registry: &Registry,
                                     options: SerOptions) -> Result<()> {
    wrap_write(writer, |writer| {
        let mut ser = Serializer::new(writer, registry, options);
        ser.serialize(value)?;
        debug!("encoded {} records, {} backrefs", ser.memo.len(), ser.backrefs);
        Ok(())
    })
}

/// Encode the object graph reachable from `value` into a `Vec<u8>` buffer.
#[inline]
pub fn value_to_vec(value: &Value, registry: &Registry, options: SerOptions) -> Result<Vec<u8>> {
    let mut writer = Vec::with_capacity(128);
    value_to_writer(&mut writer, value, registry, options)?;
    Ok(writer)
}

/// Encode a serializable Rust value into a stream, by way of `Value`.
pub fn to_writer<W: io::Write, T: Serialize + ?Sized>(writer: &mut W, value: &T,
                                                      options: SerOptions) -> Result<()> {
    value_to_writer(writer, &to_value(value)?, &Registry::new(), options)
}

/// Encode a serializable Rust value into a `Vec<u8>` buffer.
#[inline]
pub fn to_vec<T: Serialize + ?Sized>(value: &T, options: SerOptions) -> Result<Vec<u8>> {
    let mut writer = Vec::with_capacity(128);
    to_writer(&mut writer, value, options)?;
    Ok(writer)
}
