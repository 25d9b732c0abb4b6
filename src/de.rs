// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! # Object graph deserialization
//!
//! Records are replayed in the order they were written.  For an aggregate
//! record, the header (kind, id and field table) comes first; the decoder
//! allocates an empty placeholder, memoizes it under the record's id and
//! pushes a frame collecting the children.  Each time a field's values are
//! complete, they are patched into the placeholder.  Children referring to
//! the placeholder therefore get the final object, and cycles close by
//! themselves.
//!
//! Frames are kept on an explicit stack, so nesting depth is only limited
//! by memory.
//!
//! Two kinds of patches are held back until the objects they depend on are
//! final.  Dict keys and set items are hashed structurally when they are
//! tuples or frozensets, so a container holding a backreference to a tuple
//! whose items are still being read is filled once that tuple is complete.
//! Instance layouts follow from the class, so the fields of an instance
//! whose class record is still open are applied after the root is read.
//!
//! Note: decoding into serde types goes through `Value`; the `from_`
//! functions decode the graph first and then convert it with `from_value`.

use std::collections::HashSet;
use std::io::{self, BufReader, Read};
use std::iter::FusedIterator;
use std::mem;
use std::rc::Rc;
use byteorder::{ByteOrder, BigEndian, LittleEndian};
use iter_read::IterRead;
use log::{debug, trace};
use num_bigint::{BigInt, Sign};
use serde::de::DeserializeOwned;

use crate::consts::*;
use crate::error::{Error, ErrorCode, Result};
use crate::memo::DecodeMemo;
use crate::object::{Class, Range};
use crate::rebuild;
use crate::registry::{Kind, Placement, Registry};
use crate::value::{from_value, Value};

/// Options for deserializing.
#[derive(Clone, Debug, Default)]
pub struct DeOptions {
    trace: bool,
    allow_trailing_bytes: bool,
}

impl DeOptions {
    /// Construct with default options:
    ///
    /// - no tracing of replayed records
    /// - bytes after the STOP record are an error
    pub fn new() -> Self {
        Default::default()
    }

    /// Log every replayed record at trace level.
    pub fn trace(mut self) -> Self {
        self.trace = true;
        self
    }

    /// Ignore anything following the STOP record.
    pub fn allow_trailing_bytes(mut self) -> Self {
        self.allow_trailing_bytes = true;
        self
    }
}

/// An aggregate record whose children are being read.
struct Frame {
    kind: Kind,
    id: u32,
    /// The placeholder; `None` for deferred kinds.
    target: Option<Value>,
    fields: Vec<(String, u32)>,
    field_index: usize,
    current: Vec<Value>,
    /// Complete fields of a deferred kind.
    collected: Vec<(String, Vec<Value>)>,
    /// Some of the fields were held back.
    held: bool,
}

/// A complete field waiting to be applied to its placeholder.
struct Patch {
    kind: Kind,
    target: Value,
    name: String,
    values: Vec<Value>,
}

impl Patch {
    fn apply(self) -> Result<()> {
        rebuild::apply_field(self.kind, &self.target, &self.name, self.values)
    }

    /// Whether a key or item the patch hashes is not final yet.
    fn waits_for(&self, unsettled: &HashSet<usize>) -> bool {
        let step = match self.kind {
            Kind::Dict => 2,
            Kind::Set | Kind::FrozenSet => 1,
            _ => return false,
        };
        self.values.iter().step_by(step).any(|v| reaches_unsettled(v, unsettled))
    }
}

/// Whether hashing `value` would look at the items of a tuple or frozenset
/// that is not final yet.
fn reaches_unsettled(value: &Value, unsettled: &HashSet<usize>) -> bool {
    if unsettled.is_empty() {
        return false;
    }
    let mut seen = HashSet::new();
    let mut stack = vec![value.clone()];
    while let Some(value) = stack.pop() {
        let addr = match (&value, value.id()) {
            (&Value::Tuple(_), Some(addr)) | (&Value::FrozenSet(_), Some(addr)) => addr,
            _ => continue,
        };
        if unsettled.contains(&addr) {
            return true;
        }
        if !seen.insert(addr) {
            continue;
        }
        match value {
            Value::Tuple(ref t) => stack.extend(t.items().iter().cloned()),
            Value::FrozenSet(ref s) => stack.extend(s.items().iter().cloned()),
            _ => {}
        }
    }
    false
}

/// Decodes byte streams into object graphs.
pub struct Deserializer<'r, R: Read> {
    rdr: BufReader<R>,
    pos: usize,
    registry: &'r Registry,
    memo: DecodeMemo,
    frames: Vec<Frame>,
    classes: Vec<Rc<Class>>,
    /// Classes whose records are still being read.
    open_classes: HashSet<usize>,
    /// Tuples and frozensets whose items are not final yet.
    unsettled: HashSet<usize>,
    /// Container fields waiting for an unsettled key.
    unhashed: Vec<Patch>,
    /// Instance fields waiting for their class.
    unbound: Vec<Patch>,
    options: DeOptions,
}

fn located(err: Error, pos: usize) -> Error {
    match err {
        Error::Syntax(code) => Error::Eval(code, pos),
        other => other,
    }
}

impl<'r, R: Read> Deserializer<'r, R> {
    pub fn new(rdr: R, registry: &'r Registry, options: DeOptions) -> Deserializer<'r, R> {
        Deserializer {
            rdr: BufReader::new(rdr),
            pos: 0,
            registry,
            memo: DecodeMemo::new(),
            frames: Vec::with_capacity(16),
            classes: Vec::new(),
            open_classes: HashSet::new(),
            unsettled: HashSet::new(),
            unhashed: Vec::new(),
            unbound: Vec::new(),
            options,
        }
    }

    /// Decode a complete stream: version marker, root record and STOP.
    pub fn deserialize(&mut self) -> Result<Value> {
        match self.read_byte()? {
            PROTO => {}
            _ => return self.error(ErrorCode::CorruptStream("missing version marker".into())),
        }
        let version = self.read_byte()?;
        if version != FORMAT_VERSION {
            return self.error(ErrorCode::VersionMismatch(version));
        }
        let root = self.parse()?;
        match self.read_byte()? {
            STOP => {}
            _ => return self.error(ErrorCode::CorruptStream("expected STOP after root".into())),
        }
        if !self.unhashed.is_empty() {
            // only a frozenset reaching itself through its items stays unsettled
            return self.error(ErrorCode::ValueNotHashable("frozenset".into()));
        }
        for patch in mem::replace(&mut self.unbound, Vec::new()) {
            patch.apply().map_err(|e| located(e, self.pos))?;
        }
        for class in mem::replace(&mut self.classes, Vec::new()) {
            class.mro().map_err(|e| located(e, self.pos))?;
        }
        debug!("decoded {} records", self.memo.len());
        Ok(root)
    }

    /// Assert that we reached the end of the stream.
    pub fn end(&mut self) -> Result<()> {
        let mut buf = [0];
        match self.rdr.read(&mut buf) {
            Err(err) => Err(Error::Io(err)),
            Ok(1) => self.error(ErrorCode::TrailingBytes),
            _ => Ok(()),
        }
    }

    fn parse(&mut self) -> Result<Value> {
        loop {
            let mut value = match self.read_record()? {
                Some(value) => value,
                // a frame was pushed; it is complete already if it has no children
                None => match self.advance()? {
                    Some(value) => value,
                    None => continue,
                },
            };
            // hand the value up to its parents, completing them as we go
            loop {
                match self.frames.last_mut() {
                    None => return Ok(value),
                    Some(frame) => frame.current.push(value),
                }
                match self.advance()? {
                    Some(done) => value = done,
                    None => break,
                }
            }
        }
    }

    /// Apply the complete fields of the innermost frame.  Returns the
    /// finished object when the frame has no more fields to read.
    fn advance(&mut self) -> Result<Option<Value>> {
        let pos = self.pos;
        loop {
            let patch = {
                let frame = match self.frames.last_mut() {
                    Some(frame) => frame,
                    None => return Ok(None),
                };
                if frame.field_index == frame.fields.len() {
                    break;
                }
                if frame.current.len() != frame.fields[frame.field_index].1 as usize {
                    return Ok(None);
                }
                let name = frame.fields[frame.field_index].0.clone();
                let values = mem::replace(&mut frame.current, Vec::new());
                frame.field_index += 1;
                match frame.target {
                    Some(ref target) => Patch { kind: frame.kind, target: target.clone(), name, values },
                    None => {
                        frame.collected.push((name, values));
                        continue;
                    }
                }
            };
            self.patch(patch).map_err(|e| located(e, pos))?;
        }
        let frame = match self.frames.pop() {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let value = match frame.target {
            Some(value) => value,
            None => {
                let value = rebuild::construct(frame.kind, frame.collected, self.registry)
                    .map_err(|e| located(e, pos))?;
                self.memo.fill(frame.id, value.clone());
                value
            }
        };
        match value {
            Value::Tuple(_) => self.settle(&value).map_err(|e| located(e, pos))?,
            Value::FrozenSet(_) if !frame.held => self.settle(&value).map_err(|e| located(e, pos))?,
            Value::Class(ref class) => {
                if let Some(addr) = value.id() {
                    self.open_classes.remove(&addr);
                }
                self.classes.push(class.clone());
            }
            _ => {}
        }
        Ok(Some(value))
    }

    /// Apply a complete field, unless it depends on an object that is not
    /// final yet.
    fn patch(&mut self, patch: Patch) -> Result<()> {
        if patch.kind == Kind::Instance {
            let held = self.frames.last().map_or(false, |frame| frame.held) ||
                (patch.name == "__class__" && patch.values.iter().any(|v| self.class_is_open(v)));
            if held {
                self.hold_back();
                self.unbound.push(patch);
                return Ok(());
            }
        }
        if patch.waits_for(&self.unsettled) {
            self.hold_back();
            self.unhashed.push(patch);
            return Ok(());
        }
        patch.apply()
    }

    fn hold_back(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.held = true;
        }
    }

    /// Mark a tuple or frozenset as final and apply the held back fields
    /// that no longer depend on unsettled objects.
    fn settle(&mut self, value: &Value) -> Result<()> {
        if let Some(addr) = value.id() {
            self.unsettled.remove(&addr);
        }
        let mut i = 0;
        while i < self.unhashed.len() {
            if self.unhashed[i].waits_for(&self.unsettled) {
                i += 1;
                continue;
            }
            let patch = self.unhashed.remove(i);
            let target = patch.target.clone();
            patch.apply()?;
            if let (Value::FrozenSet(_), Some(addr)) = (&target, target.id()) {
                self.unsettled.remove(&addr);
            }
            // a frozenset that became final may release earlier patches
            i = 0;
        }
        Ok(())
    }

    /// Whether a class, or one of its bases, is still being read.
    fn class_is_open(&self, value: &Value) -> bool {
        if self.open_classes.is_empty() {
            return false;
        }
        let mut stack = match *value {
            Value::Class(ref class) => vec![class.clone()],
            _ => return false,
        };
        let mut seen = HashSet::new();
        while let Some(class) = stack.pop() {
            let addr = Rc::as_ptr(&class) as usize;
            if self.open_classes.contains(&addr) {
                return true;
            }
            if seen.insert(addr) {
                stack.extend(class.bases());
            }
        }
        false
    }

    /// Read one record.  Returns the value for complete records, or `None`
    /// if an aggregate frame was started.
    fn read_record(&mut self) -> Result<Option<Value>> {
        let value = match self.read_byte()? {
            NONE => Value::None,
            NOT_IMPLEMENTED => Value::NotImplemented,
            ELLIPSIS => Value::Ellipsis,
            NEWTRUE => Value::Bool(true),
            NEWFALSE => Value::Bool(false),
            LONG => Value::Int(self.read_long()?),
            BINFLOAT => {
                let bytes = self.read_bytes(8)?;
                Value::Float(BigEndian::read_f64(&bytes))
            }
            COMPLEX => {
                let bytes = self.read_bytes(16)?;
                Value::Complex(BigEndian::read_f64(&bytes[..8]), BigEndian::read_f64(&bytes[8..]))
            }
            BACKREF => {
                let id = self.read_u32()?;
                match self.memo.get(id) {
                    Ok(value) => value,
                    Err(code) => return self.error(code),
                }
            }
            STOP => return self.error(ErrorCode::CorruptStream("unexpected STOP".into())),
            PROTO => return self.error(ErrorCode::CorruptStream("unexpected version marker".into())),
            tag => match Kind::from_tag(tag) {
                Some(kind) => return self.read_identity(kind),
                None => return self.error(ErrorCode::UnknownKindTag(tag)),
            },
        };
        Ok(Some(value))
    }

    fn read_identity(&mut self, kind: Kind) -> Result<Option<Value>> {
        let id = self.read_u32()?;
        if let Err(code) = self.memo.reserve(id) {
            return self.error(code);
        }
        if self.options.trace {
            trace!("record #{}: {} at offset {}", id, kind.spec().name, self.pos);
        }
        match kind.placement() {
            Placement::Immediate => {
                let value = self.read_immediate(kind)?;
                self.memo.fill(id, value.clone());
                Ok(Some(value))
            }
            Placement::Eager | Placement::Deferred => {
                let fields = self.read_field_table(kind)?;
                let target = if kind.placement() == Placement::Eager {
                    let placeholder = rebuild::allocate(kind, self.registry)
                        .map_err(|e| located(e, self.pos))?;
                    self.memo.fill(id, placeholder.clone());
                    if let Some(addr) = placeholder.id() {
                        match kind {
                            Kind::Tuple | Kind::FrozenSet => { self.unsettled.insert(addr); }
                            Kind::Class => { self.open_classes.insert(addr); }
                            _ => {}
                        }
                    }
                    Some(placeholder)
                } else {
                    None
                };
                self.frames.push(Frame {
                    kind,
                    id,
                    target,
                    fields,
                    field_index: 0,
                    current: Vec::new(),
                    collected: Vec::new(),
                    held: false,
                });
                Ok(None)
            }
            Placement::Inline => self.error(ErrorCode::CorruptStream(
                format!("inline kind {} with id", kind.spec().name))),
        }
    }

    fn read_immediate(&mut self, kind: Kind) -> Result<Value> {
        match kind {
            Kind::Str => {
                let bytes = self.read_u32_prefixed_bytes()?;
                self.decode_unicode(bytes)
            }
            Kind::Bytes => Ok(Value::Bytes(Rc::from(self.read_u32_prefixed_bytes()?))),
            Kind::ByteArray => Ok(Value::bytearray(&self.read_u32_prefixed_bytes()?)),
            Kind::Range => {
                let start = self.read_long()?;
                let stop = self.read_long()?;
                let step = self.read_long()?;
                match Range::new(start, stop, step) {
                    Ok(range) => Ok(Value::Range(Rc::new(range))),
                    Err(err) => Err(located(err, self.pos)),
                }
            }
            Kind::Opaque => {
                let bytes = self.read_u32_prefixed_bytes()?;
                let name = match String::from_utf8(bytes) {
                    Ok(name) => name,
                    Err(_) => return self.error(ErrorCode::CorruptStream(
                        "invalid UTF-8 in reference name".into())),
                };
                match self.registry.lookup(&name) {
                    Some(value) => Ok(value),
                    None => self.error(ErrorCode::UnresolvedReference(name)),
                }
            }
            other => self.error(ErrorCode::CorruptStream(
                format!("{} has no immediate payload", other.spec().name))),
        }
    }

    /// Read and validate a field table.  Known fields must appear in table
    /// order, at most once and with their declared arity; open kinds may add
    /// single-valued fields after them.
    fn read_field_table(&mut self, kind: Kind) -> Result<Vec<(String, u32)>> {
        let spec = kind.spec();
        let nfields = self.read_u32()?;
        let mut fields: Vec<(String, u32)> = Vec::with_capacity((nfields as usize).min(16));
        let mut last_known = None;
        let mut in_extras = false;
        for _ in 0..nfields {
            let bytes = self.read_u32_prefixed_bytes()?;
            let name = match String::from_utf8(bytes) {
                Ok(name) => name,
                Err(_) => return self.error(ErrorCode::CorruptStream(
                    "invalid UTF-8 in field name".into())),
            };
            let count = self.read_u32()?;
            match spec.fields.iter().position(|f| f.name == name) {
                Some(index) => {
                    if in_extras || last_known.map_or(false, |last| last >= index) {
                        return self.error(ErrorCode::CorruptStream(
                            format!("field '{}' out of order", name)));
                    }
                    if !spec.fields[index].arity.accepts(count) {
                        return self.error(ErrorCode::UnknownField(name));
                    }
                    last_known = Some(index);
                }
                None if spec.open => {
                    if count != 1 || fields.iter().any(|f| f.0 == name) {
                        return self.error(ErrorCode::UnknownField(name));
                    }
                    in_extras = true;
                }
                None => return self.error(ErrorCode::UnknownField(name)),
            }
            fields.push((name, count));
        }
        for field in spec.fields.iter().filter(|f| f.required) {
            if !fields.iter().any(|f| f.0 == field.name) {
                return self.error(ErrorCode::CorruptStream(
                    format!("{} record lacks field '{}'", spec.name, field.name)));
            }
        }
        Ok(fields)
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0];
        match self.rdr.read(&mut buf) {
            Ok(1) => {
                self.pos += 1;
                Ok(buf[0])
            }
            Ok(_) => self.error(ErrorCode::CorruptStream("unexpected end of stream".into())),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self.rdr.by_ref().take(n).read_to_end(&mut buf) {
            Ok(m) if m as u64 == n => {
                self.pos += m;
                Ok(buf)
            }
            Ok(_) => self.error(ErrorCode::CorruptStream("unexpected end of stream".into())),
            Err(err) => Err(Error::Io(err)),
        }
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(LittleEndian::read_u32(&bytes))
    }

    fn read_u32_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()?;
        self.read_bytes(len as u64)
    }

    fn read_long(&mut self) -> Result<BigInt> {
        let bytes = self.read_u32_prefixed_bytes()?;
        Ok(decode_long(&bytes))
    }

    fn decode_unicode(&self, string: Vec<u8>) -> Result<Value> {
        match String::from_utf8(string) {
            Ok(v) => Ok(Value::Str(Rc::from(v))),
            Err(_) => self.error(ErrorCode::CorruptStream("invalid UTF-8 in str".into())),
        }
    }

    fn error<T>(&self, reason: ErrorCode) -> Result<T> {
        Err(Error::Eval(reason, self.pos))
    }
}

fn decode_long(bytes: &[u8]) -> BigInt {
    // BigInt::from_bytes_le doesn't like a sign bit in the bytes, therefore
    // we have to extract that ourselves and do the two-s complement.
    let negative = !bytes.is_empty() && (bytes[bytes.len() - 1] & 0x80 != 0);
    let mut val = BigInt::from_bytes_le(Sign::Plus, bytes);
    if negative {
        val -= BigInt::from(1) << (bytes.len() * 8);
    }
    val
}

/// Decodes an object graph from a `std::io::Read`.
pub fn value_from_reader<R: Read>(rdr: R, registry: &Registry, options: DeOptions)
                                  -> Result<Value> {
    let allow_trailing = options.allow_trailing_bytes;
    let mut de = Deserializer::new(rdr, registry, options);
    let value = de.deserialize()?;
    if !allow_trailing {
        de.end()?;
    }
    Ok(value)
}

/// Decodes an object graph from a byte slice `&[u8]`.
pub fn value_from_slice(v: &[u8], registry: &Registry, options: DeOptions) -> Result<Value> {
    value_from_reader(v, registry, options)
}

/// Decodes an object graph directly from an iterator.
pub fn value_from_iter<I>(iter: I, registry: &Registry, options: DeOptions) -> Result<Value>
    where I: FusedIterator<Item=io::Result<u8>>
{
    value_from_reader(IterRead::new(iter), registry, options)
}

/// Decodes a serde value from a `std::io::Read`.
pub fn from_reader<R: Read, T: DeserializeOwned>(rdr: R, options: DeOptions) -> Result<T> {
    from_value(value_from_reader(rdr, &Registry::new(), options)?)
}

/// Decodes a serde value from a byte slice `&[u8]`.
pub fn from_slice<T: DeserializeOwned>(v: &[u8], options: DeOptions) -> Result<T> {
    from_value(value_from_slice(v, &Registry::new(), options)?)
}

/// Decodes a serde value directly from an iterator.
pub fn from_iter<I, T>(iter: I, options: DeOptions) -> Result<T>
    where I: FusedIterator<Item=io::Result<u8>>,
          T: DeserializeOwned
{
    from_value(value_from_iter(iter, &Registry::new(), options)?)
}
