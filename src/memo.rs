// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Per-call memo tables mapping object identities to record ids.

use std::collections::HashMap;

use crate::error::ErrorCode;
use crate::value::Value;

/// Identity to id map of the encoder.
///
/// Memoized values are kept alive until the call ends: a value synthesized
/// during reduction could otherwise be freed, and a later allocation at the
/// same address would be taken for a backreference.
#[derive(Default)]
pub struct EncodeMemo {
    ids: HashMap<usize, u32>,
    keepalive: Vec<Value>,
}

impl EncodeMemo {
    pub fn new() -> EncodeMemo {
        EncodeMemo::default()
    }

    pub fn get(&self, value: &Value) -> Option<u32> {
        value.id().and_then(|id| self.ids.get(&id).cloned())
    }

    /// Assign the next id to a value with identity.
    pub fn insert(&mut self, value: &Value) -> u32 {
        let next = self.keepalive.len() as u32;
        if let Some(id) = value.id() {
            self.ids.insert(id, next);
        }
        self.keepalive.push(value.clone());
        next
    }

    pub fn len(&self) -> usize {
        self.keepalive.len()
    }
}

/// Id to value table of the decoder.  An id is reserved when its record
/// header is read and filled once the object exists; deferred objects stay
/// unfilled while their children are read.
#[derive(Default)]
pub struct DecodeMemo {
    slots: Vec<Option<Value>>,
}

impl DecodeMemo {
    pub fn new() -> DecodeMemo {
        DecodeMemo::default()
    }

    /// Reserve an id; ids have to appear in order, without gaps.
    pub fn reserve(&mut self, id: u32) -> Result<(), ErrorCode> {
        if id as usize != self.slots.len() {
            return Err(ErrorCode::CorruptStream(
                format!("record id {} out of sequence, expected {}", id, self.slots.len())));
        }
        self.slots.push(None);
        Ok(())
    }

    pub fn fill(&mut self, id: u32, value: Value) {
        if let Some(slot) = self.slots.get_mut(id as usize) {
            *slot = Some(value);
        }
    }

    pub fn get(&self, id: u32) -> Result<Value, ErrorCode> {
        match self.slots.get(id as usize) {
            Some(&Some(ref value)) => Ok(value.clone()),
            _ => Err(ErrorCode::MissingBackref(id)),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
