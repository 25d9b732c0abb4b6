// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Error objects and codes

use std::error;
use std::fmt;
use std::io;
use std::result;
use serde::{de, ser};

#[derive(Clone, PartialEq, Debug)]
pub enum ErrorCode {
    /// No reducer is registered for a reachable value
    UnsupportedType(String),
    /// Structurally invalid or truncated stream
    CorruptStream(String),
    /// Record tag outside of the registered set
    UnknownKindTag(u8),
    /// Field table names a field the kind does not have, or has wrong arity
    UnknownField(String),
    /// Stream was written with another format version
    VersionMismatch(u8),
    /// A backreference named an id that is not (yet) available
    MissingBackref(u32),
    /// An opaque reference did not resolve against the registry
    UnresolvedReference(String),
    /// Attribute outside of the declared slots of a class
    SlotViolation(String, String),
    /// Bases of a class cannot be linearized
    InconsistentMro(String),
    /// Value not hashable, but used as dict key or set item
    ValueNotHashable(String),
    /// Found trailing bytes after the STOP record
    TrailingBytes,
    /// A registry name or foreign type is already taken
    DuplicateRegistration(String),
    /// Recursive structure found where only trees are supported
    Recursive,
    /// Evaluation stack underflowed
    StackUnderflow,
    /// Attribute lookup failed
    AttributeNotFound(String, String),
    /// Attribute exists but cannot be assigned or deleted
    ReadOnlyAttribute(String),
    /// Value cannot be called
    NotCallable(String),
    /// Wrong number of arguments for a callable
    ArgumentMismatch(String),
    /// Operation applied to a value of the wrong type
    TypeMismatch(String),
    /// Sequence index out of range
    IndexOutOfRange,
    /// Mapping key not present
    KeyNotFound(String),
    /// Closure cell read before assignment
    EmptyCell,
    /// Iterator is exhausted
    StopIteration,
    /// Invalid value for the requested conversion
    InvalidValue(String),
    /// Structure deserialization error (e.g., unknown variant)
    Structure(String),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ErrorCode::UnsupportedType(ref what) => write!(fmt, "unsupported type: {}", what),
            ErrorCode::CorruptStream(ref why) => write!(fmt, "corrupt stream: {}", why),
            ErrorCode::UnknownKindTag(tag) => write!(fmt, "unknown kind tag {:#04x}", tag),
            ErrorCode::UnknownField(ref name) => write!(fmt, "unknown or malformed field '{}'", name),
            ErrorCode::VersionMismatch(v) => write!(fmt, "unsupported format version {}", v),
            ErrorCode::MissingBackref(n) => write!(fmt, "missing memo with id {}", n),
            ErrorCode::UnresolvedReference(ref name) =>
                write!(fmt, "unresolved reference: {}", name),
            ErrorCode::SlotViolation(ref cls, ref attr) =>
                write!(fmt, "'{}' object has no slot '{}'", cls, attr),
            ErrorCode::InconsistentMro(ref cls) =>
                write!(fmt, "cannot create a consistent method resolution order for {}", cls),
            ErrorCode::ValueNotHashable(ref ty) => write!(fmt, "unhashable type: '{}'", ty),
            ErrorCode::TrailingBytes => write!(fmt, "trailing bytes found"),
            ErrorCode::DuplicateRegistration(ref name) =>
                write!(fmt, "'{}' is already registered", name),
            ErrorCode::Recursive => write!(fmt, "recursive structure found"),
            ErrorCode::StackUnderflow => write!(fmt, "evaluation stack underflow"),
            ErrorCode::AttributeNotFound(ref ty, ref attr) =>
                write!(fmt, "'{}' object has no attribute '{}'", ty, attr),
            ErrorCode::ReadOnlyAttribute(ref attr) => write!(fmt, "can't set attribute '{}'", attr),
            ErrorCode::NotCallable(ref ty) => write!(fmt, "'{}' object is not callable", ty),
            ErrorCode::ArgumentMismatch(ref s) => write!(fmt, "argument mismatch: {}", s),
            ErrorCode::TypeMismatch(ref s) => write!(fmt, "type mismatch: {}", s),
            ErrorCode::IndexOutOfRange => write!(fmt, "index out of range"),
            ErrorCode::KeyNotFound(ref key) => write!(fmt, "key not found: {}", key),
            ErrorCode::EmptyCell => write!(fmt, "cell is empty"),
            ErrorCode::StopIteration => write!(fmt, "iterator exhausted"),
            ErrorCode::InvalidValue(ref s) => write!(fmt, "invalid value: {}", s),
            ErrorCode::Structure(ref s) => fmt.write_str(s),
        }
    }
}

/// This type represents all possible errors that can occur when encoding,
/// decoding or operating on a value graph.
#[derive(Debug)]
pub enum Error {
    /// Some IO error occurred when encoding or decoding a value.
    Io(io::Error),
    /// The stream had some error while decoding, at the given byte offset.
    Eval(ErrorCode, usize),
    /// Error while encoding, evaluating, or converting values.
    Syntax(ErrorCode),
}

impl Error {
    /// Returns the error code, unless this is an IO error.
    pub fn code(&self) -> Option<&ErrorCode> {
        match *self {
            Error::Io(_) => None,
            Error::Eval(ref code, _) | Error::Syntax(ref code) => Some(code),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Error {
        Error::Io(error)
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Error {
        Error::Syntax(code)
    }
}

pub type Result<T> = result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref error) => error.fmt(fmt),
            Error::Eval(ref code, offset) => write!(fmt, "decode error at offset {}: {}",
                                                    offset, code),
            Error::Syntax(ref code) => write!(fmt, "value error: {}", code)
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref error) => Some(error),
            _ => None,
        }
    }
}

impl de::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Error {
        Error::Syntax(ErrorCode::Structure(msg.to_string()))
    }
}

impl ser::Error for Error {
    fn custom<T: fmt::Display>(msg: T) -> Error {
        Error::Syntax(ErrorCode::Structure(msg.to_string()))
    }
}
