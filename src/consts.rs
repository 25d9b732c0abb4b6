// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Constants for record tags.
//!
//! These are not in an enum because the decoder has to deal with arbitrary
//! bytes anyway; the `Kind` enum in the registry maps them to value kinds.

pub const FORMAT_VERSION   : u8 = 1;

// Stream structure
pub const PROTO            : u8 = b'\x80'; // format version marker; 1-byte argument
pub const STOP             : u8 = b'.';    // every stream ends with STOP
pub const BACKREF          : u8 = b'g';    // reference to a memoized record; 4-byte id

// Inline atomics (never memoized)
pub const NONE             : u8 = b'N';    // None
pub const NOT_IMPLEMENTED  : u8 = b'n';    // NotImplemented
pub const ELLIPSIS         : u8 = b'E';    // Ellipsis
pub const NEWTRUE          : u8 = b'\x88'; // True
pub const NEWFALSE         : u8 = b'\x89'; // False
pub const LONG             : u8 = b'L';    // integer; counted two's complement bytes
pub const BINFLOAT         : u8 = b'G';    // float; 8-byte big endian
pub const COMPLEX          : u8 = b'x';    // complex; two 8-byte big endian floats

// Memoized atomics: tag, id, payload
pub const BINUNICODE       : u8 = b'X';    // str; counted UTF-8 bytes
pub const BINBYTES         : u8 = b'B';    // bytes; counted bytes
pub const BYTEARRAY        : u8 = b'\x96'; // bytearray; counted bytes
pub const RANGE            : u8 = b'r';    // range; three counted integers
pub const OPAQUE           : u8 = b'Q';    // registry reference; counted UTF-8 name

// Aggregates: tag, id, field table, children
pub const LIST             : u8 = b'l';
pub const TUPLE            : u8 = b't';
pub const DICT             : u8 = b'd';
pub const SET              : u8 = b'\x8f';
pub const FROZENSET        : u8 = b'\x91';
pub const CLASS            : u8 = b'c';
pub const INSTANCE         : u8 = b'o';
pub const FUNCTION         : u8 = b'f';
pub const CODE             : u8 = b'k';
pub const CELL             : u8 = b'C';
pub const BOUND_METHOD     : u8 = b'm';
pub const CLASSMETHOD      : u8 = b'y';
pub const STATICMETHOD     : u8 = b'z';
pub const SUPER            : u8 = b's';
pub const SLICE            : u8 = b'i';
pub const PROPERTY         : u8 = b'p';
pub const ITERATOR         : u8 = b'I';
pub const ENUMERATE        : u8 = b'e';
pub const FOREIGN          : u8 = b'F';
pub const MAPPINGPROXY     : u8 = b'P';
pub const MEMORYVIEW       : u8 = b'M';
