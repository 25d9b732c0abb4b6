// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Identity-preserving, cycle-safe encoding of object graphs
//!
//! # Object graphs
//!
//! A [`Value`] is a node of a graph of dynamically typed objects, modeled on
//! the data model of Python: numbers, strings and bytes, lists, tuples,
//! dicts and sets, classes with multiple inheritance and `__slots__`,
//! instances, functions with closures, bound methods, `super` proxies,
//! properties, iterators and more.  Objects live behind `Rc`s, so graphs can
//! share nodes and contain cycles.
//!
//! # Format
//!
//! An encoded graph is a flat stream of records, in depth-first order from
//! the root.  Each object with identity is written once and given an id;
//! every later reference to it is a backreference to that id.  On decoding,
//! an aggregate is allocated (empty) and memoized before its children are
//! read, and filled in once they are.  So after a round trip:
//!
//! * objects shared in the input are shared in the output,
//! * cycles, including an object containing itself, are reproduced,
//! * classes keep their bases, MRO, slots and namespace, and instances
//!   behave the same under attribute access and method calls.
//!
//! Values that are only meaningful inside the process (built-in classes,
//! native functions, handles such as `sys.stdout`) are written as a
//! reference to the name they are registered under in a [`Registry`], and
//! resolved against the registry on the decoding side.  Application types
//! can be carried as [`Foreign`] values by registering a [`ForeignCodec`].
//!
//! # Exported API
//!
//! The functions `value_to_*` and `value_from_*` encode and decode `Value`
//! graphs against a registry.  Like serde-based formats, the crate also
//! exports generic `to_*` and `from_*` functions for any type implementing
//! serde's `Serialize` and `Deserialize`; these go through `Value` by way of
//! [`to_value`] and [`from_value`], and therefore only support trees.
//!
//! *Note on enums:* Enum variants are converted to tuples `(name, data)`
//! (or a plain string for unit variants).  When converting back, the
//! single-entry mapping form used by e.g. `serde_json` is accepted as well.

pub use self::ser::{
    Serializer,
    SerOptions,
    to_writer,
    to_vec,
    value_to_writer,
    value_to_vec,
};

pub use self::de::{
    Deserializer,
    DeOptions,
    from_reader,
    from_slice,
    from_iter,
    value_from_reader,
    value_from_slice,
    value_from_iter,
};

pub use self::value::{
    Value,
    List,
    Dict,
    Set,
    FrozenSet,
    Tuple,
    HashKey,
    to_value,
    from_value,
};

pub use self::object::{
    BuiltinType,
    Class,
    Instance,
    Super,
    Range,
    Slice,
    SeqIter,
    Enumerate,
    MappingProxy,
    MemoryView,
    Opaque,
    Foreign,
};

pub use self::code::{
    Op,
    Code,
    Function,
    Cell,
    BoundMethod,
    MethodWrapper,
    Native,
    NativeFn,
    Property,
};

pub use self::registry::{Registry, Kind, Placement, ForeignCodec};

pub use self::error::{Error, ErrorCode, Result};

pub mod ser;
pub mod de;
pub mod error;
pub mod value;
pub mod object;
pub mod code;
pub mod registry;
mod memo;
mod reduce;
mod rebuild;
mod consts;
mod value_impls;

#[cfg(test)]
#[path = "../test/mod.rs"]
mod test;
