// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.


use std::fmt;
use byteorder::{LittleEndian, WriteBytesExt};
use crate::consts::*;
use crate::{value_to_vec, value_from_slice, Code, DeOptions, ErrorCode, Function, Op, Registry,
            Result, SerOptions, Value};

/// Builds streams by hand, for inputs the encoder never produces.
struct Stream(Vec<u8>);

impl Stream {
    fn new() -> Stream {
        Stream(vec![PROTO, FORMAT_VERSION])
    }

    fn byte(mut self, b: u8) -> Stream {
        self.0.push(b);
        self
    }

    fn u32(mut self, n: u32) -> Stream {
        self.0.write_u32::<LittleEndian>(n).unwrap();
        self
    }

    fn text(self, s: &str) -> Stream {
        let mut stream = self.u32(s.len() as u32);
        stream.0.extend_from_slice(s.as_bytes());
        stream
    }

    fn header(self, tag: u8, id: u32, fields: &[(&str, u32)]) -> Stream {
        let mut stream = self.byte(tag).u32(id).u32(fields.len() as u32);
        for &(name, count) in fields {
            stream = stream.text(name).u32(count);
        }
        stream
    }

    fn str(self, id: u32, s: &str) -> Stream {
        self.byte(BINUNICODE).u32(id).text(s)
    }

    fn stop(self) -> Vec<u8> {
        self.byte(STOP).0
    }
}

fn roundtrip_with(value: &Value, registry: &Registry) -> Value {
    let bytes = value_to_vec(value, registry, SerOptions::new()).unwrap();
    value_from_slice(&bytes, registry, DeOptions::new()).unwrap()
}

fn roundtrip(value: &Value) -> Value {
    roundtrip_with(value, &Registry::new())
}

fn items(value: &Value) -> Vec<Value> {
    match *value {
        Value::List(ref l) => l.borrow().clone(),
        Value::Tuple(ref t) => t.items().clone(),
        ref other => panic!("not a sequence: {}", other),
    }
}

fn push(list: &Value, item: Value) {
    match *list {
        Value::List(ref l) => l.borrow_mut().push(item),
        ref other => panic!("not a list: {}", other),
    }
}

fn code_of<T: fmt::Debug>(result: Result<T>) -> ErrorCode {
    match result {
        Ok(value) => panic!("unexpected success: {:?}", value),
        Err(err) => err.code().cloned().expect("error without code"),
    }
}

fn decode_err(bytes: &[u8]) -> ErrorCode {
    code_of(value_from_slice(bytes, &Registry::new(), DeOptions::new()))
}

fn function(name: &str, params: &[&str], consts: Vec<Value>, ops: Vec<Op>) -> Value {
    Value::Function(Function::new(Code::new(name, params, consts, ops), vec![], vec![]))
}

mod struct_tests {
    use std::collections::{BTreeMap, HashMap};
    use std::fmt;
    use serde::de::DeserializeOwned;
    use serde::ser;
    use serde_derive::{Deserialize, Serialize};
    use crate::{to_vec, from_slice, from_value, to_value, value_from_slice, Class, DeOptions,
                Dict, ErrorCode, Registry, SerOptions, Value};
    use super::push;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Inner {
        a: (),
        b: usize,
        c: Vec<String>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Outer {
        inner: Vec<Inner>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Unit;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Newtype(i32);

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Tuple(i32, bool);

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    enum Animal {
        Dog,
        AntHive(Vec<String>),
        Frog(String, Vec<isize>),
        Cat { age: usize, name: String },
    }

    fn test_encode_ok<T>(value: T, repr: &'static str)
        where T: PartialEq + fmt::Debug + ser::Serialize + DeserializeOwned,
    {
        let vec = to_vec(&value, SerOptions::new()).unwrap();
        let val = value_from_slice(&vec, &Registry::new(), DeOptions::new()).unwrap();
        assert_eq!(format!("{}", val), repr);
        let back: T = from_slice(&vec, DeOptions::new()).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn encode_types() {
        test_encode_ok((), "None");
        test_encode_ok(None::<i32>, "None");
        test_encode_ok(Some(false), "False");
        test_encode_ok(4.5_f64, "4.5");
        test_encode_ok('x', "'x'");
        test_encode_ok(u128::MAX, "340282366920938463463374607431768211455");
        test_encode_ok(-3_i8, "-3");
    }

    #[test]
    fn encode_struct() {
        test_encode_ok(Unit,
                       r#"None"#);
        test_encode_ok(Newtype(42),
                       r#"42"#);
        test_encode_ok(Tuple(42, false),
                       r#"(42, False)"#);
        test_encode_ok(Inner { a: (), b: 32, c: vec!["doc".into()] },
                       r#"{'a': None, 'b': 32, 'c': ['doc']}"#);
        test_encode_ok(Outer { inner: vec![Inner { a: (), b: 1, c: vec![] }] },
                       r#"{'inner': [{'a': None, 'b': 1, 'c': []}]}"#);
    }

    #[test]
    fn encode_enum() {
        test_encode_ok(Animal::Dog,
                       r#"'Dog'"#);
        test_encode_ok(Animal::AntHive(vec!["ant".into(), "aunt".into()]),
                       r#"('AntHive', ['ant', 'aunt'])"#);
        test_encode_ok(Animal::Frog("Henry".into(), vec![1, 5]),
                       r#"('Frog', ('Henry', [1, 5]))"#);
        test_encode_ok(Animal::Cat { age: 5, name: "Molyneux".into() },
                       r#"('Cat', {'age': 5, 'name': 'Molyneux'})"#);
    }

    #[test]
    fn decode_enum_from_mapping() {
        let data = Value::dict(vec![(Value::str("age"), Value::int(3)),
                                    (Value::str("name"), Value::str("Tom"))]).unwrap();
        let value = Value::dict(vec![(Value::str("Cat"), data)]).unwrap();
        let animal: Animal = from_value(value).unwrap();
        assert_eq!(animal, Animal::Cat { age: 3, name: "Tom".into() });
    }

    #[test]
    fn maps() {
        let mut tree = BTreeMap::new();
        tree.insert("one".to_string(), 1);
        tree.insert("two".to_string(), 2);
        let vec = to_vec(&tree, SerOptions::new()).unwrap();
        let back: BTreeMap<String, i32> = from_slice(&vec, DeOptions::new()).unwrap();
        assert_eq!(back, tree);

        let mut hash = HashMap::new();
        hash.insert(-7_i64, vec![1_u8, 2, 3]);
        hash.insert(1 << 40, vec![]);
        let vec = to_vec(&hash, SerOptions::new()).unwrap();
        let back: HashMap<i64, Vec<u8>> = from_slice(&vec, DeOptions::new()).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn instances_convert_as_attribute_maps() {
        let registry = Registry::new();
        let class = Class::new("Config", vec![registry.object_class()], Dict::new());
        let config = Value::Class(class).call(&[]).unwrap();
        config.set_attr("retries", Value::int(3)).unwrap();
        config.set_attr("timeout", Value::int(30)).unwrap();
        let attrs: BTreeMap<String, i64> = from_value(config).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs["retries"], 3);
        assert_eq!(attrs["timeout"], 30);
    }

    #[test]
    fn roundtrip_json() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"a": [1, 2.5, "x", null, true], "b": {"c": [], "d": -4}}"#).unwrap();
        let vec = to_vec(&json, SerOptions::new()).unwrap();
        let back: serde_json::Value = from_slice(&vec, DeOptions::new()).unwrap();
        assert_eq!(json, back);

        let value = Value::dict(vec![
            (Value::str("a"), Value::list(vec![Value::int(1), Value::Float(2.5), Value::None])),
        ]).unwrap();
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"a":[1,2.5,null]}"#);
        let parsed: Value = serde_json::from_str(r#"{"a":[1,2.5,null]}"#).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn recursive_values_are_rejected() {
        let list = Value::list(vec![Value::int(1)]);
        push(&list, list.clone());
        let err = from_value::<serde_json::Value>(list.clone()).unwrap_err();
        assert_eq!(err.code(), Some(&ErrorCode::Recursive));
        assert!(serde_json::to_string(&list).is_err());

        // sharing without a cycle is fine
        let shared = Value::list(vec![Value::int(1)]);
        let tree = Value::list(vec![shared.clone(), shared]);
        let back: Vec<Vec<i32>> = from_value(tree).unwrap();
        assert_eq!(back, vec![vec![1], vec![1]]);
    }

    #[test]
    fn to_value_builds_graph_values() {
        let value = to_value(&Animal::Frog("Henry".into(), vec![1])).unwrap();
        assert_eq!(value.type_name(), "tuple");
        assert_eq!(value.repr(), "('Frog', ('Henry', [1]))");
        let back: Animal = from_value(value).unwrap();
        assert_eq!(back, Animal::Frog("Henry".into(), vec![1]));
    }
}

mod value_tests {
    use std::io::Cursor;
    use std::rc::Rc;
    use num_bigint::BigInt;
    use rand::{Rng, thread_rng};
    use quickcheck::{QuickCheck, StdGen};
    use crate::consts::*;
    use crate::{value_to_vec, value_to_writer, value_from_slice, value_from_reader,
                value_from_iter, Cell, Class, Code, DeOptions, Dict, ErrorCode, Foreign, ForeignCodec,
                Native, Opaque, Registry, Result, SerOptions, Value};
    use super::arby::Sample;
    use super::{code_of, decode_err, items, push, roundtrip, roundtrip_with, Stream};

    /// A graph touching most kinds, with sharing and cycles.
    fn sample_graph(registry: &Registry) -> Value {
        let class = Class::new("Node", vec![registry.object_class()], Dict::new());
        let node = Value::Class(class.clone()).call(&[]).unwrap();
        node.set_attr("me", node.clone()).unwrap();
        node.set_attr("label", Value::str("root")).unwrap();
        class.set_attr("default", node.clone()).unwrap();
        let shared = Value::tuple(vec![Value::int(1), Value::Float(2.5), Value::Complex(0.0, 1.0)]);
        let list = Value::list(vec![shared.clone(), shared, node]);
        push(&list, list.clone());
        Value::dict(vec![
            (Value::str("graph"), list),
            (Value::int(-129), Value::bytes(b"\x00\xff")),
            (Value::tuple(vec![]), Value::set(vec![Value::Bool(true), Value::None]).unwrap()),
            (Value::str("range"), Value::range(0, 10, 3).unwrap()),
            (Value::str("cell"), Value::cell(Some(Value::bytearray(b"abc")))),
        ]).unwrap()
    }

    #[test]
    fn atomics() {
        let big = BigInt::from(10).pow(40);
        let values = vec![
            Value::None, Value::NotImplemented, Value::Ellipsis,
            Value::Bool(false), Value::Bool(true),
            Value::int(0), Value::int(1), Value::int(-1), Value::int(127), Value::int(128),
            Value::int(-128), Value::int(-129), Value::int(255), Value::int(256),
            Value::int(i64::MAX), Value::int(i64::MIN),
            Value::Int(big.clone()), Value::Int(-big),
            Value::Float(0.0), Value::Float(-1.5), Value::Float(1e300),
            Value::Float(f64::INFINITY), Value::Complex(1.5, -2.0),
            Value::str(""), Value::str("hello ünïcode ☃"),
            Value::bytes(b""), Value::bytes(b"\x00\xffabc"), Value::bytearray(b"mutable"),
            Value::range(0, 10, 3).unwrap(), Value::range(10, -5, -2).unwrap(),
        ];
        for value in values {
            let decoded = roundtrip(&value);
            assert_eq!(decoded, value);
            assert_eq!(decoded.type_name(), value.type_name());
        }
        match roundtrip(&Value::Float(f64::NAN)) {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("NaN decoded as {}", other),
        }
    }

    #[test]
    fn wire_format() {
        let registry = Registry::new();
        let value = Value::list(vec![Value::int(1), Value::None, Value::Float(1.0)]);
        let bytes = value_to_vec(&value, &registry, SerOptions::new()).unwrap();
        assert_eq!(bytes, vec![
            PROTO, FORMAT_VERSION,
            LIST, 0, 0, 0, 0,                       // id 0
            1, 0, 0, 0,                             // one field
            5, 0, 0, 0, b'i', b't', b'e', b'm', b's',
            3, 0, 0, 0,                             // three items
            LONG, 1, 0, 0, 0, 1,
            NONE,
            BINFLOAT, 0x3f, 0xf0, 0, 0, 0, 0, 0, 0,
            STOP,
        ]);
    }

    #[test]
    fn containers() {
        let value = Value::list(vec![
            Value::tuple(vec![Value::int(1), Value::str("two")]),
            Value::dict(vec![
                (Value::str("b"), Value::int(2)),
                (Value::str("a"), Value::int(1)),
                (Value::tuple(vec![Value::int(1), Value::int(2)]), Value::list(vec![])),
                (Value::frozenset(vec![Value::int(0)]).unwrap(), Value::None),
            ]).unwrap(),
            Value::set(vec![Value::int(3), Value::str("x"), Value::bytes(b"y")]).unwrap(),
            Value::frozenset(vec![Value::int(42), Value::int(0)]).unwrap(),
        ]);
        let decoded = roundtrip(&value);
        assert_eq!(decoded, value);
        // insertion order of dicts survives
        assert_eq!(decoded.repr(), value.repr());
    }

    #[test]
    fn empty_containers() {
        for (value, repr) in vec![
            (Value::list(vec![]), "[]"),
            (Value::tuple(vec![]), "()"),
            (Value::dict(vec![]).unwrap(), "{}"),
            (Value::set(vec![]).unwrap(), "set()"),
            (Value::frozenset(vec![]).unwrap(), "frozenset()"),
            (Value::bytearray(b""), "bytearray(b'')"),
            (Value::str(""), "''"),
        ] {
            let decoded = roundtrip(&value);
            assert_eq!(decoded.repr(), repr);
            assert_eq!(decoded.length().unwrap(), 0);
        }
    }

    #[test]
    fn shared_identity() {
        let shared = Value::list(vec![Value::int(1)]);
        let text = Value::str("text");
        let root = Value::tuple(vec![shared.clone(), shared.clone(), text.clone(), text,
                                     Value::list(vec![Value::int(1)])]);
        let decoded = items(&roundtrip(&root));
        assert!(decoded[0].is(&decoded[1]));
        assert!(decoded[2].is(&decoded[3]));
        assert!(!decoded[0].is(&decoded[4]));
        assert!(!decoded[0].is(&shared));

        // mutation through one reference shows through the other
        push(&decoded[0], Value::int(2));
        assert_eq!(decoded[1].length().unwrap(), 2);
        assert_eq!(decoded[4].length().unwrap(), 1);
    }

    #[test]
    fn shared_objects_are_written_once() {
        let registry = Registry::new();
        let s = Value::str("a fairly long string value");
        let shared = value_to_vec(&Value::list(vec![s.clone(), s.clone()]),
                                  &registry, SerOptions::new()).unwrap();
        let distinct = value_to_vec(&Value::list(vec![s, Value::str("a fairly long string value")]),
                                    &registry, SerOptions::new()).unwrap();
        assert!(shared.len() < distinct.len());
    }

    #[test]
    fn self_reference() {
        let list = Value::list(vec![Value::int(1)]);
        push(&list, list.clone());
        let decoded = roundtrip(&list);
        assert!(items(&decoded)[1].is(&decoded));
        assert_eq!(decoded.repr(), "[1, [...]]");

        let dict = Value::dict(vec![]).unwrap();
        dict.set_item(Value::str("self"), dict.clone()).unwrap();
        let decoded = roundtrip(&dict);
        assert!(decoded.get_item(&Value::str("self")).unwrap().is(&decoded));
        assert_eq!(decoded.repr(), "{'self': {...}}");

        // a tuple reaching itself through a list
        let inner = Value::list(vec![]);
        let tuple = Value::tuple(vec![inner.clone(), Value::int(5)]);
        push(&inner, tuple.clone());
        let decoded = roundtrip(&tuple);
        assert!(items(&items(&decoded)[0])[0].is(&decoded));
        assert_eq!(decoded.repr(), "([(...)], 5)");
    }

    #[test]
    fn composite_cycles() {
        let registry = Registry::new();
        let class = Class::new("Node", vec![registry.object_class()], Dict::new());
        let a = Value::Class(class.clone()).call(&[]).unwrap();
        let b = Value::Class(class.clone()).call(&[]).unwrap();
        a.set_attr("peer", b.clone()).unwrap();
        b.set_attr("peer", a.clone()).unwrap();
        a.set_attr("me", a.clone()).unwrap();
        class.set_attr("default", a.clone()).unwrap();

        let decoded = items(&roundtrip_with(&Value::list(vec![a, b]), &registry));
        let (a2, b2) = (&decoded[0], &decoded[1]);
        assert!(a2.get_attr("peer").unwrap().is(b2));
        assert!(b2.get_attr("peer").unwrap().is(a2));
        assert!(a2.get_attr("me").unwrap().is(a2));
        let class2 = a2.get_attr("__class__").unwrap();
        assert!(b2.get_attr("__class__").unwrap().is(&class2));
        assert!(class2.get_attr("default").unwrap().is(a2));
        assert!(!class2.is(&Value::Class(class)));
        assert_eq!(class2.get_attr("__name__").unwrap(), Value::str("Node"));
        assert_eq!(a2.repr(), "<Node object>");
    }

    fn mro_names(class: &Value) -> Vec<String> {
        items(&class.get_attr("__mro__").unwrap()).iter()
            .map(|c| c.get_attr("__name__").unwrap().to_string())
            .collect()
    }

    #[test]
    fn classes_keep_bases_and_mro() {
        let registry = Registry::new();
        let object = registry.object_class();
        let a = Class::new("A", vec![object.clone()], Dict::new());
        let b = Class::new("B", vec![a.clone()], Dict::new());
        let c = Class::new("C", vec![a.clone()], Dict::new());
        let d = Class::new("D", vec![b, c], Dict::new());
        let decoded = roundtrip_with(&Value::Class(d), &registry);
        assert_eq!(mro_names(&decoded), vec!["'D'", "'B'", "'C'", "'A'", "'object'"]);
        let bases = items(&decoded.get_attr("__bases__").unwrap());
        assert_eq!(bases.len(), 2);
        assert_eq!(bases[0].get_attr("__name__").unwrap(), Value::str("B"));
        // built-in classes are resolved by name, not rebuilt
        let mro = items(&decoded.get_attr("__mro__").unwrap());
        assert!(mro[4].is(&Value::Class(object)));
    }

    #[test]
    fn inconsistent_mro_is_rejected() {
        let registry = Registry::new();
        let object = registry.object_class();
        let a = Class::new("A", vec![object.clone()], Dict::new());
        let b = Class::new("B", vec![object], Dict::new());
        let x = Class::new("X", vec![a.clone(), b.clone()], Dict::new());
        let y = Class::new("Y", vec![b, a], Dict::new());
        let z = Class::new("Z", vec![x, y], Dict::new());
        let bytes = value_to_vec(&Value::Class(z), &registry, SerOptions::new()).unwrap();
        assert_eq!(code_of(value_from_slice(&bytes, &registry, DeOptions::new())),
                   ErrorCode::InconsistentMro("Z".into()));
    }

    #[test]
    fn builtin_subclass_payload() {
        let registry = Registry::new();
        let dict_class = registry.builtin_class(crate::BuiltinType::Dict);
        let list_class = registry.builtin_class(crate::BuiltinType::List);
        let my_dict = Class::new("MyDict", vec![dict_class], Dict::new());
        let my_list = Class::new("MyList", vec![list_class], Dict::new());

        let d = Value::Class(my_dict).call(&[]).unwrap();
        d.set_item(Value::str("key"), Value::int(1)).unwrap();
        d.set_attr("extra", Value::Bool(true)).unwrap();
        let l = Value::Class(my_list).call(&[]).unwrap();
        l.get_attr("extend").unwrap().call(&[Value::list(vec![Value::int(7), l.clone()])]).unwrap();

        let decoded = items(&roundtrip_with(&Value::tuple(vec![d, l]), &registry));
        let (d2, l2) = (&decoded[0], &decoded[1]);
        assert_eq!(d2.get_item(&Value::str("key")).unwrap(), Value::int(1));
        assert_eq!(d2.get_attr("extra").unwrap(), Value::Bool(true));
        assert_eq!(l2.length().unwrap(), 2);
        assert_eq!(l2.get_item(&Value::int(0)).unwrap(), Value::int(7));
        assert!(l2.get_item(&Value::int(1)).unwrap().is(l2));
    }

    #[test]
    fn slots_are_enforced_before_and_after() {
        let registry = Registry::new();
        let point = Class::with_slots("Point", vec![registry.object_class()], Dict::new(),
                                      &["x", "y"]);
        let p = Value::Class(point.clone()).call(&[]).unwrap();
        p.set_attr("x", Value::int(3)).unwrap();
        assert_eq!(code_of(p.set_attr("z", Value::int(0))),
                   ErrorCode::SlotViolation("Point".into(), "z".into()));

        let decoded = roundtrip_with(&p, &registry);
        match decoded {
            Value::Instance(ref i) => assert!(i.is_slotted() && i.dict().is_none()),
            ref other => panic!("not an instance: {}", other),
        }
        assert_eq!(decoded.get_attr("x").unwrap(), Value::int(3));
        assert_eq!(code_of(decoded.get_attr("y")),
                   ErrorCode::AttributeNotFound("Point".into(), "y".into()));
        assert_eq!(code_of(decoded.set_attr("z", Value::int(0))),
                   ErrorCode::SlotViolation("Point".into(), "z".into()));
        decoded.set_attr("y", Value::int(4)).unwrap();
        decoded.del_attr("x").unwrap();
        assert!(decoded.get_attr("x").is_err());

        // a subclass with slots extends the layout; one without gets a dict
        let point3 = Class::with_slots("Point3", vec![point.clone()], Dict::new(), &["z"]);
        let loose = Class::new("Loose", vec![point], Dict::new());
        let p3 = Value::Class(point3).call(&[]).unwrap();
        p3.set_attr("z", Value::int(5)).unwrap();
        let lp = Value::Class(loose).call(&[]).unwrap();
        lp.set_attr("anything", Value::int(6)).unwrap();
        let decoded = items(&roundtrip_with(&Value::tuple(vec![p3, lp]), &registry));
        assert_eq!(decoded[0].get_attr("z").unwrap(), Value::int(5));
        assert_eq!(code_of(decoded[0].set_attr("w", Value::None)),
                   ErrorCode::SlotViolation("Point3".into(), "w".into()));
        assert_eq!(decoded[1].get_attr("anything").unwrap(), Value::int(6));
    }

    #[test]
    fn slot_violation_on_decode() {
        let bytes = Stream::new()
            .header(INSTANCE, 0, &[("__class__", 1), ("z", 1)])
            .header(CLASS, 1, &[("__name__", 1), ("__bases__", 0), ("__slots__", 1),
                                ("__dict__", 1)])
            .str(2, "Point")
            .str(3, "x")
            .header(DICT, 4, &[("items", 0)])
            .byte(NONE)
            .stop();
        assert_eq!(decode_err(&bytes), ErrorCode::SlotViolation("Point".into(), "z".into()));
    }

    #[test]
    fn closure_cells_stay_shared() {
        use crate::Op::*;
        let cell = Rc::new(Cell::new(Some(Value::int(0))));
        let increment = crate::Code::new("increment", &[], vec![Value::int(1)],
                                         vec![LoadCell(0), Const(0), Add, Dup, StoreCell(0),
                                              Return]);
        let get = crate::Code::new("get", &[], vec![], vec![LoadCell(0), Return]);
        let root = Value::tuple(vec![
            Value::Function(crate::Function::new(increment, vec![], vec![cell.clone()])),
            Value::Function(crate::Function::new(get, vec![], vec![cell.clone()])),
            Value::cell(None),
        ]);

        let decoded = items(&roundtrip(&root));
        assert_eq!(decoded[0].call(&[]).unwrap(), Value::int(1));
        assert_eq!(decoded[0].call(&[]).unwrap(), Value::int(2));
        assert_eq!(decoded[1].call(&[]).unwrap(), Value::int(2));
        // the original cell is untouched
        assert_eq!(cell.get(), Some(Value::int(0)));
        // empty cells stay empty
        assert_eq!(code_of(decoded[2].get_attr("cell_contents")), ErrorCode::EmptyCell);
    }

    #[test]
    fn functions_keep_code_and_defaults() {
        use crate::Op::*;
        use crate::{Code, Function};
        let code = Code::new("add", &["a", "b"], vec![], vec![Arg(0), Arg(1), Add, Return]);
        let add = Value::Function(Function::new(code.clone(), vec![], vec![]));
        let add_ten = Value::Function(Function::new(code.clone(), vec![Value::int(10)], vec![]));

        let decoded = items(&roundtrip(&Value::tuple(vec![add, add_ten])));
        assert_eq!(decoded[0].call(&[Value::int(2), Value::int(3)]).unwrap(), Value::int(5));
        assert_eq!(decoded[1].call(&[Value::int(5)]).unwrap(), Value::int(15));
        assert_eq!(decoded[0].get_attr("__code__").unwrap(), Value::Code(code));
        // the shared code object stays shared
        assert!(decoded[0].get_attr("__code__").unwrap()
                .is(&decoded[1].get_attr("__code__").unwrap()));
        assert!(matches!(code_of(decoded[0].call(&[Value::int(1)])),
                         ErrorCode::ArgumentMismatch(_)));
    }

    #[test]
    fn methods_behave_after_decode() {
        use crate::Op::*;
        use crate::{MethodWrapper, Property};
        let registry = Registry::new();
        let shape = Class::new("Shape", vec![registry.object_class()], Dict::new());
        shape.set_attr("__init__", super::function(
            "__init__", &["self", "w", "h"], vec![Value::str("w"), Value::str("h")],
            vec![Arg(0), Arg(1), SetAttr(0), Arg(0), Arg(2), SetAttr(1)])).unwrap();
        shape.set_attr("kind", Value::ClassMethod(MethodWrapper::new(super::function(
            "kind", &["cls"], vec![Value::str("__name__")],
            vec![Arg(0), GetAttr(0), Return])))).unwrap();
        shape.set_attr("double", Value::StaticMethod(MethodWrapper::new(super::function(
            "double", &["x"], vec![Value::int(2)],
            vec![Arg(0), Const(0), Mul, Return])))).unwrap();
        let area = super::function("area", &["self"], vec![Value::str("w"), Value::str("h")],
                                   vec![Arg(0), GetAttr(0), Arg(0), GetAttr(1), Mul, Return]);
        shape.set_attr("area", Value::Property(Property::new(Some(area), None, None))).unwrap();
        let square = Class::new("Square", vec![shape], Dict::new());
        let sq = Value::Class(square.clone()).call(&[Value::int(3), Value::int(4)]).unwrap();

        let decoded = items(&roundtrip_with(&Value::tuple(vec![sq, Value::Class(square)]),
                                            &registry));
        let (sq2, square2) = (&decoded[0], &decoded[1]);
        assert_eq!(sq2.get_attr("area").unwrap(), Value::int(12));
        assert_eq!(code_of(sq2.set_attr("area", Value::int(1))),
                   ErrorCode::ReadOnlyAttribute("area".into()));
        assert_eq!(square2.get_attr("kind").unwrap().call(&[]).unwrap(), Value::str("Square"));
        assert_eq!(sq2.get_attr("kind").unwrap().call(&[]).unwrap(), Value::str("Square"));
        assert_eq!(sq2.get_attr("double").unwrap().call(&[Value::int(21)]).unwrap(),
                   Value::int(42));
        assert_eq!(square2.get_attr("double").unwrap().call(&[Value::str("ab")]).unwrap(),
                   Value::str("abab"));
        // the decoded class still constructs working instances
        let fresh = square2.call(&[Value::int(2), Value::int(5)]).unwrap();
        assert_eq!(fresh.get_attr("area").unwrap(), Value::int(10));
        assert!(fresh.get_attr("__class__").unwrap().is(square2));
    }

    #[test]
    fn super_in_diamond() {
        use crate::Op::*;
        use crate::{Code, Function};
        let registry = Registry::new();
        let a = Class::new("A", vec![registry.object_class()], Dict::new());
        let b = Class::new("B", vec![a.clone()], Dict::new());
        let c = Class::new("C", vec![a.clone()], Dict::new());
        let d = Class::new("D", vec![b.clone(), c.clone()], Dict::new());
        a.set_attr("who", super::function("who", &["self"], vec![Value::str("A")],
                                          vec![Const(0), Return])).unwrap();
        // like a method calling super(), the class is held in a closure cell
        for (class, letter) in &[(&b, "B"), (&c, "C"), (&d, "D")] {
            let cell = Rc::new(Cell::new(Some(Value::Class((*class).clone()))));
            let code = Code::new("who", &["self"], vec![Value::str(letter), Value::str("who")],
                                 vec![Const(0), LoadCell(0), Arg(0), Super, GetAttr(1),
                                      Call(0), Add, Return]);
            class.set_attr("who", Value::Function(Function::new(code, vec![], vec![cell])))
                 .unwrap();
        }
        let obj = Value::Class(d.clone()).call(&[]).unwrap();
        assert_eq!(obj.get_attr("who").unwrap().call(&[]).unwrap(), Value::str("DBCA"));

        let supers = Value::list(vec![
            Value::Super(crate::Super::new(d, obj.clone())),
            Value::Super(crate::Super::new(b, obj.clone())),
            Value::Super(crate::Super::new(c, obj.clone())),
            Value::Super(crate::Super::new(a, obj.clone())),
        ]);
        let decoded = items(&roundtrip_with(&Value::tuple(vec![obj, supers]), &registry));
        let obj2 = &decoded[0];
        assert_eq!(obj2.get_attr("who").unwrap().call(&[]).unwrap(), Value::str("DBCA"));
        let supers2 = items(&decoded[1]);
        let who = |s: &Value| s.get_attr("who").and_then(|m| m.call(&[]));
        assert_eq!(who(&supers2[0]).unwrap(), Value::str("BCA"));
        assert_eq!(who(&supers2[1]).unwrap(), Value::str("CA"));
        assert_eq!(who(&supers2[2]).unwrap(), Value::str("A"));
        assert_eq!(code_of(who(&supers2[3])),
                   ErrorCode::AttributeNotFound("super".into(), "who".into()));
        for s in &supers2 {
            match *s {
                Value::Super(ref s) => assert!(s.receiver().is(obj2)),
                ref other => panic!("not a super object: {}", other),
            }
        }
    }

    #[test]
    fn iterators_resume_at_cursor() {
        let registry = Registry::new();
        let list = Value::list(vec![Value::int(1), Value::int(2), Value::int(3)]);
        let it = list.iter().unwrap();
        assert_eq!(it.next_item().unwrap(), Some(Value::int(1)));
        let enumerate = registry.lookup("builtins.enumerate").unwrap()
            .call(&[Value::str("abc"), Value::int(5)]).unwrap();
        assert_eq!(enumerate.next_item().unwrap(),
                   Some(Value::tuple(vec![Value::int(5), Value::str("a")])));
        let range_it = Value::range(0, 10, 2).unwrap().iter().unwrap();
        assert_eq!(range_it.next_item().unwrap(), Some(Value::int(0)));

        let decoded = items(&roundtrip_with(&Value::tuple(vec![it, list, enumerate, range_it]),
                                            &registry));
        assert_eq!(decoded[0].next_item().unwrap(), Some(Value::int(2)));
        match decoded[0] {
            Value::Iterator(ref i) => assert!(i.source().is(&decoded[1])),
            ref other => panic!("not an iterator: {}", other),
        }
        assert_eq!(decoded[2].next_item().unwrap(),
                   Some(Value::tuple(vec![Value::int(6), Value::str("b")])));
        assert_eq!(decoded[3].next_item().unwrap(), Some(Value::int(2)));
        assert_eq!(decoded[0].next_item().unwrap(), Some(Value::int(3)));
        assert_eq!(decoded[0].next_item().unwrap(), None);
    }

    #[test]
    fn ranges_and_slices() {
        let range = Value::range(0, 10, 3).unwrap();
        let bound = Value::list(vec![]);
        let slice = Value::slice(Value::int(1), Value::None, Value::int(2));
        let odd = Value::slice(bound.clone(), bound, Value::None);
        let decoded = items(&roundtrip(&Value::tuple(vec![range, slice, odd])));
        assert_eq!(decoded[0].length().unwrap(), 4);
        assert_eq!(decoded[0].get_item(&Value::int(-1)).unwrap(), Value::int(9));
        assert_eq!(decoded[0].repr(), "range(0, 10, 3)");
        let seq = Value::list((0..6).map(Value::int).collect());
        assert_eq!(seq.get_item(&decoded[1]).unwrap(),
                   Value::list(vec![Value::int(1), Value::int(3), Value::int(5)]));
        match decoded[2] {
            Value::Slice(ref s) => assert!(s.start().is(&s.stop())),
            ref other => panic!("not a slice: {}", other),
        }
    }

    #[test]
    fn registry_references() {
        let registry = Registry::new();
        let stdout = registry.lookup("sys.stdout").unwrap();
        let len = registry.lookup("builtins.len").unwrap();
        let dict_class = Value::Class(registry.builtin_class(crate::BuiltinType::Dict));
        let root = Value::tuple(vec![stdout.clone(), len.clone(), dict_class.clone()]);

        let decoded = items(&roundtrip_with(&root, &registry));
        assert!(decoded[0].is(&stdout));
        assert!(decoded[1].is(&len));
        assert!(decoded[2].is(&dict_class));

        // another registry substitutes its own objects of the same name
        let other = Registry::new();
        let bytes = value_to_vec(&root, &registry, SerOptions::new()).unwrap();
        let decoded = items(&value_from_slice(&bytes, &other, DeOptions::new()).unwrap());
        assert!(decoded[0].is(&other.lookup("sys.stdout").unwrap()));
        assert!(!decoded[0].is(&stdout));
        assert_eq!(decoded[1].call(&[Value::str("four")]).unwrap(), Value::int(4));
    }

    #[test]
    fn unresolved_reference() {
        let mut registry = Registry::new();
        let handle = registry.register_opaque("app.database").unwrap();
        let bytes = value_to_vec(&Value::list(vec![handle]), &registry, SerOptions::new())
            .unwrap();
        assert_eq!(decode_err(&bytes), ErrorCode::UnresolvedReference("app.database".into()));
    }

    #[test]
    fn unsupported_types() {
        fn nothing(_: &[Value]) -> Result<Value> {
            Ok(Value::None)
        }
        let registry = Registry::new();
        let unsupported = vec![
            Value::Opaque(Opaque::new("sys.stdout")),
            Value::Native(Native::new("nothing", nothing)),
            Value::Foreign(Foreign::new("socket", 42_u32)),
        ];
        for value in unsupported {
            let name = value.type_name();
            let root = Value::list(vec![Value::int(1), value]);
            assert_eq!(code_of(value_to_vec(&root, &registry, SerOptions::new())),
                       ErrorCode::UnsupportedType(name));
        }
    }

    struct Meters(f64);

    struct MetersCodec;

    impl ForeignCodec for MetersCodec {
        fn type_name(&self) -> &str {
            "units.Meters"
        }

        fn reduce(&self, object: &Foreign) -> Result<Value> {
            match object.downcast_ref::<Meters>() {
                Some(m) => Ok(Value::Float(m.0)),
                None => Err(ErrorCode::TypeMismatch("not a length".into()).into()),
            }
        }

        fn rebuild(&self, state: Value) -> Result<Rc<Foreign>> {
            match state {
                Value::Float(f) => Ok(Foreign::new("units.Meters", Meters(f))),
                other => Err(ErrorCode::TypeMismatch(other.type_name()).into()),
            }
        }
    }

    #[test]
    fn foreign_codec() {
        let mut registry = Registry::new();
        registry.register_foreign(Box::new(MetersCodec)).unwrap();
        assert_eq!(code_of(registry.register_foreign(Box::new(MetersCodec))),
                   ErrorCode::DuplicateRegistration("units.Meters".into()));
        let length = Value::Foreign(Foreign::new("units.Meters", Meters(2.5)));
        let decoded = items(&roundtrip_with(&Value::list(vec![length.clone(), length]),
                                            &registry));
        assert!(decoded[0].is(&decoded[1]));
        match decoded[0] {
            Value::Foreign(ref f) => {
                assert_eq!(f.type_name(), "units.Meters");
                assert_eq!(f.downcast_ref::<Meters>().map(|m| m.0), Some(2.5));
            }
            ref other => panic!("not a foreign object: {}", other),
        }

        // the decoding side needs the codec as well
        let bytes = value_to_vec(&Value::Foreign(Foreign::new("units.Meters", Meters(1.0))),
                                 &registry, SerOptions::new()).unwrap();
        assert_eq!(decode_err(&bytes), ErrorCode::UnresolvedReference("units.Meters".into()));
    }

    #[test]
    fn truncated_streams_are_corrupt() {
        let registry = Registry::new();
        let bytes = value_to_vec(&sample_graph(&registry), &registry, SerOptions::new()).unwrap();
        for n in 0..bytes.len() {
            match code_of(value_from_slice(&bytes[..n], &registry, DeOptions::new())) {
                ErrorCode::CorruptStream(_) => {}
                other => panic!("prefix of {} bytes: {:?}", n, other),
            }
        }
        value_from_slice(&bytes, &registry, DeOptions::new()).unwrap();
    }

    #[test]
    fn unknown_kind_tag() {
        assert_eq!(decode_err(&Stream::new().byte(0xfe).stop()), ErrorCode::UnknownKindTag(0xfe));
        let nested = Stream::new().header(LIST, 0, &[("items", 1)]).byte(0xfe).stop();
        assert_eq!(decode_err(&nested), ErrorCode::UnknownKindTag(0xfe));
    }

    #[test]
    fn version_marker() {
        assert_eq!(decode_err(&[PROTO, 2, NONE, STOP]), ErrorCode::VersionMismatch(2));
        assert!(matches!(decode_err(&[NONE, STOP]), ErrorCode::CorruptStream(_)));
        assert!(matches!(decode_err(&[PROTO, FORMAT_VERSION, PROTO, FORMAT_VERSION, NONE, STOP]),
                         ErrorCode::CorruptStream(_)));
        assert!(matches!(decode_err(&[PROTO, FORMAT_VERSION, STOP]),
                         ErrorCode::CorruptStream(_)));
    }

    #[test]
    fn forged_backrefs() {
        assert_eq!(decode_err(&Stream::new().byte(BACKREF).u32(7).stop()),
                   ErrorCode::MissingBackref(7));

        // a code object is only built after its children, so it cannot be
        // referenced from within itself
        let bytes = Stream::new()
            .header(CODE, 0, &[("co_name", 1), ("co_varnames", 0), ("co_consts", 1),
                               ("co_code", 1)])
            .str(1, "f")
            .byte(BACKREF).u32(0)
            .byte(BINBYTES).u32(2).u32(0)
            .stop();
        assert_eq!(decode_err(&bytes), ErrorCode::MissingBackref(0));

        let out_of_sequence = Stream::new().header(LIST, 3, &[("items", 0)]).stop();
        assert!(matches!(decode_err(&out_of_sequence), ErrorCode::CorruptStream(_)));
    }

    #[test]
    fn trailing_bytes() {
        let registry = Registry::new();
        let mut bytes = value_to_vec(&Value::int(1), &registry, SerOptions::new()).unwrap();
        bytes.push(0);
        assert_eq!(decode_err(&bytes), ErrorCode::TrailingBytes);
        let value = value_from_slice(&bytes, &registry, DeOptions::new().allow_trailing_bytes())
            .unwrap();
        assert_eq!(value, Value::int(1));
    }

    #[test]
    fn field_tables_are_validated() {
        let unknown = Stream::new().header(LIST, 0, &[("bogus", 0)]).stop();
        assert_eq!(decode_err(&unknown), ErrorCode::UnknownField("bogus".into()));

        let odd_pairs = Stream::new().header(DICT, 0, &[("items", 1)]).byte(NONE).stop();
        assert_eq!(decode_err(&odd_pairs), ErrorCode::UnknownField("items".into()));

        let out_of_order = Stream::new()
            .header(INSTANCE, 0, &[("__dict__", 1), ("__class__", 1)])
            .stop();
        assert!(matches!(decode_err(&out_of_order), ErrorCode::CorruptStream(_)));

        let missing = Stream::new()
            .header(FUNCTION, 0, &[("__name__", 1), ("__defaults__", 0), ("__closure__", 0)])
            .stop();
        assert!(matches!(decode_err(&missing), ErrorCode::CorruptStream(_)));

        let duplicate_slot = Stream::new()
            .header(INSTANCE, 0, &[("__class__", 1), ("x", 1), ("x", 1)])
            .stop();
        assert_eq!(decode_err(&duplicate_slot), ErrorCode::UnknownField("x".into()));

        let unhashable_key = Stream::new()
            .header(DICT, 0, &[("items", 2)])
            .header(LIST, 1, &[("items", 0)])
            .byte(NONE)
            .stop();
        assert_eq!(decode_err(&unhashable_key), ErrorCode::ValueNotHashable("list".into()));
    }

    #[test]
    fn self_containing_tuple() {
        let bytes = Stream::new().header(TUPLE, 0, &[("items", 1)]).byte(BACKREF).u32(0).stop();
        let tuple = value_from_slice(&bytes, &Registry::new(), DeOptions::new()).unwrap();
        assert!(items(&tuple)[0].is(&tuple));
        assert_eq!(tuple.repr(), "((...),)");
        assert_eq!(code_of(tuple.hash_key()), ErrorCode::ValueNotHashable("tuple".into()));
    }

    #[test]
    fn readers_and_options() {
        let registry = Registry::new();
        let graph = sample_graph(&registry);
        let plain = value_to_vec(&graph, &registry, SerOptions::new()).unwrap();
        let traced = value_to_vec(&graph, &registry, SerOptions::new().trace()).unwrap();
        assert_eq!(plain, traced);

        let mut written = Vec::new();
        value_to_writer(&mut written, &graph, &registry, SerOptions::new()).unwrap();
        assert_eq!(written, plain);
        assert_eq!(&written[..2], &[PROTO, FORMAT_VERSION]);
        assert_eq!(written.last(), Some(&STOP));

        let from_reader = value_from_reader(Cursor::new(&plain), &registry,
                                            DeOptions::new().trace()).unwrap();
        let from_iter = value_from_iter(plain.iter().map(|&b| Ok(b)), &registry,
                                        DeOptions::new()).unwrap();
        assert_eq!(from_reader, graph);
        assert_eq!(from_iter, graph);
        assert_eq!(from_reader.repr(), graph.repr());
    }

    #[test]
    fn deep_nesting() {
        let mut value = Value::None;
        for i in 0..100_000 {
            value = match i % 3 {
                0 => Value::list(vec![value]),
                1 => Value::tuple(vec![value]),
                _ => Value::dict(vec![(Value::int(i), value)]).unwrap(),
            };
        }
        let registry = Registry::new();
        let bytes = value_to_vec(&value, &registry, SerOptions::new()).unwrap();
        let decoded = value_from_slice(&bytes, &registry, DeOptions::new()).unwrap();
        assert!(decoded == value);
        let repr = decoded.repr();
        assert!(repr.starts_with("[{99998: (["));
        assert!(repr.contains("{2: ([None],)}"));

        let class = Class::new("Link", vec![registry.object_class()], Dict::new());
        let mut chain = Value::None;
        for _ in 0..100_000 {
            let link = Value::Class(class.clone()).call(&[]).unwrap();
            link.set_attr("next", chain).unwrap();
            chain = link;
        }
        let mut current = roundtrip_with(&chain, &registry);
        let mut depth = 0;
        while current != Value::None {
            current = current.get_attr("next").unwrap();
            depth += 1;
        }
        assert_eq!(depth, 100_000);
    }

    #[test]
    fn shared_ladders_compare_quickly() {
        // every rung refers to the previous one twice
        let mut rung = Value::list(vec![]);
        for _ in 0..50_000 {
            rung = Value::list(vec![rung.clone(), rung]);
        }
        let copy = roundtrip(&rung);
        assert!(copy == rung);
        let looped = Value::list(vec![Value::int(1)]);
        push(&looped, looped.clone());
        let ring = Value::list(vec![looped.clone(); 2_000]);
        assert!(roundtrip(&ring) == ring);
        let unrolled = Value::list(vec![Value::int(1), Value::list(vec![Value::int(1)])]);
        assert!(looped != unrolled);
    }

    #[test]
    fn keys_refer_back_to_unfinished_tuples() {
        let registry = Registry::new();
        let class = Class::new("Holder", vec![registry.object_class()], Dict::new());
        let holder = Value::Class(class.clone()).call(&[]).unwrap();
        let pair = Value::tuple(vec![holder.clone()]);
        let frozen = Value::frozenset(vec![holder.clone()]).unwrap();
        let lookup = Value::dict(vec![
            (pair.clone(), Value::int(1)),
            (Value::tuple(vec![pair.clone()]), Value::int(2)),
        ]).unwrap();
        holder.set_attr("lookup", lookup).unwrap();
        holder.set_attr("members", Value::set(vec![pair.clone(), frozen.clone()]).unwrap()).unwrap();

        let decoded = items(&roundtrip_with(&Value::tuple(vec![pair, frozen]), &registry));
        let (pair, frozen) = (&decoded[0], &decoded[1]);
        let holder = items(pair)[0].clone();
        let lookup = holder.get_attr("lookup").unwrap();
        assert_eq!(lookup.length().unwrap(), 2);
        assert_eq!(lookup.get_item(pair).unwrap(), Value::int(1));
        assert_eq!(lookup.get_item(&Value::tuple(vec![pair.clone()])).unwrap(), Value::int(2));
        match holder.get_attr("members").unwrap() {
            Value::Set(ref s) => {
                assert!(s.borrow().contains(pair).unwrap());
                assert!(s.borrow().contains(frozen).unwrap());
            }
            other => panic!("members decoded as {}", other),
        }

        // a frozenset whose member keeps it in a set
        let member = Value::Class(class).call(&[]).unwrap();
        let ring = Value::frozenset(vec![member.clone()]).unwrap();
        member.set_attr("rings", Value::set(vec![ring.clone()]).unwrap()).unwrap();
        let ring = roundtrip_with(&ring, &registry);
        let member = match ring {
            Value::FrozenSet(ref f) => f.items().iter().next().cloned().unwrap(),
            ref other => panic!("ring decoded as {}", other),
        };
        match member.get_attr("rings").unwrap() {
            Value::Set(ref s) => assert!(s.borrow().contains(&ring).unwrap()),
            other => panic!("rings decoded as {}", other),
        }

        // a frozenset can never contain itself, not even through a tuple
        let bytes = Stream::new()
            .header(FROZENSET, 0, &[("items", 1)])
            .header(TUPLE, 1, &[("items", 1)])
            .byte(BACKREF).u32(0)
            .stop();
        assert_eq!(decode_err(&bytes), ErrorCode::ValueNotHashable("frozenset".into()));
    }

    #[test]
    fn instances_of_unfinished_classes() {
        let registry = Registry::new();
        let base = Class::with_slots("Base", vec![registry.object_class()], Dict::new(), &["a"]);
        let derived = Class::with_slots("Derived", vec![base.clone()], Dict::new(), &["b"]);
        let prototype = Value::Class(derived.clone()).call(&[]).unwrap();
        prototype.set_attr("a", Value::int(1)).unwrap();
        prototype.set_attr("b", Value::int(2)).unwrap();
        base.set_attr("prototype", prototype).unwrap();

        let decoded = roundtrip_with(&Value::Class(derived), &registry);
        let prototype = decoded.get_attr("prototype").unwrap();
        assert!(prototype.get_attr("__class__").unwrap().is(&decoded));
        assert_eq!(prototype.get_attr("a").unwrap(), Value::int(1));
        assert_eq!(prototype.get_attr("b").unwrap(), Value::int(2));
        assert!(matches!(code_of(prototype.set_attr("c", Value::None)),
                         ErrorCode::SlotViolation(..)));
    }

    #[test]
    fn self_containing_code_is_rejected() {
        let registry = Registry::new();
        let holder = Value::list(vec![]);
        let code = Value::Code(Code::new("again", &[], vec![holder.clone()], vec![]));
        push(&holder, code.clone());
        assert_eq!(code_of(value_to_vec(&code, &registry, SerOptions::new())),
                   ErrorCode::UnsupportedType("code containing itself".into()));
        // sharing a constant between code objects is fine
        let shared = Value::list(vec![Value::int(7)]);
        let first = Value::Code(Code::new("first", &[], vec![shared.clone()], vec![]));
        let second = Value::Code(Code::new("second", &[], vec![shared], vec![]));
        let decoded = items(&roundtrip(&Value::tuple(vec![first, second])));
        match (&decoded[0], &decoded[1]) {
            (Value::Code(a), Value::Code(b)) => assert!(a.consts()[0].is(&b.consts()[0])),
            other => panic!("decoded as {:?}", other),
        }
    }

    #[test]
    fn fuzzing() {
        // Tries to ensure that we don't panic when encountering strange streams.
        let registry = Registry::new();
        let mut rng = thread_rng();
        for _ in 0..2000 {
            let len = rng.gen_range(0, 64);
            let mut bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            if rng.gen() {
                bytes.splice(0..0, vec![PROTO, FORMAT_VERSION]);
            }
            let _ = value_from_slice(&bytes, &registry, DeOptions::new());
        }
        let valid = value_to_vec(&sample_graph(&registry), &registry, SerOptions::new()).unwrap();
        for _ in 0..2000 {
            let mut bytes = valid.clone();
            for _ in 0..rng.gen_range(1, 4) {
                let i = rng.gen_range(2, bytes.len());
                bytes[i] = rng.gen();
            }
            let _ = value_from_slice(&bytes, &registry, DeOptions::new());
        }
    }

    #[test]
    fn qc_roundtrip() {
        fn roundtrip(original: Sample) {
            let value = original.to_value();
            let registry = Registry::new();
            let vec = value_to_vec(&value, &registry, SerOptions::new()).unwrap();
            let back = value_from_slice(&vec, &registry, DeOptions::new()).unwrap();
            assert_eq!(value, back);
            assert_eq!(value.repr(), back.repr());
        }
        QuickCheck::new().gen(StdGen::new(thread_rng(), 10))
                         .tests(500)
                         .quickcheck(roundtrip as fn(_));
    }
}

mod object_tests {
    use num_bigint::BigInt;
    use crate::{BuiltinType, Class, Dict, ErrorCode, Kind, Placement, Registry, Value};
    use super::{code_of, items, roundtrip_with};

    #[test]
    fn numeric_keys_unify() {
        let dict = Value::dict(vec![]).unwrap();
        dict.set_item(Value::int(1), Value::str("int")).unwrap();
        dict.set_item(Value::Float(1.0), Value::str("float")).unwrap();
        dict.set_item(Value::Bool(true), Value::str("bool")).unwrap();
        dict.set_item(Value::Complex(1.0, 0.0), Value::str("complex")).unwrap();
        assert_eq!(dict.length().unwrap(), 1);
        assert_eq!(dict.repr(), "{1: 'complex'}");
        assert_eq!(Value::int(1).hash_key().unwrap(), Value::Float(1.0).hash_key().unwrap());
        assert!(Value::Float(1.5).hash_key().unwrap() != Value::int(1).hash_key().unwrap());
    }

    #[test]
    fn structural_and_identity_keys() {
        let registry = Registry::new();
        let set = Value::set(vec![
            Value::tuple(vec![Value::int(1), Value::int(2)]),
            Value::tuple(vec![Value::int(1), Value::int(2)]),
            Value::frozenset(vec![Value::str("a")]).unwrap(),
            Value::frozenset(vec![Value::str("a")]).unwrap(),
        ]).unwrap();
        assert_eq!(set.length().unwrap(), 2);

        let class = Class::new("Key", vec![registry.object_class()], Dict::new());
        let a = Value::Class(class.clone()).call(&[]).unwrap();
        let b = Value::Class(class).call(&[]).unwrap();
        let set = Value::set(vec![a.clone(), b, a]).unwrap();
        assert_eq!(set.length().unwrap(), 2);

        for value in vec![Value::list(vec![]), Value::dict(vec![]).unwrap(),
                          Value::set(vec![]).unwrap(), Value::bytearray(b"")] {
            let name = value.type_name();
            assert_eq!(code_of(Value::set(vec![value])), ErrorCode::ValueNotHashable(name));
        }
        // a tuple is only hashable if its items are
        let tuple = Value::tuple(vec![Value::list(vec![])]);
        assert_eq!(code_of(tuple.hash_key()), ErrorCode::ValueNotHashable("list".into()));
    }

    #[test]
    fn reprs() {
        assert_eq!(Value::Complex(1.0, 2.0).repr(), "(1+2j)");
        assert_eq!(Value::Complex(0.0, -1.5).repr(), "-1.5j");
        assert_eq!(Value::bytes(b"ab\x00").repr(), "b'ab\\x00'");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::tuple(vec![Value::None]).repr(), "(None,)");
        assert_eq!(Value::range(0, 5, 1).unwrap().repr(), "range(0, 5)");
        assert_eq!(Value::slice(Value::None, Value::int(3), Value::None).repr(),
                   "slice(None, 3, None)");
        assert_eq!(Value::Float(f64::NEG_INFINITY).repr(), "-inf");
    }

    #[test]
    fn slice_indices() {
        let reverse = crate::Slice::new(Value::None, Value::None, Value::int(-1));
        assert_eq!(reverse.indices(5).unwrap(), (4, -1, -1));
        assert_eq!(reverse.positions(3).unwrap(), vec![2, 1, 0]);
        let clamped = crate::Slice::new(Value::int(-100), Value::int(100), Value::None);
        assert_eq!(clamped.indices(4).unwrap(), (0, 4, 1));
        let zero = crate::Slice::new(Value::None, Value::None, Value::int(0));
        assert!(matches!(code_of(zero.indices(4)), ErrorCode::InvalidValue(_)));

        let huge = Value::Int(BigInt::from(1) << 70);
        let forward = crate::Slice::new(Value::int(3), Value::None, huge.clone());
        assert_eq!(forward.positions(5).unwrap(), vec![3]);
        let backward = crate::Slice::new(Value::None, Value::None, Value::Int(-(BigInt::from(1) << 70usize)));
        assert_eq!(backward.positions(5).unwrap(), vec![4]);
        let list = Value::list((0..5).map(Value::int).collect());
        assert_eq!(list.get_item(&Value::slice(Value::None, Value::None, huge)).unwrap(),
                   Value::list(vec![Value::int(0)]));
    }

    #[test]
    fn class_attributes() {
        let registry = Registry::new();
        let class = Class::new("Thing", vec![registry.object_class()], Dict::new());
        let value = Value::Class(class.clone());
        value.set_attr("color", Value::str("red")).unwrap();
        assert_eq!(value.get_attr("color").unwrap(), Value::str("red"));
        assert_eq!(code_of(value.set_attr("__name__", Value::str("Other"))),
                   ErrorCode::ReadOnlyAttribute("__name__".into()));
        value.del_attr("color").unwrap();
        assert!(matches!(code_of(value.get_attr("color")), ErrorCode::AttributeNotFound(..)));
        assert!(class.is_subclass(&registry.object_class()).unwrap());
        assert_eq!(code_of(Value::Class(class).call(&[Value::int(1)])),
                   ErrorCode::ArgumentMismatch("object.__init__() takes 1 to 1 arguments (2 given)"
                                               .into()));
    }

    #[test]
    fn natives_and_calls() {
        let registry = Registry::new();
        let getattr = registry.lookup("builtins.getattr").unwrap();
        let class = registry.builtin_class(BuiltinType::Int);
        assert_eq!(getattr.call(&[Value::Class(class), Value::str("missing"), Value::int(0)])
                   .unwrap(), Value::int(0));
        let repr = registry.lookup("builtins.repr").unwrap();
        assert_eq!(repr.call(&[Value::list(vec![Value::None])]).unwrap(), Value::str("[None]"));
        assert_eq!(code_of(Value::int(1).call(&[])), ErrorCode::NotCallable("int".into()));
        let list_type = Value::Class(registry.builtin_class(BuiltinType::List));
        assert_eq!(list_type.call(&[Value::str("ab")]).unwrap(),
                   Value::list(vec![Value::str("a"), Value::str("b")]));
    }

    #[test]
    fn attribute_wrappers() {
        let registry = Registry::new();
        let class = Class::new("Plain", vec![registry.object_class()], Dict::new());
        let plain = Value::Class(class).call(&[]).unwrap();
        let setter = plain.get_attr("__setattr__").unwrap();
        assert_eq!(setter.type_name(), "method");
        setter.call(&[Value::str("color"), Value::str("red")]).unwrap();
        assert_eq!(plain.get_attr("color").unwrap(), Value::str("red"));

        let deleter = Value::Class(registry.object_class()).get_attr("__delattr__").unwrap();
        assert!(deleter.is(&registry.lookup("builtins.object.__delattr__").unwrap()));
        let getter = registry.lookup("builtins.object.__getattribute__").unwrap();

        let decoded = roundtrip_with(&Value::tuple(vec![plain, setter, deleter.clone()]), &registry);
        let decoded = items(&decoded);
        let (plain, setter) = (&decoded[0], &decoded[1]);
        assert!(setter.get_attr("__self__").unwrap().is(plain));
        assert!(decoded[2].is(&deleter));
        setter.call(&[Value::str("size"), Value::int(3)]).unwrap();
        assert_eq!(getter.call(&[plain.clone(), Value::str("size")]).unwrap(), Value::int(3));
        decoded[2].call(&[plain.clone(), Value::str("color")]).unwrap();
        assert!(matches!(code_of(plain.get_attr("color")), ErrorCode::AttributeNotFound(..)));
        assert!(matches!(code_of(deleter.call(&[plain.clone()])), ErrorCode::ArgumentMismatch(_)));
    }

    #[test]
    fn memory_views() {
        let registry = Registry::new();
        let memoryview = registry.lookup("builtins.memoryview").unwrap();
        let source = Value::bytearray(b"abcdef");
        let view = memoryview.call(&[source.clone(), Value::int(1), Value::int(3)]).unwrap();
        assert_eq!(view.type_name(), "memoryview");
        assert_eq!(view.length().unwrap(), 3);
        assert_eq!(view, Value::bytes(b"bcd"));

        let decoded = items(&roundtrip_with(&Value::tuple(vec![source, view]), &registry));
        let (source, view) = (&decoded[0], &decoded[1]);
        assert!(view.get_attr("obj").unwrap().is(source));
        assert_eq!(view.get_attr("readonly").unwrap(), Value::Bool(false));
        match *source {
            Value::ByteArray(ref b) => b.borrow_mut()[1] = b'X',
            ref other => panic!("source decoded as {}", other),
        }
        assert_eq!(view.get_item(&Value::int(0)).unwrap(), Value::int(b'X'));
        assert_eq!(view.get_item(&Value::slice(Value::int(1), Value::None, Value::None)).unwrap(),
                   Value::bytes(b"cd"));
        assert_eq!(code_of(view.hash_key()), ErrorCode::ValueNotHashable("memoryview".into()));

        // views of immutable bytes hash like their contents
        let frozen = memoryview.call(&[Value::bytes(b"xyz")]).unwrap();
        assert_eq!(frozen.hash_key().unwrap(), Value::bytes(b"xyz").hash_key().unwrap());
        assert_eq!(roundtrip_with(&frozen, &registry), Value::bytes(b"xyz"));
        assert!(matches!(code_of(memoryview.call(&[Value::list(vec![])])),
                         ErrorCode::TypeMismatch(_)));
    }

    #[test]
    fn class_namespace_views() {
        let registry = Registry::new();
        let class = Value::Class(Class::new("Config", vec![registry.object_class()], Dict::new()));
        class.set_attr("debug", Value::Bool(false)).unwrap();
        let namespace = class.get_attr("__dict__").unwrap();
        assert_eq!(namespace.type_name(), "mappingproxy");
        assert_eq!(namespace.repr(), "mappingproxy({'debug': False})");
        assert_eq!(namespace.get_item(&Value::str("debug")).unwrap(), Value::Bool(false));
        assert!(matches!(code_of(namespace.set_item(Value::str("debug"), Value::None)),
                         ErrorCode::TypeMismatch(_)));
        class.set_attr("debug", Value::Bool(true)).unwrap();
        assert_eq!(namespace.get_item(&Value::str("debug")).unwrap(), Value::Bool(true));

        class.set_attr("own", namespace.clone()).unwrap();
        let decoded = items(&roundtrip_with(&Value::tuple(vec![class, namespace]), &registry));
        let (class, namespace) = (&decoded[0], &decoded[1]);
        class.set_attr("verbose", Value::int(2)).unwrap();
        assert_eq!(namespace.get_item(&Value::str("verbose")).unwrap(), Value::int(2));
        let own = class.get_attr("own").unwrap();
        assert!(own.is(namespace));
        assert!(own.get_item(&Value::str("own")).unwrap().is(namespace));
    }

    #[test]
    fn registry_kinds() {
        let mut registry = Registry::new();
        assert_eq!(code_of(registry.register_opaque("sys.stdout")),
                   ErrorCode::DuplicateRegistration("sys.stdout".into()));
        assert_eq!(registry.classify(&Value::int(1)).unwrap(), Kind::Int);
        assert_eq!(registry.classify(&Value::list(vec![])).unwrap(), Kind::List);
        let object = Value::Class(registry.object_class());
        assert_eq!(registry.classify(&object).unwrap(), Kind::Opaque);
        assert_eq!(registry.name_of(&object).as_deref(), Some("builtins.object"));
        assert_eq!(Kind::List.placement(), Placement::Eager);
        assert_eq!(Kind::Code.placement(), Placement::Deferred);
        assert_eq!(Kind::Str.placement(), Placement::Immediate);
        assert_eq!(Kind::from_tag(Kind::Dict.tag()), Some(Kind::Dict));
        assert_eq!(Kind::from_tag(Kind::None.tag()), None);
        assert!(registry.type_of(&Value::str("x")).builtin_type() == Some(BuiltinType::Str));
    }
}
