// Copyright (c) 2015-2021 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! A simple example executable that manipulates object graph streams to
//! demonstrate the library's features.

use std::env;
use std::error::Error;
use std::fs::File;
use std::io::{stdin, stdout, Read};
use std::process::exit;

use objgraph::{Class, Code, Dict, Function, Op, Registry, Value};
use serde_json as json;

/// A small graph with the things serde formats cannot express: a class
/// with a method, an instance referring to itself, and shared nodes.
fn sample(registry: &Registry) -> Result<Value, Box<dyn Error>> {
    let greet = Code::new("greet", &["self"], vec![Value::str("Hello, "), Value::str("name")],
                          vec![Op::Const(0), Op::Arg(0), Op::GetAttr(1), Op::Add, Op::Return]);
    let mut namespace = Dict::new();
    namespace.set_str("greet", Value::Function(Function::new(greet, vec![], vec![])));
    let class = Class::new("Person", vec![registry.object_class()], namespace);

    let person = Value::Class(class).call(&[])?;
    person.set_attr("name", Value::str("world"))?;
    person.set_attr("me", person.clone())?;

    let shared = Value::list(vec![Value::int(1), Value::int(2)]);
    let root = Value::list(vec![person, shared.clone(), shared]);
    if let Value::List(ref items) = root {
        items.borrow_mut().push(root.clone());
    }
    Ok(root)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = env::args().collect::<Vec<_>>();
    if args.len() < 2 {
        println!("Usage: dump (sample | decode | transcode | to_json | from_json) [filename]");
        println!("");
        println!("Input is either given file or stdin.");
        println!("sample:    encode a sample graph with cycles");
        println!("decode:    decode and display a stream");
        println!("transcode: decode and re-encode a stream");
        println!("to_json:   decode and jsonify a stream (trees only)");
        println!("from_json: encode a stream from json");
        exit(1);
    }

    let registry = Registry::new();
    if args[1] == "sample" {
        let graph = sample(&registry)?;
        objgraph::value_to_writer(&mut stdout(), &graph, &registry, Default::default())?;
        return Ok(());
    }

    let reader: Box<dyn Read> = if args.len() == 3 {
        Box::new(File::open(&args[2])?)
    } else {
        Box::new(stdin())
    };

    match &*args[1] {
        "decode" => {
            let decoded = objgraph::value_from_reader(reader, &registry, Default::default())?;
            println!("{}", decoded);
            if let Value::List(ref items) = decoded {
                if let Some(person) = items.borrow().first() {
                    if let Ok(greet) = person.get_attr("greet") {
                        println!("{}", greet.call(&[])?);
                    }
                }
            }
        },
        "transcode" => {
            let decoded = objgraph::value_from_reader(reader, &registry, Default::default())?;
            objgraph::value_to_writer(&mut stdout(), &decoded, &registry, Default::default())?;
        },
        "to_json" => {
            let decoded: json::Value = objgraph::from_reader(reader, Default::default())?;
            println!("{:#?}", decoded);
        },
        "from_json" => {
            let decoded: json::Value = json::from_reader(reader)?;
            objgraph::to_writer(&mut stdout(), &decoded, Default::default())?;
        }
        _ => {
            println!("No such subcommand.");
            exit(1);
        }
    }
    Ok(())
}
