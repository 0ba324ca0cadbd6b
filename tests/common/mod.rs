#![allow(dead_code)]

//! A toy frontend for driving the processor in tests: "bytecode" is a small
//! JSON description of a class, parsed into tree form.

use classtree::layout;
use retcon::{ClassInfo, Frontend, MutationGate, Tree};
use serde_json::Value;

pub const ACC_PUBLIC: i64 = 0x0001;
pub const ACC_INTERFACE: i64 = 0x0200;

/// Routes engine traces into the test harness when `RUST_LOG` asks for
/// them.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt::try_init();
}

pub struct JsonFrontend;

impl Frontend for JsonFrontend {
    fn parse(&self, name: &str, bytes: &[u8], gate: &MutationGate) -> retcon::Result<Tree> {
        let value = decode(bytes)?;
        let superclass = value["super"].as_str().unwrap_or(retcon::OBJECT);
        let mut tree = Tree::new_class(name, superclass, gate.clone())?;

        if let Some(modifiers) = value["modifiers"].as_array() {
            let list = tree.class_child(layout::class::MODIFIERS);
            for modifier in modifiers {
                tree.push_int(list, modifier.as_i64().unwrap_or(0))?;
            }
        }
        if let Some(interfaces) = value["interfaces"].as_array() {
            let list = tree.class_child(layout::class::INTERFACES);
            for interface in interfaces {
                tree.push_str(list, interface.as_str().unwrap_or_default())?;
            }
        }
        if let Some(fields) = value["fields"].as_array() {
            for field in fields {
                tree.push_field(
                    field["name"].as_str().unwrap_or_default(),
                    field["descriptor"].as_str().unwrap_or_default(),
                )?;
            }
        }
        if let Some(methods) = value["methods"].as_array() {
            for method in methods {
                let id = tree.push_method(
                    method["name"].as_str().unwrap_or_default(),
                    method["descriptor"].as_str().unwrap_or("()V"),
                )?;
                if let Some(instructions) = method["instructions"].as_array() {
                    for instruction in instructions {
                        let parts = instruction.as_array().cloned().unwrap_or_default();
                        let opcode = parts.first().and_then(Value::as_i64).unwrap_or(0);
                        let operands: Vec<&str> =
                            parts[1..].iter().filter_map(Value::as_str).collect();
                        tree.push_instruction(id, opcode, &operands)?;
                    }
                }
            }
        }
        Ok(tree)
    }

    fn read_header(&self, bytes: &[u8]) -> retcon::Result<ClassInfo> {
        let value = decode(bytes)?;
        let superclass =
            Some(value["super"].as_str().unwrap_or(retcon::OBJECT).to_string());
        let is_interface = value["modifiers"]
            .as_array()
            .map(|mods| {
                mods.iter()
                    .filter_map(Value::as_i64)
                    .any(|m| m & ACC_INTERFACE != 0)
            })
            .unwrap_or(false);
        Ok(ClassInfo { superclass, is_interface })
    }
}

fn decode(bytes: &[u8]) -> retcon::Result<Value> {
    serde_json::from_slice(bytes).map_err(|e| {
        retcon::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    })
}

pub fn simple_class(superclass: &str) -> Vec<u8> {
    serde_json::json!({ "super": superclass, "modifiers": [ACC_PUBLIC] })
        .to_string()
        .into_bytes()
}

pub fn interface_class() -> Vec<u8> {
    serde_json::json!({ "super": retcon::OBJECT, "modifiers": [ACC_PUBLIC | ACC_INTERFACE] })
        .to_string()
        .into_bytes()
}

pub fn class_with_methods(superclass: &str, methods: &[(&str, &str)]) -> Vec<u8> {
    let methods: Vec<Value> = methods
        .iter()
        .map(|(name, descriptor)| {
            serde_json::json!({ "name": name, "descriptor": descriptor })
        })
        .collect();
    serde_json::json!({ "super": superclass, "modifiers": [ACC_PUBLIC], "methods": methods })
        .to_string()
        .into_bytes()
}

pub fn class_with_instructions(method: &str, opcodes: &[i64]) -> Vec<u8> {
    let instructions: Vec<Value> =
        opcodes.iter().map(|op| serde_json::json!([op])).collect();
    serde_json::json!({
        "super": retcon::OBJECT,
        "modifiers": [ACC_PUBLIC],
        "methods": [{ "name": method, "descriptor": "()V", "instructions": instructions }],
    })
    .to_string()
    .into_bytes()
}

/// Opcodes of a method's instruction list, in order.
pub fn opcodes_of(tree: &Tree, method: &str) -> Vec<i64> {
    let method = tree.method_named(method).expect("method should exist");
    let instructions = tree.children(method)[layout::method::INSTRUCTIONS];
    tree.children(instructions)
        .iter()
        .map(|instruction| {
            let opcode = tree.children(*instruction)[layout::instruction::OPCODE];
            tree.value(opcode).and_then(classtree::Scalar::as_int).expect("opcode value")
        })
        .collect()
}
