//! DOC payload encoder and decoder
//!
//! The payload is what a target handle holds and what
//! `doc_module_serialize` hands back. Layout (little-endian):
//! - 4 bytes: magic b"DOCM"
//! - 4 bytes: u32 version (1)
//! - 4 bytes: u32 entry function index (`NO_INDEX` when absent)
//! - string table: u32 count, then u32 length + UTF-8 bytes per string
//! - globals: u32 count, then u32 name + value
//! - functions: u32 count, then u32 name, u32 param count, u8 return tag,
//!   u32 register count, u32 op count, ops
//! - nodes: u32 count, then u8 kind, u32 parent, u32 text, u32 aux,
//!   u32 level, u32 attribute count, (u32 key + value) per attribute
//!
//! Encoding walks every table in order, so equal programs always produce
//! equal bytes. Decoding rejects any index that points outside its table.

use std::io::{Cursor, Read};

use super::{DocBinOp, DocFunction, DocGlobal, DocNode, DocOp, DocProgram, DocValue, NO_INDEX, NodeKind};
use crate::error::{BridgeError, BridgeResult};
use crate::hlir::Type;

pub const MAGIC: &[u8; 4] = b"DOCM";
pub const VERSION: u32 = 1;

pub fn encode(program: &DocProgram) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(MAGIC);
    write_u32(&mut out, VERSION);
    write_u32(&mut out, program.entry);

    write_u32(&mut out, program.strings.len() as u32);
    for s in program.strings.iter() {
        write_string(&mut out, s);
    }

    write_u32(&mut out, program.globals.len() as u32);
    for g in program.globals.iter() {
        write_u32(&mut out, g.name);
        write_value(&mut out, &g.value);
    }

    write_u32(&mut out, program.functions.len() as u32);
    for func in program.functions.iter() {
        write_u32(&mut out, func.name);
        write_u32(&mut out, func.param_count);
        out.push(type_tag(func.return_type));
        write_u32(&mut out, func.reg_count);
        write_u32(&mut out, func.ops.len() as u32);
        for op in func.ops.iter() {
            write_op(&mut out, op);
        }
    }

    write_u32(&mut out, program.nodes.len() as u32);
    for node in program.nodes.iter() {
        out.push(node.kind as u8);
        write_u32(&mut out, node.parent);
        write_u32(&mut out, node.text);
        write_u32(&mut out, node.aux);
        write_u32(&mut out, node.level);
        write_u32(&mut out, node.attributes.len() as u32);
        for (key, value) in node.attributes.iter() {
            write_u32(&mut out, *key);
            write_value(&mut out, value);
        }
    }

    out
}

fn write_op(out: &mut Vec<u8>, op: &DocOp) {
    match op {
        DocOp::LConst { dest, value } => {
            out.push(0x01);
            write_u32(out, *dest);
            write_value(out, value);
        }
        DocOp::LGlobal { dest, global } => {
            out.push(0x02);
            write_u32(out, *dest);
            write_u32(out, *global);
        }
        DocOp::Bin { op, dest, lhs, rhs } => {
            out.push(bin_opcode(*op));
            write_u32(out, *dest);
            write_u32(out, *lhs);
            write_u32(out, *rhs);
        }
        DocOp::Call { dest, func, args } => {
            out.push(0x40);
            write_optional(out, *dest);
            write_u32(out, *func);
            write_u32(out, args.len() as u32);
            for a in args.iter() {
                write_u32(out, *a);
            }
        }
        DocOp::Ret { src } => {
            out.push(0x50);
            write_optional(out, *src);
        }
        DocOp::Emit { node } => {
            out.push(0x60);
            write_u32(out, *node);
        }
    }
}

fn bin_opcode(op: DocBinOp) -> u8 {
    match op {
        DocBinOp::Add => 0x10,
        DocBinOp::Sub => 0x11,
        DocBinOp::Mul => 0x12,
        DocBinOp::Div => 0x13,
        DocBinOp::Eq => 0x14,
    }
}

fn type_tag(ty: Option<Type>) -> u8 {
    match ty {
        None => 0,
        Some(Type::Int) => 1,
        Some(Type::Float) => 2,
        Some(Type::Bool) => 3,
        Some(Type::String) => 4,
        Some(Type::Color) => 5,
    }
}

fn write_optional(out: &mut Vec<u8>, v: Option<u32>) {
    match v {
        Some(r) => {
            out.push(1);
            write_u32(out, r);
        }
        None => {
            out.push(0);
            write_u32(out, 0);
        }
    }
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    let b = s.as_bytes();
    write_u32(out, b.len() as u32);
    out.extend_from_slice(b);
}

fn write_value(out: &mut Vec<u8>, v: &DocValue) {
    match v {
        DocValue::Int(i) => {
            out.push(0x01);
            write_u64(out, *i as u64);
        }
        DocValue::Float(f) => {
            out.push(0x02);
            out.extend_from_slice(&f.to_le_bytes());
        }
        DocValue::Bool(b) => {
            out.push(0x03);
            out.push(if *b { 1 } else { 0 });
        }
        DocValue::Str(idx) => {
            out.push(0x04);
            write_u32(out, *idx);
        }
        DocValue::Color(idx) => {
            out.push(0x05);
            write_u32(out, *idx);
        }
    }
}

/// Parse a payload back into a `DocProgram`.
pub fn decode(bytes: &[u8]) -> BridgeResult<DocProgram> {
    let mut cur = Cursor::new(bytes);

    let mut magic = [0u8; 4];
    cur.read_exact(&mut magic).map_err(|e| malformed(format!("missing header: {}", e)))?;
    if &magic != MAGIC {
        return Err(malformed(format!("bad magic {:?}", String::from_utf8_lossy(&magic))));
    }
    let version = read_u32(&mut cur)?;
    if version != VERSION {
        return Err(malformed(format!("unsupported version {}", version)));
    }
    let entry = read_u32(&mut cur)?;

    let string_count = read_u32(&mut cur)?;
    let mut strings = Vec::new();
    for _ in 0..string_count {
        strings.push(read_string(&mut cur)?);
    }

    let global_count = read_u32(&mut cur)?;
    let mut globals = Vec::new();
    for _ in 0..global_count {
        let name = read_u32(&mut cur)?;
        let value = read_value(&mut cur)?;
        globals.push(DocGlobal { name, value });
    }

    let function_count = read_u32(&mut cur)?;
    let mut functions = Vec::new();
    for _ in 0..function_count {
        let name = read_u32(&mut cur)?;
        let param_count = read_u32(&mut cur)?;
        let return_type = read_type(&mut cur)?;
        let reg_count = read_u32(&mut cur)?;
        let op_count = read_u32(&mut cur)?;
        let mut ops = Vec::new();
        for _ in 0..op_count {
            ops.push(read_op(&mut cur)?);
        }
        functions.push(DocFunction { name, param_count, return_type, reg_count, ops });
    }

    let node_count = read_u32(&mut cur)?;
    let mut nodes = Vec::new();
    for _ in 0..node_count {
        let tag = read_u8(&mut cur)?;
        let kind = NodeKind::from_u8(tag).ok_or_else(|| malformed(format!("unknown node kind 0x{:02x}", tag)))?;
        let parent = read_u32(&mut cur)?;
        let text = read_u32(&mut cur)?;
        let aux = read_u32(&mut cur)?;
        let level = read_u32(&mut cur)?;
        let attr_count = read_u32(&mut cur)?;
        let mut attributes = Vec::new();
        for _ in 0..attr_count {
            let key = read_u32(&mut cur)?;
            let value = read_value(&mut cur)?;
            attributes.push((key, value));
        }
        nodes.push(DocNode { kind, parent, text, aux, level, attributes });
    }

    if (cur.position() as usize) != bytes.len() {
        return Err(malformed(format!(
            "{} trailing bytes after node table",
            bytes.len() - cur.position() as usize
        )));
    }

    let program = DocProgram { entry, strings, globals, functions, nodes };
    check_refs(&program)?;
    Ok(program)
}

/// Every index in a decoded program must land inside its table: strings
/// (names, node text, attribute keys, string and color values), the entry
/// function, global loads, call targets, emitted nodes and node parents.
/// A parent always precedes its child.
fn check_refs(program: &DocProgram) -> BridgeResult<()> {
    let strings = program.strings.len() as u32;
    let string = |idx: u32, what: &str| -> BridgeResult<()> {
        if idx != NO_INDEX && idx >= strings {
            return Err(malformed(format!("{} refers to string {} of {}", what, idx, strings)));
        }
        Ok(())
    };
    let value = |v: &DocValue, what: &str| -> BridgeResult<()> {
        match v {
            DocValue::Str(idx) | DocValue::Color(idx) => string(*idx, what),
            _ => Ok(()),
        }
    };

    if program.entry != NO_INDEX && program.entry as usize >= program.functions.len() {
        return Err(malformed(format!(
            "entry refers to function {} of {}",
            program.entry,
            program.functions.len()
        )));
    }
    for g in program.globals.iter() {
        string(g.name, "global name")?;
        value(&g.value, "global value")?;
    }
    for f in program.functions.iter() {
        string(f.name, "function name")?;
        for op in f.ops.iter() {
            match op {
                DocOp::LConst { value: v, .. } => value(v, "constant")?,
                DocOp::LGlobal { global, .. } if *global as usize >= program.globals.len() => {
                    return Err(malformed(format!("load of global {} of {}", global, program.globals.len())));
                }
                DocOp::Call { func, .. } if *func as usize >= program.functions.len() => {
                    return Err(malformed(format!("call to function {} of {}", func, program.functions.len())));
                }
                DocOp::Emit { node } if *node as usize >= program.nodes.len() => {
                    return Err(malformed(format!("emit of node {} of {}", node, program.nodes.len())));
                }
                _ => {}
            }
        }
    }
    for (i, n) in program.nodes.iter().enumerate() {
        if n.parent != NO_INDEX && n.parent as usize >= i {
            return Err(malformed(format!("node {} has parent {} that does not precede it", i, n.parent)));
        }
        string(n.text, "node text")?;
        string(n.aux, "node aux")?;
        for (key, v) in n.attributes.iter() {
            string(*key, "attribute key")?;
            value(v, "attribute value")?;
        }
    }
    Ok(())
}

fn malformed(message: String) -> BridgeError {
    BridgeError::with_issuer(crate::error::ErrorKind::InvalidInput, message, "docbridge.codec")
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> BridgeResult<u8> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b).map_err(|e| malformed(format!("unexpected eof: {}", e)))?;
    Ok(b[0])
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> BridgeResult<u32> {
    let mut b = [0u8; 4];
    cur.read_exact(&mut b).map_err(|e| malformed(format!("unexpected eof: {}", e)))?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(cur: &mut Cursor<&[u8]>) -> BridgeResult<u64> {
    let mut b = [0u8; 8];
    cur.read_exact(&mut b).map_err(|e| malformed(format!("unexpected eof: {}", e)))?;
    Ok(u64::from_le_bytes(b))
}

fn read_string(cur: &mut Cursor<&[u8]>) -> BridgeResult<String> {
    let len = read_u32(cur)? as usize;
    let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
    if len > remaining {
        return Err(malformed(format!("string of {} bytes overruns payload", len)));
    }
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf).map_err(|e| malformed(format!("unexpected eof reading string: {}", e)))?;
    String::from_utf8(buf).map_err(|e| malformed(format!("invalid utf8: {}", e)))
}

fn read_optional(cur: &mut Cursor<&[u8]>) -> BridgeResult<Option<u32>> {
    let flag = read_u8(cur)?;
    let v = read_u32(cur)?;
    Ok(if flag != 0 { Some(v) } else { None })
}

fn read_type(cur: &mut Cursor<&[u8]>) -> BridgeResult<Option<Type>> {
    match read_u8(cur)? {
        0 => Ok(None),
        1 => Ok(Some(Type::Int)),
        2 => Ok(Some(Type::Float)),
        3 => Ok(Some(Type::Bool)),
        4 => Ok(Some(Type::String)),
        5 => Ok(Some(Type::Color)),
        other => Err(malformed(format!("unknown type tag 0x{:02x}", other))),
    }
}

fn read_value(cur: &mut Cursor<&[u8]>) -> BridgeResult<DocValue> {
    match read_u8(cur)? {
        0x01 => Ok(DocValue::Int(read_u64(cur)? as i64)),
        0x02 => Ok(DocValue::Float(f64::from_bits(read_u64(cur)?))),
        0x03 => Ok(DocValue::Bool(read_u8(cur)? != 0)),
        0x04 => Ok(DocValue::Str(read_u32(cur)?)),
        0x05 => Ok(DocValue::Color(read_u32(cur)?)),
        other => Err(malformed(format!("unknown value tag 0x{:02x}", other))),
    }
}

fn read_op(cur: &mut Cursor<&[u8]>) -> BridgeResult<DocOp> {
    let code = read_u8(cur)?;
    let op = match code {
        0x01 => {
            let dest = read_u32(cur)?;
            DocOp::LConst { dest, value: read_value(cur)? }
        }
        0x02 => {
            let dest = read_u32(cur)?;
            DocOp::LGlobal { dest, global: read_u32(cur)? }
        }
        0x10..=0x14 => {
            let op = match code {
                0x10 => DocBinOp::Add,
                0x11 => DocBinOp::Sub,
                0x12 => DocBinOp::Mul,
                0x13 => DocBinOp::Div,
                _ => DocBinOp::Eq,
            };
            let dest = read_u32(cur)?;
            let lhs = read_u32(cur)?;
            let rhs = read_u32(cur)?;
            DocOp::Bin { op, dest, lhs, rhs }
        }
        0x40 => {
            let dest = read_optional(cur)?;
            let func = read_u32(cur)?;
            let argc = read_u32(cur)?;
            let mut args = Vec::new();
            for _ in 0..argc {
                args.push(read_u32(cur)?);
            }
            DocOp::Call { dest, func, args }
        }
        0x50 => DocOp::Ret { src: read_optional(cur)? },
        0x60 => DocOp::Emit { node: read_u32(cur)? },
        other => return Err(malformed(format!("unknown opcode 0x{:02x}", other))),
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_program_has_fixed_layout() {
        let bytes = encode(&DocProgram::empty());
        let mut expected = Vec::new();
        expected.extend_from_slice(b"DOCM");
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&u32::MAX.to_le_bytes());
        expected.extend_from_slice(&[0u8; 16]);
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn decode_recovers_every_table() {
        let program = DocProgram {
            entry: 0,
            strings: vec!["main".into(), "hello".into(), "color".into(), "#fff".into()],
            globals: vec![DocGlobal { name: 1, value: DocValue::Float(1.5) }],
            functions: vec![DocFunction {
                name: 0,
                param_count: 1,
                return_type: Some(Type::Int),
                reg_count: 3,
                ops: vec![
                    DocOp::LConst { dest: 1, value: DocValue::Int(-7) },
                    DocOp::Bin { op: DocBinOp::Mul, dest: 2, lhs: 0, rhs: 1 },
                    DocOp::Call { dest: None, func: 0, args: vec![2] },
                    DocOp::Emit { node: 0 },
                    DocOp::Ret { src: Some(2) },
                ],
            }],
            nodes: vec![DocNode {
                kind: NodeKind::Text,
                parent: NO_INDEX,
                text: 1,
                aux: NO_INDEX,
                level: 0,
                attributes: vec![(2, DocValue::Color(3))],
            }],
        };
        let decoded = decode(&encode(&program)).expect("decode");
        assert_eq!(decoded, program);
    }

    #[test]
    fn rejects_truncated_and_trailing_input() {
        let bytes = encode(&DocProgram::empty());
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(decode(&longer).is_err());
        assert!(decode(b"MSBC\x01\x00\x00\x00").is_err());
    }

    #[test]
    fn rejects_dangling_string_reference() {
        let mut program = DocProgram::empty();
        program.globals.push(DocGlobal { name: 5, value: DocValue::Bool(true) });
        let err = decode(&encode(&program)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
    }

    fn one_function(ops: Vec<DocOp>) -> DocProgram {
        let mut program = DocProgram::empty();
        program.entry = 0;
        program.strings.push("main".into());
        program.functions.push(DocFunction { name: 0, param_count: 0, return_type: None, reg_count: 1, ops });
        program
    }

    fn assert_rejected(program: &DocProgram, needle: &str) {
        let err = decode(&encode(program)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidInput);
        assert!(err.to_string().contains(needle), "{}", err);
    }

    #[test]
    fn rejects_dangling_op_targets() {
        assert!(decode(&encode(&one_function(vec![DocOp::Call { dest: None, func: 0, args: vec![] }]))).is_ok());
        assert_rejected(&one_function(vec![DocOp::LGlobal { dest: 0, global: 0 }]), "load of global 0");
        assert_rejected(&one_function(vec![DocOp::Call { dest: Some(0), func: 4, args: vec![] }]), "call to function 4");
        assert_rejected(&one_function(vec![DocOp::Emit { node: 2 }]), "emit of node 2");
        assert_rejected(
            &one_function(vec![DocOp::LConst { dest: 0, value: DocValue::Str(9) }]),
            "constant refers to string 9",
        );

        let mut missing_entry = one_function(Vec::new());
        missing_entry.entry = 1;
        assert_rejected(&missing_entry, "entry refers to function 1");
    }

    #[test]
    fn rejects_dangling_node_and_value_references() {
        let node = |parent: u32, attributes: Vec<(u32, DocValue)>| DocNode {
            kind: NodeKind::Text,
            parent,
            text: NO_INDEX,
            aux: NO_INDEX,
            level: 0,
            attributes,
        };

        let mut forward_parent = DocProgram::empty();
        forward_parent.nodes = vec![node(1, Vec::new()), node(NO_INDEX, Vec::new())];
        assert_rejected(&forward_parent, "node 0 has parent 1");

        let mut self_parent = DocProgram::empty();
        self_parent.nodes = vec![node(0, Vec::new())];
        assert_rejected(&self_parent, "node 0 has parent 0");

        let mut color = DocProgram::empty();
        color.strings.push("color".into());
        color.nodes = vec![node(NO_INDEX, vec![(0, DocValue::Color(3))])];
        assert_rejected(&color, "attribute value refers to string 3");

        let mut global = DocProgram::empty();
        global.strings.push("title".into());
        global.globals.push(DocGlobal { name: 0, value: DocValue::Str(1) });
        assert_rejected(&global, "global value refers to string 1");
    }
}
