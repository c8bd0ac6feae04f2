use docbridge_core::BridgeResult;
use docbridge_core::doc::{DocOp, DocProgram, DocValue, NO_INDEX, codec};

/// Render an encoded DOC payload as text: header, string table, globals,
/// functions with their ops, and the node tree.
pub fn disassemble(bytes: &[u8]) -> BridgeResult<String> {
    let program = codec::decode(bytes)?;
    let mut out = String::new();

    out.push_str(&format!("Magic: {}\n", String::from_utf8_lossy(&bytes[..4])));
    out.push_str(&format!("Version: {}\n", codec::VERSION));
    match program.entry_function() {
        Some(f) => out.push_str(&format!("Entry: F{} {}\n", program.entry, name_of(&program, f.name))),
        None => out.push_str("Entry: none\n"),
    }
    out.push_str(&format!("Payload: {} bytes\n\n", bytes.len()));

    out.push_str(&format!("Strings ({}):\n", program.strings.len()));
    for (i, s) in program.strings.iter().enumerate() {
        out.push_str(&format!("  s{:<4} {:?}\n", i, s));
    }

    out.push_str(&format!("\nGlobals ({}):\n", program.globals.len()));
    for (i, g) in program.globals.iter().enumerate() {
        out.push_str(&format!("  G{:<4} {} = {}\n", i, name_of(&program, g.name), render_value(&program, &g.value)));
    }

    out.push_str(&format!("\nFunctions ({}):\n", program.functions.len()));
    for (i, func) in program.functions.iter().enumerate() {
        let ret = func.return_type.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  F{} {}({} params) -> {}, {} regs\n",
            i,
            name_of(&program, func.name),
            func.param_count,
            ret,
            func.reg_count
        ));
        for (j, op) in func.ops.iter().enumerate() {
            out.push_str(&format!("    {:04}  {}\n", j, render_op(&program, op)));
        }
    }

    out.push_str(&format!("\nNodes ({}):\n", program.nodes.len()));
    for (i, node) in program.nodes.iter().enumerate() {
        let depth = depth_of(&program, i as u32);
        let mut line = format!("  N{:<4}{}{:?}", i, "  ".repeat(depth), node.kind);
        if node.level > 0 {
            line.push_str(&format!(" level={}", node.level));
        }
        if let Some(text) = program.string(node.text) {
            line.push_str(&format!(" {:?}", text));
        }
        if let Some(aux) = program.string(node.aux) {
            line.push_str(&format!(" [{}]", aux));
        }
        for (key, value) in &node.attributes {
            line.push_str(&format!(" {}={}", name_of(&program, *key), render_value(&program, value)));
        }
        out.push_str(&line);
        out.push('\n');
    }

    Ok(out)
}

fn name_of(program: &DocProgram, idx: u32) -> String {
    match program.string(idx) {
        Some("") => "<stripped>".to_string(),
        Some(s) => s.to_string(),
        None => format!("s{}?", idx),
    }
}

fn render_value(program: &DocProgram, value: &DocValue) -> String {
    match value {
        DocValue::Int(i) => format!("Int({})", i),
        DocValue::Float(x) => format!("Float({})", x),
        DocValue::Bool(b) => format!("Bool({})", b),
        DocValue::Str(s) => format!("Str({:?})", program.string(*s).unwrap_or("")),
        DocValue::Color(s) => format!("Color({})", program.string(*s).unwrap_or("")),
    }
}

// Calls and global loads are shown with the callee/global name when known.
fn render_op(program: &DocProgram, op: &DocOp) -> String {
    match op {
        DocOp::LConst { dest, value } => format!("LConst r{} <- {}", dest, render_value(program, value)),
        DocOp::LGlobal { dest, global } => match program.globals.get(*global as usize) {
            Some(g) => format!("LGlobal r{} <- {}", dest, name_of(program, g.name)),
            None => op.to_string(),
        },
        DocOp::Call { dest, func, args } => match program.functions.get(*func as usize) {
            Some(f) => {
                let args: Vec<String> = args.iter().map(|a| format!("r{}", a)).collect();
                let target = format!("{}({})", name_of(program, f.name), args.join(", "));
                match dest {
                    Some(d) => format!("Call r{} <- {}", d, target),
                    None => format!("Call {}", target),
                }
            }
            None => op.to_string(),
        },
        _ => op.to_string(),
    }
}

fn depth_of(program: &DocProgram, mut node: u32) -> usize {
    let mut depth = 0;
    while let Some(n) = program.nodes.get(node as usize) {
        if n.parent == NO_INDEX || depth > program.nodes.len() {
            break;
        }
        node = n.parent;
        depth += 1;
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_core::hlir::{DocElement, HlirModule, Literal, Op, ValueId};
    use docbridge_core::{BridgeConfig, lower_to_payload};

    #[test]
    fn empty_payload_lists_no_entry() {
        let bytes = lower_to_payload(&HlirModule::new("e"), &BridgeConfig::default()).expect("lower");
        let text = disassemble(&bytes).expect("disassemble");
        assert!(text.starts_with("Magic: DOCM\nVersion: 1\nEntry: none\nPayload: 28 bytes"));
    }

    #[test]
    fn names_and_tree_are_resolved() {
        let mut module = HlirModule::new("m");
        module.add_global("greeting", Literal::String("hi".into()));
        let idx = module.add_element(DocElement::List {
            items: vec![DocElement::Text { content: "one".into(), attributes: Default::default() }],
            attributes: Default::default(),
        });
        module.add_function(
            "__document",
            Vec::new(),
            None,
            vec![Op::Var { result: ValueId(0), name: "greeting".into() }, Op::EmitElement { index: idx }],
        );
        let bytes = lower_to_payload(&module, &BridgeConfig::default()).expect("lower");
        let text = disassemble(&bytes).expect("disassemble");
        assert!(text.contains("Entry: F0 __document"));
        assert!(text.contains("greeting = Str(\"hi\")"));
        assert!(text.contains("LGlobal r0 <- greeting"));
        assert!(text.contains("    Text \"one\""));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(disassemble(b"NOPE").is_err());
    }
}
