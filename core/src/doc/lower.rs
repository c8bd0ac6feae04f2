//! file: core/src/doc/lower.rs
//! description: HLIR -> DOC lowering.
//!
//! `LoweringContext` owns the module-wide tables (strings, global and
//! function indices, the flattened node tree). Each function body goes
//! through a `FunctionBuilder` that maps HLIR value ids onto dense registers
//! and rejects operands used before they are defined.

use std::collections::HashMap;

use super::{DocBinOp, DocFunction, DocGlobal, DocNode, DocOp, DocProgram, DocValue, NO_INDEX, NodeKind, Register};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::hlir::{Attributes, BinOp, DocElement, Func, FuncId, HlirModule, Literal, Op, ValueId};

/// Lower `module` into a DOC program. The module is only read.
pub fn lower_hlir_to_doc(module: &HlirModule, config: &BridgeConfig) -> BridgeResult<DocProgram> {
    let mut ctx = LoweringContext::new(config);
    ctx.declare_globals(module)?;
    let order = ctx.declare_functions(module)?;
    let roots = ctx.flatten_elements(&module.elements);

    let mut functions = Vec::with_capacity(order.len());
    for func in order.iter() {
        functions.push(ctx.lower_function(func, &roots)?);
    }

    let entry = order
        .iter()
        .position(|f| f.name == config.document_entry)
        .map(|i| i as u32)
        .unwrap_or(NO_INDEX);

    log::debug!(
        "lowered module '{}': {} globals, {} functions, {} nodes",
        module.name,
        ctx.globals.len(),
        functions.len(),
        ctx.nodes.len()
    );

    Ok(DocProgram {
        entry,
        strings: ctx.strings.into_table(),
        globals: ctx.globals,
        functions,
        nodes: ctx.nodes,
    })
}

/// Interned strings in first-use order.
#[derive(Debug, Default)]
struct StringTable {
    entries: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringTable {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.index.get(s) {
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(s.to_string());
        self.index.insert(s.to_string(), idx);
        idx
    }

    fn into_table(self) -> Vec<String> {
        self.entries
    }
}

struct LoweringContext<'cfg> {
    config: &'cfg BridgeConfig,
    strings: StringTable,
    globals: Vec<DocGlobal>,
    global_index: HashMap<String, u32>,
    /// HLIR function id -> (DOC function index, parameter count)
    function_index: HashMap<FuncId, (u32, usize)>,
    nodes: Vec<DocNode>,
}

impl<'cfg> LoweringContext<'cfg> {
    fn new(config: &'cfg BridgeConfig) -> Self {
        LoweringContext {
            config,
            strings: StringTable::default(),
            globals: Vec::new(),
            global_index: HashMap::new(),
            function_index: HashMap::new(),
            nodes: Vec::new(),
        }
    }

    fn symbol_name(&mut self, name: &str) -> u32 {
        if self.config.strip_names {
            self.strings.intern("")
        } else {
            self.strings.intern(name)
        }
    }

    fn literal(&mut self, literal: &Literal) -> DocValue {
        match literal {
            Literal::Int(i) => DocValue::Int(*i),
            Literal::Float(f) => DocValue::Float(*f),
            Literal::Bool(b) => DocValue::Bool(*b),
            Literal::String(s) => DocValue::Str(self.strings.intern(s)),
            Literal::Color(c) => DocValue::Color(self.strings.intern(c)),
        }
    }

    fn declare_globals(&mut self, module: &HlirModule) -> BridgeResult<()> {
        for global in module.globals.iter() {
            if self.global_index.contains_key(&global.name) {
                return Err(BridgeError::transformation(format!("global '{}' is declared twice", global.name)));
            }
            if global.init.ty() != global.ty {
                return Err(BridgeError::transformation(format!(
                    "global '{}' is declared {} but initialized with {}",
                    global.name,
                    global.ty,
                    global.init.ty()
                )));
            }
            let name = self.symbol_name(&global.name);
            let value = self.literal(&global.init);
            self.global_index.insert(global.name.clone(), self.globals.len() as u32);
            self.globals.push(DocGlobal { name, value });
        }
        Ok(())
    }

    /// Register every function and return them in ascending id order, which
    /// is also their DOC index order.
    fn declare_functions<'m>(&mut self, module: &'m HlirModule) -> BridgeResult<Vec<&'m Func>> {
        let mut order: Vec<&Func> = module.functions.iter().collect();
        order.sort_by_key(|f| f.id);

        let mut names: HashMap<&str, FuncId> = HashMap::new();
        for (idx, func) in order.iter().enumerate() {
            if self.function_index.contains_key(&func.id) {
                return Err(BridgeError::transformation(format!("function id {} is declared twice", func.id.0)));
            }
            if let Some(prev) = names.insert(func.name.as_str(), func.id) {
                return Err(BridgeError::transformation(format!(
                    "function '{}' is declared twice (ids {} and {})",
                    func.name, prev.0, func.id.0
                )));
            }
            self.function_index.insert(func.id, (idx as u32, func.params.len()));
        }
        Ok(order)
    }

    /// Flatten the element list into pre-order nodes and return the node
    /// index of each top-level element.
    fn flatten_elements(&mut self, elements: &[DocElement]) -> Vec<u32> {
        elements.iter().map(|el| self.push_element(el, NO_INDEX)).collect()
    }

    fn push_node(&mut self, kind: NodeKind, parent: u32, text: Option<&str>, aux: Option<&str>, level: u32, attributes: &Attributes) -> u32 {
        let text = text.map(|t| self.strings.intern(t)).unwrap_or(NO_INDEX);
        let aux = aux.map(|a| self.strings.intern(a)).unwrap_or(NO_INDEX);
        let mut attrs = Vec::with_capacity(attributes.len());
        for (key, value) in attributes.iter() {
            let key = self.strings.intern(key);
            let value = self.literal(value);
            attrs.push((key, value));
        }
        let idx = self.nodes.len() as u32;
        self.nodes.push(DocNode { kind, parent, text, aux, level, attributes: attrs });
        idx
    }

    fn push_element(&mut self, element: &DocElement, parent: u32) -> u32 {
        match element {
            DocElement::Text { content, attributes } => {
                self.push_node(NodeKind::Text, parent, Some(content.as_str()), None, 0, attributes)
            }
            DocElement::Heading { level, content, attributes } => {
                self.push_node(NodeKind::Heading, parent, Some(content.as_str()), None, *level as u32, attributes)
            }
            DocElement::Image { src, attributes } => {
                self.push_node(NodeKind::Image, parent, Some(src.as_str()), None, 0, attributes)
            }
            DocElement::Code { language, content, attributes } => {
                self.push_node(NodeKind::Code, parent, Some(content.as_str()), Some(language.as_str()), 0, attributes)
            }
            DocElement::Link { href, content, attributes } => {
                self.push_node(NodeKind::Link, parent, Some(content.as_str()), Some(href.as_str()), 0, attributes)
            }
            DocElement::List { items, attributes } => {
                let idx = self.push_node(NodeKind::List, parent, None, None, 0, attributes);
                for item in items.iter() {
                    self.push_element(item, idx);
                }
                idx
            }
            DocElement::Table { rows, attributes } => {
                let idx = self.push_node(NodeKind::Table, parent, None, None, 0, attributes);
                for row in rows.iter() {
                    let row_idx = self.push_node(NodeKind::Row, idx, None, None, 0, &Attributes::new());
                    for cell in row.iter() {
                        self.push_element(cell, row_idx);
                    }
                }
                idx
            }
            DocElement::Section { elements, attributes } => {
                let idx = self.push_node(NodeKind::Section, parent, None, None, 0, attributes);
                for el in elements.iter() {
                    self.push_element(el, idx);
                }
                idx
            }
        }
    }

    fn lower_function(&mut self, func: &Func, roots: &[u32]) -> BridgeResult<DocFunction> {
        let name = self.symbol_name(&func.name);
        let mut fb = FunctionBuilder::new(&func.name);

        for param in func.params.iter() {
            fb.define(param.value)?;
        }

        for op in func.body.ops.iter() {
            match op {
                Op::Const { result, literal, ty } => {
                    if literal.ty() != *ty {
                        return Err(BridgeError::transformation(format!(
                            "in '{}': constant {} is declared {} but holds {}",
                            func.name,
                            result,
                            ty,
                            literal.ty()
                        )));
                    }
                    let value = self.literal(literal);
                    let dest = fb.define(*result)?;
                    fb.emit_op(DocOp::LConst { dest, value });
                }
                Op::Var { result, name } => {
                    let global = *self.global_index.get(name).ok_or_else(|| {
                        BridgeError::transformation(format!("in '{}': unknown global '{}'", func.name, name))
                    })?;
                    let dest = fb.define(*result)?;
                    fb.emit_op(DocOp::LGlobal { dest, global });
                }
                Op::Binary { result, op, lhs, rhs } => {
                    let lhs = fb.use_value(*lhs)?;
                    let rhs = fb.use_value(*rhs)?;
                    let dest = fb.define(*result)?;
                    fb.emit_op(DocOp::Bin { op: bin_op(*op), dest, lhs, rhs });
                }
                Op::Call { result, func: callee, args } => {
                    let &(index, arity) = self.function_index.get(callee).ok_or_else(|| {
                        BridgeError::transformation(format!("in '{}': call to unknown function id {}", func.name, callee.0))
                    })?;
                    if args.len() != arity {
                        return Err(BridgeError::transformation(format!(
                            "in '{}': call to function id {} passes {} arguments, expected {}",
                            func.name,
                            callee.0,
                            args.len(),
                            arity
                        )));
                    }
                    let mut regs = Vec::with_capacity(args.len());
                    for a in args.iter() {
                        regs.push(fb.use_value(*a)?);
                    }
                    let dest = match result {
                        Some(r) => Some(fb.define(*r)?),
                        None => None,
                    };
                    fb.emit_op(DocOp::Call { dest, func: index, args: regs });
                }
                Op::Return { value } => {
                    let src = match value {
                        Some(v) => Some(fb.use_value(*v)?),
                        None => None,
                    };
                    fb.emit_op(DocOp::Ret { src });
                }
                Op::EmitElement { index } => {
                    let node = *roots.get(*index).ok_or_else(|| {
                        BridgeError::transformation(format!(
                            "in '{}': element {} is out of range ({} elements)",
                            func.name,
                            index,
                            roots.len()
                        ))
                    })?;
                    fb.emit_op(DocOp::Emit { node });
                }
            }
        }

        Ok(fb.finish(name, func))
    }
}

fn bin_op(op: BinOp) -> DocBinOp {
    match op {
        BinOp::Add => DocBinOp::Add,
        BinOp::Sub => DocBinOp::Sub,
        BinOp::Mul => DocBinOp::Mul,
        BinOp::Div => DocBinOp::Div,
        BinOp::Eq => DocBinOp::Eq,
    }
}

/// Per-function register allocation: each HLIR value id gets the next free
/// register the first (and only) time it is defined.
struct FunctionBuilder<'f> {
    func_name: &'f str,
    next_reg: Register,
    regs: HashMap<ValueId, Register>,
    ops: Vec<DocOp>,
}

impl<'f> FunctionBuilder<'f> {
    fn new(func_name: &'f str) -> Self {
        FunctionBuilder {
            func_name,
            next_reg: 0,
            regs: HashMap::new(),
            ops: Vec::new(),
        }
    }

    fn define(&mut self, value: ValueId) -> BridgeResult<Register> {
        if self.regs.contains_key(&value) {
            return Err(BridgeError::transformation(format!(
                "in '{}': value {} is defined twice",
                self.func_name, value
            )));
        }
        let r = self.next_reg;
        self.next_reg += 1;
        self.regs.insert(value, r);
        Ok(r)
    }

    fn use_value(&self, value: ValueId) -> BridgeResult<Register> {
        self.regs.get(&value).copied().ok_or_else(|| {
            BridgeError::transformation(format!(
                "in '{}': value {} is used before it is defined",
                self.func_name, value
            ))
        })
    }

    fn emit_op(&mut self, op: DocOp) {
        self.ops.push(op);
    }

    fn finish(self, name: u32, func: &Func) -> DocFunction {
        DocFunction {
            name,
            param_count: func.params.len() as u32,
            return_type: func.return_type,
            reg_count: self.next_reg,
            ops: self.ops,
        }
    }
}
