//! file: core/src/doc/mod.rs
//! description: the lowered DOC representation.
//!
//! `DocProgram` is the typed form produced by lowering and recovered by the
//! decoder. `DocModule` is what a target handle points at: the encoded
//! payload, frozen at lowering time, plus the limits captured from the
//! context that created it.

pub mod codec;
pub mod lower;

use std::fmt;

use crate::error::{BridgeError, BridgeResult};
use crate::hlir::Type;

/// Sentinel for "no parent", "no entry function" and absent string slots.
pub const NO_INDEX: u32 = u32::MAX;

pub type Register = u32;

#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Index into the string table.
    Str(u32),
    /// Index into the string table.
    Color(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
}

impl DocBinOp {
    pub fn name(self) -> &'static str {
        match self {
            DocBinOp::Add => "Add",
            DocBinOp::Sub => "Sub",
            DocBinOp::Mul => "Mul",
            DocBinOp::Div => "Div",
            DocBinOp::Eq => "Eq",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            DocBinOp::Add => "+",
            DocBinOp::Sub => "-",
            DocBinOp::Mul => "*",
            DocBinOp::Div => "/",
            DocBinOp::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocOp {
    LConst { dest: Register, value: DocValue },
    LGlobal { dest: Register, global: u32 },
    Bin { op: DocBinOp, dest: Register, lhs: Register, rhs: Register },
    Call { dest: Option<Register>, func: u32, args: Vec<Register> },
    Ret { src: Option<Register> },
    Emit { node: u32 },
}

impl fmt::Display for DocOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocOp::LConst { dest, value } => write!(f, "LConst r{} <- {:?}", dest, value),
            DocOp::LGlobal { dest, global } => write!(f, "LGlobal r{} <- global[{}]", dest, global),
            DocOp::Bin { op, dest, lhs, rhs } => {
                write!(f, "{} r{} <- r{} {} r{}", op.name(), dest, lhs, op.symbol(), rhs)
            }
            DocOp::Call { dest, func, args } => {
                match dest {
                    Some(d) => write!(f, "Call r{} <- F{}(", d, func)?,
                    None => write!(f, "Call F{}(", func)?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "r{}", arg)?;
                }
                write!(f, ")")
            }
            DocOp::Ret { src: Some(src) } => write!(f, "Ret r{}", src),
            DocOp::Ret { src: None } => write!(f, "Ret"),
            DocOp::Emit { node } => write!(f, "Emit node[{}]", node),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocGlobal {
    pub name: u32,
    pub value: DocValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocFunction {
    pub name: u32,
    pub param_count: u32,
    pub return_type: Option<Type>,
    pub reg_count: u32,
    pub ops: Vec<DocOp>,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Text = 1,
    Heading = 2,
    Image = 3,
    Code = 4,
    Link = 5,
    List = 6,
    Table = 7,
    Row = 8,
    Section = 9,
}

impl NodeKind {
    pub fn from_u8(tag: u8) -> Option<NodeKind> {
        match tag {
            1 => Some(NodeKind::Text),
            2 => Some(NodeKind::Heading),
            3 => Some(NodeKind::Image),
            4 => Some(NodeKind::Code),
            5 => Some(NodeKind::Link),
            6 => Some(NodeKind::List),
            7 => Some(NodeKind::Table),
            8 => Some(NodeKind::Row),
            9 => Some(NodeKind::Section),
            _ => None,
        }
    }
}

/// One entry of the flattened document tree. Nodes are stored in pre-order,
/// so a parent always precedes its children.
#[derive(Debug, Clone, PartialEq)]
pub struct DocNode {
    pub kind: NodeKind,
    pub parent: u32,
    /// Main text: content, image source. `NO_INDEX` for containers.
    pub text: u32,
    /// Secondary text: code language, link target.
    pub aux: u32,
    /// Heading level; zero elsewhere.
    pub level: u32,
    pub attributes: Vec<(u32, DocValue)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocProgram {
    pub entry: u32,
    pub strings: Vec<String>,
    pub globals: Vec<DocGlobal>,
    pub functions: Vec<DocFunction>,
    pub nodes: Vec<DocNode>,
}

impl DocProgram {
    pub fn empty() -> Self {
        DocProgram {
            entry: NO_INDEX,
            strings: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn string(&self, idx: u32) -> Option<&str> {
        if idx == NO_INDEX {
            return None;
        }
        self.strings.get(idx as usize).map(|s| s.as_str())
    }

    pub fn entry_function(&self) -> Option<&DocFunction> {
        if self.entry == NO_INDEX {
            return None;
        }
        self.functions.get(self.entry as usize)
    }

    /// Indices of the direct children of `node`, in document order.
    pub fn children_of(&self, node: u32) -> Vec<u32> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent == node)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DocSummary {
    pub strings: usize,
    pub globals: usize,
    pub functions: usize,
    pub nodes: usize,
}

/// In-memory target module. Immutable once built: serializing never
/// touches interior state, so shared reads from several threads are fine.
#[derive(Debug)]
pub struct DocModule {
    payload: Vec<u8>,
    summary: DocSummary,
    max_output_bytes: Option<u64>,
}

impl DocModule {
    pub fn from_program(program: &DocProgram, max_output_bytes: Option<u64>) -> Self {
        DocModule {
            payload: codec::encode(program),
            summary: DocSummary {
                strings: program.strings.len(),
                globals: program.globals.len(),
                functions: program.functions.len(),
                nodes: program.nodes.len(),
            },
            max_output_bytes,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn summary(&self) -> DocSummary {
        self.summary
    }

    /// Check the payload against the configured output limit and return the
    /// bytes a serialized buffer must contain.
    pub fn serializable_bytes(&self) -> BridgeResult<&[u8]> {
        if let Some(limit) = self.max_output_bytes {
            if self.payload.len() as u64 > limit {
                return Err(BridgeError::serialization(format!(
                    "serialized module is {} bytes, limit is {}",
                    self.payload.len(),
                    limit
                )));
            }
        }
        Ok(&self.payload)
    }

    pub fn decode(&self) -> BridgeResult<DocProgram> {
        codec::decode(&self.payload)
    }
}

impl fmt::Display for DocProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, func) in self.functions.iter().enumerate() {
            let name = self.string(func.name).unwrap_or("");
            let marker = if i as u32 == self.entry { " (entry)" } else { "" };
            writeln!(f, "F{} {}/{}{}:", i, name, func.param_count, marker)?;
            for (j, op) in func.ops.iter().enumerate() {
                writeln!(f, "  {:04}: {}", j, op)?;
            }
        }
        Ok(())
    }
}
