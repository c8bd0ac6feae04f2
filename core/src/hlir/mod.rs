//! file: core/src/hlir/mod.rs
//! description: the high-level IR handed to the boundary by the host.
//!
//! The host builds an `HlirModule` and passes it by pointer; lowering only
//! ever borrows it. Modules also deserialize from JSON so hosts without a
//! Rust toolchain can produce one through `hlir_module_from_json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    Float,
    Bool,
    String,
    Color,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Int => "Int",
            Type::Float => "Float",
            Type::Bool => "Bool",
            Type::String => "String",
            Type::Color => "Color",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Color(String),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Int(_) => Type::Int,
            Literal::Float(_) => Type::Float,
            Literal::Bool(_) => Type::Bool,
            Literal::String(_) => Type::String,
            Literal::Color(_) => Type::Color,
        }
    }
}

// IDs

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Const {
        result: ValueId,
        literal: Literal,
        ty: Type,
    },
    /// Read a global by name.
    Var { result: ValueId, name: String },
    Binary {
        result: ValueId,
        #[serde(rename = "operator")]
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Call {
        #[serde(default)]
        result: Option<ValueId>,
        func: FuncId,
        #[serde(default)]
        args: Vec<ValueId>,
    },
    Return {
        #[serde(default)]
        value: Option<ValueId>,
    },
    /// Place `module.elements[index]` into the document at this point.
    EmitElement { index: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub id: GlobalId,
    pub name: String,
    pub ty: Type,
    pub init: Literal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub value: ValueId,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub ops: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Func {
    pub id: FuncId,
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub return_type: Option<Type>,
    #[serde(default)]
    pub body: Block,
}

pub type Attributes = BTreeMap<String, Literal>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum DocElement {
    Text {
        content: String,
        #[serde(default)]
        attributes: Attributes,
    },
    Heading {
        level: u8,
        content: String,
        #[serde(default)]
        attributes: Attributes,
    },
    Image {
        src: String,
        #[serde(default)]
        attributes: Attributes,
    },
    Code {
        #[serde(default)]
        language: String,
        content: String,
        #[serde(default)]
        attributes: Attributes,
    },
    Link {
        href: String,
        content: String,
        #[serde(default)]
        attributes: Attributes,
    },
    List {
        items: Vec<DocElement>,
        #[serde(default)]
        attributes: Attributes,
    },
    Table {
        rows: Vec<Vec<DocElement>>,
        #[serde(default)]
        attributes: Attributes,
    },
    Section {
        elements: Vec<DocElement>,
        #[serde(default)]
        attributes: Attributes,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HlirModule {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub globals: Vec<Global>,
    #[serde(default)]
    pub functions: Vec<Func>,
    #[serde(default)]
    pub elements: Vec<DocElement>,
}

impl HlirModule {
    pub fn new(name: &str) -> Self {
        HlirModule {
            name: name.to_string(),
            ..HlirModule::default()
        }
    }

    pub fn from_json_str(raw: &str) -> BridgeResult<HlirModule> {
        serde_json::from_str(raw).map_err(|e| BridgeError::invalid_input(format!("parse hlir module: {}", e)))
    }

    pub fn to_json_pretty(&self) -> BridgeResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BridgeError::invalid_input(format!("encode hlir module: {}", e)))
    }

    /// Declare a global and return its id (ids are handed out densely).
    pub fn add_global(&mut self, name: &str, init: Literal) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Global {
            id,
            name: name.to_string(),
            ty: init.ty(),
            init,
        });
        id
    }

    pub fn add_function(&mut self, name: &str, params: Vec<Param>, return_type: Option<Type>, ops: Vec<Op>) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Func {
            id,
            name: name.to_string(),
            params,
            return_type,
            body: Block { ops },
        });
        id
    }

    /// Append a top-level element and return the index `EmitElement` uses.
    pub fn add_element(&mut self, element: DocElement) -> usize {
        self.elements.push(element);
        self.elements.len() - 1
    }

    pub fn find_function(&self, id: FuncId) -> Option<&Func> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty() && self.functions.is_empty() && self.elements.is_empty()
    }
}
