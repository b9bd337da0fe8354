use crate::{*, error::*};
use std::collections::BTreeMap;
use std::fmt;

// The program tree is a simplified AST of the debugged program, built from the
// STABS records: compilation units at the top, functions below them, then
// lexical scopes with their variables and line records. All addresses are
// offsets from the entry point.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NodeTag {
    Root,
    CompUnit,
    Function,
    Scope,
    GlobalVar,
    StaticVar,
    LocalVar,
    RegisterVar,
    Parameter,
    LineRecord,
}

#[derive(Debug, Clone)]
pub struct ProgramNode {
    pub tag: NodeTag,
    pub name: String,
    pub type_id: String, // opaque STABS type reference, resolved by a future data dictionary
    pub start_addr: u32,
    pub end_addr: u32,
    pub lineno: u32,
    pub children: Vec<ProgramNode>,
}

impl ProgramNode {
    pub fn new(tag: NodeTag, name: String) -> Self {
        Self {tag, name, type_id: String::new(), start_addr: 0, end_addr: 0, lineno: 0, children: Vec::new()}
    }

    // Register variables keep the register number in start_addr: 0..7 = D0..D7,
    // 8..15 = A0..A7.
    pub fn register_name(&self) -> String {
        if self.start_addr < 8 {
            format!("D{}", self.start_addr)
        } else {
            format!("A{}", self.start_addr - 8)
        }
    }
}

impl fmt::Display for ProgramNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag == NodeTag::RegisterVar {
            return write!(f, "{:?} '{}' typeid='{}' register={}", self.tag, self.name, self.type_id, self.register_name());
        }
        write!(
            f,
            "{:?} '{}' typeid='{}' start=0x{:08x} end=0x{:08x} lineno={}",
            self.tag, self.name, self.type_id, self.start_addr, self.end_addr, self.lineno
        )
    }
}

// One line's address range within its compilation unit. end == 0 on the last
// line of a unit means "until the end of the unit".
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LineRange {
    pub lineno: u32,
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && (self.end == 0 || addr < self.end)
    }
}

// Ranges sorted by start address, at most one per line number (the
// lowest-address record wins when the compiler emits a line twice).
#[derive(Debug, Default)]
pub struct LineIndex {
    pub ranges: Vec<LineRange>,
}

impl LineIndex {
    pub fn range_for_line(&self, lineno: u32) -> Option<(u32, u32)> {
        self.ranges.iter().find(|r| r.lineno == lineno).map(|r| (r.start, r.end))
    }

    pub fn line_for_addr(&self, addr: u32) -> Option<u32> {
        self.ranges.iter().find(|r| r.contains(addr)).map(|r| r.lineno)
    }
}

// Everything the debugger knows about the loaded executable: the program tree,
// per-unit line indices, and the (so far unused) type definitions.
#[derive(Debug)]
pub struct Program {
    pub root: ProgramNode,
    pub line_indices: BTreeMap<String, LineIndex>,
    pub type_defs: Vec<(String, String)>,
}

impl Program {
    fn comp_units(&self) -> impl Iterator<Item = &ProgramNode> {
        self.root.children.iter().filter(|n| n.tag == NodeTag::CompUnit)
    }

    // The single unit, or an error telling the caller to disambiguate.
    fn only_unit(&self) -> Result<&str> {
        let mut units = self.comp_units();
        match (units.next(), units.next()) {
            (Some(unit), None) => Ok(&unit.name),
            (None, _) => err!(NoDebugInfo, "program has no compilation units"),
            _ => err!(Usage, "program has more than one compilation unit, name one"),
        }
    }

    pub fn addr_range_for_line(&self, lineno: u32, comp_unit: Option<&str>) -> Result<Option<(u32, u32)>> {
        let unit = match comp_unit {
            Some(unit) => unit.to_string(),
            None => self.only_unit()?.to_string(),
        };
        match self.line_indices.get(&unit) {
            None => err!(NoDebugInfo, "no line information for compilation unit '{}'", unit),
            Some(index) => Ok(index.range_for_line(lineno)),
        }
    }

    pub fn line_for_addr(&self, addr: u32, comp_unit: Option<&str>) -> Option<u32> {
        let unit = match comp_unit {
            Some(unit) => unit.to_string(),
            None => self.comp_unit_for_addr(addr)?.to_string(),
        };
        self.line_indices.get(&unit)?.line_for_addr(addr)
    }

    // end_addr == 0 on the last unit means "from start_addr onwards".
    pub fn comp_unit_for_addr(&self, addr: u32) -> Option<&str> {
        for unit in self.comp_units() {
            if addr >= unit.start_addr && (unit.end_addr == 0 || addr < unit.end_addr) {
                return Some(&unit.name);
            }
        }
        None
    }

    pub fn addr_range_for_function(&self, name: &str) -> Option<(u32, u32)> {
        for unit in self.comp_units() {
            for child in &unit.children {
                if child.tag == NodeTag::Function && child.name == name {
                    return Some((child.start_addr, child.end_addr));
                }
            }
        }
        None
    }

    pub fn function_for_addr(&self, addr: u32) -> Option<&ProgramNode> {
        for unit in self.comp_units() {
            for child in &unit.children {
                if child.tag == NodeTag::Function
                    && addr >= child.start_addr
                    && (child.end_addr == 0 || addr < child.end_addr)
                {
                    return Some(child);
                }
            }
        }
        None
    }

    pub fn dump_tree(&self) {
        fn walk(node: &ProgramNode, indent: usize) {
            verbose_log!("{:indent$}{}", "", node, indent = indent);
            for child in &node.children {
                walk(child, indent + 4);
            }
        }
        walk(&self.root, 0);
    }
}
