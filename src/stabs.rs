use crate::{*, error::*, program::*, util::*};
use std::collections::BTreeMap;

// Stab types from binutils-gdb/include/aout/stab.def, limited to the ones a
// GCC-built Amiga executable actually feeds us.
pub const N_UNDF: u8 = 0x00;
pub const N_GSYM: u8 = 0x20;
pub const N_FUN: u8 = 0x24;
pub const N_STSYM: u8 = 0x26;
pub const N_LCSYM: u8 = 0x28;
pub const N_RSYM: u8 = 0x40;
pub const N_SLINE: u8 = 0x44;
pub const N_SO: u8 = 0x64;
pub const N_LSYM: u8 = 0x80;
pub const N_PSYM: u8 = 0xa0;
pub const N_LBRAC: u8 = 0xc0;
pub const N_RBRAC: u8 = 0xe0;

pub const STAB_SIZE: usize = 12;

fn stab_type_name(t: u8) -> String {
    match t {
        N_UNDF => "N_UNDF".to_string(),
        N_GSYM => "N_GSYM".to_string(),
        N_FUN => "N_FUN".to_string(),
        N_STSYM => "N_STSYM".to_string(),
        N_LCSYM => "N_LCSYM".to_string(),
        N_RSYM => "N_RSYM".to_string(),
        N_SLINE => "N_SLINE".to_string(),
        N_SO => "N_SO".to_string(),
        N_LSYM => "N_LSYM".to_string(),
        N_PSYM => "N_PSYM".to_string(),
        N_LBRAC => "N_LBRAC".to_string(),
        N_RBRAC => "N_RBRAC".to_string(),
        t => format!("0x{:02x}", t),
    }
}

// One decoded 12-byte stab with its string already resolved.
#[derive(Debug, Clone)]
pub struct Stab {
    pub stab_type: u8,
    pub other: u8,
    pub desc: u16,
    pub value: u32,
    pub string: String,
}

// The debug payload starts with an N_UNDF sentinel whose desc holds the
// in-bytes size of the stab table (sentinel included) and whose value holds
// the string table size. The string table follows the stab table directly.
fn parse_stab_table(data: &[u8]) -> Result<Vec<Stab>> {
    let mut r = ByteReader::new(data, ErrorKind::DebugInfoMalformed);
    let _strx = r.u32()?;
    let sentinel_type = r.u8()?;
    let _other = r.u8()?;
    let desc = r.u16()?;
    let _strtab_size = r.u32()?;
    if sentinel_type != N_UNDF {
        return err!(DebugInfoMalformed, "stab table does not start with an N_UNDF stab (got {})", stab_type_name(sentinel_type));
    }
    let num_stabs = desc as usize / STAB_SIZE;
    if num_stabs == 0 || data.len() < num_stabs * STAB_SIZE {
        return err!(DebugInfoMalformed, "stab table of {} entries does not fit in {} bytes of debug data", num_stabs, data.len());
    }
    verbose_log!("stab table contains {} entries", num_stabs);
    let string_table = &data[num_stabs * STAB_SIZE..];

    let mut stabs = Vec::with_capacity(num_stabs - 1);
    for _ in 0..num_stabs - 1 {
        let strx = r.u32()? as usize;
        let stab_type = r.u8()?;
        let other = r.u8()?;
        let desc = r.u16()?;
        let value = r.u32()?;
        if strx > string_table.len() {
            return err!(DebugInfoMalformed, "stab string offset {} outside string table of {} bytes", strx, string_table.len());
        }
        let mut sr = ByteReader::new(&string_table[strx..], ErrorKind::DebugInfoMalformed);
        let string = sr.cstr()?;
        verbose_log!("stab(type={}, string='{}', other=0x{:x}, desc=0x{:x}, value=0x{:08x})", stab_type_name(stab_type), string, other, desc, value);
        stabs.push(Stab {stab_type, other, desc, value, string});
    }
    Ok(stabs)
}

fn is_tree_relevant(stab: &Stab) -> bool {
    matches!(
        stab.stab_type,
        N_SO | N_GSYM | N_STSYM | N_LCSYM | N_LSYM | N_RSYM | N_PSYM | N_FUN | N_LBRAC | N_RBRAC | N_SLINE
    )
}

// An N_LSYM whose value is zero defines a type rather than a variable.
fn is_type_definition(stab: &Stab) -> bool {
    stab.stab_type == N_LSYM && stab.value == 0
}

// "symbol:typeinfo", with the first colon as the separator.
fn split_symbol(stab: &Stab) -> Result<(String, String)> {
    match stab.string.split_once(':') {
        Some((name, type_id)) => Ok((name.to_string(), type_id.to_string())),
        None => err!(DebugInfoMalformed, "{} stab without type separator: '{}'", stab_type_name(stab.stab_type), stab.string),
    }
}

// Builds the program tree. The compiler emits locals, register variables, line
// tuples and nested functions *before* the record that opens their parent, so
// they wait on the two pending stacks until the parent record shows up; scope
// braces and parameters arrive in source order. The stacks are explicit
// builder state threaded through the recursion, never shared defaults.
struct TreeBuilder {
    stabs: Vec<Stab>, // reversed, consumed with pop()
    pending_locals: Vec<ProgramNode>,
    pending_funcs: Vec<ProgramNode>,
    srcdir: String,
}

impl TreeBuilder {
    fn new(stabs: Vec<Stab>) -> Self {
        let mut stabs = stabs;
        stabs.reverse();
        Self {stabs, pending_locals: Vec::new(), pending_funcs: Vec::new(), srcdir: String::new()}
    }

    fn var_node(tag: NodeTag, stab: &Stab) -> Result<ProgramNode> {
        let (name, type_id) = split_symbol(stab)?;
        let mut node = ProgramNode::new(tag, name);
        node.type_id = type_id;
        node.start_addr = stab.value;
        Ok(node)
    }

    // Builds one node and everything below it: a compilation unit when invoked
    // from the top level, a function or scope when invoked from within. Which
    // one it will be is decided by the first record consumed.
    fn build_node(&mut self, current_func_lineno: Option<u32>) -> Result<ProgramNode> {
        let mut node: Option<ProgramNode> = None;
        while let Some(stab) = self.stabs.pop() {
            match stab.stab_type {
                N_SO => {
                    match node.take() {
                        None => {
                            if stab.string.ends_with('/') {
                                // source directory stab; absent when there is a single unit
                                self.srcdir = stab.string;
                            } else {
                                let mut unit = ProgramNode::new(NodeTag::CompUnit, format!("{}{}", self.srcdir, stab.string));
                                unit.start_addr = stab.value;
                                node = Some(unit);
                            }
                        }
                        Some(mut done) => {
                            // Next compilation unit starts: its start address closes
                            // whatever is open, and the stab goes back for the caller.
                            done.end_addr = stab.value;
                            done.children.append(&mut self.pending_funcs);
                            self.stabs.push(stab);
                            return Ok(done);
                        }
                    }
                }
                N_GSYM | N_STSYM | N_LCSYM => {
                    let tag = if stab.stab_type == N_GSYM { NodeTag::GlobalVar } else { NodeTag::StaticVar };
                    let child = Self::var_node(tag, &stab)?;
                    match node.as_mut() {
                        Some(parent) => parent.children.push(child),
                        None => return err!(DebugInfoMalformed, "{} stab before any compilation unit", stab_type_name(stab.stab_type)),
                    }
                }
                N_LSYM | N_RSYM => {
                    // Local or register variable; its scope opens later. For
                    // register variables the value is the register number.
                    let tag = if stab.stab_type == N_RSYM { NodeTag::RegisterVar } else { NodeTag::LocalVar };
                    self.pending_locals.push(Self::var_node(tag, &stab)?);
                }
                N_PSYM => {
                    let child = Self::var_node(NodeTag::Parameter, &stab)?;
                    match node.as_mut() {
                        Some(parent) if parent.tag == NodeTag::Function => parent.children.push(child),
                        _ => return err!(DebugInfoMalformed, "N_PSYM stab outside a function"),
                    }
                }
                N_FUN => {
                    match node.take() {
                        Some(mut done) if done.tag == NodeTag::Function => {
                            // Next function's start address is this one's end.
                            done.end_addr = stab.value;
                            self.stabs.push(stab);
                            return Ok(done);
                        }
                        Some(parent) if parent.tag == NodeTag::CompUnit || parent.tag == NodeTag::Scope => {
                            self.stabs.push(stab);
                            node = Some(parent);
                            let child = self.build_node(None)?;
                            if child.tag != NodeTag::Function {
                                return err!(DebugInfoMalformed, "expected a function from N_FUN stab, built {:?}", child.tag);
                            }
                            self.pending_funcs.push(child);
                        }
                        Some(parent) => {
                            return err!(DebugInfoMalformed, "N_FUN stab while building a {:?}", parent.tag);
                        }
                        None => {
                            // We were called to build exactly this function.
                            let (name, type_id) = split_symbol(&stab)?;
                            let mut func = ProgramNode::new(NodeTag::Function, name);
                            func.type_id = type_id;
                            func.lineno = stab.desc as u32;
                            func.start_addr = stab.value;
                            func.children.append(&mut self.pending_locals);
                            node = Some(func);
                        }
                    }
                }
                N_SLINE => {
                    let mut line = ProgramNode::new(NodeTag::LineRecord, String::new());
                    line.lineno = stab.desc as u32;
                    line.start_addr = stab.value;
                    self.pending_locals.push(line);
                }
                N_LBRAC => {
                    match node.take() {
                        Some(parent) => {
                            let parent_lineno = parent.lineno;
                            self.stabs.push(stab);
                            node = Some(parent);
                            let child = self.build_node(Some(parent_lineno))?;
                            if child.tag != NodeTag::Scope {
                                return err!(DebugInfoMalformed, "expected a scope from N_LBRAC stab, built {:?}", child.tag);
                            }
                            node.as_mut().unwrap().children.push(child);
                        }
                        None => {
                            // We were called to build exactly this scope.
                            let mut scope = ProgramNode::new(NodeTag::Scope, format!("SCOPE@0x{:08x}", stab.value));
                            scope.start_addr = stab.value;
                            scope.children.append(&mut self.pending_locals);
                            let func_lineno = match current_func_lineno {
                                Some(l) => l,
                                None => return err!(DebugInfoMalformed, "N_LBRAC stab without an enclosing function"),
                            };
                            // A pending function declared on a later line than the
                            // enclosing one is nested inside this block.
                            if self.pending_funcs.first().map_or(false, |f| f.lineno > func_lineno) {
                                scope.children.append(&mut self.pending_funcs);
                            }
                            node = Some(scope);
                        }
                    }
                }
                N_RBRAC => {
                    match node.take() {
                        Some(mut scope) if scope.tag == NodeTag::Scope => {
                            scope.end_addr = stab.value;
                            return Ok(scope);
                        }
                        _ => return err!(DebugInfoMalformed, "N_RBRAC stab without an open scope"),
                    }
                }
                t => return err!(DebugInfoMalformed, "unexpected stab type {} in tree builder", stab_type_name(t)),
            }
        }

        // Ran out of records: only a compilation unit may be left open (the last
        // function of the last unit has no closing record and keeps end 0).
        match node {
            Some(mut unit) if unit.tag == NodeTag::CompUnit => {
                unit.children.append(&mut self.pending_funcs);
                Ok(unit)
            }
            Some(other) => {
                // A function being built when the stream ends; its end stays 0.
                Ok(other)
            }
            None => err!(DebugInfoMalformed, "stab stream ended without producing a node"),
        }
    }
}

// Per-unit line indices. Each N_SLINE contributes a range starting at its
// address and ending at the next record's address; the last range of a unit
// stays open (end 0). A line emitted at several addresses keeps only the
// lowest-address range.
fn build_line_indices(stabs: &[Stab]) -> BTreeMap<String, LineIndex> {
    let mut indices: BTreeMap<String, LineIndex> = BTreeMap::new();
    let mut srcdir = String::new();
    let mut current_unit: Option<String> = None;
    let mut pairs: Vec<(u32, u32)> = Vec::new(); // (lineno, addr) in file order

    fn flush(unit: &Option<String>, pairs: &mut Vec<(u32, u32)>, indices: &mut BTreeMap<String, LineIndex>) {
        let unit = match unit {
            None => {
                pairs.clear();
                return;
            }
            Some(u) => u.clone(),
        };
        let mut sorted = std::mem::take(pairs);
        sorted.sort_by_key(|&(_, addr)| addr);
        let mut index = LineIndex::default();
        for i in 0..sorted.len() {
            let (lineno, start) = sorted[i];
            let end = sorted.get(i + 1).map_or(0, |&(_, next)| next);
            if index.ranges.iter().any(|r| r.lineno == lineno) {
                continue; // line already recorded at a lower address
            }
            index.ranges.push(LineRange {lineno, start, end});
        }
        indices.insert(unit, index);
    }

    for stab in stabs {
        match stab.stab_type {
            N_SO => {
                if stab.string.ends_with('/') {
                    srcdir = stab.string.clone();
                } else {
                    flush(&current_unit, &mut pairs, &mut indices);
                    current_unit = Some(format!("{}{}", srcdir, stab.string));
                }
            }
            N_SLINE => pairs.push((stab.desc as u32, stab.value)),
            _ => (),
        }
    }
    flush(&current_unit, &mut pairs, &mut indices);
    indices
}

// Decodes a STABS debug section into the queryable program representation.
pub fn program_from_stabs(data: &[u8]) -> Result<Program> {
    let stabs = parse_stab_table(data)?;

    let mut type_defs = Vec::new();
    let mut tree_stabs = Vec::new();
    for stab in &stabs {
        if is_type_definition(stab) {
            match stab.string.split_once(':') {
                Some((name, info)) if info.starts_with('t') || info.starts_with('T') => {
                    verbose_log!("type '{}' defined as '{}'", name, info);
                    type_defs.push((name.to_string(), info.to_string()));
                }
                _ => eprintln!("warning: N_LSYM type definition stab without type info: '{}'", stab.string),
            }
        } else if is_tree_relevant(stab) {
            tree_stabs.push(stab.clone());
        }
    }

    let line_indices = build_line_indices(&tree_stabs);

    let mut builder = TreeBuilder::new(tree_stabs);
    let mut root = ProgramNode::new(NodeTag::Root, String::new());
    while !builder.stabs.is_empty() {
        root.children.push(builder.build_node(None)?);
    }

    let program = Program {root, line_indices, type_defs};
    if crate::log::verbose() {
        program.dump_tree();
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use crate::{error::*, program::*, stabs::*};

    // Assembles a debug section: N_UNDF sentinel, stab records, string table.
    struct StabsFixture {
        records: Vec<(u8, u16, u32, usize)>, // (type, desc, value, string table offset)
        strings: Vec<u8>,
    }

    impl StabsFixture {
        fn new() -> Self {
            Self {records: Vec::new(), strings: vec![0]} // offset 0 is the empty string
        }

        fn stab(&mut self, stab_type: u8, desc: u16, value: u32, string: &str) -> &mut Self {
            let offset = if string.is_empty() {
                0
            } else {
                let offset = self.strings.len();
                self.strings.extend_from_slice(string.as_bytes());
                self.strings.push(0);
                offset
            };
            self.records.push((stab_type, desc, value, offset));
            self
        }

        fn build(&self) -> Vec<u8> {
            let num_stabs = self.records.len() + 1; // sentinel included
            let mut out = Vec::new();
            out.extend_from_slice(&0u32.to_be_bytes());
            out.push(N_UNDF);
            out.push(0);
            out.extend_from_slice(&((num_stabs * STAB_SIZE) as u16).to_be_bytes());
            out.extend_from_slice(&(self.strings.len() as u32).to_be_bytes());
            for &(stab_type, desc, value, offset) in &self.records {
                out.extend_from_slice(&(offset as u32).to_be_bytes());
                out.push(stab_type);
                out.push(0);
                out.extend_from_slice(&desc.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
            }
            out.extend_from_slice(&self.strings);
            out
        }
    }

    // The reference layout: one unit, main() with a scope and a nested line
    // duplicate, plus a trailing helper function.
    fn numbers_fixture() -> Vec<u8> {
        let mut f = StabsFixture::new();
        f.stab(N_SO, 0, 0, "/home/user/amiga/")
            .stab(N_SO, 0, 0, "numbers.c")
            .stab(N_GSYM, 0, 0x400, "g_count:G1")
            .stab(N_LSYM, 0, 0, "int:t1=r1;-2147483648;2147483647;")
            .stab(N_SLINE, 20, 0x100, "")
            .stab(N_SLINE, 21, 0x16c, "")
            .stab(N_SLINE, 22, 0x17c, "")
            .stab(N_SLINE, 23, 0x18c, "")
            .stab(N_SLINE, 22, 0x198, "") // duplicate, higher address
            .stab(N_SLINE, 24, 0x1a0, "")
            .stab(N_FUN, 20, 0x100, "main:F1")
            .stab(N_PSYM, 0, 8, "argc:p1")
            .stab(N_LSYM, 0, 0xfffffffc, "i:1")
            .stab(N_RSYM, 0, 10, "count:r1")
            .stab(N_LBRAC, 0, 0x108, "")
            .stab(N_RBRAC, 0, 0x19c, "")
            .stab(N_FUN, 30, 0x1a8, "helper:f1");
        f.build()
    }

    #[test]
    fn reference_lookups() {
        let program = program_from_stabs(&numbers_fixture()).unwrap();
        assert_eq!(program.addr_range_for_line(22, None).unwrap(), Some((0x17c, 0x18c)));
        assert_eq!(program.line_for_addr(0x17c, None), Some(22));
        assert_eq!(program.comp_unit_for_addr(0x17c), Some("/home/user/amiga/numbers.c"));
        assert_eq!(program.addr_range_for_function("main"), Some((0x100, 0x1a8)));
        // Record at 0x198 belongs to the duplicate of line 22 and is dropped,
        // but its start still closes line 23's range.
        assert_eq!(program.addr_range_for_line(23, None).unwrap(), Some((0x18c, 0x198)));
        assert_eq!(program.addr_range_for_line(24, None).unwrap(), Some((0x1a0, 0)));
        assert_eq!(program.line_for_addr(0x5000, None), Some(24));
    }

    #[test]
    fn tree_shape() {
        let program = program_from_stabs(&numbers_fixture()).unwrap();
        let unit = &program.root.children[0];
        assert_eq!(unit.tag, NodeTag::CompUnit);
        assert_eq!(unit.name, "/home/user/amiga/numbers.c");

        let global = unit.children.iter().find(|n| n.tag == NodeTag::GlobalVar).unwrap();
        assert_eq!(global.name, "g_count");
        assert_eq!(global.type_id, "G1");

        let funcs: Vec<&ProgramNode> = unit.children.iter().filter(|n| n.tag == NodeTag::Function).collect();
        assert_eq!(funcs.len(), 2);
        let main = funcs.iter().find(|f| f.name == "main").unwrap();
        assert_eq!((main.start_addr, main.end_addr), (0x100, 0x1a8));
        assert_eq!(main.lineno, 20);
        // Line records were pending when main was created and drained into it.
        assert_eq!(main.children.iter().filter(|n| n.tag == NodeTag::LineRecord).count(), 6);
        assert!(main.children.iter().any(|n| n.tag == NodeTag::Parameter && n.name == "argc"));

        let scope = main.children.iter().find(|n| n.tag == NodeTag::Scope).unwrap();
        assert_eq!((scope.start_addr, scope.end_addr), (0x108, 0x19c));
        assert!(scope.start_addr >= main.start_addr && scope.end_addr <= main.end_addr);
        assert!(scope.children.iter().any(|n| n.tag == NodeTag::LocalVar && n.name == "i"));
        let reg = scope.children.iter().find(|n| n.tag == NodeTag::RegisterVar).unwrap();
        assert_eq!(reg.register_name(), "A2");

        let helper = funcs.iter().find(|f| f.name == "helper").unwrap();
        assert_eq!(helper.start_addr, 0x1a8);
        assert_eq!(helper.end_addr, 0); // nothing after it to close it
        // Function ranges of a unit do not overlap.
        assert!(main.end_addr <= helper.start_addr);

        // Type definition was diverted to the dictionary, not the tree.
        assert_eq!(program.type_defs.len(), 1);
        assert_eq!(program.type_defs[0].0, "int");
    }

    #[test]
    fn two_units() {
        let mut f = StabsFixture::new();
        f.stab(N_SO, 0, 0, "a.c")
            .stab(N_SLINE, 10, 0x10, "")
            .stab(N_FUN, 10, 0x10, "fa:F1")
            .stab(N_SO, 0, 0x100, "b.c")
            .stab(N_SLINE, 5, 0x110, "")
            .stab(N_FUN, 5, 0x110, "fb:F1");
        let program = program_from_stabs(&f.build()).unwrap();
        assert_eq!(program.root.children.len(), 2);
        assert_eq!(program.root.children[0].end_addr, 0x100);
        assert_eq!(program.comp_unit_for_addr(0x50), Some("a.c"));
        assert_eq!(program.comp_unit_for_addr(0x150), Some("b.c"));
        assert!(program.addr_range_for_line(10, None).is_err());
        assert_eq!(program.addr_range_for_line(10, Some("a.c")).unwrap(), Some((0x10, 0)));
    }

    #[test]
    fn malformed_tables() {
        // Does not start with N_UNDF.
        let mut f = StabsFixture::new();
        f.stab(N_SO, 0, 0, "a.c");
        let mut data = f.build();
        data[4] = N_SO;
        assert_eq!(program_from_stabs(&data).unwrap_err().kind, ErrorKind::DebugInfoMalformed);

        // Truncated record area.
        let data = numbers_fixture();
        assert!(program_from_stabs(&data[..40]).is_err());

        // Variable stab without the name:type separator.
        let mut f = StabsFixture::new();
        f.stab(N_SO, 0, 0, "a.c").stab(N_GSYM, 0, 4, "broken");
        assert!(program_from_stabs(&f.build()).is_err());
    }
}
