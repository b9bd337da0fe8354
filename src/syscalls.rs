use crate::{*, commands::*, error::*, protocol::*, target::*, transport::*};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// Argument-passing registers of the library call convention. A7 never carries
// an argument.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegId {
    D0, D1, D2, D3, D4, D5, D6, D7,
    A0, A1, A2, A3, A4, A5, A6,
}

impl RegId {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::D0 => "D0", Self::D1 => "D1", Self::D2 => "D2", Self::D3 => "D3",
            Self::D4 => "D4", Self::D5 => "D5", Self::D6 => "D6", Self::D7 => "D7",
            Self::A0 => "A0", Self::A1 => "A1", Self::A2 => "A2", Self::A3 => "A3",
            Self::A4 => "A4", Self::A5 => "A5", Self::A6 => "A6",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallArg {
    pub decl: String, // C declaration from the prototype, e.g. "STRPTR name"
    pub register: RegId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallInfo {
    pub name: String,
    pub args: Vec<SyscallArg>,
    pub ret_type: String,
}

// Offline-built database mapping each library's jump-table offsets to call
// signatures. One JSON file per library, "<shortname>.data", keyed by the
// unsigned offset as it appears in the pragma headers.
pub struct SyscallDb {
    by_library: BTreeMap<String, BTreeMap<u16, SyscallInfo>>,
}

impl SyscallDb {
    pub fn empty() -> Self {
        Self {by_library: BTreeMap::new()}
    }

    pub fn load_dir(dir: &Path) -> Result<SyscallDb> {
        let mut db = SyscallDb::empty();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| error!(Environment, "could not read syscall database directory '{}': {}", dir.display(), e))?;
        for entry in entries {
            let path = entry.map_err(|e| error!(Environment, "could not list '{}': {}", dir.display(), e))?.path();
            if path.extension().map_or(true, |ext| ext != "data") {
                continue;
            }
            let lib_name = match path.file_stem() {
                Some(stem) => stem.to_string_lossy().into_owned(),
                None => continue,
            };
            let content = std::fs::read(&path)
                .map_err(|e| error!(Environment, "could not read syscall database '{}': {}", path.display(), e))?;
            let by_offset: BTreeMap<u16, SyscallInfo> = serde_json::from_slice(&content)
                .map_err(|e| error!(Environment, "syscall database '{}' is not valid: {}", path.display(), e))?;
            verbose_log!("loaded {} syscalls for {}.library", by_offset.len(), lib_name);
            db.by_library.insert(lib_name, by_offset);
        }
        Ok(db)
    }

    pub fn libraries(&self) -> impl Iterator<Item = &str> {
        self.by_library.keys().map(|s| s.as_str())
    }

    pub fn lookup(&self, library: &str, offset: u16) -> Option<&SyscallInfo> {
        self.by_library.get(library)?.get(&offset)
    }
}

pub enum SyscallResolution<'a> {
    NotASyscall,
    UnknownLibrary {base_addr: u32},
    UnknownOffset {library: &'a str, offset: u16},
    Resolved {library: &'a str, info: &'a SyscallInfo},
}

// Purely local part of the decoding: classify the next instruction and look the
// call up in the database. No agent round trips.
pub fn resolve_syscall<'a>(
    info: &TargetInfo,
    lib_base_addrs: &'a BTreeMap<u32, String>,
    db: &'a SyscallDb,
) -> SyscallResolution<'a> {
    if !info.next_instr_is_syscall() {
        return SyscallResolution::NotASyscall;
    }
    let base_addr = info.task_context.reg_a[6];
    let library = match lib_base_addrs.get(&base_addr) {
        None => return SyscallResolution::UnknownLibrary {base_addr},
        Some(name) => name.as_str(),
    };
    let offset = info.syscall_offset().unsigned_abs();
    match db.lookup(library, offset) {
        None => SyscallResolution::UnknownOffset {library, offset},
        Some(syscall) => SyscallResolution::Resolved {library, info: syscall},
    }
}

// Annotation lines for the disassembly view: the resolved signature with the
// actual argument values, string arguments chased through the agent.
pub fn annotate_syscall(
    info: &TargetInfo,
    lib_base_addrs: &BTreeMap<u32, String>,
    db: &SyscallDb,
    conn: &mut Transport,
) -> Result<Vec<String>> {
    match resolve_syscall(info, lib_base_addrs, db) {
        SyscallResolution::NotASyscall => Ok(Vec::new()),
        SyscallResolution::UnknownLibrary {base_addr} => {
            eprintln!("warning: next instruction seems to be a syscall but base address {:#010x} is unknown", base_addr);
            Ok(vec![format!("*** syscall into unknown library (A6 = {:#010x}) ***", base_addr)])
        }
        SyscallResolution::UnknownOffset {library, offset} => {
            eprintln!("warning: A6 holds the base of {}.library but offset {} is not in the syscall db", library, offset);
            Ok(vec![format!("*** unknown syscall with offset {} in {}.library ***", offset, library)])
        }
        SyscallResolution::Resolved {library, info: syscall} => {
            verbose_log!("next instruction is syscall {} in {}.library", syscall.name, library);
            let mut lines = vec![format!("{}(", syscall.name)];
            for arg in &syscall.args {
                let value = info.register_value(arg.register.number());
                let mut line = format!("    {} = {:#x}", arg.decl, value);
                if arg.decl.contains("STRPTR") {
                    line.push_str(&format!(" => \"{}\"", peek_string(conn, value)?));
                }
                lines.push(line + ",");
            }
            lines.push(")".to_string());
            Ok(lines)
        }
    }
}

// The string length is unknown, so fetch the maximum one message can carry and
// cut at the first NUL.
fn peek_string(conn: &mut Transport, address: u32) -> Result<String> {
    let cmd = ServerCommand::peek_mem(address, MAX_MSG_DATA_LEN as u16).execute(conn)?;
    let mem = cmd.memory();
    let len = mem.iter().position(|&b| b == 0).unwrap_or(mem.len());
    Ok(String::from_utf8_lossy(&mem[..len]).replace('\n', "\\n").replace('\r', "\\r"))
}
