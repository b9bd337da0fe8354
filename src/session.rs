use crate::{*, commands::*, error::*, program::*, stack::*, syscalls::*, target::*, transport::*};
use std::collections::BTreeMap;

// The single mutable object of a debugging session: the connection, whatever we
// know about the loaded program, the syscall database with the resolved library
// bases, and the last snapshot the target sent. Owned by the event loop and
// passed by reference into command handlers.
pub struct SessionState {
    pub conn: Transport,
    pub program: Option<Program>,
    pub syscall_db: SyscallDb,
    pub lib_base_addrs: BTreeMap<u32, String>,
    pub target_info: Option<TargetInfo>,
}

impl SessionState {
    pub fn new(conn: Transport, program: Option<Program>, syscall_db: SyscallDb) -> Self {
        Self {conn, program, syscall_db, lib_base_addrs: BTreeMap::new(), target_info: None}
    }

    // Asks the agent where each library from the syscall database lives. A
    // library that is not resident is skipped with a warning; syscalls into it
    // just stay unresolved.
    pub fn resolve_library_bases(&mut self) -> Result<()> {
        let libraries: Vec<String> = self.syscall_db.libraries().map(|s| s.to_string()).collect();
        for lib in libraries {
            let full_name = format!("{}.library", lib);
            match ServerCommand::get_base_address(&full_name).execute(&mut self.conn) {
                Ok(cmd) => {
                    let base = cmd.base_address()?;
                    verbose_log!("{} has base address {:#010x}", full_name, base);
                    self.lib_base_addrs.insert(base, lib);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => eprintln!("warning: could not get base address of {}: {}", full_name, e),
            }
        }
        Ok(())
    }

    pub fn target_is_running(&self) -> bool {
        self.target_info.as_ref().map_or(false, |info| info.is_running())
    }

    pub fn update_target_info(&mut self, info: Option<TargetInfo>) {
        if info.is_some() {
            self.target_info = info;
        }
    }

    fn current_info(&self) -> Result<&TargetInfo> {
        match &self.target_info {
            Some(info) => Ok(info),
            None => err!(StateViolation, "target has not been run yet"),
        }
    }

    pub fn status_line(&self) -> String {
        match &self.target_info {
            Some(info) => info.status_line(),
            None => "* Idle *".to_string(),
        }
    }

    // The ±5 source lines around the current one, current line marked. Needs
    // both the debug info and the source file itself to be reachable.
    pub fn source_view(&self) -> Result<Vec<String>> {
        let info = self.current_info()?;
        let program = match &self.program {
            Some(program) => program,
            None => return err!(NoDebugInfo, "no program loaded, source-level debugging not available"),
        };
        let offset = info.pc_offset();
        let source_fname = match program.comp_unit_for_addr(offset) {
            Some(name) => name.to_string(),
            None => return err!(NoDebugInfo, "no source file available for the current PC"),
        };
        let current_lineno = match program.line_for_addr(offset, Some(&source_fname)) {
            Some(lineno) => lineno as usize,
            None => return err!(NoDebugInfo, "no line number available for the current PC"),
        };
        let content = std::fs::read_to_string(&source_fname)
            .map_err(|e| error!(Environment, "could not read source file '{}': {}", source_fname, e))?;
        let source_lines: Vec<&str> = content.lines().collect();
        if current_lineno == 0 || current_lineno > source_lines.len() {
            return err!(DebugInfoMalformed, "current line {} is outside source file '{}' with {} lines", current_lineno, source_fname, source_lines.len());
        }
        let start = current_lineno.saturating_sub(5).max(1);
        let end = (current_lineno + 5).min(source_lines.len());
        let mut lines = vec![format!("{}:", source_fname)];
        for lineno in start..=end {
            let marker = if lineno == current_lineno { "=> " } else { "   " };
            lines.push(format!("{:<4}: {}{}", lineno, marker, source_lines[lineno - 1]));
        }
        Ok(lines)
    }

    // Disassembly around PC with the syscall annotation when the next
    // instruction is a library call.
    pub fn disasm_view(&mut self) -> Result<Vec<String>> {
        let info = self.current_info()?.clone();
        let annotation = annotate_syscall(&info, &self.lib_base_addrs, &self.syscall_db, &mut self.conn)?;
        Ok(info.disasm_view(&annotation))
    }

    pub fn register_view(&self) -> Result<Vec<String>> {
        Ok(self.current_info()?.register_view())
    }

    pub fn stack_view(&self) -> Result<Vec<String>> {
        Ok(self.current_info()?.stack_view())
    }

    // One line per frame: "#i: 0xPC file:line".
    pub fn call_stack_view(&mut self) -> Result<Vec<String>> {
        let info = self.current_info()?.clone();
        let frames = walk_call_stack(&info, &mut self.conn)?;
        let mut lines = Vec::with_capacity(frames.len());
        for (i, frame) in frames.iter().enumerate() {
            let location = self.describe_addr(frame.program_counter);
            lines.push(format!("#{}: 0x{:08x} {}", i, frame.program_counter, location));
        }
        if lines.is_empty() {
            lines.push("*** NO STACK ***".to_string());
        }
        Ok(lines)
    }

    fn describe_addr(&self, addr: u32) -> String {
        let offset = match &self.target_info {
            Some(info) => addr.wrapping_sub(info.initial_pc),
            None => addr,
        };
        if let Some(program) = &self.program {
            if let Some(unit) = program.comp_unit_for_addr(offset) {
                if let Some(lineno) = program.line_for_addr(offset, Some(unit)) {
                    return format!("{}:{}", unit, lineno);
                }
                return format!("{}:?", unit);
            }
        }
        "???".to_string()
    }

    pub fn close(&mut self) {
        self.conn.close();
    }
}
