use crate::{*, disasm::*, error::*, protocol::*, util::*};
use bitflags::bitflags;

// Layout constants shared with the agent's target.h.
pub const NUM_NEXT_INSTRUCTIONS: usize = 8;
pub const MAX_INSTR_BYTES: usize = 8;
pub const NUM_TOP_STACK_DWORDS: usize = 8;
pub const TARGET_INFO_SIZE: usize = 204;

bitflags! {
    // Target lifecycle bits. A stopped target keeps RUNNING set next to its stop
    // reason; EXITED / KILLED / ERROR stand alone.
    pub struct TargetState: u32 {
        const RUNNING                    = 1;
        const SINGLE_STEPPING            = 2;
        const EXITED                     = 4;
        const KILLED                     = 8;
        const STOPPED_BY_BPOINT          = 16;
        const STOPPED_BY_ONE_SHOT_BPOINT = 32;
        const STOPPED_BY_SINGLE_STEP     = 64;
        const STOPPED_BY_EXCEPTION       = 128;
        const ERROR                      = 65536;
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TaskContext {
    pub reg_sp: u32,
    pub exc_num: u32,
    pub reg_sr: u16,
    pub reg_pc: u32,
    pub reg_d: [u32; 8],
    pub reg_a: [u32; 7], // A7 is reg_sp
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BreakpointInfo {
    pub num: u32,
    pub address: u32,
    pub opcode: u16, // original instruction word saved under the trap
    pub hit_count: u32,
}

// Snapshot the agent ships with every stop notification, packed big-endian.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TargetInfo {
    pub initial_pc: u32,
    pub initial_sp: u32,
    pub task_context: TaskContext,
    pub target_state: TargetState,
    pub exit_code: u32,
    pub error_code: u32,
    pub next_instr_bytes: [u8; NUM_NEXT_INSTRUCTIONS * MAX_INSTR_BYTES],
    pub top_stack_dwords: [u32; NUM_TOP_STACK_DWORDS],
    pub bpoint: BreakpointInfo,
}

impl TargetInfo {
    pub fn decode(data: &[u8]) -> Result<TargetInfo> {
        if data.len() < TARGET_INFO_SIZE {
            return err!(Protocol, "target info payload of {} bytes, expected {}", data.len(), TARGET_INFO_SIZE);
        }
        let mut r = ByteReader::new(data, ErrorKind::Protocol);
        let initial_pc = r.u32()?;
        let initial_sp = r.u32()?;
        let reg_sp = r.u32()?;
        let exc_num = r.u32()?;
        let reg_sr = r.u16()?;
        let reg_pc = r.u32()?;
        let mut reg_d = [0u32; 8];
        for d in reg_d.iter_mut() {
            *d = r.u32()?;
        }
        let mut reg_a = [0u32; 7];
        for a in reg_a.iter_mut() {
            *a = r.u32()?;
        }
        let target_state = TargetState::from_bits_truncate(r.u32()?);
        let exit_code = r.u32()?;
        let error_code = r.u32()?;
        let mut next_instr_bytes = [0u8; NUM_NEXT_INSTRUCTIONS * MAX_INSTR_BYTES];
        next_instr_bytes.copy_from_slice(r.bytes(NUM_NEXT_INSTRUCTIONS * MAX_INSTR_BYTES)?);
        let mut top_stack_dwords = [0u32; NUM_TOP_STACK_DWORDS];
        for d in top_stack_dwords.iter_mut() {
            *d = r.u32()?;
        }
        let bpoint = BreakpointInfo {num: r.u32()?, address: r.u32()?, opcode: r.u16()?, hit_count: r.u32()?};
        Ok(TargetInfo {
            initial_pc,
            initial_sp,
            task_context: TaskContext {reg_sp, exc_num, reg_sr, reg_pc, reg_d, reg_a},
            target_state,
            exit_code,
            error_code,
            next_instr_bytes,
            top_stack_dwords,
            bpoint,
        })
    }

    // Running means the process exists and can be continued / stepped / killed.
    pub fn is_running(&self) -> bool {
        self.target_state.contains(TargetState::RUNNING)
            && !self.target_state.intersects(TargetState::EXITED | TargetState::KILLED | TargetState::ERROR)
    }

    // Current PC as an offset from the entry point, the address space all debug
    // info lives in.
    pub fn pc_offset(&self) -> u32 {
        self.task_context.reg_pc.wrapping_sub(self.initial_pc)
    }

    // JSR has opcode 0100 1110 10 <ea>; the low six bits select the addressing mode.
    pub fn next_instr_is_jsr(&self) -> bool {
        (get_u16_be(&self.next_instr_bytes) & 0xffc0) == 0x4e80
    }

    pub fn next_instr_is_rts(&self) -> bool {
        get_u16_be(&self.next_instr_bytes) == 0x4e75
    }

    // Library calls are JSR d16(A6): A6 holds the library base, d16 the negative
    // offset of the jump-table entry.
    pub fn next_instr_is_syscall(&self) -> bool {
        get_u16_be(&self.next_instr_bytes) == 0x4eae
    }

    // Signed displacement of the JSR d16(A6) form. Syscall tables index by the
    // absolute value, which is how the offsets appear in the pragma files.
    pub fn syscall_offset(&self) -> i16 {
        get_i16_be(&self.next_instr_bytes[2..4])
    }

    // Valid only when the next instruction is a JSR; the addressing mode decides
    // the instruction length, so ask the disassembler.
    pub fn bytes_used_by_jsr(&self) -> Result<usize> {
        first_instr_size(&self.next_instr_bytes, self.task_context.reg_pc)
    }

    pub fn register_value(&self, reg: u8) -> u32 {
        // 0..7 = D0..D7, 8..14 = A0..A6, 15 = A7 alias for SP
        match reg {
            0..=7 => self.task_context.reg_d[reg as usize],
            8..=14 => self.task_context.reg_a[reg as usize - 8],
            _ => self.task_context.reg_sp,
        }
    }

    pub fn status_line(&self) -> String {
        let state = self.target_state;
        if state.contains(TargetState::STOPPED_BY_BPOINT) {
            format!(
                "Hit breakpoint #{} at entry + {:#x}, hit count = {}",
                self.bpoint.num,
                self.bpoint.address.wrapping_sub(self.initial_pc),
                self.bpoint.hit_count
            )
        } else if state.contains(TargetState::STOPPED_BY_ONE_SHOT_BPOINT) {
            format!(
                "Hit one-shot breakpoint #{} at entry + {:#x}",
                self.bpoint.num,
                self.bpoint.address.wrapping_sub(self.initial_pc)
            )
        } else if state.contains(TargetState::STOPPED_BY_SINGLE_STEP) {
            "Stopped after single-stepping".to_string()
        } else if state.contains(TargetState::STOPPED_BY_EXCEPTION) {
            format!("Stopped by exception #{}", self.task_context.exc_num)
        } else if state == TargetState::EXITED {
            format!("Exited with code {}", self.exit_code)
        } else if state == TargetState::KILLED {
            "Killed".to_string()
        } else if state == TargetState::ERROR {
            format!("Error {} occurred", error_code_name(self.error_code))
        } else {
            format!("Stopped with unexpected state {:#x}", state.bits())
        }
    }

    // A0..A6 left column, D0..D7 right, A7 shown as the stack pointer.
    pub fn register_view(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(8);
        for i in 0..7 {
            lines.push(format!("A{}=0x{:08x}        D{}=0x{:08x}", i, self.task_context.reg_a[i], i, self.task_context.reg_d[i]));
        }
        lines.push(format!("A7=0x{:08x}        D7=0x{:08x}", self.task_context.reg_sp, self.task_context.reg_d[7]));
        lines
    }

    pub fn stack_view(&self) -> Vec<String> {
        (0..NUM_TOP_STACK_DWORDS)
            .map(|i| format!("SP + {:02}:    0x{:08x}", i * 4, self.top_stack_dwords[i]))
            .collect()
    }

    // Up to 8 instructions from PC. Annotation lines (a resolved syscall signature)
    // are inserted after the first instruction, indented past the address column.
    pub fn disasm_view(&self, annotation: &[String]) -> Vec<String> {
        let instrs = match disassemble(&self.next_instr_bytes, self.task_context.reg_pc, NUM_NEXT_INSTRUCTIONS) {
            Ok(instrs) if !instrs.is_empty() => instrs,
            _ => return vec!["*** NOT AVAILABLE ***".to_string()],
        };
        let mut lines = Vec::new();
        for (idx, instr) in instrs.iter().enumerate() {
            let addr_col = format!("0x{:08x} (PC + {:04}):    ", instr.address, instr.address - self.task_context.reg_pc);
            let indent = addr_col.len();
            lines.push(format!("{}{:<10}{}", addr_col, instr.mnemonic, instr.operands));
            if idx == 0 {
                for a in annotation {
                    lines.push(format!("{:indent$}{}", "", a, indent = indent));
                }
            }
        }
        lines
    }
}
