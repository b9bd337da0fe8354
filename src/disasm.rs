use crate::{*, error::*};
use capstone::prelude::*;

// Narrow contract around the disassembler: bytes + base address in, decoded
// instructions out. Nothing else in the crate talks to capstone directly, so
// swapping the engine means touching this file only.
pub struct DecodedInstr {
    pub address: u32,
    pub mnemonic: String,
    pub operands: String,
    pub size: usize,
}

fn build_engine() -> Result<Capstone> {
    Capstone::new()
        .m68k()
        .mode(arch::m68k::ArchMode::M68k020)
        .build()
        .map_err(|e| error!(Internal, "could not create disassembler: {}", e))
}

// Decodes up to max_instrs instructions. Stops early at the first byte sequence
// that is not a valid M68k instruction; callers render what they got.
pub fn disassemble(bytes: &[u8], base_addr: u32, max_instrs: usize) -> Result<Vec<DecodedInstr>> {
    let engine = build_engine()?;
    let insns = engine
        .disasm_all(bytes, base_addr as u64)
        .map_err(|e| error!(Internal, "disassembler failed at {:#010x}: {}", base_addr, e))?;
    let mut out = Vec::new();
    for insn in insns.iter().take(max_instrs) {
        out.push(DecodedInstr {
            address: insn.address() as u32,
            mnemonic: insn.mnemonic().unwrap_or("").to_string(),
            operands: insn.op_str().unwrap_or("").to_string(),
            size: insn.bytes().len(),
        });
    }
    Ok(out)
}

// Size in bytes of the single instruction at the start of the buffer. JSR alone
// has addressing-mode encodings from 2 to 8 bytes, so this cannot be a table.
pub fn first_instr_size(bytes: &[u8], base_addr: u32) -> Result<usize> {
    let instrs = disassemble(bytes, base_addr, 1)?;
    match instrs.first() {
        Some(instr) => Ok(instr.size),
        None => err!(Internal, "could not decode instruction at {:#010x}", base_addr),
    }
}
