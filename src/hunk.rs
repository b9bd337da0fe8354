use crate::{*, error::*, util::*};
use std::collections::BTreeMap;
use std::path::Path;

// Block types from dos/doshunks.h. Only the types a plain loadable executable
// can contain are parsed; the overlay / library machinery is rejected by name.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum BlockType {
    Unit,    // 999
    Name,    // 1000
    Code,    // 1001
    Data,    // 1002
    Bss,     // 1003
    Reloc32, // 1004
    Ext,     // 1007
    Symbol,  // 1008
    Debug,   // 1009
    End,     // 1010
    Header,  // 1011
}

impl BlockType {
    fn from_u32(tag: u32) -> Result<BlockType> {
        match tag {
            999 => Ok(Self::Unit),
            1000 => Ok(Self::Name),
            1001 => Ok(Self::Code),
            1002 => Ok(Self::Data),
            1003 => Ok(Self::Bss),
            1004 => Ok(Self::Reloc32),
            1007 => Ok(Self::Ext),
            1008 => Ok(Self::Symbol),
            1009 => Ok(Self::Debug),
            1010 => Ok(Self::End),
            1011 => Ok(Self::Header),
            1005 | 1006 | 1013..=1019 => err!(DebugInfoMalformed, "block type {} not supported", tag),
            _ => err!(DebugInfoMalformed, "unknown block type {}", tag),
        }
    }
}

// Symbol sub-types carried in the high byte of HUNK_EXT length words.
pub mod symbol_types {
    pub const EXT_SYMB: u8 = 0;
    pub const EXT_DEF: u8 = 1;
    pub const EXT_ABS: u8 = 2;
    pub const EXT_RES: u8 = 3;
    pub const EXT_REF32: u8 = 129;
    pub const EXT_COMMON: u8 = 130;
    pub const EXT_REF16: u8 = 131;
    pub const EXT_REF8: u8 = 132;
}

pub fn read_exe_file(path: &Path) -> Result<BTreeMap<BlockType, Vec<u8>>> {
    let data = std::fs::read(path)
        .map_err(|e| error!(Environment, "could not read executable '{}': {}", path.display(), e))?;
    read_exe(&data)
}

// Walks the block stream and returns content by block type. A file may contain
// several hunks, each closed by HUNK_END; EOF is only clean right after one.
pub fn read_exe(data: &[u8]) -> Result<BTreeMap<BlockType, Vec<u8>>> {
    let mut r = ByteReader::new(data, ErrorKind::DebugInfoMalformed);
    let mut blocks = BTreeMap::new();
    let mut hunk_num = 0usize;
    let mut last_block = None;
    while !r.is_empty() {
        let block_type = BlockType::from_u32(r.u32()?)?;
        verbose_log!("reading hunk #{}, {:?} block", hunk_num, block_type);
        last_block = Some(block_type);
        if block_type == BlockType::End {
            hunk_num += 1;
            continue;
        }
        let content = read_block(block_type, &mut r)?;
        blocks.insert(block_type, content);
    }
    if last_block != Some(BlockType::End) {
        return err!(DebugInfoMalformed, "unexpected end of file in hunk #{}", hunk_num);
    }
    Ok(blocks)
}

fn read_block(block_type: BlockType, r: &mut ByteReader) -> Result<Vec<u8>> {
    match block_type {
        BlockType::Header => read_header_block(r),
        BlockType::Unit | BlockType::Name | BlockType::Code | BlockType::Data | BlockType::Debug => {
            let nwords = r.u32()? as usize;
            Ok(r.bytes(nwords * 4)?.to_vec())
        }
        BlockType::Bss => {
            // Size only, no payload in the file.
            Ok(r.u32()?.to_be_bytes().to_vec())
        }
        BlockType::Ext => read_ext_block(r),
        BlockType::Symbol => read_symbol_block(r),
        BlockType::Reloc32 => read_reloc32_block(r),
        BlockType::End => unreachable!(),
    }
}

fn read_header_block(r: &mut ByteReader) -> Result<Vec<u8>> {
    let reserved = r.u32()?;
    verbose_log!("long words reserved for resident libraries: {}", reserved);
    let num_hunks = r.u32()?;
    let first_hunk = r.u32()?;
    let last_hunk = r.u32()?;
    verbose_log!("number of hunks: {} (first = {}, last = {})", num_hunks, first_hunk, last_hunk);
    if last_hunk < first_hunk {
        return err!(DebugInfoMalformed, "header block with last hunk {} before first hunk {}", last_hunk, first_hunk);
    }
    let mut content = Vec::new();
    for hunk_num in first_hunk..=last_hunk {
        let size = r.u32()?;
        verbose_log!("size (in bytes) of hunk #{}: {}", hunk_num, size * 4);
        content.extend_from_slice(&size.to_be_bytes());
    }
    Ok(content)
}

// List of symbol records terminated by a zero word; the high byte of each length
// word is the symbol type, the low 24 bits the name length in long words.
fn read_ext_block(r: &mut ByteReader) -> Result<Vec<u8>> {
    let start = r.pos();
    loop {
        let type_len = r.u32()?;
        if type_len == 0 {
            break;
        }
        let sym_type = (type_len >> 24) as u8;
        let name_bytes = r.bytes(((type_len & 0x00ff_ffff) as usize) * 4)?;
        let sym_name = String::from_utf8_lossy(name_bytes).trim_end_matches('\0').to_string();
        match sym_type {
            symbol_types::EXT_DEF | symbol_types::EXT_ABS | symbol_types::EXT_RES => {
                let value = r.u32()?;
                verbose_log!("definition of symbol (type = {}): {} = {:#x}", sym_type, sym_name, value);
            }
            symbol_types::EXT_REF8 | symbol_types::EXT_REF16 | symbol_types::EXT_REF32 => {
                let nrefs = r.u32()? as usize;
                for _ in 0..nrefs {
                    let position = r.u32()?;
                    verbose_log!("reference to symbol {} (type = {}): {:#x}", sym_name, sym_type, position);
                }
            }
            // EXT_SYMB and EXT_COMMON never appear in linked executables.
            t => return err!(DebugInfoMalformed, "symbol type {} not supported", t),
        }
    }
    Ok(r_slice(r, start))
}

// (name, value) pairs terminated by a zero word.
fn read_symbol_block(r: &mut ByteReader) -> Result<Vec<u8>> {
    let start = r.pos();
    loop {
        let nwords = r.u32()? as usize;
        if nwords == 0 {
            break;
        }
        let name_bytes = r.bytes(nwords * 4)?;
        let sym_name = String::from_utf8_lossy(name_bytes).trim_end_matches('\0').to_string();
        let value = r.u32()?;
        verbose_log!("symbol {} = {:#010x}", sym_name, value);
    }
    Ok(r_slice(r, start))
}

// Relocation groups (count, referenced hunk, count offsets), zero-terminated.
fn read_reloc32_block(r: &mut ByteReader) -> Result<Vec<u8>> {
    let start = r.pos();
    loop {
        let noffsets = r.u32()? as usize;
        if noffsets == 0 {
            break;
        }
        let ref_hunk = r.u32()?;
        verbose_log!("{} relocations referencing hunk #{}", noffsets, ref_hunk);
        r.bytes(noffsets * 4)?;
    }
    Ok(r_slice(r, start))
}

fn r_slice(r: &ByteReader, start: usize) -> Vec<u8> {
    r.consumed_since(start).to_vec()
}

// The debug section, provided it actually holds STABS. SAS/C and VBCC write a
// bare line table marked "LINE" instead, which carries no scope or type
// information and is useless for source-level debugging.
pub fn debug_section(blocks: &BTreeMap<BlockType, Vec<u8>>) -> Result<&[u8]> {
    let data = match blocks.get(&BlockType::Debug) {
        None => return err!(NoDebugInfo, "executable contains no debug information"),
        Some(data) => data,
    };
    if data.len() >= 8 && &data[4..8] == b"LINE" {
        return err!(NoDebugInfo, "debug information is in the LINE format (SAS/C or VBCC), not STABS");
    }
    Ok(data)
}
