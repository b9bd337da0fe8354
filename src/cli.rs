use crate::{*, commands::*, disasm, error::*, protocol::*, session::*, step, util::*};

// What the event loop should do after a command: keep reading, redraw the
// views because the target state changed, or tear the session down.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CliAction {
    Continue,
    Redraw,
    Quit,
}

pub const HELP: &str = "\
Available commands:

h,  help                          -- show this help message
r,  run                           -- run the target
c,  continue                      -- continue the target after a breakpoint
k,  kill                          -- kill the running target
q,  quit                          -- quit the debugger
si, stepi                         -- step one instruction
ni, nexti                         -- step one instruction, over JSR
s,  step                          -- step one source line
n,  next                          -- step one source line, over function calls
b,  break 0x<offset>|<line>|<function>
                                  -- set a breakpoint
d,  delete <number>               -- delete a breakpoint by number
bt, backtrace                     -- print the call stack
di, disassemble <address> <n>     -- disassemble n instructions (n <= 32)
hx, hexdump <address> <size>      -- dump memory as hex and ASCII
x,  examine <format> <address>    -- decode memory, format = comma list of
                                     u8, u16, u32, i8, i16, i32, s
i,  inspect d|r|s|c               -- show disassembly / registers / stack / source
";

pub fn process_command(session: &mut SessionState, line: &str) -> Result<CliAction> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (&command, args) = match tokens.split_first() {
        None => return Ok(CliAction::Continue),
        Some(parts) => parts,
    };
    match command {
        "help" | "h" => {
            println!("{}", HELP);
            Ok(CliAction::Continue)
        }
        "run" | "r" => cmd_run(session),
        "continue" | "c" | "cont" => cmd_continue(session),
        "kill" | "k" => cmd_kill(session),
        "quit" | "q" => cmd_quit(session),
        "stepi" | "si" => cmd_step(session, step::step_instruction),
        "nexti" | "ni" => cmd_step(session, step::next_instruction),
        "step" | "s" => cmd_step(session, step::step_line),
        "next" | "n" => cmd_step(session, step::next_line),
        "break" | "b" => cmd_break(session, args),
        "delete" | "d" | "del" => cmd_delete(session, args),
        "backtrace" | "bt" => cmd_backtrace(session),
        "disassemble" | "di" | "dis" => cmd_disassemble(session, args),
        "hexdump" | "hx" => cmd_hexdump(session, args),
        "examine" | "x" => cmd_examine(session, args),
        "inspect" | "i" => cmd_inspect(session, args),
        _ => err!(Usage, "unknown command '{}', try 'help'", command),
    }
}

fn cmd_run(session: &mut SessionState) -> Result<CliAction> {
    if session.target_is_running() {
        return err!(StateViolation, "target is already running");
    }
    let cmd = ServerCommand::run().execute(&mut session.conn)?;
    session.update_target_info(cmd.target_info);
    println!("{}", session.status_line());
    Ok(CliAction::Redraw)
}

fn cmd_continue(session: &mut SessionState) -> Result<CliAction> {
    if !session.target_is_running() {
        return err!(StateViolation, "target is not running");
    }
    let cmd = ServerCommand::cont().execute(&mut session.conn)?;
    session.update_target_info(cmd.target_info);
    println!("{}", session.status_line());
    Ok(CliAction::Redraw)
}

fn cmd_kill(session: &mut SessionState) -> Result<CliAction> {
    if !session.target_is_running() {
        return err!(StateViolation, "target is not running");
    }
    let cmd = ServerCommand::kill().execute(&mut session.conn)?;
    session.update_target_info(cmd.target_info);
    println!("{}", session.status_line());
    Ok(CliAction::Redraw)
}

fn cmd_quit(session: &mut SessionState) -> Result<CliAction> {
    if session.target_is_running() {
        return err!(StateViolation, "target is running, kill it first");
    }
    ServerCommand::quit().execute(&mut session.conn)?;
    Ok(CliAction::Quit)
}

// Stepping failures keep the session alive; the target info from the last
// successful exchange stays current.
fn cmd_step(session: &mut SessionState, step_fn: fn(&mut SessionState) -> Result<()>) -> Result<CliAction> {
    step_fn(session).map_err(|e| {
        if e.is_fatal() {
            e
        } else {
            Error::new(e.kind.clone(), format!("Stepping failed: {}", e))
        }
    })?;
    println!("{}", session.status_line());
    Ok(CliAction::Redraw)
}

// break accepts an entry-relative hex offset, a decimal source line, or a
// function name.
fn cmd_break(session: &mut SessionState, args: &[&str]) -> Result<CliAction> {
    let location = match args {
        [location] => *location,
        _ => return err!(Usage, "usage: break <0x-offset | line | function>"),
    };
    let offset = parse_break_location(session, location)?;
    ServerCommand::set_bpoint(offset, false).execute(&mut session.conn)?;
    println!("Breakpoint set at entry + {:#x}", offset);
    Ok(CliAction::Continue)
}

fn parse_break_location(session: &SessionState, location: &str) -> Result<u32> {
    if let Some(hex) = location.strip_prefix("0x").or_else(|| location.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).map_err(|_| error!(Usage, "invalid offset '{}'", location));
    }
    let program = match &session.program {
        Some(program) => program,
        None => return err!(NoDebugInfo, "no program loaded, breakpoints only by 0x-offset"),
    };
    if location.chars().all(|c| c.is_ascii_digit()) {
        let lineno: u32 = location.parse().map_err(|_| error!(Usage, "invalid line number '{}'", location))?;
        return match program.addr_range_for_line(lineno, None)? {
            Some((start, _)) => Ok(start),
            None => err!(NoDebugInfo, "no code at line {}", lineno),
        };
    }
    match program.addr_range_for_function(location) {
        Some((start, _)) => Ok(start),
        None => err!(NoDebugInfo, "no function '{}' in the loaded program", location),
    }
}

fn cmd_delete(session: &mut SessionState, args: &[&str]) -> Result<CliAction> {
    let num: u32 = match args {
        [num] => num.parse().map_err(|_| error!(Usage, "invalid breakpoint number '{}'", num))?,
        _ => return err!(Usage, "usage: delete <number>"),
    };
    ServerCommand::clear_bpoint(num).execute(&mut session.conn)?;
    println!("Breakpoint #{} cleared", num);
    Ok(CliAction::Continue)
}

fn cmd_backtrace(session: &mut SessionState) -> Result<CliAction> {
    for line in session.call_stack_view()? {
        println!("{}", line);
    }
    Ok(CliAction::Continue)
}

fn cmd_disassemble(session: &mut SessionState, args: &[&str]) -> Result<CliAction> {
    let (address, count) = match args {
        [address, count] => (parse_u32(address)?, parse_u32(count)? as usize),
        _ => return err!(Usage, "usage: disassemble <address> <n>"),
    };
    if count == 0 || count > 32 {
        return err!(Usage, "instruction count must be between 1 and 32");
    }
    let bytes = peek_mem_chunked(session, address, count * 8)?;
    for instr in disasm::disassemble(&bytes, address, count)? {
        println!("0x{:08x}:    {:<10}{}", instr.address, instr.mnemonic, instr.operands);
    }
    Ok(CliAction::Continue)
}

fn cmd_hexdump(session: &mut SessionState, args: &[&str]) -> Result<CliAction> {
    let (address, size) = match args {
        [address, size] => (parse_u32(address)?, parse_u32(size)? as usize),
        _ => return err!(Usage, "usage: hexdump <address> <size>"),
    };
    let bytes = peek_mem_chunked(session, address, size)?;
    for (i, row) in bytes.chunks(16).enumerate() {
        println!("{}", hexdump_row(address + (i * 16) as u32, row));
    }
    Ok(CliAction::Continue)
}

fn cmd_examine(session: &mut SessionState, args: &[&str]) -> Result<CliAction> {
    let (format, address) = match args {
        [format, address] => (*format, parse_u32(address)?),
        _ => return err!(Usage, "usage: examine <format> <address>"),
    };
    let mut addr = address;
    for item in format.split(',') {
        let rendered = match item {
            "u8" => format!("{}", peek_scalar(session, addr, 1)? as u8),
            "u16" => format!("{}", peek_scalar(session, addr, 2)? as u16),
            "u32" => format!("{}", peek_scalar(session, addr, 4)?),
            "i8" => format!("{}", peek_scalar(session, addr, 1)? as u8 as i8),
            "i16" => format!("{}", peek_scalar(session, addr, 2)? as u16 as i16),
            "i32" => format!("{}", peek_scalar(session, addr, 4)? as i32),
            "s" => {
                let bytes = peek_mem_chunked(session, addr, MAX_MSG_DATA_LEN)?;
                let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                let s = String::from_utf8_lossy(&bytes[..len]).into_owned();
                println!("0x{:08x}: s = \"{}\"", addr, s);
                addr += len as u32 + 1;
                continue;
            }
            other => return err!(Usage, "unknown format item '{}'", other),
        };
        let size = match item {
            "u8" | "i8" => 1u32,
            "u16" | "i16" => 2,
            _ => 4,
        };
        println!("0x{:08x}: {} = {}", addr, item, rendered);
        addr += size;
    }
    Ok(CliAction::Continue)
}

fn cmd_inspect(session: &mut SessionState, args: &[&str]) -> Result<CliAction> {
    let what = match args {
        [what] => *what,
        _ => return err!(Usage, "usage: inspect d|r|s|c"),
    };
    let lines = match what {
        "d" => session.disasm_view()?,
        "r" => session.register_view()?,
        "s" => session.stack_view()?,
        "c" => session.source_view()?,
        _ => return err!(Usage, "unknown view '{}', expected d, r, s or c", what),
    };
    for line in lines {
        println!("{}", line);
    }
    Ok(CliAction::Continue)
}

fn parse_u32(s: &str) -> Result<u32> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| error!(Usage, "invalid number '{}'", s))
}

fn peek_scalar(session: &mut SessionState, address: u32, size: usize) -> Result<u32> {
    let bytes = peek_mem_chunked(session, address, size)?;
    let mut value = 0u32;
    for b in bytes {
        value = (value << 8) | b as u32;
    }
    Ok(value)
}

// One PEEK_MEM reply carries at most 255 bytes; larger reads are stitched from
// consecutive exchanges.
fn peek_mem_chunked(session: &mut SessionState, address: u32, len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut addr = address;
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(MAX_MSG_DATA_LEN);
        let cmd = ServerCommand::peek_mem(addr, chunk as u16).execute(&mut session.conn)?;
        if cmd.memory().len() != chunk {
            return err!(Protocol, "peek of {} bytes at {:#010x} returned {} bytes", chunk, addr, cmd.memory().len());
        }
        out.extend_from_slice(cmd.memory());
        addr = addr.wrapping_add(chunk as u32);
        remaining -= chunk;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::{cli::*, error::ErrorKind, program::*, protocol::MsgType, session::*, syscalls::SyscallDb, target::TargetInfo, testutil::*, transport::Transport};
    use std::collections::BTreeMap;

    fn test_program() -> Program {
        let mut root = ProgramNode::new(NodeTag::Root, String::new());
        let mut unit = ProgramNode::new(NodeTag::CompUnit, "t.c".to_string());
        unit.start_addr = 0;
        unit.end_addr = 0;
        let mut main = ProgramNode::new(NodeTag::Function, "main".to_string());
        main.start_addr = 0x100;
        main.end_addr = 0x1a8;
        unit.children.push(main);
        root.children.push(unit);
        let mut index = LineIndex::default();
        index.ranges.push(LineRange {lineno: 22, start: 0x17c, end: 0x18c});
        let mut indices = BTreeMap::new();
        indices.insert("t.c".to_string(), index);
        Program {root, line_indices: indices, type_defs: Vec::new()}
    }

    fn session(port: u16) -> SessionState {
        let conn = Transport::connect("127.0.0.1", port).unwrap();
        SessionState::new(conn, Some(test_program()), SyscallDb::empty())
    }

    #[test]
    fn parse_numbers() {
        assert_eq!(parse_u32("0x24").unwrap(), 0x24);
        assert_eq!(parse_u32("0X1A").unwrap(), 0x1a);
        assert_eq!(parse_u32("100").unwrap(), 100);
        assert!(parse_u32("zzz").is_err());
    }

    #[test]
    fn break_locations() {
        let (port, agent) = spawn_agent(|conn| {
            for expected_offset in [0x24u32, 0x17c, 0x100] {
                let data = conn.expect(MsgType::SetBpoint);
                assert_eq!(&data[0..4], expected_offset.to_be_bytes());
                assert_eq!(&data[4..6], [0, 0]); // not one-shot
                conn.ack(&[]);
            }
        });
        let mut s = session(port);
        assert_eq!(process_command(&mut s, "break 0x24").unwrap(), CliAction::Continue);
        assert_eq!(process_command(&mut s, "b 22").unwrap(), CliAction::Continue); // line 22
        assert_eq!(process_command(&mut s, "b main").unwrap(), CliAction::Continue);
        assert!(process_command(&mut s, "b nothere").is_err());
        assert!(process_command(&mut s, "b").is_err());
        agent.join().unwrap();
    }

    #[test]
    fn state_checks() {
        let (port, agent) = spawn_agent(|_conn| {});
        let mut s = session(port);
        // Nothing has run yet: continue / kill refuse, run is allowed (but we
        // don't issue it here to keep the agent script empty).
        assert_eq!(process_command(&mut s, "continue").unwrap_err().kind, ErrorKind::StateViolation);
        assert_eq!(process_command(&mut s, "kill").unwrap_err().kind, ErrorKind::StateViolation);

        // Pretend the target is stopped at a breakpoint: run must refuse.
        let spec = TargetInfoSpec::default();
        s.target_info = Some(TargetInfo::decode(&encode_target_info(&spec)).unwrap());
        assert_eq!(process_command(&mut s, "run").unwrap_err().kind, ErrorKind::StateViolation);
        assert_eq!(process_command(&mut s, "quit").unwrap_err().kind, ErrorKind::StateViolation);
        agent.join().unwrap();
    }

    #[test]
    fn quit_sends_quit() {
        let (port, agent) = spawn_agent(|conn| {
            conn.expect(MsgType::Quit);
            conn.ack(&[]);
        });
        let mut s = session(port);
        assert_eq!(process_command(&mut s, "quit").unwrap(), CliAction::Quit);
        agent.join().unwrap();
    }

    #[test]
    fn unknown_command() {
        let (port, agent) = spawn_agent(|_conn| {});
        let mut s = session(port);
        assert_eq!(process_command(&mut s, "frobnicate").unwrap_err().kind, ErrorKind::Usage);
        assert_eq!(process_command(&mut s, "").unwrap(), CliAction::Continue);
        agent.join().unwrap();
    }

    #[test]
    fn hexdump_chunks_large_reads() {
        let (port, agent) = spawn_agent(|conn| {
            // 300 bytes arrive as 255 + 45.
            let data = conn.expect(MsgType::PeekMem);
            assert_eq!(&data[4..6], 255u16.to_be_bytes());
            conn.ack(&[0xaa; 255]);
            let data = conn.expect(MsgType::PeekMem);
            assert_eq!(&data[0..4], 0x10000u32.wrapping_add(255).to_be_bytes());
            assert_eq!(&data[4..6], 45u16.to_be_bytes());
            conn.ack(&[0xbb; 45]);
        });
        let mut s = session(port);
        assert_eq!(process_command(&mut s, "hexdump 0x10000 300").unwrap(), CliAction::Continue);
        agent.join().unwrap();
    }
}
