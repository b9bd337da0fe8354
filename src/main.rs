// amidbg - a remote source-level debugger for AmigaOS/M68k targets.
//
// The host side: loads the Hunk executable with its STABS debug information,
// connects to the debug agent next to the target (emulator or real machine)
// and drives it over a SLIP-framed request/response protocol.
mod cli;
mod commands;
mod disasm;
mod error;
mod hunk;
mod log;
mod program;
mod protocol;
mod session;
mod slip;
mod stabs;
mod stack;
mod step;
mod syscalls;
mod target;
#[cfg(test)]
mod testutil;
mod transport;
mod util;

use crate::{cli::CliAction, error::*, program::Program, session::SessionState, syscalls::SyscallDb, transport::Transport};
use std::io::{BufRead, Write};
use std::path::PathBuf;

const USAGE: &str = "\
usage: amidbg [options] <executable>

  <executable>        Hunk executable to debug (with STABS debug information)
  -H, --host <host>   address of the debug agent (default 127.0.0.1)
  -P, --port <port>   TCP port of the debug agent (default 1234)
  --syscall-db <dir>  directory with the syscall database files (default syscalls)
  --no-tui            only print the status line after stops, no full views
  -v, --verbose       verbose protocol and debug-info logging
  --help              show this message
";

const BANNER: &str = r"
                 _     _ _
  __ _ _ __ ___ (_) __| | |__   __ _
 / _` | '_ ` _ \| |/ _` | '_ \ / _` |
| (_| | | | | | | | (_| | |_) | (_| |
 \__,_|_| |_| |_|_|\__,_|_.__/ \__, |
                               |___/
";

struct Options {
    prog: PathBuf,
    host: String,
    port: u16,
    syscall_db_dir: PathBuf,
    tui: bool,
    verbose: bool,
}

fn parse_args() -> Result<Options> {
    let mut prog = None;
    let mut host = "127.0.0.1".to_string();
    let mut port = 1234u16;
    let mut syscall_db_dir = PathBuf::from("syscalls");
    let mut tui = true;
    let mut verbose = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-H" | "--host" => {
                host = args.next().ok_or_else(|| error!(Usage, "missing value for {}", arg))?;
            }
            "-P" | "--port" => {
                let value = args.next().ok_or_else(|| error!(Usage, "missing value for {}", arg))?;
                port = value.parse().map_err(|_| error!(Usage, "invalid port '{}'", value))?;
            }
            "--syscall-db" => {
                syscall_db_dir = PathBuf::from(args.next().ok_or_else(|| error!(Usage, "missing value for {}", arg))?);
            }
            "--no-tui" => tui = false,
            "-v" | "--verbose" => verbose = true,
            "--help" => {
                print!("{}", USAGE);
                std::process::exit(0);
            }
            s if s.starts_with('-') => return err!(Usage, "unknown option '{}'", s),
            s => {
                if prog.replace(PathBuf::from(s)).is_some() {
                    return err!(Usage, "more than one executable given");
                }
            }
        }
    }
    match prog {
        None => err!(Usage, "no executable given"),
        Some(prog) => Ok(Options {prog, host, port, syscall_db_dir, tui, verbose}),
    }
}

fn load_program(path: &std::path::Path) -> Result<Program> {
    let blocks = hunk::read_exe_file(path)?;
    let debug_data = hunk::debug_section(&blocks)?;
    let program = stabs::program_from_stabs(debug_data)?;
    eprintln!("info: loaded debug information from '{}'", path.display());
    Ok(program)
}

// Full view set, printed after every stop unless --no-tui asked for quiet
// output. Views that cannot be rendered (no debug info, unreadable source)
// degrade to a note instead of failing the stop.
fn render_views(session: &mut SessionState) -> Result<()> {
    let sections: [(&str, Result<Vec<String>>); 5] = [
        ("Source code", session.source_view()),
        ("Disassembled code", session.disasm_view()),
        ("Registers", session.register_view()),
        ("Stack", session.stack_view()),
        ("Call stack", session.call_stack_view()),
    ];
    for (title, lines) in sections {
        println!("--- {} ---", title);
        match lines {
            Ok(lines) => {
                for line in lines {
                    println!("{}", line);
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => println!("*** NOT AVAILABLE *** ({})", e),
        }
    }
    Ok(())
}

fn event_loop(session: &mut SessionState, tui: bool) -> i32 {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => return 0, // EOF, same as quit without the protocol goodbye
            Ok(_) => (),
            Err(e) => {
                eprintln!("error: could not read command: {}", e);
                return 1;
            }
        }
        match cli::process_command(session, line.trim()) {
            Ok(CliAction::Continue) => (),
            Ok(CliAction::Quit) => return 0,
            Ok(CliAction::Redraw) => {
                if tui && session.target_is_running() {
                    if let Err(e) = render_views(session) {
                        eprintln!("error: {}", e);
                        return 1;
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                eprintln!("error: {}", e);
                return 1;
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }
}

fn run() -> i32 {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {}", e);
            eprint!("{}", USAGE);
            return 1;
        }
    };
    log::set_verbose(opts.verbose);
    println!("{}", BANNER);

    // A broken or missing debug section leaves us with a running session that
    // just cannot do source-level work; an unreadable executable is fatal.
    let program = match load_program(&opts.prog) {
        Ok(program) => Some(program),
        Err(e) if e.kind == ErrorKind::Environment => {
            eprintln!("error: {}", e);
            return 1;
        }
        Err(e) => {
            eprintln!("warning: {}", e);
            eprintln!("info: continuing without source-level debugging");
            None
        }
    };

    let syscall_db = match SyscallDb::load_dir(&opts.syscall_db_dir) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("warning: {}", e);
            eprintln!("info: continuing without syscall decoding");
            SyscallDb::empty()
        }
    };

    let conn = match Transport::connect(&opts.host, opts.port) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };
    let mut session = SessionState::new(conn, program, syscall_db);
    if let Err(e) = session.resolve_library_bases() {
        eprintln!("error: {}", e);
        session.close();
        return 1;
    }

    let code = event_loop(&mut session, opts.tui);
    session.close();
    code
}

fn main() {
    std::process::exit(run());
}
