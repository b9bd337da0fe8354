use crate::{*, commands::*, error::*, target::*, transport::*, util::*};

// Frames past this count mean we are walking garbage, not a call chain.
const MAX_FRAMES: usize = 64;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StackFrame {
    pub frame_ptr: u32,
    pub program_counter: u32,
    pub return_addr: u32,
}

// Walks the linked list of stack frames anchored at A5. Each frame stores the
// previous frame pointer at offset 0 and the return address at offset 4; both
// are fetched with a single peek per frame. The chain ends at the 0xFFFFFFFF
// the startup code plants in the initial frame.
//
// Functions compiled without a LINK frame are invisible to this walk; no
// heuristic unwinding is attempted.
pub fn walk_call_stack(info: &TargetInfo, conn: &mut Transport) -> Result<Vec<StackFrame>> {
    let mut frames = Vec::new();
    let mut frame_ptr = info.task_context.reg_a[5];
    let mut program_counter = info.task_context.reg_pc;
    while frame_ptr != 0xffff_ffff {
        if frames.len() >= MAX_FRAMES {
            eprintln!("warning: call stack exceeds {} frames, giving up on the walk", MAX_FRAMES);
            break;
        }
        let cmd = ServerCommand::peek_mem(frame_ptr, 8).execute(conn).map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                Error::new(e.kind.clone(), format!("getting return address / previous frame pointer failed: {}", e))
            }
        })?;
        let mem = cmd.memory();
        if mem.len() < 8 {
            return err!(Protocol, "peek of 8 bytes at {:#010x} returned {} bytes", frame_ptr, mem.len());
        }
        let prev_frame_ptr = get_u32_be(&mem[0..4]);
        let return_addr = get_u32_be(&mem[4..8]);
        frames.push(StackFrame {frame_ptr, program_counter, return_addr});
        frame_ptr = prev_frame_ptr;
        program_counter = return_addr;
    }
    Ok(frames)
}
