use crate::{*, commands::*, error::*, session::*, target::*, util::*};

// Source-level stepping built from the three primitives the agent offers:
// single-step, one-shot breakpoints, and continue. The M68k exposes no
// step-over in hardware, so stepping over a call means planting a one-shot
// breakpoint right behind the JSR and continuing.

fn require_stopped_target(session: &SessionState) -> Result<()> {
    if !session.target_is_running() {
        return err!(StateViolation, "target is not running");
    }
    Ok(())
}

fn current_info(session: &SessionState) -> Result<TargetInfo> {
    match &session.target_info {
        Some(info) => Ok(info.clone()),
        None => err!(StateViolation, "target has not been run yet"),
    }
}

// Address range of the source line the target is stopped on, as offsets from
// the entry point. end == 0 means the line reaches to the end of its unit.
fn current_line_range(session: &SessionState) -> Result<(u32, u32)> {
    let info = current_info(session)?;
    let program = match &session.program {
        Some(program) => program,
        None => return err!(NoDebugInfo, "no program loaded, source-level stepping not available"),
    };
    let offset = info.pc_offset();
    let unit = match program.comp_unit_for_addr(offset) {
        Some(unit) => unit.to_string(),
        None => return err!(NoDebugInfo, "no debug information for address entry + {:#x}", offset),
    };
    let lineno = match program.line_for_addr(offset, Some(&unit)) {
        Some(lineno) => lineno,
        None => return err!(NoDebugInfo, "no line information for address entry + {:#x}", offset),
    };
    match program.addr_range_for_line(lineno, Some(&unit))? {
        Some(range) => Ok(range),
        None => err!(NoDebugInfo, "no address range recorded for line {}", lineno),
    }
}

fn in_range(offset: u32, lo: u32, hi: u32) -> bool {
    offset >= lo && (hi == 0 || offset < hi)
}

fn single_step(session: &mut SessionState) -> Result<()> {
    let cmd = ServerCommand::single_step().execute(&mut session.conn)?;
    session.update_target_info(cmd.target_info);
    Ok(())
}

// Plants a one-shot breakpoint right behind the call at the current PC and
// lets the target run into it.
fn run_over_call(session: &mut SessionState, info: &TargetInfo) -> Result<()> {
    let call_size = info.bytes_used_by_jsr()? as u32;
    ServerCommand::set_bpoint(info.pc_offset() + call_size, true).execute(&mut session.conn)?;
    let cmd = ServerCommand::cont().execute(&mut session.conn)?;
    session.update_target_info(cmd.target_info);
    Ok(())
}

// stepi: one instruction, into calls.
pub fn step_instruction(session: &mut SessionState) -> Result<()> {
    require_stopped_target(session)?;
    single_step(session)
}

// nexti: one instruction, over calls.
pub fn next_instruction(session: &mut SessionState) -> Result<()> {
    require_stopped_target(session)?;
    let info = current_info(session)?;
    if info.next_instr_is_jsr() {
        run_over_call(session, &info)
    } else {
        single_step(session)
    }
}

// next: run to the next source line, stepping over calls. RTS mid-line means
// the line ended by returning into the caller, whose own line still has to
// finish; recursing handles that with the caller's range.
pub fn next_line(session: &mut SessionState) -> Result<()> {
    require_stopped_target(session)?;
    let (lo, hi) = current_line_range(session)?;
    loop {
        let info = current_info(session)?;
        if !info.is_running() || !in_range(info.pc_offset(), lo, hi) {
            return Ok(());
        }
        if info.next_instr_is_jsr() {
            run_over_call(session, &info)?;
        } else if info.next_instr_is_rts() {
            single_step(session)?;
            if session.target_is_running() {
                return next_line(session);
            }
            return Ok(());
        } else {
            single_step(session)?;
        }
    }
}

// step: run to the next source line, into calls. Single-steps until the PC
// leaves the current line's range; if that left us back in the caller's frame
// mid-line (the line ended in RTS), the caller's line finishes the same way.
pub fn step_line(session: &mut SessionState) -> Result<()> {
    require_stopped_target(session)?;
    let (lo, hi) = current_line_range(session)?;
    let start_info = current_info(session)?;
    let caller_frame_ptr = peek_caller_frame_ptr(session, start_info.task_context.reg_a[5]);
    loop {
        single_step(session)?;
        let info = current_info(session)?;
        if !info.is_running() {
            return Ok(());
        }
        if !in_range(info.pc_offset(), lo, hi) {
            break;
        }
    }
    if let Some(caller_fp) = caller_frame_ptr {
        let info = current_info(session)?;
        if info.task_context.reg_a[5] == caller_fp {
            return step_line(session);
        }
    }
    Ok(())
}

// First dword of the current frame is the caller's frame pointer. Unreadable or
// absent frames just disable the returned-into-caller check.
fn peek_caller_frame_ptr(session: &mut SessionState, frame_ptr: u32) -> Option<u32> {
    if frame_ptr == 0xffff_ffff {
        return None;
    }
    match ServerCommand::peek_mem(frame_ptr, 4).execute(&mut session.conn) {
        Ok(cmd) if cmd.memory().len() >= 4 => Some(get_u32_be(cmd.memory())),
        _ => None,
    }
}
