use crate::{*, error::*, protocol::*, target::*, transport::*, util::*};

// One agent command: a message type, serialized arguments, and the fields the
// exchange fills in. execute() runs the whole request/reply conversation,
// including the out-of-band stop notification for commands that let the target
// run; the transport below it never looks past raw bytes.
#[derive(Debug)]
pub struct ServerCommand {
    msg_type: MsgType,
    data: Vec<u8>,
    pub error_code: u8,
    pub reply: Vec<u8>,
    pub target_info: Option<TargetInfo>,
}

impl ServerCommand {
    fn new(msg_type: MsgType, data: Vec<u8>) -> Self {
        Self {msg_type, data, error_code: 0, reply: Vec::new(), target_info: None}
    }

    pub fn run() -> Self { Self::new(MsgType::Run, Vec::new()) }
    pub fn quit() -> Self { Self::new(MsgType::Quit, Vec::new()) }
    pub fn cont() -> Self { Self::new(MsgType::Cont, Vec::new()) }
    pub fn single_step() -> Self { Self::new(MsgType::Step, Vec::new()) }
    pub fn kill() -> Self { Self::new(MsgType::Kill, Vec::new()) }

    pub fn peek_mem(address: u32, nbytes: u16) -> Self {
        let mut data = address.to_be_bytes().to_vec();
        data.extend_from_slice(&nbytes.to_be_bytes());
        Self::new(MsgType::PeekMem, data)
    }

    pub fn poke_mem(address: u32, bytes: &[u8]) -> Self {
        let mut data = address.to_be_bytes().to_vec();
        data.extend_from_slice(bytes);
        Self::new(MsgType::PokeMem, data)
    }

    // Offset is relative to the entry point; the agent relocates it.
    pub fn set_bpoint(offset: u32, one_shot: bool) -> Self {
        let mut data = offset.to_be_bytes().to_vec();
        data.extend_from_slice(&(one_shot as u16).to_be_bytes());
        Self::new(MsgType::SetBpoint, data)
    }

    pub fn clear_bpoint(num: u32) -> Self {
        Self::new(MsgType::ClearBpoint, num.to_be_bytes().to_vec())
    }

    pub fn get_base_address(library_name: &str) -> Self {
        let mut data = library_name.as_bytes().to_vec();
        data.push(0);
        Self::new(MsgType::GetBaseAddress, data)
    }

    // Send the request, receive exactly one ACK or NACK, and for run-causing
    // commands wait for MSG_TARGET_STOPPED and ACK it. A NACK surfaces as a
    // ServerCommand error carrying the target-side code; the caller decides
    // whether that ends anything more than the current command.
    pub fn execute(mut self, conn: &mut Transport) -> Result<ServerCommand> {
        conn.send_message(self.msg_type, &self.data)?;
        let (reply_type, reply_data) = conn.recv_message()?;
        match reply_type {
            MsgType::Ack => {
                self.error_code = ERROR_OK;
                self.reply = reply_data;
            }
            MsgType::Nack => {
                let code = match reply_data.first() {
                    Some(&code) => code,
                    None => return err!(Protocol, "NACK without error code"),
                };
                self.error_code = code;
                return Err(Error::new(
                    ErrorKind::ServerCommand(code),
                    format!("{} failed with error {} ({})", self.msg_type.name(), error_code_name(code as u32), code),
                ));
            }
            t => {
                return err!(Protocol, "received unexpected message of type {} instead of the expected ACK / NACK", t.name());
            }
        }

        if self.msg_type.causes_target_stop() {
            verbose_log!("waiting for MSG_TARGET_STOPPED");
            let (msg_type, data) = conn.recv_message()?;
            if msg_type != MsgType::TargetStopped {
                return err!(Protocol, "received unexpected message {} from agent, expected MSG_TARGET_STOPPED", msg_type.name());
            }
            conn.send_message(MsgType::Ack, &[])?;
            let info = TargetInfo::decode(&data)?;
            verbose_log!("target has stopped, state = {:#x}", info.target_state.bits());
            self.target_info = Some(info);
        }
        Ok(self)
    }

    // Reply accessor for GET_BASE_ADDRESS.
    pub fn base_address(&self) -> Result<u32> {
        let mut r = ByteReader::new(&self.reply, ErrorKind::Protocol);
        r.u32()
    }

    // Reply accessor for PEEK_MEM.
    pub fn memory(&self) -> &[u8] {
        &self.reply
    }
}

#[cfg(test)]
mod tests {
    use crate::{commands::*, error::*, protocol::*, target::*, testutil::*, transport::Transport};

    fn stop(spec: TargetInfoSpec) -> Vec<u8> {
        encode_target_info(&spec)
    }

    // The whole reference session against a scripted agent: breakpoint, run,
    // single step, continue to exit, then the base-address and memory queries.
    #[test]
    fn session_to_exit() {
        let (port, agent) = spawn_agent(|conn| {
            let data = conn.expect(MsgType::SetBpoint);
            assert_eq!(data, [0, 0, 0, 0x24, 0, 0]);
            conn.ack(&[]);

            conn.expect(MsgType::Run);
            conn.ack(&[]);
            conn.stop_notification(&stop(TargetInfoSpec {
                state: (TargetState::RUNNING | TargetState::STOPPED_BY_BPOINT).bits(),
                pc: 0x2024,
                bpoint: (1, 0x2024, 1),
                ..Default::default()
            }));

            conn.expect(MsgType::Step);
            conn.ack(&[]);
            conn.stop_notification(&stop(TargetInfoSpec {pc: 0x2026, ..Default::default()}));

            // One-shot auto-removal makes 2 the next number the host clears.
            let data = conn.expect(MsgType::ClearBpoint);
            assert_eq!(data, [0, 0, 0, 2]);
            conn.ack(&[]);

            conn.expect(MsgType::Cont);
            conn.ack(&[]);
            conn.stop_notification(&stop(TargetInfoSpec {
                state: TargetState::EXITED.bits(),
                ..Default::default()
            }));

            // Address 4 holds the exec.library base on a 3.1 machine.
            let data = conn.expect(MsgType::PeekMem);
            assert_eq!(data, [0, 0, 0, 4, 0, 4]);
            conn.ack(&[0x07, 0x80, 0x07, 0xf8]);

            let data = conn.expect(MsgType::GetBaseAddress);
            assert_eq!(data, b"exec.library\0");
            conn.ack(&0x0780_07f8u32.to_be_bytes());

            conn.expect(MsgType::Quit);
            conn.ack(&[]);
        });

        let mut conn = Transport::connect("127.0.0.1", port).unwrap();
        let cmd = ServerCommand::set_bpoint(0x24, false).execute(&mut conn).unwrap();
        assert_eq!(cmd.error_code, ERROR_OK);

        let cmd = ServerCommand::run().execute(&mut conn).unwrap();
        let info = cmd.target_info.unwrap();
        assert_eq!(info.target_state, TargetState::RUNNING | TargetState::STOPPED_BY_BPOINT);
        assert_eq!(info.bpoint.num, 1);
        assert_eq!(info.bpoint.address, info.initial_pc + 0x24);

        let cmd = ServerCommand::single_step().execute(&mut conn).unwrap();
        let info = cmd.target_info.unwrap();
        assert_eq!(
            info.target_state,
            TargetState::RUNNING | TargetState::SINGLE_STEPPING | TargetState::STOPPED_BY_SINGLE_STEP
        );

        ServerCommand::clear_bpoint(2).execute(&mut conn).unwrap();
        let cmd = ServerCommand::cont().execute(&mut conn).unwrap();
        let info = cmd.target_info.unwrap();
        assert_eq!(info.target_state, TargetState::EXITED);
        assert_eq!(info.exit_code, 0);
        assert!(!info.is_running());

        let cmd = ServerCommand::peek_mem(4, 4).execute(&mut conn).unwrap();
        assert_eq!(cmd.memory(), [0x07, 0x80, 0x07, 0xf8]);
        let cmd = ServerCommand::get_base_address("exec.library").execute(&mut conn).unwrap();
        assert_eq!(cmd.base_address().unwrap(), 0x0780_07f8);

        ServerCommand::quit().execute(&mut conn).unwrap();
        agent.join().unwrap();
    }

    #[test]
    fn kill_after_breakpoint() {
        let (port, agent) = spawn_agent(|conn| {
            conn.expect(MsgType::SetBpoint);
            conn.ack(&[]);
            conn.expect(MsgType::Run);
            conn.ack(&[]);
            conn.stop_notification(&stop(TargetInfoSpec {
                state: (TargetState::RUNNING | TargetState::STOPPED_BY_BPOINT).bits(),
                pc: 0x2024,
                bpoint: (1, 0x2024, 1),
                ..Default::default()
            }));
            conn.expect(MsgType::Kill);
            conn.ack(&[]);
            conn.stop_notification(&stop(TargetInfoSpec {
                state: TargetState::KILLED.bits(),
                ..Default::default()
            }));
        });

        let mut conn = Transport::connect("127.0.0.1", port).unwrap();
        ServerCommand::set_bpoint(0x24, false).execute(&mut conn).unwrap();
        ServerCommand::run().execute(&mut conn).unwrap();
        let cmd = ServerCommand::kill().execute(&mut conn).unwrap();
        assert_eq!(cmd.target_info.unwrap().target_state, TargetState::KILLED);
        agent.join().unwrap();
    }

    #[test]
    fn one_shot_breakpoint_round() {
        let (port, agent) = spawn_agent(|conn| {
            let data = conn.expect(MsgType::SetBpoint);
            assert_eq!(data, [0, 0, 0, 0x24, 0, 1]); // one-shot flag set
            conn.ack(&[]);
            conn.expect(MsgType::Run);
            conn.ack(&[]);
            conn.stop_notification(&stop(TargetInfoSpec {
                state: (TargetState::RUNNING | TargetState::STOPPED_BY_ONE_SHOT_BPOINT).bits(),
                pc: 0x2024,
                bpoint: (1, 0x2024, 1),
                ..Default::default()
            }));
            // The agent removed the breakpoint itself; continue runs to exit.
            conn.expect(MsgType::Cont);
            conn.ack(&[]);
            conn.stop_notification(&stop(TargetInfoSpec {
                state: TargetState::EXITED.bits(),
                ..Default::default()
            }));
        });

        let mut conn = Transport::connect("127.0.0.1", port).unwrap();
        ServerCommand::set_bpoint(0x24, true).execute(&mut conn).unwrap();
        let cmd = ServerCommand::run().execute(&mut conn).unwrap();
        let info = cmd.target_info.unwrap();
        assert_eq!(info.target_state, TargetState::RUNNING | TargetState::STOPPED_BY_ONE_SHOT_BPOINT);
        assert_eq!(info.target_state.bits(), 33);
        let cmd = ServerCommand::cont().execute(&mut conn).unwrap();
        assert_eq!(cmd.target_info.unwrap().target_state, TargetState::EXITED);
        agent.join().unwrap();
    }

    #[test]
    fn poke_memory() {
        let (port, agent) = spawn_agent(|conn| {
            let data = conn.expect(MsgType::PokeMem);
            assert_eq!(data, [0, 0, 0x40, 0x00, 0xde, 0xad, 0xbe, 0xef]);
            conn.ack(&[]);
        });
        let mut conn = Transport::connect("127.0.0.1", port).unwrap();
        ServerCommand::poke_mem(0x4000, &[0xde, 0xad, 0xbe, 0xef]).execute(&mut conn).unwrap();
        agent.join().unwrap();
    }

    #[test]
    fn nack_surfaces_error_code() {
        let (port, agent) = spawn_agent(|conn| {
            conn.expect(MsgType::ClearBpoint);
            conn.nack(ERROR_UNKNOWN_BREAKPOINT);
        });
        let mut conn = Transport::connect("127.0.0.1", port).unwrap();
        let e = ServerCommand::clear_bpoint(7).execute(&mut conn).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ServerCommand(ERROR_UNKNOWN_BREAKPOINT));
        assert!(!e.is_fatal());
        assert!(e.message.contains("ERROR_UNKNOWN_BREAKPOINT"));
        agent.join().unwrap();
    }

    #[test]
    fn unexpected_reply_type_is_protocol_error() {
        let (port, agent) = spawn_agent(|conn| {
            conn.expect(MsgType::PeekMem);
            conn.send(MsgType::TargetStopped, &[]);
        });
        let mut conn = Transport::connect("127.0.0.1", port).unwrap();
        let e = ServerCommand::peek_mem(0, 4).execute(&mut conn).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Protocol);
        assert!(e.is_fatal());
        agent.join().unwrap();
    }
}
