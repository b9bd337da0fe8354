// Test-only helpers: a scripted agent on a loopback socket and a builder for
// wire-encoded TargetInfo snapshots.
use crate::{protocol::*, slip::FrameCodec, slip, target::*};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// The agent half of the protocol, with the same sequence-number discipline the
// real agent has: numbers advance on ACK / NACK only, in both directions.
pub struct AgentConn {
    stream: TcpStream,
    codec: FrameCodec,
    next_seqnum: u16,
}

impl AgentConn {
    pub fn recv(&mut self) -> (MsgType, Vec<u8>) {
        let frame = loop {
            if let Some(frame) = self.codec.try_decode().unwrap() {
                break frame;
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).unwrap();
            assert!(n > 0, "host closed the connection mid-frame");
            self.codec.push_bytes(&chunk[..n]);
        };
        let header = MessageHeader::decode(&frame).unwrap();
        let data = frame[HEADER_SIZE..HEADER_SIZE + header.length as usize].to_vec();
        if header.msg_type.is_ack_or_nack() {
            assert_eq!(header.seqnum, self.next_seqnum, "host sent ACK / NACK with wrong sequence number");
            self.next_seqnum = self.next_seqnum.wrapping_add(1);
        }
        (header.msg_type, data)
    }

    pub fn expect(&mut self, expected: MsgType) -> Vec<u8> {
        let (msg_type, data) = self.recv();
        assert_eq!(msg_type, expected);
        data
    }

    pub fn send(&mut self, msg_type: MsgType, data: &[u8]) {
        let header = MessageHeader {seqnum: self.next_seqnum, checksum: CHECKSUM_SENTINEL, msg_type, length: data.len() as u8};
        let mut buffer = header.encode().to_vec();
        buffer.extend_from_slice(data);
        self.stream.write_all(&slip::encode(&buffer)).unwrap();
        if msg_type.is_ack_or_nack() {
            self.next_seqnum = self.next_seqnum.wrapping_add(1);
        }
    }

    pub fn ack(&mut self, data: &[u8]) {
        self.send(MsgType::Ack, data);
    }

    pub fn nack(&mut self, code: u8) {
        self.send(MsgType::Nack, &[code]);
    }

    // Out-of-band stop notification plus the ACK the host owes for it.
    pub fn stop_notification(&mut self, target_info: &[u8]) {
        self.send(MsgType::TargetStopped, target_info);
        self.expect(MsgType::Ack);
    }
}

// Spawns the scripted agent; the INIT handshake is handled before the script runs.
pub fn spawn_agent<F: FnOnce(&mut AgentConn) + Send + 'static>(script: F) -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut conn = AgentConn {stream, codec: FrameCodec::new(), next_seqnum: 0};
        conn.expect(MsgType::Init);
        conn.ack(&[]);
        script(&mut conn);
    });
    (port, handle)
}

// Wire-encodes a TargetInfo with the interesting fields plugged in and the rest
// set to recognizable filler.
pub struct TargetInfoSpec {
    pub initial_pc: u32,
    pub state: u32,
    pub pc: u32,
    pub sp: u32,
    pub reg_a: [u32; 7],
    pub next_instr: Vec<u8>,
    pub bpoint: (u32, u32, u32), // num, address, hit_count
    pub exit_code: u32,
    pub exc_num: u32,
}

impl Default for TargetInfoSpec {
    fn default() -> Self {
        Self {
            initial_pc: 0x2000,
            state: (TargetState::RUNNING | TargetState::STOPPED_BY_SINGLE_STEP | TargetState::SINGLE_STEPPING).bits(),
            pc: 0x2000,
            sp: 0x001f_fff0,
            reg_a: [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6],
            next_instr: vec![0x4e, 0x71], // nop
            bpoint: (0, 0, 0),
            exit_code: 0,
            exc_num: 0,
        }
    }
}

pub fn encode_target_info(spec: &TargetInfoSpec) -> Vec<u8> {
    let mut out = Vec::with_capacity(TARGET_INFO_SIZE);
    out.extend_from_slice(&spec.initial_pc.to_be_bytes());
    out.extend_from_slice(&0x0020_0000u32.to_be_bytes()); // initial_sp
    out.extend_from_slice(&spec.sp.to_be_bytes());
    out.extend_from_slice(&spec.exc_num.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // reg_sr
    out.extend_from_slice(&spec.pc.to_be_bytes());
    for i in 0..8u32 {
        out.extend_from_slice(&(0xd0 + i).to_be_bytes());
    }
    for a in spec.reg_a {
        out.extend_from_slice(&a.to_be_bytes());
    }
    out.extend_from_slice(&spec.state.to_be_bytes());
    out.extend_from_slice(&spec.exit_code.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // error_code
    let mut instr = [0u8; NUM_NEXT_INSTRUCTIONS * MAX_INSTR_BYTES];
    instr[..spec.next_instr.len()].copy_from_slice(&spec.next_instr);
    out.extend_from_slice(&instr);
    for i in 0..NUM_TOP_STACK_DWORDS as u32 {
        out.extend_from_slice(&(0x1000 + i).to_be_bytes());
    }
    out.extend_from_slice(&spec.bpoint.0.to_be_bytes());
    out.extend_from_slice(&spec.bpoint.1.to_be_bytes());
    out.extend_from_slice(&0x4e71u16.to_be_bytes()); // saved opcode
    out.extend_from_slice(&spec.bpoint.2.to_be_bytes());
    assert_eq!(out.len(), TARGET_INFO_SIZE);
    out
}
