use crate::{*, error::*, util::*};

// Everything in this file is shared knowledge with the agent and has to stay in
// sync with its headers: message types, header layout, target-side error codes.

pub const MAX_MSG_DATA_LEN: usize = 255; // length field is one byte

// The checksum header field is reserved. Both sides currently send this sentinel
// and accept anything; verification hooks in at decode_header() once the agent
// computes real checksums.
pub const CHECKSUM_SENTINEL: u16 = 0xdead;

pub const HEADER_SIZE: usize = 6;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum MsgType {
    Init = 0,
    Ack = 1,
    Nack = 2,
    Run = 3,
    Quit = 4,
    Cont = 5,
    Step = 6,
    Kill = 7,
    PeekMem = 8,
    PokeMem = 9,
    SetBpoint = 10,
    ClearBpoint = 11,
    TargetStopped = 12,
    GetBaseAddress = 13,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::Init),
            1 => Ok(Self::Ack),
            2 => Ok(Self::Nack),
            3 => Ok(Self::Run),
            4 => Ok(Self::Quit),
            5 => Ok(Self::Cont),
            6 => Ok(Self::Step),
            7 => Ok(Self::Kill),
            8 => Ok(Self::PeekMem),
            9 => Ok(Self::PokeMem),
            10 => Ok(Self::SetBpoint),
            11 => Ok(Self::ClearBpoint),
            12 => Ok(Self::TargetStopped),
            13 => Ok(Self::GetBaseAddress),
            _ => err!(Protocol, "unknown message type {}", v),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "MSG_INIT",
            Self::Ack => "MSG_ACK",
            Self::Nack => "MSG_NACK",
            Self::Run => "MSG_RUN",
            Self::Quit => "MSG_QUIT",
            Self::Cont => "MSG_CONT",
            Self::Step => "MSG_STEP",
            Self::Kill => "MSG_KILL",
            Self::PeekMem => "MSG_PEEK_MEM",
            Self::PokeMem => "MSG_POKE_MEM",
            Self::SetBpoint => "MSG_SET_BPOINT",
            Self::ClearBpoint => "MSG_CLEAR_BPOINT",
            Self::TargetStopped => "MSG_TARGET_STOPPED",
            Self::GetBaseAddress => "MSG_GET_BASE_ADDRESS",
        }
    }

    pub fn is_ack_or_nack(self) -> bool {
        self == Self::Ack || self == Self::Nack
    }

    // Commands after which the agent sends an out-of-band MSG_TARGET_STOPPED.
    pub fn causes_target_stop(self) -> bool {
        match self {
            Self::Run | Self::Step | Self::Cont | Self::Kill => true,
            _ => false,
        }
    }
}

// Fixed 6-byte big-endian header, immediately followed by `length` payload bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MessageHeader {
    pub seqnum: u16,
    pub checksum: u16,
    pub msg_type: MsgType,
    pub length: u8,
}

impl MessageHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let s = self.seqnum.to_be_bytes();
        let c = self.checksum.to_be_bytes();
        [s[0], s[1], c[0], c[1], self.msg_type as u8, self.length]
    }

    pub fn decode(frame: &[u8]) -> Result<MessageHeader> {
        if frame.is_empty() {
            return err!(Protocol, "received empty frame");
        }
        if frame.len() < HEADER_SIZE {
            return err!(Protocol, "received short frame of {} bytes", frame.len());
        }
        let mut r = ByteReader::new(frame, ErrorKind::Protocol);
        Ok(MessageHeader {
            seqnum: r.u16()?,
            checksum: r.u16()?, // reserved, accepted unverified
            msg_type: MsgType::from_u8(r.u8()?)?,
            length: r.u8()?,
        })
    }
}

// Error codes the agent reports in NACK payloads and in TargetInfo.error_code.
pub const ERROR_OK: u8 = 0;
pub const ERROR_UNKNOWN_BREAKPOINT: u8 = 3;

pub fn error_code_name(code: u32) -> &'static str {
    match code {
        0 => "ERROR_OK",
        1 => "ERROR_NOT_ENOUGH_MEMORY",
        2 => "ERROR_INVALID_ADDRESS",
        3 => "ERROR_UNKNOWN_BREAKPOINT",
        4 => "ERROR_LOAD_TARGET_FAILED",
        5 => "ERROR_CREATE_PROC_FAILED",
        6 => "ERROR_UNKNOWN_STOP_REASON",
        7 => "ERROR_NO_TRAP",
        8 => "ERROR_RUN_COMMAND_FAILED",
        9 => "ERROR_BAD_DATA",
        10 => "ERROR_OPEN_LIB_FAILED",
        _ => "ERROR_UNKNOWN",
    }
}
