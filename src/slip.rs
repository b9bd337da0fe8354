use crate::{*, error::*};

// SLIP framing, same scheme the serial link used before the agent moved to TCP:
// 0xC0 terminates a frame, 0xDB escapes. Inside a frame 0xDB becomes 0xDB 0xDD and
// 0xC0 becomes 0xDB 0xDC. Escaping the escape byte must happen first on encode.
pub const SLIP_END: u8 = 0xc0;
pub const SLIP_ESC: u8 = 0xdb;
pub const SLIP_ESCAPED_END: u8 = 0xdc;
pub const SLIP_ESCAPED_ESC: u8 = 0xdd;

pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    for &b in payload {
        match b {
            SLIP_ESC => out.extend_from_slice(&[SLIP_ESC, SLIP_ESCAPED_ESC]),
            SLIP_END => out.extend_from_slice(&[SLIP_ESC, SLIP_ESCAPED_END]),
            _ => out.push(b),
        }
    }
    out.push(SLIP_END);
    out
}

// Stateful decoder over a stream of chunks. Holds at most one partial frame;
// bytes following a frame terminator stay buffered for the next call.
#[derive(Debug)]
pub struct FrameCodec {
    buf: Vec<u8>,
}

impl FrameCodec {
    pub fn new() -> Self { Self {buf: Vec::new()} }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    // Returns the next complete frame with escapes resolved, or None if more
    // bytes are needed. An escape byte followed by anything other than the two
    // escape codes is a malformed frame and fatal to the protocol.
    pub fn try_decode(&mut self) -> Result<Option<Vec<u8>>> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < self.buf.len() {
            match self.buf[i] {
                SLIP_END => {
                    self.buf.drain(..i + 1);
                    return Ok(Some(out));
                }
                SLIP_ESC => {
                    if i + 1 >= self.buf.len() {
                        return Ok(None); // escape code not received yet
                    }
                    match self.buf[i + 1] {
                        SLIP_ESCAPED_END => out.push(SLIP_END),
                        SLIP_ESCAPED_ESC => out.push(SLIP_ESC),
                        b => return err!(Protocol, "malformed SLIP frame: escape followed by {:#04x}", b),
                    }
                    i += 2;
                }
                b => {
                    out.push(b);
                    i += 1;
                }
            }
        }
        Ok(None)
    }
}
