use crate::{*, error::*, protocol::*, slip::*};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

const MAX_READ_CHUNK: usize = 4096;

// Blocking, single-exchange-at-a-time connection to the debug agent. No timeouts
// on purpose: the agent sits on a dedicated emulator or serial bridge, so the
// realistic failure mode is a closed connection, not a stalled one.
//
// Sequence numbers advance only when an ACK or NACK crosses the wire, in either
// direction, so both sides agree on the expected number at every quiescent point.
#[derive(Debug)]
pub struct Transport {
    stream: TcpStream,
    codec: FrameCodec,
    next_seqnum: u16,
}

fn sock_err(what: &str, e: std::io::Error) -> Error {
    error!(Transport, "{}: {}", what, e)
}

impl Transport {
    // Connects and performs the INIT handshake right away; a transport that
    // exists is a transport the agent has greeted.
    pub fn connect(host: &str, port: u16) -> Result<Transport> {
        eprintln!("info: connecting to agent at {}:{}", host, port);
        let stream = TcpStream::connect((host, port))
            .map_err(|_| error!(Transport, "cannot connect to {}:{}", host, port))?;
        let mut transport = Transport {stream, codec: FrameCodec::new(), next_seqnum: 0};
        transport.send_message(MsgType::Init, &[])?;
        let (msg_type, _) = transport.recv_message()?;
        match msg_type {
            MsgType::Ack => Ok(transport),
            MsgType::Nack => err!(Transport, "agent rejected INIT"),
            t => err!(Protocol, "expected ACK for INIT, got {}", t.name()),
        }
    }

    pub fn send_message(&mut self, msg_type: MsgType, data: &[u8]) -> Result<()> {
        if data.len() > MAX_MSG_DATA_LEN {
            return err!(Protocol, "message payload of {} bytes exceeds maximum of {}", data.len(), MAX_MSG_DATA_LEN);
        }
        let header = MessageHeader {
            seqnum: self.next_seqnum,
            checksum: CHECKSUM_SENTINEL,
            msg_type,
            length: data.len() as u8,
        };
        verbose_log!("sending message: seqnum={}, type={}, length={}", header.seqnum, msg_type.name(), header.length);
        let mut buffer = Vec::with_capacity(HEADER_SIZE + data.len());
        buffer.extend_from_slice(&header.encode());
        buffer.extend_from_slice(data);
        let framed = slip::encode(&buffer);
        self.stream.write_all(&framed).map_err(|e| sock_err("could not send message to agent", e))?;
        if msg_type.is_ack_or_nack() {
            self.next_seqnum = self.next_seqnum.wrapping_add(1);
        }
        Ok(())
    }

    pub fn recv_message(&mut self) -> Result<(MsgType, Vec<u8>)> {
        let frame = loop {
            if let Some(frame) = self.codec.try_decode()? {
                break frame;
            }
            let mut chunk = [0u8; MAX_READ_CHUNK];
            let n = self.stream.read(&mut chunk).map_err(|e| sock_err("could not read message from agent", e))?;
            if n == 0 {
                return err!(Transport, "connection closed by agent");
            }
            self.codec.push_bytes(&chunk[..n]);
        };
        let header = MessageHeader::decode(&frame)?;
        verbose_log!("received message: seqnum={}, type={}, length={}", header.seqnum, header.msg_type.name(), header.length);
        if frame.len() < HEADER_SIZE + header.length as usize {
            return err!(Protocol, "frame of {} bytes too short for payload of {} bytes", frame.len(), header.length);
        }
        let data = frame[HEADER_SIZE..HEADER_SIZE + header.length as usize].to_vec();
        if header.msg_type.is_ack_or_nack() {
            // The agent echoes our expected number; anything else means the two
            // sides lost agreement and the session is unrecoverable.
            if header.seqnum != self.next_seqnum {
                return err!(Protocol, "ACK / NACK with wrong sequence number, expected {}, got {}", self.next_seqnum, header.seqnum);
            }
            self.next_seqnum = self.next_seqnum.wrapping_add(1);
        }
        Ok((header.msg_type, data))
    }

    pub fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
