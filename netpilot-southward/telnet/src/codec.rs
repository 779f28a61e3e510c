//! Minimal RFC 854 framing: in-band option negotiation is separated from the
//! data stream, data bytes are passed through untouched.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetFrame {
    Data(Bytes),
    Negotiate { command: u8, option: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetOutput {
    /// One CLI line; CR LF is appended
    Line(String),
    /// Raw keystrokes without line ending, e.g. a space for a pager
    Keys(String),
    Negotiate { command: u8, option: u8 },
}

/// Reply to a peer negotiation request.
///
/// Echo and suppress-go-ahead offered by the device are accepted, everything
/// else is refused so the peer stays in plain NVT mode.
pub fn negotiation_reply(command: u8, option: u8) -> Option<TelnetOutput> {
    let reply = match (command, option) {
        (WILL, OPT_ECHO | OPT_SUPPRESS_GO_AHEAD) => DO,
        (WILL, _) => DONT,
        (DO, OPT_SUPPRESS_GO_AHEAD) => WILL,
        (DO, _) => WONT,
        _ => return None,
    };
    Some(TelnetOutput::Negotiate {
        command: reply,
        option,
    })
}

#[derive(Debug, Default)]
pub struct TelnetCodec;

impl Decoder for TelnetCodec {
    type Item = TelnetFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        if buf[0] != IAC {
            let end = buf.iter().position(|b| *b == IAC).unwrap_or(buf.len());
            return Ok(Some(TelnetFrame::Data(buf.split_to(end).freeze())));
        }

        // Command sequence at the head of the buffer
        let Some(&command) = buf.get(1) else {
            return Ok(None);
        };
        match command {
            IAC => {
                buf.advance(2);
                Ok(Some(TelnetFrame::Data(Bytes::from_static(&[IAC]))))
            }
            WILL | WONT | DO | DONT => {
                let Some(&option) = buf.get(2) else {
                    return Ok(None);
                };
                buf.advance(3);
                Ok(Some(TelnetFrame::Negotiate { command, option }))
            }
            SB => {
                let end = buf
                    .windows(2)
                    .skip(2)
                    .position(|w| w == [IAC, SE])
                    .map(|p| p + 2);
                match end {
                    Some(end) => {
                        buf.advance(end + 2);
                        self.decode(buf)
                    }
                    None => Ok(None),
                }
            }
            _ => {
                // NOP, GA, AYT and friends carry no payload
                buf.advance(2);
                self.decode(buf)
            }
        }
    }
}

impl Encoder<TelnetOutput> for TelnetCodec {
    type Error = io::Error;

    fn encode(&mut self, item: TelnetOutput, buf: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            TelnetOutput::Line(text) => {
                put_escaped(buf, text.as_bytes());
                buf.put_slice(b"\r\n");
            }
            TelnetOutput::Keys(text) => put_escaped(buf, text.as_bytes()),
            TelnetOutput::Negotiate { command, option } => {
                buf.put_slice(&[IAC, command, option]);
            }
        }
        Ok(())
    }
}

#[inline]
fn put_escaped(buf: &mut BytesMut, data: &[u8]) {
    buf.reserve(data.len() + 2);
    for &b in data {
        if b == IAC {
            buf.put_u8(IAC);
        }
        buf.put_u8(b);
    }
}
