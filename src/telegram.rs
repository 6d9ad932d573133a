//! COLA2 telegram framing for the control channel.
//!
//! ```text
//! STX(4) | length(4) | hub(1) | noc(1) | session id(4) | request id(2)
//!        | command type(1) | command mode(1) | name len(1) | name | payload | checksum(1)
//! ```
//!
//! `length` counts every byte after the length field. The checksum is the XOR of all bytes
//! from STX through the payload. Framing knows nothing about variable semantics.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::{Error, Result};

pub const STX: u32 = 0x0202_0202;

/// STX + length field.
pub const PREFIX_LEN: usize = 8;

/// Bytes counted by the length field besides name and payload:
/// hub, noc, session id, request id, type, mode, name length, checksum.
const FIXED_BODY_LEN: usize = 12;

/// Upper bound for one telegram on the wire.
pub const MAX_TELEGRAM_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    OpenSession,
    CloseSession,
    Read,
    Write,
    Method,
    /// Error reply; payload carries the vendor error code.
    Error,
}

impl CommandType {
    pub fn as_byte(self) -> u8 {
        match self {
            CommandType::OpenSession => b'O',
            CommandType::CloseSession => b'C',
            CommandType::Read => b'R',
            CommandType::Write => b'W',
            CommandType::Method => b'M',
            CommandType::Error => b'F',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            b'O' => CommandType::OpenSession,
            b'C' => CommandType::CloseSession,
            b'R' => CommandType::Read,
            b'W' => CommandType::Write,
            b'M' => CommandType::Method,
            b'F' => CommandType::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandMode {
    Request,
    Answer,
}

impl CommandMode {
    pub fn as_byte(self) -> u8 {
        match self {
            CommandMode::Request => b'I',
            CommandMode::Answer => b'A',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(CommandMode::Request),
            b'A' => Some(CommandMode::Answer),
            _ => None,
        }
    }
}

/// One framed command or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telegram {
    pub session_id: u32,
    pub request_id: u16,
    pub command_type: CommandType,
    pub command_mode: CommandMode,
    pub name: String,
    pub payload: Vec<u8>,
}

/// XOR over all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

impl Telegram {
    pub fn request(
        session_id: u32,
        request_id: u16,
        command_type: CommandType,
        name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Telegram {
            session_id,
            request_id,
            command_type,
            command_mode: CommandMode::Request,
            name: name.into(),
            payload,
        }
    }

    /// Answer to `request` echoing its session, request id, type and name.
    pub fn answer_to(request: &Telegram, payload: Vec<u8>) -> Self {
        Telegram {
            command_mode: CommandMode::Answer,
            payload,
            ..request.clone()
        }
    }

    /// Error answer carrying a vendor error code.
    pub fn error_for(request: &Telegram, code: u16) -> Self {
        let mut payload = Vec::with_capacity(2);
        ByteWriter::new(&mut payload).write_u16(code);
        Telegram {
            command_type: CommandType::Error,
            command_mode: CommandMode::Answer,
            payload,
            ..request.clone()
        }
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + FIXED_BODY_LEN + self.name.len() + self.payload.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.name.is_empty() || self.name.len() > u8::MAX as usize || !self.name.is_ascii() {
            return Err(Error::Framing(format!(
                "name must be 1..=255 ASCII bytes, got {:?}",
                self.name
            )));
        }
        let total = self.encoded_len();
        if total > MAX_TELEGRAM_LEN {
            return Err(Error::Framing(format!(
                "telegram of {} bytes exceeds maximum of {}",
                total, MAX_TELEGRAM_LEN
            )));
        }
        let mut out = Vec::with_capacity(total);
        let mut w = ByteWriter::new(&mut out);
        w.write_u32(STX);
        w.write_u32((total - PREFIX_LEN) as u32);
        w.write_u8(0);
        w.write_u8(0);
        w.write_u32(self.session_id);
        w.write_u16(self.request_id);
        w.write_u8(self.command_type.as_byte());
        w.write_u8(self.command_mode.as_byte());
        w.write_u8(self.name.len() as u8);
        w.write_bytes(self.name.as_bytes());
        w.write_bytes(&self.payload);
        let sum = checksum(&out);
        out.push(sum);
        Ok(out)
    }

    /// Decode exactly one telegram occupying all of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Telegram> {
        if bytes.len() < PREFIX_LEN + FIXED_BODY_LEN {
            return Err(Error::Framing(format!(
                "telegram of {} bytes is shorter than the minimum of {}",
                bytes.len(),
                PREFIX_LEN + FIXED_BODY_LEN
            )));
        }
        let declared = declared_len(bytes)?;
        if declared != bytes.len() {
            return Err(Error::Framing(format!(
                "length field announces {} bytes, buffer holds {}",
                declared,
                bytes.len()
            )));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 1);
        let expected = checksum(body);
        if expected != trailer[0] {
            return Err(Error::Checksum {
                expected,
                actual: trailer[0],
            });
        }

        let mut r = ByteReader::new(body);
        r.seek(PREFIX_LEN).map_err(framing)?;
        let _hub = r.read_u8().map_err(framing)?;
        let _noc = r.read_u8().map_err(framing)?;
        let session_id = r.read_u32().map_err(framing)?;
        let request_id = r.read_u16().map_err(framing)?;
        let type_byte = r.read_u8().map_err(framing)?;
        let command_type = CommandType::from_byte(type_byte)
            .ok_or_else(|| Error::Framing(format!("unknown command type {:#04x}", type_byte)))?;
        let mode_byte = r.read_u8().map_err(framing)?;
        let command_mode = CommandMode::from_byte(mode_byte)
            .ok_or_else(|| Error::Framing(format!("unknown command mode {:#04x}", mode_byte)))?;
        let name_len = r.read_u8().map_err(framing)? as usize;
        let name_bytes = r.take(name_len).map_err(framing)?;
        if name_len == 0 || !name_bytes.is_ascii() {
            return Err(Error::Framing("name must be 1..=255 ASCII bytes".to_string()));
        }
        let name = name_bytes.iter().map(|&b| b as char).collect();
        let payload = r.take(r.remaining()).map_err(framing)?.to_vec();

        Ok(Telegram {
            session_id,
            request_id,
            command_type,
            command_mode,
            name,
            payload,
        })
    }
}

fn framing(e: crate::codec::CodecError) -> Error {
    Error::Framing(e.to_string())
}

/// Validate STX and return the full telegram length announced by the first 8 bytes.
fn declared_len(prefix: &[u8]) -> Result<usize> {
    let mut r = ByteReader::new(prefix);
    let stx = r.read_u32().map_err(framing)?;
    if stx != STX {
        return Err(Error::Framing(format!("bad start marker {:#010x}", stx)));
    }
    let len = r.read_u32().map_err(framing)? as usize;
    if len < FIXED_BODY_LEN || len > MAX_TELEGRAM_LEN - PREFIX_LEN {
        return Err(Error::Framing(format!("implausible length field {}", len)));
    }
    Ok(PREFIX_LEN + len)
}

/// Accumulates bytes from the control stream and yields whole telegrams.
#[derive(Debug, Default)]
pub struct TelegramBuffer {
    buf: Vec<u8>,
}

impl TelegramBuffer {
    pub fn new() -> Self {
        TelegramBuffer::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Extract the next complete telegram.
    ///
    /// `Ok(None)` means more bytes are needed. A bad start marker or length field drops the
    /// whole buffer, since the stream position can no longer be trusted. A checksum or field
    /// error consumes only the offending telegram.
    pub fn next_telegram(&mut self) -> Result<Option<Telegram>> {
        if self.buf.len() < PREFIX_LEN {
            return Ok(None);
        }
        let total = match declared_len(&self.buf[..PREFIX_LEN]) {
            Ok(n) => n,
            Err(e) => {
                self.buf.clear();
                return Err(e);
            }
        };
        if self.buf.len() < total {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(..total).collect();
        Telegram::decode(&frame).map(Some)
    }
}
