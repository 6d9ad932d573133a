//! Typed COLA2 commands.
//!
//! A command knows its telegram type and name, how to serialize its parameters and how to
//! decode the reply payload. Decoding is all-or-nothing: [`Command::process_reply`] returns
//! the decoded value and the caller stores it, so a malformed reply never leaves a half
//! updated target behind.

use crate::codec::{ByteReader, ByteWriter, CodecError};
use crate::error::{Error, Result};
use crate::settings::{CommSettings, FieldData, FirmwareVersion, TypeCode};
use crate::telegram::{CommandType, Telegram};

pub trait Command {
    type Output;

    fn command_type(&self) -> CommandType;

    /// Variable or method name carried in the telegram.
    fn name(&self) -> String;

    /// Commands usable before login (discovery).
    fn can_execute_without_session(&self) -> bool {
        false
    }

    /// Append the serialized parameters. Reads send no payload.
    fn add_telegram_data(&self, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }

    /// Decode the payload of a successful reply.
    fn process_reply(&self, payload: &[u8]) -> Result<Self::Output>;

    /// Build the request telegram.
    fn to_telegram(&self, session_id: u32, request_id: u16) -> Result<Telegram> {
        let mut payload = Vec::new();
        self.add_telegram_data(&mut payload)?;
        Ok(Telegram::request(session_id, request_id, self.command_type(), self.name(), payload))
    }
}

fn malformed(name: &str, e: CodecError) -> Error {
    Error::MalformedReply(format!("{}: {}", name, e))
}

/// Reject replies that carry bytes beyond the decoded record.
fn ensure_consumed(name: &str, r: &ByteReader<'_>) -> Result<()> {
    if r.remaining() != 0 {
        return Err(Error::MalformedReply(format!(
            "{}: {} trailing bytes after reply record",
            name,
            r.remaining()
        )));
    }
    Ok(())
}

fn decode_string_reply(name: &str, payload: &[u8]) -> Result<String> {
    let mut r = ByteReader::new(payload);
    let s = r.read_string().map_err(|e| malformed(name, e))?;
    ensure_consumed(name, &r)?;
    Ok(s)
}

/// Login: asks the sensor for a session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenSession {
    /// Seconds of inactivity after which the sensor drops the session.
    pub timeout_secs: u8,
    pub client_id: u32,
}

impl Command for OpenSession {
    type Output = u32;

    fn command_type(&self) -> CommandType {
        CommandType::OpenSession
    }

    fn name(&self) -> String {
        "Session".to_string()
    }

    fn can_execute_without_session(&self) -> bool {
        true
    }

    fn add_telegram_data(&self, buf: &mut Vec<u8>) -> Result<()> {
        let mut w = ByteWriter::new(buf);
        w.write_u8(self.timeout_secs);
        w.write_u32(self.client_id);
        Ok(())
    }

    fn process_reply(&self, payload: &[u8]) -> Result<u32> {
        let mut r = ByteReader::new(payload);
        let id = r.read_u32().map_err(|e| malformed("Session", e))?;
        ensure_consumed("Session", &r)?;
        Ok(id)
    }
}

/// Logout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseSession;

impl Command for CloseSession {
    type Output = ();

    fn command_type(&self) -> CommandType {
        CommandType::CloseSession
    }

    fn name(&self) -> String {
        "Session".to_string()
    }

    fn process_reply(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Reads the type code; works without a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadTypeCode;

impl Command for ReadTypeCode {
    type Output = TypeCode;

    fn command_type(&self) -> CommandType {
        CommandType::Read
    }

    fn name(&self) -> String {
        "TypeCode".to_string()
    }

    fn can_execute_without_session(&self) -> bool {
        true
    }

    fn process_reply(&self, payload: &[u8]) -> Result<TypeCode> {
        let raw = decode_string_reply("TypeCode", payload)?;
        TypeCode::parse(&raw)
            .ok_or_else(|| Error::MalformedReply(format!("TypeCode: cannot parse {:?}", raw)))
    }
}

/// Which string variable a [`ReadString`] fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringVariable {
    DeviceName,
    SerialNumber,
    ProjectName,
}

impl StringVariable {
    pub fn name(self) -> &'static str {
        match self {
            StringVariable::DeviceName => "DeviceName",
            StringVariable::SerialNumber => "SerialNumber",
            StringVariable::ProjectName => "ProjectName",
        }
    }
}

/// Reads one of the device's string variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadString(pub StringVariable);

impl ReadString {
    pub fn device_name() -> Self {
        ReadString(StringVariable::DeviceName)
    }

    pub fn serial_number() -> Self {
        ReadString(StringVariable::SerialNumber)
    }

    pub fn project_name() -> Self {
        ReadString(StringVariable::ProjectName)
    }
}

impl Command for ReadString {
    type Output = String;

    fn command_type(&self) -> CommandType {
        CommandType::Read
    }

    fn name(&self) -> String {
        self.0.name().to_string()
    }

    fn process_reply(&self, payload: &[u8]) -> Result<String> {
        decode_string_reply(self.0.name(), payload)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadFirmwareVersion;

impl Command for ReadFirmwareVersion {
    type Output = FirmwareVersion;

    fn command_type(&self) -> CommandType {
        CommandType::Read
    }

    fn name(&self) -> String {
        "FirmwareVersion".to_string()
    }

    fn process_reply(&self, payload: &[u8]) -> Result<FirmwareVersion> {
        const NAME: &str = "FirmwareVersion";
        let mut r = ByteReader::new(payload);
        let indicator = r.read_u8().map_err(|e| malformed(NAME, e))?;
        let major = r.read_u8().map_err(|e| malformed(NAME, e))?;
        let minor = r.read_u8().map_err(|e| malformed(NAME, e))?;
        let release = r.read_u8().map_err(|e| malformed(NAME, e))?;
        ensure_consumed(NAME, &r)?;
        if !indicator.is_ascii_graphic() {
            return Err(Error::MalformedReply(format!(
                "{}: version indicator {:#04x} is not printable",
                NAME, indicator
            )));
        }
        Ok(FirmwareVersion {
            indicator: indicator as char,
            major,
            minor,
            release,
        })
    }
}

fn field_geometry_name(index: u8) -> String {
    format!("FieldGeometry[{}]", index)
}

/// Reads the geometry of monitoring field `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadFieldGeometry {
    pub index: u8,
}

impl Command for ReadFieldGeometry {
    type Output = FieldData;

    fn command_type(&self) -> CommandType {
        CommandType::Read
    }

    fn name(&self) -> String {
        field_geometry_name(self.index)
    }

    fn process_reply(&self, payload: &[u8]) -> Result<FieldData> {
        let name = self.name();
        let mut r = ByteReader::new(payload);
        let field = FieldData::decode(&mut r).map_err(|e| malformed(&name, e))?;
        ensure_consumed(&name, &r)?;
        Ok(field)
    }
}

/// Writes the geometry of monitoring field `index`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFieldGeometry {
    pub index: u8,
    pub field: FieldData,
}

impl Command for WriteFieldGeometry {
    type Output = ();

    fn command_type(&self) -> CommandType {
        CommandType::Write
    }

    fn name(&self) -> String {
        field_geometry_name(self.index)
    }

    fn add_telegram_data(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.field
            .encode_into(buf)
            .map_err(|e| Error::Framing(format!("{}: {}", self.name(), e)))
    }

    fn process_reply(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Pushes channel, host endpoint, angles and features to the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCommSettings {
    pub settings: CommSettings,
}

impl Command for WriteCommSettings {
    type Output = ();

    fn command_type(&self) -> CommandType {
        CommandType::Write
    }

    fn name(&self) -> String {
        "CommunicationSettings".to_string()
    }

    fn add_telegram_data(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.settings.encode_into(buf);
        Ok(())
    }

    fn process_reply(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Parameterless method that starts or stops the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementMethod {
    Start,
    Stop,
}

impl Command for MeasurementMethod {
    type Output = ();

    fn command_type(&self) -> CommandType {
        CommandType::Method
    }

    fn name(&self) -> String {
        match self {
            MeasurementMethod::Start => "StartMeasurement",
            MeasurementMethod::Stop => "StopMeasurement",
        }
        .to_string()
    }

    fn process_reply(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }
}
