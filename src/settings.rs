//! Value objects exchanged over the control channel: communication settings, type code,
//! field geometry and firmware version.

use crate::codec::{u16_len, ByteReader, ByteWriter, CodecError};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Which optional sections the sensor puts into each streamed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Features {
    pub general_system_state: bool,
    pub derived_values: bool,
    pub measurement_data: bool,
    pub intrusion_data: bool,
    pub application_data: bool,
}

impl Default for Features {
    fn default() -> Self {
        Features::all()
    }
}

impl Features {
    pub fn all() -> Self {
        Features {
            general_system_state: true,
            derived_values: true,
            measurement_data: true,
            intrusion_data: true,
            application_data: true,
        }
    }

    pub fn none() -> Self {
        Features {
            general_system_state: false,
            derived_values: false,
            measurement_data: false,
            intrusion_data: false,
            application_data: false,
        }
    }

    /// Bit mask as sent in the communication settings (LSB = general system state).
    pub fn mask(&self) -> u16 {
        [
            self.general_system_state,
            self.derived_values,
            self.measurement_data,
            self.intrusion_data,
            self.application_data,
        ]
        .iter()
        .enumerate()
        .fold(0u16, |acc, (i, &on)| if on { acc | (1 << i) } else { acc })
    }

    pub fn from_mask(mask: u16) -> Self {
        Features {
            general_system_state: mask & 0x01 != 0,
            derived_values: mask & 0x02 != 0,
            measurement_data: mask & 0x04 != 0,
            intrusion_data: mask & 0x08 != 0,
            application_data: mask & 0x10 != 0,
        }
    }
}

/// Fieldbus interface of the device, taken from its type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceType {
    EfiPro,
    EthernetIp,
    Profinet,
    NonSafeEthernet,
    #[default]
    Unknown,
}

impl InterfaceType {
    pub fn as_byte(self) -> u8 {
        match self {
            InterfaceType::EfiPro => 0,
            InterfaceType::EthernetIp => 1,
            InterfaceType::Profinet => 2,
            InterfaceType::NonSafeEthernet => 3,
            InterfaceType::Unknown => 0xFF,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => InterfaceType::EfiPro,
            1 => InterfaceType::EthernetIp,
            2 => InterfaceType::Profinet,
            3 => InterfaceType::NonSafeEthernet,
            _ => InterfaceType::Unknown,
        }
    }

    fn from_type_code_char(c: u8) -> Self {
        match c {
            b'E' => InterfaceType::EfiPro,
            b'I' => InterfaceType::EthernetIp,
            b'P' => InterfaceType::Profinet,
            b'N' => InterfaceType::NonSafeEthernet,
            _ => InterfaceType::Unknown,
        }
    }
}

/// Connection and streaming settings owned by the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommSettings {
    pub sensor_ip: Ipv4Addr,
    pub sensor_tcp_port: u16,
    pub host_ip: Ipv4Addr,
    /// 0 binds an ephemeral port; the bound port is written back on start.
    pub host_udp_port: u16,
    pub channel: u8,
    pub enabled: bool,
    /// Publish every n-th scan.
    pub publishing_frequency: u16,
    /// Degrees; start == end selects the full scan range.
    pub start_angle: f32,
    pub end_angle: f32,
    pub features: Features,
    #[serde(skip)]
    pub interface_type: InterfaceType,
}

impl Default for CommSettings {
    fn default() -> Self {
        CommSettings {
            sensor_ip: Ipv4Addr::new(192, 168, 1, 11),
            sensor_tcp_port: 2122,
            host_ip: Ipv4Addr::new(192, 168, 1, 9),
            host_udp_port: 0,
            channel: 0,
            enabled: true,
            publishing_frequency: 1,
            start_angle: 0.0,
            end_angle: 0.0,
            features: Features::all(),
            interface_type: InterfaceType::Unknown,
        }
    }
}

/// Size of the encoded communication settings record.
pub const COMM_SETTINGS_LEN: usize = 32;

impl CommSettings {
    pub fn sensor_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.sensor_ip, self.sensor_tcp_port))
    }

    pub fn host_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.host_ip, self.host_udp_port))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, angle) in [("start_angle", self.start_angle), ("end_angle", self.end_angle)] {
            if !angle.is_finite() || !(-360.0..=360.0).contains(&angle) {
                return Err(Error::Config(format!(
                    "{} must be within [-360, 360] degrees, got {}",
                    name, angle
                )));
            }
        }
        if self.enabled && self.publishing_frequency == 0 {
            return Err(Error::Config(
                "publishing_frequency must be at least 1 for an enabled channel".to_string(),
            ));
        }
        Ok(())
    }

    /// Append the 32-byte record written by the communication settings command.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut w = ByteWriter::new(buf);
        w.write_u8(self.channel);
        w.write_zeros(3);
        w.write_u8(self.enabled as u8);
        w.write_zeros(3);
        w.write_u8(self.interface_type.as_byte());
        w.write_zeros(3);
        w.write_u32(u32::from(self.host_ip));
        w.write_u16(self.host_udp_port);
        w.write_u16(self.publishing_frequency);
        w.write_f32(self.start_angle);
        w.write_f32(self.end_angle);
        w.write_u16(self.features.mask());
        w.write_zeros(2);
    }

    /// Parse the 32-byte record. Sensor address fields are left at their defaults.
    pub fn decode(bytes: &[u8]) -> std::result::Result<CommSettings, CodecError> {
        let mut r = ByteReader::new(bytes);
        let channel = r.read_u8()?;
        r.skip(3)?;
        let enabled = r.read_u8()? != 0;
        r.skip(3)?;
        let interface_type = InterfaceType::from_byte(r.read_u8()?);
        r.skip(3)?;
        let host_ip = Ipv4Addr::from(r.read_u32()?);
        let host_udp_port = r.read_u16()?;
        let publishing_frequency = r.read_u16()?;
        let start_angle = r.read_f32()?;
        let end_angle = r.read_f32()?;
        let features = Features::from_mask(r.read_u16()?);
        r.skip(2)?;
        Ok(CommSettings {
            host_ip,
            host_udp_port,
            channel,
            enabled,
            publishing_frequency,
            start_angle,
            end_angle,
            features,
            interface_type,
            ..CommSettings::default()
        })
    }
}

/// Parsed device type code, e.g. `MICS3-ABAZ55IZ1P01`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeCode {
    pub type_code: String,
    pub interface_type: InterfaceType,
    /// Metres.
    pub max_range: f32,
}

impl TypeCode {
    /// Characters 10..12 hold the range in decimetres, character 12 the interface.
    pub fn parse(type_code: &str) -> Option<TypeCode> {
        let bytes = type_code.as_bytes();
        if bytes.len() < 13 {
            return None;
        }
        let range_dm: u32 = type_code.get(10..12)?.parse().ok()?;
        Some(TypeCode {
            type_code: type_code.to_string(),
            interface_type: InterfaceType::from_type_code_char(bytes[12]),
            max_range: range_dm as f32 / 10.0,
        })
    }
}

/// Geometry of one monitoring field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldData {
    pub is_valid: bool,
    pub field_type: u8,
    pub multiplication_factor: u16,
    /// Degrees.
    pub start_angle: f32,
    /// Degrees per beam.
    pub angular_resolution: f32,
    /// Raw distances; multiply by `multiplication_factor` for millimetres.
    pub beam_distances: Vec<u16>,
}

impl FieldData {
    pub fn end_angle(&self) -> f32 {
        self.start_angle + self.angular_resolution * self.beam_distances.len() as f32
    }

    /// Fails with [`CodecError::TooLarge`] beyond 65535 beams; `buf` is left untouched then.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> std::result::Result<(), CodecError> {
        let beams = u16_len("beam count", self.beam_distances.len())?;
        let mut w = ByteWriter::new(buf);
        w.write_u8(self.is_valid as u8);
        w.write_u8(self.field_type);
        w.write_u16(self.multiplication_factor);
        w.write_f32(self.start_angle);
        w.write_f32(self.angular_resolution);
        w.write_u16(beams);
        for &d in &self.beam_distances {
            w.write_u16(d);
        }
        Ok(())
    }

    pub fn decode(r: &mut ByteReader<'_>) -> std::result::Result<FieldData, CodecError> {
        let is_valid = r.read_u8()? != 0;
        let field_type = r.read_u8()?;
        let multiplication_factor = r.read_u16()?;
        let start_angle = r.read_f32()?;
        let angular_resolution = r.read_f32()?;
        let beams = r.read_u16()? as usize;
        let beam_distances = (0..beams)
            .map(|_| r.read_u16())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(FieldData {
            is_valid,
            field_type,
            multiplication_factor,
            start_angle,
            angular_resolution,
            beam_distances,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub indicator: char,
    pub major: u8,
    pub minor: u8,
    pub release: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}.{}.{}", self.indicator, self.major, self.minor, self.release)
    }
}
