//! # microscan3: driver for the SICK microScan3 safety laser scanner
//!
//! Two independent channels:
//!
//! - **Control** (TCP, COLA2 telegrams): a [`Cola2Session`] logs in, executes typed
//!   [`Command`]s one at a time and logs out. Used to read device information and to write
//!   the communication settings that tell the sensor where to stream.
//! - **Streaming** (UDP): datagrams are reassembled into frames by [`PacketMerger`] and decoded
//!   section by section into [`Data`] by [`decode_data`]. [`ScanReceiver`] runs this loop on a
//!   thread and hands every frame to a callback.
//!
//! [`Microscan3`] ties both together for applications.
//!
//! ## Wire structure
//!
//! - **Telegram**: `STX | length | hub | noc | session id | request id | type | mode | name | payload | xor`
//! - **Datagram**: 24-byte header (frame id, total length, fragment offset) + fragment
//! - **Frame**: data header with a block table, then the optional sections
//!
//! All multi-byte fields are big-endian; flag groups are packed MSB first.
//!
//! ## Usage
//!
//! ```no_run
//! use microscan3::{CommSettings, Microscan3};
//!
//! let settings = CommSettings::default();
//! let mut device = Microscan3::new(settings.clone());
//! device.start(|frame| println!("scan {}", frame.header.scan_number))?;
//! device.change_sensor_settings(&device.settings())?;
//! # Ok::<(), microscan3::Error>(())
//! ```

pub mod codec;
pub mod command;
pub mod config;
pub mod data;
pub mod datagram;
pub mod device;
pub mod dump;
pub mod error;
pub mod frame;
pub mod receiver;
pub mod session;
pub mod settings;
pub mod telegram;

pub use codec::{ByteReader, ByteWriter, CodecError};
pub use command::Command;
pub use config::DriverConfig;
pub use data::{
    ApplicationData, ApplicationInputs, ApplicationOutputs, Data, DataHeader, DerivedValues,
    GeneralSystemState, IntrusionData, IntrusionDatum, MeasurementData, ScanPoint,
};
pub use datagram::{fragment, PacketMerger};
pub use device::Microscan3;
pub use error::{DecodeError, Error, Result, Section};
pub use frame::{decode_data, encode_data};
pub use receiver::{FrameAssembler, ScanReceiver};
pub use session::{Cola2Session, SessionConfig, SessionState};
pub use settings::{CommSettings, Features, FieldData, FirmwareVersion, InterfaceType, TypeCode};
pub use telegram::{Telegram, TelegramBuffer};
