//! Consumer-facing driver: configuration, one-shot control commands and the scan stream.
//!
//! Each control request opens its own session and closes it again, so the control channel
//! is idle while scans stream in. The streaming side runs on its own thread and reads the
//! shared settings snapshot, never the control connection.

use crate::command::{
    Command, MeasurementMethod, ReadFieldGeometry, ReadFirmwareVersion, ReadString, ReadTypeCode,
    WriteCommSettings, WriteFieldGeometry,
};
use crate::data::Data;
use crate::error::{Error, Result};
use crate::receiver::ScanReceiver;
use crate::session::{Cola2Session, SessionConfig};
use crate::settings::{CommSettings, FieldData, FirmwareVersion, InterfaceType, TypeCode};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Microscan3 {
    settings: Arc<RwLock<CommSettings>>,
    session_config: SessionConfig,
    receiver: Option<ScanReceiver>,
}

impl Microscan3 {
    pub fn new(settings: CommSettings) -> Self {
        Self::with_session_config(settings, SessionConfig::default())
    }

    pub fn with_session_config(settings: CommSettings, session_config: SessionConfig) -> Self {
        Microscan3 {
            settings: Arc::new(RwLock::new(settings)),
            session_config,
            receiver: None,
        }
    }

    /// Copy of the current settings.
    pub fn settings(&self) -> CommSettings {
        self.settings.read().clone()
    }

    /// Address the scan receiver is bound to, while running.
    pub fn local_udp_addr(&self) -> Option<SocketAddr> {
        self.receiver.as_ref().map(|r| r.local_addr())
    }

    pub fn is_running(&self) -> bool {
        self.receiver.as_ref().map_or(false, |r| r.is_running())
    }

    /// Validate and store `settings`. Nothing is sent to the sensor.
    ///
    /// While the receiver is running, a host port of 0 keeps the bound port. An `Unknown`
    /// interface type keeps the one last reported by the sensor.
    pub fn configure(&self, settings: &CommSettings) -> Result<()> {
        settings.validate()?;
        let mut next = settings.clone();
        if next.host_udp_port == 0 {
            if let Some(addr) = self.local_udp_addr() {
                next.host_udp_port = addr.port();
            }
        }
        let mut current = self.settings.write();
        if next.interface_type == InterfaceType::Unknown {
            next.interface_type = current.interface_type;
        }
        *current = next;
        Ok(())
    }

    /// Read the type code without logging in and record the reported interface type.
    pub fn request_type_code(&self, settings: &CommSettings) -> Result<TypeCode> {
        let session = Cola2Session::new(self.session_config.clone());
        session.connect(settings.sensor_addr())?;
        let result = session.execute(&ReadTypeCode);
        session.close();
        let type_code = result?;
        log::info!(
            "type code {} ({:?}, {} m)",
            type_code.type_code,
            type_code.interface_type,
            type_code.max_range
        );
        self.settings.write().interface_type = type_code.interface_type;
        Ok(type_code)
    }

    /// Store `settings` and write them to the sensor.
    pub fn change_sensor_settings(&self, settings: &CommSettings) -> Result<()> {
        self.configure(settings)?;
        let snapshot = self.settings();
        self.with_session(snapshot.sensor_addr(), &WriteCommSettings { settings: snapshot.clone() })
    }

    pub fn request_device_name(&self) -> Result<String> {
        self.run(&ReadString::device_name())
    }

    pub fn request_serial_number(&self) -> Result<String> {
        self.run(&ReadString::serial_number())
    }

    pub fn request_project_name(&self) -> Result<String> {
        self.run(&ReadString::project_name())
    }

    pub fn request_firmware_version(&self) -> Result<FirmwareVersion> {
        self.run(&ReadFirmwareVersion)
    }

    pub fn request_field_data(&self, index: u8) -> Result<FieldData> {
        self.run(&ReadFieldGeometry { index })
    }

    pub fn write_field_data(&self, index: u8, field: &FieldData) -> Result<()> {
        self.run(&WriteFieldGeometry {
            index,
            field: field.clone(),
        })
    }

    pub fn start_measurement(&self) -> Result<()> {
        self.run(&MeasurementMethod::Start)
    }

    pub fn stop_measurement(&self) -> Result<()> {
        self.run(&MeasurementMethod::Stop)
    }

    /// Bind the scan socket and deliver every decoded frame to `on_frame`.
    ///
    /// With a host port of 0 an ephemeral port is bound and stored in the settings, so the
    /// next [`change_sensor_settings`](Self::change_sensor_settings) announces it.
    pub fn start<F>(&mut self, on_frame: F) -> Result<SocketAddr>
    where
        F: FnMut(Data) + Send + 'static,
    {
        if let Some(receiver) = &self.receiver {
            return Err(Error::Config(format!(
                "scan receiver already running on {}",
                receiver.local_addr()
            )));
        }
        let bind_addr = self.settings.read().host_addr();
        let receiver = ScanReceiver::spawn(bind_addr, self.settings.clone(), on_frame)?;
        let local = receiver.local_addr();
        self.settings.write().host_udp_port = local.port();
        self.receiver = Some(receiver);
        Ok(local)
    }

    /// Stop the scan receiver; returns within about one receive timeout.
    pub fn stop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
        }
    }

    fn run<C: Command>(&self, cmd: &C) -> Result<C::Output> {
        let addr = self.settings.read().sensor_addr();
        self.with_session(addr, cmd)
    }

    /// Connect, log in, execute `cmd`, log out.
    fn with_session<C: Command>(&self, addr: SocketAddr, cmd: &C) -> Result<C::Output> {
        let session = Cola2Session::new(self.session_config.clone());
        session.connect(addr)?;
        if let Err(e) = session.login() {
            session.close();
            return Err(e);
        }
        let result = session.execute(cmd);
        session.logout()?;
        result
    }
}

impl Drop for Microscan3 {
    fn drop(&mut self) {
        self.stop();
    }
}
