//! Driver configuration file.
//!
//! ```toml
//! [communication]
//! sensor_ip = "192.168.1.11"
//! host_ip = "192.168.1.9"
//! host_udp_port = 6060
//! start_angle = -47.5
//! end_angle = 227.5
//!
//! [communication.features]
//! intrusion_data = false
//!
//! [session]
//! timeout_ms = 2000
//! ```
//!
//! Every key is optional and falls back to its default.

use crate::error::{Error, Result};
use crate::session::SessionConfig;
use crate::settings::CommSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub communication: CommSettings,
    pub session: SessionConfig,
}

impl DriverConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.communication.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn empty_document_gives_defaults() {
        let config = DriverConfig::from_toml_str("").expect("parse");
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.communication.sensor_tcp_port, 2122);
        assert_eq!(config.session.timeout, Duration::from_secs(5));
    }

    #[test]
    fn partial_tables_override_defaults() {
        let config = DriverConfig::from_toml_str(
            r#"
            [communication]
            sensor_ip = "10.4.0.20"
            host_udp_port = 6060
            start_angle = -47.5
            end_angle = 227.5

            [communication.features]
            intrusion_data = false

            [session]
            timeout_ms = 1500
            "#,
        )
        .expect("parse");
        assert_eq!(config.communication.sensor_ip, Ipv4Addr::new(10, 4, 0, 20));
        assert_eq!(config.communication.host_udp_port, 6060);
        assert!(!config.communication.features.intrusion_data);
        assert!(config.communication.features.measurement_data);
        assert_eq!(config.session.timeout, Duration::from_millis(1500));
        assert_eq!(config.session.max_consecutive_timeouts, 3);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        assert!(matches!(
            DriverConfig::from_toml_str("[communication]\nstart_angle = 720.0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            DriverConfig::from_toml_str("[communication]\nsensor_ip = \"not an ip\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_and_save_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[communication]\nchannel = 2\npublishing_frequency = 4").expect("write");
        let config = DriverConfig::load(file.path()).expect("load");
        assert_eq!(config.communication.channel, 2);
        assert_eq!(config.communication.publishing_frequency, 4);

        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("driver.toml");
        config.save(&out).expect("save");
        assert_eq!(DriverConfig::load(&out).expect("reload"), config);

        assert!(matches!(
            DriverConfig::load(dir.path().join("missing.toml")),
            Err(Error::Config(_))
        ));
    }
}
