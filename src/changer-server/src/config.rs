// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for changer-server.
//!
//! Config is loaded from the `[changer-server]` section of `changer-rs.toml`.
//! Default search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./changer-rs.toml`
//! 3. `~/.config/changer-rs/changer-rs.toml`
//! 4. `/etc/changer-rs/changer-rs.toml`

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use changer_app::ConfigFile;

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub general: GeneralConfig,
    pub changer: ChangerConfig,
    /// Robot dashboard backend
    pub robot: RobotConfig,
    /// Robot event listener (line protocol)
    pub listen: ListenConfig,
    /// Operator listener (JSON lines)
    pub control: ControlConfig,
    pub vision: VisionConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangerConfig {
    /// Number of magazine slots
    pub nsamples: usize,
}

impl Default for ChangerConfig {
    fn default() -> Self {
        Self { nsamples: 12 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Backend name ("ur", "dummy")
    pub backend: String,
    /// Dashboard server host
    pub host: String,
    /// Dashboard server port
    pub port: u16,
    /// Timeout of a single dashboard request in milliseconds
    pub timeout_ms: u64,
    /// Status polling interval in milliseconds while idle
    pub poll_interval_ms: u64,
    /// Connection attempts before a request fails
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    pub retry_base_delay_ms: u64,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            backend: "dummy".to_string(),
            host: "127.0.0.1".to_string(),
            port: 29999,
            timeout_ms: 2000,
            poll_interval_ms: 1000,
            max_retries: 5,
            retry_base_delay_ms: 200,
        }
    }
}

impl RobotConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Robot event listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub enabled: bool,
    pub listen: IpAddr,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 50030,
        }
    }
}

/// Operator listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    pub listen: IpAddr,
    pub port: u16,
    pub auth: AuthConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 50031,
            auth: AuthConfig::default(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted operator tokens. Empty disables the check.
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    /// No camera; QR triggers never identify a sample
    #[default]
    None,
    /// Re-read an image file on every grab
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    pub camera: CameraKind,
    /// Image read by the file camera
    pub image_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_log_level(self.general.log_level.as_deref())?;

        if self.changer.nsamples == 0 {
            return Err("[changer].nsamples must be > 0".to_string());
        }

        if self.robot.backend.trim().is_empty() {
            return Err("[robot].backend must not be empty".to_string());
        }
        if self.robot.host.trim().is_empty() {
            return Err("[robot].host must not be empty".to_string());
        }
        if self.robot.port == 0 {
            return Err("[robot].port must be > 0".to_string());
        }
        if self.robot.timeout_ms == 0 {
            return Err("[robot].timeout_ms must be > 0".to_string());
        }
        if self.robot.poll_interval_ms == 0 {
            return Err("[robot].poll_interval_ms must be > 0".to_string());
        }
        if self.robot.max_retries == 0 {
            return Err("[robot].max_retries must be > 0".to_string());
        }
        if self.robot.retry_base_delay_ms == 0 {
            return Err("[robot].retry_base_delay_ms must be > 0".to_string());
        }

        if self.listen.enabled && self.listen.port == 0 {
            return Err("[listen].port must be > 0 when listener is enabled".to_string());
        }
        if self.control.enabled && self.control.port == 0 {
            return Err("[control].port must be > 0 when control is enabled".to_string());
        }
        if self.listen.enabled
            && self.control.enabled
            && self.listen.port == self.control.port
            && self.listen.listen == self.control.listen
        {
            return Err("[listen] and [control] must not share an address".to_string());
        }
        if self.control.auth.tokens.iter().any(|t| t.trim().is_empty()) {
            return Err("[control.auth].tokens must not contain empty tokens".to_string());
        }

        if self.vision.camera == CameraKind::File && self.vision.image_path.is_none() {
            return Err("[vision].image_path must be set for camera = \"file\"".to_string());
        }
        Ok(())
    }

    /// Generate an example configuration wrapped under the
    /// `[changer-server]` section header.
    pub fn example_combined_toml() -> String {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(rename = "changer-server")]
            inner: ServerConfig,
        }
        let example = ServerConfig {
            general: GeneralConfig {
                log_level: Some("info".to_string()),
            },
            robot: RobotConfig {
                backend: "ur".to_string(),
                host: "192.168.1.10".to_string(),
                ..RobotConfig::default()
            },
            vision: VisionConfig {
                camera: CameraKind::File,
                image_path: Some(PathBuf::from("/var/lib/changer-rs/camera.png")),
            },
            ..ServerConfig::default()
        };
        toml::to_string_pretty(&Wrapper { inner: example }).unwrap_or_default()
    }
}

fn validate_log_level(level: Option<&str>) -> Result<(), String> {
    match level {
        None | Some("trace" | "debug" | "info" | "warn" | "error") => Ok(()),
        Some(other) => Err(format!(
            "[general].log_level '{}' is invalid (expected one of: trace, debug, info, warn, error)",
            other
        )),
    }
}

impl ConfigFile for ServerConfig {
    fn section_key() -> &'static str {
        "changer-server"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.changer.nsamples, 12);
        assert_eq!(config.robot.backend, "dummy");
        assert_eq!(config.robot.addr(), "127.0.0.1:29999");
        assert!(config.listen.enabled);
        assert_eq!(config.listen.port, 50030);
        assert_eq!(config.control.port, 50031);
        assert_eq!(config.control.listen, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(config.control.auth.tokens.is_empty());
        assert_eq!(config.vision.camera, CameraKind::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[changer]
nsamples = 24

[robot]
backend = "ur"
host = "10.0.0.5"
timeout_ms = 500

[listen]
listen = "0.0.0.0"
port = 6000

[control]
port = 6001

[control.auth]
tokens = ["secret"]

[vision]
camera = "file"
image_path = "/tmp/frame.png"
"#;
        let config: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level.as_deref(), Some("debug"));
        assert_eq!(config.changer.nsamples, 24);
        assert_eq!(config.robot.addr(), "10.0.0.5:29999");
        assert_eq!(config.robot.timeout_ms, 500);
        assert_eq!(config.robot.poll_interval_ms, 1000);
        assert_eq!(config.listen.port, 6000);
        assert_eq!(config.control.port, 6001);
        assert_eq!(config.control.auth.tokens, vec!["secret".to_string()]);
        assert_eq!(config.vision.camera, CameraKind::File);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_example_combined_toml_parses() {
        let example = ServerConfig::example_combined_toml();
        let table: toml::Table = toml::from_str(&example).unwrap();
        let section = toml::to_string(table.get("changer-server").unwrap()).unwrap();
        let config: ServerConfig = toml::from_str(&section).unwrap();
        assert_eq!(config.robot.backend, "ur");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejections() {
        let mut config = ServerConfig::default();
        config.changer.nsamples = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.general.log_level = Some("loud".to_string());
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.vision.camera = CameraKind::File;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.control.auth.tokens = vec![" ".to_string()];
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.control.listen = config.listen.listen;
        config.control.port = config.listen.port;
        assert!(config.validate().is_err());
    }
}
