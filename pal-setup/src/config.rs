// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `pal-setup`.

use serde::Deserialize;
use thiserror::Error;

use common::logging::LogFormat;
use pal_client::PalConfig;
use pal_client::Transport;

use crate::provision;
use crate::provision::PortSpec;
use crate::provision::ProvisionError;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {err}")]
    Io { path: String, err: std::io::Error },
    #[error("failed to parse {path}: {msg}")]
    Parse { path: String, msg: String },
    #[error(transparent)]
    Invalid(#[from] ProvisionError),
}

/// The run-time settings, assembled from the config file and the command
/// line.
#[derive(Debug)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stderr.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// How to reach the PAL service.
    pub pal: PalConfig,

    /// The ports to bring up, in the order they should be configured.
    pub ports: Vec<PortSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Human,
            pal: PalConfig::default(),
            ports: Vec::new(),
        }
    }
}

/// The contents of a `--config` file.  Every setting is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub service: Option<String>,
    pub transport: Option<Transport>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

impl ConfigFile {
    pub fn parse(path: &str, contents: &str) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            msg: e.to_string(),
        })
    }

    pub fn load(path: &str) -> ConfigResult<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
                path: path.to_string(),
                err,
            })?;
        ConfigFile::parse(path, &contents)
    }
}

fn update_from_file(file: ConfigFile, config: &mut Config) {
    if let Some(host) = file.host {
        config.pal.host = host;
    }
    if let Some(port) = file.port {
        config.pal.port = port;
    }
    if let Some(service) = file.service {
        config.pal.service = service;
    }
    if let Some(transport) = file.transport {
        config.pal.transport = transport;
    }
    config.ports = file.ports;
}

// Use the command-line arguments to update the run-time config.
fn update_from_cli(opts: &crate::Opt, config: &mut Config) {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(host) = &opts.host {
        config.pal.host = host.to_string();
    }

    if let Some(port) = opts.port {
        config.pal.port = port;
    }

    if let Some(service) = &opts.service {
        config.pal.service = service.to_string();
    }

    if let Some(transport) = opts.transport {
        config.pal.transport = transport;
    }

    config.ports.extend_from_slice(&opts.specs);
}

/// Build the Config struct containing the settings for this run.  Values in
/// the config file replace the defaults, and command-line options override
/// both.  Ports given on the command line are configured after those listed
/// in the file.
pub(crate) fn build_config(opts: &crate::Opt) -> ConfigResult<Config> {
    let mut config = Config::default();

    if let Some(path) = &opts.config {
        update_from_file(ConfigFile::load(path)?, &mut config);
    }
    update_from_cli(opts, &mut config);
    provision::validate(&config.ports)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opt;
    use common::ports::PortFec;
    use common::ports::PortSpeed;
    use pretty_assertions::assert_eq;

    const EXAMPLE: &str = r#"
host = "switch0"
port = 9091
transport = "framed"

[[ports]]
port = 144
speed = "10G"

[[ports]]
device = 0
port = 155
speed = "25G"
fec = "rs"
"#;

    fn spec(port: u16, speed: PortSpeed, fec: PortFec) -> PortSpec {
        PortSpec {
            device: 0,
            port,
            speed,
            fec,
        }
    }

    #[test]
    fn test_parse_file() {
        let file = ConfigFile::parse("example.toml", EXAMPLE).unwrap();
        assert_eq!(file.host.as_deref(), Some("switch0"));
        assert_eq!(file.port, Some(9091));
        assert_eq!(file.service, None);
        assert_eq!(file.transport, Some(Transport::Framed));
        assert_eq!(
            file.ports,
            vec![
                spec(144, PortSpeed::Speed10G, PortFec::None),
                spec(155, PortSpeed::Speed25G, PortFec::RS),
            ]
        );
    }

    #[test]
    fn test_sample_file() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/misc/ports.toml");
        let file = ConfigFile::load(path).unwrap();
        assert_eq!(file.transport, Some(Transport::Buffered));
        let ports: Vec<u16> = file.ports.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![144, 155, 153, 161, 163]);
        assert!(provision::validate(&file.ports).is_ok());
    }

    #[test]
    fn test_parse_file_errors() {
        for contents in [
            "hostname = \"switch0\"\n",
            "[[ports]]\nport = 144\n",
            "[[ports]]\nport = 144\nspeed = \"12G\"\n",
            "[[ports]]\nport = 144\nspeed = \"10G\"\nlanes = 4\n",
        ] {
            match ConfigFile::parse("bad.toml", contents) {
                Err(ConfigError::Parse { path, .. }) => {
                    assert_eq!(path, "bad.toml")
                }
                r => panic!("expected a parse error for {contents:?}: {r:?}"),
            }
        }
    }

    #[test]
    fn test_file_then_cli() {
        let mut config = Config::default();
        update_from_file(
            ConfigFile::parse("example.toml", EXAMPLE).unwrap(),
            &mut config,
        );
        let opts = Opt {
            host: Some("127.0.0.1".to_string()),
            service: Some("conn_mgr".to_string()),
            specs: vec!["0/161:10G".parse().unwrap()],
            log_format: Some(LogFormat::Json),
            ..Default::default()
        };
        update_from_cli(&opts, &mut config);

        assert_eq!(config.pal.host, "127.0.0.1");
        assert_eq!(config.pal.port, 9091);
        assert_eq!(config.pal.service, "conn_mgr");
        assert_eq!(config.pal.transport, Transport::Framed);
        assert_eq!(config.log_format, LogFormat::Json);
        let ports: Vec<u16> = config.ports.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![144, 155, 161]);
    }

    #[test]
    fn test_cli_transport_overrides_file() {
        let mut config = Config::default();
        update_from_file(
            ConfigFile::parse("example.toml", EXAMPLE).unwrap(),
            &mut config,
        );
        assert_eq!(config.pal.transport, Transport::Framed);

        let opts = Opt {
            transport: Some(Transport::Buffered),
            ..Default::default()
        };
        update_from_cli(&opts, &mut config);
        assert_eq!(config.pal.transport, Transport::Buffered);

        // Leaving the option off keeps whatever the file said.
        let mut config = Config::default();
        update_from_file(
            ConfigFile::parse("example.toml", EXAMPLE).unwrap(),
            &mut config,
        );
        update_from_cli(&Opt::default(), &mut config);
        assert_eq!(config.pal.transport, Transport::Framed);
    }

    #[test]
    fn test_cli_only() {
        let opts = Opt {
            port: Some(9999),
            transport: Some(Transport::Framed),
            specs: vec!["144:10G".parse().unwrap()],
            ..Default::default()
        };
        let config = build_config(&opts).unwrap();
        assert_eq!(config.pal.address(), "localhost:9999");
        assert_eq!(config.pal.transport, Transport::Framed);
        assert_eq!(config.log_file, None);
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(
            config.ports,
            vec![spec(144, PortSpeed::Speed10G, PortFec::None)]
        );
    }

    #[test]
    fn test_no_ports() {
        let err = build_config(&Opt::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid(ProvisionError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let opts = Opt {
            config: Some("/nonexistent/pal-setup.toml".to_string()),
            ..Default::default()
        };
        match build_config(&opts) {
            Err(ConfigError::Io { path, .. }) => {
                assert_eq!(path, "/nonexistent/pal-setup.toml")
            }
            r => panic!("expected an IO error: {r:?}"),
        }
    }
}
