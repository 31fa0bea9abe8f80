use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::display::{AreaRequest, DeviceKind, Orientation};
use crate::display::ssd1306::DEFAULT_ADDRESS;

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

/// A single GPIO line on a character-device chip
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GpioPin {
    pub chip: PathBuf,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Ssd1306Wiring {
    pub i2c_device: PathBuf,
    pub address: u16,
}

impl Default for Ssd1306Wiring {
    fn default() -> Self {
        Self {
            i2c_device: PathBuf::from("/dev/i2c-3"),
            address: DEFAULT_ADDRESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct St7735sWiring {
    pub spi_device: PathBuf,
    pub mode: u8,
    pub bits_per_word: u8,
    pub speed_hz: u32,
    /// Largest single SPI transfer in bytes
    pub chunk_size: usize,
    pub reset: GpioPin,
    /// Data/command select line
    pub dc: GpioPin,
}

impl Default for St7735sWiring {
    fn default() -> Self {
        Self {
            spi_device: PathBuf::from("/dev/spidev3.0"),
            mode: 0,
            bits_per_word: 8,
            speed_hz: 32_000_000,
            chunk_size: 4096,
            reset: GpioPin {
                chip: PathBuf::from("/dev/gpiochip3"),
                line: 8,
            },
            dc: GpioPin {
                chip: PathBuf::from("/dev/gpiochip3"),
                line: 17,
            },
        }
    }
}

/// Where each panel is wired; every field defaults to the reference board
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub ssd1306: Ssd1306Wiring,
    pub st7735s: St7735sWiring,
}

impl DeviceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read device config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid device config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Command line of the `player` binary
pub fn command() -> Command {
    let number = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .help(help)
            .value_parser(value_parser!(i32))
            .allow_negative_numbers(true)
            .default_value("-1")
    };

    Command::new(app_name())
        .version(version())
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("path")
                .help("Video file to play")
                .value_parser(value_parser!(PathBuf))
                .required(true),
        )
        .arg(number("width", "Target width in pixels, -1 to derive it"))
        .arg(number("height", "Target height in pixels, -1 to derive it"))
        .arg(number("offsetX", "Horizontal offset, -1 to center"))
        .arg(number("offsetY", "Vertical offset, -1 to center"))
        .arg(
            Arg::new("orientation")
                .help("L, LI, P or PI")
                .value_parser(value_parser!(Orientation))
                .default_value("L"),
        )
        .arg(
            Arg::new("device")
                .long("device")
                .short('d')
                .help("Panel controller (ssd1306 or st7735s)")
                .value_parser(value_parser!(DeviceKind))
                .default_value("ssd1306"),
        )
        .arg(
            Arg::new("device-config")
                .long("device-config")
                .value_name("FILE")
                .help("JSON file overriding the panel wiring")
                .value_parser(value_parser!(PathBuf))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("linger")
                .long("linger")
                .value_name("SECONDS")
                .help("Seconds to keep the last frame on screen before exiting")
                .value_parser(value_parser!(u64))
                .default_value("10"),
        )
}

/// Everything the binary needs from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOptions {
    pub path: PathBuf,
    pub area: AreaRequest,
    pub orientation: Orientation,
    pub device: DeviceKind,
    pub device_config: Option<PathBuf>,
    pub linger_secs: u64,
}

impl PlayerOptions {
    pub fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let number = |name: &str| matches.get_one::<i32>(name).copied().unwrap_or(-1);

        Ok(Self {
            path: matches
                .get_one::<PathBuf>("path")
                .cloned()
                .context("missing video path")?,
            area: AreaRequest::from_signed(
                number("width"),
                number("height"),
                number("offsetX"),
                number("offsetY"),
            ),
            orientation: matches
                .get_one::<Orientation>("orientation")
                .copied()
                .unwrap_or_default(),
            device: matches
                .get_one::<DeviceKind>("device")
                .copied()
                .unwrap_or(DeviceKind::Ssd1306),
            device_config: matches.get_one::<PathBuf>("device-config").cloned(),
            linger_secs: matches.get_one::<u64>("linger").copied().unwrap_or(10),
        })
    }

    /// Wiring from `--device-config`, or the defaults
    pub fn device_config(&self) -> Result<DeviceConfig> {
        match &self.device_config {
            Some(path) => DeviceConfig::load(path),
            None => Ok(DeviceConfig::default()),
        }
    }
}
