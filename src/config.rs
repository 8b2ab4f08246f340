//! Session configuration and the key=value config file.
//!
//! ```text
//! # link check
//! scvcmd=AT
//! scvrsp=OK
//! baudrt=115200
//! bytesz=8
//! parity=N
//! stpbit=1
//! flowct=N
//! sentry=\r\nOK\r\n
//! sentry=\r\n+CME ERROR:.*\r\n
//! ```
//!
//! A malformed key is reported and that setting keeps its default. Any
//! `sentry` line replaces the built-in sentry set.

use crate::error::ConfigError;
use crate::framer::Sentry;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Baud rates accepted on the command line and in config files.
pub const ALLOWED_BAUD_RATES: &[u32] = &[
    110, 300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115200, 230400, 460800,
    921600,
];

pub const DEFAULT_SENTRIES: &[&str] = &["\r\nOK\r\n", "\r\nERROR\r\n", "\r\n+CME ERROR:.*\r\n"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteSize {
    Five,
    Six,
    Seven,
    Eight,
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5" => Ok(Self::Five),
            "6" => Ok(Self::Six),
            "7" => Ok(Self::Seven),
            "8" => Ok(Self::Eight),
            _ => Err("expected one of 5, 6, 7, 8".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N" => Ok(Self::None),
            "E" => Ok(Self::Even),
            "O" => Ok(Self::Odd),
            "M" => Ok(Self::Mark),
            "S" => Ok(Self::Space),
            _ => Err("expected one of N, E, O, M, S".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    OnePointFive,
    Two,
}

impl FromStr for StopBits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(Self::One),
            "1.5" => Ok(Self::OnePointFive),
            "2" => Ok(Self::Two),
            _ => Err("expected one of 1, 1.5, 2".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    XonXoff,
    RtsCts,
    DsrDtr,
}

impl FromStr for FlowControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "N" => Ok(Self::None),
            "X" => Ok(Self::XonXoff),
            "R" => Ok(Self::RtsCts),
            "D" => Ok(Self::DsrDtr),
            _ => Err("expected one of N, X, R, D".into()),
        }
    }
}

/// Line settings for a serial device.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub baud: u32,
    pub byte_size: ByteSize,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud: 115200,
            byte_size: ByteSize::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            read_timeout: Duration::from_millis(10),
            write_timeout: Duration::from_secs(1),
        }
    }
}

/// Command/response pair checked once before the session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub command: String,
    pub expect: String,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            command: "AT".into(),
            expect: "OK".into(),
        }
    }
}

/// Everything a session needs, fixed once the session is opened.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub serial: SerialSettings,
    pub sentries: Vec<Sentry>,
    pub handshake: Handshake,
    /// How long a command may go without any new data before it times out.
    pub response_timeout: Duration,
    /// Interval at which the session re-checks the receive buffer.
    pub poll_interval: Duration,
    /// Longest single wait of the stream reader on the transport.
    pub reader_wait: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            sentries: DEFAULT_SENTRIES
                .iter()
                .map(|s| Sentry::from_pattern(s))
                .collect(),
            handshake: Handshake::default(),
            response_timeout: Duration::from_secs(3),
            poll_interval: Duration::from_millis(10),
            reader_wait: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Load a config file on top of the defaults.
    ///
    /// Only an unreadable file is an error; malformed lines are logged and
    /// skipped, see [`SessionConfig::parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let (config, problems) = Self::parse(&content);
        for problem in &problems {
            warn!(config = %path.display(), "{problem}, using default");
        }
        Ok(config)
    }

    /// Parse config text, returning the resulting config and every problem
    /// found along the way.
    pub fn parse(content: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Self::default();
        let mut problems = Vec::new();
        let mut sentries = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = idx + 1;
            let text = raw.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            let Some((key, value)) = text.split_once('=') else {
                problems.push(ConfigError::Syntax {
                    line,
                    text: text.to_string(),
                });
                continue;
            };
            let key = key.trim();
            // Sentry values keep their surrounding blanks; they may matter.
            let value = if key == "sentry" { value } else { value.trim() };

            if let Err(reason) = config.apply(key, value, &mut sentries) {
                problems.push(match reason {
                    ApplyError::UnknownKey => ConfigError::UnknownKey {
                        line,
                        key: key.to_string(),
                    },
                    ApplyError::Value(reason) => ConfigError::Value {
                        line,
                        key: key.to_string(),
                        value: value.to_string(),
                        reason,
                    },
                });
            }
        }

        if !sentries.is_empty() {
            config.sentries = sentries;
        }
        (config, problems)
    }

    fn apply(&mut self, key: &str, value: &str, sentries: &mut Vec<Sentry>) -> Result<(), ApplyError> {
        match key {
            "scvcmd" => self.handshake.command = value.to_string(),
            "scvrsp" => self.handshake.expect = value.to_string(),
            "baudrt" => self.serial.baud = parse_baud(value).map_err(ApplyError::Value)?,
            "bytesz" => self.serial.byte_size = value.parse().map_err(ApplyError::Value)?,
            "parity" => self.serial.parity = value.parse().map_err(ApplyError::Value)?,
            "stpbit" => self.serial.stop_bits = value.parse().map_err(ApplyError::Value)?,
            "flowct" => self.serial.flow_control = value.parse().map_err(ApplyError::Value)?,
            "rdtout" => self.serial.read_timeout = parse_seconds(value).map_err(ApplyError::Value)?,
            "wrtout" => self.serial.write_timeout = parse_seconds(value).map_err(ApplyError::Value)?,
            "sentry" => {
                let decoded = decode_escapes(value);
                if decoded.is_empty() {
                    return Err(ApplyError::Value("sentry must not be empty".into()));
                }
                sentries.push(Sentry::from_pattern(&decoded));
            }
            _ => return Err(ApplyError::UnknownKey),
        }
        Ok(())
    }
}

enum ApplyError {
    UnknownKey,
    Value(String),
}

/// Parse a baud rate and check it against [`ALLOWED_BAUD_RATES`].
pub fn parse_baud(value: &str) -> Result<u32, String> {
    let baud: u32 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    if ALLOWED_BAUD_RATES.contains(&baud) {
        Ok(baud)
    } else {
        Err(format!("{baud} is not one of {ALLOWED_BAUD_RATES:?}"))
    }
}

/// Parse a non-negative number of seconds, fractions allowed.
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

/// Turn `\r`, `\n`, `\t` and `\\` escapes into the characters they name.
/// Unknown escapes are kept as written.
pub fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
