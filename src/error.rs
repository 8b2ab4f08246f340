//! Error types for the session engine.
//!
//! Only [`TransportError`] and [`HandshakeError`] end a session. Everything
//! else is reported through `tracing` and the session carries on.

use std::path::PathBuf;
use thiserror::Error;

/// The byte-stream device could not be opened or configured.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to configure device {device}: {reason}")]
    Configure { device: String, reason: String },

    #[error("failed to spawn {program} in a pseudo terminal: {reason}")]
    Spawn { program: String, reason: String },
}

/// Problems with the key=value configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected key=value, got '{text}'")]
    Syntax { line: usize, text: String },

    #[error("line {line}: unknown key '{key}'")]
    UnknownKey { line: usize, key: String },

    #[error("line {line}: invalid value '{value}' for {key}: {reason}")]
    Value {
        line: usize,
        key: String,
        value: String,
        reason: String,
    },
}

/// Recoverable script failures. The interpreter logs these and moves on.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script {path}: {reason}")]
    ScriptFile { path: PathBuf, reason: String },

    #[error("{script}:{line}: loop has no matching loopend")]
    MalformedLoop { script: String, line: usize },

    #[error("{script}:{line}: invalid directive '{text}': {reason}")]
    InvalidDirective {
        script: String,
        line: usize,
        text: String,
        reason: String,
    },
}

/// The link check performed before the main loop did not succeed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake command '{command}' timed out")]
    TimedOut { command: String },

    #[error("handshake command '{command}' did not answer with '{expected}', got '{got}'")]
    Mismatch {
        command: String,
        expected: String,
        got: String,
    },
}
