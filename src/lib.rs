//! # Sercom
//!
//! A command/response session engine for serial modems.
//!
//! Sercom writes AT-style commands to a device and frames the replies using
//! configurable sentries: terminator strings such as `\r\nOK\r\n`, or
//! wildcard sentries such as `\r\n+CME ERROR:.*\r\n` that match a prefix and
//! run to the next line ending. A background stream reader collects device
//! output into a shared buffer while commands come from an operator or from
//! `.scom` scripts.
//!
//! ## Quick start
//!
//! ```no_run
//! use sercom::{Engine, SessionConfig, StdinInput, transport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SessionConfig::default();
//!     let pair = transport::serial::open("/dev/ttyUSB0", &config.serial)?;
//!
//!     let mut engine = Engine::start(pair, &config)?;
//!     engine.load_script("attach.scom".as_ref())?;
//!     let result = engine.run(&mut StdinInput::new()).await;
//!     engine.shutdown()?;
//!     result
//! }
//! ```
//!
//! ## Script syntax
//!
//! Each non-blank line of a script is either a directive or a command sent
//! verbatim to the device. Lines starting with `#` are comments.
//!
//! | Directive | Description |
//! |-----------|-------------|
//! | `loopbegin iter N` | Repeat the lines up to `loopend` N times |
//! | `loopbegin` | Repeat the lines up to `loopend` until the session stops |
//! | `loopend` | End of a loop body |
//! | `sleep 1.5` | Pause (`s` and `ms` suffixes accepted) |
//! | `break` | Leave the current script; its mother script resumes |
//! | `enman` | Switch to interactive mode, keeping the script stack |
//! | `enscom other.scom` | Run another script, then come back |
//!
//! Loop bodies may only hold commands and `sleep`.
//!
//! ## Capturing output
//!
//! By default responses go to stdout. Use [`Engine::with_output_handler`] to
//! redirect them, and the loopback transport to drive a session without
//! hardware:
//!
//! ```
//! use sercom::{Engine, QueuedInput, SessionConfig, transport::loopback};
//! use std::sync::{Arc, Mutex};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (pair, _handle) = loopback::open(|cmd: &[u8]| {
//!         let mut reply = cmd.to_vec();
//!         reply.extend_from_slice(b"\r\nOK\r\n");
//!         reply
//!     });
//!
//!     let captured = Arc::new(Mutex::new(Vec::<u8>::new()));
//!     let sink = captured.clone();
//!     let mut engine = Engine::start(pair, &SessionConfig::default())?
//!         .with_output_handler(move |data| sink.lock().unwrap().extend_from_slice(data));
//!
//!     engine.run(&mut QueuedInput::new(["ATI", "exit"])).await?;
//!     engine.shutdown()?;
//!     assert!(String::from_utf8_lossy(&captured.lock().unwrap()).contains("OK"));
//!     Ok(())
//! }
//! ```

pub mod alive;
pub mod config;
pub mod engine;
pub mod error;
pub mod framer;
pub mod input;
pub mod mode;
pub mod reader;
pub mod rx_buffer;
pub mod script;
pub mod session;
pub mod transcript;
pub mod transport;

pub use alive::AliveFlag;
pub use config::{Handshake, SerialSettings, SessionConfig};
pub use engine::Engine;
pub use error::{ConfigError, HandshakeError, ScriptError, TransportError};
pub use framer::{Frame, ResponseFramer, Sentry};
pub use input::{OperatorInput, QueuedInput, StdinInput};
pub use mode::{Mode, ModeController, OperatorAction};
pub use rx_buffer::RxBuffer;
pub use script::{ScriptContext, ScriptInterpreter, ScriptOutcome};
pub use session::{Command, Response, Session, Source};
pub use transcript::Transcript;
