//! Serial devices driven through termios.

use super::{TransportPair, TransportReader, TransportWriter};
use crate::config::{ByteSize, FlowControl, Parity, SerialSettings, StopBits};
use crate::error::TransportError;
use anyhow::{Context as _, Result, anyhow};
use nix::fcntl::OFlag;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, SetArg, SpecialCharacterIndices, Termios,
};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;
use tracing::{debug, warn};

/// Open `device` and apply `settings` to it.
pub fn open(device: &str, settings: &SerialSettings) -> Result<TransportPair, TransportError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NOCTTY.bits())
        .open(device)
        .map_err(|source| TransportError::Open {
            device: device.to_string(),
            source,
        })?;

    configure(&file, settings).map_err(|e| TransportError::Configure {
        device: device.to_string(),
        reason: format!("{e:#}"),
    })?;

    let reader = file.try_clone().map_err(|source| TransportError::Open {
        device: device.to_string(),
        source,
    })?;

    debug!(device, baud = settings.baud, "opened serial device");
    Ok((
        Box::new(SerialReader {
            file: reader,
            read_timeout: settings.read_timeout,
        }),
        Box::new(SerialWriter {
            file: Some(file),
            write_timeout: settings.write_timeout,
        }),
    ))
}

fn configure(file: &File, settings: &SerialSettings) -> Result<()> {
    let mut tio = termios::tcgetattr(file.as_fd()).context("tcgetattr")?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, baud_rate(settings.baud)?).context("cfsetspeed")?;

    tio.control_flags.insert(ControlFlags::CREAD | ControlFlags::CLOCAL);
    apply_byte_size(&mut tio, settings.byte_size);
    apply_parity(&mut tio, settings.parity);
    apply_stop_bits(&mut tio, settings.stop_bits);
    apply_flow_control(&mut tio, settings.flow_control);

    // Reads never block; waiting is done with poll().
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

    termios::tcsetattr(file.as_fd(), SetArg::TCSANOW, &tio).context("tcsetattr")?;
    Ok(())
}

fn apply_byte_size(tio: &mut Termios, byte_size: ByteSize) {
    tio.control_flags.remove(ControlFlags::CSIZE);
    tio.control_flags.insert(match byte_size {
        ByteSize::Five => ControlFlags::CS5,
        ByteSize::Six => ControlFlags::CS6,
        ByteSize::Seven => ControlFlags::CS7,
        ByteSize::Eight => ControlFlags::CS8,
    });
}

fn apply_parity(tio: &mut Termios, parity: Parity) {
    tio.control_flags
        .remove(ControlFlags::PARENB | ControlFlags::PARODD);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    tio.control_flags.remove(ControlFlags::CMSPAR);

    match parity {
        Parity::None => {
            tio.input_flags.remove(InputFlags::INPCK);
            return;
        }
        Parity::Even => tio.control_flags.insert(ControlFlags::PARENB),
        Parity::Odd => tio
            .control_flags
            .insert(ControlFlags::PARENB | ControlFlags::PARODD),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Parity::Mark => tio
            .control_flags
            .insert(ControlFlags::PARENB | ControlFlags::CMSPAR | ControlFlags::PARODD),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Parity::Space => tio
            .control_flags
            .insert(ControlFlags::PARENB | ControlFlags::CMSPAR),
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        Parity::Mark | Parity::Space => {
            warn!(?parity, "mark/space parity unsupported here, using none");
            return;
        }
    }
    tio.input_flags.insert(InputFlags::INPCK);
}

fn apply_stop_bits(tio: &mut Termios, stop_bits: StopBits) {
    match stop_bits {
        StopBits::One => tio.control_flags.remove(ControlFlags::CSTOPB),
        StopBits::Two => tio.control_flags.insert(ControlFlags::CSTOPB),
        StopBits::OnePointFive => {
            warn!("1.5 stop bits has no termios setting, using 2");
            tio.control_flags.insert(ControlFlags::CSTOPB);
        }
    }
}

fn apply_flow_control(tio: &mut Termios, flow_control: FlowControl) {
    tio.input_flags
        .remove(InputFlags::IXON | InputFlags::IXOFF | InputFlags::IXANY);
    tio.control_flags.remove(ControlFlags::CRTSCTS);
    match flow_control {
        FlowControl::None => {}
        FlowControl::XonXoff => tio.input_flags.insert(InputFlags::IXON | InputFlags::IXOFF),
        FlowControl::RtsCts => tio.control_flags.insert(ControlFlags::CRTSCTS),
        FlowControl::DsrDtr => warn!("DSR/DTR flow control has no termios setting, disabled"),
    }
}

fn baud_rate(baud: u32) -> Result<BaudRate> {
    Ok(match baud {
        110 => BaudRate::B110,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115200 => BaudRate::B115200,
        230400 => BaudRate::B230400,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        460800 => BaudRate::B460800,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        921600 => BaudRate::B921600,
        other => return Err(anyhow!("baud rate {other} is not supported by this platform")),
    })
}

fn poll_timeout(wait: Duration) -> PollTimeout {
    PollTimeout::from(u16::try_from(wait.as_millis()).unwrap_or(u16::MAX))
}

/// Receiving half of a serial device.
///
/// After the first bytes arrive the reader keeps collecting for as long as
/// more follow within `read_timeout`, so a burst comes back as one chunk.
pub struct SerialReader {
    file: File,
    read_timeout: Duration,
}

impl SerialReader {
    /// Wait for input. `Ok(false)` means the wait expired.
    fn wait_readable(&self, wait: Duration) -> Result<bool> {
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
        let ready = match poll(&mut fds, poll_timeout(wait)) {
            Ok(0) | Err(nix::errno::Errno::EINTR) => return Ok(false),
            Ok(_) => fds[0].revents().unwrap_or(PollFlags::empty()),
            Err(e) => return Err(e).context("poll on serial device"),
        };
        if ready.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            return Err(anyhow!("serial device reported {ready:?}"));
        }
        Ok(true)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e).context("read from serial device"),
        }
    }
}

impl TransportReader for SerialReader {
    fn poll_read(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize> {
        if !self.wait_readable(wait)? {
            return Ok(0);
        }
        let mut filled = self.read_available(buf)?;
        while filled > 0 && filled < buf.len() && self.wait_readable(self.read_timeout)? {
            let n = self.read_available(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Sending half of a serial device.
pub struct SerialWriter {
    file: Option<File>,
    write_timeout: Duration,
}

impl TransportWriter for SerialWriter {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("serial device already closed"))?;
        {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLOUT)];
            if poll(&mut fds, poll_timeout(self.write_timeout)).context("poll on serial device")?
                == 0
            {
                return Err(anyhow!(
                    "serial device not writable within {:?}",
                    self.write_timeout
                ));
            }
        }
        file.write_all(data).context("write to serial device")?;
        file.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            termios::tcdrain(file.as_fd()).context("tcdrain")?;
        }
        Ok(())
    }
}
