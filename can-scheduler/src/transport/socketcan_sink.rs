//! SocketCAN sink (Linux)

use super::FrameSink;
use crate::types::{CanFrame, Result, SchedulerError};
use socketcan::{
    CanFdFrame, CanFdSocket, CanFrame as SocketFrame, CanSocket, EmbeddedFrame, ExtendedId, Id,
    Socket, StandardId,
};

enum Channel {
    Classic(CanSocket),
    Fd(CanFdSocket),
}

/// Sends frames on a SocketCAN interface such as `can0` or `vcan0`
pub struct SocketCanSink {
    interface: String,
    channel: Channel,
}

impl SocketCanSink {
    /// Open `interface`; `fd` opens a CAN-FD capable socket
    pub fn open(interface: &str, fd: bool) -> Result<Self> {
        let channel = if fd {
            Channel::Fd(CanFdSocket::open(interface)?)
        } else {
            Channel::Classic(CanSocket::open(interface)?)
        };

        log::info!("Opened SocketCAN interface: {} (fd: {})", interface, fd);

        Ok(Self {
            interface: interface.to_string(),
            channel,
        })
    }

    /// Name of the interface
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn frame_id(frame: &CanFrame) -> Result<Id> {
        let id = if frame.is_extended {
            ExtendedId::new(frame.can_id).map(Id::Extended)
        } else {
            u16::try_from(frame.can_id)
                .ok()
                .and_then(StandardId::new)
                .map(Id::Standard)
        };
        id.ok_or_else(|| SchedulerError::Transport(format!("invalid CAN id 0x{:X}", frame.can_id)))
    }
}

impl FrameSink for SocketCanSink {
    fn send(&self, frame: &CanFrame) -> Result<()> {
        let id = Self::frame_id(frame)?;
        let invalid = || SchedulerError::Transport(format!("cannot build frame {}", frame));

        match (&self.channel, frame.is_fd) {
            (Channel::Classic(socket), false) => {
                let out = SocketFrame::new(id, &frame.data).ok_or_else(invalid)?;
                socket.write_frame(&out)?;
            }
            (Channel::Fd(socket), false) => {
                let out = SocketFrame::new(id, &frame.data).ok_or_else(invalid)?;
                socket.write_frame(&out)?;
            }
            (Channel::Fd(socket), true) => {
                let out = CanFdFrame::new(id, &frame.data).ok_or_else(invalid)?;
                socket.write_frame(&out)?;
            }
            (Channel::Classic(_), true) => {
                return Err(SchedulerError::Transport(format!(
                    "{} is not opened in CAN-FD mode, cannot send frame 0x{:X}",
                    self.interface, frame.can_id
                )));
            }
        }

        Ok(())
    }
}
