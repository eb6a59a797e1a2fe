use log::{debug, error};
use std::time::{Duration, Instant};

use crate::codec::{decode_7_to_8, encode_8_to_7, to_signed};
use crate::error::{DisconnectError, ScError, TransportError, ValidationError};
use crate::protocol::{Command, Status};
use crate::transport::SysexTransport;

/// Size of the firmware command buffer, for each direction
pub const MAX_FIRMATA_CMD_BUFF_SZ: usize = 60;

/// Decoded reply of the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: i8,
    pub data: Vec<u8>,
}

/// One open link to the board. Requests are strictly sequential: every call
/// sends one frame and waits for its reply before returning.
pub struct Session<T: SysexTransport> {
    transport: T,
    timeout: Duration,
}

impl<T: SysexTransport> Session<T> {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Build the 7-bit encoded frame `[expLow, expHigh] ++ payload`.
    ///
    /// Both the encoded frame and the announced reply must fit the firmware
    /// buffer, nothing is truncated.
    pub fn build_frame(payload: &[u8], expected_response: usize) -> Result<Vec<u8>, ValidationError> {
        if expected_response > MAX_FIRMATA_CMD_BUFF_SZ {
            return Err(ValidationError::ResponseTooLarge {
                size: expected_response,
                max: MAX_FIRMATA_CMD_BUFF_SZ,
            });
        }

        let encoded_len = (payload.len() + 2) * 2;
        if encoded_len > MAX_FIRMATA_CMD_BUFF_SZ {
            return Err(ValidationError::FrameTooLarge {
                size: encoded_len,
                max: MAX_FIRMATA_CMD_BUFF_SZ,
            });
        }

        let mut frame = Vec::with_capacity(payload.len() + 2);
        frame.extend_from_slice(&(expected_response as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        Ok(encode_8_to_7(&frame))
    }

    /// Split a decoded reply into its signed status and data
    pub fn parse_reply(raw: &[u8]) -> Result<Reply, TransportError> {
        match decode_7_to_8(raw).split_first() {
            Some((&status, data)) => Ok(Reply {
                status: to_signed(status),
                data: data.to_vec(),
            }),
            None => Err(TransportError::Malformed("empty reply".into())),
        }
    }

    /// Send one command and wait for its reply
    pub fn send_frame(
        &mut self,
        command: Command,
        payload: &[u8],
        expected_response: usize,
    ) -> Result<Reply, ScError> {
        let frame = Self::build_frame(payload, expected_response)?;

        self.transport
            .clear_input()
            .map_err(|e| TransportError::Io(format!("{:?}", e)))?;
        debug!("Sending {:?}: {:02X?}", command, payload);
        let start = Instant::now();
        self.transport
            .send_sysex(command.id(), &frame)
            .map_err(|e| TransportError::Io(format!("{:?}", e)))?;

        let timeout_ms = self.timeout.as_millis().min(u32::MAX as u128) as u32;
        match self.transport.recv_sysex(timeout_ms) {
            Ok(Some(raw)) => {
                let reply = Self::parse_reply(&raw)?;
                if reply.status == Status::NO_ANSWER {
                    error!("Board reported no answer to {:?}", command);
                    return Err(TransportError::NoResponse(self.timeout).into());
                }
                debug!(
                    "Reply to {:?} after {:?}: status {} data {:02X?}",
                    command,
                    start.elapsed(),
                    reply.status,
                    reply.data
                );
                Ok(reply)
            }
            Ok(None) => {
                error!("No answer from board to {:?}", command);
                Err(TransportError::NoResponse(self.timeout).into())
            }
            Err(e) => {
                error!("Read error: {:?}", e);
                Err(TransportError::Io(format!("{:?}", e)).into())
            }
        }
    }

    /// Close the device and hand the transport back
    pub fn close(mut self) -> Result<T, DisconnectError> {
        self.transport
            .close()
            .map_err(|e| DisconnectError(format!("{:?}", e)))?;
        Ok(self.transport)
    }
}
