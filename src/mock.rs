//! Scripted transport for unit tests

use std::collections::VecDeque;

use crate::codec::{decode_7_to_8, encode_8_to_7};
use crate::transport::SysexTransport;

/// Plays back queued replies and keeps every frame it was given
#[derive(Default)]
pub(crate) struct MockTransport {
    sent: Vec<(u8, Vec<u8>)>,
    replies: VecDeque<Option<Vec<u8>>>,
    pub closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply with `status` followed by `data`
    pub fn reply(mut self, status: i8, data: &[u8]) -> Self {
        let mut raw = vec![status as u8];
        raw.extend_from_slice(data);
        self.replies.push_back(Some(encode_8_to_7(&raw)));
        self
    }

    /// Queue `n` successful empty replies
    pub fn ok(mut self, n: usize) -> Self {
        for _ in 0..n {
            self = self.reply(0, &[]);
        }
        self
    }

    /// Queue a request that is never answered
    pub fn silent(mut self) -> Self {
        self.replies.push_back(None);
        self
    }

    /// Sent frames as `(command, expected_response, payload)`, decoded
    pub fn requests(&self) -> Vec<(u8, u16, Vec<u8>)> {
        self.sent
            .iter()
            .map(|(cmd, frame)| {
                let frame = decode_7_to_8(frame);
                let expected = u16::from_le_bytes([frame[0], frame[1]]);
                (*cmd, expected, frame[2..].to_vec())
            })
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }
}

impl SysexTransport for MockTransport {
    type Error = std::io::Error;

    fn send_sysex(&mut self, command: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.sent.push((command, data.to_vec()));
        Ok(())
    }

    fn recv_sysex(&mut self, _timeout_ms: u32) -> Result<Option<Vec<u8>>, Self::Error> {
        Ok(self.replies.pop_front().flatten())
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.closed = true;
        Ok(())
    }
}
