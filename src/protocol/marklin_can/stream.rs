//! Config data stream reassembly.
//!
//! A config data download starts with a header frame carrying the total
//! length and a CRC-16, followed by 8-byte data frames. The CRC covers the
//! data zero-padded to a multiple of 8.

use super::message::Message;
use crate::codec::crc16;

/// Result of feeding one frame to a [`ConfigDataStreamCollector`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    /// More frames expected.
    Collecting,
    /// All data received and the CRC matches.
    Complete,
    /// A data frame arrived after the stream was full.
    ErrorTooMuchData,
    /// All data received but the CRC differs.
    ErrorInvalidCrc,
    /// Header after header, data before header, or not a stream frame.
    ErrorInvalidMessage,
}

/// Reassembles one named config data stream.
#[derive(Debug, Clone)]
pub struct ConfigDataStreamCollector {
    name: String,
    data: Vec<u8>,
    crc: Option<u16>,
    offset: usize,
}

impl ConfigDataStreamCollector {
    /// Collector for the file `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Vec::new(),
            crc: None,
            offset: 0,
        }
    }

    /// File name requested.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Data received so far; the full stream once complete.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.offset]
    }

    /// Take the data out of a completed collector.
    pub fn into_data(mut self) -> Vec<u8> {
        self.data.truncate(self.offset);
        self.data
    }

    /// True once the header frame was seen.
    pub fn has_header(&self) -> bool {
        self.crc.is_some()
    }

    /// Feed one `ConfigDataStream` frame.
    pub fn process(&mut self, message: &Message) -> StreamStatus {
        match self.crc {
            None => match message.config_data_stream_header() {
                Some((length, crc)) => {
                    self.data = vec![0; length as usize];
                    self.crc = Some(crc);
                    self.offset = 0;
                    if length == 0 {
                        self.check()
                    } else {
                        StreamStatus::Collecting
                    }
                }
                None => StreamStatus::ErrorInvalidMessage,
            },
            Some(_) if message.is_config_data_stream_data() => {
                if self.offset >= self.data.len() {
                    return StreamStatus::ErrorTooMuchData;
                }
                let n = (self.data.len() - self.offset).min(8);
                self.data[self.offset..self.offset + n].copy_from_slice(&message.data[..n]);
                self.offset += n;
                if self.offset == self.data.len() {
                    self.check()
                } else {
                    StreamStatus::Collecting
                }
            }
            Some(_) => StreamStatus::ErrorInvalidMessage,
        }
    }

    fn check(&self) -> StreamStatus {
        if Some(crc16(&self.data)) == self.crc {
            StreamStatus::Complete
        } else {
            StreamStatus::ErrorInvalidCrc
        }
    }
}

/// Split `data` into a header frame and data frames.
pub fn config_data_stream(hash_uid: u32, data: &[u8]) -> Vec<Message> {
    let mut frames = Vec::with_capacity(1 + data.len().div_ceil(8));
    frames.push(Message::config_data_stream_start(
        hash_uid,
        data.len() as u32,
        crc16(data),
    ));
    frames.extend(
        data.chunks(8)
            .map(|chunk| Message::config_data_stream_data(hash_uid, chunk)),
    );
    frames
}
