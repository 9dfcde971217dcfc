//! Status data descriptors.
//!
//! A node describes itself through numbered descriptors, requested one at
//! a time with `StatusDataConfig`:
//!
//! | Index | Descriptor |
//! |-------|------------|
//! | 0 | [`DeviceDescription`] |
//! | 1..=readings | [`ReadingDescription`] |
//! | following | [`ConfigurationDescription`] |
//!
//! The answer is a run of 8-byte data frames followed by a reply frame
//! with the packet count. Strings are NUL terminated; the last frame is
//! zero padded.

use serde::Serialize;

use super::message::Message;
use crate::error::DecodeError;

/// Cursor over descriptor bytes.
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.bytes.len() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                available: self.bytes.len(),
            });
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let end = self
            .bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or(DecodeError::UnterminatedString)?;
        let s = String::from_utf8_lossy(&self.bytes[..end]).into_owned();
        self.bytes = &self.bytes[end + 1..];
        Ok(s)
    }
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Descriptor 0: who the node is and how many descriptors follow.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDescription {
    /// Number of reading descriptors.
    pub number_of_readings: u8,
    /// Number of configuration descriptors.
    pub number_of_configuration_channels: u8,
    /// Vendor specific.
    pub user_defined: u16,
    /// Serial number.
    pub serial_number: u32,
    /// Article number, up to 8 characters.
    pub article_number: String,
    /// Device name.
    pub device_name: String,
    /// User nickname.
    pub nickname: String,
}

impl DeviceDescription {
    /// Parse descriptor bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let number_of_readings = r.u8()?;
        let number_of_configuration_channels = r.u8()?;
        let user_defined = r.u16()?;
        let serial_number = r.u32()?;
        let article = r.take(8)?;
        let end = article.iter().position(|b| *b == 0).unwrap_or(8);
        Ok(Self {
            number_of_readings,
            number_of_configuration_channels,
            user_defined,
            serial_number,
            article_number: String::from_utf8_lossy(&article[..end]).into_owned(),
            device_name: r.string()?,
            nickname: r.string()?,
        })
    }

    /// Descriptor bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.number_of_readings, self.number_of_configuration_channels];
        out.extend_from_slice(&self.user_defined.to_be_bytes());
        out.extend_from_slice(&self.serial_number.to_be_bytes());
        let mut article = [0u8; 8];
        let n = self.article_number.len().min(8);
        article[..n].copy_from_slice(&self.article_number.as_bytes()[..n]);
        out.extend_from_slice(&article);
        push_string(&mut out, &self.device_name);
        push_string(&mut out, &self.nickname);
        out
    }

    /// Index of the last descriptor the node has.
    pub fn last_index(&self) -> u8 {
        self.number_of_readings
            .saturating_add(self.number_of_configuration_channels)
    }
}

/// A measured value the node exposes (track current, voltage, ...).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReadingDescription {
    /// Measurement channel.
    pub channel: u8,
    /// Power of ten of the value.
    pub power: i8,
    /// Colours of the four ranges.
    pub colors: [u8; 4],
    /// Raw zero point.
    pub zero: u16,
    /// Upper raw value of the four ranges.
    pub range_end: [u16; 4],
    /// Name.
    pub description: String,
    /// Label at the scale start.
    pub label_start: String,
    /// Label at the scale end.
    pub label_end: String,
    /// Unit.
    pub unit: String,
}

impl ReadingDescription {
    /// Parse descriptor bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let channel = r.u8()?;
        let power = r.u8()? as i8;
        let c = r.take(4)?;
        let colors = [c[0], c[1], c[2], c[3]];
        let zero = r.u16()?;
        let range_end = [r.u16()?, r.u16()?, r.u16()?, r.u16()?];
        Ok(Self {
            channel,
            power,
            colors,
            zero,
            range_end,
            description: r.string()?,
            label_start: r.string()?,
            label_end: r.string()?,
            unit: r.string()?,
        })
    }

    /// Descriptor bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.channel, self.power as u8];
        out.extend_from_slice(&self.colors);
        out.extend_from_slice(&self.zero.to_be_bytes());
        for end in self.range_end {
            out.extend_from_slice(&end.to_be_bytes());
        }
        push_string(&mut out, &self.description);
        push_string(&mut out, &self.label_start);
        push_string(&mut out, &self.label_end);
        push_string(&mut out, &self.unit);
        out
    }
}

/// Type specific part of a configuration descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigurationKind {
    /// Choice from a list.
    List {
        /// Index of the default item.
        default: u8,
        /// Items.
        items: Vec<String>,
    },
    /// Number within a range.
    Number {
        /// Lowest value.
        min: u16,
        /// Highest value.
        max: u16,
        /// Current value.
        value: u16,
        /// Label at the scale start.
        label_start: String,
        /// Label at the scale end.
        label_end: String,
        /// Unit.
        unit: String,
    },
}

/// A setting the node exposes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfigurationDescription {
    /// Configuration channel.
    pub channel: u8,
    /// Name.
    pub description: String,
    /// List or number.
    pub kind: ConfigurationKind,
}

const CONFIGURATION_LIST: u8 = 1;
const CONFIGURATION_NUMBER: u8 = 2;

impl ConfigurationDescription {
    /// Parse descriptor bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let channel = r.u8()?;
        match r.u8()? {
            CONFIGURATION_LIST => {
                let count = r.u8()?;
                let default = r.u8()?;
                let _reserved = r.u32()?;
                let description = r.string()?;
                let items = (0..count)
                    .map(|_| r.string())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self {
                    channel,
                    description,
                    kind: ConfigurationKind::List { default, items },
                })
            }
            CONFIGURATION_NUMBER => {
                let min = r.u16()?;
                let max = r.u16()?;
                let value = r.u16()?;
                let description = r.string()?;
                Ok(Self {
                    channel,
                    description,
                    kind: ConfigurationKind::Number {
                        min,
                        max,
                        value,
                        label_start: r.string()?,
                        label_end: r.string()?,
                        unit: r.string()?,
                    },
                })
            }
            other => Err(DecodeError::InvalidValue {
                field: "configuration type",
                value: other as u32,
            }),
        }
    }

    /// Descriptor bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![self.channel];
        match &self.kind {
            ConfigurationKind::List { default, items } => {
                out.extend_from_slice(&[CONFIGURATION_LIST, items.len() as u8, *default]);
                out.extend_from_slice(&[0; 4]);
                push_string(&mut out, &self.description);
                for item in items {
                    push_string(&mut out, item);
                }
            }
            ConfigurationKind::Number {
                min,
                max,
                value,
                label_start,
                label_end,
                unit,
            } => {
                out.push(CONFIGURATION_NUMBER);
                out.extend_from_slice(&min.to_be_bytes());
                out.extend_from_slice(&max.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
                push_string(&mut out, &self.description);
                push_string(&mut out, label_start);
                push_string(&mut out, label_end);
                push_string(&mut out, unit);
            }
        }
        out
    }
}

/// Frames answering a status data request: data packets then the reply.
pub fn status_data_config_reply(hash_uid: u32, uid: u32, index: u8, bytes: &[u8]) -> Vec<Message> {
    let mut messages: Vec<Message> = bytes
        .chunks(8)
        .enumerate()
        .map(|(n, chunk)| Message::status_data_config_data(n as u16, chunk))
        .collect();
    let count = messages.len() as u8;
    messages.push(Message::status_data_config_reply(hash_uid, uid, index, count));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gleisbox() -> DeviceDescription {
        DeviceDescription {
            number_of_readings: 1,
            number_of_configuration_channels: 2,
            user_defined: 0,
            serial_number: 12345,
            article_number: "60113".into(),
            device_name: "Gleisbox".into(),
            nickname: String::new(),
        }
    }

    #[test]
    fn device_description_roundtrip() {
        let d = gleisbox();
        let mut bytes = d.to_bytes();
        // frames are zero padded
        bytes.resize(bytes.len().div_ceil(8) * 8, 0);
        assert_eq!(DeviceDescription::from_bytes(&bytes), Ok(d.clone()));
        assert_eq!(d.last_index(), 3);
    }

    #[test]
    fn reading_roundtrip() {
        let r = ReadingDescription {
            channel: 1,
            power: -3,
            colors: [0x30, 0xF0, 0xE0, 0xC0],
            zero: 0,
            range_end: [100, 200, 300, 400],
            description: "TRACK".into(),
            label_start: "0.000".into(),
            label_end: "3.000".into(),
            unit: "A".into(),
        };
        assert_eq!(ReadingDescription::from_bytes(&r.to_bytes()), Ok(r));
    }

    #[test]
    fn configuration_roundtrip() {
        let list = ConfigurationDescription {
            channel: 1,
            description: "Protocol".into(),
            kind: ConfigurationKind::List {
                default: 0,
                items: vec!["MM2".into(), "DCC".into()],
            },
        };
        assert_eq!(ConfigurationDescription::from_bytes(&list.to_bytes()), Ok(list));

        let number = ConfigurationDescription {
            channel: 2,
            description: "Short circuit".into(),
            kind: ConfigurationKind::Number {
                min: 0,
                max: 100,
                value: 50,
                label_start: "0".into(),
                label_end: "100".into(),
                unit: "%".into(),
            },
        };
        assert_eq!(ConfigurationDescription::from_bytes(&number.to_bytes()), Ok(number));
    }

    #[test]
    fn bad_input() {
        assert_eq!(
            DeviceDescription::from_bytes(&[1, 2, 3]),
            Err(DecodeError::Truncated {
                needed: 2,
                available: 1
            })
        );
        assert_eq!(
            ConfigurationDescription::from_bytes(&[1, 9]),
            Err(DecodeError::InvalidValue {
                field: "configuration type",
                value: 9
            })
        );
        let mut bytes = gleisbox().to_bytes();
        bytes.pop();
        bytes.pop();
        assert_eq!(
            DeviceDescription::from_bytes(&bytes),
            Err(DecodeError::UnterminatedString)
        );
    }

    #[test]
    fn reply_packets() {
        let frames = status_data_config_reply(1, 2, 0, &[0u8; 20]);
        assert_eq!(frames.len(), 4);
        assert!(frames[..3].iter().all(|m| m.is_status_data_packet()));
        assert_eq!(frames[3].status_data_reply(), Some((2, 0, 3)));
    }
}
