//! The command station's locomotive list (`lokomotive.cs2`).
//!
//! Downloaded as config data file `loks`: a 4-byte big-endian uncompressed
//! length followed by a zlib stream. The text is line based; properties of
//! the current section are indented with ` .`, nested ones with ` ..`:
//!
//! ```text
//! [lokomotive]
//! lokomotive
//!  .name=BR 86
//!  .adresse=0x5
//!  .typ=mm2_prg
//!  .funktionen
//!  ..nr=0
//!  ..typ=1
//! ```

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::error::DecodeError;
use crate::traits::DecoderProtocol;

/// What a locomotive function does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionRole {
    /// Anything else.
    Generic,
    /// Head lights.
    Light,
    /// Sound mute.
    Mute,
}

impl FunctionRole {
    /// Role for a function type code; the high bit is ignored.
    pub const fn from_type(typ: u8) -> Self {
        match typ & 0x7F {
            1 => FunctionRole::Light,
            109 => FunctionRole::Mute,
            _ => FunctionRole::Generic,
        }
    }
}

/// One locomotive function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Function {
    /// Function number.
    pub number: u8,
    /// Active only while pressed.
    pub momentary: bool,
    /// Role.
    pub role: FunctionRole,
}

impl Function {
    /// Function from its number and type code.
    pub const fn new(number: u8, typ: u8) -> Self {
        Self {
            number,
            momentary: typ & 0x80 != 0,
            role: FunctionRole::from_type(typ),
        }
    }
}

/// One entry of the list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Locomotive {
    /// Display name.
    pub name: String,
    /// Decoder address.
    pub address: u16,
    /// Track protocol, `None` if not recognised.
    pub protocol: Option<DecoderProtocol>,
    /// mfx session id.
    pub sid: u32,
    /// mfx decoder UID.
    pub mfx_uid: u32,
    /// Functions with a type.
    pub functions: Vec<Function>,
}

/// Parsed locomotive list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LocomotiveList {
    /// Locomotives in file order.
    pub locomotives: Vec<Locomotive>,
}

fn hex(value: &str) -> Option<u32> {
    u32::from_str_radix(value, 16).ok()
}

fn parse_protocol(typ: &str) -> Option<DecoderProtocol> {
    match typ {
        "mfx" => Some(DecoderProtocol::Mfx),
        "dcc" => Some(DecoderProtocol::DccShort),
        "mm2_dil8" | "mm2_prg" | "mm_prg" => Some(DecoderProtocol::Motorola),
        _ => None,
    }
}

impl LocomotiveList {
    /// Parse list text. Anything that is not a locomotive list yields an
    /// empty list.
    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines().peekable();
        if lines.next() != Some("[lokomotive]") {
            return Self::default();
        }

        let mut locomotives = Vec::new();
        while let Some(line) = lines.next() {
            if line != "lokomotive" {
                continue;
            }
            let mut locomotive = Locomotive::default();
            while let Some(property) = lines.peek().copied().and_then(|l| l.strip_prefix(" .")) {
                if property.starts_with('.') {
                    // stray nested property
                    lines.next();
                    continue;
                }
                lines.next();
                if let Some(name) = property.strip_prefix("name=") {
                    locomotive.name = name.to_string();
                } else if let Some(address) = property.strip_prefix("adresse=0x") {
                    locomotive.address = hex(address).unwrap_or_default() as u16;
                } else if let Some(typ) = property.strip_prefix("typ=") {
                    locomotive.protocol = parse_protocol(typ);
                } else if let Some(sid) = property.strip_prefix("sid=0x") {
                    locomotive.sid = hex(sid).unwrap_or_default();
                } else if let Some(uid) = property.strip_prefix("mfxuid=0x") {
                    locomotive.mfx_uid = hex(uid).unwrap_or_default();
                } else if property == "funktionen" || property == "funktionen_2" {
                    let mut number = None;
                    let mut typ = None;
                    while let Some(field) = lines.peek().copied().and_then(|l| l.strip_prefix(" ..")) {
                        lines.next();
                        if let Some(nr) = field.strip_prefix("nr=") {
                            number = nr.parse::<u8>().ok();
                        } else if let Some(t) = field.strip_prefix("typ=") {
                            typ = Some(t.parse::<u8>().unwrap_or_default());
                        }
                    }
                    // functions without a type are unused
                    if let (Some(number), Some(typ)) = (number, typ) {
                        locomotive.functions.push(Function::new(number, typ));
                    }
                }
            }
            if locomotive.protocol == Some(DecoderProtocol::DccShort) {
                locomotive.protocol = Some(DecoderProtocol::dcc(locomotive.address));
            }
            locomotives.push(locomotive);
        }
        Self { locomotives }
    }

    /// Parse a downloaded `loks` file.
    pub fn from_config_data(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = decompress(bytes)?;
        Ok(Self::parse(&String::from_utf8_lossy(&text)))
    }

    /// Number of locomotives.
    pub fn len(&self) -> usize {
        self.locomotives.len()
    }

    /// True without locomotives.
    pub fn is_empty(&self) -> bool {
        self.locomotives.is_empty()
    }
}

/// Inflate a config data file.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::Truncated {
            needed: 4,
            available: bytes.len(),
        });
    }
    let expected = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(&bytes[4..])
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Decompress(e.to_string()))?;
    if out.len() != expected {
        return Err(DecodeError::InvalidValue {
            field: "uncompressed length",
            value: out.len() as u32,
        });
    }
    Ok(out)
}

/// Deflate `data` into config data file layout.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = (data.len() as u32).to_be_bytes().to_vec();
    let mut encoder = ZlibEncoder::new(&mut out, Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "[lokomotive]
version
 .minor=3
lokomotive
 .uid=0x4006
 .name=BR 86
 .adresse=0x6
 .typ=mfx
 .sid=0x6
 .mfxuid=0x7fe7e2e1
 .funktionen
 ..nr=0
 ..typ=1
 .funktionen
 ..nr=1
 ..typ=137
 .funktionen
 ..nr=2
 .funktionen_2
 ..nr=16
 ..typ=109
lokomotive
 .name=V 200
 .adresse=0xc8
 .typ=dcc
lokomotive
 .name=Köf
 .adresse=0x3
 .typ=mm2_dil8
";

    #[test]
    fn parses_locomotives() {
        let list = LocomotiveList::parse(LIST);
        assert_eq!(list.len(), 3);

        let br86 = &list.locomotives[0];
        assert_eq!(br86.name, "BR 86");
        assert_eq!(br86.address, 6);
        assert_eq!(br86.protocol, Some(DecoderProtocol::Mfx));
        assert_eq!(br86.sid, 6);
        assert_eq!(br86.mfx_uid, 0x7FE7_E2E1);
        assert_eq!(
            br86.functions,
            vec![
                Function {
                    number: 0,
                    momentary: false,
                    role: FunctionRole::Light
                },
                Function {
                    number: 1,
                    momentary: true,
                    role: FunctionRole::Generic
                },
                Function {
                    number: 16,
                    momentary: false,
                    role: FunctionRole::Mute
                },
            ]
        );

        assert_eq!(list.locomotives[1].protocol, Some(DecoderProtocol::DccLong));
        assert_eq!(list.locomotives[1].address, 200);
        assert_eq!(list.locomotives[2].protocol, Some(DecoderProtocol::Motorola));
        assert_eq!(list.locomotives[2].name, "Köf");
    }

    #[test]
    fn rejects_other_files() {
        assert!(LocomotiveList::parse("").is_empty());
        assert!(LocomotiveList::parse("[gleisbild]\nlokomotive\n").is_empty());
    }

    #[test]
    fn compressed_file() {
        let data = compress(LIST.as_bytes()).unwrap();
        assert_eq!(&data[..4], &(LIST.len() as u32).to_be_bytes());
        assert_eq!(LocomotiveList::from_config_data(&data).unwrap().len(), 3);
        assert!(matches!(
            LocomotiveList::from_config_data(&data[..2]),
            Err(DecodeError::Truncated { .. })
        ));
        let mut bad = data.clone();
        bad[3] = bad[3].wrapping_add(1);
        assert!(LocomotiveList::from_config_data(&bad).is_err());
    }
}
