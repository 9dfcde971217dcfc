//! UID ranges.
//!
//! Locomotives and accessories share one 32-bit UID space; the range a UID
//! falls in selects the track protocol.
//!
//! | Range | Meaning |
//! |-------|---------|
//! | `0x0000..=0x03FF` | Motorola locomotive |
//! | `0x0800..=0x0BFF` | Selectrix locomotive |
//! | `0x2800..=0x2BFF` | Selectrix accessory |
//! | `0x3000..=0x33FF` | Motorola accessory |
//! | `0x3800..=0x3FFF` | DCC accessory |
//! | `0x4000..=0x7FFF` | mfx locomotive |
//! | `0x8000..=0xBFFF` | Selectrix 2 locomotive |
//! | `0xC000..=0xFFFF` | DCC locomotive |
//!
//! Each accessory has two output addresses, one per position:
//! `address = (uid - base) * 2 + position + 1`.

use core::ops::RangeInclusive;

use crate::traits::{DecoderKey, DecoderProtocol, OutputChannel};

/// Motorola locomotives.
pub const MOTOROLA_LOCOMOTIVE: RangeInclusive<u32> = 0x0000..=0x03FF;
/// Selectrix locomotives.
pub const SX1_LOCOMOTIVE: RangeInclusive<u32> = 0x0800..=0x0BFF;
/// Selectrix accessories.
pub const SX1_ACCESSORY: RangeInclusive<u32> = 0x2800..=0x2BFF;
/// Motorola accessories.
pub const MOTOROLA_ACCESSORY: RangeInclusive<u32> = 0x3000..=0x33FF;
/// DCC accessories.
pub const DCC_ACCESSORY: RangeInclusive<u32> = 0x3800..=0x3FFF;
/// mfx locomotives.
pub const MFX_LOCOMOTIVE: RangeInclusive<u32> = 0x4000..=0x7FFF;
/// Selectrix 2 locomotives.
pub const SX2_LOCOMOTIVE: RangeInclusive<u32> = 0x8000..=0xBFFF;
/// DCC locomotives.
pub const DCC_LOCOMOTIVE: RangeInclusive<u32> = 0xC000..=0xFFFF;

fn offset(range: &RangeInclusive<u32>, address: u32) -> Option<u32> {
    let uid = range.start().checked_add(address)?;
    range.contains(&uid).then_some(uid)
}

/// UID of a locomotive decoder.
pub fn locomotive_uid(key: DecoderKey) -> Option<u32> {
    let address = key.address as u32;
    match key.protocol {
        DecoderProtocol::Motorola => offset(&MOTOROLA_LOCOMOTIVE, address),
        DecoderProtocol::Selectrix => offset(&SX1_LOCOMOTIVE, address),
        DecoderProtocol::Mfx => offset(&MFX_LOCOMOTIVE, address),
        DecoderProtocol::DccShort | DecoderProtocol::DccLong => offset(&DCC_LOCOMOTIVE, address),
    }
}

/// Decoder behind a locomotive UID.
pub fn decoder_key(uid: u32) -> Option<DecoderKey> {
    let (protocol, base) = if MOTOROLA_LOCOMOTIVE.contains(&uid) {
        (DecoderProtocol::Motorola, *MOTOROLA_LOCOMOTIVE.start())
    } else if SX1_LOCOMOTIVE.contains(&uid) {
        (DecoderProtocol::Selectrix, *SX1_LOCOMOTIVE.start())
    } else if MFX_LOCOMOTIVE.contains(&uid) {
        (DecoderProtocol::Mfx, *MFX_LOCOMOTIVE.start())
    } else if DCC_LOCOMOTIVE.contains(&uid) {
        let address = (uid - DCC_LOCOMOTIVE.start()) as u16;
        return Some(DecoderKey::new(DecoderProtocol::dcc(address), address));
    } else {
        return None;
    };
    Some(DecoderKey::new(protocol, (uid - base) as u16))
}

fn accessory_range(channel: OutputChannel) -> Option<&'static RangeInclusive<u32>> {
    match channel {
        OutputChannel::AccessoryMotorola => Some(&MOTOROLA_ACCESSORY),
        OutputChannel::AccessoryDcc => Some(&DCC_ACCESSORY),
        OutputChannel::AccessorySelectrix => Some(&SX1_ACCESSORY),
        _ => None,
    }
}

/// UID and position for an output address (1-based).
pub fn accessory_uid(channel: OutputChannel, address: u32) -> Option<(u32, u8)> {
    let range = accessory_range(channel)?;
    let index = address.checked_sub(1)?;
    let uid = offset(range, index / 2)?;
    Some((uid, (index % 2) as u8))
}

/// Output channel and address for an accessory UID and position.
pub fn accessory_address(uid: u32, position: u8) -> Option<(OutputChannel, u32)> {
    if position > 1 {
        return None;
    }
    [
        OutputChannel::AccessoryMotorola,
        OutputChannel::AccessoryDcc,
        OutputChannel::AccessorySelectrix,
    ]
    .into_iter()
    .find_map(|channel| {
        let range = accessory_range(channel)?;
        range
            .contains(&uid)
            .then(|| (channel, (uid - range.start()) * 2 + position as u32 + 1))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locomotive_uids() {
        let key = DecoderKey::new(DecoderProtocol::Mfx, 5);
        assert_eq!(locomotive_uid(key), Some(0x4005));
        assert_eq!(decoder_key(0x4005), Some(key));

        let long = DecoderKey::new(DecoderProtocol::DccLong, 1000);
        assert_eq!(locomotive_uid(long), Some(0xC3E8));
        assert_eq!(decoder_key(0xC3E8), Some(long));
        assert_eq!(
            decoder_key(0xC003),
            Some(DecoderKey::new(DecoderProtocol::DccShort, 3))
        );
    }

    #[test]
    fn locomotive_out_of_range() {
        assert_eq!(
            locomotive_uid(DecoderKey::new(DecoderProtocol::Motorola, 1024)),
            None
        );
        assert_eq!(decoder_key(0x3000), None);
    }

    #[test]
    fn accessory_pairs() {
        assert_eq!(accessory_uid(OutputChannel::AccessoryMotorola, 1), Some((0x3000, 0)));
        assert_eq!(accessory_uid(OutputChannel::AccessoryMotorola, 2), Some((0x3000, 1)));
        assert_eq!(accessory_uid(OutputChannel::AccessoryMotorola, 3), Some((0x3001, 0)));
        assert_eq!(accessory_uid(OutputChannel::AccessoryMotorola, 2048), Some((0x33FF, 1)));
        assert_eq!(accessory_uid(OutputChannel::AccessoryMotorola, 2049), None);
        assert_eq!(accessory_uid(OutputChannel::AccessoryDcc, 4096), Some((0x3FFF, 1)));
        assert_eq!(accessory_uid(OutputChannel::AccessoryDcc, 0), None);
        assert_eq!(accessory_uid(OutputChannel::Output, 1), None);
    }

    #[test]
    fn accessory_reverse() {
        for channel in [
            OutputChannel::AccessoryMotorola,
            OutputChannel::AccessoryDcc,
            OutputChannel::AccessorySelectrix,
        ] {
            for address in [1u32, 2, 17, 2048] {
                let (uid, position) = accessory_uid(channel, address).unwrap();
                assert_eq!(accessory_address(uid, position), Some((channel, address)));
            }
        }
        assert_eq!(accessory_address(0x3000, 2), None);
    }
}
