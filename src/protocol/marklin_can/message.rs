//! Märklin CAN frames.
//!
//! A frame is a 29-bit extended CAN id plus up to 8 data bytes. The id is
//! laid out as:
//!
//! | Bits | Field |
//! |------|-------|
//! | 25..=28 | priority |
//! | 17..=24 | command |
//! | 16 | response flag |
//! | 0..=15 | hash of the sender's UID |
//!
//! Multi-byte fields in the data are big-endian.

use core::fmt;

use crate::codec::to_hex;

const PRIORITY_SHIFT: u32 = 25;
const COMMAND_SHIFT: u32 = 17;
const RESPONSE_MASK: u32 = 0x0001_0000;
const HASH_MASK: u32 = 0x0000_FFFF;

/// Highest locomotive speed value.
pub const SPEED_MAX: u16 = 1000;
/// Highest locomotive function number.
pub const FUNCTION_MAX: u8 = 31;
/// Hash of the first status data packet; packet `n` uses this plus `n`.
pub const STATUS_DATA_START_HASH: u16 = 0x0301;
/// Longest switch time in 10 ms units.
pub const SWITCH_TIME_MAX: u16 = 16300;

/// Hash placed in the id for a sender UID.
pub const fn calc_hash(uid: u32) -> u16 {
    let hash = ((uid >> 16) as u16) ^ (uid as u16);
    ((hash << 3) & 0xFC00) | 0x0300 | (hash & 0x007F)
}

/// Command field of the id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// System sub-commands.
    System = 0x00,
    /// mfx discovery.
    Discovery = 0x01,
    /// mfx bind.
    Bind = 0x02,
    /// mfx verify.
    Verify = 0x03,
    /// Locomotive speed.
    LocomotiveSpeed = 0x04,
    /// Locomotive direction.
    LocomotiveDirection = 0x05,
    /// Locomotive function.
    LocomotiveFunction = 0x06,
    /// Read decoder CV.
    ReadConfig = 0x07,
    /// Write decoder CV.
    WriteConfig = 0x08,
    /// Switch an accessory.
    AccessoryControl = 0x0B,
    /// Accessory configuration.
    AccessoryConfig = 0x0C,
    /// s88 polling.
    S88Polling = 0x10,
    /// s88 feedback event.
    FeedbackEvent = 0x11,
    /// Selectrix event.
    Sx1Event = 0x12,
    /// Ping / software version request.
    Ping = 0x18,
    /// Software update.
    Update = 0x19,
    /// Read config data.
    ReadConfigData = 0x1A,
    /// CAN bootloader.
    BootloaderCan = 0x1B,
    /// Track bootloader.
    BootloaderTrack = 0x1C,
    /// Status data configuration.
    StatusDataConfig = 0x1D,
    /// Config data request.
    ConfigData = 0x20,
    /// Config data stream.
    ConfigDataStream = 0x21,
}

impl Command {
    /// Map a raw command byte.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Command::System,
            0x01 => Command::Discovery,
            0x02 => Command::Bind,
            0x03 => Command::Verify,
            0x04 => Command::LocomotiveSpeed,
            0x05 => Command::LocomotiveDirection,
            0x06 => Command::LocomotiveFunction,
            0x07 => Command::ReadConfig,
            0x08 => Command::WriteConfig,
            0x0B => Command::AccessoryControl,
            0x0C => Command::AccessoryConfig,
            0x10 => Command::S88Polling,
            0x11 => Command::FeedbackEvent,
            0x12 => Command::Sx1Event,
            0x18 => Command::Ping,
            0x19 => Command::Update,
            0x1A => Command::ReadConfigData,
            0x1B => Command::BootloaderCan,
            0x1C => Command::BootloaderTrack,
            0x1D => Command::StatusDataConfig,
            0x20 => Command::ConfigData,
            0x21 => Command::ConfigDataStream,
            _ => return None,
        })
    }
}

/// Sub-command of [`Command::System`], data byte 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SystemSubCommand {
    /// Track power off.
    SystemStop = 0x00,
    /// Track power on.
    SystemGo = 0x01,
    /// Stop all locomotives, keep power.
    SystemHalt = 0x02,
    /// Emergency stop one locomotive.
    LocomotiveEmergencyStop = 0x03,
    /// End refresh of one locomotive.
    LocomotiveCycleEnd = 0x04,
    /// Accessory switch time.
    AccessorySwitchTime = 0x06,
    /// Overload report.
    Overload = 0x0A,
    /// Status channel value.
    Status = 0x0B,
    /// Model clock.
    ModelClock = 0x20,
    /// mfx seek.
    MfxSeek = 0x30,
}

impl SystemSubCommand {
    /// Map a raw sub-command byte.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => SystemSubCommand::SystemStop,
            0x01 => SystemSubCommand::SystemGo,
            0x02 => SystemSubCommand::SystemHalt,
            0x03 => SystemSubCommand::LocomotiveEmergencyStop,
            0x04 => SystemSubCommand::LocomotiveCycleEnd,
            0x06 => SystemSubCommand::AccessorySwitchTime,
            0x0A => SystemSubCommand::Overload,
            0x0B => SystemSubCommand::Status,
            0x20 => SystemSubCommand::ModelClock,
            0x30 => SystemSubCommand::MfxSeek,
            _ => return None,
        })
    }
}

/// Direction byte of [`Command::LocomotiveDirection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LocomotiveDirection {
    /// Keep.
    Same = 0,
    /// Forward.
    Forward = 1,
    /// Reverse.
    Reverse = 2,
    /// Toggle.
    Inverse = 3,
}

impl LocomotiveDirection {
    /// Map a raw direction byte.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => LocomotiveDirection::Same,
            1 => LocomotiveDirection::Forward,
            2 => LocomotiveDirection::Reverse,
            3 => LocomotiveDirection::Inverse,
            _ => return None,
        })
    }
}

/// Accessory switch command or report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessoryControl {
    /// Accessory UID.
    pub uid: u32,
    /// Position, 0 or 1.
    pub position: u8,
    /// Coil current, 0 is off.
    pub current: u8,
    /// Switch time in 10 ms units; `None` uses the device default.
    pub switch_time: Option<u16>,
}

/// s88 contact change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedbackState {
    /// s88 device.
    pub device_id: u16,
    /// Contact number.
    pub contact_id: u16,
    /// Previous state.
    pub state_old: u8,
    /// New state.
    pub state_new: u8,
    /// Time in 10 ms units.
    pub time: u16,
}

/// Answer to a ping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingReply {
    /// Node UID.
    pub uid: u32,
    /// Software version major.
    pub version_major: u8,
    /// Software version minor.
    pub version_minor: u8,
    /// Device type.
    pub device_id: u16,
}

/// One CAN frame.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Message {
    /// Extended CAN id.
    pub id: u32,
    /// Data length, 0..=8.
    pub dlc: u8,
    /// Data bytes; only the first `dlc` are meaningful.
    pub data: [u8; 8],
}

impl Message {
    /// Empty frame for `command`; the hash is derived from `hash_uid`.
    pub const fn new(command: Command, response: bool, hash_uid: u32) -> Self {
        let mut id = ((command as u32) << COMMAND_SHIFT) | calc_hash(hash_uid) as u32;
        if response {
            id |= RESPONSE_MASK;
        }
        Self {
            id,
            dlc: 0,
            data: [0; 8],
        }
    }

    /// Frame with `data`; anything past 8 bytes is ignored.
    pub fn with_data(command: Command, response: bool, hash_uid: u32, data: &[u8]) -> Self {
        let mut message = Self::new(command, response, hash_uid);
        let n = data.len().min(8);
        message.data[..n].copy_from_slice(&data[..n]);
        message.dlc = n as u8;
        message
    }

    /// Frame carrying a 4-byte UID followed by `rest`.
    pub fn with_uid(command: Command, response: bool, uid: u32, rest: &[u8]) -> Self {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&uid.to_be_bytes());
        let n = rest.len().min(4);
        data[4..4 + n].copy_from_slice(&rest[..n]);
        Self::with_data(command, response, uid, &data[..4 + n])
    }

    // ========================================================================
    // Id fields
    // ========================================================================

    /// Priority bits.
    pub const fn priority(&self) -> u8 {
        ((self.id >> PRIORITY_SHIFT) & 0x0F) as u8
    }

    /// Raw command byte.
    pub const fn command_byte(&self) -> u8 {
        ((self.id >> COMMAND_SHIFT) & 0xFF) as u8
    }

    /// Command, if known.
    pub const fn command(&self) -> Option<Command> {
        Command::from_u8(self.command_byte())
    }

    /// Response flag.
    pub const fn is_response(&self) -> bool {
        self.id & RESPONSE_MASK != 0
    }

    /// Set or clear the response flag.
    pub fn set_response(&mut self, value: bool) {
        if value {
            self.id |= RESPONSE_MASK;
        } else {
            self.id &= !RESPONSE_MASK;
        }
    }

    /// Hash field.
    pub const fn hash(&self) -> u16 {
        (self.id & HASH_MASK) as u16
    }

    /// Replace the hash field.
    pub fn set_hash(&mut self, hash: u16) {
        self.id = (self.id & !HASH_MASK) | hash as u32;
    }

    /// Meaningful data bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.dlc as usize).min(8)]
    }

    fn be16(&self, at: usize) -> u16 {
        u16::from_be_bytes([self.data[at], self.data[at + 1]])
    }

    /// UID in data bytes 0..4.
    pub fn uid(&self) -> Option<u32> {
        (self.dlc >= 4).then(|| u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]))
    }

    fn is(&self, command: Command) -> bool {
        self.command() == Some(command)
    }

    // ========================================================================
    // Constructors
    // ========================================================================

    /// System command.
    pub fn system(sub: SystemSubCommand, uid: u32) -> Self {
        Self::with_uid(Command::System, false, uid, &[sub as u8])
    }

    /// Track power off.
    pub fn system_stop() -> Self {
        Self::system(SystemSubCommand::SystemStop, 0)
    }

    /// Track power on.
    pub fn system_go() -> Self {
        Self::system(SystemSubCommand::SystemGo, 0)
    }

    /// Stop all locomotives.
    pub fn system_halt() -> Self {
        Self::system(SystemSubCommand::SystemHalt, 0)
    }

    /// Emergency stop one locomotive.
    pub fn locomotive_emergency_stop(uid: u32) -> Self {
        Self::system(SystemSubCommand::LocomotiveEmergencyStop, uid)
    }

    /// Default accessory switch time in 10 ms units, broadcast.
    pub fn accessory_switch_time(units: u16) -> Self {
        let [hi, lo] = units.min(SWITCH_TIME_MAX).to_be_bytes();
        Self::with_uid(
            Command::System,
            false,
            0,
            &[SystemSubCommand::AccessorySwitchTime as u8, hi, lo],
        )
    }

    /// Locomotive speed, 0..=1000.
    pub fn locomotive_speed(uid: u32, speed: u16) -> Self {
        let [hi, lo] = speed.min(SPEED_MAX).to_be_bytes();
        Self::with_uid(Command::LocomotiveSpeed, false, uid, &[hi, lo])
    }

    /// Locomotive direction.
    pub fn locomotive_direction(uid: u32, direction: LocomotiveDirection) -> Self {
        Self::with_uid(Command::LocomotiveDirection, false, uid, &[direction as u8])
    }

    /// Locomotive function value.
    pub fn locomotive_function(uid: u32, number: u8, value: bool) -> Self {
        Self::with_uid(
            Command::LocomotiveFunction,
            false,
            uid,
            &[number.min(FUNCTION_MAX), value as u8],
        )
    }

    /// Switch an accessory.
    pub fn accessory_control(control: AccessoryControl) -> Self {
        match control.switch_time {
            Some(time) => {
                let [hi, lo] = time.to_be_bytes();
                Self::with_uid(
                    Command::AccessoryControl,
                    false,
                    control.uid,
                    &[control.position, control.current, hi, lo],
                )
            }
            None => Self::with_uid(
                Command::AccessoryControl,
                false,
                control.uid,
                &[control.position, control.current],
            ),
        }
    }

    /// s88 contact report.
    pub fn feedback_state(state: FeedbackState) -> Self {
        let [dh, dl] = state.device_id.to_be_bytes();
        let [ch, cl] = state.contact_id.to_be_bytes();
        let [th, tl] = state.time.to_be_bytes();
        Self::with_data(
            Command::FeedbackEvent,
            true,
            0,
            &[dh, dl, ch, cl, state.state_old, state.state_new, th, tl],
        )
    }

    /// Broadcast ping.
    pub fn ping(hash_uid: u32) -> Self {
        Self::new(Command::Ping, false, hash_uid)
    }

    /// Ping answer.
    pub fn ping_reply(reply: PingReply) -> Self {
        let [dh, dl] = reply.device_id.to_be_bytes();
        Self::with_uid(
            Command::Ping,
            true,
            reply.uid,
            &[reply.version_major, reply.version_minor, dh, dl],
        )
    }

    /// Ask `uid` for status data descriptor `index`.
    pub fn status_data_config(hash_uid: u32, uid: u32, index: u8) -> Self {
        let mut message = Self::with_uid(Command::StatusDataConfig, false, uid, &[index]);
        message.set_hash(calc_hash(hash_uid));
        message
    }

    /// Final frame of a status data answer.
    pub fn status_data_config_reply(hash_uid: u32, uid: u32, index: u8, packet_count: u8) -> Self {
        let mut message = Self::with_uid(Command::StatusDataConfig, true, uid, &[index, packet_count]);
        message.set_hash(calc_hash(hash_uid));
        message
    }

    /// Data frame `packet` of a status data answer.
    pub fn status_data_config_data(packet: u16, bytes: &[u8]) -> Self {
        let mut data = [0u8; 8];
        let n = bytes.len().min(8);
        data[..n].copy_from_slice(&bytes[..n]);
        let mut message = Self::with_data(Command::StatusDataConfig, true, 0, &data);
        message.set_hash(STATUS_DATA_START_HASH.wrapping_add(packet));
        message
    }

    /// Request config data file `name` (at most 8 characters).
    pub fn config_data(hash_uid: u32, name: &str) -> Self {
        let mut data = [0u8; 8];
        let n = name.len().min(8);
        data[..n].copy_from_slice(&name.as_bytes()[..n]);
        Self::with_data(Command::ConfigData, false, hash_uid, &data)
    }

    /// First frame of a config data stream.
    pub fn config_data_stream_start(hash_uid: u32, length: u32, crc: u16) -> Self {
        let [l0, l1, l2, l3] = length.to_be_bytes();
        let [c0, c1] = crc.to_be_bytes();
        Self::with_data(Command::ConfigDataStream, false, hash_uid, &[l0, l1, l2, l3, c0, c1])
    }

    /// Data frame of a config data stream.
    pub fn config_data_stream_data(hash_uid: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 8];
        let n = bytes.len().min(8);
        data[..n].copy_from_slice(&bytes[..n]);
        Self::with_data(Command::ConfigDataStream, false, hash_uid, &data)
    }

    // ========================================================================
    // Typed views
    // ========================================================================

    /// System sub-command.
    pub fn system_sub_command(&self) -> Option<SystemSubCommand> {
        if self.is(Command::System) && self.dlc >= 5 {
            SystemSubCommand::from_u8(self.data[4])
        } else {
            None
        }
    }

    /// Switch time of an `AccessorySwitchTime` frame.
    pub fn switch_time(&self) -> Option<u16> {
        (self.system_sub_command() == Some(SystemSubCommand::AccessorySwitchTime) && self.dlc == 7)
            .then(|| self.be16(5))
    }

    /// Speed of a `LocomotiveSpeed` frame that carries one.
    pub fn speed(&self) -> Option<u16> {
        (self.is(Command::LocomotiveSpeed) && self.dlc == 6).then(|| self.be16(4))
    }

    /// Direction of a `LocomotiveDirection` frame that carries one.
    pub fn direction(&self) -> Option<LocomotiveDirection> {
        if self.is(Command::LocomotiveDirection) && self.dlc == 5 {
            LocomotiveDirection::from_u8(self.data[4])
        } else {
            None
        }
    }

    /// Number and value of a `LocomotiveFunction` frame that carries a value.
    pub fn function(&self) -> Option<(u8, bool)> {
        (self.is(Command::LocomotiveFunction) && self.dlc == 6)
            .then(|| (self.data[4], self.data[5] != 0))
    }

    /// Accessory fields.
    pub fn accessory_control_fields(&self) -> Option<AccessoryControl> {
        if !self.is(Command::AccessoryControl) || !(self.dlc == 6 || self.dlc == 8) {
            return None;
        }
        Some(AccessoryControl {
            uid: self.uid()?,
            position: self.data[4],
            current: self.data[5],
            switch_time: (self.dlc == 8).then(|| self.be16(6)),
        })
    }

    /// s88 feedback fields.
    pub fn feedback_state_fields(&self) -> Option<FeedbackState> {
        (self.is(Command::FeedbackEvent) && self.dlc == 8).then(|| FeedbackState {
            device_id: self.be16(0),
            contact_id: self.be16(2),
            state_old: self.data[4],
            state_new: self.data[5],
            time: self.be16(6),
        })
    }

    /// Ping answer fields.
    pub fn ping_reply_fields(&self) -> Option<PingReply> {
        if !(self.is(Command::Ping) && self.is_response() && self.dlc == 8) {
            return None;
        }
        Some(PingReply {
            uid: self.uid()?,
            version_major: self.data[4],
            version_minor: self.data[5],
            device_id: self.be16(6),
        })
    }

    /// `(uid, index)` of a status data request.
    pub fn status_data_request(&self) -> Option<(u32, u8)> {
        (self.is(Command::StatusDataConfig) && !self.is_response() && self.dlc == 5)
            .then(|| (self.uid().unwrap_or_default(), self.data[4]))
    }

    /// `(uid, index, packet_count)` of the final status data frame.
    pub fn status_data_reply(&self) -> Option<(u32, u8, u8)> {
        (self.is(Command::StatusDataConfig) && self.is_response() && self.dlc == 6)
            .then(|| (self.uid().unwrap_or_default(), self.data[4], self.data[5]))
    }

    /// True for a status data payload frame.
    pub fn is_status_data_packet(&self) -> bool {
        self.is(Command::StatusDataConfig) && self.is_response() && self.dlc == 8
    }

    /// File name of a config data request.
    pub fn config_data_name(&self) -> Option<&str> {
        if !(self.is(Command::ConfigData) && self.dlc == 8) {
            return None;
        }
        let end = self.data.iter().position(|b| *b == 0).unwrap_or(8);
        core::str::from_utf8(&self.data[..end]).ok()
    }

    /// `(length, crc)` of a config data stream start frame.
    pub fn config_data_stream_header(&self) -> Option<(u32, u16)> {
        (self.is(Command::ConfigDataStream) && (self.dlc == 6 || self.dlc == 7)).then(|| {
            (
                u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]),
                self.be16(4),
            )
        })
    }

    /// True for a config data stream payload frame.
    pub fn is_config_data_stream_data(&self) -> bool {
        self.is(Command::ConfigDataStream) && self.dlc == 8
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ id: 0x{:08X}, dlc: {}, data: [{}] }}",
            self.id,
            self.dlc,
            to_hex(self.payload())
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(command) = self.command() else {
            return write!(f, "Unknown 0x{:02X} [{}]", self.command_byte(), to_hex(self.payload()));
        };
        write!(f, "{:?}", command)?;
        if self.is_response() {
            f.write_str(" response")?;
        }
        if let Some(sub) = self.system_sub_command() {
            write!(f, " {:?}", sub)?;
            if let Some(uid) = self.uid().filter(|uid| *uid != 0) {
                write!(f, " uid=0x{:08X}", uid)?;
            }
            if let Some(time) = self.switch_time() {
                write!(f, " switch_time={}ms", time as u32 * 10)?;
            }
            return Ok(());
        }
        if let Some(speed) = self.speed() {
            return write!(f, " uid=0x{:08X} speed={}", self.uid().unwrap_or_default(), speed);
        }
        if let Some(direction) = self.direction() {
            return write!(f, " uid=0x{:08X} direction={:?}", self.uid().unwrap_or_default(), direction);
        }
        if let Some((number, value)) = self.function() {
            return write!(f, " uid=0x{:08X} F{}={}", self.uid().unwrap_or_default(), number, value);
        }
        if let Some(a) = self.accessory_control_fields() {
            write!(f, " uid=0x{:08X} position={} current={}", a.uid, a.position, a.current)?;
            if let Some(t) = a.switch_time {
                write!(f, " switch_time={}ms", t as u32 * 10)?;
            }
            return Ok(());
        }
        if let Some(s) = self.feedback_state_fields() {
            return write!(
                f,
                " device={} contact={} {}->{}",
                s.device_id, s.contact_id, s.state_old, s.state_new
            );
        }
        if let Some(p) = self.ping_reply_fields() {
            return write!(
                f,
                " uid=0x{:08X} version={}.{} device=0x{:04X}",
                p.uid, p.version_major, p.version_minor, p.device_id
            );
        }
        if let Some(name) = self.config_data_name() {
            return write!(f, " \"{}\"", name);
        }
        if self.dlc > 0 {
            write!(f, " [{}]", to_hex(self.payload()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_from_uid() {
        assert_eq!(calc_hash(0), 0x0300);
        // the hash always has bits 8 and 9 set and bit 7 clear
        for uid in [0x4743_1234u32, 0xFFFF_FFFF, 0x0000_0001] {
            let h = calc_hash(uid);
            assert_eq!(h & 0x0380, 0x0300);
        }
    }

    #[test]
    fn id_layout() {
        let m = Message::new(Command::LocomotiveSpeed, true, 0);
        assert_eq!(m.id, (0x04 << 17) | 0x0001_0000 | 0x0300);
        assert_eq!(m.command(), Some(Command::LocomotiveSpeed));
        assert!(m.is_response());
        assert_eq!(m.priority(), 0);
    }

    #[test]
    fn response_flag_toggles() {
        let mut m = Message::system_go();
        assert!(!m.is_response());
        m.set_response(true);
        assert!(m.is_response());
        assert_eq!(m.system_sub_command(), Some(SystemSubCommand::SystemGo));
    }

    #[test]
    fn speed_frame() {
        let m = Message::locomotive_speed(0x4005, 1234);
        assert_eq!(m.dlc, 6);
        assert_eq!(m.payload(), &[0x00, 0x00, 0x40, 0x05, 0x03, 0xE8]);
        assert_eq!(m.speed(), Some(1000));
        assert_eq!(m.uid(), Some(0x4005));
    }

    #[test]
    fn accessory_frame_with_and_without_switch_time() {
        let a = AccessoryControl {
            uid: 0x3000,
            position: 1,
            current: 1,
            switch_time: None,
        };
        let m = Message::accessory_control(a);
        assert_eq!(m.dlc, 6);
        assert_eq!(m.accessory_control_fields(), Some(a));

        let b = AccessoryControl {
            switch_time: Some(20),
            ..a
        };
        let m = Message::accessory_control(b);
        assert_eq!(m.dlc, 8);
        assert_eq!(m.accessory_control_fields(), Some(b));
    }

    #[test]
    fn switch_time_frame() {
        let m = Message::accessory_switch_time(50);
        assert_eq!(m.dlc, 7);
        assert_eq!(m.switch_time(), Some(50));
        assert_eq!(Message::accessory_switch_time(60000).switch_time(), Some(SWITCH_TIME_MAX));
    }

    #[test]
    fn status_data_frames() {
        let request = Message::status_data_config(0x1234, 0x4743_0001, 2);
        assert_eq!(request.status_data_request(), Some((0x4743_0001, 2)));
        let data = Message::status_data_config_data(3, &[1, 2, 3]);
        assert!(data.is_status_data_packet());
        assert_eq!(data.hash(), 0x0304);
        let reply = Message::status_data_config_reply(0x1234, 0x4743_0001, 2, 4);
        assert_eq!(reply.status_data_reply(), Some((0x4743_0001, 2, 4)));
    }

    #[test]
    fn config_data_name() {
        let m = Message::config_data(0, "loks");
        assert_eq!(m.config_data_name(), Some("loks"));
        let start = Message::config_data_stream_start(0, 1000, 0xBEEF);
        assert_eq!(start.config_data_stream_header(), Some((1000, 0xBEEF)));
        assert!(!start.is_config_data_stream_data());
    }

    #[test]
    fn display() {
        assert_eq!(Message::system_stop().to_string(), "System SystemStop");
        assert_eq!(
            Message::locomotive_function(0xC003, 2, true).to_string(),
            "LocomotiveFunction uid=0x0000C003 F2=true"
        );
    }
}
