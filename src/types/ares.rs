//! Aresplot wire-level enumerations and subscription types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Start-of-packet marker.
pub const SOP: u8 = 0xA5;
/// End-of-packet marker.
pub const EOP: u8 = 0x5A;
/// `SOP | CMD | LEN(2)`
pub const HEADER_LEN: usize = 4;
/// `CHECKSUM | EOP`
pub const TRAILER_LEN: usize = 2;
/// Largest payload the host accepts before treating a header as a framing fault.
pub const MAX_PAYLOAD_LEN: usize = 2048;
/// Variables the MCU can monitor at once.
pub const MAX_SUBSCRIPTIONS: usize = 10;

/// Command identifiers for both directions of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum CommandId {
    /// PC -> MCU: replace the monitored variable set
    StartMonitor,
    /// PC -> MCU: write a variable
    SetVariable,
    /// PC -> MCU: change the sampling rate
    SetSampleRate,
    /// MCU -> PC: periodic sample of monitored variables
    MonitorData,
    /// MCU -> PC: acknowledgement of a PC command
    Ack,
    /// MCU -> PC: asynchronous error report
    ErrorReport,
}

impl CommandId {
    pub const fn as_u8(self) -> u8 {
        match self {
            CommandId::StartMonitor => 0x01,
            CommandId::SetVariable => 0x02,
            CommandId::SetSampleRate => 0x03,
            CommandId::MonitorData => 0x81,
            CommandId::Ack => 0x82,
            CommandId::ErrorReport => 0x8F,
        }
    }

    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(CommandId::StartMonitor),
            0x02 => Some(CommandId::SetVariable),
            0x03 => Some(CommandId::SetSampleRate),
            0x81 => Some(CommandId::MonitorData),
            0x82 => Some(CommandId::Ack),
            0x8F => Some(CommandId::ErrorReport),
            _ => None,
        }
    }

    /// True for commands the host sends and the MCU acknowledges.
    pub const fn is_request(self) -> bool {
        matches!(self, CommandId::StartMonitor | CommandId::SetVariable | CommandId::SetSampleRate)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandId::StartMonitor => "START_MONITOR",
            CommandId::SetVariable => "SET_VARIABLE",
            CommandId::SetSampleRate => "SET_SAMPLE_RATE",
            CommandId::MonitorData => "MONITOR_DATA",
            CommandId::Ack => "ACK",
            CommandId::ErrorReport => "ERROR_REPORT",
        };
        write!(f, "{}(0x{:02X})", name, self.as_u8())
    }
}

/// Original C type of a monitored MCU variable.
///
/// The MCU converts every monitored value to float32 before sending it; the
/// original type tells it how to read (and write) the memory behind an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum AresType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    /// Usually narrowed to float32 by the MCU
    Float64,
    Bool,
}

impl AresType {
    pub const fn as_u8(self) -> u8 {
        match self {
            AresType::Int8 => 0x00,
            AresType::UInt8 => 0x01,
            AresType::Int16 => 0x02,
            AresType::UInt16 => 0x03,
            AresType::Int32 => 0x04,
            AresType::UInt32 => 0x05,
            AresType::Float32 => 0x06,
            AresType::Float64 => 0x07,
            AresType::Bool => 0x08,
        }
    }

    pub const fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(AresType::Int8),
            0x01 => Some(AresType::UInt8),
            0x02 => Some(AresType::Int16),
            0x03 => Some(AresType::UInt16),
            0x04 => Some(AresType::Int32),
            0x05 => Some(AresType::UInt32),
            0x06 => Some(AresType::Float32),
            0x07 => Some(AresType::Float64),
            0x08 => Some(AresType::Bool),
            _ => None,
        }
    }

    /// Size of the variable in MCU memory.
    pub const fn size(self) -> usize {
        match self {
            AresType::Int8 | AresType::UInt8 | AresType::Bool => 1,
            AresType::Int16 | AresType::UInt16 => 2,
            AresType::Int32 | AresType::UInt32 | AresType::Float32 => 4,
            AresType::Float64 => 8,
        }
    }

    /// Map a type name as reported by ELF symbol extraction (`"uint16_t"`, `"float"`, ...).
    pub fn from_c_name(name: &str) -> Option<Self> {
        let name = name.trim();
        let ty = match name {
            "int8_t" | "signed char" | "char" => AresType::Int8,
            "uint8_t" | "unsigned char" => AresType::UInt8,
            "int16_t" | "short" | "short int" => AresType::Int16,
            "uint16_t" | "unsigned short" | "short unsigned int" => AresType::UInt16,
            "int32_t" | "int" | "long" | "long int" => AresType::Int32,
            "uint32_t" | "unsigned int" | "unsigned long" | "long unsigned int" => AresType::UInt32,
            "float" => AresType::Float32,
            "double" => AresType::Float64,
            "bool" | "_Bool" => AresType::Bool,
            _ => return None,
        };
        Some(ty)
    }
}

/// Status byte carried by an `ACK` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum AckStatus {
    Ok,
    ErrChecksum,
    ErrUnknownCmd,
    ErrInvalidPayload,
    ErrAddrInvalid,
    ErrTypeUnsupported,
    ErrRateUnachievable,
    ErrMcuBusy,
    ErrGeneral,
    /// A status byte outside the documented table
    Unrecognized(u8),
}

impl AckStatus {
    pub const fn from_u8(byte: u8) -> Self {
        match byte {
            0x00 => AckStatus::Ok,
            0x01 => AckStatus::ErrChecksum,
            0x02 => AckStatus::ErrUnknownCmd,
            0x03 => AckStatus::ErrInvalidPayload,
            0x04 => AckStatus::ErrAddrInvalid,
            0x05 => AckStatus::ErrTypeUnsupported,
            0x06 => AckStatus::ErrRateUnachievable,
            0x07 => AckStatus::ErrMcuBusy,
            0xFF => AckStatus::ErrGeneral,
            other => AckStatus::Unrecognized(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            AckStatus::Ok => 0x00,
            AckStatus::ErrChecksum => 0x01,
            AckStatus::ErrUnknownCmd => 0x02,
            AckStatus::ErrInvalidPayload => 0x03,
            AckStatus::ErrAddrInvalid => 0x04,
            AckStatus::ErrTypeUnsupported => 0x05,
            AckStatus::ErrRateUnachievable => 0x06,
            AckStatus::ErrMcuBusy => 0x07,
            AckStatus::ErrGeneral => 0xFF,
            AckStatus::Unrecognized(byte) => byte,
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, AckStatus::Ok)
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AckStatus::Ok => "OK",
            AckStatus::ErrChecksum => "checksum error",
            AckStatus::ErrUnknownCmd => "unknown command",
            AckStatus::ErrInvalidPayload => "invalid payload",
            AckStatus::ErrAddrInvalid => "invalid address",
            AckStatus::ErrTypeUnsupported => "unsupported type",
            AckStatus::ErrRateUnachievable => "sample rate unachievable",
            AckStatus::ErrMcuBusy => "MCU busy or resource limit",
            AckStatus::ErrGeneral => "general failure",
            AckStatus::Unrecognized(byte) => return write!(f, "unrecognized status 0x{:02X}", byte),
        };
        f.write_str(text)
    }
}

/// One MCU variable selected for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Subscription {
    pub address: u32,
    pub original_type: AresType,
    /// Client-side label, never sent to the MCU
    pub display_name: String,
}

impl Subscription {
    pub fn new(address: u32, original_type: AresType, display_name: impl Into<String>) -> Self {
        Self { address, original_type, display_name: display_name.into() }
    }
}

/// Ordered set of monitored variables, sent whole in one `START_MONITOR`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new(entries: Vec<Subscription>) -> crate::Result<Self> {
        if entries.len() > MAX_SUBSCRIPTIONS {
            return Err(crate::AresplotError::TooManySubscriptions {
                count: entries.len(),
                max: MAX_SUBSCRIPTIONS,
            });
        }
        Ok(Self { entries })
    }

    /// Append one variable; rejected once the set is full.
    pub fn push(&mut self, subscription: Subscription) -> crate::Result<()> {
        if self.entries.len() >= MAX_SUBSCRIPTIONS {
            return Err(crate::AresplotError::TooManySubscriptions {
                count: self.entries.len() + 1,
                max: MAX_SUBSCRIPTIONS,
            });
        }
        self.entries.push(subscription);
        Ok(())
    }

    /// Remove the variable at `address`, returning it if present.
    pub fn remove(&mut self, address: u32) -> Option<Subscription> {
        let index = self.entries.iter().position(|s| s.address == address)?;
        Some(self.entries.remove(index))
    }

    pub fn entries(&self) -> &[Subscription] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Channel labels in monitor-data order.
    pub fn channel_names(&self) -> Vec<String> {
        self.entries.iter().map(|s| s.display_name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_round_trip_through_bytes() {
        for cmd in [
            CommandId::StartMonitor,
            CommandId::SetVariable,
            CommandId::SetSampleRate,
            CommandId::MonitorData,
            CommandId::Ack,
            CommandId::ErrorReport,
        ] {
            assert_eq!(CommandId::from_u8(cmd.as_u8()), Some(cmd));
        }
        assert_eq!(CommandId::from_u8(0x42), None);
        assert!(CommandId::SetVariable.is_request());
        assert!(!CommandId::MonitorData.is_request());
    }

    #[test]
    fn ares_type_codes_match_wire_table() {
        assert_eq!(AresType::Int8.as_u8(), 0x00);
        assert_eq!(AresType::Float32.as_u8(), 0x06);
        assert_eq!(AresType::Bool.as_u8(), 0x08);
        assert_eq!(AresType::from_u8(0x03), Some(AresType::UInt16));
        assert_eq!(AresType::from_u8(0x09), None);
        assert_eq!(AresType::Float64.size(), 8);
        assert_eq!(AresType::from_c_name("short unsigned int"), Some(AresType::UInt16));
        assert_eq!(AresType::from_c_name("struct foo"), None);
    }

    #[test]
    fn ack_status_keeps_unknown_bytes() {
        assert_eq!(AckStatus::from_u8(0xFF), AckStatus::ErrGeneral);
        assert_eq!(AckStatus::from_u8(0x07), AckStatus::ErrMcuBusy);
        let odd = AckStatus::from_u8(0x42);
        assert_eq!(odd, AckStatus::Unrecognized(0x42));
        assert_eq!(odd.as_u8(), 0x42);
        assert!(odd.to_string().contains("0x42"));
        assert!(AckStatus::Ok.is_ok());
    }

    #[test]
    fn subscription_set_is_bounded() {
        let mut set = SubscriptionSet::default();
        for i in 0..MAX_SUBSCRIPTIONS {
            set.push(Subscription::new(0x2000_0000 + i as u32 * 4, AresType::Float32, format!("v{i}")))
                .unwrap();
        }
        let err = set.push(Subscription::new(0x3000_0000, AresType::UInt8, "extra")).unwrap_err();
        assert!(matches!(err, crate::AresplotError::TooManySubscriptions { count: 11, max: 10 }));

        let removed = set.remove(0x2000_0004).unwrap();
        assert_eq!(removed.display_name, "v1");
        assert_eq!(set.len(), MAX_SUBSCRIPTIONS - 1);
        assert_eq!(set.channel_names()[1], "v2");

        let too_many = (0..11).map(|i| Subscription::new(i, AresType::Int8, "x")).collect();
        assert!(SubscriptionSet::new(too_many).is_err());
    }
}
