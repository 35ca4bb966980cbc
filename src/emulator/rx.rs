//! Byte-wise receive state machine of the emulated MCU

use crate::types::{EOP, SOP};

/// Payload capacity of the MCU receive buffer.
pub const RX_BUFFER_SIZE: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    WaitSop,
    WaitCmd,
    WaitLen1,
    WaitLen2,
    WaitPayload,
    WaitChecksum,
    WaitEop,
}

/// What a completed receive produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxEvent {
    Frame { cmd: u8, payload: Vec<u8> },
    /// The MCU answers these with `ACK(cmd, ERR_CHECKSUM)`
    ChecksumMismatch { cmd: u8 },
}

/// Receive state machine fed one byte at a time.
#[derive(Debug)]
pub struct RxMachine {
    state: RxState,
    cmd: u8,
    len: u16,
    payload: Vec<u8>,
    checksum: u8,
}

impl Default for RxMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RxMachine {
    pub fn new() -> Self {
        Self {
            state: RxState::WaitSop,
            cmd: 0,
            len: 0,
            payload: Vec::with_capacity(RX_BUFFER_SIZE),
            checksum: 0,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Option<RxEvent> {
        match self.state {
            RxState::WaitSop => {
                if byte == SOP {
                    self.checksum = 0;
                    self.state = RxState::WaitCmd;
                }
            }
            RxState::WaitCmd => {
                self.cmd = byte;
                self.checksum ^= byte;
                self.state = RxState::WaitLen1;
            }
            RxState::WaitLen1 => {
                self.len = byte as u16;
                self.checksum ^= byte;
                self.state = RxState::WaitLen2;
            }
            RxState::WaitLen2 => {
                self.len |= (byte as u16) << 8;
                self.checksum ^= byte;
                self.payload.clear();
                self.state = if self.len as usize > RX_BUFFER_SIZE {
                    RxState::WaitSop
                } else if self.len == 0 {
                    RxState::WaitChecksum
                } else {
                    RxState::WaitPayload
                };
            }
            RxState::WaitPayload => {
                self.payload.push(byte);
                self.checksum ^= byte;
                if self.payload.len() >= self.len as usize {
                    self.state = RxState::WaitChecksum;
                }
            }
            RxState::WaitChecksum => {
                if byte == self.checksum {
                    self.state = RxState::WaitEop;
                } else {
                    self.state = RxState::WaitSop;
                    return Some(RxEvent::ChecksumMismatch { cmd: self.cmd });
                }
            }
            RxState::WaitEop => {
                self.state = RxState::WaitSop;
                if byte == EOP {
                    return Some(RxEvent::Frame { cmd: self.cmd, payload: std::mem::take(&mut self.payload) });
                }
            }
        }
        None
    }

    pub fn is_idle(&self) -> bool {
        self.state == RxState::WaitSop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::build_frame;

    fn feed_all(rx: &mut RxMachine, bytes: &[u8]) -> Vec<RxEvent> {
        bytes.iter().filter_map(|b| rx.feed(*b)).collect()
    }

    #[test]
    fn receives_frame_after_noise() {
        let mut rx = RxMachine::new();
        let mut bytes = vec![0x00, 0x13];
        bytes.extend(build_frame(0x03, &100u32.to_le_bytes()).unwrap());

        let events = feed_all(&mut rx, &bytes);
        assert_eq!(events, vec![RxEvent::Frame { cmd: 0x03, payload: 100u32.to_le_bytes().to_vec() }]);
        assert!(rx.is_idle());
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let mut rx = RxMachine::new();
        let mut frame = build_frame(0x02, &[1, 2, 3]).unwrap();
        let at = frame.len() - 2;
        frame[at] ^= 0xFF;

        assert_eq!(feed_all(&mut rx, &frame), vec![RxEvent::ChecksumMismatch { cmd: 0x02 }]);
    }

    #[test]
    fn bad_eop_drops_silently() {
        let mut rx = RxMachine::new();
        let mut frame = build_frame(0x01, &[0]).unwrap();
        let last = frame.len() - 1;
        frame[last] = 0x00;

        assert!(feed_all(&mut rx, &frame).is_empty());
        assert!(rx.is_idle());
    }

    #[test]
    fn oversized_length_resets() {
        let mut rx = RxMachine::new();
        // LEN = 129
        assert!(feed_all(&mut rx, &[SOP, 0x01, 0x81, 0x00]).is_empty());
        assert!(rx.is_idle());

        let events = feed_all(&mut rx, &build_frame(0x01, &[0]).unwrap());
        assert_eq!(events.len(), 1);
    }
}
