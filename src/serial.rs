// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serial line parameters and RTU character timing
//!
//! RTU delimits frames by silence on the wire: a pause of at least 3.5
//! character times marks the end of a frame. Serial drivers usually do not
//! expose character timer interrupts, so the timing has to be derived from
//! the line parameters instead:
//!
//! ```text
//! bit_time           = 1 / baud_rate
//! char_time          = (start + data_bits + parity_bit + stop_bits) * bit_time
//! inter_char_timeout = max(1.75 ms, 1.5 * char_time)
//! frame_end_silence  = max(1.75 ms, 3.5 * char_time)
//! ```
//!
//! The 1.75 ms floor is the fixed value the Modbus serial line specification
//! prescribes for baud rates above 19200.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The fixed timing floor used above 19200 baud.
const SILENCE_FLOOR: Duration = Duration::from_micros(1750);

/// Parity bit configuration of a serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Serial line parameters of an RTU bus.
///
/// Used to derive inter-character timeouts, the inter-frame silence and
/// transmission durations. The parameters describe the line only; opening
/// and configuring the port is up to the serial driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl SerialParams {
    /// Line parameters for the common `<baud>` 8N1 configuration.
    #[must_use]
    pub const fn new_8n1(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }

    /// Bits on the wire per transmitted character, including the start bit.
    #[must_use]
    pub fn bits_per_char(&self) -> u32 {
        let parity_bit = match self.parity {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        };
        1 + u32::from(self.data_bits) + parity_bit + u32::from(self.stop_bits)
    }

    /// Duration of a single character on the wire.
    #[must_use]
    pub fn char_time(&self) -> Duration {
        self.transmission_time(1)
    }

    /// Timeout between two bytes of the same frame.
    ///
    /// While a frame is being received, a gap longer than this marks the
    /// end of the frame (1.5 character times, floored at 1.75 ms).
    #[must_use]
    pub fn inter_char_timeout(&self) -> Duration {
        SILENCE_FLOOR.max(self.char_time() * 3 / 2)
    }

    /// Required idle time between two frames.
    ///
    /// An initiator must not start a new frame before the bus has been
    /// silent for 3.5 character times (floored at 1.75 ms).
    #[must_use]
    pub fn frame_end_silence(&self) -> Duration {
        SILENCE_FLOOR.max(self.char_time() * 7 / 2)
    }

    /// Time needed to clock `frame_bytes` bytes onto the wire.
    ///
    /// Half-duplex transceivers without a `tx_done` signal sleep for this
    /// duration before releasing the driver-enable pin.
    #[must_use]
    pub fn transmission_time(&self, frame_bytes: usize) -> Duration {
        let bits = self.bits_per_char() as u64 * frame_bytes as u64;
        Duration::from_nanos(bits * 1_000_000_000 / u64::from(self.baud_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_time_9600_8n1() {
        let params = SerialParams::new_8n1(9600);
        assert_eq!(params.bits_per_char(), 10);
        // 10 bits / 9600 baud ~ 1.0417 ms
        assert_eq!(params.char_time(), Duration::from_nanos(1_041_666));
    }

    #[test]
    fn parity_adds_a_bit() {
        let params = SerialParams {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::Even,
        };
        assert_eq!(params.bits_per_char(), 11);
    }

    #[test]
    fn silence_at_low_baud_rates() {
        let params = SerialParams::new_8n1(9600);
        // 3.5 chars ~ 3.646 ms, well above the floor
        assert_eq!(params.frame_end_silence(), Duration::from_nanos(3_645_831));
        // 1.5 chars ~ 1.5625 ms, below the floor
        assert_eq!(params.inter_char_timeout(), SILENCE_FLOOR);
    }

    #[test]
    fn silence_floor_at_high_baud_rates() {
        let params = SerialParams::new_8n1(115_200);
        assert_eq!(params.frame_end_silence(), SILENCE_FLOOR);
        assert_eq!(params.inter_char_timeout(), SILENCE_FLOOR);
    }

    #[test]
    fn transmission_time_scales_with_length() {
        let params = SerialParams::new_8n1(9600);
        // a 8 byte frame takes 80 bit times
        assert_eq!(params.transmission_time(8), Duration::from_nanos(8_333_333));
        assert_eq!(params.transmission_time(0), Duration::ZERO);
    }
}
