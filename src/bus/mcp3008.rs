// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! MCP3008 framing and the spidev-backed bus.
//!
//! A conversion is a three byte full-duplex transfer: a start bit, then the
//! single-ended flag and channel in the high nibble of the second byte. The
//! 10-bit result comes back in the low two bits of the second byte and all of the
//! third.

use super::{Channel, MAX_SAMPLE};

/// SPI clock used for the converter. 1.35MHz is the datasheet maximum at 3.3V.
#[cfg_attr(not(feature = "spi"), allow(dead_code))]
const SPI_CLOCK_HZ: u32 = 1_350_000;

/// Builds the request frame for a single-ended conversion on the channel.
pub fn request(channel: Channel) -> [u8; 3] {
    [1, (8 + channel.index()) << 4, 0]
}

/// Extracts the conversion result from a response frame.
pub fn decode(response: &[u8; 3]) -> u16 {
    (((u16::from(response[1]) & 0x03) << 8) | u16::from(response[2])) & MAX_SAMPLE
}

#[cfg(feature = "spi")]
pub use self::spi::SpiBus;

#[cfg(feature = "spi")]
mod spi {
    use std::fmt;

    use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};
    use tracing::info;

    use super::{decode, request, SPI_CLOCK_HZ};
    use crate::bus::{BusError, Channel};

    /// An MCP3008 attached to a Linux spidev device.
    pub struct SpiBus {
        path: String,
        spi: Spidev,
    }

    impl SpiBus {
        /// Opens and configures the spidev device at the given path.
        pub fn open(path: &str) -> Result<SpiBus, BusError> {
            let mut spi = Spidev::open(path)?;
            let options = SpidevOptions::new()
                .bits_per_word(8)
                .max_speed_hz(SPI_CLOCK_HZ)
                .mode(SpiModeFlags::SPI_MODE_0)
                .build();
            spi.configure(&options)?;

            info!(bus = path, clock_hz = SPI_CLOCK_HZ, "Opened SPI bus");
            Ok(SpiBus {
                path: path.to_string(),
                spi,
            })
        }
    }

    impl crate::bus::Bus for SpiBus {
        fn read(&mut self, channel: Channel) -> Result<u16, BusError> {
            let tx = request(channel);
            let mut rx = [0u8; 3];
            {
                let mut transfer = SpidevTransfer::read_write(&tx, &mut rx);
                self.spi.transfer(&mut transfer)?;
            }
            Ok(decode(&rx))
        }
    }

    impl Drop for SpiBus {
        fn drop(&mut self) {
            // The file descriptor closes with the Spidev handle.
            info!(bus = self.path, "Released SPI bus");
        }
    }

    impl fmt::Display for SpiBus {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{} (MCP3008)", self.path)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_frames() {
        assert_eq!([1, 0x80, 0], request(Channel::new(0).unwrap()));
        assert_eq!([1, 0x90, 0], request(Channel::new(1).unwrap()));
        assert_eq!([1, 0xF0, 0], request(Channel::new(7).unwrap()));
    }

    #[test]
    fn test_decode() {
        assert_eq!(0, decode(&[0, 0, 0]));
        assert_eq!(1023, decode(&[0xFF, 0xFF, 0xFF]));
        assert_eq!(512, decode(&[0, 0x02, 0x00]));
        // Bits above the 10-bit result are ignored.
        assert_eq!(0x1AB, decode(&[0, 0xF1, 0xAB]));
    }
}
