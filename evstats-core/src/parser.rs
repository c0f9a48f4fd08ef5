#![allow(clippy::unusual_byte_groupings)]
//! Field extraction for EVT 3.0 raw 16-bit words.
//!
//! Every word carries a 4-bit type in bits 15:12 and a 12-bit payload whose
//! layout depends on the type:
//!
//! | type | name        | payload                                  |
//! |------|-------------|------------------------------------------|
//! | 0x0  | ADDR_Y      | [11] system type, [10:0] y               |
//! | 0x2  | ADDR_X      | [11] polarity, [10:0] x                  |
//! | 0x3  | VECT_BASE_X | [11] polarity, [10:0] x                  |
//! | 0x4  | VECT_12     | [11:0] validity mask                     |
//! | 0x5  | VECT_8      | [7:0] validity mask                      |
//! | 0x6  | TIME_LOW    | [11:0] lower timestamp bits              |
//! | 0x8  | TIME_HIGH   | [11:0] upper timestamp bits              |
//! | 0xA  | EXT_TRIGGER | [11:8] channel, [0] edge                 |

/// Word types of the EVT 3.0 bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WordKind {
    AddrY = 0x0,
    AddrX = 0x2,
    VectBaseX = 0x3,
    Vect12 = 0x4,
    Vect8 = 0x5,
    TimeLow = 0x6,
    Continued4 = 0x7,
    TimeHigh = 0x8,
    ExtTrigger = 0xA,
    Others = 0xE,
    Continued12 = 0xF,
}

impl WordKind {
    /// Returns `None` for the reserved type values.
    #[inline]
    pub fn from_nibble(value: u8) -> Option<Self> {
        Some(match value {
            0x0 => Self::AddrY,
            0x2 => Self::AddrX,
            0x3 => Self::VectBaseX,
            0x4 => Self::Vect12,
            0x5 => Self::Vect8,
            0x6 => Self::TimeLow,
            0x7 => Self::Continued4,
            0x8 => Self::TimeHigh,
            0xA => Self::ExtTrigger,
            0xE => Self::Others,
            0xF => Self::Continued12,
            _ => return None,
        })
    }
}

/// One little-endian 16-bit word of an EVT 3.0 stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawWord(pub u16);

impl RawWord {
    #[inline]
    pub fn kind(self) -> Option<WordKind> {
        WordKind::from_nibble((self.0 >> 12) as u8 & 0xF)
    }

    /// Coordinate field of ADDR_Y, ADDR_X and VECT_BASE_X words.
    #[inline]
    pub fn coordinate(self) -> u16 {
        self.0 & 0x07FF
    }

    /// Polarity bit of ADDR_X and VECT_BASE_X words.
    #[inline]
    pub fn polarity_bit(self) -> u8 {
        ((self.0 >> 11) & 0x1) as u8
    }

    /// Lower or upper 12 timestamp bits of TIME_LOW / TIME_HIGH words.
    #[inline]
    pub fn time_bits(self) -> u64 {
        (self.0 & 0x0FFF) as u64
    }

    /// Validity mask of a VECT_12 (12 bits) or VECT_8 (8 bits) word.
    #[inline]
    pub fn validity(self, width: u16) -> u32 {
        (self.0 as u32) & ((1u32 << width) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_words() {
        // type=0, system_type=1, y=100
        let y = RawWord(0b0000_1_00001100100);
        assert_eq!(y.kind(), Some(WordKind::AddrY));
        assert_eq!(y.coordinate(), 100);

        // type=2, pol=1, x=300
        let x = RawWord(0b0010_1_00100101100);
        assert_eq!(x.kind(), Some(WordKind::AddrX));
        assert_eq!(x.coordinate(), 300);
        assert_eq!(x.polarity_bit(), 1);
    }

    #[test]
    fn test_vector_masks() {
        let v12 = RawWord(0b0100_101010101010);
        assert_eq!(v12.kind(), Some(WordKind::Vect12));
        assert_eq!(v12.validity(12), 0b101010101010);

        let v8 = RawWord(0b0101_1111_00001111);
        assert_eq!(v8.kind(), Some(WordKind::Vect8));
        assert_eq!(v8.validity(8), 0b00001111);
    }

    #[test]
    fn test_time_and_reserved() {
        let high = RawWord(0b1000_101010111100);
        assert_eq!(high.kind(), Some(WordKind::TimeHigh));
        assert_eq!(high.time_bits(), 0xABC);
        assert_eq!(RawWord(0x1000).kind(), None);
        assert_eq!(RawWord(0x9000).kind(), None);
    }
}
