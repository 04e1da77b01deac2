use thiserror::Error;

/// Error returned when trying to read more bits than what is left in the
/// underlying data.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpGolombError {
    #[error("Exp-Golomb reader: no more data to read")]
    OutOfData,
}

/// Parser for exponential Golomb codes, a variable-bitwidth number encoding
/// scheme used by h264.
///
/// It is a very simple number encoding:
///   1. Write down x+1 in binary
///   2. Count the bits written, subtract one, and write that number of starting zero bits preceding
///     the previous bit string.
pub(crate) struct ExpGolomb<'a> {
    /// The data not loaded yet in `working_word`.
    working_data: &'a [u8],
    /// The current word being examined. 32 bits maximum here, left-aligned.
    working_word: u32,
    /// The number of bits left to examine in the current word
    working_bits_available: u32,
}

impl<'a> ExpGolomb<'a> {
    pub(crate) fn new(working_data: &'a [u8]) -> Self {
        Self {
            working_data,
            working_word: 0,
            working_bits_available: 0,
        }
    }

    /// Number of bits which can still be read.
    pub(crate) fn bits_available(&self) -> u64 {
        8 * (self.working_data.len() as u64) + self.working_bits_available as u64
    }

    /// Load the next (up to) 4 bytes into `working_word`.
    fn load_word(&mut self) -> Result<(), ExpGolombError> {
        let available_bytes = usize::min(4, self.working_data.len());
        if available_bytes == 0 {
            return Err(ExpGolombError::OutOfData);
        }

        let mut word_bytes = [0u8; 4];
        word_bytes[..available_bytes].copy_from_slice(&self.working_data[..available_bytes]);
        self.working_word = u32::from_be_bytes(word_bytes);
        self.working_bits_available = (available_bytes as u32) * 8;
        self.working_data = &self.working_data[available_bytes..];
        Ok(())
    }

    pub(crate) fn skip_bits(&mut self, count: u64) -> Result<(), ExpGolombError> {
        if count > self.bits_available() {
            return Err(ExpGolombError::OutOfData);
        }
        let mut remaining = count;
        while remaining > 0 {
            if self.working_bits_available == 0 {
                // whole bytes can be skipped without being loaded
                let skip_bytes = usize::min((remaining / 8) as usize, self.working_data.len());
                self.working_data = &self.working_data[skip_bytes..];
                remaining -= (skip_bytes as u64) * 8;
                if remaining == 0 {
                    break;
                }
                self.load_word()?;
            }
            let step = u64::min(remaining, self.working_bits_available as u64) as u32;
            self.consume(step);
            remaining -= step as u64;
        }
        Ok(())
    }

    /// Read the next `size` bits (maximum 32) as an unsigned integer.
    pub(crate) fn read_bits(&mut self, size: u32) -> Result<u32, ExpGolombError> {
        debug_assert!(size <= 32);
        if (size as u64) > self.bits_available() {
            return Err(ExpGolombError::OutOfData);
        }
        let mut value: u64 = 0;
        let mut remaining = size;
        while remaining > 0 {
            if self.working_bits_available == 0 {
                self.load_word()?;
            }
            let bits = u32::min(remaining, self.working_bits_available);
            let chunk = (self.working_word as u64) >> (32 - bits);
            value = (value << bits) | chunk;
            self.consume(bits);
            remaining -= bits;
        }
        Ok(value as u32)
    }

    /// Drop `bits` (at most `working_bits_available`) bits from the working word.
    fn consume(&mut self, bits: u32) {
        self.working_word = if bits >= 32 {
            0
        } else {
            self.working_word << bits
        };
        self.working_bits_available -= bits;
    }

    fn skip_leading_zeros(&mut self) -> Result<u32, ExpGolombError> {
        let mut leading_zero_count = 0;
        loop {
            if self.working_bits_available == 0 {
                self.load_word()?;
            }
            let zeros = u32::min(self.working_word.leading_zeros(), self.working_bits_available);
            leading_zero_count += zeros;
            if zeros < self.working_bits_available {
                self.consume(zeros);
                return Ok(leading_zero_count);
            }
            // we exhausted the working word and still have not found a 1
            self.consume(zeros);
        }
    }

    pub(crate) fn skip_unsigned(&mut self) -> Result<(), ExpGolombError> {
        let skipped = self.skip_leading_zeros()?;
        self.skip_bits(1 + skipped as u64)
    }

    pub(crate) fn skip_signed(&mut self) -> Result<(), ExpGolombError> {
        self.skip_unsigned()
    }

    pub(crate) fn read_unsigned(&mut self) -> Result<u32, ExpGolombError> {
        let clz = self.skip_leading_zeros()?;
        if clz > 31 {
            // Would not fit in a u32, this is not a valid value in H.264
            return Err(ExpGolombError::OutOfData);
        }
        Ok(self.read_bits(clz + 1)? - 1)
    }

    pub(crate) fn read_signed(&mut self) -> Result<i32, ExpGolombError> {
        let valu = self.read_unsigned()? as i64;
        let signed = if 0x01 & valu != 0 {
            // the number is odd if the low order bit is set
            (1 + valu) >> 1
        } else {
            -(valu >> 1)
        };
        Ok(signed as i32)
    }

    pub(crate) fn read_boolean(&mut self) -> Result<bool, ExpGolombError> {
        Ok(self.read_bits(1)? == 1)
    }

    pub(crate) fn read_unsigned_byte(&mut self) -> Result<u8, ExpGolombError> {
        Ok(self.read_bits(8)? as u8)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writes bits MSB first, used to build Exp-Golomb encoded fixtures.
    #[derive(Default)]
    pub(crate) struct BitWriter {
        bytes: Vec<u8>,
        bit_len: usize,
    }

    impl BitWriter {
        pub(crate) fn write_bits(&mut self, value: u32, size: u32) {
            for i in (0..size).rev() {
                let bit = (value >> i) & 1;
                if self.bit_len % 8 == 0 {
                    self.bytes.push(0);
                }
                if bit == 1 {
                    let last = self.bytes.len() - 1;
                    self.bytes[last] |= 0x80 >> (self.bit_len % 8);
                }
                self.bit_len += 1;
            }
        }

        pub(crate) fn write_unsigned(&mut self, value: u32) {
            let coded = value as u64 + 1;
            let nb_bits = 64 - coded.leading_zeros();
            self.write_bits(0, nb_bits - 1);
            for i in (0..nb_bits).rev() {
                self.write_bits(((coded >> i) & 1) as u32, 1);
            }
        }

        pub(crate) fn write_signed(&mut self, value: i32) {
            let mapped = if value > 0 {
                (value as u32) * 2 - 1
            } else {
                (-value as u32) * 2
            };
            self.write_unsigned(mapped);
        }

        pub(crate) fn write_bool(&mut self, value: bool) {
            self.write_bits(value as u32, 1);
        }

        /// Adds the RBSP stop bit and pads to a byte boundary.
        pub(crate) fn finish(mut self) -> Vec<u8> {
            self.write_bits(1, 1);
            while self.bit_len % 8 != 0 {
                self.write_bits(0, 1);
            }
            self.bytes
        }
    }

    #[test]
    fn test_read_bits_across_word_boundary() {
        let data = [0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45];
        let mut reader = ExpGolomb::new(&data);
        assert_eq!(reader.read_bits(4), Ok(0xA));
        assert_eq!(reader.read_bits(32), Ok(0xBCDEF012));
        assert_eq!(reader.read_bits(12), Ok(0x345));
        assert_eq!(reader.read_bits(1), Err(ExpGolombError::OutOfData));
    }

    #[test]
    fn test_skip_bits() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x00, 0xF0];
        let mut reader = ExpGolomb::new(&data);
        reader.skip_bits(40).unwrap();
        assert_eq!(reader.bits_available(), 8);
        assert_eq!(reader.read_bits(4), Ok(0xF));
        assert_eq!(reader.skip_bits(5), Err(ExpGolombError::OutOfData));
    }

    #[test]
    fn test_unsigned_known_values() {
        // 1, 010, 011, 00100 => 0, 1, 2, 3
        let data = [0b1010_0110, 0b0100_0000];
        let mut reader = ExpGolomb::new(&data);
        assert_eq!(reader.read_unsigned(), Ok(0));
        assert_eq!(reader.read_unsigned(), Ok(1));
        assert_eq!(reader.read_unsigned(), Ok(2));
        assert_eq!(reader.read_unsigned(), Ok(3));
    }

    #[test]
    fn test_exp_golomb_round_trip() {
        let mut writer = BitWriter::default();
        for i in 0..300 {
            writer.write_unsigned(i);
            writer.write_signed(i as i32 - 150);
        }
        writer.write_unsigned(70_000);
        let data = writer.finish();
        let mut reader = ExpGolomb::new(&data);
        for i in 0..300 {
            assert_eq!(reader.read_unsigned(), Ok(i));
            assert_eq!(reader.read_signed(), Ok(i as i32 - 150));
        }
        assert_eq!(reader.read_unsigned(), Ok(70_000));
    }

    #[test]
    fn test_leading_zeros_spanning_words() {
        // 35 leading zeroes is more than a u32 can hold
        let data = [0, 0, 0, 0, 0x10, 0xFF];
        let mut reader = ExpGolomb::new(&data);
        assert_eq!(reader.read_unsigned(), Err(ExpGolombError::OutOfData));

        // 31 leading zeroes followed by a one and 31 bits set
        let data = [0, 0, 0, 1, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut reader = ExpGolomb::new(&data);
        assert_eq!(reader.read_unsigned(), Ok(u32::MAX - 1));
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = ExpGolomb::new(&[0x00]);
        assert_eq!(reader.read_unsigned(), Err(ExpGolombError::OutOfData));
        let mut reader = ExpGolomb::new(&[]);
        assert_eq!(reader.read_boolean(), Err(ExpGolombError::OutOfData));
    }
}
