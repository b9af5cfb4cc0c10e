//! Decoding of raw register words into typed values, and encoding of the one
//! value this tool ever writes beyond plain words: the inverter frequency.

use crate::registers::WordOrder;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response carries {got} registers, expected {expected}")]
    ShortPayload { got: usize, expected: usize },
    #[error("unit scale register holds unknown code {0}")]
    UnknownUnitCode(u16),
}

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("frequency {0:.2} Hz is outside the 40.00-70.00 Hz operating band")]
pub struct FrequencyOutOfRange(pub f64);

/// Inclusive inverter operating band, in centihertz.
pub const FREQUENCY_MIN_CHZ: u16 = 4000;
pub const FREQUENCY_MAX_CHZ: u16 = 7000;

pub fn decode_u16(words: &[u16]) -> Result<u16, DecodeError> {
    match words {
        [first, ..] => Ok(*first),
        [] => Err(DecodeError::ShortPayload { got: 0, expected: 1 }),
    }
}

fn decode_word_pair(words: &[u16], order: WordOrder) -> Result<u32, DecodeError> {
    let [a, b, ..] = words else {
        return Err(DecodeError::ShortPayload { got: words.len(), expected: 2 });
    };
    let (high, low) = match order {
        WordOrder::HighFirst => (*a, *b),
        WordOrder::LowFirst => (*b, *a),
    };
    Ok(u32::from(high) << 16 | u32::from(low))
}

/// Reassemble a signed 32-bit accumulator from two registers.
pub fn decode_i32(words: &[u16], order: WordOrder) -> Result<i32, DecodeError> {
    Ok(decode_word_pair(words, order)? as i32)
}

pub fn decode_u32(words: &[u16], order: WordOrder) -> Result<u32, DecodeError> {
    decode_word_pair(words, order)
}

/// Reassemble an IEEE-754 single-precision float from two registers.
pub fn decode_f32(words: &[u16], order: WordOrder) -> Result<f32, DecodeError> {
    Ok(f32::from_bits(decode_word_pair(words, order)?))
}

/// Convert a frequency in hertz to the centihertz count written to the
/// inverter's frequency holding register.
///
/// The drive refuses to run outside 40.00-70.00 Hz, so out-of-band requests
/// are rejected here before any I/O happens.
pub fn encode_frequency(hertz: f64) -> Result<u16, FrequencyOutOfRange> {
    let centihertz = (hertz * 100.0).round();
    if !(f64::from(FREQUENCY_MIN_CHZ)..=f64::from(FREQUENCY_MAX_CHZ)).contains(&centihertz) {
        return Err(FrequencyOutOfRange(hertz));
    }
    Ok(centihertz as u16)
}

/// The inverse of [`encode_frequency`], for presenting the read-back value.
pub fn decode_frequency(centihertz: u16) -> f64 {
    f64::from(centihertz) * 0.01
}

/// Model designator prefixes keyed by the high byte of the model register.
const MODEL_PREFIXES: [&str; 8] = [
    "CPA08", "CPA11", "CPA28", "CPA62", "CPA111", "CPA286", "CPA1110", "CPA1114",
];

/// Model designator suffixes keyed by the low byte of the model register.
const MODEL_SUFFIXES: [&str; 8] = ["A1", "01", "02", "03", "H3", "I3", "1I", "W1"];

/// Translate the packed model register into the two-part model designator.
///
/// Byte values start at 1; zero and anything past the table fall back to the
/// bare "CPA" prefix with an empty suffix, for both bytes alike.
pub fn decode_model_bytes(word: u16) -> String {
    let [high, low] = word.to_be_bytes();
    let prefix = lookup(&MODEL_PREFIXES, high).unwrap_or("CPA");
    let suffix = lookup(&MODEL_SUFFIXES, low).unwrap_or("");
    format!("{prefix}{suffix}")
}

fn lookup(table: &'static [&'static str], byte: u8) -> Option<&'static str> {
    let index = usize::from(byte).checked_sub(1)?;
    table.get(index).copied()
}

/// Software revision register holds major in the high byte, minor in the low.
pub fn format_software_rev(word: u16) -> String {
    let [major, minor] = word.to_be_bytes();
    format!("{major}.{minor}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_high_word_first() {
        assert_eq!(decode_f32(&[0x4248, 0x8000], WordOrder::HighFirst), Ok(50.125));
        assert_eq!(decode_f32(&[0x4248, 0x0000], WordOrder::HighFirst), Ok(50.0));
    }

    #[test]
    fn f32_low_word_first() {
        assert_eq!(decode_f32(&[0x8000, 0x4248], WordOrder::LowFirst), Ok(50.125));
    }

    #[test]
    fn f32_short_payload() {
        assert_eq!(
            decode_f32(&[0x4248], WordOrder::HighFirst),
            Err(DecodeError::ShortPayload { got: 1, expected: 2 })
        );
    }

    #[test]
    fn i32_negative_accumulator() {
        let raw = (-524288i32) as u32;
        let words = [(raw >> 16) as u16, raw as u16];
        assert_eq!(decode_i32(&words, WordOrder::HighFirst), Ok(-524288));
        let swapped = [words[1], words[0]];
        assert_eq!(decode_i32(&swapped, WordOrder::LowFirst), Ok(-524288));
    }

    #[test]
    fn frequency_band_is_inclusive() {
        assert_eq!(encode_frequency(40.00), Ok(4000));
        assert_eq!(encode_frequency(70.00), Ok(7000));
        assert_eq!(encode_frequency(39.99), Err(FrequencyOutOfRange(39.99)));
        assert_eq!(encode_frequency(70.01), Err(FrequencyOutOfRange(70.01)));
    }

    #[test]
    fn frequency_round_trips_at_centihertz_granularity() {
        for raw in FREQUENCY_MIN_CHZ..=FREQUENCY_MAX_CHZ {
            assert_eq!(encode_frequency(decode_frequency(raw)), Ok(raw));
        }
    }

    #[test]
    fn model_designator_from_byte_pair() {
        assert_eq!(decode_model_bytes(0x0101), "CPA08A1");
        assert_eq!(decode_model_bytes(0x0605), "CPA286H3");
    }

    #[test]
    fn unknown_model_bytes_fall_back() {
        assert_eq!(decode_model_bytes(0x0000), "CPA");
        assert_eq!(decode_model_bytes(0xFF01), "CPAA1");
        assert_eq!(decode_model_bytes(0x01FF), "CPA08");
    }

    #[test]
    fn software_rev_formatting() {
        assert_eq!(format_software_rev(0x0203), "2.3");
    }
}
