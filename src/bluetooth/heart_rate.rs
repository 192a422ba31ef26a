//! Heart Rate Measurement (0x2A37) decoding

/// Flags bit 0: value is a u16 instead of a u8
const FLAG_VALUE_FORMAT_U16: u8 = 0x01;

/// Beats per minute carried by a measurement notification
pub fn parse_heart_rate(payload: &[u8]) -> Option<u16> {
    let (&flags, rest) = payload.split_first()?;
    if flags & FLAG_VALUE_FORMAT_U16 == 0 {
        rest.first().map(|&bpm| u16::from(bpm))
    } else {
        match rest {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u8_format() {
        assert_eq!(parse_heart_rate(&[0x00, 72]), Some(72));
        // RR intervals and energy fields after the value are ignored
        assert_eq!(parse_heart_rate(&[0x10, 65, 0x20, 0x03]), Some(65));
    }

    #[test]
    fn test_u16_format() {
        assert_eq!(parse_heart_rate(&[0x01, 0x2C, 0x01]), Some(300));
    }

    #[test]
    fn test_short_payloads() {
        assert_eq!(parse_heart_rate(&[]), None);
        assert_eq!(parse_heart_rate(&[0x00]), None);
        assert_eq!(parse_heart_rate(&[0x01, 0x50]), None);
    }
}
