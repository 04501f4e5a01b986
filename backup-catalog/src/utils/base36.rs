//! Base-36 encoding of backup ids, used for catalog directory names.

const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Encode with upper-case digits, no padding.
pub fn encode(mut value: u64) -> String {
    // 36^13 > 2^64
    let mut buf = [0u8; 13];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = DIGITS[(value % 36) as usize];
        value /= 36;
        if value == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&buf[pos..]).into_owned()
}

/// Decode leading base-36 digits (either case), stopping at the first other
/// character. Overflow saturates. An empty or non-numeric string is 0.
pub fn decode(text: &str) -> u64 {
    let mut value: u64 = 0;
    for c in text.trim_start().chars() {
        let Some(digit) = c.to_digit(36) else {
            break;
        };
        value = value.saturating_mul(36).saturating_add(u64::from(digit));
    }
    value
}
