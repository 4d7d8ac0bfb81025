//! Content tags written after `output` headers.
//!
//! The accumulator, mask and radix are fixed: tags already stored in notes
//! must keep matching the code that produced them.

const SEED: u64 = 5381;
const LOW_56_BITS: u64 = 0x00ff_ffff_ffff_ffff;
const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn fingerprint(text: &str) -> String {
    let acc = text
        .bytes()
        .fold(SEED, |acc, byte| 127 * (acc & LOW_56_BITS) + u64::from(byte));
    to_base36(acc)
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
