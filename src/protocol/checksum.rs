// src/protocol/checksum.rs - Additive frame checksum

/// Modulus of the additive checksum. The board firmware reduces by 255, not 256.
pub const CHECKSUM_MODULUS: u32 = 255;

/// Sum of `bytes` reduced modulo 255.
///
/// Returns 0 for an empty slice. Callers holding wider integers must mask them to
/// bytes before calling; nothing here checks that.
pub fn compute(bytes: &[u8]) -> u8 {
    let sum: u32 = bytes.iter().map(|&b| b as u32).sum();
    (sum % CHECKSUM_MODULUS) as u8
}

/// Checks a frame whose last byte is the checksum of everything before it.
///
/// An empty frame has no trailer and never verifies.
pub fn verify(frame: &[u8]) -> bool {
    match frame.split_last() {
        Some((&trailer, payload)) => compute(payload) == trailer,
        None => false,
    }
}
