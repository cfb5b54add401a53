/// Generator polynomial x^8 + x^2 + x + 1.
const POLY: u8 = 0x07;

/// CRC-8 over a DATA payload: MSB first, init 0, no final xor.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}
