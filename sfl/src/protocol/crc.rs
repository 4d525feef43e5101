//! CRC-16/XMODEM checksum.
//!
//! Polynomial 0x1021, initial value 0, no reflection, no final xor. This is
//! the checksum carried big-endian in every SFL frame header.

const POLY: u16 = 0x1021;

static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        #[allow(clippy::cast_possible_truncation)]
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a CRC-16/XMODEM computation over more bytes.
pub fn crc16_xmodem_update(crc: u16, data: &[u8]) -> u16 {
    data.iter().fold(crc, |crc, &byte| {
        TABLE[usize::from((crc >> 8) as u8 ^ byte)] ^ (crc << 8)
    })
}

/// Compute the CRC-16/XMODEM of a byte buffer.
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    crc16_xmodem_update(0, data)
}
