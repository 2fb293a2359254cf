//! Weak rolling checksum (rsync's Adler-style sum).
//!
//! Two 16-bit sums over a window: `a` is the sum of the bytes and `b` the
//! sum of the running `a` values. Sliding the window by one byte is O(1).
//! Arithmetic wraps in `u32` and is masked to 16 bits on read, which is
//! equivalent to working modulo 2^16 throughout.

#[derive(Debug, Clone, Copy)]
pub struct RollingChecksum {
    a: u32,
    b: u32,
    len: u32,
}

impl RollingChecksum {
    /// Checksum of a full window.
    pub fn new(window: &[u8]) -> Self {
        let len = window.len() as u32;
        let mut a: u32 = 0;
        let mut b: u32 = 0;

        for (i, &byte) in window.iter().enumerate() {
            a = a.wrapping_add(byte as u32);
            b = b.wrapping_add((len - i as u32).wrapping_mul(byte as u32));
        }

        Self { a, b, len }
    }

    /// Slide the window one byte: drop `outgoing` from the front, append
    /// `incoming` at the back.
    pub fn roll(&mut self, outgoing: u8, incoming: u8) {
        self.a = self
            .a
            .wrapping_sub(outgoing as u32)
            .wrapping_add(incoming as u32);
        self.b = self
            .b
            .wrapping_sub(self.len.wrapping_mul(outgoing as u32))
            .wrapping_add(self.a);
    }

    /// Packed value: `a` in the low half, `b` in the high half.
    pub fn value(&self) -> u32 {
        (self.a & 0xffff) | ((self.b & 0xffff) << 16)
    }
}

/// One-shot weak checksum of a block.
pub fn weak_checksum(block: &[u8]) -> u32 {
    RollingChecksum::new(block).value()
}
