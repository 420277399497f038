//! Byte swapping of 16-bit samples received from a peer of the other
//! endianness.
//!
//! Reads can end on an odd byte, so the repair carries at most one unpaired
//! input byte (`hang_over`) and at most one swapped output byte that did not
//! fit the caller buffer (`left_over`) between reads.

use tracing::trace;

/// Streaming swap state of one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteOrderRepair {
    hang_over: Option<u8>,
    left_over: Option<u8>,
}

impl ByteOrderRepair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget carried bytes; called when a new frame starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Swapped byte owed to the caller from the previous read. When present it
    /// must be delivered before any new input is read.
    pub fn take_left_over(&mut self) -> Option<u8> {
        self.left_over.take()
    }

    /// Whether an unpaired input byte is waiting for its partner.
    pub fn has_hang_over(&self) -> bool {
        self.hang_over.is_some()
    }

    /// Swap the first `filled` raw bytes of `buf` in place, combined with any
    /// carried byte, and return how many output bytes are now valid at the
    /// front of `buf`.
    pub fn repair(&mut self, buf: &mut [u8], filled: usize) -> usize {
        debug_assert!(self.left_over.is_none());
        let cap = buf.len();
        let filled = filled.min(cap);
        if filled == 0 {
            return 0;
        }

        // Lay out hang_over + new bytes at the front of buf. When buf is full
        // the final input byte does not fit and is carried separately.
        let mut overflow = None;
        let mut len = filled;
        if let Some(hang) = self.hang_over.take() {
            if filled < cap {
                buf.copy_within(0..filled, 1);
                len = filled + 1;
            } else {
                overflow = Some(buf[filled - 1]);
                buf.copy_within(0..filled - 1, 1);
            }
            buf[0] = hang;
        }

        match overflow {
            None => {
                swap_pairs(&mut buf[..len]);
                if len % 2 == 1 {
                    self.hang_over = Some(buf[len - 1]);
                    len -= 1;
                }
            }
            Some(last) if len % 2 == 1 => {
                // The final pair is (buf[len - 1], last): emit its first
                // swapped byte now and owe the second.
                swap_pairs(&mut buf[..len - 1]);
                self.left_over = Some(buf[len - 1]);
                buf[len - 1] = last;
            }
            Some(last) => {
                swap_pairs(&mut buf[..len]);
                self.hang_over = Some(last);
            }
        }
        trace!(
            input = filled,
            output = len,
            hang_over = self.hang_over.is_some(),
            left_over = self.left_over.is_some(),
            "swapped 16-bit samples"
        );
        len
    }
}

fn swap_pairs(buf: &mut [u8]) {
    for pair in buf.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
