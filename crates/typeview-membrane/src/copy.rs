//! Block copy and block reset primitives.
//!
//! Copies proceed in the widest chunk (8, 4, 2 or 1 bytes) that evenly divides
//! the length, falling back to a byte loop for irregular sizes.

/// Chunk width used for a block of `len` bytes.
#[must_use]
pub const fn chunk_width(len: usize) -> usize {
    if len % 8 == 0 {
        8
    } else if len % 4 == 0 {
        4
    } else if len % 2 == 0 {
        2
    } else {
        1
    }
}

/// Copies `min(dest.len(), src.len())` bytes from `src` into `dest`.
///
/// Returns the number of bytes copied.
pub fn block_copy(dest: &mut [u8], src: &[u8]) -> usize {
    let count = dest.len().min(src.len());
    let width = chunk_width(count);
    if width == 1 {
        for (d, s) in dest[..count].iter_mut().zip(&src[..count]) {
            *d = *s;
        }
        return count;
    }
    for (d, s) in dest[..count]
        .chunks_exact_mut(width)
        .zip(src[..count].chunks_exact(width))
    {
        d.copy_from_slice(s);
    }
    count
}

/// Zero-fills `dest` chunk by chunk. Returns the number of bytes cleared.
pub fn block_reset(dest: &mut [u8]) -> usize {
    block_fill(dest, 0)
}

/// Fills `dest` with `value`. Returns the number of bytes written.
pub fn block_fill(dest: &mut [u8], value: u8) -> usize {
    let width = chunk_width(dest.len());
    let pattern = [value; 8];
    for chunk in dest.chunks_exact_mut(width) {
        chunk.copy_from_slice(&pattern[..width]);
    }
    dest.len()
}

/// Copies `len` bytes inside one buffer from `src` to `dest`, overlap-safe.
///
/// A copy onto itself is a no-op. Returns the number of bytes copied, clamped
/// to the buffer.
pub fn copy_within(buf: &mut [u8], src: usize, dest: usize, len: usize) -> usize {
    if src == dest {
        return len.min(buf.len().saturating_sub(src));
    }
    let limit = buf.len();
    let count = len
        .min(limit.saturating_sub(src))
        .min(limit.saturating_sub(dest));
    buf.copy_within(src..src + count, dest);
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_width_follows_divisibility() {
        assert_eq!(chunk_width(16), 8);
        assert_eq!(chunk_width(12), 4);
        assert_eq!(chunk_width(6), 2);
        assert_eq!(chunk_width(7), 1);
        assert_eq!(chunk_width(0), 8);
    }

    #[test]
    fn copy_handles_every_chunk_width() {
        for len in [1_usize, 2, 3, 4, 6, 8, 13, 24] {
            let src: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(7)).collect();
            let mut dest = vec![0xAA; len];
            assert_eq!(block_copy(&mut dest, &src), len);
            assert_eq!(dest, src);
        }
    }

    #[test]
    fn copy_clamps_to_shorter_side() {
        let mut dest = [0_u8; 3];
        assert_eq!(block_copy(&mut dest, &[1, 2, 3, 4, 5]), 3);
        assert_eq!(dest, [1, 2, 3]);
    }

    #[test]
    fn reset_zeroes_irregular_sizes() {
        let mut buf = [0xFF_u8; 11];
        assert_eq!(block_reset(&mut buf), 11);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn copy_within_overlapping_forward() {
        let mut buf = [1_u8, 2, 3, 4, 5, 6];
        assert_eq!(copy_within(&mut buf, 0, 2, 4), 4);
        assert_eq!(buf, [1, 2, 1, 2, 3, 4]);
    }

    #[test]
    fn self_copy_is_noop() {
        let mut buf = [9_u8, 8, 7];
        copy_within(&mut buf, 0, 0, 3);
        assert_eq!(buf, [9, 8, 7]);
    }
}
