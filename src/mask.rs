//! The RFC 6455 §5.3 masking transform.
//!
//! A mask is a 4-byte key XOR'd cyclically against a payload. Because a payload can arrive (or
//! leave) in more than one chunk — a [`crate::read`] stream hands back bytes as they're read off
//! the wire, and [`crate::write`] chunks a message into frames — the transform has to be
//! resumable: each call is told how many bytes of this payload were already masked (the
//! `rotation`, `bytes_already_masked mod 4`) and returns the rotation the next call should use.

/// XORs `buf` in place against `key`, starting at `rotation` (`bytes_already_masked mod 4`), and
/// returns the rotation a subsequent call over the continuation of the same payload should use.
///
/// Splitting a buffer at any position and masking the two halves with the rotation each call
/// returns produces the same bytes as masking the whole buffer in one call — that's what makes
/// the transform safe to apply frame-by-frame or chunk-by-chunk.
pub fn mask(buf: &mut [u8], key: [u8; 4], rotation: usize) -> usize {
    debug_assert!(rotation < 4);

    // Rotate the key so byte 0 of `rotated_key` lines up with `buf[0]`, then repeat it to fill a
    // word. 8 is a multiple of 4, so the same word applies unchanged to every subsequent 8-byte
    // chunk — no re-alignment needed between chunks.
    let rotated_key = [
        key[rotation % 4],
        key[(rotation + 1) % 4],
        key[(rotation + 2) % 4],
        key[(rotation + 3) % 4],
    ];
    let key_word = u64::from_ne_bytes([
        rotated_key[0],
        rotated_key[1],
        rotated_key[2],
        rotated_key[3],
        rotated_key[0],
        rotated_key[1],
        rotated_key[2],
        rotated_key[3],
    ]);

    let chunks = buf.len() / 8;
    for chunk_idx in 0..chunks {
        let chunk = &mut buf[chunk_idx * 8..chunk_idx * 8 + 8];
        let word = u64::from_ne_bytes(chunk.try_into().unwrap());
        chunk.copy_from_slice(&(word ^ key_word).to_ne_bytes());
    }

    let tail_start = chunks * 8;
    for (j, byte) in buf[tail_start..].iter_mut().enumerate() {
        *byte ^= rotated_key[j % 4];
    }

    (rotation + buf.len()) % 4
}

/// The byte-wise reference transform, used only to property-test [`mask`] against.
#[cfg(test)]
fn mask_byte_wise(buf: &mut [u8], key: [u8; 4], rotation: usize) -> usize {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= key[(rotation + i) % 4];
    }
    (rotation + buf.len()) % 4
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

    #[test]
    fn word_path_matches_byte_wise_reference_for_all_lengths_and_rotations() {
        for rotation in 0..4 {
            for len in 0..=130 {
                let data: Vec<u8> = (0..len).map(|i| (i * 37 + rotation) as u8).collect();

                let mut a = data.clone();
                let next_a = mask(&mut a, KEY, rotation);

                let mut b = data.clone();
                let next_b = mask_byte_wise(&mut b, KEY, rotation);

                assert_eq!(a, b, "mismatch at len={len} rotation={rotation}");
                assert_eq!(next_a, next_b);
            }
        }
    }

    #[test]
    fn masking_twice_is_identity() {
        let original: Vec<u8> = (0..257u32).map(|i| i as u8).collect();
        let mut masked = original.clone();
        let rot = mask(&mut masked, KEY, 0);
        assert_eq!(rot, original.len() % 4);
        let mut unmasked = masked.clone();
        mask(&mut unmasked, KEY, 0);
        assert_eq!(unmasked, original);
    }

    #[test]
    fn split_masking_matches_single_call() {
        let original: Vec<u8> = (0..193u32).map(|i| (i * 13) as u8).collect();

        for split in 0..original.len() {
            let mut whole = original.clone();
            mask(&mut whole, KEY, 0);

            let mut parts = original.clone();
            let (left, right) = parts.split_at_mut(split);
            let rotation_after_left = mask(left, KEY, 0);
            mask(right, KEY, rotation_after_left);

            assert_eq!(whole, parts, "mismatch splitting at {split}");
        }
    }
}
