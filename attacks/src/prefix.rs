//! Neutralizing an unknown fixed-length prefix the oracle prepends to
//! attacker input.
//!
//! The oracle's cleartext looks as follows, with `?` bytes outside our
//! control:
//!
//! ```text
//! prefix[?] .. prefix[?] | input[0] .. input[n] | suffix[?] ..
//! ```
//!
//! Supplying two blocks of zeros preceded by `a` extra zero bytes makes two
//! adjacent ciphertext blocks identical exactly when `a` pushes the input
//! onto a block boundary (both blocks then encrypt all-zero cleartext under
//! ECB). The first `a` in `0..block_size` that produces such a pair is the
//! alignment, and everything past the pair is ciphertext of attacker input.

use crate::errors::*;
use crate::oracles::EncryptionOracle;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment {
    /// Number of filler bytes the wrapped oracle prepends to every input.
    pub padding: usize,
    /// Byte offset where attacker-controlled ciphertext begins.
    pub offset: usize,
}

pub fn find_alignment<O>(oracle: &O, block_size: usize) -> Result<Alignment>
where
    O: EncryptionOracle + ?Sized,
{
    let mut probe = vec![0; 2 * block_size];
    for _ in 0..block_size {
        let ciphertext = oracle.encrypt(&probe).map_err(oracle_query_failed)?;
        if ciphertext.len() % block_size != 0 {
            bail!(
                "oracle returned ciphertext of invalid length {}",
                ciphertext.len()
            );
        }

        if let Some(pair_index) = ciphertext
            .chunks(block_size)
            .zip(ciphertext.chunks(block_size).skip(1))
            .position(|(current, next)| current == next)
        {
            return Ok(Alignment {
                padding: probe.len(),
                offset: (pair_index + 2) * block_size,
            });
        }

        probe.push(0);
    }
    Err(AttackError::PrefixAlignmentFailed.into())
}

/// An [`EncryptionOracle`] that hides another oracle's prefix: it prepends
/// the alignment filler to every input and trims the returned ciphertext to
/// start at the attacker-controlled offset.
pub struct AlignedOracle<'a, O: ?Sized> {
    inner: &'a O,
    alignment: Alignment,
}

impl<'a, O> AlignedOracle<'a, O>
where
    O: EncryptionOracle + ?Sized,
{
    pub fn wrap(inner: &'a O, block_size: usize) -> Result<Self> {
        let alignment = find_alignment(inner, block_size)?;
        Ok(AlignedOracle { inner, alignment })
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }
}

impl<'a, O> EncryptionOracle for AlignedOracle<'a, O>
where
    O: EncryptionOracle + ?Sized,
{
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut padded = vec![0; self.alignment.padding];
        padded.extend_from_slice(input);
        let ciphertext = self.inner.encrypt(&padded)?;
        Ok(ciphertext[self.alignment.offset..].to_vec())
    }
}

#[cfg(test)]
use crate::oracles::SuffixOracle;
#[cfg(test)]
use aes::BLOCK_SIZE;

#[test]
fn alignment_accounts_for_every_prefix_length() {
    for prefix_len in 0..2 * BLOCK_SIZE {
        let oracle =
            SuffixOracle::ecb_with_prefix(vec![0x17; prefix_len], b"hidden".to_vec());
        let alignment = find_alignment(&oracle, BLOCK_SIZE).unwrap();

        let fill = (BLOCK_SIZE - prefix_len % BLOCK_SIZE) % BLOCK_SIZE;
        assert_eq!(2 * BLOCK_SIZE + fill, alignment.padding, "prefix {}", prefix_len);
        assert_eq!(
            prefix_len + fill + 2 * BLOCK_SIZE,
            alignment.offset,
            "prefix {}",
            prefix_len
        );
    }
}

#[test]
fn wrapped_oracle_looks_prefix_free() {
    let oracle = SuffixOracle::ecb_with_prefix(vec![0x2a; 21], b"hidden suffix".to_vec());
    let aligned = AlignedOracle::wrap(&oracle, BLOCK_SIZE).unwrap();

    // Same input twice: identical trimmed ciphertexts of plausible length.
    let first = aligned.encrypt(b"chosen input").unwrap();
    assert_eq!(first, aligned.encrypt(b"chosen input").unwrap());
    assert_eq!(0, first.len() % BLOCK_SIZE);
    assert_eq!(2 * BLOCK_SIZE, first.len()); // 12 + 13 bytes, padded

    // Input occupying exactly the first trimmed block is visible as such.
    let probe_a = aligned.encrypt(&[b'A'; BLOCK_SIZE]).unwrap();
    let probe_b = aligned.encrypt(&[b'B'; BLOCK_SIZE]).unwrap();
    assert_ne!(probe_a[..BLOCK_SIZE], probe_b[..BLOCK_SIZE]);
    assert_eq!(probe_a[BLOCK_SIZE..], probe_b[BLOCK_SIZE..]);
}

#[test]
fn alignment_fails_against_cbc() {
    let oracle = SuffixOracle::cbc(b"no duplicate pair here".to_vec());
    let err = find_alignment(&oracle, BLOCK_SIZE).unwrap_err();
    assert_eq!(
        Some(&AttackError::PrefixAlignmentFailed),
        err.downcast_ref::<AttackError>()
    );
}
