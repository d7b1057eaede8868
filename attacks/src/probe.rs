//! Black-box classification of an encryption oracle: block size and mode.

use std::collections::HashSet;

use aes::Mode;

use crate::errors::*;
use crate::oracles::EncryptionOracle;

/// Classify ECB when at least this fraction of ciphertext blocks is
/// duplicated. An all-zero probe of `block_size²` bytes pushes a true ECB
/// oracle towards `(block_size - 1) / block_size` while CBC under a fresh
/// IV stays at ~0, so the margin is wide on both sides.
const ECB_SCORE_THRESHOLD: f64 = 0.1;

/// Determine the oracle's block size from the jumps in its output length.
///
/// All-zero inputs of growing length are fed to the oracle, starting at 32
/// bytes. The output length is constant until the input crosses a padding
/// boundary and then grows by exactly one block; the first observed jump is
/// the block size.
pub fn detect_block_size<O>(oracle: &O, max_block_size: usize) -> Result<usize>
where
    O: EncryptionOracle + ?Sized,
{
    let mut previous_len = None;
    for input_len in 32..(max_block_size + 64) {
        let ciphertext = oracle
            .encrypt(&vec![0; input_len])
            .map_err(oracle_query_failed)?;
        match previous_len {
            Some(previous) if ciphertext.len() > previous => {
                return Ok(ciphertext.len() - previous);
            }
            _ => previous_len = Some(ciphertext.len()),
        }
    }
    Err(AttackError::BlockSizeNotDetected.into())
}

/// The fraction of ciphertext blocks occurring more than once,
/// `(total - distinct) / total`. Trailing partial blocks are ignored.
pub fn duplicate_block_fraction(ciphertext: &[u8], block_size: usize) -> f64 {
    let total = ciphertext.len() / block_size;
    if total == 0 {
        return 0.0;
    }

    let distinct: HashSet<&[u8]> = ciphertext
        .chunks(block_size)
        .filter(|block| block.len() == block_size)
        .collect();
    (total - distinct.len()) as f64 / total as f64
}

/// Decide between ECB and CBC with a single oracle query.
///
/// The probe is `block_size²` zero bytes, enough that duplicated blocks
/// dominate the ciphertext under ECB no matter how the oracle dresses up
/// its input. Exactly one query is made: oracles backing this probe are
/// allowed to re-randomize key, mode and IV on every call, so nothing from
/// a different call may be consulted.
pub fn detect_mode<O>(oracle: &O, block_size: usize) -> Result<Mode>
where
    O: EncryptionOracle + ?Sized,
{
    let probe = vec![0; block_size * block_size];
    let ciphertext = oracle.encrypt(&probe).map_err(oracle_query_failed)?;

    if duplicate_block_fraction(&ciphertext, block_size) >= ECB_SCORE_THRESHOLD {
        Ok(Mode::Ecb)
    } else {
        Ok(Mode::Cbc)
    }
}

#[cfg(test)]
use crate::oracles::{ModeSwitchingOracle, SuffixOracle};

#[test]
fn block_size_of_a_padding_oracle() {
    let oracle = SuffixOracle::ecb(b"under the boardwalk".to_vec());
    assert_eq!(16, detect_block_size(&oracle, 32).unwrap());

    let prefixed = SuffixOracle::ecb_with_random_prefix(b"down by the sea".to_vec());
    assert_eq!(16, detect_block_size(&prefixed, 32).unwrap());
}

#[test]
fn block_size_detection_gives_up() {
    // Fixed-length output, as a MAC would produce: no jump to observe.
    let oracle = |_: &[u8]| -> Result<Vec<u8>> { Ok(vec![0; 32]) };
    let err = detect_block_size(&oracle, 16).unwrap_err();
    assert_eq!(
        Some(&AttackError::BlockSizeNotDetected),
        err.downcast_ref::<AttackError>()
    );
}

#[test]
fn duplicate_fraction_counts_repeats() {
    let ciphertext = [b"AAAA".as_ref(), b"BBBB", b"AAAA", b"CCCC"].concat();
    assert_eq!(0.25, duplicate_block_fraction(&ciphertext, 4));
    assert_eq!(0.0, duplicate_block_fraction(b"AAAABBBB", 4));
    assert_eq!(0.0, duplicate_block_fraction(b"", 4));
}

#[test]
fn mode_detection_is_right_every_time() {
    let oracle = ModeSwitchingOracle::new();
    for _ in 0..10 {
        let detected = detect_mode(&oracle, 16).unwrap();
        assert_eq!(oracle.last_mode(), detected);
    }
}
