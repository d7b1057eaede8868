//! Byte-at-a-time recovery of the hidden suffix behind an ECB oracle.
//!
//! The oracle computes `ECB(input || suffix)` under a fixed key. Aligning a
//! sliding window so that exactly one unknown byte sits at the end of a
//! block reduces that byte to a 256-way comparison of ciphertext blocks:
//!
//! ```text
//! window:  0 0 0 .. 0 s[0]          <- target, produced by the oracle
//! trial:   0 0 0 .. 0 b             <- match in the first block => b = s[0]
//! ```
//!
//! Each further byte shifts the window by one. Duplicate ciphertext blocks
//! in the reference ciphertext are copied from the already recovered
//! plaintext without spending a single query.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use aes::Mode;

use crate::errors::*;
use crate::oracles::EncryptionOracle;
use crate::prefix::AlignedOracle;
use crate::probe;

/// An order in which to try the 256 candidate values of an unknown byte.
/// Orderings only affect the query count, never the result: all 256 values
/// are tried before a position is declared unrecoverable.
pub type SearchOrder = [u8; 256];

/// A very rough most-likely-first ordering of plaintext bytes, which cuts
/// the expected query count considerably for ASCII-ish suffixes.
#[rustfmt::skip]
pub const FREQUENCY_SEARCH_ORDER: SearchOrder = [
    32, 101, 116, 97, 111, 110, 105, 115, 114, 104, 100, 108, 117, 99, 109, 102,
    119, 103, 121, 112, 98, 118, 107, 120, 106, 113, 122, 69, 84, 65, 79, 78,
    73, 83, 82, 72, 68, 76, 85, 67, 77, 70, 87, 71, 89, 80, 66, 86, 75, 88, 74,
    81, 90, 46, 44, 39, 34, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 33, 35, 36,
    37, 38, 40, 41, 42, 43, 45, 47, 58, 59, 60, 61, 62, 63, 64, 91, 92, 93, 94,
    95, 96, 123, 124, 125, 126, 127, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
    13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
    128, 129, 130, 131, 132, 133, 134, 135, 136, 137, 138, 139, 140, 141, 142,
    143, 144, 145, 146, 147, 148, 149, 150, 151, 152, 153, 154, 155, 156, 157,
    158, 159, 160, 161, 162, 163, 164, 165, 166, 167, 168, 169, 170, 171, 172,
    173, 174, 175, 176, 177, 178, 179, 180, 181, 182, 183, 184, 185, 186, 187,
    188, 189, 190, 191, 192, 193, 194, 195, 196, 197, 198, 199, 200, 201, 202,
    203, 204, 205, 206, 207, 208, 209, 210, 211, 212, 213, 214, 215, 216, 217,
    218, 219, 220, 221, 222, 223, 224, 225, 226, 227, 228, 229, 230, 231, 232,
    233, 234, 235, 236, 237, 238, 239, 240, 241, 242, 243, 244, 245, 246, 247,
    248, 249, 250, 251, 252, 253, 254, 255,
];

/// Recover the hidden suffix of an ECB oracle with unknown block size and a
/// possible unknown fixed prefix.
///
/// Runs the whole pipeline: block-size detection, mode confirmation
/// (failing with [`AttackError::ModeNotEcb`] for anything but ECB), prefix
/// alignment and the byte-at-a-time sweep.
pub fn recover_suffix<O>(
    oracle: &O,
    max_block_size: usize,
) -> ::std::result::Result<Vec<u8>, RecoveryError>
where
    O: EncryptionOracle + ?Sized,
{
    let mut recovered = Vec::new();
    let outcome = run_pipeline(oracle, max_block_size, &mut recovered);
    finish(recovered, outcome)
}

/// The sweep alone, for an oracle already known to be prefix-free ECB of
/// the given block size.
pub fn recover_aligned_suffix<O>(
    oracle: &O,
    block_size: usize,
    order: &SearchOrder,
) -> ::std::result::Result<Vec<u8>, RecoveryError>
where
    O: EncryptionOracle + ?Sized,
{
    let mut recovered = Vec::new();
    let outcome = drain_suffix(oracle, block_size, order, &mut recovered);
    finish(recovered, outcome)
}

fn finish(
    recovered: Vec<u8>,
    outcome: Result<()>,
) -> ::std::result::Result<Vec<u8>, RecoveryError> {
    match outcome {
        Ok(()) => Ok(recovered),
        Err(error) => Err(RecoveryError { recovered, error }),
    }
}

fn run_pipeline<O>(oracle: &O, max_block_size: usize, recovered: &mut Vec<u8>) -> Result<()>
where
    O: EncryptionOracle + ?Sized,
{
    let block_size = probe::detect_block_size(oracle, max_block_size)?;
    if probe::detect_mode(oracle, block_size)? != Mode::Ecb {
        return Err(AttackError::ModeNotEcb.into());
    }

    let aligned = AlignedOracle::wrap(oracle, block_size)?;
    drain_suffix(&aligned, block_size, &FREQUENCY_SEARCH_ORDER, recovered)
}

fn drain_suffix<O>(
    oracle: &O,
    block_size: usize,
    order: &SearchOrder,
    recovered: &mut Vec<u8>,
) -> Result<()>
where
    O: EncryptionOracle + ?Sized,
{
    let k = block_size;
    let reference = oracle.encrypt(&[]).map_err(oracle_query_failed)?;
    let duplicates = relate_duplicate_blocks(&reference, k);
    let targets = generate_target_blocks(oracle, k, reference.len())?;

    let mut window = vec![0u8; k];
    let mut position = 0;
    while position < targets.len() {
        // The plaintext of a ciphertext block seen earlier is already in
        // the buffer; copy it instead of brute-forcing k bytes.
        if position % k == 0 {
            if let Some(&earlier) = duplicates.get(&position) {
                let known = recovered[earlier..earlier + k].to_vec();
                recovered.extend_from_slice(&known);
                position += k;
                continue;
            }
        }

        // The window's first k-1 bytes are the most recently recovered
        // plaintext, zero-filled while fewer than k-1 bytes are known.
        if position < k {
            for (w, &b) in window[k - 1 - position..].iter_mut().zip(recovered.iter()) {
                *w = b;
            }
        } else {
            window[..k - 1].copy_from_slice(&recovered[position - k + 1..position]);
        }

        let mut found = false;
        for &candidate in order.iter() {
            window[k - 1] = candidate;
            let output = oracle.encrypt(&window).map_err(oracle_query_failed)?;
            if output.len() >= k && output[..k] == targets[position][..] {
                recovered.push(candidate);
                found = true;
                break;
            }
        }
        if !found {
            return Err(AttackError::ByteRecoveryFailed { position }.into());
        }
        position += 1;
    }

    // An oracle that pads only unaligned cleartext leaks its terminal 0x01
    // padding byte into the sweep; recognize and drop it. A PKCS#7 oracle
    // never gets here: its padding never yields a target block.
    if recovered.len() == reference.len()
        && recovered.len() % k == 0
        && recovered.last() == Some(&0x01)
    {
        recovered.pop();
    }
    Ok(())
}

/// Map the offset of every ciphertext block to the offset of an earlier,
/// byte-identical block, for all blocks that have one. For the ciphertext
/// `XXXXABCDXXXXIJKLIJKL` with block size 4 this yields
/// `{8: 0, 16: 12}`.
fn relate_duplicate_blocks(ciphertext: &[u8], block_size: usize) -> HashMap<usize, usize> {
    let mut first_seen: HashMap<&[u8], usize> = HashMap::new();
    let mut duplicates = HashMap::new();
    for (index, block) in ciphertext.chunks(block_size).enumerate() {
        if block.len() < block_size {
            break;
        }
        match first_seen.entry(block) {
            Entry::Occupied(entry) => {
                duplicates.insert(index * block_size, *entry.get());
            }
            Entry::Vacant(entry) => {
                entry.insert(index * block_size);
            }
        }
    }
    duplicates
}

/// Build one target block per hidden-suffix byte using exactly k queries.
///
/// Query `shift` supplies `k - 1 - shift` zero filler bytes; slicing all k
/// outputs on block boundaries yields, for every suffix position m, the
/// ciphertext of the k-byte window whose last byte is `suffix[m]`:
///
/// ```text
/// encrypt("000") => 000A BCDE F333*
/// encrypt("00")  => 00AB CDEF 4444*
/// encrypt("0")   => 0ABC DEF1*
/// encrypt("")    => ABCD EF22*
/// ```
///
/// The windows reaching into the oracle's padding (one final block's worth,
/// marked `*`) are discarded, leaving exactly one target per suffix byte.
fn generate_target_blocks<O>(
    oracle: &O,
    block_size: usize,
    reference_len: usize,
) -> Result<Vec<Vec<u8>>>
where
    O: EncryptionOracle + ?Sized,
{
    let k = block_size;
    let mut targets = vec![Vec::new(); reference_len + k];
    let mut filled = 0;
    for shift in 0..k {
        let output = oracle
            .encrypt(&vec![0; k - 1 - shift])
            .map_err(oracle_query_failed)?;
        for (block_index, block) in output.chunks(k).enumerate() {
            if block.len() < k {
                break;
            }
            targets[shift + block_index * k] = block.to_vec();
            filled += 1;
        }
    }

    ensure!(filled >= k, "oracle output too short to carry a suffix");
    targets.truncate(filled - k);
    Ok(targets)
}

#[cfg(test)]
use crate::oracles::SuffixOracle;
#[cfg(test)]
use serialize::from_base64;

#[cfg(test)]
const CANONICAL_SUFFIX: &str =
    "Um9sbGluJyBpbiBteSA1LjAKV2l0aCBteSByYWctdG9wIGRv\
     d24gc28gbXkgaGFpciBjYW4gYmxvdwpUaGUgZ2lybGllcyBvb\
     iBzdGFuZGJ5IHdhdmluZyBqdXN0IHRvIHNheSBoaQpEaWQgeW\
     91IHN0b3A/IE5vLCBJIGp1c3QgZHJvdmUgYnkK";

#[cfg(test)]
fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

#[test]
fn recovers_suffixes_of_awkward_lengths() {
    for &len in &[0usize, 1, 15, 16, 17, 53] {
        let oracle = SuffixOracle::ecb(patterned(len));
        let recovered = recover_suffix(&oracle, 32).unwrap();
        assert_eq!(patterned(len), recovered, "length {}", len);
    }
}

#[test]
fn prefix_does_not_change_the_result() {
    for prefix_len in 0..32 {
        let prefix = vec![0x41 + (prefix_len as u8 % 26); prefix_len];
        let oracle = SuffixOracle::ecb_with_prefix(prefix, patterned(21));
        let recovered = recover_suffix(&oracle, 32).unwrap();
        assert_eq!(patterned(21), recovered, "prefix {}", prefix_len);
    }
}

#[test]
fn random_prefix_does_not_change_the_result() {
    let oracle = SuffixOracle::ecb_with_random_prefix(patterned(19));
    oracle
        .verify_suffix(&recover_suffix(&oracle, 32).unwrap())
        .unwrap();
}

#[test]
fn duplicate_blocks_are_copied_not_queried() {
    let mut suffix = vec![b'A'; 32];
    suffix.extend_from_slice(b"tail");
    let oracle = SuffixOracle::ecb(suffix.clone());
    assert_eq!(suffix, recover_suffix(&oracle, 32).unwrap());
}

#[test]
fn recovers_the_canonical_suffix() {
    let suffix = from_base64(CANONICAL_SUFFIX).unwrap();
    assert_eq!(138, suffix.len());

    let oracle = SuffixOracle::ecb(suffix.clone());
    let recovered = recover_suffix(&oracle, 32).unwrap();
    assert_eq!(suffix, recovered);
    oracle.verify_suffix(&recovered).unwrap();
}

#[test]
fn oracle_errors_abort_the_attack() {
    let oracle = |_: &[u8]| -> Result<Vec<u8>> { Err(format_err!("connection reset")) };
    let failure = recover_suffix(&oracle, 32).unwrap_err();
    assert!(failure.error.downcast_ref::<OracleQueryFailed>().is_some());
    assert!(failure.recovered.is_empty());
}

#[test]
fn pipeline_rejects_a_cbc_oracle() {
    let oracle = SuffixOracle::cbc(b"you shall not pass".to_vec());
    let failure = recover_suffix(&oracle, 32).unwrap_err();
    assert_eq!(Some(&AttackError::ModeNotEcb), failure.attack_error());
    assert!(failure.recovered.is_empty());
}

#[test]
fn sweep_fails_loudly_on_a_cbc_oracle() {
    // Even pointed straight at a CBC oracle, the sweep must error out
    // rather than return a wrong suffix.
    let suffix = b"chained blocks break equality".to_vec();
    let oracle = SuffixOracle::cbc(suffix.clone());
    let failure = recover_aligned_suffix(&oracle, 16, &FREQUENCY_SEARCH_ORDER).unwrap_err();
    match failure.attack_error() {
        Some(&AttackError::ByteRecoveryFailed { .. }) => {}
        other => panic!("expected ByteRecoveryFailed, got {:?}", other),
    }
    assert_ne!(suffix, failure.recovered);
}
