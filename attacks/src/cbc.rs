//! The CBC padding-oracle attack: full plaintext recovery from a single
//! bit of information per query.
//!
//! For adjacent ciphertext blocks `plain = D(cur) ^ prev`, so controlling
//! `prev` and learning whether the result ends in valid padding pins down
//! `D(cur)` one byte at a time. The working copy of `prev` is the only
//! thing ever mutated; the true ciphertext is read-only throughout.

use xor::Xor;

use crate::errors::*;
use crate::oracles::PaddingOracle;

/// Recover the full, still-padded plaintext of `ciphertext` using only the
/// padding-validity oracle. Stripping the final padding is left to the
/// caller (`aes::unpad`), because the recovered buffer is bit-exact
/// including its padding and some callers want to see it.
pub fn recover_cbc_plaintext<O>(
    oracle: &O,
    iv: &[u8],
    ciphertext: &[u8],
    block_size: usize,
) -> ::std::result::Result<Vec<u8>, RecoveryError>
where
    O: PaddingOracle + ?Sized,
{
    let mut recovered = vec![0; ciphertext.len()];
    match recover_blocks(oracle, iv, ciphertext, block_size, &mut recovered) {
        Ok(()) => Ok(recovered),
        Err(error) => Err(RecoveryError { recovered, error }),
    }
}

fn recover_blocks<O>(
    oracle: &O,
    iv: &[u8],
    ciphertext: &[u8],
    block_size: usize,
    recovered: &mut [u8],
) -> Result<()>
where
    O: PaddingOracle + ?Sized,
{
    let k = block_size;
    ensure!(
        !ciphertext.is_empty() && ciphertext.len() % k == 0,
        "ciphertext must consist of whole blocks"
    );
    ensure!(iv.len() == k, "iv must be one block");

    let mut prev = iv;
    for (block_index, block) in ciphertext.chunks(k).enumerate() {
        // trial = forced previous block || current block. Only the first
        // half is ever modified.
        let mut trial = Vec::with_capacity(2 * k);
        trial.extend_from_slice(prev);
        trial.extend_from_slice(block);

        for i in (0..k).rev() {
            let pad = (k - i) as u8;
            // Bytes i+1.. currently decrypt to pad - 1; move them to pad.
            trial[i + 1..k].xor_assign(&[(pad - 1) ^ pad]);

            let mut found = false;
            for candidate in 0..=255u8 {
                trial[i] = candidate;
                if !oracle
                    .padding_valid(&trial, iv)
                    .map_err(oracle_query_failed)?
                {
                    continue;
                }

                // A match on the block's last byte can be spurious: the
                // plaintext may happen to end in 0x02, turning our 0x02
                // into valid padding. Flipping a lower-order byte kills
                // such a match but leaves a true 0x01 match valid.
                if i > 0 {
                    trial[i - 1] ^= 1;
                    let still_valid = oracle
                        .padding_valid(&trial, iv)
                        .map_err(oracle_query_failed)?;
                    trial[i - 1] ^= 1;
                    if !still_valid {
                        continue;
                    }
                }

                recovered[block_index * k + i] = prev[i] ^ trial[i] ^ pad;
                found = true;
                break;
            }

            if !found {
                return Err(AttackError::PaddingByteRecoveryFailed {
                    block: block_index,
                    byte: i,
                }
                .into());
            }
        }

        prev = block;
    }
    Ok(())
}

#[cfg(test)]
use crate::oracles::CbcPaddingOracle;
#[cfg(test)]
use aes::BLOCK_SIZE;
#[cfg(test)]
use serialize::from_base64;

#[cfg(test)]
const CANONICAL_TOKENS: [&str; 10] = [
    "MDAwMDAwTm93IHRoYXQgdGhlIHBhcnR5IGlzIGp1bXBpbmc=",
    "MDAwMDAxV2l0aCB0aGUgYmFzcyBraWNrZWQgaW4gYW5kIHRoZSBWZWdhJ3MgYXJlIHB1bXBpbic=",
    "MDAwMDAyUXVpY2sgdG8gdGhlIHBvaW50LCB0byB0aGUgcG9pbnQsIG5vIGZha2luZw==",
    "MDAwMDAzQ29va2luZyBNQydzIGxpa2UgYSBwb3VuZCBvZiBiYWNvbg==",
    "MDAwMDA0QnVybmluZyAnZW0sIGlmIHlvdSBhaW4ndCBxdWljayBhbmQgbmltYmxl",
    "MDAwMDA1SSBnbyBjcmF6eSB3aGVuIEkgaGVhciBhIGN5bWJhbA==",
    "MDAwMDA2QW5kIGEgaGlnaCBoYXQgd2l0aCBhIHNvdXBlZCB1cCB0ZW1wbw==",
    "MDAwMDA3SSdtIG9uIGEgcm9sbCwgaXQncyB0aW1lIHRvIGdvIHNvbG8=",
    "MDAwMDA4b2xsaW4nIGluIG15IGZpdmUgcG9pbnQgb2g=",
    "MDAwMDA5aXRoIG15IHJhZy10b3AgZG93biBzbyBteSBoYWlyIGNhbiBibG93",
];

#[test]
fn recovers_every_canonical_token() {
    for token in CANONICAL_TOKENS.iter() {
        let cleartext = from_base64(token).unwrap();
        let oracle = CbcPaddingOracle::new();
        let (iv, ciphertext) = oracle.issue(&cleartext).unwrap();

        let recovered = recover_cbc_plaintext(&oracle, &iv, &ciphertext, BLOCK_SIZE).unwrap();

        // Bit-exact including the padding, which unpad then strips.
        assert_eq!(aes::pad(&cleartext, BLOCK_SIZE as u8).unwrap(), recovered);
        assert_eq!(
            cleartext,
            aes::unpad(&recovered, BLOCK_SIZE as u8).unwrap()
        );
    }
}

#[test]
fn rejects_unaligned_ciphertext() {
    let oracle = CbcPaddingOracle::new();
    let (iv, mut ciphertext) = oracle.issue(b"whatever").unwrap();
    ciphertext.pop();
    assert!(recover_cbc_plaintext(&oracle, &iv, &ciphertext, BLOCK_SIZE).is_err());
}

#[test]
fn inconsistent_oracle_surfaces_position_and_partial() {
    // An oracle that rejects everything: not a single candidate validates.
    struct Stonewall;
    impl PaddingOracle for Stonewall {
        fn padding_valid(&self, _: &[u8], _: &[u8]) -> Result<bool> {
            Ok(false)
        }
    }

    let failure =
        recover_cbc_plaintext(&Stonewall, &[0; 16], &[0; 32], BLOCK_SIZE).unwrap_err();
    match failure.attack_error() {
        Some(&AttackError::PaddingByteRecoveryFailed { block: 0, byte: 15 }) => {}
        other => panic!("expected PaddingByteRecoveryFailed, got {:?}", other),
    }
    assert_eq!(vec![0; 32], failure.recovered);
}
