//! Oracle capabilities and the concrete oracles the tests attack.
//!
//! An oracle is a value exposing a single black-box operation over private
//! state (key, hidden prefix/suffix, mode). The attack code only ever sees
//! the capability traits; the constructors below decide the contract. Two
//! contracts exist and are deliberately kept apart: [`SuffixOracle`] and
//! [`CbcPaddingOracle`] fix their secret material for their whole lifetime,
//! while [`ModeSwitchingOracle`] re-randomizes everything on every call and
//! is only suitable for single-query probes.

use std::cell::Cell;

use rand::Rng;

use aes::{random_block, random_bytes, Aes128, Mode, BLOCK_SIZE};

use crate::errors::*;

/// A chosen-plaintext capability: encrypt attacker input together with
/// whatever hidden material the oracle holds.
pub trait EncryptionOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>>;
}

impl<F> EncryptionOracle for F
where
    F: Fn(&[u8]) -> Result<Vec<u8>>,
{
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        self(input)
    }
}

/// A padding-validity capability: reveal only whether `ciphertext` decrypts
/// to syntactically valid PKCS#7 padding. `ciphertext` must consist of at
/// least two whole blocks.
pub trait PaddingOracle {
    fn padding_valid(&self, ciphertext: &[u8], iv: &[u8]) -> Result<bool>;
}

/// An ECB or CBC oracle computing `E(prefix || input || suffix)` under a
/// key that is fixed for the oracle's lifetime.
pub struct SuffixOracle {
    key: Vec<u8>,
    prefix: Vec<u8>,
    suffix: Vec<u8>,
    mode: Mode,
}

impl SuffixOracle {
    pub fn ecb(suffix: Vec<u8>) -> Self {
        Self::ecb_with_prefix(Vec::new(), suffix)
    }

    /// Like [`ecb`](Self::ecb), but every call also prepends the same fixed
    /// random prefix of random length below `2 * BLOCK_SIZE`.
    pub fn ecb_with_random_prefix(suffix: Vec<u8>) -> Self {
        let mut rng = rand::thread_rng();
        let prefix_len = rng.gen_range(0, 2 * BLOCK_SIZE);
        // A prefix ending in zero bytes is indistinguishable from the
        // attacker's zero filler, so the prefix avoids them.
        let prefix = (0..prefix_len)
            .map(|_| rng.gen_range(1, 256) as u8)
            .collect();
        Self::ecb_with_prefix(prefix, suffix)
    }

    pub fn ecb_with_prefix(prefix: Vec<u8>, suffix: Vec<u8>) -> Self {
        SuffixOracle {
            key: random_block(),
            prefix,
            suffix,
            mode: Mode::Ecb,
        }
    }

    /// The same construction chained in CBC mode under a fixed zero IV.
    /// Nothing can be recovered from this oracle; it exists to check that
    /// the ECB attacks fail loudly instead of returning garbage.
    pub fn cbc(suffix: Vec<u8>) -> Self {
        SuffixOracle {
            key: random_block(),
            prefix: Vec::new(),
            suffix,
            mode: Mode::Cbc,
        }
    }

    pub fn verify_suffix(&self, candidate: &[u8]) -> Result<()> {
        ensure!(
            candidate == &self.suffix[..],
            "recovered suffix does not match: expected {:?}, found {:?}",
            self.suffix,
            candidate
        );
        Ok(())
    }
}

impl EncryptionOracle for SuffixOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut cleartext = Vec::with_capacity(self.prefix.len() + input.len() + self.suffix.len());
        cleartext.extend_from_slice(&self.prefix);
        cleartext.extend_from_slice(input);
        cleartext.extend_from_slice(&self.suffix);

        match self.mode {
            Mode::Cbc => cleartext.encrypt(&self.key, Some(&[0; BLOCK_SIZE]), self.mode),
            Mode::Ecb => cleartext.encrypt(&self.key, None, self.mode),
        }
    }
}

/// An oracle that draws a fresh key, a fresh mode and (for CBC) a fresh IV
/// on every call, and pads its input with 5 to 10 random bytes on both
/// sides. Ciphertexts from different calls must never be compared; only
/// single-query probes such as `probe::detect_mode` make sense here.
pub struct ModeSwitchingOracle {
    last_mode: Cell<Mode>,
}

impl ModeSwitchingOracle {
    pub fn new() -> Self {
        ModeSwitchingOracle {
            last_mode: Cell::new(Mode::Ecb),
        }
    }

    /// The mode used by the most recent call, so a detector can be checked.
    pub fn last_mode(&self) -> Mode {
        self.last_mode.get()
    }
}

impl Default for ModeSwitchingOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl EncryptionOracle for ModeSwitchingOracle {
    fn encrypt(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut rng = rand::thread_rng();

        let mut cleartext = random_bytes(rng.gen_range(5, 11));
        cleartext.extend_from_slice(input);
        cleartext.extend_from_slice(&random_bytes(rng.gen_range(5, 11)));

        let key = random_block();
        let mode = if rng.gen() { Mode::Ecb } else { Mode::Cbc };
        self.last_mode.set(mode);

        match mode {
            Mode::Cbc => cleartext.encrypt(&key, Some(&random_block()), mode),
            Mode::Ecb => cleartext.encrypt(&key, None, mode),
        }
    }
}

/// A CBC server that hands out encrypted tokens and answers only one
/// question about ciphertexts presented back to it: did decryption yield
/// valid PKCS#7 padding? The key is fixed for the oracle's lifetime.
pub struct CbcPaddingOracle {
    key: Vec<u8>,
}

impl CbcPaddingOracle {
    pub fn new() -> Self {
        CbcPaddingOracle { key: random_block() }
    }

    /// Encrypt `cleartext` under a fresh random IV, returning `(iv, ciphertext)`.
    pub fn issue(&self, cleartext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let iv = random_block();
        let ciphertext = cleartext.encrypt(&self.key, Some(&iv), Mode::Cbc)?;
        Ok((iv, ciphertext))
    }
}

impl Default for CbcPaddingOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl PaddingOracle for CbcPaddingOracle {
    fn padding_valid(&self, ciphertext: &[u8], iv: &[u8]) -> Result<bool> {
        ensure!(
            ciphertext.len() >= 2 * BLOCK_SIZE && ciphertext.len() % BLOCK_SIZE == 0,
            "ciphertext must consist of at least two whole blocks"
        );

        let cleartext = ciphertext.decrypt_cbc_blocks(&self.key, iv)?;
        aes::padding_valid(&cleartext, BLOCK_SIZE as u8)
    }
}

#[test]
fn suffix_oracle_is_deterministic() {
    let oracle = SuffixOracle::ecb(b"secret".to_vec());
    assert_eq!(
        oracle.encrypt(b"input").unwrap(),
        oracle.encrypt(b"input").unwrap()
    );
    assert_eq!(BLOCK_SIZE, oracle.encrypt(b"").unwrap().len());
}

#[test]
fn closures_are_oracles() {
    let key = random_block();
    let oracle = |input: &[u8]| input.encrypt(&key, None, Mode::Ecb);
    assert_eq!(
        EncryptionOracle::encrypt(&oracle, b"x").unwrap(),
        b"x".encrypt(&key, None, Mode::Ecb).unwrap()
    );
}

#[test]
fn padding_oracle_judges_its_own_tokens_valid() {
    let oracle = CbcPaddingOracle::new();
    let (iv, ciphertext) = oracle.issue(b"some session token").unwrap();
    assert!(oracle.padding_valid(&ciphertext, &iv).unwrap());

    let mut tampered = ciphertext.clone();
    tampered[0] ^= 1;
    // Tampering with the first block scrambles the last one's padding for
    // a two-block token almost always; just check it answers.
    let _ = oracle.padding_valid(&tampered, &iv).unwrap();
}
