#[macro_use]
extern crate failure;

use failure::Error;
use openssl::symm;
use rand::Rng;
use xor::Xor;

pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    Ecb,
    Cbc,
}

#[derive(Debug, Fail, PartialEq)]
pub enum AesError {
    #[fail(display = "invalid padding")]
    InvalidPadding,

    #[fail(display = "input length not a multiple of the block size")]
    UnalignedInput,

    #[fail(display = "AES block operation failed")]
    CipherFailed,
}

pub fn random_block() -> Vec<u8> {
    random_bytes(BLOCK_SIZE)
}

pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    rng.gen_iter().take(n).collect()
}

pub fn pad_inplace(u: &mut Vec<u8>, k: u8) -> Result<(), Error> {
    ensure!(k >= 2, "invalid padding width");

    let p = k - (u.len() % k as usize) as u8;
    for _ in 0..p {
        u.push(p);
    }
    Ok(())
}

pub fn pad(u: &[u8], k: u8) -> Result<Vec<u8>, Error> {
    let mut v = u.to_vec();
    pad_inplace(&mut v, k)?;
    Ok(v)
}

pub fn padding_valid(u: &[u8], k: u8) -> Result<bool, Error> {
    ensure!(k >= 2, "invalid padding width");

    if u.is_empty() || u.len() % k as usize != 0 {
        return Ok(false);
    }
    let p = u[u.len() - 1];
    if p < 1 || p > k {
        return Ok(false);
    }
    Ok(u[u.len() - p as usize..].iter().all(|&b| b == p))
}

pub fn unpad_inplace(u: &mut Vec<u8>, k: u8) -> Result<(), Error> {
    if !padding_valid(u, k)? {
        return Err(AesError::InvalidPadding.into());
    }

    let len_new = u.len() - u[u.len() - 1] as usize;
    u.truncate(len_new);
    Ok(())
}

pub fn unpad(u: &[u8], k: u8) -> Result<Vec<u8>, Error> {
    let mut v = u.to_vec();
    unpad_inplace(&mut v, k)?;
    Ok(v)
}

// One raw AES-128-ECB pass with openssl's own padding disabled. Both CBC
// directions and the padded ECB entry points are built on top of this.
fn raw_ecb(u: &[u8], key: &[u8], direction: symm::Mode) -> Result<Vec<u8>, Error> {
    if u.len() % BLOCK_SIZE != 0 {
        return Err(AesError::UnalignedInput.into());
    }

    let mut crypter = symm::Crypter::new(symm::Cipher::aes_128_ecb(), direction, key, None)
        .map_err(|_| AesError::CipherFailed)?;
    crypter.pad(false);

    let mut out = vec![0; u.len() + BLOCK_SIZE];
    let mut n = crypter
        .update(u, &mut out)
        .map_err(|_| AesError::CipherFailed)?;
    n += crypter
        .finalize(&mut out[n..])
        .map_err(|_| AesError::CipherFailed)?;
    out.truncate(n);
    Ok(out)
}

pub trait Aes128 {
    fn encrypt(&self, key: &Self, iv: Option<&Self>, mode: Mode) -> Result<Vec<u8>, Error>;
    fn decrypt(&self, key: &Self, iv: Option<&Self>, mode: Mode) -> Result<Vec<u8>, Error>;
    fn decrypt_cbc_blocks(&self, key: &Self, iv: &Self) -> Result<Vec<u8>, Error>;
}

impl Aes128 for [u8] {
    fn encrypt(&self, key: &[u8], iv: Option<&[u8]>, mode: Mode) -> Result<Vec<u8>, Error> {
        match mode {
            Mode::Ecb => {
                ensure!(iv.is_none(), "iv not supported for ECB mode");
                raw_ecb(&pad(self, BLOCK_SIZE as u8)?, key, symm::Mode::Encrypt)
            }

            Mode::Cbc => match iv {
                Some(iv) => encrypt_cbc(self, key, iv),
                None => bail!("iv required for CBC mode"),
            },
        }
    }

    fn decrypt(&self, key: &[u8], iv: Option<&[u8]>, mode: Mode) -> Result<Vec<u8>, Error> {
        let mut cleartext = match mode {
            Mode::Ecb => {
                ensure!(iv.is_none(), "iv not supported for ECB mode");
                raw_ecb(self, key, symm::Mode::Decrypt)?
            }

            Mode::Cbc => match iv {
                Some(iv) => self.decrypt_cbc_blocks(key, iv)?,
                None => bail!("iv required for CBC mode"),
            },
        };
        unpad_inplace(&mut cleartext, BLOCK_SIZE as u8)?;
        Ok(cleartext)
    }

    // CBC decryption without the final padding check. A padding oracle sits
    // in front of this and inspects the padding itself.
    fn decrypt_cbc_blocks(&self, key: &[u8], iv: &[u8]) -> Result<Vec<u8>, Error> {
        ensure!(iv.len() == BLOCK_SIZE, "iv must be one block");

        let mut cleartext = raw_ecb(self, key, symm::Mode::Decrypt)?;
        let mut prev = iv;
        for (block, chunk) in self.chunks(BLOCK_SIZE).zip(cleartext.chunks_mut(BLOCK_SIZE)) {
            chunk.xor_assign(prev);
            prev = block;
        }
        Ok(cleartext)
    }
}

fn encrypt_cbc(u: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, Error> {
    ensure!(iv.len() == BLOCK_SIZE, "iv must be one block");

    let padded = pad(u, BLOCK_SIZE as u8)?;
    let mut ciphertext = Vec::with_capacity(padded.len());
    let mut prev = iv.to_vec();
    for block in padded.chunks(BLOCK_SIZE) {
        prev = raw_ecb(&block.xor(&prev), key, symm::Mode::Encrypt)?;
        ciphertext.extend_from_slice(&prev);
    }
    Ok(ciphertext)
}

#[test]
fn padding_round_trip() {
    let padded = pad(b"YELLOW SUBMARINE", 20).unwrap();
    assert_eq!(b"YELLOW SUBMARINE\x04\x04\x04\x04".as_ref(), &padded[..]);
    assert_eq!(b"YELLOW SUBMARINE".as_ref(), &unpad(&padded, 20).unwrap()[..]);

    let aligned = pad(&[7; 16], 16).unwrap();
    assert_eq!(32, aligned.len());
    assert_eq!(&[16; 16], &aligned[16..]);
}

#[test]
fn padding_validity() {
    assert!(padding_valid(b"ICE ICE BABY\x04\x04\x04\x04", 16).unwrap());
    assert!(!padding_valid(b"ICE ICE BABY\x05\x05\x05\x05", 16).unwrap());
    assert!(!padding_valid(b"ICE ICE BABY\x01\x02\x03\x04", 16).unwrap());
    assert!(!padding_valid(b"ICE ICE BABY\x03\x03\x03", 16).unwrap());

    let err = unpad(b"ICE ICE BABY\x05\x05\x05\x05", 16).unwrap_err();
    assert_eq!(Some(&AesError::InvalidPadding), err.downcast_ref::<AesError>());
}

#[test]
fn aes_128_ecb_known_block() {
    // FIPS-197 appendix B.
    let key = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf,
        0x4f, 0x3c,
    ];
    let input = [
        0x32, 0x43, 0xf6, 0xa8, 0x88, 0x5a, 0x30, 0x8d, 0x31, 0x31, 0x98, 0xa2, 0xe0, 0x37,
        0x07, 0x34,
    ];
    let expected = [
        0x39, 0x25, 0x84, 0x1d, 0x02, 0xdc, 0x09, 0xfb, 0xdc, 0x11, 0x85, 0x97, 0x19, 0x6a,
        0x0b, 0x32,
    ];

    let ciphertext = input.encrypt(&key[..], None, Mode::Ecb).unwrap();
    assert_eq!(&expected[..], &ciphertext[..BLOCK_SIZE]);
}

#[test]
fn aes_128_ecb_round_trip() {
    let key = random_block();
    let input = b"two identical blocks follow.....two identical blocks follow.....";
    let ciphertext = input.encrypt(&key, None, Mode::Ecb).unwrap();

    assert_eq!(
        input.as_ref(),
        &ciphertext.decrypt(&key, None, Mode::Ecb).unwrap()[..]
    );
}

#[test]
fn aes_128_cbc_round_trip() {
    let key = random_block();
    let iv = random_block();
    let input = b"ABCDEFGHIJKLMNOPQRSTUVW";

    let ciphertext = input.encrypt(&key, Some(&iv), Mode::Cbc).unwrap();
    assert_eq!(32, ciphertext.len());
    assert_eq!(
        input.as_ref(),
        &ciphertext.decrypt(&key, Some(&iv), Mode::Cbc).unwrap()[..]
    );
}

#[test]
fn cbc_identical_blocks_differ() {
    let key = random_block();
    let iv = random_block();
    let input = [0; 2 * BLOCK_SIZE];

    let ecb = input.encrypt(&key, None, Mode::Ecb).unwrap();
    let cbc = input.encrypt(&key, Some(&iv), Mode::Cbc).unwrap();

    assert_eq!(ecb[..BLOCK_SIZE], ecb[BLOCK_SIZE..2 * BLOCK_SIZE]);
    assert_ne!(cbc[..BLOCK_SIZE], cbc[BLOCK_SIZE..2 * BLOCK_SIZE]);
}
