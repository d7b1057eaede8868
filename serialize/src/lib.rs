#[macro_use]
extern crate error_chain;

error_chain! {
    errors {}
}

const BASE64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

pub trait Serialize {
    fn to_base64(&self) -> String;
    fn to_hex(&self) -> String;
}

impl Serialize for [u8] {
    fn to_base64(&self) -> String {
        let mut base64 = String::with_capacity(4 * (self.len() + 2) / 3);
        for chunk in self.chunks(3) {
            let mut word = u32::from(chunk[0]) << 16;
            if let Some(&b) = chunk.get(1) {
                word |= u32::from(b) << 8;
            }
            if let Some(&b) = chunk.get(2) {
                word |= u32::from(b);
            }
            for i in 0..=chunk.len() {
                let digit = (word >> (18 - 6 * i)) & 0x3f;
                base64.push(BASE64_ALPHABET[digit as usize] as char);
            }
            for _ in chunk.len()..3 {
                base64.push('=');
            }
        }
        base64
    }

    fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(2 * self.len());
        for u in self {
            hex.push(std::char::from_digit(u32::from(u >> 4), 16).unwrap());
            hex.push(std::char::from_digit(u32::from(u & 0xf), 16).unwrap());
        }
        hex
    }
}

pub fn from_base64(s: &str) -> Result<Vec<u8>> {
    if s.len() % 4 != 0 {
        bail!("input length needs to be a multiple of 4");
    }

    let stripped = s.trim_end_matches('=');
    if s.len() - stripped.len() > 2 {
        bail!("too much padding");
    }

    let mut u = Vec::with_capacity(3 * s.len() / 4);
    for chunk in stripped.as_bytes().chunks(4) {
        let mut word = 0u32;
        for &c in chunk {
            word = (word << 6) | u32::from(base64_digit(c)?);
        }
        word <<= 6 * (4 - chunk.len());
        u.push((word >> 16) as u8);
        if chunk.len() > 2 {
            u.push((word >> 8) as u8);
        }
        if chunk.len() > 3 {
            u.push(word as u8);
        }
    }
    Ok(u)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        bail!("input length needs to be a multiple of 2");
    }

    s.as_bytes()
        .chunks(2)
        .map(|c| Ok(hex_digit(c[0])? << 4 | hex_digit(c[1])?))
        .collect()
}

fn base64_digit(c: u8) -> Result<u8> {
    match BASE64_ALPHABET.iter().position(|&d| d == c) {
        Some(i) => Ok(i as u8),
        None => bail!(format!("invalid base64 character {}", c as char)),
    }
}

fn hex_digit(c: u8) -> Result<u8> {
    match (c as char).to_digit(16) {
        Some(i) => Ok(i as u8),
        None => bail!(format!("invalid hex character {}", c as char)),
    }
}

#[test]
fn base64_round_trip() {
    let cases: &[(&[u8], &str)] = &[
        (b"", ""),
        (b"f", "Zg=="),
        (b"fo", "Zm8="),
        (b"foo", "Zm9v"),
        (b"foobar", "Zm9vYmFy"),
    ];
    for &(raw, encoded) in cases {
        assert_eq!(encoded, raw.to_base64());
        assert_eq!(raw, &from_base64(encoded).unwrap()[..]);
    }
}

#[test]
fn hex_round_trip() {
    let u = from_hex("49276d206b69").unwrap();
    assert_eq!(b"I'm ki".as_ref(), &u[..]);
    assert_eq!("49276d206b69", u.to_hex());
    assert!(from_hex("4g").is_err());
    assert!(from_hex("012").is_err());
}

#[test]
fn base64_rejects_malformed_input() {
    assert!(from_base64("Zg=").is_err());
    assert!(from_base64("Z!==").is_err());
}
