//! Oracle-driven block-cipher cryptanalysis.
//!
//! Everything in this crate recovers hidden data from a black-box oracle
//! using only adaptively chosen inputs: block-size and mode probing, prefix
//! alignment, byte-at-a-time ECB suffix recovery, the CBC padding-oracle
//! attack and a concurrent timing-leak variant. The cipher primitives in the
//! `aes` crate are used solely to construct test oracles; the attack code
//! itself never touches a key.

#[macro_use]
extern crate failure;

pub mod cbc;
pub mod ecb;
pub mod errors;
pub mod oracles;
pub mod prefix;
pub mod probe;
pub mod timing;
