//! KLV (Key-Length-Value) codec.
//!
//! Implements the registered-UL Key type, the BER length codec, and the
//! read/write primitives that combine them into KLV triples, plus recognition
//! and emission of the registered fill item used for KAG alignment. Layered
//! directly on `bmx-io`'s [`bmx_io::MxfFile`] trait so higher layers never
//! depend on a particular file backend.

pub mod error;
pub mod fill;
pub mod key;
pub mod klv;
pub mod length;

pub use error::{Error, Result};
pub use fill::{is_fill_key, write_fill_to_kag, FILL_KEY};
pub use key::{Key, Uuid, KEY_LEN, UL};
pub use klv::{
    kl_fixed_size, patch_fixed_length, read_kl, read_klv, write_klv, write_klv_fixed_length,
    KlHeader,
};
pub use length::{
    ber_length_size, read_ber_length, write_ber_length, write_fixed_ber_length, MAX_LLEN,
};
