//! Bencode codec
//!
//! Decoding and encoding of the BitTorrent serialization format: byte strings,
//! integers, lists and dictionaries.

pub mod decode;
pub mod encode;
pub mod value;

pub use decode::{decode, decode_all};
pub use encode::{encode, encode_canonical};
pub use value::BencodeValue;
