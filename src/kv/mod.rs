// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.
use std::fmt;

mod key;
mod kvpair;
mod mutation;

pub use key::Key;
pub use kvpair::KvPair;
pub use mutation::Mutation;

/// The value part of a key/value pair. An alias for `Vec<u8>`.
pub type Value = Vec<u8>;

struct HexRepr<'a>(pub &'a [u8]);

impl fmt::Display for HexRepr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}
