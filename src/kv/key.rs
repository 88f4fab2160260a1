// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

use super::HexRepr;

/// The key part of a key/value pair.
///
/// In TiKV, keys are an ordered sequence of bytes compared lexicographically. Region
/// boundaries are keys too; an empty key as a region's end key stands for +infinity.
///
/// # Examples
/// ```rust
/// use tikv_txn_client::Key;
///
/// let from_string = Key::from("TiKV".to_owned());
/// let from_vec = Key::from(b"TiKV".to_vec());
/// assert_eq!(from_string, from_vec);
/// assert!(from_vec < from_vec.clone().next_key());
/// ```
#[derive(Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Key(pub(crate) Vec<u8>);

impl Key {
    /// The empty key.
    pub const EMPTY: Self = Key(Vec::new());

    /// Return whether the key is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Push a zero to the end of the key.
    ///
    /// Extending a zero makes the new key the smallest key that is greater than the original one.
    #[inline]
    #[must_use]
    pub fn next_key(mut self) -> Self {
        self.0.push(0);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key(v)
    }
}

impl From<&[u8]> for Key {
    fn from(v: &[u8]) -> Self {
        Key(v.to_vec())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Key {
        Key(v.into_bytes())
    }
}

impl From<&'static str> for Key {
    fn from(v: &'static str) -> Key {
        Key(v.as_bytes().to_vec())
    }
}

impl From<Key> for Vec<u8> {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl<'a> From<&'a Key> for &'a [u8] {
    fn from(key: &'a Key) -> Self {
        &key.0
    }
}

impl AsRef<Key> for Key {
    fn as_ref(&self) -> &Key {
        self
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Key({})", HexRepr(&self.0))
    }
}
