// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use super::Key;
use super::Value;

/// A buffered write sent in the prewrite leg.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mutation {
    Put(Key, Value),
    Delete(Key),
}

impl Mutation {
    pub fn key(&self) -> &Key {
        match self {
            Mutation::Put(key, _) | Mutation::Delete(key) => key,
        }
    }
}

impl AsRef<Key> for Mutation {
    fn as_ref(&self) -> &Key {
        self.key()
    }
}
