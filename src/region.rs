// Copyright 2019 TiKV Project Authors. Licensed under Apache-2.0.

use derive_new::new;

use crate::Key;

pub type RegionId = u64;
pub type StoreId = u64;

/// The ID and version information of a region.
///
/// Two regions with the same id are different regions across time when either version
/// differs (a split or merge bumps `ver`, a membership change bumps `conf_ver`).
#[derive(new, Clone, Default, Debug, PartialEq, Eq, Hash)]
pub struct RegionVerId {
    pub id: RegionId,
    pub conf_ver: u64,
    pub ver: u64,
}

/// A contiguous key range `[start_key, end_key)` and the store leading it.
///
/// Regions are never mutated in place: when the client learns that its view is stale it
/// drops the region and fetches a replacement.
#[derive(new, Clone, Default, Debug, PartialEq, Eq)]
pub struct Region {
    pub id: RegionId,
    pub start_key: Key,
    /// Empty means +infinity.
    pub end_key: Key,
    pub conf_ver: u64,
    pub version: u64,
    pub leader_store_id: StoreId,
}

impl Region {
    pub fn contains(&self, key: &Key) -> bool {
        key >= &self.start_key && (key < &self.end_key || self.end_key.is_empty())
    }

    pub fn start_key(&self) -> Key {
        self.start_key.clone()
    }

    pub fn end_key(&self) -> Key {
        self.end_key.clone()
    }

    pub fn range(&self) -> (Key, Key) {
        (self.start_key(), self.end_key())
    }

    pub fn ver_id(&self) -> RegionVerId {
        RegionVerId {
            id: self.id,
            conf_ver: self.conf_ver,
            ver: self.version,
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreRole {
    #[default]
    Voter,
    Learner,
}

/// One TiKV instance.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct Store {
    pub id: StoreId,
    pub address: String,
    #[new(default)]
    pub role: StoreRole,
}

/// A resolved region together with the store that should serve requests for it.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct RegionStore {
    pub region: Region,
    pub store: Store,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_honours_unbounded_end() {
        let region = Region::new(1, Key::from("b"), Key::EMPTY, 1, 1, 1);
        assert!(!region.contains(&Key::from("a")));
        assert!(region.contains(&Key::from("b")));
        assert!(region.contains(&Key::from(vec![0xFF; 8])));

        let region = Region::new(2, Key::EMPTY, Key::from("b"), 1, 1, 1);
        assert!(region.contains(&Key::EMPTY));
        assert!(region.contains(&Key::from("a")));
        assert!(!region.contains(&Key::from("b")));
    }

    #[test]
    fn ver_id_tracks_both_versions() {
        let region = Region::new(3, Key::EMPTY, Key::EMPTY, 4, 5, 1);
        assert_eq!(region.ver_id(), RegionVerId::new(3, 4, 5));
    }
}
