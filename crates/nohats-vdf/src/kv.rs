//! Ordered multi-map of KeyValues entries.

/// A value: a string or a nested block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvValue {
    Str(String),
    List(KvList),
}

impl KvValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KvValue::Str(s) => Some(s),
            KvValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&KvList> {
        match self {
            KvValue::List(l) => Some(l),
            KvValue::Str(_) => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut KvList> {
        match self {
            KvValue::List(l) => Some(l),
            KvValue::Str(_) => None,
        }
    }
}

impl From<&str> for KvValue {
    fn from(s: &str) -> Self {
        KvValue::Str(s.to_string())
    }
}

impl From<String> for KvValue {
    fn from(s: String) -> Self {
        KvValue::Str(s)
    }
}

impl From<KvList> for KvValue {
    fn from(l: KvList) -> Self {
        KvValue::List(l)
    }
}

/// Entries in file order. Keys may repeat.
///
/// Lookups see the last entry for a key; [`KvList::insert`] appends rather
/// than replaces, so writing a list back keeps every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvList {
    entries: Vec<(String, KvValue)>,
}

impl KvList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn last_index(&self, key: &str) -> Option<usize> {
        self.entries.iter().rposition(|(k, _)| k == key)
    }

    /// Append an entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<KvValue>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Last value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&KvValue> {
        self.last_index(key).map(|i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut KvValue> {
        self.last_index(key).map(move |i| &mut self.entries[i].1)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(KvValue::as_str)
    }

    pub fn get_list(&self, key: &str) -> Option<&KvList> {
        self.get(key).and_then(KvValue::as_list)
    }

    /// Follow a chain of block keys, e.g. `["items_game", "items"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&KvValue> {
        let (last, blocks) = path.split_last()?;
        let mut list = self;
        for key in blocks {
            list = list.get_list(key)?;
        }
        list.get(last)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.last_index(key).is_some()
    }

    /// Remove the last entry for `key`.
    pub fn remove(&mut self, key: &str) -> Option<KvValue> {
        self.last_index(key).map(|i| self.entries.remove(i).1)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &KvValue) -> bool) {
        self.entries.retain(|(k, v)| keep(k, v));
    }

    /// Every entry, duplicates included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &KvValue)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut KvValue)> + '_ {
        self.entries.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    /// Distinct keys in first-seen order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for (k, _) in &self.entries {
            if !keys.contains(&k.as_str()) {
                keys.push(k);
            }
        }
        keys
    }

    pub fn values(&self) -> impl Iterator<Item = &KvValue> + '_ {
        self.entries.iter().map(|(_, v)| v)
    }
}

impl<K: Into<String>, V: Into<KvValue>> FromIterator<(K, V)> for KvList {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl IntoIterator for KvList {
    type Item = (String, KvValue);
    type IntoIter = std::vec::IntoIter<(String, KvValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use serde::ser::{Serialize, SerializeMap, Serializer};

    use super::{KvList, KvValue};

    impl Serialize for KvValue {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                KvValue::Str(s) => serializer.serialize_str(s),
                KvValue::List(l) => l.serialize(serializer),
            }
        }
    }

    /// A map in file order; repeated keys are emitted repeatedly.
    impl Serialize for KvList {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(self.len()))?;
            for (k, v) in self.iter() {
                map.serialize_entry(k, v)?;
            }
            map.end()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_value_wins() {
        let mut l = KvList::new();
        l.insert("skin", "0");
        l.insert("model", "a.mdl");
        l.insert("skin", "1");
        assert_eq!(l.len(), 3);
        assert_eq!(l.get_str("skin"), Some("1"));
        assert_eq!(l.keys(), vec!["skin", "model"]);

        assert_eq!(l.remove("skin"), Some(KvValue::from("1")));
        assert_eq!(l.get_str("skin"), Some("0"));
        assert!(l.remove("missing").is_none());
    }

    #[test]
    fn test_get_path() {
        let items: KvList = [("default", KvValue::from("x"))].into_iter().collect();
        let mut game = KvList::new();
        game.insert("items", items);
        let mut root = KvList::new();
        root.insert("items_game", game);

        assert_eq!(
            root.get_path(&["items_game", "items", "default"]),
            Some(&KvValue::from("x"))
        );
        assert!(root.get_path(&["items_game", "missing", "default"]).is_none());
        assert!(root.get_path(&[]).is_none());
    }
}
