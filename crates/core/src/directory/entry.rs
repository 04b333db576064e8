//! Raw search result entries.

use std::collections::HashMap;

/// One entry returned by a search: its DN and a multi-valued attribute map
/// keyed by lowercased attribute name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub dn: String,
    attrs: HashMap<String, Vec<String>>,
}

impl RawEntry {
    /// Build an entry, lowercasing attribute names. Values of attributes
    /// that differ only in case are concatenated in input order.
    pub fn new<I, K>(dn: impl Into<String>, attrs: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<String>)>,
        K: AsRef<str>,
    {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, values) in attrs {
            map.entry(name.as_ref().to_lowercase())
                .or_default()
                .extend(values);
        }
        Self {
            dn: dn.into(),
            attrs: map,
        }
    }

    /// All values of `attr` (any case), in server order.
    pub fn values(&self, attr: &str) -> Option<&[String]> {
        self.attrs.get(&attr.to_lowercase()).map(Vec::as_slice)
    }

    /// First value of `attr`. Further values are ignored.
    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn has(&self, attr: &str) -> bool {
        self.attrs.contains_key(&attr.to_lowercase())
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_lowercased() {
        let entry = RawEntry::new(
            "uid=alice,ou=People,dc=example,dc=com",
            [("uidNumber", vec!["1001".to_string()])],
        );
        assert!(entry.attribute_names().all(|n| n == "uidnumber"));
        assert_eq!(entry.first("UIDNUMBER"), Some("1001"));
    }

    #[test]
    fn test_first_value_only() {
        let entry = RawEntry::new(
            "uid=bob,ou=People",
            [("mail", vec!["bob@a.example".to_string(), "bob@b.example".to_string()])],
        );
        assert_eq!(entry.first("mail"), Some("bob@a.example"));
        assert_eq!(entry.values("mail").map(<[String]>::len), Some(2));
        assert_eq!(entry.first("cn"), None);
    }
}
