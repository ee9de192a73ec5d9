use std::collections::BTreeMap;
use std::ffi::CString;

/// Core options negotiated over the environment callback.
///
/// Three layers participate, in ascending precedence: the default value
/// from the core's option definition, an explicit value the core sets via
/// `SET_VARIABLE(S)`, and a user override installed before `start`.
/// `GET_VARIABLE` answers from the highest layer that has a value.
///
/// Values handed to the core are C strings owned by this store; they stay
/// valid until the option is redefined or the store is dropped.
#[derive(Debug, Default)]
pub struct OptionStore {
    options: BTreeMap<String, OptionEntry>,
    overrides: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct OptionEntry {
    default_value: Option<CString>,
    value: Option<CString>,
}

impl OptionStore {
    /// Installs or removes a user override. An empty value removes the
    /// override.
    pub fn set_override(&mut self, key: &str, value: &str) {
        if key.is_empty() {
            return;
        }
        if value.is_empty() {
            self.overrides.remove(key);
        } else {
            self.overrides.insert(key.to_owned(), value.to_owned());
        }
    }

    /// Replaces the option definitions with the set the core announced.
    pub fn define(&mut self, defs: impl IntoIterator<Item = (String, Option<String>)>) {
        self.options.clear();
        for (key, default_value) in defs {
            let default_value = default_value.and_then(|v| CString::new(v).ok());
            self.options.insert(
                key,
                OptionEntry {
                    default_value,
                    value: None,
                },
            );
        }
        self.apply_overrides();
    }

    /// Sets an explicit value for a defined option (`SET_VARIABLE`).
    pub fn set_value(&mut self, key: &str, value: Option<&str>) {
        if let Some(entry) = self.options.get_mut(key) {
            entry.value = value.and_then(|v| CString::new(v).ok());
        }
    }

    /// Re-applies user overrides on top of current values.
    pub fn apply_overrides(&mut self) {
        for (key, value) in &self.overrides {
            if let Some(entry) = self.options.get_mut(key) {
                entry.value = CString::new(value.as_str()).ok();
            }
        }
    }

    /// Answers a `GET_VARIABLE` query. The returned pointer is stable
    /// until the option is redefined.
    pub fn lookup(&self, key: &str) -> Option<&CString> {
        let entry = self.options.get(key)?;
        entry.value.as_ref().or(entry.default_value.as_ref())
    }

    /// True if `key` is a defined option.
    pub fn is_defined(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defined(store: &OptionStore, key: &str) -> Option<String> {
        store
            .lookup(key)
            .map(|v| v.to_str().unwrap().to_owned())
    }

    #[test]
    fn test_default_then_value_then_override() {
        let mut store = OptionStore::default();
        store.define(vec![("region".to_owned(), Some("us".to_owned()))]);
        assert_eq!(defined(&store, "region").as_deref(), Some("us"));

        store.set_value("region", Some("jp"));
        assert_eq!(defined(&store, "region").as_deref(), Some("jp"));

        store.set_override("region", "eu");
        store.apply_overrides();
        assert_eq!(defined(&store, "region").as_deref(), Some("eu"));
    }

    #[test]
    fn test_override_survives_redefinition() {
        let mut store = OptionStore::default();
        store.set_override("bios", "unibios");
        store.define(vec![("bios".to_owned(), Some("stock".to_owned()))]);
        assert_eq!(defined(&store, "bios").as_deref(), Some("unibios"));
    }

    #[test]
    fn test_empty_override_removes() {
        let mut store = OptionStore::default();
        store.set_override("bios", "unibios");
        store.set_override("bios", "");
        store.define(vec![("bios".to_owned(), Some("stock".to_owned()))]);
        assert_eq!(defined(&store, "bios").as_deref(), Some("stock"));
    }

    #[test]
    fn test_unknown_key() {
        let store = OptionStore::default();
        assert!(store.lookup("nope").is_none());
    }
}
