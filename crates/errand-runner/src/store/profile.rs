//! The user profile used to fill checkout forms.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::write_json;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub payment_method: String,

    /// Fields beyond the known four are kept as given
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "John Doe".into(),
            phone: "555-0123".into(),
            address: "123 Main St, Tech City".into(),
            payment_method: "Credit Card (Ending 1234)".into(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Profile {
    /// Overwrite the given fields, keeping everything else.
    pub fn merged(&self, fields: &HashMap<String, String>) -> Result<Self> {
        let mut value = serde_json::to_value(self)?;
        let Some(object) = value.as_object_mut() else {
            return Err(Error::Config("profile is not an object".into()));
        };
        for (key, field) in fields {
            object.insert(key.clone(), serde_json::Value::String(field.clone()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

pub struct ProfileStore {
    path: Option<PathBuf>,
    current: Mutex<Profile>,
}

impl ProfileStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: Mutex::new(Profile::default()),
        }
    }

    /// Read the profile at `path`, writing the defaults there if it is missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let profile = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let profile = Profile::default();
            write_json(&path, &profile)?;
            profile
        };
        Ok(Self {
            path: Some(path),
            current: Mutex::new(profile),
        })
    }

    pub fn load(&self) -> Result<Profile> {
        Ok(self.lock()?.clone())
    }

    pub fn update(&self, fields: &HashMap<String, String>) -> Result<Profile> {
        let mut current = self.lock()?;
        let updated = current.merged(fields)?;
        if let Some(ref path) = self.path {
            write_json(path, &updated)?;
        }
        *current = updated.clone();
        Ok(updated)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Profile>> {
        self.current
            .lock()
            .map_err(|_| Error::Config("profile store lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_on_the_wire() {
        let json = serde_json::to_value(Profile::default()).unwrap();
        assert_eq!(json["name"], "John Doe");
        assert_eq!(json["phone"], "555-0123");
        assert_eq!(json["paymentMethod"], "Credit Card (Ending 1234)");
    }

    #[test]
    fn test_update_merges() {
        let store = ProfileStore::in_memory();
        let updated = store
            .update(&fields(&[("name", "Ada"), ("email", "ada@example.com")]))
            .unwrap();
        assert_eq!(updated.name, "Ada");
        assert_eq!(updated.phone, "555-0123");
        assert_eq!(updated.extra["email"], "ada@example.com");
        assert_eq!(store.load().unwrap(), updated);
    }

    #[test]
    fn test_camel_case_key_updates_known_field() {
        let store = ProfileStore::in_memory();
        let updated = store.update(&fields(&[("paymentMethod", "Cash")])).unwrap();
        assert_eq!(updated.payment_method, "Cash");
        assert!(updated.extra.is_empty());
    }

    #[test]
    fn test_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile.json");

        let store = ProfileStore::open(&path).unwrap();
        assert!(path.exists());
        store.update(&fields(&[("address", "1 Loop Rd")])).unwrap();

        let reopened = ProfileStore::open(&path).unwrap();
        let profile = reopened.load().unwrap();
        assert_eq!(profile.address, "1 Loop Rd");
        assert_eq!(profile.name, "John Doe");
    }
}
