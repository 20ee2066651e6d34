use crate::{Error, Result};
use std::collections::HashMap;

/// Named values bound into `${name}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.values
    }

    /// Parse CLI args like "key=value". The value may itself contain '='.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut params = Self::new();
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                Error::Config(format!("invalid param '{}', expected key=value", arg))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config(format!("invalid param '{}', empty key", arg)));
            }
            params.values.insert(key.to_string(), value.to_string());
        }
        Ok(params)
    }

    /// Replace every `${name}` in `template`. Unbound names are an error so a
    /// typo in a plan template never reaches the browser.
    pub fn substitute(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("${") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find('}') else {
                return Err(Error::Config(format!(
                    "unterminated placeholder in '{}'",
                    template
                )));
            };
            let name = &after[..close];
            let value = self
                .get(name)
                .ok_or_else(|| Error::Config(format!("unknown placeholder: ${{{}}}", name)))?;
            out.push_str(value);
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Substitute into every string of a YAML tree, keys excluded.
    pub fn substitute_value(&self, value: &mut serde_yaml::Value) -> Result<()> {
        match value {
            serde_yaml::Value::String(s) => {
                *s = self.substitute(s)?;
            }
            serde_yaml::Value::Mapping(map) => {
                for (_, v) in map.iter_mut() {
                    self.substitute_value(v)?;
                }
            }
            serde_yaml::Value::Sequence(seq) => {
                for v in seq.iter_mut() {
                    self.substitute_value(v)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
