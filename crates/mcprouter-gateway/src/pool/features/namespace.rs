//! Exposed-name convention
//!
//! Every tool, prompt, resource and resource template is exposed as
//! `<alias><separator><original>`. Splitting happens at the first separator,
//! so original names may themselves contain the separator (`fs:file:///x`).

use crate::error::{RouterError, RouterResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    separator: String,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(":")
    }
}

impl Namespace {
    /// `separator` must be non-empty; `RouterConfig::validate` enforces it.
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Aliases are `[A-Za-z0-9._-]+` and may not contain the separator
    pub fn validate_alias(&self, server: &str, alias: &str) -> RouterResult<()> {
        let invalid = |reason: &str| RouterError::InvalidAlias {
            server: server.to_string(),
            alias: alias.to_string(),
            reason: reason.to_string(),
        };

        if alias.is_empty() {
            return Err(invalid("alias is empty"));
        }
        if let Some(c) = alias
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(invalid(&format!("character '{}' is not allowed", c)));
        }
        if alias.contains(self.separator.as_str()) {
            return Err(invalid(&format!(
                "alias contains the namespace separator '{}'",
                self.separator
            )));
        }
        Ok(())
    }

    pub fn qualify(&self, alias: &str, original: &str) -> String {
        format!("{}{}{}", alias, self.separator, original)
    }

    /// Split an exposed name into `(alias, original)`
    pub fn split<'a>(&self, exposed: &'a str) -> Option<(&'a str, &'a str)> {
        exposed
            .split_once(self.separator.as_str())
            .filter(|(alias, original)| !alias.is_empty() && !original.is_empty())
    }

    /// Human readable statement of the naming rule
    pub fn describe(&self) -> String {
        format!(
            "exposed name = <alias>{sep}<original name>; split at the first '{sep}'",
            sep = self.separator
        )
    }
}
