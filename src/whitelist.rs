// SPDX-License-Identifier: Apache-2.0, MIT

//! Optional allow-list of permitted node identities, loaded once at startup
//! from a newline-delimited file.

use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    ids: Option<HashSet<String>>,
}

impl Whitelist {
    pub fn disabled() -> Self {
        Self { ids: None }
    }

    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ids = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self { ids: Some(ids) })
    }

    pub fn is_allowed(&self, id: &str) -> bool {
        match &self.ids {
            None => true,
            Some(set) => set.contains(id),
        }
    }

    pub fn as_set(&self) -> Option<HashSet<String>> {
        self.ids.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_allows_everyone() {
        let wl = Whitelist::disabled();
        assert!(wl.is_allowed("anyone"));
    }

    #[test]
    fn enabled_restricts_to_listed_ids() {
        let wl = Whitelist::from_ids(["a".to_owned(), "b".to_owned()]);
        assert!(wl.is_allowed("a"));
        assert!(!wl.is_allowed("c"));
    }
}
