//! Access lists and the rules that gate admission on them.
//!
//! An [`AccessList`] is a named set of identifiers (hostnames, IPs or
//! player names).  An [`AccessRule`] is what the proxy engine reads for
//! one admission dimension: a mode plus the list tags it checks against.
//! The tags are kept when a rule is switched off so switching it back on
//! restores the same lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A set of member identifiers, stored as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessList {
    members: Vec<String>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    /// Adds `id`, returning `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.members.push(id.to_string());
        true
    }

    /// Removes `id`, returning `false` if it was absent.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != id);
        self.members.len() < before
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Drops repeated members, keeping first occurrences.  Returns how many
    /// were removed.
    pub(crate) fn dedup(&mut self) -> usize {
        let before = self.members.len();
        let mut seen = std::collections::HashSet::new();
        self.members.retain(|m| seen.insert(m.clone()));
        before - self.members.len()
    }
}

impl<S: Into<String>> FromIterator<S> for AccessList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = AccessList::new();
        for id in iter {
            list.insert(&id.into());
        }
        list
    }
}

/// Admission mode of a single rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    #[default]
    #[serde(rename = "")]
    Unrestricted,
    #[serde(rename = "allow")]
    AllowByList,
}

/// One admission rule as the proxy engine reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    #[serde(rename = "Mode", default)]
    pub mode: AccessMode,
    #[serde(
        rename = "ListTags",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub list_tags: Vec<String>,
}

impl AccessRule {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn allow(list: impl Into<String>) -> Self {
        Self {
            mode: AccessMode::AllowByList,
            list_tags: vec![list.into()],
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.mode == AccessMode::AllowByList
    }

    /// Lists the rule gates on right now; empty while unrestricted.
    pub fn active_lists(&self) -> &[String] {
        if self.is_restricted() {
            &self.list_tags
        } else {
            &[]
        }
    }

    pub(crate) fn open(&mut self) {
        self.mode = AccessMode::Unrestricted;
    }

    /// Switches to allow-by-list.  A named list replaces the remembered
    /// tags; without one the remembered tags are reused.  Returns `false`
    /// if there is nothing to restrict by.
    pub(crate) fn restrict(&mut self, list: Option<&str>) -> bool {
        if let Some(list) = list {
            self.list_tags = vec![list.to_string()];
        }
        if self.list_tags.is_empty() {
            return false;
        }
        self.mode = AccessMode::AllowByList;
        true
    }
}

/// Which identity a rule checks: the connecting IP, the hostname the
/// client dialled, or the player name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessDimension {
    Ip,
    Hostname,
    Name,
}

impl AccessDimension {
    pub const ALL: [AccessDimension; 3] = [
        AccessDimension::Ip,
        AccessDimension::Hostname,
        AccessDimension::Name,
    ];
}

impl fmt::Display for AccessDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessDimension::Ip => write!(f, "ip"),
            AccessDimension::Hostname => write!(f, "hostname"),
            AccessDimension::Name => write!(f, "name"),
        }
    }
}

impl FromStr for AccessDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ip" => Ok(AccessDimension::Ip),
            "hostname" | "host" => Ok(AccessDimension::Hostname),
            "name" | "player" => Ok(AccessDimension::Name),
            other => Err(format!(
                "unknown access dimension '{other}' (expected ip, hostname or name)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_duplicates() {
        let mut list = AccessList::new();
        assert!(list.insert("Alice"));
        assert!(!list.insert("Alice"));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_reports_absence() {
        let mut list: AccessList = ["Alice", "Bob"].into_iter().collect();
        assert!(list.remove("Alice"));
        assert!(!list.remove("Alice"));
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["Bob"]);
    }

    #[test]
    fn dedup_collapses_repeats() {
        let mut list: AccessList = serde_json::from_str(r#"["a","b","a","a"]"#).unwrap();
        assert_eq!(list.dedup(), 2);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn rule_wire_format() {
        let open = serde_json::to_value(AccessRule::unrestricted()).unwrap();
        assert_eq!(open, serde_json::json!({ "Mode": "" }));

        let allow = serde_json::to_value(AccessRule::allow("whitelist")).unwrap();
        assert_eq!(
            allow,
            serde_json::json!({ "Mode": "allow", "ListTags": ["whitelist"] })
        );

        let parsed: AccessRule = serde_json::from_str(r#"{"Mode":""}"#).unwrap();
        assert_eq!(parsed, AccessRule::unrestricted());
    }

    #[test]
    fn toggle_off_then_on_restores_tags() {
        let mut rule = AccessRule::allow("Lobby");
        rule.open();
        assert!(rule.active_lists().is_empty());
        assert!(rule.restrict(None));
        assert_eq!(rule, AccessRule::allow("Lobby"));
    }

    #[test]
    fn restrict_without_tags_fails() {
        let mut rule = AccessRule::unrestricted();
        assert!(!rule.restrict(None));
        assert!(!rule.is_restricted());
    }

    #[test]
    fn dimension_parse() {
        assert_eq!("Hostname".parse::<AccessDimension>(), Ok(AccessDimension::Hostname));
        assert_eq!("player".parse::<AccessDimension>(), Ok(AccessDimension::Name));
        assert!("mac".parse::<AccessDimension>().is_err());
    }
}
