//! Per-array function policy: which functions formulas in an array may call.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PolicyMode {
    #[default]
    #[serde(rename = "ALLOW_ALL")]
    AllowAll,
    #[serde(rename = "ALLOW_ONLY")]
    AllowOnly,
}

impl PolicyMode {
    /// Unrecognized modes behave like `ALLOW_ALL`.
    pub fn parse(text: &str) -> Self {
        if text.trim().eq_ignore_ascii_case("ALLOW_ONLY") {
            Self::AllowOnly
        } else {
            Self::AllowAll
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AllowAll => "ALLOW_ALL",
            Self::AllowOnly => "ALLOW_ONLY",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnPolicy {
    #[serde(default)]
    pub mode: PolicyMode,
    #[serde(default)]
    pub allow: BTreeSet<String>,
    #[serde(default)]
    pub deny: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl FnPolicy {
    /// Build a policy from a mode and list items. `:TAG` items become tag
    /// filters; other names go to the allow set under `ALLOW_ONLY` and to the
    /// deny set otherwise.
    pub fn from_items<I, S>(mode: PolicyMode, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut policy = Self {
            mode,
            ..Self::default()
        };
        for item in items {
            let item = item.as_ref().trim();
            if item.is_empty() {
                continue;
            }
            if let Some(tag) = item.strip_prefix(':') {
                policy.tags.insert(tag.to_ascii_uppercase());
            } else if mode == PolicyMode::AllowOnly {
                policy.allow.insert(item.to_ascii_uppercase());
            } else {
                policy.deny.insert(item.to_ascii_uppercase());
            }
        }
        policy
    }

    /// Whether `name` (with its registry tags) passes this policy.
    ///
    /// The engine's always-allowed set is checked before this is consulted.
    pub fn permits<'a, I>(&self, name: &str, fn_tags: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let tag_match = || fn_tags.into_iter().any(|t| self.tags.contains(t));
        match self.mode {
            PolicyMode::AllowOnly => {
                self.allow.contains(name) || (!self.tags.is_empty() && tag_match())
            }
            PolicyMode::AllowAll => {
                if self.deny.contains(name) {
                    false
                } else if !self.tags.is_empty() {
                    tag_match()
                } else {
                    true
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all_with_deny() {
        let policy = FnPolicy::from_items(PolicyMode::AllowAll, ["sum"]);
        assert!(!policy.permits("SUM", ["PURE"]));
        assert!(policy.permits("ADD", ["PURE"]));
    }

    #[test]
    fn test_allow_all_with_tag_filter() {
        let policy = FnPolicy::from_items(PolicyMode::AllowAll, [":pure"]);
        assert!(policy.permits("ADD", ["PURE"]));
        assert!(!policy.permits("SPLIT", ["BLOCK"]));
    }

    #[test]
    fn test_allow_only() {
        let policy = FnPolicy::from_items(PolicyMode::AllowOnly, ["add", ":META"]);
        assert!(policy.permits("ADD", ["PURE"]));
        assert!(policy.permits("NOTE", ["META"]));
        assert!(!policy.permits("MUL", ["PURE"]));
    }

    #[test]
    fn test_mode_round_trip() {
        let json = serde_json::to_string(&PolicyMode::AllowOnly).unwrap();
        assert_eq!(json, "\"ALLOW_ONLY\"");
        assert_eq!(PolicyMode::parse("bogus"), PolicyMode::AllowAll);
    }
}
