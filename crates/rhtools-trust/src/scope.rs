//! Scopes and scope containment
//!
//! A [`Scope`] is what a declaration grants over: a scope type plus optional
//! targets and exclusions. A [`ScopeRef`] is what a query asks about: one
//! scope type and at most one target, written `channel:general`, `forum`,
//! `global`.
//!
//! Scope types form a small hierarchy:
//!
//! ```text
//! global
//! ├── global-chat ── channel:<id>
//! ├── global-forum ── forum:<id>
//! └── game:<id>
//! ```
//!
//! A typed scope with no targets covers every target of that type.

use crate::error::{Result, TrustError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Scope namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScopeType {
    /// Everything
    Global,
    /// All chat channels
    GlobalChat,
    /// All forums
    GlobalForum,
    /// Specific chat channels
    Channel,
    /// Specific forums
    Forum,
    /// Specific games
    Game,
}

impl ScopeType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Global => "global",
            ScopeType::GlobalChat => "global-chat",
            ScopeType::GlobalForum => "global-forum",
            ScopeType::Channel => "channel",
            ScopeType::Forum => "forum",
            ScopeType::Game => "game",
        }
    }

    /// Whether scopes of this type carry targets
    pub fn is_targeted(&self) -> bool {
        matches!(self, ScopeType::Channel | ScopeType::Forum | ScopeType::Game)
    }

    /// The category scope enclosing a targeted type, if any
    pub fn category(&self) -> Option<ScopeType> {
        match self {
            ScopeType::Channel => Some(ScopeType::GlobalChat),
            ScopeType::Forum => Some(ScopeType::GlobalForum),
            _ => None,
        }
    }
}

impl FromStr for ScopeType {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "global" => Ok(ScopeType::Global),
            "global-chat" => Ok(ScopeType::GlobalChat),
            "global-forum" => Ok(ScopeType::GlobalForum),
            "channel" => Ok(ScopeType::Channel),
            "forum" => Ok(ScopeType::Forum),
            "game" => Ok(ScopeType::Game),
            other => Err(TrustError::validation(format!("unknown scope type '{other}'"))),
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How closely a grant's scope matches the queried scope
///
/// Ordered from broadest to most specific, so `max()` picks the best match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Specificity {
    /// Matched through the global scope
    Global,
    /// Matched through a category scope (`global-chat`, `global-forum`)
    Category,
    /// Matched through an untargeted scope of the same type
    TypeWide,
    /// Matched the queried scope exactly
    Exact,
}

/// Scope carried by a declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// Scope namespace
    #[serde(rename = "type")]
    pub scope_type: ScopeType,
    /// Specific targets; empty means every target of the type
    #[serde(default)]
    pub targets: Vec<String>,
    /// Targets carved out of the scope
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Scope {
    /// The global scope
    pub fn global() -> Self {
        Self::of_type(ScopeType::Global)
    }

    /// An untargeted scope of the given type
    pub fn of_type(scope_type: ScopeType) -> Self {
        Self {
            scope_type,
            targets: Vec::new(),
            exclude: Vec::new(),
        }
    }

    /// A scope limited to specific targets
    pub fn targeted<I, S>(scope_type: ScopeType, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope_type,
            targets: targets.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    /// Add exclusions
    pub fn excluding<I, S>(mut self, exclude: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(exclude.into_iter().map(Into::into));
        self
    }

    /// Structural validation used at finalize
    pub fn validate(&self) -> Result<()> {
        if self.scope_type == ScopeType::Global
            && (!self.targets.is_empty() || !self.exclude.is_empty())
        {
            return Err(TrustError::validation(
                "global scope cannot carry targets or exclusions",
            ));
        }
        if !self.scope_type.is_targeted() && !self.targets.is_empty() {
            return Err(TrustError::validation(format!(
                "{} scope cannot carry targets",
                self.scope_type
            )));
        }
        if self
            .targets
            .iter()
            .chain(self.exclude.iter())
            .any(|t| t.trim().is_empty())
        {
            return Err(TrustError::validation("scope targets must be non-empty"));
        }
        if let Some(both) = self.targets.iter().find(|t| self.exclude.contains(t)) {
            return Err(TrustError::validation(format!(
                "scope target '{both}' is both targeted and excluded"
            )));
        }
        Ok(())
    }

    fn is_excluded(&self, target: &str) -> bool {
        self.exclude.iter().any(|e| e == target)
    }

    /// Whether this scope covers the queried scope, and how specifically
    pub fn covers(&self, query: &ScopeRef) -> Option<Specificity> {
        match self.scope_type {
            ScopeType::Global => Some(if query.scope_type == ScopeType::Global {
                Specificity::Exact
            } else {
                Specificity::Global
            }),
            ScopeType::GlobalChat | ScopeType::GlobalForum => {
                if query.scope_type == self.scope_type {
                    return self.exclude.is_empty().then_some(Specificity::Exact);
                }
                if query.scope_type.category() != Some(self.scope_type) {
                    return None;
                }
                match &query.target {
                    Some(target) if !self.is_excluded(target) => Some(Specificity::Category),
                    Some(_) => None,
                    None => self.exclude.is_empty().then_some(Specificity::Category),
                }
            }
            ScopeType::Channel | ScopeType::Forum | ScopeType::Game => {
                if query.scope_type != self.scope_type {
                    return None;
                }
                match &query.target {
                    Some(target) if self.is_excluded(target) => None,
                    Some(_) if self.targets.is_empty() => Some(Specificity::TypeWide),
                    Some(target) => self
                        .targets
                        .iter()
                        .any(|t| t == target)
                        .then_some(Specificity::Exact),
                    None => (self.targets.is_empty() && self.exclude.is_empty())
                        .then_some(Specificity::Exact),
                }
            }
        }
    }

    /// Whether `other` is entirely inside this scope
    pub fn contains(&self, other: &Scope) -> bool {
        match (self.scope_type, other.scope_type) {
            (ScopeType::Global, _) => true,
            (_, ScopeType::Global) => false,
            (outer, inner) if outer == inner && !outer.is_targeted() => {
                subset(&self.exclude, &other.exclude)
            }
            (outer, inner) if outer == inner => {
                if self.targets.is_empty() {
                    if other.targets.is_empty() {
                        subset(&self.exclude, &other.exclude)
                    } else {
                        other.targets.iter().all(|t| !self.is_excluded(t))
                    }
                } else {
                    !other.targets.is_empty()
                        && other
                            .targets
                            .iter()
                            .all(|t| self.targets.contains(t) && !self.is_excluded(t))
                }
            }
            (outer, inner) if inner.category() == Some(outer) => {
                if other.targets.is_empty() {
                    subset(&self.exclude, &other.exclude)
                } else {
                    other.targets.iter().all(|t| !self.is_excluded(t))
                }
            }
            _ => false,
        }
    }

    /// Query forms whose authority, taken together, spans this scope
    pub fn representative_refs(&self) -> Vec<ScopeRef> {
        if self.targets.is_empty() {
            vec![ScopeRef::of_type(self.scope_type)]
        } else {
            self.targets
                .iter()
                .map(|t| ScopeRef::targeted(self.scope_type, t.clone()))
                .collect()
        }
    }
}

fn subset(a: &[String], b: &[String]) -> bool {
    let b: BTreeSet<&String> = b.iter().collect();
    a.iter().all(|x| b.contains(x))
}

/// A single queried scope: `global`, `global-chat`, `channel:general`, ...
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeRef {
    /// Scope namespace
    pub scope_type: ScopeType,
    /// Target within the namespace; `None` means the namespace as a whole
    pub target: Option<String>,
}

impl ScopeRef {
    /// The global scope
    pub fn global() -> Self {
        Self::of_type(ScopeType::Global)
    }

    /// A namespace as a whole
    pub fn of_type(scope_type: ScopeType) -> Self {
        Self {
            scope_type,
            target: None,
        }
    }

    /// A target within a namespace
    pub fn targeted(scope_type: ScopeType, target: impl Into<String>) -> Self {
        Self {
            scope_type,
            target: Some(target.into()),
        }
    }

    /// How an assignment (or other record) scoped at `self` relates to a query
    pub fn relation_to(&self, query: &ScopeRef) -> Option<Specificity> {
        if self == query {
            return Some(Specificity::Exact);
        }
        match (self.scope_type, &self.target) {
            (ScopeType::Global, _) => Some(Specificity::Global),
            (outer, None) if query.scope_type.category() == Some(outer) => {
                Some(Specificity::Category)
            }
            (outer, None) if outer == query.scope_type && query.target.is_some() => {
                Some(Specificity::TypeWide)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{}:{}", self.scope_type, target),
            None => write!(f, "{}", self.scope_type),
        }
    }
}

impl FromStr for ScopeRef {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((kind, target)) => {
                let scope_type: ScopeType = kind.parse()?;
                if !scope_type.is_targeted() {
                    return Err(TrustError::validation(format!(
                        "{scope_type} scope cannot carry a target"
                    )));
                }
                if target.is_empty() {
                    return Err(TrustError::validation(format!("empty target in '{s}'")));
                }
                Ok(ScopeRef::targeted(scope_type, target))
            }
            None => Ok(ScopeRef::of_type(s.parse()?)),
        }
    }
}

impl Serialize for ScopeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: &str) -> ScopeRef {
        s.parse().unwrap()
    }

    #[test]
    fn test_scope_ref_parsing() {
        assert_eq!(r("channel:general"), ScopeRef::targeted(ScopeType::Channel, "general"));
        assert_eq!(r("global"), ScopeRef::global());
        assert_eq!(r("channel:general").to_string(), "channel:general");
        assert!("global:x".parse::<ScopeRef>().is_err());
        assert!("channel:".parse::<ScopeRef>().is_err());
        assert!("lobby".parse::<ScopeRef>().is_err());
    }

    #[test]
    fn test_coverage_specificity() {
        let help = Scope::targeted(ScopeType::Channel, ["help"]);
        assert_eq!(help.covers(&r("channel:help")), Some(Specificity::Exact));
        assert_eq!(help.covers(&r("channel:other")), None);
        assert_eq!(help.covers(&r("forum:help")), None);

        let all_channels = Scope::of_type(ScopeType::Channel).excluding(["staff"]);
        assert_eq!(all_channels.covers(&r("channel:help")), Some(Specificity::TypeWide));
        assert_eq!(all_channels.covers(&r("channel:staff")), None);

        let chat = Scope::of_type(ScopeType::GlobalChat);
        assert_eq!(chat.covers(&r("channel:help")), Some(Specificity::Category));
        assert_eq!(chat.covers(&r("forum:help")), None);

        assert_eq!(Scope::global().covers(&r("game:smw")), Some(Specificity::Global));
        assert_eq!(Scope::global().covers(&r("global")), Some(Specificity::Exact));
    }

    #[test]
    fn test_containment() {
        let global = Scope::global();
        let chat = Scope::of_type(ScopeType::GlobalChat);
        let help = Scope::targeted(ScopeType::Channel, ["help"]);
        let help_and_dev = Scope::targeted(ScopeType::Channel, ["help", "dev"]);
        let forum = Scope::targeted(ScopeType::Forum, ["help"]);

        assert!(global.contains(&chat));
        assert!(chat.contains(&help));
        assert!(help_and_dev.contains(&help));
        assert!(!help.contains(&help_and_dev));
        assert!(!help.contains(&global));
        assert!(!chat.contains(&forum));
        assert!(!help.contains(&Scope::of_type(ScopeType::Channel)));

        let chat_without_staff = Scope::of_type(ScopeType::GlobalChat).excluding(["staff"]);
        assert!(!chat_without_staff.contains(&Scope::targeted(ScopeType::Channel, ["staff"])));
        assert!(!chat_without_staff.contains(&Scope::of_type(ScopeType::Channel)));
        assert!(chat_without_staff
            .contains(&Scope::of_type(ScopeType::Channel).excluding(["staff", "mods"])));
    }

    #[test]
    fn test_validation() {
        assert!(Scope::global().validate().is_ok());
        assert!(Scope::targeted(ScopeType::Global, ["x"]).validate().is_err());
        assert!(Scope::targeted(ScopeType::GlobalChat, ["x"]).validate().is_err());
        assert!(Scope::targeted(ScopeType::Channel, ["a"])
            .excluding(["a"])
            .validate()
            .is_err());
        assert!(Scope::targeted(ScopeType::Game, [" "]).validate().is_err());
    }

    #[test]
    fn test_ref_relations() {
        assert_eq!(r("channel:a").relation_to(&r("channel:a")), Some(Specificity::Exact));
        assert_eq!(r("channel").relation_to(&r("channel:a")), Some(Specificity::TypeWide));
        assert_eq!(r("global-chat").relation_to(&r("channel:a")), Some(Specificity::Category));
        assert_eq!(r("global").relation_to(&r("channel:a")), Some(Specificity::Global));
        assert_eq!(r("channel:b").relation_to(&r("channel:a")), None);
        assert_eq!(r("forum").relation_to(&r("channel:a")), None);
    }
}
