//! OAuth2 scopes

use std::collections::{btree_set, BTreeSet};

use aliri_braid::braid;
use serde::{Deserialize, Serialize};

/// An OAuth2 scope
#[braid(serde)]
pub struct Scope;

/// A set of scopes
///
/// Ordered so that serialized caches are stable between writes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scopes(BTreeSet<Scope>);

/// Scopes requested on every sign-in, in addition to the application's own
pub const SIGN_IN_SCOPES: [&str; 4] = ["openid", "offline_access", "profile", "email"];

impl Scopes {
    /// Produces an empty scope set
    #[inline]
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses a configured scope list
    ///
    /// Scopes may be separated by spaces, commas, or any mix of the two.
    /// Empty entries are dropped.
    pub fn parse_list(list: &str) -> Self {
        list.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| Scope::new(s.to_owned()))
            .collect()
    }

    /// Adds a scope to the scope set
    #[inline]
    pub fn insert(&mut self, scope: impl Into<Scope>) {
        self.0.insert(scope.into());
    }

    /// Adds a scope to the scope set
    #[inline]
    #[must_use]
    pub fn and(mut self, scope: impl Into<Scope>) -> Self {
        self.insert(scope);
        self
    }

    /// Checks whether every scope in `other` is present in this set
    #[inline]
    pub fn contains_all(&self, other: &Scopes) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Checks whether the scope set is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of scopes in the set
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// An iterator over the scopes in the set
    #[inline]
    pub fn iter(&self) -> btree_set::Iter<'_, Scope> {
        self.0.iter()
    }

    /// Renders the set as a space-delimited string, as sent to an authority
    pub fn to_request_string(&self) -> String {
        self.0
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl<S: Into<Scope>> FromIterator<S> for Scopes {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<Scope>> Extend<S> for Scopes {
    fn extend<T: IntoIterator<Item = S>>(&mut self, iter: T) {
        self.0.extend(iter.into_iter().map(Into::into))
    }
}

impl IntoIterator for Scopes {
    type Item = Scope;
    type IntoIter = btree_set::IntoIter<Scope>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Scopes {
    type Item = &'a Scope;
    type IntoIter = btree_set::Iter<'a, Scope>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        let scopes = Scopes::parse_list("User.Read Mail.Read,Calendars.Read, ,Contacts.Read  ");
        let expected: Scopes = ["Calendars.Read", "Contacts.Read", "Mail.Read", "User.Read"]
            .into_iter()
            .map(Scope::from_static)
            .collect();
        assert_eq!(scopes, expected);
    }

    #[test]
    fn empty_list_parses_to_empty_set() {
        assert!(Scopes::parse_list(" , ,").is_empty());
    }

    #[test]
    fn superset_check() {
        let granted = Scopes::parse_list("Mail.Read User.Read");
        assert!(granted.contains_all(&Scopes::parse_list("Mail.Read")));
        assert!(granted.contains_all(&Scopes::new()));
        assert!(!granted.contains_all(&Scopes::parse_list("Mail.Read Calendars.Read")));
    }

    #[test]
    fn request_string_is_space_delimited() {
        let scopes = Scopes::new().and(Scope::from_static("b")).and(Scope::from_static("a"));
        assert_eq!(scopes.to_request_string(), "a b");
    }
}
