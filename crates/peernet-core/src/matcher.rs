//! Query filters and matchers
//!
//! Filter strings from search queries normalize to one of five modes at
//! query-parse time; matchers then branch on the normalized mode. Wildcard
//! matching is case-insensitive and is decided solely by the presence of a
//! leading and/or trailing `*`.

use crate::activity::ActivityInfo;
use crate::geo::GpsLocation;
use crate::profile::ProfileInfo;

/// A normalized wildcard filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WildcardFilter {
    /// Empty, `*`, or `**`: the filter is disabled.
    None,
    /// No stars: exact case-insensitive match.
    Equals(String),
    /// Trailing star only.
    Prefix(String),
    /// Leading star only.
    Suffix(String),
    /// Stars on both ends.
    Contains(String),
}

impl WildcardFilter {
    /// Normalize a raw filter string. The payload is lowercased; one leading
    /// and one trailing `*` are stripped.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw == "*" || raw == "**" {
            return Self::None;
        }
        let lower = raw.to_lowercase();
        let leading = lower.starts_with('*');
        let trailing = lower.ends_with('*');
        let start = usize::from(leading);
        let end = lower.len() - usize::from(trailing);
        let core = lower[start..end].to_string();
        match (leading, trailing) {
            (true, true) => Self::Contains(core),
            (false, true) => Self::Prefix(core),
            (true, false) => Self::Suffix(core),
            (false, false) => Self::Equals(core),
        }
    }

    /// Whether the filter is disabled.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Case-insensitive match of `value` against the filter.
    pub fn matches(&self, value: &str) -> bool {
        let value = value.to_lowercase();
        match self {
            Self::None => true,
            Self::Equals(core) => value == *core,
            Self::Prefix(core) => value.starts_with(core),
            Self::Suffix(core) => value.ends_with(core),
            Self::Contains(core) => value.contains(core),
        }
    }
}

/// Filters of a profile search query, normalized.
#[derive(Debug, Clone)]
pub struct ProfileQueryFilter {
    /// Profile-name filter
    pub name: WildcardFilter,
    /// Profile-type filter
    pub profile_type: WildcardFilter,
    /// Location filter: centre plus radius in metres
    pub location: Option<(GpsLocation, u32)>,
}

impl ProfileQueryFilter {
    /// Whether a profile participates in the result set.
    ///
    /// Only initialized, actively hosted profiles participate at all.
    pub fn matches(&self, profile: &ProfileInfo, initialized: bool, hosting_active: bool) -> bool {
        if !initialized || !hosting_active {
            return false;
        }
        if !self.name.matches(&profile.name) {
            return false;
        }
        if !self.profile_type.matches(&profile.profile_type) {
            return false;
        }
        if let Some((centre, radius)) = &self.location {
            if profile.location.distance_to(centre) > f64::from(*radius) {
                return false;
            }
        }
        true
    }
}

/// Filters of an activity search query, normalized.
#[derive(Debug, Clone)]
pub struct ActivityQueryFilter {
    /// Activity-type filter
    pub activity_type: WildcardFilter,
    /// Upper bound on the activity start time, if any
    pub start_not_after: Option<i64>,
    /// Lower bound on the activity expiration time, if any
    pub expiration_not_before: Option<i64>,
    /// Location filter: centre plus radius in metres
    pub location: Option<(GpsLocation, u32)>,
}

impl ActivityQueryFilter {
    /// Whether an activity participates in the result set.
    ///
    /// The location check subtracts the activity's precision radius: an
    /// activity whose disc intersects the query disc matches.
    pub fn matches(&self, info: &ActivityInfo, hosting_active: bool) -> bool {
        if !hosting_active {
            return false;
        }
        if !self.activity_type.matches(&info.activity_type) {
            return false;
        }
        if let Some(threshold) = self.start_not_after {
            if info.start_time > threshold {
                return false;
            }
        }
        if let Some(threshold) = self.expiration_not_before {
            if info.expiration_time < threshold {
                return false;
            }
        }
        if let Some((centre, radius)) = &self.location {
            let distance = info.location.distance_to(centre) - f64::from(info.precision);
            if distance > f64::from(*radius) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn disabling_values_parse_to_none() {
        assert_eq!(WildcardFilter::parse(""), WildcardFilter::None);
        assert_eq!(WildcardFilter::parse("*"), WildcardFilter::None);
        assert_eq!(WildcardFilter::parse("**"), WildcardFilter::None);
    }

    #[test]
    fn star_placement_selects_mode() {
        assert_eq!(
            WildcardFilter::parse("abc"),
            WildcardFilter::Equals("abc".into())
        );
        assert_eq!(
            WildcardFilter::parse("Ab*"),
            WildcardFilter::Prefix("ab".into())
        );
        assert_eq!(
            WildcardFilter::parse("*bc"),
            WildcardFilter::Suffix("bc".into())
        );
        assert_eq!(
            WildcardFilter::parse("*b*"),
            WildcardFilter::Contains("b".into())
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(WildcardFilter::parse("I*").matches("ia00042"));
        assert!(WildcardFilter::parse("i*").matches("Ia00042"));
        assert!(WildcardFilter::parse("*TEST").matches("first test"));
        assert!(WildcardFilter::parse("HeLLo").matches("hello"));
        assert!(!WildcardFilter::parse("I*").matches("Ja00042"));
    }

    #[test]
    fn inner_stars_are_literal() {
        assert!(WildcardFilter::parse("a*c").matches("a*c"));
        assert!(!WildcardFilter::parse("a*c").matches("abc"));
    }

    proptest! {
        // For any value v and filter core c, the matcher agrees with the
        // corresponding case-insensitive string predicate.
        #[test]
        fn wildcard_laws(value in "[a-zA-Z0-9]{0,12}", core in "[a-zA-Z0-9]{1,6}") {
            let v = value.to_lowercase();
            let c = core.to_lowercase();
            prop_assert_eq!(WildcardFilter::parse(&core).matches(&value), v == c);
            prop_assert_eq!(
                WildcardFilter::parse(&format!("{core}*")).matches(&value),
                v.starts_with(&c)
            );
            prop_assert_eq!(
                WildcardFilter::parse(&format!("*{core}")).matches(&value),
                v.ends_with(&c)
            );
            prop_assert_eq!(
                WildcardFilter::parse(&format!("*{core}*")).matches(&value),
                v.contains(&c)
            );
        }

        #[test]
        fn disabled_filter_matches_everything(value in "\\PC{0,16}") {
            prop_assert!(WildcardFilter::None.matches(&value));
            prop_assert!(WildcardFilter::parse("*").matches(&value));
            prop_assert!(WildcardFilter::parse("**").matches(&value));
        }
    }
}
