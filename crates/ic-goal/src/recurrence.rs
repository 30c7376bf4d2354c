// recurrence.rs — RecurrenceRule: when a goal is due.
//
// Exactly one rule is active per goal. The kinds form a closed enum
// rather than a frequency string, so the cadence evaluator gets
// compile-time coverage of every variant.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::GoalError;

/// A goal's recurrence rule.
///
/// The `#[serde(tag = "kind")]` attribute makes this serialize as
/// `{"kind": "weekly", "weekdays": [...]}` — one tagged object per
/// variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Due every date within the goal's active range.
    Daily,

    /// Due on the named weekdays (e.g., every Monday and Thursday).
    /// A set: duplicates collapse and order carries no meaning.
    Weekly { weekdays: HashSet<Weekday> },

    /// Due until `target_count` obligations are completed within the
    /// calendar week (Monday through Sunday) containing the date.
    CountBased { target_count: u32 },

    /// Due only on an explicit set of dates.
    SpecificDates { dates: BTreeSet<NaiveDate> },
}

impl RecurrenceRule {
    /// Check that the rule carries the fields its kind requires.
    pub fn validate(&self) -> Result<(), GoalError> {
        match self {
            RecurrenceRule::Daily => Ok(()),
            RecurrenceRule::Weekly { weekdays } => {
                if weekdays.is_empty() {
                    return Err(GoalError::MalformedRule(
                        "weekly rule requires at least one weekday".to_string(),
                    ));
                }
                Ok(())
            }
            RecurrenceRule::CountBased { target_count } => {
                if *target_count == 0 {
                    return Err(GoalError::MalformedRule(
                        "count-based rule requires target_count >= 1".to_string(),
                    ));
                }
                Ok(())
            }
            RecurrenceRule::SpecificDates { dates } => {
                if dates.is_empty() {
                    return Err(GoalError::MalformedRule(
                        "specific-dates rule requires at least one date".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecurrenceRule::Daily => write!(f, "daily"),
            RecurrenceRule::Weekly { .. } => write!(f, "weekly"),
            RecurrenceRule::CountBased { .. } => write!(f, "count_based"),
            RecurrenceRule::SpecificDates { .. } => write!(f, "specific_dates"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_is_always_valid() {
        assert!(RecurrenceRule::Daily.validate().is_ok());
    }

    #[test]
    fn weekly_without_weekdays_is_malformed() {
        let rule = RecurrenceRule::Weekly {
            weekdays: HashSet::new(),
        };
        assert!(matches!(rule.validate(), Err(GoalError::MalformedRule(_))));
    }

    #[test]
    fn weekly_weekdays_deduplicate_on_deserialize() {
        let rule: RecurrenceRule =
            serde_json::from_str(r#"{"kind":"weekly","weekdays":["Mon","Thu","Mon"]}"#).unwrap();
        let RecurrenceRule::Weekly { weekdays } = rule else {
            panic!("expected weekly");
        };
        assert_eq!(weekdays, HashSet::from([Weekday::Mon, Weekday::Thu]));
    }

    #[test]
    fn count_based_target_zero_is_malformed() {
        let rule = RecurrenceRule::CountBased { target_count: 0 };
        assert!(matches!(rule.validate(), Err(GoalError::MalformedRule(_))));
    }

    #[test]
    fn specific_dates_empty_is_malformed() {
        let rule = RecurrenceRule::SpecificDates {
            dates: BTreeSet::new(),
        };
        assert!(matches!(rule.validate(), Err(GoalError::MalformedRule(_))));
    }

    #[test]
    fn serialization_is_tagged_by_kind() {
        let rule = RecurrenceRule::Weekly {
            weekdays: HashSet::from([Weekday::Mon, Weekday::Thu]),
        };
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"kind\":\"weekly\""));

        let restored: RecurrenceRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, restored);
    }

    #[test]
    fn display_names_match_tags() {
        assert_eq!(RecurrenceRule::Daily.to_string(), "daily");
        assert_eq!(
            RecurrenceRule::CountBased { target_count: 2 }.to_string(),
            "count_based"
        );
    }
}
