use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::errors::BackendError;

/// The age bracket a user falls into. Each category owns its own
/// sequence of groups.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Child,
    Teen,
    Adult,
    Senior,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Child,
        Category::Teen,
        Category::Adult,
        Category::Senior,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Child => "child",
            Category::Teen => "teen",
            Category::Adult => "adult",
            Category::Senior => "senior",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| BackendError::InvalidCategory(s.to_owned()))
    }
}

/// Returns the age in whole years on `today` of someone born on
/// `birth`. Someone born on 29 February turns a year older on 1 March
/// in common years.
pub fn age_on(birth: Date, today: Date) -> i32 {
    let years = today.year() - birth.year();

    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years - 1
    } else {
        years
    }
}

/// Maps a birth date to its category as of `today`.
///
/// ```
/// use cohorts::category::{classify, Category};
/// use time::Date;
///
/// let birth = Date::try_from_ymd(2010, 6, 1).unwrap();
/// let today = Date::try_from_ymd(2023, 5, 31).unwrap();
/// assert_eq!(classify(birth, today), Category::Child);
/// ```
pub fn classify(birth: Date, today: Date) -> Category {
    // future birth dates are rejected before classification
    match age_on(birth, today) {
        i32::MIN..=12 => Category::Child,
        13..=17 => Category::Teen,
        18..=64 => Category::Adult,
        _ => Category::Senior,
    }
}
