use serde::Serialize;
use time::OffsetDateTime;

use crate::category::Category;
use crate::user::Times;

/// The number of users a single group can hold.
pub const GROUP_CAPACITY: i32 = 3;

/// A bucket of users sharing a category, e.g. `adult-2`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Group {
    /// `<base>-<index>`.
    pub(crate) name: String,

    pub(crate) base: Category,

    /// Position in the category's sequence, starting at 1.
    pub(crate) index: i32,

    pub(crate) capacity: i32,

    pub(crate) member_count: i32,

    #[serde(flatten)]
    pub(crate) times: Times,
}

impl Group {
    pub fn new(
        name: String,
        base: Category,
        index: i32,
        capacity: i32,
        member_count: i32,
        times: Times,
    ) -> Self {
        Group {
            name,
            base,
            index,
            capacity,
            member_count,
            times,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> Category {
        self.base
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn capacity(&self) -> i32 {
        self.capacity
    }

    pub fn member_count(&self) -> i32 {
        self.member_count
    }

    pub fn has_room(&self) -> bool {
        self.member_count < self.capacity
    }
}

/// A group about to be inserted.
#[derive(Clone, Debug)]
pub struct NewGroup {
    pub(crate) name: String,
    pub(crate) base: Category,
    pub(crate) index: i32,
    pub(crate) capacity: i32,
}

impl NewGroup {
    pub fn new(base: Category, index: i32, capacity: i32) -> Self {
        NewGroup {
            name: group_name(base, index),
            base,
            index,
            capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Materializes the group as freshly inserted at `now`.
    pub fn into_group(self, now: OffsetDateTime) -> Group {
        Group::new(
            self.name,
            self.base,
            self.index,
            self.capacity,
            0,
            Times::at(now),
        )
    }
}

/// Formats the name of the `index`th group of `base`.
pub fn group_name(base: Category, index: i32) -> String {
    format!("{}-{}", base, index)
}
