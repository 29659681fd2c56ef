use chrono::{DateTime, Utc};

/// Direction of a favorites mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FavoriteOperation {
    Add,
    Remove,
}

impl FavoriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FavoriteOperation::Add => "add",
            FavoriteOperation::Remove => "remove",
        }
    }
}

/// Record of an optimistic local mutation whose remote write has not settled
/// yet.
///
/// While a mutation is pending, an incoming snapshot that disagrees with it is
/// only allowed to win when the snapshot is at least as new as the local
/// intent. The `id` is assigned from a per-engine monotonic counter when the
/// mutation is queued.
#[derive(Clone, Debug)]
pub struct PendingMutation {
    pub id: u64,
    pub item: String,
    pub operation: FavoriteOperation,
    pub issued_at: DateTime<Utc>,
}

impl PendingMutation {
    pub fn new(id: u64, item: impl Into<String>, operation: FavoriteOperation) -> Self {
        Self {
            id,
            item: item.into(),
            operation,
            issued_at: Utc::now(),
        }
    }

    /// Returns `true` when the snapshot already reflects this mutation's
    /// outcome, at which point the pending record can be dropped.
    pub fn confirmed_by(&self, favorites: &[String]) -> bool {
        let present = favorites.iter().any(|entry| *entry == self.item);
        match self.operation {
            FavoriteOperation::Add => present,
            FavoriteOperation::Remove => !present,
        }
    }

    /// Returns `true` when this local intent was issued after the given
    /// snapshot time and therefore outranks it.
    pub fn newer_than(&self, effective_time: DateTime<Utc>) -> bool {
        self.issued_at > effective_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn confirmation_follows_operation_direction() {
        let favorites = vec![String::from("line a")];

        let add = PendingMutation::new(1, "line a", FavoriteOperation::Add);
        assert!(add.confirmed_by(&favorites));

        let other_add = PendingMutation::new(2, "line b", FavoriteOperation::Add);
        assert!(!other_add.confirmed_by(&favorites));

        let remove = PendingMutation::new(3, "line a", FavoriteOperation::Remove);
        assert!(!remove.confirmed_by(&favorites));

        let other_remove = PendingMutation::new(4, "line b", FavoriteOperation::Remove);
        assert!(other_remove.confirmed_by(&favorites));
    }

    #[test]
    fn newer_than_compares_issue_time() {
        let mutation = PendingMutation::new(1, "line", FavoriteOperation::Add);
        assert!(mutation.newer_than(mutation.issued_at - Duration::seconds(1)));
        assert!(!mutation.newer_than(mutation.issued_at));
        assert!(!mutation.newer_than(mutation.issued_at + Duration::seconds(1)));
    }
}
