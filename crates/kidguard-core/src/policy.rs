use anyhow::Result;
use kidguard_storage::{ClassificationRecord, ClassificationResult, Database};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Applications denied while restricted mode is on
///
/// Loaded once from configuration and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockList(BTreeSet<String>);

impl BlockList {
    #[must_use]
    pub fn contains(&self, app_id: &str) -> bool {
        self.0.contains(app_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for BlockList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(Into::into)
                .map(|s: String| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }
}

/// Consistent view of the policy at one instant
#[derive(Debug, Clone)]
pub struct PolicyState {
    pub latest_result: Option<ClassificationResult>,
    pub restricted_mode: bool,
    pub blocked_set: Arc<BlockList>,
}

impl PolicyState {
    /// Whether a transition to `app_id` must be denied
    #[must_use]
    pub fn blocks(&self, app_id: &str) -> bool {
        self.restricted_mode && self.blocked_set.contains(app_id)
    }
}

/// Durable policy state shared by the classification pipeline (the only
/// writer) and any number of readers
#[derive(Clone)]
pub struct PolicyStore {
    database: Arc<Database>,
    blocked_set: Arc<BlockList>,
}

impl PolicyStore {
    #[must_use]
    pub fn new(database: Arc<Database>, blocked_set: BlockList) -> Self {
        Self {
            database,
            blocked_set: Arc::new(blocked_set),
        }
    }

    /// Commit a new classification and the restricted-mode flag derived from it
    ///
    /// # Errors
    ///
    /// Returns an error if the database transaction fails
    pub fn record(&self, owner: Option<&str>, result: &ClassificationResult) -> Result<PolicyState> {
        let record = self.database.record_classification(owner, result)?;
        Ok(PolicyState {
            latest_result: record.latest_result,
            restricted_mode: record.restricted_mode,
            blocked_set: Arc::clone(&self.blocked_set),
        })
    }

    /// Read the last committed policy
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn read(&self) -> Result<PolicyState> {
        let record = self.database.get_policy_record()?;
        Ok(PolicyState {
            latest_result: record.latest_result,
            restricted_mode: record.restricted_mode,
            blocked_set: Arc::clone(&self.blocked_set),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn history(&self, limit: usize) -> Result<Vec<ClassificationRecord>> {
        self.database.get_classification_history(limit)
    }

    /// Return to the unrestricted default
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub fn clear(&self) -> Result<()> {
        self.database.clear_policy()
    }

    #[must_use]
    pub fn blocked_set(&self) -> &BlockList {
        &self.blocked_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kidguard_storage::Label;

    fn store(apps: &[&str]) -> PolicyStore {
        PolicyStore::new(
            Arc::new(Database::open_in_memory().unwrap()),
            apps.iter().copied().collect(),
        )
    }

    #[test]
    fn test_block_list_trims_and_skips_blank() {
        let list: BlockList = vec!["  com.a ", "", "com.b"].into_iter().collect();
        assert_eq!(list.len(), 2);
        assert!(list.contains("com.a"));
        assert!(!list.contains(""));
    }

    #[test]
    fn test_default_read_is_unrestricted() {
        let state = store(&["com.a"]).read().unwrap();
        assert!(state.latest_result.is_none());
        assert!(!state.restricted_mode);
        assert!(!state.blocks("com.a"));
    }

    #[test]
    fn test_record_kid_blocks_listed_apps_only() {
        let store = store(&["com.a"]);
        store
            .record(Some("alice"), &ClassificationResult::new(0.2, Utc::now()))
            .unwrap();

        let state = store.read().unwrap();
        assert!(state.restricted_mode);
        assert_eq!(state.latest_result.unwrap().label(), Label::Kid);
        assert!(state.blocks("com.a"));
        assert!(!state.blocks("com.b"));
    }

    #[test]
    fn test_clear_lifts_restriction() {
        let store = store(&["com.a"]);
        store
            .record(None, &ClassificationResult::new(0.1, Utc::now()))
            .unwrap();
        store.clear().unwrap();
        assert!(!store.read().unwrap().blocks("com.a"));
        assert_eq!(store.history(5).unwrap().len(), 1);
    }
}
