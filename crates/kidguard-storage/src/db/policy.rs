use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::helpers::{parse_datetime, parse_label, parse_uuid};
use super::Database;
use crate::models::{ClassificationRecord, ClassificationResult, PolicyRecord};

impl Database {
    /// Record a new classification as the current policy
    ///
    /// `latest_result` and `restricted_mode` are written as one row inside a
    /// single transaction, together with the history entry. A crash before
    /// commit leaves the previous policy untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails
    pub fn record_classification(
        &self,
        owner: Option<&str>,
        result: &ClassificationResult,
    ) -> Result<PolicyRecord> {
        let record = PolicyRecord::from_result(*result);
        let history = ClassificationRecord::new(owner.map(str::to_string), *result);

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .context("Failed to begin policy transaction")?;

        tx.execute(
            "INSERT INTO policy_state (id, probability, label, decided_at, restricted_mode, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                probability = ?1,
                label = ?2,
                decided_at = ?3,
                restricted_mode = ?4,
                updated_at = ?5",
            params![
                f64::from(result.probability()),
                result.label().as_str(),
                result.decided_at().to_rfc3339(),
                i32::from(record.restricted_mode),
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.execute(
            "INSERT INTO classifications (id, owner, probability, label, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                history.id.to_string(),
                history.owner,
                f64::from(result.probability()),
                result.label().as_str(),
                result.decided_at().to_rfc3339(),
            ],
        )?;

        tx.commit().context("Failed to commit policy transaction")?;

        log::debug!(
            "Recorded policy: label={} probability={:.4} restricted_mode={}",
            result.label(),
            result.probability(),
            record.restricted_mode
        );
        Ok(record)
    }

    /// Read the current policy record
    ///
    /// Returns the default (no result, not restricted) when nothing has been
    /// recorded yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub fn get_policy_record(&self) -> Result<PolicyRecord> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT probability, label, decided_at, restricted_mode FROM policy_state WHERE id = 1",
                [],
                |row| {
                    let probability: Option<f64> = row.get(0)?;
                    let label = row
                        .get::<_, Option<String>>(1)?
                        .map(|s| parse_label(&s))
                        .transpose()?;
                    let decided_at = row
                        .get::<_, Option<String>>(2)?
                        .map(|s| parse_datetime(&s))
                        .transpose()?;
                    let restricted_mode = row.get::<_, i32>(3)? != 0;
                    Ok((probability, label, decided_at, restricted_mode))
                },
            )
            .optional()?;

        let Some((probability, stored_label, decided_at, stored_restricted)) = row else {
            return Ok(PolicyRecord::default());
        };

        let latest_result = match (probability, decided_at) {
            (Some(p), Some(at)) => Some(ClassificationResult::new(narrow(p), at)),
            _ => None,
        };

        let record = match latest_result {
            Some(result) => {
                if stored_label != Some(result.label()) {
                    log::warn!(
                        "Stored policy label ({}) disagrees with its probability; using {}",
                        stored_label.map_or("none", |l| l.as_str()),
                        result.label()
                    );
                }
                PolicyRecord::from_result(result)
            }
            None => PolicyRecord::default(),
        };

        if record.restricted_mode != stored_restricted {
            log::warn!(
                "Stored restricted_mode ({stored_restricted}) disagrees with stored result; using derived value ({})",
                record.restricted_mode
            );
        }

        Ok(record)
    }

    /// Reset the policy to its default (no result, not restricted)
    ///
    /// History is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub fn clear_policy(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO policy_state (id, probability, label, decided_at, restricted_mode, updated_at)
             VALUES (1, NULL, NULL, NULL, 0, ?1)
             ON CONFLICT(id) DO UPDATE SET
                probability = NULL,
                label = NULL,
                decided_at = NULL,
                restricted_mode = 0,
                updated_at = ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        log::info!("Policy state cleared");
        Ok(())
    }

    /// Get the most recent classifications, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a row is corrupted
    pub fn get_classification_history(&self, limit: usize) -> Result<Vec<ClassificationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, owner, probability, label, decided_at
             FROM classifications
             ORDER BY decided_at DESC, rowid DESC
             LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(params![limit], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ClassificationRecord> {
    let result = ClassificationResult::new(
        narrow(row.get(2)?),
        parse_datetime(&row.get::<_, String>(4)?)?,
    );
    let label = parse_label(&row.get::<_, String>(3)?)?;
    if label != result.label() {
        log::warn!("History row label {label} disagrees with its probability");
    }

    Ok(ClassificationRecord {
        id: parse_uuid(&row.get::<_, String>(0)?)?,
        owner: row.get(1)?,
        result,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn narrow(value: f64) -> f32 {
    value as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_empty_database_returns_default_policy() {
        let db = Database::open_in_memory().unwrap();
        let record = db.get_policy_record().unwrap();
        assert!(record.latest_result.is_none());
        assert!(!record.restricted_mode);
    }

    #[test]
    fn test_record_kid_sets_restricted_mode() {
        let db = Database::open_in_memory().unwrap();
        let result = ClassificationResult::new(0.2, Utc::now());

        let written = db.record_classification(Some("alice"), &result).unwrap();
        assert!(written.restricted_mode);

        let read = db.get_policy_record().unwrap();
        assert!(read.restricted_mode);
        assert_eq!(read.latest_result.unwrap().label(), Label::Kid);
        assert!(read.is_consistent());
    }

    #[test]
    fn test_later_adult_result_lifts_restriction() {
        let db = Database::open_in_memory().unwrap();
        db.record_classification(None, &ClassificationResult::new(0.1, Utc::now()))
            .unwrap();
        db.record_classification(None, &ClassificationResult::new(0.8, Utc::now()))
            .unwrap();

        let read = db.get_policy_record().unwrap();
        assert!(!read.restricted_mode);
        assert_eq!(read.latest_result.unwrap().label(), Label::Adult);
    }

    #[test]
    fn test_stored_result_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let decided_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let result = ClassificationResult::new(0.375, decided_at);
        db.record_classification(None, &result).unwrap();

        let read = db.get_policy_record().unwrap().latest_result.unwrap();
        assert_eq!(read, result);
    }

    #[test]
    fn test_stored_label_is_cross_checked_against_probability() {
        let db = Database::open_in_memory().unwrap();
        db.record_classification(None, &ClassificationResult::new(0.2, Utc::now()))
            .unwrap();

        db.conn()
            .unwrap()
            .execute("UPDATE policy_state SET label = 'Adult' WHERE id = 1", [])
            .unwrap();
        let read = db.get_policy_record().unwrap();
        assert_eq!(read.latest_result.unwrap().label(), Label::Kid);
        assert!(read.restricted_mode);

        db.conn()
            .unwrap()
            .execute("UPDATE policy_state SET label = 'toddler' WHERE id = 1", [])
            .unwrap();
        assert!(db.get_policy_record().is_err());
    }

    #[test]
    fn test_clear_policy_resets_to_default() {
        let db = Database::open_in_memory().unwrap();
        db.record_classification(None, &ClassificationResult::new(0.3, Utc::now()))
            .unwrap();
        db.clear_policy().unwrap();

        assert_eq!(db.get_policy_record().unwrap(), PolicyRecord::default());
        assert_eq!(db.get_classification_history(10).unwrap().len(), 1);
    }

    #[test]
    fn test_history_is_newest_first_and_limited() {
        let db = Database::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        for i in 0..5 {
            let result = ClassificationResult::new(0.1 * i as f32, base + Duration::minutes(i));
            db.record_classification(Some("bob"), &result).unwrap();
        }

        let history = db.get_classification_history(3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].result.decided_at(), base + Duration::minutes(4));
        assert_eq!(history[2].result.decided_at(), base + Duration::minutes(2));
        assert_eq!(history[0].owner.as_deref(), Some("bob"));
    }

    #[test]
    fn test_policy_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kidguard.db");

        {
            let db = Database::new(Some(path.clone())).unwrap();
            db.record_classification(Some("alice"), &ClassificationResult::new(0.2, Utc::now()))
                .unwrap();
        }

        let reopened = Database::new(Some(path)).unwrap();
        let record = reopened.get_policy_record().unwrap();
        assert!(record.restricted_mode);
        assert_eq!(record.latest_result.unwrap().label(), Label::Kid);
    }

    #[test]
    fn test_concurrent_records_never_expose_inconsistent_state() {
        use std::sync::Arc;
        use std::thread;

        let db = Arc::new(Database::open_in_memory().unwrap());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    for j in 0..25 {
                        let p = if (i + j) % 2 == 0 { 0.2 } else { 0.9 };
                        db.record_classification(None, &ClassificationResult::new(p, Utc::now()))
                            .unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for _ in 0..100 {
                    assert!(db.get_policy_record().unwrap().is_consistent());
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(db.get_classification_history(1000).unwrap().len(), 100);
    }
}
