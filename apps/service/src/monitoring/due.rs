use chrono::{DateTime, TimeDelta, Utc};

use crate::database::models::{CheckRecord, Target};

/// Whether `target` should be probed at `now`.
///
/// A target that has never been checked is always due. Otherwise it is due
/// once its interval has fully elapsed since the latest record.
pub fn is_due(target: &Target, latest: Option<&CheckRecord>, now: DateTime<Utc>) -> bool {
    match latest {
        None => true,
        Some(record) => {
            now - record.checked_at >= TimeDelta::seconds(i64::from(target.check_interval_seconds))
        }
    }
}
