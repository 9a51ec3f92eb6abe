use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An object arrival notification from the object store.
///
/// Events are identified by `(bucket, name)`. The same object may be announced more than once,
/// and every announcement is processed on its own: nothing here deduplicates.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct Event {
    pub name: String,
    pub bucket: String,
    #[serde(rename = "timeCreated")]
    pub time_created: DateTime<Utc>,
}

impl Event {
    pub fn new(bucket: &str, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            bucket: bucket.to_owned(),
            time_created: Utc::now(),
        }
    }

    /// Full location of the object, beginning with `gs://`.
    pub fn full_path(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.full_path())
    }
}
