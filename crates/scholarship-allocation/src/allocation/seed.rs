use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{ApplicantProfile, Scholarship, ScholarshipId};
use super::memory::InMemoryAllocationStore;
use super::repository::RepositoryError;

/// Scholarships and applicant profiles to preload into a fresh store.
///
/// ```json
/// {
///   "scholarships": [{ "id": "sch-1", "title": "...", "total_slots": 2, ... }],
///   "profiles": [{ "applicant_id": "stu-1", "gpa": 3.6 }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedCatalog {
    #[serde(default)]
    pub scholarships: Vec<Scholarship>,
    #[serde(default)]
    pub profiles: Vec<ApplicantProfile>,
}

impl SeedCatalog {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SeedError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Register every scholarship (counter at full capacity) and profile.
    ///
    /// Windows are checked before anything is registered, so a refused
    /// catalog leaves the store untouched.
    pub fn load_into(&self, store: &InMemoryAllocationStore) -> Result<(), SeedError> {
        if let Some(scholarship) = self
            .scholarships
            .iter()
            .find(|scholarship| scholarship.window.start_date > scholarship.window.end_date)
        {
            return Err(SeedError::InvalidWindow {
                scholarship_id: scholarship.id.clone(),
                start_date: scholarship.window.start_date,
                end_date: scholarship.window.end_date,
            });
        }

        for scholarship in &self.scholarships {
            store
                .register_scholarship(scholarship.clone())
                .map_err(|source| SeedError::Store {
                    record: scholarship.id.to_string(),
                    source,
                })?;
        }
        for profile in &self.profiles {
            store
                .register_profile(profile.clone())
                .map_err(|source| SeedError::Store {
                    record: profile.applicant_id.to_string(),
                    source,
                })?;
        }

        info!(
            scholarships = self.scholarships.len(),
            profiles = self.profiles.len(),
            "seed catalog loaded"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to open seed catalog {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("seed catalog is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("scholarship {scholarship_id} window starts {start_date} after it ends {end_date}")]
    InvalidWindow {
        scholarship_id: ScholarshipId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    #[error("could not register {record}: {source}")]
    Store {
        record: String,
        #[source]
        source: RepositoryError,
    },
}
