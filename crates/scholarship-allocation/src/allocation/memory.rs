use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use super::domain::{
    ApplicantId, ApplicantProfile, Application, ApplicationId, Scholarship, ScholarshipId,
    SlotCounter,
};
use super::repository::{
    AllocationNotice, ApplicationRepository, AuditEntry, AuditLog, NotificationError,
    NotificationSink, ProfileDirectory, RepositoryError, ScholarshipRepository,
};

struct ScholarshipEntry {
    metadata: Scholarship,
    slots: Arc<Mutex<SlotCounter>>,
}

#[derive(Default)]
struct ApplicationTable {
    records: HashMap<ApplicationId, Application>,
    active: HashMap<(ScholarshipId, ApplicantId), ApplicationId>,
}

/// Process-local store used by the service binary, the demo, and tests.
///
/// Each scholarship's counter sits behind its own mutex; the outer map lock is
/// only held long enough to clone the counter handle.
#[derive(Default)]
pub struct InMemoryAllocationStore {
    scholarships: RwLock<HashMap<ScholarshipId, ScholarshipEntry>>,
    applications: Mutex<ApplicationTable>,
    audit: Mutex<HashMap<ApplicationId, Vec<AuditEntry>>>,
    profiles: RwLock<HashMap<ApplicantId, ApplicantProfile>>,
}

fn poisoned(what: &str) -> RepositoryError {
    RepositoryError::Unavailable(format!("{what} lock poisoned"))
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, RepositoryError> {
    mutex.lock().map_err(|_| poisoned(what))
}

impl InMemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scholarship and its counter at `available = total_slots`.
    pub fn register_scholarship(&self, scholarship: Scholarship) -> Result<(), RepositoryError> {
        let mut guard = self
            .scholarships
            .write()
            .map_err(|_| poisoned("scholarship"))?;
        if guard.contains_key(&scholarship.id) {
            return Err(RepositoryError::Conflict);
        }
        let counter = SlotCounter::fresh(scholarship.id.clone(), scholarship.total_slots);
        guard.insert(
            scholarship.id.clone(),
            ScholarshipEntry {
                metadata: scholarship,
                slots: Arc::new(Mutex::new(counter)),
            },
        );
        Ok(())
    }

    /// Replace metadata (status, window, criteria...). The counter is left alone
    /// and `total_slots` cannot change after creation.
    pub fn update_scholarship(&self, scholarship: Scholarship) -> Result<(), RepositoryError> {
        let mut guard = self
            .scholarships
            .write()
            .map_err(|_| poisoned("scholarship"))?;
        let entry = guard
            .get_mut(&scholarship.id)
            .ok_or(RepositoryError::NotFound)?;
        if entry.metadata.total_slots != scholarship.total_slots {
            return Err(RepositoryError::Constraint(
                "total_slots is fixed at creation".to_string(),
            ));
        }
        entry.metadata = scholarship;
        Ok(())
    }

    pub fn register_profile(&self, profile: ApplicantProfile) -> Result<(), RepositoryError> {
        let mut guard = self.profiles.write().map_err(|_| poisoned("profile"))?;
        guard.insert(profile.applicant_id.clone(), profile);
        Ok(())
    }

    fn counter_handle(
        &self,
        id: &ScholarshipId,
    ) -> Result<Option<Arc<Mutex<SlotCounter>>>, RepositoryError> {
        let guard = self
            .scholarships
            .read()
            .map_err(|_| poisoned("scholarship"))?;
        Ok(guard.get(id).map(|entry| Arc::clone(&entry.slots)))
    }
}

impl ApplicationRepository for InMemoryAllocationStore {
    fn insert(&self, mut record: Application) -> Result<Application, RepositoryError> {
        let mut table = lock(&self.applications, "application")?;
        if table.records.contains_key(&record.id) {
            return Err(RepositoryError::Conflict);
        }
        let pair = (record.scholarship_id.clone(), record.applicant_id.clone());
        if record.is_active() && table.active.contains_key(&pair) {
            return Err(RepositoryError::Conflict);
        }

        record.version = 1;
        if record.is_active() {
            table.active.insert(pair, record.id.clone());
        }
        table.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(&self, mut record: Application) -> Result<Application, RepositoryError> {
        let mut table = lock(&self.applications, "application")?;
        let stored = table
            .records
            .get(&record.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != record.version {
            return Err(RepositoryError::VersionConflict);
        }

        record.version += 1;
        if !record.is_active() {
            let pair = (record.scholarship_id.clone(), record.applicant_id.clone());
            if table.active.get(&pair) == Some(&record.id) {
                table.active.remove(&pair);
            }
        }
        table.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let table = lock(&self.applications, "application")?;
        Ok(table.records.get(id).cloned())
    }

    fn find_active(
        &self,
        scholarship_id: &ScholarshipId,
        applicant_id: &ApplicantId,
    ) -> Result<Option<Application>, RepositoryError> {
        let table = lock(&self.applications, "application")?;
        let pair = (scholarship_id.clone(), applicant_id.clone());
        Ok(table
            .active
            .get(&pair)
            .and_then(|id| table.records.get(id))
            .cloned())
    }

    fn list_for_scholarship(
        &self,
        scholarship_id: &ScholarshipId,
    ) -> Result<Vec<Application>, RepositoryError> {
        let table = lock(&self.applications, "application")?;
        let mut records: Vec<Application> = table
            .records
            .values()
            .filter(|record| &record.scholarship_id == scholarship_id)
            .cloned()
            .collect();
        records.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(records)
    }
}

impl ScholarshipRepository for InMemoryAllocationStore {
    fn scholarship(&self, id: &ScholarshipId) -> Result<Option<Scholarship>, RepositoryError> {
        let guard = self
            .scholarships
            .read()
            .map_err(|_| poisoned("scholarship"))?;
        Ok(guard.get(id).map(|entry| entry.metadata.clone()))
    }

    fn slots(&self, id: &ScholarshipId) -> Result<Option<SlotCounter>, RepositoryError> {
        let Some(handle) = self.counter_handle(id)? else {
            return Ok(None);
        };
        let counter = lock(&handle, "slot counter")?.clone();
        Ok(Some(counter))
    }

    fn swap_slots(
        &self,
        expected: &SlotCounter,
        available: u32,
    ) -> Result<SlotCounter, RepositoryError> {
        let handle = self
            .counter_handle(&expected.scholarship_id)?
            .ok_or(RepositoryError::NotFound)?;
        let mut counter = lock(&handle, "slot counter")?;
        if counter.version != expected.version {
            return Err(RepositoryError::VersionConflict);
        }
        if available > counter.total {
            return Err(RepositoryError::Constraint(format!(
                "available {available} exceeds total {}",
                counter.total
            )));
        }

        counter.available = available;
        counter.version += 1;
        Ok(counter.clone())
    }
}

impl AuditLog for InMemoryAllocationStore {
    fn append(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.audit, "audit")?;
        guard
            .entry(entry.application_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    fn history(&self, id: &ApplicationId) -> Result<Vec<AuditEntry>, RepositoryError> {
        let guard = lock(&self.audit, "audit")?;
        Ok(guard.get(id).cloned().unwrap_or_default())
    }
}

impl ProfileDirectory for InMemoryAllocationStore {
    fn profile(&self, id: &ApplicantId) -> Result<Option<ApplicantProfile>, RepositoryError> {
        let guard = self.profiles.read().map_err(|_| poisoned("profile"))?;
        Ok(guard.get(id).cloned())
    }
}

/// Collects notices in memory so callers can inspect what would have been sent.
#[derive(Default, Clone)]
pub struct InMemoryNotificationSink {
    events: Arc<Mutex<Vec<AllocationNotice>>>,
}

impl InMemoryNotificationSink {
    pub fn events(&self) -> Vec<AllocationNotice> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn publish(&self, notice: AllocationNotice) -> Result<(), NotificationError> {
        self.events
            .lock()
            .map_err(|_| NotificationError::Transport("notification lock poisoned".to_string()))?
            .push(notice);
        Ok(())
    }
}
