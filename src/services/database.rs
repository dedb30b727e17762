use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::device::{DeviceInfo, DeviceRecord};

/// Storage-layer failures. `Conflict` is the uniqueness constraint firing;
/// everything else is an unexpected persistence failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("time slot {0} is already booked")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Io(String),
}

// Row stored in appointments.csv
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppointmentRecord {
    pub timeslot: String,
    pub phone_number: String,
    pub invoice_id: Option<String>,
    pub payment_trans_id: Option<String>,
    pub created_at: String, // ISO format
}

// Per-slot result of a batch insert
#[derive(Debug, Clone)]
pub struct BatchInsertOutcome {
    pub booked: Vec<String>,
    pub conflicts: Vec<String>,
}

/// Database service holding the appointment ledger and the device registry.
///
/// Each store is a CSV file guarded by its own mutex. The ledger's
/// uniqueness invariant (at most one appointment per time slot) is enforced
/// here, inside the locked insert, so concurrent attempts for the same slot
/// are decided by the storage layer and not by any handler-level pre-check.
pub struct DatabaseService {
    appointments_path: String,
    devices_path: String,
    appointments_mutex: Mutex<()>,
    devices_mutex: Mutex<()>,
}

const APPOINTMENT_HEADERS: [&str; 5] = [
    "timeslot",
    "phone_number",
    "invoice_id",
    "payment_trans_id",
    "created_at",
];

const DEVICE_HEADERS: [&str; 5] = [
    "device_id",
    "phone_number",
    "user_agent",
    "last_login_ip",
    "last_activity_time",
];

impl DatabaseService {
    pub fn new(data_dir: &str) -> Self {
        let appointments_path = PathBuf::from(data_dir).join("appointments.csv");
        let devices_path = PathBuf::from(data_dir).join("user_devices.csv");

        ensure_store(&appointments_path, &APPOINTMENT_HEADERS);
        ensure_store(&devices_path, &DEVICE_HEADERS);

        Self {
            appointments_path: appointments_path.to_string_lossy().into_owned(),
            devices_path: devices_path.to_string_lossy().into_owned(),
            appointments_mutex: Mutex::new(()),
            devices_mutex: Mutex::new(()),
        }
    }

    fn lock_appointments(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.appointments_mutex
            .lock()
            .map_err(|e| StorageError::Io(format!("failed to acquire ledger mutex: {}", e)))
    }

    fn lock_devices(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.devices_mutex
            .lock()
            .map_err(|e| StorageError::Io(format!("failed to acquire device mutex: {}", e)))
    }

    // Load every appointment row. Caller must hold the ledger mutex.
    fn load_appointments(&self) -> Result<Vec<AppointmentRecord>, StorageError> {
        let file = File::open(&self.appointments_path)
            .map_err(|e| StorageError::Io(format!("failed to open appointment ledger: {}", e)))?;

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: AppointmentRecord = result
                .map_err(|e| StorageError::Io(format!("failed to read appointment row: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }

    // Load every device row. Caller must hold the device mutex.
    fn load_devices(&self) -> Result<Vec<DeviceRecord>, StorageError> {
        let file = File::open(&self.devices_path)
            .map_err(|e| StorageError::Io(format!("failed to open device registry: {}", e)))?;

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: DeviceRecord = result
                .map_err(|e| StorageError::Io(format!("failed to read device row: {}", e)))?;
            records.push(record);
        }
        Ok(records)
    }

    // Rewrite the device registry in full. Caller must hold the device mutex.
    fn write_devices(&self, records: &[DeviceRecord]) -> Result<(), StorageError> {
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.devices_path)
            .map_err(|e| {
                StorageError::Io(format!("failed to open device registry for writing: {}", e))
            })?;

        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| StorageError::Io(format!("failed to write device row: {}", e)))?;
        }
        writer
            .flush()
            .map_err(|e| StorageError::Io(format!("failed to flush device registry: {}", e)))
    }

    /// Every booked time slot, as a set of canonical slot strings. Used for
    /// display filtering and for the pre-insert conflict check.
    pub fn list_booked(&self) -> Result<HashSet<String>, StorageError> {
        let _lock = self.lock_appointments()?;
        Ok(self
            .load_appointments()?
            .into_iter()
            .map(|record| record.timeslot)
            .collect())
    }

    /// Insert a batch of appointments for one phone number.
    ///
    /// The whole batch runs under a single lock acquisition: the booked set
    /// is read once, every still-free slot is appended, and one flush
    /// commits them together. Slots already taken (or repeated within the
    /// batch) come back in `conflicts`; under concurrent attempts for the
    /// same slot exactly one caller gets it.
    pub fn insert_appointments(
        &self,
        timeslots: &[String],
        phone_number: &str,
        invoice_id: Option<&str>,
        payment_trans_id: Option<&str>,
    ) -> Result<BatchInsertOutcome, StorageError> {
        let _lock = self.lock_appointments()?;

        let mut taken: HashSet<String> = self
            .load_appointments()?
            .into_iter()
            .map(|record| record.timeslot)
            .collect();

        let file = OpenOptions::new()
            .append(true)
            .open(&self.appointments_path)
            .map_err(|e| {
                StorageError::Io(format!("failed to open appointment ledger for append: {}", e))
            })?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

        let now = Utc::now().to_rfc3339();
        let mut outcome = BatchInsertOutcome {
            booked: Vec::new(),
            conflicts: Vec::new(),
        };

        for timeslot in timeslots {
            if taken.contains(timeslot) {
                warn!(
                    "Rejected booking of {} for {}: slot already taken",
                    timeslot, phone_number
                );
                outcome.conflicts.push(timeslot.clone());
                continue;
            }

            let record = AppointmentRecord {
                timeslot: timeslot.clone(),
                phone_number: phone_number.to_string(),
                invoice_id: invoice_id.map(str::to_string),
                payment_trans_id: payment_trans_id.map(str::to_string),
                created_at: now.clone(),
            };
            writer.serialize(&record).map_err(|e| {
                error!(
                    "Failed to write appointment {} for {}: {}",
                    timeslot, phone_number, e
                );
                StorageError::Io(format!("failed to write appointment row: {}", e))
            })?;
            taken.insert(timeslot.clone());
            outcome.booked.push(timeslot.clone());
        }

        if !outcome.booked.is_empty() {
            writer
                .flush()
                .map_err(|e| StorageError::Io(format!("failed to flush ledger: {}", e)))?;
            info!(
                "Booked {} slot(s) for {} ({} conflict(s))",
                outcome.booked.len(),
                phone_number,
                outcome.conflicts.len()
            );
        }

        Ok(outcome)
    }

    /// Insert a single appointment, failing with `Conflict` when the slot is
    /// already taken.
    pub fn insert_appointment(
        &self,
        timeslot: &str,
        phone_number: &str,
        invoice_id: Option<&str>,
        payment_trans_id: Option<&str>,
    ) -> Result<(), StorageError> {
        let slots = [timeslot.to_string()];
        let outcome =
            self.insert_appointments(&slots, phone_number, invoice_id, payment_trans_id)?;
        if outcome.booked.is_empty() {
            return Err(StorageError::Conflict(timeslot.to_string()));
        }
        Ok(())
    }

    /// All appointments for a phone number, chronologically ordered.
    pub fn list_for_phone(&self, phone_number: &str) -> Result<Vec<AppointmentRecord>, StorageError> {
        let _lock = self.lock_appointments()?;
        let mut records: Vec<AppointmentRecord> = self
            .load_appointments()?
            .into_iter()
            .filter(|record| record.phone_number == phone_number)
            .collect();
        // Canonical slot strings sort chronologically
        records.sort_by(|a, b| a.timeslot.cmp(&b.timeslot));
        Ok(records)
    }

    /// Bind a device to a phone number, bidirectionally and last-write-wins:
    /// any prior row holding either side of the pair is evicted before the
    /// merged row is appended. A missing IP carries the phone's previous IP
    /// forward.
    pub fn upsert_device_binding(
        &self,
        phone_number: &str,
        device_id: &str,
        user_agent: &str,
        last_login_ip: Option<&str>,
    ) -> Result<(), StorageError> {
        let _lock = self.lock_devices()?;

        let mut records = self.load_devices()?;
        let carried_ip = match last_login_ip {
            Some(ip) => Some(ip.to_string()),
            None => records
                .iter()
                .find(|record| record.phone_number == phone_number)
                .and_then(|record| record.last_login_ip.clone()),
        };

        records.retain(|record| {
            record.phone_number != phone_number && record.device_id != device_id
        });
        records.push(DeviceRecord {
            device_id: device_id.to_string(),
            phone_number: phone_number.to_string(),
            user_agent: user_agent.to_string(),
            last_login_ip: carried_ip,
            last_activity_time: Utc::now().to_rfc3339(),
        });

        self.write_devices(&records)?;
        info!("Bound device {} to phone {}", device_id, phone_number);
        Ok(())
    }

    /// Phone number bound to a device token, if any.
    pub fn find_phone_by_device(&self, device_id: &str) -> Result<Option<String>, StorageError> {
        let _lock = self.lock_devices()?;
        Ok(self
            .load_devices()?
            .into_iter()
            .find(|record| record.device_id == device_id)
            .map(|record| record.phone_number))
    }

    /// Bound-device view for the appointments page.
    pub fn find_device_for_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<DeviceInfo>, StorageError> {
        let _lock = self.lock_devices()?;
        Ok(self
            .load_devices()?
            .into_iter()
            .find(|record| record.phone_number == phone_number)
            .map(|record| DeviceInfo {
                user_agent: record.user_agent,
                ip_address: record.last_login_ip,
            }))
    }

    /// Refresh a device's last-activity time and IP after an auto-login.
    pub fn touch_device_activity(
        &self,
        device_id: &str,
        last_login_ip: Option<&str>,
    ) -> Result<(), StorageError> {
        let _lock = self.lock_devices()?;

        let mut records = self.load_devices()?;
        let mut found = false;
        for record in records.iter_mut() {
            if record.device_id == device_id {
                record.last_activity_time = Utc::now().to_rfc3339();
                if let Some(ip) = last_login_ip {
                    record.last_login_ip = Some(ip.to_string());
                }
                found = true;
            }
        }

        if !found {
            warn!("No device registry row to touch for device {}", device_id);
            return Ok(());
        }

        self.write_devices(&records)
    }
}

// Create the CSV store with headers if it does not exist yet
fn ensure_store(path: &Path, headers: &[&str]) {
    if path.exists() {
        return;
    }

    info!("Creating new store at {}", path.display());
    let file = File::create(path).unwrap_or_else(|e| {
        error!("Failed to create store {}: {}", path.display(), e);
        panic!("Failed to create store {}: {}", path.display(), e)
    });

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    if let Err(e) = writer.write_record(headers) {
        error!("Failed to write headers: {}", e);
        panic!("Failed to write headers: {}", e);
    }
    if let Err(e) = writer.flush() {
        error!("Failed to flush headers: {}", e);
        panic!("Failed to flush headers: {}", e);
    }
}

// Create a singleton database service
pub fn create_database_service() -> Arc<DatabaseService> {
    // Default path with environment variable override
    let default_dir = "/app/data";
    let data_dir = std::env::var("BOOKING_DATABASE_DIR").unwrap_or_else(|_| default_dir.to_string());

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!("Failed to create data directory: {}", e);
        panic!("Failed to create data directory: {}", e);
    }

    Arc::new(DatabaseService::new(&data_dir))
}
