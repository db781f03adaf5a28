use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::{comb::Comb, error::PushError, models::StoredRegistration};

const REGISTRATIONS: TableDefinition<&str, &str> = TableDefinition::new("web_push_registrations");

pub fn open_db(path: &str) -> Result<Database, PushError> {
    if Path::new(path).exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

pub fn init_db(db: &Database) -> Result<(), PushError> {
    let write_txn = db.begin_write()?;
    write_txn.open_table(REGISTRATIONS)?;
    write_txn.commit()?;
    Ok(())
}

pub fn db_put(db: &Database, stored: &StoredRegistration) -> Result<(), PushError> {
    let key = stored.device_id.to_string();
    let value = serde_json::to_string(stored)?;
    let write_txn = db.begin_write()?;
    {
        let mut table = write_txn.open_table(REGISTRATIONS)?;
        table.insert(key.as_str(), value.as_str())?;
    }
    write_txn.commit()?;
    Ok(())
}

pub fn db_get(db: &Database, device_id: &Comb) -> Result<Option<StoredRegistration>, PushError> {
    let key = device_id.to_string();
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(REGISTRATIONS)?;
    if let Some(value) = table.get(key.as_str())? {
        let stored: StoredRegistration = serde_json::from_str(value.value())?;
        Ok(Some(stored))
    } else {
        Ok(None)
    }
}

pub fn db_delete(db: &Database, device_id: &Comb) -> Result<bool, PushError> {
    let key = device_id.to_string();
    let write_txn = db.begin_write()?;
    let removed = {
        let mut table = write_txn.open_table(REGISTRATIONS)?;
        table.remove(key.as_str())?.is_some()
    };
    write_txn.commit()?;
    Ok(removed)
}

/// Every stored registration accepted by `keep`.
pub fn db_scan<F>(db: &Database, keep: F) -> Result<Vec<StoredRegistration>, PushError>
where
    F: Fn(&StoredRegistration) -> bool,
{
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(REGISTRATIONS)?;
    let mut found = Vec::new();
    for entry in table.iter()? {
        let (_, value) = entry?;
        let stored: StoredRegistration = serde_json::from_str(value.value())?;
        if keep(&stored) {
            found.push(stored);
        }
    }
    Ok(found)
}

/// Adds or removes `organization_id` on the listed devices that are stored
/// here. Returns the ids that were touched.
pub fn db_update_organization(
    db: &Database,
    device_ids: &[Comb],
    organization_id: Uuid,
    member: bool,
) -> Result<Vec<Comb>, PushError> {
    let write_txn = db.begin_write()?;
    let mut touched = Vec::new();
    {
        let mut table = write_txn.open_table(REGISTRATIONS)?;
        for device_id in device_ids {
            let key = device_id.to_string();
            let stored = match table.get(key.as_str())? {
                Some(value) => serde_json::from_str::<StoredRegistration>(value.value())?,
                None => continue,
            };

            let mut updated = stored;
            let present = updated.organization_ids.contains(&organization_id);
            if member && !present {
                updated.organization_ids.push(organization_id);
            } else if !member && present {
                updated.organization_ids.retain(|org| *org != organization_id);
            }

            let value = serde_json::to_string(&updated)?;
            table.insert(key.as_str(), value.as_str())?;
            touched.push(*device_id);
        }
    }
    write_txn.commit()?;
    Ok(touched)
}

pub fn cleanup_expired(db: &Database, ttl_days: i64) -> Result<usize, PushError> {
    let cutoff = Utc::now() - chrono::Duration::days(ttl_days);
    let write_txn = db.begin_write()?;
    let removed = {
        let mut table = write_txn.open_table(REGISTRATIONS)?;
        let mut to_remove = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let stored: StoredRegistration = serde_json::from_str(value.value())?;
            if stored.created_at < cutoff {
                to_remove.push(key.value().to_string());
            }
        }
        for key in &to_remove {
            table.remove(key.as_str())?;
        }
        to_remove.len()
    };
    write_txn.commit()?;
    Ok(removed)
}
