//! Background expiry sweeps. Any number of service instances may run; each
//! sweep takes a lease-based scheduler lock first, so exactly one instance
//! does the work per tick and a crashed holder is reclaimed after its lease
//! lapses. Sweep failures are logged and retried on the next tick; they never
//! block request handling.

use crate::errors::GatehouseError;
use crate::store;
use sea_orm::DatabaseConnection;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

const EXPIRY_SWEEP_LOCK: &str = "expiry_sweep";
const KEY_RETIREMENT_LOCK: &str = "key_retirement";

/// Lease slightly shorter than the schedule so a healthy instance's next tick
/// finds its own lease expired rather than blocked.
const EXPIRY_SWEEP_LEASE_MS: i64 = 4 * 60 * 1000;
const KEY_RETIREMENT_LEASE_MS: i64 = 50 * 60 * 1000;

/// Expired device grant rows linger this long in the Expired state so polls
/// can still report expiry before the row disappears.
const DEVICE_GRANT_GRACE_MS: i64 = 60 * 60 * 1000;

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(
    db: DatabaseConnection,
    instance_id: String,
) -> Result<JobScheduler, GatehouseError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| GatehouseError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let db_clone = db.clone();
    let instance = instance_id.clone();

    // Expiry sweep - runs every five minutes
    let expiry_job = Job::new_async("0 */5 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        let instance = instance.clone();
        Box::pin(async move {
            match run_expiry_sweep(&db, &instance).await {
                Ok(Some(total)) => info!(total, "Expiry sweep removed expired rows"),
                Ok(None) => info!("Expiry sweep skipped; another instance holds the lease"),
                Err(e) => error!("Expiry sweep failed: {}", e),
            }
        })
    })
    .map_err(|e| GatehouseError::Other(format!("Failed to create expiry sweep job: {}", e)))?;

    sched
        .add(expiry_job)
        .await
        .map_err(|e| GatehouseError::Other(format!("Failed to add expiry sweep job: {}", e)))?;

    let db_clone = db.clone();
    let instance = instance_id.clone();

    // Key retirement - runs hourly at 15 minutes past
    let retirement_job = Job::new_async("0 15 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        let instance = instance.clone();
        Box::pin(async move {
            match run_key_retirement(&db, &instance).await {
                Ok(Some(count)) => info!(count, "Retired expired signing keys"),
                Ok(None) => info!("Key retirement skipped; another instance holds the lease"),
                Err(e) => error!("Key retirement sweep failed: {}", e),
            }
        })
    })
    .map_err(|e| GatehouseError::Other(format!("Failed to create key retirement job: {}", e)))?;

    sched
        .add(retirement_job)
        .await
        .map_err(|e| GatehouseError::Other(format!("Failed to add key retirement job: {}", e)))?;

    sched
        .start()
        .await
        .map_err(|e| GatehouseError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", 2);

    Ok(sched)
}

/// One pass over every expiring table. Returns None when the lease was not
/// acquired, otherwise the total number of rows swept.
pub async fn run_expiry_sweep(
    db: &DatabaseConnection,
    instance_id: &str,
) -> Result<Option<u64>, GatehouseError> {
    if !store::locks::try_acquire(db, EXPIRY_SWEEP_LOCK, instance_id, EXPIRY_SWEEP_LEASE_MS)
        .await?
    {
        return Ok(None);
    }

    let result = sweep_all(db).await;

    // Release regardless of how the sweep went; a failure here only delays the
    // next holder until the lease lapses.
    if let Err(e) = store::locks::release(db, EXPIRY_SWEEP_LOCK, instance_id).await {
        error!("Failed to release expiry sweep lock: {}", e);
    }

    result.map(Some)
}

async fn sweep_all(db: &DatabaseConnection) -> Result<u64, GatehouseError> {
    let mut total = 0u64;

    total += store::codes::cleanup_expired(db).await?;
    total += store::device::mark_expired(db).await?;
    total += store::device::cleanup_expired(db, DEVICE_GRANT_GRACE_MS).await?;
    total += store::refresh::cleanup_expired(db).await?;
    total += store::federated::cleanup_expired(db).await?;
    total += store::flows::cleanup_expired(db).await?;

    Ok(total)
}

pub async fn run_key_retirement(
    db: &DatabaseConnection,
    instance_id: &str,
) -> Result<Option<u64>, GatehouseError> {
    if !store::locks::try_acquire(
        db,
        KEY_RETIREMENT_LOCK,
        instance_id,
        KEY_RETIREMENT_LEASE_MS,
    )
    .await?
    {
        return Ok(None);
    }

    let result = store::keys::retire_expired(db).await;

    if let Err(e) = store::locks::release(db, KEY_RETIREMENT_LOCK, instance_id).await {
        error!("Failed to release key retirement lock: {}", e);
    }

    result.map(Some)
}
