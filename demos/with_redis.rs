//! Redis document store example
//!
//! Several processes pointed at the same Redis server and scope share session
//! state safely. Run this example twice at once to watch the lock move between
//! them, and kill one mid-request to see its stale lock reclaimed.
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1:6379 cargo run --example with_redis -- <session-id>
//! ```

use std::time::Duration;

use session_lock_store::{
    ItemLookup, JsonCodec, RedisStore, SessionError, SessionItems, SessionLockCoordinator,
    SessionStoreConfig, WriteConcern,
};

/// Locks older than this are assumed to belong to a dead process
const STALE_LOCK_AFTER: i64 = 10;

#[tokio::main]
async fn main() -> Result<(), SessionError> {
    // Set up logging
    tracing_subscriber::fmt::init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let session_id = std::env::args().nth(1);

    let config = SessionStoreConfig::new("/demo")
        .with_database_name("SessionState")
        .with_collection_name("Sessions")
        .with_default_timeout(20)
        .with_write_concern(WriteConcern::primary().with_timeout(Duration::from_secs(2)))
        .with_log_failures(true);

    let store = RedisStore::from_url(&redis_url, &config)
        .await
        .expect("Failed to connect to Redis");
    let coordinator =
        SessionLockCoordinator::new(store, JsonCodec::<SessionItems>::new(), config)?;

    let id = match session_id {
        Some(id) => id,
        None => {
            let id = coordinator.generate_session_id();
            coordinator.create_uninitialized_item(&id, 20).await?;
            println!("Created session {} (pass it as an argument to share it)", id);
            id
        }
    };
    let worker = format!("pid-{}", std::process::id());

    for round in 0..5 {
        match coordinator.get_item_exclusive(&id).await? {
            ItemLookup::Absent => {
                println!("Session {} has expired or was removed", id);
                return Ok(());
            }
            ItemLookup::Locked { lock_age, lock_token } => {
                println!(
                    "[{}] locked by token {} for {}s",
                    worker,
                    lock_token,
                    lock_age.num_seconds()
                );
                if lock_age >= chrono::Duration::seconds(STALE_LOCK_AFTER) {
                    let outcome = coordinator
                        .reclaim_stale_lock(&id, chrono::Duration::seconds(STALE_LOCK_AFTER))
                        .await?;
                    println!("[{}] reclaimed stale lock: {:?}", worker, outcome);
                }
            }
            ItemLookup::Acquired {
                mut data,
                lock_token,
                ..
            } => {
                let counter: i32 = data.items.get("counter").unwrap_or(0);
                // Odd rounds only read
                if round % 2 == 0 {
                    data.items.set("counter", counter + 1);
                    data.items.set("lastModifiedBy", &worker);
                }
                println!("[{}] round {}: counter = {}", worker, round, counter);

                tokio::time::sleep(Duration::from_secs(1)).await;

                let outcome = if data.items.is_dirty() {
                    coordinator
                        .set_and_release_item(&id, lock_token, &data, false)
                        .await?
                } else {
                    coordinator.release_item(&id, lock_token).await?
                };
                if !outcome.is_applied() {
                    println!("[{}] our lock was reclaimed, write dropped", worker);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    Ok(())
}
