//! Basic example using in-memory document store
//!
//! Two simulated request handlers share one session. The second one finds the
//! session locked while the first holds it, then proceeds once it is released.

use std::time::Duration;

use session_lock_store::{
    ItemLookup, JsonCodec, MemoryStore, SessionError, SessionItems, SessionLockCoordinator,
    SessionStoreConfig,
};

type Coordinator = SessionLockCoordinator<MemoryStore, JsonCodec<SessionItems>>;

/// Increment the view counter, waiting for the lock if another handler has it
async fn handle_request(
    coordinator: &Coordinator,
    id: &str,
    worker: &str,
) -> Result<(), SessionError> {
    loop {
        match coordinator.get_item_exclusive(id).await? {
            ItemLookup::Absent => {
                println!("[{}] session {} not found", worker, id);
                return Ok(());
            }
            ItemLookup::Locked { lock_age, lock_token } => {
                println!(
                    "[{}] session locked by token {} for {}ms, retrying",
                    worker,
                    lock_token,
                    lock_age.num_milliseconds()
                );
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            ItemLookup::Acquired {
                mut data,
                lock_token,
                pending_action,
                ..
            } => {
                let views: i32 = data.items.get("views").unwrap_or(0);
                data.items.set("views", views + 1);
                data.items.set("last_worker", worker);
                println!(
                    "[{}] acquired token {} ({:?}), views -> {}",
                    worker,
                    lock_token,
                    pending_action,
                    views + 1
                );

                // Simulate request work while holding the lock
                tokio::time::sleep(Duration::from_millis(120)).await;

                let outcome = coordinator
                    .set_and_release_item(id, lock_token, &data, false)
                    .await?;
                println!("[{}] write: {:?}", worker, outcome);
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), SessionError> {
    // Set up logging
    tracing_subscriber::fmt::init();

    let config = SessionStoreConfig::new("/demo").with_default_timeout(20);
    let coordinator = SessionLockCoordinator::new(
        MemoryStore::new(),
        JsonCodec::<SessionItems>::new(),
        config,
    )?;

    let id = coordinator.generate_session_id();
    coordinator.create_uninitialized_item(&id, 20).await?;
    println!("Created session {}", id);

    let (a, b) = tokio::join!(
        handle_request(&coordinator, &id, "worker-a"),
        handle_request(&coordinator, &id, "worker-b"),
    );
    a?;
    b?;

    if let Some(data) = coordinator.get_item(&id).await?.into_data() {
        println!(
            "Final views: {}, last written by {}",
            data.items.get::<i32>("views").unwrap_or(0),
            data.items.get::<String>("last_worker").unwrap_or_default()
        );
    }

    coordinator.reset_item_timeout(&id).await?;
    Ok(())
}
