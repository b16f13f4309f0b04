//! Shared setup for the memory-engine integration tests.

#![allow(dead_code)]

use std::future::IntoFuture;

use idb_bridge::{open_database, Connection, IndexOptions, Memory, MemoryEngine, StoreOptions};
use serde_json::{json, Value};

/// Route bridge logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("idb_bridge=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn engine() -> MemoryEngine {
    init_tracing();
    MemoryEngine::new()
}

/// `users` (key path `id`, unique `email` index, multi-entry `tags` index)
/// and `notes` (out-of-line keys).
pub fn open_app(engine: &MemoryEngine) -> Connection<Memory> {
    let open = open_database(engine, "app").version(1).on_upgrade(|upgrade| {
        let users = upgrade.create_object_store("users", StoreOptions::new().key_path("id"))?;
        users.create_index("email", "email", IndexOptions::new().unique(true))?;
        users.create_index("tags", "tags", IndexOptions::new().multi_entry(true))?;
        upgrade.create_object_store("notes", StoreOptions::new())?;
        Ok(())
    });
    engine.block_on(open.into_future()).unwrap()
}

pub fn user(id: u32, email: &str) -> Value {
    json!({ "id": id, "email": email, "name": format!("user {}", id) })
}

/// Write `records` into `users` in one read-write transaction.
pub fn seed_users(engine: &MemoryEngine, db: &Connection<Memory>, records: Vec<Value>) {
    let seeded = db.using_read_write_store("users", move |users| {
        for record in &records {
            let _key = users.put(record, None)?;
        }
        Ok(())
    });
    engine.block_on(seeded).unwrap();
}
