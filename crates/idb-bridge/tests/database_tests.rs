//! Opening, upgrading, using and deleting databases on the memory engine

mod common;

use std::cell::RefCell;
use std::future::IntoFuture;
use std::rc::Rc;

use common::{engine, open_app, seed_users, user};
use futures::FutureExt;
use idb_bridge::{
    delete_database, open_database, using_database, DatabaseConfig, Error, IndexOptions, Memory,
    StoreOptions, StoreUpgrade, UpgradeCompletion,
};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_open_creates_schema() {
    let engine = engine();
    let db = open_app(&engine);

    assert_eq!(db.name(), "app");
    assert_eq!(db.version(), 1);
    assert_eq!(db.object_store_names(), vec!["notes".to_string(), "users".to_string()]);
    assert_eq!(engine.database_names(), vec!["app".to_string()]);
}

#[test]
fn test_open_without_version_uses_current() {
    let engine = engine();
    open_app(&engine).close();

    let reopened = engine.block_on(open_database(&engine, "app").into_future()).unwrap();
    assert_eq!(reopened.version(), 1);
    assert_eq!(reopened.object_store_names().len(), 2);
}

#[test]
fn test_upgrade_sees_versions() {
    let engine = engine();
    open_app(&engine).close();

    let versions = Rc::new(RefCell::new(None));
    let seen = versions.clone();
    let open = open_database(&engine, "app").version(3).on_upgrade(move |upgrade| {
        *seen.borrow_mut() = Some((upgrade.name(), upgrade.old_version(), upgrade.new_version()));
        upgrade.delete_object_store("notes")?;
        upgrade.object_store("users")?.create_index("name", "name", IndexOptions::new())?;
        Ok(())
    });
    let db = engine.block_on(open.into_future()).unwrap();

    assert_eq!(*versions.borrow(), Some(("app".to_string(), 1, 3)));
    assert_eq!(db.object_store_names(), vec!["users".to_string()]);
    let indexes = db.using_read_only_store("users", |users| Ok(users.index_names()));
    assert_eq!(
        engine.block_on(indexes).unwrap(),
        vec!["email".to_string(), "name".to_string(), "tags".to_string()]
    );
}

#[test]
fn test_upgrade_keeps_existing_records() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(&engine, &db, vec![user(1, "a@example.com")]);
    db.close();

    let open = open_database(&engine, "app").version(2).on_upgrade(|upgrade| {
        upgrade.create_object_store("audit", StoreOptions::new().auto_increment(true))?;
        Ok(())
    });
    let db = engine.block_on(open.into_future()).unwrap();
    let read = db.using_read_only_store("users", |users| users.get(json!(1)));
    let record = engine.block_on(read).unwrap();
    assert_eq!(engine.block_on(record).unwrap(), Some(user(1, "a@example.com")));
}

#[test]
fn test_upgrade_callback_failure_rejects_open() {
    let engine = engine();

    let open = open_database(&engine, "broken").version(1).on_upgrade(|upgrade| {
        upgrade.create_object_store("store", StoreOptions::new())?;
        Err(Error::Config("bad schema".into()))
    });
    let err = engine.block_on(open.into_future()).unwrap_err();

    let message = err.to_string();
    assert!(message.contains("unable to open database broken v1"), "{}", message);
    assert!(message.contains("bad schema"), "{}", message);
    engine.run_until_idle();
    assert!(engine.database_names().is_empty());
}

#[test]
fn test_upgrade_engine_error_rejects_open() {
    let engine = engine();

    let open = open_database(&engine, "broken").on_upgrade(|upgrade| {
        upgrade.create_object_store("store", StoreOptions::new())?;
        upgrade.create_object_store("store", StoreOptions::new())?;
        Ok(())
    });
    let err = engine.block_on(open.into_future()).unwrap_err();
    assert!(matches!(err, Error::Open { version: None, .. }));
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("ConstraintError"));
}

#[test]
fn test_lower_version_rejects() {
    let engine = engine();
    let db = open_app(&engine);
    db.close();

    let open = open_database(&engine, "app").version(2);
    engine.block_on(open.into_future()).unwrap().close();

    let err = engine
        .block_on(open_database(&engine, "app").version(1).into_future())
        .unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("VersionError"));
    assert!(err.to_string().contains("app v1"));
}

#[test]
fn test_store_upgrade_transaction_resolves() {
    let engine = engine();

    let completion: Rc<RefCell<Option<UpgradeCompletion<Memory>>>> = Rc::new(RefCell::new(None));
    let slot = completion.clone();
    let open = open_database(&engine, "seeded").on_upgrade(move |upgrade| {
        let store = upgrade.create_object_store("items", StoreOptions::new().auto_increment(true))?;
        let _first = store.records().add(&json!({ "label": "first" }), None)?;
        let _second = store.records().add(&json!({ "label": "second" }), None)?;
        *slot.borrow_mut() = Some(store.transaction());
        Ok(())
    });
    let db = engine.block_on(open.into_future()).unwrap();

    let finished = completion.borrow_mut().take().unwrap();
    let upgraded = engine.block_on(finished.clone()).unwrap();
    assert_eq!(upgraded.name(), "seeded");
    // The shared completion hands every waiter the same outcome.
    assert!(engine.block_on(finished).is_ok());

    let keys = db.using_read_only_store("items", |items| items.get_all_keys(None, None));
    let keys = engine.block_on(keys).unwrap();
    assert_eq!(engine.block_on(keys).unwrap(), vec![json!(1), json!(2)]);
}

#[test]
fn test_store_upgrade_transaction_after_upgrade_is_canceled() {
    let engine = engine();

    let kept: Rc<RefCell<Option<StoreUpgrade<Memory>>>> = Rc::new(RefCell::new(None));
    let slot = kept.clone();
    let open = open_database(&engine, "late").on_upgrade(move |upgrade| {
        *slot.borrow_mut() = Some(upgrade.create_object_store("items", StoreOptions::new())?);
        Ok(())
    });
    let _db = engine.block_on(open.into_future()).unwrap();

    let store = kept.borrow_mut().take().unwrap();
    let err = engine.block_on(store.transaction()).unwrap_err();
    assert!(matches!(err, Error::Canceled));
}

#[test]
fn test_using_database_closes_on_success() {
    let engine = engine();
    open_app(&engine).close();
    let before = engine.close_calls("app");

    let open = open_database(&engine, "app");
    let count = engine
        .block_on(using_database(open, |db| async move {
            let count = db.using_read_only_store("users", |users| users.count(None)).await?;
            count.await
        }))
        .unwrap();

    assert_eq!(count, 0);
    assert_eq!(engine.close_calls("app"), before + 1);
    assert_eq!(engine.open_connections("app"), 0);
}

#[test]
fn test_using_database_closes_on_error() {
    let engine = engine();
    open_app(&engine).close();
    let before = engine.close_calls("app");

    let open = open_database(&engine, "app");
    let err = engine
        .block_on(using_database(open, |db| async move {
            db.transaction("users", "what?", |_| Ok(())).await
        }))
        .unwrap_err();

    assert!(matches!(err, Error::InvalidMode(_)));
    assert_eq!(engine.close_calls("app"), before + 1);
    assert_eq!(engine.open_connections("app"), 0);
}

#[test]
fn test_close_is_idempotent() {
    let engine = engine();
    let db = open_app(&engine);
    let before = engine.close_calls("app");

    db.close();
    db.clone().close();
    assert!(db.is_closed());
    assert_eq!(engine.close_calls("app"), before + 1);

    let err = engine
        .block_on(db.using_read_only_store("users", |_| Ok(())))
        .unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("InvalidStateError"));
}

#[test]
fn test_delete_missing_database_succeeds() {
    let engine = engine();
    assert!(engine.block_on(delete_database(&engine, "nothing-here")).is_ok());
}

#[test]
fn test_delete_database() {
    let engine = engine();
    open_app(&engine).close();

    engine.block_on(delete_database(&engine, "app")).unwrap();
    assert!(engine.database_names().is_empty());

    let reopened = engine.block_on(open_database(&engine, "app").into_future()).unwrap();
    assert_eq!(reopened.version(), 1);
    assert!(reopened.object_store_names().is_empty());
}

#[test]
fn test_delete_waits_for_open_connections() {
    let engine = engine();
    let db = open_app(&engine);

    let mut deletion = Box::pin(delete_database(&engine, "app"));
    assert!(deletion.as_mut().now_or_never().is_none());
    engine.run_until_idle();
    assert_eq!(engine.database_names(), vec!["app".to_string()]);

    db.close();
    engine.block_on(deletion).unwrap();
    assert!(engine.database_names().is_empty());
}

#[test]
fn test_upgrade_waits_for_open_connections() {
    let engine = engine();
    let db = open_app(&engine);

    let upgrade = open_database(&engine, "app").version(2).into_future();
    let mut upgrade = Box::pin(upgrade);
    assert!(upgrade.as_mut().now_or_never().is_none());
    engine.run_until_idle();

    db.close();
    let upgraded = engine.block_on(upgrade).unwrap();
    assert_eq!(upgraded.version(), 2);
}

#[test]
fn test_unavailable_engine() {
    let engine = engine();
    engine.set_available(false);

    let err = engine
        .block_on(open_database(&engine, "app").into_future())
        .unwrap_err();
    assert!(matches!(err, Error::NotAvailable(_)));
    assert!(matches!(
        engine.block_on(delete_database(&engine, "app")),
        Err(Error::NotAvailable(_))
    ));
}

#[test]
fn test_version_zero_rejects() {
    let engine = engine();
    let err = engine
        .block_on(open_database(&engine, "app").version(0).into_future())
        .unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("TypeError"));
}

#[test]
fn test_config_open_applies_schema() {
    let engine = engine();
    let config = DatabaseConfig::from_json(
        r#"{
            "name": "configured",
            "version": 1,
            "stores": [
                { "name": "users", "key_path": "id", "indexes": [
                    { "name": "email", "key_path": "email", "unique": true }
                ] },
                { "name": "log", "auto_increment": true }
            ]
        }"#,
    )
    .unwrap();

    let db = engine.block_on(config.open(&engine).into_future()).unwrap();
    assert_eq!(db.object_store_names(), vec!["log".to_string(), "users".to_string()]);
    db.close();

    // A later version only adds what is missing.
    let mut next = config.clone();
    next.version = Some(2);
    next.stores[0].indexes.push(serde_json::from_value(json!({ "name": "name", "key_path": "name" })).unwrap());
    let db = engine.block_on(next.open(&engine).into_future()).unwrap();
    let indexes = db.using_read_only_store("users", |users| Ok(users.index_names()));
    assert_eq!(
        engine.block_on(indexes).unwrap(),
        vec!["email".to_string(), "name".to_string()]
    );
}
