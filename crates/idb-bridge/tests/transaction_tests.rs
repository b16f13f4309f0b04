//! Transactions and record access against the memory engine

mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{engine, open_app, seed_users, user};
use idb_bridge::{Cursor, CursorDirection, Error, KeyPath, KeyRange, Memory, Query, TransactionMode};
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_put_and_get() {
    let engine = engine();
    let db = open_app(&engine);

    let saved = db.transaction("users", TransactionMode::ReadWrite, |tx| {
        tx.object_store("users")?.put(&user(1, "a@example.com"), None)
    });
    let key = engine.block_on(saved).unwrap();
    assert_eq!(engine.block_on(key).unwrap(), json!(1));

    let read = db.using_read_only_store("users", |users| users.get(json!(1)));
    let record = engine.block_on(read).unwrap();
    assert_eq!(engine.block_on(record).unwrap(), Some(user(1, "a@example.com")));
}

#[test]
fn test_get_missing_resolves_none() {
    let engine = engine();
    let db = open_app(&engine);

    let read = db.using_read_only_store("users", |users| users.get(json!(42)));
    let record = engine.block_on(read).unwrap();
    assert_eq!(engine.block_on(record).unwrap(), None);
}

#[test]
fn test_out_of_line_keys() {
    let engine = engine();
    let db = open_app(&engine);

    let saved = db.using_read_write_store("notes", |notes| {
        let _first = notes.add(&json!("first"), Some(&json!("a")))?;
        let _second = notes.add(&json!("second"), Some(&json!("b")))?;
        notes.get_all(None, None)
    });
    let all = engine.block_on(saved).unwrap();
    assert_eq!(engine.block_on(all).unwrap(), vec![json!("first"), json!("second")]);

    let missing_key = db.using_read_write_store("notes", |notes| notes.put(&json!("no key"), None));
    let err = engine.block_on(missing_key).unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("DataError"));
}

#[test]
fn test_invalid_mode_rejects() {
    let engine = engine();
    let db = open_app(&engine);

    let called = Rc::new(Cell::new(false));
    let flag = called.clone();
    let rejected = db.transaction("users", "what?", move |_| {
        flag.set(true);
        Ok(())
    });
    assert_eq!(engine.live_transactions(), 0);

    let err = engine.block_on(rejected).unwrap_err();
    assert!(matches!(err, Error::InvalidMode(_)));
    assert!(err.to_string().contains("what?"));
    assert!(!called.get());
}

#[test]
fn test_mode_accepts_engine_names() {
    let engine = engine();
    let db = open_app(&engine);

    let written = db.transaction("users", "readwrite", |tx| {
        tx.object_store("users")?.put(&user(1, "a@example.com"), None)
    });
    assert!(engine.block_on(written).is_ok());

    let default_mode = db.transaction("users", None::<TransactionMode>, |tx| Ok(tx.mode()));
    assert_eq!(engine.block_on(default_mode).unwrap(), TransactionMode::ReadOnly);
}

#[test]
fn test_read_only_write_rejects() {
    let engine = engine();
    let db = open_app(&engine);

    let attempt = db.using_read_only_store("users", |users| users.put(&user(1, "a@example.com"), None));
    let err = engine.block_on(attempt).unwrap_err();
    assert!(err.to_string().contains("read-only"), "{}", err);
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("ReadOnlyError"));
}

#[test]
fn test_store_name_list_rejected_by_shortcut() {
    let engine = engine();
    let db = open_app(&engine);

    let err = engine
        .block_on(db.using_read_only_store(vec!["users", "notes"], |_| Ok(())))
        .unwrap_err();
    assert!(matches!(err, Error::StoreNameRequired(ref names) if names.len() == 2));
}

#[test]
fn test_multi_store_transaction() {
    let engine = engine();
    let db = open_app(&engine);

    let written = db.transaction(["users", "notes"], TransactionMode::ReadWrite, |tx| {
        let _user = tx.object_store("users")?.put(&user(1, "a@example.com"), None)?;
        let _note = tx.object_store("notes")?.put(&json!("hello"), Some(&json!(1)))?;
        Ok(tx.object_store_names())
    });
    assert_eq!(
        engine.block_on(written).unwrap(),
        vec!["notes".to_string(), "users".to_string()]
    );

    let out_of_scope = db.transaction("users", TransactionMode::ReadOnly, |tx| {
        tx.object_store("notes").map(|_| ())
    });
    let err = engine.block_on(out_of_scope).unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("NotFoundError"));
}

#[test]
fn test_unknown_store_rejects() {
    let engine = engine();
    let db = open_app(&engine);

    let err = engine
        .block_on(db.using_read_only_store("missing", |_| Ok(())))
        .unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("NotFoundError"));
}

#[test]
fn test_abort_rolls_back() {
    let engine = engine();
    let db = open_app(&engine);

    let aborted = db.transaction("users", TransactionMode::ReadWrite, |tx| {
        let _key = tx.object_store("users")?.put(&user(1, "a@example.com"), None)?;
        tx.abort()
    });
    let err = engine.block_on(aborted).unwrap_err();
    assert!(err.is_aborted());
    assert!(err.to_string().contains("aborted"));

    let count = db.using_read_only_store("users", |users| users.count(None));
    let count = engine.block_on(count).unwrap();
    assert_eq!(engine.block_on(count).unwrap(), 0);
}

#[test]
fn test_abort_keeps_writes_of_overlapping_transaction() {
    let engine = engine();
    let db = open_app(&engine);

    // The duplicate `add` is issued from a cursor step, so the first
    // transaction fails only after the second one has been created.
    let first = db.using_read_write_store("notes", |notes| {
        let _put = notes.put(&json!("one"), Some(&json!(1)))?;
        let store = notes.clone();
        notes.open_cursor(None, CursorDirection::Next, move |cursor: Option<Cursor<Memory>>| {
            if cursor.is_some() {
                let _duplicate = store.add(&json!("again"), Some(&json!(1)));
            }
        })
    });
    let second = db.using_read_write_store("notes", |notes| notes.put(&json!("two"), Some(&json!(2))));
    assert_eq!(engine.live_transactions(), 2);

    let key = engine.block_on(second).unwrap();
    assert_eq!(engine.block_on(key).unwrap(), json!(2));
    let err = engine.block_on(first).unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("ConstraintError"));

    let keys = db.using_read_only_store("notes", |notes| notes.get_all_keys(None, None));
    let keys = engine.block_on(keys).unwrap();
    assert_eq!(engine.block_on(keys).unwrap(), vec![json!(2)]);
}

#[test]
fn test_abort_leaves_other_stores_alone() {
    let engine = engine();
    let db = open_app(&engine);

    let failing = db.using_read_write_store("users", |users| {
        let _first = users.put(&user(1, "a@example.com"), None)?;
        let store = users.clone();
        users.open_cursor(None, CursorDirection::Next, move |cursor: Option<Cursor<Memory>>| {
            if cursor.is_some() {
                let _duplicate = store.add(&user(1, "a@example.com"), None);
            }
        })
    });
    let notes = db.using_read_write_store("notes", |notes| notes.put(&json!("kept"), Some(&json!("n"))));

    assert!(engine.block_on(notes).is_ok());
    assert!(engine.block_on(failing).is_err());

    let counts = db.transaction(["users", "notes"], TransactionMode::ReadOnly, |tx| {
        Ok((tx.object_store("users")?.count(None)?, tx.object_store("notes")?.count(None)?))
    });
    let (users, notes) = engine.block_on(counts).unwrap();
    assert_eq!(engine.block_on(users).unwrap(), 0);
    assert_eq!(engine.block_on(notes).unwrap(), 1);
}

#[test]
fn test_failed_setup_aborts() {
    let engine = engine();
    let db = open_app(&engine);

    let failed = db.using_read_write_store("users", |users| {
        let _key = users.put(&user(1, "a@example.com"), None)?;
        Err::<(), _>(Error::Config("setup gave up".into()))
    });
    let err = engine.block_on(failed).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    // Let the queued abort run before reading.
    engine.run_until_idle();
    let count = db.using_read_only_store("users", |users| users.count(None));
    let count = engine.block_on(count).unwrap();
    assert_eq!(engine.block_on(count).unwrap(), 0);
}

#[test]
fn test_constraint_error_rejects_transaction() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(&engine, &db, vec![user(1, "a@example.com")]);

    let duplicate = db.using_read_write_store("users", |users| {
        let _other = users.put(&user(2, "b@example.com"), None)?;
        users.add(&user(1, "c@example.com"), None)
    });
    let err = engine.block_on(duplicate).unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("ConstraintError"));

    let keys = db.using_read_only_store("users", |users| users.get_all_keys(None, None));
    let keys = engine.block_on(keys).unwrap();
    assert_eq!(engine.block_on(keys).unwrap(), vec![json!(1)]);
}

#[test]
fn test_unique_index_rejects_duplicates() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(&engine, &db, vec![user(1, "a@example.com")]);

    let clash = db.using_read_write_store("users", |users| users.put(&user(2, "a@example.com"), None));
    let err = engine.block_on(clash).unwrap_err();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("ConstraintError"));
}

#[test]
fn test_index_lookup() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(
        &engine,
        &db,
        vec![user(1, "a@example.com"), user(2, "b@example.com"), user(3, "c@example.com")],
    );

    let found = db.using_read_only_store("users", |users| {
        let email = users.index("email")?;
        Ok((email.get(json!("b@example.com"))?, email.get_key(json!("c@example.com"))?))
    });
    let (record, key) = engine.block_on(found).unwrap();
    assert_eq!(engine.block_on(record).unwrap(), Some(user(2, "b@example.com")));
    assert_eq!(engine.block_on(key).unwrap(), Some(json!(3)));
}

#[test]
fn test_multi_entry_index() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(
        &engine,
        &db,
        vec![
            json!({ "id": 1, "email": "a@example.com", "tags": ["admin", "staff"] }),
            json!({ "id": 2, "email": "b@example.com", "tags": ["staff"] }),
            json!({ "id": 3, "email": "c@example.com", "tags": ["guest", "guest"] }),
        ],
    );

    let tagged = db.using_read_only_store("users", |users| {
        let tags = users.index("tags")?;
        Ok((
            tags.get_all_keys(Some(json!("staff").into()), None)?,
            tags.count(Some(json!("guest").into()))?,
        ))
    });
    let (staff, guests) = engine.block_on(tagged).unwrap();
    assert_eq!(engine.block_on(staff).unwrap(), vec![json!(1), json!(2)]);
    assert_eq!(engine.block_on(guests).unwrap(), 1);
}

#[test]
fn test_ranges_and_limits() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(&engine, &db, (1..=5).map(|id| user(id, &format!("{}@example.com", id))).collect());

    let ranged = db.using_read_only_store("users", |users| {
        let half_open: Query<_> = KeyRange::bound(json!(2), json!(4), false, true).into();
        Ok((
            users.get_all_keys(Some(half_open.clone()), None)?,
            users.get_all_keys(Some(KeyRange::lower_bound(json!(3), true).into()), Some(1))?,
            users.count(Some(half_open))?,
        ))
    });
    let (keys, first_above, count) = engine.block_on(ranged).unwrap();
    assert_eq!(engine.block_on(keys).unwrap(), vec![json!(2), json!(3)]);
    assert_eq!(engine.block_on(first_above).unwrap(), vec![json!(4)]);
    assert_eq!(engine.block_on(count).unwrap(), 2);
}

#[test]
fn test_delete_and_clear() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(&engine, &db, (1..=4).map(|id| user(id, &format!("{}@example.com", id))).collect());

    let deleted = db.using_read_write_store("users", |users| {
        let _one = users.delete(json!(1))?;
        let _range = users.delete(KeyRange::bound(json!(3), json!(4), false, false))?;
        users.get_all_keys(None, None)
    });
    let remaining = engine.block_on(deleted).unwrap();
    assert_eq!(engine.block_on(remaining).unwrap(), vec![json!(2)]);

    let cleared = db.using_read_write_store("users", |users| {
        let _cleared = users.clear()?;
        users.count(None)
    });
    let count = engine.block_on(cleared).unwrap();
    assert_eq!(engine.block_on(count).unwrap(), 0);
}

#[test]
fn test_store_and_index_properties() {
    let engine = engine();
    let db = open_app(&engine);

    let props = db.using_read_only_store("users", |users| {
        let email = users.index("email")?;
        let tags = users.index("tags")?;
        Ok((
            users.name(),
            users.key_path(),
            users.index_names(),
            users.auto_increment(),
            (email.name(), email.key_path(), email.unique(), email.multi_entry()),
            (tags.unique(), tags.multi_entry()),
        ))
    });
    let (name, key_path, indexes, auto_increment, email, tags) = engine.block_on(props).unwrap();
    assert_eq!(name, "users");
    assert_eq!(key_path, Some(KeyPath::from("id")));
    assert_eq!(indexes, vec!["email".to_string(), "tags".to_string()]);
    assert!(!auto_increment);
    assert_eq!(email, ("email".to_string(), KeyPath::from("email"), true, false));
    assert_eq!(tags, (false, true));
}

#[test]
fn test_request_after_transaction_ends_fails() {
    let engine = engine();
    let db = open_app(&engine);

    let kept = db.using_read_only_store("users", |users| Ok(users.clone()));
    let users = engine.block_on(kept).unwrap();
    let err = users.get(json!(1)).unwrap_err();
    assert!(err.native().is_some());
}
