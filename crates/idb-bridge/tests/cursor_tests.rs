//! Cursor iteration against the memory engine

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{engine, open_app, seed_users, user};
use idb_bridge::{Cursor, CursorDirection, KeyRange, Memory, TransactionMode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn seed_five(engine: &idb_bridge::MemoryEngine, db: &idb_bridge::Connection<Memory>) {
    seed_users(engine, db, (1..=5).map(|id| user(id, &format!("{}@example.com", id))).collect());
}

/// Walk `users` in `direction`, recording every step the callback sees.
fn walk(direction: CursorDirection) -> Vec<Option<Value>> {
    let engine = engine();
    let db = open_app(&engine);
    seed_five(&engine, &db);

    let steps = Rc::new(RefCell::new(Vec::new()));
    let seen = steps.clone();
    let walked = db.using_read_only_store("users", move |users| {
        users.open_cursor(None, direction, move |cursor: Option<Cursor<Memory>>| {
            seen.borrow_mut().push(cursor.as_ref().map(|c| c.primary_key().clone()));
            if let Some(cursor) = cursor {
                cursor.continue_().unwrap();
            }
        })
    });
    engine.block_on(walked).unwrap();
    let steps = steps.borrow().clone();
    steps
}

#[test]
fn test_cursor_visits_every_record_then_none() {
    let steps = walk(CursorDirection::Next);
    assert_eq!(steps.len(), 6);
    assert_eq!(
        steps,
        vec![Some(json!(1)), Some(json!(2)), Some(json!(3)), Some(json!(4)), Some(json!(5)), None]
    );
}

#[test]
fn test_cursor_prev_direction() {
    let steps = walk(CursorDirection::Prev);
    assert_eq!(
        steps,
        vec![Some(json!(5)), Some(json!(4)), Some(json!(3)), Some(json!(2)), Some(json!(1)), None]
    );
}

#[test]
fn test_cursor_on_empty_store_reports_end_once() {
    let engine = engine();
    let db = open_app(&engine);

    let calls = Rc::new(RefCell::new(0));
    let counted = calls.clone();
    let walked = db.using_read_only_store("users", move |users| {
        users.open_cursor(None, CursorDirection::Next, move |cursor: Option<Cursor<Memory>>| {
            assert!(cursor.is_none());
            *counted.borrow_mut() += 1;
        })
    });
    engine.block_on(walked).unwrap();
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn test_cursor_stops_when_not_continued() {
    let engine = engine();
    let db = open_app(&engine);
    seed_five(&engine, &db);

    let calls = Rc::new(RefCell::new(0));
    let counted = calls.clone();
    let walked = db.using_read_only_store("users", move |users| {
        users.open_cursor(None, CursorDirection::Next, move |_cursor: Option<Cursor<Memory>>| {
            *counted.borrow_mut() += 1;
        })
    });
    engine.block_on(walked).unwrap();
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn test_cursor_range_continue_to_and_advance() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(&engine, &db, (1..=9).map(|id| user(id, &format!("{}@example.com", id))).collect());

    let keys = Rc::new(RefCell::new(Vec::new()));
    let seen = keys.clone();
    let walked = db.using_read_only_store("users", move |users| {
        let range = KeyRange::bound(json!(2), json!(8), false, false);
        users.open_key_cursor(Some(range.into()), CursorDirection::Next, move |cursor: Option<Cursor<Memory>>| {
            let Some(cursor) = cursor else { return };
            assert!(cursor.value().is_none());
            let key = cursor.key().clone();
            seen.borrow_mut().push(key.clone());
            if key == json!(2) {
                cursor.continue_to(&json!(5)).unwrap();
            } else {
                cursor.advance(2).unwrap();
            }
        })
    });
    engine.block_on(walked).unwrap();
    assert_eq!(*keys.borrow(), vec![json!(2), json!(5), json!(7)]);
}

#[test]
fn test_index_cursor_unique_directions() {
    let engine = engine();
    let db = open_app(&engine);
    seed_users(
        &engine,
        &db,
        vec![
            json!({ "id": 1, "email": "a@example.com", "tags": ["red"] }),
            json!({ "id": 2, "email": "b@example.com", "tags": ["blue", "red"] }),
            json!({ "id": 3, "email": "c@example.com", "tags": ["blue"] }),
        ],
    );

    let steps = Rc::new(RefCell::new(Vec::new()));
    let seen = steps.clone();
    let walked = db.using_read_only_store("users", move |users| {
        users.index("tags")?.open_cursor(None, CursorDirection::PrevUnique, move |cursor: Option<Cursor<Memory>>| {
            if let Some(cursor) = cursor {
                seen.borrow_mut().push((cursor.key().clone(), cursor.primary_key().clone()));
                cursor.continue_().unwrap();
            }
        })
    });
    engine.block_on(walked).unwrap();
    assert_eq!(
        *steps.borrow(),
        vec![(json!("red"), json!(1)), (json!("blue"), json!(2))]
    );
}

#[test]
fn test_cursor_update_and_delete() {
    let engine = engine();
    let db = open_app(&engine);
    seed_five(&engine, &db);

    let walked = db.using_read_write_store("users", |users| {
        users.open_cursor(None, CursorDirection::Next, |cursor: Option<Cursor<Memory>>| {
            let Some(cursor) = cursor else { return };
            let mut record = cursor.value().cloned().unwrap();
            if record["id"].as_u64().unwrap() % 2 == 0 {
                let _deleted = cursor.delete().unwrap();
            } else {
                record["name"] = json!("renamed");
                let _updated = cursor.update(&record).unwrap();
            }
            cursor.continue_().unwrap();
        })
    });
    engine.block_on(walked).unwrap();

    let read = db.using_read_only_store("users", |users| users.get_all(None, None));
    let records = engine.block_on(read).unwrap();
    let names: Vec<(Value, Value)> = engine
        .block_on(records)
        .unwrap()
        .into_iter()
        .map(|record| (record["id"].clone(), record["name"].clone()))
        .collect();
    assert_eq!(
        names,
        vec![
            (json!(1), json!("renamed")),
            (json!(3), json!("renamed")),
            (json!(5), json!("renamed")),
        ]
    );
}

#[test]
fn test_cursor_update_in_read_only_transaction_fails() {
    let engine = engine();
    let db = open_app(&engine);
    seed_five(&engine, &db);

    let failures = Rc::new(RefCell::new(Vec::new()));
    let seen = failures.clone();
    let walked = db.using_read_only_store("users", move |users| {
        users.open_cursor(None, CursorDirection::Next, move |cursor: Option<Cursor<Memory>>| {
            if let Some(cursor) = cursor {
                let value = cursor.value().cloned().unwrap();
                if let Err(err) = cursor.update(&value) {
                    seen.borrow_mut().push(err.to_string());
                }
            }
        })
    });
    engine.block_on(walked).unwrap();
    assert_eq!(failures.borrow().len(), 1);
    assert!(failures.borrow()[0].contains("read-only"));
}

#[test]
fn test_continue_twice_is_rejected() {
    let engine = engine();
    let db = open_app(&engine);
    seed_five(&engine, &db);

    let second = Rc::new(RefCell::new(None));
    let seen = second.clone();
    let walked = db.using_read_only_store("users", move |users| {
        users.open_cursor(None, CursorDirection::Next, move |cursor: Option<Cursor<Memory>>| {
            if let Some(cursor) = cursor {
                if seen.borrow().is_none() {
                    cursor.continue_().unwrap();
                    *seen.borrow_mut() = cursor.continue_().err();
                }
            }
        })
    });
    engine.block_on(walked).unwrap();
    let err = second.borrow_mut().take().unwrap();
    assert_eq!(err.native().map(|e| e.name.as_str()), Some("InvalidStateError"));
}

#[test]
fn test_cursor_failure_reported_on_error_channel() {
    let engine = engine();
    let db = open_app(&engine);
    seed_five(&engine, &db);

    let steps = Rc::new(RefCell::new(0));
    let errors = Rc::new(RefCell::new(None));
    let (counted, slot) = (steps.clone(), errors.clone());
    let aborted = db.transaction("users", TransactionMode::ReadOnly, move |tx| {
        let users = tx.object_store("users")?;
        let cursor_errors = users.open_cursor(None, CursorDirection::Next, move |_cursor: Option<Cursor<Memory>>| {
            *counted.borrow_mut() += 1;
        })?;
        *slot.borrow_mut() = Some(cursor_errors);
        tx.abort()
    });
    assert!(engine.block_on(aborted).unwrap_err().is_aborted());

    let mut errors = errors.borrow_mut().take().unwrap();
    let failure = errors.try_next().unwrap();
    assert!(failure.is_aborted(), "{}", failure);
    assert!(errors.try_next().is_none());
    assert_eq!(*steps.borrow(), 0);
}
