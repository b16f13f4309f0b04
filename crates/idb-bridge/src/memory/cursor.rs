//! Cursor stepping.
//!
//! A step recomputes the ordered entries of the source and picks the first
//! one past the current position, so records written between steps are seen
//! the way a browser engine sees them.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use serde_json::Value;

use super::handles::{check_effective_key, Target};
use super::key::{Bounds, Key};
use super::state::{invalid_state, Entry};
use super::{Memory, MemoryEngine, MemoryRequest};
use crate::error::NativeError;
use crate::native::{NativeCursor, NativeResult};
use crate::types::{CursorDirection, Query};

#[derive(Debug, Default)]
struct Progress {
    /// `(key, primary key)` of the last delivered step.
    position: Option<(Key, Key)>,
    /// A `continue`/`advance` is queued.
    stepping: bool,
    /// The end of the range was delivered.
    done: bool,
}

struct Traversal {
    target: Target,
    bounds: Bounds,
    direction: CursorDirection,
    keys_only: bool,
    request: MemoryRequest<Option<MemoryCursor>>,
    progress: RefCell<Progress>,
}

/// A cursor positioned on one entry. Clones share the traversal.
#[derive(Clone)]
pub struct MemoryCursor {
    traversal: Rc<Traversal>,
    entry: Entry,
}

impl MemoryCursor {
    pub(crate) fn open(
        target: Target,
        query: Option<&Query<Value>>,
        direction: CursorDirection,
        keys_only: bool,
    ) -> NativeResult<MemoryRequest<Option<MemoryCursor>>> {
        target.engine.state().active(target.transaction)?;
        let bounds = Bounds::from_query(query)?;
        let request = MemoryRequest::new();
        let traversal = Rc::new(Traversal {
            target,
            bounds,
            direction,
            keys_only,
            request: request.clone(),
            progress: RefCell::new(Progress::default()),
        });
        Traversal::step(&traversal, None, 1)?;
        Ok(request)
    }

    /// Shared checks of every cursor call: transaction active, cursor
    /// sitting on a delivered entry.
    fn check_positioned(&self) -> NativeResult<()> {
        let target = &self.traversal.target;
        target.engine.state().active(target.transaction)?;
        let progress = self.traversal.progress.borrow();
        if progress.stepping || progress.done {
            return Err(invalid_state(
                "The cursor is currently being iterated or has iterated past its end.",
            ));
        }
        Ok(())
    }

    fn check_writable(&self) -> NativeResult<()> {
        let target = &self.traversal.target;
        target.engine.state().writable(target.transaction)?;
        if self.traversal.keys_only {
            return Err(invalid_state("The cursor is a key cursor."));
        }
        self.check_positioned()
    }
}

impl Traversal {
    fn step(traversal: &Rc<Traversal>, seek: Option<Key>, count: u32) -> NativeResult<()> {
        let next = traversal.clone();
        traversal.target.engine.schedule(
            traversal.target.transaction,
            traversal.request.clone(),
            move |engine| next.advance(engine, seek.as_ref(), count),
        )?;
        traversal.progress.borrow_mut().stepping = true;
        Ok(())
    }

    fn advance(
        self: Rc<Self>,
        engine: &MemoryEngine,
        seek: Option<&Key>,
        count: u32,
    ) -> NativeResult<Option<MemoryCursor>> {
        let entries = {
            let state = engine.state();
            self.target.source.entries(&state, &self.bounds)?
        };
        let found = {
            let progress = self.progress.borrow();
            select(entries, self.direction, progress.position.as_ref(), seek, count)
        };

        let mut progress = self.progress.borrow_mut();
        progress.stepping = false;
        match found {
            Some(entry) => {
                progress.position = Some((entry.key.clone(), entry.primary_key.clone()));
                drop(progress);
                Ok(Some(MemoryCursor {
                    traversal: self,
                    entry,
                }))
            }
            None => {
                progress.done = true;
                Ok(None)
            }
        }
    }
}

/// The `count`-th entry past `position` in `direction` order, at or past
/// `seek`.
fn select(
    entries: Vec<Entry>,
    direction: CursorDirection,
    position: Option<&(Key, Key)>,
    seek: Option<&Key>,
    count: u32,
) -> Option<Entry> {
    let unique = direction.is_unique();
    let reverse = direction.is_reverse();

    // Entries come sorted by (key, primary key); for unique directions the
    // first entry of every key is the one with the lowest primary key.
    let mut ordered: Vec<Entry> = Vec::with_capacity(entries.len());
    for entry in entries {
        let duplicate = unique && ordered.last().is_some_and(|last| last.key == entry.key);
        if !duplicate {
            ordered.push(entry);
        }
    }
    if reverse {
        ordered.reverse();
    }

    let past = |entry: &Entry| match position {
        None => true,
        Some((key, primary_key)) => {
            let order = if unique {
                entry.key.cmp(key)
            } else {
                (&entry.key, &entry.primary_key).cmp(&(key, primary_key))
            };
            order == if reverse { Ordering::Less } else { Ordering::Greater }
        }
    };
    let reached = |entry: &Entry| match seek {
        None => true,
        Some(seek) if reverse => &entry.key <= seek,
        Some(seek) => &entry.key >= seek,
    };

    ordered
        .into_iter()
        .filter(|entry| past(entry) && reached(entry))
        .nth(count.saturating_sub(1) as usize)
}

impl NativeCursor<Memory> for MemoryCursor {
    fn direction(&self) -> CursorDirection {
        self.traversal.direction
    }

    fn key(&self) -> Value {
        self.entry.key.to_value()
    }

    fn primary_key(&self) -> Value {
        self.entry.primary_key.to_value()
    }

    fn value(&self) -> Option<Value> {
        (!self.traversal.keys_only).then(|| self.entry.value.clone())
    }

    fn continue_(&self, key: Option<&Value>) -> NativeResult<()> {
        self.check_positioned()?;
        let seek = key.map(Key::parse).transpose()?;
        if let Some(seek) = &seek {
            let behind = if self.traversal.direction.is_reverse() {
                seek >= &self.entry.key
            } else {
                seek <= &self.entry.key
            };
            if behind {
                return Err(NativeError::new(
                    "DataError",
                    "The parameter is not past the cursor's current position.",
                ));
            }
        }
        Traversal::step(&self.traversal, seek, 1)
    }

    fn advance(&self, count: u32) -> NativeResult<()> {
        if count == 0 {
            return Err(NativeError::new(
                "TypeError",
                "The count argument must be greater than zero.",
            ));
        }
        self.check_positioned()?;
        Traversal::step(&self.traversal, None, count)
    }

    fn update(&self, value: &Value) -> NativeResult<MemoryRequest<Value>> {
        self.check_writable()?;
        let target = &self.traversal.target;
        let in_line = {
            let state = target.engine.state();
            let store = state.store(target.source.database(), target.source.store())?;
            check_effective_key(store, value, &self.entry.primary_key)?;
            store.key_path.is_some()
        };
        let value = value.clone();
        let primary_key = self.entry.primary_key.clone();
        target.write(move |store| {
            let explicit = (!in_line).then_some(primary_key);
            Ok(store.write(value, explicit, true)?.to_value())
        })
    }

    fn delete(&self) -> NativeResult<MemoryRequest<()>> {
        self.check_writable()?;
        let primary_key = self.entry.primary_key.clone();
        self.traversal.target.write(move |store| {
            store.records.remove(&primary_key);
            Ok(())
        })
    }
}

impl std::fmt::Debug for MemoryCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCursor")
            .field("direction", &self.traversal.direction)
            .field("key", &self.entry.key)
            .field("primary_key", &self.entry.primary_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: Value, primary_key: Value) -> Entry {
        Entry {
            key: Key::from_value(&key).unwrap(),
            primary_key: Key::from_value(&primary_key).unwrap(),
            value: json!(null),
        }
    }

    fn walk(direction: CursorDirection) -> Vec<(Value, Value)> {
        let entries = vec![
            entry(json!("a"), json!(1)),
            entry(json!("a"), json!(2)),
            entry(json!("b"), json!(3)),
        ];
        let mut position = None;
        let mut seen = Vec::new();
        while let Some(next) = select(entries.clone(), direction, position.as_ref(), None, 1) {
            seen.push((next.key.to_value(), next.primary_key.to_value()));
            position = Some((next.key, next.primary_key));
        }
        seen
    }

    #[test]
    fn steps_in_every_direction() {
        assert_eq!(
            walk(CursorDirection::Next),
            vec![(json!("a"), json!(1)), (json!("a"), json!(2)), (json!("b"), json!(3))]
        );
        assert_eq!(
            walk(CursorDirection::Prev),
            vec![(json!("b"), json!(3)), (json!("a"), json!(2)), (json!("a"), json!(1))]
        );
        assert_eq!(
            walk(CursorDirection::NextUnique),
            vec![(json!("a"), json!(1)), (json!("b"), json!(3))]
        );
        assert_eq!(
            walk(CursorDirection::PrevUnique),
            vec![(json!("b"), json!(3)), (json!("a"), json!(1))]
        );
    }

    #[test]
    fn seeks_and_advances() {
        let entries: Vec<Entry> = (1..=5).map(|n| entry(json!(n), json!(n))).collect();
        let start = (Key::Number(1.0), Key::Number(1.0));

        let sought = select(entries.clone(), CursorDirection::Next, Some(&start), Some(&Key::Number(4.0)), 1);
        assert_eq!(sought.map(|e| e.key.to_value()), Some(json!(4)));

        let skipped = select(entries.clone(), CursorDirection::Next, Some(&start), None, 3);
        assert_eq!(skipped.map(|e| e.key.to_value()), Some(json!(4)));

        let past_end = select(entries, CursorDirection::Next, Some(&start), None, 10);
        assert!(past_end.is_none());
    }
}
