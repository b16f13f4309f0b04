//! Browser backend over web-sys IndexedDB handles.
//!
//! Every native event is bridged with a `wasm_bindgen::closure::Closure`.
//! Closures live in an `Rc<RefCell<Option<..>>>` next to the handle they
//! listen to and are released once the request or transaction reaches a
//! terminal event; cursor requests keep theirs until the end of the range.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    DomException, DomStringList, Event, IdbCursor, IdbCursorDirection, IdbCursorWithValue,
    IdbDatabase, IdbFactory, IdbIndex, IdbIndexParameters, IdbKeyRange, IdbObjectStore,
    IdbObjectStoreParameters, IdbOpenDbRequest, IdbRequest, IdbTransaction, IdbTransactionMode,
    IdbVersionChangeEvent,
};

use crate::error::{Error, NativeError, Result};
use crate::native::{
    Backend, Blocked, Listeners, NativeCursor, NativeDatabase, NativeFactory, NativeIndex,
    NativeRequest, NativeResult, NativeSource, NativeStore, NativeTransaction,
    TransactionListeners, UpgradeNeeded,
};
use crate::types::{
    CursorDirection, IndexOptions, KeyPath, KeyRange, Query, StoreOptions, TransactionMode,
};

/// Marker type selecting the web-sys handles.
pub enum Web {}

impl Backend for Web {
    type Value = JsValue;
    type Database = WebDatabase;
    type Transaction = WebTransaction;
    type Store = WebStore;
    type Index = WebIndex;
    type Cursor = WebCursor;
    type Request<T: 'static> = WebRequest<T>;
}

type EventClosure = Closure<dyn FnMut(Event)>;
type VersionChangeClosure = Closure<dyn FnMut(IdbVersionChangeEvent)>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into()).map_err(Error::from)?;

    if idb.is_undefined() || idb.is_null() {
        return Err(Error::NotAvailable("indexedDB is null/undefined".into()));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| Error::NotAvailable("indexedDB is not IdbFactory".into()))
}

fn dom_error(exception: DomException) -> NativeError {
    NativeError::new(exception.name(), exception.message())
}

/// Exceptions thrown by synchronous calls.
fn native_error(value: JsValue) -> NativeError {
    match value.dyn_into::<DomException>() {
        Ok(exception) => dom_error(exception),
        Err(value) => {
            let message = js_sys::JSON::stringify(&value)
                .map(String::from)
                .unwrap_or_else(|_| format!("{:?}", value));
            NativeError::new("Error", message)
        }
    }
}

fn conversion_error(expected: &str) -> NativeError {
    NativeError::new("TypeError", format!("request result is not {}", expected))
}

fn string_list(list: DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.item(i)).collect()
}

fn key_path_to_js(key_path: &KeyPath) -> JsValue {
    match key_path {
        KeyPath::Single(path) => JsValue::from_str(path),
        KeyPath::Compound(paths) => paths.iter().map(|path| JsValue::from_str(path)).collect::<Array>().into(),
    }
}

fn key_path_from_js(value: JsValue) -> Option<KeyPath> {
    if let Some(path) = value.as_string() {
        return Some(KeyPath::Single(path));
    }
    let paths = value.dyn_into::<Array>().ok()?;
    Some(KeyPath::Compound(paths.iter().filter_map(|path| path.as_string()).collect()))
}

fn range_to_js(range: &KeyRange<JsValue>) -> NativeResult<JsValue> {
    let range = match (&range.lower, &range.upper) {
        (Some(lower), Some(upper)) => IdbKeyRange::bound_with_lower_open_and_upper_open(
            lower,
            upper,
            range.lower_open,
            range.upper_open,
        ),
        (Some(lower), None) => IdbKeyRange::lower_bound_with_open(lower, range.lower_open),
        (None, Some(upper)) => IdbKeyRange::upper_bound_with_open(upper, range.upper_open),
        (None, None) => return Ok(JsValue::UNDEFINED),
    };
    range.map(JsValue::from).map_err(native_error)
}

fn query_to_js(query: Option<&Query<JsValue>>) -> NativeResult<JsValue> {
    match query {
        None => Ok(JsValue::UNDEFINED),
        Some(Query::Key(key)) => Ok(key.clone()),
        Some(Query::Range(range)) => range_to_js(range),
    }
}

fn idb_mode(mode: TransactionMode) -> IdbTransactionMode {
    match mode {
        TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
        TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        TransactionMode::VersionChange => IdbTransactionMode::Versionchange,
    }
}

fn idb_direction(direction: CursorDirection) -> IdbCursorDirection {
    match direction {
        CursorDirection::Next => IdbCursorDirection::Next,
        CursorDirection::NextUnique => IdbCursorDirection::Nextunique,
        CursorDirection::Prev => IdbCursorDirection::Prev,
        CursorDirection::PrevUnique => IdbCursorDirection::Prevunique,
    }
}

fn set_property(target: &JsValue, name: &str, value: &JsValue) -> NativeResult<()> {
    js_sys::Reflect::set(target, &name.into(), value)
        .map(|_| ())
        .map_err(native_error)
}

/// The `indexedDB` global.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebFactory;

impl WebFactory {
    pub fn new() -> Self {
        Self
    }

    fn factory(&self) -> NativeResult<IdbFactory> {
        idb_factory().map_err(|err| NativeError::new("NotSupportedError", err.to_string()))
    }
}

impl NativeFactory for WebFactory {
    type Backend = Web;

    fn ensure_available(&self) -> Result<()> {
        idb_factory().map(|_| ())
    }

    fn open(&self, name: &str, version: Option<u32>) -> NativeResult<WebRequest<WebDatabase>> {
        let factory = self.factory()?;
        let request: IdbOpenDbRequest = match version {
            Some(version) => factory.open_with_u32(name, version),
            None => factory.open(name),
        }
        .map_err(native_error)?;
        Ok(WebRequest::new(request.unchecked_into(), |result| {
            result
                .dyn_into::<IdbDatabase>()
                .map(WebDatabase::new)
                .map_err(|_| conversion_error("an IDBDatabase"))
        }))
    }

    fn delete_database(&self, name: &str) -> NativeResult<WebRequest<()>> {
        let request = self.factory()?.delete_database(name).map_err(native_error)?;
        Ok(WebRequest::new(request.unchecked_into(), to_unit))
    }
}

struct RequestClosures {
    _success: EventClosure,
    _error: EventClosure,
    _blocked: Option<VersionChangeClosure>,
    _upgrade: Option<VersionChangeClosure>,
}

/// An `IDBRequest` with the conversion of its result.
pub struct WebRequest<T> {
    request: IdbRequest,
    convert: fn(JsValue) -> NativeResult<T>,
    /// Whether a success result ends the request. Cursor requests fire
    /// again until they deliver `null`.
    terminal: fn(&T) -> bool,
}

impl<T> WebRequest<T> {
    fn new(request: IdbRequest, convert: fn(JsValue) -> NativeResult<T>) -> Self {
        Self {
            request,
            convert,
            terminal: |_| true,
        }
    }
}

impl WebRequest<Option<WebCursor>> {
    fn cursor(request: IdbRequest) -> Self {
        Self {
            request,
            convert: |result| {
                if result.is_null() || result.is_undefined() {
                    return Ok(None);
                }
                let with_value = result.is_instance_of::<IdbCursorWithValue>();
                result
                    .dyn_into::<IdbCursor>()
                    .map(|cursor| Some(WebCursor { cursor, with_value }))
                    .map_err(|_| conversion_error("an IDBCursor"))
            },
            terminal: Option::is_none,
        }
    }
}

fn to_value(result: JsValue) -> NativeResult<JsValue> {
    Ok(result)
}

fn to_optional(result: JsValue) -> NativeResult<Option<JsValue>> {
    Ok((!result.is_undefined()).then_some(result))
}

fn to_array(result: JsValue) -> NativeResult<Vec<JsValue>> {
    result
        .dyn_into::<Array>()
        .map(|items| items.iter().collect())
        .map_err(|_| conversion_error("an array"))
}

fn to_count(result: JsValue) -> NativeResult<u32> {
    result
        .as_f64()
        .map(|count| count as u32)
        .ok_or_else(|| conversion_error("a number"))
}

fn to_unit(_: JsValue) -> NativeResult<()> {
    Ok(())
}

impl<T: 'static> NativeRequest<Web, T> for WebRequest<T> {
    fn listen(&self, listeners: Listeners<Web, T>) {
        let Listeners {
            mut on_success,
            on_error,
            mut on_blocked,
            on_upgrade_needed,
        } = listeners;
        let on_error = Rc::new(RefCell::new(on_error));
        let closures: Rc<RefCell<Option<RequestClosures>>> = Rc::new(RefCell::new(None));

        let request = self.request.clone();
        let convert = self.convert;
        let terminal = self.terminal;
        let release = closures.clone();
        let error_sink = on_error.clone();
        let success = Closure::wrap(Box::new(move |_event: Event| {
            let outcome = request.result().map_err(native_error).and_then(convert);
            let done = match outcome {
                Ok(value) => {
                    let done = terminal(&value);
                    on_success(value);
                    done
                }
                Err(err) => {
                    (*error_sink.borrow_mut())(err);
                    true
                }
            };
            if done {
                *release.borrow_mut() = None;
            }
        }) as Box<dyn FnMut(Event)>);

        let request = self.request.clone();
        let release = closures.clone();
        let error = Closure::wrap(Box::new(move |_event: Event| {
            let err = match request.error() {
                Ok(Some(exception)) => dom_error(exception),
                Ok(None) => NativeError::new("UnknownError", "request failed without an error"),
                Err(value) => native_error(value),
            };
            (*on_error.borrow_mut())(err);
            *release.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        self.request.set_onsuccess(Some(success.as_ref().unchecked_ref()));
        self.request.set_onerror(Some(error.as_ref().unchecked_ref()));

        let mut blocked = None;
        let mut upgrade = None;
        if let Some(open_request) = self.request.dyn_ref::<IdbOpenDbRequest>() {
            let on_blocked_closure = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
                on_blocked(Blocked {
                    old_version: event.old_version() as u32,
                    new_version: event.new_version().map(|version| version as u32),
                });
            }) as Box<dyn FnMut(IdbVersionChangeEvent)>);
            open_request.set_onblocked(Some(on_blocked_closure.as_ref().unchecked_ref()));
            blocked = Some(on_blocked_closure);

            if let Some(mut handler) = on_upgrade_needed {
                let request = open_request.clone();
                let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
                    let database = request
                        .result()
                        .ok()
                        .and_then(|result| result.dyn_into::<IdbDatabase>().ok());
                    match (database, request.transaction()) {
                        (Some(database), Some(transaction)) => handler(UpgradeNeeded {
                            database: WebDatabase::new(database),
                            transaction: WebTransaction(transaction),
                            old_version: event.old_version() as u32,
                            new_version: event.new_version().unwrap_or_default() as u32,
                        }),
                        _ => tracing::error!("upgradeneeded fired without a database or transaction"),
                    }
                }) as Box<dyn FnMut(IdbVersionChangeEvent)>);
                open_request.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
                upgrade = Some(on_upgrade);
            }
        }

        *closures.borrow_mut() = Some(RequestClosures {
            _success: success,
            _error: error,
            _blocked: blocked,
            _upgrade: upgrade,
        });
    }
}

/// An open `IDBDatabase`.
#[derive(Clone)]
pub struct WebDatabase {
    database: IdbDatabase,
    on_error: Rc<RefCell<Option<EventClosure>>>,
}

impl WebDatabase {
    fn new(database: IdbDatabase) -> Self {
        Self {
            database,
            on_error: Rc::new(RefCell::new(None)),
        }
    }
}

impl NativeDatabase<Web> for WebDatabase {
    fn name(&self) -> String {
        self.database.name()
    }

    fn version(&self) -> u32 {
        self.database.version() as u32
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(self.database.object_store_names())
    }

    fn transaction(&self, stores: &[String], mode: TransactionMode) -> NativeResult<WebTransaction> {
        let names: Array = stores.iter().map(|name| JsValue::from_str(name)).collect();
        self.database
            .transaction_with_str_sequence_and_mode(&names, idb_mode(mode))
            .map(WebTransaction)
            .map_err(native_error)
    }

    fn create_object_store(&self, name: &str, options: &StoreOptions) -> NativeResult<WebStore> {
        let params = IdbObjectStoreParameters::new();
        if let Some(key_path) = &options.key_path {
            set_property(&params, "keyPath", &key_path_to_js(key_path))?;
        }
        set_property(&params, "autoIncrement", &JsValue::from_bool(options.auto_increment))?;
        self.database
            .create_object_store_with_optional_parameters(name, &params)
            .map(WebStore)
            .map_err(native_error)
    }

    fn delete_object_store(&self, name: &str) -> NativeResult<()> {
        self.database.delete_object_store(name).map_err(native_error)
    }

    fn set_error_listener(&self, mut listener: Box<dyn FnMut(NativeError)>) {
        let closure = Closure::wrap(Box::new(move |event: Event| {
            let err = event
                .target()
                .and_then(|target| target.dyn_into::<IdbRequest>().ok())
                .and_then(|request| request.error().ok().flatten())
                .map(dom_error)
                .unwrap_or_else(|| NativeError::new("UnknownError", "database error"));
            listener(err);
        }) as Box<dyn FnMut(Event)>);
        self.database.set_onerror(Some(closure.as_ref().unchecked_ref()));
        *self.on_error.borrow_mut() = Some(closure);
    }

    fn close(&self) {
        self.database.close();
        self.database.set_onerror(None);
        *self.on_error.borrow_mut() = None;
    }
}

/// An `IDBTransaction`.
#[derive(Clone)]
pub struct WebTransaction(IdbTransaction);

impl NativeTransaction<Web> for WebTransaction {
    fn mode(&self) -> TransactionMode {
        match self.0.mode() {
            Ok(IdbTransactionMode::Readwrite) => TransactionMode::ReadWrite,
            Ok(IdbTransactionMode::Versionchange) => TransactionMode::VersionChange,
            _ => TransactionMode::ReadOnly,
        }
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(self.0.object_store_names())
    }

    fn object_store(&self, name: &str) -> NativeResult<WebStore> {
        self.0.object_store(name).map(WebStore).map_err(native_error)
    }

    fn abort(&self) -> NativeResult<()> {
        self.0.abort().map_err(native_error)
    }

    fn listen(&self, listeners: TransactionListeners) {
        let TransactionListeners {
            on_complete,
            on_error,
            on_abort,
        } = listeners;
        let closures: Rc<RefCell<Option<[EventClosure; 3]>>> = Rc::new(RefCell::new(None));

        let mut on_complete = Some(on_complete);
        let release = closures.clone();
        let complete = Closure::wrap(Box::new(move |_event: Event| {
            if let Some(on_complete) = on_complete.take() {
                on_complete();
            }
            *release.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        let mut on_error = Some(on_error);
        let transaction = self.0.clone();
        let error = Closure::wrap(Box::new(move |event: Event| {
            // Error events bubble up from the failing request.
            let err = event
                .target()
                .and_then(|target| target.dyn_into::<IdbRequest>().ok())
                .and_then(|request| request.error().ok().flatten())
                .or_else(|| transaction.error())
                .map(dom_error)
                .unwrap_or_else(|| NativeError::new("UnknownError", "transaction error"));
            if let Some(on_error) = on_error.take() {
                on_error(err);
            }
        }) as Box<dyn FnMut(Event)>);

        let mut on_abort = Some(on_abort);
        let transaction = self.0.clone();
        let release = closures.clone();
        let abort = Closure::wrap(Box::new(move |_event: Event| {
            if let Some(on_abort) = on_abort.take() {
                on_abort(transaction.error().map(dom_error));
            }
            *release.borrow_mut() = None;
        }) as Box<dyn FnMut(Event)>);

        for (name, closure) in [("complete", &complete), ("error", &error), ("abort", &abort)] {
            let callback: &Function = closure.as_ref().unchecked_ref();
            if let Err(err) = self.0.add_event_listener_with_callback(name, callback) {
                tracing::error!(event = name, error = %native_error(err), "unable to listen to transaction");
            }
        }
        *closures.borrow_mut() = Some([complete, error, abort]);
    }
}

/// An `IDBObjectStore`.
#[derive(Clone)]
pub struct WebStore(IdbObjectStore);

/// An `IDBIndex`.
#[derive(Clone)]
pub struct WebIndex(IdbIndex);

// Object stores and indexes share every read method name in web-sys.
macro_rules! web_source {
    ($handle:ty) => {
        impl NativeSource<Web> for $handle {
            fn get(&self, query: &Query<JsValue>) -> NativeResult<WebRequest<Option<JsValue>>> {
                let request = self.0.get(&query_to_js(Some(query))?).map_err(native_error)?;
                Ok(WebRequest::new(request, to_optional))
            }

            fn get_key(&self, query: &Query<JsValue>) -> NativeResult<WebRequest<Option<JsValue>>> {
                let request = self.0.get_key(&query_to_js(Some(query))?).map_err(native_error)?;
                Ok(WebRequest::new(request, to_optional))
            }

            fn get_all(
                &self,
                query: Option<&Query<JsValue>>,
                count: Option<u32>,
            ) -> NativeResult<WebRequest<Vec<JsValue>>> {
                let query = query_to_js(query)?;
                let request = match count {
                    Some(count) => self.0.get_all_with_key_and_limit(&query, count),
                    None => self.0.get_all_with_key(&query),
                }
                .map_err(native_error)?;
                Ok(WebRequest::new(request, to_array))
            }

            fn get_all_keys(
                &self,
                query: Option<&Query<JsValue>>,
                count: Option<u32>,
            ) -> NativeResult<WebRequest<Vec<JsValue>>> {
                let query = query_to_js(query)?;
                let request = match count {
                    Some(count) => self.0.get_all_keys_with_key_and_limit(&query, count),
                    None => self.0.get_all_keys_with_key(&query),
                }
                .map_err(native_error)?;
                Ok(WebRequest::new(request, to_array))
            }

            fn count(&self, query: Option<&Query<JsValue>>) -> NativeResult<WebRequest<u32>> {
                let request = self.0.count_with_key(&query_to_js(query)?).map_err(native_error)?;
                Ok(WebRequest::new(request, to_count))
            }

            fn open_cursor(
                &self,
                query: Option<&Query<JsValue>>,
                direction: CursorDirection,
            ) -> NativeResult<WebRequest<Option<WebCursor>>> {
                let request = self
                    .0
                    .open_cursor_with_range_and_direction(&query_to_js(query)?, idb_direction(direction))
                    .map_err(native_error)?;
                Ok(WebRequest::cursor(request))
            }

            fn open_key_cursor(
                &self,
                query: Option<&Query<JsValue>>,
                direction: CursorDirection,
            ) -> NativeResult<WebRequest<Option<WebCursor>>> {
                let request = self
                    .0
                    .open_key_cursor_with_range_and_direction(&query_to_js(query)?, idb_direction(direction))
                    .map_err(native_error)?;
                Ok(WebRequest::cursor(request))
            }
        }
    };
}

web_source!(WebStore);
web_source!(WebIndex);

impl NativeStore<Web> for WebStore {
    fn name(&self) -> String {
        self.0.name()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.0.key_path().ok().and_then(key_path_from_js)
    }

    fn index_names(&self) -> Vec<String> {
        string_list(self.0.index_names())
    }

    fn auto_increment(&self) -> bool {
        self.0.auto_increment()
    }

    fn add(&self, value: &JsValue, key: Option<&JsValue>) -> NativeResult<WebRequest<JsValue>> {
        let request = match key {
            Some(key) => self.0.add_with_key(value, key),
            None => self.0.add(value),
        }
        .map_err(native_error)?;
        Ok(WebRequest::new(request, to_value))
    }

    fn put(&self, value: &JsValue, key: Option<&JsValue>) -> NativeResult<WebRequest<JsValue>> {
        let request = match key {
            Some(key) => self.0.put_with_key(value, key),
            None => self.0.put(value),
        }
        .map_err(native_error)?;
        Ok(WebRequest::new(request, to_value))
    }

    fn delete(&self, query: &Query<JsValue>) -> NativeResult<WebRequest<()>> {
        let request = self.0.delete(&query_to_js(Some(query))?).map_err(native_error)?;
        Ok(WebRequest::new(request, to_unit))
    }

    fn clear(&self) -> NativeResult<WebRequest<()>> {
        let request = self.0.clear().map_err(native_error)?;
        Ok(WebRequest::new(request, to_unit))
    }

    fn index(&self, name: &str) -> NativeResult<WebIndex> {
        self.0.index(name).map(WebIndex).map_err(native_error)
    }

    fn create_index(&self, name: &str, key_path: &KeyPath, options: &IndexOptions) -> NativeResult<WebIndex> {
        let params = IdbIndexParameters::new();
        set_property(&params, "unique", &JsValue::from_bool(options.unique))?;
        set_property(&params, "multiEntry", &JsValue::from_bool(options.multi_entry))?;
        let index = match key_path {
            KeyPath::Single(path) => self.0.create_index_with_str_and_optional_parameters(name, path, &params),
            KeyPath::Compound(_) => self.0.create_index_with_str_sequence_and_optional_parameters(
                name,
                &key_path_to_js(key_path),
                &params,
            ),
        };
        index.map(WebIndex).map_err(native_error)
    }

    fn delete_index(&self, name: &str) -> NativeResult<()> {
        self.0.delete_index(name).map_err(native_error)
    }

    fn transaction(&self) -> WebTransaction {
        WebTransaction(self.0.transaction())
    }
}

impl NativeIndex<Web> for WebIndex {
    fn name(&self) -> String {
        self.0.name()
    }

    fn key_path(&self) -> KeyPath {
        self.0
            .key_path()
            .ok()
            .and_then(key_path_from_js)
            .unwrap_or_else(|| KeyPath::Single(String::new()))
    }

    fn unique(&self) -> bool {
        self.0.unique()
    }

    fn multi_entry(&self) -> bool {
        self.0.multi_entry()
    }
}

/// An `IDBCursor`, or an `IDBCursorWithValue` when `with_value` is set.
#[derive(Clone)]
pub struct WebCursor {
    cursor: IdbCursor,
    with_value: bool,
}

impl NativeCursor<Web> for WebCursor {
    fn direction(&self) -> CursorDirection {
        match self.cursor.direction() {
            IdbCursorDirection::Nextunique => CursorDirection::NextUnique,
            IdbCursorDirection::Prev => CursorDirection::Prev,
            IdbCursorDirection::Prevunique => CursorDirection::PrevUnique,
            _ => CursorDirection::Next,
        }
    }

    fn key(&self) -> JsValue {
        self.cursor.key().unwrap_or(JsValue::UNDEFINED)
    }

    fn primary_key(&self) -> JsValue {
        self.cursor.primary_key().unwrap_or(JsValue::UNDEFINED)
    }

    fn value(&self) -> Option<JsValue> {
        if !self.with_value {
            return None;
        }
        self.cursor.unchecked_ref::<IdbCursorWithValue>().value().ok()
    }

    fn continue_(&self, key: Option<&JsValue>) -> NativeResult<()> {
        match key {
            Some(key) => self.cursor.continue_with_key(key),
            None => self.cursor.continue_(),
        }
        .map_err(native_error)
    }

    fn advance(&self, count: u32) -> NativeResult<()> {
        self.cursor.advance(count).map_err(native_error)
    }

    fn update(&self, value: &JsValue) -> NativeResult<WebRequest<JsValue>> {
        let request = self.cursor.update(value).map_err(native_error)?;
        Ok(WebRequest::new(request, to_value))
    }

    fn delete(&self) -> NativeResult<WebRequest<()>> {
        let request = self.cursor.delete().map_err(native_error)?;
        Ok(WebRequest::new(request, to_unit))
    }
}
