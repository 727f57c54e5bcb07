//! Observable data trees with event propagation and undo.
//!
//! This crate provides the data-binding layer used by editors and tools that
//! need to react to changes in structured JSON-like documents:
//!
//! - **Events**: Named publish/subscribe emitter with once-listeners,
//!   panic isolation and forwarding
//! - **Observer**: Path-addressed JSON tree whose mutations emit typed events
//!   and propagate through nested observers
//! - **ObserverList**: Flat collection with optional sorting and id index
//! - **History**: Linear undo/redo stack with combinable actions
//! - **ObserverHistory**: Records observer changes into a history
//!
//! # Example
//!
//! ```
//! use horizon_observer::{History, Observer, ObserverEvent, ObserverHistory};
//! use serde_json::json;
//!
//! let entity = Observer::from_json(json!({
//!     "name": "Camera",
//!     "components": { "camera": { "fov": 45 } },
//!     "children": []
//! }))
//! .unwrap();
//!
//! // React to any change anywhere in the tree
//! entity.on("*:set", |event| {
//!     if let ObserverEvent::Set { path, value, .. } = event {
//!         println!("{path} = {:?}", value.to_json());
//!     }
//! });
//!
//! // Record changes for undo
//! let history = History::new();
//! let _recorder = ObserverHistory::new(&entity, &history);
//!
//! entity.set("components.camera.fov", 60);
//! entity.insert("children", json!({ "name": "Lens" }), None);
//!
//! history.undo();
//! history.undo();
//! assert_eq!(entity.get("components.camera.fov"), Some(json!(45)));
//! assert_eq!(entity.array_len("children"), Ok(0));
//! ```

mod config;
mod error;
pub mod events;
mod history;
mod list;
pub mod logging;
mod observer;
mod observer_history;
pub mod path;
mod tree;
mod value;

pub use config::{HistoryConfig, ObserverBuilder, ObserverConfig};
pub use error::{Error, HistoryError, HistoryResult, ObserverError, ObserverResult, Result};
pub use events::{ConnectionId, EventHandle, Events, Listener};
pub use history::{event_names, ActionFn, History, HistoryAction, HistoryEvent};
pub use list::{Comparator, ListEvent, ListItem, ListKey, ObserverList};
pub use logging::{TreeDebug, TreeFormatOptions, TreeStyle};
pub use observer::{
    FieldKind, ForEachEntry, LatestFn, MutationOptions, Observer, ObserverEvent, ParentKey,
    Recorder, SilenceState, WeakObserver, DESTROY, VERBS,
};
pub use observer_history::ObserverHistory;
pub use value::{array_equals, Value};
