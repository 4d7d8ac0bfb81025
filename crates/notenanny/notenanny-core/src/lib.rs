//! Runs code fences embedded in notes and writes fingerprint-tagged output
//! back next to them.

pub mod config;
pub mod document;
pub mod files;
pub mod fingerprint;
pub mod interpreter;
pub mod meta;
pub mod reconcile;
pub mod scan;
pub mod segments;
pub mod store;
pub mod trigger;

pub use config::{FormatterSpec, TriggerConfig};
pub use document::{CursorPosition, Document};
pub use fingerprint::fingerprint;
pub use meta::MetaState;
pub use reconcile::{Reconciler, Reconciliation};
pub use scan::{PassPacer, PassReport, Scanner, SleepPacer};
pub use store::{CursorPlacer, DocumentQuery, DocumentStore, MemoryStore, NoopCursor, WriteBack};
pub use trigger::{Detection, MarkerLocation};
