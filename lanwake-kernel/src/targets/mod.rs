/**
 * TARGET REGISTRY - Named LAN hosts that can be pinged, woken and powered off
 *
 * ROLE: durable store of targets (name, IPv4, optional MAC, timestamps) plus
 * an in-memory runtime overlay (last status, last wake).
 *
 * PERSISTENCE: a single JSON document `{"targets": [...]}` sorted by name,
 * sanitized on every load and replaced atomically on every write.
 *
 * LOCKING: one mutex covers the file and the overlay for the whole
 * read-modify-write cycle. Audit events are appended after it is released.
 */

mod model;
mod registry;
mod runtime;
mod store;
mod validate;

pub use model::{NewTarget, Target, TargetPatch};
pub use registry::Registry;
pub use store::seed_target;
pub use validate::normalize_mac;
