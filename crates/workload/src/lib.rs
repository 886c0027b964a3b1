//! Kroll workload accessors.
//!
//! Everything here works on untyped objects (`serde_json::Value`) as returned by a
//! dynamic client and dispatches through the kind registry in `kroll-core`:
//! - `decode`: typed views and status snapshots per status policy
//! - `accessor`: container lists and pod selectors across schema variants
//! - `resources` / `env`: pure container mutations

#![forbid(unsafe_code)]

pub mod accessor;
pub mod decode;
pub mod env;
pub mod resources;

pub use accessor::{containers_of, containers_patch, namespace_of, name_of, selector_for, set_containers};
pub use decode::{identity_of, parse_revision, progress_deadline_exceeded, revision_of, snapshot_for};
pub use env::{inject_restart_marker, restart_marker, update_env, RESTARTED_AT};
pub use resources::{merge_resources, parse_quantity, parse_resource_list, select_containers, ResourceList};
