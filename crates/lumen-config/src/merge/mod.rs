//! Deep merge of TOML values.
//!
//! The merge operates on raw [`toml::Value`] trees rather than deserialized
//! structs. This correctly handles "absent vs default": a missing key in a
//! TOML table will not override the base layer.

mod deep;
mod types;

pub use deep::{deep_merge, deep_merge_tracking};
pub use types::{ConfigLayer, FieldSources};

/// Mark every leaf of the defaults tree with [`ConfigLayer::Defaults`].
pub(crate) fn record_defaults(val: &toml::Value, sources: &mut FieldSources) {
    deep::record_leaves(val, "", &ConfigLayer::Defaults, sources);
}
