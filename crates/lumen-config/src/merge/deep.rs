use super::{ConfigLayer, FieldSources};

/// Recursively deep-merge `overlay` into `base`.
///
/// Tables merge per field. Scalars and arrays from the overlay replace the
/// base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                match base_table.get_mut(key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => {
                        base_table.insert(key.clone(), overlay_val.clone());
                    },
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Deep-merge `overlay` into `base`, recording `layer` as the source of
/// every leaf the overlay sets. `prefix` is the dotted path of `base`.
pub fn deep_merge_tracking(
    base: &mut toml::Value,
    overlay: &toml::Value,
    prefix: &str,
    layer: &ConfigLayer,
    sources: &mut FieldSources,
) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let path = join_path(prefix, key);
                match base_table.get_mut(key) {
                    Some(base_val) if overlay_val.is_table() => {
                        deep_merge_tracking(base_val, overlay_val, &path, layer, sources);
                    },
                    Some(base_val) => {
                        *base_val = overlay_val.clone();
                        sources.insert(path, layer.clone());
                    },
                    None => {
                        base_table.insert(key.clone(), overlay_val.clone());
                        record_leaves(overlay_val, &path, layer, sources);
                    },
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
            sources.insert(prefix.to_owned(), layer.clone());
        },
    }
}

/// Record every leaf under `val` as coming from `layer`.
pub(crate) fn record_leaves(
    val: &toml::Value,
    prefix: &str,
    layer: &ConfigLayer,
    sources: &mut FieldSources,
) {
    if let toml::Value::Table(table) = val {
        for (key, child) in table {
            record_leaves(child, &join_path(prefix, key), layer, sources);
        }
    } else {
        sources.insert(prefix.to_owned(), layer.clone());
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> toml::Value {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn test_overlay_replaces_scalars_keeps_siblings() {
        let mut base = parse("[storage]\nbackend = \"durable\"\nbundled = false\n");
        deep_merge(&mut base, &parse("[storage]\nbundled = true\n"));
        assert_eq!(base, parse("[storage]\nbackend = \"durable\"\nbundled = true\n"));
    }

    #[test]
    fn test_arrays_replace() {
        let mut base = parse("[logging]\ndirectives = [\"a=debug\", \"b=warn\"]\n");
        deep_merge(&mut base, &parse("[logging]\ndirectives = [\"c=info\"]\n"));
        assert_eq!(base, parse("[logging]\ndirectives = [\"c=info\"]\n"));
    }

    #[test]
    fn test_tracking_records_file_layer() {
        let mut base = parse("[storage]\nbackend = \"durable\"\n");
        let mut sources = FieldSources::new();
        record_leaves(&base, "", &ConfigLayer::Defaults, &mut sources);

        let overlay = parse("[storage]\nbackend = \"memory\"\ndata_dir = \"/tmp/x\"\n");
        deep_merge_tracking(&mut base, &overlay, "", &ConfigLayer::File, &mut sources);

        assert_eq!(sources.get("storage.backend"), Some(&ConfigLayer::File));
        assert_eq!(sources.get("storage.data_dir"), Some(&ConfigLayer::File));
    }

    #[test]
    fn test_tracking_leaves_untouched_fields() {
        let mut base = parse("[logging]\nlevel = \"info\"\nformat = \"compact\"\n");
        let mut sources = FieldSources::new();
        record_leaves(&base, "", &ConfigLayer::Defaults, &mut sources);

        deep_merge_tracking(
            &mut base,
            &parse("[logging]\nlevel = \"debug\"\n"),
            "",
            &ConfigLayer::File,
            &mut sources,
        );
        assert_eq!(sources.get("logging.format"), Some(&ConfigLayer::Defaults));
        assert_eq!(sources.get("logging.level"), Some(&ConfigLayer::File));
    }
}
