use serde::Serialize;

/// Canonical JSON bytes of a serializable value: keys sorted recursively,
/// compact separators, UTF-8.
///
/// `serde_json` maps are BTreeMaps (the `preserve_order` feature is not
/// enabled anywhere in this workspace), so routing a value through
/// `serde_json::Value` sorts every object level; compact output is the
/// default `to_vec` form.
pub fn canonical<T: Serialize>(value: &T) -> Vec<u8> {
    match serde_json::to_value(value) {
        Ok(v) => serde_json::to_vec(&v).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Zebra {
        zulu: u32,
        alpha: &'static str,
    }

    #[test]
    fn keys_are_sorted_and_output_is_compact() {
        let bytes = canonical(&Zebra { zulu: 1, alpha: "x" });
        assert_eq!(bytes, br#"{"alpha":"x","zulu":1}"#);
    }

    #[test]
    fn nested_objects_sort_recursively() {
        let v = serde_json::json!({
            "outer_b": {"z": 1, "a": 2},
            "outer_a": [{"y": 1, "x": 2}],
        });
        assert_eq!(
            canonical(&v),
            br#"{"outer_a":[{"x":2,"y":1}],"outer_b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn canonicalization_is_stable() {
        let v = serde_json::json!({"b": [1, 2, 3], "a": null});
        assert_eq!(canonical(&v), canonical(&v));
    }
}
