//! Identifier renumbering and source-location rewriting
//!
//! Both passes take the state they need as arguments and hand back what the
//! next caller needs. The identifier counter is threaded explicitly through
//! [`renumber_ids`] so that one merge can renumber many files into a single
//! disjoint id space.

use serde_json::Value;
use tracing::{debug, warn};

use crate::ast::{node_id, NodeId, SourceUnit, SrcLocation};

/// Assign fresh ids to one source unit, starting at `counter`.
///
/// The walk is post-order with object keys visited in document order, so a
/// declaration's id is always greater than every id inside its `body`. An id
/// below the counter is left over from the per-file compilation and gets
/// replaced; an id at or above the counter is kept and the counter moves
/// past it. Nodes without an id receive one.
///
/// Returns the next free counter value.
pub fn renumber_ids(unit: &mut SourceUnit, counter: NodeId) -> NodeId {
    let next = renumber_value(unit.tree_mut(), counter);
    normalize_exports(unit);
    debug!(
        path = unit.absolute_path(),
        first = counter,
        next, "renumbered source unit"
    );
    next
}

fn renumber_value(value: &mut Value, mut counter: NodeId) -> NodeId {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                counter = renumber_value(child, counter);
            }

            let numeric_id = map.get("id").is_some_and(Value::is_i64);
            if !map.contains_key("nodeType") && !numeric_id {
                return counter;
            }

            let current = map.get("id").and_then(Value::as_i64);
            match current {
                Some(id) if id >= counter => counter = id + 1,
                _ => {
                    map.insert("id".to_string(), Value::from(counter));
                    counter += 1;
                }
            }
            counter
        }
        Value::Array(items) => {
            for item in items {
                counter = renumber_value(item, counter);
            }
            counter
        }
        _ => counter,
    }
}

/// Point every exported name declared in this unit at its declaration's final id
fn normalize_exports(unit: &mut SourceUnit) {
    let updates: Vec<(String, NodeId)> = unit
        .exported_symbols()
        .map(|symbols| {
            symbols
                .keys()
                .filter_map(|name| {
                    let id = unit.declaration(name).and_then(node_id)?;
                    Some((name.clone(), id))
                })
                .collect()
        })
        .unwrap_or_default();

    for (name, id) in updates {
        unit.set_exported(&name, id);
    }
}

/// Rewrite the file-index component of every source location in `value`.
///
/// Covers `src`, `nameLocation` and each entry of `nameLocations`. Returns
/// how many locations were rewritten.
pub fn rewrite_src(value: &mut Value, file_index: i64) -> usize {
    match value {
        Value::Object(map) => {
            let mut rewritten = 0;
            for (key, child) in map.iter_mut() {
                match (key.as_str(), child) {
                    ("src" | "nameLocation", Value::String(location)) => {
                        rewritten += rewrite_location(location, file_index);
                    }
                    ("nameLocations", Value::Array(locations)) => {
                        for location in locations {
                            if let Value::String(location) = location {
                                rewritten += rewrite_location(location, file_index);
                            }
                        }
                    }
                    (_, child) => rewritten += rewrite_src(child, file_index),
                }
            }
            rewritten
        }
        Value::Array(items) => items
            .iter_mut()
            .map(|item| rewrite_src(item, file_index))
            .sum(),
        _ => 0,
    }
}

fn rewrite_location(location: &mut String, file_index: i64) -> usize {
    match location.parse::<SrcLocation>() {
        Ok(src) if src.is_unset() => 0,
        Ok(src) => {
            *location = src.with_file_index(file_index).to_string();
            1
        }
        Err(err) => {
            warn!("Leaving source location untouched: {}", err);
            0
        }
    }
}
