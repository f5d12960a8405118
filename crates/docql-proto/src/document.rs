//! Dotted-path helpers over raw documents.
//!
//! Paths use document-store semantics: a segment applied to an array is
//! applied to every element of that array, so `items.product_id` reaches the
//! `product_id` of each order item.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::value::Document;

/// Collect every value reachable at `path`.
pub fn path_values<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    let mut segments = path.split('.');
    if let Some(first) = segments.next() {
        if let Some(value) = doc.get(first) {
            let rest: Vec<&str> = segments.collect();
            collect_path(value, &rest, &mut out);
        }
    }
    out
}

fn collect_path<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, tail)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect_path(child, tail, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_path(item, segments, out);
            }
        }
        _ => {}
    }
}

/// Every leaf path present in a document.
///
/// Scalars, nulls, arrays holding no objects and empty objects are leaves.
/// A path leading to a non-empty object is never reported, since the object
/// may be a projection of a larger stored value.
pub fn document_paths(doc: &Document) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    collect_object_paths(doc, "", &mut paths);
    paths
}

fn collect_object_paths(map: &Document, prefix: &str, paths: &mut BTreeSet<String>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        collect_value_paths(value, path, paths);
    }
}

fn collect_value_paths(value: &Value, path: String, paths: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if !map.is_empty() => collect_object_paths(map, &path, paths),
        Value::Array(items) if items.iter().any(Value::is_object) => {
            for item in items.iter().filter(|item| item.is_object()) {
                collect_value_paths(item, path.clone(), paths);
            }
        }
        _ => {
            paths.insert(path);
        }
    }
}

/// Deep-merge `other` into `base`.
///
/// Objects merge key by key; arrays of equal length merge element-wise, which
/// reassembles two projections of the same stored array. Anything else in
/// `other` replaces the value in `base`.
pub fn merge_documents(base: &mut Document, other: Document) {
    for (key, incoming) in other {
        match base.get_mut(&key) {
            Some(existing) => merge_value(existing, incoming),
            None => {
                base.insert(key, incoming);
            }
        }
    }
}

fn merge_value(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(next)) => merge_documents(current, next),
        (Value::Array(current), Value::Array(next)) if current.len() == next.len() => {
            for (slot, item) in current.iter_mut().zip(next) {
                merge_value(slot, item);
            }
        }
        (slot, incoming) => *slot = incoming,
    }
}

/// Keep only the given dotted paths of a document.
///
/// Paths traverse arrays element-wise; scalars inside an array that is
/// traversed further are dropped. A path that covers a parent keeps the
/// parent's whole value.
pub fn select_paths<'a, I>(doc: &Document, paths: I) -> Document
where
    I: IntoIterator<Item = &'a str>,
{
    let mut trie = PathTrie::default();
    for path in paths {
        trie.insert(path);
    }
    trie.select(doc)
}

#[derive(Default)]
struct PathTrie {
    whole: bool,
    children: BTreeMap<String, PathTrie>,
}

impl PathTrie {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.') {
            if node.whole {
                return;
            }
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.whole = true;
        node.children.clear();
    }

    fn select(&self, doc: &Document) -> Document {
        let mut out = Document::new();
        for (key, child) in &self.children {
            let Some(value) = doc.get(key) else { continue };
            if child.whole {
                out.insert(key.clone(), value.clone());
            } else if let Some(selected) = child.select_value(value) {
                out.insert(key.clone(), selected);
            }
        }
        out
    }

    fn select_value(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Object(map) => Some(Value::Object(self.select(map))),
            Value::Array(items) => Some(Value::Array(
                items.iter().filter_map(|item| self.select_value(item)).collect(),
            )),
            _ => None,
        }
    }
}
