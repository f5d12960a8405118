//! Attaching resolved relations to host documents.

use std::collections::{BTreeSet, HashMap};

use docql_proto::document::path_values;
use docql_proto::Document;
use serde_json::Value;

use crate::catalog::RelationDef;
use crate::error::Error;
use crate::loader::id_key;
use crate::store::flatten;

/// Attach referenced targets under the relation's last path segment.
///
/// The reference is read next to the attach key, so `items.product` reads
/// `product_id` of every item and stores the product on the same item. An
/// array of references attaches an array of targets. A reference whose
/// target is missing from `resolved` is a not-found error.
pub(super) fn attach_referenced(
    relation: &RelationDef,
    docs: &mut [Document],
    resolved: &HashMap<String, Document>,
) -> Result<(), Error> {
    let lookup = |id: &Value| {
        let id = id_key(id);
        resolved
            .get(&id)
            .cloned()
            .map(Value::Object)
            .ok_or_else(|| Error::not_found(relation.target, id))
    };

    let mut attach = |host: &mut Document| -> Result<(), Error> {
        let value = match host.get(relation.reference_field()) {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Array(ids)) => Value::Array(ids.iter().map(lookup).collect::<Result<_, _>>()?),
            Some(id) => lookup(id)?,
        };
        host.insert(relation.attach_key().to_string(), value);
        Ok(())
    };

    let segments: Vec<&str> = relation.container().map_or(Vec::new(), |c| c.split('.').collect());
    for doc in docs.iter_mut() {
        visit_object(doc, &segments, &mut attach)?;
    }
    Ok(())
}

/// Attach each host's children as an array under the relation's attach key.
/// Hosts without children get an empty array.
pub(super) fn attach_children(relation: &RelationDef, docs: &mut [Document], children: Vec<Document>) {
    let foreign = &relation.join.foreign_field;
    let mut groups: HashMap<String, Vec<Document>> = HashMap::new();
    for child in children {
        let owners: BTreeSet<String> = flatten(path_values(&child, foreign))
            .into_iter()
            .map(id_key)
            .collect();
        for owner in owners {
            groups.entry(owner).or_default().push(child.clone());
        }
    }

    for doc in docs.iter_mut() {
        let hosts: BTreeSet<String> = flatten(path_values(doc, &relation.join.local_field))
            .into_iter()
            .map(id_key)
            .collect();
        let attached: Vec<Value> = hosts
            .iter()
            .filter_map(|host| groups.get(host))
            .flatten()
            .cloned()
            .map(Value::Object)
            .collect();
        doc.insert(relation.attach_key().to_string(), Value::Array(attached));
    }
}

fn visit_object<F>(map: &mut Document, segments: &[&str], f: &mut F) -> Result<(), Error>
where
    F: FnMut(&mut Document) -> Result<(), Error>,
{
    match segments.split_first() {
        None => f(map),
        Some((head, rest)) => match map.get_mut(*head) {
            Some(value) => visit_value(value, rest, f),
            None => Ok(()),
        },
    }
}

fn visit_value<F>(value: &mut Value, segments: &[&str], f: &mut F) -> Result<(), Error>
where
    F: FnMut(&mut Document) -> Result<(), Error>,
{
    match value {
        Value::Object(map) => visit_object(map, segments, f),
        Value::Array(items) => {
            for item in items {
                visit_value(item, segments, f)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
