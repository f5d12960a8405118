//! Native queries and storage pipeline stages.
//!
//! Stage order is significant: the storage engine applies stages one after
//! the other to the documents of the primary collection.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::filter::Operator;
use crate::selection::Projection;
use crate::value::Scalar;

/// A boolean query in the storage engine's native shape.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeQuery {
    /// Matches every document. Serializes as `{}`.
    Empty,
    /// `{field: {op: value}}`
    Compare {
        field: String,
        operator: Operator,
        value: Scalar,
    },
    /// `{and: [...]}`
    And(Vec<NativeQuery>),
    /// `{or: [...]}`
    Or(Vec<NativeQuery>),
    /// `{not: query}`
    Not(Box<NativeQuery>),
}

impl NativeQuery {
    /// Equality on a single field.
    pub fn eq(field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        NativeQuery::Compare {
            field: field.into(),
            operator: Operator::Eq,
            value: value.into(),
        }
    }
}

impl Serialize for NativeQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NativeQuery::Empty => serializer.serialize_map(Some(0))?.end(),
            NativeQuery::Compare {
                field,
                operator,
                value,
            } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(field, &OperatorValue(*operator, value))?;
                map.end()
            }
            NativeQuery::And(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("and", children)?;
                map.end()
            }
            NativeQuery::Or(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("or", children)?;
                map.end()
            }
            NativeQuery::Not(child) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("not", child)?;
                map.end()
            }
        }
    }
}

struct OperatorValue<'a>(Operator, &'a Scalar);

impl Serialize for OperatorValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.0.native_name(), self.1)?;
        map.end()
    }
}

/// One traversable relation from a primary entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationSpec {
    /// Collection holding the related documents.
    pub target_collection: String,
    /// Path on the host document holding the join key.
    pub local_field: String,
    /// Path on the related document matched against the join key.
    pub foreign_field: String,
    /// Field the joined documents are written to.
    pub alias: String,
}

impl RelationSpec {
    pub fn new(
        target_collection: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            target_collection: target_collection.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            alias: alias.into(),
        }
    }
}

/// Join stage body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lookup {
    pub from: String,
    #[serde(rename = "localField")]
    pub local_field: String,
    #[serde(rename = "foreignField")]
    pub foreign_field: String,
    #[serde(rename = "as")]
    pub alias: String,
    /// Sub-pipeline applied to the related documents before they are joined.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<Stage>,
}

impl Lookup {
    /// Join stage for a relation, optionally restricted by a native query.
    pub fn from_relation(relation: &RelationSpec, filter: Option<NativeQuery>) -> Self {
        Self {
            from: relation.target_collection.clone(),
            local_field: relation.local_field.clone(),
            foreign_field: relation.foreign_field.clone(),
            alias: relation.alias.clone(),
            pipeline: filter.map(Stage::Match).into_iter().collect(),
        }
    }
}

/// Flatten stage body. Never preserves hosts whose array is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unwind {
    pub path: String,
}

/// A single pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Match(NativeQuery),
    Lookup(Lookup),
    Unwind(Unwind),
    Project(Projection),
}

impl Stage {
    /// Stage name as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Match(_) => "match",
            Stage::Lookup(_) => "lookup",
            Stage::Unwind(_) => "unwind",
            Stage::Project(_) => "project",
        }
    }
}

/// An ordered list of stages executed as one logical query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Pipeline(Vec<Stage>);

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage) {
        self.0.push(stage);
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.0.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_native_query_shape() {
        let query = NativeQuery::Or(vec![
            NativeQuery::eq("status", "SHIPPED"),
            NativeQuery::Not(Box::new(NativeQuery::Compare {
                field: "total".into(),
                operator: Operator::Lte,
                value: Scalar::Float(9.5),
            })),
        ]);

        assert_eq!(
            serde_json::to_value(&query).unwrap(),
            json!({"or": [{"status": {"eq": "SHIPPED"}}, {"not": {"total": {"lte": 9.5}}}]})
        );
        assert_eq!(serde_json::to_value(NativeQuery::Empty).unwrap(), json!({}));
    }

    #[test]
    fn test_pipeline_wire_shape() {
        let relation = RelationSpec::new("users", "user_id", "_id", "users");
        let mut projection = Projection::new();
        projection.include("status");

        let pipeline = Pipeline::new()
            .with_stage(Stage::Match(NativeQuery::Empty))
            .with_stage(Stage::Lookup(Lookup::from_relation(
                &relation,
                Some(NativeQuery::eq("profile.location", "IND")),
            )))
            .with_stage(Stage::Unwind(Unwind { path: "users".into() }))
            .with_stage(Stage::Project(projection));

        assert_eq!(
            serde_json::to_value(&pipeline).unwrap(),
            json!([
                {"match": {}},
                {"lookup": {
                    "from": "users",
                    "localField": "user_id",
                    "foreignField": "_id",
                    "as": "users",
                    "pipeline": [{"match": {"profile.location": {"eq": "IND"}}}]
                }},
                {"unwind": {"path": "users"}},
                {"project": {"status": true}}
            ])
        );
    }

    #[test]
    fn test_lookup_without_filter_omits_pipeline() {
        let relation = RelationSpec::new("tests", "test_id", "_id", "test");
        let value = serde_json::to_value(Lookup::from_relation(&relation, None)).unwrap();
        assert!(value.get("pipeline").is_none());
    }
}
