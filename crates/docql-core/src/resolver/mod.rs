//! Query resolution.
//!
//! [`Resolver`] answers entity listings and by-id lookups against a
//! [`RequestContext`]. Listings run one planned pipeline and prime the
//! entity's loader with the results. Relations named by the selection are
//! then resolved one depth at a time across every branch of the selection:
//! every reference load of a depth is registered before any of them is
//! awaited and every HasMany relation of a depth runs one pipeline, so each
//! target type costs one fetch per depth.

mod attach;

use std::collections::{BTreeSet, HashMap};

use docql_proto::document::{path_values, select_paths};
use docql_proto::{
    Document, FieldSelection, FilterNode, NativeQuery, ObjectId, Pipeline, Projection, Stage,
    ID_FIELD,
};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use tracing::{debug, info};

use crate::catalog::{EntityDef, EntityKind, Link, RelationDef};
use crate::error::Error;
use crate::loader::{id_key, RequestContext};
use crate::query::{selection_paths, FieldSelector, ListingPlanner};
use crate::store::{aggregate_within, flatten};

use attach::{attach_children, attach_referenced};

type FetchFuture = BoxFuture<'static, Result<Vec<Document>, Error>>;

/// Records fetched for one relation of one host group.
struct Branch<'s> {
    relation: &'s RelationDef,
    selection: &'s FieldSelection,
    /// Branch holding the host documents, `None` for the documents being
    /// resolved.
    host: Option<usize>,
    docs: Vec<Document>,
}

/// HasMany lookups of one depth that follow the same relation.
struct ChildGroup<'s> {
    relation: &'s RelationDef,
    fields: Projection,
    hosts: BTreeSet<String>,
}

enum Source {
    Fetch(usize),
    Group(usize),
}

/// Resolves queries for one request.
pub struct Resolver<'a> {
    ctx: &'a RequestContext,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self { ctx }
    }

    /// List an entity's documents matching `filter`, shaped by `selection`.
    ///
    /// Relation filters act as inner joins: a document whose related set is
    /// empty is dropped, and a document joined to several related records
    /// appears once per record.
    pub async fn list(
        &self,
        kind: EntityKind,
        selection: &FieldSelection,
        filter: Option<&FilterNode>,
    ) -> Result<Vec<Document>, Error> {
        let entity = self.ctx.entity(kind)?;
        let plan = ListingPlanner::new(entity, self.ctx.catalog()).plan(selection, filter);

        let mut docs = aggregate_within(
            self.ctx.store().as_ref(),
            &entity.collection,
            &plan.pipeline,
            self.ctx.config().loader.fetch_timeout,
        )
        .await?;
        info!(
            entity = %kind,
            joined = ?plan.joined,
            returned = docs.len(),
            "listed entities"
        );

        self.ctx.loader(kind)?.prime_many(&docs);
        self.resolve_relations(kind, selection, &mut docs).await?;

        Ok(docs.iter().map(|doc| shape(doc, selection)).collect())
    }

    /// Fetch one entity by id, shaped by `selection`.
    pub async fn by_id(
        &self,
        kind: EntityKind,
        id: &str,
        selection: &FieldSelection,
    ) -> Result<Document, Error> {
        ObjectId::parse(id).map_err(|err| Error::Validation(err.to_string()))?;
        let entity = self.ctx.entity(kind)?;

        let record = self
            .ctx
            .loader(kind)?
            .load(id, &load_fields(entity, selection))
            .await?
            .ok_or_else(|| Error::not_found(kind, id))?;
        info!(entity = %kind, id, "resolved entity by id");

        let mut docs = vec![record];
        self.resolve_relations(kind, selection, &mut docs).await?;
        Ok(shape(&docs[0], selection))
    }

    /// Resolve every relation the selection reaches on `docs`, attaching the
    /// results in place.
    ///
    /// Each depth covers every branch of the selection at once, so sibling
    /// subtrees share loader windows and HasMany pipelines.
    async fn resolve_relations<'s>(
        &'s self,
        kind: EntityKind,
        selection: &'s FieldSelection,
        docs: &mut [Document],
    ) -> Result<(), Error> {
        let mut branches: Vec<Branch<'s>> = Vec::new();
        let mut level: Vec<(Option<usize>, EntityKind, &'s FieldSelection)> =
            vec![(None, kind, selection)];
        let mut depth = 0usize;

        while !level.is_empty() {
            depth += 1;
            let mut pending: Vec<(Option<usize>, &'s RelationDef, &'s FieldSelection, Source)> =
                Vec::new();
            let mut fetches: Vec<FetchFuture> = Vec::new();
            let mut groups: Vec<ChildGroup<'s>> = Vec::new();

            for (host, host_kind, host_selection) in std::mem::take(&mut level) {
                let hosts: &[Document] = match host {
                    Some(index) => branches[index].docs.as_slice(),
                    None => &*docs,
                };
                if hosts.is_empty() {
                    continue;
                }
                for relation in &self.ctx.entity(host_kind)?.relations {
                    let Some(sub) = host_selection.descend(&relation.path) else {
                        continue;
                    };
                    let source = match relation.link {
                        Link::FilterOnly => continue,
                        Link::BelongsTo | Link::Embedded => {
                            fetches.push(self.fetch_referenced(relation, sub, hosts)?);
                            Source::Fetch(fetches.len() - 1)
                        }
                        Link::HasMany => {
                            let index = match groups
                                .iter()
                                .position(|group| std::ptr::eq(group.relation, relation))
                            {
                                Some(index) => index,
                                None => {
                                    groups.push(ChildGroup {
                                        relation,
                                        fields: Projection::new(),
                                        hosts: BTreeSet::new(),
                                    });
                                    groups.len() - 1
                                }
                            };
                            let group = &mut groups[index];
                            group.fields.merge(load_fields(self.ctx.entity(relation.target)?, sub));
                            group.hosts.extend(
                                hosts
                                    .iter()
                                    .flat_map(|doc| flatten(path_values(doc, &relation.join.local_field)))
                                    .map(id_key),
                            );
                            Source::Group(index)
                        }
                    };
                    pending.push((host, relation, sub, source));
                }
            }

            let mut group_fetches = Vec::with_capacity(groups.len());
            for group in groups {
                fetches.push(self.fetch_children(group)?);
                group_fetches.push(fetches.len() - 1);
            }
            if fetches.is_empty() {
                break;
            }
            debug!(
                entity = %kind,
                depth,
                relations = pending.len(),
                fetches = fetches.len(),
                "resolving relation depth"
            );

            let fetched = try_join_all(fetches).await?;
            let first = branches.len();
            for (host, relation, selection, source) in pending {
                let index = match source {
                    Source::Fetch(index) => index,
                    Source::Group(group) => group_fetches[group],
                };
                branches.push(Branch {
                    relation,
                    selection,
                    host,
                    docs: fetched[index].clone(),
                });
            }
            level = branches[first..]
                .iter()
                .enumerate()
                .map(|(offset, branch)| (Some(first + offset), branch.relation.target, branch.selection))
                .collect();
        }

        // A branch always comes after its host, so attaching from the back
        // completes every branch before it is attached itself.
        while let Some(branch) = branches.pop() {
            let hosts: &mut [Document] = match branch.host {
                Some(index) => branches[index].docs.as_mut_slice(),
                None => &mut *docs,
            };
            match branch.relation.link {
                Link::HasMany => attach_children(branch.relation, hosts, branch.docs),
                _ => {
                    let resolved: HashMap<String, Document> = branch
                        .docs
                        .into_iter()
                        .filter_map(|doc| doc.get(ID_FIELD).map(id_key).map(|id| (id, doc)))
                        .collect();
                    attach_referenced(branch.relation, hosts, &resolved)?;
                }
            }
        }
        Ok(())
    }

    /// Register loads for every target referenced by `docs`.
    ///
    /// Loads are registered before this returns; the returned future only
    /// collects them.
    fn fetch_referenced(
        &self,
        relation: &RelationDef,
        sub: &FieldSelection,
        docs: &[Document],
    ) -> Result<FetchFuture, Error> {
        let target = self.ctx.entity(relation.target)?;
        let loader = self.ctx.loader(relation.target)?;

        if relation.is_embedded() {
            // Values joined inline by a listing seed the target cache.
            let inline: Vec<&Document> = docs
                .iter()
                .flat_map(|doc| path_values(doc, &relation.path))
                .filter_map(|value| value.as_object())
                .collect();
            loader.prime_many(inline);
        }

        let fields = load_fields(target, sub);
        let ids: BTreeSet<String> = docs
            .iter()
            .flat_map(|doc| flatten(path_values(doc, &relation.join.local_field)))
            .filter(|value| !value.is_null())
            .map(id_key)
            .collect();

        let (ids, loads): (Vec<String>, Vec<_>) = ids
            .into_iter()
            .map(|id| {
                let load = loader.load(&id, &fields);
                (id, load)
            })
            .unzip();
        let target_kind = relation.target;

        Ok(async move {
            let records = try_join_all(loads).await?;
            let mut found = Vec::with_capacity(ids.len());
            for (id, record) in ids.into_iter().zip(records) {
                found.push(record.ok_or_else(|| Error::not_found(target_kind, id))?);
            }
            Ok::<_, Error>(found)
        }
        .boxed())
    }

    /// Fetch the children of every host of a group with one pipeline per
    /// batch of host ids. Results prime the target loader.
    fn fetch_children(&self, group: ChildGroup<'_>) -> Result<FetchFuture, Error> {
        let relation = group.relation;
        let target = self.ctx.entity(relation.target)?;
        let loader = self.ctx.loader(relation.target)?.clone();
        let config = &self.ctx.config().loader;

        let mut fields = group.fields;
        fields.include(relation.join.foreign_field.clone());

        let hosts: Vec<String> = group.hosts.into_iter().collect();
        let pipelines: Vec<Pipeline> = hosts
            .chunks(config.max_batch_size.max(1))
            .map(|chunk| {
                let query = NativeQuery::Or(
                    chunk
                        .iter()
                        .map(|id| NativeQuery::eq(relation.join.foreign_field.clone(), id.as_str()))
                        .collect(),
                );
                Pipeline::new()
                    .with_stage(Stage::Match(query))
                    .with_stage(Stage::Project(fields.clone()))
            })
            .collect();

        let store = self.ctx.store().clone();
        let collection = target.collection.clone();
        let limit = config.fetch_timeout;

        Ok(async move {
            let mut children = Vec::new();
            for pipeline in &pipelines {
                let batch = aggregate_within(store.as_ref(), &collection, pipeline, limit).await?;
                children.extend(batch);
            }
            loader.prime_many(&children);
            Ok::<_, Error>(children)
        }
        .boxed())
    }
}

/// Fields a loader must provide for `selection` on `entity`. Relation paths
/// are resolved separately and never requested from storage.
fn load_fields(entity: &EntityDef, selection: &FieldSelection) -> Projection {
    FieldSelector::for_entity(entity)
        .project(selection)
        .without_prefixes(&entity.filter_prefixes())
}

/// Reduce a resolved document to exactly the selected paths.
fn shape(doc: &Document, selection: &FieldSelection) -> Document {
    let paths = selection_paths(selection, "");
    select_paths(doc, paths.paths())
}
