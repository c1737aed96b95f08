//! Query builder and edge loading.

use super::EntityClient;
use crate::catalog::{EdgeDef, EdgeJoin, FIELD_ID};
use crate::error::{Error, Result};
use crate::pipeline::{Context, EdgeLoad, OpOutput, Operation, OrderBy, QuerySpec, SortOrder};
use entgate_model::{Predicate, Row, Value};
use std::collections::{BTreeSet, HashMap};

/// Parent keys per edge query; leaves room for policy and caller filters
/// under the store's parameter limit.
const EDGE_KEY_BATCH: usize = 1000;

/// Reads rows of one entity kind.
///
/// Filters are AND-ed with whatever the policy and soft-delete hooks add.
/// Edges named with [`with_edge`](Self::with_edge) are loaded through the
/// target entity's own chain, so its policy applies to the loaded rows.
pub struct QueryBuilder<'p> {
    client: EntityClient<'p>,
    predicates: Vec<Predicate>,
    spec: QuerySpec,
    include_deleted: bool,
}

impl<'p> QueryBuilder<'p> {
    pub(super) fn new(client: EntityClient<'p>) -> Self {
        Self {
            client,
            predicates: Vec::new(),
            spec: QuerySpec::default(),
            include_deleted: false,
        }
    }

    /// Add a filter.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Add an ordering term. Ties are broken by `id`.
    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.spec.order_by.push(OrderBy {
            field: field.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.spec.offset = Some(offset);
        self
    }

    /// Restrict the returned columns. `id` is always returned.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Load an edge, optionally filtering its rows.
    pub fn with_edge(mut self, edge: impl Into<String>, predicates: Vec<Predicate>) -> Self {
        self.spec.includes.push(EdgeLoad {
            edge: edge.into(),
            predicates,
        });
        self
    }

    /// Include soft-deleted rows.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// All matching rows.
    pub fn all(self, cx: &Context<'_>) -> Result<Vec<Row>> {
        self.load(cx)
    }

    /// The first matching row; `NotFound` when there is none.
    pub fn first(mut self, cx: &Context<'_>) -> Result<Row> {
        let kind = self.client.kind();
        self.spec.limit = Some(1);
        self.load(cx)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found(kind))
    }

    /// The only matching row; `NotFound` for none, `NotSingular` for more
    /// than one.
    pub fn only(mut self, cx: &Context<'_>) -> Result<Row> {
        let kind = self.client.kind();
        self.spec.limit = Some(2);
        let mut rows = self.load(cx)?;
        match rows.len() {
            0 => Err(Error::not_found(kind)),
            1 => Ok(rows.remove(0)),
            count => Err(Error::NotSingular {
                entity: kind.to_string(),
                count,
            }),
        }
    }

    /// Number of matching rows. Paging and edges are ignored.
    pub fn count(mut self, cx: &Context<'_>) -> Result<u64> {
        self.spec.count_only = true;
        self.spec.limit = None;
        self.spec.offset = None;
        self.spec.includes.clear();
        let output = self.run(cx)?;
        Ok(output.count.unwrap_or(0))
    }

    /// Whether any row matches.
    pub fn exist(self, cx: &Context<'_>) -> Result<bool> {
        Ok(self.count(cx)? > 0)
    }

    /// Ids of the matching rows.
    pub fn ids(mut self, cx: &Context<'_>) -> Result<Vec<String>> {
        self.spec.select = Some(vec![FIELD_ID.to_string()]);
        self.spec.includes.clear();
        Ok(self
            .run(cx)?
            .rows
            .iter()
            .filter_map(|row| row.id().map(str::to_string))
            .collect())
    }

    fn load(mut self, cx: &Context<'_>) -> Result<Vec<Row>> {
        let schema = self.client.schema;
        let mut edges = Vec::with_capacity(self.spec.includes.len());
        for load in &self.spec.includes {
            let edge = schema.edge(&load.edge).ok_or_else(|| {
                Error::validation(
                    &schema.kind,
                    Some(load.edge.as_str()),
                    format!("unknown edge '{}'", load.edge),
                )
            })?;
            edges.push((edge.clone(), load.predicates.clone()));
        }

        // Owned edges need the local join column even if the caller did
        // not ask for it; it is stripped again before returning.
        let requested = self.spec.select.clone();
        if let Some(select) = self.spec.select.as_mut() {
            for (edge, _) in &edges {
                if let EdgeJoin::Owned { local_column } = &edge.join {
                    if !select.contains(local_column) {
                        select.push(local_column.clone());
                    }
                }
            }
        }

        let mut rows = self.run(cx)?.rows;
        for (edge, predicates) in &edges {
            self.attach_edge(cx, &mut rows, edge, predicates)?;
        }

        if let Some(requested) = requested.filter(|_| !edges.is_empty()) {
            let keep: BTreeSet<String> = requested
                .into_iter()
                .chain(std::iter::once(FIELD_ID.to_string()))
                .collect();
            for row in &mut rows {
                row.retain_fields(&keep);
            }
        }
        Ok(rows)
    }

    fn attach_edge(
        &self,
        cx: &Context<'_>,
        rows: &mut [Row],
        edge: &EdgeDef,
        predicates: &[Predicate],
    ) -> Result<()> {
        let target = self.client.pipeline.entity(&edge.target)?;
        match &edge.join {
            EdgeJoin::Owned { local_column } => {
                let keys: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|row| row.get(local_column).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                let by_id: HashMap<String, Row> = if keys.is_empty() {
                    HashMap::new()
                } else {
                    self.edge_rows(cx, &target, FIELD_ID, keys, predicates)?
                        .into_iter()
                        .filter_map(|row| row.id().map(str::to_string).map(|id| (id, row)))
                        .collect()
                };
                for row in rows.iter_mut() {
                    let loaded = row
                        .get(local_column)
                        .and_then(Value::as_str)
                        .and_then(|id| by_id.get(id).cloned());
                    row.set_edge(edge.name.clone(), loaded.into_iter().collect());
                }
            }
            EdgeJoin::Inverse { remote_column } => {
                let keys: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|row| row.id().map(str::to_string))
                    .collect();
                let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
                if !keys.is_empty() {
                    for child in self.edge_rows(cx, &target, remote_column, keys, predicates)? {
                        if let Some(parent) = child.get(remote_column).and_then(Value::as_str) {
                            grouped.entry(parent.to_string()).or_default().push(child);
                        }
                    }
                }
                for row in rows.iter_mut() {
                    let children = row
                        .id()
                        .and_then(|id| grouped.remove(id))
                        .unwrap_or_default();
                    row.set_edge(edge.name.clone(), children);
                }
            }
        }
        Ok(())
    }

    fn edge_rows(
        &self,
        cx: &Context<'_>,
        target: &EntityClient<'_>,
        key_column: &str,
        keys: BTreeSet<String>,
        predicates: &[Predicate],
    ) -> Result<Vec<Row>> {
        let keys: Vec<String> = keys.into_iter().collect();
        let mut rows = Vec::new();
        for chunk in keys.chunks(EDGE_KEY_BATCH) {
            let mut op = Operation::query(target.kind(), cx.actor.clone())
                .with_options(cx.options)
                .with_predicate(Predicate::in_values(key_column, chunk));
            op.predicates.extend(predicates.iter().cloned());
            tracing::trace!(entity = %target.kind(), key = key_column, keys = chunk.len(), "loading edge rows");
            rows.extend(target.execute(op, cx)?.rows);
        }
        Ok(rows)
    }

    fn run(&self, cx: &Context<'_>) -> Result<OpOutput> {
        let mut options = cx.options;
        options.skip_soft_delete |= self.include_deleted;

        let mut op = Operation::query(self.client.kind(), cx.actor.clone()).with_options(options);
        op.predicates = self.predicates.clone();
        op.query = self.spec.clone();
        self.client.execute(op, cx)
    }
}
