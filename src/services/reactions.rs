use std::sync::Arc;

use crate::data::{KeySet, ValueSet};
use crate::error::{ExecutorError, ResolveResult};
use crate::executor::batch_fn;
use crate::identity::LoaderIdentity;
use crate::registry::LoaderRegistry;
use crate::storage::{Row, RowQuery, RowSource, StorageResult};

use super::EntityName;

const REACTIONS: &str = "reactions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub id: i64,
    pub entity_name: String,
    pub entity_id: i64,
    pub rating: Option<i64>,
    pub created_by: String,
}

impl Reaction {
    pub fn from_row(row: &Row) -> StorageResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            entity_name: row.text("entity_name")?.to_owned(),
            entity_id: row.int("entity_id")?,
            rating: row.opt_int("rating")?,
            created_by: row.text("created_by")?.to_owned(),
        })
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("entity_name", self.entity_name.as_str())
            .with("entity_id", self.entity_id)
            .with("rating", self.rating)
            .with("created_by", self.created_by.as_str())
    }
}

async fn reactions_by_entity<S: RowSource>(
    source: Arc<S>,
    entity_name: EntityName,
    keys: KeySet<i64>,
) -> Result<ValueSet<i64, Vec<Reaction>>, ExecutorError> {
    let query = RowQuery::new(REACTIONS, "entity_id", keys.keys().copied())
        .filter("entity_name", entity_name.as_str());

    let rows = source.fetch_rows(query).await?;
    let reactions = rows
        .iter()
        .map(Reaction::from_row)
        .collect::<StorageResult<Vec<_>>>()?;

    Ok(keys.group_rows(reactions, |reaction| Some(reaction.entity_id)))
}

/// Reactions point at any kind of entity, so the entity name is part of the
/// loader identity: reactions of post 1 and of comment 1 are cached
/// separately.
#[derive(Debug)]
pub struct ReactionsService<S> {
    source: Arc<S>,
}

impl<S> Clone for ReactionsService<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<S: RowSource> ReactionsService<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    pub async fn load_reactions_by_entity(
        &self,
        registry: &LoaderRegistry,
        entity_name: EntityName,
        entity_id: i64,
    ) -> ResolveResult<Vec<Reaction>> {
        let identity =
            LoaderIdentity::new("loadReactionsByEntity").with_param("entityName", entity_name.as_str());

        let loader = registry.get_or_create(identity, || {
            let source = Arc::clone(&self.source);
            batch_fn(move |keys| reactions_by_entity(Arc::clone(&source), entity_name, keys))
        })?;

        Ok(loader.load(entity_id).await?)
    }
}
