use std::sync::Arc;

use async_trait::async_trait;

use crate::data::{KeySet, OnDuplicate, ValueSet};
use crate::error::{ExecutorError, IdentityCollisionError, NotFoundError, ResolveResult};
use crate::executor::BatchExecutor;
use crate::identity::LoaderIdentity;
use crate::loader::KeyedLoader;
use crate::registry::LoaderRegistry;
use crate::storage::{Row, RowQuery, RowSource, StorageResult};

use super::EntityName;

const COMMENTS: &str = "comments";
const TAG_RELATIONSHIPS: &str = "tag_relationships";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
    pub created_by: String,
}

impl Comment {
    pub fn from_row(row: &Row) -> StorageResult<Self> {
        Ok(Self {
            id: row.int("id")?,
            post_id: row.int("post_id")?,
            parent_id: row.opt_int("parent_id")?,
            content: row.text("content")?.to_owned(),
            created_by: row.text("created_by")?.to_owned(),
        })
    }

    pub fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id)
            .with("post_id", self.post_id)
            .with("parent_id", self.parent_id)
            .with("content", self.content.as_str())
            .with("created_by", self.created_by.as_str())
    }
}

fn comments_from_rows(rows: &[Row]) -> StorageResult<Vec<Comment>> {
    rows.iter().map(Comment::from_row).collect()
}

/// Single comment per key, looked up by id.
struct CommentsById<S> {
    source: Arc<S>,
}

#[async_trait]
impl<S: RowSource> BatchExecutor<i64, Option<Comment>> for CommentsById<S> {
    async fn execute(
        &self,
        keys: KeySet<i64>,
    ) -> Result<ValueSet<i64, Option<Comment>>, ExecutorError> {
        let query = RowQuery::new(COMMENTS, "id", keys.keys().copied());
        let rows = self.source.fetch_rows(query).await?;
        let comments = comments_from_rows(&rows)?;

        Ok(keys.values_from_rows(OnDuplicate::Replace, comments, |comment| comment.id))
    }
}

/// All comments per key, grouped by a foreign key column.
struct CommentsGrouped<S> {
    source: Arc<S>,
    column: &'static str,
    top_level_only: bool,
    group_of: fn(&Comment) -> Option<i64>,
}

#[async_trait]
impl<S: RowSource> BatchExecutor<i64, Vec<Comment>> for CommentsGrouped<S> {
    async fn execute(&self, keys: KeySet<i64>) -> Result<ValueSet<i64, Vec<Comment>>, ExecutorError> {
        let mut query = RowQuery::new(COMMENTS, self.column, keys.keys().copied());
        if self.top_level_only {
            query = query.filter("parent_id", None::<i64>);
        }

        let rows = self.source.fetch_rows(query).await?;
        let comments = comments_from_rows(&rows)?;

        Ok(keys.group_rows(comments, self.group_of))
    }
}

/// Comments per tag, read through the tag relationship table. A comment
/// carrying several requested tags shows up in each of their groups.
struct CommentsByTag<S> {
    source: Arc<S>,
}

#[async_trait]
impl<S: RowSource> BatchExecutor<i64, Vec<Comment>> for CommentsByTag<S> {
    async fn execute(&self, keys: KeySet<i64>) -> Result<ValueSet<i64, Vec<Comment>>, ExecutorError> {
        let query = RowQuery::new(COMMENTS, "tag_relationships.tag_id", keys.keys().copied())
            .join(TAG_RELATIONSHIPS, "entity_id", "id")
            .filter("tag_relationships.entity_name", EntityName::Comment.as_str());

        let rows = self.source.fetch_rows(query).await?;
        let tagged = rows
            .iter()
            .map(|row| Ok((row.int("tag_relationships.tag_id")?, Comment::from_row(row)?)))
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(keys.group_pairs(tagged))
    }
}

/// Comment resolution for one storage backend. Every `load_*` method batches
/// through the loaders of the given registry.
#[derive(Debug)]
pub struct CommentsService<S> {
    source: Arc<S>,
}

impl<S> Clone for CommentsService<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<S: RowSource> CommentsService<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    fn by_id(
        &self,
        registry: &LoaderRegistry,
        name: &'static str,
    ) -> Result<KeyedLoader<i64, Option<Comment>>, IdentityCollisionError> {
        registry.get_or_create(LoaderIdentity::new(name), || CommentsById {
            source: Arc::clone(&self.source),
        })
    }

    pub fn children_loader(
        &self,
        registry: &LoaderRegistry,
    ) -> Result<KeyedLoader<i64, Vec<Comment>>, IdentityCollisionError> {
        registry.get_or_create(LoaderIdentity::new("loadChildren"), || CommentsGrouped {
            source: Arc::clone(&self.source),
            column: "parent_id",
            top_level_only: false,
            group_of: |comment| comment.parent_id,
        })
    }

    fn by_post_loader(
        &self,
        registry: &LoaderRegistry,
    ) -> Result<KeyedLoader<i64, Vec<Comment>>, IdentityCollisionError> {
        let identity = LoaderIdentity::new("loadCommentsByPostId").with_param("parentId", None::<i64>);

        registry.get_or_create(identity, || CommentsGrouped {
            source: Arc::clone(&self.source),
            column: "post_id",
            top_level_only: true,
            group_of: |comment| Some(comment.post_id),
        })
    }

    pub async fn load_comment_by_id(
        &self,
        registry: &LoaderRegistry,
        id: i64,
    ) -> ResolveResult<Option<Comment>> {
        let loader = self.by_id(registry, "loadCommentById")?;
        Ok(loader.load(id).await?)
    }

    /// The comment this one replies to, if any.
    pub async fn load_parent(
        &self,
        registry: &LoaderRegistry,
        comment: &Comment,
    ) -> ResolveResult<Option<Comment>> {
        let parent_id = match comment.parent_id {
            Some(parent_id) => parent_id,
            None => return Ok(None),
        };

        let loader = self.by_id(registry, "loadParent")?;
        Ok(loader.load(parent_id).await?)
    }

    /// Direct replies to a comment.
    pub async fn load_children(
        &self,
        registry: &LoaderRegistry,
        id: i64,
    ) -> ResolveResult<Vec<Comment>> {
        let loader = self.children_loader(registry)?;
        Ok(loader.load(id).await?)
    }

    /// Top-level comments of a post.
    pub async fn load_comments_by_post_id(
        &self,
        registry: &LoaderRegistry,
        post_id: i64,
    ) -> ResolveResult<Vec<Comment>> {
        let loader = self.by_post_loader(registry)?;
        Ok(loader.load(post_id).await?)
    }

    /// Comments tagged with `tag_id`.
    pub async fn load_comments_by_tag_id(
        &self,
        registry: &LoaderRegistry,
        tag_id: i64,
    ) -> ResolveResult<Vec<Comment>> {
        let loader = registry.get_or_create(LoaderIdentity::new("loadCommentsByTagId"), || {
            CommentsByTag {
                source: Arc::clone(&self.source),
            }
        })?;
        Ok(loader.load(tag_id).await?)
    }

    /// Direct lookup, outside of any loader. Used ahead of mutations, where a
    /// missing comment is an error rather than an empty answer.
    pub async fn find_by_id(&self, id: i64) -> ResolveResult<Comment> {
        let rows = self
            .source
            .fetch_rows(RowQuery::new(COMMENTS, "id", [id]))
            .await?;

        match rows.first() {
            Some(row) => Ok(Comment::from_row(row)?),
            None => Err(NotFoundError::new("comment", id).into()),
        }
    }
}
