//! Entity call sites. They obtain loaders from the request's registry and
//! never see the batching itself.

mod comments;
mod reactions;

use std::fmt::{self, Display, Formatter};

use tracing::warn;

use crate::error::{NotFoundError, ResolveError};

pub use comments::{Comment, CommentsService};
pub use reactions::{Reaction, ReactionsService};

/// The kinds of entity that other entities (reactions, tags) can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityName {
    Post,
    Comment,
}

impl EntityName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityName::Post => "POST",
            EntityName::Comment => "COMMENT",
        }
    }
}

impl Display for EntityName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve an optional relation: on failure, log and fall back to the empty
/// value instead of failing the whole resolution.
pub fn or_degraded<T: Default>(relation: &'static str, result: Result<T, ResolveError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(relation, error = %err, "relation degraded to empty");
            T::default()
        }
    }
}

/// Resolve a required relation: absence becomes a [`NotFoundError`].
pub fn required<T>(
    entity: &'static str,
    id: impl ToString,
    value: Option<T>,
) -> Result<T, NotFoundError> {
    value.ok_or_else(|| NotFoundError::new(entity, id))
}
