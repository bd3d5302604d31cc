//! Idempotent find-or-create with drift repair.
//!
//! An [`Ensurable`] describes the desired state of one remote object keyed
//! by a logical name. [`ensure`] lists by that key and then creates,
//! returns, or deletes and recreates the object so that it matches.

use async_trait::async_trait;
use edge_jobs::Context;
use tracing::{debug, info, warn};

use crate::api::ContentApi;
use crate::error::ContentError;
use crate::Result;

/// How [`ensure`] reached the desired state.
#[derive(Debug, Clone, PartialEq)]
pub enum Ensured<R> {
    /// Already present and matching.
    Found(R),
    /// Absent, created.
    Created(R),
    /// Present but divergent, deleted and created again.
    Recreated(R),
}

impl<R> Ensured<R> {
    pub fn resource(&self) -> &R {
        match self {
            Ensured::Found(r) | Ensured::Created(r) | Ensured::Recreated(r) => r,
        }
    }

    pub fn into_inner(self) -> R {
        match self {
            Ensured::Found(r) | Ensured::Created(r) | Ensured::Recreated(r) => r,
        }
    }

    pub fn changed(&self) -> bool {
        !matches!(self, Ensured::Found(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Ensured::Found(_) => "found",
            Ensured::Created(_) => "created",
            Ensured::Recreated(_) => "recreated",
        }
    }
}

/// Desired state of a remote object.
#[async_trait]
pub trait Ensurable: Send + Sync {
    type Resource: Send;

    /// Object kind, for logs and errors.
    fn kind(&self) -> &'static str;

    /// Logical key, usually the object name.
    fn key(&self) -> &str;

    async fn list(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Vec<Self::Resource>>;

    async fn create(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Self::Resource>;

    /// Delete `existing`, waiting for any asynchronous deletion to finish.
    async fn delete(
        &self,
        ctx: &Context,
        api: &dyn ContentApi,
        existing: &Self::Resource,
    ) -> Result<()>;

    /// Whether `existing` already has the desired configuration.
    fn matches(&self, existing: &Self::Resource) -> bool;
}

/// Make the remote state match `desired`.
///
/// More than one object under the same key is a consistency violation and is
/// reported as [`ContentError::Conflict`] without modifying anything.
pub async fn ensure<E: Ensurable + ?Sized>(
    ctx: &Context,
    api: &dyn ContentApi,
    desired: &E,
) -> Result<Ensured<E::Resource>> {
    let mut found = desired.list(ctx, api).await?;
    let outcome = match found.len() {
        0 => Ensured::Created(desired.create(ctx, api).await?),
        1 => {
            let existing = found.remove(0);
            if desired.matches(&existing) {
                Ensured::Found(existing)
            } else {
                warn!(kind = desired.kind(), key = desired.key(), "configuration drifted, recreating");
                desired.delete(ctx, api, &existing).await?;
                Ensured::Recreated(desired.create(ctx, api).await?)
            }
        }
        count => {
            return Err(ContentError::Conflict {
                kind: desired.kind(),
                key: desired.key().to_string(),
                count,
            })
        }
    };

    if outcome.changed() {
        info!(kind = desired.kind(), key = desired.key(), outcome = outcome.outcome(), "ensured");
    } else {
        debug!(kind = desired.kind(), key = desired.key(), "ensured, unchanged");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_accessors() {
        let found = Ensured::Found(1);
        let created = Ensured::Created(2);
        let recreated = Ensured::Recreated(3);
        assert!(!found.changed());
        assert!(created.changed());
        assert_eq!(*recreated.resource(), 3);
        assert_eq!(recreated.outcome(), "recreated");
        assert_eq!(found.into_inner(), 1);
    }
}
