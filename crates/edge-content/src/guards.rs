//! Content guards gating distribution access.
//!
//! Organization repositories are gated by a composite of a header guard
//! (matching the requester's org id) and an RBAC guard. Alternatively a
//! single fixed-name header guard matching an x509 subject is used for
//! device (turnpike) access.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use edge_jobs::Context;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::ContentApi;
use crate::ensure::{ensure, Ensurable};
use crate::error::ContentError;
use crate::model::{
    CompositeGuard, HeaderGuard, NewCompositeGuard, NewHeaderGuard, NewRbacGuard, RbacGuard,
};
use crate::Result;

pub const IDENTITY_HEADER: &str = "x-rh-identity";
pub const ORG_ID_FILTER: &str = ".identity.org_id";
pub const SUBJECT_FILTER: &str = ".identity.x509.subject_dn";
pub const TURNPIKE_GUARD_NAME: &str = "ostree-turnpike-guard";

/// Which guard gates a distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardMode {
    /// Header(org) + RBAC(org), combined in a composite guard.
    #[default]
    Composite,
    /// The shared header guard matching the turnpike x509 subject.
    Turnpike,
}

impl fmt::Display for GuardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardMode::Composite => f.write_str("composite"),
            GuardMode::Turnpike => f.write_str("turnpike"),
        }
    }
}

impl FromStr for GuardMode {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "composite" => Ok(GuardMode::Composite),
            "turnpike" => Ok(GuardMode::Turnpike),
            other => Err(ContentError::InvalidArgument(format!(
                "unknown guard mode: {other}"
            ))),
        }
    }
}

/// Order-insensitive comparison that still distinguishes duplicates:
/// `[A, B] == [B, A]` but `[A, A] != [A, B]`.
pub fn same_guard_set(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b: Vec<&str> = b.iter().map(String::as_str).collect();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderGuardSpec {
    pub domain: String,
    pub name: String,
    pub header_name: String,
    pub header_value: String,
    pub jq_filter: Option<String>,
}

impl HeaderGuardSpec {
    /// Guard admitting requests whose identity carries `org_id`.
    pub fn for_org(domain: &str, org_id: &str) -> Self {
        HeaderGuardSpec {
            domain: domain.to_string(),
            name: format!("ostree-header-guard-{org_id}"),
            header_name: IDENTITY_HEADER.to_string(),
            header_value: org_id.to_string(),
            jq_filter: Some(ORG_ID_FILTER.to_string()),
        }
    }

    /// Fixed-name guard admitting devices presenting `subject`.
    pub fn turnpike(domain: &str, subject: &str) -> Self {
        HeaderGuardSpec {
            domain: domain.to_string(),
            name: TURNPIKE_GUARD_NAME.to_string(),
            header_name: IDENTITY_HEADER.to_string(),
            header_value: subject.to_string(),
            jq_filter: Some(SUBJECT_FILTER.to_string()),
        }
    }
}

#[async_trait]
impl Ensurable for HeaderGuardSpec {
    type Resource = HeaderGuard;

    fn kind(&self) -> &'static str {
        "header guard"
    }

    fn key(&self) -> &str {
        &self.name
    }

    async fn list(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Vec<HeaderGuard>> {
        api.list_header_guards(ctx, &self.domain, &self.name).await
    }

    async fn create(&self, ctx: &Context, api: &dyn ContentApi) -> Result<HeaderGuard> {
        let guard = NewHeaderGuard {
            name: self.name.clone(),
            header_name: self.header_name.clone(),
            header_value: self.header_value.clone(),
            jq_filter: self.jq_filter.clone(),
        };
        api.create_header_guard(ctx, &self.domain, &guard).await
    }

    async fn delete(
        &self,
        ctx: &Context,
        api: &dyn ContentApi,
        existing: &HeaderGuard,
    ) -> Result<()> {
        api.delete_guard(ctx, &self.domain, &existing.pulp_href).await
    }

    fn matches(&self, existing: &HeaderGuard) -> bool {
        existing.header_name == self.header_name
            && existing.header_value == self.header_value
            && existing.jq_filter == self.jq_filter
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RbacGuardSpec {
    pub domain: String,
    pub name: String,
}

impl RbacGuardSpec {
    pub fn for_org(domain: &str, org_id: &str) -> Self {
        RbacGuardSpec {
            domain: domain.to_string(),
            name: format!("ostree-rbac-guard-{org_id}"),
        }
    }
}

#[async_trait]
impl Ensurable for RbacGuardSpec {
    type Resource = RbacGuard;

    fn kind(&self) -> &'static str {
        "rbac guard"
    }

    fn key(&self) -> &str {
        &self.name
    }

    async fn list(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Vec<RbacGuard>> {
        api.list_rbac_guards(ctx, &self.domain, &self.name).await
    }

    async fn create(&self, ctx: &Context, api: &dyn ContentApi) -> Result<RbacGuard> {
        let guard = NewRbacGuard {
            name: self.name.clone(),
            description: None,
        };
        api.create_rbac_guard(ctx, &self.domain, &guard).await
    }

    async fn delete(&self, ctx: &Context, api: &dyn ContentApi, existing: &RbacGuard) -> Result<()> {
        api.delete_guard(ctx, &self.domain, &existing.pulp_href).await
    }

    // Identified by name alone; permissions are managed out of band.
    fn matches(&self, _existing: &RbacGuard) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeGuardSpec {
    pub domain: String,
    pub name: String,
    pub guards: Vec<String>,
}

impl CompositeGuardSpec {
    pub fn for_org(domain: &str, org_id: &str, guards: Vec<String>) -> Self {
        CompositeGuardSpec {
            domain: domain.to_string(),
            name: format!("ostree-composite-guard-{org_id}"),
            guards,
        }
    }
}

#[async_trait]
impl Ensurable for CompositeGuardSpec {
    type Resource = CompositeGuard;

    fn kind(&self) -> &'static str {
        "composite guard"
    }

    fn key(&self) -> &str {
        &self.name
    }

    async fn list(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Vec<CompositeGuard>> {
        api.list_composite_guards(ctx, &self.domain, &self.name).await
    }

    async fn create(&self, ctx: &Context, api: &dyn ContentApi) -> Result<CompositeGuard> {
        let guard = NewCompositeGuard {
            name: self.name.clone(),
            guards: self.guards.clone(),
        };
        api.create_composite_guard(ctx, &self.domain, &guard).await
    }

    async fn delete(
        &self,
        ctx: &Context,
        api: &dyn ContentApi,
        existing: &CompositeGuard,
    ) -> Result<()> {
        api.delete_guard(ctx, &self.domain, &existing.pulp_href).await
    }

    fn matches(&self, existing: &CompositeGuard) -> bool {
        same_guard_set(&existing.guards, &self.guards)
    }
}

/// Ensure the guard chain for `mode` and return the href that gates the
/// distribution.
#[instrument(skip(ctx, api, turnpike_subject))]
pub async fn ensure_guard_chain(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    org_id: &str,
    mode: GuardMode,
    turnpike_subject: &str,
) -> Result<String> {
    match mode {
        GuardMode::Turnpike => {
            let guard = ensure(ctx, api, &HeaderGuardSpec::turnpike(domain, turnpike_subject)).await?;
            Ok(guard.into_inner().pulp_href)
        }
        GuardMode::Composite => {
            let header = ensure(ctx, api, &HeaderGuardSpec::for_org(domain, org_id))
                .await?
                .into_inner();
            let rbac = ensure(ctx, api, &RbacGuardSpec::for_org(domain, org_id))
                .await?
                .into_inner();
            let composite = CompositeGuardSpec::for_org(
                domain,
                org_id,
                vec![header.pulp_href, rbac.pulp_href],
            );
            Ok(ensure(ctx, api, &composite).await?.into_inner().pulp_href)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn guard_set_ignores_order() {
        assert!(same_guard_set(&s(&["A", "B"]), &s(&["B", "A"])));
    }

    #[test]
    fn guard_set_counts_duplicates() {
        assert!(!same_guard_set(&s(&["A", "A"]), &s(&["A", "B"])));
        assert!(!same_guard_set(&s(&["A"]), &s(&["A", "A"])));
    }

    #[test]
    fn guard_mode_parses() {
        assert_eq!("Turnpike".parse::<GuardMode>().unwrap(), GuardMode::Turnpike);
        assert_eq!("composite".parse::<GuardMode>().unwrap(), GuardMode::Composite);
        assert!("open".parse::<GuardMode>().is_err());
    }

    #[test]
    fn header_guard_drift_detected() {
        let spec = HeaderGuardSpec::for_org("em1d", "1");
        let mut guard = HeaderGuard {
            pulp_href: "/g/1/".into(),
            name: spec.name.clone(),
            header_name: IDENTITY_HEADER.into(),
            header_value: "1".into(),
            jq_filter: Some(ORG_ID_FILTER.into()),
        };
        assert!(spec.matches(&guard));
        guard.header_value = "2".into();
        assert!(!spec.matches(&guard));
    }

    #[test]
    fn turnpike_guard_has_fixed_name() {
        let a = HeaderGuardSpec::turnpike("em1d", "CN=a");
        let b = HeaderGuardSpec::turnpike("em2d", "CN=b");
        assert_eq!(a.name, b.name);
        assert_eq!(a.jq_filter.as_deref(), Some(SUBJECT_FILTER));
    }
}
