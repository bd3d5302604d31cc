//! Per-organization tenant domains.

use async_trait::async_trait;
use edge_jobs::Context;
use serde_json::json;

use crate::api::{ContentApi, DEFAULT_DOMAIN};
use crate::ensure::{ensure, Ensurable, Ensured};
use crate::model::{Domain, NewDomain};
use crate::tasks::wait_for_task;
use crate::Result;

/// Domain name for an organization: `em{org_id}d`.
pub fn domain_name(org_id: &str) -> String {
    format!("em{org_id}d")
}

/// Desired configuration of an organization's domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSpec {
    pub name: String,
    pub storage_class: String,
    pub redirect_to_object_storage: bool,
    pub hide_guarded_distributions: bool,
}

impl DomainSpec {
    pub fn for_org(org_id: &str, storage_class: &str) -> Self {
        DomainSpec {
            name: domain_name(org_id),
            storage_class: storage_class.to_string(),
            redirect_to_object_storage: true,
            hide_guarded_distributions: false,
        }
    }

    fn new_domain(&self) -> NewDomain {
        NewDomain {
            name: self.name.clone(),
            storage_class: self.storage_class.clone(),
            storage_settings: json!({}),
            redirect_to_object_storage: self.redirect_to_object_storage,
            hide_guarded_distributions: self.hide_guarded_distributions,
        }
    }
}

#[async_trait]
impl Ensurable for DomainSpec {
    type Resource = Domain;

    fn kind(&self) -> &'static str {
        "domain"
    }

    fn key(&self) -> &str {
        &self.name
    }

    async fn list(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Vec<Domain>> {
        // Name filtering may be a prefix match on some servers.
        Ok(api
            .list_domains(ctx, &self.name)
            .await?
            .into_iter()
            .filter(|d| d.name == self.name)
            .collect())
    }

    async fn create(&self, ctx: &Context, api: &dyn ContentApi) -> Result<Domain> {
        api.create_domain(ctx, &self.new_domain()).await
    }

    async fn delete(&self, ctx: &Context, api: &dyn ContentApi, existing: &Domain) -> Result<()> {
        let task = api.delete_domain(ctx, &existing.pulp_href).await?;
        wait_for_task(ctx, api, DEFAULT_DOMAIN, &task).await?;
        Ok(())
    }

    fn matches(&self, existing: &Domain) -> bool {
        existing.storage_class == self.storage_class
            && existing.redirect_to_object_storage == self.redirect_to_object_storage
            && existing.hide_guarded_distributions == self.hide_guarded_distributions
    }
}

/// Ensure the organization's domain exists with the desired configuration.
pub async fn ensure_domain(
    ctx: &Context,
    api: &dyn ContentApi,
    org_id: &str,
    storage_class: &str,
) -> Result<Ensured<Domain>> {
    ensure(ctx, api, &DomainSpec::for_org(org_id, storage_class)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_name_wraps_org_id() {
        assert_eq!(domain_name("11789772"), "em11789772d");
    }

    #[test]
    fn matches_compares_flags_and_storage() {
        let spec = DomainSpec::for_org("1", "s3");
        let mut domain = Domain {
            pulp_href: "/api/pulp/default/api/v3/domains/u-1/".into(),
            name: "em1d".into(),
            storage_class: "s3".into(),
            redirect_to_object_storage: true,
            hide_guarded_distributions: false,
        };
        assert!(spec.matches(&domain));
        domain.hide_guarded_distributions = true;
        assert!(!spec.matches(&domain));
    }
}
