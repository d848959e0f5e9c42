//! Cluster capability probing through API discovery
//!
//! `exists` answers three different ways and callers must keep them apart:
//! `Ok(true)` the kind is served, `Ok(false)` discovery worked and the kind is
//! not there, `Err` discovery itself failed and nothing is known.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use kube::core::GroupVersionKind;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{Error, Result};

/// Answers whether the connected cluster serves a kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn exists(&self, gvk: &GroupVersionKind) -> Result<bool>;
}

/// Probe backed by the API server discovery endpoints
pub struct DiscoveryProber {
    client: Client,
}

impl DiscoveryProber {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn resources_for(&self, gvk: &GroupVersionKind) -> kube::Result<APIResourceList> {
        if gvk.group.is_empty() {
            self.client.list_core_api_resources(&gvk.version).await
        } else {
            self.client
                .list_api_group_resources(&format!("{}/{}", gvk.group, gvk.version))
                .await
        }
    }
}

#[async_trait]
impl CapabilityProbe for DiscoveryProber {
    async fn exists(&self, gvk: &GroupVersionKind) -> Result<bool> {
        match self.resources_for(gvk).await {
            Ok(list) => {
                let found = lists_kind(&list, &gvk.kind);
                debug!(group = %gvk.group, version = %gvk.version, kind = %gvk.kind, found, "Discovery lookup");
                Ok(found)
            }
            // The group-version itself is not served on this cluster
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(group = %gvk.group, version = %gvk.version, "Group version not served");
                Ok(false)
            }
            Err(source) => Err(Error::DiscoveryError {
                gvk: gvk.clone(),
                source,
            }),
        }
    }
}

/// Whether a discovery listing contains the kind as a top-level resource
pub fn lists_kind(list: &APIResourceList, kind: &str) -> bool {
    list.resources
        .iter()
        .any(|r| r.kind == kind && !r.name.contains('/'))
}
