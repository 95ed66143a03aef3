//! Read-only listing of the cluster objects in a store namespace

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Resource;
use kube::api::{Api, ListParams};
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use shopfleet_core::{ReleaseRef, ResourceInspector, StoreResources};

use crate::error::Result;

/// Marker reported when the store namespace does not exist
pub const NAMESPACE_NOT_FOUND: &str = "namespace_not_found";

/// Lists deployments, services, ingresses and PVCs of a store
#[derive(Clone)]
pub struct KubeInspector {
    client: kube::Client,
}

impl KubeInspector {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    async fn names<K>(&self, namespace: &str) -> Result<Vec<String>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.iter().filter_map(|o| o.meta().name.clone()).collect())
    }

    async fn inspect(&self, namespace: &str) -> Result<StoreResources> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if namespaces.get_opt(namespace).await?.is_none() {
            return Ok(StoreResources {
                namespace: namespace.to_string(),
                error: Some(NAMESPACE_NOT_FOUND.to_string()),
                ..Default::default()
            });
        }

        let (deployments, services, ingresses, pvcs) = futures::try_join!(
            self.names::<Deployment>(namespace),
            self.names::<Service>(namespace),
            self.names::<Ingress>(namespace),
            self.names::<PersistentVolumeClaim>(namespace),
        )?;

        Ok(StoreResources {
            namespace: namespace.to_string(),
            deployments,
            services,
            ingresses,
            pvcs,
            error: None,
        })
    }
}

#[async_trait]
impl ResourceInspector for KubeInspector {
    async fn resources(&self, release: &ReleaseRef) -> shopfleet_core::Result<StoreResources> {
        match self.inspect(&release.namespace).await {
            Ok(resources) => Ok(resources),
            Err(e) if e.is_not_found() => Ok(StoreResources {
                namespace: release.namespace.clone(),
                error: Some(NAMESPACE_NOT_FOUND.to_string()),
                ..Default::default()
            }),
            Err(e) => Err(e.into()),
        }
    }
}
