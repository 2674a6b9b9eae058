//! Cluster object gateway
//!
//! Namespaced CRUD against any custom resource, addressed by its
//! `ApiResource` (group/version/plural). Services only talk to the cluster
//! through this trait so tests can swap in a mock.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};

/// Raw custom-resource operations against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterObjectGateway: Send + Sync {
    /// List every object of a resource in a namespace
    async fn list(&self, resource: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>>;

    /// Fetch one object; `Error::NotFound` when it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject>;

    /// Create an object and return what the API server stored
    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        body: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Replace a whole object
    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        body: &DynamicObject,
    ) -> Result<DynamicObject>;

    /// Delete an object; `Error::NotFound` when it does not exist
    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()>;
}

/// Gateway backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    /// Create a gateway from a Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

/// Map a 404 from the API server to `Error::NotFound`
fn not_found(err: kube::Error, resource: &ApiResource, namespace: &str, name: &str) -> Error {
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => {
            Error::not_found(&resource.kind, format!("{}/{}", namespace, name))
        }
        other => Error::Kube(other),
    }
}

#[async_trait]
impl ClusterObjectGateway for KubeGateway {
    async fn list(&self, resource: &ApiResource, namespace: &str) -> Result<Vec<DynamicObject>> {
        let list = self
            .api(resource, namespace)
            .list(&ListParams::default())
            .await?;
        debug!(kind = %resource.kind, namespace, count = list.items.len(), "Listed objects");
        Ok(list.items)
    }

    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        self.api(resource, namespace)
            .get(name)
            .await
            .map_err(|e| not_found(e, resource, namespace, name))
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        body: &DynamicObject,
    ) -> Result<DynamicObject> {
        let created = self
            .api(resource, namespace)
            .create(&PostParams::default(), body)
            .await?;
        debug!(kind = %resource.kind, namespace, name = ?created.metadata.name, "Created object");
        Ok(created)
    }

    async fn replace(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        body: &DynamicObject,
    ) -> Result<DynamicObject> {
        self.api(resource, namespace)
            .replace(name, &PostParams::default(), body)
            .await
            .map_err(|e| not_found(e, resource, namespace, name))
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        self.api(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| not_found(e, resource, namespace, name))?;
        debug!(kind = %resource.kind, namespace, name, "Deleted object");
        Ok(())
    }
}
