//! Typed access on top of the untyped gateway
//!
//! Converts between `DynamicObject` and the Velero resource structs so the
//! services never poke at raw JSON.

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ClusterObjectGateway;
use crate::error::Result;

/// `ApiResource` of a statically known resource type
pub fn api_resource<K>() -> ApiResource
where
    K: Resource<DynamicType = ()>,
{
    ApiResource::erase::<K>(&())
}

/// Convert a typed resource into the gateway's untyped form
pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Convert an untyped object into a typed resource
pub fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// List all objects of type `K` in a namespace
pub async fn list_typed<K>(gateway: &dyn ClusterObjectGateway, namespace: &str) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    gateway
        .list(&api_resource::<K>(), namespace)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

/// Fetch one object of type `K`
pub async fn get_typed<K>(gateway: &dyn ClusterObjectGateway, namespace: &str, name: &str) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    from_dynamic(gateway.get(&api_resource::<K>(), namespace, name).await?)
}

/// Create an object of type `K` and return the stored version
pub async fn create_typed<K>(gateway: &dyn ClusterObjectGateway, namespace: &str, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let body = to_dynamic(obj)?;
    from_dynamic(gateway.create(&api_resource::<K>(), namespace, &body).await?)
}

/// Replace an object of type `K` and return the stored version
pub async fn replace_typed<K>(
    gateway: &dyn ClusterObjectGateway,
    namespace: &str,
    name: &str,
    obj: &K,
) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let body = to_dynamic(obj)?;
    from_dynamic(
        gateway
            .replace(&api_resource::<K>(), namespace, name, &body)
            .await?,
    )
}
