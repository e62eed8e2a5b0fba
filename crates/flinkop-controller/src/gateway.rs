use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use flinkop_core::{Resource, ResourceKey};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// How dependents of a deleted object are cleaned up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePropagation {
    /// Return immediately, dependents are removed afterwards
    #[default]
    Background,
    /// The object stays until all its dependents are gone
    Foreground,
}

impl fmt::Display for DeletePropagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletePropagation::Background => write!(f, "Background"),
            DeletePropagation::Foreground => write!(f, "Foreground"),
        }
    }
}

/// Remote object store holding the cluster resources and their children
///
/// Objects travel as untyped JSON so one implementation serves every kind.
/// A missing object is reported as `ControllerError::NotFound`, which callers
/// treat as an ordinary "absent" outcome. Use [`TypedGateway`] for typed
/// access with NotFound folded into `Option`.
#[async_trait]
pub trait StateGateway: Send + Sync {
    /// Fetch a single object
    async fn get(&self, key: &ResourceKey) -> Result<Value>;

    /// List objects of the key's kind in its namespace (all namespaces when
    /// empty) whose labels contain every entry of `selector`
    async fn list(
        &self,
        collection: &ResourceKey,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Value>>;

    /// Create a new object, failing with Conflict if it exists
    async fn create(&self, key: &ResourceKey, object: &Value) -> Result<Value>;

    /// Replace the object's spec and metadata
    async fn update(&self, key: &ResourceKey, object: &Value) -> Result<Value>;

    /// Replace the object's status subresource
    async fn update_status(&self, key: &ResourceKey, object: &Value) -> Result<Value>;

    /// Delete an object
    async fn delete(&self, key: &ResourceKey, propagation: DeletePropagation) -> Result<()>;
}

/// Typed helpers over any [`StateGateway`]
#[async_trait]
pub trait TypedGateway: StateGateway {
    /// Fetch an object, mapping NotFound to `None`
    async fn get_opt<T: Resource + 'static>(&self, namespace: &str, name: &str) -> Result<Option<T>> {
        match self.get(&T::key(namespace, name)).await {
            Ok(value) => Ok(Some(decode(value)?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_typed<T: Resource + 'static>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<T>> {
        let collection = ResourceKey::collection(T::gvk(), namespace);
        self.list(&collection, selector)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn create_typed<T: Resource + 'static>(&self, object: &T) -> Result<T> {
        let key = object.resource_key().map_err(|e| ControllerError::internal_error(e.to_string()))?;
        let created = self.create(&key, &encode(object)?).await?;
        decode(created)
    }

    async fn update_typed<T: Resource + 'static>(&self, object: &T) -> Result<T> {
        let key = object.resource_key().map_err(|e| ControllerError::internal_error(e.to_string()))?;
        let updated = self.update(&key, &encode(object)?).await?;
        decode(updated)
    }

    async fn update_status_typed<T: Resource + 'static>(&self, object: &T) -> Result<T> {
        let key = object.resource_key().map_err(|e| ControllerError::internal_error(e.to_string()))?;
        let updated = self.update_status(&key, &encode(object)?).await?;
        decode(updated)
    }

    /// Delete an object. Returns false if it was already gone.
    async fn delete_opt<T: Resource + 'static>(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<bool> {
        match self.delete(&T::key(namespace, name), propagation).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<G: StateGateway + ?Sized> TypedGateway for G {}

fn encode<T: Resource>(object: &T) -> Result<Value> {
    serde_json::to_value(object).map_err(|e| ControllerError::serialization(e.to_string()))
}

fn decode<T: Resource>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ControllerError::serialization(e.to_string()))
}
