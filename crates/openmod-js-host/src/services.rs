//! Service container, exposed type names and per-scope resolution.
//!
//! The host builds one root [`ServiceContainer`] holding host-wide services.
//! Every bundle gets its own [`ServiceScope`] that sees the root services
//! plus whatever was registered for that bundle alone; scope-local
//! registrations shadow root ones and are invisible to other scopes.
//!
//! Guest code names types through a [`TypeRegistry`] the host curates, so
//! only types that were deliberately exposed can be requested by name.

use crate::error::ServiceError;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A service callable from guest code.
///
/// Arguments and results cross the script boundary as JSON values.
pub trait HostService: Send + Sync + 'static {
    /// Method names exposed to scripts.
    fn methods(&self) -> &[&'static str];

    /// Invoke one of the declared methods.
    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError>;
}

/// Opaque reference to a host type.
#[derive(Clone, Copy)]
pub struct TypeHandle {
    id: TypeId,
    name: &'static str,
}

impl TypeHandle {
    /// Handle for `T`, named after the last path segment of its type name.
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name(std::any::type_name::<T>()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeHandle {}

impl Hash for TypeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeHandle").field(&self.name).finish()
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A type requested by guest code: either a handle or an exposed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Handle(TypeHandle),
    Name(String),
}

impl From<TypeHandle> for TypeRef {
    fn from(handle: TypeHandle) -> Self {
        TypeRef::Handle(handle)
    }
}

impl From<&str> for TypeRef {
    fn from(name: &str) -> Self {
        TypeRef::Name(name.to_string())
    }
}

/// Host-curated table of type names scripts may ask for.
///
/// Lookup is exact and case-sensitive.
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeHandle>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `T` under its short type name.
    pub fn register<T: 'static>(&mut self) -> Result<TypeHandle, ServiceError> {
        let handle = TypeHandle::of::<T>();
        self.insert(handle.name(), handle)
    }

    /// Expose `T` under a custom name.
    pub fn register_as<T: 'static>(&mut self, name: &str) -> Result<TypeHandle, ServiceError> {
        self.insert(name, TypeHandle::of::<T>())
    }

    fn insert(&mut self, name: &str, handle: TypeHandle) -> Result<TypeHandle, ServiceError> {
        match self.types.get(name) {
            Some(existing) if *existing != handle => {
                Err(ServiceError::DuplicateTypeName(name.to_string()))
            }
            _ => {
                self.types.insert(name.to_string(), handle);
                Ok(handle)
            }
        }
    }

    /// Find the handle exposed under `name`.
    pub fn resolve(&self, name: &str) -> Option<TypeHandle> {
        self.types.get(name).copied()
    }

    /// Exposed names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[derive(Clone)]
struct ServiceEntry {
    instance: Arc<dyn Any + Send + Sync>,
    script: Arc<dyn HostService>,
}

impl ServiceEntry {
    fn new<T: HostService>(service: Arc<T>) -> Self {
        Self {
            instance: service.clone(),
            script: service,
        }
    }

    fn downcast<T: HostService>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }
}

/// Mutable set of registrations, used to build containers and scopes.
#[derive(Default, Clone)]
pub struct ServiceCollection {
    entries: HashMap<TypeHandle, ServiceEntry>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` as the instance for its own type.
    pub fn add<T: HostService>(&mut self, service: Arc<T>) -> &mut Self {
        self.entries
            .insert(TypeHandle::of::<T>(), ServiceEntry::new(service));
        self
    }

    pub fn contains(&self, handle: &TypeHandle) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into a root container.
    pub fn build(self) -> ServiceContainer {
        ServiceContainer {
            root: Arc::new(self),
        }
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Root container of host-wide services.
#[derive(Clone, Debug, Default)]
pub struct ServiceContainer {
    root: Arc<ServiceCollection>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed lookup of a host-wide service.
    pub fn get<T: HostService>(&self) -> Option<Arc<T>> {
        self.root.entries.get(&TypeHandle::of::<T>())?.downcast()
    }

    /// Script-facing lookup by handle.
    pub fn resolve(&self, handle: &TypeHandle) -> Option<Arc<dyn HostService>> {
        self.root.entries.get(handle).map(|e| Arc::clone(&e.script))
    }

    /// Open a child scope, letting `configure` add scope-local services.
    pub fn begin_scope<F>(&self, configure: F) -> ServiceScope
    where
        F: FnOnce(&mut ServiceCollection),
    {
        let mut local = ServiceCollection::new();
        configure(&mut local);
        ServiceScope {
            parent: Arc::clone(&self.root),
            local,
        }
    }
}

/// Child scope: local registrations first, then the root container.
#[derive(Debug)]
pub struct ServiceScope {
    parent: Arc<ServiceCollection>,
    local: ServiceCollection,
}

impl ServiceScope {
    pub fn get<T: HostService>(&self) -> Option<Arc<T>> {
        let handle = TypeHandle::of::<T>();
        self.local
            .entries
            .get(&handle)
            .or_else(|| self.parent.entries.get(&handle))?
            .downcast()
    }

    pub fn resolve(&self, handle: &TypeHandle) -> Option<Arc<dyn HostService>> {
        self.local
            .entries
            .get(handle)
            .or_else(|| self.parent.entries.get(handle))
            .map(|e| Arc::clone(&e.script))
    }

    /// Number of services registered in this scope alone.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}

/// Resolves guest type requests against one scope.
#[derive(Clone)]
pub struct ScopedServiceResolver {
    scope: Arc<ServiceScope>,
    types: Arc<TypeRegistry>,
}

impl ScopedServiceResolver {
    pub fn new(scope: Arc<ServiceScope>, types: Arc<TypeRegistry>) -> Self {
        Self { scope, types }
    }

    /// Turn a type reference into a handle.
    pub fn handle(&self, type_ref: &TypeRef) -> Result<TypeHandle, ServiceError> {
        match type_ref {
            TypeRef::Handle(handle) => Ok(*handle),
            TypeRef::Name(name) => self
                .types
                .resolve(name)
                .ok_or_else(|| ServiceError::UnknownTypeName(name.clone())),
        }
    }

    /// Resolve a type, returning `None` when nothing is registered for it.
    pub fn resolve(&self, type_ref: &TypeRef) -> Result<Option<Arc<dyn HostService>>, ServiceError> {
        let handle = self.handle(type_ref)?;
        Ok(self.scope.resolve(&handle))
    }

    /// Resolve a type that must be registered.
    pub fn resolve_required(&self, type_ref: &TypeRef) -> Result<Arc<dyn HostService>, ServiceError> {
        let handle = self.handle(type_ref)?;
        self.scope
            .resolve(&handle)
            .ok_or_else(|| ServiceError::ServiceNotFound(handle.name().to_string()))
    }

    /// Look up an exposed type by name.
    pub fn get_type(&self, name: &str) -> Option<TypeHandle> {
        self.types.resolve(name)
    }
}

/// Dispatch helper for [`HostService`] implementations.
pub fn unknown_method(service: &str, method: &str) -> ServiceError {
    ServiceError::UnknownMethod {
        service: service.to_string(),
        method: method.to_string(),
    }
}
