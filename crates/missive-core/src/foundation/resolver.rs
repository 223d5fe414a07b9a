//! The resolution port used to build handler instances and extra parameters.
//!
//! The pipeline never constructs dependencies itself. Whenever it needs a
//! handler container instance, or a value for a handler parameter beyond the
//! message payload, it asks a [`Resolver`] for an instance of that type.
//!
//! ```rust,ignore
//! let services = ServiceMap::new()
//!     .singleton(Arc::new(UserStore::default()))
//!     .factory(UserHandlers::default);
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::types::TypeKey;

/// A type-erased instance produced by a resolver.
pub type Resolved = Box<dyn Any + Send>;

/// Supplies instances by type.
///
/// Implementations must be safe to call concurrently and repeatedly for the
/// same type. Returning `None` means the type cannot be provided, which the
/// pipeline treats as a configuration error.
pub trait Resolver: Send + Sync {
    /// Resolves an instance of the type identified by `ty`.
    ///
    /// The returned box must contain a value of exactly that type.
    fn resolve(&self, ty: TypeKey) -> Option<Resolved>;
}

impl<F> Resolver for F
where
    F: Fn(TypeKey) -> Option<Resolved> + Send + Sync,
{
    fn resolve(&self, ty: TypeKey) -> Option<Resolved> {
        self(ty)
    }
}

/// A resolver that never provides anything.
///
/// Sufficient for pipelines whose handlers are all self-handling messages
/// without extra parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyResolver;

impl Resolver for EmptyResolver {
    fn resolve(&self, _ty: TypeKey) -> Option<Resolved> {
        None
    }
}

type Factory = Arc<dyn Fn() -> Resolved + Send + Sync>;

/// A simple type-indexed resolver.
///
/// Each registered type maps to a factory invoked on every resolution.
#[derive(Clone, Default)]
pub struct ServiceMap {
    factories: HashMap<TypeId, (TypeKey, Factory)>,
}

impl ServiceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a value that is cloned on each resolution.
    ///
    /// Usually an `Arc<T>` so every handler shares one instance.
    pub fn singleton<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.insert::<T>(Arc::new(move || Box::new(value.clone())));
        self
    }

    /// Registers a factory invoked on each resolution.
    pub fn factory<T, F>(mut self, factory: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.insert::<T>(Arc::new(move || Box::new(factory())));
        self
    }

    /// Registers `T::default` as the factory for `T`.
    pub fn with_default<T>(self) -> Self
    where
        T: Default + Send + 'static,
    {
        self.factory(T::default)
    }

    /// Returns `true` if `T` has been registered.
    pub fn contains<T: Any>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    fn insert<T: Any>(&mut self, factory: Factory) {
        self.factories
            .insert(TypeId::of::<T>(), (TypeKey::of::<T>(), factory));
    }
}

impl Resolver for ServiceMap {
    fn resolve(&self, ty: TypeKey) -> Option<Resolved> {
        self.factories.get(&ty.id()).map(|(_, factory)| factory())
    }
}

impl fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.values().map(|(key, _)| key.name()).collect();
        names.sort_unstable();
        f.debug_struct("ServiceMap")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(usize);

    #[test]
    fn singleton_shares_the_same_arc() {
        let shared = Arc::new(AtomicUsize::new(7));
        let services = ServiceMap::new().singleton(Arc::clone(&shared));

        let resolved = services
            .resolve(TypeKey::of::<Arc<AtomicUsize>>())
            .and_then(|value| value.downcast::<Arc<AtomicUsize>>().ok())
            .unwrap();
        resolved.fetch_add(1, Ordering::SeqCst);

        assert_eq!(shared.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn factory_builds_fresh_values() {
        let services = ServiceMap::new().with_default::<Counter>();
        let first = services.resolve(TypeKey::of::<Counter>()).unwrap();
        assert_eq!(first.downcast::<Counter>().unwrap().0, 0);
        assert!(services.contains::<Counter>());
        assert!(services.resolve(TypeKey::of::<String>()).is_none());
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |ty: TypeKey| -> Option<Resolved> {
            ty.is::<u64>().then(|| Box::new(42u64) as Resolved)
        };
        let value = resolver.resolve(TypeKey::of::<u64>()).unwrap();
        assert_eq!(*value.downcast::<u64>().unwrap(), 42);
        assert!(EmptyResolver.resolve(TypeKey::of::<u64>()).is_none());
    }
}
