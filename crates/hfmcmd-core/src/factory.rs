//! Context object factories
//!
//! A command names the context object it needs (a session, a rules loader,
//! ...). Each context type has one [`FactoryDefinition`] that lists the
//! context types it depends on and how to construct it from them. The
//! definitions form a DAG which [`FactoryGraphBuilder::build`] validates
//! once at startup: every dependency must have a factory and there must be
//! no cycle.
//!
//! Objects are built lazily into a run-scoped [`ContextCache`], at most once
//! per run, and released in reverse construction order when the cache is
//! released or dropped.

use crate::errors::{HfmError, Result};
use crate::invoker::ResilientInvoker;
use crate::{log_op_end, log_op_error, log_op_start};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

const OP_CONSTRUCT: &str = "construct_context";
const OP_RELEASE: &str = "release_context";

/// A handle to (possibly remote-backed) state that commands run against
pub trait ContextObject: Any + Send + Sync {
    /// Release whatever the object holds on the remote side
    ///
    /// Called exactly once, when the run that built the object ends.
    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Type identity of a context object, with a readable name for messages
#[derive(Clone, Copy)]
pub struct ContextKey {
    id: TypeId,
    name: &'static str,
}

impl ContextKey {
    pub fn of<T: ContextObject>() -> Self {
        let full = std::any::type_name::<T>();
        Self {
            id: TypeId::of::<T>(),
            name: full.rsplit("::").next().unwrap_or(full),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ContextKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ContextKey {}

impl std::hash::Hash for ContextKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A constructed object as held by the cache
struct CachedEntry {
    key: ContextKey,
    object: Arc<dyn Any + Send + Sync>,
    release: Box<dyn Fn() -> Result<()> + Send + Sync>,
}

impl CachedEntry {
    fn new<T: ContextObject>(object: Arc<T>) -> Self {
        let for_release = Arc::clone(&object);
        Self {
            key: ContextKey::of::<T>(),
            object,
            release: Box::new(move || for_release.release()),
        }
    }
}

/// The dependencies a factory declared, as seen by its construction function
pub struct Dependencies<'a> {
    cache: &'a ContextCache,
    declared: &'a [ContextKey],
}

impl Dependencies<'_> {
    /// Fetch a declared, already-constructed dependency
    pub fn get<T: ContextObject>(&self) -> Result<Arc<T>> {
        let key = ContextKey::of::<T>();
        if !self.declared.contains(&key) {
            return Err(HfmError::UnknownContext { context: key.name });
        }
        self.cache.get::<T>()
    }
}

type ConstructFn =
    Box<dyn Fn(&Dependencies<'_>, &ResilientInvoker) -> Result<CachedEntry> + Send + Sync>;

/// How to build one context type, and what it needs first
pub struct FactoryDefinition {
    key: ContextKey,
    dependencies: Vec<ContextKey>,
    construct: ConstructFn,
}

impl FactoryDefinition {
    /// Define the factory for `T`
    ///
    /// The construction function receives the resolved dependencies and the
    /// invoker; remote calls it makes should go through the invoker.
    pub fn new<T, F>(dependencies: Vec<ContextKey>, construct: F) -> Self
    where
        T: ContextObject,
        F: Fn(&Dependencies<'_>, &ResilientInvoker) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            key: ContextKey::of::<T>(),
            dependencies,
            construct: Box::new(move |deps, invoker| {
                construct(deps, invoker).map(|object| CachedEntry::new(Arc::new(object)))
            }),
        }
    }

    pub fn key(&self) -> ContextKey {
        self.key
    }

    pub fn dependencies(&self) -> &[ContextKey] {
        &self.dependencies
    }
}

impl fmt::Debug for FactoryDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryDefinition")
            .field("key", &self.key)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Collects factory definitions before validation
#[derive(Debug, Default)]
pub struct FactoryGraphBuilder {
    factories: Vec<FactoryDefinition>,
}

impl FactoryGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory; a second factory for the same type is a configuration error
    pub fn register(&mut self, factory: FactoryDefinition) -> Result<&mut Self> {
        if self.factories.iter().any(|f| f.key == factory.key) {
            return Err(HfmError::Config {
                message: format!("factory for {} registered twice", factory.key),
            });
        }
        self.factories.push(factory);
        Ok(self)
    }

    /// Validate the graph and freeze it
    ///
    /// Fails with `UnresolvedDependency` if any declared dependency has no
    /// factory, or `DependencyCycle` naming the cycle.
    pub fn build(self) -> Result<FactoryGraph> {
        let keys: Vec<ContextKey> = self.factories.iter().map(|f| f.key).collect();
        for factory in &self.factories {
            if let Some(missing) = factory.dependencies.iter().find(|d| !keys.contains(d)) {
                return Err(HfmError::UnresolvedDependency {
                    context: missing.name,
                    required_by: factory.key.name.to_string(),
                });
            }
        }

        let edges: HashMap<ContextKey, &[ContextKey]> = self
            .factories
            .iter()
            .map(|f| (f.key, f.dependencies.as_slice()))
            .collect();
        let order = topological_order(&keys, &edges)?;

        let factories = self.factories.into_iter().map(|f| (f.key, f)).collect();
        Ok(FactoryGraph { factories, order })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

// Depth-first sort, dependencies before dependents. On a back edge the
// current DFS stack from the repeated node onward is the cycle.
fn topological_order(
    keys: &[ContextKey],
    edges: &HashMap<ContextKey, &[ContextKey]>,
) -> Result<Vec<ContextKey>> {
    fn visit(
        key: ContextKey,
        edges: &HashMap<ContextKey, &[ContextKey]>,
        marks: &mut HashMap<ContextKey, Mark>,
        stack: &mut Vec<ContextKey>,
        order: &mut Vec<ContextKey>,
    ) -> Result<()> {
        match marks.get(&key) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|k| *k == key).unwrap_or(0);
                let mut path: Vec<&'static str> = stack[start..].iter().map(|k| k.name).collect();
                path.push(key.name);
                return Err(HfmError::DependencyCycle { path });
            }
            None => {}
        }

        marks.insert(key, Mark::Visiting);
        stack.push(key);
        for dep in edges.get(&key).copied().unwrap_or_default() {
            visit(*dep, edges, marks, stack, order)?;
        }
        stack.pop();
        marks.insert(key, Mark::Done);
        order.push(key);
        Ok(())
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();
    let mut order = Vec::with_capacity(keys.len());
    for key in keys {
        visit(*key, edges, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

/// Validated, immutable factory DAG
pub struct FactoryGraph {
    factories: HashMap<ContextKey, FactoryDefinition>,
    order: Vec<ContextKey>,
}

impl FactoryGraph {
    pub fn contains(&self, key: ContextKey) -> bool {
        self.factories.contains_key(&key)
    }

    /// All context types, dependencies before dependents
    pub fn topological_order(&self) -> &[ContextKey] {
        &self.order
    }

    /// The factory chain needed to build `key`, in construction order
    pub fn chain_for(&self, key: ContextKey) -> Vec<ContextKey> {
        let mut chain = Vec::new();
        self.collect_chain(key, &mut chain);
        chain
    }

    fn collect_chain(&self, key: ContextKey, chain: &mut Vec<ContextKey>) {
        if chain.contains(&key) {
            return;
        }
        if let Some(factory) = self.factories.get(&key) {
            for dep in &factory.dependencies {
                self.collect_chain(*dep, chain);
            }
        }
        chain.push(key);
    }

    /// Resolve a typed context object, building its chain as needed
    pub fn resolve<T: ContextObject>(
        &self,
        cache: &mut ContextCache,
        invoker: &ResilientInvoker,
    ) -> Result<Arc<T>> {
        self.resolve_key(ContextKey::of::<T>(), cache, invoker)?;
        cache.get::<T>()
    }

    /// Ensure `key` is present in the cache
    ///
    /// Depth-first: cached objects are reused, missing dependencies are
    /// built first. A failing construction is wrapped in
    /// `ContextConstruction` naming the type that failed; failures deeper in
    /// the chain pass through unchanged.
    pub fn resolve_key(
        &self,
        key: ContextKey,
        cache: &mut ContextCache,
        invoker: &ResilientInvoker,
    ) -> Result<()> {
        if cache.contains(key) {
            return Ok(());
        }
        let factory = self
            .factories
            .get(&key)
            .ok_or(HfmError::UnknownContext { context: key.name })?;

        for dep in &factory.dependencies {
            self.resolve_key(*dep, cache, invoker)?;
        }

        let start = Instant::now();
        log_op_start!(OP_CONSTRUCT, context = key.name);
        let deps = Dependencies {
            cache,
            declared: &factory.dependencies,
        };
        match (factory.construct)(&deps, invoker) {
            Ok(entry) => {
                log_op_end!(
                    OP_CONSTRUCT,
                    duration_ms = start.elapsed().as_millis() as u64,
                    context = key.name,
                );
                cache.insert(entry);
                Ok(())
            }
            Err(source) => {
                let err = HfmError::ContextConstruction {
                    context: key.name,
                    source: Box::new(source),
                };
                log_op_error!(
                    OP_CONSTRUCT,
                    err,
                    duration_ms = start.elapsed().as_millis() as u64,
                    context = key.name,
                );
                Err(err)
            }
        }
    }
}

impl fmt::Debug for FactoryGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryGraph")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Run-scoped cache of constructed context objects
///
/// Released exactly once: explicitly via [`ContextCache::release_all`] or,
/// failing that, on drop.
#[derive(Default)]
pub struct ContextCache {
    entries: Vec<CachedEntry>,
    index: HashMap<ContextKey, usize>,
}

impl ContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of cached objects in construction order
    pub fn construction_order(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.key.name).collect()
    }

    pub fn get<T: ContextObject>(&self) -> Result<Arc<T>> {
        let key = ContextKey::of::<T>();
        let entry = self
            .index
            .get(&key)
            .and_then(|i| self.entries.get(*i))
            .ok_or(HfmError::UnknownContext { context: key.name })?;
        Arc::clone(&entry.object)
            .downcast::<T>()
            .map_err(|_| HfmError::Internal {
                message: format!("cached {} has an unexpected type", key.name),
            })
    }

    fn insert(&mut self, entry: CachedEntry) {
        self.index.insert(entry.key, self.entries.len());
        self.entries.push(entry);
    }

    /// Release every cached object in reverse construction order
    ///
    /// Release failures are logged and counted, never raised. Returns the
    /// number of objects released; a second call releases nothing.
    pub fn release_all(&mut self) -> usize {
        self.index.clear();
        let mut released = 0;
        while let Some(entry) = self.entries.pop() {
            let start = Instant::now();
            match (entry.release)() {
                Ok(()) => {
                    log_op_end!(
                        OP_RELEASE,
                        duration_ms = start.elapsed().as_millis() as u64,
                        context = entry.key.name,
                    );
                }
                Err(err) => {
                    log_op_error!(
                        OP_RELEASE,
                        err,
                        duration_ms = start.elapsed().as_millis() as u64,
                        context = entry.key.name,
                    );
                }
            }
            released += 1;
        }
        released
    }
}

impl Drop for ContextCache {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for ContextCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextCache")
            .field("entries", &self.construction_order())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorKind, RemoteFailure};
    use crate::invoker::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Conn;
    impl ContextObject for Conn {}

    #[derive(Debug)]
    struct Sess {
        _conn: Arc<Conn>,
    }
    impl ContextObject for Sess {}

    #[derive(Debug)]
    struct Loader;
    impl ContextObject for Loader {}

    fn invoker() -> ResilientInvoker {
        ResilientInvoker::new(RetryPolicy::new(1))
    }

    fn chain(builds: Arc<AtomicUsize>) -> FactoryGraph {
        let mut builder = FactoryGraphBuilder::new();
        let conn_builds = Arc::clone(&builds);
        builder
            .register(FactoryDefinition::new::<Conn, _>(vec![], move |_, _| {
                conn_builds.fetch_add(1, Ordering::SeqCst);
                Ok(Conn)
            }))
            .unwrap()
            .register(FactoryDefinition::new::<Sess, _>(
                vec![ContextKey::of::<Conn>()],
                |deps, _| {
                    Ok(Sess {
                        _conn: deps.get::<Conn>()?,
                    })
                },
            ))
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_resolve_builds_dependencies_first() {
        let graph = chain(Arc::new(AtomicUsize::new(0)));
        let mut cache = ContextCache::new();

        graph.resolve::<Sess>(&mut cache, &invoker()).unwrap();

        assert_eq!(cache.construction_order(), vec!["Conn", "Sess"]);
    }

    #[test]
    fn test_at_most_once_construction_per_cache() {
        let builds = Arc::new(AtomicUsize::new(0));
        let graph = chain(Arc::clone(&builds));
        let mut cache = ContextCache::new();

        let first = graph.resolve::<Conn>(&mut cache, &invoker()).unwrap();
        graph.resolve::<Sess>(&mut cache, &invoker()).unwrap();
        let again = graph.resolve::<Conn>(&mut cache, &invoker()).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_two_node_cycle_detected_at_build() {
        let mut builder = FactoryGraphBuilder::new();
        builder
            .register(FactoryDefinition::new::<Conn, _>(
                vec![ContextKey::of::<Sess>()],
                |_, _| Ok(Conn),
            ))
            .unwrap()
            .register(FactoryDefinition::new::<Sess, _>(
                vec![ContextKey::of::<Conn>()],
                |deps, _| {
                    Ok(Sess {
                        _conn: deps.get::<Conn>()?,
                    })
                },
            ))
            .unwrap();

        let err = builder.build().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DependencyCycle);
        match err {
            HfmError::DependencyCycle { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&"Conn") && path.contains(&"Sess"));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_dependency_detected_at_build() {
        let mut builder = FactoryGraphBuilder::new();
        builder
            .register(FactoryDefinition::new::<Loader, _>(
                vec![ContextKey::of::<Sess>()],
                |_, _| Ok(Loader),
            ))
            .unwrap();

        let err = builder.build().unwrap_err();

        assert!(matches!(
            err,
            HfmError::UnresolvedDependency { context: "Sess", .. }
        ));
    }

    #[test]
    fn test_duplicate_factory_rejected() {
        let mut builder = FactoryGraphBuilder::new();
        builder
            .register(FactoryDefinition::new::<Conn, _>(vec![], |_, _| Ok(Conn)))
            .unwrap();

        let err = builder
            .register(FactoryDefinition::new::<Conn, _>(vec![], |_, _| Ok(Conn)))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_construction_failure_names_failing_type() {
        let mut builder = FactoryGraphBuilder::new();
        builder
            .register(FactoryDefinition::new::<Conn, _>(vec![], |_, invoker| {
                invoker.invoke("Connecting to cluster", || {
                    Err::<Conn, _>(RemoteFailure::new("Logon failure"))
                })
            }))
            .unwrap()
            .register(FactoryDefinition::new::<Sess, _>(
                vec![ContextKey::of::<Conn>()],
                |deps, _| {
                    Ok(Sess {
                        _conn: deps.get::<Conn>()?,
                    })
                },
            ))
            .unwrap();
        let graph = builder.build().unwrap();
        let mut cache = ContextCache::new();

        let err = graph.resolve::<Sess>(&mut cache, &invoker()).unwrap_err();

        assert!(matches!(
            err,
            HfmError::ContextConstruction { context: "Conn", .. }
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_undeclared_dependency_access_is_rejected() {
        let mut builder = FactoryGraphBuilder::new();
        builder
            .register(FactoryDefinition::new::<Conn, _>(vec![], |_, _| Ok(Conn)))
            .unwrap()
            .register(FactoryDefinition::new::<Loader, _>(vec![], |deps, _| {
                deps.get::<Conn>()?;
                Ok(Loader)
            }))
            .unwrap();
        let graph = builder.build().unwrap();
        let mut cache = ContextCache::new();

        let err = graph.resolve::<Loader>(&mut cache, &invoker()).unwrap_err();

        assert!(matches!(
            err,
            HfmError::ContextConstruction { source, .. }
                if matches!(*source, HfmError::UnknownContext { context: "Conn" })
        ));
    }

    #[derive(Debug)]
    struct Tracked {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }
    impl ContextObject for Tracked {
        fn release(&self) -> Result<()> {
            self.log.lock().unwrap().push(self.name);
            Ok(())
        }
    }
    #[derive(Debug)]
    struct TrackedChild(Tracked);
    impl ContextObject for TrackedChild {
        fn release(&self) -> Result<()> {
            self.0.release()
        }
    }

    #[test]
    fn test_release_reverse_order_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = FactoryGraphBuilder::new();
        let parent_log = Arc::clone(&log);
        let child_log = Arc::clone(&log);
        builder
            .register(FactoryDefinition::new::<Tracked, _>(vec![], move |_, _| {
                Ok(Tracked {
                    name: "parent",
                    log: Arc::clone(&parent_log),
                })
            }))
            .unwrap()
            .register(FactoryDefinition::new::<TrackedChild, _>(
                vec![ContextKey::of::<Tracked>()],
                move |_, _| {
                    Ok(TrackedChild(Tracked {
                        name: "child",
                        log: Arc::clone(&child_log),
                    }))
                },
            ))
            .unwrap();
        let graph = builder.build().unwrap();

        let mut cache = ContextCache::new();
        graph.resolve::<TrackedChild>(&mut cache, &invoker()).unwrap();
        assert_eq!(cache.release_all(), 2);
        assert_eq!(cache.release_all(), 0);
        drop(cache);

        assert_eq!(*log.lock().unwrap(), vec!["child", "parent"]);
    }

    #[derive(Debug)]
    struct FailingClose;
    impl ContextObject for FailingClose {
        fn release(&self) -> Result<()> {
            Err(HfmError::Internal {
                message: "close refused".to_string(),
            })
        }
    }

    #[test]
    fn test_release_failure_is_counted_and_does_not_stop_release() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = FactoryGraphBuilder::new();
        let factory_log = Arc::clone(&log);
        builder
            .register(FactoryDefinition::new::<Tracked, _>(vec![], move |_, _| {
                Ok(Tracked {
                    name: "parent",
                    log: Arc::clone(&factory_log),
                })
            }))
            .unwrap()
            .register(FactoryDefinition::new::<FailingClose, _>(
                vec![ContextKey::of::<Tracked>()],
                |_, _| Ok(FailingClose),
            ))
            .unwrap();
        let graph = builder.build().unwrap();

        let mut cache = ContextCache::new();
        graph.resolve::<FailingClose>(&mut cache, &invoker()).unwrap();

        assert_eq!(cache.release_all(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["parent"]);
    }

    #[test]
    fn test_drop_releases_unreleased_cache() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = FactoryGraphBuilder::new();
        let factory_log = Arc::clone(&log);
        builder
            .register(FactoryDefinition::new::<Tracked, _>(vec![], move |_, _| {
                Ok(Tracked {
                    name: "only",
                    log: Arc::clone(&factory_log),
                })
            }))
            .unwrap();
        let graph = builder.build().unwrap();

        {
            let mut cache = ContextCache::new();
            graph.resolve::<Tracked>(&mut cache, &invoker()).unwrap();
        }

        assert_eq!(*log.lock().unwrap(), vec!["only"]);
    }

    #[test]
    fn test_chain_for_lists_construction_order() {
        let graph = chain(Arc::new(AtomicUsize::new(0)));

        let names: Vec<_> = graph
            .chain_for(ContextKey::of::<Sess>())
            .iter()
            .map(|k| k.name())
            .collect();

        assert_eq!(names, vec!["Conn", "Sess"]);
        assert_eq!(graph.topological_order().len(), 2);
    }
}
