//! # Service Registry
//!
//! Maps interface names and `(service, method)` ordinal pairs to service singletons.
//!
//! Services are described with an [`Interface`] builder that lists each method's
//! [`MethodSpec`] together with a handler closure. Registration assigns the next service
//! ordinal, flattens the interface (own methods first, then inherited interfaces
//! depth-first, each visited once) into a method table and prepares the
//! [`ServiceSyncInfo`] sent to clients. Once [`ServiceRegistry::start`] is called the
//! registry is frozen and shared read-only between connections.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use wirecall::protocol::registry::{Interface, MethodSpec, ServiceRegistry};
//!
//! struct Calculator;
//!
//! let calc = Interface::<Calculator>::new("Calculator").method(
//!     MethodSpec::new("Min").param::<i32>().param::<i32>().returns::<i32>(),
//!     |_calc, inv| {
//!         let a: i32 = inv.arg(0)?;
//!         let b: i32 = inv.arg(1)?;
//!         inv.set_return(&a.min(b))
//!     },
//! );
//!
//! let mut registry = ServiceRegistry::default();
//! let ordinal = registry.register(calc, Arc::new(Calculator)).unwrap();
//! assert_eq!(ordinal, 0);
//! registry.start();
//! ```

use crate::config::{clamp_compression_threshold, HostConfig, DEFAULT_COMPRESSION_THRESHOLD};
use crate::core::params::{CompressionPolicy, ParamCodec, Slot};
use crate::core::serialization::SerializationFormat;
use crate::error::{RemoteError, Result, RpcError};
use crate::protocol::message::{MethodSyncInfo, ServiceSyncInfo};
use crate::utils::compression::CompressionKind;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Remote error kind reported when a service method panics.
pub const PANIC_KIND: &str = "panic";

/// Failure of a service method.
///
/// `Remote` is reported to the caller as an exception and the connection stays open.
/// `Codec` means the request could not be decoded or the reply encoded; the connection
/// is closed. Only the [`Invocation`] accessors produce it. Any [`RpcError`] a method
/// body returns with `?` becomes `Remote`.
#[derive(Debug)]
pub enum InvokeError {
    Codec(RpcError),
    Remote(RemoteError),
}

impl InvokeError {
    pub fn remote(kind: impl Into<String>, message: impl Into<String>) -> Self {
        InvokeError::Remote(RemoteError::new(kind, message))
    }

    /// Report an application error, keeping its type name and source chain.
    pub fn failed<E: std::error::Error + 'static>(err: E) -> Self {
        InvokeError::Remote(RemoteError::from_error(&err))
    }
}

impl From<RpcError> for InvokeError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(remote) => InvokeError::Remote(remote),
            other => InvokeError::Remote(RemoteError::from_error(&other)),
        }
    }
}

impl From<RemoteError> for InvokeError {
    fn from(err: RemoteError) -> Self {
        InvokeError::Remote(err)
    }
}

impl std::fmt::Display for InvokeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvokeError::Codec(e) => write!(f, "{e}"),
            InvokeError::Remote(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for InvokeError {}

/// Signature of a remotely callable method.
///
/// Parameter and return types are recorded by their Rust type names, so the client and
/// the host must describe a method with the same types. By-reference parameters are
/// named `&mut T` and come back to the caller after the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    name: String,
    parameter_types: Vec<String>,
    by_ref: Vec<bool>,
    return_type: String,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_types: Vec::new(),
            by_ref: Vec::new(),
            return_type: type_name::<()>(),
        }
    }

    pub fn param<A: ?Sized>(mut self) -> Self {
        self.parameter_types.push(type_name::<A>());
        self.by_ref.push(false);
        self
    }

    pub fn param_ref<A: ?Sized>(mut self) -> Self {
        self.parameter_types.push(type_name::<&mut A>());
        self.by_ref.push(true);
        self
    }

    pub fn returns<R: ?Sized>(mut self) -> Self {
        self.return_type = type_name::<R>();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }

    pub fn return_type(&self) -> &str {
        &self.return_type
    }
}

fn type_name<T: ?Sized>() -> String {
    std::any::type_name::<T>().to_string()
}

fn interface_name<T: ?Sized>() -> String {
    let name = std::any::type_name::<T>();
    name.strip_prefix("dyn ").unwrap_or(name).to_string()
}

/// Arguments of one call and the values it hands back.
#[derive(Debug)]
pub struct Invocation {
    codec: ParamCodec,
    args: Vec<Slot>,
    by_ref: Vec<bool>,
    ret: Slot,
    outs: Vec<Slot>,
}

impl Invocation {
    pub(crate) fn new(codec: ParamCodec, args: Vec<Slot>, by_ref: Vec<bool>) -> Self {
        let outs = vec![None; args.len()];
        Self {
            codec,
            args,
            by_ref,
            ret: None,
            outs,
        }
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Deserialize argument `index`.
    pub fn arg<A: DeserializeOwned>(&self, index: usize) -> std::result::Result<A, InvokeError> {
        match self.args.get(index) {
            Some(Some(bytes)) => self.codec.deserialize(bytes).map_err(InvokeError::Codec),
            Some(None) => Err(InvokeError::Codec(RpcError::DeserializeError(format!(
                "Argument {index} is null"
            )))),
            None => Err(InvokeError::Codec(RpcError::InvalidFrame(format!(
                "No argument at position {index}"
            )))),
        }
    }

    pub fn set_return<R: Serialize + ?Sized>(
        &mut self,
        value: &R,
    ) -> std::result::Result<(), InvokeError> {
        self.ret = Some(self.codec.serialize(value).map_err(InvokeError::Codec)?);
        Ok(())
    }

    /// Set the value a by-reference parameter carries back to the caller.
    ///
    /// By-reference parameters that are never set come back unchanged.
    pub fn set_out<A: Serialize + ?Sized>(
        &mut self,
        index: usize,
        value: &A,
    ) -> std::result::Result<(), InvokeError> {
        if !self.by_ref.get(index).copied().unwrap_or(false) {
            return Err(InvokeError::remote(
                "InvalidOutParameter",
                format!("Parameter {index} is not passed by reference"),
            ));
        }
        self.outs[index] = Some(self.codec.serialize(value).map_err(InvokeError::Codec)?);
        Ok(())
    }

    /// `[return, by-ref value or null per parameter]`
    pub(crate) fn into_reply_slots(self) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(1 + self.args.len());
        slots.push(self.ret);
        for ((arg, out), by_ref) in self.args.into_iter().zip(self.outs).zip(self.by_ref) {
            slots.push(if by_ref { out.or(arg) } else { None });
        }
        slots
    }
}

type SyncHandler<T> =
    Arc<dyn Fn(&T, &mut Invocation) -> std::result::Result<(), InvokeError> + Send + Sync>;
type AsyncHandler<T> = Arc<
    dyn Fn(Arc<T>, Invocation) -> BoxFuture<'static, std::result::Result<Invocation, InvokeError>>
        + Send
        + Sync,
>;
type DisposeFn<T> = Arc<dyn Fn(&T) + Send + Sync>;

enum Handler<T: ?Sized> {
    Sync(SyncHandler<T>),
    Async(AsyncHandler<T>),
}

impl<T: ?Sized> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Handler::Sync(h) => Handler::Sync(Arc::clone(h)),
            Handler::Async(h) => Handler::Async(Arc::clone(h)),
        }
    }
}

/// Description of a service interface, built method by method.
pub struct Interface<T: ?Sized> {
    name: String,
    methods: Vec<(MethodSpec, Handler<T>)>,
    parents: Vec<Interface<T>>,
    dispose: Option<DisposeFn<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Interface<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            parents: Vec::new(),
            dispose: None,
        }
    }

    /// Interface named after `T` itself, e.g. `Interface::<dyn Calculator>::of()`.
    pub fn of() -> Self {
        Self::new(interface_name::<T>())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a method whose handler runs on the blocking thread pool.
    pub fn method<F>(mut self, spec: MethodSpec, handler: F) -> Self
    where
        F: Fn(&T, &mut Invocation) -> std::result::Result<(), InvokeError> + Send + Sync + 'static,
    {
        self.methods.push((spec, Handler::Sync(Arc::new(handler))));
        self
    }

    /// Add a method whose handler is awaited to completion before the reply is sent.
    pub fn method_async<F, Fut>(mut self, spec: MethodSpec, handler: F) -> Self
    where
        F: Fn(Arc<T>, Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Invocation, InvokeError>> + Send + 'static,
    {
        let handler: AsyncHandler<T> =
            Arc::new(move |service, invocation| handler(service, invocation).boxed());
        self.methods.push((spec, Handler::Async(handler)));
        self
    }

    /// Inherit the methods of another interface implemented by the same singleton.
    pub fn extends(mut self, parent: Interface<T>) -> Self {
        self.parents.push(parent);
        self
    }

    /// Run `hook` on the singleton when the host shuts down.
    pub fn on_dispose<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.dispose = Some(Arc::new(hook));
        self
    }

    /// Own methods, then inherited interfaces depth-first, each interface once.
    fn flatten(self) -> (String, Vec<(MethodSpec, Handler<T>)>, Option<DisposeFn<T>>) {
        let Interface {
            name,
            mut methods,
            parents,
            dispose,
        } = self;

        let mut seen = HashSet::from([name.clone()]);
        let mut stack: Vec<Interface<T>> = parents.into_iter().rev().collect();
        while let Some(parent) = stack.pop() {
            let Interface {
                name: parent_name,
                methods: parent_methods,
                parents: grandparents,
                ..
            } = parent;
            if !seen.insert(parent_name) {
                continue;
            }
            methods.extend(parent_methods);
            stack.extend(grandparents.into_iter().rev());
        }

        (name, methods, dispose)
    }
}

/// Registered interface identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub ordinal: i32,
}

/// One entry of a service's method table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub ordinal: i32,
    pub name: String,
    pub return_type: String,
    pub parameter_types: Vec<String>,
    pub by_ref: Vec<bool>,
}

/// Per-service encoding settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    pub serialization: SerializationFormat,
    pub use_compression: bool,
    pub compression_kind: CompressionKind,
    pub compression_threshold: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            serialization: SerializationFormat::default(),
            use_compression: false,
            compression_kind: CompressionKind::default(),
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl From<&HostConfig> for ServiceOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            serialization: config.serialization,
            use_compression: config.use_compression,
            compression_kind: config.compression_kind,
            compression_threshold: config.compression_threshold,
        }
    }
}

impl ServiceOptions {
    fn threshold(&self) -> usize {
        clamp_compression_threshold(self.compression_threshold).min(i32::MAX as usize)
    }

    fn codec(&self) -> ParamCodec {
        let policy = self
            .use_compression
            .then(|| CompressionPolicy::new(self.compression_kind, self.threshold()));
        ParamCodec::new(self.serialization).with_compression(policy)
    }
}

trait ErasedService: Send + Sync {
    fn invoke(
        &self,
        method: usize,
        invocation: Invocation,
    ) -> BoxFuture<'static, std::result::Result<Invocation, InvokeError>>;

    fn dispose(&self);
}

struct BoundService<T: ?Sized> {
    instance: Arc<T>,
    handlers: Vec<Handler<T>>,
    dispose: Option<DisposeFn<T>>,
}

fn panic_error(payload: Box<dyn Any + Send>) -> InvokeError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "service method panicked".to_string()
    };
    InvokeError::remote(PANIC_KIND, message)
}

impl<T: ?Sized + Send + Sync + 'static> ErasedService for BoundService<T> {
    fn invoke(
        &self,
        method: usize,
        invocation: Invocation,
    ) -> BoxFuture<'static, std::result::Result<Invocation, InvokeError>> {
        let Some(handler) = self.handlers.get(method).cloned() else {
            let err = RpcError::InvalidFrame(format!("No handler for method {method}"));
            return futures::future::ready(Err(InvokeError::Codec(err))).boxed();
        };
        let instance = Arc::clone(&self.instance);

        match handler {
            Handler::Sync(handler) => async move {
                let joined = tokio::task::spawn_blocking(move || {
                    let mut invocation = invocation;
                    handler(&*instance, &mut invocation).map(|()| invocation)
                })
                .await;

                match joined {
                    Ok(result) => result,
                    Err(e) => match e.try_into_panic() {
                        Ok(payload) => Err(panic_error(payload)),
                        Err(e) => Err(InvokeError::Codec(RpcError::Io(std::io::Error::other(e)))),
                    },
                }
            }
            .boxed(),
            Handler::Async(handler) => AssertUnwindSafe(handler(instance, invocation))
                .catch_unwind()
                .map(|result| result.unwrap_or_else(|payload| Err(panic_error(payload))))
                .boxed(),
        }
    }

    fn dispose(&self) {
        if let Some(hook) = &self.dispose {
            hook(&*self.instance);
        }
    }
}

/// A registered service: descriptor, method table, sync info and bound singleton.
pub struct ServiceEntry {
    descriptor: ServiceDescriptor,
    methods: Vec<MethodDescriptor>,
    sync_info: ServiceSyncInfo,
    sync_bytes: Vec<u8>,
    codec: ParamCodec,
    service: Box<dyn ErasedService>,
}

impl ServiceEntry {
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn sync_info(&self) -> &ServiceSyncInfo {
        &self.sync_info
    }

    pub(crate) fn sync_bytes(&self) -> &[u8] {
        &self.sync_bytes
    }

    pub fn codec(&self) -> ParamCodec {
        self.codec
    }

    pub fn method(&self, ordinal: i32) -> Option<&MethodDescriptor> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|idx| self.methods.get(idx))
    }

    /// Run a method with already decoded argument slots.
    pub(crate) fn invoke(
        &self,
        method: &MethodDescriptor,
        args: Vec<Slot>,
    ) -> BoxFuture<'static, std::result::Result<Invocation, InvokeError>> {
        let invocation = Invocation::new(self.codec, args, method.by_ref.clone());
        self.service.invoke(method.ordinal as usize, invocation)
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("descriptor", &self.descriptor)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// All services of one host.
pub struct ServiceRegistry {
    services: Vec<ServiceEntry>,
    by_name: HashMap<String, usize>,
    options: ServiceOptions,
    started: bool,
    disposed: AtomicBool,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(ServiceOptions::default())
    }
}

impl ServiceRegistry {
    pub fn new(options: ServiceOptions) -> Self {
        Self {
            services: Vec::new(),
            by_name: HashMap::new(),
            options,
            started: false,
            disposed: AtomicBool::new(false),
        }
    }

    /// Register a singleton under its interface with the registry-wide options.
    pub fn register<T>(&mut self, interface: Interface<T>, singleton: Arc<T>) -> Result<i32>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let options = self.options;
        self.register_with_options(interface, singleton, options)
    }

    /// Register a singleton with its own compression and serialization settings.
    pub fn register_with_options<T>(
        &mut self,
        interface: Interface<T>,
        singleton: Arc<T>,
        options: ServiceOptions,
    ) -> Result<i32>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.started {
            return Err(RpcError::AlreadyStarted);
        }
        if self.by_name.contains_key(interface.name()) {
            return Err(RpcError::DuplicateService(interface.name().to_string()));
        }

        let ordinal = i32::try_from(self.services.len())
            .map_err(|_| RpcError::ConfigError("Too many services".to_string()))?;
        let (name, specs, dispose) = interface.flatten();

        let mut methods = Vec::with_capacity(specs.len());
        let mut handlers = Vec::with_capacity(specs.len());
        for (idx, (spec, handler)) in specs.into_iter().enumerate() {
            let method_ordinal = i32::try_from(idx)
                .map_err(|_| RpcError::ConfigError("Too many methods".to_string()))?;
            methods.push(MethodDescriptor {
                ordinal: method_ordinal,
                name: spec.name,
                return_type: spec.return_type,
                parameter_types: spec.parameter_types,
                by_ref: spec.by_ref,
            });
            handlers.push(handler);
        }

        let sync_info = ServiceSyncInfo {
            service_ordinal: ordinal,
            use_compression: options.use_compression,
            compression_threshold: options.threshold() as i32,
            methods: methods
                .iter()
                .map(|m| MethodSyncInfo {
                    ordinal: m.ordinal,
                    name: m.name.clone(),
                    return_type: m.return_type.clone(),
                    parameter_types: m.parameter_types.clone(),
                })
                .collect(),
        };
        let sync_bytes = sync_info.encode()?;

        debug!(service = %name, ordinal, methods = methods.len(), "Service registered");

        self.by_name.insert(name.clone(), self.services.len());
        self.services.push(ServiceEntry {
            descriptor: ServiceDescriptor { name, ordinal },
            methods,
            sync_info,
            sync_bytes,
            codec: options.codec(),
            service: Box::new(BoundService {
                instance: singleton,
                handlers,
                dispose,
            }),
        });

        Ok(ordinal)
    }

    /// Freeze the registry. Later registrations fail with `AlreadyStarted`.
    pub fn start(&mut self) {
        if !self.started {
            info!(services = self.services.len(), "Service registry started");
        }
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn options(&self) -> ServiceOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceEntry> {
        self.by_name.get(name).map(|&idx| &self.services[idx])
    }

    pub fn service_by_ordinal(&self, ordinal: i32) -> Option<&ServiceEntry> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|idx| self.services.get(idx))
    }

    pub fn sync_info(&self, name: &str) -> Option<&ServiceSyncInfo> {
        self.service(name).map(ServiceEntry::sync_info)
    }

    /// Resolve an invocation target; `None` for unknown service or method ordinals.
    pub fn resolve(&self, service: i32, method: i32) -> Option<(&ServiceEntry, &MethodDescriptor)> {
        let entry = self.service_by_ordinal(service)?;
        let method = entry.method(method)?;
        Some((entry, method))
    }

    /// Run every service's disposal hook. Only the first call has any effect.
    pub fn dispose_all(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for entry in &self.services {
            debug!(service = %entry.descriptor.name, "Disposing service");
            entry.service.dispose();
        }
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services)
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Tester {
        disposed: AtomicUsize,
    }

    fn noop(_: &Tester, _: &mut Invocation) -> std::result::Result<(), InvokeError> {
        Ok(())
    }

    fn spec(name: &str) -> MethodSpec {
        MethodSpec::new(name).param::<i32>().returns::<i32>()
    }

    #[test]
    fn test_method_ordinals_own_then_inherited() {
        let base = Interface::<Tester>::new("Base").method(spec("Ping"), noop);
        let left = Interface::new("Left")
            .method(spec("L1"), noop)
            .extends(Interface::new("Base").method(spec("Ping"), noop));
        let right = Interface::new("Right").method(spec("R1"), noop).extends(base);
        let top = Interface::new("Top")
            .method(spec("T1"), noop)
            .method(spec("T2"), noop)
            .extends(left)
            .extends(right);

        let mut registry = ServiceRegistry::default();
        registry.register(top, Arc::new(Tester::default())).unwrap();

        let names: Vec<_> = registry
            .service("Top")
            .unwrap()
            .methods()
            .iter()
            .map(|m| (m.ordinal, m.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![(0, "T1"), (1, "T2"), (2, "L1"), (3, "Ping"), (4, "R1")]
        );
    }

    #[test]
    fn test_duplicate_and_late_registration() {
        let mut registry = ServiceRegistry::default();
        let a = registry
            .register(Interface::<Tester>::new("A"), Arc::new(Tester::default()))
            .unwrap();
        let b = registry
            .register(Interface::<Tester>::new("B"), Arc::new(Tester::default()))
            .unwrap();
        assert_eq!((a, b), (0, 1));

        assert!(matches!(
            registry.register(Interface::<Tester>::new("A"), Arc::new(Tester::default())),
            Err(RpcError::DuplicateService(name)) if name == "A"
        ));

        registry.start();
        assert!(matches!(
            registry.register(Interface::<Tester>::new("C"), Arc::new(Tester::default())),
            Err(RpcError::AlreadyStarted)
        ));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_sync_info_and_resolution() {
        let iface = Interface::<Tester>::new("Svc")
            .method(
                MethodSpec::new("Get")
                    .param::<String>()
                    .param_ref::<i32>()
                    .returns::<i64>(),
                noop,
            )
            .method(spec("Other"), noop);
        let options = ServiceOptions {
            use_compression: true,
            compression_threshold: 100,
            ..ServiceOptions::default()
        };
        let mut registry = ServiceRegistry::new(options);
        registry.register(iface, Arc::new(Tester::default())).unwrap();

        let sync = registry.sync_info("Svc").unwrap();
        assert!(sync.use_compression);
        assert_eq!(sync.compression_threshold, 1024);
        assert_eq!(
            sync.methods[0].parameter_types,
            vec!["alloc::string::String".to_string(), "&mut i32".to_string()]
        );
        assert_eq!(sync.methods[0].return_type, "i64");

        let (_, method) = registry.resolve(0, 1).unwrap();
        assert_eq!(method.name, "Other");
        assert!(registry.resolve(0, 2).is_none());
        assert!(registry.resolve(1, 0).is_none());
        assert!(registry.resolve(-1, 0).is_none());
        assert!(registry.sync_info("Missing").is_none());
    }

    #[test]
    fn test_reply_slots_carry_by_ref_values() {
        let codec = ParamCodec::default();
        let args = vec![
            Some(codec.serialize("name").unwrap()),
            Some(codec.serialize(&1_i32).unwrap()),
            Some(codec.serialize(&2_i32).unwrap()),
        ];
        let mut inv = Invocation::new(codec, args, vec![false, true, true]);
        inv.set_return(&7_i64).unwrap();
        inv.set_out(1, &44_i32).unwrap();
        assert!(matches!(
            inv.set_out(0, &0_i32),
            Err(InvokeError::Remote(_))
        ));

        let slots = inv.into_reply_slots();
        assert_eq!(slots.len(), 4);
        let ret: i64 = codec.deserialize(slots[0].as_deref().unwrap()).unwrap();
        let out: i32 = codec.deserialize(slots[2].as_deref().unwrap()).unwrap();
        let untouched: i32 = codec.deserialize(slots[3].as_deref().unwrap()).unwrap();
        assert_eq!((ret, out, untouched), (7, 44, 2));
        assert!(slots[1].is_none());
    }

    #[test]
    fn test_body_errors_are_remote_and_decode_errors_are_codec() {
        let err = InvokeError::from(RpcError::ServiceNotFound("IStock".into()));
        match err {
            InvokeError::Remote(remote) => {
                assert_eq!(remote.kind, "RpcError");
                assert!(remote.message.contains("IStock"));
            }
            InvokeError::Codec(e) => panic!("expected a remote error, got {e:?}"),
        }

        let codec = ParamCodec::default();
        let inv = Invocation::new(codec, vec![Some(vec![0xff]), None], vec![false, false]);
        assert!(matches!(inv.arg::<String>(0), Err(InvokeError::Codec(_))));
        assert!(matches!(inv.arg::<i32>(1), Err(InvokeError::Codec(_))));
        assert!(matches!(inv.arg::<i32>(2), Err(InvokeError::Codec(_))));
    }

    #[tokio::test]
    async fn test_panics_become_remote_errors() {
        let iface = Interface::<Tester>::new("Panicky")
            .method(spec("Sync"), |_, inv| {
                let n: i32 = inv.arg(0)?;
                if n == 0 {
                    panic!("sync boom");
                }
                Ok(())
            })
            .method_async(spec("Async"), |_, inv| async move {
                let n: i32 = inv.arg(0)?;
                if n == 0 {
                    panic!("async boom");
                }
                Ok(inv)
            });
        let mut registry = ServiceRegistry::default();
        registry.register(iface, Arc::new(Tester::default())).unwrap();
        registry.start();

        let zero = ParamCodec::default().serialize(&0_i32).unwrap();
        for (ordinal, expected) in [(0, "sync boom"), (1, "async boom")] {
            let (entry, method) = registry.resolve(0, ordinal).unwrap();
            match entry.invoke(method, vec![Some(zero.clone())]).await {
                Err(InvokeError::Remote(e)) => {
                    assert_eq!(e.kind, PANIC_KIND);
                    assert_eq!(e.message, expected);
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[test]
    fn test_dispose_runs_once() {
        let tester = Arc::new(Tester::default());
        let iface = Interface::<Tester>::new("Disposable").on_dispose(|t| {
            t.disposed.fetch_add(1, Ordering::SeqCst);
        });
        let mut registry = ServiceRegistry::default();
        registry.register(iface, Arc::clone(&tester)).unwrap();

        registry.dispose_all();
        registry.dispose_all();
        assert_eq!(tester.disposed.load(Ordering::SeqCst), 1);
    }
}
