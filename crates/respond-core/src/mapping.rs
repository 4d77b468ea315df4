//! Exception mapping: turning failures into responses.
//!
//! [`ExceptionMappers`] is the registry of handlers, keyed by the concrete
//! error type a [`Failure`] was built from. It is assembled once at startup
//! and only read while requests are processed, so a single instance is
//! shared behind an `Arc` by every in-flight request.
//!
//! Lookup takes the handler registered for the failure's exact type; when
//! there is none, or it declines the failure, the fallback handler (if any)
//! is used.

use std::any::TypeId;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use respond_types::{Failure, MappableError, Response, WebApplicationError};

/// Produces a response for a failure.
pub trait ExceptionMapper: Send + Sync {
    /// Map `failure`. `Ok(None)` declines it; an `Err` is a mapping
    /// failure and becomes terminal.
    fn to_response(&self, failure: &Failure) -> Result<Option<Response>, Failure>;
}

/// Adapts a closure over a concrete error type.
struct TypedMapper<E, F> {
    handler: F,
    _error: PhantomData<fn(&E)>,
}

impl<E, F> ExceptionMapper for TypedMapper<E, F>
where
    E: StdError + Send + Sync + 'static,
    F: Fn(&E) -> Result<Option<Response>, Failure> + Send + Sync,
{
    fn to_response(&self, failure: &Failure) -> Result<Option<Response>, Failure> {
        match failure.downcast_ref::<E>() {
            Some(error) => (self.handler)(error),
            None => Ok(None),
        }
    }
}

/// Adapts a closure over any failure.
struct AnyMapper<F>(F);

impl<F> ExceptionMapper for AnyMapper<F>
where
    F: Fn(&Failure) -> Result<Response, Failure> + Send + Sync,
{
    fn to_response(&self, failure: &Failure) -> Result<Option<Response>, Failure> {
        (self.0)(failure).map(Some)
    }
}

#[derive(Clone)]
struct Registration {
    type_name: &'static str,
    mapper: Arc<dyn ExceptionMapper>,
}

/// Registry of exception mappers.
#[derive(Clone, Default)]
pub struct ExceptionMappers {
    by_type: HashMap<TypeId, Registration>,
    fallback: Option<Arc<dyn ExceptionMapper>>,
}

impl ExceptionMappers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for failures of type `E`, replacing any previous one.
    pub fn register<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E) -> Result<Response, Failure> + Send + Sync + 'static,
    {
        self.register_partial::<E, _>(move |error: &E| handler(error).map(Some))
    }

    /// Register a handler for `E` that may decline with `Ok(None)`.
    pub fn register_partial<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E) -> Result<Option<Response>, Failure> + Send + Sync + 'static,
    {
        let mapper = TypedMapper {
            handler,
            _error: PhantomData,
        };
        self.register_mapper::<E>(Arc::new(mapper))
    }

    /// Register a ready-made mapper for failures of type `E`.
    pub fn register_mapper<E>(&mut self, mapper: Arc<dyn ExceptionMapper>) -> &mut Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<E>();
        if self
            .by_type
            .insert(TypeId::of::<E>(), Registration { type_name, mapper })
            .is_some()
        {
            debug!(error_type = type_name, "replacing exception mapper");
        }
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<E, F>(mut self, handler: F) -> Self
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E) -> Result<Response, Failure> + Send + Sync + 'static,
    {
        self.register::<E, F>(handler);
        self
    }

    /// Builder form of [`register_partial`](Self::register_partial).
    pub fn with_partial<E, F>(mut self, handler: F) -> Self
    where
        E: StdError + Send + Sync + 'static,
        F: Fn(&E) -> Result<Option<Response>, Failure> + Send + Sync + 'static,
    {
        self.register_partial::<E, F>(handler);
        self
    }

    /// Handler used when no type-specific mapper matches.
    pub fn set_fallback<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Failure) -> Result<Response, Failure> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(AnyMapper(handler)));
        self
    }

    /// The mapper for `failure`'s type, falling back to the catch-all.
    pub fn find(&self, failure: &Failure) -> Option<Arc<dyn ExceptionMapper>> {
        self.find_by_type(failure.type_id())
            .or_else(|| self.fallback.clone())
    }

    /// The catch-all mapper, if any.
    pub fn fallback(&self) -> Option<Arc<dyn ExceptionMapper>> {
        self.fallback.clone()
    }

    /// The mapper registered for exactly `type_id`.
    pub fn find_by_type(&self, type_id: TypeId) -> Option<Arc<dyn ExceptionMapper>> {
        self.by_type.get(&type_id).map(|reg| Arc::clone(&reg.mapper))
    }

    /// Type names with a registered mapper, sorted.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.by_type.values().map(|reg| reg.type_name).collect();
        names.sort_unstable();
        names
    }

    /// Number of type-specific mappers.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Whether no mapper (type-specific or fallback) is registered.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty() && self.fallback.is_none()
    }
}

/// Map a failure to a response.
///
/// A [`MappableError`] is unwrapped first. A [`WebApplicationError`]
/// contributes its own response; a registered mapper is consulted when there
/// is no such response or it has no body. A type-specific mapper that
/// declines hands over to the fallback. `Ok(None)` means nothing applied.
/// A failing mapper is returned as `Err` for the caller to commit.
pub fn map_exception(
    failure: &Failure,
    mappers: Option<&ExceptionMappers>,
) -> Result<Option<Response>, Failure> {
    let failure = match failure.downcast_ref::<MappableError>() {
        Some(mappable) => mappable.cause().clone(),
        None => failure.clone(),
    };

    let mut response = failure
        .downcast_ref::<WebApplicationError>()
        .map(|err| err.response().clone());

    if response.as_ref().is_some_and(Response::has_entity) {
        return Ok(response);
    }
    let Some(mappers) = mappers else {
        return Ok(response);
    };

    let candidates = mappers
        .find_by_type(failure.type_id())
        .into_iter()
        .chain(mappers.fallback());
    for mapper in candidates {
        if let Some(mapped) = mapper.to_response(&failure)? {
            debug!(error_type = failure.type_name(), "mapped failure to response");
            return Ok(Some(mapped));
        }
        debug!(error_type = failure.type_name(), "exception mapper declined failure");
    }

    Ok(response)
}
