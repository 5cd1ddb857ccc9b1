//! Method tables mapping names to ready-to-call invokers.
//!
//! Registering a function builds its invoker once: a boxed closure binding
//! the parameter decoders, the call itself and the return-value encoder.
//! Dispatch afterwards is a plain map lookup plus a call, with no per-call
//! reflection or code synthesis.
//!
//! Functions of up to five parameters are accepted through the [`Method`] and
//! [`FallibleMethod`] adapter traits. Parameters are decoded from the
//! sub-framed payload in declared order; the return value is encoded with the
//! table's serializer, with `()` producing an empty payload for
//! void-returning methods.

use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};

use crate::envelope::ParamCursor;
use crate::serializer::{BincodeSerializer, CodecError, Serializer};

/// Error type application handlers may return from fallible methods.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Failures while running a resolved method.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The call payload did not decode into the declared parameters.
    #[error("failed to decode parameters: {0}")]
    Params(#[source] CodecError),
    /// The return value could not be encoded.
    #[error("failed to encode return value: {0}")]
    Return(#[source] CodecError),
    /// The handler itself reported an application error.
    #[error("{0}")]
    Handler(HandlerError),
}

/// A registered method: decodes parameters, calls the target and encodes the
/// return value.
pub type Invoker<S> = Box<dyn Fn(&S, &[u8]) -> Result<Vec<u8>, InvokeError> + Send + Sync>;

/// Adapter turning an infallible function into an [`Invoker`].
///
/// `Marker` ties the implementation to one concrete signature so functions of
/// different arities do not produce overlapping implementations.
pub trait Method<S, Marker>: Send + Sync + 'static {
    /// Build the invoker bound to this function.
    fn into_invoker(self) -> Invoker<S>;
}

/// Adapter turning a `Result`-returning function into an [`Invoker`].
///
/// The error is carried back to the caller as a failure envelope message
/// rather than crossing the dispatch boundary.
pub trait FallibleMethod<S, Marker>: Send + Sync + 'static {
    /// Build the invoker bound to this function.
    fn into_invoker(self) -> Invoker<S>;
}

macro_rules! impl_method_arities {
    ($($p:ident),*) => {
        impl<S, F, R, $($p),*> Method<S, fn($($p),*) -> R> for F
        where
            S: Serializer,
            F: Fn($($p),*) -> R + Send + Sync + 'static,
            R: Serialize,
            $($p: DeserializeOwned + 'static,)*
        {
            fn into_invoker(self) -> Invoker<S> {
                Box::new(move |serializer, params| {
                    #[allow(unused_mut, unused_variables)]
                    let mut cursor = ParamCursor::new(params);
                    $(
                        #[allow(non_snake_case)]
                        let $p: $p = cursor.next(serializer).map_err(InvokeError::Params)?;
                    )*
                    let value = (self)($($p),*);
                    serializer.serialize(&value).map_err(InvokeError::Return)
                })
            }
        }

        impl<S, F, R, E, $($p),*> FallibleMethod<S, fn($($p),*) -> Result<R, E>> for F
        where
            S: Serializer,
            F: Fn($($p),*) -> Result<R, E> + Send + Sync + 'static,
            R: Serialize,
            E: Into<HandlerError> + 'static,
            $($p: DeserializeOwned + 'static,)*
        {
            fn into_invoker(self) -> Invoker<S> {
                Box::new(move |serializer, params| {
                    #[allow(unused_mut, unused_variables)]
                    let mut cursor = ParamCursor::new(params);
                    $(
                        #[allow(non_snake_case)]
                        let $p: $p = cursor.next(serializer).map_err(InvokeError::Params)?;
                    )*
                    let value = (self)($($p),*)
                        .map_err(|error| InvokeError::Handler(error.into()))?;
                    serializer.serialize(&value).map_err(InvokeError::Return)
                })
            }
        }
    };
}

impl_method_arities!();
impl_method_arities!(A1);
impl_method_arities!(A1, A2);
impl_method_arities!(A1, A2, A3);
impl_method_arities!(A1, A2, A3, A4);
impl_method_arities!(A1, A2, A3, A4, A5);

/// Name-to-invoker table for one namespace, built once at registration and
/// immutable while the host serves calls.
pub struct ServiceTable<S = BincodeSerializer> {
    methods: HashMap<String, Invoker<S>>,
}

impl<S: Serializer> Default for ServiceTable<S> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }
}

impl<S: Serializer> ServiceTable<S> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register an infallible method under `name`.
    ///
    /// Registering a name twice replaces the earlier entry; a warning is
    /// logged because this is a known limitation rather than a feature.
    #[must_use]
    pub fn method<F, M>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Method<S, M>,
    {
        self.insert(name.into(), handler.into_invoker());
        self
    }

    /// Register a `Result`-returning method under `name`.
    ///
    /// The error value becomes the failure message seen by the caller.
    #[must_use]
    pub fn fallible<F, M>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: FallibleMethod<S, M>,
    {
        self.insert(name.into(), handler.into_invoker());
        self
    }

    fn insert(&mut self, name: String, invoker: Invoker<S>) {
        if self.methods.insert(name.clone(), invoker).is_some() {
            tracing::warn!(method = %name, "method re-registered; previous handler replaced");
        }
    }

    /// Whether a method named `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.methods.contains_key(name) }

    /// Number of registered methods.
    #[must_use]
    pub fn len(&self) -> usize { self.methods.len() }

    /// Whether the table has no methods.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.methods.is_empty() }

    pub(crate) fn get(&self, name: &str) -> Option<&Invoker<S>> { self.methods.get(name) }
}
