//! Namespace dispatch: routing decoded calls to registered method tables.
//!
//! The registry maps a namespace string to a [`ServiceTable`] and resolves a
//! method name to its invoker. It is populated before the host starts and is
//! read-only afterwards, so connection tasks share it through an `Arc` with
//! no locking on the call path.
//!
//! [`ServiceRegistry::dispatch`] is the boundary no error crosses: routing
//! failures, parameter decode failures, handler errors and handler panics
//! all become failure envelopes, leaving the connection and the host intact.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use bytes::Bytes;

use crate::envelope::{CallEnvelope, ResponseEnvelope};
use crate::serializer::{BincodeSerializer, CodecError, Serializer};
use crate::service::{InvokeError, ServiceTable};

/// Registration and routing failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The namespace already has a registered table.
    #[error("namespace {0} is already registered")]
    DuplicateNamespace(String),
    /// A call targeted a namespace with no registered table.
    #[error("unknown namespace {0}")]
    UnknownNamespace(String),
    /// A call targeted a method missing from its namespace's table.
    #[error("unknown method {namespace}.{method}")]
    UnknownMethod {
        /// Namespace the call targeted.
        namespace: String,
        /// Method name that was not found.
        method: String,
    },
}

/// Any failure while serving one call; its message becomes the failure
/// envelope payload.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The namespace or method could not be resolved.
    #[error(transparent)]
    Routing(#[from] RegistryError),
    /// The resolved method failed to run.
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    /// The call envelope itself did not decode.
    #[error(transparent)]
    Envelope(#[from] CodecError),
}

/// Maps namespaces to method tables and serves decoded call frames.
pub struct ServiceRegistry<S = BincodeSerializer> {
    serializer: S,
    namespaces: HashMap<String, ServiceTable<S>>,
}

impl<S: Serializer + Default> Default for ServiceRegistry<S> {
    fn default() -> Self { Self::with_serializer(S::default()) }
}

impl<S: Serializer + Default> ServiceRegistry<S> {
    /// Create a registry using the serializer's default value.
    #[must_use]
    pub fn new() -> Self { Self::default() }
}

impl<S: Serializer> ServiceRegistry<S> {
    /// Create a registry around a specific serializer instance.
    #[must_use]
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            serializer,
            namespaces: HashMap::new(),
        }
    }

    /// Register `table` under `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateNamespace`] if the namespace is
    /// taken; the earlier registration is left intact.
    pub fn register(
        &mut self,
        namespace: impl Into<String>,
        table: ServiceTable<S>,
    ) -> Result<(), RegistryError> {
        let namespace = namespace.into();
        if self.namespaces.contains_key(&namespace) {
            return Err(RegistryError::DuplicateNamespace(namespace));
        }
        tracing::debug!(namespace = %namespace, methods = table.len(), "service registered");
        self.namespaces.insert(namespace, table);
        Ok(())
    }

    /// Whether a table is registered under `namespace`.
    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool { self.namespaces.contains_key(namespace) }

    /// The serializer used for parameters and return values.
    pub const fn serializer(&self) -> &S { &self.serializer }

    /// Resolve and run one call, returning the encoded return value.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] for unknown namespaces or methods, for
    /// undecodable parameters and for handler failures.
    pub fn invoke(
        &self,
        namespace: &str,
        method: &str,
        params: &[u8],
    ) -> Result<Vec<u8>, DispatchError> {
        let table = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| RegistryError::UnknownNamespace(namespace.to_owned()))?;
        let invoker = table.get(method).ok_or_else(|| RegistryError::UnknownMethod {
            namespace: namespace.to_owned(),
            method: method.to_owned(),
        })?;
        Ok(invoker(&self.serializer, params)?)
    }

    /// Serve one complete request frame, producing the response envelope.
    ///
    /// Never panics and never propagates an error: every failure is folded
    /// into a failure envelope so nothing escapes into the host's I/O loop.
    /// A panic inside a handler is caught and reported the same way, so one
    /// misbehaving method cannot tear down its connection.
    #[must_use]
    pub fn dispatch(&self, frame: Bytes) -> ResponseEnvelope {
        match catch_unwind(AssertUnwindSafe(|| self.try_dispatch(frame))) {
            Ok(Ok(payload)) => ResponseEnvelope::success(payload),
            Ok(Err(error)) => {
                tracing::debug!(%error, "call failed");
                ResponseEnvelope::failure(error.to_string())
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                tracing::error!(message = %message, "handler panicked");
                ResponseEnvelope::failure(format!("handler panicked: {message}"))
            }
        }
    }

    fn try_dispatch(&self, frame: Bytes) -> Result<Vec<u8>, DispatchError> {
        let call = CallEnvelope::decode(frame)?;
        self.invoke(&call.namespace, &call.method, &call.payload)
    }
}

/// Extract the human-readable part of a panic payload, falling back to a
/// generic description for non-string payloads.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else {
        String::from("unknown panic payload")
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::envelope::write_param;

    fn math_registry() -> ServiceRegistry {
        let mut registry = ServiceRegistry::new();
        registry
            .register(
                "math",
                ServiceTable::new()
                    .method("add", |a: i32, b: i32| a + b)
                    .method("quot", |a: i32, b: i32| a / b)
                    .fallible("div", |a: i32, b: i32| {
                        if b == 0 {
                            Err(String::from("division by zero"))
                        } else {
                            Ok(a / b)
                        }
                    }),
            )
            .expect("register math");
        registry
    }

    fn request_frame(namespace: &str, method: &str, params: &[i32]) -> Bytes {
        let serializer = BincodeSerializer;
        let mut body = BytesMut::new();
        CallEnvelope::encode_header(&mut body, namespace, method).expect("header");
        for param in params {
            write_param(&serializer, &mut body, param).expect("param");
        }
        body.freeze()
    }

    #[test]
    fn add_two_and_three_returns_five() {
        let registry = math_registry();
        let response = registry.dispatch(request_frame("math", "add", &[2, 3]));
        assert!(response.is_success());
        let value: i32 = registry
            .serializer()
            .deserialize(&response.payload)
            .expect("decode");
        assert_eq!(value, 5);
    }

    #[test]
    fn unknown_method_names_the_method() {
        let registry = math_registry();
        let response = registry.dispatch(request_frame("math", "subtract", &[2, 3]));
        assert!(!response.is_success());
        assert!(response.failure_message().contains("subtract"));
    }

    #[test]
    fn unknown_namespace_names_the_namespace() {
        let registry = math_registry();
        let response = registry.dispatch(request_frame("physics", "add", &[2, 3]));
        assert!(!response.is_success());
        assert!(response.failure_message().contains("physics"));
    }

    #[test]
    fn handler_error_message_reaches_the_envelope() {
        let registry = math_registry();
        let response = registry.dispatch(request_frame("math", "div", &[1, 0]));
        assert!(!response.is_success());
        assert_eq!(response.failure_message(), "division by zero");
    }

    #[test]
    fn duplicate_namespace_keeps_first_registration() {
        let mut registry = math_registry();
        let err = registry
            .register("math", ServiceTable::new().method("noop", || ()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateNamespace(ns) if ns == "math"));

        // The original table still answers.
        let response = registry.dispatch(request_frame("math", "add", &[2, 3]));
        assert!(response.is_success());
    }

    #[test]
    fn malformed_envelope_becomes_failure_response() {
        let registry = math_registry();
        let response = registry.dispatch(Bytes::from_static(&[9, 0, 0, 0, b'x']));
        assert!(!response.is_success());
        assert!(response.failure_message().contains("truncated"));
    }

    #[test]
    fn panicking_handler_becomes_failure_response() {
        let registry = math_registry();
        let response = registry.dispatch(request_frame("math", "quot", &[1, 0]));
        assert!(!response.is_success());
        assert!(response.failure_message().contains("divide by zero"));

        // The registry keeps serving after containing the panic.
        let response = registry.dispatch(request_frame("math", "quot", &[10, 2]));
        assert!(response.is_success());
        let value: i32 = registry
            .serializer()
            .deserialize(&response.payload)
            .expect("decode");
        assert_eq!(value, 5);
    }

    #[test]
    fn registry_survives_repeated_failures() {
        let registry = math_registry();
        for _ in 0..3 {
            let _ = registry.dispatch(request_frame("physics", "add", &[2, 3]));
        }
        let response = registry.dispatch(request_frame("math", "add", &[2, 3]));
        assert!(response.is_success());
    }
}
