//! Service contracts: a builder that collects method descriptors for a
//! service, and the immutable registry an [`crate::Endpoint`] dispatches
//! against once registration is complete.

use std::collections::HashMap;
use std::sync::Arc;

use crate::call::Handler;
use crate::error::ConfigError;

/// One registered method: its dispatch shape and the handler to invoke.
#[derive(Clone)]
pub struct MethodDescriptor {
    pub service: String,
    pub method: String,
    pub handler: Arc<dyn Handler>,
}

/// Collects the methods of one logical service before registration.
///
/// A contract can absorb another contract's descriptors (`merge`), letting
/// a service compose smaller contracts — e.g. a set of methods shared
/// across several services — without repeating the `add_*` calls.
#[derive(Default, Clone)]
pub struct ServiceContract {
    service: String,
    descriptors: Vec<MethodDescriptor>,
}

impl ServiceContract {
    pub fn new(service: impl Into<String>) -> Self {
        ServiceContract {
            service: service.into(),
            descriptors: Vec::new(),
        }
    }

    pub fn add_method(&mut self, method: impl Into<String>, handler: Arc<dyn Handler>) -> &mut Self {
        self.descriptors.push(MethodDescriptor {
            service: self.service.clone(),
            method: method.into(),
            handler,
        });
        self
    }

    /// Absorbs another contract's descriptors under this contract's service
    /// name, re-keying them in the process.
    pub fn merge(&mut self, other: &ServiceContract) -> &mut Self {
        for descriptor in &other.descriptors {
            self.descriptors.push(MethodDescriptor {
                service: self.service.clone(),
                method: descriptor.method.clone(),
                handler: descriptor.handler.clone(),
            });
        }
        self
    }

    pub fn descriptors(&self) -> &[MethodDescriptor] {
        &self.descriptors
    }
}

/// The immutable, lock-free-at-read registry an endpoint dispatches
/// incoming calls against. Built once from one or more [`ServiceContract`]s.
#[derive(Default)]
pub struct Registry {
    methods: HashMap<(String, String), Arc<dyn Handler>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, service: &str, method: &str) -> Option<&Arc<dyn Handler>> {
        self.methods.get(&(service.to_string(), method.to_string()))
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    methods: HashMap<(String, String), Arc<dyn Handler>>,
}

impl RegistryBuilder {
    /// Adds every method in `contract`. Fails with
    /// [`ConfigError::DuplicateMethod`] if a `(service, method)` tuple was
    /// already registered by an earlier contract.
    pub fn register(&mut self, contract: &ServiceContract) -> Result<(), ConfigError> {
        for descriptor in contract.descriptors() {
            let key = (descriptor.service.clone(), descriptor.method.clone());
            if self.methods.contains_key(&key) {
                return Err(ConfigError::DuplicateMethod {
                    service: descriptor.service.clone(),
                    method: descriptor.method.clone(),
                });
            }
            self.methods.insert(key, descriptor.handler.clone());
        }
        Ok(())
    }

    pub fn build(self) -> Registry {
        Registry {
            methods: self.methods,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::unary_handler;
    use crate::codec::SerdeCodec;
    use rapace_wire::Status;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Ping;
    #[derive(Serialize, Deserialize)]
    struct Pong;

    fn noop_handler() -> Arc<dyn Handler> {
        unary_handler(
            Arc::new(SerdeCodec::<Ping>::postcard()),
            Arc::new(SerdeCodec::<Pong>::postcard()),
            |_req: Ping| async move { Ok(Pong) as Result<Pong, Status> },
        )
    }

    #[test]
    fn duplicate_method_registration_is_rejected() {
        let mut contract = ServiceContract::new("Echo");
        contract.add_method("Say", noop_handler());
        let mut other = ServiceContract::new("Echo");
        other.add_method("Say", noop_handler());

        let mut builder = Registry::builder();
        builder.register(&contract).unwrap();
        let err = builder.register(&other).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DuplicateMethod {
                service: "Echo".to_string(),
                method: "Say".to_string()
            }
        );
    }

    #[test]
    fn merge_rekeys_under_the_target_service() {
        let mut shared = ServiceContract::new("Shared");
        shared.add_method("Ping", noop_handler());

        let mut echo = ServiceContract::new("Echo");
        echo.merge(&shared);

        assert_eq!(echo.descriptors().len(), 1);
        assert_eq!(echo.descriptors()[0].service, "Echo");
        assert_eq!(echo.descriptors()[0].method, "Ping");
    }

    #[test]
    fn registry_lookup_by_service_and_method() {
        let mut contract = ServiceContract::new("Echo");
        contract.add_method("Say", noop_handler());
        let mut builder = Registry::builder();
        builder.register(&contract).unwrap();
        let registry = builder.build();
        assert!(registry.get("Echo", "Say").is_some());
        assert!(registry.get("Echo", "Other").is_none());
    }
}
