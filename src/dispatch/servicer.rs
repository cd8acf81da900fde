use std::{collections::BTreeMap, fmt, sync::Arc};

use super::{CallAdapter, CallContext, CallInput, CallOutput};
use crate::{service::ServiceDefinition, wire::CompiledSchema, CallError, DispatchError};

/// The object handed to a transport: one [`CallAdapter`] per registered endpoint.
///
/// The method map is built once and never changes. Lookups of unregistered methods fail.
#[derive(Clone)]
pub struct Servicer {
    name: Arc<str>,
    methods: Arc<BTreeMap<String, CallAdapter>>,
}

impl Servicer {
    pub fn new(service: &ServiceDefinition, schema: &CompiledSchema) -> Result<Self, DispatchError> {
        if schema.service().name() != crate::case::pascal_case(service.service_name()) {
            return Err(DispatchError::MissingService(
                service.service_name().to_string(),
            ));
        }

        let methods = service
            .endpoints()
            .iter()
            .map(|endpoint| {
                CallAdapter::new(endpoint, schema).map(|adapter| (endpoint.name().to_string(), adapter))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "built servicer '{}' with methods {:?}",
            schema.servicer_name(),
            methods.keys().collect::<Vec<_>>()
        );

        Ok(Self {
            name: schema.servicer_name().into(),
            methods: Arc::new(methods),
        })
    }

    /// The servicer's name, `<Service>Servicer`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self, name: &str) -> Result<&CallAdapter, DispatchError> {
        self.methods
            .get(name)
            .ok_or_else(|| DispatchError::UnknownEndpoint(name.to_string()))
    }

    pub fn methods(&self) -> impl Iterator<Item = &CallAdapter> {
        self.methods.values()
    }

    /// Look up `method` and run one call on it.
    pub fn call(
        &self,
        method: &str,
        input: CallInput,
        ctx: CallContext,
    ) -> Result<CallOutput, CallError> {
        match self.method(method) {
            Ok(adapter) => adapter.call(input, ctx),
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("call to unknown method '{method}' on '{}'", self.name);
                Err(err.into())
            }
        }
    }
}

impl fmt::Debug for Servicer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Servicer")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}
