use std::{
    borrow::Cow,
    collections::BTreeSet,
    fmt,
    future::Future,
    path::PathBuf,
    sync::Arc,
};

use futures::Stream;

use crate::{
    case::pascal_case,
    dispatch::Servicer,
    endpoint::{Endpoint, EndpointOptions},
    handler::HandlerFunction,
    schema::{assemble_with, SchemaDocument},
    transport::Transport,
    types::{Model, RecordId, RecordType, TypeDeclaration},
    wire::{CompiledSchema, SchemaCompiler},
    GenerateConfig, Handler, HandlerError, SchemaError, ServeConfig, ServiceError, Streaming,
};

/// Every record the schema has to describe, in the order they were first seen.
///
/// Records are deduplicated by identity. Two distinct records with the same name are both kept
/// and left for the translator to reject.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    seen: BTreeSet<RecordId>,
    models: Vec<Arc<RecordType>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the record was already registered.
    pub fn add(&mut self, record: Arc<RecordType>) -> bool {
        if !self.seen.insert(record.id().clone()) {
            return false;
        }
        self.models.push(record);
        true
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.seen.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeDeclaration> + '_ {
        self.models
            .iter()
            .map(|record| TypeDeclaration::Record(record.clone()))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// The files and bindings produced by [`ServiceDefinition::generate_schema`].
#[derive(Debug, Clone)]
pub struct GeneratedSchema {
    pub document: SchemaDocument,
    pub schema_path: PathBuf,
    pub bindings_path: PathBuf,
    pub compiled: CompiledSchema,
}

/// A named set of endpoints. This is what gets turned into a schema and served.
///
/// ```rust
/// use autorpc::{Handler, HandlerError, ServiceDefinition};
///
/// async fn add(a: i32, b: i32) -> Result<i32, HandlerError> {
///     Ok(a + b)
/// }
///
/// let mut service = ServiceDefinition::new("AdvancedService");
/// service.register("add", Handler::unary(add).params(["a", "b"])).unwrap();
///
/// assert!(service.schema().unwrap().text().contains("rpc add (AddRequest) returns (AddResponse);"));
/// ```
pub struct ServiceDefinition {
    service_name: Cow<'static, str>,
    endpoints: Vec<Endpoint>,
    models: ModelRegistry,
}

impl ServiceDefinition {
    pub fn new(service_name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            service_name: service_name.into(),
            endpoints: Vec::new(),
            models: ModelRegistry::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn set_service_name(&mut self, service_name: impl Into<Cow<'static, str>>) {
        self.service_name = service_name.into();
    }

    /// Register a handler, inferring its request and response records from its signature.
    pub fn register(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        handler: Handler,
    ) -> Result<&Endpoint, SchemaError> {
        self.register_with(name, handler, EndpointOptions::default())
    }

    pub fn register_with(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        handler: Handler,
        options: EndpointOptions,
    ) -> Result<&Endpoint, SchemaError> {
        let name = name.into();
        if self.endpoint(&name).is_some() {
            return Err(SchemaError::DuplicateEndpointName(name.into_owned()));
        }

        let endpoint = Endpoint::new(name, handler, options)?;
        self.models.add(endpoint.request_record().clone());
        self.models.add(endpoint.response_record().clone());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "registered {} endpoint '{}' ({} -> {})",
            endpoint.cardinality(),
            endpoint.name(),
            endpoint.request_record().name(),
            endpoint.response_record().name()
        );

        self.endpoints.push(endpoint);
        Ok(&self.endpoints[self.endpoints.len() - 1])
    }

    pub fn unary<F, TMarker, Fut, O>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        func: F,
    ) -> Result<&Endpoint, SchemaError>
    where
        F: HandlerFunction<TMarker, Result = Fut>,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
        O: Model,
    {
        self.register(name, Handler::unary(func))
    }

    pub fn server_streaming<F, TMarker, S, O>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        func: F,
    ) -> Result<&Endpoint, SchemaError>
    where
        F: HandlerFunction<TMarker, Result = S>,
        S: Stream<Item = Result<O, HandlerError>> + Send + 'static,
        O: Model,
    {
        self.register(name, Handler::server_streaming(func))
    }

    pub fn client_streaming<F, Fut, I, O>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        func: F,
    ) -> Result<&Endpoint, SchemaError>
    where
        F: Fn(Streaming<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
        I: Model,
        O: Model,
    {
        self.register(name, Handler::client_streaming(func))
    }

    pub fn bidi_streaming<F, S, I, O>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        func: F,
    ) -> Result<&Endpoint, SchemaError>
    where
        F: Fn(Streaming<I>) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<O, HandlerError>> + Send + 'static,
        I: Model,
        O: Model,
    {
        self.register(name, Handler::bidi_streaming(func))
    }

    /// Endpoints in registration order.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|endpoint| endpoint.name() == name)
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn schema(&self) -> Result<SchemaDocument, SchemaError> {
        self.schema_with(&GenerateConfig::default())
    }

    pub fn schema_with(&self, config: &GenerateConfig) -> Result<SchemaDocument, SchemaError> {
        assemble_with(self, config)
    }

    /// Write the schema document, compile it and write the compiled bindings next to it.
    pub fn generate_schema(
        &self,
        config: &GenerateConfig,
        compiler: impl SchemaCompiler,
    ) -> Result<GeneratedSchema, ServiceError> {
        let document = self.schema_with(config)?;
        let schema_path = document.write_to(&config.schema_dir)?;
        let compiled = compiler.compile(&document)?;
        let bindings_path = compiled.write_to(&config.bindings_dir)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            "generated bindings '{}' for service '{}' in {bindings_path:?}",
            compiled.module_name(),
            document.service_name()
        );

        Ok(GeneratedSchema {
            document,
            schema_path,
            bindings_path,
            compiled,
        })
    }

    /// Build the servicer and run it on `transport` until the transport terminates.
    pub async fn serve<T: Transport>(
        &self,
        transport: &mut T,
        config: &ServeConfig,
        compiler: impl SchemaCompiler,
    ) -> Result<(), ServiceError> {
        let compiled = if config.skip_schema_generation {
            let path = config
                .generate
                .bindings_dir
                .join(CompiledSchema::file_name(&pascal_case(&self.service_name)));

            #[cfg(feature = "tracing")]
            tracing::info!("loading existing bindings from {path:?}");

            CompiledSchema::load(path, &pascal_case(&self.service_name))?
        } else {
            self.generate_schema(&config.generate, compiler)?.compiled
        };

        let servicer = Servicer::new(self, &compiled)?;
        let (host, port) = config.address();
        transport.configure(config).map_err(transport_error)?;
        transport
            .register_servicer(servicer)
            .map_err(transport_error)?;
        transport.bind(host, port).map_err(transport_error)?;
        transport.start().map_err(transport_error)?;
        transport.await_termination().await.map_err(transport_error)?;

        #[cfg(feature = "tracing")]
        tracing::info!("service '{}' terminated", self.service_name);

        Ok(())
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("service_name", &self.service_name)
            .field(
                "endpoints",
                &self.endpoints.iter().map(Endpoint::name).collect::<Vec<_>>(),
            )
            .field("models", &self.models.len())
            .finish()
    }
}

fn transport_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> ServiceError {
    ServiceError::Transport(Box::new(err))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::types::{Empty, Record};

    #[derive(Serialize, Deserialize)]
    struct Item {
        id: i32,
    }

    impl Model for Item {
        fn declaration() -> TypeDeclaration {
            Record::of::<Self>("Item").field::<i32>("id").build()
        }
    }

    async fn get_item(_: Empty) -> Result<Item, HandlerError> {
        Ok(Item { id: 1 })
    }

    async fn first_item(_: Empty) -> Result<Item, HandlerError> {
        Ok(Item { id: 1 })
    }

    #[test]
    fn test_duplicate_endpoint_name() {
        let mut service = ServiceDefinition::new("ShopService");
        service.unary("get_item", get_item).unwrap();

        assert!(matches!(
            service.unary("get_item", first_item),
            Err(SchemaError::DuplicateEndpointName(name)) if name == "get_item"
        ));
        assert_eq!(service.endpoints().len(), 1);
    }

    #[test]
    fn test_models_are_deduplicated() {
        let mut service = ServiceDefinition::new("ShopService");
        service.unary("get_item", get_item).unwrap();
        service.unary("first_item", first_item).unwrap();

        let names = service
            .models()
            .iter()
            .filter_map(|decl| decl.as_record())
            .map(|record| record.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["Empty", "Item"]);
    }

    #[test]
    fn test_failed_registration_leaves_no_trace() {
        let mut service = ServiceDefinition::new("ShopService");
        let missing = Handler::unary(|a: i32| async move { Ok::<_, HandlerError>(a) })
            .params(Vec::<&'static str>::new());

        assert!(service.register("echo", missing).is_err());
        assert!(service.endpoint("echo").is_none());
        assert!(service.models().is_empty());
    }
}
