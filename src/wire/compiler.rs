use std::{fs, path::Path};

use prost::Message;
use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor, ServiceDescriptor};
use prost_types::{
    field_descriptor_proto::{Label, Type},
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, OneofDescriptorProto, ServiceDescriptorProto,
};

use crate::{
    case::snake_case,
    endpoint::Cardinality,
    schema::SchemaDocument,
    translate::{SchemaMessage, WireType},
};

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CompileError {
    #[error("invalid schema: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),
    #[error("error decoding descriptor set: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("the compiled schema does not contain service '{0}'")]
    MissingService(String),
    #[error("IO error reading or writing bindings: {0}")]
    Io(#[from] std::io::Error),
}

/// Turns a schema document into wire message descriptors.
pub trait SchemaCompiler {
    fn compile(&self, document: &SchemaDocument) -> Result<CompiledSchema, CompileError>;
}

impl<C: SchemaCompiler + ?Sized> SchemaCompiler for &C {
    fn compile(&self, document: &SchemaDocument) -> Result<CompiledSchema, CompileError> {
        (**self).compile(document)
    }
}

/// Compiles in-process by building the protobuf file descriptor straight from the document.
#[derive(Debug, Clone, Copy, Default)]
pub struct DescriptorCompiler;

impl SchemaCompiler for DescriptorCompiler {
    fn compile(&self, document: &SchemaDocument) -> Result<CompiledSchema, CompileError> {
        let package = document.package();
        let type_name = |name: &str| format!(".{package}.{name}");

        let message_type = document
            .messages()
            .iter()
            .map(|message| message_proto(message, &type_name))
            .collect();

        let method = document
            .rpcs()
            .iter()
            .map(|rpc| MethodDescriptorProto {
                name: Some(rpc.name.clone()),
                input_type: Some(type_name(&rpc.request)),
                output_type: Some(type_name(&rpc.response)),
                client_streaming: Some(rpc.cardinality.request_streamed()),
                server_streaming: Some(rpc.cardinality.response_streamed()),
                ..Default::default()
            })
            .collect();

        let file = FileDescriptorProto {
            name: Some(document.file_name()),
            package: Some(package.to_string()),
            message_type,
            service: vec![ServiceDescriptorProto {
                name: Some(document.service_name().to_string()),
                method,
                ..Default::default()
            }],
            syntax: Some("proto3".into()),
            ..Default::default()
        };

        CompiledSchema::from_file_descriptor_set(
            FileDescriptorSet { file: vec![file] },
            document.service_name(),
        )
    }
}

fn message_proto(message: &SchemaMessage, type_name: &impl Fn(&str) -> String) -> DescriptorProto {
    // proto3 `optional` fields each live in a synthetic oneof named `_<field>`.
    let mut oneof_decl = Vec::new();
    let field = message
        .fields
        .iter()
        .map(|field| {
            let (ty, message_name) = match &field.wire_type {
                WireType::Int32 => (Type::Int32, None),
                WireType::Double => (Type::Double, None),
                WireType::String => (Type::String, None),
                WireType::Bool => (Type::Bool, None),
                WireType::Message(name) => (Type::Message, Some(type_name(name))),
            };
            let label = if field.repeated {
                Label::Repeated
            } else {
                Label::Optional
            };

            let oneof_index = field.optional.then(|| {
                oneof_decl.push(OneofDescriptorProto {
                    name: Some(format!("_{}", field.name)),
                    ..Default::default()
                });
                oneof_decl.len() as i32 - 1
            });

            FieldDescriptorProto {
                name: Some(field.name.clone()),
                number: Some(field.number as i32),
                label: Some(label as i32),
                r#type: Some(ty as i32),
                type_name: message_name,
                oneof_index,
                proto3_optional: field.optional.then_some(true),
                ..Default::default()
            }
        })
        .collect();

    DescriptorProto {
        name: Some(message.name.clone()),
        field,
        oneof_decl,
        ..Default::default()
    }
}

/// The compiled form of a schema document: one descriptor per message and the service.
///
/// This is what a binding generator would emit as a module. It can be written to disk with
/// [`CompiledSchema::write_to`] and loaded back with [`CompiledSchema::load`].
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pool: DescriptorPool,
    files: FileDescriptorSet,
    service: ServiceDescriptor,
}

impl CompiledSchema {
    pub fn from_file_descriptor_set(
        files: FileDescriptorSet,
        service_name: &str,
    ) -> Result<Self, CompileError> {
        let pool = DescriptorPool::from_file_descriptor_set(files.clone())?;
        let service = pool
            .services()
            .find(|service| service.name() == service_name)
            .ok_or_else(|| CompileError::MissingService(service_name.to_string()))?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "compiled service '{}' with {} methods",
            service.full_name(),
            service.methods().len()
        );

        Ok(Self {
            pool,
            files,
            service,
        })
    }

    /// Load bindings previously written with [`CompiledSchema::write_to`].
    pub fn load(path: impl AsRef<Path>, service_name: &str) -> Result<Self, CompileError> {
        let bytes = fs::read(path)?;
        Self::from_file_descriptor_set(FileDescriptorSet::decode(bytes.as_slice())?, service_name)
    }

    /// Write the encoded descriptor set into `dir` as `<module_name>.binpb`.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<std::path::PathBuf, CompileError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(self.service.name()));
        fs::write(&path, self.files.encode_to_vec())?;
        Ok(path)
    }

    /// The bindings file name for a service.
    pub fn file_name(service_name: &str) -> String {
        format!("{}.binpb", Self::module_name_for(service_name))
    }

    /// Look up a message by its name in the schema.
    pub fn message(&self, name: &str) -> Option<MessageDescriptor> {
        let package = self.service.package_name();
        if package.is_empty() {
            self.pool.get_message_by_name(name)
        } else {
            self.pool.get_message_by_name(&format!("{package}.{name}"))
        }
    }

    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub fn method(&self, name: &str) -> Option<MethodDescriptor> {
        self.service.methods().find(|method| method.name() == name)
    }

    pub fn servicer_name(&self) -> String {
        format!("{}Servicer", self.service.name())
    }

    pub fn registration_name(&self) -> String {
        format!("add_{}Servicer_to_server", self.service.name())
    }

    pub fn module_name(&self) -> String {
        Self::module_name_for(self.service.name())
    }

    fn module_name_for(service_name: &str) -> String {
        format!("{}_pb2", snake_case(service_name))
    }
}

pub(crate) fn method_cardinality(method: &MethodDescriptor) -> Cardinality {
    Cardinality::from_flags(method.is_client_streaming(), method.is_server_streaming())
}

#[cfg(test)]
mod tests {
    use prost_reflect::Kind;

    use super::*;
    use crate::{schema::SchemaRpc, translate::SchemaField};

    fn document() -> SchemaDocument {
        let item = SchemaMessage {
            name: "Item".into(),
            fields: vec![
                SchemaField {
                    name: "id".into(),
                    wire_type: WireType::Int32,
                    number: 1,
                    repeated: false,
                    optional: false,
                },
                SchemaField {
                    name: "tags".into(),
                    wire_type: WireType::String,
                    number: 2,
                    repeated: true,
                    optional: false,
                },
                SchemaField {
                    name: "note".into(),
                    wire_type: WireType::String,
                    number: 3,
                    repeated: false,
                    optional: true,
                },
            ],
        };
        let listing = SchemaMessage {
            name: "Listing".into(),
            fields: vec![SchemaField {
                name: "items".into(),
                wire_type: WireType::Message("Item".into()),
                number: 1,
                repeated: true,
                optional: false,
            }],
        };

        SchemaDocument::new(
            "advanced_service",
            "autorpc",
            vec![item, listing],
            vec![SchemaRpc {
                name: "list".into(),
                request: "Item".into(),
                response: "Listing".into(),
                cardinality: Cardinality::ServerStreaming,
            }],
            None,
        )
    }

    #[test]
    fn test_compile() {
        let schema = DescriptorCompiler.compile(&document()).unwrap();

        let item = schema.message("Item").unwrap();
        assert_eq!(item.full_name(), "autorpc.Item");
        let tags = item.get_field_by_name("tags").unwrap();
        assert!(tags.is_list());
        assert_eq!(tags.kind(), Kind::String);
        assert!(!item.get_field_by_name("id").unwrap().supports_presence());
        let note = item.get_field_by_name("note").unwrap();
        assert!(note.supports_presence());
        assert_eq!(
            note.containing_oneof().map(|oneof| oneof.name().to_string()),
            Some("_note".to_string())
        );

        let listing = schema.message("Listing").unwrap();
        let items = listing.get_field_by_name("items").unwrap();
        assert_eq!(items.kind(), Kind::Message(item.clone()));

        let method = schema.method("list").unwrap();
        assert_eq!(method_cardinality(&method), Cardinality::ServerStreaming);
        assert_eq!(method.input(), item);
        assert!(schema.method("missing").is_none());
    }

    #[test]
    fn test_derived_names() {
        let schema = DescriptorCompiler.compile(&document()).unwrap();
        assert_eq!(schema.service().name(), "AdvancedService");
        assert_eq!(schema.servicer_name(), "AdvancedServiceServicer");
        assert_eq!(
            schema.registration_name(),
            "add_AdvancedServiceServicer_to_server"
        );
        assert_eq!(schema.module_name(), "advanced_service_pb2");
    }

    #[test]
    fn test_unknown_message_type() {
        let mut document = document();
        document = SchemaDocument::new(
            document.service_name(),
            "autorpc",
            document.messages()[1..].to_vec(),
            document.rpcs().to_vec(),
            None,
        );
        assert!(matches!(
            DescriptorCompiler.compile(&document),
            Err(CompileError::Descriptor(_))
        ));
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let schema = DescriptorCompiler.compile(&document()).unwrap();

        let path = schema.write_to(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "advanced_service_pb2.binpb");

        let loaded = CompiledSchema::load(&path, "AdvancedService").unwrap();
        let item = loaded.message("Item").unwrap();
        assert_eq!(item.full_name(), "autorpc.Item");
        assert_eq!(item.fields().len(), 3);
        assert!(matches!(
            CompiledSchema::load(&path, "OtherService"),
            Err(CompileError::MissingService(_))
        ));
    }
}
