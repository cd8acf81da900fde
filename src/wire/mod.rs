//! Compiled wire messages.
//!
//! Messages are [`prost_reflect::DynamicMessage`]s described by the descriptors a
//! [`SchemaCompiler`] produces, so no Rust code is generated for them. This module adds the
//! import/export helpers the dispatcher and transports need on top.

use prost::Message;
use prost_reflect::{DeserializeOptions, SerializeOptions};

pub(crate) mod compiler;

pub use compiler::{CompileError, CompiledSchema, DescriptorCompiler, SchemaCompiler};
pub use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
    Value,
};

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum WireError {
    #[error("error decoding message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("error converting message to or from JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message into the protobuf binary format.
pub fn encode(message: &DynamicMessage) -> Vec<u8> {
    message.encode_to_vec()
}

/// Decode a message from the protobuf binary format. Unknown fields are skipped.
pub fn decode(descriptor: &MessageDescriptor, bytes: &[u8]) -> Result<DynamicMessage, WireError> {
    Ok(DynamicMessage::decode(descriptor.clone(), bytes)?)
}

/// Export a message as a JSON object keyed by the field names in the schema.
///
/// Fields holding their default value are left out, like any proto3 JSON encoder does.
pub fn to_json(message: &DynamicMessage) -> Result<serde_json::Value, WireError> {
    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .stringify_64_bit_integers(false);
    Ok(message.serialize_with_options(serde_json::value::Serializer, &options)?)
}

/// Import a message from a JSON object. Keys the message doesn't declare are ignored.
pub fn from_json(
    descriptor: &MessageDescriptor,
    json: serde_json::Value,
) -> Result<DynamicMessage, WireError> {
    let options = DeserializeOptions::new().deny_unknown_fields(false);
    Ok(DynamicMessage::deserialize_with_options(
        descriptor.clone(),
        json,
        &options,
    )?)
}
