use autorpc::{
    wire::{CompiledSchema, DescriptorCompiler},
    EndpointOptions, GenerateConfig, Handler, HandlerError, SchemaError, Signature,
    TypeDeclaration,
};
use futures::FutureExt;
use serde_value::Value;

mod utils;
use utils::*;

#[test]
fn test_schema_document() {
    let document = service().schema().unwrap();
    assert_eq!(
        document.text(),
        r#"syntax = "proto3";

package autorpc;

message AddRequest {
  int32 a = 1;
  int32 b = 2;
}

message AddResponse {
  int32 result = 1;
}

message DivideRequest {
  double a = 1;
  double b = 2;
}

message DivideResponse {
  double result = 1;
}

message Empty {
}

message Item {
  int32 id = 1;
  string name = 2;
}

message Order {
  int32 order_id = 1;
  repeated Item items = 2;
}

message Summary {
  int32 total_orders = 1;
}

message OrderIdsResponse {
  repeated int32 result = 1;
}

message ChatMessage {
  string text = 1;
}

service AdvancedService {
  rpc add (AddRequest) returns (AddResponse);
  rpc divide (DivideRequest) returns (DivideResponse);
  rpc list_items (Empty) returns (stream Item);
  rpc summarize (stream Order) returns (Summary);
  rpc order_ids (stream Order) returns (OrderIdsResponse);
  rpc chat (stream ChatMessage) returns (stream ChatMessage);
}
"#
    );
}

#[test]
fn test_schema_is_idempotent() {
    let service = service();
    let first = service.schema().unwrap();
    let second = service.schema().unwrap();
    assert_eq!(first.text(), second.text());
}

#[test]
fn test_generate_schema() {
    let dir = tempfile::tempdir().unwrap();
    let config = GenerateConfig::new()
        .schema_dir(dir.path().join("protos"))
        .bindings_dir(dir.path().join("generated"));

    let generated = service()
        .generate_schema(&config, DescriptorCompiler)
        .unwrap();

    assert_eq!(
        generated.schema_path,
        dir.path().join("protos").join("advanced_service.proto")
    );
    assert_eq!(
        std::fs::read_to_string(&generated.schema_path).unwrap(),
        generated.document.text()
    );
    assert_eq!(
        generated.bindings_path,
        dir.path().join("generated").join("advanced_service_pb2.binpb")
    );
    assert_eq!(generated.compiled.servicer_name(), "AdvancedServiceServicer");
    assert_eq!(
        generated.compiled.registration_name(),
        "add_AdvancedServiceServicer_to_server"
    );

    let loaded = CompiledSchema::load(&generated.bindings_path, "AdvancedService").unwrap();
    let method = loaded.method("summarize").unwrap();
    assert!(method.is_client_streaming());
    assert!(!method.is_server_streaming());
    assert_eq!(method.output().name(), "Summary");
}

#[test]
fn test_duplicate_endpoint_name() {
    let mut service = service();
    let err = service
        .register(
            "add",
            Handler::unary(|a: i32| async move { Ok::<_, HandlerError>(a) }),
        )
        .unwrap_err();
    assert!(matches!(err, SchemaError::DuplicateEndpointName(name) if name == "add"));
}

#[test]
fn test_missing_return_annotation() {
    let mut service = service();
    let handler = Handler::dynamic_unary(
        Signature::new().param("a", TypeDeclaration::INTEGER),
        |args: Vec<Value>| {
            async move { Ok::<_, HandlerError>(args.into_iter().next().unwrap_or(Value::Unit)) }
                .boxed()
        },
    );

    let err = service.register("identity", handler).unwrap_err();
    assert!(matches!(
        err,
        SchemaError::MissingAnnotation { endpoint, subject }
            if endpoint == "identity" && subject == "the return type"
    ));
    assert!(service.endpoint("identity").is_none());
}

#[test]
fn test_missing_parameter_annotation() {
    let mut service = service();
    let handler = Handler::dynamic_unary(
        Signature::new()
            .param("a", TypeDeclaration::INTEGER)
            .untyped_param("b")
            .returns(TypeDeclaration::INTEGER),
        |_: Vec<Value>| async move { Ok::<_, HandlerError>(Value::I32(0)) }.boxed(),
    );

    assert!(matches!(
        service.register("sum", handler),
        Err(SchemaError::MissingAnnotation { .. })
    ));
}

#[test]
fn test_explicit_response_type() {
    let mut service = service();
    let total = autorpc::synthesize_record("Total", [("value", TypeDeclaration::INTEGER)]);
    service
        .register_with(
            "count",
            Handler::unary(|a: i32| async move { Ok::<_, HandlerError>(a) }).params(["n"]),
            EndpointOptions::new().response_type(total),
        )
        .unwrap();

    let document = service.schema().unwrap();
    assert!(document.text().contains("message Total {\n  int32 value = 1;\n}\n"));
    assert!(document
        .text()
        .contains("  rpc count (CountRequest) returns (Total);\n"));
}

#[test]
fn test_colliding_message_names() {
    let mut service = service();
    let first = autorpc::synthesize_record("line_item", [("id", TypeDeclaration::INTEGER)]);
    let second = autorpc::synthesize_record("LineItem", [("id", TypeDeclaration::INTEGER)]);
    service
        .register_with(
            "first",
            Handler::unary(|a: i32| async move { Ok::<_, HandlerError>(a) }),
            EndpointOptions::new().response_type(first),
        )
        .unwrap();
    service
        .register_with(
            "second",
            Handler::unary(|a: i32| async move { Ok::<_, HandlerError>(a) }),
            EndpointOptions::new().response_type(second),
        )
        .unwrap();

    assert!(matches!(
        service.schema(),
        Err(SchemaError::DuplicateMessageName { name, .. }) if name == "LineItem"
    ));
}
