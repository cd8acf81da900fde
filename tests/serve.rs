use autorpc::{
    dispatch::Servicer,
    transport::{LocalChannel, LocalTransport, Transport, TransportError},
    wire::{CompileError, DescriptorCompiler},
    CallError, GenerateConfig, ServeConfig, ServiceError,
};
use serde_json::{json, Value};

mod utils;
use utils::*;

fn config(dir: &std::path::Path) -> ServeConfig {
    ServeConfig::new()
        .host("127.0.0.1")
        .port(50052)
        .max_concurrent_calls(2)
        .generate(
            GenerateConfig::new()
                .schema_dir(dir.join("protos"))
                .bindings_dir(dir.join("generated")),
        )
}

/// Call `add` once the transport has started, then shut it down.
async fn add_then_shutdown(transport: LocalTransport, channel: LocalChannel) -> Value {
    let response = loop {
        match channel.unary_json("add", json!({ "a": 2, "b": 2 })).await {
            Err(CallError::Unavailable) => tokio::task::yield_now().await,
            response => break response.unwrap(),
        }
    };
    transport.shutdown();
    response
}

#[tokio::test]
async fn test_serve() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let service = service();

    let mut transport = LocalTransport::from_config(&config);
    let handle = transport.clone();
    let channel = transport.channel();

    let (served, response) = tokio::join!(
        service.serve(&mut transport, &config, DescriptorCompiler),
        add_then_shutdown(handle, channel)
    );
    served.unwrap();
    assert_eq!(response, json!({ "result": 4 }));
    assert_eq!(transport.address(), Some(("127.0.0.1", 50052)));

    assert!(dir.path().join("protos/advanced_service.proto").exists());
    assert!(dir
        .path()
        .join("generated/advanced_service_pb2.binpb")
        .exists());
}

#[tokio::test]
async fn test_serve_sizes_the_worker_pool() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).max_concurrent_calls(1);
    let service = service();

    let mut transport = LocalTransport::default();
    assert_eq!(transport.max_concurrent_calls(), 10);
    let handle = transport.clone();
    let channel = transport.channel();

    let (served, response) = tokio::join!(
        service.serve(&mut transport, &config, DescriptorCompiler),
        add_then_shutdown(handle, channel)
    );
    served.unwrap();
    assert_eq!(response, json!({ "result": 4 }));
    assert_eq!(transport.max_concurrent_calls(), 1);
}

#[tokio::test]
async fn test_serve_without_regenerating() {
    let dir = tempfile::tempdir().unwrap();
    let service = service();
    service
        .generate_schema(config(dir.path()).get_generate(), DescriptorCompiler)
        .unwrap();
    std::fs::remove_dir_all(dir.path().join("protos")).unwrap();

    let config = config(dir.path()).skip_schema_generation(true);
    let mut transport = LocalTransport::from_config(&config);
    let handle = transport.clone();
    let channel = transport.channel();

    let (served, response) = tokio::join!(
        service.serve(&mut transport, &config, DescriptorCompiler),
        add_then_shutdown(handle, channel)
    );
    served.unwrap();
    assert_eq!(response, json!({ "result": 4 }));
    // The schema document isn't rewritten.
    assert!(!dir.path().join("protos").exists());
}

#[tokio::test]
async fn test_serve_without_bindings() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).skip_schema_generation(true);

    let err = service()
        .serve(&mut LocalTransport::default(), &config, DescriptorCompiler)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Compile(CompileError::Io(_))));
}

#[tokio::test]
async fn test_serve_on_a_used_transport() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let service = service();
    let compiled = service
        .generate_schema(config.get_generate(), DescriptorCompiler)
        .unwrap()
        .compiled;

    let mut transport = LocalTransport::default();
    transport
        .register_servicer(Servicer::new(&service, &compiled).unwrap())
        .unwrap();

    let err = service
        .serve(&mut transport, &config, DescriptorCompiler)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Transport(_)));
}

#[tokio::test]
async fn test_start_requires_servicer_and_address() {
    let mut transport = LocalTransport::default();
    assert_eq!(transport.start(), Err(TransportError::NoServicer));

    let channel = transport.channel();
    assert!(matches!(
        channel.unary_json("add", json!({})).await,
        Err(CallError::Unavailable)
    ));
}
