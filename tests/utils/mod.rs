#![allow(dead_code)]

use autorpc::{
    dispatch::Servicer,
    transport::{LocalChannel, LocalTransport, Transport},
    wire::{DescriptorCompiler, SchemaCompiler},
    Empty, Handler, HandlerError, Model, Record, ServiceDefinition, Streaming, TypeDeclaration,
};
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i32,
    pub name: String,
}

impl Model for Item {
    fn declaration() -> TypeDeclaration {
        Record::of::<Self>("Item")
            .field::<i32>("id")
            .field::<String>("name")
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i32,
    pub items: Vec<Item>,
}

impl Model for Order {
    fn declaration() -> TypeDeclaration {
        Record::of::<Self>("Order")
            .field::<i32>("order_id")
            .field::<Vec<Item>>("items")
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_orders: i32,
}

impl Model for Summary {
    fn declaration() -> TypeDeclaration {
        Record::of::<Self>("Summary")
            .field::<i32>("total_orders")
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
}

impl Model for ChatMessage {
    fn declaration() -> TypeDeclaration {
        Record::of::<Self>("ChatMessage")
            .field::<String>("text")
            .build()
    }
}

async fn add(a: i32, b: i32) -> Result<i32, HandlerError> {
    Ok(a + b)
}

async fn divide(a: f64, b: f64) -> Result<f64, HandlerError> {
    if b == 0.0 {
        return Err(HandlerError::new("division by zero"));
    }
    Ok(a / b)
}

fn list_items(_: Empty) -> impl Stream<Item = Result<Item, HandlerError>> {
    stream::iter([
        Ok(Item {
            id: 1,
            name: "Item 1".into(),
        }),
        Ok(Item {
            id: 2,
            name: "Item 2".into(),
        }),
    ])
}

async fn summarize(orders: Streaming<Order>) -> Result<Summary, HandlerError> {
    let total_orders = orders.count().await;
    Ok(Summary {
        total_orders: total_orders as i32,
    })
}

async fn order_ids(orders: Streaming<Order>) -> Result<Vec<i32>, HandlerError> {
    Ok(orders.map(|order| order.order_id).collect().await)
}

fn chat(messages: Streaming<ChatMessage>) -> impl Stream<Item = Result<ChatMessage, HandlerError>> {
    messages.map(|message| {
        Ok(ChatMessage {
            text: format!("Echo: {}", message.text),
        })
    })
}

pub fn service() -> ServiceDefinition {
    let mut service = ServiceDefinition::new("AdvancedService");
    service
        .register("add", Handler::unary(add).params(["a", "b"]))
        .unwrap();
    service
        .register("divide", Handler::unary(divide).params(["a", "b"]))
        .unwrap();
    service.server_streaming("list_items", list_items).unwrap();
    service.client_streaming("summarize", summarize).unwrap();
    service.client_streaming("order_ids", order_ids).unwrap();
    service.bidi_streaming("chat", chat).unwrap();
    service
}

/// Compile `service` in memory and start it on a fresh local transport.
pub fn start(service: &ServiceDefinition) -> (LocalTransport, LocalChannel) {
    let compiled = DescriptorCompiler
        .compile(&service.schema().unwrap())
        .unwrap();
    let servicer = Servicer::new(service, &compiled).unwrap();

    let mut transport = LocalTransport::default();
    transport.register_servicer(servicer).unwrap();
    transport.bind("127.0.0.1", 50051).unwrap();
    transport.start().unwrap();

    let channel = transport.channel();
    (transport, channel)
}
