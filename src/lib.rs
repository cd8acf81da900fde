//! autorpc: Generate proto3 schemas and gRPC-style call adapters from typed Rust handlers.
//!
//! Register handlers on a [`ServiceDefinition`], then either write the schema out with
//! [`ServiceDefinition::generate_schema`] or hand it to a [`transport::Transport`] with
//! [`ServiceDefinition::serve`]. Request and response messages are inferred from the handlers'
//! signatures.
//!
#![warn(
    clippy::all,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::panic,
    clippy::todo,
    clippy::panic_in_result_fn,
    // missing_docs
)]
#![forbid(unsafe_code)]
#![allow(clippy::module_inception)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod case;
mod config;
mod error;
mod handler;
mod service;
mod stream;

pub mod dispatch;
pub mod endpoint;
pub mod marshal;
pub mod schema;
pub mod translate;
pub mod transport;
pub mod types;
pub mod wire;

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;

pub use config::{GenerateConfig, ServeConfig};
pub use endpoint::{synthesize_record, Cardinality, EndpointOptions, Signature};
pub use error::*;
pub use handler::{Handler, HandlerFunction, Marker};
pub use service::{GeneratedSchema, ModelRegistry, ServiceDefinition};
pub use stream::Streaming;
pub use types::{Empty, Model, Record, TypeDeclaration};
