//! Command line entry point for binaries embedding a [`ServiceDefinition`].
//!
//! ```rust,no_run
//! use autorpc::{cli::{self, Cli}, transport::LocalTransport, ServiceDefinition};
//! use clap::Parser;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     cli::init_logging();
//!     let mut service = ServiceDefinition::new("AdvancedService");
//!     // register endpoints here
//!     cli::run(&mut service, Cli::parse(), &mut LocalTransport::default()).await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{
    transport::Transport, wire::DescriptorCompiler, GenerateConfig, ServeConfig,
    ServiceDefinition, ServiceError,
};

#[derive(Parser, Debug, Clone)]
#[command(about = "Generate proto3 schemas for a service and serve it", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write the .proto schema and compiled bindings
    #[command(alias = "generate-schema")]
    GenerateProtos {
        #[command(flatten)]
        paths: PathArgs,
    },
    /// Serve the service
    Serve {
        #[command(flatten)]
        paths: PathArgs,
        /// Host to bind the server to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to bind the server to
        #[arg(long, default_value_t = 50051)]
        port: u16,
        /// Serve from existing bindings instead of regenerating them
        #[arg(long)]
        no_rebuild_protos: bool,
        /// Number of calls handled at once
        #[arg(long, default_value_t = 10, env = "AUTORPC_MAX_CONCURRENT_CALLS")]
        max_concurrent_calls: usize,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct PathArgs {
    /// Directory the .proto files are written to
    #[arg(long, default_value = "./protos")]
    pub proto_path: PathBuf,
    /// Directory the compiled bindings are written to
    #[arg(long, default_value = "./generated")]
    pub bindings_path: PathBuf,
    /// Name of the service, overriding the one it was defined with
    #[arg(long)]
    pub service_name: Option<String>,
}

impl PathArgs {
    fn apply(&self, service: &mut ServiceDefinition) -> GenerateConfig {
        if let Some(name) = &self.service_name {
            service.set_service_name(name.clone());
        }
        GenerateConfig::new()
            .schema_dir(self.proto_path.clone())
            .bindings_dir(self.bindings_path.clone())
    }
}

/// Log to stderr, filtered by `RUST_LOG` (`info` when unset).
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed by the embedding binary.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Run a parsed command against `service`.
pub async fn run<T: Transport>(
    service: &mut ServiceDefinition,
    cli: Cli,
    transport: &mut T,
) -> Result<(), ServiceError> {
    match cli.command {
        Command::GenerateProtos { paths } => {
            let config = paths.apply(service);
            let generated = service.generate_schema(&config, DescriptorCompiler)?;

            #[cfg(feature = "tracing")]
            tracing::info!(
                "wrote {:?} and {:?}",
                generated.schema_path,
                generated.bindings_path
            );
            #[cfg(not(feature = "tracing"))]
            let _ = generated;

            Ok(())
        }
        Command::Serve {
            paths,
            host,
            port,
            no_rebuild_protos,
            max_concurrent_calls,
        } => {
            let config = ServeConfig::new()
                .generate(paths.apply(service))
                .host(host)
                .port(port)
                .skip_schema_generation(no_rebuild_protos)
                .max_concurrent_calls(max_concurrent_calls);
            service.serve(transport, &config, DescriptorCompiler).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;
    use crate::{transport::LocalTransport, Handler, HandlerError};

    async fn add(a: i32, b: i32) -> Result<i32, HandlerError> {
        Ok(a + b)
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["autorpc", "serve"]).unwrap();
        let Command::Serve {
            paths,
            host,
            port,
            no_rebuild_protos,
            ..
        } = cli.command
        else {
            panic!("expected the serve command");
        };
        assert_eq!(paths.proto_path, PathBuf::from("./protos"));
        assert_eq!(paths.bindings_path, PathBuf::from("./generated"));
        assert_eq!(paths.service_name, None);
        assert_eq!(host, "0.0.0.0");
        assert_eq!(port, 50051);
        assert!(!no_rebuild_protos);
    }

    #[test]
    fn test_generate_protos() {
        let cli = Cli::try_parse_from([
            "autorpc",
            "generate-protos",
            "--proto-path",
            "out/protos",
            "--service-name",
            "ShopService",
        ])
        .unwrap();
        let Command::GenerateProtos { paths } = cli.command else {
            panic!("expected the generate-protos command");
        };

        let mut service = ServiceDefinition::new("AdvancedService");
        let config = paths.apply(&mut service);
        assert_eq!(service.service_name(), "ShopService");
        assert_eq!(config.get_schema_dir(), &PathBuf::from("out/protos"));
    }

    #[test]
    fn test_generate_schema_alias() {
        let cli = Cli::try_parse_from(["autorpc", "generate-schema", "--proto-path", "schema"])
            .unwrap();
        let Command::GenerateProtos { paths } = cli.command else {
            panic!("expected the generate-protos command");
        };
        assert_eq!(paths.proto_path, PathBuf::from("schema"));
    }

    #[tokio::test]
    async fn test_serve_applies_max_concurrent_calls() {
        let dir = tempfile::tempdir().unwrap();
        let proto_path = dir.path().join("protos");
        let bindings_path = dir.path().join("generated");
        let cli = Cli::try_parse_from([
            OsStr::new("autorpc"),
            OsStr::new("serve"),
            OsStr::new("--max-concurrent-calls"),
            OsStr::new("3"),
            OsStr::new("--proto-path"),
            proto_path.as_os_str(),
            OsStr::new("--bindings-path"),
            bindings_path.as_os_str(),
        ])
        .unwrap();

        let mut service = ServiceDefinition::new("Calculator");
        service
            .register("add", Handler::unary(add).params(["a", "b"]))
            .unwrap();

        let mut transport = LocalTransport::default();
        let handle = transport.clone();
        let stop = async move {
            while !handle.is_started() {
                tokio::task::yield_now().await;
            }
            handle.shutdown();
        };

        let (served, ()) = tokio::join!(run(&mut service, cli, &mut transport), stop);
        served.unwrap();
        assert_eq!(transport.max_concurrent_calls(), 3);
        assert!(proto_path.join("calculator.proto").exists());
    }

    #[test]
    fn test_unknown_command() {
        assert!(Cli::try_parse_from(["autorpc", "deploy"]).is_err());
    }
}
