//! Assembles the proto3 document describing a service.

use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    case::{pascal_case, snake_case},
    endpoint::Cardinality,
    service::ServiceDefinition,
    translate::{SchemaMessage, Translator},
    GenerateConfig, SchemaError,
};

/// One `rpc` line of the service block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRpc {
    pub name: String,
    pub request: String,
    pub response: String,
    pub cardinality: Cardinality,
}

impl SchemaRpc {
    pub fn render(&self) -> String {
        let stream = |streamed: bool| if streamed { "stream " } else { "" };
        format!(
            "  rpc {} ({}{}) returns ({}{});\n",
            self.name,
            stream(self.cardinality.request_streamed()),
            self.request,
            stream(self.cardinality.response_streamed()),
            self.response
        )
    }
}

/// A complete schema document, ready to be written out or compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDocument {
    service_name: String,
    package: String,
    messages: Vec<SchemaMessage>,
    rpcs: Vec<SchemaRpc>,
    text: String,
}

impl SchemaDocument {
    pub fn new(
        service_name: &str,
        package: impl Into<String>,
        messages: Vec<SchemaMessage>,
        rpcs: Vec<SchemaRpc>,
        header: Option<&str>,
    ) -> Self {
        let service_name = pascal_case(service_name);
        let package = package.into();

        let mut text = String::new();
        if let Some(header) = header {
            for line in header.lines() {
                let _ = writeln!(text, "// {line}");
            }
            text.push('\n');
        }
        let _ = write!(text, "syntax = \"proto3\";\n\npackage {package};\n\n");
        for message in &messages {
            text.push_str(&message.render());
            text.push('\n');
        }
        let _ = writeln!(text, "service {service_name} {{");
        for rpc in &rpcs {
            text.push_str(&rpc.render());
        }
        text.push_str("}\n");

        Self {
            service_name,
            package,
            messages,
            rpcs,
            text,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The service name as it appears in the document.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn messages(&self) -> &[SchemaMessage] {
        &self.messages
    }

    pub fn rpcs(&self) -> &[SchemaRpc] {
        &self.rpcs
    }

    /// `AdvancedService` is written to `advanced_service.proto`.
    pub fn file_name(&self) -> String {
        format!("{}.proto", snake_case(&self.service_name))
    }

    /// Write the document into `dir`, creating it if needed, and return the file's path.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf, SchemaError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, &self.text)?;

        #[cfg(feature = "tracing")]
        tracing::info!("wrote schema for service '{}' to {path:?}", self.service_name);

        Ok(path)
    }
}

/// Assemble the schema document for a service with the default configuration.
pub fn assemble(service: &ServiceDefinition) -> Result<SchemaDocument, SchemaError> {
    assemble_with(service, &GenerateConfig::default())
}

/// Assemble the schema document for a service.
///
/// Messages come out in dependency order and the `rpc` lines in registration order, so the same
/// definition always produces the same document.
pub fn assemble_with(
    service: &ServiceDefinition,
    config: &GenerateConfig,
) -> Result<SchemaDocument, SchemaError> {
    let mut translator = Translator::new();
    for decl in service.models().iter() {
        translator.translate(&decl)?;
    }

    let rpcs = service
        .endpoints()
        .iter()
        .map(|endpoint| SchemaRpc {
            name: endpoint.name().to_string(),
            request: Translator::message_name(endpoint.request_record()),
            response: Translator::message_name(endpoint.response_record()),
            cardinality: endpoint.cardinality(),
        })
        .collect::<Vec<_>>();

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "assembled schema for service '{}' with {} messages and {} methods",
        service.service_name(),
        translator.messages().len(),
        rpcs.len()
    );

    Ok(SchemaDocument::new(
        service.service_name(),
        config.package.clone(),
        translator.into_messages(),
        rpcs,
        config.header.as_deref(),
    ))
}
