use std::{borrow::Cow, path::PathBuf};

/// Where and how the schema and its compiled bindings are written.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub(crate) schema_dir: PathBuf,
    pub(crate) bindings_dir: PathBuf,
    pub(crate) package: String,
    pub(crate) header: Option<Cow<'static, str>>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            schema_dir: PathBuf::from("./protos"),
            bindings_dir: PathBuf::from("./generated"),
            package: "autorpc".into(),
            header: None,
        }
    }
}

impl GenerateConfig {
    pub fn new() -> Self {
        Default::default()
    }

    /// The directory the `.proto` document is written to.
    pub fn schema_dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: dir.into(),
            ..self
        }
    }

    /// The directory the compiled descriptor set is written to.
    pub fn bindings_dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            bindings_dir: dir.into(),
            ..self
        }
    }

    pub fn package(self, package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            ..self
        }
    }

    /// allows you to add a comment to the top of the generated schema.
    pub fn header(self, header: impl Into<Cow<'static, str>>) -> Self {
        Self {
            header: Some(header.into()),
            ..self
        }
    }

    pub fn get_schema_dir(&self) -> &PathBuf {
        &self.schema_dir
    }

    pub fn get_bindings_dir(&self) -> &PathBuf {
        &self.bindings_dir
    }
}

/// How a service is served.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) skip_schema_generation: bool,
    pub(crate) max_concurrent_calls: usize,
    pub(crate) generate: GenerateConfig,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 50051,
            skip_schema_generation: false,
            max_concurrent_calls: 10,
            generate: GenerateConfig::default(),
        }
    }
}

impl ServeConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn host(self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..self
        }
    }

    pub fn port(self, port: u16) -> Self {
        Self { port, ..self }
    }

    /// Serve from the bindings written by an earlier run instead of regenerating them.
    pub fn skip_schema_generation(self, skip: bool) -> Self {
        Self {
            skip_schema_generation: skip,
            ..self
        }
    }

    /// The size of the transport's worker pool.
    pub fn max_concurrent_calls(self, max: usize) -> Self {
        Self {
            max_concurrent_calls: max.max(1),
            ..self
        }
    }

    pub fn generate(self, generate: GenerateConfig) -> Self {
        Self { generate, ..self }
    }

    pub fn address(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub fn get_max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    pub fn get_generate(&self) -> &GenerateConfig {
        &self.generate
    }
}
