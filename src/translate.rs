//! Turns [`TypeDeclaration`]s into proto3 message declarations.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    case::pascal_case,
    types::{Field, RecordId, RecordType, ScalarKind, TypeDeclaration},
    SchemaError,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireType {
    Int32,
    Double,
    String,
    Bool,
    Message(String),
}

impl WireType {
    /// The fixed scalar table. Kinds without an entry can't be carried on the wire.
    pub fn from_scalar(kind: ScalarKind) -> Option<Self> {
        match kind {
            ScalarKind::Integer => Some(Self::Int32),
            ScalarKind::Float => Some(Self::Double),
            ScalarKind::String => Some(Self::String),
            ScalarKind::Boolean => Some(Self::Bool),
            ScalarKind::LargeInteger | ScalarKind::UnsignedInteger | ScalarKind::Char => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Int32 => "int32",
            Self::Double => "double",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Message(name) => name,
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub name: String,
    pub wire_type: WireType,
    pub number: u32,
    pub repeated: bool,
    /// Has explicit presence, so a value equal to the wire default can be told apart from an
    /// absent field. Set for scalar fields with a native default.
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMessage {
    pub name: String,
    pub fields: Vec<SchemaField>,
}

impl SchemaMessage {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Render the `message` block of a schema document.
    pub fn render(&self) -> String {
        let mut out = format!("message {} {{\n", self.name);
        for field in &self.fields {
            let label = match (field.repeated, field.optional) {
                (true, _) => "repeated ",
                (false, true) => "optional ",
                (false, false) => "",
            };
            out.push_str(&format!(
                "  {label}{} {} = {};\n",
                field.wire_type, field.name, field.number
            ));
        }
        out.push_str("}\n");
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Translated {
    Message(SchemaMessage),
    Scalar(WireType),
}

/// Translates declarations into messages for one generation pass.
///
/// Every record is translated at most once, identified by its [`RecordId`]. Messages are kept in
/// dependency order, a nested message always comes before the messages using it.
#[derive(Debug, Default)]
pub struct Translator {
    messages: Vec<SchemaMessage>,
    translated: BTreeMap<RecordId, usize>,
    names: BTreeMap<String, (RecordId, String)>,
    in_progress: Vec<RecordId>,
}

impl Translator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translate(&mut self, decl: &TypeDeclaration) -> Result<Translated, SchemaError> {
        match decl.resolve().as_ref() {
            TypeDeclaration::Scalar(kind) => scalar(*kind, None).map(Translated::Scalar),
            TypeDeclaration::Record(record) => {
                let index = self.translate_record(record)?;
                Ok(Translated::Message(self.messages[index].clone()))
            }
            TypeDeclaration::Collection(_) | TypeDeclaration::Deferred(_) => {
                Err(SchemaError::UnsupportedType {
                    ty: decl.describe(),
                    reason: "a collection can only be used as the type of a record field".into(),
                })
            }
        }
    }

    /// The message name a record translates to.
    pub fn message_name(record: &RecordType) -> String {
        pascal_case(record.name())
    }

    pub fn messages(&self) -> &[SchemaMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<SchemaMessage> {
        self.messages
    }

    fn translate_record(&mut self, record: &Arc<RecordType>) -> Result<usize, SchemaError> {
        if let Some(index) = self.translated.get(record.id()) {
            return Ok(*index);
        }

        if self.in_progress.contains(record.id()) {
            return Err(SchemaError::UnsupportedType {
                ty: record.name().to_string(),
                reason: "the record refers to itself".into(),
            });
        }

        let name = Self::message_name(record);
        match self.names.get(&name) {
            Some((id, first)) if id != record.id() => {
                return Err(SchemaError::DuplicateMessageName {
                    name,
                    first: first.clone(),
                    second: record.name().to_string(),
                })
            }
            _ => {}
        }
        self.names.insert(
            name.clone(),
            (record.id().clone(), record.name().to_string()),
        );

        self.in_progress.push(record.id().clone());
        let fields = record
            .fields()
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let (wire_type, repeated) = self.field_type(record, field)?;
                let optional = !repeated
                    && field.default().is_some()
                    && !matches!(wire_type, WireType::Message(_));
                Ok(SchemaField {
                    name: field.name().to_string(),
                    wire_type,
                    number: i as u32 + 1,
                    repeated,
                    optional,
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>();
        self.in_progress.pop();
        let fields = fields?;

        #[cfg(feature = "tracing")]
        tracing::trace!("translated record '{}' into message '{}'", record.name(), name);

        let index = self.messages.len();
        self.messages.push(SchemaMessage { name, fields });
        self.translated.insert(record.id().clone(), index);
        Ok(index)
    }

    fn field_type(
        &mut self,
        record: &RecordType,
        field: &Field,
    ) -> Result<(WireType, bool), SchemaError> {
        let location = || format!("{}.{}", record.name(), field.name());

        match field.ty().resolve().as_ref() {
            TypeDeclaration::Scalar(kind) => Ok((scalar(*kind, Some(location()))?, false)),
            TypeDeclaration::Record(nested) => Ok((self.message_type(nested)?, false)),
            TypeDeclaration::Collection(element) => match element.resolve().as_ref() {
                TypeDeclaration::Scalar(kind) => Ok((scalar(*kind, Some(location()))?, true)),
                TypeDeclaration::Record(nested) => Ok((self.message_type(nested)?, true)),
                _ => Err(SchemaError::UnsupportedType {
                    ty: field.ty().describe(),
                    reason: format!(
                        "nested collections can't be represented, used by '{}'",
                        location()
                    ),
                }),
            },
            TypeDeclaration::Deferred(_) => Err(SchemaError::UnsupportedType {
                ty: field.ty().describe(),
                reason: format!("the type of '{}' could not be resolved", location()),
            }),
        }
    }

    fn message_type(&mut self, record: &Arc<RecordType>) -> Result<WireType, SchemaError> {
        let index = self.translate_record(record)?;
        Ok(WireType::Message(self.messages[index].name.clone()))
    }
}

fn scalar(kind: ScalarKind, location: Option<String>) -> Result<WireType, SchemaError> {
    WireType::from_scalar(kind).ok_or_else(|| SchemaError::UnsupportedType {
        ty: kind.to_string(),
        reason: match location {
            Some(location) => format!("no wire type exists for the {kind} used by '{location}'"),
            None => format!("no wire type exists for {kind}"),
        },
    })
}

/// Translate a single declaration with a fresh [`Translator`].
pub fn translate(decl: &TypeDeclaration) -> Result<Translated, SchemaError> {
    Translator::new().translate(decl)
}
