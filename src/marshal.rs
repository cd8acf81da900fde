//! Conversion between wire messages and native values.
//!
//! Native values are [`serde_value::Value`]s shaped like the serialized form of the declared Rust
//! types: a record is a map from field name to value, a collection is a sequence.

use std::collections::BTreeMap;

use prost_reflect::{
    DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, ReflectMessage, Value as WireValue,
};
use serde_value::Value;

use crate::{
    types::{RecordType, ScalarKind, TypeDeclaration},
    MarshalError,
};

/// Convert a wire message into the native value of `record`.
///
/// Native defaults fill in absent fields, absent repeated fields become empty lists and fields the
/// record doesn't declare are ignored. Scalars with a default are compiled as `optional` so a zero
/// value sent on purpose is kept. Other proto3 scalars can't be told apart from their zero value,
/// so only message-typed fields can be missing.
pub fn decode_record(message: &DynamicMessage, record: &RecordType) -> Result<Value, MarshalError> {
    let descriptor = message.descriptor();
    let mut map = BTreeMap::new();

    for field in record.fields() {
        let missing = || MarshalError::MissingField {
            message: descriptor.name().to_string(),
            field: field.name().to_string(),
        };
        let Some(wire_field) = descriptor.get_field_by_name(field.name()) else {
            return Err(missing());
        };

        let value = match (message.has_field(&wire_field), field.default()) {
            (false, Some(default)) if wire_field.supports_presence() || wire_field.is_list() => {
                default.value().clone()
            }
            (false, None) if wire_field.supports_presence() => return Err(missing()),
            _ => decode_value(
                &descriptor,
                field.name(),
                &message.get_field(&wire_field),
                field.ty(),
            )?,
        };

        map.insert(Value::String(field.name().to_string()), value);
    }

    Ok(Value::Map(map))
}

fn decode_value(
    descriptor: &MessageDescriptor,
    field: &str,
    value: &WireValue,
    decl: &TypeDeclaration,
) -> Result<Value, MarshalError> {
    let mismatch = |expected: String| MarshalError::TypeMismatch {
        message: descriptor.name().to_string(),
        field: field.to_string(),
        expected,
        found: describe_wire(value),
    };

    match (decl.resolve().as_ref(), value) {
        (TypeDeclaration::Scalar(ScalarKind::Integer), WireValue::I32(v)) => Ok(Value::I32(*v)),
        (TypeDeclaration::Scalar(ScalarKind::Float), WireValue::F64(v)) => Ok(Value::F64(*v)),
        (TypeDeclaration::Scalar(ScalarKind::String), WireValue::String(v)) => {
            Ok(Value::String(v.clone()))
        }
        (TypeDeclaration::Scalar(ScalarKind::Boolean), WireValue::Bool(v)) => Ok(Value::Bool(*v)),
        (TypeDeclaration::Record(record), WireValue::Message(message)) => {
            decode_record(message, record)
        }
        (TypeDeclaration::Collection(element), WireValue::List(items)) => items
            .iter()
            .map(|item| decode_value(descriptor, field, item, element))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Seq),
        (decl, _) => Err(mismatch(decl.describe())),
    }
}

/// Convert the native value of `record` into a wire message described by `descriptor`.
///
/// The value must have exactly the fields the record declares, each of the declared type.
pub fn encode_record(
    value: Value,
    record: &RecordType,
    descriptor: &MessageDescriptor,
) -> Result<DynamicMessage, MarshalError> {
    let Value::Map(mut map) = unwrap_value(value) else {
        return Err(MarshalError::NotARecord {
            message: descriptor.name().to_string(),
            found: "a non record value".into(),
        });
    };

    let mut message = DynamicMessage::new(descriptor.clone());
    for field in record.fields() {
        let key = Value::String(field.name().to_string());
        let value = match map.remove(&key).map(unwrap_value) {
            Some(Value::Option(None) | Value::Unit) | None => {
                if field.default().is_some() {
                    continue;
                }
                return Err(MarshalError::MissingField {
                    message: descriptor.name().to_string(),
                    field: field.name().to_string(),
                });
            }
            Some(value) => value,
        };

        let wire_field = descriptor.get_field_by_name(field.name()).ok_or_else(|| {
            MarshalError::UnexpectedField {
                message: descriptor.name().to_string(),
                field: field.name().to_string(),
            }
        })?;
        let wire_value = encode_value(descriptor, &wire_field, value, field.ty())?;
        message
            .try_set_field(&wire_field, wire_value)
            .map_err(|err| MarshalError::TypeMismatch {
                message: descriptor.name().to_string(),
                field: field.name().to_string(),
                expected: format!("{:?}", wire_field.kind()),
                found: err.to_string(),
            })?;
    }

    if let Some(key) = map.into_keys().next() {
        return Err(MarshalError::UnexpectedField {
            message: descriptor.name().to_string(),
            field: match key {
                Value::String(key) => key,
                key => format!("{key:?}"),
            },
        });
    }

    Ok(message)
}

fn encode_value(
    descriptor: &MessageDescriptor,
    wire_field: &FieldDescriptor,
    value: Value,
    decl: &TypeDeclaration,
) -> Result<WireValue, MarshalError> {
    let mismatch = |expected: String, found: &Value| MarshalError::TypeMismatch {
        message: descriptor.name().to_string(),
        field: wire_field.name().to_string(),
        expected,
        found: describe_native(found),
    };

    let decl = decl.resolve();
    let value = unwrap_value(value);
    match decl.as_ref() {
        TypeDeclaration::Scalar(kind) => {
            let wire = match (kind, &value) {
                (ScalarKind::Integer, _) => as_i64(&value)
                    .and_then(|v| i32::try_from(v).ok())
                    .map(WireValue::I32),
                (ScalarKind::Float, Value::F64(v)) => Some(WireValue::F64(*v)),
                (ScalarKind::Float, Value::F32(v)) => Some(WireValue::F64(f64::from(*v))),
                (ScalarKind::Float, _) => as_i64(&value).map(|v| WireValue::F64(v as f64)),
                (ScalarKind::String, Value::String(v)) => Some(WireValue::String(v.clone())),
                (ScalarKind::String, Value::Char(v)) => Some(WireValue::String(v.to_string())),
                (ScalarKind::Boolean, Value::Bool(v)) => Some(WireValue::Bool(*v)),
                _ => None,
            };
            wire.ok_or_else(|| mismatch(decl.describe(), &value))
        }
        TypeDeclaration::Record(record) => {
            let Kind::Message(nested) = wire_field.kind() else {
                return Err(mismatch(decl.describe(), &value));
            };
            encode_record(value, record, &nested).map(WireValue::Message)
        }
        TypeDeclaration::Collection(element) => {
            let Value::Seq(items) = value else {
                return Err(mismatch(decl.describe(), &value));
            };
            items
                .into_iter()
                .map(|item| encode_value(descriptor, wire_field, item, element))
                .collect::<Result<Vec<_>, _>>()
                .map(WireValue::List)
        }
        TypeDeclaration::Deferred(_) => Err(mismatch(decl.describe(), &value)),
    }
}

/// Strip the layers serde adds around a value which don't change its shape.
fn unwrap_value(mut value: Value) -> Value {
    loop {
        value = match value {
            Value::Newtype(inner) => *inner,
            Value::Option(Some(inner)) => *inner,
            value => return value,
        };
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match *value {
        Value::I8(v) => Some(v.into()),
        Value::I16(v) => Some(v.into()),
        Value::I32(v) => Some(v.into()),
        Value::I64(v) => Some(v),
        Value::U8(v) => Some(v.into()),
        Value::U16(v) => Some(v.into()),
        Value::U32(v) => Some(v.into()),
        Value::U64(v) => i64::try_from(v).ok(),
        _ => None,
    }
}

fn describe_native(value: &Value) -> String {
    match value {
        Value::Bool(_) => "a boolean".into(),
        Value::U8(v) => format!("the integer {v}"),
        Value::U16(v) => format!("the integer {v}"),
        Value::U32(v) => format!("the integer {v}"),
        Value::U64(v) => format!("the integer {v}"),
        Value::I8(v) => format!("the integer {v}"),
        Value::I16(v) => format!("the integer {v}"),
        Value::I32(v) => format!("the integer {v}"),
        Value::I64(v) => format!("the integer {v}"),
        Value::F32(_) | Value::F64(_) => "a float".into(),
        Value::Char(_) | Value::String(_) => "a string".into(),
        Value::Unit | Value::Option(None) => "nothing".into(),
        Value::Seq(_) => "a list".into(),
        Value::Map(_) => "a record".into(),
        Value::Bytes(_) => "bytes".into(),
        Value::Option(Some(_)) | Value::Newtype(_) => "a wrapped value".into(),
    }
}

fn describe_wire(value: &WireValue) -> String {
    match value {
        WireValue::Bool(_) => "bool".into(),
        WireValue::I32(_) => "int32".into(),
        WireValue::F64(_) => "double".into(),
        WireValue::String(_) => "string".into(),
        WireValue::Message(message) => message.descriptor().name().to_string(),
        WireValue::List(_) => "repeated field".into(),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{
        endpoint::Cardinality,
        schema::{SchemaDocument, SchemaRpc},
        translate::Translator,
        types::{Model, Record},
        wire::{CompiledSchema, DescriptorCompiler, SchemaCompiler},
    };

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: i32,
        name: String,
        price: f64,
    }

    impl Model for Item {
        fn declaration() -> TypeDeclaration {
            Record::of::<Self>("Item")
                .field::<i32>("id")
                .field::<String>("name")
                .field::<f64>("price")
                .build()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        order_id: i32,
        items: Vec<Item>,
        note: String,
        favourite: Option<Item>,
    }

    impl Model for Order {
        fn declaration() -> TypeDeclaration {
            Record::of::<Self>("Order")
                .field::<i32>("order_id")
                .field::<Vec<Item>>("items")
                .field_or::<String>("note", "none")
                .field_with("favourite", Item::reference())
                .build()
        }
    }

    fn compiled() -> CompiledSchema {
        let mut translator = Translator::new();
        translator.translate(&Order::declaration()).unwrap();
        let document = SchemaDocument::new(
            "Shop",
            "autorpc",
            translator.into_messages(),
            vec![SchemaRpc {
                name: "place".into(),
                request: "Order".into(),
                response: "Order".into(),
                cardinality: Cardinality::Unary,
            }],
            None,
        );
        DescriptorCompiler.compile(&document).unwrap()
    }

    fn order() -> Order {
        Order {
            order_id: 1,
            items: vec![
                Item {
                    id: 1,
                    name: "Apple".into(),
                    price: 0.5,
                },
                Item {
                    id: 2,
                    name: "Pear".into(),
                    price: 0.75,
                },
            ],
            note: "leave at the door".into(),
            favourite: Some(Item {
                id: 0,
                name: String::new(),
                price: 0.0,
            }),
        }
    }

    #[test]
    fn test_round_trip() {
        let schema = compiled();
        let descriptor = schema.message("Order").unwrap();
        let record = Order::declaration().as_record().unwrap();

        let value = serde_value::to_value(order()).unwrap();
        let message = encode_record(value, &record, &descriptor).unwrap();
        let decoded = decode_record(&message, &record).unwrap();

        assert_eq!(decoded.deserialize_into::<Order>().unwrap(), order());
    }

    #[test]
    fn test_defaults_and_empty_lists() {
        let schema = compiled();
        let descriptor = schema.message("Order").unwrap();
        let record = Order::declaration().as_record().unwrap();

        let mut message = DynamicMessage::new(descriptor.clone());
        message.set_field_by_name("order_id", WireValue::I32(4));
        let mut favourite = DynamicMessage::new(schema.message("Item").unwrap());
        favourite.set_field_by_name("id", WireValue::I32(9));
        message.set_field_by_name("favourite", WireValue::Message(favourite));

        let order = decode_record(&message, &record)
            .unwrap()
            .deserialize_into::<Order>()
            .unwrap();
        assert_eq!(order.order_id, 4);
        assert!(order.items.is_empty());
        assert_eq!(order.note, "none");
        assert_eq!(order.favourite.map(|item| item.id), Some(9));
    }

    #[test]
    fn test_zero_values_keep_their_value() {
        let schema = compiled();
        let descriptor = schema.message("Order").unwrap();
        let record = Order::declaration().as_record().unwrap();

        let order = Order {
            note: String::new(),
            ..order()
        };
        let value = serde_value::to_value(order.clone()).unwrap();
        let message = encode_record(value, &record, &descriptor).unwrap();
        let note = descriptor.get_field_by_name("note").unwrap();
        assert!(message.has_field(&note));

        // The same holds after a trip through the binary encoding.
        let message = crate::wire::decode(&descriptor, &crate::wire::encode(&message)).unwrap();
        let decoded = decode_record(&message, &record)
            .unwrap()
            .deserialize_into::<Order>()
            .unwrap();
        assert_eq!(decoded.note, "");
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_missing_message_field() {
        let schema = compiled();
        let descriptor = schema.message("Order").unwrap();
        let record = Order::declaration().as_record().unwrap();

        let message = DynamicMessage::new(descriptor);
        assert!(matches!(
            decode_record(&message, &record),
            Err(MarshalError::MissingField { ref field, .. }) if field == "favourite"
        ));
    }

    #[test]
    fn test_encode_rejects_mismatched_values() {
        let schema = compiled();
        let descriptor = schema.message("Item").unwrap();
        let record = Item::declaration().as_record().unwrap();

        let mut value = BTreeMap::new();
        value.insert(Value::String("id".into()), Value::I64(i64::MAX));
        value.insert(Value::String("name".into()), Value::String("Apple".into()));
        value.insert(Value::String("price".into()), Value::F64(1.0));
        assert!(matches!(
            encode_record(Value::Map(value.clone()), &record, &descriptor),
            Err(MarshalError::TypeMismatch { ref field, .. }) if field == "id"
        ));

        value.insert(Value::String("id".into()), Value::I32(1));
        value.insert(Value::String("colour".into()), Value::String("red".into()));
        assert!(matches!(
            encode_record(Value::Map(value.clone()), &record, &descriptor),
            Err(MarshalError::UnexpectedField { ref field, .. }) if field == "colour"
        ));

        value.remove(&Value::String("colour".into()));
        value.remove(&Value::String("name".into()));
        assert!(matches!(
            encode_record(Value::Map(value), &record, &descriptor),
            Err(MarshalError::MissingField { ref field, .. }) if field == "name"
        ));

        assert!(matches!(
            encode_record(Value::I32(1), &record, &descriptor),
            Err(MarshalError::NotARecord { .. })
        ));
    }
}
