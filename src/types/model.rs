use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{Record, ScalarKind, TypeDeclaration};

/// A Rust type which can describe its own shape.
///
/// Records implement [`Model::declaration`] with the [`Record`] builder. Fields referring to
/// other models go through [`Model::reference`] so a declaration is only built when it is used.
pub trait Model: Serialize + DeserializeOwned + Send + 'static {
    fn declaration() -> TypeDeclaration;

    fn reference() -> TypeDeclaration {
        TypeDeclaration::Deferred(Self::declaration)
    }
}

macro_rules! impl_scalar {
    ($kind:ident: $($t:ident)+) => {
        $(
            impl Model for $t {
                fn declaration() -> TypeDeclaration {
                    TypeDeclaration::Scalar(ScalarKind::$kind)
                }

                fn reference() -> TypeDeclaration {
                    Self::declaration()
                }
            }
        )+
    };
}

impl_scalar!(Integer: i8 i16 i32 u8 u16);
impl_scalar!(LargeInteger: i64 isize);
impl_scalar!(UnsignedInteger: u32 u64 usize);
impl_scalar!(Float: f32 f64);
impl_scalar!(String: String);
impl_scalar!(Boolean: bool);
impl_scalar!(Char: char);

impl<T: Model> Model for Vec<T> {
    fn declaration() -> TypeDeclaration {
        TypeDeclaration::collection(T::reference())
    }

    fn reference() -> TypeDeclaration {
        Self::declaration()
    }
}

/// A record without fields, for endpoints which take no meaningful input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

impl Model for Empty {
    fn declaration() -> TypeDeclaration {
        Record::of::<Self>("Empty").build()
    }
}
