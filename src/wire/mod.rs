//! Domain value model for the wire.
//!
//! Every value that crosses the connection is one variant of [`WireValue`],
//! a closed tagged enumeration of the supported wire kinds. Types without a
//! dedicated variant travel either through the structural MsgPack fallback
//! ([`WireValue::Structural`]) or, when they cannot be represented at all,
//! as a [`WireValue::NonSerializable`] placeholder.

mod info;
mod name;
mod open_type;

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BeanwireError, Result};

pub use info::{AttrDescriptor, BeanInfo, CtorDescriptor, NotifDescriptor, OpDescriptor, ParamDescriptor};
pub use name::BeanName;
pub use open_type::{CompositeData, CompositeField, OpenType, TabularData, TabularEntry};

/// A named attribute value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Attribute name.
    pub name: String,
    /// Attribute value (may be `WireValue::Null`).
    pub value: WireValue,
}

impl Attribute {
    /// Create a new attribute.
    pub fn new(name: impl Into<String>, value: WireValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Invocation failure carried as a response value.
///
/// Not a framing error: it is delivered through correlation like any
/// successful result and re-raised on the calling side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Failure kind, e.g. `"InstanceNotFound"`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl RemoteFailure {
    /// Create a new failure.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteFailure {}

/// A value for an extension codec registered in the codec registry.
///
/// The payload bytes are owned by the extension codec's own format;
/// the registry only frames them under the extension's tag.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionValue {
    /// Registered extension tag (within the extension tag range).
    pub tag: u8,
    /// Codec-private payload.
    pub payload: Bytes,
}

/// Closed enumeration of wire value kinds.
///
/// `Void`, `Null` and `NonSerializable` are ordinary wire values with their
/// own codecs; the framing layer cannot tell them apart from "real" values
/// and they round-trip exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// Explicit absence (the operation returned null).
    Null,
    /// Explicit no-value (the operation succeeded and returns nothing).
    Void,
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    I32(i32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw byte payload.
    Bytes(Bytes),
    /// Management-bean resource name.
    BeanName(BeanName),
    /// Single attribute name/value pair.
    Attribute(Box<Attribute>),
    /// Ordered attribute list.
    AttributeList(Vec<Attribute>),
    /// Ordered heterogeneous value list.
    List(Vec<WireValue>),
    /// Ordered string list (operation signatures, domain lists).
    StrList(Vec<String>),
    /// Introspection metadata for one bean.
    BeanInfo(Box<BeanInfo>),
    /// Open-type descriptor.
    OpenType(Box<OpenType>),
    /// Composite data value.
    Composite(Box<CompositeData>),
    /// Tabular data value.
    Tabular(Box<TabularData>),
    /// Carried invocation failure.
    Failure(RemoteFailure),
    /// Best-effort stand-in for a value with no representation.
    NonSerializable {
        /// Original type name.
        class_name: String,
        /// Rendered string form of the original value.
        rendered: String,
    },
    /// Structural fallback: a serde value shipped as named MsgPack.
    Structural {
        /// Original type name, used as a decode hint.
        type_name: String,
        /// MsgPack bytes (struct-as-map format).
        bytes: Bytes,
    },
    /// Value owned by a registered extension codec.
    Extension(ExtensionValue),
}

impl WireValue {
    /// Ship an arbitrary serde value through the structural fallback.
    ///
    /// Falls back to the [`WireValue::NonSerializable`] placeholder when
    /// MsgPack serialization fails, so building a message never fails on
    /// an unsupported value.
    pub fn structural<T: Serialize + fmt::Debug>(type_name: &str, value: &T) -> WireValue {
        match rmp_serde::to_vec_named(value) {
            Ok(bytes) => WireValue::Structural {
                type_name: type_name.to_string(),
                bytes: Bytes::from(bytes),
            },
            Err(_) => WireValue::NonSerializable {
                class_name: type_name.to_string(),
                rendered: format!("{value:?}"),
            },
        }
    }

    /// Strict variant of [`structural`](Self::structural): a serialization
    /// failure is surfaced instead of degraded to the placeholder.
    pub fn try_structural<T: Serialize>(type_name: &str, value: &T) -> Result<WireValue> {
        let bytes = rmp_serde::to_vec_named(value)?;
        Ok(WireValue::Structural {
            type_name: type_name.to_string(),
            bytes: Bytes::from(bytes),
        })
    }

    /// Deserialize a structural value back into a concrete type.
    ///
    /// # Errors
    ///
    /// `Decode` when this is not a `Structural` value, `StructuralDecode`
    /// when the MsgPack payload does not fit `T`.
    pub fn structural_as<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            WireValue::Structural { bytes, .. } => Ok(rmp_serde::from_slice(bytes)?),
            other => Err(BeanwireError::Decode(format!(
                "not a structural value: {other:?}"
            ))),
        }
    }

    /// Borrow as a string, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a bean name, if this is a `BeanName`.
    pub fn as_bean_name(&self) -> Option<&BeanName> {
        match self {
            WireValue::BeanName(n) => Some(n),
            _ => None,
        }
    }

    /// Extract as i32, if this is an `I32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            WireValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Extract as bool, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            WireValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the string list, if this is a `StrList`.
    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            WireValue::StrList(v) => Some(v),
            _ => None,
        }
    }

    /// True for the explicit-null placeholder.
    pub fn is_null(&self) -> bool {
        matches!(self, WireValue::Null)
    }

    /// True for the explicit-void placeholder.
    pub fn is_void(&self) -> bool {
        matches!(self, WireValue::Void)
    }
}

impl From<&str> for WireValue {
    fn from(s: &str) -> Self {
        WireValue::Str(s.to_string())
    }
}

impl From<String> for WireValue {
    fn from(s: String) -> Self {
        WireValue::Str(s)
    }
}

impl From<i32> for WireValue {
    fn from(v: i32) -> Self {
        WireValue::I32(v)
    }
}

impl From<i64> for WireValue {
    fn from(v: i64) -> Self {
        WireValue::I64(v)
    }
}

impl From<bool> for WireValue {
    fn from(v: bool) -> Self {
        WireValue::Bool(v)
    }
}

impl From<BeanName> for WireValue {
    fn from(n: BeanName) -> Self {
        WireValue::BeanName(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_from_serializable() {
        #[derive(Serialize, Debug)]
        struct Sample {
            id: u32,
        }

        let v = WireValue::structural("Sample", &Sample { id: 7 });
        match v {
            WireValue::Structural { type_name, bytes } => {
                assert_eq!(type_name, "Sample");
                // struct-as-map format: fixmap with 1 element
                assert_eq!(bytes[0], 0x81);
            }
            other => panic!("expected Structural, got {other:?}"),
        }
    }

    #[test]
    fn test_try_structural_round_trip() {
        #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Sample {
            id: u32,
            label: String,
        }

        let sample = Sample {
            id: 7,
            label: "seven".into(),
        };
        let v = WireValue::try_structural("Sample", &sample).unwrap();
        let back: Sample = v.structural_as().unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_try_structural_surfaces_encode_failure() {
        struct Refuses;
        impl Serialize for Refuses {
            fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("refused"))
            }
        }

        match WireValue::try_structural("Refuses", &Refuses) {
            Err(BeanwireError::StructuralEncode(_)) => {}
            other => panic!("expected StructuralEncode, got {other:?}"),
        }
    }

    #[test]
    fn test_structural_as_rejects_mismatched_payload() {
        let v = WireValue::try_structural("Str", &"text").unwrap();
        match v.structural_as::<u32>() {
            Err(BeanwireError::StructuralDecode(_)) => {}
            other => panic!("expected StructuralDecode, got {other:?}"),
        }

        match WireValue::I32(1).structural_as::<u32>() {
            Err(BeanwireError::Decode(_)) => {}
            other => panic!("expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_accessors() {
        assert_eq!(WireValue::Str("x".into()).as_str(), Some("x"));
        assert_eq!(WireValue::I32(5).as_i32(), Some(5));
        assert_eq!(WireValue::Bool(true).as_bool(), Some(true));
        assert!(WireValue::Null.is_null());
        assert!(WireValue::Void.is_void());
        assert!(WireValue::Null.as_str().is_none());
    }

    #[test]
    fn test_failure_display() {
        let f = RemoteFailure::new("InstanceNotFound", "no such bean");
        assert_eq!(f.to_string(), "InstanceNotFound: no such bean");
    }
}
