//! Static operation catalog.
//!
//! Every remote operation is one entry of a closed, enumerated set: a stable
//! byte code, an ordered argument signature and a return kind. The catalog is
//! defined once and never mutated; lookups are pure.

use crate::error::{BeanwireError, Result};

/// Semantic kind of one request argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// UTF-8 string.
    Str,
    /// 32-bit integer (also used for registration ids).
    I32,
    /// Bean resource name.
    BeanName,
    /// Single attribute pair.
    Attribute,
    /// Attribute list.
    AttributeList,
    /// Any wire value.
    Value,
    /// List of wire values.
    ValueList,
    /// List of strings.
    StrList,
}

/// Semantic kind of an operation's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Operation returns nothing (`WireValue::Void`).
    Void,
    /// Boolean.
    Bool,
    /// 32-bit integer.
    I32,
    /// String.
    Str,
    /// String list.
    StrList,
    /// Any wire value.
    Value,
    /// List of wire values.
    ValueList,
    /// Attribute list.
    AttributeList,
    /// Bean introspection metadata.
    BeanInfo,
}

/// Signature of one catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSignature {
    /// Ordered argument kinds.
    pub args: &'static [ArgKind],
    /// Result kind.
    pub ret: ReturnKind,
}

/// Operation codes, stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Instantiate and register a bean.
    CreateBean = 1,
    /// Unregister a bean.
    UnregisterBean = 2,
    /// Read one attribute.
    GetAttribute = 3,
    /// Read several attributes.
    GetAttributeList = 4,
    /// Write one attribute.
    SetAttribute = 5,
    /// Write several attributes.
    SetAttributeList = 6,
    /// Invoke a bean operation.
    Invoke = 7,
    /// Fetch introspection metadata.
    GetBeanInfo = 8,
    /// Query registered names by pattern.
    QueryNames = 9,
    /// Check whether a name is registered.
    IsRegistered = 10,
    /// Count registered beans.
    GetBeanCount = 11,
    /// Fetch the default domain name.
    GetDefaultDomain = 12,
    /// List all domains.
    GetDomains = 13,
    /// Register a notification listener.
    AddListener = 14,
    /// Remove a notification listener.
    RemoveListener = 15,
    /// Check class membership of a bean.
    IsInstanceOf = 16,
}

impl OpCode {
    /// All catalog entries, in code order.
    pub const ALL: &'static [OpCode] = &[
        OpCode::CreateBean,
        OpCode::UnregisterBean,
        OpCode::GetAttribute,
        OpCode::GetAttributeList,
        OpCode::SetAttribute,
        OpCode::SetAttributeList,
        OpCode::Invoke,
        OpCode::GetBeanInfo,
        OpCode::QueryNames,
        OpCode::IsRegistered,
        OpCode::GetBeanCount,
        OpCode::GetDefaultDomain,
        OpCode::GetDomains,
        OpCode::AddListener,
        OpCode::RemoveListener,
        OpCode::IsInstanceOf,
    ];

    /// Look up an operation by its wire code.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperation` for codes outside the catalog. That error
    /// is fatal for the connection when raised by the frame decoder.
    pub fn from_code(code: u8) -> Result<OpCode> {
        match code {
            1 => Ok(OpCode::CreateBean),
            2 => Ok(OpCode::UnregisterBean),
            3 => Ok(OpCode::GetAttribute),
            4 => Ok(OpCode::GetAttributeList),
            5 => Ok(OpCode::SetAttribute),
            6 => Ok(OpCode::SetAttributeList),
            7 => Ok(OpCode::Invoke),
            8 => Ok(OpCode::GetBeanInfo),
            9 => Ok(OpCode::QueryNames),
            10 => Ok(OpCode::IsRegistered),
            11 => Ok(OpCode::GetBeanCount),
            12 => Ok(OpCode::GetDefaultDomain),
            13 => Ok(OpCode::GetDomains),
            14 => Ok(OpCode::AddListener),
            15 => Ok(OpCode::RemoveListener),
            16 => Ok(OpCode::IsInstanceOf),
            other => Err(BeanwireError::UnknownOperation(other)),
        }
    }

    /// The wire code for this operation.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Symbolic name, e.g. `"GETDEFAULTDOMAIN"`.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::CreateBean => "CREATEBEAN",
            OpCode::UnregisterBean => "UNREGISTERBEAN",
            OpCode::GetAttribute => "GETATTRIBUTE",
            OpCode::GetAttributeList => "GETATTRIBUTELIST",
            OpCode::SetAttribute => "SETATTRIBUTE",
            OpCode::SetAttributeList => "SETATTRIBUTELIST",
            OpCode::Invoke => "INVOKE",
            OpCode::GetBeanInfo => "GETBEANINFO",
            OpCode::QueryNames => "QUERYNAMES",
            OpCode::IsRegistered => "ISREGISTERED",
            OpCode::GetBeanCount => "GETBEANCOUNT",
            OpCode::GetDefaultDomain => "GETDEFAULTDOMAIN",
            OpCode::GetDomains => "GETDOMAINS",
            OpCode::AddListener => "ADDLISTENER",
            OpCode::RemoveListener => "REMOVELISTENER",
            OpCode::IsInstanceOf => "ISINSTANCEOF",
        }
    }

    /// Look up an operation by symbolic name.
    pub fn by_name(name: &str) -> Option<OpCode> {
        OpCode::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// The argument/return signature for this operation.
    pub fn signature(self) -> OpSignature {
        use ArgKind::*;
        match self {
            OpCode::CreateBean => OpSignature {
                args: &[Str, BeanName, ValueList, StrList],
                ret: ReturnKind::Value,
            },
            OpCode::UnregisterBean => OpSignature {
                args: &[BeanName],
                ret: ReturnKind::Void,
            },
            OpCode::GetAttribute => OpSignature {
                args: &[BeanName, Str],
                ret: ReturnKind::Value,
            },
            OpCode::GetAttributeList => OpSignature {
                args: &[BeanName, StrList],
                ret: ReturnKind::AttributeList,
            },
            OpCode::SetAttribute => OpSignature {
                args: &[BeanName, Attribute],
                ret: ReturnKind::Void,
            },
            OpCode::SetAttributeList => OpSignature {
                args: &[BeanName, AttributeList],
                ret: ReturnKind::AttributeList,
            },
            OpCode::Invoke => OpSignature {
                args: &[BeanName, Str, ValueList, StrList],
                ret: ReturnKind::Value,
            },
            OpCode::GetBeanInfo => OpSignature {
                args: &[BeanName],
                ret: ReturnKind::BeanInfo,
            },
            OpCode::QueryNames => OpSignature {
                args: &[BeanName, Value],
                ret: ReturnKind::ValueList,
            },
            OpCode::IsRegistered => OpSignature {
                args: &[BeanName],
                ret: ReturnKind::Bool,
            },
            OpCode::GetBeanCount => OpSignature {
                args: &[],
                ret: ReturnKind::I32,
            },
            OpCode::GetDefaultDomain => OpSignature {
                args: &[],
                ret: ReturnKind::Str,
            },
            OpCode::GetDomains => OpSignature {
                args: &[],
                ret: ReturnKind::StrList,
            },
            OpCode::AddListener => OpSignature {
                args: &[BeanName, I32, Value, Value],
                ret: ReturnKind::I32,
            },
            OpCode::RemoveListener => OpSignature {
                args: &[BeanName, I32],
                ret: ReturnKind::Void,
            },
            OpCode::IsInstanceOf => OpSignature {
                args: &[BeanName, Str],
                ret: ReturnKind::Bool,
            },
        }
    }

    /// Declared argument count, not counting the optional trailing
    /// target-registry selector slot.
    #[inline]
    pub fn arity(self) -> usize {
        self.signature().args.len()
    }
}
