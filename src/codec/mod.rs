//! Per-type serialization codec registry.
//!
//! Every [`WireValue`](crate::wire::WireValue) kind has a one-byte tag and a
//! built-in codec. A reserved tag range is an extension point: user codecs
//! register under a stable tag at startup, after which the registry is
//! read-only and safe for unsynchronized concurrent reads. Values with no
//! codec degrade to the non-serializable placeholder instead of failing the
//! message.
//!
//! Decoding distinguishes two failure modes that must never be conflated:
//! [`DecodeError::Incomplete`] (more bytes will arrive, retry silently) and
//! [`DecodeError::Malformed`] (structural corruption, fatal).

mod reader;
mod value;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{BeanwireError, Result};

pub use reader::{put_str, ByteReader, DecodeError, DecodeResult, MAX_BLOB_LEN, MAX_COUNT, MAX_TEXT_LEN};
pub use value::tag;

/// First tag reserved for extension codecs.
pub const EXTENSION_TAG_BASE: u8 = 0x80;

/// Index sentinel marking a bean name written in full but not entered
/// into the connection's reference table.
pub const UNCACHED_NAME_INDEX: u16 = u16::MAX;

/// Codec for one extension tag.
///
/// The registry frames the payload under the extension's tag; the payload
/// format itself is codec-private. `decode` must honour the
/// incomplete/malformed distinction like the built-in codecs.
pub trait ExtensionCodec: Send + Sync {
    /// Type name, used in diagnostics and placeholders.
    fn type_name(&self) -> &str;

    /// Write the payload body (everything after the tag byte).
    fn encode(&self, payload: &[u8], out: &mut BytesMut);

    /// Read the payload body.
    fn decode(&self, r: &mut ByteReader<'_>) -> DecodeResult<Bytes>;
}

/// Encode-side connection state: the bean-name reference table.
///
/// Channel-scoped, owned by the connection that writes with it. Indexes are
/// assigned here and carried explicitly on the wire, so the peer's decode
/// table mirrors this one without any coordination.
#[derive(Debug, Default)]
pub struct EncodeCtx {
    names: HashMap<String, u16>,
}

/// How a bean name should be written.
pub(crate) enum NameRef {
    /// First occurrence: full text under the given index.
    Full(u16),
    /// Repeat occurrence: reference to a previously written index.
    Back(u16),
}

impl EncodeCtx {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn intern(&mut self, name: &str) -> NameRef {
        if let Some(&idx) = self.names.get(name) {
            return NameRef::Back(idx);
        }
        if self.names.len() >= UNCACHED_NAME_INDEX as usize {
            // Table full: write in full, uncached.
            return NameRef::Full(UNCACHED_NAME_INDEX);
        }
        let idx = self.names.len() as u16;
        self.names.insert(name.to_string(), idx);
        NameRef::Full(idx)
    }

    /// Drop all cached name indexes (cache directive).
    pub fn flush(&mut self) {
        self.names.clear();
    }
}

/// Decode-side connection state: the mirror bean-name table.
#[derive(Debug, Default)]
pub struct DecodeCtx {
    names: HashMap<u16, String>,
}

impl DecodeCtx {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a full name under its wire-carried index. Idempotent, so a
    /// replayed decode of the same bytes is harmless.
    pub(crate) fn record(&mut self, idx: u16, name: &str) {
        if idx != UNCACHED_NAME_INDEX {
            self.names.insert(idx, name.to_string());
        }
    }

    pub(crate) fn resolve(&self, idx: u16) -> Option<&str> {
        self.names.get(&idx).map(|s| s.as_str())
    }

    /// Drop all cached name indexes (cache directive).
    pub fn flush(&mut self) {
        self.names.clear();
    }
}

/// The codec registry: built-in kind codecs plus registered extensions.
///
/// Built once at startup; read-only afterwards.
#[derive(Default)]
pub struct CodecRegistry {
    extensions: HashMap<u8, Arc<dyn ExtensionCodec>>,
}

impl CodecRegistry {
    /// Registry with built-in codecs only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension codec under a stable tag.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the tag is outside the extension range or
    /// already taken — the registry never holds two competing codecs for
    /// one tag.
    pub fn register_extension(&mut self, extension_tag: u8, codec: Arc<dyn ExtensionCodec>) -> Result<()> {
        if extension_tag < EXTENSION_TAG_BASE {
            return Err(BeanwireError::Config(format!(
                "extension tag {extension_tag:#04x} is below the extension range"
            )));
        }
        if self.extensions.contains_key(&extension_tag) {
            return Err(BeanwireError::Config(format!(
                "extension tag {extension_tag:#04x} already registered"
            )));
        }
        self.extensions.insert(extension_tag, codec);
        Ok(())
    }

    pub(crate) fn extension(&self, extension_tag: u8) -> Option<&Arc<dyn ExtensionCodec>> {
        self.extensions.get(&extension_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlobCodec;

    impl ExtensionCodec for BlobCodec {
        fn type_name(&self) -> &str {
            "blob"
        }

        fn encode(&self, payload: &[u8], out: &mut BytesMut) {
            use bytes::BufMut;
            out.put_u32(payload.len() as u32);
            out.put_slice(payload);
        }

        fn decode(&self, r: &mut ByteReader<'_>) -> DecodeResult<Bytes> {
            Ok(Bytes::copy_from_slice(r.blob_field()?))
        }
    }

    #[test]
    fn test_register_extension() {
        let mut reg = CodecRegistry::new();
        reg.register_extension(0x90, Arc::new(BlobCodec)).unwrap();
        assert!(reg.extension(0x90).is_some());
    }

    #[test]
    fn test_duplicate_extension_rejected() {
        let mut reg = CodecRegistry::new();
        reg.register_extension(0x90, Arc::new(BlobCodec)).unwrap();
        assert!(reg.register_extension(0x90, Arc::new(BlobCodec)).is_err());
    }

    #[test]
    fn test_extension_tag_below_range_rejected() {
        let mut reg = CodecRegistry::new();
        assert!(reg.register_extension(0x10, Arc::new(BlobCodec)).is_err());
    }

    #[test]
    fn test_name_tables_mirror() {
        let mut enc = EncodeCtx::new();
        let mut dec = DecodeCtx::new();

        let NameRef::Full(idx) = enc.intern("d:k=v") else {
            panic!("first occurrence must be full");
        };
        dec.record(idx, "d:k=v");

        match enc.intern("d:k=v") {
            NameRef::Back(back) => {
                assert_eq!(back, idx);
                assert_eq!(dec.resolve(back), Some("d:k=v"));
            }
            NameRef::Full(_) => panic!("repeat occurrence must be a reference"),
        }
    }

    #[test]
    fn test_flush_clears_tables() {
        let mut enc = EncodeCtx::new();
        let mut dec = DecodeCtx::new();
        let NameRef::Full(idx) = enc.intern("d:k=v") else {
            panic!("expected full");
        };
        dec.record(idx, "d:k=v");

        enc.flush();
        dec.flush();

        assert!(matches!(enc.intern("d:k=v"), NameRef::Full(_)));
        assert_eq!(dec.resolve(idx), None);
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut dec = DecodeCtx::new();
        dec.record(3, "d:k=v");
        dec.record(3, "d:k=v");
        assert_eq!(dec.resolve(3), Some("d:k=v"));
    }
}
