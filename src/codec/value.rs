//! Built-in value codecs: one tag byte per wire kind, body per kind.
//!
//! Encoding is self-describing: a decoder needs nothing but the bytes (and
//! the connection's name table) to know where a value ends, which is why the
//! response payload-length field can stay advisory.

use bytes::{BufMut, Bytes, BytesMut};

use super::reader::{put_str, ByteReader, DecodeError, DecodeResult};
use super::{CodecRegistry, DecodeCtx, EncodeCtx, NameRef, EXTENSION_TAG_BASE};
use crate::wire::{
    AttrDescriptor, Attribute, BeanInfo, BeanName, CompositeData, CompositeField, CtorDescriptor,
    ExtensionValue, NotifDescriptor, OpDescriptor, OpenType, ParamDescriptor, RemoteFailure,
    TabularData, TabularEntry, WireValue,
};

/// Wire tags for the built-in value kinds.
pub mod tag {
    /// Explicit null placeholder (no body).
    pub const NULL: u8 = 0x00;
    /// Explicit void placeholder (no body).
    pub const VOID: u8 = 0x01;
    /// Boolean.
    pub const BOOL: u8 = 0x02;
    /// 32-bit integer.
    pub const I32: u8 = 0x03;
    /// 64-bit integer.
    pub const I64: u8 = 0x04;
    /// 64-bit float.
    pub const F64: u8 = 0x05;
    /// UTF-8 string.
    pub const STR: u8 = 0x06;
    /// Raw bytes.
    pub const BYTES: u8 = 0x07;
    /// Bean name, full text plus reference-table index.
    pub const NAME_FULL: u8 = 0x08;
    /// Bean name, back-reference to an earlier index.
    pub const NAME_REF: u8 = 0x09;
    /// Attribute pair.
    pub const ATTRIBUTE: u8 = 0x0A;
    /// Attribute list.
    pub const ATTRIBUTE_LIST: u8 = 0x0B;
    /// Heterogeneous value list.
    pub const LIST: u8 = 0x0C;
    /// String list.
    pub const STR_LIST: u8 = 0x0D;
    /// Bean introspection metadata.
    pub const BEAN_INFO: u8 = 0x0E;
    /// Open-type descriptor.
    pub const OPEN_TYPE: u8 = 0x0F;
    /// Composite data value.
    pub const COMPOSITE: u8 = 0x10;
    /// Tabular data value.
    pub const TABULAR: u8 = 0x11;
    /// Carried invocation failure.
    pub const FAILURE: u8 = 0x12;
    /// Non-serializable placeholder.
    pub const NON_SERIALIZABLE: u8 = 0x13;
    /// Structural MsgPack fallback.
    pub const STRUCTURAL: u8 = 0x14;

    /// Open-type sub-tags.
    pub mod open {
        /// Simple named type.
        pub const SIMPLE: u8 = 0;
        /// Array type.
        pub const ARRAY: u8 = 1;
        /// Composite type.
        pub const COMPOSITE: u8 = 2;
        /// Tabular type.
        pub const TABULAR: u8 = 3;
    }
}

impl CodecRegistry {
    /// Encode one value, selecting its codec by kind.
    ///
    /// Never fails the message: an extension value with no registered codec
    /// is written as a non-serializable placeholder instead.
    pub fn encode(&self, ctx: &mut EncodeCtx, value: &WireValue, out: &mut BytesMut) {
        match value {
            WireValue::Null => out.put_u8(tag::NULL),
            WireValue::Void => out.put_u8(tag::VOID),
            WireValue::Bool(v) => {
                out.put_u8(tag::BOOL);
                out.put_u8(u8::from(*v));
            }
            WireValue::I32(v) => {
                out.put_u8(tag::I32);
                out.put_i32(*v);
            }
            WireValue::I64(v) => {
                out.put_u8(tag::I64);
                out.put_i64(*v);
            }
            WireValue::F64(v) => {
                out.put_u8(tag::F64);
                out.put_u64(v.to_bits());
            }
            WireValue::Str(s) => {
                out.put_u8(tag::STR);
                put_str(out, s);
            }
            WireValue::Bytes(b) => {
                out.put_u8(tag::BYTES);
                out.put_u32(b.len() as u32);
                out.put_slice(b);
            }
            WireValue::BeanName(name) => self.encode_name(ctx, name, out),
            WireValue::Attribute(attr) => {
                out.put_u8(tag::ATTRIBUTE);
                self.encode_attribute_body(ctx, attr, out);
            }
            WireValue::AttributeList(list) => {
                out.put_u8(tag::ATTRIBUTE_LIST);
                out.put_u32(list.len() as u32);
                for attr in list {
                    self.encode_attribute_body(ctx, attr, out);
                }
            }
            WireValue::List(items) => {
                out.put_u8(tag::LIST);
                out.put_u32(items.len() as u32);
                for item in items {
                    self.encode(ctx, item, out);
                }
            }
            WireValue::StrList(items) => {
                out.put_u8(tag::STR_LIST);
                out.put_u32(items.len() as u32);
                for item in items {
                    put_str(out, item);
                }
            }
            WireValue::BeanInfo(info) => {
                out.put_u8(tag::BEAN_INFO);
                encode_bean_info(info, out);
            }
            WireValue::OpenType(ty) => {
                out.put_u8(tag::OPEN_TYPE);
                encode_open_type(ty, out);
            }
            WireValue::Composite(data) => {
                out.put_u8(tag::COMPOSITE);
                self.encode_composite_body(ctx, data, out);
            }
            WireValue::Tabular(table) => {
                out.put_u8(tag::TABULAR);
                encode_open_type(&table.ty, out);
                out.put_u32(table.entries.len() as u32);
                for entry in &table.entries {
                    out.put_u32(entry.key.len() as u32);
                    for k in &entry.key {
                        self.encode(ctx, k, out);
                    }
                    self.encode_composite_body(ctx, &entry.row, out);
                }
            }
            WireValue::Failure(f) => {
                out.put_u8(tag::FAILURE);
                put_str(out, &f.kind);
                put_str(out, &f.message);
            }
            WireValue::NonSerializable { class_name, rendered } => {
                out.put_u8(tag::NON_SERIALIZABLE);
                put_str(out, class_name);
                put_str(out, rendered);
            }
            WireValue::Structural { type_name, bytes } => {
                out.put_u8(tag::STRUCTURAL);
                put_str(out, type_name);
                out.put_u32(bytes.len() as u32);
                out.put_slice(bytes);
            }
            WireValue::Extension(ext) => match self.extension(ext.tag) {
                Some(codec) => {
                    out.put_u8(ext.tag);
                    codec.encode(&ext.payload, out);
                }
                None => {
                    // No codec for this tag: degrade, don't fail the message.
                    out.put_u8(tag::NON_SERIALIZABLE);
                    put_str(out, &format!("extension:{:#04x}", ext.tag));
                    put_str(out, &format!("<{} opaque bytes>", ext.payload.len()));
                }
            },
        }
    }

    /// Decode one value from the front of `buf`.
    ///
    /// Returns the value and the number of bytes consumed. `Incomplete`
    /// means the buffer ends inside the value; the caller retries from the
    /// same offset once more bytes arrive. Name-table side effects are
    /// idempotent, so a retried decode is harmless.
    pub fn decode(&self, ctx: &mut DecodeCtx, buf: &[u8]) -> DecodeResult<(WireValue, usize)> {
        let mut r = ByteReader::new(buf);
        let value = self.decode_inner(ctx, &mut r)?;
        Ok((value, r.consumed()))
    }

    fn decode_inner(&self, ctx: &mut DecodeCtx, r: &mut ByteReader<'_>) -> DecodeResult<WireValue> {
        let t = r.u8()?;
        match t {
            tag::NULL => Ok(WireValue::Null),
            tag::VOID => Ok(WireValue::Void),
            tag::BOOL => match r.u8()? {
                0 => Ok(WireValue::Bool(false)),
                1 => Ok(WireValue::Bool(true)),
                other => Err(DecodeError::malformed(format!("bad bool byte {other}"))),
            },
            tag::I32 => Ok(WireValue::I32(r.i32_be()?)),
            tag::I64 => Ok(WireValue::I64(r.i64_be()?)),
            tag::F64 => Ok(WireValue::F64(r.f64_be()?)),
            tag::STR => Ok(WireValue::Str(r.str_field()?)),
            tag::BYTES => Ok(WireValue::Bytes(Bytes::copy_from_slice(r.blob_field()?))),
            tag::NAME_FULL => {
                let idx = r.u16_be()?;
                let text = r.str_field()?;
                let name = BeanName::parse(&text)
                    .map_err(|_| DecodeError::malformed(format!("invalid bean name {text:?}")))?;
                ctx.record(idx, name.as_str());
                Ok(WireValue::BeanName(name))
            }
            tag::NAME_REF => {
                let idx = r.u16_be()?;
                let text = ctx
                    .resolve(idx)
                    .ok_or_else(|| DecodeError::malformed(format!("unknown name reference {idx}")))?;
                let name = BeanName::parse(text)
                    .map_err(|_| DecodeError::malformed("corrupt name table entry"))?;
                Ok(WireValue::BeanName(name))
            }
            tag::ATTRIBUTE => Ok(WireValue::Attribute(Box::new(self.decode_attribute_body(ctx, r)?))),
            tag::ATTRIBUTE_LIST => {
                let count = r.count_field()?;
                let mut list = Vec::with_capacity(count);
                for _ in 0..count {
                    list.push(self.decode_attribute_body(ctx, r)?);
                }
                Ok(WireValue::AttributeList(list))
            }
            tag::LIST => {
                let count = r.count_field()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.decode_inner(ctx, r)?);
                }
                Ok(WireValue::List(items))
            }
            tag::STR_LIST => {
                let count = r.count_field()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(r.str_field()?);
                }
                Ok(WireValue::StrList(items))
            }
            tag::BEAN_INFO => Ok(WireValue::BeanInfo(Box::new(decode_bean_info(r)?))),
            tag::OPEN_TYPE => Ok(WireValue::OpenType(Box::new(decode_open_type(r)?))),
            tag::COMPOSITE => Ok(WireValue::Composite(Box::new(self.decode_composite_body(ctx, r)?))),
            tag::TABULAR => {
                let ty = decode_open_type(r)?;
                if !matches!(ty, OpenType::Tabular { .. }) {
                    return Err(DecodeError::malformed("tabular value with non-tabular type"));
                }
                let count = r.count_field()?;
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key_len = r.count_field()?;
                    let mut key = Vec::with_capacity(key_len);
                    for _ in 0..key_len {
                        key.push(self.decode_inner(ctx, r)?);
                    }
                    let row = self.decode_composite_body(ctx, r)?;
                    entries.push(TabularEntry { key, row });
                }
                Ok(WireValue::Tabular(Box::new(TabularData { ty, entries })))
            }
            tag::FAILURE => {
                let kind = r.str_field()?;
                let message = r.str_field()?;
                Ok(WireValue::Failure(RemoteFailure { kind, message }))
            }
            tag::NON_SERIALIZABLE => {
                let class_name = r.str_field()?;
                let rendered = r.str_field()?;
                Ok(WireValue::NonSerializable { class_name, rendered })
            }
            tag::STRUCTURAL => {
                let type_name = r.str_field()?;
                let bytes = Bytes::copy_from_slice(r.blob_field()?);
                Ok(WireValue::Structural { type_name, bytes })
            }
            ext if ext >= EXTENSION_TAG_BASE => match self.extension(ext) {
                Some(codec) => {
                    let payload = codec.decode(r)?;
                    Ok(WireValue::Extension(ExtensionValue { tag: ext, payload }))
                }
                None => Err(DecodeError::malformed(format!(
                    "no codec registered for extension tag {ext:#04x}"
                ))),
            },
            unknown => Err(DecodeError::malformed(format!("unknown value tag {unknown:#04x}"))),
        }
    }

    fn encode_name(&self, ctx: &mut EncodeCtx, name: &BeanName, out: &mut BytesMut) {
        match ctx.intern(name.as_str()) {
            NameRef::Full(idx) => {
                out.put_u8(tag::NAME_FULL);
                out.put_u16(idx);
                put_str(out, name.as_str());
            }
            NameRef::Back(idx) => {
                out.put_u8(tag::NAME_REF);
                out.put_u16(idx);
            }
        }
    }

    fn encode_attribute_body(&self, ctx: &mut EncodeCtx, attr: &Attribute, out: &mut BytesMut) {
        put_str(out, &attr.name);
        self.encode(ctx, &attr.value, out);
    }

    fn decode_attribute_body(&self, ctx: &mut DecodeCtx, r: &mut ByteReader<'_>) -> DecodeResult<Attribute> {
        let name = r.str_field()?;
        let value = self.decode_inner(ctx, r)?;
        Ok(Attribute { name, value })
    }

    /// Composite data body: type descriptor once, then the values in the
    /// type's field order.
    fn encode_composite_body(&self, ctx: &mut EncodeCtx, data: &CompositeData, out: &mut BytesMut) {
        encode_open_type(&data.ty, out);
        for value in &data.values {
            self.encode(ctx, value, out);
        }
    }

    fn decode_composite_body(&self, ctx: &mut DecodeCtx, r: &mut ByteReader<'_>) -> DecodeResult<CompositeData> {
        let ty = decode_open_type(r)?;
        let field_count = ty
            .composite_fields()
            .ok_or_else(|| DecodeError::malformed("composite value with non-composite type"))?
            .len();
        let mut values = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            values.push(self.decode_inner(ctx, r)?);
        }
        Ok(CompositeData { ty, values })
    }
}

fn encode_open_type(ty: &OpenType, out: &mut BytesMut) {
    match ty {
        OpenType::Simple(name) => {
            out.put_u8(tag::open::SIMPLE);
            put_str(out, name);
        }
        OpenType::Array { element, dims } => {
            out.put_u8(tag::open::ARRAY);
            out.put_u8(*dims);
            encode_open_type(element, out);
        }
        OpenType::Composite {
            type_name,
            description,
            fields,
        } => {
            out.put_u8(tag::open::COMPOSITE);
            put_str(out, type_name);
            put_str(out, description);
            out.put_u32(fields.len() as u32);
            for field in fields {
                put_str(out, &field.name);
                encode_open_type(&field.ty, out);
                put_str(out, &field.description);
            }
        }
        OpenType::Tabular {
            type_name,
            description,
            row_type,
            index_names,
        } => {
            out.put_u8(tag::open::TABULAR);
            put_str(out, type_name);
            put_str(out, description);
            encode_open_type(row_type, out);
            out.put_u32(index_names.len() as u32);
            for name in index_names {
                put_str(out, name);
            }
        }
    }
}

fn decode_open_type(r: &mut ByteReader<'_>) -> DecodeResult<OpenType> {
    match r.u8()? {
        tag::open::SIMPLE => Ok(OpenType::Simple(r.str_field()?)),
        tag::open::ARRAY => {
            let dims = r.u8()?;
            if dims == 0 {
                return Err(DecodeError::malformed("array type with zero dimensions"));
            }
            let element = decode_open_type(r)?;
            Ok(OpenType::Array {
                element: Box::new(element),
                dims,
            })
        }
        tag::open::COMPOSITE => {
            let type_name = r.str_field()?;
            let description = r.str_field()?;
            let count = r.count_field()?;
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let name = r.str_field()?;
                let ty = decode_open_type(r)?;
                let field_description = r.str_field()?;
                fields.push(CompositeField {
                    name,
                    ty,
                    description: field_description,
                });
            }
            Ok(OpenType::Composite {
                type_name,
                description,
                fields,
            })
        }
        tag::open::TABULAR => {
            let type_name = r.str_field()?;
            let description = r.str_field()?;
            let row_type = decode_open_type(r)?;
            if !matches!(row_type, OpenType::Composite { .. }) {
                return Err(DecodeError::malformed("tabular row type must be composite"));
            }
            let count = r.count_field()?;
            let mut index_names = Vec::with_capacity(count);
            for _ in 0..count {
                index_names.push(r.str_field()?);
            }
            Ok(OpenType::Tabular {
                type_name,
                description,
                row_type: Box::new(row_type),
                index_names,
            })
        }
        other => Err(DecodeError::malformed(format!("unknown open-type tag {other}"))),
    }
}

fn encode_bean_info(info: &BeanInfo, out: &mut BytesMut) {
    put_str(out, &info.class_name);
    put_str(out, &info.description);

    out.put_u32(info.attributes.len() as u32);
    for attr in &info.attributes {
        put_str(out, &attr.name);
        put_str(out, &attr.type_name);
        put_str(out, &attr.description);
        out.put_u8(u8::from(attr.readable));
        out.put_u8(u8::from(attr.writable));
    }

    out.put_u32(info.constructors.len() as u32);
    for ctor in &info.constructors {
        put_str(out, &ctor.name);
        put_str(out, &ctor.description);
        encode_params(&ctor.params, out);
    }

    out.put_u32(info.operations.len() as u32);
    for op in &info.operations {
        put_str(out, &op.name);
        put_str(out, &op.return_type);
        put_str(out, &op.description);
        encode_params(&op.params, out);
    }

    out.put_u32(info.notifications.len() as u32);
    for notif in &info.notifications {
        put_str(out, &notif.name);
        put_str(out, &notif.type_name);
        put_str(out, &notif.description);
    }
}

fn encode_params(params: &[ParamDescriptor], out: &mut BytesMut) {
    out.put_u32(params.len() as u32);
    for p in params {
        put_str(out, &p.name);
        put_str(out, &p.type_name);
        put_str(out, &p.description);
    }
}

fn decode_bean_info(r: &mut ByteReader<'_>) -> DecodeResult<BeanInfo> {
    let class_name = r.str_field()?;
    let description = r.str_field()?;

    let count = r.count_field()?;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        attributes.push(AttrDescriptor {
            name: r.str_field()?,
            type_name: r.str_field()?,
            description: r.str_field()?,
            readable: r.u8()? != 0,
            writable: r.u8()? != 0,
        });
    }

    let count = r.count_field()?;
    let mut constructors = Vec::with_capacity(count);
    for _ in 0..count {
        constructors.push(CtorDescriptor {
            name: r.str_field()?,
            description: r.str_field()?,
            params: decode_params(r)?,
        });
    }

    let count = r.count_field()?;
    let mut operations = Vec::with_capacity(count);
    for _ in 0..count {
        operations.push(OpDescriptor {
            name: r.str_field()?,
            return_type: r.str_field()?,
            description: r.str_field()?,
            params: decode_params(r)?,
        });
    }

    let count = r.count_field()?;
    let mut notifications = Vec::with_capacity(count);
    for _ in 0..count {
        notifications.push(NotifDescriptor {
            name: r.str_field()?,
            type_name: r.str_field()?,
            description: r.str_field()?,
        });
    }

    Ok(BeanInfo {
        class_name,
        description,
        attributes,
        constructors,
        operations,
        notifications,
    })
}

fn decode_params(r: &mut ByteReader<'_>) -> DecodeResult<Vec<ParamDescriptor>> {
    let count = r.count_field()?;
    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        params.push(ParamDescriptor {
            name: r.str_field()?,
            type_name: r.str_field()?,
            description: r.str_field()?,
        });
    }
    Ok(params)
}
