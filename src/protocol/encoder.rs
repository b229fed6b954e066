//! Frame encoder: the exact inverse of the decoder's layouts.
//!
//! Encoding is synchronous and side-effect-free beyond the output buffer.
//! The response payload-length field is written as a placeholder, the value
//! body is encoded, and the field is then patched with the true length.

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::{CacheCommand, Notification, Request, Response};
use super::{CACHE_FLUSH_NAMES, REPLY_CACHE, REPLY_NOTIFICATION, REPLY_RESPONSE};
use crate::codec::{CodecRegistry, EncodeCtx};
use crate::error::{BeanwireError, Result};
use crate::wire::WireValue;

/// Serialize a request frame.
///
/// # Errors
///
/// Returns `Config` if the argument list (plus the optional registry
/// selector slot) exceeds the one-byte count field.
pub fn encode_request(registry: &CodecRegistry, ctx: &mut EncodeCtx, req: &Request) -> Result<Bytes> {
    let selector_slot = usize::from(req.registry.is_some());
    let argc = req.args.len() + selector_slot;
    if argc > usize::from(u8::MAX) {
        return Err(BeanwireError::Config(format!(
            "request carries {argc} arguments, the frame holds at most 255"
        )));
    }

    let mut out = BytesMut::with_capacity(64);
    out.put_u8(req.op.code());
    out.put_u32(req.seq);
    out.put_u8(argc as u8);
    for arg in &req.args {
        put_nullable(registry, ctx, arg.as_ref(), &mut out);
    }
    if let Some(selector) = &req.registry {
        let value = WireValue::Str(selector.clone());
        put_nullable(registry, ctx, Some(&value), &mut out);
    }
    Ok(out.freeze())
}

fn put_nullable(registry: &CodecRegistry, ctx: &mut EncodeCtx, arg: Option<&WireValue>, out: &mut BytesMut) {
    match arg {
        None => out.put_u8(0),
        Some(value) => {
            out.put_u8(1);
            registry.encode(ctx, value, out);
        }
    }
}

/// Serialize a response frame, patching the payload-length field after the
/// body is written.
pub fn encode_response(registry: &CodecRegistry, ctx: &mut EncodeCtx, resp: &Response) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(64);
    out.put_u8(REPLY_RESPONSE);
    out.put_u8(resp.op.code());
    out.put_u32(resp.seq);

    let len_at = out.len();
    out.put_u32(0); // placeholder, patched below
    registry.encode(ctx, &resp.result, &mut out);

    let payload_len = (out.len() - len_at - 4) as u32;
    out[len_at..len_at + 4].copy_from_slice(&payload_len.to_be_bytes());
    Ok(out.freeze())
}

/// Serialize a notification envelope.
pub fn encode_notification(
    registry: &CodecRegistry,
    ctx: &mut EncodeCtx,
    notif: &Notification,
) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(32);
    out.put_u8(REPLY_NOTIFICATION);
    out.put_u32(notif.registration);
    registry.encode(ctx, &notif.event, &mut out);
    Ok(out.freeze())
}

/// Serialize a cache directive.
pub fn encode_cache_directive(command: CacheCommand) -> Bytes {
    let byte = match command {
        CacheCommand::FlushNames => CACHE_FLUSH_NAMES,
    };
    Bytes::from(vec![REPLY_CACHE, byte])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OpCode;

    #[test]
    fn test_response_length_field_is_patched() {
        let registry = CodecRegistry::new();
        let mut ctx = EncodeCtx::new();
        let resp = Response {
            op: OpCode::GetDefaultDomain,
            seq: 1,
            result: WireValue::Str("DefaultDomain".into()),
        };
        let bytes = encode_response(&registry, &mut ctx, &resp).unwrap();

        let hint = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        assert_eq!(hint as usize, bytes.len() - 10);
        assert_ne!(hint, 0);
    }

    #[test]
    fn test_void_response_has_minimal_payload() {
        let registry = CodecRegistry::new();
        let mut ctx = EncodeCtx::new();
        let resp = Response {
            op: OpCode::UnregisterBean,
            seq: 2,
            result: WireValue::Void,
        };
        let bytes = encode_response(&registry, &mut ctx, &resp).unwrap();
        // discriminator + op + seq + length + one tag byte
        assert_eq!(bytes.len(), 11);
        let hint = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        assert_eq!(hint, 1);
    }

    #[test]
    fn test_cache_directive_bytes() {
        let bytes = encode_cache_directive(CacheCommand::FlushNames);
        assert_eq!(&bytes[..], &[REPLY_CACHE, CACHE_FLUSH_NAMES]);
    }

    #[test]
    fn test_request_rejects_oversized_arg_list() {
        let registry = CodecRegistry::new();
        let mut ctx = EncodeCtx::new();
        let req = Request::new(
            OpCode::Invoke,
            1,
            (0..256).map(|_| Some(WireValue::I32(0))).collect(),
        );
        assert!(encode_request(&registry, &mut ctx, &req).is_err());
    }
}
