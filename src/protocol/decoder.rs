//! Checkpointed, resumable frame decoders.
//!
//! Both decoders accumulate socket reads in a `BytesMut` and run an explicit
//! step machine over it. A step only commits (splits off) its bytes from the
//! buffer once it has fully completed; when the buffer ends mid-step, `push`
//! returns the messages decoded so far and the step is re-entered from the
//! same checkpoint on the next call. Committed bytes are never reread.
//!
//! Checkpoints sit at the op-code, sequence-id and argument-count boundaries,
//! at **each** argument boundary (a partial argument list survives a buffer
//! split between arguments), and at the reply discriminator / header / value
//! boundaries.
//!
//! Two failure modes, never conflated: "insufficient bytes" pauses the
//! decoder silently; a structural error (unknown op code or tag, oversized
//! length field) is fatal for the connection.

use std::sync::Arc;

use bytes::{Buf, BytesMut};

use super::frame::{CacheCommand, Notification, Reply, Request, Response};
use super::{CACHE_FLUSH_NAMES, MAX_PAYLOAD_HINT, REPLY_CACHE, REPLY_NOTIFICATION, REPLY_RESPONSE};
use crate::codec::{CodecRegistry, DecodeCtx, DecodeError};
use crate::error::{BeanwireError, Result};
use crate::ops::OpCode;
use crate::wire::WireValue;

const READ_BUF_CAPACITY: usize = 16 * 1024;

/// Step machine for server-bound request frames.
#[derive(Debug, Clone, Copy)]
enum RequestStep {
    /// Awaiting the 1-byte operation code.
    OpCode,
    /// Awaiting the 4-byte sequence id.
    Seq { op: OpCode },
    /// Awaiting the 1-byte argument count.
    ArgCount { op: OpCode, seq: u32 },
    /// Awaiting arguments; the scratch list lives on the decoder so each
    /// completed argument is itself a checkpoint.
    Args { op: OpCode, seq: u32, argc: u8 },
}

/// Resumable decoder for the server side of a connection.
pub struct RequestDecoder {
    registry: Arc<CodecRegistry>,
    ctx: DecodeCtx,
    buf: BytesMut,
    step: RequestStep,
    /// Arguments consumed so far within the current message.
    args: Vec<Option<WireValue>>,
}

impl RequestDecoder {
    /// Create a decoder bound to a codec registry.
    pub fn new(registry: Arc<CodecRegistry>) -> Self {
        Self {
            registry,
            ctx: DecodeCtx::new(),
            buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            step: RequestStep::OpCode,
            args: Vec::new(),
        }
    }

    /// Feed incoming bytes and extract every complete request.
    ///
    /// Returns the requests completed by this push (possibly none). A
    /// returned error is a fatal framing error; the connection must be
    /// closed.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Request>> {
        self.buf.extend_from_slice(data);

        let mut requests = Vec::new();
        while let Some(req) = self.try_extract_one()? {
            requests.push(req);
        }
        Ok(requests)
    }

    fn try_extract_one(&mut self) -> Result<Option<Request>> {
        loop {
            match self.step {
                RequestStep::OpCode => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let op = OpCode::from_code(self.buf[0])?;
                    self.buf.advance(1);
                    self.step = RequestStep::Seq { op };
                }
                RequestStep::Seq { op } => {
                    if self.buf.len() < 4 {
                        return Ok(None);
                    }
                    let seq = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                    self.buf.advance(4);
                    self.step = RequestStep::ArgCount { op, seq };
                }
                RequestStep::ArgCount { op, seq } => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let argc = self.buf[0];
                    let arity = op.arity();
                    if usize::from(argc) != arity && usize::from(argc) != arity + 1 {
                        return Err(BeanwireError::Decode(format!(
                            "operation {} expects {} arguments, frame carries {}",
                            op.name(),
                            arity,
                            argc
                        )));
                    }
                    self.buf.advance(1);
                    self.args.clear();
                    self.step = RequestStep::Args { op, seq, argc };
                }
                RequestStep::Args { op, seq, argc } => {
                    while self.args.len() < usize::from(argc) {
                        if self.buf.is_empty() {
                            return Ok(None);
                        }
                        match self.buf[0] {
                            0 => {
                                self.buf.advance(1);
                                self.args.push(None);
                            }
                            1 => match self.registry.decode(&mut self.ctx, &self.buf[1..]) {
                                Ok((value, consumed)) => {
                                    self.buf.advance(1 + consumed);
                                    self.args.push(Some(value));
                                }
                                Err(DecodeError::Incomplete) => return Ok(None),
                                Err(DecodeError::Malformed(msg)) => {
                                    return Err(BeanwireError::Decode(msg))
                                }
                            },
                            other => {
                                return Err(BeanwireError::Decode(format!(
                                    "bad argument null-flag {other}"
                                )))
                            }
                        }
                    }

                    let mut args = std::mem::take(&mut self.args);
                    let registry = if usize::from(argc) == op.arity() + 1 {
                        match args.pop().flatten() {
                            None => None,
                            Some(WireValue::Str(name)) => Some(name),
                            Some(other) => {
                                return Err(BeanwireError::Decode(format!(
                                    "registry selector must be a string, got {other:?}"
                                )))
                            }
                        }
                    } else {
                        None
                    };

                    self.step = RequestStep::OpCode;
                    return Ok(Some(Request {
                        op,
                        seq,
                        args,
                        registry,
                    }));
                }
            }
        }
    }

    /// Bytes buffered but not yet committed to a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Step machine for client-bound reply frames.
#[derive(Debug, Clone, Copy)]
enum ReplyStep {
    /// Awaiting the 1-byte discriminator.
    Discriminator,
    /// Awaiting op code, sequence id and payload-length hint (9 bytes).
    ResponseHeader,
    /// Awaiting the response value.
    ResponseValue { op: OpCode, seq: u32, hint: u32 },
    /// Awaiting the 4-byte registration id.
    NotificationHeader,
    /// Awaiting the event payload.
    NotificationEvent { registration: u32 },
    /// Awaiting the 1-byte cache command.
    CacheCommand,
}

/// Resumable decoder for the client side of a connection.
pub struct ReplyDecoder {
    registry: Arc<CodecRegistry>,
    ctx: DecodeCtx,
    buf: BytesMut,
    step: ReplyStep,
}

impl ReplyDecoder {
    /// Create a decoder bound to a codec registry.
    pub fn new(registry: Arc<CodecRegistry>) -> Self {
        Self {
            registry,
            ctx: DecodeCtx::new(),
            buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            step: ReplyStep::Discriminator,
        }
    }

    /// Feed incoming bytes and extract every complete reply.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Reply>> {
        self.buf.extend_from_slice(data);

        let mut replies = Vec::new();
        while let Some(reply) = self.try_extract_one()? {
            replies.push(reply);
        }
        Ok(replies)
    }

    fn try_extract_one(&mut self) -> Result<Option<Reply>> {
        loop {
            match self.step {
                ReplyStep::Discriminator => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let next = match self.buf[0] {
                        REPLY_RESPONSE => ReplyStep::ResponseHeader,
                        REPLY_NOTIFICATION => ReplyStep::NotificationHeader,
                        REPLY_CACHE => ReplyStep::CacheCommand,
                        other => {
                            return Err(BeanwireError::Decode(format!(
                                "unknown reply discriminator {other}"
                            )))
                        }
                    };
                    self.buf.advance(1);
                    self.step = next;
                }
                ReplyStep::ResponseHeader => {
                    if self.buf.len() < 9 {
                        return Ok(None);
                    }
                    let op = OpCode::from_code(self.buf[0])?;
                    let seq = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
                    let hint = u32::from_be_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]]);
                    if hint > MAX_PAYLOAD_HINT {
                        return Err(BeanwireError::Decode(format!(
                            "payload length {hint} exceeds maximum {MAX_PAYLOAD_HINT}"
                        )));
                    }
                    self.buf.advance(9);
                    self.step = ReplyStep::ResponseValue { op, seq, hint };
                }
                ReplyStep::ResponseValue { op, seq, hint } => {
                    match self.registry.decode(&mut self.ctx, &self.buf) {
                        Ok((result, consumed)) => {
                            // The length field is a diagnostic hint, not a
                            // second framing boundary.
                            if consumed as u32 != hint {
                                tracing::debug!(
                                    seq,
                                    hint,
                                    consumed,
                                    "response payload length hint mismatch"
                                );
                            }
                            self.buf.advance(consumed);
                            self.step = ReplyStep::Discriminator;
                            return Ok(Some(Reply::Response(Response { op, seq, result })));
                        }
                        Err(DecodeError::Incomplete) => return Ok(None),
                        Err(DecodeError::Malformed(msg)) => return Err(BeanwireError::Decode(msg)),
                    }
                }
                ReplyStep::NotificationHeader => {
                    if self.buf.len() < 4 {
                        return Ok(None);
                    }
                    let registration =
                        u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                    self.buf.advance(4);
                    self.step = ReplyStep::NotificationEvent { registration };
                }
                ReplyStep::NotificationEvent { registration } => {
                    match self.registry.decode(&mut self.ctx, &self.buf) {
                        Ok((event, consumed)) => {
                            self.buf.advance(consumed);
                            self.step = ReplyStep::Discriminator;
                            return Ok(Some(Reply::Notification(Notification {
                                registration,
                                event,
                            })));
                        }
                        Err(DecodeError::Incomplete) => return Ok(None),
                        Err(DecodeError::Malformed(msg)) => return Err(BeanwireError::Decode(msg)),
                    }
                }
                ReplyStep::CacheCommand => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let command = match self.buf[0] {
                        CACHE_FLUSH_NAMES => CacheCommand::FlushNames,
                        other => {
                            return Err(BeanwireError::Decode(format!(
                                "unknown cache command {other}"
                            )))
                        }
                    };
                    self.buf.advance(1);
                    // Flushing here keeps the flush point exact with
                    // respect to message order on this channel.
                    self.ctx.flush();
                    self.step = ReplyStep::Discriminator;
                    return Ok(Some(Reply::CacheDirective(command)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodeCtx;
    use crate::protocol::encoder::{
        encode_cache_directive, encode_notification, encode_request, encode_response,
    };
    use crate::wire::BeanName;

    fn registry() -> Arc<CodecRegistry> {
        Arc::new(CodecRegistry::new())
    }

    fn sample_request() -> Request {
        Request::new(
            OpCode::GetAttribute,
            7,
            vec![
                Some(WireValue::BeanName(BeanName::parse("app:type=Pool").unwrap())),
                Some(WireValue::Str("Size".into())),
            ],
        )
    }

    #[test]
    fn test_request_roundtrip_whole() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let bytes = encode_request(&reg, &mut enc, &sample_request()).unwrap();

        let mut dec = RequestDecoder::new(reg);
        let reqs = dec.push(&bytes).unwrap();
        assert_eq!(reqs, vec![sample_request()]);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_spec_example_bytes() {
        // {op=GETDEFAULTDOMAIN, seq=1, args=[]} -> [opcode][00 00 00 01][00]
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let req = Request::new(OpCode::GetDefaultDomain, 1, vec![]);
        let bytes = encode_request(&reg, &mut enc, &req).unwrap();
        assert_eq!(&bytes[..], &[12, 0x00, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn test_request_resumable_at_every_split() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let expected = sample_request();
        let bytes = encode_request(&reg, &mut enc, &expected).unwrap();

        for split in 0..=bytes.len() {
            let mut dec = RequestDecoder::new(registry());
            let mut got = dec.push(&bytes[..split]).unwrap();
            got.extend(dec.push(&bytes[split..]).unwrap());
            assert_eq!(got, vec![expected.clone()], "split at {split}");
        }
    }

    #[test]
    fn test_request_byte_at_a_time() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let expected = sample_request();
        let bytes = encode_request(&reg, &mut enc, &expected).unwrap();

        let mut dec = RequestDecoder::new(registry());
        let mut got = Vec::new();
        for b in &bytes {
            got.extend(dec.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(got, vec![expected]);
    }

    #[test]
    fn test_partial_argument_list_survives_split() {
        // Split exactly between the two arguments.
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let expected = sample_request();
        let bytes = encode_request(&reg, &mut enc, &expected).unwrap();

        // header (6) + flag (1) + name value; find the second flag byte by
        // re-encoding just the first argument.
        let mut probe = EncodeCtx::new();
        let mut name_only = bytes::BytesMut::new();
        reg.encode(
            &mut probe,
            expected.args[0].as_ref().unwrap(),
            &mut name_only,
        );
        let boundary = 6 + 1 + name_only.len();

        let mut dec = RequestDecoder::new(registry());
        assert!(dec.push(&bytes[..boundary]).unwrap().is_empty());
        let got = dec.push(&bytes[boundary..]).unwrap();
        assert_eq!(got, vec![expected]);
    }

    #[test]
    fn test_two_requests_in_one_push() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let a = Request::new(OpCode::GetBeanCount, 1, vec![]);
        let b = Request::new(OpCode::GetDefaultDomain, 2, vec![]);
        let mut bytes = encode_request(&reg, &mut enc, &a).unwrap().to_vec();
        bytes.extend_from_slice(&encode_request(&reg, &mut enc, &b).unwrap());

        let mut dec = RequestDecoder::new(registry());
        let got = dec.push(&bytes).unwrap();
        assert_eq!(got, vec![a, b]);
    }

    #[test]
    fn test_null_arguments() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let req = Request::new(OpCode::QueryNames, 3, vec![None, None]);
        let bytes = encode_request(&reg, &mut enc, &req).unwrap();

        let mut dec = RequestDecoder::new(registry());
        assert_eq!(dec.push(&bytes).unwrap(), vec![req]);
    }

    #[test]
    fn test_registry_selector_roundtrip() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let req = Request {
            registry: Some("secondary".into()),
            ..Request::new(OpCode::GetBeanCount, 4, vec![])
        };
        let bytes = encode_request(&reg, &mut enc, &req).unwrap();

        let mut dec = RequestDecoder::new(registry());
        let got = dec.push(&bytes).unwrap();
        assert_eq!(got[0].registry, Some("secondary".into()));
        assert_eq!(got[0].registry_name(), "secondary");
    }

    #[test]
    fn test_unknown_op_code_is_fatal() {
        let mut dec = RequestDecoder::new(registry());
        let err = dec.push(&[0xEE]).unwrap_err();
        assert!(matches!(err, BeanwireError::UnknownOperation(0xEE)));
    }

    #[test]
    fn test_bad_arg_count_is_fatal() {
        // GetBeanCount takes no arguments; claim 5.
        let mut dec = RequestDecoder::new(registry());
        let err = dec.push(&[11, 0, 0, 0, 1, 5]).unwrap_err();
        assert!(matches!(err, BeanwireError::Decode(_)));
    }

    #[test]
    fn test_name_table_spans_messages() {
        // Second request referencing the same name decodes via the table.
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let first = sample_request();
        let second = Request::new(
            OpCode::IsRegistered,
            8,
            vec![Some(WireValue::BeanName(BeanName::parse("app:type=Pool").unwrap()))],
        );
        let mut bytes = encode_request(&reg, &mut enc, &first).unwrap().to_vec();
        let second_bytes = encode_request(&reg, &mut enc, &second).unwrap();
        // The repeated name is a 3-byte reference inside the second frame.
        assert!(second_bytes.len() < 16);
        bytes.extend_from_slice(&second_bytes);

        let mut dec = RequestDecoder::new(registry());
        let got = dec.push(&bytes).unwrap();
        assert_eq!(got, vec![first, second]);
    }

    fn sample_response() -> Response {
        Response {
            op: OpCode::GetDefaultDomain,
            seq: 1,
            result: WireValue::Str("DefaultDomain".into()),
        }
    }

    #[test]
    fn test_reply_roundtrip_whole() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let bytes = encode_response(&reg, &mut enc, &sample_response()).unwrap();

        let mut dec = ReplyDecoder::new(registry());
        let got = dec.push(&bytes).unwrap();
        assert_eq!(got, vec![Reply::Response(sample_response())]);
    }

    #[test]
    fn test_reply_resumable_at_every_split() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let bytes = encode_response(&reg, &mut enc, &sample_response()).unwrap();

        for split in 0..=bytes.len() {
            let mut dec = ReplyDecoder::new(registry());
            let mut got = dec.push(&bytes[..split]).unwrap();
            got.extend(dec.push(&bytes[split..]).unwrap());
            assert_eq!(got, vec![Reply::Response(sample_response())], "split at {split}");
        }
    }

    #[test]
    fn test_notification_roundtrip() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let notif = Notification {
            registration: 42,
            event: WireValue::Str("cache cleared".into()),
        };
        let bytes = encode_notification(&reg, &mut enc, &notif).unwrap();

        let mut dec = ReplyDecoder::new(registry());
        let got = dec.push(&bytes).unwrap();
        assert_eq!(got, vec![Reply::Notification(notif)]);
    }

    #[test]
    fn test_mixed_replies_in_one_push() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let notif = Notification {
            registration: 9,
            event: WireValue::I32(1),
        };
        let mut bytes = encode_response(&reg, &mut enc, &sample_response()).unwrap().to_vec();
        bytes.extend_from_slice(&encode_notification(&reg, &mut enc, &notif).unwrap());
        bytes.extend_from_slice(&encode_cache_directive(CacheCommand::FlushNames));

        let mut dec = ReplyDecoder::new(registry());
        let got = dec.push(&bytes).unwrap();
        assert_eq!(
            got,
            vec![
                Reply::Response(sample_response()),
                Reply::Notification(notif),
                Reply::CacheDirective(CacheCommand::FlushNames),
            ]
        );
    }

    #[test]
    fn test_cache_directive_flushes_decode_table() {
        let reg = registry();
        let mut enc = EncodeCtx::new();
        let name = WireValue::BeanName(BeanName::parse("d:k=v").unwrap());
        let resp = Response {
            op: OpCode::QueryNames,
            seq: 1,
            result: name.clone(),
        };

        let mut bytes = encode_response(&reg, &mut enc, &resp).unwrap().to_vec();
        bytes.extend_from_slice(&encode_cache_directive(CacheCommand::FlushNames));
        // After the directive the peer must re-send names in full; a stale
        // back-reference is corruption.
        enc.flush();
        let resp2 = Response {
            op: OpCode::QueryNames,
            seq: 2,
            result: name,
        };
        bytes.extend_from_slice(&encode_response(&reg, &mut enc, &resp2).unwrap());

        let mut dec = ReplyDecoder::new(registry());
        let got = dec.push(&bytes).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[2], Reply::Response(resp2));
    }

    #[test]
    fn test_unknown_discriminator_is_fatal() {
        let mut dec = ReplyDecoder::new(registry());
        assert!(matches!(
            dec.push(&[9]).unwrap_err(),
            BeanwireError::Decode(_)
        ));
    }

    #[test]
    fn test_oversized_payload_hint_is_fatal() {
        let mut frame = vec![REPLY_RESPONSE, 12, 0, 0, 0, 1];
        frame.extend_from_slice(&u32::MAX.to_be_bytes());
        let mut dec = ReplyDecoder::new(registry());
        assert!(matches!(
            dec.push(&frame).unwrap_err(),
            BeanwireError::Decode(_)
        ));
    }
}
