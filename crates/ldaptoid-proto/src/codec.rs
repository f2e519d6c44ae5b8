//! Frame-level encode/decode of whole LDAP messages.

use crate::ber::{self, Reader};
use crate::error::{DecodeFailure, ProtoError};
use crate::message::{self, LdapMessage, TAG_CONTROLS};

/// Decodes the first complete LDAPMessage in `buf`.
///
/// Returns `Ok(None)` when the buffer holds only a partial PDU; nothing is
/// consumed and the caller should read more bytes. On success the second
/// tuple element is the number of bytes the message occupied, which the
/// caller drains from its buffer.
pub fn decode(buf: &[u8]) -> Result<Option<(LdapMessage, usize)>, DecodeFailure> {
    let total = match ber::frame_length(buf).map_err(DecodeFailure::bare)? {
        Some(total) => total,
        None => return Ok(None),
    };
    let mut outer = Reader::new(&buf[..total]);
    let (_, envelope) = outer.read_element().map_err(DecodeFailure::bare)?;

    let mut reader = Reader::new(envelope);
    let message_id = reader.read_integer().map_err(DecodeFailure::bare)?;
    if !(0..=i32::MAX as i64).contains(&message_id) {
        return Err(DecodeFailure::bare(ProtoError::Malformed("messageID")));
    }
    let message_id = message_id as i32;
    let fail = |source| DecodeFailure::at(message_id, source);

    let (op_tag, op_content) = reader.read_element().map_err(fail)?;
    let op = message::decode_op(op_tag, op_content).map_err(fail)?;

    let mut controls = Vec::new();
    if !reader.is_empty() && reader.peek_tag().map_err(fail)? == TAG_CONTROLS {
        let content = reader.expect(TAG_CONTROLS).map_err(fail)?;
        controls = message::decode_controls(content).map_err(fail)?;
    }

    Ok(Some((
        LdapMessage {
            message_id,
            op,
            controls,
        },
        total,
    )))
}

/// Encodes a message into its wire form.
pub fn encode(msg: &LdapMessage) -> Vec<u8> {
    let mut content = ber::integer(msg.message_id as i64);
    content.extend_from_slice(&message::encode_op(&msg.op));
    if !msg.controls.is_empty() {
        content.extend_from_slice(&message::encode_controls(&msg.controls));
    }
    ber::tlv(ber::TAG_SEQUENCE, &content)
}
