//! # LDAP Protocol
//!
//! Wire-level LDAPv3 support for the read-only directory server: a minimal
//! BER (X.690 definite-length) reader and writer, the protocol-op subset the
//! server speaks, the search filter algebra, and distinguished-name handling.
//!
//! The codec is streaming-friendly: [`codec::decode`] reports "need more
//! bytes" by returning `Ok(None)` instead of failing, so a connection task
//! can keep appending to its read buffer until a full PDU is available.
//!
//! ## Crate Organization
//!
//! - [`ber`] - Tag/length/value primitives
//! - [`message`] - `LdapMessage`, protocol ops, controls, result codes
//! - [`filter`] - Filter tree with BER parse/serialize
//! - [`codec`] - Frame-level encode/decode entry points
//! - [`dn`] - Distinguished-name parsing, normalization, and escaping
//! - [`error`] - Decode error types

pub mod ber;
pub mod codec;
pub mod dn;
pub mod error;
pub mod filter;
pub mod message;

pub use codec::{decode, encode};
pub use error::{DecodeFailure, ProtoError};
pub use filter::{Filter, SubstringFilter};
pub use message::{
    AuthenticationChoice, BindRequest, Control, LdapMessage, LdapResult, PagedResultsValue,
    PartialAttribute, ProtocolOp, ResultCode, SearchRequest, SearchResultEntry, SearchScope,
    PAGED_RESULTS_OID,
};
