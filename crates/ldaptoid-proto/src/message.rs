//! LDAP message model: the protocol-op subset, controls, and result codes.

use crate::ber::{self, Reader, CONSTRUCTED, TAG_NUMBER_MASK};
use crate::error::{ProtoError, ProtoResult};
use crate::filter::Filter;

/// Application tags for the ops this server recognizes.
pub const APP_BIND_REQUEST: u8 = 0x60;
pub const APP_BIND_RESPONSE: u8 = 0x61;
pub const APP_UNBIND_REQUEST: u8 = 0x42;
pub const APP_SEARCH_REQUEST: u8 = 0x63;
pub const APP_SEARCH_RESULT_ENTRY: u8 = 0x64;
pub const APP_SEARCH_RESULT_DONE: u8 = 0x65;

/// Controls wrapper tag on the LDAPMessage.
pub const TAG_CONTROLS: u8 = 0xA0;

/// RFC 2696 Simple Paged Results control.
pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";

/// One LDAPMessage envelope: message id, op, optional controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub message_id: i32,
    pub op: ProtocolOp,
    pub controls: Vec<Control>,
}

impl LdapMessage {
    pub fn new(message_id: i32, op: ProtocolOp) -> Self {
        Self {
            message_id,
            op,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(message_id: i32, op: ProtocolOp, controls: Vec<Control>) -> Self {
        Self {
            message_id,
            op,
            controls,
        }
    }
}

/// The protocol ops the server decodes. Anything else surfaces as
/// [`ProtocolOp::Unsupported`] so the session can answer `protocolError`
/// on the same message id instead of dropping the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse(LdapResult),
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResultEntry(SearchResultEntry),
    SearchResultDone(LdapResult),
    Unsupported { tag: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i64,
    pub dn: String,
    pub auth: AuthenticationChoice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationChoice {
    Simple(String),
    /// SASL bind; only the mechanism name is retained since the server
    /// rejects it with `authMethodNotSupported` anyway.
    Sasl { mechanism: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub size_limit: u32,
    pub time_limit: u32,
    pub types_only: bool,
    pub filter: Filter,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialAttribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl PartialAttribute {
    pub fn new(name: impl Into<String>, values: Vec<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn text(name: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(String::into_bytes).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<PartialAttribute>,
}

/// LDAPResult core: result code, matched DN, diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub message: String,
}

impl LdapResult {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            message: message.into(),
        }
    }

    pub fn success() -> Self {
        Self::new(ResultCode::Success, "")
    }
}

/// The result codes this server emits, plus decode support for the rest of
/// the numeric space so round-tripping foreign PDUs does not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    AuthMethodNotSupported,
    UnavailableCriticalExtension,
    InvalidCredentials,
    InsufficientAccessRights,
    Unavailable,
    UnwillingToPerform,
    Other(u32),
}

impl ResultCode {
    pub fn code(self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::ProtocolError => 2,
            ResultCode::TimeLimitExceeded => 3,
            ResultCode::SizeLimitExceeded => 4,
            ResultCode::AuthMethodNotSupported => 7,
            ResultCode::UnavailableCriticalExtension => 12,
            ResultCode::InvalidCredentials => 49,
            ResultCode::InsufficientAccessRights => 50,
            ResultCode::Unavailable => 52,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ResultCode::Success,
            1 => ResultCode::OperationsError,
            2 => ResultCode::ProtocolError,
            3 => ResultCode::TimeLimitExceeded,
            4 => ResultCode::SizeLimitExceeded,
            7 => ResultCode::AuthMethodNotSupported,
            12 => ResultCode::UnavailableCriticalExtension,
            49 => ResultCode::InvalidCredentials,
            50 => ResultCode::InsufficientAccessRights,
            52 => ResultCode::Unavailable,
            53 => ResultCode::UnwillingToPerform,
            other => ResultCode::Other(other),
        }
    }
}

/// An attached request/response control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    /// The paged-results acknowledgement: size 0, empty cookie. The server
    /// never actually pages; the ack just keeps paged clients happy.
    pub fn paged_results_ack() -> Self {
        Self {
            oid: PAGED_RESULTS_OID.to_string(),
            criticality: false,
            value: Some(PagedResultsValue { size: 0, cookie: Vec::new() }.to_ber()),
        }
    }
}

/// Decoded value of the Simple Paged Results control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedResultsValue {
    pub size: u32,
    pub cookie: Vec<u8>,
}

impl PagedResultsValue {
    pub fn parse(bytes: &[u8]) -> ProtoResult<Self> {
        let mut outer = Reader::new(bytes);
        let content = outer.expect(ber::TAG_SEQUENCE)?;
        let mut inner = Reader::new(content);
        let size = inner.read_integer()?.max(0) as u32;
        let cookie = inner.read_octet_string()?.to_vec();
        Ok(Self { size, cookie })
    }

    pub fn to_ber(&self) -> Vec<u8> {
        let mut content = ber::integer(self.size as i64);
        content.extend_from_slice(&ber::octet_string(&self.cookie));
        ber::tlv(ber::TAG_SEQUENCE, &content)
    }
}

// ---- op decoding -----------------------------------------------------------

pub(crate) fn decode_op(tag: u8, content: &[u8]) -> ProtoResult<ProtocolOp> {
    match tag {
        APP_BIND_REQUEST => decode_bind_request(content).map(ProtocolOp::BindRequest),
        APP_BIND_RESPONSE => decode_result(content).map(ProtocolOp::BindResponse),
        APP_UNBIND_REQUEST => Ok(ProtocolOp::UnbindRequest),
        APP_SEARCH_REQUEST => decode_search_request(content).map(ProtocolOp::SearchRequest),
        APP_SEARCH_RESULT_ENTRY => decode_entry(content).map(ProtocolOp::SearchResultEntry),
        APP_SEARCH_RESULT_DONE => decode_result(content).map(ProtocolOp::SearchResultDone),
        other => Ok(ProtocolOp::Unsupported { tag: other }),
    }
}

fn decode_bind_request(content: &[u8]) -> ProtoResult<BindRequest> {
    let mut reader = Reader::new(content);
    let version = reader.read_integer()?;
    let dn = reader.read_string()?;
    let (auth_tag, auth_content) = reader.read_element()?;
    // The AuthenticationChoice is CONTEXT [0]/[3] per RFC 4511, but some
    // client stacks emit APPLICATION class. Match on tag number and shape,
    // and fall back to treating the raw bytes as a simple password.
    let auth = match (auth_tag & TAG_NUMBER_MASK, auth_tag & CONSTRUCTED != 0) {
        (0, false) => {
            AuthenticationChoice::Simple(String::from_utf8_lossy(auth_content).into_owned())
        }
        (3, true) => {
            let mut sasl = Reader::new(auth_content);
            let mechanism = sasl.read_string().unwrap_or_default();
            AuthenticationChoice::Sasl { mechanism }
        }
        _ => AuthenticationChoice::Simple(String::from_utf8_lossy(auth_content).into_owned()),
    };
    Ok(BindRequest { version, dn, auth })
}

fn decode_search_request(content: &[u8]) -> ProtoResult<SearchRequest> {
    let mut reader = Reader::new(content);
    let base = reader.read_string()?;
    let scope = match reader.read_enumerated()? {
        0 => SearchScope::BaseObject,
        1 => SearchScope::SingleLevel,
        2 => SearchScope::WholeSubtree,
        value => return Err(ProtoError::InvalidEnumerated { field: "scope", value }),
    };
    let _deref_aliases = reader.read_enumerated()?;
    let size_limit = reader.read_integer()?.max(0) as u32;
    let time_limit = reader.read_integer()?.max(0) as u32;
    let types_only = reader.read_boolean()?;
    let (filter_tag, filter_content) = reader.read_element()?;
    let filter = Filter::parse(filter_tag, filter_content)?;
    let mut attributes = Vec::new();
    if !reader.is_empty() {
        let attr_list = reader.expect(ber::TAG_SEQUENCE)?;
        let mut attrs = Reader::new(attr_list);
        while !attrs.is_empty() {
            attributes.push(attrs.read_string()?);
        }
    }
    Ok(SearchRequest {
        base,
        scope,
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
    })
}

fn decode_result(content: &[u8]) -> ProtoResult<LdapResult> {
    let mut reader = Reader::new(content);
    let code = reader.read_enumerated()?;
    if !(0..=u32::MAX as i64).contains(&code) {
        return Err(ProtoError::InvalidEnumerated {
            field: "resultCode",
            value: code,
        });
    }
    let matched_dn = reader.read_string()?;
    let message = reader.read_string()?;
    Ok(LdapResult {
        code: ResultCode::from_code(code as u32),
        matched_dn,
        message,
    })
}

fn decode_entry(content: &[u8]) -> ProtoResult<SearchResultEntry> {
    let mut reader = Reader::new(content);
    let dn = reader.read_string()?;
    let attr_list = reader.expect(ber::TAG_SEQUENCE)?;
    let mut attrs_reader = Reader::new(attr_list);
    let mut attributes = Vec::new();
    while !attrs_reader.is_empty() {
        let attr = attrs_reader.expect(ber::TAG_SEQUENCE)?;
        let mut attr_reader = Reader::new(attr);
        let name = attr_reader.read_string()?;
        let vals_set = attr_reader.expect(ber::TAG_SET)?;
        let mut vals_reader = Reader::new(vals_set);
        let mut values = Vec::new();
        while !vals_reader.is_empty() {
            values.push(vals_reader.read_octet_string()?.to_vec());
        }
        attributes.push(PartialAttribute { name, values });
    }
    Ok(SearchResultEntry { dn, attributes })
}

pub(crate) fn decode_controls(content: &[u8]) -> ProtoResult<Vec<Control>> {
    let mut reader = Reader::new(content);
    let mut controls = Vec::new();
    while !reader.is_empty() {
        let control = reader.expect(ber::TAG_SEQUENCE)?;
        let mut inner = Reader::new(control);
        let oid = inner.read_string()?;
        let mut criticality = false;
        let mut value = None;
        if !inner.is_empty() && inner.peek_tag()? == ber::TAG_BOOLEAN {
            criticality = inner.read_boolean()?;
        }
        if !inner.is_empty() && inner.peek_tag()? == ber::TAG_OCTET_STRING {
            value = Some(inner.read_octet_string()?.to_vec());
        }
        controls.push(Control {
            oid,
            criticality,
            value,
        });
    }
    Ok(controls)
}

// ---- op encoding -----------------------------------------------------------

pub(crate) fn encode_op(op: &ProtocolOp) -> Vec<u8> {
    match op {
        ProtocolOp::BindRequest(req) => encode_bind_request(req),
        ProtocolOp::BindResponse(result) => ber::tlv(APP_BIND_RESPONSE, &encode_result(result)),
        ProtocolOp::UnbindRequest => ber::tlv(APP_UNBIND_REQUEST, &[]),
        ProtocolOp::SearchRequest(req) => encode_search_request(req),
        ProtocolOp::SearchResultEntry(entry) => encode_entry(entry),
        ProtocolOp::SearchResultDone(result) => {
            ber::tlv(APP_SEARCH_RESULT_DONE, &encode_result(result))
        }
        ProtocolOp::Unsupported { tag } => ber::tlv(*tag, &[]),
    }
}

fn encode_bind_request(req: &BindRequest) -> Vec<u8> {
    let mut content = ber::integer(req.version);
    content.extend_from_slice(&ber::octet_string(req.dn.as_bytes()));
    match &req.auth {
        AuthenticationChoice::Simple(password) => {
            content.extend_from_slice(&ber::tlv(ber::CLASS_CONTEXT, password.as_bytes()));
        }
        AuthenticationChoice::Sasl { mechanism } => {
            let sasl = ber::octet_string(mechanism.as_bytes());
            content.extend_from_slice(&ber::tlv(ber::CLASS_CONTEXT | CONSTRUCTED | 3, &sasl));
        }
    }
    ber::tlv(APP_BIND_REQUEST, &content)
}

fn encode_search_request(req: &SearchRequest) -> Vec<u8> {
    let mut content = ber::octet_string(req.base.as_bytes());
    let scope = match req.scope {
        SearchScope::BaseObject => 0,
        SearchScope::SingleLevel => 1,
        SearchScope::WholeSubtree => 2,
    };
    content.extend_from_slice(&ber::enumerated(scope));
    content.extend_from_slice(&ber::enumerated(0)); // derefAliases: never
    content.extend_from_slice(&ber::integer(req.size_limit as i64));
    content.extend_from_slice(&ber::integer(req.time_limit as i64));
    content.extend_from_slice(&ber::boolean(req.types_only));
    content.extend_from_slice(&req.filter.to_ber());
    let mut attrs = Vec::new();
    for attr in &req.attributes {
        attrs.extend_from_slice(&ber::octet_string(attr.as_bytes()));
    }
    content.extend_from_slice(&ber::tlv(ber::TAG_SEQUENCE, &attrs));
    ber::tlv(APP_SEARCH_REQUEST, &content)
}

fn encode_result(result: &LdapResult) -> Vec<u8> {
    let mut content = ber::enumerated(result.code.code() as i64);
    content.extend_from_slice(&ber::octet_string(result.matched_dn.as_bytes()));
    content.extend_from_slice(&ber::octet_string(result.message.as_bytes()));
    content
}

fn encode_entry(entry: &SearchResultEntry) -> Vec<u8> {
    let mut attr_list = Vec::new();
    for attr in &entry.attributes {
        let mut vals = Vec::new();
        for value in &attr.values {
            vals.extend_from_slice(&ber::octet_string(value));
        }
        let mut one = ber::octet_string(attr.name.as_bytes());
        one.extend_from_slice(&ber::tlv(ber::TAG_SET, &vals));
        attr_list.extend_from_slice(&ber::tlv(ber::TAG_SEQUENCE, &one));
    }
    let mut content = ber::octet_string(entry.dn.as_bytes());
    content.extend_from_slice(&ber::tlv(ber::TAG_SEQUENCE, &attr_list));
    ber::tlv(APP_SEARCH_RESULT_ENTRY, &content)
}

pub(crate) fn encode_controls(controls: &[Control]) -> Vec<u8> {
    let mut list = Vec::new();
    for control in controls {
        let mut one = ber::octet_string(control.oid.as_bytes());
        if control.criticality {
            one.extend_from_slice(&ber::boolean(true));
        }
        if let Some(value) = &control.value {
            one.extend_from_slice(&ber::octet_string(value));
        }
        list.extend_from_slice(&ber::tlv(ber::TAG_SEQUENCE, &one));
    }
    ber::tlv(TAG_CONTROLS, &list)
}
