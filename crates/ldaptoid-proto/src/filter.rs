//! Search filter algebra with BER parse/serialize.
//!
//! Filter CHOICE tags are CONTEXT class per RFC 4511, but the parser matches
//! on tag number and constructed bit only, so APPLICATION-class encodings
//! from sloppy client stacks decode the same way.

use crate::ber::{self, Reader, CONSTRUCTED, TAG_NUMBER_MASK};
use crate::error::{ProtoError, ProtoResult};

const CTX: u8 = ber::CLASS_CONTEXT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality { attribute: String, value: String },
    Substrings(SubstringFilter),
    GreaterOrEqual { attribute: String, value: String },
    LessOrEqual { attribute: String, value: String },
    Present(String),
    Approx { attribute: String, value: String },
    /// extensibleMatch; the server answers `unwillingToPerform`.
    Extensible,
    /// A tag number outside the defined filter space. Evaluates to false.
    Unrecognized { tag: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubstringFilter {
    pub attribute: String,
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub r#final: Option<String>,
}

impl Filter {
    /// True when any node in the tree is an extensibleMatch, which the
    /// executor rejects wholesale rather than evaluating around.
    pub fn contains_extensible(&self) -> bool {
        match self {
            Filter::And(children) | Filter::Or(children) => {
                children.iter().any(Filter::contains_extensible)
            }
            Filter::Not(child) => child.contains_extensible(),
            Filter::Extensible => true,
            _ => false,
        }
    }

    pub fn parse(tag: u8, content: &[u8]) -> ProtoResult<Filter> {
        let number = tag & TAG_NUMBER_MASK;
        let constructed = tag & CONSTRUCTED != 0;
        match (number, constructed) {
            (0, true) => Ok(Filter::And(Self::parse_set(content)?)),
            (1, true) => Ok(Filter::Or(Self::parse_set(content)?)),
            (2, true) => {
                let mut reader = Reader::new(content);
                let (inner_tag, inner_content) = reader.read_element()?;
                Ok(Filter::Not(Box::new(Self::parse(inner_tag, inner_content)?)))
            }
            (3, true) => Self::parse_ava(content, |attribute, value| Filter::Equality {
                attribute,
                value,
            }),
            (4, true) => Self::parse_substrings(content).map(Filter::Substrings),
            (5, true) => Self::parse_ava(content, |attribute, value| Filter::GreaterOrEqual {
                attribute,
                value,
            }),
            (6, true) => Self::parse_ava(content, |attribute, value| Filter::LessOrEqual {
                attribute,
                value,
            }),
            (7, false) => Ok(Filter::Present(
                String::from_utf8_lossy(content).into_owned(),
            )),
            (8, true) => Self::parse_ava(content, |attribute, value| Filter::Approx {
                attribute,
                value,
            }),
            (9, true) => Ok(Filter::Extensible),
            _ => Ok(Filter::Unrecognized { tag }),
        }
    }

    fn parse_set(content: &[u8]) -> ProtoResult<Vec<Filter>> {
        let mut reader = Reader::new(content);
        let mut filters = Vec::new();
        while !reader.is_empty() {
            let (tag, inner) = reader.read_element()?;
            filters.push(Self::parse(tag, inner)?);
        }
        if filters.is_empty() {
            return Err(ProtoError::Malformed("empty filter set"));
        }
        Ok(filters)
    }

    fn parse_ava(
        content: &[u8],
        build: impl FnOnce(String, String) -> Filter,
    ) -> ProtoResult<Filter> {
        let mut reader = Reader::new(content);
        let attribute = reader.read_string()?;
        let value = reader.read_string()?;
        Ok(build(attribute, value))
    }

    fn parse_substrings(content: &[u8]) -> ProtoResult<SubstringFilter> {
        let mut reader = Reader::new(content);
        let attribute = reader.read_string()?;
        let parts = reader.expect(ber::TAG_SEQUENCE)?;
        let mut parts_reader = Reader::new(parts);
        let mut filter = SubstringFilter {
            attribute,
            ..Default::default()
        };
        let mut seen_any = false;
        while !parts_reader.is_empty() {
            let (tag, part) = parts_reader.read_element()?;
            let text = String::from_utf8_lossy(part).into_owned();
            match tag & TAG_NUMBER_MASK {
                0 if filter.initial.is_none() && !seen_any && filter.r#final.is_none() => {
                    filter.initial = Some(text);
                }
                1 if filter.r#final.is_none() => {
                    seen_any = true;
                    filter.any.push(text);
                }
                2 if filter.r#final.is_none() => filter.r#final = Some(text),
                _ => return Err(ProtoError::Malformed("substring sequence")),
            }
        }
        if filter.initial.is_none() && filter.any.is_empty() && filter.r#final.is_none() {
            return Err(ProtoError::Malformed("empty substring filter"));
        }
        Ok(filter)
    }

    pub fn to_ber(&self) -> Vec<u8> {
        match self {
            Filter::And(children) => ber::tlv(CTX | CONSTRUCTED, &Self::set_content(children)),
            Filter::Or(children) => ber::tlv(CTX | CONSTRUCTED | 1, &Self::set_content(children)),
            Filter::Not(child) => ber::tlv(CTX | CONSTRUCTED | 2, &child.to_ber()),
            Filter::Equality { attribute, value } => {
                ber::tlv(CTX | CONSTRUCTED | 3, &Self::ava_content(attribute, value))
            }
            Filter::Substrings(sub) => ber::tlv(CTX | CONSTRUCTED | 4, &sub.to_ber_content()),
            Filter::GreaterOrEqual { attribute, value } => {
                ber::tlv(CTX | CONSTRUCTED | 5, &Self::ava_content(attribute, value))
            }
            Filter::LessOrEqual { attribute, value } => {
                ber::tlv(CTX | CONSTRUCTED | 6, &Self::ava_content(attribute, value))
            }
            Filter::Present(attribute) => ber::tlv(CTX | 7, attribute.as_bytes()),
            Filter::Approx { attribute, value } => {
                ber::tlv(CTX | CONSTRUCTED | 8, &Self::ava_content(attribute, value))
            }
            Filter::Extensible => ber::tlv(CTX | CONSTRUCTED | 9, &[]),
            Filter::Unrecognized { tag } => ber::tlv(*tag, &[]),
        }
    }

    fn set_content(children: &[Filter]) -> Vec<u8> {
        let mut out = Vec::new();
        for child in children {
            out.extend_from_slice(&child.to_ber());
        }
        out
    }

    fn ava_content(attribute: &str, value: &str) -> Vec<u8> {
        let mut out = ber::octet_string(attribute.as_bytes());
        out.extend_from_slice(&ber::octet_string(value.as_bytes()));
        out
    }
}

impl SubstringFilter {
    fn to_ber_content(&self) -> Vec<u8> {
        let mut parts = Vec::new();
        if let Some(initial) = &self.initial {
            parts.extend_from_slice(&ber::tlv(CTX, initial.as_bytes()));
        }
        for any in &self.any {
            parts.extend_from_slice(&ber::tlv(CTX | 1, any.as_bytes()));
        }
        if let Some(r#final) = &self.r#final {
            parts.extend_from_slice(&ber::tlv(CTX | 2, r#final.as_bytes()));
        }
        let mut out = ber::octet_string(self.attribute.as_bytes());
        out.extend_from_slice(&ber::tlv(ber::TAG_SEQUENCE, &parts));
        out
    }
}
