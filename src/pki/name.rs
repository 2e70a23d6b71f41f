//! Distinguished names and general names used while matching CRLs against
//! certificates and distribution points.
//!
//! Attribute values are compared after case folding and whitespace
//! collapsing, an approximation of the RFC 5280 §7.1 matching rules that is
//! good enough for the directory strings found in CA names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::pki::crl::errors::{CrlError, CrlResult};

/// Short attribute names understood when parsing and rendering names.
const SHORT_NAMES: &[(&str, &str)] = &[
    ("CN", "2.5.4.3"),
    ("SERIALNUMBER", "2.5.4.5"),
    ("C", "2.5.4.6"),
    ("L", "2.5.4.7"),
    ("ST", "2.5.4.8"),
    ("STREET", "2.5.4.9"),
    ("O", "2.5.4.10"),
    ("OU", "2.5.4.11"),
    ("DC", "0.9.2342.19200300.100.1.25"),
    ("UID", "0.9.2342.19200300.100.1.1"),
    ("E", "1.2.840.113549.1.9.1"),
];

fn oid_for_short_name(name: &str) -> Option<&'static str> {
    let upper = name.to_ascii_uppercase();
    let upper = if upper == "EMAILADDRESS" { "E" } else { &upper };
    SHORT_NAMES
        .iter()
        .find(|(short, _)| *short == upper)
        .map(|(_, oid)| *oid)
}

fn short_name_for_oid(oid: &str) -> Option<&'static str> {
    SHORT_NAMES
        .iter()
        .find(|(_, known)| *known == oid)
        .map(|(short, _)| *short)
}

fn fold(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A single attribute type and value of a relative distinguished name.
#[derive(Debug, Clone)]
pub struct Attribute {
    oid: String,
    value: String,
    folded: String,
}

impl Attribute {
    pub fn new(oid: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        let folded = fold(&value);
        Self {
            oid: oid.into(),
            value,
            folded,
        }
    }

    /// Dotted representation of the attribute type.
    pub fn oid(&self) -> &str {
        &self.oid
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        self.oid == other.oid && self.folded == other.folded
    }
}

impl Eq for Attribute {}

impl Hash for Attribute {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.oid.hash(state);
        self.folded.hash(state);
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.value.replace(',', "\\,").replace('+', "\\+");
        match short_name_for_oid(&self.oid) {
            Some(short) => write!(f, "{short}={value}"),
            None => write!(f, "{}={value}", self.oid),
        }
    }
}

/// A relative distinguished name. Attributes form a set, so they are kept
/// sorted to make equality independent of encoding order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Rdn(Vec<Attribute>);

impl Rdn {
    pub fn new(mut attributes: Vec<Attribute>) -> Self {
        attributes.sort_by(|a, b| (&a.oid, &a.folded).cmp(&(&b.oid, &b.folded)));
        Self(attributes)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.0
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, attr) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("+")?;
            }
            write!(f, "{attr}")?;
        }
        Ok(())
    }
}

/// An X.500 distinguished name, RDNs in encoding order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DistinguishedName {
    rdns: Vec<Rdn>,
}

impl DistinguishedName {
    pub fn new(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// Returns a copy of this name with `rdn` appended as the least
    /// significant component, as required for nameRelativeToCRLIssuer.
    pub fn with_rdn(&self, rdn: &Rdn) -> Self {
        let mut rdns = self.rdns.clone();
        rdns.push(rdn.clone());
        Self { rdns }
    }
}

impl fmt::Display for DistinguishedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

/// Splits `input` on an unescaped `separator`, removing the escapes of
/// separator characters.
fn split_unescaped(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    if next != separator {
                        current.push('\\');
                    }
                    current.push(next);
                }
            }
            c if c == separator => parts.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    parts.push(current);
    parts
}

impl FromStr for DistinguishedName {
    type Err = CrlError;

    /// Parses a comma separated name such as `CN=Example CA, O=Acme, C=DE`.
    /// Components are taken in the order written, which is also the order
    /// used for display.
    fn from_str(s: &str) -> CrlResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let mut rdns = Vec::new();
        for component in split_unescaped(trimmed, ',') {
            let mut attributes = Vec::new();
            for part in split_unescaped(&component, '+') {
                let (key, value) = part.split_once('=').ok_or_else(|| {
                    CrlError::Configuration(format!("invalid distinguished name: {s}"))
                })?;
                let key = key.trim();
                let oid = match oid_for_short_name(key) {
                    Some(oid) => oid.to_string(),
                    None if key.chars().all(|c| c.is_ascii_digit() || c == '.') => {
                        key.to_string()
                    }
                    None => {
                        return Err(CrlError::Configuration(format!(
                            "unknown attribute type '{key}' in name: {s}"
                        )));
                    }
                };
                attributes.push(Attribute::new(oid, value.trim()));
            }
            rdns.push(Rdn::new(attributes));
        }
        Ok(Self { rdns })
    }
}

/// A GeneralName as used by distribution points and CRL issuers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GeneralName {
    DirectoryName(DistinguishedName),
    Uri(String),
    DnsName(String),
    Rfc822Name(String),
    IpAddress(Vec<u8>),
    /// otherName, ediPartyName and registeredID, kept only for display.
    Other(String),
}

impl GeneralName {
    pub fn as_directory_name(&self) -> Option<&DistinguishedName> {
        match self {
            GeneralName::DirectoryName(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_uri(&self) -> Option<&str> {
        match self {
            GeneralName::Uri(uri) => Some(uri),
            _ => None,
        }
    }
}

impl From<DistinguishedName> for GeneralName {
    fn from(name: DistinguishedName) -> Self {
        GeneralName::DirectoryName(name)
    }
}

impl fmt::Display for GeneralName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneralName::DirectoryName(name) => write!(f, "dirName:{name}"),
            GeneralName::Uri(uri) => write!(f, "URI:{uri}"),
            GeneralName::DnsName(dns) => write!(f, "DNS:{dns}"),
            GeneralName::Rfc822Name(email) => write!(f, "email:{email}"),
            GeneralName::IpAddress(ip) => write!(f, "IP:{}", hex::encode(ip)),
            GeneralName::Other(other) => f.write_str(other),
        }
    }
}

/// Returns the directory names contained in `names`.
pub fn directory_names(names: &[GeneralName]) -> impl Iterator<Item = &DistinguishedName> {
    names.iter().filter_map(GeneralName::as_directory_name)
}
