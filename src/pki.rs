pub mod cert;
pub mod crl;
pub mod name;
pub mod truststore;
pub mod x509;

// Re-export commonly used types
pub use cert::{CertId, CertificateView, PublicKey, SerialNumber};
pub use name::{DistinguishedName, GeneralName};
pub use truststore::{
    CertificationPath, MemoryCertStore, PathBuilder, StorePathBuilder, TrustAnchor,
    TrustAnchorSet,
};
pub use x509::{ParsedCertificate, ParsedCrl};
