//! Common types for the certward certificate manager.
//!
//! - [`domain`]: canonical domain sets and certificate names
//! - [`tags`]: the tag schema stored on certificate records
//! - [`ids`]: certificate store handles

pub mod domain;
pub mod ids;
pub mod tags;

pub use domain::{DomainSet, DomainSetError, NAME_SEPARATOR};
pub use ids::CertificateHandle;
pub use tags::{
    format_expiry, parse_expiry, CertificateTags, TagSchemaError, TAG_CREATED_BY,
    TAG_EXPIRES_AT, TAG_NAME,
};
