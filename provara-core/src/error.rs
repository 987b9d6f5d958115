//! The single error type shared by every Provara crate.
//!
//! Each integrity failure maps to a stable `PROVARA_E…` code and the section
//! of the protocol specification whose invariant it enforces. Tooling prints
//! the structured form `{code, message, context, doc_url}` on stderr.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur in Provara operations.
#[derive(Debug, Error)]
pub enum ProvaraError {
    #[error("content hash does not match: {context}")]
    HashMismatch { context: String },

    #[error("causal chain broken: {context}")]
    BrokenCausalChain { context: String },

    #[error("signature verification failed: {context}")]
    InvalidSignature { context: String },

    #[error("malformed hash or identifier: {context}")]
    HashFormat { context: String },

    #[error("key cannot be used for verification: {context}")]
    KeyNotFound { context: String },

    #[error("key id is not in the registry: {context}")]
    UnknownKeyId { context: String },

    #[error("required field missing: {context}")]
    RequiredFieldMissing { context: String },

    #[error("vault structure invalid: {context}")]
    VaultStructureInvalid { context: String },

    #[error("duplicate event id: {context}")]
    DuplicateEventId { context: String },

    #[error("causal fork detected: {context}")]
    ForkDetected { context: String },

    #[error("namespace is not recognized: {context}")]
    NamespaceMismatch { context: String },

    #[error("a key may not revoke itself: {context}")]
    SelfRevocation { context: String },

    #[error("vault is sealed and refuses appends: {context}")]
    VaultSealed { context: String },

    #[error("path escapes the vault root: {context}")]
    PathUnsafe { context: String },

    #[error("cryptographic operation failed: {context}")]
    Crypto { context: String },

    #[error("encoding failed: {context}")]
    Encoding { context: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("canonicalization error: {0}")]
    Canonical(#[from] jcs_rs::CanonicalizeError),
}

impl ProvaraError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ProvaraError::HashMismatch { .. } => "PROVARA_E_HASH_MISMATCH",
            ProvaraError::BrokenCausalChain { .. } => "PROVARA_E_BROKEN_CAUSAL_CHAIN",
            ProvaraError::InvalidSignature { .. } => "PROVARA_E_INVALID_SIGNATURE",
            ProvaraError::HashFormat { .. } => "PROVARA_E_HASH_FORMAT",
            ProvaraError::KeyNotFound { .. } => "PROVARA_E_KEY_NOT_FOUND",
            ProvaraError::UnknownKeyId { .. } => "PROVARA_E_UNKNOWN_KEY_ID",
            ProvaraError::RequiredFieldMissing { .. } => "PROVARA_E_REQUIRED_FIELD_MISSING",
            ProvaraError::VaultStructureInvalid { .. } => "PROVARA_E_VAULT_STRUCTURE_INVALID",
            ProvaraError::DuplicateEventId { .. } => "PROVARA_E_DUPLICATE_EVENT_ID",
            ProvaraError::ForkDetected { .. } => "PROVARA_E_FORK_DETECTED",
            ProvaraError::NamespaceMismatch { .. } => "PROVARA_E_NAMESPACE_MISMATCH",
            ProvaraError::SelfRevocation { .. } => "PROVARA_E_SELF_REVOCATION",
            ProvaraError::VaultSealed { .. } => "PROVARA_E_VAULT_SEALED",
            ProvaraError::PathUnsafe { .. } => "PROVARA_E_PATH_UNSAFE",
            ProvaraError::Crypto { .. } => "PROVARA_E_CRYPTO",
            ProvaraError::Encoding { .. } => "PROVARA_E_ENCODING",
            ProvaraError::Io(_) => "PROVARA_E_IO",
            ProvaraError::Json(_) | ProvaraError::Canonical(_) => "PROVARA_E_SERIALIZATION",
        }
    }

    /// Section of the protocol specification whose invariant was violated.
    pub fn spec_section(&self) -> &'static str {
        match self {
            ProvaraError::HashMismatch { .. } | ProvaraError::HashFormat { .. } => "4.B",
            ProvaraError::InvalidSignature { .. } | ProvaraError::Crypto { .. } => "4.C",
            ProvaraError::BrokenCausalChain { .. }
            | ProvaraError::RequiredFieldMissing { .. }
            | ProvaraError::DuplicateEventId { .. }
            | ProvaraError::NamespaceMismatch { .. } => "4.D",
            ProvaraError::KeyNotFound { .. } | ProvaraError::UnknownKeyId { .. } => "4.E",
            ProvaraError::VaultStructureInvalid { .. } | ProvaraError::PathUnsafe { .. } => "4.G",
            ProvaraError::ForkDetected { .. } => "4.I",
            ProvaraError::SelfRevocation { .. } | ProvaraError::VaultSealed { .. } => "4.J",
            ProvaraError::Encoding { .. }
            | ProvaraError::Io(_)
            | ProvaraError::Json(_)
            | ProvaraError::Canonical(_) => "4.A",
        }
    }

    /// Documentation URL for the error code.
    pub fn doc_url(&self) -> String {
        format!("https://provara.dev/errors/{}", self.code())
    }

    /// Context string carried by domain variants, if any.
    pub fn context(&self) -> Option<&str> {
        match self {
            ProvaraError::HashMismatch { context }
            | ProvaraError::BrokenCausalChain { context }
            | ProvaraError::InvalidSignature { context }
            | ProvaraError::HashFormat { context }
            | ProvaraError::KeyNotFound { context }
            | ProvaraError::UnknownKeyId { context }
            | ProvaraError::RequiredFieldMissing { context }
            | ProvaraError::VaultStructureInvalid { context }
            | ProvaraError::DuplicateEventId { context }
            | ProvaraError::ForkDetected { context }
            | ProvaraError::NamespaceMismatch { context }
            | ProvaraError::SelfRevocation { context }
            | ProvaraError::VaultSealed { context }
            | ProvaraError::PathUnsafe { context }
            | ProvaraError::Crypto { context }
            | ProvaraError::Encoding { context } => Some(context),
            _ => None,
        }
    }

    /// Structured form written to stderr by the CLI.
    pub fn to_structured(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "context": self.context().unwrap_or_default(),
            "doc_url": self.doc_url(),
        })
    }
}

/// Shorthand used throughout the workspace.
pub type Result<T> = std::result::Result<T, ProvaraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_carry_provara_prefix() {
        let errors = [
            ProvaraError::HashMismatch { context: "c".into() },
            ProvaraError::BrokenCausalChain { context: "c".into() },
            ProvaraError::InvalidSignature { context: "c".into() },
            ProvaraError::SelfRevocation { context: "c".into() },
            ProvaraError::VaultSealed { context: "c".into() },
            ProvaraError::PathUnsafe { context: "c".into() },
        ];
        for err in errors {
            assert!(err.code().starts_with("PROVARA_E"));
            assert!(err.doc_url().contains(err.code()));
            assert_eq!(err.context(), Some("c"));
        }
    }

    #[test]
    fn structured_form_has_all_fields() {
        let err = ProvaraError::DuplicateEventId { context: "evt_abc".into() };
        let s = err.to_structured();
        assert_eq!(s["code"], "PROVARA_E_DUPLICATE_EVENT_ID");
        assert_eq!(s["context"], "evt_abc");
        assert!(s["message"].as_str().unwrap().contains("evt_abc"));
        assert!(s["doc_url"].as_str().unwrap().starts_with("https://provara.dev/errors/"));
    }
}
