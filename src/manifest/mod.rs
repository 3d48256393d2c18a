//! Manifest decoding and resource identity.
//!
//! A manifest is plain YAML text owned by the editor. This module extracts
//! the identity fields the engine needs (apiVersion, kind, metadata) and
//! writes the server-assigned `resourceVersion` back into manifest text. It
//! never interprets the rest of the document.

mod codec;
mod identity;

pub use codec::*;
pub use identity::*;
