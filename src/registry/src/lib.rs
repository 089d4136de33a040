//! Watchz Registry - OCI-distribution v2 client.
//!
//! This crate covers everything between the daemon and an image registry:
//!
//! - Image reference parsing (`ghcr.io/a/b:c@sha256:...`) and the digest
//!   model update detection compares with
//! - Manifest digest lookup over the OCI-distribution v2 API (HEAD, with a
//!   GET fallback), with bearer-token discovery via `WWW-Authenticate`
//! - Per-registry credentials from the engine's user config file
//! - A TTL'd token cache serializing refresh per (registry, repository,
//!   scope) so concurrent checks cause one token fetch

pub mod auth;
pub mod client;
pub mod credentials;
pub mod digest;
pub mod reference;

pub use auth::{AuthChallenge, TokenCache, TokenGrant};
pub use client::{CheckRequest, RegistryClient, UpdateCheck, UpdateSource};
pub use credentials::{Credential, CredentialStore};
pub use digest::{Digest, DigestAlgorithm};
pub use reference::ImageReference;
