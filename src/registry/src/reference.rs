//! OCI image reference parsing.
//!
//! Parses image references like `ghcr.io/a/b:c@sha256:...` into structured
//! components. The default registry is `docker.io`; bare names like `nginx`
//! resolve to the `library` namespace there.

use watchz_core::{Result, WatchError};

use crate::digest::Digest;

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default namespace for single-segment Docker Hub references.
const DEFAULT_NAMESPACE: &str = "library";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Wire host for the canonical Docker Hub registry name.
const DOCKER_HUB_WIRE_HOST: &str = "registry-1.docker.io";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io", "localhost:5000")
    pub registry: String,
    /// Namespace below the registry; empty when the reference has none
    pub namespace: String,
    /// Repository name (e.g., "nginx", "sub/image")
    pub repository: String,
    /// Tag; defaults to "latest" when neither tag nor digest is present
    pub tag: Option<String>,
    /// Pinned digest, if the reference carries one
    pub digest: Option<Digest>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `localhost:5000/app` → localhost:5000/app:latest
    /// - `ghcr.io/org/image:tag@sha256:...` → fully qualified
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(WatchError::InvalidImageReference(
                "empty image reference".to_string(),
            ));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest_part)) => (name, Some(Digest::parse(digest_part)?)),
            None => (reference, None),
        };

        // Split tag. A colon inside the last path segment is a tag; for a
        // single-segment name any trailing colon is a tag (so `nginx:80`
        // parses as tag "80", while `registry:5000/app` does not).
        let (name, tag) = match name_tag.rfind('/') {
            Some(slash_pos) => {
                let after_slash = &name_tag[slash_pos + 1..];
                match after_slash.rfind(':') {
                    Some(colon_pos) => {
                        let tag = &after_slash[colon_pos + 1..];
                        let name = &name_tag[..slash_pos + 1 + colon_pos];
                        (name, Some(tag.to_string()))
                    }
                    None => (name_tag, None),
                }
            }
            None => match name_tag.rfind(':') {
                Some(colon_pos) => (
                    &name_tag[..colon_pos],
                    Some(name_tag[colon_pos + 1..].to_string()),
                ),
                None => (name_tag, None),
            },
        };

        if name.is_empty() {
            return Err(WatchError::InvalidImageReference(format!(
                "missing repository in '{reference}'"
            )));
        }
        if let Some(ref t) = tag {
            if t.is_empty() {
                return Err(WatchError::InvalidImageReference(format!(
                    "empty tag in '{reference}'"
                )));
            }
        }

        let (registry, namespace, repository) = split_name(name)?;

        // Apply default tag if no tag and no digest
        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            registry,
            namespace,
            repository,
            tag,
            digest,
        })
    }

    /// The path the registry knows this image by: `namespace/repository`,
    /// or just `repository` when there is no namespace.
    pub fn repository_path(&self) -> String {
        if self.namespace.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.namespace, self.repository)
        }
    }

    /// Registry host to dial: the canonical `docker.io` maps to
    /// `registry-1.docker.io`, everything else passes through.
    pub fn wire_registry(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_WIRE_HOST
        } else {
            &self.registry
        }
    }

    /// The manifest reference to request: pinned digest if present, else tag.
    pub fn manifest_reference(&self) -> String {
        if let Some(ref digest) = self.digest {
            digest.to_string()
        } else {
            self.tag.clone().unwrap_or_else(|| DEFAULT_TAG.to_string())
        }
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository_path());
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(&digest.to_string());
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Split a tagless name into (registry, namespace, repository).
///
/// One segment is a bare Docker Hub library image; two segments are
/// `registry/repo` when the first looks like a host (contains `.` or `:`,
/// or is `localhost`), else `namespace/repo` on Docker Hub; three or more
/// are `registry/namespace/rest`.
fn split_name(name: &str) -> Result<(String, String, String)> {
    let segments: Vec<&str> = name.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(WatchError::InvalidImageReference(format!(
            "empty path segment in '{name}'"
        )));
    }

    match segments.len() {
        1 => Ok((
            DEFAULT_REGISTRY.to_string(),
            DEFAULT_NAMESPACE.to_string(),
            segments[0].to_string(),
        )),
        2 => {
            if looks_like_registry(segments[0]) {
                Ok((
                    segments[0].to_string(),
                    String::new(),
                    segments[1].to_string(),
                ))
            } else {
                Ok((
                    DEFAULT_REGISTRY.to_string(),
                    segments[0].to_string(),
                    segments[1].to_string(),
                ))
            }
        }
        _ => Ok((
            segments[0].to_string(),
            segments[1].to_string(),
            segments[2..].join("/"),
        )),
    }
}

/// Whether a leading path segment names a registry host.
fn looks_like_registry(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_DIGEST: &str =
        "sha256:0000000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.namespace, "library");
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("nginx:1.21").unwrap();
        assert_eq!(r.repository_path(), "library/nginx");
        assert_eq!(r.tag, Some("1.21".to_string()));
    }

    #[test]
    fn test_parse_numeric_tag_single_segment() {
        // Single-segment branch treats any trailing colon as a tag
        let r = ImageReference::parse("nginx:80").unwrap();
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, Some("80".to_string()));
    }

    #[test]
    fn test_parse_user_repo() {
        let r = ImageReference::parse("myuser/myimage").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.namespace, "myuser");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.repository_path(), "myuser/myimage");
    }

    #[test]
    fn test_parse_localhost_with_port() {
        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.namespace, "");
        assert_eq!(r.repository, "app");
        assert_eq!(r.repository_path(), "app");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port_and_tag() {
        let r = ImageReference::parse("myregistry.io:5000/myimage:v1").unwrap();
        assert_eq!(r.registry, "myregistry.io:5000");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("ghcr.io/org/image:v0.1.0").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.namespace, "org");
        assert_eq!(r.repository, "image");
        assert_eq!(r.tag, Some("v0.1.0".to_string()));
    }

    #[test]
    fn test_parse_deep_repository_path() {
        let r = ImageReference::parse("ghcr.io/org/sub/image:v1").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.namespace, "org");
        assert_eq!(r.repository, "sub/image");
        assert_eq!(r.repository_path(), "org/sub/image");
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse(&format!("ghcr.io/o/r:v@{ZERO_DIGEST}")).unwrap();
        assert_eq!(r.tag, Some("v".to_string()));
        assert_eq!(r.digest.as_ref().unwrap().to_string(), ZERO_DIGEST);
    }

    #[test]
    fn test_parse_digest_only_has_no_default_tag() {
        let r = ImageReference::parse(&format!("ghcr.io/o/r@{ZERO_DIGEST}")).unwrap();
        assert_eq!(r.tag, None);
        assert!(r.digest.is_some());
        assert_eq!(r.manifest_reference(), ZERO_DIGEST);
    }

    #[test]
    fn test_parse_invalid_digest() {
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
        assert!(ImageReference::parse("nginx@sha256:dead").is_err());
    }

    #[test]
    fn test_parse_empty_reference() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
    }

    #[test]
    fn test_parse_empty_segment() {
        assert!(ImageReference::parse("ghcr.io//image").is_err());
    }

    #[test]
    fn test_wire_registry_docker_hub() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.wire_registry(), "registry-1.docker.io");
    }

    #[test]
    fn test_wire_registry_passthrough() {
        let r = ImageReference::parse("ghcr.io/org/image").unwrap();
        assert_eq!(r.wire_registry(), "ghcr.io");

        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.wire_registry(), "localhost:5000");
    }

    #[test]
    fn test_repository_path_in_repo_digest_form() {
        // repository_path must appear inside a well-formed RepoDigest
        for s in ["nginx", "myuser/myimage", "ghcr.io/org/image:v1"] {
            let r = ImageReference::parse(s).unwrap();
            let repo_digest = format!("{}/{}@{ZERO_DIGEST}", r.registry, r.repository_path());
            assert!(repo_digest.contains(&r.repository_path()));
        }
    }

    #[test]
    fn test_display_round_trip() {
        let r = ImageReference::parse("nginx:1.21").unwrap();
        assert_eq!(format!("{r}"), "docker.io/library/nginx:1.21");
    }

    #[test]
    fn test_whitespace_trimmed() {
        let r = ImageReference::parse("  nginx  ").unwrap();
        assert_eq!(r.repository, "nginx");
    }
}
