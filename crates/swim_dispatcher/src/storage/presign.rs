//! Presigned object URLs.
//!
//! `<base>/<tenant>/<bucket>?object=<key>&expires=<unix seconds>&signature=<hex>`
//!
//! The signature is a keyed BLAKE3 hash over tenant, bucket, key and expiry.

use super::ObjectStore;
use crate::error::{DispatchError, Result};
use crate::types::{Container, File};
use chrono::{DateTime, Duration, Utc};
use url::Url;

const KEY_CONTEXT: &str = "swim-dispatcher 2024 presigned object url";

/// Signs and verifies presigned URLs for one storage endpoint.
#[derive(Clone)]
pub struct UrlSigner {
    base: Url,
    key: [u8; 32],
    expiry: Duration,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base", &self.base.as_str())
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(base_url: &str, secret: &str, expiry_secs: u64) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            DispatchError::Config(format!("Invalid presign base URL '{}': {}", base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(DispatchError::Config(format!(
                "Presign base URL '{}' can't carry a path",
                base_url
            )));
        }
        let expiry_secs = i64::try_from(expiry_secs)
            .map_err(|_| DispatchError::Config("presign expiry out of range".to_string()))?;
        Ok(Self {
            base,
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            expiry: Duration::seconds(expiry_secs),
        })
    }

    /// Presigned URL for a file, valid for the configured expiry.
    pub fn presign(&self, file: &File) -> Result<String> {
        self.presign_at(file, Utc::now())
    }

    pub fn presign_at(&self, file: &File, now: DateTime<Utc>) -> Result<String> {
        let expires = (now + self.expiry).timestamp();
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DispatchError::PresignedUrl("base URL can't carry a path".to_string()))?
            .pop_if_empty()
            .push(&file.container.tenant)
            .push(&file.container.bucket);
        url.query_pairs_mut()
            .append_pair("object", &file.path)
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &self.sign(&file.container, &file.path, expires));
        Ok(url.into())
    }

    /// Resolve a presigned URL to the file it addresses. Fails when the
    /// signature is wrong, the URL expired, or the object doesn't exist.
    pub fn verify(&self, presigned_url: &str, store: &dyn ObjectStore) -> Result<File> {
        self.verify_at(presigned_url, store, Utc::now())
    }

    pub fn verify_at(
        &self,
        presigned_url: &str,
        store: &dyn ObjectStore,
        now: DateTime<Utc>,
    ) -> Result<File> {
        let file = self.parse_at(presigned_url, now)?;
        if !store.exists(&file)? {
            return Err(DispatchError::ObjectNotFound {
                bucket: file.container.to_string(),
                path: file.path,
            });
        }
        Ok(file)
    }

    /// Check signature and expiry without touching storage.
    fn parse_at(&self, presigned_url: &str, now: DateTime<Utc>) -> Result<File> {
        let invalid = |msg: &str| DispatchError::PresignedUrl(format!("{}: {}", msg, presigned_url));
        let url = Url::parse(presigned_url).map_err(|_| invalid("Malformed URL"))?;
        if url.origin() != self.base.origin() {
            return Err(invalid("Foreign storage endpoint"));
        }

        let base_segments: Vec<&str> = self
            .base
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).map(percent_decode).collect())
            .unwrap_or_default();
        if segments.len() != base_segments.len() + 2
            || segments.iter().zip(&base_segments).any(|(a, b)| a != &percent_decode(b))
        {
            return Err(invalid("Unexpected URL path"));
        }
        let container = Container::new(&segments[base_segments.len()], &segments[base_segments.len() + 1]);

        let mut object = None;
        let mut expires = None;
        let mut signature = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "object" => object = Some(value.into_owned()),
                "expires" => expires = value.parse::<i64>().ok(),
                "signature" => signature = blake3::Hash::from_hex(value.as_bytes()).ok(),
                _ => {}
            }
        }
        let (Some(object), Some(expires), Some(signature)) = (object, expires, signature) else {
            return Err(invalid("Missing presign parameters"));
        };

        let expected = self.signature(&container, &object, expires);
        // blake3::Hash equality is constant time
        if signature != expected {
            return Err(invalid("Invalid signature"));
        }
        if now.timestamp() > expires {
            return Err(invalid("Presigned URL expired"));
        }
        Ok(File::new(container, object, None))
    }

    fn signature(&self, container: &Container, object: &str, expires: i64) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new_keyed(&self.key);
        for part in [container.tenant.as_str(), container.bucket.as_str(), object] {
            hasher.update(part.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(expires.to_string().as_bytes());
        hasher.finalize()
    }

    fn sign(&self, container: &Container, object: &str, expires: i64) -> String {
        self.signature(container, object, expires).to_hex().to_string()
    }
}

fn percent_decode(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use crate::tags::TagSet;
    use chrono::TimeZone;

    fn signer() -> UrlSigner {
        UrlSigner::new("http://files.local/storage/", "secret", 3600).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn stored(path: &str) -> (MemoryObjectStore, File) {
        let store = MemoryObjectStore::new();
        let file = File::new(Container::new("tenant", "my bucket"), path, None);
        store.insert(&file, b"x", TagSet::new()).unwrap();
        (store, file)
    }

    #[test]
    fn test_presign_then_verify() {
        let (store, file) = stored("uc/inProcess/a b+c.pdf");
        let url = signer().presign_at(&file, now()).unwrap();
        assert!(url.starts_with("http://files.local/storage/tenant/my%20bucket?object="));

        let resolved = signer().verify_at(&url, &store, now()).unwrap();
        assert_eq!(resolved.container, file.container);
        assert_eq!(resolved.path, file.path);
    }

    #[test]
    fn test_expired_url_fails() {
        let (store, file) = stored("a.pdf");
        let url = signer().presign_at(&file, now()).unwrap();
        let later = now() + Duration::seconds(3601);
        let err = signer().verify_at(&url, &store, later).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_tampered_url_fails() {
        let (store, file) = stored("a.pdf");
        let url = signer().presign_at(&file, now()).unwrap();
        let tampered = url.replace("object=a.pdf", "object=b.pdf");
        assert!(signer().verify_at(&tampered, &store, now()).is_err());

        let other = UrlSigner::new("http://files.local/storage", "other", 3600).unwrap();
        assert!(other.verify_at(&url, &store, now()).is_err());
    }

    #[test]
    fn test_missing_object_fails() {
        let (store, _) = stored("a.pdf");
        let ghost = File::new(Container::new("tenant", "my bucket"), "ghost.pdf", None);
        let url = signer().presign_at(&ghost, now()).unwrap();
        assert!(matches!(
            signer().verify_at(&url, &store, now()),
            Err(DispatchError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_foreign_host_fails() {
        let (store, file) = stored("a.pdf");
        let url = signer().presign_at(&file, now()).unwrap();
        let foreign = url.replace("files.local", "evil.local");
        assert!(signer().verify_at(&foreign, &store, now()).is_err());
    }
}
