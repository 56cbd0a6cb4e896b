use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::database::Database;
use crate::error::ApiError;
use crate::models::{ApiKey, PlanType, TenantContext};
use crate::store::{auth_cache_key, ScoreStore};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const PROJECT_ID_HEADER: &str = "x-project-id";
pub const PLAN_TYPE_HEADER: &str = "x-plan-type";

const KEY_PREFIX: &str = "ak_";
const KEY_LENGTH: usize = 64;

/// Outcome of a key validation, also the shape cached in the shared store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<PlanType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl Validation {
    fn invalid() -> Self {
        Self {
            valid: false,
            tenant_id: None,
            project_id: None,
            plan_type: None,
            key_id: None,
        }
    }
}

/// API-key lifecycle and validation with a bounded-TTL positive cache.
#[derive(Debug, Clone)]
pub struct AuthService {
    database: Database,
    store: ScoreStore,
    cache_ttl_secs: u64,
}

impl AuthService {
    pub fn new(database: Database, store: ScoreStore, cache_ttl_secs: u64) -> Self {
        Self {
            database,
            store,
            cache_ttl_secs,
        }
    }

    /// Generate key material from a CSPRNG: 64 URL-safe chars (> 256 bits).
    pub fn generate_api_key() -> String {
        use rand::Rng;
        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

        let mut rng = rand::thread_rng();
        let key: String = (0..KEY_LENGTH)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect();

        format!("{KEY_PREFIX}{key}")
    }

    /// Indexed lookup hash (sha256 hex). Not a secret by itself; the bcrypt
    /// hash is what authenticates.
    pub fn lookup_hash(plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(plaintext.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Cache key prefix: first 16 hex chars of the lookup hash.
    pub fn cache_prefix(lookup_hash: &str) -> &str {
        &lookup_hash[..16.min(lookup_hash.len())]
    }

    pub fn storage_hash(plaintext: &str) -> Result<String, ApiError> {
        hash(plaintext, DEFAULT_COST)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("key hashing failed: {e}")))
    }

    /// Create a key; the plaintext is returned exactly once.
    pub async fn create_api_key(
        &self,
        project_id: String,
        name: String,
    ) -> Result<(String, ApiKey), ApiError> {
        let plaintext = Self::generate_api_key();
        let key = ApiKey::new(
            project_id,
            name,
            Self::storage_hash(&plaintext)?,
            Self::lookup_hash(&plaintext),
        );

        self.database.create_api_key(&key).await?;
        info!("Created API key {} for project {}", key.id, key.project_id);
        Ok((plaintext, key))
    }

    /// Rotation keeps exactly one usable key per logical credential:
    /// revoke the old id, mint a fresh key under the same project and name.
    pub async fn rotate_api_key(&self, key_id: &str) -> Result<(String, ApiKey), ApiError> {
        let old = self
            .database
            .get_api_key(key_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("api key not found: {key_id}")))?;

        self.revoke_api_key(key_id).await?;
        let (plaintext, key) = self.create_api_key(old.project_id, old.name).await?;
        info!("Rotated API key {} -> {}", key_id, key.id);
        Ok((plaintext, key))
    }

    pub async fn revoke_api_key(&self, key_id: &str) -> Result<(), ApiError> {
        let lookup_hash = self
            .database
            .revoke_api_key(key_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("api key not found: {key_id}")))?;

        // Revocation must drop the cached positive validation, otherwise the
        // key stays live until the cache TTL runs out.
        let cache_key = auth_cache_key(Self::cache_prefix(&lookup_hash));
        if let Err(e) = self.store.invalidate_auth(&cache_key).await {
            warn!("Failed to invalidate auth cache for revoked key {key_id}: {e}");
        }

        info!("Revoked API key {}", key_id);
        Ok(())
    }

    pub async fn list_api_keys(&self, project_id: &str) -> Result<Vec<ApiKey>, ApiError> {
        Ok(self.database.list_api_keys(project_id).await?)
    }

    /// Validate a plaintext key. Positive results are cached under the hash
    /// prefix for a bounded TTL; negative results are never cached so
    /// revocation takes effect within one cache lifetime.
    pub async fn validate_api_key(&self, plaintext: &str) -> Result<Validation, ApiError> {
        if !plaintext.starts_with(KEY_PREFIX) || plaintext.len() != KEY_PREFIX.len() + KEY_LENGTH {
            return Ok(Validation::invalid());
        }

        let lookup = Self::lookup_hash(plaintext);
        let cache_key = auth_cache_key(Self::cache_prefix(&lookup));

        match self.store.get_cached_auth(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(validation) = serde_json::from_str::<Validation>(&cached) {
                    debug!("Auth cache hit for key {:?}", validation.key_id);
                    return Ok(validation);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Auth cache read failed, falling through to database: {e}"),
        }

        let Some((key, tenant_id)) = self.database.get_usable_key_by_lookup_hash(&lookup).await?
        else {
            return Ok(Validation::invalid());
        };

        // Constant-time comparison of the plaintext against the stored hash.
        let verified = verify(plaintext, &key.key_hash)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("key verification failed: {e}")))?;
        if !verified {
            return Ok(Validation::invalid());
        }

        let plan_type = self
            .database
            .get_active_subscription(&tenant_id)
            .await?
            .map(|sub| sub.plan_type)
            .unwrap_or(PlanType::Free);

        if let Err(e) = self.database.touch_api_key(&key.id).await {
            warn!("Failed to update last_used_at for key {}: {e}", key.id);
        }

        let validation = Validation {
            valid: true,
            tenant_id: Some(tenant_id),
            project_id: Some(key.project_id),
            plan_type: Some(plan_type),
            key_id: Some(key.id),
        };

        if let Ok(payload) = serde_json::to_string(&validation) {
            if let Err(e) = self
                .store
                .cache_auth(&cache_key, &payload, self.cache_ttl_secs)
                .await
            {
                warn!("Failed to cache auth result: {e}");
            }
        }

        Ok(validation)
    }
}

pub fn extract_api_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(API_KEY_HEADER)
        .ok_or_else(|| ApiError::Unauthenticated("missing API key".to_string()))?
        .to_str()
        .map_err(|_| ApiError::Unauthenticated("malformed API key".to_string()))
}

/// Gateway auth middleware: resolve the key, install the tenant context as a
/// request extension, and mirror it into headers for downstream components.
pub async fn api_key_middleware(
    State(auth): State<AuthService>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let plaintext = extract_api_key(request.headers())?.to_string();

    let validation = auth.validate_api_key(&plaintext).await?;
    if !validation.valid {
        return Err(ApiError::Unauthenticated("invalid or revoked API key".to_string()));
    }

    let context = TenantContext {
        tenant_id: validation.tenant_id.unwrap_or_default(),
        project_id: validation.project_id.unwrap_or_default(),
        plan_type: validation.plan_type.unwrap_or(PlanType::Free),
        key_id: validation.key_id.unwrap_or_default(),
    };

    let headers = request.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&context.tenant_id) {
        headers.insert(HeaderName::from_static(TENANT_ID_HEADER), v);
    }
    if let Ok(v) = HeaderValue::from_str(&context.project_id) {
        headers.insert(HeaderName::from_static(PROJECT_ID_HEADER), v);
    }
    headers.insert(
        HeaderName::from_static(PLAN_TYPE_HEADER),
        HeaderValue::from_static(context.plan_type.as_str()),
    );

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Internal-plane guard. These routes must not be reachable without the
/// shared secret.
pub async fn internal_secret_middleware(
    State(secret): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    // Length-insensitive constant-time equality.
    let mut diff = (provided.len() ^ secret.len()) as u8;
    for (a, b) in provided.bytes().zip(secret.bytes()) {
        diff |= a ^ b;
    }
    if diff != 0 {
        return Err(ApiError::Forbidden("internal secret mismatch".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_prefix_and_length() {
        let key = AuthService::generate_api_key();
        assert!(key.starts_with("ak_"));
        assert_eq!(key.len(), 3 + 64);
    }

    #[test]
    fn generated_keys_are_unique() {
        let a = AuthService::generate_api_key();
        let b = AuthService::generate_api_key();
        assert_ne!(a, b);
    }

    #[test]
    fn lookup_hash_is_hex_sha256() {
        let hash = AuthService::lookup_hash("ak_test");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic so lookups and cache invalidation agree.
        assert_eq!(hash, AuthService::lookup_hash("ak_test"));
    }

    #[test]
    fn cache_prefix_is_16_chars() {
        let hash = AuthService::lookup_hash("ak_test");
        assert_eq!(AuthService::cache_prefix(&hash).len(), 16);
    }

    #[test]
    fn storage_hash_verifies_only_the_original() {
        let key = AuthService::generate_api_key();
        let stored = AuthService::storage_hash(&key).unwrap();
        assert!(verify(&key, &stored).unwrap());
        assert!(!verify("ak_wrong", &stored).unwrap());
    }
}
