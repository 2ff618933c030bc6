use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::application::render::RenderPipeline;

use super::rate_limit::ApiRateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<RenderPipeline>,
    pub rate_limiter: Arc<ApiRateLimiter>,
    pub api_key: ApiKeyGuard,
    /// Expose error source chains in response bodies.
    pub debug_errors: bool,
}

/// Shared-secret check for the render routes. Only a digest of the key is kept.
#[derive(Clone, Default)]
pub struct ApiKeyGuard {
    digest: Option<[u8; 32]>,
}

impl ApiKeyGuard {
    pub fn new(key: Option<&str>) -> Self {
        Self {
            digest: key.map(digest),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    pub fn verify(&self, candidate: &str) -> bool {
        match &self.digest {
            Some(expected) => expected[..].ct_eq(&digest(candidate)[..]).unwrap_u8() == 1,
            None => true,
        }
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(Sha256::digest(value.as_bytes()).as_slice());
    out
}
