use std::future::Future;
use std::time::Duration;

use moka::future::Cache;

use crate::error::AppError;
use crate::models::{ExtractedProduct, compute_hash};
use crate::traits::Structurer;

/// Memoizes successful structuring results per (url, cleaned text).
///
/// Failures are never cached, so a transient model error is retried on the
/// next request instead of being replayed.
#[derive(Clone)]
pub struct CachedStructurer<S> {
    inner: S,
    cache: Cache<String, ExtractedProduct>,
}

impl<S: Structurer> CachedStructurer<S> {
    pub fn new(inner: S, capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }

    fn key(cleaned_text: &str, url: &str, hint: &str) -> String {
        compute_hash(&format!("{url}\n{hint}\n{cleaned_text}"))
    }

    async fn lookup(
        &self,
        key: String,
        url: &str,
        miss: impl Future<Output = Result<ExtractedProduct, AppError>>,
    ) -> Result<ExtractedProduct, AppError> {
        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(%url, "Structuring cache hit");
            return Ok(hit);
        }

        let product = miss.await?;
        self.cache.insert(key, product.clone()).await;
        Ok(product)
    }
}

impl<S: Structurer> Structurer for CachedStructurer<S> {
    async fn structure(&self, cleaned_text: &str, url: &str) -> Result<ExtractedProduct, AppError> {
        let key = Self::key(cleaned_text, url, "");
        self.lookup(key, url, self.inner.structure(cleaned_text, url)).await
    }

    async fn structure_with_hint(
        &self,
        cleaned_text: &str,
        url: &str,
        hint: &str,
    ) -> Result<ExtractedProduct, AppError> {
        let key = Self::key(cleaned_text, url, hint);
        self.lookup(
            key,
            url,
            self.inner.structure_with_hint(cleaned_text, url, hint),
        )
        .await
    }
}
