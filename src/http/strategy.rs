//! Fetch caching strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CacheError, Result};
use crate::http::{Fetcher, HttpCache, HttpRequest, HttpResponse};

/// How a fetch consults the cache and the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from cache; go to the network only on a miss.
    CacheFirst,
    /// Always try the network; fall back to the cache if it fails.
    NetworkFirst,
    /// Serve from cache and refresh in the background; wait on the network
    /// only on a miss.
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }

    /// Resolves `request` under this strategy, caching successful network
    /// responses under `key`.
    pub async fn execute<F: Fetcher>(
        self,
        cache: &HttpCache<F>,
        request: &HttpRequest,
        key: &str,
        ttl: Option<u64>,
    ) -> Result<HttpResponse> {
        match self {
            Strategy::CacheFirst => {
                if let Some(cached) = cache.cached(key).await {
                    return Ok(cached);
                }
                let response = cache.network(request).await?;
                cache.store(key, &response, ttl).await;
                Ok(response)
            }
            Strategy::NetworkFirst => match cache.network(request).await {
                Ok(response) => {
                    cache.store(key, &response, ttl).await;
                    Ok(response)
                }
                Err(err) => match cache.cached(key).await {
                    Some(cached) => {
                        warn!("Network failed for {}, serving cached copy: {}", request.url, err);
                        Ok(cached)
                    }
                    None => Err(err.into()),
                },
            },
            Strategy::StaleWhileRevalidate => {
                if let Some(cached) = cache.cached(key).await {
                    cache.revalidate(request.clone(), key.to_string(), ttl);
                    return Ok(cached);
                }
                let response = cache.network(request).await?;
                cache.store(key, &response, ttl).await;
                Ok(response)
            }
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cache-first" => Ok(Strategy::CacheFirst),
            "network-first" => Ok(Strategy::NetworkFirst),
            "stale-while-revalidate" => Ok(Strategy::StaleWhileRevalidate),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown caching strategy '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for strategy in [
            Strategy::CacheFirst,
            Strategy::NetworkFirst,
            Strategy::StaleWhileRevalidate,
        ] {
            assert_eq!(strategy.to_string().parse::<Strategy>().unwrap(), strategy);
        }
        assert_eq!(
            " Network-First ".parse::<Strategy>().unwrap(),
            Strategy::NetworkFirst
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert!(matches!(
            "cache-only".parse::<Strategy>(),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Strategy::StaleWhileRevalidate).unwrap(),
            "\"stale-while-revalidate\""
        );
    }
}
