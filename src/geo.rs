//! IP geolocation boundary
//!
//! The core only consumes locations; real providers live outside the crate
//! and plug in through [`GeoLocator`].

use crate::error::SessionError;
use crate::models::SessionLocation;
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves a client IP to a coarse location and reputation flags
#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// `Ok(None)` when the IP is not known to the provider
    async fn resolve(&self, ip: &str) -> Result<Option<SessionLocation>, SessionError>;
}

/// Locator that never knows anything; the default when tracking is unused
#[derive(Debug, Default, Clone, Copy)]
pub struct NullGeoLocator;

#[async_trait]
impl GeoLocator for NullGeoLocator {
    async fn resolve(&self, _ip: &str) -> Result<Option<SessionLocation>, SessionError> {
        Ok(None)
    }
}

/// Locator backed by a fixed, caller-supplied table
#[derive(Debug, Default, Clone)]
pub struct StaticGeoLocator {
    entries: HashMap<String, SessionLocation>,
}

impl StaticGeoLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, ip: impl Into<String>, location: SessionLocation) -> Self {
        self.entries.insert(ip.into(), location);
        self
    }
}

#[async_trait]
impl GeoLocator for StaticGeoLocator {
    async fn resolve(&self, ip: &str) -> Result<Option<SessionLocation>, SessionError> {
        Ok(self.entries.get(ip).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_locator_resolves_nothing() {
        assert!(NullGeoLocator.resolve("8.8.8.8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_locator_lookup() {
        let locator = StaticGeoLocator::new()
            .with_entry("10.0.0.1", SessionLocation::new("BR").with_city("Curitiba"));

        let found = locator.resolve("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(found.city.as_deref(), Some("Curitiba"));
        assert!(locator.resolve("10.0.0.2").await.unwrap().is_none());
    }
}
