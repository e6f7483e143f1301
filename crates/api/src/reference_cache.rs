//! Cached reference lists (budget domains and types)

use cache::{CacheStatus, TtlCache};
use std::time::Duration;
use storage::{BudgetDomain, BudgetType, Repository, StorageError};
use tracing::warn;
use uuid::Uuid;

pub const DOMAINS: &str = "budget-domains";
pub const TYPES: &str = "budget-types";

/// Payload of one cache namespace
#[derive(Debug, Clone)]
pub enum ReferenceData {
    Domains(Vec<BudgetDomain>),
    Types(Vec<BudgetType>),
}

/// Per-organization read-through cache in front of the repository.
///
/// Keys are `"<organization id>:<namespace>"`.
pub struct ReferenceCache {
    inner: TtlCache<ReferenceData>,
}

impl ReferenceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new(ttl),
        }
    }

    pub fn key(organization_id: Uuid, namespace: &str) -> String {
        format!("{}:{}", organization_id, namespace)
    }

    /// `Cache-Control` value matching the in-memory TTL
    pub fn cache_control(&self) -> String {
        format!("private, max-age={}", self.inner.ttl().as_secs())
    }

    pub fn domains(&self, repository: &Repository, organization_id: Uuid) -> Result<Vec<BudgetDomain>, StorageError> {
        self.lookup(
            organization_id,
            DOMAINS,
            || Ok(ReferenceData::Domains(repository.list::<BudgetDomain>(organization_id)?)),
            |data| match data {
                ReferenceData::Domains(domains) => Some(domains),
                _ => None,
            },
        )
    }

    pub fn types(&self, repository: &Repository, organization_id: Uuid) -> Result<Vec<BudgetType>, StorageError> {
        self.lookup(
            organization_id,
            TYPES,
            || Ok(ReferenceData::Types(repository.list::<BudgetType>(organization_id)?)),
            |data| match data {
                ReferenceData::Types(types) => Some(types),
                _ => None,
            },
        )
    }

    /// Drop every cached list of one organization
    pub fn invalidate_organization(&self, organization_id: Uuid) -> usize {
        self.inner.clear(&format!("{}:", organization_id))
    }

    pub fn clear_all(&self) -> usize {
        self.inner.clear_all()
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn lookup<T>(
        &self,
        organization_id: Uuid,
        namespace: &'static str,
        load: impl Fn() -> Result<ReferenceData, StorageError>,
        pick: fn(ReferenceData) -> Option<T>,
    ) -> Result<T, StorageError> {
        let key = Self::key(organization_id, namespace);
        let (data, status) = self.inner.get_or_load(&key, &load)?;
        record(namespace, status);

        if let Some(value) = pick(data) {
            return Ok(value);
        }

        warn!("Cache entry {} held another namespace, reloading", key);
        let data = load()?;
        self.inner.set(key, data.clone());
        pick(data).ok_or_else(|| StorageError::DatabaseError(format!("unexpected payload for {}", namespace)))
    }
}

fn record(namespace: &'static str, status: CacheStatus) {
    match status {
        CacheStatus::Hit => metrics::counter!("budget_cache_hits_total", "namespace" => namespace).increment(1),
        CacheStatus::Miss => metrics::counter!("budget_cache_misses_total", "namespace" => namespace).increment(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::Repository;

    fn setup() -> (Repository, Uuid) {
        let repo = Repository::new();
        let owner = repo.create_user("owner@example.org", "Owner").unwrap();
        let (org, _) = repo.create_organization("Mairie", owner.id).unwrap();
        (repo, org.id)
    }

    fn domain(org: Uuid, name: &str) -> BudgetDomain {
        BudgetDomain {
            id: Uuid::new_v4(),
            organization_id: org,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_served_from_cache_until_invalidated() {
        let (repo, org) = setup();
        let cache = ReferenceCache::new(Duration::from_secs(60));
        repo.insert(domain(org, "Informatique")).unwrap();

        assert_eq!(cache.domains(&repo, org).unwrap().len(), 1);

        repo.insert(domain(org, "Batiments")).unwrap();
        assert_eq!(cache.domains(&repo, org).unwrap().len(), 1);

        assert_eq!(cache.invalidate_organization(org), 1);
        assert_eq!(cache.domains(&repo, org).unwrap().len(), 2);
    }

    #[test]
    fn test_namespaces_are_separate() {
        let (repo, org) = setup();
        let cache = ReferenceCache::new(Duration::from_secs(60));
        repo.insert(domain(org, "Informatique")).unwrap();

        assert_eq!(cache.domains(&repo, org).unwrap().len(), 1);
        assert!(cache.types(&repo, org).unwrap().is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidation_is_per_organization() {
        let (repo, org) = setup();
        let other = Uuid::new_v4();
        let cache = ReferenceCache::new(Duration::from_secs(60));

        cache.domains(&repo, org).unwrap();
        cache.domains(&repo, other).unwrap();

        assert_eq!(cache.invalidate_organization(other), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_control_matches_ttl() {
        let cache = ReferenceCache::new(Duration::from_secs(3));
        assert_eq!(cache.cache_control(), "private, max-age=3");
    }
}
