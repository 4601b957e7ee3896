//! City -> region -> country resolution with get-or-create semantics.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgConnection;
use std::collections::HashMap;

pub const UNKNOWN: &str = "Unknown";

/// Lookup-then-insert access to the three location tables.
#[async_trait]
pub trait LocationStore: Send {
    async fn country_id(&mut self, name: &str) -> Result<i32>;
    async fn region_id(&mut self, name: &str, country_id: i32) -> Result<i32>;
    async fn city_id(&mut self, name: &str, region_id: i32) -> Result<i32>;
}

#[async_trait]
impl LocationStore for PgConnection {
    async fn country_id(&mut self, name: &str) -> Result<i32> {
        let existing: Option<i32> =
            sqlx::query_scalar("SELECT country_id FROM countries WHERE country_name = $1")
                .bind(name)
                .fetch_optional(&mut *self)
                .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = sqlx::query_scalar("INSERT INTO countries (country_name) VALUES ($1) RETURNING country_id")
            .bind(name)
            .fetch_one(&mut *self)
            .await?;
        Ok(id)
    }

    async fn region_id(&mut self, name: &str, country_id: i32) -> Result<i32> {
        let existing: Option<i32> = sqlx::query_scalar(
            "SELECT region_id FROM regions WHERE region_name = $1 AND country_id = $2",
        )
        .bind(name)
        .bind(country_id)
        .fetch_optional(&mut *self)
        .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = sqlx::query_scalar(
            "INSERT INTO regions (region_name, country_id) VALUES ($1, $2) RETURNING region_id",
        )
        .bind(name)
        .bind(country_id)
        .fetch_one(&mut *self)
        .await?;
        Ok(id)
    }

    async fn city_id(&mut self, name: &str, region_id: i32) -> Result<i32> {
        let existing: Option<i32> =
            sqlx::query_scalar("SELECT city_id FROM cities WHERE city_name = $1 AND region_id = $2")
                .bind(name)
                .bind(region_id)
                .fetch_optional(&mut *self)
                .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = sqlx::query_scalar(
            "INSERT INTO cities (city_name, region_id) VALUES ($1, $2) RETURNING city_id",
        )
        .bind(name)
        .bind(region_id)
        .fetch_one(&mut *self)
        .await?;
        Ok(id)
    }
}

/// A row's location columns after defaulting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub city: String,
    pub region: String,
    pub country: String,
}

impl Location {
    /// `None` when the row carries no location at all. Any missing part of a
    /// partial location becomes `Unknown`.
    pub fn from_cells(city: Option<&str>, region: Option<&str>, country: Option<&str>) -> Option<Self> {
        if city.is_none() && region.is_none() && country.is_none() {
            return None;
        }
        let or_unknown = |cell: Option<&str>| cell.unwrap_or(UNKNOWN).to_string();
        Some(Self {
            city: or_unknown(city),
            region: or_unknown(region),
            country: or_unknown(country),
        })
    }
}

/// Resolves locations to city ids, remembering every id it has seen so a
/// repeated location costs no round-trips.
#[derive(Debug, Default)]
pub struct LocationResolver {
    countries: HashMap<String, i32>,
    regions: HashMap<(String, i32), i32>,
    cities: HashMap<(String, i32), i32>,
}

impl LocationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve<S>(&mut self, store: &mut S, location: &Location) -> Result<i32>
    where
        S: LocationStore + ?Sized,
    {
        let country_id = match self.countries.get(&location.country) {
            Some(id) => *id,
            None => {
                let id = store.country_id(&location.country).await?;
                self.countries.insert(location.country.clone(), id);
                id
            }
        };

        let region_key = (location.region.clone(), country_id);
        let region_id = match self.regions.get(&region_key) {
            Some(id) => *id,
            None => {
                let id = store.region_id(&location.region, country_id).await?;
                self.regions.insert(region_key, id);
                id
            }
        };

        let city_key = (location.city.clone(), region_id);
        match self.cities.get(&city_key) {
            Some(id) => Ok(*id),
            None => {
                let id = store.city_id(&location.city, region_id).await?;
                self.cities.insert(city_key, id);
                Ok(id)
            }
        }
    }

    /// Rollback of the surrounding transaction invalidates every cached id.
    pub fn clear(&mut self) {
        self.countries.clear();
        self.regions.clear();
        self.cities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory tables with a count of round-trips.
    #[derive(Default)]
    struct MemoryStore {
        countries: Vec<String>,
        regions: Vec<(String, i32)>,
        cities: Vec<(String, i32)>,
        calls: usize,
    }

    fn get_or_push<T: PartialEq>(items: &mut Vec<T>, item: T) -> i32 {
        match items.iter().position(|existing| *existing == item) {
            Some(idx) => idx as i32 + 1,
            None => {
                items.push(item);
                items.len() as i32
            }
        }
    }

    #[async_trait]
    impl LocationStore for MemoryStore {
        async fn country_id(&mut self, name: &str) -> Result<i32> {
            self.calls += 1;
            Ok(get_or_push(&mut self.countries, name.to_string()))
        }

        async fn region_id(&mut self, name: &str, country_id: i32) -> Result<i32> {
            self.calls += 1;
            Ok(get_or_push(&mut self.regions, (name.to_string(), country_id)))
        }

        async fn city_id(&mut self, name: &str, region_id: i32) -> Result<i32> {
            self.calls += 1;
            Ok(get_or_push(&mut self.cities, (name.to_string(), region_id)))
        }
    }

    #[test]
    fn test_location_defaults() {
        assert_eq!(Location::from_cells(None, None, None), None);

        let loc = Location::from_cells(Some("Berlin"), None, Some("Germany")).unwrap();
        assert_eq!(loc.region, UNKNOWN);
        assert_eq!(loc.city, "Berlin");
    }

    #[tokio::test]
    async fn test_resolve_reuses_hierarchy() {
        let mut store = MemoryStore::default();
        let mut resolver = LocationResolver::new();

        let berlin = Location::from_cells(Some("Berlin"), None, Some("Germany")).unwrap();
        let aachen = Location::from_cells(Some("Aachen"), None, Some("Germany")).unwrap();
        let portland = Location::from_cells(Some("Portland"), Some("OR"), Some("USA")).unwrap();

        let first = resolver.resolve(&mut store, &berlin).await.unwrap();
        let other = resolver.resolve(&mut store, &aachen).await.unwrap();
        let third = resolver.resolve(&mut store, &portland).await.unwrap();

        assert_ne!(first, other);
        assert_ne!(other, third);
        assert_eq!(store.countries, vec!["Germany", "USA"]);
        assert_eq!(store.regions.len(), 2);
        assert_eq!(store.cities.len(), 3);
    }

    #[tokio::test]
    async fn test_repeated_location_is_cached() {
        let mut store = MemoryStore::default();
        let mut resolver = LocationResolver::new();
        let berlin = Location::from_cells(Some("Berlin"), None, Some("Germany")).unwrap();

        let id = resolver.resolve(&mut store, &berlin).await.unwrap();
        let calls = store.calls;
        assert_eq!(resolver.resolve(&mut store, &berlin).await.unwrap(), id);
        assert_eq!(store.calls, calls);

        resolver.clear();
        assert_eq!(resolver.resolve(&mut store, &berlin).await.unwrap(), id);
        assert_eq!(store.calls, calls * 2);
    }
}
