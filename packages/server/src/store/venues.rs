use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::Store;

/// Baseline POI row. Created by import; the enrichment pipeline only
/// mutates `website` and `last_enriched_at`.
#[derive(Debug, Clone, FromRow)]
pub struct Venue {
    pub venue_id: String,
    pub name: String,
    pub category_name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub website: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub popularity: Option<f32>,
    pub last_enriched_at: Option<DateTime<Utc>>,
}

/// A venue matched by geographic search, with its distance to the query
/// point in meters.
#[derive(Debug, Clone, FromRow)]
pub struct GeoHit {
    pub venue_id: String,
    pub name: String,
    pub category_name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub website: Option<String>,
    pub popularity: Option<f32>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub distance_m: f64,
}

impl Store {
    pub async fn get_venue(&self, venue_id: &str) -> Result<Option<Venue>> {
        let venue = sqlx::query_as::<_, Venue>(
            r#"
            SELECT venue_id, name, category_name, latitude, longitude, website, email, phone,
                   popularity, last_enriched_at
            FROM venues
            WHERE venue_id = $1
            "#,
        )
        .bind(venue_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(venue)
    }

    pub async fn get_venues(&self, venue_ids: &[String]) -> Result<Vec<Venue>> {
        let venues = sqlx::query_as::<_, Venue>(
            r#"
            SELECT venue_id, name, category_name, latitude, longitude, website, email, phone,
                   popularity, last_enriched_at
            FROM venues
            WHERE venue_id = ANY($1)
            "#,
        )
        .bind(venue_ids)
        .fetch_all(self.pool())
        .await?;
        Ok(venues)
    }

    /// Geographic candidate search: venues within `radius_m` of the point,
    /// ordered by popularity (nulls last) then distance.
    pub async fn geo_search(
        &self,
        lat: f64,
        lon: f64,
        radius_m: i32,
        limit: i64,
        category: Option<&str>,
    ) -> Result<Vec<GeoHit>> {
        let hits = sqlx::query_as::<_, GeoHit>(
            r#"
            SELECT v.venue_id, v.name, v.category_name, v.latitude, v.longitude, v.website,
                   v.popularity, v.last_enriched_at,
                   ST_Distance(
                       ST_SetSRID(ST_MakePoint(v.longitude, v.latitude), 4326)::geography,
                       ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography
                   ) AS distance_m
            FROM venues v
            WHERE ST_DWithin(
                      ST_SetSRID(ST_MakePoint(v.longitude, v.latitude), 4326)::geography,
                      ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography,
                      $3
                  )
              AND ($4::text IS NULL OR v.category_name ILIKE '%' || $4 || '%')
            ORDER BY v.popularity DESC NULLS LAST, distance_m ASC
            LIMIT $5
            "#,
        )
        .bind(lon)
        .bind(lat)
        .bind(radius_m as f64)
        .bind(category)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(hits)
    }

    /// Venues eligible for background refresh: any freshness timestamp
    /// missing or beyond its window (or no enrichment row at all), plus
    /// venues at/above `popularity_floor` whenever any field is stale.
    /// Venues with an active job are excluded; staleness comes first,
    /// then popularity (nulls last).
    pub async fn select_stale_venues(
        &self,
        hours_days: i64,
        menu_contact_price_days: i64,
        desc_features_days: i64,
        popularity_floor: Option<f32>,
        limit: i64,
    ) -> Result<Vec<Venue>> {
        let venues = sqlx::query_as::<_, Venue>(
            r#"
            SELECT v.venue_id, v.name, v.category_name, v.latitude, v.longitude, v.website,
                   v.email, v.phone, v.popularity, v.last_enriched_at
            FROM venues v
            LEFT JOIN enrichment e USING (venue_id)
            WHERE v.website IS NOT NULL AND v.website <> ''
              AND NOT EXISTS (
                  SELECT 1 FROM crawl_jobs cj
                  WHERE cj.venue_id = v.venue_id AND cj.state IN ('pending', 'running')
              )
              AND (
                  e.venue_id IS NULL
                  OR e.hours_last_updated IS NULL
                  OR e.hours_last_updated < NOW() - make_interval(days => $1::int)
                  OR e.contact_last_updated IS NULL
                  OR e.contact_last_updated < NOW() - make_interval(days => $2::int)
                  OR e.menu_last_updated IS NULL
                  OR e.menu_last_updated < NOW() - make_interval(days => $2::int)
                  OR e.price_last_updated IS NULL
                  OR e.price_last_updated < NOW() - make_interval(days => $2::int)
                  OR e.description_last_updated IS NULL
                  OR e.description_last_updated < NOW() - make_interval(days => $3::int)
                  OR e.features_last_updated IS NULL
                  OR e.features_last_updated < NOW() - make_interval(days => $3::int)
              )
            ORDER BY
                (e.venue_id IS NOT NULL) ASC,
                CASE WHEN $4::real IS NOT NULL AND v.popularity >= $4::real THEN 0 ELSE 1 END ASC,
                v.popularity DESC NULLS LAST,
                COALESCE(v.last_enriched_at, 'epoch'::timestamptz) ASC
            LIMIT $5
            "#,
        )
        .bind(hours_days as i32)
        .bind(menu_contact_price_days as i32)
        .bind(desc_features_days as i32)
        .bind(popularity_floor)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(venues)
    }

    /// Popularity value at the given percentile (e.g. 0.9 = top decile
    /// floor), if any venues carry a popularity score.
    pub async fn popularity_percentile(&self, percentile: f64) -> Result<Option<f32>> {
        let row: (Option<f32>,) = sqlx::query_as(
            r#"
            SELECT percentile_disc($1) WITHIN GROUP (ORDER BY popularity)
            FROM venues
            WHERE popularity IS NOT NULL
            "#,
        )
        .bind(percentile)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }

    pub async fn set_website(&self, venue_id: &str, website: &str) -> Result<()> {
        sqlx::query("UPDATE venues SET website = $1 WHERE venue_id = $2")
            .bind(website)
            .bind(venue_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
