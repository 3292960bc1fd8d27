//! Minimal spatio-temporal catalog records written alongside published assets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One catalog entry per published analysis (a GeoJSON feature)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub geometry: Value,
    pub properties: CatalogProperties,
    pub assets: CatalogAssets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogProperties {
    pub aoi_id: String,
    pub scope_id: String,
    pub fire_date: String,
    pub provider: String,
    pub generator_type: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogAssets {
    pub raster: Asset,
    pub vector: Asset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(rename = "type")]
    pub media_type: String,
}

impl CatalogItem {
    pub fn new(geometry: Value, properties: CatalogProperties, assets: CatalogAssets) -> Self {
        Self {
            kind: "Feature".to_string(),
            id: item_id(&properties.aoi_id, &properties.scope_id),
            geometry,
            properties,
            assets,
        }
    }
}

/// Collection-level record naming the most recently published scope.
///
/// Every publish overwrites it, so concurrent publishers race and the last
/// writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionPointer {
    pub collection_id: String,
    pub latest_scope_id: String,
    pub latest_item_id: String,
    pub latest_item_href: String,
    pub updated_at: DateTime<Utc>,
}

pub fn item_id(aoi_id: &str, scope_id: &str) -> String {
    format!("{aoi_id}_{scope_id}")
}

pub fn item_key(catalog_prefix: &str, item_id: &str) -> String {
    format!("{}/items/{item_id}.json", catalog_prefix.trim_end_matches('/'))
}

pub fn collection_key(catalog_prefix: &str) -> String {
    format!("{}/collection.json", catalog_prefix.trim_end_matches('/'))
}
