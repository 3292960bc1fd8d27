//! Persistence of standalone analysis records.

use crate::analysis::{Analysis, AnalysisRecord, AnalysisStatus, GeneratorType};
use crate::error::{Result, SeverityError};
use crate::metadata_store::{AttributeValue, Item, ItemBackend, ItemExt};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};
use ulid::Ulid;

/// Stores and retrieves analyses as flat items keyed by analysis id
pub struct AnalysisService<B> {
    backend: B,
}

impl<B: ItemBackend> AnalysisService<B> {
    /// Wrap `backend`, failing immediately if it is not usable
    pub async fn new(backend: B) -> Result<Self> {
        backend.ensure_ready().await?;
        info!("Analysis service ready");
        Ok(Self { backend })
    }

    /// Upsert the full analysis record, refreshing `updated_at`
    #[instrument(skip(self, analysis), fields(analysis_id = %analysis.id()))]
    pub async fn store(&self, analysis: &Analysis) -> Result<()> {
        let item = to_item(analysis)?;
        self.backend.put(&analysis.id().to_string(), item).await?;

        debug!(status = %analysis.status(), "Analysis stored");
        metrics::counter!("severity.analyses.stored").increment(1);
        Ok(())
    }

    pub async fn get(&self, id: Ulid) -> Result<Option<Analysis>> {
        match self.backend.get(&id.to_string()).await? {
            Some(item) => from_item(&item).map(Some),
            None => Ok(None),
        }
    }

    /// Up to `limit` analyses in backend order (not recency order)
    pub async fn list(&self, limit: usize) -> Result<Vec<Analysis>> {
        self.backend
            .scan(limit)
            .await?
            .iter()
            .map(from_item)
            .collect()
    }

    /// Set only the status and `updated_at` attributes.
    ///
    /// Never reads or rewrites the rest of the record. Returns false when no
    /// analysis exists under `id`.
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: Ulid, status: AnalysisStatus) -> Result<bool> {
        let mut fields = Item::new();
        fields.insert("status".to_string(), status.as_str().into());
        fields.insert("updated_at".to_string(), timestamp(Utc::now()).into());

        let updated = self.backend.update(&id.to_string(), fields).await?;
        if updated {
            metrics::counter!("severity.status.updated").increment(1);
        }
        Ok(updated)
    }
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC 3339 timestamp attribute. Older items carry naive
/// timestamps with no offset, which are read as UTC.
pub(crate) fn parse_timestamp(item: &Item, name: &str) -> Result<DateTime<Utc>> {
    let raw = item.required_str(name)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| SeverityError::MalformedRecord(format!("bad timestamp in '{name}': {e}")))
}

pub(crate) fn parse_id(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw)
        .map_err(|e| SeverityError::MalformedRecord(format!("bad id '{raw}': {e}")))
}

fn to_item(analysis: &Analysis) -> Result<Item> {
    let record = analysis.to_record();
    let mut item = Item::new();

    item.insert("id".to_string(), record.id.to_string().into());
    item.insert("generator_type".to_string(), String::from(record.generator_type).into());
    item.insert("status".to_string(), record.status.as_str().into());
    item.insert("created_at".to_string(), timestamp(record.created_at).into());
    item.insert("updated_at".to_string(), timestamp(Utc::now()).into());

    if let Some(fire_metadata) = &record.fire_metadata {
        item.insert(
            "fire_metadata".to_string(),
            AttributeValue::String(serde_json::to_string(fire_metadata)?),
        );
    }

    let optional = [
        ("job_id", record.job_id.map(|id| id.to_string())),
        ("raw_raster_location", record.raw_raster_location),
        ("source_vector_location", record.source_vector_location),
        ("published_raster_url", record.published_raster_url),
        ("published_vector_url", record.published_vector_url),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            item.insert(name.to_string(), value.into());
        }
    }

    Ok(item)
}

fn from_item(item: &Item) -> Result<Analysis> {
    let fire_metadata = item
        .optional_str("fire_metadata")
        .map(serde_json::from_str::<Value>)
        .transpose()?;

    let record = AnalysisRecord {
        id: parse_id(item.required_str("id")?)?,
        generator_type: GeneratorType::from(item.required_str("generator_type")?),
        fire_metadata,
        status: item.required_str("status")?.parse()?,
        created_at: parse_timestamp(item, "created_at")?,
        job_id: item.optional_str("job_id").map(parse_id).transpose()?,
        raw_raster_location: item.optional_str("raw_raster_location").map(str::to_string),
        source_vector_location: item.optional_str("source_vector_location").map(str::to_string),
        published_raster_url: item.optional_str("published_raster_url").map(str::to_string),
        published_vector_url: item.optional_str("published_vector_url").map(str::to_string),
    };

    Analysis::from_record(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fire_metadata::{FireMetadata, SaFireMetadata};
    use crate::metadata_store::{MemoryItemTable, MockItemBackend};
    use serde_json::{json, Map};

    fn completed_analysis() -> Analysis {
        let mut raw = Map::new();
        raw.insert("INCIDENTNU".to_string(), json!("12345"));
        let fire = FireMetadata::SaFire(SaFireMetadata::new("Bushfire", "03/12/2019", raw));

        let mut analysis = Analysis::new(GeneratorType::Dummy, Some(fire));
        analysis.set_raw_raster_location("data/dummy_data/raw_dnbr.tif");
        analysis.set_source_vector_location("data/dummy_data/fires.geojson");
        analysis.set_status(AnalysisStatus::Completed).unwrap();
        analysis
    }

    #[tokio::test]
    async fn test_store_and_get_round_trip() {
        let service = AnalysisService::new(MemoryItemTable::new()).await.unwrap();
        let analysis = completed_analysis();

        service.store(&analysis).await.unwrap();
        let restored = service.get(analysis.id()).await.unwrap().unwrap();

        assert_eq!(restored, analysis);
    }

    #[tokio::test]
    async fn test_store_is_idempotent_upsert() {
        let table = MemoryItemTable::new();
        let service = AnalysisService::new(table).await.unwrap();
        let mut analysis = Analysis::new(GeneratorType::Gee, None);

        service.store(&analysis).await.unwrap();
        analysis.set_status(AnalysisStatus::Running).unwrap();
        service.store(&analysis).await.unwrap();

        let all = service.list(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status(), AnalysisStatus::Running);
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let service = AnalysisService::new(MemoryItemTable::new()).await.unwrap();
        assert!(service.get(Ulid::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_touches_only_status() {
        let service = AnalysisService::new(MemoryItemTable::new()).await.unwrap();
        let analysis = Analysis::new(GeneratorType::Gee, None);
        service.store(&analysis).await.unwrap();

        let updated = service
            .update_status(analysis.id(), AnalysisStatus::Completed)
            .await
            .unwrap();
        assert!(updated);

        let restored = service.get(analysis.id()).await.unwrap().unwrap();
        assert_eq!(restored.status(), AnalysisStatus::Completed);
        assert_eq!(restored.created_at(), analysis.created_at());
    }

    #[tokio::test]
    async fn test_update_status_missing_record() {
        let service = AnalysisService::new(MemoryItemTable::new()).await.unwrap();
        let updated = service
            .update_status(Ulid::new(), AnalysisStatus::Failed)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_update_status_sends_partial_item() {
        let mut backend = MockItemBackend::new();
        backend.expect_ensure_ready().returning(|| Ok(()));
        backend
            .expect_update()
            .withf(|_, fields| {
                fields.len() == 2
                    && fields.get("status") == Some(&AttributeValue::from("FAILED"))
                    && fields.contains_key("updated_at")
            })
            .times(1)
            .returning(|_, _| Ok(true));
        backend.expect_put().never();
        backend.expect_get().never();

        let service = AnalysisService::new(backend).await.unwrap();
        assert!(service
            .update_status(Ulid::new(), AnalysisStatus::Failed)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_at_construction() {
        let mut backend = MockItemBackend::new();
        backend.expect_ensure_ready().returning(|| {
            Err(SeverityError::BackendUnavailable {
                backend: "metadata store",
                reason: "table 'fire_severity_analyses' not found".to_string(),
            })
        });

        let result = AnalysisService::new(backend).await;
        assert!(matches!(
            result,
            Err(SeverityError::BackendUnavailable { .. })
        ));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let mut item = Item::new();
        item.insert("a".to_string(), "2024-01-15T10:30:45.123Z".into());
        item.insert("b".to_string(), "2024-01-15T10:30:45.123456".into());
        item.insert("c".to_string(), "15/01/2024".into());

        let a = parse_timestamp(&item, "a").unwrap();
        let b = parse_timestamp(&item, "b").unwrap();
        assert_eq!(a.timestamp(), b.timestamp());
        assert!(matches!(
            parse_timestamp(&item, "c"),
            Err(SeverityError::MalformedRecord(_))
        ));
        assert!(parse_timestamp(&item, "missing").is_err());
    }

    #[tokio::test]
    async fn test_malformed_item_is_reported() {
        let table = MemoryItemTable::new();
        let mut item = Item::new();
        item.insert("id".to_string(), "not-a-ulid".into());
        table.put("x", item).await.unwrap();

        let service = AnalysisService::new(table).await.unwrap();
        let err = service.list(10).await.unwrap_err();
        assert!(matches!(err, SeverityError::MalformedRecord(_)));
    }
}
