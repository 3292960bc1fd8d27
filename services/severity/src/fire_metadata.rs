//! Fire metadata extracted from provider-specific source records.
//!
//! Each provider contributes one variant of [`FireMetadata`] and one entry in
//! a static registry that maps its tag to the constructors used when reading
//! provider GeoJSON and when reading stored dictionaries back.

use crate::error::{Result, SeverityError};
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Provider tag for South Australian fire history data
pub const SA_FIRE: &str = "sa_fire";

/// Artifact kind for the published severity raster
pub const RASTER: &str = "raster";
/// Artifact kind for the published AOI vector
pub const VECTOR: &str = "vector";

/// Descriptive fields and stable identity of one fire / area of interest
#[derive(Debug, Clone, PartialEq)]
pub enum FireMetadata {
    SaFire(SaFireMetadata),
}

impl FireMetadata {
    /// Build metadata from a provider GeoJSON feature collection.
    ///
    /// The first feature describes the fire. Fails with `InvalidSource` when
    /// the collection has no features or the mandatory date is missing, and
    /// with `UnknownProvider` for unregistered providers.
    pub fn create(provider: &str, source: &Value) -> Result<Self> {
        let entry = lookup(provider)?;
        let feature = source
            .get("features")
            .and_then(Value::as_array)
            .and_then(|features| features.first())
            .ok_or_else(|| SeverityError::InvalidSource("No features found in GeoJSON".to_string()))?;

        (entry.from_feature)(feature)
    }

    /// Build metadata from a single GeoJSON feature
    pub fn from_feature(provider: &str, feature: &Value) -> Result<Self> {
        (lookup(provider)?.from_feature)(feature)
    }

    /// Rebuild metadata from the output of [`FireMetadata::to_dict`]
    pub fn from_dict(data: &Value) -> Result<Self> {
        let provider = data
            .get("provider")
            .and_then(Value::as_str)
            .ok_or_else(|| SeverityError::UnknownProvider("<missing>".to_string()))?;

        (lookup(provider)?.from_dict)(data)
    }

    /// Rebuild metadata from the flattened fields kept in legacy job summaries
    pub(crate) fn from_summary(provider: &str, aoi_id: &str, fire_date: &str) -> Result<Self> {
        Ok((lookup(provider)?.from_summary)(aoi_id, fire_date))
    }

    pub fn to_dict(&self) -> Value {
        match self {
            FireMetadata::SaFire(m) => m.to_dict(),
        }
    }

    pub fn aoi_id(&self) -> &str {
        match self {
            FireMetadata::SaFire(m) => &m.aoi_id,
        }
    }

    pub fn fire_date(&self) -> &str {
        match self {
            FireMetadata::SaFire(m) => &m.fire_date,
        }
    }

    pub fn incident_type(&self) -> &str {
        match self {
            FireMetadata::SaFire(m) => &m.incident_type,
        }
    }

    pub fn raw_properties(&self) -> &Map<String, Value> {
        match self {
            FireMetadata::SaFire(m) => &m.raw_properties,
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            FireMetadata::SaFire(_) => SA_FIRE,
        }
    }

    /// File name for a published artifact of the given kind.
    ///
    /// `raster` and `vector` map to fixed suffixes; any other kind is
    /// appended verbatim.
    pub fn generate_filename(&self, kind: &str) -> String {
        let suffix = match kind {
            RASTER => "dnbr.cog.tif",
            VECTOR => "aoi.geojson",
            other => other,
        };
        format!("{}_{}", self.aoi_id(), suffix)
    }
}

/// SA fire history record (`INCIDENTTY`, `FIREDATE`, `INCIDENTNU` properties)
#[derive(Debug, Clone, PartialEq)]
pub struct SaFireMetadata {
    incident_type: String,
    fire_date: String,
    raw_properties: Map<String, Value>,
    aoi_id: String,
}

const INCIDENT_TYPE_FIELD: &str = "INCIDENTTY";
const FIRE_DATE_FIELD: &str = "FIREDATE";
const INCIDENT_NUMBER_FIELD: &str = "INCIDENTNU";
const UNKNOWN: &str = "Unknown";

impl SaFireMetadata {
    pub fn new(
        incident_type: impl Into<String>,
        fire_date: impl Into<String>,
        raw_properties: Map<String, Value>,
    ) -> Self {
        let incident_type = incident_type.into();
        let fire_date = fire_date.into();
        let aoi_id = derive_aoi_id(&incident_type, &fire_date, &raw_properties);

        Self {
            incident_type,
            fire_date,
            raw_properties,
            aoi_id,
        }
    }

    fn from_feature(feature: &Value) -> Result<Self> {
        let properties = feature
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| SeverityError::InvalidSource("Feature has no properties".to_string()))?;

        let incident_type = properties
            .get(INCIDENT_TYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN);

        let fire_date = properties
            .get(FIRE_DATE_FIELD)
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty() && *d != UNKNOWN)
            .ok_or_else(|| {
                SeverityError::InvalidSource(format!("{FIRE_DATE_FIELD} property is required"))
            })?;

        if incident_number(properties).is_none() && date_component(fire_date).is_empty() {
            return Err(SeverityError::InvalidSource(format!(
                "{FIRE_DATE_FIELD} '{fire_date}' carries no date digits"
            )));
        }

        Ok(Self::new(incident_type, fire_date, properties.clone()))
    }

    fn from_dict(data: &Value) -> Self {
        let provider_metadata = data.get("provider_metadata");
        let incident_type = provider_metadata
            .and_then(|m| m.get("incident_type"))
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN);
        let fire_date = data
            .get("fire_date")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN);
        let raw_properties = provider_metadata
            .and_then(|m| m.get("raw_properties"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let metadata = Self::new(incident_type, fire_date, raw_properties);

        if let Some(stored) = data.get("aoi_id").and_then(Value::as_str) {
            if stored != metadata.aoi_id {
                warn!(
                    stored_aoi_id = %stored,
                    derived_aoi_id = %metadata.aoi_id,
                    "Stored aoi id differs from the derived one, using derived"
                );
            }
        }

        metadata
    }

    fn to_dict(&self) -> Value {
        json!({
            "aoi_id": self.aoi_id,
            "fire_date": self.fire_date,
            "provider": SA_FIRE,
            "provider_metadata": {
                "incident_type": self.incident_type,
                "raw_properties": self.raw_properties,
            }
        })
    }
}

fn derive_aoi_id(incident_type: &str, fire_date: &str, raw_properties: &Map<String, Value>) -> String {
    if let Some(number) = incident_number(raw_properties) {
        return number;
    }

    let kind = sanitize(incident_type);
    let date = date_component(fire_date);
    if date.is_empty() {
        kind
    } else {
        format!("{kind}_{date}")
    }
}

fn incident_number(raw_properties: &Map<String, Value>) -> Option<String> {
    match raw_properties.get(INCIDENT_NUMBER_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `dd/mm/yyyy` as `yyyymmdd`, or just the digits of anything else
fn date_component(fire_date: &str) -> String {
    match NaiveDate::parse_from_str(fire_date, "%d/%m/%Y") {
        Ok(date) => date.format("%Y%m%d").to_string(),
        Err(_) => fire_date.chars().filter(char::is_ascii_digit).collect(),
    }
}

/// Lower-case, and collapse each run of non-alphanumerics into one `_`
fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;

    for c in value.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    out
}

struct ProviderEntry {
    tag: &'static str,
    from_feature: fn(&Value) -> Result<FireMetadata>,
    from_dict: fn(&Value) -> Result<FireMetadata>,
    from_summary: fn(&str, &str) -> FireMetadata,
}

static PROVIDERS: &[ProviderEntry] = &[ProviderEntry {
    tag: SA_FIRE,
    from_feature: sa_fire_from_feature,
    from_dict: sa_fire_from_dict,
    from_summary: sa_fire_from_summary,
}];

fn sa_fire_from_feature(feature: &Value) -> Result<FireMetadata> {
    SaFireMetadata::from_feature(feature).map(FireMetadata::SaFire)
}

fn sa_fire_from_dict(data: &Value) -> Result<FireMetadata> {
    Ok(FireMetadata::SaFire(SaFireMetadata::from_dict(data)))
}

// Legacy summaries only kept the aoi id, which for SA data is the incident number.
fn sa_fire_from_summary(aoi_id: &str, fire_date: &str) -> FireMetadata {
    let mut raw = Map::new();
    raw.insert(INCIDENT_NUMBER_FIELD.to_string(), Value::String(aoi_id.to_string()));
    FireMetadata::SaFire(SaFireMetadata::new("Bushfire", fire_date, raw))
}

fn lookup(provider: &str) -> Result<&'static ProviderEntry> {
    PROVIDERS
        .iter()
        .find(|entry| entry.tag == provider)
        .ok_or_else(|| SeverityError::UnknownProvider(provider.to_string()))
}
