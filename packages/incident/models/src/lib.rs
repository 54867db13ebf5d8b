#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident record types shared across the incident map system.
//!
//! Defines the citizen-reported [`Incident`] record as it arrives from the
//! REST list endpoint and the push channel, together with the closed
//! [`IncidentType`] catalogue, [`Severity`] and [`IncidentStatus`]
//! enumerations.
//!
//! Decoding is lenient about the shapes the backend is known to
//! emit: numeric or string identifiers, numeric-string coordinates, legacy
//! `type`/`upvotes`/`image` fields, and free-form type strings that fall back
//! to [`IncidentType::Other`].

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use strum_macros::{AsRefStr, Display, EnumString};

/// Opaque, unique incident identifier.
///
/// The backend may send identifiers as JSON strings or numbers; both decode
/// to the same string form so that `42` and `"42"` name the same record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IncidentId(String);

impl IncidentId {
    /// Creates an identifier from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IncidentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for IncidentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Serialize for IncidentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for IncidentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = IncidentId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-empty string or integer incident id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v.trim().is_empty() {
                    return Err(E::invalid_value(de::Unexpected::Str(v), &self));
                }
                Ok(IncidentId::new(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(IncidentId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(IncidentId(v.to_string()))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// A latitude/longitude pair in degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinates {
    /// Creates a coordinate pair.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Incident severity as reported by citizens or adjusted by moderators.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Severity {
    /// Minor incident, no immediate danger.
    Low,
    /// Noticeable disruption or moderate risk.
    Medium,
    /// Immediate danger to people or property.
    High,
}

impl Severity {
    /// Returns all variants in ascending order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Low, Self::Medium, Self::High]
    }
}

impl TryFrom<String> for Severity {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.trim().parse()
    }
}

/// Moderation lifecycle of an incident.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum IncidentStatus {
    /// Newly submitted, not yet reviewed.
    #[default]
    Reported,
    /// Confirmed by a moderator.
    Verified,
    /// Responders are handling it.
    InProgress,
    /// Closed out.
    Resolved,
    /// Marked as suspicious or abusive.
    Flagged,
}

impl TryFrom<String> for IncidentStatus {
    type Error = strum::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.trim().parse()
    }
}

/// Closed catalogue of incident types.
///
/// Strings that match neither a catalogue value nor its display label decode
/// to [`IncidentType::Other`] instead of failing.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentType {
    /// Fire outbreak.
    Fire,
    /// Medical emergency.
    Medical,
    /// Vehicle accident.
    Accident,
    /// Water leak or flooding.
    Flood,
    /// Crowd disturbance.
    PublicDisturbance,
    /// Route hazard or damaged infrastructure.
    Infrastructure,
    /// Power outage.
    PowerOutage,
    /// Natural disaster.
    NaturalDisaster,
    /// Suspicious activity.
    Suspicious,
    /// Anything else, including unrecognised type strings.
    #[default]
    Other,
}

impl IncidentType {
    /// Human-readable label shown in filter lists and popups.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Fire => "Fire Outbreak",
            Self::Medical => "Medical Emergency",
            Self::Accident => "Vehicle Accident",
            Self::Flood => "Water Leak / Flood",
            Self::PublicDisturbance => "Crowd Disturbance",
            Self::Infrastructure => "Route Hazard",
            Self::PowerOutage => "Power Outage",
            Self::NaturalDisaster => "Natural Disaster",
            Self::Suspicious => "Suspicious Activity",
            Self::Other => "Other",
        }
    }

    /// Matches a free-form type string against catalogue values and labels,
    /// ignoring ASCII case. Unknown strings map to [`Self::Other`].
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        let value = value.trim();
        Self::all()
            .iter()
            .copied()
            .find(|ty| {
                ty.as_ref().eq_ignore_ascii_case(value) || ty.label().eq_ignore_ascii_case(value)
            })
            .unwrap_or(Self::Other)
    }

    /// Returns all variants in catalogue order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Fire,
            Self::Medical,
            Self::Accident,
            Self::Flood,
            Self::PublicDisturbance,
            Self::Infrastructure,
            Self::PowerOutage,
            Self::NaturalDisaster,
            Self::Suspicious,
            Self::Other,
        ]
    }
}

impl From<String> for IncidentType {
    fn from(value: String) -> Self {
        Self::parse_lenient(&value)
    }
}

/// A citizen-reported incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Unique identifier.
    pub id: IncidentId,
    /// Catalogue type.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub incident_type: IncidentType,
    /// Legacy `type` field some payloads still carry alongside
    /// `incidentType`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub legacy_type: Option<IncidentType>,
    /// Severity level.
    pub severity: Severity,
    /// Moderation status.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub status: IncidentStatus,
    /// Free-text description.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub description: String,
    /// Human-readable address or landmark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Latitude in degrees.
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub longitude: Option<f64>,
    /// When the report was created.
    #[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    /// When the report was last modified.
    #[serde(default, deserialize_with = "deserialize_lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Upvote counter.
    #[serde(default, deserialize_with = "deserialize_lenient_count")]
    pub upvote_count: u32,
    /// Legacy upvote field.
    #[serde(
        default,
        deserialize_with = "deserialize_lenient_optional_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub upvotes: Option<u32>,
    /// Uploaded media reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Legacy media field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Incident {
    /// Creates an incident with the given identity and classification and
    /// every optional field empty.
    #[must_use]
    pub fn new(id: impl Into<IncidentId>, incident_type: IncidentType, severity: Severity) -> Self {
        Self {
            id: id.into(),
            incident_type,
            legacy_type: None,
            severity,
            status: IncidentStatus::default(),
            description: String::new(),
            location: None,
            latitude: None,
            longitude: None,
            created_at: None,
            updated_at: None,
            upvote_count: 0,
            upvotes: None,
            media_url: None,
            image: None,
        }
    }

    /// Sets the coordinates.
    #[must_use]
    pub const fn with_coordinates(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Returns the coordinate pair, or `None` unless both latitude and
    /// longitude are present.
    #[must_use]
    pub fn coordinates(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.latitude?, self.longitude?))
    }

    /// Whether either the primary or legacy type field equals `ty`.
    #[must_use]
    pub fn has_type(&self, ty: IncidentType) -> bool {
        self.incident_type == ty || self.legacy_type == Some(ty)
    }

    /// Upvote count, preferring `upvoteCount` and falling back to the legacy
    /// `upvotes` field.
    #[must_use]
    pub fn upvote_total(&self) -> u32 {
        if self.upvote_count == 0 {
            self.upvotes.unwrap_or(0)
        } else {
            self.upvote_count
        }
    }

    /// Media reference, preferring `mediaUrl` over the legacy `image` field.
    #[must_use]
    pub fn media(&self) -> Option<&str> {
        self.media_url.as_deref().or(self.image.as_deref())
    }
}

/// Accepts a number, a numeric string, `null`, or an unparseable value
/// (treated as absent).
fn deserialize_lenient_f64<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    struct LenientVisitor;

    impl<'de> Visitor<'de> for LenientVisitor {
        type Value = Option<f64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number, a numeric string or null")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(v.is_finite().then_some(v))
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        #[allow(clippy::cast_precision_loss)]
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.trim().parse::<f64>().ok().filter(|f| f.is_finite()))
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(None)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(None)
        }
    }

    deserializer.deserialize_any(LenientVisitor)
}

/// Treats an explicit `null` like an absent field.
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Non-negative whole counter; anything else (negative, fractional, text,
/// `null`) is absent.
fn deserialize_lenient_optional_count<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u32>, D::Error> {
    Ok(deserialize_lenient_f64(deserializer)?
        .filter(|v| *v >= 0.0 && v.fract().abs() < f64::EPSILON && *v <= f64::from(u32::MAX))
        .map(|v| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = v as u32;
            count
        }))
}

fn deserialize_lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Ok(deserialize_lenient_optional_count(deserializer)?.unwrap_or(0))
}

/// Naive layouts the backend has been seen to emit, read as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses an RFC 3339 timestamp or one of [`NAIVE_TIMESTAMP_FORMATS`].
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Accepts any timestamp [`parse_timestamp`] understands; everything else,
/// including `null` and non-strings, is absent.
fn deserialize_lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = Option<DateTime<Utc>>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a timestamp string or null")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(parse_timestamp(v))
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_i64<E: de::Error>(self, _v: i64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_u64<E: de::Error>(self, _v: u64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            while seq.next_element::<IgnoredAny>()?.is_some() {}
            Ok(None)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            while map.next_entry::<IgnoredAny, IgnoredAny>()?.is_some() {}
            Ok(None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}
