//! Per-listener enrichment: mount name, device and location.
//!
//! Enrichment costs one classifier call and one geolocation call, so it runs
//! once per produced record rather than once per raw event.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::event::{MountRef, RawEvent};
use crate::source::NameLookup;

/// Client name used when the classifier does not recognise a user agent.
pub const UNKNOWN_CLIENT: &str = "Unknown";

/// Locale used when a request does not specify one.
pub const DEFAULT_LOCALE: &str = "en_US";

/// A request locale such as `en_US` or `de_DE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn new(locale: impl Into<String>) -> Self {
        Self(locale.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self(DEFAULT_LOCALE.to_string())
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of classifying a user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub client: Option<String>,
    pub is_mobile: bool,
}

/// Result of an IP geolocation lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Location {
    Success {
        country: String,
        region: String,
        city: String,
    },
    #[serde(rename = "error")]
    Failure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Location {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: Some(message.into()),
        }
    }
}

/// Classifies user-agent strings.
pub trait DeviceClassifier {
    fn classify(&self, user_agent: &str) -> Result<DeviceInfo, ReportError>;
}

/// Looks up where an IP address is.
pub trait GeoLocator {
    fn lookup(&self, ip: &str, locale: &Locale) -> Result<Location, ReportError>;
}

/// The stream a listener was attached to, by display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountInfo {
    pub is_local: bool,
    pub name: String,
}

/// Everything known about a listener apart from its connection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerDetails {
    pub ip: String,
    pub user_agent: String,
    pub hash: String,
    pub client: String,
    pub is_mobile: bool,
    pub mount: Option<MountInfo>,
    pub location: Location,
}

/// Turns a raw event into listener details.
pub trait Enrich {
    fn enrich(&self, event: &RawEvent) -> Result<ListenerDetails, ReportError>;
}

/// Enricher backed by a station's name tables and the device/geo collaborators.
pub struct RecordEnricher<'a, C, G> {
    station_id: i64,
    mount_names: HashMap<i64, String>,
    remote_names: HashMap<i64, String>,
    classifier: &'a C,
    geolocator: &'a G,
    locale: Locale,
}

impl<'a, C, G> RecordEnricher<'a, C, G>
where
    C: DeviceClassifier,
    G: GeoLocator,
{
    /// Loads the station's mount and remote names up front.
    pub fn for_station<N: NameLookup + ?Sized>(
        names: &N,
        station_id: i64,
        classifier: &'a C,
        geolocator: &'a G,
        locale: Option<Locale>,
    ) -> Result<Self, ReportError> {
        Ok(Self {
            station_id,
            mount_names: names.mount_names(station_id)?,
            remote_names: names.remote_names(station_id)?,
            classifier,
            geolocator,
            locale: locale.unwrap_or_default(),
        })
    }

    fn mount_info(&self, mount_ref: MountRef) -> Result<Option<MountInfo>, ReportError> {
        let (is_local, id, table, kind) = match mount_ref {
            MountRef::Local(id) => (true, id, &self.mount_names, "mount"),
            MountRef::Remote(id) => (false, id, &self.remote_names, "remote"),
            MountRef::None => return Ok(None),
        };
        let name = table.get(&id).ok_or(ReportError::Configuration {
            kind,
            id,
            station: self.station_id,
        })?;
        Ok(Some(MountInfo {
            is_local,
            name: name.clone(),
        }))
    }
}

impl<C, G> Enrich for RecordEnricher<'_, C, G>
where
    C: DeviceClassifier,
    G: GeoLocator,
{
    fn enrich(&self, event: &RawEvent) -> Result<ListenerDetails, ReportError> {
        let mount = self.mount_info(event.mount_ref)?;
        let device = self.classifier.classify(&event.user_agent)?;
        let location = self.geolocator.lookup(&event.ip, &self.locale)?;

        Ok(ListenerDetails {
            ip: event.ip.clone(),
            user_agent: event.user_agent.clone(),
            hash: event.identity_hash.clone(),
            client: device.client.unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
            is_mobile: device.is_mobile,
            mount,
            location,
        })
    }
}
