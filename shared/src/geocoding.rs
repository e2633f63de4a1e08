//! Nominatim reverse and forward geocoding.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::capabilities::{
    HttpError, HttpMethod, HttpRequest, HttpResponse, RetryPolicy, ValidatedUrl,
};
use crate::model::LocationData;

pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
pub const FALLBACK_REVERSE_NAME: &str = "Current Location";
pub const FALLBACK_REVERSE_TYPE: &str = "Public Place";
pub const FALLBACK_SEARCH_TYPE: &str = "Location";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("no places matched the query")]
    NoResults,

    #[error("geocoder response could not be used: {0}")]
    Malformed(String),

    #[error(transparent)]
    Http(#[from] HttpError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geocoder {
    base_url: Url,
    timeout_ms: u64,
    retry: RetryPolicy,
}

impl Geocoder {
    pub fn new(base_url: Url, timeout_ms: u64, retry: RetryPolicy) -> Self {
        Self {
            base_url,
            timeout_ms,
            retry,
        }
    }

    pub fn reverse_request(&self, lat: f64, lon: f64) -> Result<HttpRequest, HttpError> {
        let url = self.endpoint(
            "reverse",
            &[
                ("format", "json".to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
            ],
        )?;
        self.request(url)
    }

    pub fn search_request(&self, query: &str) -> Result<HttpRequest, HttpError> {
        let url = self.endpoint(
            "search",
            &[
                ("format", "json".to_string()),
                ("q", query.to_string()),
                ("limit", "1".to_string()),
            ],
        )?;
        self.request(url)
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<ValidatedUrl, HttpError> {
        let mut url = self.base_url.join(path).map_err(|e| HttpError::InvalidUrl {
            url: self.base_url.to_string(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        ValidatedUrl::from_url(&url)
    }

    fn request(&self, url: ValidatedUrl) -> Result<HttpRequest, HttpError> {
        Ok(HttpRequest::new(HttpMethod::Get, url)
            .with_timeout_ms(self.timeout_ms)?
            .with_retry(self.retry.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReversePlace {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    place_type: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<ReverseAddress>,
}

#[derive(Debug, Default, Deserialize)]
struct ReverseAddress {
    bank: Option<String>,
    hospital: Option<String>,
    university: Option<String>,
    amenity: Option<String>,
    office: Option<String>,
}

impl ReverseAddress {
    fn landmark(&self) -> Option<&str> {
        [
            &self.bank,
            &self.hospital,
            &self.university,
            &self.amenity,
            &self.office,
        ]
        .into_iter()
        .find_map(|v| non_blank(v.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
struct SearchPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: String,
    #[serde(default, rename = "type")]
    place_type: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Builds a place from a reverse lookup. The coordinates are the ones that
/// were asked about, not the ones the geocoder snapped to.
pub fn parse_reverse(
    lat: f64,
    lon: f64,
    response: &HttpResponse,
) -> Result<LocationData, GeocodeError> {
    let place: ReversePlace = response
        .json()
        .map_err(|e| GeocodeError::Malformed(e.to_string()))?;

    if let Some(error) = place.error {
        return Err(GeocodeError::Malformed(error));
    }

    let name = non_blank(place.name.as_deref())
        .or_else(|| place.address.as_ref().and_then(ReverseAddress::landmark))
        .unwrap_or(FALLBACK_REVERSE_NAME)
        .to_string();
    let place_type = non_blank(place.place_type.as_deref())
        .or_else(|| non_blank(place.category.as_deref()))
        .unwrap_or(FALLBACK_REVERSE_TYPE)
        .to_string();
    let display_name = place
        .display_name
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("{lat}, {lon}"));

    Ok(LocationData {
        lat,
        lon,
        display_name,
        place_type: Some(place_type),
        name: Some(name),
    })
}

/// Builds a place from the first search hit.
pub fn parse_search(response: &HttpResponse) -> Result<LocationData, GeocodeError> {
    let places: Vec<SearchPlace> = response
        .json()
        .map_err(|e| GeocodeError::Malformed(e.to_string()))?;
    let first = places.into_iter().next().ok_or(GeocodeError::NoResults)?;

    let parse = |field: &str, raw: &str| {
        raw.trim()
            .parse::<f64>()
            .map_err(|e| GeocodeError::Malformed(format!("{field} '{raw}': {e}")))
    };
    let lat = parse("lat", &first.lat)?;
    let lon = parse("lon", &first.lon)?;
    crate::ValidatedCoordinate::new(lat, lon)
        .map_err(|e| GeocodeError::Malformed(e.to_string()))?;

    let name = first
        .display_name
        .split(',')
        .next()
        .unwrap_or_default()
        .to_string();
    let place_type = non_blank(first.place_type.as_deref())
        .unwrap_or(FALLBACK_SEARCH_TYPE)
        .to_string();

    Ok(LocationData {
        lat,
        lon,
        display_name: first.display_name,
        place_type: Some(place_type),
        name: Some(name),
    })
}
