//! Location catalog backed by the e-redes open-data portal and `geoapi.pt`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use zeromonos_core::{CatalogError, LocationCatalog, Municipality};

/// District records on the e-redes portal.
pub const DISTRICTS_URL: &str = "https://e-redes.opendatasoft.com/api/explore/v2.1/catalog/datasets/districts-portugal/records";
/// Municipality records on the e-redes portal.
pub const MUNICIPALITIES_URL: &str = "https://e-redes.opendatasoft.com/api/explore/v2.1/catalog/datasets/municipalities-portugal/records";
/// Base of the `geoapi.pt` municipality resource.
pub const VILLAGES_URL: &str = "https://json.geoapi.pt/municipio";

/// Records requested per page from the open-data portal.
const PAGE_SIZE: usize = 100;

/// Upper bound on pages fetched for a single listing.
const MAX_PAGES: usize = 50;

/// One page of records from the open-data portal.
#[derive(Debug, Deserialize)]
struct RecordsPage<T> {
    // v2.1 reports `total_count`, the older explore API `nhits`
    #[serde(alias = "nhits", default)]
    total_count: usize,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

/// Single record of the districts dataset.
#[derive(Debug, Deserialize)]
struct DistrictRecord {
    dis_name: String,
}

/// Single record of the municipalities dataset.
#[derive(Debug, Deserialize)]
struct MunicipalityRecord {
    con_name: String,
    dis_name: String,
}

/// Response of `/municipio/{name}/freguesias`.
#[derive(Debug, Deserialize)]
struct ParishesResponse {
    #[serde(default)]
    freguesias: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Endpoints queried by [`GeoApiCatalog`].
pub struct CatalogEndpoints {
    /// Paginated districts dataset.
    pub districts: String,
    /// Paginated municipalities dataset.
    pub municipalities: String,
    /// Base URL; villages are read from `{base}/{municipality}/freguesias`.
    pub villages: String,
}

impl Default for CatalogEndpoints {
    fn default() -> Self {
        Self {
            districts: DISTRICTS_URL.to_owned(),
            municipalities: MUNICIPALITIES_URL.to_owned(),
            villages: VILLAGES_URL.to_owned(),
        }
    }
}

/// Read-only Portuguese district, municipality, and parish catalog.
pub struct GeoApiCatalog {
    client: Client,
    endpoints: CatalogEndpoints,
}

impl GeoApiCatalog {
    /// Create a catalog bound to the given HTTP client and endpoints.
    #[must_use]
    pub fn new(client: Client, endpoints: CatalogEndpoints) -> Self {
        Self { client, endpoints }
    }

    async fn all_records<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, CatalogError> {
        let mut records = Vec::new();
        let mut offset = 0_usize;

        for _ in 0..MAX_PAGES {
            let limit = PAGE_SIZE.to_string();
            let start = offset.to_string();
            let req = self
                .client
                .get(url)
                .query(&[("limit", limit.as_str()), ("offset", start.as_str())]);
            let page = fetch_page::<T>(req).await?;

            let fetched = page.results.len();
            records.extend(page.results);
            match next_offset(offset, fetched, page.total_count) {
                Some(next) => offset = next,
                None => return Ok(records),
            }
        }

        Err(CatalogError::Internal(format!(
            "{url} did not finish within {MAX_PAGES} pages"
        )))
    }

    fn villages_url(&self, municipality: &str) -> Result<Url, CatalogError> {
        let mut url = Url::parse(&self.endpoints.villages)
            .map_err(|err| CatalogError::Internal(format!("invalid villages url: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| CatalogError::Internal("villages url cannot take a path".to_owned()))?
            .pop_if_empty()
            .extend([municipality, "freguesias"]);
        Ok(url)
    }
}

#[async_trait]
impl LocationCatalog for GeoApiCatalog {
    async fn districts(&self) -> Result<Vec<String>, CatalogError> {
        let records = self
            .all_records::<DistrictRecord>(&self.endpoints.districts)
            .await?;
        let districts = district_names(records);
        debug!(count = districts.len(), "Fetched districts");
        Ok(districts)
    }

    async fn municipalities(
        &self,
        district: Option<&str>,
    ) -> Result<Vec<Municipality>, CatalogError> {
        let records = self
            .all_records::<MunicipalityRecord>(&self.endpoints.municipalities)
            .await?;
        let municipalities = municipalities_in(records, district);
        debug!(
            district = district.unwrap_or("*"),
            count = municipalities.len(),
            "Fetched municipalities"
        );
        Ok(municipalities)
    }

    async fn villages(&self, municipality: &str) -> Result<Vec<String>, CatalogError> {
        let municipality = municipality.trim();
        if municipality.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .get(self.villages_url(municipality)?)
            .send()
            .await?;
        // geoapi answers unknown municipalities with 404
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(municipality, "Unknown municipality");
            return Ok(Vec::new());
        }
        let parishes: ParishesResponse = resp.error_for_status()?.json().await?;
        Ok(parishes.freguesias)
    }
}

/// Offset of the next page, or `None` once everything was read.
fn next_offset(offset: usize, fetched: usize, total: usize) -> Option<usize> {
    let next = offset.saturating_add(fetched);
    (fetched > 0 && next < total).then_some(next)
}

fn district_names(records: Vec<DistrictRecord>) -> Vec<String> {
    let mut names: Vec<String> = records
        .into_iter()
        .map(|record| record.dis_name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

fn municipalities_in(records: Vec<MunicipalityRecord>, district: Option<&str>) -> Vec<Municipality> {
    let district = district.map(str::trim).filter(|name| !name.is_empty());
    let mut municipalities: Vec<Municipality> = records
        .into_iter()
        .map(|record| Municipality {
            name: record.con_name.trim().to_owned(),
            district: record.dis_name.trim().to_owned(),
        })
        .filter(|entry| district.is_none_or(|wanted| entry.district == wanted))
        .collect();
    municipalities.sort_by(|left, right| left.name.cmp(&right.name));
    municipalities.dedup();
    municipalities
}

/// One page of an open-data listing. Non-2xx answers are errors.
async fn fetch_page<T: DeserializeOwned>(
    req: RequestBuilder,
) -> Result<RecordsPage<T>, CatalogError> {
    let response = req.send().await?;
    debug!(url = %response.url(), status = %response.status(), "Catalog page fetched");
    let page = response.error_for_status()?.json().await?;
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_continue_until_the_total_is_reached() {
        assert_eq!(next_offset(0, 100, 308), Some(100));
        assert_eq!(next_offset(300, 8, 308), None);
        assert_eq!(next_offset(0, 0, 308), None, "an empty page ends the listing");
        assert_eq!(next_offset(0, 20, 0), None, "missing totals mean one page");
    }

    #[test]
    fn record_pages_accept_both_total_fields() {
        let current: RecordsPage<DistrictRecord> =
            serde_json::from_str(r#"{"total_count": 2, "results": [{"dis_name": "Porto"}]}"#)
                .expect("v2.1 page");
        let legacy: RecordsPage<DistrictRecord> =
            serde_json::from_str(r#"{"nhits": 7, "results": []}"#).expect("legacy page");

        assert_eq!(current.total_count, 2);
        assert_eq!(current.results.len(), 1);
        assert_eq!(legacy.total_count, 7);
    }

    #[test]
    fn districts_are_sorted_and_unique() {
        let records = ["Porto", "Aveiro", " Porto ", ""]
            .into_iter()
            .map(|name| DistrictRecord {
                dis_name: name.to_owned(),
            })
            .collect();

        assert_eq!(district_names(records), vec!["Aveiro", "Porto"]);
    }

    #[test]
    fn municipalities_filter_by_district() {
        let records = vec![
            MunicipalityRecord {
                con_name: "Sintra".to_owned(),
                dis_name: "Lisboa".to_owned(),
            },
            MunicipalityRecord {
                con_name: "Gaia".to_owned(),
                dis_name: "Porto".to_owned(),
            },
            MunicipalityRecord {
                con_name: "Cascais".to_owned(),
                dis_name: "Lisboa".to_owned(),
            },
        ];

        let lisbon = municipalities_in(records, Some(" Lisboa "));
        let names: Vec<&str> = lisbon.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["Cascais", "Sintra"]);
    }

    #[test]
    fn village_urls_escape_the_municipality() {
        let catalog = GeoApiCatalog::new(
            Client::new(),
            CatalogEndpoints {
                villages: "https://json.geoapi.pt/municipio/".to_owned(),
                ..CatalogEndpoints::default()
            },
        );

        let url = catalog
            .villages_url("Vila Nova de Gaia")
            .expect("valid base url");
        assert_eq!(
            url.as_str(),
            "https://json.geoapi.pt/municipio/Vila%20Nova%20de%20Gaia/freguesias"
        );
    }
}
