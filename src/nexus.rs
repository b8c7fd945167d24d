use crate::{
    catalog::{Catalog, FileMeta, ModMeta, Period, TrackedRemote},
    error::CatalogError,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;

const API_ROOT: &str = "https://api.nexusmods.com/v1";
const USER_AGENT: &str = concat!("modwatch/", env!("CARGO_PKG_VERSION"));

/// Nexus Mods v1 REST client.
pub struct NexusClient {
    agent: ureq::Agent,
    api_key: String,
    root: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileMeta>,
}

#[derive(Debug, Deserialize)]
struct UpdatedMod {
    mod_id: u64,
}

impl NexusClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            agent,
            api_key: api_key.into(),
            root: API_ROOT.to_string(),
        }
    }

    fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}{path}", self.root);
        let mut request = self
            .agent
            .get(&url)
            .set("apikey", &self.api_key)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }
        tracing::debug!(%url, "catalog request");
        let response = request.call().map_err(|err| classify(err, &url))?;
        response
            .into_json::<T>()
            .map_err(|err| CatalogError::Decode(format!("{url}: {err}")))
    }
}

fn classify(err: ureq::Error, url: &str) -> CatalogError {
    match err {
        ureq::Error::Status(429, _) => CatalogError::RateLimited,
        ureq::Error::Status(status, _) => CatalogError::Status {
            status,
            url: url.to_string(),
        },
        ureq::Error::Transport(transport) => CatalogError::Transport(transport.to_string()),
    }
}

impl Catalog for NexusClient {
    fn list_files(&self, game: &str, mod_id: u64) -> Result<Vec<FileMeta>, CatalogError> {
        let list: FileList = self.get(&format!("/games/{game}/mods/{mod_id}/files.json"), &[])?;
        Ok(list.files)
    }

    fn file_details(
        &self,
        game: &str,
        mod_id: u64,
        file_id: u64,
    ) -> Result<FileMeta, CatalogError> {
        self.get(
            &format!("/games/{game}/mods/{mod_id}/files/{file_id}.json"),
            &[],
        )
    }

    fn mod_details(&self, game: &str, mod_id: u64) -> Result<ModMeta, CatalogError> {
        self.get(&format!("/games/{game}/mods/{mod_id}.json"), &[])
    }

    fn recently_updated(&self, game: &str, period: Period) -> Result<Vec<u64>, CatalogError> {
        let updated: Vec<UpdatedMod> = self.get(
            &format!("/games/{game}/mods/updated.json"),
            &[("period", period.as_query())],
        )?;
        Ok(updated.into_iter().map(|entry| entry.mod_id).collect())
    }

    fn tracked_mods(&self) -> Result<Vec<TrackedRemote>, CatalogError> {
        self.get("/user/tracked_mods.json", &[])
    }
}
