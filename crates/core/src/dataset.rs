use crate::error::IngestError;
use crate::models::{Meta, MetaValue};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_DATASETS_SERVER: &str = "https://datasets-server.huggingface.co";
pub const DEFAULT_DATASET: &str = "bilgeyucel/seven-wonders";

/// One `{content, meta}` row of a structured corpus.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatasetRecord {
    pub content: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl DatasetRecord {
    pub fn meta_scalars(&self) -> Meta {
        self.meta
            .iter()
            .filter_map(|(key, value)| {
                MetaValue::from_json(value).map(|scalar| (key.clone(), scalar))
            })
            .collect()
    }
}

/// Reads records from a JSON array, or from JSON Lines when the extension is `.jsonl`.
pub fn load_records_file(path: &Path) -> Result<Vec<DatasetRecord>, IngestError> {
    let raw = std::fs::read_to_string(path)?;
    let is_jsonl = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));

    let records = if is_jsonl {
        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str::<DatasetRecord>(line).map_err(|error| {
                    IngestError::Dataset(format!(
                        "{}:{}: {error}",
                        path.display(),
                        number + 1
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?
    } else {
        serde_json::from_str::<Vec<DatasetRecord>>(&raw)
            .map_err(|error| IngestError::Dataset(format!("{}: {error}", path.display())))?
    };

    info!(path = %path.display(), records = records.len(), "loaded dataset file");
    Ok(records)
}

#[derive(Debug, Deserialize)]
struct RowsPage {
    #[serde(default)]
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: DatasetRecord,
}

/// A dataset split served by the Hugging Face datasets-server `rows` API.
#[derive(Debug, Clone)]
pub struct HubDataset {
    pub server: String,
    pub dataset: String,
    pub config: String,
    pub split: String,
    pub page_size: usize,
    client: Client,
}

impl HubDataset {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            server: DEFAULT_DATASETS_SERVER.to_string(),
            dataset: dataset.into(),
            config: "default".to_string(),
            split: "train".to_string(),
            page_size: 100,
            client: Client::new(),
        }
    }

    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = split.into();
        self
    }

    fn page_url(&self, offset: usize) -> Result<Url, IngestError> {
        let base = Url::parse(&self.server)?.join("rows")?;
        let offset = offset.to_string();
        let length = self.page_size.clamp(1, 100).to_string();
        Ok(Url::parse_with_params(
            base.as_str(),
            &[
                ("dataset", self.dataset.as_str()),
                ("config", self.config.as_str()),
                ("split", self.split.as_str()),
                ("offset", offset.as_str()),
                ("length", length.as_str()),
            ],
        )?)
    }

    pub async fn fetch_records(&self) -> Result<Vec<DatasetRecord>, IngestError> {
        let mut records = Vec::new();

        loop {
            let url = self.page_url(records.len())?;
            debug!(url = %url, "fetching dataset rows");
            let response = self.client.get(url).send().await?;

            if !response.status().is_success() {
                return Err(IngestError::Dataset(format!(
                    "rows request for {} returned {}",
                    self.dataset,
                    response.status()
                )));
            }

            let page: RowsPage = response.json().await?;
            let fetched = page.rows.len();
            records.extend(page.rows.into_iter().map(|entry| entry.row));

            let total = page.num_rows_total.unwrap_or(records.len());
            if fetched == 0 || records.len() >= total {
                break;
            }
        }

        info!(dataset = %self.dataset, split = %self.split, records = records.len(), "fetched dataset");
        Ok(records)
    }
}
