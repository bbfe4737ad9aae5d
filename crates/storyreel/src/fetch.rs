use base64::Engine as _;
use storyreel_common::{Error, MediaKind, ResourceGauge, ResourceGuard, Result};

/// A story part's payload reference. The core only needs "resolves to raw
/// bytes"; the surrounding application hands us URLs or base64 data URIs
/// produced by the generation backends.
#[derive(Clone, Debug)]
pub enum MediaRef {
    Bytes(Vec<u8>),
    DataUri(String),
    Url(String),
}

/// Resolves [`MediaRef`]s to raw bytes. Owned by a single assembly run;
/// never shared between runs.
pub struct MediaFetcher {
    http: reqwest::Client,
    _guard: ResourceGuard,
}

impl MediaFetcher {
    pub fn new(gauge: &ResourceGauge) -> Self {
        Self {
            http: reqwest::Client::new(),
            _guard: gauge.acquire("media-fetcher"),
        }
    }

    /// Resolve one payload to raw bytes. `part` and `kind` only provide
    /// error context; a failed fetch for any payload aborts the whole run.
    pub async fn fetch(&self, part: usize, kind: MediaKind, source: &MediaRef) -> Result<Vec<u8>> {
        let fetch_err = |reason: String| Error::Fetch { part, kind, reason };

        match source {
            MediaRef::Bytes(data) => Ok(data.clone()),
            MediaRef::DataUri(uri) => decode_data_uri(uri).map_err(fetch_err),
            MediaRef::Url(url) => {
                tracing::debug!(part, %kind, url, "fetching payload");
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(fetch_err(format!("status {status}")));
                }
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))?;
                Ok(bytes.to_vec())
            }
        }
    }
}

fn decode_data_uri(uri: &str) -> std::result::Result<Vec<u8>, String> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| "not a data URI".to_string())?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "data URI has no payload".to_string())?;
    if !meta.ends_with(";base64") {
        return Err("only base64 data URIs are supported".to_string());
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid base64 payload: {e}"))
}
