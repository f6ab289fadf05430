use crate::error::Error;
use crate::session::remote::api::{API_PREFIX, SID_HEADER};
use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Normalize an agent endpoint into a base URL.
///
/// A bare port number means a local agent, a missing scheme defaults to `http`.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, Error> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(Error::InvalidEndpoint(endpoint.to_string()));
    }
    if endpoint.chars().all(|c| c.is_ascii_digit()) {
        return Ok(format!("http://localhost:{endpoint}"));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return Ok(endpoint.trim_end_matches('/').to_string());
    }
    Ok(format!("http://{}", endpoint.trim_end_matches('/')))
}

/// Turn a transport error into a user-facing error.
/// A connection failure becomes "cannot connect to `url`", its root cause is kept as a reason.
fn connect_error(url: &str, err: reqwest::Error) -> Error {
    if !(err.is_connect() || err.is_timeout()) {
        return Error::Http(err);
    }

    let mut cause: &dyn std::error::Error = &err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    Error::Connection {
        url: url.to_string(),
        reason: cause.to_string(),
    }
}

/// Blocking HTTP client of the XDS agent REST API.
pub struct HttpClient {
    client: Client,
    base_url: String,
    client_id: String,
}

impl HttpClient {
    /// Connect to an agent, obtain a session credential (client ID).
    pub fn connect(base_url: &str) -> Result<Self, Error> {
        let client = Client::builder().build()?;
        let url = format!("{base_url}{API_PREFIX}/version");
        debug!(target: "remote", "GET {url}");
        let resp = client
            .get(&url)
            .send()
            .map_err(|e| connect_error(base_url, e))?;

        let client_id = resp
            .headers()
            .get(SID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::MissingClientId(base_url.to_string()))?
            .to_string();

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            client_id,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }

    fn send(&self, method: &'static str, path: &str, req: RequestBuilder) -> Result<Response, Error> {
        let resp = req
            .header(SID_HEADER, &self.client_id)
            .send()
            .map_err(|e| connect_error(&self.base_url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(Error::HttpStatus {
                method,
                path: path.to_string(),
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(resp)
    }

    /// GET a resource and return its raw body.
    pub fn get_raw(&self, path: &str) -> Result<Vec<u8>, Error> {
        debug!(target: "remote", "GET {path}");
        let resp = self.send("GET", path, self.client.get(self.url(path)))?;
        let body = resp.bytes()?.to_vec();
        debug!(target: "remote", "GET {path} -> {}", String::from_utf8_lossy(&body));
        Ok(body)
    }

    /// GET a JSON resource.
    pub fn get<T: DeserializeOwned>(&self, path: &'static str) -> Result<T, Error> {
        let body = self.get_raw(path)?;
        serde_json::from_slice(&body).map_err(|source| Error::Decode { what: path, source })
    }

    /// POST a JSON body, decode a JSON answer.
    pub fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &'static str,
        body: &B,
    ) -> Result<T, Error> {
        let body = self.post_raw(path, body)?;
        serde_json::from_slice(&body).map_err(|source| Error::Decode { what: path, source })
    }

    /// POST a JSON body, answer is ignored.
    pub fn post_raw<B: Serialize>(&self, path: &str, body: &B) -> Result<Vec<u8>, Error> {
        if log::log_enabled!(target: "remote", log::Level::Debug) {
            let payload = serde_json::to_string(body).unwrap_or_default();
            debug!(target: "remote", "POST {path} {payload}");
        }
        let resp = self.send("POST", path, self.client.post(self.url(path)).json(body))?;
        Ok(resp.bytes()?.to_vec())
    }
}
