// Hand-crafted async HTTP client for the Tasklane REST surface.
//
// Base path: /rest/v1/
// Auth: `apikey` + `Authorization: Bearer` headers
// Row filters use PostgREST operators (`id=eq.<id>`, `status=neq.closed`).

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::Error;
use crate::model::{Project, ProjectList, Task, TaskList, TaskQuery, TaskUpdate};
use crate::transport::{Transport, TransportConfig};

// ── Error response shape ─────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────

/// [`Transport`] implementation over HTTP.
///
/// Each method issues exactly one request. Cloning is cheap: the inner
/// `reqwest::Client` is reference counted.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from a service URL and API key.
    ///
    /// Injects `apikey` and `Authorization: Bearer` as default headers,
    /// both marked sensitive so they never show up in debug output.
    pub fn from_api_key(
        base_url: &str,
        api_key: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();

        let mut key_value = HeaderValue::from_str(api_key.expose_secret()).map_err(|e| {
            Error::Authentication {
                message: format!("invalid API key header value: {e}"),
            }
        })?;
        key_value.set_sensitive(true);
        headers.insert("apikey", key_value);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
            .map_err(|e| Error::Authentication {
                message: format!("invalid API key header value: {e}"),
            })?;
        bearer.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let http = transport.build_client(headers)?;
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let base_url = Self::normalize_base_url(base_url)?;
        Ok(Self { http, base_url })
    }

    /// `https://host/` and `https://host/rest/v1` both become
    /// `https://host/rest/v1/`.
    fn normalize_base_url(raw: &str) -> Result<Url, Error> {
        let mut url = Url::parse(raw)?;
        let path = url.path().trim_end_matches('/').to_owned();

        if path.ends_with("/rest/v1") {
            url.set_path(&format!("{path}/"));
        } else {
            url.set_path(&format!("{path}/rest/v1/"));
        }
        Ok(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    // ── HTTP verbs ───────────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("GET {url} params={params:?}");

        let resp = self.http.get(url).query(params).send().await?;
        handle_response(resp).await
    }

    async fn patch<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        params: &[(&str, String)],
        body: &B,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("PATCH {url} params={params:?}");

        let resp = self
            .http
            .patch(url)
            .query(params)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        handle_response(resp).await
    }

    async fn delete(&self, path: &str, params: &[(&str, String)]) -> Result<(), Error> {
        let url = self.url(path)?;
        debug!("DELETE {url} params={params:?}");

        let resp = self.http.delete(url).query(params).send().await?;
        handle_empty(resp).await
    }
}

// ── Query builders ───────────────────────────────────────────────────

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

fn task_params(query: &TaskQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![("select", "*".to_owned())];
    if let Some(ref project) = query.project_id {
        params.push(("project_id", eq(project)));
    }
    if let Some(status) = query.status {
        params.push(("status", eq(&status.to_string())));
    }
    if !query.include_closed {
        params.push(("status", "neq.closed".to_owned()));
    }
    params.push(("order", "updated_at.desc".to_owned()));
    params
}

fn by_id(id: &str) -> Vec<(&'static str, String)> {
    vec![("id", eq(id)), ("select", "*".to_owned())]
}

fn first_row<T>(rows: Vec<T>, resource: &'static str, id: &str) -> Result<T, Error> {
    rows.into_iter().next().ok_or_else(|| Error::NotFound {
        resource,
        id: id.to_owned(),
    })
}

// ── Response handling ────────────────────────────────────────────────

async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    } else {
        Err(parse_error(status, resp).await)
    }
}

async fn handle_empty(resp: reqwest::Response) -> Result<(), Error> {
    let status = resp.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(parse_error(status, resp).await)
    }
}

async fn parse_error(status: reqwest::StatusCode, resp: reqwest::Response) -> Error {
    let raw = resp.text().await.unwrap_or_default();
    let reason = status.canonical_reason().unwrap_or("unknown status");

    let message = serde_json::from_str::<ErrorResponse>(&raw)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or_else(|| if raw.is_empty() { reason.to_owned() } else { raw });

    if matches!(
        status,
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN
    ) {
        return Error::Authentication { message };
    }

    Error::Http {
        status: status.as_u16(),
        message,
    }
}

// ── Transport impl ───────────────────────────────────────────────────

impl Transport for HttpTransport {
    async fn list_tasks(&self, query: &TaskQuery) -> Result<TaskList, Error> {
        self.get("tasks", &task_params(query)).await
    }

    async fn get_task(&self, id: &str) -> Result<Task, Error> {
        let rows: Vec<Task> = self.get("tasks", &by_id(id)).await?;
        first_row(rows, "task", id)
    }

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Task, Error> {
        let rows: Vec<Task> = self.patch("tasks", &[("id", eq(id))], update).await?;
        first_row(rows, "task", id)
    }

    async fn delete_task(&self, id: &str) -> Result<(), Error> {
        self.delete("tasks", &[("id", eq(id))]).await
    }

    async fn list_projects(&self) -> Result<ProjectList, Error> {
        self.get(
            "projects",
            &[("select", "*".to_owned()), ("order", "name.asc".to_owned())],
        )
        .await
    }

    async fn get_project(&self, id: &str) -> Result<Project, Error> {
        let rows: Vec<Project> = self.get("projects", &by_id(id)).await?;
        first_row(rows, "project", id)
    }

    async fn health_check(&self) -> Result<(), Error> {
        let url = self.url("")?;
        debug!("GET {url} (health)");
        let resp = self.http.get(url).send().await?;
        handle_empty(resp).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_rest_prefix() {
        let url = HttpTransport::normalize_base_url("https://tasks.example.com").unwrap();
        assert_eq!(url.as_str(), "https://tasks.example.com/rest/v1/");

        let url = HttpTransport::normalize_base_url("https://tasks.example.com/rest/v1/").unwrap();
        assert_eq!(url.as_str(), "https://tasks.example.com/rest/v1/");
    }

    #[test]
    fn task_params_hide_closed_by_default() {
        let params = task_params(&TaskQuery::for_project("p-1"));
        assert!(params.contains(&("project_id", "eq.p-1".to_owned())));
        assert!(params.contains(&("status", "neq.closed".to_owned())));

        let all = task_params(&TaskQuery {
            include_closed: true,
            ..TaskQuery::default()
        });
        assert!(!all.iter().any(|(k, _)| *k == "status"));
    }
}
