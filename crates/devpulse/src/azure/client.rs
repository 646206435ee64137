//! Azure DevOps REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use url::Url;

use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpRequest, HttpTransport};
use crate::platform::{
    self, ActivityBatch, ActivityKind, ActivityPage, ActivitySource, PageRequest, PlatformError,
};

use super::convert::{thread_comments, to_raw_commit, to_raw_pull_request, to_raw_review};
use super::error::AzureError;
use super::types::{AzureCommit, AzurePullRequest, AzureReviewer, AzureThread, ListResponse};

/// REST API version sent with every request.
pub const DEFAULT_API_VERSION: &str = "7.1";

/// Default host of Azure DevOps Services.
pub const AZURE_DEVOPS_HOST: &str = "https://dev.azure.com";

/// Activity source backed by the Azure DevOps Git REST API.
///
/// Performs exactly one request per page. Throttling and retries belong to
/// the caller.
#[derive(Clone)]
pub struct AzureDevOpsClient {
    transport: Arc<dyn HttpTransport>,
    api_version: String,
}

impl AzureDevOpsClient {
    /// Client over a reqwest transport with the given request timeout.
    pub fn new(request_timeout: Duration) -> Result<Self, AzureError> {
        let transport = ReqwestTransport::with_timeout(request_timeout)?;
        Ok(Self::new_with_transport(Arc::new(transport)))
    }

    pub fn new_with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// `{base}/{org}/{project}/_apis/git/repositories/{repo}/{tail..}?api-version=..`
    fn repository_url(&self, request: &PageRequest, tail: &[&str]) -> Result<Url, AzureError> {
        let coordinates = &request.repository;
        let mut url = Url::parse(&coordinates.base_url)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AzureError::Config(format!("base URL cannot hold a path: {}", coordinates.base_url)))?;
            segments.pop_if_empty().extend([
                coordinates.organization.as_str(),
                coordinates.project.as_str(),
                "_apis",
                "git",
                "repositories",
                coordinates.repository.as_str(),
            ]);
            segments.extend(tail);
        }
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    pub(crate) fn pull_requests_url(&self, request: &PageRequest) -> Result<Url, AzureError> {
        let mut url = self.repository_url(request, &["pullrequests"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("searchCriteria.status", "all")
                .append_pair("$top", &request.cursor.top.to_string())
                .append_pair("$skip", &request.cursor.skip.to_string());
            if let Some(from) = request.window.from {
                query
                    .append_pair("searchCriteria.queryTimeRangeType", request.time_range.as_str())
                    .append_pair("searchCriteria.minTime", &timestamp(from))
                    .append_pair("searchCriteria.maxTime", &timestamp(request.window.to));
            }
        }
        Ok(url)
    }

    pub(crate) fn commits_url(&self, request: &PageRequest) -> Result<Url, AzureError> {
        let mut url = self.repository_url(request, &["commits"])?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("searchCriteria.$top", &request.cursor.top.to_string())
                .append_pair("searchCriteria.$skip", &request.cursor.skip.to_string())
                .append_pair("searchCriteria.toDate", &timestamp(request.window.to));
            if let Some(from) = request.window.from {
                query.append_pair("searchCriteria.fromDate", &timestamp(from));
            }
        }
        Ok(url)
    }

    pub(crate) fn reviewers_url(&self, request: &PageRequest) -> Result<Url, AzureError> {
        let pull_request = request.require_pull_request().map_err(|e| AzureError::Config(e.to_string()))?;
        self.repository_url(request, &["pullRequests", pull_request, "reviewers"])
    }

    pub(crate) fn threads_url(&self, request: &PageRequest) -> Result<Url, AzureError> {
        let pull_request = request.require_pull_request().map_err(|e| AzureError::Config(e.to_string()))?;
        self.repository_url(request, &["pullRequests", pull_request, "threads"])
    }

    /// GET a list endpoint and unwrap its `value` array.
    async fn get_list<T: DeserializeOwned>(
        &self,
        url: Url,
        credential: &SecretString,
    ) -> Result<Vec<T>, AzureError> {
        let request = HttpRequest::get(url.as_str())
            .header("Accept", "application/json")
            .header("Authorization", basic_auth(credential));

        tracing::debug!(url = %url, "Azure DevOps request");
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(AzureError::Api {
                status: response.status,
                message: response.body_snippet(200),
                retry_after: response.retry_after(),
            });
        }

        let list: ListResponse<T> = serde_json::from_slice(&response.body)?;
        Ok(list.value)
    }

    async fn fetch(&self, request: &PageRequest) -> Result<ActivityPage, AzureError> {
        let credential = request.repository.credential.as_ref();

        match request.kind {
            ActivityKind::PullRequests => {
                let url = self.pull_requests_url(request)?;
                let items: Vec<AzurePullRequest> = self.get_list(url, credential).await?;
                let next = request.cursor.next_after(items.len());
                Ok(ActivityPage {
                    batch: ActivityBatch::PullRequests(items.into_iter().map(to_raw_pull_request).collect()),
                    next,
                })
            }
            ActivityKind::Commits => {
                let url = self.commits_url(request)?;
                let items: Vec<AzureCommit> = self.get_list(url, credential).await?;
                let next = request.cursor.next_after(items.len());
                Ok(ActivityPage {
                    batch: ActivityBatch::Commits(items.into_iter().map(to_raw_commit).collect()),
                    next,
                })
            }
            // Reviewers and threads are not paginated by the API.
            ActivityKind::Reviews => {
                let url = self.reviewers_url(request)?;
                let items: Vec<AzureReviewer> = self.get_list(url, credential).await?;
                let reviews = items
                    .into_iter()
                    .filter(|r| !r.is_container)
                    .map(to_raw_review)
                    .collect();
                Ok(ActivityPage {
                    batch: ActivityBatch::Reviews(reviews),
                    next: None,
                })
            }
            ActivityKind::Comments => {
                let url = self.threads_url(request)?;
                let threads: Vec<AzureThread> = self.get_list(url, credential).await?;
                let comments = threads.into_iter().flat_map(thread_comments).collect();
                Ok(ActivityPage {
                    batch: ActivityBatch::Comments(comments),
                    next: None,
                })
            }
        }
    }
}

#[async_trait]
impl ActivitySource for AzureDevOpsClient {
    fn name(&self) -> &str {
        "azure-devops"
    }

    async fn fetch_page(&self, request: &PageRequest) -> platform::Result<ActivityPage> {
        self.fetch(request).await.map_err(PlatformError::from)
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Personal access tokens go in HTTP Basic with an empty user name.
fn basic_auth(token: &SecretString) -> String {
    format!("Basic {}", BASE64.encode(format!(":{}", token.expose_secret())))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::http::{MockTransport, header_get};
    use crate::platform::{PageCursor, PullRequestTimeRange, RepositoryCoordinates, SyncWindow};

    fn request(kind: ActivityKind, window: SyncWindow, pull_request: Option<&str>) -> PageRequest {
        PageRequest {
            repository: RepositoryCoordinates {
                repository_id: Uuid::new_v4(),
                base_url: "https://dev.azure.com/".into(),
                organization: "contoso".into(),
                project: "Platform Team".into(),
                repository: "api".into(),
                credential: Arc::new(SecretString::from("pat-123")),
            },
            kind,
            window,
            cursor: PageCursor::first(2),
            time_range: PullRequestTimeRange::Created,
            pull_request: pull_request.map(str::to_string),
        }
    }

    fn to() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
    }

    fn pr(id: i64) -> serde_json::Value {
        json!({
            "pullRequestId": id,
            "title": format!("PR {id}"),
            "status": "active",
            "createdBy": { "id": "u-1", "displayName": "Ada", "uniqueName": "ada@contoso.com" },
            "creationDate": "2026-09-01T10:00:00Z",
            "sourceRefName": "refs/heads/feature",
            "targetRefName": "refs/heads/main"
        })
    }

    #[test]
    fn urls_are_built_from_coordinates() {
        let client = AzureDevOpsClient::new_with_transport(Arc::new(MockTransport::new()));
        let from = Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();
        let req = request(ActivityKind::PullRequests, SyncWindow::since(Some(from), to()), None);

        let url = client.pull_requests_url(&req).unwrap();
        assert!(url.as_str().starts_with(
            "https://dev.azure.com/contoso/Platform%20Team/_apis/git/repositories/api/pullrequests?"
        ));
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("api-version".into(), "7.1".into())));
        assert!(query.contains(&("searchCriteria.status".into(), "all".into())));
        assert!(query.contains(&("$top".into(), "2".into())));
        assert!(query.contains(&("searchCriteria.minTime".into(), "2026-09-01T00:00:00Z".into())));
        assert!(query.contains(&("searchCriteria.queryTimeRangeType".into(), "created".into())));

        let closed = PageRequest {
            time_range: PullRequestTimeRange::Closed,
            ..req.clone()
        };
        let query: Vec<(String, String)> = client
            .pull_requests_url(&closed)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect();
        assert!(query.contains(&("searchCriteria.queryTimeRangeType".into(), "closed".into())));
        assert!(query.contains(&("searchCriteria.minTime".into(), "2026-09-01T00:00:00Z".into())));
        assert!(query.contains(&("searchCriteria.maxTime".into(), "2026-10-01T00:00:00Z".into())));

        let unbounded = request(ActivityKind::PullRequests, SyncWindow::full(to()), None);
        assert!(
            !client
                .pull_requests_url(&unbounded)
                .unwrap()
                .as_str()
                .contains("queryTimeRangeType")
        );

        let full = request(ActivityKind::Commits, SyncWindow::full(to()), None);
        let url = client.commits_url(&full).unwrap();
        assert!(!url.as_str().contains("fromDate"));
        assert!(url.as_str().contains("toDate"));

        let reviews = request(ActivityKind::Reviews, SyncWindow::full(to()), Some("42"));
        assert!(
            client
                .reviewers_url(&reviews)
                .unwrap()
                .path()
                .ends_with("/pullRequests/42/reviewers")
        );
        let orphan = request(ActivityKind::Comments, SyncWindow::full(to()), None);
        assert!(client.threads_url(&orphan).is_err());
    }

    #[tokio::test]
    async fn full_page_has_next_cursor_and_sends_basic_auth() {
        let transport = MockTransport::new();
        let client = AzureDevOpsClient::new_with_transport(Arc::new(transport.clone()));
        let req = request(ActivityKind::PullRequests, SyncWindow::full(to()), None);
        let url = client.pull_requests_url(&req).unwrap();
        transport.push_json(url.as_str(), 200, json!({ "count": 2, "value": [pr(1), pr(2)] }));

        let page = client.fetch_page(&req).await.unwrap();
        assert_eq!(page.batch.len(), 2);
        assert_eq!(page.next, Some(PageCursor { skip: 2, top: 2 }));

        let sent = transport.requests();
        assert_eq!(
            header_get(&sent[0].headers, "authorization"),
            Some(format!("Basic {}", BASE64.encode(":pat-123")).as_str())
        );
    }

    #[tokio::test]
    async fn short_page_ends_pagination() {
        let transport = MockTransport::new();
        let client = AzureDevOpsClient::new_with_transport(Arc::new(transport.clone()));
        let req = request(ActivityKind::PullRequests, SyncWindow::full(to()), None);
        let url = client.pull_requests_url(&req).unwrap();
        transport.push_json(url.as_str(), 200, json!({ "count": 1, "value": [pr(1)] }));

        let page = client.fetch_page(&req).await.unwrap();
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn reviewer_groups_are_skipped() {
        let transport = MockTransport::new();
        let client = AzureDevOpsClient::new_with_transport(Arc::new(transport.clone()));
        let req = request(ActivityKind::Reviews, SyncWindow::full(to()), Some("42"));
        let url = client.reviewers_url(&req).unwrap();
        transport.push_json(
            url.as_str(),
            200,
            json!({ "value": [
                { "id": "u-2", "displayName": "Grace", "uniqueName": "grace@contoso.com", "vote": 10, "isRequired": true },
                { "id": "g-1", "displayName": "[Platform]\\Reviewers", "vote": 10, "isContainer": true }
            ]}),
        );

        let page = client.fetch_page(&req).await.unwrap();
        match page.batch {
            ActivityBatch::Reviews(reviews) => {
                assert_eq!(reviews.len(), 1);
                assert_eq!(reviews[0].vote, 10);
                assert!(reviews[0].is_required);
            }
            other => panic!("unexpected batch: {other:?}"),
        }
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn error_statuses_map_to_platform_errors() {
        let transport = MockTransport::new();
        let client = AzureDevOpsClient::new_with_transport(Arc::new(transport.clone()));
        let req = request(ActivityKind::Commits, SyncWindow::full(to()), None);
        let url = client.commits_url(&req).unwrap();

        transport.push_json(url.as_str(), 401, json!({ "message": "TF400813" }));
        transport.push_response(
            crate::http::HttpMethod::Get,
            url.as_str(),
            crate::http::HttpResponse {
                status: 429,
                headers: vec![("Retry-After".into(), "30".into())],
                body: Vec::new(),
            },
        );
        transport.push_json(url.as_str(), 503, json!({}));
        transport.push_failure(url.as_str(), "connection reset");
        transport.push_response(
            crate::http::HttpMethod::Get,
            url.as_str(),
            crate::http::HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"<html>sign in</html>".to_vec(),
            },
        );

        let auth = client.fetch_page(&req).await.unwrap_err();
        assert!(matches!(auth, PlatformError::Auth { .. }));
        assert!(!auth.is_transient());

        assert!(client.fetch_page(&req).await.unwrap_err().is_rate_limited());
        assert!(matches!(
            client.fetch_page(&req).await.unwrap_err(),
            PlatformError::Server { status: 503, .. }
        ));
        assert!(matches!(
            client.fetch_page(&req).await.unwrap_err(),
            PlatformError::Network { .. }
        ));
        assert!(matches!(
            client.fetch_page(&req).await.unwrap_err(),
            PlatformError::Decode { .. }
        ));
    }
}
