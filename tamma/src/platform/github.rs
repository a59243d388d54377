//! GitHub REST adapter: provider DTOs mapped into the internal models.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::types::{
    Branch, CiStatus, Commit, Issue, IssueComment, PrState, PullRequest, Repository,
};

use super::{
    combine_ci, with_rate_limit, CheckOutcome, CreatePullRequest, GitPlatform, IssueFilter,
    IssueUpdate, MergeMethod, PlatformError, PullRequestUpdate, DEFAULT_RETRY_ATTEMPTS,
};

const DEFAULT_BASE_URL: &str = "https://api.github.com";

static ISSUE_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\d+)").expect("static regex"));

/// Inline `#<number>` references in free text.
pub fn extract_issue_refs(text: &str) -> Vec<u64> {
    let mut refs: Vec<u64> = ISSUE_REF_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect();
    refs.sort_unstable();
    refs.dedup();
    refs
}

// --- provider DTOs ---------------------------------------------------------

#[derive(Deserialize)]
struct UserDto {
    login: String,
}

#[derive(Deserialize)]
struct LabelDto {
    name: String,
}

#[derive(Deserialize)]
struct RepoDto {
    name: String,
    owner: UserDto,
    default_branch: String,
    html_url: String,
}

#[derive(Deserialize)]
struct RefObjectDto {
    sha: String,
}

#[derive(Deserialize)]
struct RefDto {
    #[serde(rename = "ref")]
    git_ref: String,
    object: RefObjectDto,
}

#[derive(Deserialize)]
struct IssueDto {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<LabelDto>,
    #[serde(default)]
    assignees: Vec<UserDto>,
    html_url: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    /// Present when the "issue" is actually a pull request.
    #[serde(default)]
    pull_request: Option<Value>,
}

#[derive(Deserialize)]
struct CommentDto {
    user: UserDto,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PrBranchDto {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    sha: String,
}

#[derive(Deserialize)]
struct PrDto {
    number: u64,
    state: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    mergeable: Option<bool>,
    head: PrBranchDto,
    base: PrBranchDto,
    #[serde(default)]
    labels: Vec<LabelDto>,
    html_url: String,
}

#[derive(Deserialize)]
struct CombinedStatusDto {
    #[serde(default)]
    statuses: Vec<StatusItemDto>,
}

#[derive(Deserialize)]
struct StatusItemDto {
    state: String,
}

#[derive(Deserialize)]
struct CheckRunsDto {
    #[serde(default)]
    check_runs: Vec<CheckRunDto>,
}

#[derive(Deserialize)]
struct CheckRunDto {
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct CommitDto {
    sha: String,
    commit: CommitDetailDto,
}

#[derive(Deserialize)]
struct CommitDetailDto {
    message: String,
    author: CommitAuthorDto,
}

#[derive(Deserialize)]
struct CommitAuthorDto {
    #[serde(default)]
    name: String,
    date: DateTime<Utc>,
}

// --- mappers ---------------------------------------------------------------

fn map_issue(dto: IssueDto, comments: Vec<IssueComment>) -> Issue {
    let body = dto.body.unwrap_or_default();
    Issue {
        number: dto.number,
        title: dto.title,
        related: extract_issue_refs(&body),
        body,
        labels: dto.labels.into_iter().map(|l| l.name).collect(),
        assignees: dto.assignees.into_iter().map(|a| a.login).collect(),
        url: dto.html_url,
        created_at: dto.created_at,
        updated_at: dto.updated_at,
        comments,
    }
}

fn map_pr(dto: PrDto) -> PullRequest {
    let state = if dto.merged {
        PrState::Merged
    } else if dto.state == "open" {
        PrState::Open
    } else {
        PrState::Closed
    };
    PullRequest {
        number: dto.number,
        head: dto.head.git_ref,
        head_sha: dto.head.sha,
        base: dto.base.git_ref,
        state,
        mergeable: dto.mergeable,
        labels: dto.labels.into_iter().map(|l| l.name).collect(),
        url: dto.html_url,
    }
}

fn status_outcome(state: &str) -> CheckOutcome {
    match state {
        "success" => CheckOutcome::Success,
        "failure" | "error" => CheckOutcome::Failure,
        _ => CheckOutcome::Pending,
    }
}

fn check_run_outcome(run: &CheckRunDto) -> CheckOutcome {
    if run.status != "completed" {
        return CheckOutcome::Pending;
    }
    match run.conclusion.as_deref() {
        Some("success") | Some("neutral") | Some("skipped") => CheckOutcome::Success,
        _ => CheckOutcome::Failure,
    }
}

// --- adapter ---------------------------------------------------------------

/// GitHub REST implementation of [`GitPlatform`].
pub struct GitHubPlatform {
    http: reqwest::Client,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
    retry_attempts: u32,
}

impl GitHubPlatform {
    pub fn new(
        token: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            owner: owner.into(),
            repo: repo.into(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    /// Point the adapter at a different API host (tests, GHES).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{path}",
            self.base_url, self.owner, self.repo
        )
    }

    async fn send(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, PlatformError> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header("authorization", format!("Bearer {}", self.token))
            .header("accept", "application/vnd.github+json")
            .header("user-agent", "tamma");
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound(format!("{operation}: {path}")));
        }
        let message = response.text().await.unwrap_or_default();
        // 403 bodies mentioning rate limits are retryable rate limiting.
        if status == StatusCode::FORBIDDEN && message.to_lowercase().contains("rate limit") {
            return Err(PlatformError::RateLimited {
                operation: operation.to_string(),
            });
        }
        Err(PlatformError::Http {
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
    ) -> Result<T, PlatformError> {
        let response = self.send(operation, Method::GET, path, None).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::Decode {
                operation: operation.to_string(),
                message: e.to_string(),
            })
    }

    async fn fetch_comments(&self, number: u64) -> Result<Vec<IssueComment>, PlatformError> {
        let dtos: Vec<CommentDto> = self
            .get_json("issue comments", &format!("/issues/{number}/comments"))
            .await?;
        Ok(dtos
            .into_iter()
            .map(|c| IssueComment {
                author: c.user.login,
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl GitPlatform for GitHubPlatform {
    async fn get_repository(&self) -> Result<Repository, PlatformError> {
        let dto = with_rate_limit("get repository", self.retry_attempts, || async {
            self.get_json::<RepoDto>("get repository", "").await
        })
        .await?;
        Ok(Repository {
            owner: dto.owner.login,
            name: dto.name,
            default_branch: dto.default_branch,
            url: dto.html_url,
        })
    }

    async fn get_branch(&self, name: &str) -> Result<Option<Branch>, PlatformError> {
        let result = with_rate_limit("get branch", self.retry_attempts, || async {
            self.get_json::<RefDto>("get branch", &format!("/git/ref/heads/{name}"))
                .await
        })
        .await;
        match result {
            Ok(dto) => Ok(Some(Branch {
                name: dto
                    .git_ref
                    .strip_prefix("refs/heads/")
                    .unwrap_or(&dto.git_ref)
                    .to_string(),
                sha: dto.object.sha,
            })),
            Err(PlatformError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<Branch, PlatformError> {
        let base = self
            .get_branch(from)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("base branch {from}")))?;
        with_rate_limit("create branch", self.retry_attempts, || async {
            let body = json!({
                "ref": format!("refs/heads/{name}"),
                "sha": base.sha,
            });
            let response = self
                .send("create branch", Method::POST, "/git/refs", Some(body))
                .await?;
            let dto: RefDto = response.json().await.map_err(|e| PlatformError::Decode {
                operation: "create branch".into(),
                message: e.to_string(),
            })?;
            debug!(branch = name, sha = %dto.object.sha, "branch created");
            Ok(Branch {
                name: name.to_string(),
                sha: dto.object.sha,
            })
        })
        .await
    }

    async fn delete_branch(&self, name: &str) -> Result<(), PlatformError> {
        with_rate_limit("delete branch", self.retry_attempts, || async {
            self.send(
                "delete branch",
                Method::DELETE,
                &format!("/git/refs/heads/{name}"),
                None,
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn get_issue(&self, number: u64) -> Result<Issue, PlatformError> {
        let dto = with_rate_limit("get issue", self.retry_attempts, || async {
            self.get_json::<IssueDto>("get issue", &format!("/issues/{number}"))
                .await
        })
        .await?;
        let comments = self.fetch_comments(number).await.unwrap_or_default();
        Ok(map_issue(dto, comments))
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, PlatformError> {
        let mut path = String::from("/issues?per_page=100");
        if filter.open_only {
            path.push_str("&state=open");
        } else {
            path.push_str("&state=all");
        }
        if !filter.labels.is_empty() {
            path.push_str(&format!("&labels={}", filter.labels.join(",")));
        }
        let dtos = with_rate_limit("list issues", self.retry_attempts, || async {
            self.get_json::<Vec<IssueDto>>("list issues", &path).await
        })
        .await?;
        Ok(dtos
            .into_iter()
            .filter(|d| d.pull_request.is_none())
            .map(|d| map_issue(d, Vec::new()))
            .collect())
    }

    async fn update_issue(
        &self,
        number: u64,
        update: &IssueUpdate,
    ) -> Result<(), PlatformError> {
        with_rate_limit("update issue", self.retry_attempts, || async {
            let body = serde_json::to_value(update).unwrap_or(Value::Null);
            self.send(
                "update issue",
                Method::PATCH,
                &format!("/issues/{number}"),
                Some(body),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn add_issue_comment(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        with_rate_limit("add issue comment", self.retry_attempts, || async {
            self.send(
                "add issue comment",
                Method::POST,
                &format!("/issues/{number}/comments"),
                Some(json!({ "body": body })),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn assign_issue(&self, number: u64, assignee: &str) -> Result<(), PlatformError> {
        with_rate_limit("assign issue", self.retry_attempts, || async {
            self.send(
                "assign issue",
                Method::POST,
                &format!("/issues/{number}/assignees"),
                Some(json!({ "assignees": [assignee] })),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn create_pr(
        &self,
        request: &CreatePullRequest,
    ) -> Result<PullRequest, PlatformError> {
        let dto = with_rate_limit("create pr", self.retry_attempts, || async {
            let body = json!({
                "title": request.title,
                "body": request.body,
                "head": request.head,
                "base": request.base,
            });
            let response = self.send("create pr", Method::POST, "/pulls", Some(body)).await?;
            response
                .json::<PrDto>()
                .await
                .map_err(|e| PlatformError::Decode {
                    operation: "create pr".into(),
                    message: e.to_string(),
                })
        })
        .await?;
        if !request.labels.is_empty() {
            // Labels ride the issues endpoint; a label failure leaves the PR
            // itself intact.
            let number = dto.number;
            let _ = with_rate_limit("label pr", self.retry_attempts, || async {
                self.send(
                    "label pr",
                    Method::POST,
                    &format!("/issues/{number}/labels"),
                    Some(json!({ "labels": request.labels })),
                )
                .await
                .map(|_| ())
            })
            .await;
        }
        Ok(map_pr(dto))
    }

    async fn get_pr(&self, number: u64) -> Result<PullRequest, PlatformError> {
        let dto = with_rate_limit("get pr", self.retry_attempts, || async {
            self.get_json::<PrDto>("get pr", &format!("/pulls/{number}"))
                .await
        })
        .await?;
        Ok(map_pr(dto))
    }

    async fn update_pr(
        &self,
        number: u64,
        update: &PullRequestUpdate,
    ) -> Result<PullRequest, PlatformError> {
        let dto = with_rate_limit("update pr", self.retry_attempts, || async {
            let body = serde_json::to_value(update).unwrap_or(Value::Null);
            let response = self
                .send(
                    "update pr",
                    Method::PATCH,
                    &format!("/pulls/{number}"),
                    Some(body),
                )
                .await?;
            response
                .json::<PrDto>()
                .await
                .map_err(|e| PlatformError::Decode {
                    operation: "update pr".into(),
                    message: e.to_string(),
                })
        })
        .await?;
        Ok(map_pr(dto))
    }

    async fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<(), PlatformError> {
        with_rate_limit("merge pr", self.retry_attempts, || async {
            self.send(
                "merge pr",
                Method::PUT,
                &format!("/pulls/{number}/merge"),
                Some(json!({ "merge_method": method.as_str() })),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    async fn add_pr_comment(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        self.add_issue_comment(number, body).await
    }

    async fn get_ci_status(&self, sha: &str) -> Result<CiStatus, PlatformError> {
        let combined = with_rate_limit("ci status", self.retry_attempts, || async {
            self.get_json::<CombinedStatusDto>("ci status", &format!("/commits/{sha}/status"))
                .await
        })
        .await?;
        let check_runs = with_rate_limit("check runs", self.retry_attempts, || async {
            self.get_json::<CheckRunsDto>("check runs", &format!("/commits/{sha}/check-runs"))
                .await
        })
        .await
        .unwrap_or(CheckRunsDto {
            check_runs: Vec::new(),
        });

        let mut outcomes: Vec<CheckOutcome> = combined
            .statuses
            .iter()
            .map(|s| status_outcome(&s.state))
            .collect();
        outcomes.extend(check_runs.check_runs.iter().map(check_run_outcome));
        Ok(combine_ci(&outcomes))
    }

    async fn list_commits(
        &self,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<Commit>, PlatformError> {
        let dtos = with_rate_limit("list commits", self.retry_attempts, || async {
            self.get_json::<Vec<CommitDto>>(
                "list commits",
                &format!("/commits?sha={branch}&per_page={limit}"),
            )
            .await
        })
        .await?;
        Ok(dtos
            .into_iter()
            .map(|d| Commit {
                sha: d.sha,
                message: d.commit.message,
                author: d.commit.author.name,
                date: d.commit.author.date,
            })
            .collect())
    }
}
