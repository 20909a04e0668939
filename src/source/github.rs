//! GitHub REST API source.
//!
//! - `GET /repos/{owner}/{repo}/commits/{ref}` resolves a reference.
//! - `GET /repos/{owner}/{repo}/git/trees/{commit}?recursive=1` lists files.
//! - `GET /repos/{owner}/{repo}/git/blobs/{sha}` fetches base64 content.
//! - `GET /repos/{owner}/{repo}/tarball/{commit}` fetches a full archive.
//!
//! Authentication, in order of preference:
//!
//! | Mode | Requires |
//! |------|----------|
//! | GitHub App installation | `source.installation_id`, `GITHUB_APP_ID`, `GITHUB_PRIVATE_KEY` or `GITHUB_PRIVATE_KEY_PATH` |
//! | Token | `GITHUB_TOKEN` |
//! | Anonymous | nothing (public repositories only, low rate limit) |
//!
//! Installation tokens are minted from a short-lived RS256 app JWT and
//! cached until shortly before they expire.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{EntryKind, RepoSource, TreeEntry, TreeListing};
use crate::config::{env_secret, require_env, SourceConfig};
use crate::error::PipelineError;

/// Installation tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
/// App JWTs may live at most ten minutes; `iat` is backdated for clock skew.
const APP_JWT_TTL_SECS: i64 = 540;
const APP_JWT_BACKDATE_SECS: i64 = 60;

pub struct GitHubSource {
    api_url: String,
    auth: GitHubAuth,
    client: reqwest::Client,
}

enum GitHubAuth {
    Anonymous,
    Token(String),
    App(AppAuth),
}

struct AppAuth {
    app_id: String,
    key: EncodingKey,
    installation_id: u64,
    cached: Mutex<Option<InstallationToken>>,
}

#[derive(Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
struct BlobResponse {
    content: String,
    #[serde(default)]
    encoding: String,
}

impl AppAuth {
    fn from_env(installation_id: u64) -> Result<Self> {
        let purpose = "GitHub App authentication (source.installation_id)";
        let app_id = require_env("GITHUB_APP_ID", purpose)?;
        let pem = match env_secret("GITHUB_PRIVATE_KEY") {
            Some(raw) => raw,
            None => {
                let path = require_env("GITHUB_PRIVATE_KEY_PATH", purpose)?;
                std::fs::read_to_string(&path)
                    .map_err(|e| PipelineError::config(format!("cannot read {}: {}", path, e)))?
            }
        };
        Self::new(app_id, &pem, installation_id)
    }

    fn new(app_id: String, pem: &str, installation_id: u64) -> Result<Self> {
        // Keys passed through env files often carry literal `\n`.
        let pem = pem.replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| PipelineError::config(format!("invalid GitHub App private key: {}", e)))?;
        Ok(Self {
            app_id,
            key,
            installation_id,
            cached: Mutex::new(None),
        })
    }

    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - APP_JWT_BACKDATE_SECS,
            exp: now + APP_JWT_TTL_SECS,
            iss: self.app_id.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .context("Failed to sign GitHub App JWT")
    }

    async fn installation_token(&self, client: &reqwest::Client, api_url: &str) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            let refresh_at = token.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
            if Utc::now() < refresh_at {
                return Ok(token.token.clone());
            }
        }

        let url = format!(
            "{}/app/installations/{}/access_tokens",
            api_url, self.installation_id
        );
        let resp = client
            .post(&url)
            .bearer_auth(self.app_jwt()?)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|e| anyhow!("GitHub installation token request failed: {}", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "GitHub App installation {} rejected: {} {}",
                self.installation_id,
                status,
                body.chars().take(300).collect::<String>()
            );
        }
        let token: InstallationToken = resp
            .json()
            .await
            .context("Invalid installation token response")?;
        debug!(
            installation_id = self.installation_id,
            expires_at = %token.expires_at,
            "minted GitHub installation token"
        );
        let value = token.token.clone();
        *cached = Some(token);
        Ok(value)
    }
}

impl GitHubSource {
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("rctx/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let auth = match (config.installation_id, env_secret("GITHUB_TOKEN")) {
            (Some(id), _) => GitHubAuth::App(AppAuth::from_env(id)?),
            (None, Some(token)) => GitHubAuth::Token(token),
            (None, None) => GitHubAuth::Anonymous,
        };
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    fn auth_mode(&self) -> &'static str {
        match self.auth {
            GitHubAuth::Anonymous => "anonymous",
            GitHubAuth::Token(_) => "token",
            GitHubAuth::App(_) => "installation",
        }
    }

    async fn bearer(&self) -> Result<Option<String>> {
        match &self.auth {
            GitHubAuth::Anonymous => Ok(None),
            GitHubAuth::Token(token) => Ok(Some(token.clone())),
            GitHubAuth::App(app) => app
                .installation_token(&self.client, &self.api_url)
                .await
                .map(Some),
        }
    }

    async fn get(&self, path: &str, accept: &str) -> Result<reqwest::Response> {
        let mut req = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = self.bearer().await? {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| anyhow!("GitHub request {} failed: {}", path, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(auth = self.auth_mode(), status = status.as_u16(), path, "GitHub request rejected");
            bail!(
                "GitHub API error {} for {}: {}",
                status,
                path,
                body.chars().take(300).collect::<String>()
            );
        }
        Ok(resp)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(path, "application/vnd.github+json")
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("Invalid GitHub response for {}", path))
    }
}

#[async_trait]
impl RepoSource for GitHubSource {
    fn name(&self) -> &str {
        "github"
    }

    async fn resolve_commit(&self, owner: &str, repo: &str, reference: &str) -> Result<String> {
        let path = format!("/repos/{}/{}/commits/{}", owner, repo, reference);
        let commit: CommitResponse =
            self.get_json(&path)
                .await
                .map_err(|e| PipelineError::CommitResolution {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    reference: reference.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(commit.sha)
    }

    async fn list_tree(&self, owner: &str, repo: &str, commit: &str) -> Result<TreeListing> {
        let path = format!("/repos/{}/{}/git/trees/{}?recursive=1", owner, repo, commit);
        let tree: TreeResponse =
            self.get_json(&path)
                .await
                .map_err(|e| PipelineError::TreeFetch {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    commit: commit.to_string(),
                    reason: e.to_string(),
                })?;

        let entries = tree
            .tree
            .into_iter()
            .map(|item| TreeEntry {
                path: item.path,
                kind: EntryKind::parse(&item.kind),
                sha: item.sha,
                size: item.size,
            })
            .collect();
        Ok(TreeListing {
            entries,
            truncated: tree.truncated,
        })
    }

    async fn fetch_blob(&self, owner: &str, repo: &str, sha: &str) -> Result<Vec<u8>> {
        let path = format!("/repos/{}/{}/git/blobs/{}", owner, repo, sha);
        let blob: BlobResponse = self.get_json(&path).await?;
        decode_blob(&blob)
    }

    async fn fetch_archive(&self, owner: &str, repo: &str, commit: &str) -> Result<Vec<u8>> {
        let path = format!("/repos/{}/{}/tarball/{}", owner, repo, commit);
        let bytes = self
            .get(&path, "application/vnd.github+json")
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to read archive body for {}", path))?;
        Ok(bytes.to_vec())
    }
}

fn decode_blob(blob: &BlobResponse) -> Result<Vec<u8>> {
    match blob.encoding.as_str() {
        "base64" | "" => {
            // GitHub wraps base64 content at 60 columns.
            let compact: String = blob.content.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .context("Invalid base64 blob content")
        }
        "utf-8" => Ok(blob.content.clone().into_bytes()),
        other => bail!("Unsupported blob encoding: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{bearer_token, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn source(url: &str) -> GitHubSource {
        GitHubSource {
            api_url: url.to_string(),
            auth: GitHubAuth::Anonymous,
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn test_decode_wrapped_base64() {
        let blob = BlobResponse {
            content: "aGVsbG8g\nd29ybGQ=\n".into(),
            encoding: "base64".into(),
        };
        assert_eq!(decode_blob(&blob).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_list_tree_maps_entries_and_truncation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/git/trees/abc"))
            .and(query_param("recursive", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "t1",
                "truncated": true,
                "tree": [
                    {"path": "src", "type": "tree", "sha": "a1"},
                    {"path": "src/main.rs", "type": "blob", "sha": "b1", "size": 12},
                    {"path": "vendor/lib", "type": "commit", "sha": "c1"}
                ]
            })))
            .mount(&server)
            .await;

        let listing = source(&server.uri())
            .list_tree("acme", "widgets", "abc")
            .await
            .unwrap();
        assert!(listing.truncated);
        assert_eq!(listing.entries.len(), 3);
        assert_eq!(listing.entries[1].kind, EntryKind::Blob);
        assert_eq!(listing.entries[1].size, Some(12));
        assert_eq!(listing.entries[2].kind, EntryKind::Commit);
    }

    #[tokio::test]
    async fn test_fetch_blob_decodes_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/git/blobs/b1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "aGVsbG8g\nd29ybGQ=\n",
                "encoding": "base64"
            })))
            .mount(&server)
            .await;

        let bytes = source(&server.uri())
            .fetch_blob("acme", "widgets", "b1")
            .await
            .unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn test_fetch_archive_returns_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/tarball/abc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/x-gzip")
                    .set_body_bytes(vec![0x1f, 0x8b, 0x08, 0x00]),
            )
            .mount(&server)
            .await;

        let bytes = source(&server.uri())
            .fetch_archive("acme", "widgets", "abc")
            .await
            .unwrap();
        assert_eq!(bytes, vec![0x1f, 0x8b, 0x08, 0x00]);
    }

    const APP_KEY: &str = include_str!("testdata/github_app_key.pem");

    #[tokio::test]
    async fn test_app_installation_token_is_minted_once_and_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/77/access_tokens"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "token": "ghs_installation",
                "expires_at": "2099-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/main"))
            .and(bearer_token("ghs_installation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sha": "0123456789abcdef0123456789abcdef01234567"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let github = GitHubSource {
            api_url: server.uri(),
            auth: GitHubAuth::App(AppAuth::new("123".into(), APP_KEY, 77).unwrap()),
            client: reqwest::Client::new(),
        };
        for _ in 0..2 {
            let sha = github.resolve_commit("acme", "widgets", "main").await.unwrap();
            assert_eq!(sha, "0123456789abcdef0123456789abcdef01234567");
        }

        // The token request carries an RS256 app JWT issued by the app id.
        let requests = server.received_requests().await.unwrap();
        let auth = requests[0]
            .headers
            .get("authorization")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let jwt = auth.strip_prefix("Bearer ").unwrap();
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        let decode = |part: &str| -> serde_json::Value {
            let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(part)
                .unwrap();
            serde_json::from_slice(&raw).unwrap()
        };
        assert_eq!(decode(parts[0])["alg"], "RS256");
        let claims = decode(parts[1]);
        assert_eq!(claims["iss"], "123");
        let ttl = claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap();
        assert!(ttl <= 600);
    }

    #[tokio::test]
    async fn test_expired_installation_token_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/77/access_tokens"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "token": "ghs_short",
                "expires_at": "2000-01-01T00:00:00Z"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let app = AppAuth::new("123".into(), APP_KEY, 77).unwrap();
        let client = reqwest::Client::new();
        for _ in 0..2 {
            let token = app.installation_token(&client, &server.uri()).await.unwrap();
            assert_eq!(token, "ghs_short");
        }
    }

    #[test]
    fn test_invalid_app_key_is_config_error() {
        let err = AppAuth::new("123".into(), "not a key", 77).err().unwrap();
        assert!(PipelineError::is_config(&err));
    }

    #[tokio::test]
    async fn test_resolve_failure_is_commit_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/commits/nope"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"message": "No commit found for SHA: nope"})),
            )
            .mount(&server)
            .await;

        let err = source(&server.uri())
            .resolve_commit("acme", "widgets", "nope")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::CommitResolution { .. })
        ));
    }
}
