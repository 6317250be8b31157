use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sheets_core::{
    AppendValuesResponse, ApiErrorClass, InsertDataOption, OAuthClient, SheetsClient, SheetsError,
    ValueInputOption, ValueRange,
};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::LedgerLocation;
use crate::storage::{CredentialCache, CredentialError};
use crate::sync::range_planner::RangeDescriptor;
use crate::token_provider::{TokenProvider, TokenProviderError};

/// Rows of cell values, rebuilt from the service on every read.
pub type ValueMatrix = Vec<Vec<Value>>;

#[derive(Debug, Error)]
pub enum LedgerFailure {
    #[error(transparent)]
    Sheets(#[from] SheetsError),
    #[error("access token unavailable: {0}")]
    Token(#[from] TokenProviderError),
}

impl LedgerFailure {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            LedgerFailure::Sheets(err) => err.classification(),
            LedgerFailure::Token(_) => Some(ApiErrorClass::Auth),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger read failed: {0}")]
    Read(#[source] LedgerFailure),
    #[error("ledger write failed: {0}")]
    Write(#[source] LedgerFailure),
}

impl LedgerError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            LedgerError::Read(failure) | LedgerError::Write(failure) => failure.classification(),
        }
    }
}

/// One row write, built per append and handed straight to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRequest {
    pub range: RangeDescriptor,
    pub values: ValueMatrix,
    pub input_mode: ValueInputOption,
    pub insert_mode: InsertDataOption,
}

impl AppendRequest {
    /// A single row the service parses like typed input, overwriting cells
    /// at `range` instead of shifting existing rows down.
    pub fn row(range: RangeDescriptor, row: Vec<Value>) -> Self {
        Self {
            range,
            values: vec![row],
            input_mode: ValueInputOption::UserEntered,
            insert_mode: InsertDataOption::Overwrite,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendResult {
    pub updated_range: Option<String>,
    pub updated_rows: u64,
}

impl From<AppendValuesResponse> for AppendResult {
    fn from(response: AppendValuesResponse) -> Self {
        match response.updates {
            Some(updates) => Self {
                updated_range: updates.updated_range,
                updated_rows: updates.updated_rows,
            },
            None => Self::default(),
        }
    }
}

/// Read-all and append against one configured sheet. No retries and no
/// local caching: every call is a round trip.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn read_all(&self) -> Result<ValueMatrix, LedgerError>;
    async fn append(&self, request: AppendRequest) -> Result<AppendResult, LedgerError>;
}

/// Builds a ledger client once credentials are available.
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    type Ledger: LedgerService;

    async fn connect(&self) -> Result<Self::Ledger, CredentialError>;
}

pub struct SheetsLedger {
    http: reqwest::Client,
    base_url: String,
    location: LedgerLocation,
    tokens: Mutex<TokenProvider>,
}

impl SheetsLedger {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        location: LedgerLocation,
        tokens: TokenProvider,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            location,
            tokens: Mutex::new(tokens),
        }
    }

    pub fn location(&self) -> &LedgerLocation {
        &self.location
    }

    async fn client(&self) -> Result<SheetsClient, LedgerFailure> {
        let token = self.tokens.lock().await.valid_access_token().await?;
        Ok(SheetsClient::with_http(
            self.http.clone(),
            &self.base_url,
            token,
        )?)
    }

    async fn fetch_rows(&self) -> Result<ValueMatrix, LedgerFailure> {
        let range = RangeDescriptor::whole_column(self.location.sheet_name.clone());
        let response = self
            .client()
            .await?
            .get_values(&self.location.spreadsheet_id, &range.to_a1())
            .await?;
        Ok(response.values)
    }

    async fn submit(&self, request: AppendRequest) -> Result<AppendResult, LedgerFailure> {
        let range = request.range.to_a1();
        let body = ValueRange::rows(range.clone(), request.values);
        let response = self
            .client()
            .await?
            .append_values(
                &self.location.spreadsheet_id,
                &range,
                &body,
                request.input_mode,
                request.insert_mode,
            )
            .await?;
        Ok(response.into())
    }
}

#[async_trait]
impl LedgerService for SheetsLedger {
    async fn read_all(&self) -> Result<ValueMatrix, LedgerError> {
        self.fetch_rows().await.map_err(LedgerError::Read)
    }

    async fn append(&self, request: AppendRequest) -> Result<AppendResult, LedgerError> {
        self.submit(request).await.map_err(LedgerError::Write)
    }
}

/// Connects [`SheetsLedger`]s using the process credential cache.
pub struct SheetsConnector {
    credentials: CredentialCache,
    oauth_client: Option<OAuthClient>,
    location: LedgerLocation,
    http: reqwest::Client,
    base_url: String,
}

impl SheetsConnector {
    pub fn new(
        credentials: CredentialCache,
        oauth_client: Option<OAuthClient>,
        location: LedgerLocation,
        request_timeout: Duration,
        base_url: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            credentials,
            oauth_client,
            location,
            http,
            base_url: base_url.unwrap_or_else(|| SheetsClient::default_base_url().to_string()),
        })
    }
}

#[async_trait]
impl LedgerConnector for SheetsConnector {
    type Ledger = SheetsLedger;

    async fn connect(&self) -> Result<SheetsLedger, CredentialError> {
        let credential = self.credentials.obtain().await?;
        let tokens = TokenProvider::new(credential, self.oauth_client.clone());
        Ok(SheetsLedger::new(
            self.http.clone(),
            self.base_url.clone(),
            self.location.clone(),
            tokens,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth_flow::{CredentialProvider, OAuthFlowError};
    use crate::storage::Credential;
    use serde_json::json;
    use std::sync::Arc;
    use time::macros::datetime;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn location() -> LedgerLocation {
        LedgerLocation {
            spreadsheet_id: "sheet-123".into(),
            sheet_name: "Downloads".into(),
        }
    }

    fn credential(access: &str) -> Credential {
        Credential {
            access_token: access.into(),
            token_type: Some("Bearer".into()),
            refresh_token: None,
            expiry: None,
        }
    }

    fn ledger(server: &MockServer, credential: Credential) -> SheetsLedger {
        SheetsLedger::new(
            reqwest::Client::new(),
            server.uri(),
            location(),
            TokenProvider::new(credential, None),
        )
    }

    struct NoInteractiveAuth;

    #[async_trait]
    impl CredentialProvider for NoInteractiveAuth {
        async fn authorize(&self, _scope: &str) -> Result<Credential, OAuthFlowError> {
            Err(OAuthFlowError::Cancelled)
        }
    }

    #[tokio::test]
    async fn read_all_fetches_the_value_column() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-123/values/Downloads!A1:A"))
            .and(header("authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Downloads!A1:A1000",
                "majorDimension": "ROWS",
                "values": [["a.torrent"], ["b.torrent"], ["c.torrent"]]
            })))
            .mount(&server)
            .await;

        let rows = ledger(&server, credential("token-1")).read_all().await.unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn append_overwrites_at_the_requested_range() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-123/values/Downloads!A4:A4:append"))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .and(query_param("insertDataOption", "OVERWRITE"))
            .and(body_json(json!({
                "range": "Downloads!A4:A4",
                "majorDimension": "ROWS",
                "values": [["movie.torrent"]]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "spreadsheetId": "sheet-123",
                "updates": { "updatedRange": "Downloads!A4", "updatedRows": 1 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = AppendRequest::row(
            RangeDescriptor::single_row("Downloads", 4),
            vec![json!("movie.torrent")],
        );
        let result = ledger(&server, credential("token-1"))
            .append(request)
            .await
            .unwrap();
        assert_eq!(result.updated_range.as_deref(), Some("Downloads!A4"));
        assert_eq!(result.updated_rows, 1);
    }

    #[tokio::test]
    async fn authorization_failures_surface_as_read_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let err = ledger(&server, credential("stale"))
            .read_all()
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Read(LedgerFailure::Sheets(_))));
        assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_fails_the_write() {
        let server = MockServer::start().await;
        let mut expired = credential("old");
        expired.expiry = Some(datetime!(2000-01-01 0:00 UTC));

        let request = AppendRequest::row(
            RangeDescriptor::single_row("Downloads", 1),
            vec![json!("a.torrent")],
        );
        let err = ledger(&server, expired).append(request).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Write(LedgerFailure::Token(TokenProviderError::MissingRefreshToken))
        ));
    }

    #[tokio::test]
    async fn connector_uses_the_cached_credential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-123/values/Downloads!A1:A"))
            .and(header("authorization", "Bearer cached-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "values": [] })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("token.json");
        std::fs::write(
            &cache_path,
            serde_json::to_vec(&credential("cached-token")).unwrap(),
        )
        .unwrap();
        let cache = CredentialCache::new(&cache_path, "scope", Arc::new(NoInteractiveAuth));
        let connector = SheetsConnector::new(
            cache,
            None,
            location(),
            Duration::from_secs(5),
            Some(server.uri()),
        )
        .unwrap();

        let ledger = connector.connect().await.unwrap();
        assert!(ledger.read_all().await.unwrap().is_empty());
        assert_eq!(ledger.location().sheet_name, "Downloads");
    }

    #[tokio::test]
    async fn connector_reports_aborted_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CredentialCache::new(
            dir.path().join("token.json"),
            "scope",
            Arc::new(NoInteractiveAuth),
        );
        let connector =
            SheetsConnector::new(cache, None, location(), Duration::from_secs(5), None).unwrap();

        let err = connector.connect().await.err().expect("connect must fail");
        assert!(matches!(err, CredentialError::Provider(OAuthFlowError::Cancelled)));
    }
}
