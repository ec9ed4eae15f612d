//! Plaid implementation of [`Aggregator`].
//!
//! Plaid takes `client_id`/`secret` in every JSON body and answers errors
//! with `{error_type, error_code, error_message}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::aggregator::{
    AccountSnapshot, Aggregator, AggregatorError, Institution, LinkToken, SyncPage,
    TokenExchange,
};

/// Page size requested from `/transactions/sync` (Plaid maximum is 500).
const SYNC_PAGE_SIZE: u32 = 250;
const COUNTRY_CODES: [&str; 1] = ["US"];
const CLIENT_NAME: &str = "Budgee";
const LINK_LANGUAGE: &str = "en";
const LINK_PRODUCTS: [&str; 1] = ["transactions"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaidEnvironment {
    Sandbox,
    Development,
    Production,
}

impl PlaidEnvironment {
    pub fn base_url(self) -> &'static str {
        match self {
            Self::Sandbox => "https://sandbox.plaid.com",
            Self::Development => "https://development.plaid.com",
            Self::Production => "https://production.plaid.com",
        }
    }
}

impl TryFrom<&str> for PlaidEnvironment {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "sandbox" => Ok(Self::Sandbox),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!("invalid plaid environment: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PlaidClient {
    client: Client,
    base_url: String,
    client_id: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    error_message: String,
}

#[derive(Serialize)]
struct Credentials<'a, T: Serialize> {
    client_id: &'a str,
    secret: &'a str,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct LinkUser {
    client_user_id: String,
}

#[derive(Serialize)]
struct LinkTokenBody {
    client_name: &'static str,
    language: &'static str,
    country_codes: [&'static str; 1],
    products: [&'static str; 1],
    user: LinkUser,
}

impl LinkTokenBody {
    fn for_user(user_id: i32) -> Self {
        Self {
            client_name: CLIENT_NAME,
            language: LINK_LANGUAGE,
            country_codes: COUNTRY_CODES,
            products: LINK_PRODUCTS,
            user: LinkUser {
                client_user_id: user_id.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct AccessTokenBody<'a> {
    access_token: &'a str,
}

#[derive(Serialize)]
struct PublicTokenBody<'a> {
    public_token: &'a str,
}

#[derive(Serialize)]
struct InstitutionBody<'a> {
    institution_id: &'a str,
    country_codes: [&'static str; 1],
}

#[derive(Serialize)]
struct SyncBody<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    count: u32,
}

#[derive(Deserialize)]
struct ItemGetResponse {
    item: ItemBody,
}

#[derive(Deserialize)]
struct ItemBody {
    #[serde(default)]
    institution_id: Option<String>,
}

#[derive(Deserialize)]
struct InstitutionResponse {
    institution: InstitutionDetail,
}

#[derive(Deserialize)]
struct InstitutionDetail {
    name: String,
}

#[derive(Deserialize)]
struct AccountsResponse {
    accounts: Vec<AccountSnapshot>,
}

impl PlaidClient {
    pub fn new(
        environment: PlaidEnvironment,
        client_id: impl Into<String>,
        secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AggregatorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(
            client,
            environment.base_url(),
            client_id,
            secret,
        ))
    }

    /// Builds a client against an arbitrary base URL (proxies, mock servers).
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            client_id: client_id.into(),
            secret: secret.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn post<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: TReq,
    ) -> Result<TResp, AggregatorError> {
        let body = Credentials {
            client_id: &self.client_id,
            secret: &self.secret,
            body,
        };
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<TResp>().await?);
        }

        let (code, message) = match resp.json::<ErrorBody>().await {
            Ok(err) => (err.error_code, err.error_message),
            Err(_) => (String::new(), "aggregator error".to_string()),
        };
        tracing::warn!(path, status = status.as_u16(), code = %code, "plaid request failed");
        Err(AggregatorError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl Aggregator for PlaidClient {
    async fn create_link_token(&self, user_id: i32) -> Result<LinkToken, AggregatorError> {
        self.post("/link/token/create", LinkTokenBody::for_user(user_id))
            .await
    }

    async fn exchange_public_token(
        &self,
        public_token: &str,
    ) -> Result<TokenExchange, AggregatorError> {
        self.post(
            "/item/public_token/exchange",
            PublicTokenBody { public_token },
        )
        .await
    }

    async fn item_institution(&self, access_token: &str) -> Result<Institution, AggregatorError> {
        let item: ItemGetResponse = self
            .post("/item/get", AccessTokenBody { access_token })
            .await?;
        let Some(institution_id) = item.item.institution_id else {
            return Ok(Institution::default());
        };

        let institution: InstitutionResponse = self
            .post(
                "/institutions/get_by_id",
                InstitutionBody {
                    institution_id: &institution_id,
                    country_codes: COUNTRY_CODES,
                },
            )
            .await?;

        Ok(Institution {
            institution_id: Some(institution_id),
            institution_name: Some(institution.institution.name),
        })
    }

    async fn accounts(&self, access_token: &str) -> Result<Vec<AccountSnapshot>, AggregatorError> {
        let resp: AccountsResponse = self
            .post("/accounts/get", AccessTokenBody { access_token })
            .await?;
        Ok(resp.accounts)
    }

    async fn sync_transactions(
        &self,
        access_token: &str,
        cursor: &str,
    ) -> Result<SyncPage, AggregatorError> {
        self.post(
            "/transactions/sync",
            SyncBody {
                access_token,
                cursor: (!cursor.is_empty()).then_some(cursor),
                count: SYNC_PAGE_SIZE,
            },
        )
        .await
    }
}
