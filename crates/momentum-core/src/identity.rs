use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::backend::offline::OFFLINE_USER_ID;
use crate::remote::{RemoteClient, send};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum Actor {
    Remote {
        id: String,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        metadata: Value,
    },
    Local {
        id: String,
        email: String,
        name: String,
    },
}

impl Actor {
    pub fn offline(name: impl Into<String>, email: impl Into<String>) -> Self {
        Actor::Local {
            id: OFFLINE_USER_ID.to_string(),
            email: email.into(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Actor::Remote { id, .. } | Actor::Local { id, .. } => id,
        }
    }

    pub fn email(&self) -> Option<&str> {
        match self {
            Actor::Remote { email, .. } => email.as_deref(),
            Actor::Local { email, .. } => Some(email),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Actor::Local { .. })
    }
}

impl Default for Actor {
    fn default() -> Self {
        Actor::offline("Offline User", "offline@momentum.local")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::Github),
            other => Err(anyhow!("unsupported sign-in provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub actor: Option<Actor>,
    pub confirmation_required: bool,
    pub already_registered: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_actor(&self) -> anyhow::Result<Option<Actor>>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect: Option<&str>,
    ) -> anyhow::Result<SignUpOutcome>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> anyhow::Result<Actor>;

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect: Option<&str>,
    ) -> anyhow::Result<String>;

    async fn sign_out(&self) -> anyhow::Result<()>;
}

pub struct RemoteIdentity {
    client: RemoteClient,
}

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
    #[serde(default)]
    identities: Option<Vec<Value>>,
}

impl From<RemoteUser> for Actor {
    fn from(user: RemoteUser) -> Self {
        Actor::Remote {
            id: user.id,
            email: user.email,
            metadata: user.user_metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: RemoteUser,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(RemoteUser),
}

impl RemoteIdentity {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityProvider for RemoteIdentity {
    #[tracing::instrument(skip(self))]
    async fn current_actor(&self) -> anyhow::Result<Option<Actor>> {
        if self.client.access_token()?.is_none() {
            debug!("no access token stored; nobody is signed in");
            return Ok(None);
        }

        let url = self.client.endpoint("auth/v1/user")?;
        let user: RemoteUser = send(self.client.get(url)?, "get user")
            .await?
            .json()
            .await
            .context("failed decoding user")?;
        Ok(Some(user.into()))
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect: Option<&str>,
    ) -> anyhow::Result<SignUpOutcome> {
        let mut url = self.client.endpoint("auth/v1/signup")?;
        if let Some(redirect) = redirect {
            url.query_pairs_mut().append_pair("redirect_to", redirect);
        }
        let request = self
            .client
            .post(url)?
            .json(&json!({ "email": email, "password": password }));

        let response: SignUpResponse = send(request, "sign up")
            .await?
            .json()
            .await
            .context("failed decoding sign-up response")?;

        let outcome = match response {
            SignUpResponse::Session(session) => {
                self.client.store_access_token(&session.access_token)?;
                SignUpOutcome {
                    actor: Some(session.user.into()),
                    confirmation_required: false,
                    already_registered: false,
                }
            }
            SignUpResponse::User(user) => {
                let already_registered = user
                    .identities
                    .as_ref()
                    .is_some_and(|identities| identities.is_empty());
                SignUpOutcome {
                    actor: Some(user.into()),
                    confirmation_required: true,
                    already_registered,
                }
            }
        };
        info!(
            confirmation_required = outcome.confirmation_required,
            already_registered = outcome.already_registered,
            "sign-up accepted"
        );
        Ok(outcome)
    }

    #[tracing::instrument(skip(self, password))]
    async fn sign_in_with_password(&self, email: &str, password: &str) -> anyhow::Result<Actor> {
        let mut url = self.client.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let request = self
            .client
            .post(url)?
            .json(&json!({ "email": email, "password": password }));

        let session: TokenResponse = send(request, "sign in")
            .await?
            .json()
            .await
            .context("failed decoding sign-in response")?;
        self.client.store_access_token(&session.access_token)?;
        Ok(session.user.into())
    }

    async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut url = self.client.endpoint("auth/v1/authorize")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("provider", provider.as_str());
            if let Some(redirect) = redirect {
                query.append_pair("redirect_to", redirect);
            }
        }
        Ok(url.to_string())
    }

    #[tracing::instrument(skip(self))]
    async fn sign_out(&self) -> anyhow::Result<()> {
        if self.client.access_token()?.is_some() {
            let url = self.client.endpoint("auth/v1/logout")?;
            send(self.client.post(url)?, "sign out").await?;
        }
        self.client.clear_access_token()
    }
}
