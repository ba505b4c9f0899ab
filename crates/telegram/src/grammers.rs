//! MTProto-backed production transport. All grammers types stay inside this
//! module; the rest of the crate only sees [`MessengerSession`].

use std::io::IsTerminal;
use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::{Client, Config, InitParams, InvocationError, SignInError};
use grammers_session::Session;
use grammers_tl_types as tl;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use roster_config::TelegramServerConfig;

use crate::error::TelegramError;
use crate::transport::{CredentialPrompt, FullProfile, MessengerSession, Peer, PeerRef};

pub struct GrammersSession {
    config: TelegramServerConfig,
    prompt: Arc<dyn CredentialPrompt>,
    handle: OnceCell<Client>,
}

impl GrammersSession {
    pub fn new(config: TelegramServerConfig, prompt: Arc<dyn CredentialPrompt>) -> Self {
        Self {
            config,
            prompt,
            handle: OnceCell::new(),
        }
    }

    /// Connects on first use; subsequent calls reuse the established client.
    async fn client(&self) -> Result<&Client, TelegramError> {
        self.handle
            .get_or_try_init(|| self.connect())
            .await
    }

    async fn connect(&self) -> Result<Client, TelegramError> {
        let session = Session::load_file_or_create(&self.config.session_file).map_err(|err| {
            TelegramError::Transport(format!(
                "session file {}: {err}",
                self.config.session_file
            ))
        })?;

        let client = Client::connect(Config {
            session,
            api_id: self.config.api_id,
            api_hash: self.config.api_hash.clone(),
            params: InitParams::default(),
        })
        .await
        .map_err(|err| TelegramError::Transport(err.to_string()))?;

        let authorized = client.is_authorized().await.map_err(map_invocation)?;
        if !authorized {
            warn!(
                phone_number = %self.config.phone_number,
                "session check failed, attempting interactive auth"
            );
            if !std::io::stdout().is_terminal() {
                return Err(TelegramError::AuthRequired(
                    "AUTH_KEY_UNREGISTERED: session is invalid and interactive login \
                     requires a terminal"
                        .to_string(),
                ));
            }
            self.login(&client).await?;
            client
                .session()
                .save_to_file(&self.config.session_file)
                .map_err(|err| {
                    TelegramError::Transport(format!(
                        "saving session {}: {err}",
                        self.config.session_file
                    ))
                })?;
            info!(
                phone_number = %self.config.phone_number,
                "interactive auth successful, session saved"
            );
        }

        Ok(client)
    }

    async fn login(&self, client: &Client) -> Result<(), TelegramError> {
        let token = client
            .request_login_code(&self.config.phone_number)
            .await
            .map_err(|err| TelegramError::AuthRequired(err.to_string()))?;

        let code = self.prompt.login_code(&self.config.phone_number)?;
        match client.sign_in(&token, &code).await {
            Ok(_) => Ok(()),
            Err(SignInError::PasswordRequired(password_token)) => {
                let password = self.prompt.password()?;
                client
                    .check_password(password_token, password)
                    .await
                    .map(|_| ())
                    .map_err(|err| TelegramError::AuthRequired(err.to_string()))
            }
            Err(other) => Err(TelegramError::AuthRequired(other.to_string())),
        }
    }
}

#[async_trait]
impl MessengerSession for GrammersSession {
    async fn ensure_ready(&self) -> Result<(), TelegramError> {
        self.client().await.map(|_| ())
    }

    async fn resolve_username(&self, username: &str) -> Result<Option<Peer>, TelegramError> {
        let client = self.client().await?;
        let request = tl::functions::contacts::ResolveUsername {
            username: username.to_string(),
        };
        let response = match client.invoke(&request).await {
            Ok(response) => response,
            // Unknown or withdrawn usernames are a resolution miss, not a fault.
            Err(InvocationError::Rpc(rpc)) if rpc.name.starts_with("USERNAME") => {
                return Ok(None)
            }
            Err(err) => return Err(map_invocation(err)),
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) = response;
        Ok(resolved.users.into_iter().next().and_then(|user| match user {
            tl::enums::User::User(raw) => Some(peer_from_raw(raw)),
            _ => None,
        }))
    }

    async fn get_users(&self, ids: &[i64]) -> Result<Vec<Peer>, TelegramError> {
        let client = self.client().await?;
        let request = tl::functions::users::GetUsers {
            id: ids
                .iter()
                .map(|&user_id| {
                    tl::enums::InputUser::User(tl::types::InputUser {
                        user_id,
                        access_hash: 0,
                    })
                })
                .collect(),
        };
        let users = client.invoke(&request).await.map_err(map_invocation)?;
        Ok(users
            .into_iter()
            .filter_map(|user| match user {
                tl::enums::User::User(raw) => Some(peer_from_raw(raw)),
                _ => None,
            })
            .collect())
    }

    async fn get_full_user(&self, peer: PeerRef) -> Result<FullProfile, TelegramError> {
        let client = self.client().await?;
        let request = tl::functions::users::GetFullUser {
            id: tl::enums::InputUser::User(tl::types::InputUser {
                user_id: peer.id,
                access_hash: peer.access_hash,
            }),
        };
        let response = client.invoke(&request).await.map_err(map_invocation)?;
        let tl::enums::users::UserFull::Full(full) = response;
        let tl::enums::UserFull::Full(profile) = full.full_user;
        Ok(FullProfile {
            about: profile.about.unwrap_or_default(),
        })
    }

    async fn ping(&self) -> Result<(), TelegramError> {
        let client = self.client().await?;
        client
            .invoke(&tl::functions::help::GetConfig {})
            .await
            .map_err(map_invocation)?;
        Ok(())
    }
}

fn peer_from_raw(raw: tl::types::User) -> Peer {
    Peer {
        id: raw.id,
        access_hash: raw.access_hash,
        first_name: raw.first_name.unwrap_or_default(),
        last_name: raw.last_name.unwrap_or_default(),
        username: raw.username.unwrap_or_default(),
    }
}

/// Keeps the upstream error marker (`NAME (value)`) in the printable form so
/// cool-down detection can work on it.
fn map_invocation(err: InvocationError) -> TelegramError {
    match err {
        InvocationError::Rpc(rpc) => TelegramError::Rpc(match rpc.value {
            Some(value) => format!("{} ({})", rpc.name, value),
            None => rpc.name,
        }),
        other => TelegramError::Transport(other.to_string()),
    }
}
