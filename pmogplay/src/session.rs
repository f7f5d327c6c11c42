//! Gestion de la session authentifiée auprès du service
//!
//! La session détient le seul token vivant. Le login réutilise le token
//! mémorisé quand il est encore exploitable et retombe sinon sur un échange
//! complet des credentials. Quand le service refuse le token (401), un seul
//! rafraîchissement est tenté, et jamais deux à moins de 60 secondes d'écart.

use crate::api::{MusicService, ServiceConnector, TokenExchange};
use crate::config_ext::GPlayConfigExt;
use crate::error::{GPlayError, Result};
use crate::models::AuthToken;
use chrono::{DateTime, Utc};
use pmoconfig::Config;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Délai minimal entre deux obtentions de token
pub const REFRESH_COOLDOWN: Duration = Duration::from_secs(60);

/// État de la session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Aucun login tenté
    NoToken,
    LoggingIn,
    Authenticated,
    /// Rafraîchissement du token après un refus
    Refreshing,
    /// Dernier login ou rafraîchissement échoué
    Failed,
}

/// Session authentifiée partagée par le provider et le suggester
pub struct SessionManager {
    connector: Arc<dyn ServiceConnector>,
    exchange: Arc<dyn TokenExchange>,
    config: Arc<Config>,
    service: RwLock<Option<Arc<dyn MusicService>>>,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    state: StdMutex<SessionState>,
    cooldown: Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn ServiceConnector>,
        exchange: Arc<dyn TokenExchange>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            connector,
            exchange,
            config,
            service: RwLock::new(None),
            last_refresh: Mutex::new(None),
            state: StdMutex::new(SessionState::NoToken),
            cooldown: REFRESH_COOLDOWN,
        }
    }

    /// Remplace le délai minimal entre deux rafraîchissements
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Session ouverte
    ///
    /// # Errors
    ///
    /// `GPlayError::NotLoggedIn` si aucun login n'a abouti
    pub async fn service(&self) -> Result<Arc<dyn MusicService>> {
        self.service
            .read()
            .await
            .clone()
            .ok_or(GPlayError::NotLoggedIn)
    }

    /// Ouvre la session
    ///
    /// Le token mémorisé est réutilisé s'il est encore accepté ; sinon il est
    /// oublié et un nouveau token est obtenu à partir des credentials, puis
    /// mémorisé.
    ///
    /// # Errors
    ///
    /// Retourne l'erreur de l'échange complet si celui-ci échoue aussi
    pub async fn login(&self) -> Result<()> {
        self.set_state(SessionState::LoggingIn);

        if let Some(stored) = self.config.get_gplay_token()? {
            match self.connect_with_existing(&stored).await {
                Ok(service) => {
                    info!("Logged in with stored token");
                    *self.service.write().await = Some(service);
                    self.set_state(SessionState::Authenticated);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Stored token rejected, requesting a new one: {}", e);
                    self.config.set_gplay_token(None)?;
                }
            }
        }

        let result = async {
            let token = self.fresh_token().await?;
            self.connector.connect(&token).await
        }
        .await;

        match result {
            Ok(service) => {
                info!("Logged in with credentials");
                *self.service.write().await = Some(service);
                self.set_state(SessionState::Authenticated);
                Ok(())
            }
            Err(e) => {
                error!("Login failed: {}", e);
                self.set_state(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn connect_with_existing(&self, stored: &str) -> Result<Arc<dyn MusicService>> {
        let token = self
            .exchange
            .provide_token_from_existing(stored)
            .await?
            .ok_or_else(|| GPlayError::TokenRequest("stored token is no longer usable".into()))?;
        let service = self.connector.connect(&token).await?;
        if token.token != stored {
            self.config.set_gplay_token(Some(&token.token))?;
        }
        Ok(service)
    }

    /// Échange complet des credentials ; le nouveau token est mémorisé
    async fn fresh_token(&self) -> Result<AuthToken> {
        let (username, password, device_id) = self.config.get_gplay_credentials()?;
        debug!("Requesting token for {}", username);
        let token = self
            .exchange
            .provide_token(&username, &password, &device_id)
            .await?;
        self.config.set_gplay_token(Some(&token.token))?;
        Ok(token)
    }

    /// Rafraîchit le token si le précédent a plus de 60 secondes
    ///
    /// Le délai est compté depuis la plus récente des deux dates : dernier
    /// token obtenu par l'échange, dernière tentative de cette session. Les
    /// appels concurrents sont sérialisés ; le second trouve donc le délai
    /// non écoulé.
    ///
    /// # Errors
    ///
    /// - `GPlayError::TokenCooldown` sans rien tenter si le délai n'est pas écoulé
    /// - l'erreur de l'échange ou du changement de token sinon
    pub async fn refresh_if_allowed(&self) -> Result<()> {
        let mut last_refresh = self.last_refresh.lock().await;
        let now = Utc::now();

        let previous = [*last_refresh, self.exchange.last_fetched_at()]
            .into_iter()
            .flatten()
            .max();
        if let Some(previous) = previous {
            let elapsed = (now - previous).to_std().unwrap_or_default();
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                debug!("Token refresh on cooldown for {:?}", remaining);
                return Err(GPlayError::TokenCooldown { remaining });
            }
        }

        *last_refresh = Some(now);
        self.set_state(SessionState::Refreshing);
        info!("Refreshing token");

        let result = async {
            let token = self.fresh_token().await?;
            let current = self.service.read().await.clone();
            match current {
                Some(service) => service.change_token(&token).await,
                None => {
                    let service = self.connector.connect(&token).await?;
                    *self.service.write().await = Some(service);
                    Ok(())
                }
            }
        }
        .await;

        match &result {
            Ok(()) => {
                info!("Token refreshed");
                self.set_state(SessionState::Authenticated);
            }
            Err(e) => {
                error!("Could not refresh token: {}", e);
                self.set_state(SessionState::Failed);
            }
        }
        result
    }

    /// Exécute une opération sur la session, avec un seul nouvel essai après refus du token
    ///
    /// Si le rafraîchissement est impossible (délai non écoulé, échec), l'erreur
    /// d'autorisation initiale est retournée.
    pub async fn authorized<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn MusicService>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op(self.service().await?).await {
            Err(e) if e.is_auth_error() => {
                warn!("Authorization failed, refreshing token: {}", e);
                if let Err(refresh_error) = self.refresh_if_allowed().await {
                    warn!("Token refresh not possible: {}", refresh_error);
                    return Err(e);
                }
                op(self.service().await?).await
            }
            other => other,
        }
    }
}
