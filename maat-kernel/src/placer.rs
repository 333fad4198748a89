/**
 * PLACER - Choix du backend pour une nouvelle session
 *
 * RÔLE :
 * Trouver un hôte pour la session d'un utilisateur sans autorité centrale:
 * le balancer propose sa vision (éventuellement périmée) de la charge, l'agent
 * accepte ou refuse selon la sienne.
 *
 * ALGORITHME :
 * 1. Admission : sessions + réservations de l'utilisateur >= plafond global => refus
 * 2. Candidats : backends disponibles où l'utilisateur n'a pas dépassé la limite par hôte
 * 3. Sélection : charge la plus faible, égalité => ordre du registre
 * 4. Réservation auprès de l'agent, forcée à partir de la tentative max_attempts
 * 5. Refus / erreur => tentative suivante (max_attempts + 1 au total)
 *
 * Aucun état partagé mutable: plusieurs placements peuvent tourner en parallèle.
 */

use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use crate::backend::BackendDescriptor;
use crate::registry::BackendRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("user {username} already has {sessions} session(s), limit is {limit}")]
    UserLimitReached {
        username: String,
        sessions: usize,
        limit: usize,
    },
    #[error("no backend can host a session for {username}")]
    NoSuitableBackend { username: String },
    #[error("placement for {username} failed after {attempts} attempts")]
    PlacementExhausted { username: String, attempts: usize },
}

/// Backend retenu pour une session
#[derive(Debug, Clone)]
pub struct Placement {
    pub backend: Arc<BackendDescriptor>,
    /// Numéro (à partir de 1) de la tentative acceptée
    pub attempt: usize,
    pub forced: bool,
}

pub struct Placer {
    registry: Arc<BackendRegistry>,
    max_sessions_per_user: usize,
    max_attempts: usize,
}

impl Placer {
    pub fn new(registry: Arc<BackendRegistry>, max_sessions_per_user: usize, max_attempts: usize) -> Self {
        Self {
            registry,
            max_sessions_per_user,
            max_attempts,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub async fn place(&self, username: &str) -> Result<Placement, PlacementError> {
        let span = info_span!("placer", username = %username);
        self.place_inner(username).instrument(span).await
    }

    async fn place_inner(&self, username: &str) -> Result<Placement, PlacementError> {
        let sessions = self.registry.total_sessions_per_user(username).await;
        if sessions >= self.max_sessions_per_user {
            warn!(sessions, limit = self.max_sessions_per_user, "user limit reached");
            return Err(PlacementError::UserLimitReached {
                username: username.to_string(),
                sessions,
                limit: self.max_sessions_per_user,
            });
        }

        let attempts = self.max_attempts + 1;
        for attempt in 1..=attempts {
            let forced = attempt >= self.max_attempts;
            let (backend, known_value) = self.choose_backend(username).await?;

            if !backend.service.available().await {
                warn!(attempt, backend = %backend.name, "service unreachable, skipping attempt");
                continue;
            }

            match backend.agent.add_request(username, known_value as i64, forced).await {
                Ok(true) => {
                    info!(attempt, backend = %backend.name, known_value, forced, "session placed");
                    return Ok(Placement { backend, attempt, forced });
                }
                Ok(false) => {
                    info!(attempt, backend = %backend.name, known_value, forced, "reservation refused");
                }
                Err(e) => {
                    warn!(attempt, backend = %backend.name, error = %e, "reservation failed");
                }
            }
        }

        warn!(attempts, "no backend accepted the session");
        Err(PlacementError::PlacementExhausted {
            username: username.to_string(),
            attempts,
        })
    }

    /// Backend le moins chargé parmi les candidats, avec la charge observée
    async fn choose_backend(&self, username: &str) -> Result<(Arc<BackendDescriptor>, usize), PlacementError> {
        let mut best: Option<(Arc<BackendDescriptor>, usize)> = None;
        for backend in self.registry.list(false).await {
            if backend.user_reached_limit(username).await {
                continue;
            }
            let load = backend.load().await;
            if best.as_ref().map_or(true, |(_, best_load)| load < *best_load) {
                best = Some((backend, load));
            }
        }
        best.ok_or_else(|| PlacementError::NoSuitableBackend {
            username: username.to_string(),
        })
    }

    /// Sessions vivantes de l'utilisateur par backend
    pub async fn user_sessions(&self, username: &str) -> indexmap::IndexMap<String, Vec<maat_core::ProcessSession>> {
        self.registry.user_sessions(username).await
    }
}
