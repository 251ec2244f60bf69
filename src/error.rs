use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Sessão não encontrada")]
    SessionNotFound,

    #[error("Sessão expirada")]
    SessionExpired,

    #[error("Sessão revogada")]
    SessionRevoked,

    #[error("Sessão marcada como suspeita")]
    SuspiciousSession,

    #[error("Serviço indisponível: {0}")]
    UpstreamUnavailable(String),

    #[error("Erro ao serializar sessão: {0}")]
    SerializationError(String),

    #[error("Erro ao desserializar sessão: {0}")]
    DeserializationError(String),

    #[error("Falha ao emitir evento: {0}")]
    NotificationFailed(String),

    #[error("Configuração inválida: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// True for backend faults the caller may retry, as opposed to
    /// "not authenticated" outcomes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::UpstreamUnavailable(_))
    }
}

impl From<redis::RedisError> for SessionError {
    fn from(err: redis::RedisError) -> Self {
        SessionError::UpstreamUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}
