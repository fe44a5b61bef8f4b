use crate::models::error::AppError;

/// Single shared secret guarding the tool.
pub struct AccessGate {
    secret: Option<String>,
}

impl AccessGate {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, candidate: &str) -> Result<(), AppError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or(AppError::AccessTokenNotConfigured)?;
        if candidate != secret {
            return Err(AppError::InvalidAccessToken);
        }
        Ok(())
    }
}
