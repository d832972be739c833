use crate::StoreError;
use secrecy::SecretString;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub base_url: String,
    pub api_key: SecretString,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Testable helper that reads configuration values using the provided
    /// function. This avoids mutating global environment in tests and keeps
    /// `from_env()` small and safe.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, StoreError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url =
            get("SUPABASE_URL").ok_or_else(|| StoreError::Config("SUPABASE_URL missing".into()))?;
        let api_key = get("SUPABASE_ANON_KEY")
            .ok_or_else(|| StoreError::Config("SUPABASE_ANON_KEY missing".into()))?;
        Ok(Self {
            base_url,
            api_key: SecretString::new(api_key.into()),
        })
    }
}
