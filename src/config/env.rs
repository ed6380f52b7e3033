use super::ServerConfig;
use super::merge::merge_config;
use super::validation::validate_config;

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads every setting from the environment, falling back to defaults.
    /// The `.env` file is loaded by the binary before this runs.
    ///
    /// # Errors
    /// Returns an error if a numeric variable is malformed, a prompt file
    /// cannot be read, or validation fails.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge_config(None)?;
        validate_config(&config)?;
        Ok(config)
    }
}
