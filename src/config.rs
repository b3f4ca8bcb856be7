use crate::narrative::client::LlmError;

/// Application-level constants
pub const APP_NAME: &str = "chartlens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "chartlens=info,warn"
}

// ---------------------------------------------------------------------------
// Narrative backend settings
// ---------------------------------------------------------------------------

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
pub const AZURE_OPENAI_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const AZURE_OPENAI_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const AZURE_OPENAI_BASE_URL: &str = "AZURE_OPENAI_BASE_URL";
pub const AZURE_OPENAI_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
pub const AZURE_OPENAI_DEPLOYMENT_NAME: &str = "AZURE_OPENAI_DEPLOYMENT_NAME";
pub const AZURE_OPENAI_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
/// Set to "1" to load a `.env` file before the eval runner starts.
pub const EVAL_LOAD_DOTENV: &str = "EVAL_LOAD_DOTENV";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";
/// Per-request HTTP timeout.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Rate-limit/server-busy retries at the transport layer.
pub const MAX_TRANSPORT_RETRIES: u32 = 5;
/// Upper bound on a single backoff sleep, server hint included.
pub const MAX_BACKOFF_SECS: f64 = 60.0;

pub const LLM_SKIP_MESSAGE: &str = "llm skipped: missing keys";

/// Which credential set, if any, the environment provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialProbe {
    OpenAi,
    Azure,
    /// Some Azure variables are set but not all three.
    AzurePartial,
    Absent,
}

impl CredentialProbe {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::OpenAi | Self::Azure)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::OpenAi => "llm keys: openai",
            Self::Azure => "llm keys: azure",
            Self::AzurePartial => "llm skipped: missing azure credentials",
            Self::Absent => LLM_SKIP_MESSAGE,
        }
    }
}

/// Trimmed, non-empty value of the first variable that has one.
fn lookup_first<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .filter_map(|name| lookup(name))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Probe credentials through `lookup` (usually `std::env::var(..).ok()`).
pub fn probe_credentials<F>(lookup: F) -> CredentialProbe
where
    F: Fn(&str) -> Option<String>,
{
    if lookup_first(&lookup, &[OPENAI_API_KEY]).is_some() {
        return CredentialProbe::OpenAi;
    }
    let azure = [
        lookup_first(&lookup, &[AZURE_OPENAI_API_KEY]),
        lookup_first(&lookup, &[AZURE_OPENAI_ENDPOINT, AZURE_OPENAI_BASE_URL]),
        lookup_first(&lookup, &[AZURE_OPENAI_DEPLOYMENT, AZURE_OPENAI_DEPLOYMENT_NAME]),
    ];
    match azure.iter().filter(|v| v.is_some()).count() {
        3 => CredentialProbe::Azure,
        0 => CredentialProbe::Absent,
        _ => CredentialProbe::AzurePartial,
    }
}

pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi {
        api_key: String,
        base_url: String,
    },
    Azure {
        api_key: String,
        endpoint: String,
        deployment: String,
        api_version: String,
    },
}

/// Everything the narrative backend client needs, resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl LlmSettings {
    /// Resolve settings through `lookup`. OpenAI wins when both sets exist.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let probe = probe_credentials(&lookup);
        let missing = || LlmError::MissingCredentials(probe.reason().to_string());
        let model = lookup_first(&lookup, &[OPENAI_MODEL]).unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let provider = match probe {
            CredentialProbe::OpenAi => LlmProvider::OpenAi {
                api_key: lookup_first(&lookup, &[OPENAI_API_KEY]).ok_or_else(missing)?,
                base_url: lookup_first(&lookup, &[OPENAI_BASE_URL])
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
            CredentialProbe::Azure => LlmProvider::Azure {
                api_key: lookup_first(&lookup, &[AZURE_OPENAI_API_KEY]).ok_or_else(missing)?,
                endpoint: lookup_first(&lookup, &[AZURE_OPENAI_ENDPOINT, AZURE_OPENAI_BASE_URL])
                    .ok_or_else(missing)?
                    .trim_end_matches('/')
                    .to_string(),
                deployment: lookup_first(&lookup, &[AZURE_OPENAI_DEPLOYMENT, AZURE_OPENAI_DEPLOYMENT_NAME])
                    .ok_or_else(missing)?,
                api_version: lookup_first(&lookup, &[AZURE_OPENAI_API_VERSION])
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            },
            CredentialProbe::AzurePartial | CredentialProbe::Absent => return Err(missing()),
        };

        Ok(Self {
            provider,
            model,
            timeout_secs: REQUEST_TIMEOUT_SECS,
            max_retries: MAX_TRANSPORT_RETRIES,
        })
    }

    pub fn from_env() -> Result<Self, LlmError> {
        Self::from_lookup(env_lookup)
    }
}
