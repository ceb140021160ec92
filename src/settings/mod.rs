// Settings module
pub mod settings;

pub use settings::{
    AppSettings, AudioSettings, GeminiSettings, OutputKind, SettingsError, ENV_API_KEYS,
    ENV_GEMINI_URL, ENV_OUTPUT,
};
