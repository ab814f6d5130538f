use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::records::Privacy;
use crate::utils::validate_and_normalize_url;

/// Environment variable holding the generative-text API key
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
/// Environment variable holding the speech-synthesis API key
pub const TTS_API_KEY_ENV: &str = "GOOGLE_TTS_API_KEY";
/// OAuth client id for the publication platform
pub const YOUTUBE_CLIENT_ID_ENV: &str = "YOUTUBE_CLIENT_ID";
/// OAuth client secret for the publication platform
pub const YOUTUBE_CLIENT_SECRET_ENV: &str = "YOUTUBE_CLIENT_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where pipeline state and job artefacts live
    pub paths: PathsConfig,

    /// Shared HTTP client settings
    pub http: HttpConfig,

    /// Backoff policy for external calls
    pub retry: RetryConfig,

    /// External executables
    pub tools: ToolsConfig,

    pub collector: CollectorConfig,
    pub narrator: NarratorConfig,
    pub aligner: AlignerConfig,
    pub composer: ComposerConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: usize,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Upper bound for a single delay
    pub max_delay_secs: u64,

    /// Delay after a quota or rate-limit error without a Retry-After hint
    pub quota_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: String,
    pub ffprobe: String,

    /// Timeout for probing a media file
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// MediaWiki API endpoint
    pub api_url: String,

    /// Random candidates to try before reporting exhaustion
    pub max_attempts: usize,

    /// Maximum image URLs kept per article
    pub max_images: usize,

    /// When non-empty, only articles in at least one of these categories qualify
    pub include_categories: Vec<String>,

    /// Articles in any of these categories are never collected
    pub exclude_categories: Vec<String>,

    /// Categories never used to file a job
    pub avoid_folder_categories: Vec<String>,

    /// Image titles containing any of these are dropped
    pub image_exclude_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarratorConfig {
    /// Generative-text endpoint base
    pub api_base: String,

    pub model: String,

    /// Style directive sent with every request
    pub style: String,

    /// Maximum words in a script
    pub word_limit: usize,

    /// Requests to make before giving up on an overlong script
    pub max_rewrite_attempts: u32,

    /// Cut an overlong script locally instead of failing the stage
    pub truncate_overlong: bool,

    /// Speech-synthesis endpoint
    pub tts_url: String,

    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub language_code: String,
    pub name: String,
    pub ssml_gender: String,
    pub speaking_rate: f64,
    pub pitch: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    /// Executable invoked as `<command> [args..] <audio> <script.txt>`
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,

    /// Words aligned below this confidence are re-timed
    pub min_confidence: f64,

    /// Divide time evenly when the aligner fails outright
    pub fallback_on_failure: bool,

    pub max_words_per_segment: usize,

    /// Gap between words that forces a new caption
    pub pause_threshold_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Background footage
    pub background: PathBuf,

    /// TrueType font for title and captions (fontconfig default when unset)
    pub font: Option<PathBuf>,

    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Shortest output allowed; shorter narrations are padded with background
    pub min_duration_secs: f64,

    pub render_timeout_secs: u64,

    /// Maximum images overlaid on one video
    pub max_images: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub privacy: Privacy,

    /// Platform category id
    pub category_id: String,

    /// Appended to every description and used as tags
    pub hashtags: Vec<String>,

    pub redirect_uri: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
            collector: CollectorConfig::default(),
            narrator: NarratorConfig::default(),
            aligner: AlignerConfig::default(),
            composer: ComposerConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 10,
            user_agent: format!("holocron/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 1000,
            max_delay_secs: 30,
            quota_delay_secs: 60,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            probe_timeout_secs: 30,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://starwars.fandom.com/api.php".to_string(),
            max_attempts: 30,
            max_images: 8,
            include_categories: Vec::new(),
            exclude_categories: strings(&[
                "Real-world people",
                "Real-world media",
                "Disambiguation pages",
                "Dates",
                "Community content",
                "Wookieepedia",
                "Wiki",
                "Articles with unpopulated pronoun parameters",
                "Articles that use DPL",
                "Articles with incorrect canonical link",
                "Articles with an inconsistent canonical status",
                "Articles with broken file links",
                "Articles with dead external links",
                "Articles with information from unknown sources",
            ]),
            avoid_folder_categories: strings(&[
                "Articles needing illustration",
                "Articles with conjectural titles",
                "Articles with gameplay alternatives",
                "Archiveurl usages with non-Wayback URLs",
                "Canon articles",
                "Legends articles",
                "Canon articles with Legends counterparts",
            ]),
            image_exclude_keywords: strings(&[
                "logo", "banner", "icon", "question", "cite", "premium", "gotocanon",
                "gotolegends", "swcustom", "tab-", "onacanonarticle", "onalegendsarticle",
                "blue-exclamation-mark", "starwars-databank", "bobawhere", "falactic_senate",
                "swtor_mini", "onanoncanonarticle", "swajsmall", "wizardsofthecoast",
                "wiki-shrinkable", "lego", "kdy", "swinsider", "stub",
            ]),
        }
    }
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            style: "Rephrase the following Star Wars Wookieepedia article content in an engaging, \
                    concise, and informative way, suitable for a narration. Focus on the core facts \
                    and avoid phrases like 'this article describes' or 'the content above'."
                .to_string(),
            word_limit: 150,
            max_rewrite_attempts: 3,
            truncate_overlong: true,
            tts_url: "https://texttospeech.googleapis.com/v1/text:synthesize".to_string(),
            voice: VoiceConfig::default(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language_code: "en-US".to_string(),
            name: "en-US-Wavenet-D".to_string(),
            ssml_gender: "MALE".to_string(),
            speaking_rate: 1.0,
            pitch: 0.0,
        }
    }
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            command: "holocron-align".to_string(),
            args: Vec::new(),
            timeout_secs: 300,
            min_confidence: 0.3,
            fallback_on_failure: true,
            max_words_per_segment: 5,
            pause_threshold_secs: 0.3,
        }
    }
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            background: PathBuf::from("data/background/minecraft01.mp4"),
            font: None,
            width: 1080,
            height: 1920,
            fps: 30,
            min_duration_secs: 0.0,
            render_timeout_secs: 900,
            max_images: 8,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            privacy: Privacy::Private,
            category_id: "24".to_string(),
            hashtags: strings(&[
                "#shorts", "#starwars", "#legends", "#starwarsfans", "#jedi", "#sith",
                "#lightsaber", "#starwarslegends", "#starwarscommunity", "#force",
            ]),
            redirect_uri: "http://127.0.0.1:8085".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let content = fs_err::read_to_string(&config_path)
                .context("Failed to read config file")?;

            let config: Config = serde_yaml::from_str(&content)
                .context("Failed to parse config file")?;

            config.validate()?;
            tracing::debug!("Loaded configuration from {}", config_path.display());
            Ok(config)
        } else {
            let config = Self::default();
            config.save(&config_path).await?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("holocron.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("holocron").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_and_normalize_url(&self.collector.api_url)
            .context("collector.api_url is invalid")?;
        validate_and_normalize_url(&self.narrator.api_base)
            .context("narrator.api_base is invalid")?;
        validate_and_normalize_url(&self.narrator.tts_url)
            .context("narrator.tts_url is invalid")?;

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.collector.max_attempts == 0 {
            anyhow::bail!("collector.max_attempts must be at least 1");
        }
        if self.narrator.word_limit == 0 {
            anyhow::bail!("narrator.word_limit must be positive");
        }
        if self.narrator.max_rewrite_attempts == 0 {
            anyhow::bail!("narrator.max_rewrite_attempts must be at least 1");
        }
        if self.aligner.max_words_per_segment == 0 {
            anyhow::bail!("aligner.max_words_per_segment must be positive");
        }
        if !(0.0..=1.0).contains(&self.aligner.min_confidence) {
            anyhow::bail!("aligner.min_confidence must be between 0 and 1");
        }
        if self.composer.width == 0 || self.composer.height == 0 {
            anyhow::bail!("composer.width and composer.height must be positive");
        }
        if self.composer.width % 2 != 0 || self.composer.height % 2 != 0 {
            anyhow::bail!("composer.width and composer.height must be even for H.264");
        }
        if self.composer.fps == 0 {
            anyhow::bail!("composer.fps must be positive");
        }
        if self.composer.min_duration_secs < 0.0 {
            anyhow::bail!("composer.min_duration_secs must not be negative");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Data Dir: {}", self.paths.data_dir.display());
        println!("  Knowledge Source: {}", self.collector.api_url);
        if !self.collector.include_categories.is_empty() {
            println!("  Include Categories: {}", self.collector.include_categories.join(", "));
        }
        println!("  Model: {}", self.narrator.model);
        println!("  Word Limit: {}", self.narrator.word_limit);
        println!("  Voice: {}", self.narrator.voice.name);
        println!("  Aligner: {}", self.aligner.command);
        println!("  Background: {}", self.composer.background.display());
        println!(
            "  Output: {}x{} @ {} fps",
            self.composer.width, self.composer.height, self.composer.fps
        );
        println!("  Privacy: {}", self.publisher.privacy.as_str());
        println!(
            "  Retry: {} attempts, {} ms initial backoff",
            self.retry.max_attempts, self.retry.initial_backoff_ms
        );
    }
}

/// Read a secret from the environment, treating blank values as unset
pub fn env_secret(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "narrator:\n  word_limit: 90\npublisher:\n  privacy: unlisted\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.narrator.word_limit, 90);
        assert_eq!(config.narrator.model, "gemini-1.5-flash");
        assert_eq!(config.publisher.privacy, Privacy::Unlisted);
        assert_eq!(config.composer.width, 1080);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.composer.width = 1081;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collector.api_url = "ftp://wiki".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aligner.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_writes_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let config = Config::load(Some(&path)).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.narrator.word_limit, 150);

        let reloaded = Config::load(Some(&path)).await.unwrap();
        assert_eq!(reloaded.collector.api_url, config.collector.api_url);
    }
}
