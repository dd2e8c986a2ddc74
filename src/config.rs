use once_cell::sync::OnceCell;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_max_files: String,
    pub cors_origins: Vec<String>,

    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub openrouter_model: String,
    pub agent_temperature: f64,
    pub agent_max_tokens: i64,
    pub agent_max_iterations: u32,
    pub settings_path: String,

    pub agent_timeout_seconds: u64,
    pub agent_tick_ms: u64,
    pub agent_word_delay_ms: u64,
    pub orchestrator_timeout_seconds: u64,
    pub orchestrator_tick_ms: u64,
    pub orchestrator_word_delay_ms: u64,

    pub num_agents: usize,
    pub aggregation_strategy: String,
    pub task_timeout_seconds: u64,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init_global() -> Result<&'static Config, String> {
        let cfg = Config::from_env();
        CONFIG
            .set(cfg)
            .map_err(|_| "Config already initialized".to_string())?;
        Ok(CONFIG.get().expect("config"))
    }

    pub fn get() -> &'static Config {
        CONFIG.get().expect("Config not initialized")
    }

    fn from_env() -> Config {
        let read_u64 = |key: &str, def: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(def)
        };
        let read_f64 = |key: &str, def: f64| -> f64 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(def)
        };
        let read_str = |key: &str, def: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| def.to_string())
        };

        let cors_origins = match std::env::var("CORS_ORIGINS") {
            Ok(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => vec!["*".to_string()],
        };

        Config {
            host: read_str("HOST", "0.0.0.0"),
            port: read_u64("PORT", 8000) as u16,
            log_level: read_str("LOG_LEVEL", "info"),
            log_max_files: read_str("LOG_MAX_FILES", "7d"),
            cors_origins,

            openrouter_api_key: read_str("OPENROUTER_API_KEY", ""),
            openrouter_base_url: read_str("OPENROUTER_BASE_URL", "https://openrouter.ai/api/v1"),
            openrouter_model: read_str("OPENROUTER_MODEL", "openai/gpt-4o-mini"),
            agent_temperature: read_f64("AGENT_TEMPERATURE", 0.7),
            agent_max_tokens: read_u64("AGENT_MAX_TOKENS", 2000) as i64,
            agent_max_iterations: read_u64("AGENT_MAX_ITERATIONS", 10) as u32,
            settings_path: read_str("AGENT_SETTINGS_PATH", "agent_settings.json"),

            agent_timeout_seconds: read_u64("AGENT_TIMEOUT_SECONDS", 120),
            agent_tick_ms: read_u64("AGENT_TICK_MS", 500),
            agent_word_delay_ms: read_u64("AGENT_WORD_DELAY_MS", 30),
            orchestrator_timeout_seconds: read_u64("ORCHESTRATOR_TIMEOUT_SECONDS", 300),
            orchestrator_tick_ms: read_u64("ORCHESTRATOR_TICK_MS", 1000),
            orchestrator_word_delay_ms: read_u64("ORCHESTRATOR_WORD_DELAY_MS", 20),

            num_agents: read_u64("NUM_AGENTS", 3) as usize,
            aggregation_strategy: read_str("AGGREGATION_STRATEGY", "synthesis"),
            task_timeout_seconds: read_u64("TASK_TIMEOUT_SECONDS", 180),
        }
    }

    pub fn print(&self) {
        println!("Configuration:");
        println!("  - HOST: {}", self.host);
        println!("  - PORT: {}", self.port);
        println!("  - LOG_LEVEL: {}", self.log_level);
        println!("  - OPENROUTER_BASE_URL: {}", self.openrouter_base_url);
        println!(
            "  - OPENROUTER_API_KEY: {}",
            if self.openrouter_api_key.is_empty() {
                "not set"
            } else {
                "set"
            }
        );
        println!("  - OPENROUTER_MODEL: {}", self.openrouter_model);
        println!("  - Bridge:");
        println!(
            "    • single-agent: timeout={}s, tick={}ms, word_delay={}ms",
            self.agent_timeout_seconds, self.agent_tick_ms, self.agent_word_delay_ms
        );
        println!(
            "    • orchestrator: timeout={}s, tick={}ms, word_delay={}ms",
            self.orchestrator_timeout_seconds,
            self.orchestrator_tick_ms,
            self.orchestrator_word_delay_ms
        );
        println!("  - Orchestrator:");
        println!("    • NUM_AGENTS: {}", self.num_agents);
        println!("    • AGGREGATION_STRATEGY: {}", self.aggregation_strategy);
        println!("    • TASK_TIMEOUT_SECONDS: {}", self.task_timeout_seconds);
    }
}
