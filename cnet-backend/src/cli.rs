/// Parsed command-line arguments.
pub struct CliArgs {
    /// Path to configuration file, if provided via `--config-path` or `-c`.
    pub config_path: Option<String>,
    /// Whether help was requested.
    pub help_requested: bool,
}

impl CliArgs {
    /// Parse the process arguments.
    ///
    /// Supported flags:
    /// - `--config-path <path>`, `--config-path=<path>`, `-c <path>`: path to config file
    /// - `--help` or `-h`: print help and exit
    pub fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        Self {
            config_path: Self::extract_config_path(args),
            help_requested: args.iter().any(|a| a == "--help" || a == "-h"),
        }
    }

    /// Config path from the command line, then `CNET_CONFIG_PATH`.
    pub fn resolved_config_path(&self) -> Option<String> {
        self.config_path
            .clone()
            .or_else(|| std::env::var("CNET_CONFIG_PATH").ok())
    }

    /// Print usage information to stderr.
    pub fn print_help(program: &str) {
        eprintln!(
            "Usage: {program} [--config-path PATH] [--help]\n\n\
             --config-path, -c    Path to configuration file (overrides CNET_CONFIG_PATH env var)"
        );
    }

    fn extract_config_path(args: &[String]) -> Option<String> {
        let mut i = 1usize;
        while i < args.len() {
            let a = &args[i];
            if let Some(stripped) = a.strip_prefix("--config-path=") {
                return Some(stripped.to_string());
            } else if a == "--config-path" || a == "-c" {
                return args.get(i + 1).cloned();
            } else if let Some(stripped) = a.strip_prefix("-c=") {
                return Some(stripped.to_string());
            }
            i += 1;
        }
        None
    }
}

/// Load and validate configuration from `path` (or defaults) plus `CNET_*` overrides.
pub fn load_config(path: Option<&str>) -> anyhow::Result<cnet_config::Config> {
    let cfg = cnet_config::load_config(path).map_err(|e| {
        eprintln!("failed to load configuration: {e}");
        anyhow::anyhow!(e.to_string())
    })?;
    cnet_config::validate_config(&cfg).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(cfg)
}
