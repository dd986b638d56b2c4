//! Atelier CLI - serves the classroom web editor and offers offline utilities

use atelier_core::{
    diagnostic::{has_blocking, tally},
    AtelierError, Config, CoreEngine, FlatFileMap, JsonFileStore, Result,
};
use atelier_editor::{EditorPlugin, EditorSession};
use atelier_preview::{PreviewPlugin, PreviewStore};
use atelier_server::ServerPlugin;
use atelier_validator::HtmlValidator;
use clap::{Arg, Command};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};

/// Files larger than this are left out of `--check` reference resolution
const MAX_CHECK_FILE_BYTES: u64 = 1024 * 1024;

/// CLI arguments structure
#[derive(Debug, Clone)]
pub struct Args {
    pub storage: Option<PathBuf>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub config_file: Option<PathBuf>,
    pub dev_mode: bool,
    pub check: Option<PathBuf>,
    pub export: Option<PathBuf>,
    pub validate_config: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("atelier")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Classroom web editor with validated live previews")
            .long_about(
                "Atelier serves an in-browser editor over a small project of HTML, CSS and \
                JavaScript files. Runs are validated first; documents without structural \
                errors are assembled into a short-lived preview.",
            )
            .arg(
                Arg::new("storage")
                    .help("JSON file holding the project (default: user data directory)")
                    .index(1)
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("hostname")
                    .short('H')
                    .long("hostname")
                    .help("Hostname or IP address to bind the server to")
                    .value_parser(clap::value_parser!(String)),
            )
            .arg(
                Arg::new("port")
                    .short('p')
                    .long("port")
                    .help("Port number to bind the server to (1-65535)")
                    .value_parser(clap::value_parser!(u16)),
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .help("Path to configuration file (JSON format)")
                    .long_help(
                        "Path to a JSON configuration file with server, storage and editor \
                        sections. CLI arguments override settings from the file.",
                    )
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("dev-mode")
                    .long("dev-mode")
                    .help("Enable development mode with pretty debug logging")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("check")
                    .long("check")
                    .value_name("FILE")
                    .help("Validate a local HTML file and exit")
                    .long_help(
                        "Validate FILE the same way a run does and print its diagnostics. \
                        References resolve against the files next to it. Exits with status 1 \
                        when an error would block the preview.",
                    )
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("export")
                    .long("export")
                    .value_name("DIR")
                    .help("Write the stored project to DIR/project.zip and exit")
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("validate-config")
                    .long("validate-config")
                    .help("Validate configuration and exit")
                    .action(clap::ArgAction::SetTrue),
            )
            .after_help(
                "EXAMPLES:\n    \
                atelier                                  Serve the default project on port 3000\n    \
                atelier -p 8080 class.json               Serve class.json on port 8080\n    \
                atelier --check site/index.html          Validate a file on disk\n    \
                atelier --export ./out class.json        Export class.json as a zip\n    \
                atelier --validate-config --config atelier.json",
            )
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        Self {
            storage: matches.get_one::<PathBuf>("storage").cloned(),
            hostname: matches.get_one::<String>("hostname").cloned(),
            port: matches.get_one::<u16>("port").copied(),
            config_file: matches.get_one::<PathBuf>("config").cloned(),
            dev_mode: matches.get_flag("dev-mode"),
            check: matches.get_one::<PathBuf>("check").cloned(),
            export: matches.get_one::<PathBuf>("export").cloned(),
            validate_config: matches.get_flag("validate-config"),
        }
    }

    /// Load the configuration file, if any, and apply CLI overrides
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(AtelierError::config(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }
                let config = Config::from_file(path)?;
                info!("Configuration loaded from {}", path.display());
                config
            }
            None => Config::new(),
        };

        if let Some(storage) = &self.storage {
            config.storage.path = storage.clone();
        }
        if let Some(hostname) = &self.hostname {
            config.server.hostname = hostname.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }

        Ok(config)
    }
}

fn init_logging(dev_mode: bool) {
    let log_level = if dev_mode { Level::DEBUG } else { Level::INFO };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(dev_mode)
        .with_line_number(dev_mode)
        .with_file(dev_mode);

    if dev_mode {
        subscriber.with_ansi(true).pretty().init();
        info!("Development mode enabled");
    } else {
        subscriber.with_ansi(true).init();
    }
}

/// Print every configuration error and warning; fails when any error exists
fn validate_config(config: &Config) -> Result<()> {
    let result = config.validate_comprehensive();

    println!("Server: http://{}:{}", config.server.hostname, config.server.port);
    println!("Storage: {}", config.storage.path.display());
    println!(
        "Previews: {} ms, at most {} live",
        config.editor.preview_ttl_ms, config.editor.max_live_previews
    );

    for warning in &result.warnings {
        println!("⚠️  {}: {}", warning.field_path, warning.message);
    }
    for issue in &result.errors {
        println!("❌ {}: {}", issue.field_path, issue.message);
    }

    if result.is_valid {
        println!("✅ Configuration is valid");
        Ok(())
    } else {
        Err(AtelierError::config(format!(
            "{} configuration error(s)",
            result.errors.len()
        )))
    }
}

/// Text files under `root`, keyed by slash-joined path relative to it
fn collect_project_files(root: &Path) -> Result<FlatFileMap> {
    let mut files = FlatFileMap::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            if std::fs::metadata(&path)?.len() > MAX_CHECK_FILE_BYTES {
                continue;
            }
            // Binary files still resolve as references, with empty content
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            if let Some(relative) = relative_path(root, &path) {
                files.insert(relative, content);
            }
        }
    }

    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!segments.is_empty()).then(|| segments.join("/"))
}

/// Validate one file on disk; returns whether a run would be blocked
fn check_file(path: &Path) -> Result<bool> {
    let source = std::fs::read_to_string(path)?;
    let root = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let files = collect_project_files(root)?;
    let name = relative_path(root, path).unwrap_or_else(|| path.display().to_string());

    let diagnostics = HtmlValidator::new().validate(&source, &name, &files);
    for diagnostic in &diagnostics {
        println!("{}", diagnostic);
    }

    let (errors, warnings) = tally(&diagnostics);
    println!("{}: {} error(s), {} warning(s)", name, errors, warnings);
    Ok(has_blocking(&diagnostics))
}

/// Export the stored project without starting the server
async fn export_project(config: &Config, dir: &Path) -> Result<PathBuf> {
    let store = Arc::new(JsonFileStore::new(config.storage.path.clone()));
    let previews = PreviewStore::new(
        Duration::from_millis(config.editor.preview_ttl_ms),
        config.editor.max_live_previews,
    );

    let session = EditorSession::open(store, config.editor.clone(), previews, None).await?;
    let path = session.export_to(dir).await?;
    session.flush().await?;
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.dev_mode);

    if let Some(file) = &args.check {
        return match check_file(file) {
            Ok(false) => Ok(()),
            Ok(true) => std::process::exit(1),
            Err(e) => {
                eprintln!("❌ Failed to check {}: {}", file.display(), e);
                std::process::exit(1);
            }
        };
    }

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration:\n{}", e);
            std::process::exit(1);
        }
    };

    if args.validate_config {
        if let Err(e) = validate_config(&config) {
            eprintln!("❌ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(dir) = &args.export {
        return match export_project(&config, dir).await {
            Ok(path) => {
                println!("✅ Exported project to {}", path.display());
                Ok(())
            }
            Err(e) => {
                eprintln!("❌ Export failed: {}", e);
                std::process::exit(1);
            }
        };
    }

    info!("Starting Atelier");

    let mut engine = match CoreEngine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to create core engine: {}", e);
            std::process::exit(1);
        }
    };

    let plugins: Vec<Box<dyn atelier_core::Plugin>> = vec![
        Box::new(PreviewPlugin::new()),
        Box::new(EditorPlugin::new()),
        Box::new(ServerPlugin::new()),
    ];
    for plugin in plugins {
        let name = plugin.name().to_string();
        if let Err(e) = engine.register_plugin(plugin).await {
            error!("Failed to start plugin {}: {}", name, e);
            if let Err(e) = engine.shutdown().await {
                error!("Error during shutdown: {}", e);
            }
            std::process::exit(1);
        }
    }

    let config = engine.config();
    println!("🎨 Atelier");
    println!("📁 Project: {}", config.storage.path.display());
    println!(
        "🌐 Server: http://{}:{}",
        config.server.hostname, config.server.port
    );
    println!("\n✨ Ready! Press Ctrl+C to stop.\n");

    if let Err(e) = engine.run().await {
        error!("Error during shutdown: {}", e);
        std::process::exit(1);
    }

    info!("Atelier shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let matches = Args::command()
            .try_get_matches_from(["atelier", "-p", "8080", "-H", "0.0.0.0", "class.json"])
            .unwrap();
        let args = Args::from_matches(matches);

        let config = args.load_config().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.hostname, "0.0.0.0");
        assert_eq!(config.storage.path, PathBuf::from("class.json"));
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let matches = Args::command()
            .try_get_matches_from(["atelier", "--config", "/nonexistent/atelier.json"])
            .unwrap();
        assert!(Args::from_matches(matches).load_config().is_err());
    }

    #[test]
    fn test_check_resolves_sibling_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/style.css"), "body {}").unwrap();

        let page = dir.path().join("index.html");
        std::fs::write(
            &page,
            "<link rel=\"stylesheet\" href=\"src/style.css\">\n<p>ok</p>",
        )
        .unwrap();
        assert!(!check_file(&page).unwrap());

        std::fs::write(&page, "<p>open").unwrap();
        assert!(check_file(&page).unwrap());

        let files = collect_project_files(dir.path()).unwrap();
        assert_eq!(files.get("src/style.css"), Some("body {}"));
    }

    #[tokio::test]
    async fn test_export_writes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().join("storage.json");

        let path = export_project(&config, &dir.path().join("out")).await.unwrap();
        assert!(path.ends_with("project.zip"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        assert!(config.storage.path.exists());
    }
}
