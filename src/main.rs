use anyhow::{bail, Context};
use clap::{Arg, ArgMatches, Command};
use eml_verdict::{Analyzer, Config, DetectorSet, Eml, ResponseCache};
use log::LevelFilter;
use std::path::Path;
use std::process;
use std::str::FromStr;

const DEFAULT_CONFIG_PATH: &str = "eml-verdict.yaml";

fn cli() -> Command {
    Command::new("eml-verdict")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Run security detectors over a parsed email and report verdicts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and list the detectors it enables")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("analyze")
                .long("analyze")
                .value_name("FILE")
                .help("Analyze a parsed email (JSON) and print the response")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("lookup")
                .long("lookup")
                .value_name("ID")
                .help("Print a cached analysis by id")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("list-cached")
                .long("list-cached")
                .help("List the ids of cached analyses")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("status")
                .long("status")
                .help("Show which optional integrations are configured")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(clap::ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    if let Err(e) = run(&matches).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        init_logging(matches.get_flag("verbose"), None);
        Config::default()
            .to_file(generate_path)
            .with_context(|| format!("writing configuration to {generate_path}"))?;
        println!("Default configuration written to: {generate_path}");
        return Ok(());
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);
    let config_exists = Path::new(config_path).exists();
    let config = if config_exists {
        Config::from_file(config_path)
    } else {
        Ok(Config::default())
    };

    init_logging(
        matches.get_flag("verbose"),
        config.as_ref().ok().and_then(|c| c.logging.level.as_deref()),
    );
    if !config_exists {
        log::warn!("Configuration file '{config_path}' not found, using default configuration");
    }
    let config = config.with_context(|| format!("loading configuration from {config_path}"))?;

    if matches.get_flag("test-config") {
        return test_config(&config);
    }

    if matches.get_flag("status") {
        println!("{}", serde_json::to_string_pretty(&config.status())?);
        return Ok(());
    }

    if let Some(email_file) = matches.get_one::<String>("analyze") {
        return analyze_file(config, email_file).await;
    }

    if let Some(id) = matches.get_one::<String>("lookup") {
        let cache = persistent_cache(&config)?;
        match cache.lookup(id).await? {
            Some(response) => println!("{}", serde_json::to_string_pretty(&response)?),
            None => bail!("no cached analysis with id {id}"),
        }
        return Ok(());
    }

    if matches.get_flag("list-cached") {
        let cache = persistent_cache(&config)?;
        for id in cache.list_ids().await? {
            println!("{id}");
        }
        return Ok(());
    }

    cli().print_help()?;
    println!();
    Ok(())
}

fn init_logging(verbose: bool, configured: Option<&str>) {
    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        configured
            .and_then(|level| LevelFilter::from_str(level).ok())
            .unwrap_or(LevelFilter::Info)
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();
}

fn test_config(config: &Config) -> anyhow::Result<()> {
    println!("Testing configuration...");
    let detectors = DetectorSet::build(config).context("building detectors")?;

    println!("Enabled detectors ({}):", detectors.len());
    for name in detectors.names() {
        println!("  - {name}");
    }
    if !config.enabled_detectors().ipqs() {
        println!("IPQS detectors disabled: no API key configured");
    }

    let status = config.status();
    println!(
        "Cache: {}",
        if status.cache { "redis" } else { "not persistent" }
    );
    println!("Configuration is valid.");
    Ok(())
}

async fn analyze_file(config: Config, email_file: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(email_file)
        .with_context(|| format!("reading {email_file}"))?;
    let eml = Eml::from_json(&content).with_context(|| format!("parsing {email_file}"))?;

    let cache_enabled = config.status().cache;
    let cache_config = config.cache.clone();
    let response = Analyzer::new(config).analyze(eml).await?;

    if cache_enabled {
        // A caching failure does not invalidate the analysis.
        match ResponseCache::from_config(&cache_config) {
            Ok(cache) => {
                if let Err(e) = cache.store(&response).await {
                    log::warn!("Failed to cache analysis {}: {e}", response.id);
                }
            }
            Err(e) => log::warn!("Cache unavailable: {e}"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn persistent_cache(config: &Config) -> anyhow::Result<ResponseCache> {
    if !config.status().cache {
        bail!("no persistent cache configured (set cache.backend: redis and cache.redis_url)");
    }
    Ok(ResponseCache::from_config(&config.cache)?)
}
