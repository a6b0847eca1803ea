use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use relay_config::Config;

use crate::cliapp::make_app;
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or(Path::new(".relay"), PathBuf::as_path);

    let config = Config::from_path(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    match matches.subcommand() {
        Some(("run", _)) => run(config),
        Some(("config", matches)) => manage_config(&config, matches),
        _ => unreachable!(),
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", matches)) => show_config(config, matches),
        _ => unreachable!(),
    }
}

#[allow(clippy::print_stdout)]
pub fn show_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    if matches.get_flag("debug") {
        println!("{config:#?}");
    } else {
        println!("{}", config.to_yaml_string()?);
    }

    Ok(())
}

pub fn run(config: Config) -> Result<()> {
    relay_log::init(config.logging());
    setup::dump_spawn_infos(&config);
    setup::check_config(&config)?;
    setup::init_metrics(&config);

    relay_server::run(config)?;
    Ok(())
}
