//! This module implements the definition of the command line app.

use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command};

pub const ABOUT: &str = "The metrics relay dispatches line protocol writes to time-series backends.";

pub fn make_app() -> Command {
    Command::new("relay")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .propagate_version(true)
        .max_term_width(79)
        .version(env!("CARGO_PKG_VERSION"))
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("CONFIG")
                .value_parser(ValueParser::path_buf())
                .env("RELAY_CONFIG_PATH")
                .help("The path to the config folder."),
        )
        .subcommand(Command::new("run").about("Run the relays configured in the config folder"))
        .subcommand(
            Command::new("config")
                .about("Manage the relay config")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire effective config")
                        .arg(
                            Arg::new("debug")
                                .long("debug")
                                .action(ArgAction::SetTrue)
                                .help("Print the config in its internal debug representation"),
                        ),
                ),
        )
}
