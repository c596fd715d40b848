use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::parser::ValueSource;
use clap::{ArgAction, ArgGroup, CommandFactory, FromArgMatches, Parser};
use tracing::{debug, error};

use crate::api::{CtfdApi, CtfdClient, Credentials};
use crate::display::{print_banner, print_summary};
use crate::mirror::Mirror;
use crate::models::config;
use crate::models::UserConfig;

#[derive(Parser, Debug)]
#[command(name = "ctfd-dl", version)]
#[command(about = "Download challenges and attachments from a CTFd instance", long_about = None)]
// -t/-c conflicts are checked in `try_parse_args`, where env values can be told apart.
#[command(group(ArgGroup::new("auth").required(true).multiple(true).args(["token", "cookie"])))]
pub struct Cli {
    /// CTFd URL
    #[arg(short, long)]
    pub url: String,

    /// CTFd API token
    #[arg(short, long, env = "CTFD_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// CTFd session cookie
    #[arg(short, long, env = "CTFD_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// More log output (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Use this config file instead of the one in the user config directory
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(skip)]
    token_from_env: bool,

    #[arg(skip)]
    cookie_from_env: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::try_parse_args(std::env::args_os()).unwrap_or_else(|e| e.exit())
    }

    pub fn try_parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command().try_get_matches_from(args)?;
        let mut cli = Self::from_arg_matches(&matches)?;

        cli.token_from_env = matches.value_source("token") == Some(ValueSource::EnvVariable);
        cli.cookie_from_env = matches.value_source("cookie") == Some(ValueSource::EnvVariable);

        let token_on_cli = cli.token.is_some() && !cli.token_from_env;
        let cookie_on_cli = cli.cookie.is_some() && !cli.cookie_from_env;
        if token_on_cli && cookie_on_cli {
            return Err(Self::command().error(
                ErrorKind::ArgumentConflict,
                "the argument '--token <TOKEN>' cannot be used with '--cookie <COOKIE>'",
            ));
        }

        Ok(cli)
    }

    /// A flag on the command line beats an environment variable; with both
    /// variables exported and no flag, the token is used.
    pub fn credentials(&self) -> Credentials {
        let cookie_on_cli = self.cookie.is_some() && !self.cookie_from_env;

        match (&self.token, &self.cookie) {
            (_, Some(cookie)) if cookie_on_cli => Credentials::Cookie(cookie.clone()),
            (Some(token), _) => Credentials::Token(token.clone()),
            (None, cookie) => Credentials::Cookie(cookie.clone().unwrap_or_default()),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::get_config_path)
    }
}

pub fn run(cli: Cli) {
    let config_path = cli.config_path();
    let user_config = config::load_config_from(&config_path);
    write_default_config(&config_path, &user_config);

    let credentials = cli.credentials();
    let client = match CtfdClient::new(&cli.url, &credentials, &user_config) {
        Ok(client) => client,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    print_banner(client.base_url(), &cli.output);

    let mirror = Mirror::new(client, cli.output, user_config.write_metadata);
    match mirror.run() {
        Ok(report) => print_summary(&report),
        Err(e) => {
            error!("Error fetching challenges: {}", e);
            std::process::exit(1);
        }
    }
}

/// Drops the defaults on disk the first time so there is a file to edit.
fn write_default_config(path: &Path, user_config: &UserConfig) {
    if path.exists() {
        return;
    }

    match config::save_config_to(path, user_config) {
        Ok(()) => debug!("Wrote default config to {}", path.display()),
        Err(e) => debug!("Could not write default config to {}: {}", path.display(), e),
    }
}
