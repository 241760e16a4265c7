use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use jce::app::{self, BenchmarkRequest, ExtractRequest};
use jce::auth::{
    AuthKind, AuthMethod, Authenticator, ChainedAuthenticator, PromptAuthenticator,
    StaticAuthenticator,
};
use jce::config::{default_config_path, ResolvedConfig};
use jce::jenkins::{DecryptOptions, ProgressSink, Strategy};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_COMMIT_HASH"), ")");

#[derive(Parser)]
#[command(name = "jce", version = VERSION)]
#[command(about = "Extract and decrypt stored credentials from Jenkins servers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Log as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct AuthArgs {
    /// Username for API token authentication.
    #[arg(long, requires = "auth_token")]
    auth_user: Option<String>,

    /// API token (from <jenkins>/me/configure).
    #[arg(long, requires = "auth_user")]
    auth_token: Option<String>,

    /// Session cookie as NAME=VALUE, or a bare JSESSIONID value.
    #[arg(long)]
    auth_cookie: Option<String>,

    /// Bearer token sent in the Authorization header.
    #[arg(long)]
    auth_bearer: Option<String>,

    /// Never prompt; fail when no credentials are available.
    #[arg(long)]
    no_prompt: bool,
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Jenkins base URL; defaults to jenkins.url from the config.
    #[arg(long, env = "JENKINS_URL")]
    url: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    ApiToken,
    Cookie,
    Bearer,
}

impl From<MethodArg> for AuthKind {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::ApiToken => AuthKind::ApiToken,
            MethodArg::Cookie => AuthKind::SessionCookie,
            MethodArg::Bearer => AuthKind::BearerToken,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, decrypt and save the credentials of a Jenkins server
    Extract {
        /// Project key, name or alias (see `list-projects`)
        project: Option<String>,

        #[arg(long)]
        url: Option<String>,

        /// SSH host the credentials file is copied from
        #[arg(long)]
        host: Option<String>,

        /// Local credentials file; fetched with scp when missing
        #[arg(long, default_value = "credentials.xml")]
        credentials_file: PathBuf,

        /// Only credentials whose description contains this text
        #[arg(long)]
        pattern: Option<String>,

        /// Output file for decrypted credentials
        #[arg(short, long, default_value = "credentials.txt")]
        output: PathBuf,

        /// sequential, worker_pool or consolidated; chosen by batch size when omitted
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Maximum concurrent workers for the worker pool
        #[arg(long)]
        workers: Option<usize>,

        /// Use the local credentials file only
        #[arg(long)]
        no_fetch: bool,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// List known projects and their Jenkins servers
    ListProjects,

    /// Show the entries of a local credentials.xml
    ParseLocal {
        file: PathBuf,

        #[arg(long)]
        pattern: Option<String>,

        /// Include Jenkins system credentials
        #[arg(long)]
        all: bool,
    },

    /// Authenticate interactively and cache the session
    SetupAuth {
        #[command(flatten)]
        server: ServerArgs,

        #[arg(long, value_enum)]
        method: Option<MethodArg>,
    },

    /// Show the resolved configuration
    Config,

    /// Compare decryption strategies on a sample of credentials
    Benchmark {
        #[command(flatten)]
        server: ServerArgs,

        #[arg(long)]
        host: Option<String>,

        #[arg(long, default_value = "credentials.xml")]
        credentials_file: PathBuf,

        #[arg(long, default_value_t = 10)]
        sample_size: usize,

        #[arg(
            long,
            value_delimiter = ',',
            default_value = "sequential,worker_pool,consolidated"
        )]
        strategies: Vec<Strategy>,

        #[arg(long)]
        workers: Option<usize>,

        #[arg(long)]
        no_fetch: bool,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Check authentication and script console access
    HealthCheck {
        #[command(flatten)]
        server: ServerArgs,

        /// Include server info
        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Show the cached authentication for a server
    AuthStatus {
        #[command(flatten)]
        server: ServerArgs,

        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Delete the cached session for a server
    ClearCache {
        #[command(flatten)]
        server: ServerArgs,

        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
}

fn authenticator(args: &AuthArgs, preferred: Option<AuthKind>) -> Box<dyn Authenticator> {
    let explicit = if let (Some(user), Some(token)) = (&args.auth_user, &args.auth_token) {
        Some(AuthMethod::api_token(user, token))
    } else if let Some(cookie) = &args.auth_cookie {
        Some(AuthMethod::parse_cookie(cookie))
    } else {
        args.auth_bearer.as_deref().map(AuthMethod::bearer_token)
    };

    let mut chain = ChainedAuthenticator::new();
    if let Some(method) = explicit {
        chain = chain.with(StaticAuthenticator::new(method));
    }
    chain = chain.with(StaticAuthenticator::from_env());
    if !args.no_prompt {
        let prompt = match preferred {
            Some(kind) => PromptAuthenticator::new().with_preferred(kind),
            None => PromptAuthenticator::new(),
        };
        chain = chain.with(prompt);
    }
    Box::new(chain)
}

fn server_url(config: &ResolvedConfig, server: &ServerArgs) -> Result<String> {
    Ok(app::resolve_target(config, None, server.url.as_deref(), None)?.url)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Redraws `completed/total` on stderr.
#[derive(Default)]
struct StderrProgress {
    last: AtomicUsize,
}

impl ProgressSink for StderrProgress {
    fn progress(&self, completed: usize, total: usize) {
        if self.last.fetch_max(completed, Ordering::Relaxed) >= completed {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\rDecrypting {completed}/{total}");
        if completed == total {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact_on(&dialoguer::console::Term::stderr())
        .context("Failed to read confirmation")
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load jce config: {}", cli.config.display()))?;

    match cli.command {
        Command::Extract {
            project,
            url,
            host,
            credentials_file,
            pattern,
            output,
            strategy,
            workers,
            no_fetch,
            auth,
        } => {
            let project = if !auth.no_prompt
                && app::needs_project(&config, project.as_deref(), url.as_deref())
            {
                app::select_project()?.map(|p| p.key.to_string())
            } else {
                project
            };
            let target =
                app::resolve_target(&config, project.as_deref(), url.as_deref(), host.as_deref())?;
            let connection = app::connect(&config, &target.url, authenticator(&auth, None))?;

            let mut options =
                DecryptOptions::default().with_progress(Arc::new(StderrProgress::default()));
            if let Some(strategy) = strategy {
                options = options.with_strategy(strategy);
            }
            if let Some(workers) = workers {
                options = options.with_max_workers(workers);
            }

            let request = ExtractRequest {
                target,
                credentials_file,
                remote_path: config.jenkins.remote_credentials_path.clone(),
                fetch: !no_fetch,
                pattern,
                output,
                options,
                manual: (!auth.no_prompt)
                    .then(|| Arc::new(app::PromptManualDecrypt) as Arc<dyn app::ManualDecrypt>),
            };
            let result = app::extract(&connection, &request).await?;
            for failure in &result.failures {
                eprintln!("failed: {} ({}): {}", failure.identifier, failure.kind, failure.error);
            }
            print_json(&result)?;
            if result.failed > 0 && result.succeeded == 0 {
                anyhow::bail!("No credentials could be decrypted");
            }
        }

        Command::ListProjects => print_json(&app::list_projects())?,

        Command::ParseLocal { file, pattern, all } => {
            print_json(&app::parse_local(&file, pattern.as_deref(), all)?)?;
        }

        Command::SetupAuth { server, method } => {
            let url = server_url(&config, &server)?;
            let auth = AuthArgs::default();
            let connection =
                app::connect(&config, &url, authenticator(&auth, method.map(AuthKind::from)))?;
            print_json(&app::setup_auth(&connection).await?)?;
        }

        Command::Config => print_json(&app::config_output(&cli.config, &config))?,

        Command::Benchmark {
            server,
            host,
            credentials_file,
            sample_size,
            strategies,
            workers,
            no_fetch,
            auth,
        } => {
            let target =
                app::resolve_target(&config, None, server.url.as_deref(), host.as_deref())?;
            let connection = app::connect(&config, &target.url, authenticator(&auth, None))?;
            let request = BenchmarkRequest {
                target,
                credentials_file,
                remote_path: config.jenkins.remote_credentials_path.clone(),
                fetch: !no_fetch,
                sample_size,
                strategies,
                max_workers: workers,
            };
            print_json(&app::run_benchmark(&config, &connection, &request).await?)?;
        }

        Command::HealthCheck {
            server,
            verbose,
            auth,
        } => {
            let url = server_url(&config, &server)?;
            let connection = app::connect(&config, &url, authenticator(&auth, None))?;
            let health = app::health_check(&connection, verbose).await;
            print_json(&health)?;
            if !health.problems.is_empty() {
                std::process::exit(1);
            }
        }

        Command::AuthStatus { server, auth } => {
            let url = server_url(&config, &server)?;
            let connection = app::connect(&config, &url, authenticator(&auth, None))?;
            print_json(&app::auth_status(&connection).await)?;
        }

        Command::ClearCache { server, yes } => {
            let url = server_url(&config, &server)?;
            if !yes && !confirm(&format!("Delete the cached session for {url}?"))? {
                return Ok(());
            }
            print_json(&app::clear_cache(&config, &url)?)?;
        }
    }

    Ok(())
}
