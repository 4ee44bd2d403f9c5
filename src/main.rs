use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tenant_auth::auth::{AuthError, AuthService, Claims, TenantRecord};
use tenant_auth::config::{self, Config};
use tracing_subscriber::EnvFilter;

/// Tenant credential store and bearer-token service
#[derive(Parser)]
#[command(name = "tenant-auth", version, about)]
struct Cli {
    /// Path to a TOML config file (defaults to ./tenant-auth.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway
    Serve {
        /// Override the bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the bind port
        #[arg(long)]
        port: Option<u16>,

        /// Accept tenant registration over HTTP
        #[arg(long)]
        allow_registration: bool,
    },

    /// Register a tenant credential
    CreateUser {
        /// Tenant identifier
        tenant_id: String,

        /// Password (read from the first line of stdin if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Issue a token for a tenant without checking a password
    IssueToken {
        /// Tenant identifier
        tenant_id: String,

        /// Lifetime in seconds (defaults to the configured TTL)
        #[arg(long, allow_negative_numbers = true)]
        ttl: Option<i64>,
    },

    /// Validate a token and print its claims
    VerifyToken {
        /// Compact token string
        token: String,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tenant_auth=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// What a one-shot subcommand prints, and on which stream.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Success(String),
    Failure(String),
}

impl Outcome {
    fn finish(self) -> ExitCode {
        match self {
            Outcome::Success(line) => {
                println!("{line}");
                ExitCode::SUCCESS
            }
            Outcome::Failure(line) => {
                eprintln!("{line}");
                ExitCode::FAILURE
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Before tracing, so RUST_LOG may come from .env.
    let env_file = config::load_dotenv();
    init_tracing();
    if let Some(path) = env_file {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    let auth = Arc::new(
        AuthService::from_config(&config.auth).context("Failed to open credential store")?,
    );

    match cli.command {
        Commands::Serve {
            host,
            port,
            allow_registration,
        } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            config.gateway.allow_registration |= allow_registration;
            tenant_auth::gateway::run_gateway(&config.gateway, auth).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::CreateUser {
            tenant_id,
            password,
        } => {
            let password = match password {
                Some(p) => p,
                None => read_password_line(std::io::stdin().lock())?,
            };
            let result = auth.create_user(&tenant_id, &password);
            Ok(create_user_outcome(&tenant_id, result)?.finish())
        }
        Commands::IssueToken { tenant_id, ttl } => {
            let issued = auth.generate_token(&tenant_id, ttl.unwrap_or(auth.default_ttl_secs()))?;
            println!("{}", issued.token);
            Ok(ExitCode::SUCCESS)
        }
        Commands::VerifyToken { token } => {
            Ok(verify_token_outcome(auth.verify_token(token.trim()))?.finish())
        }
    }
}

fn create_user_outcome(tenant_id: &str, result: Result<TenantRecord, AuthError>) -> Result<Outcome> {
    match result {
        Ok(record) => Ok(Outcome::Success(format!(
            "Created tenant '{}' with id {}",
            record.tenant_id, record.id
        ))),
        Err(AuthError::DuplicateCredential) => {
            Ok(Outcome::Failure(format!("Tenant '{tenant_id}' already exists")))
        }
        Err(e) => Err(e.into()),
    }
}

fn verify_token_outcome(result: Result<Claims, AuthError>) -> Result<Outcome> {
    match result {
        Ok(claims) => Ok(Outcome::Success(serde_json::to_string(&claims)?)),
        Err(e) if e.is_unauthorized() => Ok(Outcome::Failure(format!("Token rejected: {e}"))),
        Err(e) => Err(e.into()),
    }
}

/// First line of `reader`, without its line ending.
fn read_password_line(mut reader: impl BufRead) -> Result<String> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tenant_auth::auth::{CredentialStore, TokenSigner};
    use tempfile::TempDir;

    fn test_service() -> (TempDir, AuthService) {
        let tmp = TempDir::new().unwrap();
        let store = CredentialStore::open(tmp.path().join("users.json"), "cli-fixed-salt").unwrap();
        let service = AuthService::new(Arc::new(store), TokenSigner::new(b"cli-key"), 3600);
        (tmp, service)
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["tenant-auth", "issue-token", "store_a", "--ttl", "-5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::IssueToken { ref tenant_id, ttl: Some(-5) } if tenant_id == "store_a"
        ));

        let cli = Cli::try_parse_from(["tenant-auth", "create-user", "store_a"]).unwrap();
        assert!(matches!(cli.command, Commands::CreateUser { password: None, .. }));
    }

    #[test]
    fn created_tenant_reports_its_id() {
        let (_tmp, auth) = test_service();
        let outcome = create_user_outcome("store_a", auth.create_user("store_a", "pw")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Success("Created tenant 'store_a' with id 1".into())
        );
    }

    #[test]
    fn duplicate_tenant_exits_with_failure() {
        let (_tmp, auth) = test_service();
        auth.create_user("store_a", "pw").unwrap();

        let outcome = create_user_outcome("store_a", auth.create_user("store_a", "other")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Failure("Tenant 'store_a' already exists".into())
        );
    }

    #[test]
    fn other_creation_errors_propagate() {
        let err = create_user_outcome("", Err(AuthError::InvalidInput("tenant id cannot be empty".into())))
            .unwrap_err();
        assert!(err.to_string().contains("tenant id cannot be empty"));
    }

    #[test]
    fn password_line_strips_crlf_and_stops_at_first_line() {
        let password = read_password_line(Cursor::new("s3cret\r\nsecond line\n")).unwrap();
        assert_eq!(password, "s3cret");

        let password = read_password_line(Cursor::new("no newline")).unwrap();
        assert_eq!(password, "no newline");
    }

    #[test]
    fn empty_stdin_password_is_rejected() {
        let (_tmp, auth) = test_service();
        let password = read_password_line(Cursor::new("")).unwrap();
        assert_eq!(password, "");

        let result = auth.create_user("store_a", &password);
        assert!(matches!(result, Err(AuthError::InvalidInput(_))));
        assert!(create_user_outcome("store_a", result).is_err());
        assert_eq!(auth.store().user_count(), 0);
    }

    #[test]
    fn verify_outcome_prints_claims_or_rejects() {
        let (_tmp, auth) = test_service();
        let issued = auth.generate_token("store_a", 60).unwrap();

        match verify_token_outcome(auth.verify_token(&issued.token)).unwrap() {
            Outcome::Success(line) => {
                let claims: serde_json::Value = serde_json::from_str(&line).unwrap();
                assert_eq!(claims["tenant_id"], "store_a");
            }
            other => panic!("expected success, got {other:?}"),
        }

        let expired = auth.generate_token("store_a", 0).unwrap();
        let outcome = verify_token_outcome(auth.verify_token(&expired.token)).unwrap();
        assert!(matches!(outcome, Outcome::Failure(ref line) if line.starts_with("Token rejected")));
    }
}
