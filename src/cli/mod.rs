//! # CLI Module
//!
//! Command-line interface for storeproxy: running the proxy and the
//! housekeeping around its endpoint registry.
//!
//! ## Commands
//!
//! ### Server Operations
//! - `start`: Validate the environment, load the registry and serve
//!
//! ### Registry Management
//! - `list-endpoints`: Display the configured tenants in a formatted table (secrets never printed)
//! - `encrypt-secret`: Seal a client secret with a key from the key ring, for the registry file
//! - `generate-key`: Print a new random AES-256 key for `STOREPROXY_SECRET_KEYS`
//!
//! ### Environment
//! - `check-env`: Validate environment variables and print the outcome
//! - `env-example`: Print an example `.env` file
//!
//! ## Usage Example
//!
//! ```bash
//! export STOREPROXY_SECRET_KEYS="primary:$(storeproxy generate-key)"
//! printf '%s\n' "$CLIENT_SECRET" | storeproxy encrypt-secret --key-id primary
//! storeproxy list-endpoints
//! storeproxy start
//! ```

use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::process::ExitCode;
use tracing::error;

use crate::env::{
    AppConfig, generate_env_example, print_validation_results, validate_environment,
};
use crate::logging::init_tracing;
use crate::registry::EndpointRegistry;
use crate::registry::config::RegistryConfig;
use crate::security::generate_key;

///////////////////////////////////////////////////////////////////////////////
//****                        Private Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Parser)]
#[command(name = "storeproxy")]
#[command(about = "Authorizing REST proxy for the Store Submission API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

///////////////////////////////////////////////////////////////////////////////
//****                         Private Types                             ****//
///////////////////////////////////////////////////////////////////////////////

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    #[command(name = "start")]
    Start,
    /// List the endpoints in the registry file
    #[command(name = "list-endpoints")]
    ListEndpoints,
    /// Encrypt a client secret for the registry file
    #[command(name = "encrypt-secret")]
    EncryptSecret {
        #[arg(long, help = "Key ring id to seal the secret with")]
        key_id: String,
        #[arg(long, help = "Plaintext client secret, read from stdin when omitted")]
        secret: Option<String>,
    },
    /// Generate a new base64 AES-256 key
    #[command(name = "generate-key")]
    GenerateKey,
    /// Validate environment variables
    #[command(name = "check-env")]
    CheckEnv,
    /// Print an example environment file
    #[command(name = "env-example")]
    EnvExample,
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

pub async fn parse_cli_commands() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let Some(config) = validated_config() else {
                return ExitCode::FAILURE;
            };
            init_tracing(&config.log_level);

            match crate::server::start_server(config).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!("storeproxy failed: {}", e);
                    eprintln!("storeproxy failed: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::ListEndpoints => {
            let Some(config) = validated_config() else {
                return ExitCode::FAILURE;
            };
            match load_registry(&config) {
                Ok(registry) => {
                    print_endpoints(&registry);
                    ExitCode::SUCCESS
                }
                Err(message) => {
                    eprintln!("{}", message);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::EncryptSecret { key_id, secret } => {
            let Some(config) = validated_config() else {
                return ExitCode::FAILURE;
            };
            let secret = match secret {
                Some(secret) => secret,
                None => match read_secret_from_stdin() {
                    Ok(secret) => secret,
                    Err(e) => {
                        eprintln!("Failed to read secret from stdin: {}", e);
                        return ExitCode::FAILURE;
                    }
                },
            };
            match config.secret_keys.encrypt(&key_id, &secret) {
                Ok(sealed) => {
                    println!("{}", sealed.to_base64());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Failed to encrypt secret: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::GenerateKey => {
            println!("{}", generate_key());
            ExitCode::SUCCESS
        }
        Commands::CheckEnv => {
            let result = validate_environment();
            print_validation_results(&result);
            if result.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::EnvExample => {
            print!("{}", generate_env_example());
            ExitCode::SUCCESS
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                      Private Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

fn validated_config() -> Option<AppConfig> {
    let result = validate_environment();
    if result.is_err() {
        print_validation_results(&result);
    }
    result.ok()
}

/// First line of stdin, without its line ending
fn read_secret_from_stdin() -> io::Result<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty secret"));
    }
    Ok(secret.to_string())
}

fn load_registry(config: &AppConfig) -> Result<EndpointRegistry, String> {
    let registry_config = RegistryConfig::load(&config.endpoints_file)
        .map_err(|e| format!("Failed to load registry: {}", e))?;
    EndpointRegistry::from_config(&registry_config, &config.secret_keys)
        .map_err(|e| format!("Invalid registry: {}", e))
}

fn print_endpoints(registry: &EndpointRegistry) {
    if registry.is_empty() {
        println!("No endpoints configured.");
        return;
    }

    println!(
        "\n{:<38} | {:<20} | {:<11} | {:<38} | {:<20} | {:<20} | {:<7}",
        "Tenant ID", "Friendly Name", "Environment", "Client ID", "Read-Only Group", "Read-Write Group", "Default"
    );
    println!("{:-<170}", "");

    for endpoint in registry.endpoints() {
        let is_default = registry.default_tenant(endpoint.environment)
            == Some(endpoint.tenant_id.as_str());
        println!(
            "{:<38} | {:<20} | {:<11} | {:<38} | {:<20} | {:<20} | {:<7}",
            endpoint.tenant_id,
            endpoint.tenant_friendly_name.as_deref().unwrap_or("-"),
            endpoint.environment.to_string(),
            endpoint.client_id,
            endpoint.read_only_group,
            endpoint.read_write_group,
            if is_default { "yes" } else { "" }
        );
    }

    println!("\n{} endpoint(s)", registry.len());
}
