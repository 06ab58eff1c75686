//! Fieldvault CLI - Key vault and schema tooling.

mod config;
mod fixtures;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fieldvault_crypto::{write_local_master_key, LocalMasterKey, MASTER_KEY_SIZE};
use fieldvault_keys::{DataEncryptionKey, DataEncryptionKeyService, IndexOutcome, KeyError};
use fieldvault_kms::{seal_trust_bundle, KmsProviderConfig, OperationContext, TrustBundle};
use fieldvault_schema::SchemaBuilder;
use fieldvault_storage::{KeyId, Namespace};
use fieldvault_storage_sqlite::SqliteKeyVault;

use crate::config::Config;

/// File name of the key vault database under `data_dir`.
const VAULT_DB_NAME: &str = "keyvault";

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "fieldvault")]
#[command(about = "Fieldvault - Data encryption keys and field-level encryption schemas")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/fieldvault.toml", env = "FIELDVAULT_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new random 96-byte local master key
    GenerateMasterKey {
        /// Output file
        #[arg(long, default_value = "master-key.txt")]
        output: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Seal a PEM trust bundle under a passphrase
    SealBundle {
        /// PEM bundle: client chain, private key, then CA certificates
        input: PathBuf,
        /// Sealed output file
        output: PathBuf,
        /// Passphrase
        #[arg(long, env = "FIELDVAULT_BUNDLE_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },
    #[command(flatten)]
    Vault(VaultCommand),
}

/// Commands that operate on the key vault.
#[derive(Subcommand)]
enum VaultCommand {
    /// Create the unique keyAltNames index in the key vault
    EnsureIndex,
    /// Look up a data key by alt-name
    FindKey {
        /// Alt-name (defaults to key_alt_name from the config)
        alt_name: Option<String>,
        /// Also unwrap the key material through its provider
        #[arg(long)]
        verify: bool,
    },
    /// Create a data key; fails if the alt-name is taken
    CreateKey {
        /// Alt-name (defaults to key_alt_name from the config)
        alt_name: Option<String>,
    },
    /// Return the data key for an alt-name, creating it if absent
    FindOrCreateKey {
        /// Alt-name (defaults to key_alt_name from the config)
        alt_name: Option<String>,
    },
    /// Print the patient collection encryption schema
    Schema {
        /// Base64 key id (defaults to the key holding key_alt_name)
        #[arg(long)]
        key_id: Option<String>,
        /// Also print a sample patient document
        #[arg(long)]
        sample: bool,
    },
}

// ============================================================================
// Key Vault Access
// ============================================================================

struct Vault {
    config: Config,
    namespace: Namespace,
    service: DataEncryptionKeyService,
    ctx: OperationContext,
}

impl Vault {
    async fn open(config_path: &Path) -> Result<Self> {
        let config = Config::load(config_path)?;
        let namespace = config.vault_namespace()?;
        let ctx = config.operation_context();

        let store = SqliteKeyVault::open(&config.data_dir, VAULT_DB_NAME)
            .await
            .context("Failed to open key vault")?;

        Ok(Self {
            namespace,
            ctx,
            service: DataEncryptionKeyService::new(Arc::new(store)),
            config,
        })
    }

    fn alt_name(&self, given: Option<String>) -> String {
        given.unwrap_or_else(|| self.config.key_alt_name.clone())
    }

    fn provider(&self) -> Result<KmsProviderConfig> {
        self.config.selected_provider(|var| std::env::var(var).ok())
    }
}

fn print_key(key: &DataEncryptionKey) {
    let alt_names: Vec<&str> = key.alt_names.iter().map(String::as_str).collect();
    println!("  Key ID:     {}", key.id);
    println!("  Alt names:  {}", alt_names.join(", "));
    println!("  Provider:   {}", key.provider_name);
    println!("  Created at: {}", key.created_at);
}

// ============================================================================
// Command Handlers
// ============================================================================

fn cmd_generate_master_key(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists; use --force to overwrite", output.display());
    }

    write_local_master_key(output, &LocalMasterKey::generate())
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Wrote {MASTER_KEY_SIZE}-byte master key to {}", output.display());
    println!("Keep this file secret; every data key wrapped with it depends on it.");
    Ok(())
}

async fn cmd_ensure_index(vault: &Vault) -> Result<()> {
    let outcome = vault
        .service
        .index_manager()
        .ensure_index(&vault.namespace, &vault.ctx)
        .await?;

    match outcome {
        IndexOutcome::Created => println!("Created keyAltNames index on {}", vault.namespace),
        IndexOutcome::AlreadyPresent => {
            println!("keyAltNames index already present on {}", vault.namespace)
        }
    }
    Ok(())
}

async fn cmd_find_key(vault: &Vault, alt_name: &str, verify: bool) -> Result<()> {
    let Some(key) = vault
        .service
        .find_by_alt_name(&vault.namespace, alt_name, &vault.ctx)
        .await?
    else {
        println!("No data key with alt-name '{alt_name}'");
        return Ok(());
    };

    println!("Data key '{alt_name}':");
    print_key(&key);

    if verify {
        let registry = vault.config.registry(|var| std::env::var(var).ok())?;
        match vault
            .service
            .unwrap_key_material(&vault.namespace, &key, &registry, &vault.ctx)
            .await?
        {
            Some(material) => println!("  Verified:   {} bytes of key material", material.len()),
            None => println!("  Verified:   key disappeared from the vault"),
        }
    }
    Ok(())
}

async fn cmd_create_key(vault: &Vault, alt_name: &str) -> Result<()> {
    let provider = vault.provider()?;
    vault
        .service
        .index_manager()
        .ensure_index(&vault.namespace, &vault.ctx)
        .await?;

    let key = match vault
        .service
        .create_key(
            &vault.namespace,
            &vault.config.provider,
            &provider,
            alt_name,
            &vault.ctx,
        )
        .await
    {
        Ok(key) => key,
        Err(KeyError::UniquenessConflict { .. }) => {
            bail!("A data key with alt-name '{alt_name}' already exists")
        }
        Err(e) => return Err(e.into()),
    };

    println!("Created data key:");
    print_key(&key);
    Ok(())
}

async fn cmd_find_or_create_key(vault: &Vault, alt_name: &str) -> Result<()> {
    let provider = vault.provider()?;
    let key = vault
        .service
        .find_or_create(
            &vault.namespace,
            &vault.config.provider,
            &provider,
            alt_name,
            &vault.ctx,
        )
        .await?;

    println!("Data key '{alt_name}':");
    print_key(&key);
    Ok(())
}

async fn cmd_schema(vault: &Vault, key_id: Option<&str>, sample: bool) -> Result<()> {
    let key_id = match key_id {
        Some(encoded) => KeyId::from_base64(encoded).context("Invalid --key-id")?,
        None => {
            let alt_name = &vault.config.key_alt_name;
            vault
                .service
                .find_by_alt_name(&vault.namespace, alt_name, &vault.ctx)
                .await?
                .with_context(|| {
                    format!("No data key with alt-name '{alt_name}'; run find-or-create-key first")
                })?
                .id
        }
    };

    let namespace = Namespace::parse(fixtures::PATIENTS_NAMESPACE)?;
    let schema =
        SchemaBuilder::new(namespace).build(key_id.as_bytes(), &fixtures::patient_rules())?;

    println!("{}", schema.to_json_pretty());
    if sample {
        println!("{}", serde_json::to_string_pretty(&fixtures::sample_patient())?);
    }
    Ok(())
}

fn cmd_seal_bundle(input: &Path, output: &Path, passphrase: &str) -> Result<()> {
    let pem = std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;

    let bundle = TrustBundle::from_pem(&pem).context("Input is not a usable trust bundle")?;
    let sealed = seal_trust_bundle(&pem, passphrase)?;
    std::fs::write(output, sealed)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Sealed bundle ({} chain certificate(s), {} CA certificate(s)) to {}",
        bundle.chain_len(),
        bundle.ca_certificates(),
        output.display()
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateMasterKey { output, force } => cmd_generate_master_key(&output, force),
        Commands::SealBundle {
            input,
            output,
            passphrase,
        } => cmd_seal_bundle(&input, &output, &passphrase),
        Commands::Vault(command) => run_vault_command(&cli.config, command).await,
    }
}

async fn run_vault_command(config_path: &Path, command: VaultCommand) -> Result<()> {
    let vault = Vault::open(config_path).await?;
    tracing::debug!(
        namespace = %vault.namespace,
        provider = %vault.config.provider,
        "Key vault opened"
    );

    match command {
        VaultCommand::EnsureIndex => cmd_ensure_index(&vault).await,
        VaultCommand::FindKey { alt_name, verify } => {
            let alt_name = vault.alt_name(alt_name);
            cmd_find_key(&vault, &alt_name, verify).await
        }
        VaultCommand::CreateKey { alt_name } => {
            let alt_name = vault.alt_name(alt_name);
            cmd_create_key(&vault, &alt_name).await
        }
        VaultCommand::FindOrCreateKey { alt_name } => {
            let alt_name = vault.alt_name(alt_name);
            cmd_find_or_create_key(&vault, &alt_name).await
        }
        VaultCommand::Schema { key_id, sample } => {
            cmd_schema(&vault, key_id.as_deref(), sample).await
        }
    }
}
