use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use sealkey_core::config::{self, Config};
use sealkey_vault::PassphraseVault;

#[tokio::main]
async fn main() -> Result<()> {
    // Reset SIGPIPE to default so piping output to `head` etc. exits cleanly
    // instead of panicking with "broken pipe".
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str).unwrap_or("help");

    match cmd {
        "check" => cmd_check().await,
        "generate" | "gen" => cmd_generate(&args[1..]).await,
        "list" | "ls" => cmd_list().await,
        "delete" | "rm" => cmd_delete(&args[1..]).await,
        "config" => cmd_config(),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            print_help();
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        "\
sealkey - SSH keys whose passphrase lives in the OS credential store

USAGE:
    sealkey <command> [args...]

COMMANDS:
    check                               Report whether this machine can hold vault keys
    generate <key-id> <label> [--output <path>]
                                        Create an ED25519 key (alias: gen)
    list                                List key ids with a stored passphrase (alias: ls)
    delete <key-id>                     Remove the stored passphrase (alias: rm)
    config                              Print the effective configuration
    help                                Show this help

ENVIRONMENT:
    SEALKEY_CONFIG                      Config file path
                                        (default: $XDG_CONFIG_HOME/sealkey/config.toml)
    RUST_LOG                            Log filter (default: warn)

NOTES:
    'generate' writes the encrypted private key to <path> (default ./<key-id>)
    and the public key to <path>.pub.  Deleting the passphrase makes the
    private key permanently unusable."
    );
}

fn config_path() -> Result<PathBuf> {
    match std::env::var_os("SEALKEY_CONFIG") {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(config::default_config_path()?),
    }
}

fn load_config() -> Result<Config> {
    let path = config_path()?;
    tracing::debug!(path = %path.display(), "loading config");
    config::load(&path).with_context(|| format!("failed to load {}", path.display()))
}

fn open_vault() -> Result<PassphraseVault> {
    Ok(PassphraseVault::from_config(&load_config()?))
}

async fn cmd_check() -> Result<()> {
    let vault = open_vault()?;
    let report = vault.check_support().await;

    println!("namespace: {}", vault.namespace());
    println!("policy:    {:?}", vault.policy());
    if report.supported {
        println!("status:    supported");
        return Ok(());
    }
    println!("status:    unsupported");
    for reason in &report.reasons {
        println!("  - {reason}");
    }
    std::process::exit(2);
}

async fn cmd_generate(args: &[String]) -> Result<()> {
    let mut positional = Vec::new();
    let mut output: Option<PathBuf> = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--output" || arg == "-o" {
            let path = iter.next().context("--output requires a path")?;
            output = Some(PathBuf::from(path));
        } else if let Some(path) = arg.strip_prefix("--output=") {
            output = Some(PathBuf::from(path));
        } else {
            positional.push(arg.as_str());
        }
    }

    let &[key_id, label] = positional.as_slice() else {
        bail!("usage: sealkey generate <key-id> <label> [--output <path>]");
    };
    let output = output.unwrap_or_else(|| PathBuf::from(key_id));
    let public_path = PathBuf::from(format!("{}.pub", output.display()));
    if output.exists() || public_path.exists() {
        bail!("{} already exists", output.display());
    }

    let vault = open_vault()?;
    let key = vault
        .generate_identity(key_id, label)
        .await
        .with_context(|| format!("failed to generate key '{key_id}'"))?;

    write_private(&output, key.private_key.as_bytes())?;
    std::fs::write(&public_path, format!("{}\n", key.public_key))
        .with_context(|| format!("failed to write {}", public_path.display()))?;

    println!("private key: {}", output.display());
    println!("public key:  {}", public_path.display());
    println!("{}", key.public_key);
    Ok(())
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

async fn cmd_list() -> Result<()> {
    let vault = open_vault()?;
    let ids = vault.list_identities().await.context("failed to list keys")?;
    if ids.is_empty() {
        eprintln!("no keys in namespace '{}'", vault.namespace());
    }
    for id in ids {
        println!("{id}");
    }
    Ok(())
}

async fn cmd_delete(args: &[String]) -> Result<()> {
    let Some(key_id) = args.first() else {
        bail!("usage: sealkey delete <key-id>");
    };
    let vault = open_vault()?;
    if vault.delete_identity(key_id).await? {
        println!("deleted '{key_id}'");
        Ok(())
    } else {
        bail!("no stored passphrase for '{key_id}'");
    }
}

fn cmd_config() -> Result<()> {
    let path = config_path()?;
    let config = load_config()?;
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&config).context("failed to render config")?);
    Ok(())
}
