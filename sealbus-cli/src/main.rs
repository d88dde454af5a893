mod client;

use anyhow::{bail, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use client::ResponderClient;
use sealbus::bus;
use sealbus::secrets::{files, provider, HandshakeActor, SecureChannel, TrustStore};
use sealbus::Request;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sealbus-cli")]
#[command(about = "Key material tools and test initiator for sealbus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate Diffie-Hellman parameters over a safe prime
    DhParams {
        /// Prime size in bits
        #[arg(long, default_value_t = 1024)]
        bits: u64,
        #[arg(long, default_value = "group.dh")]
        out: PathBuf,
    },
    /// Generate a key pair and write <prefix>.pv and <prefix>.x
    KeyPair {
        /// DH parameters file
        #[arg(long)]
        params: PathBuf,
        #[arg(long)]
        prefix: PathBuf,
    },
    /// Generate a random channel key for `trust.preshared` and `ping --key`
    SharedKey {
        #[arg(long, default_value = "channel.key")]
        out: PathBuf,
    },
    /// Print the fingerprint of a public value file
    Fingerprint {
        #[arg(long)]
        public_value: PathBuf,
    },
    /// Handshake with a responder, send a text message and check the echo
    Ping {
        #[arg(long, default_value = "http://localhost:7878")]
        url: String,
        /// Source id used on the envelopes
        #[arg(long, default_value = bus::GUEST_ID)]
        id: String,
        /// Trusted public value of the responder
        #[arg(long, required_unless_present = "key")]
        trusted: Option<PathBuf>,
        /// Pre-shared channel key; skips the handshake
        #[arg(long, conflicts_with = "trusted")]
        key: Option<PathBuf>,
        #[arg(long, default_value = "ping")]
        message: String,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sealbus_cli=info,sealbus=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::DhParams { bits, out } => {
            info!("Generating {}-bit DH parameters, this can take a while...", bits);
            let params = tokio::task::spawn_blocking(move || provider::generate_dh_parameters(bits))
                .await??;
            files::write_dh_parameters(&params, &out)?;
            println!("Wrote {}-bit parameters to {}", params.bits(), out.display());
        }
        Commands::KeyPair { params, prefix } => {
            let params = files::read_dh_parameters(&params)
                .with_context(|| format!("failed to read {}", params.display()))?;
            let pair = files::create_key_pair_files(&params, &prefix)?;
            let (pv, x) = files::key_pair_paths(&prefix);
            let encoded = pair.public.encode()?;
            println!("Public value:  {}", pv.display());
            println!("Private value: {} (responder only)", x.display());
            println!("Fingerprint:   {}", bus::fingerprint(&encoded));
        }
        Commands::SharedKey { out } => {
            let key = provider::generate_symmetric_key()?;
            files::write_symmetric_key(&key, &out)?;
            println!("Wrote channel key to {}", out.display());
        }
        Commands::Fingerprint { public_value } => {
            let public = files::read_public_value(&public_value)?;
            let encoded = public.encode()?;
            println!("{}", bus::fingerprint(&encoded));
            println!("{}", BASE64.encode(&encoded));
        }
        Commands::Ping {
            url,
            id,
            trusted,
            key,
            message,
            timeout,
        } => {
            let client = ResponderClient::new(&url, Duration::from_secs(timeout))?;

            let channel = match (key, trusted) {
                (Some(key), _) => {
                    info!("Using pre-shared key {}", key.display());
                    SecureChannel::new(id, files::read_symmetric_key(&key)?)
                }
                (None, Some(trusted)) => {
                    let trust = Arc::new(TrustStore::initiator(files::read_public_value(&trusted)?)?);
                    let advertised = client.public_key().await?;
                    if advertised.fingerprint != bus::fingerprint(trust.encoded_public_value()) {
                        warn!(
                            "Responder advertises {}, which is not the trusted value; the handshake will be refused",
                            advertised.fingerprint
                        );
                    }

                    let mut actor = HandshakeActor::initiator(id, trust);
                    client.handshake(&mut actor).await?;
                    actor.into_channel()?
                }
                (None, None) => bail!("either --trusted or --key is required"),
            };

            let request = Request::from_message(&message)?;
            let echo = client
                .send(&channel, &request, false)
                .await?
                .context("responder sent no echo")?;
            if echo != request {
                bail!("echo does not match the request");
            }
            println!("{}", echo.decode::<String>()?);

            let status = client.status().await?;
            info!("Responder has {} open channel(s)", status.channels);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_takes_either_trusted_value_or_key() {
        let cli = Cli::try_parse_from(["sealbus-cli", "ping", "--key", "carol.key", "--id", "carol"]).unwrap();
        match cli.command {
            Commands::Ping { key, trusted, .. } => {
                assert_eq!(key, Some(PathBuf::from("carol.key")));
                assert!(trusted.is_none());
            }
            _ => panic!("expected ping"),
        }

        assert!(Cli::try_parse_from(["sealbus-cli", "ping"]).is_err());
        assert!(Cli::try_parse_from([
            "sealbus-cli", "ping", "--key", "carol.key", "--trusted", "bob.pv"
        ])
        .is_err());
    }
}
