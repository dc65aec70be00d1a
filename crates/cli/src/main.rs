mod keyfile;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use vpr_certificates::{Certificate, IdentityRequest};
use vpr_envelope::config::{
    compression_floor_from_env_value, default_expiry_from_env_value, flag_from_env_value,
};
use vpr_envelope::constants::{
    ENV_ALLOW_PLAINTEXT, ENV_COMPRESSION_FLOOR, ENV_DEFAULT_EXPIRY_SECS, ENV_EDDSA,
    ENV_SNIFF_COMPRESSION,
};
use vpr_envelope::{
    Access, Attachment, Composition, Compression, Encoding, Envelope, EnvelopeConfig,
    EnvelopeService, Expiration, KeyMaterial, OpenRequest, Role, RolePolicy, SealRequest,
    TransportMessage,
};

#[derive(Parser)]
#[command(name = "vpr")]
#[command(about = "VPR secure health-document envelopes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a key
    Keygen {
        /// Algorithm (ES256, ES384, ES512, RS256, EdDSA, RSA-OAEP-256, ECDH-ES+A256GCMKW, ...)
        #[arg(long, default_value = "ES256")]
        alg: String,
        /// Private key file to write
        #[arg(long)]
        out: PathBuf,
        /// Public key file to write
        #[arg(long)]
        public_out: Option<PathBuf>,
    },
    /// Issue an identity certificate and a signing key bound to it
    Certify {
        /// Holder name (certificate Common Name)
        name: String,
        /// Holder DID
        did: String,
        #[arg(long, default_value_t = 365)]
        days: u32,
        /// Private key file to write (carries the certificate as x5c)
        #[arg(long)]
        out: PathBuf,
        /// Certificate PEM file to write
        #[arg(long)]
        cert_out: Option<PathBuf>,
    },
    /// Seal a FHIR bundle into an envelope
    Seal {
        #[command(flatten)]
        seal: SealArgs,
        /// FHIR bundle JSON (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Acting role
        #[arg(long, default_value = "clinician")]
        role: String,
    },
    /// Open an envelope and print its resources
    Open {
        #[command(flatten)]
        open: OpenArgs,
        /// Envelope file (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Acting role
        #[arg(long, default_value = "clinician")]
        role: String,
        /// Output specification (fhir, fhir-bundle, fhir-jsonapi, schemaorg-jsonapi, shc, dgc)
        #[arg(long, default_value = "fhir")]
        specification: String,
    },
    /// Attach an envelope to a transport message
    Wrap {
        #[command(flatten)]
        seal: SealArgs,
        /// Envelope file (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Sender DID
        #[arg(long)]
        from: Option<String>,
        /// Recipient DIDs
        #[arg(long)]
        to: Vec<String>,
        /// Message type URI
        #[arg(long, default_value = "https://vpr.example/envelope/1.0/share")]
        message_type: String,
    },
    /// Extract an envelope from a transport message
    Unwrap {
        #[command(flatten)]
        open: OpenArgs,
        /// Transport message, plain JSON or packed (stdin when omitted)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Attachment id (first attachment when omitted)
        #[arg(long)]
        attachment: Option<String>,
    },
}

#[derive(clap::Args)]
struct SealArgs {
    /// compact, general or tagged
    #[arg(long, default_value = "compact")]
    encoding: String,
    /// Signing key file
    #[arg(long)]
    sign: Option<PathBuf>,
    /// Recipient public key files
    #[arg(long)]
    recipient: Vec<PathBuf>,
    /// Compress the payload (DEFLATE)
    #[arg(long)]
    compress: bool,
    /// Lifetime in seconds
    #[arg(long)]
    expires_in: Option<i64>,
    /// Output file (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(clap::Args)]
struct OpenArgs {
    /// Trusted signer public key files
    #[arg(long)]
    trust: Vec<PathBuf>,
    /// Own private key file, for encrypted envelopes
    #[arg(long)]
    key: Option<PathBuf>,
    /// Reject envelopes without a trusted signature
    #[arg(long)]
    require_signature: bool,
    /// Output file (stdout when omitted)
    #[arg(long)]
    out: Option<PathBuf>,
}

/// Keys loaded for one seal.
struct SealKeys {
    signer: Option<KeyMaterial>,
    recipients: Vec<KeyMaterial>,
}

impl SealArgs {
    fn keys(&self) -> anyhow::Result<SealKeys> {
        Ok(SealKeys {
            signer: self.sign.as_deref().map(keyfile::read).transpose()?,
            recipients: keyfile::read_all(&self.recipient)?,
        })
    }

    fn request<'a>(&self, keys: &'a SealKeys) -> anyhow::Result<SealRequest<'a>> {
        let mut request =
            SealRequest::new(Encoding::parse(&self.encoding)?).encrypted_for(&keys.recipients);
        if let Some(signer) = &keys.signer {
            let alg = signer
                .algorithm()
                .context("signing key has no alg")?
                .to_string();
            request = request.signed_by(signer, alg);
        }
        if self.compress {
            request = request.compressed(Compression::Deflate);
        }
        if let Some(seconds) = self.expires_in {
            request = request.expires(Expiration::In(chrono::Duration::seconds(seconds)));
        }
        Ok(request)
    }
}

/// Keys loaded for one open.
struct OpenKeys {
    trusted: Vec<KeyMaterial>,
    own: Option<KeyMaterial>,
}

impl OpenArgs {
    fn keys(&self) -> anyhow::Result<OpenKeys> {
        Ok(OpenKeys {
            trusted: keyfile::read_all(&self.trust)?,
            own: self.key.as_deref().map(keyfile::read).transpose()?,
        })
    }

    fn request<'a>(&self, keys: &'a OpenKeys) -> OpenRequest<'a> {
        let mut request = keys
            .trusted
            .iter()
            .fold(OpenRequest::new(), |request, key| request.trust(key))
            .require_signature(self.require_signature);
        if let Some(own) = &keys.own {
            request = request.recipient(own);
        }
        request
    }
}

/// Resolve envelope configuration from the environment, once.
fn config_from_env() -> anyhow::Result<EnvelopeConfig> {
    let var = |name: &str| std::env::var(name).ok();
    let config = EnvelopeConfig::default()
        .with_compression_floor(compression_floor_from_env_value(var(ENV_COMPRESSION_FLOOR))?)
        .with_default_expiry(default_expiry_from_env_value(var(ENV_DEFAULT_EXPIRY_SECS))?)?
        .with_plaintext(flag_from_env_value(var(ENV_ALLOW_PLAINTEXT), false)?)
        .with_edwards_curve_signatures(flag_from_env_value(var(ENV_EDDSA), true)?)
        .with_sniff_compression(flag_from_env_value(var(ENV_SNIFF_COMPRESSION), false)?);
    Ok(config)
}

fn read_input(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes)?;
            Ok(bytes)
        }
    }
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("vpr=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let service = EnvelopeService::new(config_from_env()?);

    match cli.command {
        Some(Commands::Keygen {
            alg,
            out,
            public_out,
        }) => {
            let key = KeyMaterial::generate(&alg)?;
            keyfile::write(&out, &key, true)?;
            if let Some(public_out) = public_out {
                keyfile::write(&public_out, &key, false)?;
            }
            tracing::info!(kid = %key.key_id(), alg = %alg, "generated key");
            println!("{}", key.key_id());
        }
        Some(Commands::Certify {
            name,
            did,
            days,
            out,
            cert_out,
        }) => {
            let issued =
                Certificate::issue(&IdentityRequest::new(name, did).with_validity_days(days))?;
            let key = KeyMaterial::from_pkcs8_pem(&issued.private_key_pem, "ES256")?
                .with_certificate(issued.certificate_pem.as_bytes())?;
            keyfile::write(&out, &key, true)?;
            if let Some(cert_out) = cert_out {
                std::fs::write(&cert_out, &issued.certificate_pem)
                    .with_context(|| format!("failed to write {}", cert_out.display()))?;
            }
            tracing::info!(kid = %key.key_id(), "issued certificate");
            println!("{}", key.key_id());
        }
        Some(Commands::Seal { seal, input, role }) => {
            let access = Access::new(&RolePolicy, role.parse::<Role>()?);
            let resources = fhir::Bundle::parse(&read_input(input.as_deref())?)?;
            let mut composition = Composition::new();
            for resource in resources {
                composition.add_resource(access, resource)?;
            }

            let keys = seal.keys()?;
            let envelope = service.seal(access, &composition, &seal.request(&keys)?)?;
            write_output(seal.out.as_deref(), &envelope.to_bytes()?)?;
        }
        Some(Commands::Open {
            open,
            input,
            role,
            specification,
        }) => {
            let access = Access::new(&RolePolicy, role.parse::<Role>()?);
            let specification = fhir::Specification::parse(&specification)?;
            let envelope = Envelope::from_bytes(&read_input(input.as_deref())?)?;

            let keys = open.keys()?;
            let opened = service.open_detailed(access, &envelope, &open.request(&keys))?;
            if let Some(kid) = &opened.signed_by {
                tracing::info!(kid = %kid, "verified signature");
            }
            let rendered = opened.composition.to_specification(access, specification)?;
            let json = serde_json::to_vec_pretty(&rendered)?;
            write_output(open.out.as_deref(), &json)?;
        }
        Some(Commands::Wrap {
            seal,
            input,
            from,
            to,
            message_type,
        }) => {
            let envelope = Envelope::from_bytes(&read_input(input.as_deref())?)?;
            let mut message = TransportMessage::new(message_type, serde_json::json!({}))
                .with_attachment(Attachment::from_envelope(&envelope)?);
            if let Some(from) = from {
                message = message.from_did(from)?;
            }
            for did in to {
                message = message.to_did(did)?;
            }

            let keys = seal.keys()?;
            let bytes = if keys.signer.is_none() && keys.recipients.is_empty() {
                message.to_vec()?
            } else {
                service.pack(&message, &seal.request(&keys)?)?.to_bytes()?
            };
            write_output(seal.out.as_deref(), &bytes)?;
        }
        Some(Commands::Unwrap {
            open,
            input,
            attachment,
        }) => {
            let bytes = read_input(input.as_deref())?;
            let message = match TransportMessage::from_slice(&bytes) {
                Ok(message) => message,
                Err(_) => {
                    let keys = open.keys()?;
                    service.unpack(&Envelope::from_bytes(&bytes)?, &open.request(&keys))?
                }
            };

            let selected = match &attachment {
                Some(id) => message.attachment(id),
                None => message.attachments.first(),
            }
            .context("transport message has no matching attachment")?;
            write_output(open.out.as_deref(), &selected.envelope()?.to_bytes()?)?;
        }
        None => {
            println!("Use 'vpr --help' for commands");
        }
    }

    Ok(())
}
