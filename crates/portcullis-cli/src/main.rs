//! Portcullis command-line harness.
//!
//! Validates a single bearer token against an OIDC issuer and prints the
//! verdict, the token's claims and, for valid tokens, the userinfo claims.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};

use portcullis::{
    Engine, EngineConfig, Error, StandardClaims, TokenType, UserInfo, ValidationResult,
};
use portcullis_telemetry::{LogFormat, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(
    name = "portcullis",
    about = "Portcullis OIDC token validation",
    version
)]
struct Cli {
    /// Log level filter (RUST_LOG takes precedence).
    #[arg(long, global = true, env = "PORTCULLIS_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Log output format (pretty or json). Logs go to stderr.
    #[arg(long, global = true, env = "PORTCULLIS_LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a bearer token against an issuer.
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Issuer identifier, e.g. https://idp.example.com.
    issuer: String,

    /// The token to validate.
    token: String,

    /// Disable TLS certificate and hostname verification.
    #[arg(long, env = "PORTCULLIS_INSECURE")]
    insecure: bool,

    /// Seconds to wait for discovery to complete.
    #[arg(long, env = "PORTCULLIS_WAIT_SECONDS", default_value_t = 10)]
    wait_seconds: u64,

    /// Engine configuration file (TOML).
    #[arg(long, env = "PORTCULLIS_CONFIG")]
    config: Option<PathBuf>,

    /// Required audience. Overrides the configuration file.
    #[arg(long, env = "PORTCULLIS_AUDIENCE")]
    audience: Option<String>,

    /// Output format.
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    format: String,
}

/// Everything printed about one validation.
#[derive(Debug, Serialize)]
struct Report {
    issuer: String,
    valid: bool,
    /// `ok`, or the error kind code.
    result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_type: Option<TokenType>,
    elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    standard_claims: Option<StandardClaims>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra_claims: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    userinfo: Option<UserInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    userinfo_error: Option<String>,
}

impl Report {
    fn new(issuer: &str, outcome: Result<ValidationResult, Error>, elapsed: Duration) -> Self {
        let mut report = Self {
            issuer: issuer.to_string(),
            valid: false,
            result: "ok",
            error: None,
            subject: None,
            token_type: None,
            elapsed_seconds: elapsed.as_secs_f64(),
            standard_claims: None,
            extra_claims: None,
            userinfo: None,
            userinfo_error: None,
        };

        match outcome {
            Ok(result) => {
                report.valid = true;
                report.subject = Some(result.subject_id);
                report.token_type = Some(result.token_type);
                report.standard_claims = Some(result.standard_claims);
                report.extra_claims = Some(result.extra_claims);
            }
            Err(e) => {
                report.result = e.kind().as_str();
                report.error = Some(e.to_string());
            }
        }
        report
    }

    fn print_text(&self) {
        let verdict = if self.valid { "valid" } else { "invalid" };
        println!("> Issuer        : {}", self.issuer);
        println!(
            "> Token subject : {} -> {}",
            self.subject.as_deref().unwrap_or(""),
            verdict
        );
        println!("> Time spent    : {:.6}s", self.elapsed_seconds);
        match &self.error {
            Some(error) => println!("> Result        : {} ({})", self.result, error),
            None => println!("> Result        : {}", self.result),
        }
        if let Some(token_type) = self.token_type {
            println!("> Token type    : {}", token_type);
        }
        if let Some(claims) = &self.standard_claims {
            println!("> Claims        : {}", to_json(claims));
        }
        if let Some(extra) = &self.extra_claims {
            println!("> Extra claims  : {}", to_json(extra));
        }
        if let Some(userinfo) = &self.userinfo {
            println!("> Userinfo      : {}", to_json(userinfo));
        }
        if let Some(error) = &self.userinfo_error {
            println!("> Userinfo      : failed ({})", error);
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unprintable: {}>", e))
}

fn init_telemetry(cli: &Cli) -> anyhow::Result<()> {
    let format = LogFormat::parse(&cli.log_format)
        .with_context(|| format!("unknown log format '{}'", cli.log_format))?;
    let config = TelemetryConfig::new()
        .with_service_name("portcullis-cli")
        .with_log_level(cli.log_level.clone())
        .with_log_format(format);
    portcullis_telemetry::init(&config).context("failed to initialize logging")?;
    Ok(())
}

fn build_engine(args: &ValidateArgs) -> anyhow::Result<Engine> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(audience) = &args.audience {
        config = config.with_audience(audience.clone());
    }

    let engine = Engine::new(config).context("failed to create engine")?;
    if args.insecure {
        engine
            .set_insecure(true)
            .context("failed to enable insecure mode")?;
    }
    Ok(engine)
}

/// Wait for readiness, validate, and fetch userinfo for a valid token.
fn check_token(engine: &Engine, args: &ValidateArgs) -> Result<Report, Error> {
    engine.wait_until_ready(Duration::from_secs(args.wait_seconds))?;

    let started = Instant::now();
    let outcome = engine.validate(&args.token);
    let mut report = Report::new(&args.issuer, outcome, started.elapsed());

    if report.valid {
        match engine.fetch_userinfo(&args.token) {
            Ok(userinfo) => report.userinfo = Some(userinfo),
            Err(e) => {
                tracing::debug!(error = %e, "userinfo lookup failed");
                report.userinfo_error = Some(e.to_string());
            }
        }
    }
    Ok(report)
}

fn run_validate(args: &ValidateArgs) -> ExitCode {
    let engine = match build_engine(args) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = engine.initialize(&args.issuer) {
        eprintln!("error: initialize failed: {} [{}]", e, e.kind());
        return ExitCode::from(1);
    }

    let checked = check_token(&engine, args);

    // Always release the issuer, whatever happened above.
    if let Err(e) = engine.uninitialize() {
        eprintln!("error: failed to uninitialize: {}", e);
    }

    let report = match checked {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: failed to get ready: {} [{}]", e, e.kind());
            return ExitCode::from(1);
        }
    };

    if args.format == "json" {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: failed to serialize report: {}", e);
                return ExitCode::from(1);
            }
        }
    } else {
        report.print_text();
    }

    if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_telemetry(&cli) {
        eprintln!("error: {:#}", e);
        return ExitCode::from(1);
    }

    match &cli.command {
        Commands::Validate(args) => run_validate(args),
    }
}
