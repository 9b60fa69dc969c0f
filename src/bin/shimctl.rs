//! shimctl - send signed commands to a proxyshim endpoint
//!
//! Usage:
//!   shimctl [--url <url>] [--secret <secret>] start <password> <port>
//!   shimctl [--url <url>] [--secret <secret>] stop
//!
//! The secret defaults to $PROXYSHIM_SECRET and the URL to $PROXYSHIM_URL
//! (falling back to http://127.0.0.1:9000).

use anyhow::{bail, Context, Result};
use chrono::Utc;
use proxyshim::auth;
use proxyshim::gateway::{Action, RequestEnvelope, RequestHeader, ResponseEnvelope, StartPayload};
use std::env;
use std::process::ExitCode;

const DEFAULT_URL: &str = "http://127.0.0.1:9000";

#[derive(Debug)]
struct Options {
    url: String,
    secret: String,
    command: Command,
}

#[derive(Debug, PartialEq)]
enum Command {
    Start { password: String, port: u16 },
    Stop,
    Help,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut url = env::var("PROXYSHIM_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let mut secret = env::var("PROXYSHIM_SECRET").ok();
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--url" => url = iter.next().context("--url requires a value")?.clone(),
            "--secret" => secret = Some(iter.next().context("--secret requires a value")?.clone()),
            "-h" | "--help" => positional = vec!["help".to_string()],
            _ => positional.push(arg.clone()),
        }
    }

    let command = match positional.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["start", password, port] => Command::Start {
            password: password.to_string(),
            port: port.parse().with_context(|| format!("invalid port: {}", port))?,
        },
        ["stop"] => Command::Stop,
        [] | ["help"] => Command::Help,
        other => bail!("unknown command: {}", other.join(" ")),
    };

    let secret = match (&command, secret) {
        (Command::Help, s) => s.unwrap_or_default(),
        (_, Some(s)) => s,
        (_, None) => bail!("no secret given; pass --secret or set PROXYSHIM_SECRET"),
    };

    Ok(Options { url, secret, command })
}

fn build_request(command: &Command, secret: &str, timestamp: i64) -> Result<Option<RequestEnvelope>> {
    let (action, payload) = match command {
        Command::Start { password, port } => {
            let payload = StartPayload {
                pwd: password.clone(),
                port: *port,
            };
            (Action::Start, Some(serde_json::to_value(payload)?))
        }
        Command::Stop => (Action::Stop, None),
        Command::Help => return Ok(None),
    };

    Ok(Some(RequestEnvelope {
        header: RequestHeader {
            action: action.as_str().to_string(),
            timestamp,
            token: auth::sign(secret, timestamp),
        },
        payload,
    }))
}

fn print_usage() {
    println!("Usage:");
    println!("  shimctl [--url <url>] [--secret <secret>] start <password> <port>");
    println!("  shimctl [--url <url>] [--secret <secret>] stop");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> Result<()> {
    let options = parse_args(args)?;
    let Some(request) = build_request(&options.command, &options.secret, Utc::now().timestamp())?
    else {
        print_usage();
        return Ok(());
    };

    let response: ResponseEnvelope = reqwest::Client::new()
        .post(&options.url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", options.url))?
        .json()
        .await
        .context("failed to decode response")?;

    if let Some(error) = response.header.error {
        bail!("{}", error);
    }

    match response.payload.ip {
        Some(ip) => println!("{}", ip),
        None => println!("ok"),
    }
    Ok(())
}
