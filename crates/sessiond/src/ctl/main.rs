//! sessionctl - command line client for a sessiond server.

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde_json::json;

use sessiond::api::{SessionResponse, StatusResponse};

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let client = SessionClient::new(&cli.server, cli.token)?;

    match cli.command {
        Command::Start => {
            let session: SessionResponse = client.post("/api/start", None).await?;
            print_session(&session, cli.json)
        }
        Command::Restart { uuid } => {
            let session: SessionResponse = client
                .post("/api/restart", Some(uuid.as_str()))
                .await?;
            print_session(&session, cli.json)
        }
        Command::Terminate { uuid } => {
            let status: StatusResponse = client
                .post("/api/terminate", Some(uuid.as_str()))
                .await?;
            print_status(&status, cli.json)
        }
        Command::Delete { uuid } => {
            let status: StatusResponse = client
                .post("/api/delete", Some(uuid.as_str()))
                .await?;
            print_status(&status, cli.json)
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "sessionctl",
    author,
    version,
    about = "Control CLI for sessiond - start, restart, terminate and delete sessions."
)]
struct Cli {
    /// sessiond server URL
    #[arg(long, short = 's', default_value = DEFAULT_SERVER_URL, env = "SESSIOND_SERVER_URL")]
    server: String,

    /// Bearer token (see `sessiond token`)
    #[arg(long, short = 't', env = "SESSIOND_AUTH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new session
    Start,
    /// Restart a session's container
    Restart {
        /// Session UUID
        uuid: String,
    },
    /// Stop a session's container and unregister it
    Terminate {
        /// Session UUID
        uuid: String,
    },
    /// Remove a stopped session's container and volume
    Delete {
        /// Session UUID
        uuid: String,
    },
}

struct SessionClient {
    base_url: String,
    client: reqwest::Client,
    auth_token: String,
}

impl SessionClient {
    fn new(base_url: &str, auth_token: Option<String>) -> Result<Self> {
        let auth_token = auth_token
            .ok_or_else(|| anyhow!("no token given; pass --token or set SESSIOND_AUTH_TOKEN"))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            auth_token,
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, uuid: Option<&str>) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).bearer_auth(&self.auth_token);
        if let Some(uuid) = uuid {
            request = request.json(&json!({ "uuid": uuid }));
        }

        let response = request
            .send()
            .await
            .context("sending request to server")?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.context("parsing server response");
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"].as_str().map(str::to_string))
            .unwrap_or(body);
        Err(anyhow!("server returned {}: {}", status, message))
    }
}

fn print_session(session: &SessionResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(session)?);
    } else {
        println!("Session:   {}", session.uuid);
        println!("Container: {}", session.container_id);
        println!("Stdio:     {}", session.stdio_url);
    }
    Ok(())
}

fn print_status(status: &StatusResponse, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
    } else {
        println!("{}", status.message);
    }
    Ok(())
}
