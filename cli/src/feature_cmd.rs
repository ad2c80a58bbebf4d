//! Feature board CLI subcommands.
//!
//! Thin IPC client that connects to `featureboard-service` via Unix socket
//! and dispatches JSON-RPC-lite requests.
//!
//! ## Commands
//!
//! - `featureboard feature create --title <T> --description <D>`
//! - `featureboard feature show <ID>`
//! - `featureboard feature update <ID> [--title ..] [--progress ..]`
//! - `featureboard feature move <ID> <STAGE>`
//! - `featureboard feature vote <ID> up|down`
//! - `featureboard feature unvote <ID>`
//! - `featureboard feature publish <ID>`
//! - `featureboard feature list <STAGE>`
//! - `featureboard feature my-vote <ID>`
//! - `featureboard feature audit <ID>`
//! - `featureboard service status`
//! - `featureboard service doctor`

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};

/// Feature board client.
#[derive(Debug, Parser)]
#[command(name = "featureboard", version, about = "Feature request board client")]
pub struct FeatureboardCli {
    #[command(flatten)]
    pub client: ClientArgs,

    #[command(subcommand)]
    pub command: TopSubcommand,
}

#[derive(Debug, Args)]
pub struct ClientArgs {
    /// Override socket path.
    #[arg(long = "socket", global = true, env = "FEATUREBOARD_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Acting user id (falls back to $USER).
    #[arg(long = "user", short = 'u', global = true, env = "FEATUREBOARD_USER")]
    pub user: Option<String>,

    /// Output as JSON.
    #[arg(long = "json", short = 'j', global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum TopSubcommand {
    /// Feature lifecycle and voting.
    Feature(FeatureCli),
    /// Service management (status, doctor).
    Service(ServiceCli),
}

// ─────────────────────────────────────────────────────────────────────────────
// Feature subcommands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
pub struct FeatureCli {
    #[command(subcommand)]
    pub command: FeatureSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum FeatureSubcommand {
    /// Submit a new feature request.
    Create(CreateArgs),
    /// Show one feature.
    Show(IdArgs),
    /// Edit title, description, progress or planning metadata.
    Update(UpdateArgs),
    /// Move a feature to another stage.
    Move(MoveArgs),
    /// Cast or change your vote.
    Vote(VoteArgs),
    /// Withdraw your vote.
    Unvote(IdArgs),
    /// Publish an upcoming feature.
    Publish(IdArgs),
    /// List the features in a stage, newest first.
    List(ListArgs),
    /// Show your current vote.
    MyVote(IdArgs),
    /// Recount votes and compare against the stored counters.
    Audit(IdArgs),
}

#[derive(Debug, Parser)]
pub struct IdArgs {
    /// Feature id.
    pub id: String,
}

#[derive(Debug, Parser)]
pub struct CreateArgs {
    #[arg(long = "title", short = 't')]
    pub title: String,

    #[arg(long = "description", short = 'd')]
    pub description: String,

    /// Initial stage (defaults to inbox).
    #[arg(long = "stage", short = 's')]
    pub stage: Option<String>,

    /// Sub-feature line; repeat for several.
    #[arg(long = "subfeature")]
    pub subfeatures: Vec<String>,

    /// Target quarter, e.g. "Q3 2026".
    #[arg(long = "quarter")]
    pub quarter: Option<String>,

    /// Expected ship date (YYYY-MM-DD).
    #[arg(long = "expected-date")]
    pub expected_date: Option<String>,
}

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// Feature id.
    pub id: String,

    #[arg(long = "title", short = 't')]
    pub title: Option<String>,

    #[arg(long = "description", short = 'd')]
    pub description: Option<String>,

    /// Progress percentage (upcoming features only).
    #[arg(long = "progress", short = 'p')]
    pub progress: Option<u8>,

    /// Replace the sub-feature list; repeat for several.
    #[arg(long = "subfeature", conflicts_with = "clear_subfeatures")]
    pub subfeatures: Vec<String>,

    #[arg(long = "clear-subfeatures")]
    pub clear_subfeatures: bool,

    #[arg(long = "quarter", conflicts_with = "clear_quarter")]
    pub quarter: Option<String>,

    #[arg(long = "clear-quarter")]
    pub clear_quarter: bool,

    #[arg(long = "expected-date", conflicts_with = "clear_expected_date")]
    pub expected_date: Option<String>,

    #[arg(long = "clear-expected-date")]
    pub clear_expected_date: bool,
}

#[derive(Debug, Parser)]
pub struct MoveArgs {
    /// Feature id.
    pub id: String,

    /// Target stage: inbox, suggested, maybe, collecting_votes, upcoming, published.
    pub stage: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

#[derive(Debug, Parser)]
pub struct VoteArgs {
    /// Feature id.
    pub id: String,

    #[arg(value_enum)]
    pub direction: Direction,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Stage to list.
    pub stage: String,

    /// Max results.
    #[arg(long = "limit")]
    pub limit: Option<u32>,

    /// Skip this many results.
    #[arg(long = "offset")]
    pub offset: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service subcommands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
pub struct ServiceCli {
    #[command(subcommand)]
    pub command: ServiceSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ServiceSubcommand {
    /// Show service status (uptime, connections, store).
    Status,
    /// Run health checks.
    Doctor,
}

// ─────────────────────────────────────────────────────────────────────────────
// Request construction
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the acting user from `--user`/`FEATUREBOARD_USER`, then `$USER`.
fn acting_user(user: Option<&str>) -> Result<String> {
    let resolved = user
        .map(str::to_string)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_default();
    if resolved.trim().is_empty() {
        bail!("No acting user: pass --user or set FEATUREBOARD_USER");
    }
    Ok(resolved)
}

impl FeatureSubcommand {
    /// Method name and params for this command.
    pub fn request(&self, user: Option<&str>) -> Result<(&'static str, Value)> {
        let request = match self {
            FeatureSubcommand::Create(args) => {
                let mut params = json!({
                    "title": args.title,
                    "description": args.description,
                    "user_id": acting_user(user)?,
                });
                if let Some(stage) = &args.stage {
                    params["stage"] = json!(stage);
                }
                if !args.subfeatures.is_empty() {
                    params["subfeatures"] = json!(args.subfeatures);
                }
                if let Some(quarter) = &args.quarter {
                    params["quarter"] = json!(quarter);
                }
                if let Some(date) = &args.expected_date {
                    params["expected_date"] = json!(date);
                }
                ("feature.create", params)
            }
            FeatureSubcommand::Show(args) => ("feature.get", json!({ "id": args.id })),
            FeatureSubcommand::Update(args) => ("feature.update", update_params(args, user)?),
            FeatureSubcommand::Move(args) => (
                "feature.move",
                json!({ "id": args.id, "stage": args.stage, "user_id": acting_user(user)? }),
            ),
            FeatureSubcommand::Vote(args) => (
                "feature.vote",
                json!({
                    "id": args.id,
                    "user_id": acting_user(user)?,
                    "direction": args.direction.as_str(),
                }),
            ),
            FeatureSubcommand::Unvote(args) => (
                "feature.unvote",
                json!({ "id": args.id, "user_id": acting_user(user)? }),
            ),
            FeatureSubcommand::Publish(args) => (
                "feature.publish",
                json!({ "id": args.id, "user_id": acting_user(user)? }),
            ),
            FeatureSubcommand::List(args) => {
                let mut params = json!({ "stage": args.stage });
                if let Some(limit) = args.limit {
                    params["limit"] = json!(limit);
                }
                if let Some(offset) = args.offset {
                    params["offset"] = json!(offset);
                }
                ("feature.list", params)
            }
            FeatureSubcommand::MyVote(args) => (
                "feature.my_vote",
                json!({ "id": args.id, "user_id": acting_user(user)? }),
            ),
            FeatureSubcommand::Audit(args) => ("feature.audit", json!({ "id": args.id })),
        };
        Ok(request)
    }
}

fn update_params(args: &UpdateArgs, user: Option<&str>) -> Result<Value> {
    let mut params = json!({ "id": args.id, "user_id": acting_user(user)? });
    if let Some(title) = &args.title {
        params["title"] = json!(title);
    }
    if let Some(description) = &args.description {
        params["description"] = json!(description);
    }
    if let Some(progress) = args.progress {
        params["progress"] = json!(progress);
    }
    if args.clear_subfeatures {
        params["subfeatures"] = json!([]);
    } else if !args.subfeatures.is_empty() {
        params["subfeatures"] = json!(args.subfeatures);
    }
    if args.clear_quarter {
        params["quarter"] = Value::Null;
    } else if let Some(quarter) = &args.quarter {
        params["quarter"] = json!(quarter);
    }
    if args.clear_expected_date {
        params["expected_date"] = Value::Null;
    } else if let Some(date) = &args.expected_date {
        params["expected_date"] = json!(date);
    }
    if params.as_object().map_or(0, serde_json::Map::len) == 2 {
        bail!("Nothing to update: pass at least one field");
    }
    Ok(params)
}

// ─────────────────────────────────────────────────────────────────────────────
// IPC Client
// ─────────────────────────────────────────────────────────────────────────────

/// One handshaken connection to the service.
pub struct ServiceClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: i64,
}

impl ServiceClient {
    /// Connect and perform the `hello` handshake.
    pub fn connect(socket_path: Option<&Path>) -> Result<Self> {
        let path = socket_path
            .map(Path::to_path_buf)
            .unwrap_or_else(featureboard_service::default_socket_path);

        let stream = UnixStream::connect(&path).with_context(|| {
            format!(
                "Cannot connect to featureboard service at {}\nHint: start it with: featureboard-service",
                path.display()
            )
        })?;
        let writer = stream.try_clone().context("Clone stream")?;
        let mut client = Self {
            writer,
            reader: BufReader::new(stream),
            next_id: 0,
        };

        client
            .call(
                "hello",
                json!({
                    "protocol_version": featureboard_service::PROTOCOL_VERSION,
                    "client_version": env!("CARGO_PKG_VERSION"),
                }),
            )
            .context("Handshake failed")?;
        Ok(client)
    }

    /// Send one request and return its `result`.
    pub fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let request = json!({ "id": self.next_id, "method": method, "params": params });
        self.next_id += 1;

        let mut bytes = serde_json::to_vec(&request).context("Serialize request")?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes).context("Write request")?;
        self.writer.flush().context("Flush request")?;

        let mut line = String::new();
        self.reader.read_line(&mut line).context("Read response")?;
        if line.is_empty() {
            bail!("Service closed the connection");
        }
        let response: Value = serde_json::from_str(&line).context("Parse response")?;

        if let Some(error) = response.get("error") {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            bail!("RPC error {code}: {message}");
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

impl FeatureboardCli {
    pub fn run(&self) -> Result<()> {
        let (method, params) = match &self.command {
            TopSubcommand::Feature(feature) => feature.command.request(self.client.user.as_deref())?,
            TopSubcommand::Service(svc) => match svc.command {
                ServiceSubcommand::Status => ("service.status", json!({})),
                ServiceSubcommand::Doctor => ("service.doctor", json!({})),
            },
        };

        let mut client = ServiceClient::connect(self.client.socket.as_deref())?;
        let result = client.call(method, params)?;

        if self.client.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).unwrap_or_else(|_| "{}".to_string())
            );
        } else {
            print!("{}", render(method, &result));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("?")
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn feature_line(feature: &Value) -> String {
    format!(
        "  {} [{}] {} (+{} / -{}, {}%)\n",
        str_field(feature, "id"),
        str_field(feature, "stage"),
        str_field(feature, "title"),
        u64_field(feature, "votes_up"),
        u64_field(feature, "votes_down"),
        u64_field(feature, "progress"),
    )
}

fn feature_detail(feature: &Value) -> String {
    let mut out = feature_line(feature);
    out.push_str(&format!("    {}\n", str_field(feature, "description")));
    if let Some(items) = feature.get("subfeatures").and_then(Value::as_array) {
        for item in items {
            out.push_str(&format!("    - {}\n", item.as_str().unwrap_or("?")));
        }
    }
    if let Some(quarter) = feature.get("quarter").and_then(Value::as_str) {
        out.push_str(&format!("    quarter: {quarter}\n"));
    }
    if let Some(date) = feature.get("expected_date").and_then(Value::as_str) {
        out.push_str(&format!("    expected: {date}\n"));
    }
    out.push_str(&format!(
        "    modified by {} at {} (v{})\n",
        str_field(feature, "last_modified_by"),
        str_field(feature, "last_modified_at"),
        u64_field(feature, "version"),
    ));
    out
}

/// Human-readable rendering of a method result.
pub fn render(method: &str, result: &Value) -> String {
    match method {
        "feature.list" => {
            let features = result
                .get("features")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let total = u64_field(result, "total");
            if features.is_empty() {
                return format!("No features ({total} total)\n");
            }
            let mut out = format!("{} of {total} features:\n", features.len());
            for feature in &features {
                out.push_str(&feature_line(feature));
            }
            out
        }
        "feature.my_vote" => match result.get("direction").and_then(Value::as_str) {
            Some(direction) => format!("Your vote: {direction}\n"),
            None => "You have not voted\n".to_string(),
        },
        "feature.audit" => format!(
            "Ledger tally: +{} / -{} (counters consistent)\n",
            u64_field(result, "votes_up"),
            u64_field(result, "votes_down"),
        ),
        "service.status" => format!(
            "Featureboard service: uptime {}s, {} connections, {} store\n",
            u64_field(result, "uptime_s"),
            u64_field(result, "connections"),
            str_field(result, "store"),
        ),
        "service.doctor" => {
            let checks = result
                .get("checks")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut out = String::new();
            for check in &checks {
                out.push_str(&format!(
                    "  [{}] {}: {}\n",
                    str_field(check, "status"),
                    str_field(check, "name"),
                    check.get("detail").and_then(Value::as_str).unwrap_or(""),
                ));
            }
            out
        }
        _ => feature_detail(result),
    }
}
