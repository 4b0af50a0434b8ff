//! zd - command-line client for zdockerd
//!
//! Talks to the daemon's REST API; every command maps onto one or two calls.

use std::collections::BTreeMap;
use std::io;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// zd - manage containers and networks on a zdockerd host
#[derive(Parser)]
#[command(name = "zd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for the zdockerd container control plane", long_about = None)]
struct Cli {
    /// zdockerd API URL
    #[arg(short, long, global = true, default_value = "http://127.0.0.1:8080")]
    api_url: String,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args)]
struct CreateArgs {
    /// Image reference
    image: String,

    /// Command to run, split on whitespace by the daemon
    #[arg(num_args = 1.., trailing_var_arg = true, required = true)]
    command: Vec<String>,

    /// Container name
    #[arg(long)]
    name: Option<String>,

    /// Bind mount host:container[:ro]
    #[arg(short, long = "volume")]
    volumes: Vec<String>,

    /// Publish host:container[/tcp|/udp]
    #[arg(short, long = "publish")]
    publish: Vec<String>,

    /// Environment variable KEY=VALUE
    #[arg(short, long = "env")]
    env: Vec<String>,

    /// Memory limit, e.g. 512m
    #[arg(short, long)]
    memory: Option<String>,

    /// Relative CPU shares
    #[arg(long)]
    cpu_shares: Option<u64>,

    /// CPUs allowed, e.g. 0-3
    #[arg(long)]
    cpuset_cpus: Option<String>,

    /// Network to attach to
    #[arg(long)]
    network: Option<String>,

    #[arg(short, long)]
    detach: bool,

    #[arg(short, long)]
    tty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List containers
    Ps,

    /// Show a container
    Inspect { container: String },

    /// Create a container
    Create(CreateArgs),

    /// Create and start a container
    Run(CreateArgs),

    /// Start a container
    Start { container: String },

    /// Stop a container
    Stop {
        container: String,

        /// Seconds to wait before killing
        #[arg(short, long)]
        time: Option<u64>,
    },

    /// Restart a container
    Restart {
        container: String,

        #[arg(short, long)]
        time: Option<u64>,
    },

    /// Remove a container
    Rm { container: String },

    /// Print container logs
    Logs {
        container: String,

        /// Print what is there and exit
        #[arg(long)]
        no_follow: bool,
    },

    /// Run a command in a running container
    Exec {
        container: String,

        #[arg(num_args = 1.., last = true, required = true)]
        command: Vec<String>,

        /// Environment variable KEY=VALUE
        #[arg(short, long = "env")]
        env: Vec<String>,
    },

    /// Manage networks
    #[command(subcommand)]
    Network(NetworkCommands),

    /// Host and daemon information
    Info,

    /// Daemon version
    Version,

    /// Daemon health
    Health,
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// List networks
    Ls,

    /// Create a bridge network
    Create {
        name: String,

        #[arg(long)]
        subnet: Option<String>,

        #[arg(long, default_value = "bridge")]
        driver: String,
    },

    /// Show a network and its containers
    Inspect { name: String },

    /// Remove a network
    Rm { name: String },
}

#[derive(Debug, Serialize)]
struct CreateRequest {
    image: String,
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    volume: Vec<String>,
    port_mapping: Vec<String>,
    environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu_share: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu_set: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<String>,
    detach: bool,
    tty: bool,
}

#[derive(Debug, Serialize)]
struct ExecRequest {
    command: Vec<String>,
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ExecResult {
    output: String,
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Error body returned by the daemon
#[derive(Debug, Error, Deserialize)]
#[error("{error}: {message}")]
struct ApiFailure {
    error: String,
    message: String,
}

struct Api {
    client: Client,
    base: String,
}

impl Api {
    fn new(base: &str) -> Result<Self> {
        // Stops and followed logs can run for a long time.
        let client = Client::builder()
            .timeout(None)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base, path)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().context("Failed to reach zdockerd")?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().unwrap_or_default();
        match serde_json::from_str::<ApiFailure>(&text) {
            Ok(failure) => Err(failure.into()),
            Err(_) => anyhow::bail!("Request failed ({}): {}", status, text),
        }
    }

    fn data(&self, request: RequestBuilder) -> Result<Value> {
        let envelope: Envelope<Value> = self
            .send(request)?
            .json()
            .context("Failed to parse response")?;
        Ok(envelope.data)
    }

    fn get(&self, path: &str) -> Result<Value> {
        self.data(self.client.get(self.url(path)))
    }

    fn post(&self, path: &str) -> Result<Value> {
        self.data(self.client.post(self.url(path)))
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.send(self.client.delete(self.url(path)))?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = Api::new(&cli.api_url)?;
    let output = cli.output;

    match cli.command {
        Commands::Ps => {
            let containers = api.get("/containers")?;
            if output == OutputFormat::Json {
                return print_json(&containers);
            }
            println!(
                "{:<14} {:<20} {:<16} {:<10} {:<16} {}",
                "CONTAINER ID".bold(),
                "NAME".bold(),
                "IMAGE".bold(),
                "STATUS".bold(),
                "IP".bold(),
                "COMMAND".bold()
            );
            for c in containers.as_array().into_iter().flatten() {
                let id = c["id"].as_str().unwrap_or("");
                println!(
                    "{:<14} {:<20} {:<16} {:<10} {:<16} {}",
                    &id[..12.min(id.len())],
                    c["name"].as_str().unwrap_or(""),
                    c["image"].as_str().unwrap_or(""),
                    colored_status(c["status"].as_str().unwrap_or("")),
                    c["ip_address"].as_str().unwrap_or("-"),
                    c["command"].as_str().unwrap_or("")
                );
            }
        }

        Commands::Inspect { container } => {
            print_json(&api.get(&format!("/containers/{}", container))?)?;
        }

        Commands::Create(args) => {
            let created = create(&api, args)?;
            print_container(output, &created, "Created")?;
        }

        Commands::Run(args) => {
            let created = create(&api, args)?;
            let id = created["id"].as_str().context("Invalid response")?;
            let started = api.post(&format!("/containers/{}/start", id))?;
            print_container(output, &started, "Started")?;
        }

        Commands::Start { container } => {
            let started = api.post(&format!("/containers/{}/start", container))?;
            print_container(output, &started, "Started")?;
        }

        Commands::Stop { container, time } => {
            let path = with_timeout(format!("/containers/stop/{}", container), time);
            let stopped = api.post(&path)?;
            print_container(output, &stopped, "Stopped")?;
        }

        Commands::Restart { container, time } => {
            let path = with_timeout(format!("/containers/{}/restart", container), time);
            let restarted = api.post(&path)?;
            print_container(output, &restarted, "Restarted")?;
        }

        Commands::Rm { container } => {
            api.delete(&format!("/containers/{}", container))?;
            println!("{} {}", "✓ Removed:".green(), container);
        }

        Commands::Logs {
            container,
            no_follow,
        } => {
            let request = api
                .client
                .get(api.url(&format!("/containers/logs/{}", container)))
                .query(&[("follow", (!no_follow).to_string())]);
            let mut response = api.send(request)?;
            io::copy(&mut response, &mut io::stdout().lock())
                .context("Failed to read log stream")?;
        }

        Commands::Exec {
            container,
            command,
            env,
        } => {
            let request = ExecRequest {
                command,
                env: parse_env(&env)?,
            };
            let value = api.data(
                api.client
                    .post(api.url(&format!("/containers/{}/exec", container)))
                    .json(&request),
            )?;
            if output == OutputFormat::Json {
                return print_json(&value);
            }
            let result: ExecResult =
                serde_json::from_value(value).context("Failed to parse exec result")?;
            print!("{}", result.output);
            if result.exit_code != 0 {
                std::process::exit(result.exit_code.clamp(1, 255));
            }
        }

        Commands::Network(command) => network(&api, output, command)?,

        Commands::Info => {
            let info = api.get("/system/info")?;
            if output == OutputFormat::Json {
                return print_json(&info);
            }
            println!("{}", "zdockerd Host".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            for (label, key) in [
                ("OS:", "os"),
                ("Architecture:", "architecture"),
                ("CPUs:", "cpus"),
                ("Memory:", "memory"),
                ("Kernel:", "kernel_version"),
                ("Root:", "zdocker_root"),
                ("Isolation:", "isolation"),
                ("Containers:", "containers"),
                ("  Running:", "containers_running"),
                ("  Stopped:", "containers_stopped"),
                ("Networks:", "networks"),
            ] {
                println!("{:<14} {}", label.cyan(), plain(&info[key]));
            }
        }

        Commands::Version => {
            let version = api.get("/system/version")?;
            if output == OutputFormat::Json {
                return print_json(&version);
            }
            println!("{} {}", "Client:".cyan(), env!("CARGO_PKG_VERSION"));
            println!("{} {}", "Server:".cyan(), plain(&version["version"]));
            println!("{} {}", "API:".cyan(), plain(&version["api_version"]));
            println!("{} {}", "Built:".cyan(), plain(&version["build_date"]));
        }

        Commands::Health => {
            let health: Value = api
                .send(api.client.get(format!("{}/health", api.base)))?
                .json()
                .context("Failed to parse response")?;
            if output == OutputFormat::Json {
                return print_json(&health);
            }
            let status = plain(&health["status"]);
            println!("{}", "zdockerd Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!(
                "{} {}",
                "Status:".cyan(),
                if status == "healthy" {
                    status.green()
                } else {
                    status.yellow()
                }
            );
            println!("{} {}", "Version:".cyan(), plain(&health["version"]));
            println!("{} {}s", "Uptime:".cyan(), plain(&health["uptime_seconds"]));
            println!("{} {}", "Running:".cyan(), plain(&health["containers_running"]));
            println!("{} {}", "Isolation:".cyan(), plain(&health["isolation"]));
        }
    }

    Ok(())
}

fn create(api: &Api, args: CreateArgs) -> Result<Value> {
    let request = CreateRequest {
        image: args.image,
        command: args.command.join(" "),
        name: args.name,
        volume: args.volumes,
        port_mapping: args.publish,
        environment: parse_env(&args.env)?,
        memory: args.memory,
        cpu_share: args.cpu_shares,
        cpu_set: args.cpuset_cpus,
        network: args.network,
        detach: args.detach,
        tty: args.tty,
    };
    api.data(api.client.post(api.url("/containers")).json(&request))
}

fn network(api: &Api, output: OutputFormat, command: NetworkCommands) -> Result<()> {
    match command {
        NetworkCommands::Ls => {
            let networks = api.get("/networks")?;
            if output == OutputFormat::Json {
                return print_json(&networks);
            }
            println!(
                "{:<20} {:<10} {:<18} {}",
                "NAME".bold(),
                "DRIVER".bold(),
                "SUBNET".bold(),
                "CONTAINERS".bold()
            );
            for n in networks.as_array().into_iter().flatten() {
                println!(
                    "{:<20} {:<10} {:<18} {}",
                    plain(&n["name"]),
                    plain(&n["driver"]),
                    plain(&n["subnet"]),
                    n["containers"].as_array().map(Vec::len).unwrap_or(0)
                );
            }
        }
        NetworkCommands::Create {
            name,
            subnet,
            driver,
        } => {
            let body = serde_json::json!({ "name": name, "driver": driver, "subnet": subnet });
            let created = api.data(api.client.post(api.url("/networks")).json(&body))?;
            if output == OutputFormat::Json {
                return print_json(&created);
            }
            println!(
                "{} {} ({})",
                "✓ Created network:".green(),
                plain(&created["name"]),
                plain(&created["subnet"])
            );
        }
        NetworkCommands::Inspect { name } => {
            print_json(&api.get(&format!("/networks/{}", name))?)?;
        }
        NetworkCommands::Rm { name } => {
            api.delete(&format!("/networks/{}", name))?;
            println!("{} {}", "✓ Removed network:".green(), name);
        }
    }
    Ok(())
}

fn parse_env(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Invalid environment variable {:?}, expected KEY=VALUE", pair))?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn with_timeout(path: String, time: Option<u64>) -> String {
    match time {
        Some(seconds) => format!("{}?timeout={}", path, seconds),
        None => path,
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_container(output: OutputFormat, container: &Value, verb: &str) -> Result<()> {
    if output == OutputFormat::Json {
        return print_json(container);
    }
    println!(
        "{} {} ({})",
        format!("✓ {}:", verb).green(),
        plain(&container["name"]),
        colored_status(container["status"].as_str().unwrap_or(""))
    );
    println!("{} {}", "  ID:".cyan(), plain(&container["id"]));
    Ok(())
}

fn colored_status(status: &str) -> colored::ColoredString {
    match status {
        "running" => status.green(),
        "created" => status.cyan(),
        "stopped" => status.yellow(),
        _ => status.red(),
    }
}

/// JSON value without quotes around strings
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
