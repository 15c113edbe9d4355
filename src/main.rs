mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use zoosync::api::{EndpointKind, EndpointTable, ResourceName};
use zoosync::cache::QuerySnapshot;
use zoosync::config::Config;
use zoosync::consumer::{use_mutation, use_query};
use zoosync::persistence::SqliteKeyValueStore;
use zoosync::realtime::{RealtimeBridge, WsHubConnection};
use zoosync::store::GlobalStore;
use zoosync::transport::{AuthInterceptor, HttpTransport};

use logging::LogTarget;

#[derive(Parser, Debug)]
#[command(name = "zoosync")]
#[command(about = "Cached, realtime-invalidated access to the zoo API")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./zoosync.yaml or $XDG_CONFIG_HOME/zoosync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the rolling log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run a query endpoint and print the result
  Query {
    resource: ResourceName,
    endpoint: String,
    /// Parameters as a JSON object
    #[arg(long)]
    params: Option<String>,
  },
  /// Run a mutation endpoint and print the response
  Mutate {
    resource: ResourceName,
    endpoint: String,
    /// Request body as JSON
    #[arg(long)]
    body: String,
  },
  /// Subscribe to a query and print every refresh until interrupted
  Watch {
    resource: ResourceName,
    endpoint: String,
    #[arg(long)]
    params: Option<String>,
  },
  Login {
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
  },
  VerifyOtp {
    #[arg(long)]
    email: String,
    #[arg(long)]
    code: String,
  },
  Logout,
  /// List every endpoint with the tags it provides or invalidates
  Endpoints,
}

/// Everything the commands share, wired once.
struct App {
  config: Config,
  store: GlobalStore,
  token: watch::Receiver<Option<String>>,
  gc: Vec<JoinHandle<()>>,
}

impl App {
  fn build(config: Config) -> Result<Self> {
    let endpoints = Arc::new(EndpointTable::standard()?);
    let (token_tx, token) = watch::channel(None);

    let transport = HttpTransport::new(&config.api, AuthInterceptor::new(token.clone()))?;
    let path = match &config.storage.path {
      Some(path) => path.clone(),
      None => SqliteKeyValueStore::default_path()?,
    };
    let persistence = SqliteKeyValueStore::open(&path)?;

    let store = GlobalStore::new(
      endpoints,
      Arc::new(transport),
      Arc::new(persistence),
      token_tx,
      config.cache.retention(),
    );
    if let Err(e) = store.restore_session() {
      warn!(error = %e, "Could not restore session, continuing signed out");
    }
    let gc = store.spawn_gc(config.cache.gc_interval());

    Ok(Self {
      config,
      store,
      token,
      gc,
    })
  }

  async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Query {
        resource,
        endpoint,
        params,
      } => {
        let snapshot = self
          .store
          .query(resource, &endpoint, parse_json(params.as_deref())?)
          .await?;
        if let Some(error) = &snapshot.error {
          return Err(eyre!("{resource}/{endpoint} failed: {error}"));
        }
        print_json(snapshot.data.as_ref().unwrap_or(&Value::Null))
      }
      Command::Mutate {
        resource,
        endpoint,
        body,
      } => {
        let trigger = use_mutation(&self.store, resource, &endpoint)?;
        let outcome = trigger.trigger(parse_json(Some(&body))?).await?;
        let invalidated: Vec<String> = outcome.invalidated.iter().map(ToString::to_string).collect();
        info!(?invalidated, "Mutation applied");
        print_json(&outcome.data)
      }
      Command::Watch {
        resource,
        endpoint,
        params,
      } => self.watch(resource, &endpoint, parse_json(params.as_deref())?).await,
      Command::Login { email, password } => {
        match self.store.login(&email, &password).await? {
          Some(session) => println!("Logged in as {}", display_name(&session.user.full_name, &email)),
          None => println!("A one-time code was sent to {email}. Run `zoosync verify-otp`."),
        }
        Ok(())
      }
      Command::VerifyOtp { email, code } => {
        let session = self.store.verify_otp(&email, &code).await?;
        println!("Logged in as {}", display_name(&session.user.full_name, &email));
        Ok(())
      }
      Command::Logout => {
        self.store.logout();
        println!("Logged out");
        Ok(())
      }
      Command::Endpoints => print_endpoints(self.store.endpoints()),
    }
  }

  async fn watch(&self, resource: ResourceName, endpoint: &str, params: Value) -> Result<()> {
    let bridge = if self.config.realtime.enabled {
      let hub = WsHubConnection::new(&self.config.realtime, self.token.clone())?;
      let (bridge, invalidations) = RealtimeBridge::channel(Arc::new(hub));
      let pump = self.store.spawn_invalidation_pump(invalidations);
      let state = bridge.start().await;
      info!(%state, "Realtime bridge ready");
      Some((bridge, pump))
    } else {
      None
    };

    let mut handle = use_query(&self.store, resource, endpoint, params)?;
    if let Some(snapshot) = handle.settled().await {
      print_json(&render(&snapshot))?;
    }

    loop {
      tokio::select! {
        changed = handle.changed() => match changed {
          Some(snapshot) if !snapshot.fetching => print_json(&render(&snapshot))?,
          Some(_) => {}
          None => break,
        },
        _ = tokio::signal::ctrl_c() => break,
      }
    }

    drop(handle);
    if let Some((bridge, pump)) = bridge {
      bridge.stop().await;
      drop(bridge);
      pump.abort();
    }
    Ok(())
  }

  fn shutdown(self) {
    for task in self.gc {
      task.abort();
    }
  }
}

fn parse_json(raw: Option<&str>) -> Result<Value> {
  match raw {
    None => Ok(Value::Null),
    Some(raw) => serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON '{raw}': {e}")),
  }
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn render(snapshot: &QuerySnapshot) -> Value {
  json!({
    "status": format!("{:?}", snapshot.status),
    "stale": snapshot.stale,
    "lastUpdated": snapshot.last_updated.map(|t| t.to_rfc3339()),
    "error": snapshot.error.as_ref().map(ToString::to_string),
    "data": snapshot.data,
  })
}

fn display_name<'a>(full_name: &'a Option<String>, email: &'a str) -> &'a str {
  full_name.as_deref().unwrap_or(email)
}

fn print_endpoints(table: &EndpointTable) -> Result<()> {
  for endpoint in table.iter() {
    let tags = match &endpoint.kind {
      EndpointKind::Query { provides } => format!("provides {}", join(provides)),
      EndpointKind::Mutation { invalidates } => format!("invalidates {}", join(invalidates)),
    };
    println!(
      "{:<10} {:<20} {:<6} {:<32} {}",
      endpoint.resource.as_str(),
      endpoint.name,
      endpoint.method.as_str(),
      endpoint.path,
      tags
    );
  }
  Ok(())
}

fn join<T: ToString>(items: &[T]) -> String {
  if items.is_empty() {
    return "-".to_string();
  }
  items
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(", ")
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let target = if args.log_stderr {
    LogTarget::Stderr
  } else {
    LogTarget::from_config(&config.log)?
  };
  let _log_guard = logging::init(&config.log, target)?;

  if let Command::Endpoints = args.command {
    return print_endpoints(&EndpointTable::standard()?);
  }

  let app = App::build(config)?;
  let result = app.run(args.command).await;
  app.shutdown();
  result
}
