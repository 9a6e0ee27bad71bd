//! `roadmate` - CLI for the shared trip state
//!
//! Each invocation acts as one device: it opens the configured broker,
//! catches up on the shared state, applies the command, and waits for its
//! writes to go out before exiting.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use roadmate::assistant::ChatRequest;
use roadmate::cli::{
    Cli, Command, ConfigCommand, ExpenseCommand, NotifyCommand, ReplayCommand, WaypointCommand,
};
use roadmate::config::SyncBackend;
use roadmate::expense::total_paid_by;
use roadmate::sync::RemoteKey;
use roadmate::{
    init_logging, Config, DocumentBroker, GeoSampler, MemoryBroker, NavigationState,
    NavigationStore, NotificationDraft, RemoteSyncLayer, ReplaySampler, Session, SqliteBroker,
    StoreOptions, Trip,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        Command::Config(config_cmd) => handle_config(cli.config, config_cmd),
        command => {
            // Load configuration
            let config =
                Config::load_from(cli.config.clone()).context("loading configuration")?;
            run(&config, command).await
        }
    }
}

async fn run(config: &Config, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status(status_cmd) => {
            let store = open_device(config).await?;
            print_status(&store.state(), status_cmd.json)
        }
        Command::Replay(replay_cmd) => handle_replay(config, replay_cmd).await,
        Command::Waypoint(waypoint_cmd) => handle_waypoint(config, waypoint_cmd).await,
        Command::Notify(notify_cmd) => handle_notify(config, notify_cmd).await,
        Command::Expense(expense_cmd) => handle_expense(config, expense_cmd).await,
        Command::Reset(reset_cmd) => {
            if !reset_cmd.yes {
                println!("This will delete every expense on every device.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            let store = open_device(config).await?;
            store.reset_all_data();
            store.sync().flush().await;
            println!("Expense ledger cleared.");
            Ok(())
        }
        Command::Ask(ask_cmd) => {
            let store = open_device(config).await?;
            let request = ChatRequest::new(ask_cmd.message, &store.state());
            println!("{}", serde_json::to_string_pretty(&request)?);
            Ok(())
        }
        Command::Fences(fences_cmd) => {
            let trip = Trip::load_or_builtin(config.trip.file.as_deref())?;
            if fences_cmd.json {
                println!("{}", serde_json::to_string_pretty(&trip.geofences)?);
            } else {
                for fence in &trip.geofences {
                    println!(
                        "{:<12} {:<20} ({:.4}, {:.4})  r={} km",
                        fence.id, fence.name, fence.center.lat, fence.center.lng, fence.radius_km
                    );
                }
            }
            Ok(())
        }
        Command::Watch => handle_watch(config).await,
        Command::Config(config_cmd) => handle_config(None, config_cmd),
    }
}

/// Build this device's store over the configured broker, then catch up on
/// the shared state.
async fn open_device(config: &Config) -> anyhow::Result<NavigationStore> {
    let broker: Arc<dyn DocumentBroker> = match config.sync.backend {
        SyncBackend::Memory => {
            warn!("memory backend: nothing is shared with other processes");
            Arc::new(MemoryBroker::new())
        }
        SyncBackend::Sqlite => {
            let path = config.database_path();
            Arc::new(
                SqliteBroker::open(&path, config.poll_interval())
                    .with_context(|| format!("opening shared store {}", path.display()))?,
            )
        }
    };
    let device = format!(
        "{}:{}:{}",
        config.device.role,
        config.device.user,
        std::process::id()
    );
    let sync = Arc::new(RemoteSyncLayer::new(broker, &device));
    let trip = Trip::load_or_builtin(config.trip.file.as_deref())?;
    let store = NavigationStore::new(trip, StoreOptions::from_config(config), sync);

    for key in RemoteKey::ALL {
        let mut rx = store.sync().subscribe_key(key);
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(change)) => {
                store.apply_remote(change);
            }
            Ok(None) | Err(_) => warn!(key = %key, "no initial snapshot; starting empty"),
        }
    }
    Ok(store)
}

async fn handle_replay(config: &Config, cmd: ReplayCommand) -> anyhow::Result<()> {
    let mut sampler =
        ReplaySampler::from_jsonl(&cmd.file, Duration::from_millis(cmd.interval_ms))?;
    let store = open_device(config).await?;
    if let Some(id) = &cmd.waypoint {
        if !store.set_next_waypoint(id) {
            bail!("unknown waypoint '{id}'");
        }
    }

    let session = Session::from_config(store, config);
    let remote = session.store().sync().subscribe();
    let (sensor_tx, sensor_rx) = mpsc::channel(64);
    let (_, actions_rx) = mpsc::channel(1);

    info!(sampler = sampler.name(), samples = sampler.len(), "replaying");
    sampler.start(sensor_tx)?;
    let (store, stats) = session.run(sensor_rx, remote, actions_rx).await;
    store.sync().flush().await;

    if cmd.json {
        let out = serde_json::json!({ "stats": stats, "state": store.state() });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!(
            "Replayed {} samples: {} geofence(s) fired, {} route refresh(es)",
            stats.samples, stats.fences_fired, stats.route_refreshes
        );
        println!();
        print_status(&store.state(), false)?;
    }
    Ok(())
}

async fn handle_waypoint(config: &Config, cmd: WaypointCommand) -> anyhow::Result<()> {
    let store = open_device(config).await?;
    match cmd {
        WaypointCommand::List => {
            let state = store.state();
            for waypoint in &state.waypoints {
                let marker = if state.next_waypoint.as_deref() == Some(waypoint.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {:<12} {:<24} {}",
                    waypoint.id, waypoint.name, waypoint.category
                );
            }
        }
        WaypointCommand::Set { id } => {
            if !store.set_next_waypoint(&id) {
                bail!("unknown waypoint '{id}'");
            }
            store.sync().flush().await;
            println!("Next waypoint: {id}");
        }
    }
    Ok(())
}

async fn handle_notify(config: &Config, cmd: NotifyCommand) -> anyhow::Result<()> {
    let store = open_device(config).await?;
    match cmd {
        NotifyCommand::Send { message, category } => {
            let notification = store.send_notification(NotificationDraft::new(
                category.into(),
                message,
                config.device.user.clone(),
            ));
            println!("Sent notification {}", notification.id);
        }
        NotifyCommand::Clear => {
            store.clear_notification();
            println!("Notification cleared.");
        }
    }
    store.sync().flush().await;
    Ok(())
}

async fn handle_expense(config: &Config, cmd: ExpenseCommand) -> anyhow::Result<()> {
    let store = open_device(config).await?;
    let patch = cmd.patch();
    match cmd {
        ExpenseCommand::Add {
            title,
            amount,
            payer,
        } => {
            let payer = payer.unwrap_or_else(|| config.device.user.clone());
            let expense = store.add_expense(title, amount, payer)?;
            println!("Added expense {}", expense.id);
        }
        ExpenseCommand::Update { id, .. } => {
            let patch = patch.unwrap_or_default();
            if patch.is_empty() {
                bail!("nothing to update; pass --title, --amount or --payer");
            }
            if !store.update_expense(&id, &patch)? {
                bail!("unknown expense '{id}'");
            }
            println!("Updated expense {id}");
        }
        ExpenseCommand::Remove { id } => {
            if !store.remove_expense(&id) {
                bail!("unknown expense '{id}'");
            }
            println!("Removed expense {id}");
        }
        ExpenseCommand::List { json } => {
            let state = store.state();
            if json {
                println!("{}", serde_json::to_string_pretty(&state.expenses)?);
            } else {
                print_ledger(&state, store.members());
            }
            return Ok(());
        }
    }
    store.sync().flush().await;
    Ok(())
}

async fn handle_watch(config: &Config) -> anyhow::Result<()> {
    let store = open_device(config).await?;
    print_status(&store.state(), false)?;

    let mut state = store.subscribe();
    let session = Session::from_config(store, config);
    let remote = session.store().sync().subscribe();
    let (sensor_tx, sensor_rx) = mpsc::channel(1);
    drop(sensor_tx);
    let (actions_tx, actions_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for interrupt");
        }
        drop(actions_tx);
    });
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let line = summary_line(&state.borrow_and_update());
            println!("{line}");
        }
    });

    let (store, _) = session.run(sensor_rx, remote, actions_rx).await;
    store.sync().flush().await;
    Ok(())
}

fn handle_config(
    config_path: Option<std::path::PathBuf>,
    cmd: ConfigCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Device]");
                println!("  Role:               {}", config.device.role);
                println!("  User:               {}", config.device.user);
                println!();
                println!("[Trip]");
                match &config.trip.file {
                    Some(file) => println!("  File:               {}", file.display()),
                    None => println!("  File:               (builtin)"),
                }
                println!("  Members:            {}", config.trip.members.join(", "));
                println!();
                println!("[Navigation]");
                println!(
                    "  Planning speed:     {} km/h",
                    config.navigation.planning_speed_kmh
                );
                println!(
                    "  Notification time:  {} s",
                    config.navigation.notification_display_secs
                );
                println!(
                    "  Route threshold:    {} m",
                    config.navigation.route_refresh_threshold_m
                );
                println!();
                println!("[Sync]");
                println!("  Backend:            {}", config.sync.backend);
                println!("  Database path:      {}", config.database_path().display());
                println!("  Poll interval:      {} ms", config.sync.poll_interval_ms);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_status(state: &NavigationState, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }
    println!("roadmate status");
    println!("---------------");
    println!("Device:        {} ({})", state.user, state.role);
    println!(
        "Next waypoint: {}",
        state.next_waypoint().map_or("-", |w| w.name.as_str())
    );
    println!("Area:          {}", state.area_text);
    println!("Distance:      {}", state.distance_text);
    println!("Goal:          {}", state.goal_text);
    println!("ETA:           {}", state.eta_text);
    match &state.active_notification {
        Some(n) => println!("Notification:  [{}] {} ({})", n.category, n.message, n.sender),
        None => println!("Notification:  -"),
    }
    println!("Expenses:      {}", state.expenses.len());
    Ok(())
}

fn print_ledger(state: &NavigationState, members: &[String]) {
    if state.expenses.is_empty() {
        println!("No expenses yet.");
        return;
    }
    for expense in &state.expenses {
        println!(
            "{}  {:<8} {:>8}  {}  ({})",
            expense.created_at.with_timezone(&Local).format("%m-%d %H:%M"),
            expense.payer,
            expense.amount,
            expense.title,
            expense.id
        );
    }
    println!();
    for member in members {
        println!("{member:<8} paid {:>8}", total_paid_by(&state.expenses, member));
    }
}

fn summary_line(state: &NavigationState) -> String {
    let notification = state
        .active_notification
        .as_ref()
        .map_or_else(|| "-".to_string(), |n| format!("{} ({})", n.message, n.sender));
    format!(
        "[{}] next={} eta={} expenses={} notification={}",
        Local::now().format("%H:%M:%S"),
        state.next_waypoint.as_deref().unwrap_or("-"),
        state.eta_text,
        state.expenses.len(),
        notification
    )
}
