//! fieldsync CLI: run the sync server, administer work orders, and drive a
//! field client from the terminal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fieldsync::api;
use fieldsync::client::{FieldClient, HttpTransport, ReplayReport};
use fieldsync::collab;
use fieldsync::config::secrets::ExposeSecret;
use fieldsync::config::{ClientConfig, Config};
use fieldsync::db::Db;
use fieldsync::model::{
    JobSnapshot, NewWorkOrder, ProductId, QtyChange, TimerAction, VehicleSnapshot, WorkOrderId,
    WorkOrderStatus,
};
use fieldsync::store::Store;
use fieldsync::sync::SyncController;
use fieldsync::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "fieldsync", about = "Work order sync for mechanics in the field")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync API server
    Serve,
    /// Work order administration (talks to the database directly)
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Field client operations (talks to the server over HTTP)
    Client {
        /// Client TOML config
        #[arg(long, default_value = "fieldsync.toml")]
        config: PathBuf,
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Open a new work order
    Create {
        #[arg(long)]
        customer: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        vehicle_ref: Option<String>,
        #[arg(long)]
        vin: Option<String>,
        #[arg(long)]
        unit_no: Option<String>,
        #[arg(long)]
        make_model: Option<String>,
        #[arg(long)]
        mileage: Option<u32>,
    },
    /// Assign a mechanic and print their bearer token
    Assign {
        id: WorkOrderId,
        mechanic_id: String,
        /// Display name
        name: String,
    },
    /// Show a work order as the office sees it
    Show { id: WorkOrderId },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Fetch a job and rebase the local view on it
    Refresh { id: WorkOrderId },
    /// Print the local view of a job
    Show { id: WorkOrderId },
    /// Record a timer action
    Timer {
        id: WorkOrderId,
        /// start, pause, resume, depart, arrived or complete
        action: TimerAction,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Override the work order status
    Status {
        id: WorkOrderId,
        /// idle, in_progress or completed
        status: WorkOrderStatus,
    },
    /// Add to, take from, or clear a part line
    Part {
        id: WorkOrderId,
        product: String,
        /// Signed quantity change
        #[arg(long, allow_hyphen_values = true, conflicts_with = "clear")]
        delta: Option<i64>,
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        rate_cents: Option<i64>,
    },
    /// List pending queue entries
    Queue,
    /// Replay the queue once, or keep replaying with --watch
    Sync {
        #[arg(long)]
        watch: bool,
        #[arg(long, default_value_t = 15)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve().await,
        Command::Job { action } => {
            let config = Config::from_env()?;
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;
            let sync = SyncController::new(Arc::new(db), config.sync_config());

            match action {
                JobAction::Create {
                    customer,
                    description,
                    vehicle_ref,
                    vin,
                    unit_no,
                    make_model,
                    mileage,
                } => {
                    let mut new = NewWorkOrder::new(customer, description).vehicle(VehicleSnapshot {
                        vin,
                        mileage,
                        unit_no,
                        make_model,
                    });
                    if let Some(r) = vehicle_ref {
                        new = new.vehicle_ref(r);
                    }
                    let job = sync.create_job(new).await?;
                    println!("Created: {}", job.id());
                    Ok(())
                }
                JobAction::Assign {
                    id,
                    mechanic_id,
                    name,
                } => {
                    let assignment = sync.assign(id, &mechanic_id, &name).await?;
                    println!("Assignment: {}", assignment.id);
                    println!("Token:      {}", assignment.token.as_str());
                    Ok(())
                }
                JobAction::Show { id } => {
                    let job = sync
                        .store()
                        .load(id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("no work order {id}"))?;
                    print_job(&collab::snapshot(&job, None));
                    Ok(())
                }
            }
        }
        Command::Client { config, action } => cmd_client(config, action).await,
    }
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fieldsync".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let sync = Arc::new(SyncController::new(Arc::new(db), config.sync_config()));
    api::serve(config.bind_addr, api::build_router(sync)).await?;
    Ok(())
}

async fn cmd_client(path: PathBuf, action: ClientAction) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: None,
        service_name: "fieldsync-client".to_string(),
        log_level: "warn".to_string(),
    })?;

    let mut config = ClientConfig::load(&path)?;
    let transport = HttpTransport::new(config.server_url.clone(), std::mem::take(&mut config.tokens));
    let mut client = FieldClient::open(&config, transport)?;

    match action {
        ClientAction::Refresh { id } => {
            let view = client.refresh(id).await?;
            print_job(view);
        }
        ClientAction::Show { id } => match client.view(id) {
            Some(view) => print_job(view),
            None => anyhow::bail!("work order {id} is not cached; run `client refresh` first"),
        },
        ClientAction::Timer { id, action, reason } => {
            let report = client.timer(id, action, reason).await?;
            print_report(&report);
        }
        ClientAction::Status { id, status } => {
            let report = client.set_status(id, status).await?;
            print_report(&report);
        }
        ClientAction::Part {
            id,
            product,
            delta,
            clear,
            rate_cents,
        } => {
            let change = match (clear, delta) {
                (true, _) => QtyChange::Clear,
                (false, Some(delta)) => QtyChange::Delta(delta),
                (false, None) => anyhow::bail!("pass --delta N or --clear"),
            };
            let report = client
                .adjust_part(id, ProductId::new(product), change, rate_cents)
                .await?;
            print_report(&report);
        }
        ClientAction::Queue => {
            if client.queue().is_empty() {
                println!("Queue is empty.");
                return Ok(());
            }
            println!(
                "{:<8}  {:<8}  {:<11}  {:<8}  {:<9}  NOT_BEFORE",
                "LOCAL", "JOB", "KIND", "ATTEMPTS", "CONFLICTS"
            );
            println!("{}", "-".repeat(80));
            for id in client.queue().work_orders() {
                for entry in client.queue().pending(id) {
                    println!(
                        "{:<8}  {:<8}  {:<11}  {:<8}  {:<9}  {}",
                        &entry.local_id.to_string()[..8],
                        &id.to_string()[..8],
                        entry.kind(),
                        entry.attempts,
                        entry.conflicts,
                        entry
                            .not_before
                            .map(|t| t.format("%H:%M:%S").to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
            println!("\n{} pending", client.queue().len());
        }
        ClientAction::Sync {
            watch,
            interval_secs,
        } => {
            if watch {
                let shutdown = Arc::new(tokio::sync::Notify::new());
                let signal = Arc::clone(&shutdown);
                tokio::spawn(async move {
                    tokio::signal::ctrl_c().await.ok();
                    signal.notify_one();
                });
                client
                    .run(Duration::from_secs(interval_secs), shutdown)
                    .await?;
            } else {
                let report = client.sync().await?;
                print_report(&report);
            }
        }
    }
    Ok(())
}

fn print_job(job: &JobSnapshot) {
    let wo = &job.work_order;
    println!("ID:          {}", wo.id);
    println!("Version:     {}", job.version);
    println!("Status:      {}", job.status);
    println!("Read-only:   {}", job.read_only);
    println!("Customer:    {}", wo.customer_ref);
    println!("Description: {}", wo.description);
    println!("Cause:       {}", wo.cause.as_deref().unwrap_or("-"));
    println!("Correction:  {}", wo.correction.as_deref().unwrap_or("-"));
    println!("VIN:         {}", wo.vehicle.vin.as_deref().unwrap_or("-"));
    if let Some(a) = &job.assignment {
        println!("Timer:       {}", a.state);
        if let Some(reason) = &a.pause_reason {
            println!("Paused for:  {reason}");
        }
    }
    if !job.collaborators.is_empty() {
        println!("---");
        for c in &job.collaborators {
            let mark = if c.submitted { "done" } else { "working" };
            println!("  {:<24} {mark}", c.name);
        }
    }
    if !job.line_items.is_empty() {
        println!("---");
        for li in &job.line_items {
            println!("  {:<24} x{:<4} {:>8}c", li.product_id, li.qty, li.rate_cents);
        }
    }
    if let Some(inspection) = &job.inspection {
        println!("---");
        println!("Inspection:  {} ({})", inspection.id, inspection.submitted_at);
    }
}

fn print_report(report: &ReplayReport) {
    println!(
        "acked {}, rebased {}, deferred {}, rejected {}",
        report.acked,
        report.rebased,
        report.deferred,
        report.rejected.len()
    );
    for r in &report.rejected {
        println!("  {} {}: {}", &r.entry.local_id.to_string()[..8], r.entry.kind(), r.error);
    }
}
