use clap::{Parser, Subcommand};
use courier_lib::config::CourierConfig;
use courier_lib::drive::orchestrator::Orchestrator;
use courier_lib::geometry;
use courier_lib::input::{EnigoBackend, InputSynthesizer, Settle};
use courier_lib::intervention::{ConsoleChannel, InterventionChannel, UnattendedChannel};
use courier_lib::permissions::{self, PermissionStatus};
use courier_lib::status::{get_status, StatusReport};
use courier_lib::target::MessageRequest;
use mimalloc::MiMalloc;
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "courier", version, about = "Send a chat message by driving the desktop app")]
struct Cli {
    /// Config file (defaults to the app data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report whether the app is installed, running and visible
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Trigger the OS accessibility prompt if input access is missing
        #[arg(long)]
        request_permission: bool,
    },
    /// Deliver one message
    Send {
        /// Contact name as typed into the app's search
        #[arg(long)]
        to: String,
        /// Message body
        #[arg(long)]
        message: String,
        /// Never wait for a human; failed steps end the run
        #[arg(long)]
        unattended: bool,
        /// Log input instead of emitting it
        #[arg(long)]
        dry_run: bool,
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the click layout for a screen size
    Geometry {
        #[arg(long, requires = "height")]
        width: Option<u32>,
        #[arg(long, requires = "width")]
        height: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // load .env
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_filename("../.env");
    }

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let config = CourierConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Status { json, request_permission } => status(config, json, request_permission),
        Command::Send {
            to,
            message,
            unattended,
            dry_run,
            json,
        } => send(config, MessageRequest::new(to, message), unattended, dry_run, json).await,
        Command::Geometry { width, height } => layout(width.zip(height)).await,
    }
}

fn status(config: CourierConfig, json: bool, request_permission: bool) -> anyhow::Result<()> {
    if request_permission && permissions::check_input_permission() == PermissionStatus::Denied {
        permissions::request_input_permission();
        permissions::open_permission_settings();
    }

    let target = config.target.clone();
    let orchestrator = Orchestrator::from_config(config, Box::new(UnattendedChannel), true);
    let report = StatusReport::new(get_status(orchestrator.locator(), &target));

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
    }
    Ok(())
}

async fn send(
    config: CourierConfig,
    request: MessageRequest,
    unattended: bool,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    if !dry_run && permissions::check_input_permission() == PermissionStatus::Denied {
        log::warn!("[permissions] Input access not granted; keystrokes will be dropped");
    }

    let channel: Box<dyn InterventionChannel> = if unattended {
        Box::new(UnattendedChannel)
    } else {
        Box::new(ConsoleChannel)
    };
    let mut orchestrator = Orchestrator::from_config(config, channel, dry_run);

    match orchestrator.send_message(&request).await {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.degraded {
                println!("Sent to {} (unconfirmed steps: {})", request.contact, report.warnings.len());
                for warning in &report.warnings {
                    println!("  - {}", warning);
                }
            } else {
                println!("Sent to {}", request.contact);
            }
            Ok(())
        }
        Err(failure) => {
            eprintln!("[courier] {}", failure);
            eprintln!("{}", failure.diagnostic);
            std::process::exit(1);
        }
    }
}

async fn layout(size: Option<(u32, u32)>) -> anyhow::Result<()> {
    let (width, height) = match size {
        Some(size) => size,
        None => InputSynthesizer::new(EnigoBackend, Settle::none()).display_size().await?,
    };

    let profile = geometry::resolve(width, height);
    println!("{}x{} ({:?})", profile.width, profile.height, profile.confidence);
    for (name, region) in profile.regions() {
        println!(
            "  {:<13} rect {:>5},{:<5} {:>5}x{:<5} anchor {},{}",
            name,
            region.rect.x,
            region.rect.y,
            region.rect.width,
            region.rect.height,
            region.anchor.x,
            region.anchor.y
        );
    }
    Ok(())
}
