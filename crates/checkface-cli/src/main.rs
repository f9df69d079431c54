use anyhow::{anyhow, bail, Context, Result};
use checkface_capture::{Frame, InboxSource, StillImageSource};
use checkface_core::{AdminGate, CheckInEvent, Clock, DailyCount, FaceRecord, SystemClock};
use checkface_service::auth::hex_digest;
use checkface_service::{
    check_once, spawn_engine, watch, AttendanceService, CheckOutcome, Config, EngineHandle,
    EnrollmentService, ReportAggregator, ServiceError,
};
use checkface_store::{AttendanceLedger, Database, FaceCorpus, IdentityStore};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

mod matcher_cmd;

use matcher_cmd::CommandMatcher;

#[derive(Parser)]
#[command(name = "checkface", about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new identity from a photo
    Enroll {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        id: i64,
        /// Photo of the person's face
        #[arg(short, long)]
        photo: PathBuf,
    },
    /// Change the name recorded for an id
    Rename {
        #[arg(short, long)]
        id: i64,
        /// New name
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        secret: Option<String>,
    },
    /// Move the identity with this name to a new id
    Reassign {
        #[arg(short, long)]
        name: String,
        #[arg(long)]
        new_id: i64,
        #[arg(long)]
        secret: Option<String>,
    },
    /// Replace the photo of an enrolled identity
    UpdatePhoto {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        id: i64,
        #[arg(short, long)]
        photo: PathBuf,
        #[arg(long)]
        secret: Option<String>,
    },
    /// Remove an identity, its photo and its check-ins
    Delete {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        id: i64,
        #[arg(long)]
        secret: Option<String>,
    },
    /// Show one enrolled identity
    Show {
        #[arg(short, long)]
        id: i64,
    },
    /// List enrolled identities
    List {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        secret: Option<String>,
    },
    /// List recorded check-ins, newest first
    Checkins {
        /// Only this id
        #[arg(short, long)]
        id: Option<i64>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Check in once from a captured photo
    Check {
        #[arg(short, long)]
        photo: PathBuf,
    },
    /// Check in every new frame dropped into the inbox until Ctrl-C
    Watch,
    /// Daily check-in counts for the trailing window
    Report {
        /// Window length in days, ending today
        #[arg(short, long)]
        days: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Show configuration and store status as JSON
    Status,
    /// Print the digest to configure as CHECKFACE_ADMIN_SECRET_SHA256
    HashSecret { secret: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ServiceError>() {
                Some(se) if se.is_warning() => eprintln!("warning: {se}"),
                _ => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    if let Commands::HashSecret { secret } = &command {
        println!("{}", hex_digest(secret));
        return Ok(());
    }

    let app = App::open(Config::load()?)?;

    match command {
        Commands::Enroll { name, id, photo } => {
            let frame = load_photo(&photo)?;
            let record = app.enrollment().enroll(&name, id, &frame)?;
            println!("enrolled {} ({})", record.name, record.user_id);
        }
        Commands::Rename { id, name, secret } => {
            app.require_admin(secret.as_deref())?;
            let record = app.enrollment().update_name(id, &name)?;
            println!("{} is now {}", record.user_id, record.name);
        }
        Commands::Reassign {
            name,
            new_id,
            secret,
        } => {
            app.require_admin(secret.as_deref())?;
            let record = app.enrollment().update_id(&name, new_id)?;
            println!("{} is now {}", record.name, record.user_id);
        }
        Commands::UpdatePhoto {
            name,
            id,
            photo,
            secret,
        } => {
            app.require_admin(secret.as_deref())?;
            let frame = load_photo(&photo)?;
            let record = app.enrollment().update_photo(&name, id, &frame)?;
            println!("photo updated: {}", record.photo_path.display());
        }
        Commands::Delete { name, id, secret } => {
            app.require_admin(secret.as_deref())?;
            let summary = app.enrollment().delete(&name, id)?;
            println!(
                "deleted {} ({}): {} check-ins removed",
                summary.record.name, summary.record.user_id, summary.events_removed
            );
        }
        Commands::Show { id } => {
            let record = app
                .enrollment()
                .find_by_id(id)?
                .ok_or_else(|| ServiceError::RecordNotFound(format!("user id {id}")))?;
            print_identities(&[record]);
        }
        Commands::List { json, secret } => {
            app.require_admin(secret.as_deref())?;
            let records = app.enrollment().list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No identities enrolled");
            } else {
                print_identities(&records);
            }
        }
        Commands::Checkins { id, limit, json } => {
            let ledger = AttendanceLedger::new(app.db.clone());
            let mut events = match id {
                Some(id) => {
                    let mut events = ledger.for_user(id)?;
                    events.reverse();
                    events
                }
                None => ledger.list(limit)?,
            };
            if let Some(limit) = limit {
                events.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No check-ins recorded");
            } else {
                print_events(&events);
            }
        }
        Commands::Check { photo } => {
            let engine = app.engine()?;
            let mut service = app.attendance();
            let mut source = StillImageSource::new(photo);
            let outcome = check_once(&mut service, &mut source, &engine).await?;
            println!("{}", describe(&outcome));
            if !matches!(
                outcome,
                CheckOutcome::CheckedIn { .. } | CheckOutcome::AlreadyCheckedIn { .. }
            ) {
                return Err(anyhow!("not checked in"));
            }
        }
        Commands::Watch => {
            std::fs::create_dir_all(&app.config.inbox_dir)
                .with_context(|| format!("cannot create inbox {}", app.config.inbox_dir.display()))?;
            let engine = app.engine()?;
            let mut service = app.attendance();
            let mut source = InboxSource::new(&app.config.inbox_dir);
            source.skip_existing();

            tracing::info!(inbox = %app.config.inbox_dir.display(), "watching for frames");
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            let summary = watch(
                &mut service,
                &mut source,
                &engine,
                app.config.poll_interval,
                shutdown,
                |outcome| println!("{}", describe(outcome)),
            )
            .await?;
            println!(
                "{} frames, {} checked in, {} not matched, {} without a face",
                summary.frames, summary.checked_in, summary.not_matched, summary.no_face
            );
        }
        Commands::Report { days, json } => {
            let window = days.unwrap_or(app.config.report_window_days);
            let report = ReportAggregator::new(AttendanceLedger::new(app.db.clone()));
            let counts = report.recent_counts(window, SystemClock.today())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                for line in render_chart(&counts) {
                    println!("{line}");
                }
            }
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&app.status()?)?);
        }
        Commands::HashSecret { .. } => {}
    }

    Ok(())
}

/// Opened stores plus the configuration they came from.
struct App {
    config: Config,
    db: Database,
    corpus: Arc<FaceCorpus>,
}

impl App {
    fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path)
            .with_context(|| format!("cannot open database {}", config.db_path.display()))?;
        let corpus = FaceCorpus::open(config.corpus_dir.clone(), &config.photo_extension)
            .with_context(|| format!("cannot open corpus {}", config.corpus_dir.display()))?;
        Ok(Self {
            config,
            db,
            corpus: Arc::new(corpus),
        })
    }

    fn enrollment(&self) -> EnrollmentService {
        EnrollmentService::new(self.db.clone(), self.corpus.clone(), self.config.dedup_policy)
    }

    fn attendance(&self) -> AttendanceService {
        AttendanceService::new(
            AttendanceLedger::new(self.db.clone()),
            self.corpus.clone(),
            Arc::new(SystemClock),
            self.config.checkin_policy,
        )
    }

    fn engine(&self) -> Result<EngineHandle> {
        let matcher = self
            .config
            .matcher_command
            .as_deref()
            .and_then(|line| CommandMatcher::from_command_line(line, self.config.match_timeout))
            .ok_or_else(|| anyhow!("no matcher configured; set CHECKFACE_MATCHER"))?;
        Ok(spawn_engine(Box::new(matcher), self.config.match_timeout)?)
    }

    fn require_admin(&self, secret: Option<&str>) -> Result<()> {
        check_admin(self.config.admin_gate().as_deref(), secret)
    }

    fn status(&self) -> Result<serde_json::Value> {
        let identities = IdentityStore::new(self.db.clone()).list()?;
        let missing_photos = identities.iter().filter(|r| !r.photo_path.exists()).count();
        let ledger = AttendanceLedger::new(self.db.clone());
        let today = SystemClock.today();

        Ok(serde_json::json!({
            "db_path": self.config.db_path,
            "corpus_dir": self.config.corpus_dir,
            "inbox_dir": self.config.inbox_dir,
            "identities": identities.len(),
            "photos": self.corpus.entries()?.len(),
            "missing_photos": missing_photos,
            "check_ins": ledger.count()?,
            "check_ins_today": ledger.between(today, today)?.len(),
            "matcher": self.config.matcher_command,
            "admin_gate": self.config.admin_gate,
            "dedup_policy": self.config.dedup_policy,
            "checkin_policy": self.config.checkin_policy,
        }))
    }
}

fn check_admin(gate: Option<&dyn AdminGate>, secret: Option<&str>) -> Result<()> {
    let Some(gate) = gate else {
        return Ok(());
    };
    let secret = secret.ok_or_else(|| anyhow!("this command requires --secret"))?;
    if !gate.authenticate(secret) {
        tracing::warn!("admin authentication failed");
        bail!("admin secret rejected");
    }
    Ok(())
}

fn load_photo(path: &Path) -> Result<Frame> {
    let frame = Frame::load(path, 0).with_context(|| format!("cannot read photo {}", path.display()))?;
    if frame.is_dark {
        bail!("photo {} is too dark to use", path.display());
    }
    Ok(frame)
}

fn describe(outcome: &CheckOutcome) -> String {
    match outcome {
        CheckOutcome::NoFrame => "no usable frame".to_string(),
        CheckOutcome::CheckedIn { event, score } => format!(
            "checked in {} ({}) at {} [score {score:.3}]",
            event.name,
            event.user_id,
            event.timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        CheckOutcome::AlreadyCheckedIn { key, .. } => {
            format!("{} ({}) already checked in today", key.name, key.user_id)
        }
        CheckOutcome::NotMatched => "no enrolled identity matched".to_string(),
        CheckOutcome::NoFaceDetected => "no face detected".to_string(),
    }
}

fn print_identities(records: &[FaceRecord]) {
    println!("{:<10} {:<24} PHOTO", "ID", "NAME");
    for r in records {
        println!("{:<10} {:<24} {}", r.user_id, r.name, r.photo_path.display());
    }
}

fn print_events(events: &[CheckInEvent]) {
    println!("{:<20} {:<10} NAME", "TIME", "ID");
    for e in events {
        println!(
            "{:<20} {:<10} {}",
            e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            e.user_id,
            e.name
        );
    }
}

const CHART_WIDTH: u64 = 40;

/// One line per day: date, count and a bar scaled to the busiest day.
fn render_chart(counts: &[DailyCount]) -> Vec<String> {
    let max = counts.iter().map(|c| u64::from(c.count)).max().unwrap_or(0).max(1);
    counts
        .iter()
        .map(|c| {
            let bar = (u64::from(c.count) * CHART_WIDTH / max) as usize;
            format!("{}  {:>4}  {}", c.date, c.count, "#".repeat(bar))
        })
        .collect()
}
