mod commands;
mod config;
mod fooddata;
mod platform;
mod supabase;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    LoginArgs, MigraineArgs, NutritionArgs, WorkerInputs, WorkerSet, cmd_city, cmd_day_clear,
    cmd_day_set, cmd_day_show, cmd_event_log, cmd_flags, cmd_insights, cmd_login, cmd_logout,
    cmd_metric_list, cmd_metric_reset, cmd_metric_set, cmd_migraine_list, cmd_migraine_log,
    cmd_nutrition_add, cmd_nutrition_pending, cmd_nutrition_push, cmd_nutrition_remove,
    cmd_worker_cancel, cmd_worker_enroll, cmd_worker_run, cmd_worker_status, cmd_worker_tick,
    parse_offset,
};
use crate::config::Config;
use crate::fooddata::FoodDataClient;
use crate::supabase::{SupabaseClient, Unconfigured};
use aura_core::insights::InsightWindow;
use aura_core::postgrest::RemoteStore;
use aura_core::service::{AuraService, FoodDataProvider};

#[derive(Parser)]
#[command(
    name = "aura",
    version,
    about = "A migraine diary that lines episodes up with sleep, weather and daily habits"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Supabase project URL
    #[arg(long, env = "AURA_SUPABASE_URL", global = true)]
    supabase_url: Option<String>,
    /// Supabase anon (public) API key
    #[arg(long, env = "AURA_SUPABASE_ANON_KEY", global = true, hide_env_values = true)]
    anon_key: Option<String>,
    /// USDA FoodData Central API key, used to fill in missing nutrients
    #[arg(long, env = "AURA_FDC_API_KEY", global = true, hide_env_values = true)]
    fdc_api_key: Option<String>,
    /// UTC offset for local dates, e.g. +02:00 (default: system time zone)
    #[arg(long, global = true, allow_hyphen_values = true)]
    utc_offset: Option<String>,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a session, from a token or an email/password sign-in
    Login {
        /// Access token (JWT) to store as-is
        #[arg(long, conflicts_with = "email")]
        token: Option<String>,
        /// User id belonging to --token
        #[arg(long, requires = "token")]
        user_id: Option<String>,
        /// Seconds until --token expires
        #[arg(long, requires = "token")]
        expires_in: Option<i64>,
        /// Email address for password sign-in
        #[arg(long)]
        email: Option<String>,
        /// Password (prompted when omitted)
        #[arg(long, env = "AURA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget the stored session
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or change feature flags
    Flags {
        /// Turn premium features on or off
        #[arg(long)]
        premium: Option<bool>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Log and list migraines
    Migraine {
        #[command(subcommand)]
        command: MigraineCommands,
    },
    /// Log triggers, medicines, reliefs and other events
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },
    /// Show events and daily metrics around a migraine (latest by default)
    Insights {
        /// Migraine id
        #[arg(long)]
        migraine: Option<String>,
        /// Days before the start to include
        #[arg(long, default_value = "2")]
        before: u32,
        /// Days after the end to include
        #[arg(long, default_value = "6")]
        after: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Choose which metrics insights show
    Metric {
        #[command(subcommand)]
        command: MetricCommands,
    },
    /// Find the nearest known city to a coordinate
    City {
        /// Latitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Longitude in degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// View and edit a day's sleep, weather or physical values
    Day {
        #[command(subcommand)]
        command: DayCommands,
    },
    /// Queue nutrition entries and push them to the server
    Nutrition {
        #[command(subcommand)]
        command: NutritionCommands,
    },
    /// Run and schedule background jobs
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
}

#[derive(Subcommand)]
enum MigraineCommands {
    /// Record a migraine
    Log {
        /// Start time (RFC 3339 or "YYYY-MM-DD HH:MM", default: now)
        #[arg(long)]
        start: Option<String>,
        /// End time, if it is over
        #[arg(long)]
        end: Option<String>,
        /// Severity 0-10
        #[arg(short, long)]
        severity: Option<i64>,
        /// Short label
        #[arg(long)]
        label: Option<String>,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List migraines, newest first
    List {
        /// Only those starting on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum EventCommands {
    /// Record an event
    Log {
        /// Category: trigger, medicine, relief, activity, location
        category: String,
        /// What happened, e.g. "Red wine"
        label: String,
        /// When (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Link to a migraine id
        #[arg(long)]
        migraine: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MetricCommands {
    /// Always show a metric
    Enable {
        metric: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Never show a metric
    Disable {
        metric: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Return a metric to automatic selection
    Reset {
        metric: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List metrics and overrides
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DayCommands {
    /// Show the selected value per metric
    Show {
        /// Domain: sleep, weather, physical
        domain: String,
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a manual value; device rows are left alone
    Set {
        /// Domain: sleep, weather, physical
        domain: String,
        /// Metric key, e.g. sleep_duration
        metric: String,
        /// Value
        #[arg(allow_hyphen_values = true)]
        value: f64,
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete manual values for a day
    Clear {
        /// Domain: sleep, weather, physical
        domain: String,
        /// Only this metric (default: the whole domain)
        #[arg(long)]
        metric: Option<String>,
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum NutritionCommands {
    /// Queue a food entry
    Add {
        /// Food name
        food: String,
        /// Entry id (default: generated)
        #[arg(long)]
        id: Option<String>,
        /// When it was eaten (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Meal type, e.g. breakfast
        #[arg(long)]
        meal: Option<String>,
        /// Weight in grams
        #[arg(long)]
        grams: Option<f64>,
        /// Calories (kcal)
        #[arg(long)]
        calories: Option<f64>,
        /// Protein (g)
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs (g)
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat (g)
        #[arg(long)]
        fat: Option<f64>,
        /// Sugar (g)
        #[arg(long)]
        sugar: Option<f64>,
        /// Fiber (g)
        #[arg(long)]
        fiber: Option<f64>,
        /// Sodium (mg)
        #[arg(long)]
        sodium: Option<f64>,
        /// Caffeine (mg)
        #[arg(long)]
        caffeine: Option<f64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Queue deletion of an entry
    Remove {
        /// Entry id
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload queued entries now
    Push {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queued entries
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Platform data the jobs read on this machine.
#[derive(Args)]
struct InputArgs {
    /// App usage export: JSON array of {package, start, end} (default: usage.json in the data dir)
    #[arg(long, value_name = "PATH")]
    usage_file: Option<PathBuf>,
    /// Current latitude
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    /// Current longitude
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    /// Sound levels in dB, comma separated
    #[arg(long, value_delimiter = ',')]
    noise_samples: Vec<f64>,
    /// Nutrition feed export (default: nutrition_feed.json in the data dir)
    #[arg(long, value_name = "PATH")]
    nutrition_feed: Option<PathBuf>,
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// Run one job now
    Run {
        /// ambient_noise, location, nutrition_sync, screen_time or watchdog
        name: String,
        #[command(flatten)]
        inputs: InputArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run every job that is due
    Tick {
        #[command(flatten)]
        inputs: InputArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show enrolled jobs
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enroll a job, or all default jobs
    Enroll {
        /// Job name (default: all default jobs)
        name: Option<String>,
        /// Interval in minutes
        #[arg(long)]
        interval: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a job from the schedule
    Cancel {
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn worker_inputs(args: InputArgs, config: &Config) -> WorkerInputs {
    let default_file = |name: &str| Some(config.input_file(name)).filter(|p| p.exists());
    WorkerInputs {
        usage_file: args.usage_file.or_else(|| default_file("usage.json")),
        lat: args.lat,
        lon: args.lon,
        noise_samples: args.noise_samples,
        nutrition_feed: args
            .nutrition_feed
            .or_else(|| default_file("nutrition_feed.json")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let offset = match cli.utc_offset.as_deref() {
        Some(s) => parse_offset(s)?,
        None => *Local::now().offset(),
    };

    let supabase = match (cli.supabase_url.as_deref(), cli.anon_key.as_deref()) {
        (Some(url), Some(key)) => Some(Arc::new(SupabaseClient::new(url, key)?)),
        _ => None,
    };
    let remote: Box<dyn RemoteStore> = match &supabase {
        Some(client) => Box::new(Arc::clone(client)),
        None => Box::new(Unconfigured),
    };
    let service = AuraService::new(&config.db_path, remote, offset)?;

    let fdc_key = cli.fdc_api_key;
    let food = || fdc_key.as_deref().map(FoodDataClient::new).transpose();

    match cli.command {
        Commands::Login {
            token,
            user_id,
            expires_in,
            email,
            password,
            json,
        } => {
            let args = LoginArgs {
                token,
                user_id,
                expires_in,
                email,
                password,
            };
            cmd_login(&service, supabase.as_deref(), args, json).await
        }
        Commands::Logout { json } => cmd_logout(&service, json),
        Commands::Flags { premium, json } => cmd_flags(&service, premium, json),
        Commands::Migraine { command } => match command {
            MigraineCommands::Log {
                start,
                end,
                severity,
                label,
                notes,
                json,
            } => {
                let args = MigraineArgs {
                    start,
                    end,
                    severity,
                    label,
                    notes,
                };
                cmd_migraine_log(&service, args, json)
            }
            MigraineCommands::List { since, json } => {
                cmd_migraine_list(&service, since.as_deref(), json)
            }
        },
        Commands::Event { command } => match command {
            EventCommands::Log {
                category,
                label,
                at,
                migraine,
                json,
            } => cmd_event_log(
                &service,
                &category,
                &label,
                at.as_deref(),
                migraine.as_deref(),
                json,
            ),
        },
        Commands::Insights {
            migraine,
            before,
            after,
            json,
        } => {
            let window = InsightWindow {
                before_days: before,
                after_days: after,
            };
            cmd_insights(&service, migraine.as_deref(), window, json)
        }
        Commands::Metric { command } => match command {
            MetricCommands::Enable { metric, json } => {
                cmd_metric_set(&service, &metric, true, json)
            }
            MetricCommands::Disable { metric, json } => {
                cmd_metric_set(&service, &metric, false, json)
            }
            MetricCommands::Reset { metric, json } => cmd_metric_reset(&service, &metric, json),
            MetricCommands::List { json } => cmd_metric_list(&service, json),
        },
        Commands::City { lat, lon, json } => cmd_city(&service, lat, lon, json),
        Commands::Day { command } => match command {
            DayCommands::Show { domain, date, json } => {
                cmd_day_show(&service, &domain, date.as_deref(), json)
            }
            DayCommands::Set {
                domain,
                metric,
                value,
                date,
                json,
            } => cmd_day_set(&service, &domain, &metric, value, date.as_deref(), json),
            DayCommands::Clear {
                domain,
                metric,
                date,
                json,
            } => cmd_day_clear(
                &service,
                &domain,
                metric.as_deref(),
                date.as_deref(),
                json,
            ),
        },
        Commands::Nutrition { command } => match command {
            NutritionCommands::Add {
                food,
                id,
                at,
                meal,
                grams,
                calories,
                protein,
                carbs,
                fat,
                sugar,
                fiber,
                sodium,
                caffeine,
                json,
            } => {
                let args = NutritionArgs {
                    food,
                    id,
                    at,
                    meal,
                    grams,
                    calories,
                    protein,
                    carbs,
                    fat,
                    sugar,
                    fiber,
                    sodium,
                    caffeine,
                };
                cmd_nutrition_add(&service, args, json)
            }
            NutritionCommands::Remove { id, json } => cmd_nutrition_remove(&service, &id, json),
            NutritionCommands::Push { json } => {
                let client = food()?;
                let provider = client.as_ref().map(|c| c as &dyn FoodDataProvider);
                cmd_nutrition_push(&service, provider, json)
            }
            NutritionCommands::Pending { json } => cmd_nutrition_pending(&service, json),
        },
        Commands::Worker { command } => match command {
            WorkerCommands::Run { name, inputs, json } => {
                let provider = food()?.map(|c| Box::new(c) as Box<dyn FoodDataProvider>);
                let workers = WorkerSet::new(worker_inputs(inputs, &config), provider);
                cmd_worker_run(&service, &workers, &name, json)
            }
            WorkerCommands::Tick { inputs, json } => {
                let provider = food()?.map(|c| Box::new(c) as Box<dyn FoodDataProvider>);
                let workers = WorkerSet::new(worker_inputs(inputs, &config), provider);
                cmd_worker_tick(&service, &workers, json)
            }
            WorkerCommands::Status { json } => cmd_worker_status(&service, json),
            WorkerCommands::Enroll {
                name,
                interval,
                json,
            } => cmd_worker_enroll(&service, name.as_deref(), interval, json),
            WorkerCommands::Cancel { name, json } => cmd_worker_cancel(&service, &name, json),
        },
    }
}
