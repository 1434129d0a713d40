//! bom2pic - extract row-named images from xlsx workbooks
//!
//! Usage:
//!   bom2pic extract parts.xlsx --image-column A --name-column C --out images.zip
//!   bom2pic plans

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bom2pic_core::{
    process_batch, Account, BatchRequest, Bom2PicError, InMemoryUsageStore, PlanCatalog, QuotaGate, Result,
    Settings, SheetScope, StaticPlanCatalog, UploadedFile, UsagePeriod, UsageStore,
};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bom2pic", version, about = "Extract row-named images from xlsx workbooks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract images into a zip archive
    Extract(ExtractArgs),
    /// List the plan catalog
    Plans {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Extract(args) => cmd_extract(&args),
        Commands::Plans { json } => cmd_plans(json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error ({}): {}", e.status_class().http_status(), e.detail());
            match e {
                Bom2PicError::QuotaExceeded(_) => ExitCode::from(3),
                Bom2PicError::InvalidRequest(_) | Bom2PicError::InvalidColumnReference(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

#[derive(Args)]
struct ExtractArgs {
    /// Workbooks to read
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Column the pictures are anchored in
    #[arg(long, short = 'i')]
    image_column: String,
    /// Column holding each row's name
    #[arg(long, short = 'n')]
    name_column: String,
    /// Output archive
    #[arg(long, short = 'o', default_value = "images.zip")]
    out: PathBuf,
    /// Requested plan (honored only when overrides are allowed)
    #[arg(long)]
    plan: Option<String>,
    /// Account the request is billed to
    #[arg(long)]
    account: Option<String>,
    /// Plan stored for the account
    #[arg(long, requires = "account")]
    account_plan: Option<String>,
    /// Usage already recorded for the account this month
    #[arg(long, requires = "account", default_value_t = 0)]
    usage: u64,
    /// Settings file (JSON); BOM2PIC_* variables are used otherwise
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sheets to scan: all or first
    #[arg(long)]
    sheet_scope: Option<String>,
    /// Allow --plan to override the account plan
    #[arg(long)]
    allow_plan_override: bool,
    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn load_settings(args: &ExtractArgs) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_json_str(&std::fs::read_to_string(path)?)?,
        None => Settings::from_env()?,
    };
    if let Some(scope) = &args.sheet_scope {
        settings.sheet_scope = scope.parse::<SheetScope>()?;
    }
    if args.allow_plan_override {
        settings.allow_plan_override = true;
    }
    Ok(settings)
}

fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Directory the archive is staged in, so the final rename stays on one filesystem.
fn staging_dir(out: &Path) -> &Path {
    match out.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn cmd_extract(args: &ExtractArgs) -> Result<()> {
    let settings = load_settings(args)?;

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        files.push(UploadedFile::new(upload_name(path), std::fs::read(path)?));
    }

    let store = InMemoryUsageStore::new();
    let period = UsagePeriod::current();
    if let Some(account) = &args.account {
        store.set_usage(account, &period, args.usage)?;
    }
    let gate = QuotaGate::with_period(&store, period.clone());

    let request = BatchRequest {
        files: &files,
        image_column: &args.image_column,
        name_column: &args.name_column,
        account: args.account.as_deref().map(|id| Account {
            id,
            plan: args.account_plan.as_deref(),
        }),
        override_plan: args.plan.as_deref(),
    };

    // A rejected request leaves any existing archive at `out` untouched.
    let staging = tempfile::NamedTempFile::new_in(staging_dir(&args.out))?;
    let result = process_batch(
        &request,
        &settings,
        &StaticPlanCatalog::default(),
        &gate,
        BufWriter::new(staging),
    )?;
    let staging = result
        .writer
        .into_inner()
        .map_err(|e| Bom2PicError::Io(e.into_error()))?;
    staging.as_file().sync_all()?;
    staging.persist(&args.out).map_err(|e| Bom2PicError::Io(e.error))?;

    let summary = &result.summary;
    if args.json {
        let body = serde_json::json!({
            "summary": summary,
            "plan_source": result.plan_source,
            "archive": args.out.display().to_string(),
            "diagnostics": result
                .diagnostics
                .iter()
                .map(|d| serde_json::json!({"file": d.file, "diagnostic": d.diagnostic}))
                .collect::<Vec<_>>(),
            "failures": result
                .failures
                .iter()
                .map(|f| serde_json::json!({"file": f.file, "reason": f.reason}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        println!("Wrote {}", args.out.display());
        println!(
            "plan {}: processed {}, saved {}, duplicate {}, requested {}{}",
            summary.plan,
            summary.processed,
            summary.saved,
            summary.duplicate,
            summary.requested,
            if summary.truncated { " (truncated by per-file limit)" } else { "" }
        );
        for failure in &result.failures {
            println!("  skipped {}: {}", failure.file, failure.reason);
        }
        for item in &result.diagnostics {
            println!("  {}: {}", item.file, item.diagnostic);
        }
        if let Some(account) = &args.account {
            println!("usage for {} in {}: {}", account, period, store.get_usage(account, &period)?);
        }
    }

    Ok(())
}

fn cmd_plans(json: bool) -> Result<()> {
    let catalog = StaticPlanCatalog::default();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(catalog.plans()).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{:<10} {:>10} {:>10}", "plan", "per file", "monthly");
    for plan in catalog.plans() {
        println!(
            "{:<10} {:>10} {:>10}",
            plan.id,
            plan.per_file_limit.to_string(),
            plan.monthly_quota.to_string()
        );
    }
    println!(
        "anonymous requests use '{}', unknown account plans fall back to '{}'",
        catalog.anonymous_plan().id,
        catalog.account_fallback_plan().id
    );
    Ok(())
}
