// 📥 statement-intake - command-line front end for the import pipeline
//
//   statement-intake import <file> --db <path> [options]
//   statement-intake replace <batch-id> <file> --db <path> [options] [--accept-all | --keep-edits]
//   statement-intake delete-batch <batch-id> --db <path>
//   statement-intake batches --db <path>
//
// Options: --institution NAME, --account-type TYPE, --account ID,
//          --encoding LABEL, --config PATH
//
// Document files (anything that is not .csv/.tsv/.txt) are read as already
// extracted text.

use anyhow::{anyhow, bail, Context, Result};
use statement_intake::{
    delete_batch, AccountType, CommitSummary, IntakeConfig, LedgerStore, PendingMapping, Pipeline,
    PlainTextSource, ReplaceOutcome, ResolverInput, SqliteLedger, StageOutcome, StagedReview,
    TextEncoding,
};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (positional, options) = parse_options(&args)?;

    match positional.first().map(String::as_str) {
        Some("import") => {
            let file = positional.get(1).ok_or_else(|| anyhow!("import needs a file"))?;
            let summary = run_import(Path::new(file), &options)?;
            print_summary(&summary);
        }
        Some("replace") => {
            let batch_id = positional.get(1).ok_or_else(|| anyhow!("replace needs a batch id"))?;
            let file = positional.get(2).ok_or_else(|| anyhow!("replace needs a file"))?;
            let summary = run_replace(batch_id, Path::new(file), &options)?;
            print_summary(&summary);
        }
        Some("delete-batch") => {
            let batch_id = positional.get(1).ok_or_else(|| anyhow!("delete-batch needs a batch id"))?;
            let mut store = open_store(&options)?;
            let summary = delete_batch(&mut store, batch_id)?;
            println!("🗑️  Deleted batch {}", summary.batch_id);
            println!("   transactions: {}", summary.deleted_tx);
            println!("   balances:     {}", summary.deleted_balances);
            println!("   holdings:     {}", summary.deleted_holdings);
            for account in &summary.pruned_accounts {
                println!("   pruned empty account {}", account);
            }
        }
        Some("batches") => {
            let store = open_store(&options)?;
            for batch in store.list_batches()? {
                println!(
                    "{}  {:<10} {}  {}",
                    batch.id,
                    batch.parser_id,
                    batch.created_at.format("%Y-%m-%d %H:%M"),
                    batch.source_file_name
                );
            }
        }
        _ => {
            eprintln!("usage: statement-intake <import|replace|delete-batch|batches> ... --db <path>");
            std::process::exit(2);
        }
    }

    Ok(())
}

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Default)]
struct CliOptions {
    db: Option<PathBuf>,
    config: Option<PathBuf>,
    institution: Option<String>,
    account_type: Option<AccountType>,
    account_id: Option<String>,
    encoding: Option<TextEncoding>,
    accept_all: bool,
    keep_edits: bool,
}

fn parse_options(args: &[String]) -> Result<(Vec<String>, CliOptions)> {
    let mut positional = Vec::new();
    let mut options = CliOptions::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |name: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("{} needs a value", name))
        };
        match arg.as_str() {
            "--db" => options.db = Some(PathBuf::from(value("--db")?)),
            "--config" => options.config = Some(PathBuf::from(value("--config")?)),
            "--institution" => options.institution = Some(value("--institution")?),
            "--account" => options.account_id = Some(value("--account")?),
            "--account-type" => {
                let text = value("--account-type")?;
                let parsed = AccountType::parse(&text)
                    .ok_or_else(|| anyhow!("unknown account type '{}'", text))?;
                options.account_type = Some(parsed);
            }
            "--encoding" => {
                let label = value("--encoding")?;
                let parsed = TextEncoding::from_label(&label)
                    .ok_or_else(|| anyhow!("unknown encoding '{}'", label))?;
                options.encoding = Some(parsed);
            }
            "--accept-all" => options.accept_all = true,
            "--keep-edits" => options.keep_edits = true,
            flag if flag.starts_with("--") => bail!("unknown option {}", flag),
            _ => positional.push(arg.clone()),
        }
    }

    Ok((positional, options))
}

impl CliOptions {
    fn resolver_input(&self) -> ResolverInput {
        ResolverInput {
            institution: self.institution.clone(),
            account_type: self.account_type,
            selected_account_id: self.account_id.clone(),
        }
    }
}

fn open_store(options: &CliOptions) -> Result<SqliteLedger> {
    let db = options.db.as_deref().ok_or_else(|| anyhow!("--db <path> is required"))?;
    SqliteLedger::open(db).with_context(|| format!("opening ledger {}", db.display()))
}

fn pipeline(options: &CliOptions) -> Result<Pipeline> {
    let config = IntakeConfig::load_or_default(options.config.as_deref())
        .context("loading configuration")?;
    Ok(Pipeline::new(config))
}

// ============================================================================
// COMMANDS
// ============================================================================

fn stage_file(pipeline: &Pipeline, file: &Path, options: &CliOptions) -> Result<StagedReview> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let review = match pipeline.stage(&file_name, &bytes, options.encoding, &PlainTextSource)? {
        StageOutcome::Staged(review) => review,
        StageOutcome::NeedsMapping(pending) => finish_with_suggestions(pipeline, &pending)?,
    };

    println!(
        "📂 {}: parser '{}', {} transactions, {} balances, {} holdings (confidence: {})",
        file_name,
        review.import.parser_id,
        review.import.transactions.len(),
        review.import.balances.len(),
        review.import.holdings.len(),
        review.confidence.as_str()
    );
    for warning in &review.warnings {
        println!("⚠️  {}", warning);
    }
    Ok(review)
}

/// Without an interactive reviewer the suggested mapping is the only option.
fn finish_with_suggestions(pipeline: &Pipeline, pending: &PendingMapping) -> Result<StagedReview> {
    println!("🧭 {}", pending.reason);
    for (field, column) in &pending.session.mapping().columns {
        let header = pending.session.headers().get(*column).map(String::as_str).unwrap_or("?");
        println!("   {} ← {}", field.as_str(), header);
    }
    if !pending.session.mapping().is_complete() {
        let missing: Vec<&str> = pending
            .session
            .mapping()
            .missing_required()
            .iter()
            .map(|f| f.as_str())
            .collect();
        bail!("cannot map required columns: {}", missing.join(", "));
    }
    pipeline
        .finish_mapping(pending)
        .context("parsing with suggested column mapping")
}

fn run_import(file: &Path, options: &CliOptions) -> Result<CommitSummary> {
    let pipeline = pipeline(options)?;
    let mut store = open_store(options)?;
    let review = stage_file(&pipeline, file, options)?;
    let summary = pipeline.commit(&mut store, review, &options.resolver_input())?;
    info!(batch = %summary.batch_id, "import finished");
    Ok(summary)
}

fn run_replace(batch_id: &str, file: &Path, options: &CliOptions) -> Result<CommitSummary> {
    let pipeline = pipeline(options)?;
    let mut store = open_store(options)?;
    let review = stage_file(&pipeline, file, options)?;

    match pipeline.replace(&mut store, batch_id, review, &options.resolver_input())? {
        ReplaceOutcome::Committed(summary) => Ok(summary),
        ReplaceOutcome::ConflictsPending(pending) => {
            println!("✋ {} edited transaction(s) differ from the file:", pending.conflicts().len());
            for conflict in pending.conflicts() {
                println!(
                    "   {}  ledger: {} {} {}  file: {} {} {}",
                    conflict.key(),
                    conflict.existing.date,
                    conflict.existing.amount,
                    conflict.existing.payee,
                    conflict.staged.date,
                    conflict.staged.amount,
                    conflict.staged.payee
                );
            }

            let accepted: Vec<String> = if options.accept_all {
                pending.conflicts().iter().map(|c| c.key().to_string()).collect()
            } else if options.keep_edits {
                Vec::new()
            } else {
                bail!("re-run with --accept-all or --keep-edits to finish the replace");
            };
            Ok(pending.resolve(&mut store, &accepted, pipeline.config())?)
        }
    }
}

fn print_summary(summary: &CommitSummary) {
    println!("\n✅ Batch {}", summary.batch_id);
    println!(
        "   transactions: +{} ~{} -{}",
        summary.inserted_tx, summary.updated_tx, summary.deleted_tx
    );
    println!(
        "   balances:     +{} ~{} -{}",
        summary.inserted_balances, summary.updated_balances, summary.deleted_balances
    );
    println!(
        "   holdings:     +{} ~{} -{}",
        summary.inserted_holdings, summary.updated_holdings, summary.deleted_holdings
    );
    if summary.transfers_linked > 0 {
        println!("   transfers linked: {}", summary.transfers_linked);
    }
}
