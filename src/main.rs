//! Command-line word sketch extraction
//!
//! Runs one batch over a CoNLL-U corpus and prints the ranked sketch of a
//! headword. Set `RUST_LOG` to control log output (written to stderr).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wordsketch::accessibility::NoNorms;
use wordsketch::{
    BatchStatus, CancelToken, Corpus, EngineConfig, GrammarSet, MemoryStore, NormLookup,
    NormTable, Pipeline, SentenceSelection, SketchQuery,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "wordsketch", about = "Extract and rank collocations from a tagged corpus")]
struct Args {
    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sketch grammar set (JSON)
    #[arg(short, long)]
    grammars: PathBuf,

    /// CoNLL-U corpus files, as a glob pattern
    #[arg(short, long)]
    corpus: String,

    /// Frequency norms: lemma, pos, fpm and optional diversity, tab separated
    #[arg(long)]
    norms: Option<PathBuf>,

    /// Headword lemma to sketch
    #[arg(long)]
    headword: String,

    /// Only records whose headword has this POS
    #[arg(long)]
    pos: Option<String>,

    /// Only records of this relation
    #[arg(long)]
    relation: Option<String>,

    /// Minimum logDice score
    #[arg(long)]
    min_score: Option<f64>,

    #[arg(long, default_value_t = wordsketch::query::DEFAULT_LIMIT)]
    limit: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "wordsketch=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let grammars = GrammarSet::from_json_file(&args.grammars)?;

    let corpus = Corpus::from_glob(&args.corpus)
        .with_context(|| format!("invalid corpus pattern {}", args.corpus))?;
    if corpus.paths().is_empty() {
        bail!("no corpus files match {}", args.corpus);
    }
    tracing::info!(files = corpus.paths().len(), "corpus opened");

    let norms: Arc<dyn NormLookup> = match &args.norms {
        Some(path) => Arc::new(NormTable::from_tsv_file(path)?),
        None => Arc::new(NoNorms),
    };

    let store = Arc::new(MemoryStore::with_timeout(config.store_timeout()));
    let pipeline = Pipeline::new(config, &grammars, store, norms)?;

    let batch = pipeline.create_batch(SentenceSelection::All);
    let batch = pipeline.run_batch(batch.batch_id, &corpus, &CancelToken::new())?;
    if batch.status == BatchStatus::Failed {
        let reason = batch
            .error_summary
            .and_then(|s| s.error)
            .unwrap_or_else(|| "unknown error".to_string());
        bail!("batch {} failed: {}", batch.batch_id, reason);
    }
    if let Some(summary) = &batch.error_summary {
        tracing::warn!(skipped = summary.skipped, "some sentences were skipped");
    }

    let mut query = SketchQuery::new(&args.headword).limit(args.limit);
    if let Some(pos) = &args.pos {
        query = query.pos(pos);
    }
    if let Some(relation) = &args.relation {
        query = query.relation(relation);
    }
    if let Some(min_score) = args.min_score {
        query = query.min_score(min_score);
    }

    let records = pipeline.get_sketch(&query)?;
    println!(
        "{:<16} {:<20} {:<6} {:>8} {:>8} {:>8} {:>8}  examples",
        "relation", "collocate", "pos", "freq", "logDice", "MI", "t"
    );
    for r in &records {
        let examples: Vec<String> = r.example_sentence_ids.iter().map(u64::to_string).collect();
        println!(
            "{:<16} {:<20} {:<6} {:>8} {:>8.2} {:>8.2} {:>8.2}  {}",
            r.relation_name,
            r.collocate_lemma,
            r.collocate_pos,
            r.frequency,
            r.logdice_score,
            r.mutual_information,
            r.t_score,
            examples.join(",")
        );
    }

    if let Some(pos) = &args.pos {
        if let Some(score) = pipeline.accessibility(&args.headword, pos)? {
            println!(
                "\naccessibility of {}/{}: {:.3}{}",
                score.lemma,
                score.pos,
                score.accessibility_score,
                if score.corpus_only { " (corpus only)" } else { "" }
            );
        }
    }

    Ok(())
}
