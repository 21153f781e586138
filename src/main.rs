use clap::{Parser, Subcommand, ValueEnum};
use recordtree::{
    Engine, FieldPath, FileStore, Pipeline, PipelineSpec, RecordTree, Result, cdx, dedup,
    diagnostics, export,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "recordtree")]
#[command(about = "Lazy enrichment of archived web records", long_about = None)]
struct Cli {
    /// Log derivation details (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(clap::Args)]
struct Inputs {
    /// CDX index file.
    #[arg(long)]
    cdx: String,

    /// Pipeline definition (JSON).
    #[arg(long)]
    pipeline: String,

    /// Directory holding the container files named in the CDX.
    #[arg(long, default_value = ".")]
    data_dir: String,

    /// Keep one record per key (earliest capture wins).
    #[arg(long, value_enum)]
    dedup: Option<DedupKey>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline and list its steps.
    Steps {
        #[arg(long)]
        pipeline: String,
    },

    /// Print the first records, enriched with the requested fields, as JSON.
    Peek {
        #[command(flatten)]
        inputs: Inputs,

        #[arg(long)]
        field: Vec<String>,

        #[arg(long, default_value_t = 1)]
        limit: usize,
    },

    /// Enrich every record and export the requested fields.
    Export {
        #[command(flatten)]
        inputs: Inputs,

        #[arg(long, required = true)]
        field: Vec<String>,

        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,

        #[arg(short = 'o', long)]
        out: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Tsv,
}

#[derive(Clone, Copy, ValueEnum)]
enum DedupKey {
    Digest,
    Url,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.cmd {
        Commands::Steps { pipeline } => {
            let pipeline = PipelineSpec::from_file(&pipeline)?.validate_and_build()?;
            for f in pipeline.functions() {
                let kind = if f.is_multi() { "multi" } else { "single" };
                println!("{}\t{}\t<- {}", f.result_path(), kind, f.dependency());
            }
        }

        Commands::Peek {
            inputs,
            field,
            limit,
        } => {
            let fields = parse_fields(&field)?;
            let trees = run(&inputs, &fields, Some(limit))?;
            for tree in trees.iter().take(limit) {
                println!("{}", export::peek(tree)?);
            }
        }

        Commands::Export {
            inputs,
            field,
            format,
            out,
        } => {
            let fields = parse_fields(&field)?;
            let trees = run(&inputs, &fields, None)?;

            let mut writer: Box<dyn Write> = match &out {
                Some(path) => Box::new(BufWriter::new(File::create(path)?)),
                None => Box::new(BufWriter::new(std::io::stdout().lock())),
            };
            match format {
                Format::Json => export::write_json_lines(&trees, &mut writer)?,
                Format::Tsv => export::write_delimited(&trees, &fields, '\t', &mut writer)?,
            }
            writer.flush()?;
            if let Some(path) = out {
                eprintln!("Wrote {} records to {}", trees.len(), path);
            }
        }
    }

    Ok(())
}

fn parse_fields(raw: &[String]) -> Result<Vec<FieldPath>> {
    raw.iter()
        .map(|s| {
            s.parse::<FieldPath>().map_err(|e| {
                anyhow::anyhow!(diagnostics::error_message(format!("bad field {:?}: {}", s, e)))
            })
        })
        .collect()
}

/// Load, optionally dedup, then materialize each requested field in turn.
fn run(inputs: &Inputs, fields: &[FieldPath], limit: Option<usize>) -> Result<Vec<RecordTree>> {
    // 1) Parse + validate the pipeline before touching any data.
    let pipeline: Pipeline = PipelineSpec::from_file(&inputs.pipeline)?.validate_and_build()?;
    for field in fields {
        if !(field.is_payload() || field.is_record_field()) {
            pipeline.chain(field).map_err(|e| {
                anyhow::anyhow!(diagnostics::error_message(format!("field {}: {}", field, e)))
            })?;
        }
    }

    // 2) Metadata.
    let records = cdx::parse_cdx_file(&inputs.cdx)?;
    let mut trees: Vec<RecordTree> = records.into_iter().map(RecordTree::new).collect();

    if let Some(key) = inputs.dedup {
        trees = match key {
            DedupKey::Digest => dedup::dedup(trees, dedup::digest_key, dedup::earliest_timestamp),
            DedupKey::Url => dedup::dedup(trees, dedup::url_key, dedup::earliest_timestamp),
        };
    }
    if let Some(limit) = limit {
        trees.truncate(limit);
    }

    // 3) Derive.
    let store = FileStore::new(&inputs.data_dir);
    let engine = Engine::new(&pipeline, &store);
    for field in fields {
        trees = engine.enrich_collection_path(&mut trees, field)?;
    }

    Ok(trees)
}
