use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use kira_pathmap::align::SampleAlignment;
use kira_pathmap::annotate::{CollisionPolicy, reannotate};
use kira_pathmap::config::{ConfigLoader, LayerRequest};
use kira_pathmap::conversion::{ConversionTable, normalize};
use kira_pathmap::coverage::{MinCoverage, filter_by_coverage, multi_omics_coverage};
use kira_pathmap::domain::{ChebiId, CompoundName, InputType, MoleculeId, OmicsType, Organism, PathwayId, SampleId};
use kira_pathmap::error::KiraError;
use kira_pathmap::matrix::{AbundanceMatrix, ColumnKey, TableLayout, read_table, write_table};
use kira_pathmap::output::{JsonOutput, LogProgress};
use kira_pathmap::pathways::{LoadOptions, LoadSource, PathwayDatabase, PathwayLoader, ReactomeHttpClient};
use kira_pathmap::pipeline::{Pipeline, ProgressSink, read_conversion_table};
use kira_pathmap::resolver::{MetaboAnalystClient, NameResolver, TableResolver, build_conversion_table};
use kira_pathmap::simulate::{EffectType, InputScale, SimulationOptions, simulate};
use kira_pathmap::store::{PathwayMetadata, Store};

#[derive(Parser)]
#[command(name = "kira-pathmap")]
#[command(about = "Identifier mapping and pathway coverage for multi-omics tables")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Print results as JSON on stdout")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve compound names to ChEBI ids")]
    Resolve(ResolveArgs),
    #[command(about = "Re-annotate a metabolite matrix with ChEBI ids")]
    Annotate(AnnotateArgs),
    #[command(about = "Manage cached pathway databases")]
    Pathways(PathwaysArgs),
    #[command(about = "Filter pathways by dataset coverage")]
    Coverage(CoverageArgs),
    #[command(about = "Restrict omics layers to their common samples")]
    Align(AlignArgs),
    #[command(about = "Build semi-synthetic data with enriched pathways")]
    Simulate(SimulateArgs),
    #[command(about = "Run the whole pipeline from kira-pathmap.json")]
    Run(RunArgs),
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(help = "Compound names to resolve")]
    names: Vec<String>,

    #[arg(long, help = "File with one compound name per line")]
    names_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = InputType::Name)]
    input_type: InputType,

    #[arg(long, help = "Serve names from a stored conversion table instead of the web service")]
    from_table: Option<PathBuf>,

    #[arg(long, help = "Write the conversion table as CSV")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct AnnotateArgs {
    #[arg(help = "Matrix with samples as rows and compounds as columns")]
    matrix: PathBuf,

    #[arg(long, help = "Conversion table CSV (query,chebi,comment)")]
    conversion: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = InputType::Name)]
    input_type: InputType,

    #[arg(long, value_enum, default_value_t = CollisionPolicy::KeepFirst)]
    policy: CollisionPolicy,

    #[arg(long)]
    sample_column: Option<String>,

    #[arg(long = "metadata-column")]
    metadata_columns: Vec<String>,

    #[arg(long, help = "Columns are already ChEBI ids")]
    chebi_columns: bool,

    #[arg(long)]
    output: PathBuf,
}

#[derive(Args)]
struct PathwaysArgs {
    #[command(subcommand)]
    command: PathwaysCommand,
}

#[derive(Subcommand)]
enum PathwaysCommand {
    #[command(about = "Download or reuse a Reactome pathway database")]
    Fetch(FetchArgs),
    #[command(about = "List cached pathway databases")]
    List,
    #[command(about = "Delete the pathway cache")]
    Clear,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long, default_value = "Homo sapiens")]
    organism: String,

    #[arg(long, value_enum)]
    omics: Vec<OmicsType>,

    #[arg(long, help = "Replace the cached copy with the current release")]
    download_latest: bool,
}

#[derive(Args)]
struct LayerArgs {
    #[arg(long = "layer", required = true, help = "Layers as `<omics>:<path>`")]
    layers: Vec<String>,

    #[arg(long)]
    sample_column: Option<String>,

    #[arg(long = "metadata-column", help = "Non-numeric column present in every layer, e.g. a group label")]
    metadata_columns: Vec<String>,
}

#[derive(Args)]
struct CoverageArgs {
    #[command(flatten)]
    layers: LayerArgs,

    #[arg(long, help = "Local GMT or Reactome export; the cache is used when absent")]
    pathways: Option<PathBuf>,

    #[arg(long, default_value = "Homo sapiens")]
    organism: String,

    #[arg(long, default_value_t = 3)]
    min_coverage: i64,

    #[arg(long, help = "Write the filtered database as GMT")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct AlignArgs {
    #[command(flatten)]
    layers: LayerArgs,

    #[arg(long)]
    output_dir: PathBuf,

    #[arg(long, help = "Z-score every column after alignment")]
    standardize: bool,
}

#[derive(Args)]
struct SimulateArgs {
    #[command(flatten)]
    layers: LayerArgs,

    #[arg(long, help = "Local GMT or Reactome export; the cache is used when absent")]
    pathways: Option<PathBuf>,

    #[arg(long, default_value = "Homo sapiens")]
    organism: String,

    #[arg(long = "enrich", required = true, help = "Pathway whose members get the effect")]
    enrich: Vec<String>,

    #[arg(long = "effect", required = true, allow_negative_numbers = true, help = "Effect per synthetic cluster")]
    effects: Vec<f64>,

    #[arg(long, value_enum, default_value_t = EffectType::Var)]
    effect_type: EffectType,

    #[arg(long, value_enum, default_value_t = InputScale::Log)]
    scale: InputScale,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    output_dir: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    organism: Option<String>,

    #[arg(long)]
    min_coverage: Option<i64>,

    #[arg(long, value_enum)]
    policy: Option<CollisionPolicy>,

    #[arg(long)]
    download_latest: bool,

    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct AnnotateResult {
    output: String,
    input_columns: usize,
    annotated_columns: usize,
    dropped: Vec<String>,
    collisions: Vec<kira_pathmap::annotate::Collision>,
}

#[derive(Serialize)]
struct FetchResult {
    items: Vec<FetchItem>,
}

#[derive(Serialize)]
struct FetchItem {
    organism: String,
    omics: OmicsType,
    source: LoadSource,
    pathways: usize,
    cache_path: String,
}

#[derive(Serialize)]
struct ListResult {
    cache_root: String,
    databases: Vec<PathwayMetadata>,
}

#[derive(Serialize)]
struct CoverageResult {
    min_coverage: MinCoverage,
    total: usize,
    kept: usize,
    coverage: BTreeMap<PathwayId, usize>,
    output: Option<String>,
}

#[derive(Serialize)]
struct AlignResult {
    samples: Vec<SampleId>,
    outputs: Vec<String>,
}

#[derive(Serialize)]
struct SimulateResult {
    samples: Vec<SampleId>,
    labels: Vec<usize>,
    enriched_molecules: usize,
    outputs: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::ResolutionHttp(_)
        | KiraError::ResolutionStatus { .. }
        | KiraError::ResolutionFailure(_)
        | KiraError::PathwayHttp(_)
        | KiraError::PathwayStatus { .. } => 3,
        KiraError::NoCommonSamples { .. } => 4,
        KiraError::Filesystem(_) | KiraError::TableWrite { .. } => 1,
        _ => 2,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sink: &dyn ProgressSink = if cli.json { &JsonOutput } else { &LogProgress };

    match cli.command {
        Commands::Resolve(args) => run_resolve(args, cli.json),
        Commands::Annotate(args) => run_annotate(args, cli.json),
        Commands::Pathways(args) => run_pathways(args, cli.json),
        Commands::Coverage(args) => run_coverage(args, cli.json),
        Commands::Align(args) => run_align(args, cli.json),
        Commands::Simulate(args) => run_simulate(args, cli.json),
        Commands::Run(args) => run_pipeline(args, cli.json, sink),
    }
}

fn run_resolve(args: ResolveArgs, json: bool) -> miette::Result<()> {
    let mut raw = args.names;
    if let Some(path) = &args.names_file {
        let content = fs::read_to_string(path).map_err(|err| KiraError::TableRead {
            path: path.clone(),
            message: err.to_string(),
        })?;
        raw.extend(
            content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string),
        );
    }
    let names = raw
        .iter()
        .map(|name| name.parse::<CompoundName>())
        .collect::<Result<Vec<_>, KiraError>>()?;

    let resolver: Box<dyn NameResolver> = match &args.from_table {
        Some(path) => Box::new(TableResolver::new(&read_conversion_table(path)?)),
        None => Box::new(MetaboAnalystClient::new()?),
    };
    let table = build_conversion_table(resolver.as_ref(), &names, args.input_type)?;

    if let Some(path) = &args.output {
        write_conversion(path, &table)?;
    }
    if json {
        JsonOutput::print(&table).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    } else if args.output.is_none() {
        table.write_csv(io::stdout())?;
    } else {
        let confirmed = normalize(&table).len();
        println!("resolved {confirmed}/{} names", table.len());
    }
    Ok(())
}

fn run_annotate(args: AnnotateArgs, json: bool) -> miette::Result<()> {
    let mut layout = TableLayout::for_path(&args.matrix);
    layout.sample_column = args.sample_column.clone();
    layout.metadata_columns = args.metadata_columns.clone();
    let table = read_table(&args.matrix, &layout)?;
    let input_columns = table.matrix.n_columns();

    let reannotation = if args.chebi_columns {
        let matrix = table.matrix.try_map_columns(|column| column.parse::<ChebiId>())?;
        let conversion = match &args.conversion {
            Some(path) => read_conversion_table(path)?,
            None => {
                return Err(KiraError::InvalidConfig(
                    "--conversion is required with --chebi-columns".to_string(),
                )
                .into());
            }
        };
        reannotate(&matrix, &normalize(&conversion), args.policy)?
    } else {
        let matrix = table
            .matrix
            .try_map_columns(|column| column.parse::<CompoundName>())?;
        let conversion = match &args.conversion {
            Some(path) => build_conversion_table(
                &TableResolver::new(&read_conversion_table(path)?),
                matrix.columns(),
                args.input_type,
            )?,
            None => build_conversion_table(
                &MetaboAnalystClient::new()?,
                matrix.columns(),
                args.input_type,
            )?,
        };
        reannotate(&matrix, &normalize(&conversion), args.policy)?
    };

    let file = File::create(&args.output).map_err(|err| KiraError::TableWrite {
        path: args.output.clone(),
        message: err.to_string(),
    })?;
    write_table(file, &reannotation.matrix, Some(&table.metadata), &layout)?;

    let result = AnnotateResult {
        output: args.output.display().to_string(),
        input_columns,
        annotated_columns: reannotation.matrix.n_columns(),
        dropped: reannotation.dropped,
        collisions: reannotation.collisions,
    };
    if json {
        JsonOutput::print(&result).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    } else {
        println!(
            "annotated {}/{} columns ({} dropped, {} collisions) -> {}",
            result.annotated_columns,
            result.input_columns,
            result.dropped.len(),
            result.collisions.len(),
            result.output
        );
    }
    Ok(())
}

fn run_pathways(args: PathwaysArgs, json: bool) -> miette::Result<()> {
    let store = Store::new()?;
    match args.command {
        PathwaysCommand::Fetch(args) => {
            let organism: Organism = args.organism.parse()?;
            let loader = PathwayLoader::new(store, ReactomeHttpClient::new()?);
            let omics = if args.omics.is_empty() {
                vec![OmicsType::Metabolomics, OmicsType::Proteomics]
            } else {
                args.omics
            };
            let mut items = Vec::new();
            for omics in omics {
                let loaded = loader.load(
                    &organism,
                    omics,
                    LoadOptions {
                        download_latest: args.download_latest,
                    },
                )?;
                items.push(FetchItem {
                    organism: organism.to_string(),
                    omics,
                    source: loaded.source,
                    pathways: loaded.database.len(),
                    cache_path: loaded.cache_path.to_string(),
                });
            }
            let result = FetchResult { items };
            if json {
                JsonOutput::print(&result).map_err(|err| KiraError::Filesystem(err.to_string()))?;
            } else {
                for item in &result.items {
                    println!(
                        "{} {} pathways={} source={:?} -> {}",
                        item.organism, item.omics, item.pathways, item.source, item.cache_path
                    );
                }
            }
        }
        PathwaysCommand::List => {
            let result = ListResult {
                cache_root: store.cache_root().to_string(),
                databases: store.list_pathway_metadata()?,
            };
            if json {
                JsonOutput::print(&result).map_err(|err| KiraError::Filesystem(err.to_string()))?;
            } else if result.databases.is_empty() {
                println!("no cached pathway databases in {}", result.cache_root);
            } else {
                for entry in &result.databases {
                    println!(
                        "{} {} pathways={} downloaded_at={} -> {}",
                        entry.organism,
                        entry.omics,
                        entry.pathways,
                        entry.downloaded_at,
                        entry.resolved_path
                    );
                }
            }
        }
        PathwaysCommand::Clear => {
            store.clear_cache()?;
            if json {
                JsonOutput::print(&serde_json::json!({ "cleared": store.cache_root().as_str() }))
                    .map_err(|err| KiraError::Filesystem(err.to_string()))?;
            } else {
                println!("cleared {}", store.cache_root());
            }
        }
    }
    Ok(())
}

fn run_coverage(args: CoverageArgs, json: bool) -> miette::Result<()> {
    let k = MinCoverage::new(args.min_coverage)?;
    let organism: Organism = args.organism.parse()?;
    let requests = parse_layers(&args.layers)?;
    let layers = read_molecule_layers(&requests)?;
    let database = load_database(args.pathways.as_deref(), &organism, &requests)?;

    let filtered = filter_by_coverage(
        &database,
        layers.iter().flat_map(|layer| layer.columns()),
        k,
    );
    let coverage = multi_omics_coverage(&filtered, layers.iter().map(|layer| layer.columns()));
    if let Some(path) = &args.output {
        let utf8 = Utf8PathBuf::from_path_buf(path.clone()).map_err(|path| {
            KiraError::Filesystem(format!("output path is not UTF-8: {}", path.display()))
        })?;
        Store::write_bytes_atomic(&utf8, &filtered.to_gmt_bytes()?)?;
    }

    let result = CoverageResult {
        min_coverage: k,
        total: database.len(),
        kept: filtered.len(),
        coverage,
        output: args.output.as_ref().map(|path| path.display().to_string()),
    };
    if json {
        JsonOutput::print(&result).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    } else {
        println!("kept {}/{} pathways with coverage >= {k}", result.kept, result.total);
        for (id, covered) in &result.coverage {
            let name = filtered.get(id).map(|p| p.name.as_str()).unwrap_or_default();
            println!("{id}\t{covered}\t{name}");
        }
    }
    Ok(())
}

fn run_align(args: AlignArgs, json: bool) -> miette::Result<()> {
    let requests = parse_layers(&args.layers)?;
    let tables = requests
        .iter()
        .map(|request| read_table(&request.path, &request.layout))
        .collect::<Result<Vec<_>, KiraError>>()?;
    let samples: Vec<&[SampleId]> = tables.iter().map(|table| table.matrix.samples()).collect();
    let alignment = SampleAlignment::from_layers(&samples)?;

    let mut outputs = Vec::new();
    for (request, table) in requests.iter().zip(&tables) {
        let mut matrix = alignment.restrict(&table.matrix);
        if args.standardize {
            matrix = matrix.standardized();
        }
        let metadata = alignment.restrict_metadata(&table.metadata);
        let layout = TableLayout {
            delimiter: b',',
            ..request.layout.clone()
        };
        let path = args.output_dir.join(format!("{}.aligned.csv", request.name));
        write_layer(&path, &matrix, &metadata, &layout)?;
        outputs.push(path.display().to_string());
    }

    let result = AlignResult {
        samples: alignment.samples().to_vec(),
        outputs,
    };
    if json {
        JsonOutput::print(&result).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    } else {
        println!("{} common samples across {} layers", result.samples.len(), requests.len());
        for output in &result.outputs {
            println!("  {output}");
        }
    }
    Ok(())
}

fn run_simulate(args: SimulateArgs, json: bool) -> miette::Result<()> {
    let organism: Organism = args.organism.parse()?;
    let enrich = args
        .enrich
        .iter()
        .map(|id| id.parse::<PathwayId>())
        .collect::<Result<Vec<_>, KiraError>>()?;
    let requests = parse_layers(&args.layers)?;
    let layers = read_molecule_layers(&requests)?;
    let database = load_database(args.pathways.as_deref(), &organism, &requests)?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let options = SimulationOptions {
        effect_sizes: args.effects,
        effect_type: args.effect_type,
        scale: args.scale,
    };
    let simulation = simulate(&layers, &database, &enrich, &options, &mut rng)?;
    let metadata = simulation.metadata()?;

    let mut outputs = Vec::new();
    for (request, matrix) in requests.iter().zip(&simulation.layers) {
        let layout = TableLayout {
            delimiter: b',',
            ..request.layout.clone()
        };
        let path = args.output_dir.join(format!("{}.simulated.csv", request.name));
        write_layer(&path, matrix, &metadata, &layout)?;
        outputs.push(path.display().to_string());
    }

    let result = SimulateResult {
        samples: simulation.alignment.samples().to_vec(),
        labels: simulation.labels,
        enriched_molecules: simulation.enriched.len(),
        outputs,
    };
    if json {
        JsonOutput::print(&result).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    } else {
        println!(
            "{} samples in {} clusters, {} enriched molecules",
            result.samples.len(),
            options.effect_sizes.len(),
            result.enriched_molecules
        );
        for output in &result.outputs {
            println!("  {output}");
        }
    }
    Ok(())
}

fn run_pipeline(args: RunArgs, json: bool, sink: &dyn ProgressSink) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    if let Some(organism) = &args.organism {
        config.organism = organism.parse()?;
    }
    if let Some(k) = args.min_coverage {
        config.min_coverage = MinCoverage::new(k)?;
    }
    if let Some(policy) = args.policy {
        config.collision_policy = policy;
    }
    if args.download_latest {
        config.download_latest = true;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    let loader = PathwayLoader::new(Store::new()?, ReactomeHttpClient::new()?);
    let pipeline = Pipeline::new(MetaboAnalystClient::new()?, loader);
    let result = pipeline.run(&config, sink)?;

    if json {
        JsonOutput::print(&result).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    } else {
        for layer in &result.layers {
            println!(
                "{} [{}]: {}/{} columns, {} collisions, {} pathways covered",
                layer.name,
                layer.omics,
                layer.annotated_columns,
                layer.input_columns,
                layer.collisions.len(),
                layer.pathways_covered
            );
        }
        println!(
            "pathways kept: {}/{} (k={}), aligned samples: {}",
            result.pathways.kept,
            result.pathways.loaded,
            result.min_coverage,
            result.aligned_samples.len()
        );
        println!("outputs written to {}", config.output_dir.display());
    }
    Ok(())
}

// Repeated file stems get an index suffix so output names stay unique.
fn parse_layers(args: &LayerArgs) -> Result<Vec<LayerRequest>, KiraError> {
    let mut requests = args
        .layers
        .iter()
        .map(|value| {
            value
                .parse::<LayerRequest>()
                .map(|request| request.with_columns(args.sample_column.clone(), &args.metadata_columns))
        })
        .collect::<Result<Vec<_>, KiraError>>()?;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for request in &requests {
        *counts.entry(request.name.clone()).or_default() += 1;
    }
    for (idx, request) in requests.iter_mut().enumerate() {
        if counts.get(&request.name).copied().unwrap_or(0) > 1 {
            request.name = format!("{}-{}", request.name, idx + 1);
        }
    }
    Ok(requests)
}

fn read_molecule_layers(requests: &[LayerRequest]) -> Result<Vec<AbundanceMatrix<MoleculeId>>, KiraError> {
    requests
        .iter()
        .map(|request| {
            read_table(&request.path, &request.layout)?
                .matrix
                .try_map_columns(|column| MoleculeId::parse_as(column, request.omics))
        })
        .collect()
}

fn load_database(
    path: Option<&Path>,
    organism: &Organism,
    requests: &[LayerRequest],
) -> Result<PathwayDatabase, KiraError> {
    if let Some(path) = path {
        let omics = requests
            .first()
            .map(|request| request.omics)
            .unwrap_or(OmicsType::Metabolomics);
        return PathwayDatabase::from_path(path, organism, omics);
    }
    let loader = PathwayLoader::new(Store::new()?, ReactomeHttpClient::new()?);
    let mut database = PathwayDatabase::default();
    for request in requests {
        let loaded = loader.load(organism, request.omics, LoadOptions::default())?;
        database = database.merge(&loaded.database);
    }
    Ok(database)
}

fn write_conversion(path: &Path, table: &ConversionTable) -> Result<(), KiraError> {
    let file = File::create(path).map_err(|err| KiraError::TableWrite {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    table.write_csv(file)
}

fn write_layer<K: ColumnKey>(
    path: &Path,
    matrix: &AbundanceMatrix<K>,
    metadata: &kira_pathmap::matrix::SampleMetadata,
    layout: &TableLayout,
) -> Result<(), KiraError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| KiraError::Filesystem(err.to_string()))?;
    }
    let file = File::create(path).map_err(|err| KiraError::TableWrite {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    write_table(file, matrix, Some(metadata), layout)
}
