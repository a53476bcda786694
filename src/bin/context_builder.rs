//! Builds a context dependency transducer from accumulated acoustic statistics: reads the phone
//! symbol table, question sets and samples, drives [`trainc::ContextBuilder`] through splitting
//! and compilation, and writes every requested output file.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use trainc::context_builder::{BuilderConfig, ContextBuilder};
use trainc::phones::{PhoneSymbols, Phones};
use trainc::recipe::{RecipeReader, RecipeWriter};
use trainc::sample::Samples;
use trainc::sample_reader::read_samples;
use trainc::scorer::{MaximumLikelihoodScorer, Scorer};
use trainc::set_inventory::SetInventory;
use trainc::transducer_compiler::TransducerCompiler;

#[derive(Parser, Debug)]
#[command(about = "Builds a context dependency transducer from accumulated acoustic statistics")]
struct Args {
    /// Sample data file
    #[clap(long)]
    samples_file: PathBuf,
    /// Phone symbol table
    #[clap(long)]
    phone_syms: PathBuf,
    /// Context class definitions (phone-set question file)
    #[clap(long)]
    phone_sets: PathBuf,
    /// List of context independent states, one `<phone>_<state>` per line
    #[clap(long)]
    ci_state_list: PathBuf,
    /// Phone symbol used at utterance boundaries
    #[clap(long, default_value = "sil")]
    boundary_context: String,
    /// Optional file of explicit per-phone HMM state counts; deduced from the samples if absent
    #[clap(long)]
    phone_length: Option<PathBuf>,

    /// Number of left context positions
    #[clap(long, default_value_t = 1)]
    num_left_contexts: usize,
    /// Number of right context positions
    #[clap(long, default_value_t = 1)]
    num_right_contexts: usize,
    /// Maximum number of HMM state models to produce (0 = unbounded)
    #[clap(long, default_value_t = 0)]
    target_num_models: usize,
    /// Maximum number of transducer states to produce (0 = unbounded)
    #[clap(long, default_value_t = 0)]
    target_num_states: usize,
    /// Maximum number of hypotheses evaluated per round (0 = unbounded)
    #[clap(long, default_value_t = 0)]
    max_hyps: usize,
    /// Weight of the transducer size penalty
    #[clap(long, default_value_t = 10.0)]
    state_penalty_weight: f64,
    /// Minimum gain for a split to be accepted
    #[clap(long, default_value_t = 0.0)]
    min_split_gain: f64,
    /// Minimum number of distinct contexts seen on each side of a split
    #[clap(long, default_value_t = 0)]
    min_seen_contexts: usize,
    /// Minimum number of observations on each side of a split
    #[clap(long, default_value_t = 1000.0)]
    min_observations: f64,
    /// Minimum variance floor applied to Gaussian state models
    #[clap(long, default_value_t = 0.001)]
    variance_floor: f64,
    /// Split the sets of center phones too (required when states are shared between phones)
    #[clap(long, default_value_t = false)]
    split_center_phone: bool,

    /// Replay a previously recorded split sequence instead of searching greedily
    #[clap(long)]
    replay: Option<PathBuf>,
    /// Record the sequence of applied splits to this file
    #[clap(long)]
    save_splits: Option<PathBuf>,

    /// Context dependency transducer output file
    #[clap(long)]
    ctrans: Option<PathBuf>,
    /// HMM list output file
    #[clap(long)]
    hmm_list: Option<PathBuf>,
    /// State distribution model output file
    #[clap(long)]
    leaf_model: Option<PathBuf>,
    /// H transducer output file
    #[clap(long)]
    htrans: Option<PathBuf>,
    /// HMM symbol table output file
    #[clap(long)]
    hmm_syms: Option<PathBuf>,
    /// HMM-state symbol table output file
    #[clap(long)]
    state_syms: Option<PathBuf>,
    /// Name map from CD HMMs to their center phone
    #[clap(long)]
    cd2phone_hmm_name_map: Option<PathBuf>,
    /// State name map from CD states to their CI counterpart
    #[clap(long)]
    cd2ci_state_name_map: Option<PathBuf>,
    /// Per-state-model diagnostic log
    #[clap(long)]
    state_model_log: Option<PathBuf>,
    /// Per-transducer-state diagnostic log
    #[clap(long)]
    transducer_log: Option<PathBuf>,
}

fn load_ci_states(path: &PathBuf, symbols: &PhoneSymbols, phones: &mut Phones) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading ci state list {}", path.display()))?;
    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let (phone_sym, _state) = trimmed
            .rsplit_once('_')
            .with_context(|| format!("malformed ci state entry at line {}: '{trimmed}'", line_no + 1))?;
        let phone = symbols
            .index_of(phone_sym)
            .with_context(|| format!("unknown phone symbol '{phone_sym}' at line {}", line_no + 1))?;
        phones.set_ci_phone(phone)?;
    }
    Ok(())
}

fn load_phone_lengths(path: &PathBuf, symbols: &PhoneSymbols, phones: &mut Phones) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading phone length file {}", path.display()))?;
    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let phone_sym = fields
            .next()
            .with_context(|| format!("missing phone symbol at line {}", line_no + 1))?;
        let length: i32 = fields
            .next()
            .with_context(|| format!("missing state count at line {}", line_no + 1))?
            .parse()
            .with_context(|| format!("invalid state count at line {}", line_no + 1))?;
        let phone = symbols
            .index_of(phone_sym)
            .with_context(|| format!("unknown phone symbol '{phone_sym}' at line {}", line_no + 1))?;
        phones.set_phone_length(phone, length)?;
    }
    Ok(())
}

/// Deduces every phone's HMM state count from the samples actually observed, for phones the
/// optional phone-length file left unset.
fn deduce_phone_lengths(phones: &mut Phones, samples: &Samples) -> Result<()> {
    for phone in 0..phones.num_phones() {
        if phones.num_hmm_states(phone) > 0 {
            continue;
        }
        let states = samples.num_states(phone);
        anyhow::ensure!(
            states > 0,
            "no phone length given and no samples observed for phone {phone}"
        );
        phones.set_phone_length(phone, states as i32)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    trainc::setup_logging();
    let args = Args::parse();

    info!(samples_file = %args.samples_file.display(), "loading resources");

    let phone_syms_text = std::fs::read_to_string(&args.phone_syms)
        .with_context(|| format!("reading phone symbol table {}", args.phone_syms.display()))?;
    let phone_symbols = PhoneSymbols::from_reader(phone_syms_text.as_bytes())
        .context("parsing phone symbol table")?;
    let num_phones = phone_symbols.num_phones();

    let mut phones = Phones::new(num_phones);
    load_ci_states(&args.ci_state_list, &phone_symbols, &mut phones)
        .context("loading ci state list")?;

    let question_set_text = std::fs::read_to_string(&args.phone_sets)
        .with_context(|| format!("reading question set {}", args.phone_sets.display()))?;
    let question_set = SetInventory::read_text(question_set_text.as_bytes(), &phone_symbols, num_phones)
        .context("parsing question set")?;
    let questions: Vec<_> = question_set.questions().collect();
    info!(count = questions.len(), "loaded context questions");

    let mut samples = Samples::new();
    samples.set_num_phones(num_phones);
    let samples_file = File::open(&args.samples_file)
        .with_context(|| format!("opening sample file {}", args.samples_file.display()))?;
    let num_samples = read_samples(BufReader::new(samples_file), &phone_symbols, &mut samples)
        .context("reading sample file")?;
    info!(num_samples, "loaded samples");

    if let Some(path) = &args.phone_length {
        load_phone_lengths(path, &phone_symbols, &mut phones).context("loading phone lengths")?;
    }
    deduce_phone_lengths(&mut phones, &samples)?;

    let boundary_phone = phone_symbols
        .index_of(&args.boundary_context)
        .with_context(|| format!("unknown boundary phone symbol '{}'", args.boundary_context))?;

    let feature_dim = samples.feature_dimension();
    let config = BuilderConfig {
        num_left_contexts: args.num_left_contexts,
        num_right_contexts: args.num_right_contexts,
        split_center: args.split_center_phone,
        min_gain: args.min_split_gain,
        min_contexts: args.min_seen_contexts,
        min_observations: args.min_observations,
        variance_floor: args.variance_floor,
        target_num_models: args.target_num_models,
        target_num_states: args.target_num_states,
        max_hyps: args.max_hyps,
        state_penalty_weight: args.state_penalty_weight,
        boundary_phone,
        feature_dim,
    };

    let mut builder = ContextBuilder::new(config, phone_symbols, phones, questions);
    builder.init_monophones();

    let scorer = MaximumLikelihoodScorer::new(args.variance_floor);
    let scorer: &dyn Scorer = &scorer;

    if let Some(replay_path) = &args.replay {
        info!(path = %replay_path.display(), "replaying recorded splits");
        let replay_file = File::open(replay_path)
            .with_context(|| format!("opening replay file {}", replay_path.display()))?;
        let mut reader = RecipeReader::new(BufReader::new(replay_file)).context("reading replay header")?;
        let records = reader.read_all().context("reading replay records")?;
        builder
            .replay(&samples, scorer, &records)
            .context("replaying recorded splits")?;
    } else if let Some(save_path) = &args.save_splits {
        let save_file = File::create(save_path)
            .with_context(|| format!("creating recipe log {}", save_path.display()))?;
        let mut recipe = RecipeWriter::new(BufWriter::new(save_file)).context("writing recipe header")?;
        builder
            .build(&samples, scorer, Some(&mut recipe))
            .context("building context dependency transducer")?;
        recipe.flush().context("flushing recipe log")?;
    } else {
        builder
            .build(&samples, scorer, None::<&mut RecipeWriter<std::fs::File>>)
            .context("building context dependency transducer")?;
    }

    info!(
        num_models = builder.models().num_state_models(),
        num_states = builder.transducer().num_states(),
        "splitting converged"
    );

    let (hmm_compiler, compiled) = builder.compile(scorer).context("compiling output transducer")?;

    if let Some(path) = &args.transducer_log {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let compiler = TransducerCompiler::new(builder.transducer(), &hmm_compiler, boundary_phone);
        compiler.write_state_info(BufWriter::new(f))?;
    }

    if let Some(path) = &args.hmm_list {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_hmm_list(BufWriter::new(f))?;
    }
    if let Some(path) = &args.state_syms {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_state_symbols(BufWriter::new(f))?;
    }
    if let Some(path) = &args.hmm_syms {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_hmm_symbols(BufWriter::new(f))?;
    }
    if let Some(path) = &args.leaf_model {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_state_models(scorer, BufWriter::new(f))?;
    }
    if let Some(path) = &args.cd2phone_hmm_name_map {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_cd_to_ci_map(BufWriter::new(f))?;
    }
    if let Some(path) = &args.htrans {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_hmm_transducer(BufWriter::new(f))?;
    }
    if let Some(path) = &args.cd2ci_state_name_map {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_state_name_map(BufWriter::new(f))?;
    }
    if let Some(path) = &args.state_model_log {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        hmm_compiler.write_state_model_info(BufWriter::new(f))?;
    }
    if let Some(path) = &args.ctrans {
        let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        compiled.write_text(BufWriter::new(f))?;
    }

    info!("done");
    Ok(())
}
