use clap::Parser;

/// Election results aggregation program.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON file describing the election: its sources, the cache and the rules.
    /// Relative source locations are resolved against the directory of this file.
    #[clap(short, long, value_parser)]
    pub config: String,

    /// (file path, 'stdout' or empty) Where the election summary is written in JSON format.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path) A reference summary in JSON format. If provided, the program checks that the
    /// computed summary matches it and fails otherwise.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// If passed as an argument, the results are compared with the independent count source.
    #[clap(long, takes_value = false)]
    pub verify: bool,

    /// If passed as an argument, the counts of the contests that fail verification are
    /// replaced by the independent ones. Implies --verify.
    #[clap(long, takes_value = false)]
    pub apply_corrections: bool,

    /// (file path) If specified, the supplemental rows for the contests and candidates that
    /// the supplemental store does not know yet are written to this file in CSV format.
    #[clap(long, value_parser)]
    pub setup: Option<String>,

    /// If passed as an argument, every source is fetched live. Cached payloads are neither
    /// used nor kept as a fallback.
    #[clap(long, takes_value = false)]
    pub no_cache: bool,

    /// If passed as an argument, no network access is made and only cached payloads are used.
    /// Takes precedence over --no-cache.
    #[clap(long, takes_value = false)]
    pub offline: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
