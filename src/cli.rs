use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::{ContextKind, TopicSet};

#[derive(Parser, Debug)]
#[command(
    name = "chart-annotator",
    version,
    about = "Terminal client for judging multi-model chart retrieval results"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Topics(TopicsArgs),
    Random(RandomArgs),
    Search(SearchArgs),
    Evaluate(EvaluateArgs),
    Answer(AnswerArgs),
    Annotate(AnnotateArgs),
    Status(StatusArgs),
    Session(SessionArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(
        long,
        global = true,
        env = "ANNOTATOR_SERVER_URL",
        default_value = "http://127.0.0.1:5000"
    )]
    pub server_url: String,

    #[arg(long, global = true, env = "ANNOTATOR_TIMEOUT_SECS", default_value_t = 120)]
    pub timeout_secs: u64,

    #[arg(long, global = true, env = "ANNOTATOR_STAGGER_MS", default_value_t = 400)]
    pub stagger_ms: u64,

    #[arg(long, global = true, env = "ANNOTATOR_NOTICE_MS", default_value_t = 3000)]
    pub notice_ms: u64,

    /// Display label per retrieval panel, in `model_{n}_documents` order.
    #[arg(
        long = "model-label",
        global = true,
        env = "ANNOTATOR_MODEL_LABELS",
        value_delimiter = ','
    )]
    pub model_labels: Vec<String>,

    #[arg(
        long,
        global = true,
        env = "ANNOTATOR_OUTPUT_DIR",
        default_value = ".cache/chart-annotator"
    )]
    pub output_dir: PathBuf,

    #[arg(long, global = true, env = "ANNOTATOR_VIEWPORT_WIDTH", default_value_t = 1600)]
    pub viewport_width: u32,
}

#[derive(Args, Debug, Clone)]
pub struct TopicsArgs {
    #[arg(long, value_enum, default_value_t = TopicSet::Curated)]
    pub set: TopicSet,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RandomArgs {
    #[arg(long, value_enum, default_value_t = ContextKind::Document)]
    pub kind: ContextKind,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long)]
    pub topic: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    /// Evaluation batch previously written by `export` in a session.
    #[arg(long)]
    pub batch: PathBuf,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct AnswerParamArgs {
    #[arg(long)]
    pub top_n: Option<String>,

    #[arg(long)]
    pub ndcg: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AnswerArgs {
    #[command(flatten)]
    pub param: AnswerParamArgs,

    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct AnnotateArgs {
    #[arg(long)]
    pub annotator_name: String,

    #[arg(long)]
    pub annotator_url: Option<String>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub auto_fill: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SessionArgs {
    #[arg(long, value_enum)]
    pub preload_topics: Option<TopicSet>,
}
