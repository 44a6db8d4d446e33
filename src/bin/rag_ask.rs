use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use copilot_chat::config::{CompletionSettings, RagSettings};
use copilot_chat::proxy::OpenAIProxy;
use copilot_chat::rag::{FastEmbedder, RetrievalPipeline};
use copilot_chat::Session;

#[derive(Parser, Debug)]
#[command(name = "rag-ask")]
#[command(about = "Answer a question from a text or markdown document")]
struct Args {
    /// Document to index (UTF-8 text)
    #[arg(short, long)]
    file: PathBuf,

    /// Question to answer from the document
    #[arg(short, long)]
    question: String,

    /// Directory holding the ONNX embedding model
    #[arg(long, env = "COPILOT__EMBEDDING__MODEL_DIR", default_value = copilot_chat::rag::embeddings::DEFAULT_MODEL_DIR)]
    model_dir: PathBuf,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "COPILOT__COMPLETION__BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = "gpt-4")]
    model: String,

    /// Chunk size in characters
    #[arg(long, default_value_t = 500)]
    chunk_size: usize,

    /// Number of chunks to retrieve
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    /// Print the retrieved chunks before the answer
    #[arg(long)]
    show_context: bool,
}

fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.chunk_size == 0 || args.top_k == 0 {
        anyhow::bail!("--chunk-size and --top-k must be greater than zero");
    }

    let text = std::fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.file.display(), e))?;

    println!("Initializing embedding model...");
    let embedder = FastEmbedder::new(&args.model_dir)?;

    let completion = CompletionSettings {
        base_url: args.base_url.clone(),
        model: args.model.clone(),
        api_key: args.api_key.clone(),
        ..CompletionSettings::default()
    };
    let rag = RagSettings {
        chunk_size: args.chunk_size,
        top_k: args.top_k,
        ..RagSettings::default()
    };

    let pipeline = RetrievalPipeline::new(
        Arc::new(embedder),
        Arc::new(OpenAIProxy::from_settings(&completion)?),
        rag.to_config(),
    );
    let mut session = Session::new();

    let pb = spinner(&format!("Indexing {}", args.file.display()))?;
    let report = pipeline.ingest(&mut session, &text).await;
    pb.finish_and_clear();
    let report = report?;

    println!("Document processed and indexed!");
    println!("  Chunks:      {}", report.chunks);
    println!("  Fingerprint: {}", report.fingerprint);

    let pb = spinner("Answering...")?;
    let result = pipeline.answer_with_context(&session, &args.question).await;
    pb.finish_and_clear();
    let result = result?;

    if args.show_context {
        println!("\nRetrieved context:");
        for (rank, hit) in result.context.chunks.iter().enumerate() {
            println!(
                "  [{}] chunk {} (distance {:.4}): {}",
                rank + 1,
                hit.chunk.chunk_index,
                hit.distance,
                hit.chunk.text.replace('\n', " ")
            );
        }
    }

    println!("\nAnswer:\n{}", result.answer);
    Ok(())
}
