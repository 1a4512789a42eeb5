use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use isuda_rs::{Autolinker, EngineConfig, MemoryStore};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "isuda-rs", about = "Autolink keyword descriptions", version)]
pub struct Cli {
    /// Emit JSON instead of plain text.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Maximum number of rendered descriptions kept in process memory.
    #[arg(long, global = true, env = "ISUDA_TIER1_CAPACITY", default_value_t = 65_536)]
    tier1_capacity: usize,
    /// Prefix for shared cache keys.
    #[arg(long, global = true, env = "ISUDA_CACHE_PREFIX", default_value = "htmlify:")]
    cache_prefix: String,
    /// Markup emitted for each newline.
    #[arg(long, global = true, env = "ISUDA_LINE_BREAK", default_value = "<br />")]
    line_break: String,
    /// Path prefix of keyword pages.
    #[arg(long, global = true, env = "ISUDA_LINK_BASE", default_value = "/keyword/")]
    link_base: String,
}

impl EngineArgs {
    fn to_config(&self) -> Result<EngineConfig, Box<dyn Error>> {
        let tier1_capacity = NonZeroUsize::new(self.tier1_capacity)
            .ok_or("--tier1-capacity must be greater than zero")?;
        Ok(EngineConfig {
            tier1_capacity,
            shared_key_prefix: self.cache_prefix.clone(),
            line_break: self.line_break.clone(),
            link_base_path: self.link_base.clone(),
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a description with every corpus keyword linked.
    Render {
        /// Keyword corpus, one keyword per line (first TSV column).
        #[arg(long)]
        corpus: PathBuf,
        /// Keyword whose description is being rendered.
        #[arg(long)]
        keyword: String,
        /// Description text; read from stdin when omitted.
        #[arg(long)]
        description: Option<String>,
    },
    /// List keyword matches found in a piece of text.
    Scan {
        #[arg(long)]
        corpus: PathBuf,
        /// Raw text to scan.
        text: String,
    },
    /// Render repeatedly and report cache tier statistics.
    Stats {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        keyword: String,
        #[arg(long)]
        description: String,
        /// Number of renders to perform.
        #[arg(short, long, default_value_t = 2)]
        repeat: usize,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing();
    let engine = Autolinker::new(cli.engine.to_config()?, Arc::new(MemoryStore::new()));
    match cli.command {
        Command::Render {
            corpus,
            keyword,
            description,
        } => {
            load_into(&engine, &corpus)?;
            let description = match description {
                Some(text) => text,
                None => read_stdin()?,
            };
            handle_render(&engine, &keyword, &description, cli.json)
        }
        Command::Scan { corpus, text } => {
            load_into(&engine, &corpus)?;
            handle_scan(&engine, &text, cli.json)
        }
        Command::Stats {
            corpus,
            keyword,
            description,
            repeat,
        } => {
            load_into(&engine, &corpus)?;
            handle_stats(&engine, &keyword, &description, repeat, cli.json)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_into(engine: &Autolinker, path: &Path) -> Result<(), Box<dyn Error>> {
    let keywords = load_corpus(path)?;
    engine.reset_corpus(&keywords)?;
    Ok(())
}

fn load_corpus(path: &Path) -> Result<Vec<String>, Box<dyn Error>> {
    let file = BufReader::new(
        File::open(path).map_err(|err| format!("Failed to open corpus {}: {err}", path.display()))?,
    );
    let mut keywords = Vec::new();
    for (idx, line) in file.lines().enumerate() {
        let line = line?;
        if idx == 0 && line.starts_with("keyword") {
            continue;
        }
        let keyword = line.split('\t').next().unwrap_or_default();
        if keyword.trim().is_empty() {
            continue;
        }
        keywords.push(keyword.to_string());
    }
    Ok(keywords)
}

fn read_stdin() -> Result<String, Box<dyn Error>> {
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn handle_render(
    engine: &Autolinker,
    keyword: &str,
    description: &str,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let html = engine.render_description(keyword, description)?;
    if as_json {
        let payload = json!({
            "keyword": keyword,
            "generation": engine.generation(),
            "html": html,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{html}");
    }
    Ok(())
}

fn handle_scan(engine: &Autolinker, text: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let matcher = engine.matcher()?;
    let escaped = isuda_rs::escape_html(text);
    let matches = matcher.scan(&escaped);

    if as_json {
        let payload = json!({
            "text": escaped,
            "patterns": matcher.pattern_count(),
            "matches": matches,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("No keywords matched.");
        return Ok(());
    }
    let width = matches
        .iter()
        .map(|m| m.keyword.len())
        .max()
        .unwrap_or(7)
        .max("KEYWORD".len());
    println!("{:<width$}  {:>6}  {:>6}", "KEYWORD", "START", "END", width = width);
    println!("{:-<width$}  ------  ------", "", width = width);
    for m in &matches {
        println!(
            "{:<width$}  {:>6}  {:>6}",
            m.keyword,
            m.start,
            m.end,
            width = width
        );
    }
    Ok(())
}

fn handle_stats(
    engine: &Autolinker,
    keyword: &str,
    description: &str,
    repeat: usize,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    for _ in 0..repeat.max(1) {
        engine.render_description(keyword, description)?;
    }
    let stats = engine.cache_stats();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Generation:     {}", stats.generation);
        println!("Tier 1 hits:    {}", stats.tier1_hits);
        println!("Tier 2 hits:    {}", stats.tier2_hits);
        println!("Misses:         {}", stats.misses);
        println!("Tier 2 errors:  {}", stats.tier2_errors);
        println!("Matcher builds: {}", stats.matcher_builds);
    }
    Ok(())
}
