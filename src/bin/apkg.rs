//! apkg command line tool
//!
//! Inspect, convert and render flashcard packages

use anyhow::{bail, Context};
use apkg_rs::{
    CardId, DeckTreeNode, EngineConfig, ExportOptions, Package, PackageBuilder, PackageVersion,
    Subtree,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "apkg")]
#[command(about = "Read, convert and render Anki .apkg packages")]
struct Args {
    /// Engine settings (TOML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print version, counts and the deck tree
    Inspect {
        file: PathBuf,
    },

    /// Re-emit a package, optionally as another version
    Convert {
        input: PathBuf,
        output: PathBuf,

        /// Target version (legacy1, legacy2, latest) [default: source version]
        #[arg(short = 'V', long)]
        version: Option<String>,

        /// Export only this deck and its subdecks
        #[arg(short = 'd', long)]
        deck: Option<String>,

        /// Leave out these card ids
        #[arg(short = 'x', long, value_delimiter = ',')]
        exclude: Vec<CardId>,

        /// Leave out media files
        #[arg(long)]
        no_media: bool,
    },

    /// Render one card as HTML
    Render {
        file: PathBuf,
        card_id: CardId,

        /// Print the answer side instead of the question
        #[arg(short = 'a', long)]
        answer: bool,
    },
}

/// Parse a package version from CLI string
fn parse_version(s: &str) -> anyhow::Result<PackageVersion> {
    match PackageVersion::parse(s) {
        Some(version) => Ok(version),
        None => bail!(
            "Invalid version '{}'. Valid options: legacy1, legacy2, latest",
            s
        ),
    }
}

fn open(path: &Path, config: &EngineConfig) -> anyhow::Result<Package> {
    PackageBuilder::new()
        .config(config.clone())
        .open(path)
        .with_context(|| format!("failed to read {}", path.display()))
}

fn print_tree(nodes: &[DeckTreeNode], package: &Package, depth: usize) {
    for node in nodes {
        println!(
            "{}{} [{}] ({} cards)",
            "  ".repeat(depth),
            node.name,
            node.id,
            package.collection().card_count(node.id, true)
        );
        print_tree(&node.children, package, depth + 1);
    }
}

fn inspect(path: &Path, config: &EngineConfig) -> anyhow::Result<()> {
    let package = open(path, config)?;
    let col = package.collection();
    println!("File:      {}", path.display());
    match col.source_version {
        Some(version) => println!("Version:   {:?}", version),
        None => println!("Version:   unknown"),
    }
    println!("Note types: {}", col.models().len());
    println!("Decks:     {}", col.decks().len());
    println!("Notes:     {}", col.notes().len());
    println!("Cards:     {}", col.total_card_count());
    println!("Reviews:   {}", col.revlog_entries().count());
    println!("Media:     {}", col.media().count());
    if !col.skipped_media.is_empty() {
        println!("Skipped:   {}", col.skipped_media.join(", "));
    }
    println!();
    print_tree(col.deck_tree(), &package, 0);
    Ok(())
}

fn convert(
    input: &Path,
    output: &Path,
    version: Option<&str>,
    deck: Option<&str>,
    exclude: &[CardId],
    no_media: bool,
    config: &EngineConfig,
) -> anyhow::Result<()> {
    let package = open(input, config)?;
    let mut options = ExportOptions::default().exclude(exclude.iter().copied());
    if let Some(version) = version {
        options = options.version(parse_version(version)?);
    }
    if let Some(name) = deck {
        let Some(root) = package.collection().deck_by_name(name) else {
            bail!("No deck named '{}'", name);
        };
        options = options.subtree(Subtree::whole(root.id));
    }
    if no_media {
        options = options.without_media();
    }

    let written = package
        .save(output, options)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("Wrote {}", written.display());
    Ok(())
}

fn render(path: &Path, card_id: CardId, answer: bool, config: &EngineConfig) -> anyhow::Result<()> {
    let package = open(path, config)?;
    let Some(rendered) = package.render(card_id) else {
        bail!("No card with id {}", card_id);
    };
    if answer {
        println!("{}", rendered.answer);
    } else {
        println!("{}", rendered.question);
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match &args.command {
        Command::Inspect { file } => inspect(file, &config),
        Command::Convert {
            input,
            output,
            version,
            deck,
            exclude,
            no_media,
        } => convert(
            input,
            output,
            version.as_deref(),
            deck.as_deref(),
            exclude,
            *no_media,
            &config,
        ),
        Command::Render {
            file,
            card_id,
            answer,
        } => render(file, *card_id, *answer, &config),
    }
}
