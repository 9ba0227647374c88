use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use grantdraft_core::{ChunkConfig, Chunker, SourceDocument};
use grantdraft_index::JsonlWriter;
use grantdraft_rag::{
    DraftEngine, EngineConfig, GeneratedSection, SectionConstraints, DEFAULT_CONFIG_FILE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const CLI_SESSION: &str = "cli";

#[derive(Parser, Debug)]
#[command(name = "grantdraft", version = VERSION, about = "Grounded grant section drafting")]
struct Cli {
    /// Engine configuration (TOML); defaults apply when the file is missing.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the chunks of one text file as JSON lines.
    Chunk {
        input: PathBuf,
        #[arg(long)]
        target: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Index documents and draft one section.
    Draft {
        #[arg(long = "doc", required = true)]
        docs: Vec<PathBuf>,
        #[arg(long)]
        section: String,
        #[arg(long, default_value = "")]
        requirements: String,
        #[arg(long = "word-limit")]
        word_limit: Option<usize>,
        #[arg(long = "char-limit")]
        char_limit: Option<usize>,
        #[arg(long)]
        format: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Regenerate a saved section, keeping locked paragraphs.
    Regenerate {
        #[arg(long = "section-file")]
        section_file: PathBuf,
        #[arg(long = "doc", required = true)]
        docs: Vec<PathBuf>,
        /// Paragraph index to lock before regenerating; repeatable.
        #[arg(long = "lock")]
        locks: Vec<usize>,
        /// Overrides the requirements saved with the section.
        #[arg(long)]
        requirements: Option<String>,
        /// Overrides the format hint saved with the section.
        #[arg(long)]
        format: Option<String>,
        /// Defaults to overwriting the section file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Index documents and write the chunk snapshot as JSON lines.
    Export {
        #[arg(long = "doc", required = true)]
        docs: Vec<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;

    match cli.command {
        Commands::Chunk {
            input,
            target,
            overlap,
        } => {
            let chunking = ChunkConfig {
                target_tokens: target.unwrap_or(config.chunking.target_tokens),
                overlap_tokens: overlap.unwrap_or(config.chunking.overlap_tokens),
            };
            let chunker = Chunker::new(chunking)?;
            let document = read_document(&input)?;
            let chunked = chunker.chunk_document(&document);
            let stdout = io::stdout();
            let mut writer = JsonlWriter::new(stdout.lock());
            for chunk in &chunked.chunks {
                writer.write_record(chunk)?;
            }
            info!(
                chunks = chunked.stats.chunks,
                hard_splits = chunked.stats.hard_splits,
                reduced_overlaps = chunked.stats.reduced_overlaps,
                "chunked {}",
                input.display()
            );
        }
        Commands::Draft {
            docs,
            section,
            requirements,
            word_limit,
            char_limit,
            format,
            out,
        } => {
            let engine = DraftEngine::from_config(config)?;
            index_files(&engine, &docs)?;
            let mut constraints = SectionConstraints::new(section).with_requirements(requirements);
            constraints.word_limit = word_limit;
            constraints.char_limit = char_limit;
            if let Some(format) = format {
                constraints = constraints.with_format(format);
            }
            let drafted = engine.draft_section(CLI_SESSION, &constraints)?;
            report(&drafted);
            write_section(&drafted, out.as_deref())?;
        }
        Commands::Regenerate {
            section_file,
            docs,
            locks,
            requirements,
            format,
            out,
        } => {
            let raw = fs::read_to_string(&section_file)
                .with_context(|| format!("failed to read {}", section_file.display()))?;
            let mut saved: GeneratedSection = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a saved section", section_file.display()))?;
            for index in locks {
                saved.lock_paragraph(index)?;
            }
            let engine = DraftEngine::from_config(config)?;
            index_files(&engine, &docs)?;
            let constraints = regeneration_constraints(&saved, requirements, format);
            engine.restore_section(CLI_SESSION, saved)?;
            let regenerated = engine.regenerate_stored_section(CLI_SESSION, &constraints)?;
            report(&regenerated);
            let target = out.unwrap_or(section_file);
            write_section(&regenerated, Some(&target))?;
        }
        Commands::Export { docs, out } => {
            let engine = DraftEngine::from_config(config)?;
            index_files(&engine, &docs)?;
            let file = File::create(&out)
                .with_context(|| format!("failed to create {}", out.display()))?;
            let written = engine.export_session(CLI_SESSION, BufWriter::new(file))?;
            info!(chunks = written, "wrote {}", out.display());
        }
    }
    Ok(())
}

/// Saved constraints, with any requirements or format given on the command
/// line taking precedence.
fn regeneration_constraints(
    saved: &GeneratedSection,
    requirements: Option<String>,
    format: Option<String>,
) -> SectionConstraints {
    let mut constraints = saved.constraints();
    if let Some(requirements) = requirements {
        constraints.requirements = requirements;
    }
    if let Some(format) = format {
        constraints.format_hint = format;
    }
    constraints
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Pages are separated by form feeds; the file stem becomes both the
/// document id and the title.
fn read_document(path: &Path) -> Result<SourceDocument> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .ok_or_else(|| anyhow!("cannot derive a title from {}", path.display()))?;
    Ok(SourceDocument::from_form_feed_text(stem, stem, &text))
}

fn index_files(engine: &DraftEngine, paths: &[PathBuf]) -> Result<usize> {
    let mut total = 0usize;
    for path in paths {
        let document = read_document(path)?;
        total += engine
            .index_document(
                CLI_SESSION,
                &document.document_id,
                &document.title,
                document.pages,
            )
            .with_context(|| format!("failed to index {}", path.display()))?;
    }
    Ok(total)
}

fn report(section: &GeneratedSection) {
    info!(
        section = %section.section_name,
        words = section.word_count,
        limit_status = section.limit_status().as_str(),
        citations = section.citations.len(),
        locked = section.locks.len(),
        "section ready"
    );
    if let Some(warning) = &section.warning {
        eprintln!("warning: {warning}");
    }
    for marker in &section.unresolved_markers {
        eprintln!("unresolved citation: {marker}");
    }
}

fn write_section(section: &GeneratedSection, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(section)?;
    match out {
        Some(path) => fs::write(path, json + "\n")
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn form_feeds_split_pages_and_stem_names_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Pond Inlet Report.txt");
        fs::write(&path, "The hamlet has 1,555 residents.\u{c}Housing is scarce.").unwrap();
        let document = read_document(&path).unwrap();
        assert_eq!(document.title, "Pond Inlet Report");
        assert_eq!(document.document_id, "Pond Inlet Report");
        assert_eq!(document.pages.len(), 2);
        assert_eq!(document.pages[1].page_number, Some(2));
    }

    #[test]
    fn draft_arguments_parse() {
        let cli = Cli::try_parse_from([
            "grantdraft",
            "draft",
            "--doc",
            "a.txt",
            "--doc",
            "b.txt",
            "--section",
            "Budget",
            "--word-limit",
            "500",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        match cli.command {
            Commands::Draft {
                docs, word_limit, ..
            } => {
                assert_eq!(docs.len(), 2);
                assert_eq!(word_limit, Some(500));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn regeneration_keeps_saved_requirements_and_format_unless_overridden() {
        let mut config = EngineConfig::default();
        config.generation.provider = "local".to_string();
        let engine = DraftEngine::from_config(config).unwrap();
        let drafted = engine
            .draft_section(
                CLI_SESSION,
                &SectionConstraints::new("Staffing")
                    .with_requirements("Name every funded role.")
                    .with_format("bulleted")
                    .with_word_limit(250),
            )
            .unwrap();
        let saved: GeneratedSection =
            serde_json::from_str(&serde_json::to_string(&drafted).unwrap()).unwrap();

        let kept = regeneration_constraints(&saved, None, None);
        assert_eq!(kept.requirements, "Name every funded role.");
        assert_eq!(kept.format_hint, "bulleted");
        assert_eq!(kept.word_limit, Some(250));

        let overridden = regeneration_constraints(
            &saved,
            Some("Mention training.".into()),
            Some("narrative".into()),
        );
        assert_eq!(overridden.requirements, "Mention training.");
        assert_eq!(overridden.format_hint, "narrative");
    }

    #[test]
    fn regenerate_arguments_parse_format_override() {
        let cli = Cli::try_parse_from([
            "grantdraft",
            "regenerate",
            "--section-file",
            "section.json",
            "--doc",
            "a.txt",
            "--lock",
            "0",
            "--format",
            "bulleted",
        ])
        .unwrap();
        match cli.command {
            Commands::Regenerate {
                locks,
                requirements,
                format,
                ..
            } => {
                assert_eq!(locks, vec![0]);
                assert_eq!(requirements, None);
                assert_eq!(format.as_deref(), Some("bulleted"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn saved_section_regenerates_with_locks() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("Plan.txt");
        fs::write(&doc, "The plan funds two youth workers.").unwrap();
        let mut config = EngineConfig::default();
        config.generation.provider = "local".to_string();

        let engine = DraftEngine::from_config(config.clone()).unwrap();
        index_files(&engine, &[doc.clone()]).unwrap();
        let drafted = engine
            .draft_section(CLI_SESSION, &SectionConstraints::new("Staffing"))
            .unwrap();
        let file = dir.path().join("section.json");
        write_section(&drafted, Some(&file)).unwrap();

        let mut saved: GeneratedSection =
            serde_json::from_str(&fs::read_to_string(&file).unwrap()).unwrap();
        saved.lock_paragraph(0).unwrap();
        let kept = saved.paragraphs()[0].to_string();
        let engine = DraftEngine::from_config(config).unwrap();
        index_files(&engine, &[doc]).unwrap();
        engine.restore_section(CLI_SESSION, saved).unwrap();
        let regenerated = engine
            .regenerate_stored_section(CLI_SESSION, &SectionConstraints::new("Staffing"))
            .unwrap();
        assert_eq!(regenerated.paragraphs()[0], kept);
        assert_eq!(regenerated.regeneration_count, 1);
    }
}
