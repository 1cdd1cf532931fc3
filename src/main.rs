// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! Command line tool to inspect and check parts on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use partstore::storage::part::{
    enumerate_streams, read_marks, DataPart, LocalPartStorage, PartLoader, PartOptions,
};
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::filter;
use tracing_subscriber::prelude::*;

/// Inspect and check wide column parts.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,

    /// Rows per mark of parts with fixed granularity.
    #[clap(long, default_value_t = 8192)]
    index_granularity: u64,

    /// Run the column size cross-check.
    #[clap(long)]
    verify_column_sizes: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a part and check its consistency.
    Check {
        /// Directory of the part.
        dir: PathBuf,

        /// Do not require every stream to be registered in the checksum index.
        #[clap(long)]
        no_require_metadata: bool,

        /// Re-hash every file.
        #[clap(long)]
        deep: bool,
    },
    /// Print the size of every column.
    Sizes {
        /// Directory of the part.
        dir: PathBuf,
    },
    /// Print the marks of the streams of a part.
    Marks {
        /// Directory of the part.
        dir: PathBuf,

        /// Only print the streams of this column.
        #[clap(long)]
        column: Option<String>,
    },
}

fn load_part(dir: &Path, options: PartOptions) -> Result<DataPart> {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("invalid part directory {}", dir.display()))?;
    let storage = Arc::new(LocalPartStorage::new(dir));
    let part = PartLoader::new(name, storage, options)
        .load()
        .with_context(|| format!("failed to load part {}", dir.display()))?;
    Ok(part)
}

fn check(dir: &Path, mut options: PartOptions, require_metadata: bool, deep: bool) -> Result<()> {
    options.require_part_metadata = require_metadata;
    let part = load_part(dir, options)?;
    if deep {
        part.verify_checksums()?;
    }
    println!(
        "{}: ok, {} rows in {} marks, {} columns",
        part.name(),
        part.rows_count(),
        part.marks_count(),
        part.columns().len()
    );
    Ok(())
}

fn sizes(dir: &Path, options: PartOptions) -> Result<()> {
    let part = load_part(dir, options)?;
    let (columns, total) = part.calculate_each_columns_size()?;
    println!("{:<32} {:>14} {:>14} {:>10}", "column", "compressed", "uncompressed", "marks");
    for (name, size) in columns {
        println!(
            "{:<32} {:>14} {:>14} {:>10}",
            name, size.data_compressed, size.data_uncompressed, size.marks
        );
    }
    println!(
        "{:<32} {:>14} {:>14} {:>10}",
        "total", total.data_compressed, total.data_uncompressed, total.marks
    );
    Ok(())
}

fn marks(dir: &Path, options: PartOptions, column: Option<String>) -> Result<()> {
    let part = load_part(dir, options)?;
    let columns = match &column {
        Some(name) => vec![part
            .column(name)
            .cloned()
            .ok_or_else(|| anyhow!("no column {} in part {}", name, part.name()))?],
        None => part.columns().to_vec(),
    };

    let resolver = part.resolver();
    let mark_type = part.index_granularity_info().mark_type;
    for column in &columns {
        if !part.has_column_files(column) {
            info!("column {} has no files in part {}", column.name(), part.name());
            continue;
        }
        for stream in enumerate_streams(column) {
            let file = resolver.marks_file(&stream);
            println!("{} ({})", stream.name, file);
            for (i, mark) in read_marks(part.storage(), &file, mark_type, part.name())?
                .iter()
                .enumerate()
            {
                let rows = mark
                    .rows
                    .or_else(|| part.index_granularity().mark_rows(i))
                    .ok_or_else(|| {
                        anyhow!(
                            "{} has more marks than the {} of part {}",
                            file,
                            part.marks_count(),
                            part.name()
                        )
                    })?;
                println!(
                    "  #{:<6} {:>12} {:>8} {:>8}",
                    i,
                    mark.position.offset_in_compressed_file,
                    mark.position.offset_in_decompressed_block,
                    rows
                );
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let fmt_layer = tracing_subscriber::fmt::layer().compact();
    let filter_layer =
        filter::EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let options = PartOptions {
        index_granularity: args.index_granularity,
        verify_column_sizes: args.verify_column_sizes,
        ..PartOptions::default_for_cli()
    };

    match args.command {
        Command::Check {
            dir,
            no_require_metadata,
            deep,
        } => check(&dir, options, !no_require_metadata, deep),
        Command::Sizes { dir } => sizes(&dir, options),
        Command::Marks { dir, column } => marks(&dir, options, column),
    }
}
