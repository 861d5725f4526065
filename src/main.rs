//! torrent-storage - Main entry point
//!
//! Creates content descriptors from local data and verifies local data
//! against them through the storage backend contract.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use torrent_storage::{
    close_torrent, verify_all, BackendKind, CliArgs, Command, ContentReader, ContentStream,
    DirectoryReader, FileBackend, FileEntry, Info, InfoBuilder, Sha1Digest, StorageConfig,
};
use tracing::{debug, error, info};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    let config = match &args.config {
        Some(path) => StorageConfig::load(path).await?,
        None => StorageConfig::default(),
    };

    match args.command {
        Command::Create {
            path,
            piece_length,
            name,
            output,
        } => {
            let config = StorageConfig {
                piece_length: piece_length.unwrap_or(config.piece_length),
                ..config
            };
            config.validate().context("Invalid configuration")?;
            run_create(&config, &path, name, output.as_deref()).await
        }
        Command::Verify { info, dir } => {
            let config = StorageConfig {
                base_dir: dir.unwrap_or(config.base_dir),
                ..config
            };
            config.validate().context("Invalid configuration")?;
            run_verify(&config, &info).await
        }
    }
}

/// Initialize logging
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
    debug!("Logging initialized with level {:?}", args.log_level());
}

/// Hash a file or directory and emit its descriptor
async fn run_create(
    config: &StorageConfig,
    path: &Path,
    name: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let default_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "torrent".to_string());
    let name = name.unwrap_or(default_name);

    let info = if metadata.is_dir() {
        let reader = DirectoryReader::new(path);
        let files = reader.scan().await?;
        InfoBuilder::new(name, config.piece_length)
            .build(files, &reader, &Sha1Digest)
            .await?
    } else {
        let reader = SingleFileReader {
            path: path.to_path_buf(),
        };
        InfoBuilder::new(name, config.piece_length)
            .build_single_file(metadata.len(), &reader, &Sha1Digest)
            .await?
    };

    let info_hash = info.info_hash()?;
    info!(
        "Created descriptor '{}' ({} pieces, info hash {})",
        info.name,
        info.pieces.len(),
        info_hash
    );

    let json = info.to_json()?;
    match output {
        Some(output) => tokio::fs::write(output, &json)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?,
        None => println!("{}", String::from_utf8_lossy(&json)),
    }
    Ok(())
}

/// Verify local content against a descriptor
async fn run_verify(config: &StorageConfig, info_path: &Path) -> Result<()> {
    let data = tokio::fs::read(info_path)
        .await
        .with_context(|| format!("Failed to read descriptor {}", info_path.display()))?;
    let info = Info::from_json(&data).context("Invalid descriptor")?;
    let info_hash = info.info_hash()?;

    // Opening the file backend would create any missing files
    if config.backend == BackendKind::File {
        let missing = FileBackend::new(config.base_dir.clone())
            .missing_files(&info)
            .await?;
        if let Some(first) = missing.first() {
            anyhow::bail!(
                "{} of {} content files missing under {} (first: {})",
                missing.len(),
                info.upverted_files().len(),
                config.base_dir.display(),
                first.display()
            );
        }
    }

    let backend = config.open_backend();
    let torrent = backend
        .open_torrent(&info, info_hash)
        .await
        .context("Failed to open torrent storage")?;

    let report = verify_all(torrent.as_ref(), &info, &Sha1Digest).await;
    close_torrent(torrent.as_ref()).await?;
    let report = report?;

    println!(
        "{}: {} of {} pieces verified, {} failed",
        info.name,
        report.verified,
        info.num_pieces(),
        report.failed
    );
    if report.failed > 0 {
        anyhow::bail!("{} pieces failed verification", report.failed);
    }
    Ok(())
}

/// Serves one file for whichever torrent name the builder asks for
struct SingleFileReader {
    path: PathBuf,
}

#[async_trait]
impl ContentReader for SingleFileReader {
    async fn open(&self, _file: &FileEntry) -> std::io::Result<ContentStream> {
        let handle = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(handle))
    }
}
