use block_index::inspect::{build_report, import_snapshot};
use block_index::settings::{Settings, DEFAULT_CONFIG_FILE};
use block_index::{BlockIndex, IndexResult, SqliteBlockStorage};

fn main() {
    let settings = match Settings::load(DEFAULT_CONFIG_FILE) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            std::process::exit(1);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log_level)).init();
    log::info!("Block index inspector starting up (db: {})", settings.db_path);

    if let Err(e) = run(&settings) {
        log::error!("Block index inspection failed: {}", e);
        std::process::exit(1);
    }
}

fn run(settings: &Settings) -> IndexResult<()> {
    let storage = SqliteBlockStorage::new(&settings.db_path)?;

    if let Some(path) = &settings.snapshot_path {
        import_snapshot(&storage, path)?;
    }

    let block_index = BlockIndex::from_source(&storage)?;
    let report = build_report(&block_index, settings)?;
    let stdout = std::io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &report)?;
    println!();
    Ok(())
}
