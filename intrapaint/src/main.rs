#![warn(clippy::pedantic)]

use intrapaint::config::ConfigProvider;
use intrapaint_core::Document;

use anyhow::Result as AnyResult;

fn main() -> AnyResult<()> {
    let has_term = std::io::IsTerminal::is_terminal(&std::io::stdin());
    // Log to a terminal, if available. Else, log to "log.out" in the working directory.
    if has_term {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        let _ = simple_logging::log_to_file("log.out", log::LevelFilter::Debug);
    }

    let config = ConfigProvider::load_user();
    if config.did_fail_to_load() {
        log::warn!("Settings could not be loaded, using defaults.");
    }

    let documents = {
        use rayon::iter::{IntoParallelIterator, ParallelIterator};
        // Args are a simple list of paths to open at startup.
        // Paths are OSStrings, let the system handle character encoding restrictions.
        let paths: Vec<std::path::PathBuf> = std::env::args_os().skip(1).map(Into::into).collect();
        // Did we have at least one success? No paths is a success.
        let had_success: std::sync::atomic::AtomicBool = paths.is_empty().into();
        let constraints = config.area_constraints();
        let documents: Vec<Document> = paths
            .into_par_iter()
            .filter_map(|path| match intrapaint_core::io::load(&path, constraints) {
                Err(e) => {
                    log::error!("failed to open file {path:?}: {e:#}");
                    None
                }
                Ok(stack) => {
                    had_success.store(true, std::sync::atomic::Ordering::Relaxed);
                    log::info!(
                        "Opened {path:?}: {}x{}, {} layers",
                        stack.size().width,
                        stack.size().height,
                        stack.graph().len()
                    );
                    Some(Document::from_stack(stack, config.undo_settings()))
                }
            })
            .collect();
        // False if every file failed.
        if !had_success.into_inner() {
            log::warn!("Failed to load any provided document.");
        }
        documents
    };
    log::info!("{} document(s) open", documents.len());

    if let Err(e) = config.save() {
        log::warn!("Failed to save settings:\n{e:?}");
    };
    Ok(())
}
