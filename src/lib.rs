pub mod archive;
pub mod args;
pub mod carve;
pub mod classifier;
pub mod decrypt;
mod error;
pub mod extraction;
pub mod extractor;
pub mod metadata;
pub mod scanner;

pub use error::Fw2tarError;

use std::fs;

use extraction::ExtractionResult;
use extractor::{Extractor, ExtractorContext};
use metadata::{MetadataSink, SinkConfig};

/// Entry point shared by the `xfs` binary and tests: validates `args`, builds
/// the shared `ExtractorContext`, and runs the driver over `args.input`.
pub fn run(args: args::Args) -> Result<Vec<ExtractionResult>, Fw2tarError> {
    if !args.input.exists() {
        return Err(Fw2tarError::FirmwareDoesNotExist(args.input));
    }
    if !args.input.is_file() && !args.input.is_dir() {
        return Err(Fw2tarError::InputUnreadable(args.input));
    }

    if !args.output.exists() {
        fs::create_dir_all(&args.output)?;
    }

    scanner::set_timeout(args.timeout);

    let sink = args.sql.map(|host| {
        MetadataSink::new(SinkConfig {
            host,
            port: args.port,
        })
    });

    let ctx = ExtractorContext::new(
        Some(args.output),
        !args.no_kernel,
        !args.no_rootfs,
        args.brand,
        sink,
        args.quiet,
        args.log_devices,
    );

    let extractor = Extractor::new(ctx, !args.no_parallel);
    let results = extractor.extract(&args.input);

    if let Some(removed) = extractor.context().removed_devices.as_ref() {
        let mut paths: Vec<String> = removed
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        paths.sort();

        if paths.is_empty() {
            log::warn!("no device files were found during extraction, skipping devices.log");
        } else if let Some(output_dir) = &extractor.context().output_dir {
            let devices_log_path = output_dir.join("devices.log");
            if let Err(e) = fs::write(&devices_log_path, paths.join("\n")) {
                log::warn!("failed to write {devices_log_path:?}: {e}");
            }
        }
    }

    Ok(results)
}
