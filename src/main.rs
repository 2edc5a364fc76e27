use std::process::exit;

use clap::Parser;

use fw2tar::args::Args;

fn main() {
    let args = Args::parse();

    if args.loud && std::env::var("XFS_LOG").is_err() {
        std::env::set_var("XFS_LOG", "debug");
    }

    pretty_env_logger::init_custom_env("XFS_LOG");

    match fw2tar::run(args) {
        Ok(results) => {
            if results.is_empty() {
                println!("xfs: no items produced a result");
                exit(2);
            }

            for result in &results {
                let kernel = result
                    .kernel_path
                    .as_ref()
                    .filter(|_| result.kernel_done)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                let rootfs = result
                    .rootfs_path
                    .as_ref()
                    .filter(|_| result.rootfs_done)
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());

                println!(
                    "xfs: tag={} status={} kernel={kernel} rootfs={rootfs}",
                    result.tag, result.status
                );
            }
        }
        Err(e) => {
            eprintln!("xfs: {e}");
            exit(1);
        }
    }
}
