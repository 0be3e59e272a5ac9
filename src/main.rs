use clap::Parser;
use env_logger::Env;
use remedy::app::RemedyApp;
use remedy::cli::Args;
use remedy::ui::TerminalUI;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize logging based on verbosity and quiet flags
    let log_level = if args.quiet {
        "error"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    log::debug!("Remedy starting with args: {:?}", args);

    let output = args.output.clone();
    let ui = TerminalUI::new(args.quiet);
    let outcome = RemedyApp::new(args)?.run().await?;

    let json = serde_json::to_string_pretty(&outcome.json)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            log::info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }
    ui.print_outcome(&outcome)?;

    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}
