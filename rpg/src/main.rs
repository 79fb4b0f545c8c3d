//! AI dungeon master for the terminal.
//!
//! A line-oriented interface: type what your character does, read what happens.
//!
//! ```bash
//! cargo run -p rpg -- --name "Aria" --class ranger
//! cargo run -p rpg -- --resume 5f0c3a1e-...
//! ```
//!
//! Logs go to stderr and follow `RUST_LOG` (default `warn,rpg_core=info,rpg=info`).

mod headless;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,rpg_core=info,rpg=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
        std::process::exit(1);
    }

    let options = headless::parse_options(&args);
    headless::run(options).await?;
    Ok(())
}

fn print_help() {
    println!("rpg - an AI dungeon master in your terminal");
    println!();
    println!("USAGE:");
    println!("  rpg [--name NAME] [--class CLASS] [--campaign NAME]");
    println!("  rpg --resume SESSION_ID");
    println!("  rpg --list");
    println!();
    println!("ENVIRONMENT:");
    println!("  ANTHROPIC_API_KEY   required");
    println!("  RPG_MODEL           narrator model override");
    println!("  RPG_SAVE_DIR        where sessions are saved (default: saves)");
    println!("  RPG_TOKEN_BUDGET    context window budget in tokens");
    println!("  RPG_RETAINED_TURNS  turns kept verbatim before compaction");
    println!("  RPG_SEED            fixed seed for reproducible dice");
    println!("  RUST_LOG            log filter");
}
