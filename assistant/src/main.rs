use clap::Parser;
use std::process::ExitCode;

use fin_assistant::actors::store_actor::StoreHandle;
use fin_assistant::cli::{apply_cli_overrides, read_value_or_file, CliArgs};
use fin_assistant::settings::load_settings;
use fin_assistant::{init_logging, AssistantRuntime};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<(), String> {
    let mut settings = load_settings(&args.config_path())
        .await
        .map_err(|e| e.to_string())?;
    apply_cli_overrides(&args, &mut settings).map_err(|e| e.to_string())?;
    init_logging(&settings.log_level);

    let message = args
        .message
        .as_deref()
        .map(read_value_or_file)
        .transpose()
        .map_err(|e| e.to_string())?;

    if message.is_none() && !args.init_db && !args.seed_demo {
        return Err("nothing to do: pass --message (with --tenant), --init-db or --seed-demo".to_string());
    }

    let Some(message) = message else {
        // Database maintenance only; no model client needed.
        let store = StoreHandle::spawn(settings.database.path.clone(), settings.database.query_timeout());
        store.ensure_schema().await.map_err(|e| e.to_string())?;
        println!("Database ready at {}", settings.database.path.display());
        if args.seed_demo {
            let inserted = store.seed_demo().await.map_err(|e| e.to_string())?;
            println!("Inserted {} demo rows", inserted);
        }
        return Ok(());
    };

    let runtime = AssistantRuntime::start(settings).await.map_err(|e| e.to_string())?;
    if args.seed_demo {
        let inserted = runtime.seed_demo().await.map_err(|e| e.to_string())?;
        println!("Inserted {} demo rows", inserted);
    }

    let tenant = args
        .tenant
        .ok_or_else(|| "--tenant is required with --message".to_string())?;

    let outcome = runtime.ask(&message, tenant).await.map_err(|e| e.to_string())?;
    tracing::info!(
        tool_calls = outcome.total_tool_calls,
        model_turns = outcome.model_turns,
        stop_reason = ?outcome.stop_reason,
        "answered"
    );
    println!("{}", outcome.response);
    Ok(())
}
