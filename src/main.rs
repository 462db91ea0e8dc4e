//! flight-core demo entry point.
//!
//! Starts an in-process server and client and walks through the main
//! features: table upload, table metadata, a registered exchange command,
//! and shutdown through the control channel.
//!
//! ## CLI Subcommands
//!
//! - `flight-core-demo` or `flight-core-demo demo` - Run the demo (default)
//! - `flight-core-demo config show` - Print effective configuration
//! - `flight-core-demo config validate` - Warn about risky settings

use std::process::ExitCode;
use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use futures::StreamExt;

use flight_core::config::{self, EnvConfig};
use flight_core::telemetry;
use flight_core::{
    ExchangerDefinition, FlightClient, FlightError, FlightServer, LocalTransport, MemoryEngine,
};

const DEMO_ROWS: i64 = 100_000;
const DEMO_BATCH_ROWS: i64 = 100;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("demo");

    match command {
        "demo" | "" => {
            let cfg = match config::load() {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    return ExitCode::from(2u8);
                }
            };
            if let Err(e) = telemetry::init_logging(&cfg.log) {
                eprintln!("Logging setup failed: {}", e);
            }
            telemetry::describe_metrics();

            match run_demo(cfg).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Demo failed: {} ({})", e, e.code().as_str());
                    ExitCode::FAILURE
                }
            }
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => run_config_show(),
                "validate" => run_config_validate(),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("flight-core {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "flight-core demo v{}

USAGE:
    flight-core-demo [COMMAND]

COMMANDS:
    demo             Run the in-process demo (default)
    config show      Print the effective configuration as JSON
    config validate  Warn about risky settings
    version          Show version information
    help             Show this help message

ENVIRONMENT:
    FLIGHT_CORE_USERNAME / FLIGHT_CORE_PASSWORD   Login (default: test / password)
    FLIGHT_CORE_CREDENTIALS_FILE                  TOML file with a [users] table
    FLIGHT_CORE_REGISTRATION_USERS                Users allowed to register handlers
    FLIGHT_CORE_LOG_FORMAT / FLIGHT_CORE_LOG_LEVEL json|pretty / EnvFilter directive

EXIT CODES:
    0  Success
    1  Failure
    2  Configuration error
",
        version
    );
}

fn run_config_show() -> ExitCode {
    match config::load() {
        Ok(cfg) => match serde_json::to_string_pretty(&cfg.effective_config()) {
            Ok(rendered) => {
                println!("{}", rendered);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to render configuration: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            ExitCode::from(2u8)
        }
    }
}

fn run_config_validate() -> ExitCode {
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2u8);
        }
    };
    let mut warnings = 0;

    if cfg.credentials.iter().any(|c| c.password == "password") {
        eprintln!("WARNING: a user still has the default password");
        warnings += 1;
    }
    if cfg.registration_users.is_none() {
        eprintln!(
            "WARNING: FLIGHT_CORE_REGISTRATION_USERS is unset; any authenticated user may register handlers"
        );
        warnings += 1;
    }

    if warnings == 0 {
        println!("Configuration is valid.");
        ExitCode::SUCCESS
    } else {
        eprintln!("{} warning(s) found.", warnings);
        ExitCode::FAILURE
    }
}

async fn run_demo(cfg: EnvConfig) -> Result<(), FlightError> {
    let credential = cfg
        .primary_credential()
        .cloned()
        .ok_or_else(|| FlightError::InvalidArgument("no credentials configured".into()))?;

    let server = FlightServer::new(cfg.server_config(), Arc::new(MemoryEngine::new()));
    let serving = {
        let server = server.clone();
        tokio::spawn(async move { server.serve().await })
    };

    let transport = Arc::new(LocalTransport::with_capacity(server.clone(), cfg.exchange_buffer));
    let client = FlightClient::connect(transport, cfg.client_config(credential)).await?;

    // Tables
    let (schema, users) = users_table()?;
    client.upload_table("users", schema, vec![users]).await?;
    println!("tables: {:?}", client.list_tables().await?);
    for column in client.table_info("users").await? {
        println!("  {} {} nullable={}", column.name, column.type_name, column.nullable);
    }
    let rows: usize = client
        .execute_query("SELECT * FROM users")
        .await?
        .iter()
        .map(|b| b.num_rows())
        .sum();
    println!("users rows: {}", rows);

    // Exchange
    client
        .add_exchange(&ExchangerDefinition::Echo {
            command: "echo".into(),
        })
        .await?;
    println!("exchanges: {:?}", client.list_exchanges().await?);

    let schema = numbers_schema();
    let input = futures::stream::iter(0..DEMO_ROWS / DEMO_BATCH_ROWS)
        .map({
            let schema = schema.clone();
            move |i| numbers_batch(&schema, i * DEMO_BATCH_ROWS, DEMO_BATCH_ROWS)
        })
        .boxed();
    let (handle, mut reader) = client.do_exchange("echo", schema, input).await?;

    let mut echoed = 0;
    while let Some(batch) = reader.next().await {
        echoed += batch?.num_rows();
    }
    let summary = handle.wait().await?;
    println!(
        "echoed {} rows: {} batches up, {} batches down",
        echoed, summary.writes, summary.reads
    );

    // Shutdown
    println!("shutdown: {}", client.shutdown().await?);
    let result = serving
        .await
        .map_err(|e| FlightError::Internal(format!("serve loop panicked: {}", e)))??;
    tracing::info!(?result, "demo finished");
    Ok(())
}

fn users_table() -> Result<(SchemaRef, RecordBatch), FlightError> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(StringArray::from(vec!["Alice", "Bob", "Charlie"])),
        ],
    )?;
    Ok((schema, batch))
}

fn numbers_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]))
}

fn numbers_batch(schema: &SchemaRef, start: i64, len: i64) -> Result<RecordBatch, FlightError> {
    let values: Vec<i64> = (start..start + len).collect();
    Ok(RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Int64Array::from(values))],
    )?)
}
