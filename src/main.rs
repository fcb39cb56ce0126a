//! CLI for cmdq
//!
//! Subcommands:
//! - `server`: run an in-process command gateway over WebSocket
//! - `send`: dispatch one command and print the reply
//! - `consume`: acknowledge commands arriving on a queue

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use cmdq::config::{Settings, load_config};
use cmdq::consumer::subscription::callback;
use cmdq::gateway::InMemoryCommandBus;
use cmdq::transport::start_gateway_server;
use cmdq::utils::logging;
use cmdq::{ConnectionFactory, ConsumeFlow, Message};

#[derive(Parser)]
#[command(name = "cmdq")]
struct Cli {
    /// Connection DSN; overrides the configured connection
    #[arg(long, global = true)]
    dsn: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a gateway server on the configured host and port
    Server,
    /// Dispatch a command and wait for its reply
    Send {
        /// Command name
        command: String,
        /// Message body
        #[arg(default_value = "")]
        body: String,
        /// Queue to send to (defaults to the command name)
        #[arg(long)]
        queue: Option<String>,
    },
    /// Consume a queue, acknowledging every command
    Consume {
        queue: String,
        /// Stop after this many messages
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&settings.application.log_level);

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Server => run_server(&settings).await,
        Command::Send {
            command,
            body,
            queue,
        } => run_send(&settings, cli.dsn, command, body, queue).await,
        Command::Consume { queue, limit } => run_consume(&settings, cli.dsn, queue, limit).await,
    };

    if let Err(e) = outcome {
        error!("{e}");
    }
}

fn factory(settings: &Settings, dsn: Option<String>) -> cmdq::Result<ConnectionFactory> {
    match dsn {
        Some(dsn) => ConnectionFactory::from_dsn(&dsn),
        None => Ok(ConnectionFactory::new(settings.connection_config()?)),
    }
}

async fn run_server(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", settings.connection.host, settings.connection.port);
    let bus = InMemoryCommandBus::new();

    tokio::select! {
        result = start_gateway_server(&addr, bus) => {
            result?;
            error!("Gateway server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_send(
    settings: &Settings,
    dsn: Option<String>,
    command: String,
    body: String,
    queue: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let context =
        factory(settings, dsn)?.create_context(&settings.application.name, settings.route_table());
    let queue = context.create_queue(queue.unwrap_or_else(|| command.clone()));

    let mut message = Message::new(body);
    message.set_command(command);
    message.set_reply_to(format!("{}-replies", settings.application.name));

    let reply = context.create_producer().request(&queue, &mut message).await?;
    match reply {
        Some(reply) => println!("{}", String::from_utf8_lossy(reply.body())),
        None => info!("command completed without payload"),
    }
    Ok(())
}

async fn run_consume(
    settings: &Settings,
    dsn: Option<String>,
    queue: String,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let context =
        factory(settings, dsn)?.create_context(&settings.application.name, settings.route_table());
    let consumer = context.create_consumer(&context.create_queue(queue));

    let mut subscription = context.create_subscription_consumer();
    let handled = std::sync::Mutex::new(0usize);
    subscription.subscribe(
        &consumer,
        callback(move |message, consumer| {
            println!(
                "{} [{}] {}",
                message.command().unwrap_or("-"),
                message.processor().unwrap_or("-"),
                String::from_utf8_lossy(message.body())
            );
            if let Err(e) = consumer.acknowledge(message) {
                error!("acknowledge failed: {e}");
            }
            let mut count = handled.lock().unwrap_or_else(|e| e.into_inner());
            *count += 1;
            ConsumeFlow::from(limit.is_none_or(|limit| *count < limit))
        }),
    )?;

    let shutdown = subscription.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Stopping consumer.");
            shutdown.cancel();
        }
    });

    subscription.consume(Duration::from_secs(30)).await?;
    info!("consumer stopped");
    Ok(())
}
