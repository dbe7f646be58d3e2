//! visitorctl - command-line client for the visitor gate API
//!
//! Prints API responses as pretty JSON on stdout.
//!
//! ```text
//! visitorctl add "Alice Smith" --phone 555-0100
//! visitorctl otp 4821
//! visitorctl arrive 1
//! ```

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::process::ExitCode;
use visitor_gate::domain::types::{NewVisitor, VisitorId};
use visitor_gate::io::ApiClient;

#[derive(Parser, Debug)]
#[command(name = "visitorctl", version, about = "Command-line client for the visitor gate API")]
struct Args {
    /// Base URL of the visitor gate server
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a visitor (credentials are issued when omitted)
    Add {
        name: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long)]
        qr_token: Option<String>,
        #[arg(long)]
        otp: Option<String>,
    },
    /// List every registered visitor
    List,
    /// Look up a visitor by QR token
    Scan { token: String },
    /// Look up a visitor by one-time passcode
    Otp { otp: String },
    /// Mark a visitor as arrived
    Arrive { id: VisitorId },
    /// First visitor whose name contains the query
    Search { name: String },
    /// Every visitor whose name contains the query
    SearchAll { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let client = ApiClient::new(&args.url)?;

    match args.command {
        Command::Add { name, phone, qr_token, otp } => {
            let mut visitor = NewVisitor::new(&name, &phone);
            visitor.qr_token = qr_token;
            visitor.otp = otp;
            print_json(&client.add_visitor(&visitor).await?)?;
        }
        Command::List => print_json(&client.list_visitors().await?)?,
        Command::Scan { token } => return found(client.scan(&token).await?),
        Command::Otp { otp } => return found(client.validate_otp(&otp).await?),
        Command::Arrive { id } => {
            if !client.mark_arrived(id).await? {
                eprintln!("no visitor with id {id}");
                return Ok(ExitCode::from(2));
            }
            println!("visitor {id} marked as arrived");
        }
        Command::Search { name } => return found(client.search(&name).await?),
        Command::SearchAll { name } => print_json(&client.search_all(&name).await?)?,
    }

    Ok(ExitCode::SUCCESS)
}

/// Print a lookup result; a miss exits with status 2
fn found<T: Serialize>(value: Option<T>) -> anyhow::Result<ExitCode> {
    match value {
        Some(value) => {
            print_json(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("not found");
            Ok(ExitCode::from(2))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
