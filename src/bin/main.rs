// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use cashback_ledger_rs::{
    Engine, LinkId, PaymentMethod, Settings, TransactionId, UserId, WithdrawalId,
    WithdrawalRequest,
};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

/// Cashback Ledger - Replay an operations CSV
///
/// Reads cashback operations from a CSV file and outputs account balances
/// to stdout. Links, transactions and withdrawals are numbered from 1 in
/// the order they are created, and later rows refer to them by that number.
#[derive(Parser, Debug)]
#[command(name = "cashback-ledger")]
#[command(about = "Replays affiliate cashback operations from a CSV", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: command,user,target,amount,detail
    /// Example: cargo run -- operations.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// TOML file overriding rates, merchant domains and the withdrawal minimum
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        },
        None => Settings::default(),
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match replay(Engine::with_settings(settings), BufReader::new(file)) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Error replaying operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_accounts(&engine, std::io::stdout()) {
        error!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `command, user, target, amount, detail`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    command: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    user: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    target: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Register {
        user: UserId,
        phone_number: Option<String>,
    },
    Link {
        user: UserId,
        url: String,
    },
    Click(LinkId),
    Submit {
        user: UserId,
        link: Option<LinkId>,
        price: Decimal,
        product_name: String,
    },
    Approve(TransactionId),
    Reject(TransactionId),
    Delete {
        user: UserId,
        transaction: TransactionId,
    },
    Withdraw {
        user: UserId,
        request: WithdrawalRequest,
    },
    ApproveWithdrawal(WithdrawalId),
    RejectWithdrawal(WithdrawalId),
}

impl CsvRecord {
    /// Converts a CSV record to a command.
    ///
    /// Returns `None` for unknown commands or missing required fields.
    fn into_command(self) -> Option<Command> {
        let detail = self.detail.filter(|d| !d.is_empty());
        let user = self.user.map(UserId);

        match self.command.to_lowercase().as_str() {
            "register" => Some(Command::Register {
                user: user?,
                phone_number: detail,
            }),
            "link" => Some(Command::Link {
                user: user?,
                url: detail?,
            }),
            "click" => Some(Command::Click(LinkId(self.target?))),
            "submit" => Some(Command::Submit {
                user: user?,
                link: self.target.map(LinkId),
                price: self.amount?,
                product_name: detail?,
            }),
            "approve" => Some(Command::Approve(TransactionId(self.target?))),
            "reject" => Some(Command::Reject(TransactionId(self.target?))),
            "delete" => Some(Command::Delete {
                user: user?,
                transaction: TransactionId(self.target?),
            }),
            "withdraw" => {
                // detail is `method:payment details`, e.g. `gcash:09171234567`
                let (method, details) = detail?.split_once(':').map(|(m, d)| {
                    (m.trim().parse::<PaymentMethod>(), d.trim().to_string())
                })?;
                Some(Command::Withdraw {
                    user: user?,
                    request: WithdrawalRequest {
                        amount: self.amount?,
                        payment_method: method.ok()?,
                        payment_details: details,
                    },
                })
            }
            "approve_withdrawal" => Some(Command::ApproveWithdrawal(WithdrawalId(self.target?))),
            "reject_withdrawal" => Some(Command::RejectWithdrawal(WithdrawalId(self.target?))),
            _ => None,
        }
    }
}

fn apply(engine: &Engine, command: Command) -> Result<(), cashback_ledger_rs::LedgerError> {
    match command {
        Command::Register { user, phone_number } => engine.register(user, phone_number),
        Command::Link { user, url } => engine.convert_link(user, &url).map(drop),
        Command::Click(link) => engine.track_click(link).map(drop),
        Command::Submit {
            user,
            link,
            price,
            product_name,
        } => engine
            .submit_transaction(user, link, &product_name, price)
            .map(drop),
        Command::Approve(id) => engine.approve_transaction(id).map(drop),
        Command::Reject(id) => engine.reject_transaction(id).map(drop),
        Command::Delete { user, transaction } => {
            engine.delete_transaction(user, transaction).map(drop)
        }
        Command::Withdraw { user, request } => engine.request_withdrawal(user, request).map(drop),
        Command::ApproveWithdrawal(id) => engine.approve_withdrawal(id).map(drop),
        Command::RejectWithdrawal(id) => engine.reject_withdrawal(id).map(drop),
    }
}

/// Replays operations from a CSV reader into `engine`.
///
/// Rows are streamed, so arbitrarily large files are fine. Malformed rows
/// and refused operations are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `command, user, target, amount, detail`
///
/// ```csv
/// command,user,target,amount,detail
/// register,1,,,09171234567
/// link,1,,,https://shopee.ph/product/1/2
/// click,,1,,
/// submit,1,1,1000,Headphones
/// approve,,1,,
/// withdraw,1,,100,gcash:09171234567
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn replay<R: Read>(engine: Engine, reader: R) -> Result<Engine, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (row, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(row, "skipping malformed row: {}", e);
                continue;
            }
        };

        let Some(command) = record.into_command() else {
            warn!(row, "skipping unrecognised operation");
            continue;
        };
        debug!(row, ?command, "applying");
        if let Err(e) = apply(&engine, command) {
            warn!(row, "operation refused: {}", e);
        }
    }

    Ok(engine)
}

/// Writes account balances to a CSV writer, ordered by user.
///
/// # CSV Format
///
/// Columns: `user, phone_number, balance`
///
/// ```csv
/// user,phone_number,balance
/// 1,09171234567,5.00
/// 2,,0.00
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_accounts<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut users: Vec<UserId> = engine.accounts().map(|account| *account.key()).collect();
    users.sort();
    for user in users {
        if let Some(account) = engine.get_account(&user) {
            wtr.serialize(account.value())?;
        }
    }

    wtr.flush()?;
    Ok(())
}
