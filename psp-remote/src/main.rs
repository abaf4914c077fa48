// psp-remote -- software remote for the Sony PSP, driven over an RS-232
// adapter wired to the console's remote connector.
//
// Usage:
//   psp-remote                                 # /dev/ttyS0, power on CTS
//   psp-remote /dev/ttyUSB0 -v
//   psp-remote --power-line dcd --strict-queue /dev/ttyUSB1
//
// While running, commands are read from stdin, one per line:
//   84 00 02       send command 0x84 with payload "00 02"
//   key 9          report key 9 held (KEYS mask 1 << 9)
//   release        report all keys released
//   quit           close the port and exit
// Ctrl-C also closes the port and exits.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use psplink_core::LinkEvent;
use psplink_protocol::{Command, EngineBuilder, OverflowPolicy, ProtocolEngine};
use psplink_transport::{PowerLine, DEFAULT_BAUD_RATE};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Software remote for the PSP remote port.
#[derive(Parser)]
#[command(name = "psp-remote", version, about)]
struct Cli {
    /// Serial device the remote adapter is plugged into.
    #[arg(default_value = "/dev/ttyS0")]
    device: String,

    /// More log output on stderr (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Serial baud rate.
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Modem status input that reports console power: cts, dcd or dsr.
    #[arg(long, default_value = "cts")]
    power_line: PowerLine,

    /// Refuse new commands when the queue is full instead of dropping the oldest.
    #[arg(long)]
    strict_queue: bool,

    /// Delay between protocol cycles, in milliseconds.
    #[arg(long, default_value_t = 2)]
    poll_ms: u64,
}

// ---------------------------------------------------------------------------
// Stdin commands
// ---------------------------------------------------------------------------

/// One line of operator input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    /// Raw command code and its `"xx xx .. xx"` payload.
    Raw { code: u8, payload: String },
    /// Hold key number `n`.
    Key(u8),
    Release,
    Quit,
    Blank,
}

/// Parse a hex string like "0x84" or "84" into a u8.
fn parse_hex_u8(s: &str) -> std::result::Result<u8, String> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(s, 16).map_err(|e| format!("invalid hex byte: {e}"))
}

fn parse_line(line: &str) -> Result<Input> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Blank);
    }

    let (head, rest) = match line.split_once(' ') {
        Some((head, rest)) => (head, rest.trim_start()),
        None => (line, ""),
    };

    match head.to_ascii_lowercase().as_str() {
        "quit" | "q" => Ok(Input::Quit),
        "release" => Ok(Input::Release),
        "key" => {
            let n: u8 = rest
                .parse()
                .with_context(|| format!("invalid key number '{rest}'"))?;
            if n >= 16 {
                bail!("key number {n} out of range (0-15)");
            }
            Ok(Input::Key(n))
        }
        _ => {
            let code = parse_hex_u8(head).map_err(anyhow::Error::msg)?;
            if rest.is_empty() {
                bail!("command {code:02X} needs a payload, e.g. '{code:02X} 00 00'");
            }
            Ok(Input::Raw {
                code,
                payload: rest.to_string(),
            })
        }
    }
}

/// Apply one line of input. Returns `false` when the operator asked to quit.
fn handle_line(engine: &mut ProtocolEngine, line: &str) -> bool {
    let input = match parse_line(line) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("{e:#}");
            return true;
        }
    };

    let result = match input {
        Input::Blank => Ok(()),
        Input::Quit => return false,
        Input::Release => engine.enqueue_command(Command::keys_released()),
        Input::Key(n) => engine.enqueue_command(Command::keys(1 << n)),
        Input::Raw { code, payload } => engine.enqueue(code, &payload),
    };
    // The engine also publishes the failure as an error event.
    if let Err(e) = result {
        warn!(error = %e, "Command not queued");
    }
    true
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "off",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_event(event: &LinkEvent) {
    if event.is_error() {
        eprintln!("{event}");
    } else {
        println!("{event}");
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let policy = if cli.strict_queue {
        OverflowPolicy::Reject
    } else {
        OverflowPolicy::Overwrite
    };

    let mut engine = EngineBuilder::new()
        .serial_port(&cli.device)
        .baud_rate(cli.baud)
        .power_line(cli.power_line)
        .overflow_policy(policy)
        .build()
        .await
        .with_context(|| format!("cannot open PSP remote port {}", cli.device))?;

    println!(
        "PSP remote on {} ({} baud, power on {:?}). Waiting for the console...",
        cli.device, cli.baud, cli.power_line
    );

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => eprintln!("[warning] missed {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.poll_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_line(&mut engine, &line) {
                        break;
                    }
                }
                // Keep serving the console without operator input.
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },

            _ = ticker.tick() => {
                if let Err(e) = engine.poll().await {
                    error!(error = %e, "Protocol engine stopped");
                    break;
                }
            }
        }
    }

    let closed = engine.close().await;
    // Dropping the engine closes the event channel and ends the printer.
    drop(engine);
    printer.await.ok();
    closed.context("failed to close the serial port")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_raw_command() {
        assert_eq!(
            parse_line("84 00 02").unwrap(),
            Input::Raw {
                code: 0x84,
                payload: "00 02".into()
            }
        );
        assert_eq!(
            parse_line("0x82 01 A8 00 47\n").unwrap(),
            Input::Raw {
                code: 0x82,
                payload: "01 A8 00 47".into()
            }
        );
    }

    #[test]
    fn raw_payload_is_passed_through_unchecked() {
        // Payload validation belongs to the engine.
        assert_eq!(
            parse_line("84 0").unwrap(),
            Input::Raw {
                code: 0x84,
                payload: "0".into()
            }
        );
    }

    #[test]
    fn parse_keys() {
        assert_eq!(parse_line("key 9").unwrap(), Input::Key(9));
        assert_eq!(parse_line("KEY 0").unwrap(), Input::Key(0));
        assert_eq!(parse_line("release").unwrap(), Input::Release);
        assert!(parse_line("key 16").is_err());
        assert!(parse_line("key x").is_err());
    }

    #[test]
    fn parse_control_words() {
        assert_eq!(parse_line("quit").unwrap(), Input::Quit);
        assert_eq!(parse_line("q").unwrap(), Input::Quit);
        assert_eq!(parse_line("   ").unwrap(), Input::Blank);
    }

    #[test]
    fn parse_rejects_bad_code() {
        assert!(parse_line("zz 00").is_err());
        assert!(parse_line("84").is_err());
    }

    #[test]
    fn hex_u8_prefixes() {
        assert_eq!(parse_hex_u8("0x84"), Ok(0x84));
        assert_eq!(parse_hex_u8("0X02"), Ok(0x02));
        assert_eq!(parse_hex_u8("fe"), Ok(0xFE));
        assert!(parse_hex_u8("100").is_err());
    }
}
