mod action;
mod capabilities;
mod error;
mod protocol;
mod scancodes;
mod session;
mod transport;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use rich_rust::markup;
use rich_rust::prelude::*;
use rich_rust::r#box::ROUNDED;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::action::{
    GamepadButton, KeyMode, KeyboardAction, MediaButton, MouseAction, PedalAction, Trigger,
};
use crate::capabilities::Capabilities;
use crate::scancodes::Modifier;
use crate::session::PedalSession;
use crate::transport::{DeviceInfo, UsbTransport};

#[derive(Parser)]
#[command(name = "pedalctl")]
#[command(version)]
#[command(about = "Configure iKKEGOL USB foot pedals")]
#[command(
    long_about = "Read and change the actions of iKKEGOL USB foot pedals.\n\nEach pedal can press a key combination, click or move the mouse, type a short text, send a media key or a gamepad button. Changes are written to the pedal's own memory."
)]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG overrides this
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected pedals
    List,

    /// Show the configuration of every pedal on a device
    Show {
        /// Device id as shown by `pedalctl list`
        device: usize,

        /// Print the configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change the action of one pedal
    Set {
        /// Device id as shown by `pedalctl list`
        device: usize,

        /// Pedal number (starting at 1) or name, e.g. "left"
        pedal: String,

        /// Validate and encode the action without touching the device
        #[arg(long, global = true)]
        dry_run: bool,

        #[command(subcommand)]
        action: ActionCommand,
    },

    /// List the key names accepted by `set ... keyboard`
    Keys,

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Args, Debug)]
struct TriggerArgs {
    /// Trigger when the pedal is released instead of pressed
    #[arg(short, long)]
    invert: bool,
}

#[derive(Subcommand, Debug)]
enum ActionCommand {
    /// Press a key combination, e.g. "lcontrol+s"
    Keyboard {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Send the keys once per press instead of repeating while held
        #[arg(short, long)]
        once: bool,

        /// Key names joined with '+', up to 6 non-modifier keys
        keys: String,
    },

    /// Click mouse buttons ("left+right") or move the pointer (X Y [WHEEL])
    #[command(allow_negative_numbers = true)]
    Mouse {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Buttons joined with '+' (left, right, middle, back, forward), or X movement
        value: String,

        /// Y movement, -100 to 100
        y: Option<i64>,

        /// Wheel movement, -100 to 100
        wheel: Option<i64>,
    },

    /// Type a text of up to 38 characters
    Text {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Words are joined with single spaces
        #[arg(required = true)]
        words: Vec<String>,
    },

    /// Send a multimedia key, e.g. "mute" or "open_calc"
    Media {
        #[command(flatten)]
        trigger: TriggerArgs,

        key: String,
    },

    /// Press a gamepad direction or button
    Gamepad {
        #[command(flatten)]
        trigger: TriggerArgs,

        button: String,
    },
}

fn possible_values<T: Copy>(all: &[T], name: fn(T) -> &'static str) -> String {
    all.iter().map(|v| name(*v)).collect::<Vec<_>>().join(", ")
}

impl ActionCommand {
    /// Build and validate the action. No device access happens here.
    fn build(&self) -> Result<PedalAction> {
        let action = match self {
            ActionCommand::Keyboard { trigger, once, keys } => {
                let mode = if *once { KeyMode::OneShot } else { KeyMode::Standard };
                PedalAction::keyboard(KeyboardAction::parse(mode, keys)?, trigger.trigger())
            }
            ActionCommand::Mouse {
                trigger,
                value,
                y,
                wheel,
            } => {
                let mouse = match y {
                    Some(y) => {
                        let x: i64 = value
                            .parse()
                            .map_err(|_| anyhow!("Invalid mouse X value {}", value))?;
                        MouseAction::axis(x, *y, wheel.unwrap_or(0))?
                    }
                    None if value.parse::<i64>().is_ok() => {
                        bail!("Mouse movement needs both X and Y values")
                    }
                    None => MouseAction::parse_buttons(value)?,
                };
                PedalAction::mouse(mouse, trigger.trigger())
            }
            ActionCommand::Text { trigger, words } => {
                PedalAction::text(&words.join(" "), trigger.trigger())
            }
            ActionCommand::Media { trigger, key } => {
                let button: MediaButton = key.parse().map_err(|e| {
                    anyhow!(
                        "{}. Possible values: {}",
                        e,
                        possible_values(MediaButton::ALL, MediaButton::name)
                    )
                })?;
                PedalAction::media(button, trigger.trigger())
            }
            ActionCommand::Gamepad { trigger, button } => {
                let button: GamepadButton = button.parse().map_err(|e| {
                    anyhow!(
                        "{}. Possible values: {}",
                        e,
                        possible_values(GamepadButton::ALL, GamepadButton::name)
                    )
                })?;
                PedalAction::gamepad(button, trigger.trigger())
            }
        };
        action.validate()?;
        Ok(action)
    }
}

impl TriggerArgs {
    fn trigger(&self) -> Trigger {
        Trigger::from_inverted(self.invert)
    }
}

/// Resolve a pedal given as a 1-based number or a name.
fn resolve_pedal(capabilities: &Capabilities, pedal: &str) -> Result<usize> {
    let index = match pedal.parse::<usize>() {
        Ok(number) if (1..=capabilities.pedal_count).contains(&number) => Some(number - 1),
        Ok(_) => None,
        Err(_) => capabilities.find_pedal(pedal),
    };

    index.ok_or_else(|| {
        let mut values: Vec<String> = (1..=capabilities.pedal_count)
            .map(|n| n.to_string())
            .collect();
        values.extend(capabilities.pedal_names.iter().map(|n| n.to_string()));
        anyhow!(
            "Invalid pedal '{}'. Possible values: {}",
            pedal,
            values.join(", ")
        )
    })
}

/// Escape user or device supplied text for console markup.
fn escape(text: &str) -> String {
    text.replace('[', "\\[")
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "pedalctl=warn",
        1 => "pedalctl=debug",
        _ => "pedalctl=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Serialize)]
struct DeviceReport<'a> {
    id: usize,
    model: Option<&'a str>,
    version: Option<&'a str>,
    pedals: Vec<PedalReport<'a>>,
}

#[derive(Serialize)]
struct PedalReport<'a> {
    pedal: usize,
    name: Option<&'static str>,
    action: Option<&'a PedalAction>,
}

struct PedalCtl {
    console: Console,
}

impl PedalCtl {
    fn new() -> Self {
        Self {
            console: Console::new(),
        }
    }

    fn discover(&self) -> Result<Vec<DeviceInfo>> {
        DeviceInfo::discover().context("Failed to list USB devices via libusb (try running with sudo)")
    }

    fn open_session(&self, device: usize) -> Result<PedalSession<UsbTransport>> {
        let devices = self.discover()?;
        let info = device
            .checked_sub(1)
            .and_then(|index| devices.get(index))
            .ok_or_else(|| {
                anyhow!(
                    "No device with id {} ({} pedal(s) found, see `pedalctl list`)",
                    device,
                    devices.len()
                )
            })?;

        let session = PedalSession::open(info.id, info.open());
        if !session.is_valid() {
            let reason = session
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            bail!("Device {} is not accessible: {}", device, reason);
        }
        Ok(session)
    }

    fn list(&self) -> Result<()> {
        let devices = self.discover()?;

        if devices.is_empty() {
            self.console
                .print("[bold #e74c3c]✗[/] No foot pedals found. Make sure the pedal is connected via USB.");
            return Ok(());
        }

        let mut table = Table::new()
            .box_style(&ROUNDED)
            .header_style(Style::parse("bold #f1c40f").unwrap_or_default())
            .border_style(Style::parse("#3498db").unwrap_or_default())
            .with_column(Column::new("Id"))
            .with_column(Column::new("Location"))
            .with_column(Column::new("Model"))
            .with_column(Column::new("Version"))
            .with_column(Column::new("Pedals"))
            .with_column(Column::new("Status"));

        for info in &devices {
            let session = PedalSession::open(info.id, info.open());
            let status = match session.last_error() {
                Some(e) => format!("[bold #e74c3c]{}[/]", escape(&e.to_string())),
                None if !session.is_valid() => {
                    format!("[bold #e74c3c]{:?}[/]", session.state())
                }
                None if !session.is_identified() => {
                    "[bold #f39c12]did not identify[/]".to_string()
                }
                None => "[bold #2ecc71]ok[/]".to_string(),
            };
            table.add_row_cells([
                markup::render_or_plain(&info.id.to_string()),
                markup::render_or_plain(&format!("Bus {:03} Device {:03}", info.bus, info.address)),
                markup::render_or_plain(&escape(session.model().unwrap_or("-"))),
                markup::render_or_plain(&escape(session.version().unwrap_or("-"))),
                markup::render_or_plain(&session.pedal_count().to_string()),
                markup::render_or_plain(&status),
            ]);
        }

        self.console.print_renderable(&table);
        Ok(())
    }

    fn show(&self, device: usize, json: bool) -> Result<()> {
        let mut session = self.open_session(device)?;
        session
            .load()
            .context("Failed to read the pedal configuration")?;

        let capabilities = *session.capabilities();
        let mut pedals = Vec::with_capacity(capabilities.pedal_count);
        for index in 0..capabilities.pedal_count {
            pedals.push(PedalReport {
                pedal: index + 1,
                name: capabilities.pedal_name(index),
                action: session.configuration(index)?,
            });
        }

        if json {
            let report = DeviceReport {
                id: device,
                model: session.model(),
                version: session.version(),
                pedals,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        self.console.print(&format!(
            "[bold #3498db]Device {}[/]  [#95a5a6]{} {}[/]",
            device,
            escape(session.model().unwrap_or("unknown model")),
            escape(&session.version().map(|v| format!("v{v}")).unwrap_or_default()),
        ));

        if !session.is_identified() {
            self.console.print(
                "[#f39c12]The device did not report its model; showing a single pedal.[/]",
            );
        }

        let mut table = Table::new()
            .box_style(&ROUNDED)
            .header_style(Style::parse("bold #f1c40f").unwrap_or_default())
            .border_style(Style::parse("#3498db").unwrap_or_default())
            .with_column(Column::new("Pedal"))
            .with_column(Column::new("Name"))
            .with_column(Column::new("Type"))
            .with_column(Column::new("Action"))
            .with_column(Column::new("Trigger"));

        for report in &pedals {
            let (kind, summary, trigger) = match report.action {
                Some(action) => (
                    format!("[bold #2ecc71]{}[/]", action.type_name()),
                    escape(&action.summary()),
                    action.trigger.to_string(),
                ),
                None => (
                    "[dim]-[/]".to_string(),
                    "[dim]not configured[/]".to_string(),
                    String::new(),
                ),
            };
            table.add_row_cells([
                markup::render_or_plain(&report.pedal.to_string()),
                markup::render_or_plain(report.name.unwrap_or("")),
                markup::render_or_plain(&kind),
                markup::render_or_plain(&summary),
                markup::render_or_plain(&trigger),
            ]);
        }

        self.console.print_renderable(&table);
        Ok(())
    }

    fn set(&self, device: usize, pedal: &str, action: PedalAction) -> Result<()> {
        let mut session = self.open_session(device)?;
        let index = resolve_pedal(session.capabilities(), pedal)?;

        session
            .load()
            .context("Failed to read the pedal configuration")?;
        session.set_configuration(index, action.clone())?;
        session
            .save()
            .context("Failed to write the pedal configuration")?;
        session.close();

        self.console.print(&format!(
            "[bold #2ecc71]✓[/] Pedal [bold]{}[/] on device {} set to [bold #f1c40f]{}[/]",
            escape(&session.capabilities().pedal_label(index)),
            device,
            escape(&action.to_string())
        ));
        Ok(())
    }

    fn keys(&self) {
        let mut table = Table::new()
            .box_style(&ROUNDED)
            .header_style(Style::parse("bold #f1c40f").unwrap_or_default())
            .border_style(Style::parse("#9b59b6").unwrap_or_default())
            .with_column(Column::new("Modifier"))
            .with_column(Column::new("Description"));
        for modifier in Modifier::ALL {
            table.add_row_cells([
                markup::render_or_plain(&format!("[bold #2ecc71]{}[/]", modifier.name())),
                markup::render_or_plain(modifier.description()),
            ]);
        }
        self.console.print_renderable(&table);
        self.console.print("");

        self.console.print("[bold #9b59b6]Keys[/]");
        let names: Vec<String> = scancodes::key_names().map(escape).collect();
        for line in names.chunks(12) {
            self.console.print(&format!("  {}", line.join(", ")));
        }
        self.console.print("");
        self.console
            .print("[#95a5a6]Combine keys with '+', e.g.[/] [bold #f1c40f]lcontrol+lshift+s[/]");
    }

    fn dry_run(&self, pedal: &str, action: &PedalAction) -> Result<()> {
        let packet = protocol::encode(action)?;

        self.console.print(&format!(
            "[bold #f39c12]Dry run[/] [#95a5a6](no device access)[/]: pedal [bold]{}[/] → [bold #f1c40f]{}[/]",
            escape(pedal),
            escape(&action.to_string())
        ));
        self.console.print(&format!(
            "  [#95a5a6]type 0x{:02X}, size {}, trigger byte {}[/]",
            packet.kind(),
            packet.size(),
            protocol::trigger_to_byte(action.trigger)
        ));
        for (i, page) in packet.pages().enumerate() {
            self.console
                .print(&format!("  [dim]page {}[/]  {}", i + 1, hex::encode(page)));
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let pedalctl = PedalCtl::new();

    match cli.command {
        Commands::List => {
            pedalctl.list()?;
        }
        Commands::Show { device, json } => {
            pedalctl.show(device, json)?;
        }
        Commands::Set {
            device,
            pedal,
            dry_run,
            action,
        } => {
            let action = action.build()?;
            if dry_run {
                pedalctl.dry_run(&pedal, &action)?;
            } else {
                pedalctl.set(device, &pedal, action)?;
            }
        }
        Commands::Keys => {
            pedalctl.keys();
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pedalctl", &mut std::io::stdout());
        }
    }

    Ok(())
}
