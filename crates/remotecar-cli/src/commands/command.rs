//! Command command - run a remote command on a vehicle

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use remotecar_client::{
    Account, ChargingMode, ChargingProfileUpdate, ChargingSettings, CommandStatus, PollInterval,
    PointOfInterest, RemoteCommand, WaitOptions,
};
use tokio_util::sync::CancellationToken;

use crate::output::{CommandRow, OutputContext, OutputFormat};

/// Arguments of the command subcommand
#[derive(Debug, Clone, Args)]
pub struct CommandArgs {
    /// Vehicle identification number
    pub vin: String,

    /// Command name, e.g. light-flash, door-lock, climate-start, charging-settings, send-poi
    pub name: String,

    /// Target state of charge in percent (charging-settings)
    #[arg(long)]
    pub target_soc: Option<u8>,

    /// AC current limit in ampere (charging-settings)
    #[arg(long)]
    pub ac_limit: Option<u16>,

    /// immediate or delayed (charging-profile)
    #[arg(long)]
    pub charging_mode: Option<ChargingMode>,

    /// Precondition the cabin before departure (charging-profile)
    #[arg(long)]
    pub precondition_climate: Option<bool>,

    /// Destination latitude (send-poi)
    #[arg(long, allow_negative_numbers = true)]
    pub latitude: Option<f64>,

    /// Destination longitude (send-poi)
    #[arg(long, allow_negative_numbers = true)]
    pub longitude: Option<f64>,

    /// Destination name shown in the vehicle (send-poi)
    #[arg(long)]
    pub poi_name: Option<String>,

    /// Street and house number (send-poi)
    #[arg(long)]
    pub street: Option<String>,

    /// Postal code (send-poi)
    #[arg(long)]
    pub postal_code: Option<String>,

    /// City (send-poi)
    #[arg(long)]
    pub city: Option<String>,

    /// Country (send-poi)
    #[arg(long)]
    pub country: Option<String>,

    /// Seconds to wait for a final status
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds between status polls
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Return right after submitting
    #[arg(long)]
    pub no_wait: bool,
}

impl CommandArgs {
    /// Remote command described by the name and value flags
    pub fn remote_command(&self) -> Result<RemoteCommand> {
        let command: RemoteCommand = self.name.parse().with_context(|| {
            format!(
                "Valid commands are: {}",
                RemoteCommand::NAMES.join(", ")
            )
        })?;

        let given = [
            (
                "charging-settings",
                "--target-soc and --ac-limit",
                self.target_soc.is_some() || self.ac_limit.is_some(),
            ),
            (
                "charging-profile",
                "--charging-mode and --precondition-climate",
                self.charging_mode.is_some() || self.precondition_climate.is_some(),
            ),
            ("send-poi", "Destination flags", self.has_destination()),
        ];
        for (owner, flags, set) in given {
            if set && owner != command.name() {
                bail!("{} only apply to {}", flags, owner);
            }
        }

        match command {
            RemoteCommand::ChargingSettings(_) => {
                Ok(RemoteCommand::ChargingSettings(ChargingSettings {
                    target_soc: self.target_soc,
                    ac_limit: self.ac_limit,
                }))
            }
            RemoteCommand::ChargingProfile(_) => {
                Ok(RemoteCommand::ChargingProfile(ChargingProfileUpdate {
                    charging_mode: self.charging_mode,
                    precondition_climate: self.precondition_climate,
                }))
            }
            RemoteCommand::SendPoi(_) => {
                let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
                    bail!("send-poi needs --latitude and --longitude");
                };
                let mut poi = PointOfInterest::new(latitude, longitude);
                poi.name = self.poi_name.clone();
                poi.street = self.street.clone();
                poi.postal_code = self.postal_code.clone();
                poi.city = self.city.clone();
                poi.country = self.country.clone();
                Ok(RemoteCommand::SendPoi(poi))
            }
            other => Ok(other),
        }
    }

    fn has_destination(&self) -> bool {
        self.latitude.is_some()
            || self.longitude.is_some()
            || self.poi_name.is_some()
            || self.street.is_some()
            || self.postal_code.is_some()
            || self.city.is_some()
            || self.country.is_some()
    }

    /// Wait options with the flags applied over `defaults`
    pub fn wait_options(&self, defaults: WaitOptions) -> WaitOptions {
        let mut options = defaults;
        if let Some(secs) = self.timeout {
            options.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.poll_interval {
            options.poll_interval =
                PollInterval::Fixed(Duration::from_secs(secs.max(1)));
        }
        options
    }
}

/// Submit a remote command and, unless `--no-wait`, follow it to a final status
pub async fn command(
    account: &Account,
    args: &CommandArgs,
    cancel: &CancellationToken,
    ctx: &OutputContext,
) -> Result<()> {
    let command = args.remote_command()?;
    let vehicle = account.vehicle(&args.vin, cancel).await?;
    let remote = account.remote();

    let mut event = remote
        .submit(&vehicle, &command, cancel)
        .await
        .with_context(|| format!("Failed to submit {}", command))?;

    if !args.no_wait && !event.is_terminal() {
        let options = args.wait_options(remote.default_wait_options());
        let spinner = (ctx.format == OutputFormat::Table && !ctx.quiet).then(|| spinner(&command));

        ctx.info("Press Ctrl+C to stop waiting");
        let waited = remote.wait_event(&mut event, &options, cancel).await;
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        waited?;
    }

    if let (RemoteCommand::VehicleFinder, CommandStatus::Executed, Some(event_id)) =
        (&command, &event.status, &event.event_id)
    {
        event.position = remote
            .event_position(event_id, event.brand, cancel)
            .await
            .context("Failed to fetch the vehicle position")?;
        if event.position.is_none() {
            ctx.warn("No vehicle position; pass --observer-latitude and --observer-longitude to locate the vehicle");
        }
    }

    ctx.print(&[CommandRow::from(&event)], &event);
    match event.status {
        CommandStatus::Executed => ctx.success(&format!("{} executed", command)),
        CommandStatus::Error => ctx.error(&format!("{} failed on the vehicle", command)),
        CommandStatus::Ignored => ctx.warn(&format!(
            "{} ignored, the vehicle's charging state does not allow it",
            command
        )),
        _ => ctx.warn(&format!(
            "{} submitted, final status not awaited",
            command
        )),
    }
    Ok(())
}

fn spinner(command: &RemoteCommand) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} ({elapsed})") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Waiting for {}", command));
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: CommandArgs,
    }

    fn parse(argv: &[&str]) -> CommandArgs {
        let mut full = vec!["remotecar", "WBA00000000000001"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_charging_values_are_applied() {
        let args = parse(&["charging-settings", "--target-soc", "80"]);

        assert_eq!(
            args.remote_command().unwrap(),
            RemoteCommand::ChargingSettings(ChargingSettings {
                target_soc: Some(80),
                ac_limit: None,
            })
        );
    }

    #[test]
    fn test_values_rejected_for_other_commands() {
        assert!(parse(&["door-lock", "--ac-limit", "16"]).remote_command().is_err());
        assert!(parse(&["charging-settings", "--charging-mode", "delayed"])
            .remote_command()
            .is_err());
        assert!(parse(&["horn", "--city", "Munich"]).remote_command().is_err());
        assert!(parse(&["teleport"]).remote_command().is_err());
    }

    #[test]
    fn test_send_poi_flags() {
        let args = parse(&[
            "send-poi",
            "--latitude",
            "-33.86",
            "--longitude",
            "151.21",
            "--poi-name",
            "Opera",
            "--city",
            "Sydney",
        ]);

        let RemoteCommand::SendPoi(poi) = args.remote_command().unwrap() else {
            panic!("expected send-poi");
        };
        assert_eq!(poi.position.latitude, -33.86);
        assert_eq!(poi.title(), "Opera");
        assert_eq!(poi.formatted_address(), "Sydney");

        assert!(parse(&["send-poi", "--latitude", "1.0"]).remote_command().is_err());
    }

    #[test]
    fn test_charging_profile_flags() {
        let args = parse(&[
            "charging-profile",
            "--charging-mode",
            "immediate",
            "--precondition-climate",
            "true",
        ]);
        assert_eq!(
            args.remote_command().unwrap(),
            RemoteCommand::ChargingProfile(ChargingProfileUpdate {
                charging_mode: Some(ChargingMode::Immediate),
                precondition_climate: Some(true),
            })
        );
    }

    #[test]
    fn test_wait_flags_override_defaults() {
        let args = parse(&["horn", "--timeout", "30", "--poll-interval", "5"]);

        let options = args.wait_options(WaitOptions::default());
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(
            options.poll_interval,
            PollInterval::Fixed(Duration::from_secs(5))
        );
    }
}
