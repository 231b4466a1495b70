use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::catalog::{DefaultWindow, Page, DEFAULT_ENV_SENSOR};
use crate::error::SessionError;
use crate::time_window::TimeWindow;

#[derive(Parser)]
#[command(name = "sage-dashboard", version, about = "Sage node telemetry and camera dashboard")]
pub struct Cli {
    /// Pretty-print the JSON payload.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Raw series and 1h rolling average for an environmental parameter.
    Environment(EnvironmentArgs),
    /// Rain gauge series, with a 1h rolling sum for rain intensity.
    Rain(RainArgs),
    /// Camera snapshots for a node. Requires the dashboard password.
    Images(ImagesArgs),
    /// Print the stored form of a dashboard password.
    HashPassword(HashPasswordArgs),
}

#[derive(Args)]
pub struct EnvironmentArgs {
    #[arg(long, default_value = "temperature")]
    pub parameter: String,
    #[arg(long, default_value = "W083")]
    pub node: String,
    #[arg(long, default_value = DEFAULT_ENV_SENSOR)]
    pub sensor: String,
    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args)]
pub struct RainArgs {
    #[arg(long, default_value = "rint")]
    pub parameter: String,
    #[arg(long, default_value = "W083")]
    pub node: String,
    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args)]
pub struct ImagesArgs {
    #[arg(long, default_value = "bottom")]
    pub camera: String,
    #[arg(long, default_value = "W083")]
    pub node: String,
    #[arg(long)]
    pub password: String,
    /// Write every decoded image here as PNG.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args)]
pub struct HashPasswordArgs {
    #[arg(long)]
    pub password: String,
}

/// Window bounds; anything left out falls back to the page default.
#[derive(Args, Debug, Default)]
pub struct WindowArgs {
    #[arg(long)]
    pub start_date: Option<NaiveDate>,
    #[arg(long, value_parser = parse_time)]
    pub start_time: Option<NaiveTime>,
    #[arg(long)]
    pub end_date: Option<NaiveDate>,
    #[arg(long, value_parser = parse_time)]
    pub end_time: Option<NaiveTime>,
}

impl WindowArgs {
    pub fn resolve(&self, page: Page) -> Result<TimeWindow, SessionError> {
        let DefaultWindow {
            start_date,
            start_time,
            end_date,
            end_time,
        } = page.default_window();
        Ok(TimeWindow::from_parts(
            self.start_date.unwrap_or(start_date),
            self.start_time.unwrap_or(start_time),
            self.end_date.unwrap_or(end_date),
            self.end_time.unwrap_or(end_time),
        )?)
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| format!("expected HH:MM or HH:MM:SS, got {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_window::normalize;

    #[test]
    fn environment_defaults() {
        let cli = Cli::try_parse_from(["sage-dashboard", "environment"]).expect("parse");
        let Commands::Environment(args) = cli.command else {
            panic!("expected environment command");
        };
        assert_eq!(args.parameter, "temperature");
        assert_eq!(args.node, "W083");
        assert_eq!(args.sensor, "bme680");

        let window = args.window.resolve(Page::Environment).expect("window");
        let day = |d| NaiveDate::from_ymd_opt(2023, 2, d).expect("date");
        assert_eq!(window.start(), normalize(day(20), NaiveTime::default()));
        assert_eq!(window.duration(), chrono::Duration::days(9));
    }

    #[test]
    fn explicit_bounds_override_page_defaults() {
        let cli = Cli::try_parse_from([
            "sage-dashboard",
            "images",
            "--password",
            "pw",
            "--camera",
            "top",
            "--start-time",
            "05:30",
            "--pretty",
        ])
        .expect("parse");
        assert!(cli.pretty);
        let Commands::Images(args) = cli.command else {
            panic!("expected images command");
        };
        assert_eq!(args.camera, "top");
        let window = args.window.resolve(Page::Images).expect("window");
        assert_eq!(window.duration(), chrono::Duration::minutes(210));
    }

    #[test]
    fn inverted_window_is_rejected() {
        let cli = Cli::try_parse_from([
            "sage-dashboard",
            "rain",
            "--start-date",
            "2023-03-02",
        ])
        .expect("parse");
        let Commands::Rain(args) = cli.command else {
            panic!("expected rain command");
        };
        assert!(matches!(
            args.window.resolve(Page::Rain),
            Err(SessionError::Window(_))
        ));
    }

    #[test]
    fn malformed_time_is_a_usage_error() {
        let result = Cli::try_parse_from(["sage-dashboard", "rain", "--end-time", "noonish"]);
        assert!(result.is_err());
    }
}
