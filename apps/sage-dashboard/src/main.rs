use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::Path;

use sage_dashboard::auth::hash_password;
use sage_dashboard::catalog::{self, Page};
use sage_dashboard::cli::{Cli, Commands, EnvironmentArgs, ImagesArgs, RainArgs};
use sage_dashboard::config::Config;
use sage_dashboard::images::ImageOutcome;
use sage_dashboard::session::Session;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sage_dashboard=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    if let Commands::HashPassword(args) = &cli.command {
        println!("{}", hash_password(&args.password));
        return Ok(());
    }

    let config = Config::from_env()?;
    tracing::info!(
        endpoint = %config.query_url,
        workers = config.image_workers,
        "sage-dashboard starting"
    );
    let mut session = Session::from_config(&config)?;

    let result = match cli.command {
        Commands::Environment(args) => environment(&mut session, args, cli.pretty),
        Commands::Rain(args) => rain(&mut session, args, cli.pretty),
        Commands::Images(args) => images(&mut session, args, cli.pretty),
        Commands::HashPassword(_) => Ok(()),
    };
    session.end();
    result
}

fn environment(session: &mut Session, args: EnvironmentArgs, pretty: bool) -> Result<()> {
    check_node(&args.node)?;
    if catalog::environment_parameter(&args.parameter).is_none() {
        bail!(
            "unknown environment parameter {:?}; expected one of {}",
            args.parameter,
            keys(catalog::ENVIRONMENT_PARAMETERS.iter().map(|p| p.key))
        );
    }
    let window = args.window.resolve(Page::Environment)?;
    let chart = session.environment(
        &args.parameter,
        &args.node,
        window,
        Some(args.sensor.as_str()),
    )?;
    emit(&chart, pretty)
}

fn rain(session: &mut Session, args: RainArgs, pretty: bool) -> Result<()> {
    check_node(&args.node)?;
    let Some(parameter) = catalog::rain_parameter(&args.parameter) else {
        bail!(
            "unknown rain parameter {:?}; expected one of {}",
            args.parameter,
            keys(catalog::RAIN_PARAMETERS.iter().map(|p| p.key))
        );
    };
    let window = args.window.resolve(Page::Rain)?;
    let chart = session.rain(parameter, &args.node, window)?;
    emit(&chart, pretty)
}

fn images(session: &mut Session, args: ImagesArgs, pretty: bool) -> Result<()> {
    check_node(&args.node)?;
    if catalog::camera(&args.camera).is_none() {
        bail!(
            "unknown camera {:?}; expected one of {}",
            args.camera,
            keys(catalog::CAMERAS.iter().map(|c| c.key))
        );
    }
    if !session.authenticate(&args.password) {
        bail!("incorrect dashboard password");
    }
    let window = args.window.resolve(Page::Images)?;
    let batch = session.images(&args.camera, &args.node, window)?;
    if let Some(dir) = &args.out_dir {
        save_images(dir, &args.camera, &args.node, &batch.outcomes)?;
    }
    if batch.gallery.failures() > 0 {
        tracing::warn!(
            failed = batch.gallery.failures(),
            total = batch.gallery.items.len(),
            "some images could not be loaded"
        );
    }
    emit(&batch.gallery, pretty)
}

fn save_images(dir: &Path, camera: &str, node: &str, outcomes: &[ImageOutcome]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let mut saved = 0usize;
    for (record, result) in outcomes {
        let Ok(decoded) = result else {
            continue;
        };
        let name = format!(
            "{node}_{camera}_{}.png",
            record.timestamp.format("%Y%m%dT%H%M%SZ")
        );
        let path = dir.join(name);
        decoded
            .image
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        saved += 1;
    }
    tracing::info!(saved, dir = %dir.display(), "gallery images written");
    Ok(())
}

fn check_node(node: &str) -> Result<()> {
    if !catalog::is_known_node(node) {
        bail!(
            "unknown node {node:?}; expected one of {}",
            keys(catalog::NODES.iter().copied())
        );
    }
    Ok(())
}

fn keys<'a>(keys: impl Iterator<Item = &'a str>) -> String {
    keys.collect::<Vec<_>>().join(", ")
}

fn emit<T: Serialize>(payload: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(payload)?
    } else {
        serde_json::to_string(payload)?
    };
    println!("{json}");
    Ok(())
}
