use std::io::{self, Write};

use anyhow::{anyhow, Context, Result};
use jamf::{
    DeviceSummary, Directory, EnrollmentSummary, JamfClient, MoveReport, PreloadId, PreloadRecord,
    PrestageId, UpsertOutcome,
};
use tracing::info;

use crate::config::{Command, Config, PreloadArgs, PreloadCommand};

pub async fn run(config: &Config) -> Result<()> {
    let credential = config.credential()?;
    info!("using Jamf Pro at {}", credential.base_url);
    let client = JamfClient::new(credential, config.client_options())
        .context("Failed to set up the Jamf client")?;
    let yes = config.yes;

    match &config.command {
        Command::Lookup { query } => lookup(&client, query).await,
        Command::Remove {
            serial,
            prestage_id,
        } => remove(&client, yes, serial, *prestage_id).await,
        Command::Add { serial, prestage } => add(&client, yes, serial, prestage).await,
        Command::Move {
            serial,
            prestage,
            from,
        } => move_device(&client, yes, serial, prestage, *from).await,
        Command::Replace {
            serial,
            prestage_id,
        } => replace(&client, yes, serial, *prestage_id).await,
        Command::Preload { action } => match action {
            PreloadCommand::Show { serial } => show_preload(&client, serial).await,
            PreloadCommand::Set(args) => set_preload(&client, yes, args).await,
        },
        Command::Prestages => prestages(&client).await,
        Command::Buildings => buildings(&client).await,
    }
}

async fn lookup(client: &JamfClient, query: &str) -> Result<()> {
    match client.lookup(query).await {
        Ok(summary) => {
            println!("{}", render_summary(&summary).join("\n"));
            Ok(())
        }
        Err(jamf::Error::NotFound { .. }) => lookup_enrollments(client, query).await,
        Err(e) => Err(e).with_context(|| format!("Lookup of {:?} failed", query)),
    }
}

async fn lookup_enrollments(client: &JamfClient, query: &str) -> Result<()> {
    info!("{:?} is not in inventory, searching device enrollments", query);
    let summaries = client
        .lookup_enrollments(query)
        .await
        .with_context(|| format!("Lookup of {:?} failed", query))?;

    println!("Not in inventory yet. Device enrollment lists:");
    for summary in &summaries {
        println!();
        println!("{}", render_enrollment(summary, client.directory()).join("\n"));
    }
    Ok(())
}

async fn remove(client: &JamfClient, yes: bool, serial: &str, prestage: PrestageId) -> Result<()> {
    if !confirm(yes, &format!("Remove {} from prestage {}?", serial, prestage))? {
        return Ok(());
    }
    client
        .remove(serial, prestage)
        .await
        .with_context(|| format!("Error removing {} from prestage {}", serial, prestage))?;
    println!("{} removed from prestage {}", serial, prestage);
    Ok(())
}

async fn add(client: &JamfClient, yes: bool, serial: &str, prestage: &str) -> Result<()> {
    if !confirm(yes, &format!("Add {} to {}?", serial, prestage))? {
        return Ok(());
    }
    let id = client
        .add(serial, prestage)
        .await
        .with_context(|| format!("Error adding {} to prestage {}", serial, prestage))?;
    println!("{} added to prestage {} ({})", serial, id, prestage);
    Ok(())
}

async fn move_device(
    client: &JamfClient,
    yes: bool,
    serial: &str,
    prestage: &str,
    from: Option<PrestageId>,
) -> Result<()> {
    let from = match from {
        Some(id) => Some(id),
        None => {
            client
                .get_membership(serial)
                .await
                .with_context(|| format!("Could not read the current prestage of {}", serial))?
                .prestage_id
        }
    };

    let prompt = match from {
        Some(current) => format!("Move {} from prestage {} to {}?", serial, current, prestage),
        None => format!("{} is in no prestage. Add it to {}?", serial, prestage),
    };
    if !confirm(yes, &prompt)? {
        return Ok(());
    }

    let report = client.move_device(serial, from, prestage).await?;
    println!("{}", render_move(&report, client.directory()).join("\n"));

    if report.is_complete() {
        Ok(())
    } else if report.is_partial() {
        Err(anyhow!(
            "{} left its old prestage but is in no prestage now; \
             run `add {} {:?}` to finish the move",
            serial,
            serial,
            prestage
        ))
    } else {
        Err(anyhow!("move of {} did not complete", serial))
    }
}

async fn replace(client: &JamfClient, yes: bool, serial: &str, prestage: PrestageId) -> Result<()> {
    let prompt = format!(
        "Replace the entire scope of prestage {} with {} alone? \
         Every other computer leaves the prestage.",
        prestage, serial
    );
    if !confirm(yes, &prompt)? {
        return Ok(());
    }
    client
        .replace(serial, prestage)
        .await
        .with_context(|| format!("Error replacing scope of prestage {}", prestage))?;
    println!("prestage {} now scopes only {}", prestage, serial);
    Ok(())
}

async fn show_preload(client: &JamfClient, serial: &str) -> Result<()> {
    let record = client
        .get_preload(serial)
        .await
        .with_context(|| format!("Could not read the preload record of {}", serial))?;
    println!("{}", render_preload(&record).join("\n"));
    Ok(())
}

async fn set_preload(client: &JamfClient, yes: bool, args: &PreloadArgs) -> Result<()> {
    if let Some(building) = &args.building {
        let buildings = client.list_buildings().await.context("Could not list buildings")?;
        if !buildings.iter().any(|b| b.name.eq_ignore_ascii_case(building)) {
            return Err(anyhow!(
                "unknown building {:?}; see `buildings` for valid names",
                building
            ));
        }
    }

    let existing = client
        .get_preload(&args.serial)
        .await
        .with_context(|| format!("Could not read the preload record of {}", args.serial))?;
    let record = overlay(existing, args);

    let prompt = match &record.id {
        Some(id) => format!("Update preload record {} for {}?", id, record.serial_number),
        None => format!("Create a preload record for {}?", record.serial_number),
    };
    if !confirm(yes, &prompt)? {
        return Ok(());
    }

    match client.upsert_preload(&record).await? {
        UpsertOutcome::Updated(id) => println!("preload record {} updated", id),
        UpsertOutcome::Created(Some(id)) => println!("preload record {} created", id),
        UpsertOutcome::Created(None) => println!("preload record created"),
    }

    if args.sync_inventory {
        sync_inventory(client, &record).await?;
    }
    Ok(())
}

async fn sync_inventory(client: &JamfClient, record: &PreloadRecord) -> Result<()> {
    let serial = &record.serial_number;
    let device = match client.locate(serial).await {
        Ok(device) if device.serial_number.eq_ignore_ascii_case(serial) => device,
        Ok(_) | Err(jamf::Error::NotFound { .. }) => {
            println!("{} is not in inventory yet, nothing to sync", serial);
            return Ok(());
        }
        Err(e) => {
            return Err(e).context("Preload saved, but the computer could not be looked up")
        }
    };

    client
        .sync_inventory(device.id, record)
        .await
        .with_context(|| format!("Preload saved, but syncing computer {} failed", device.id))?;
    println!("inventory of computer {} ({}) updated", device.id, device.name);
    Ok(())
}

async fn prestages(client: &JamfClient) -> Result<()> {
    let remote = client.list_prestages().await.context("Could not list prestages")?;
    for p in &remote {
        match p.version_lock {
            Some(lock) => println!("{:>4}  {}  (version lock {})", p.id, p.display_name, lock),
            None => println!("{:>4}  {}", p.id, p.display_name),
        }
    }

    let drift = client.directory().drift(&remote);
    if drift.is_empty() {
        println!("local prestage directory matches the instance");
    }
    for d in drift {
        println!("drift: {}", d);
    }
    Ok(())
}

async fn buildings(client: &JamfClient) -> Result<()> {
    for b in client.list_buildings().await.context("Could not list buildings")? {
        println!("{:>4}  {}", b.id, b.name);
    }
    Ok(())
}

fn confirm(assume_yes: bool, prompt: &str) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    let confirmed = matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes");
    if !confirmed {
        info!("cancelled");
    }
    Ok(confirmed)
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

fn prestage_label(id: PrestageId, name: Option<&str>) -> String {
    format!("Prestage:    {} ({})", id, name.unwrap_or("not in local directory"))
}

fn render_summary(summary: &DeviceSummary) -> Vec<String> {
    let device = &summary.device;
    let mut lines = vec![
        format!("Computer:    {}", device.name),
        format!("Serial:      {}", device.serial_number),
        format!("Asset tag:   {}", or_dash(device.asset_tag.as_deref())),
        format!("Jamf ID:     {}", device.id),
    ];

    if let Some(id) = summary.membership.prestage_id {
        lines.push(prestage_label(id, summary.membership.prestage_name.as_deref()));
    }

    lines.push(String::new());
    lines.extend(render_preload(&summary.preload));
    lines
}

fn render_enrollment(summary: &EnrollmentSummary, directory: &Directory) -> Vec<String> {
    let device = &summary.device;
    let enrollment = match &device.enrollment_name {
        Some(name) => format!("{} ({})", name, device.enrollment_id),
        None => device.enrollment_id.clone(),
    };
    let mut lines = vec![
        format!("Serial:      {}", device.serial_number),
        format!("Model:       {}", or_dash(device.model.as_deref())),
        format!("Enrollment:  {}", enrollment),
    ];

    if let Some(id) = device.prestage_id {
        lines.push(prestage_label(id, directory.id_to_name(id)));
    }

    lines.push(String::new());
    lines.extend(render_preload(&summary.preload));
    lines
}

fn render_preload(record: &PreloadRecord) -> Vec<String> {
    let Some(id) = &record.id else {
        return vec![format!("No preload record for {}", record.serial_number)];
    };
    vec![
        format!("Preload ID:  {}", id),
        format!("  Username:  {}", or_dash(record.username.as_deref())),
        format!("  Email:     {}", or_dash(record.email.as_deref())),
        format!("  Building:  {}", or_dash(record.building.as_deref())),
        format!("  Room:      {}", or_dash(record.room.as_deref())),
        format!("  Asset tag: {}", or_dash(record.asset_tag.as_deref())),
    ]
}

fn render_move(report: &MoveReport, directory: &Directory) -> Vec<String> {
    let serial = &report.serial_number;
    let mut lines = Vec::with_capacity(2);

    match (&report.removal, report.from) {
        (Some(Ok(())), Some(from)) => {
            lines.push(format!("{} removed from prestage {}", serial, from))
        }
        (Some(Err(e)), Some(from)) => {
            lines.push(format!("Error removing {} from prestage {}: {}", serial, from, e))
        }
        _ => lines.push(format!("{} was not in a prestage", serial)),
    }

    let to = report.to;
    let to_name = directory.id_to_name(to).unwrap_or("?");
    match &report.addition {
        Ok(()) => lines.push(format!("{} added to prestage {} ({})", serial, to, to_name)),
        Err(e) => lines.push(format!(
            "Error adding {} to prestage {} ({}): {}",
            serial, to, to_name, e
        )),
    }
    lines
}

/// Fields given on the command line win; everything else keeps what Jamf has.
fn overlay(mut record: PreloadRecord, args: &PreloadArgs) -> PreloadRecord {
    if let Some(id) = &args.id {
        record.id = Some(PreloadId::new(id.clone()));
    }
    record.serial_number = args.serial.clone();

    for (field, value) in [
        (&mut record.username, &args.username),
        (&mut record.email, &args.email),
        (&mut record.building, &args.building),
        (&mut record.room, &args.room),
        (&mut record.asset_tag, &args.asset_tag),
    ] {
        if let Some(value) = value {
            *field = Some(value.clone());
        }
    }
    record
}
