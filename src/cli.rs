use crate::{
    app::{AddRequest, App, ItemEdit},
    config,
    library::TrackedItem,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    ModsList(ModsListOptions),
    ModsShow(u64),
    ModsAdd(AddRequest),
    ModsEdit(u64, ItemEdit),
    ModsRemove(u64),
    UpdatesCheck(Option<u64>),
    UpdatesMark(u64),
    Link(u64),
    FilesList,
    FilesScan,
    FilesDelete(String),
    FilesAutoDetect,
    FilesCleanup,
    RemoteMod(String, u64),
    RemoteFiles(String, u64),
    RemoteTracked,
    Paths,
    Help,
    Version,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ModsListOptions {
    sort: ModSortKey,
    reverse: bool,
    filter: Option<String>,
    updates_only: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ModSortKey {
    #[default]
    Updated,
    Name,
    Id,
    Checked,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (format, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("modwatch v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let app = App::initialize()?;
            run_command(&app, command, format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(OutputFormat, CliCommand)> {
    let (format, tokens) = parse_global_options(args);
    let Some(head) = tokens.first().map(|value| value.as_str()) else {
        return Ok((format, CliCommand::Help));
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let sub = rest.first().map(|value| value.as_str());

    let command = match head {
        "--help" | "-h" | "help" => CliCommand::Help,
        "--version" | "-V" | "version" => CliCommand::Version,
        "mods" => match sub.unwrap_or("list") {
            "list" => CliCommand::ModsList(parse_mods_list(rest.get(1..).unwrap_or(&[]))?),
            "show" => CliCommand::ModsShow(parse_id(rest.get(1))?),
            "add" => {
                let [game, mod_id, file_id, local_file] = rest.get(1..5).unwrap_or(&[]) else {
                    bail!("mods add requires <game> <mod_id> <file_id> <local_file>");
                };
                CliCommand::ModsAdd(AddRequest {
                    game: game.clone(),
                    mod_id: parse_number(mod_id, "mod id")?,
                    file_id: parse_number(file_id, "file id")?,
                    local_file: local_file.clone(),
                })
            }
            "edit" => {
                let id = parse_id(rest.get(1))?;
                CliCommand::ModsEdit(id, parse_edit(rest.get(2..).unwrap_or(&[]))?)
            }
            "remove" | "rm" => CliCommand::ModsRemove(parse_id(rest.get(1))?),
            other => bail!(
                "Unknown mods command: {other} (use 'list', 'show', 'add', 'edit', or 'remove')"
            ),
        },
        "updates" => match sub.unwrap_or("check") {
            "check" => CliCommand::UpdatesCheck(
                rest.get(1)
                    .map(|value| parse_number(value, "id"))
                    .transpose()?,
            ),
            "mark" | "mark-updated" => CliCommand::UpdatesMark(parse_id(rest.get(1))?),
            other => bail!("Unknown updates command: {other} (use 'check' or 'mark')"),
        },
        "link" => CliCommand::Link(parse_id(rest.first())?),
        "files" => match sub.unwrap_or("list") {
            "list" => CliCommand::FilesList,
            "scan" => CliCommand::FilesScan,
            "delete" => {
                let name = rest
                    .get(1)
                    .context("files delete requires a file name")?;
                CliCommand::FilesDelete(name.clone())
            }
            "auto-detect" | "detect" => CliCommand::FilesAutoDetect,
            "cleanup" => CliCommand::FilesCleanup,
            other => bail!(
                "Unknown files command: {other} \
                 (use 'list', 'scan', 'delete', 'auto-detect', or 'cleanup')"
            ),
        },
        "remote" => match sub {
            Some("tracked") => CliCommand::RemoteTracked,
            Some(kind @ ("mod" | "files")) => {
                let [game, mod_id] = rest.get(1..3).unwrap_or(&[]) else {
                    bail!("remote {kind} requires <game> <mod_id>");
                };
                let mod_id = parse_number(mod_id, "mod id")?;
                if kind == "mod" {
                    CliCommand::RemoteMod(game.clone(), mod_id)
                } else {
                    CliCommand::RemoteFiles(game.clone(), mod_id)
                }
            }
            _ => bail!("Unknown remote command (use 'mod', 'files', or 'tracked')"),
        },
        "paths" => CliCommand::Paths,
        other => bail!("Unknown command: {other} (see 'modwatch help')"),
    };
    Ok((format, command))
}

fn parse_global_options(args: &[String]) -> (OutputFormat, Vec<String>) {
    let mut format = OutputFormat::Text;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            if let Some(parsed) = OutputFormat::parse(value) {
                format = parsed;
            }
            continue;
        }
        if arg == "--format" {
            if let Some(parsed) = iter.next().and_then(|value| OutputFormat::parse(value)) {
                format = parsed;
            }
            continue;
        }
        tokens.push(arg.to_string());
    }
    (format, tokens)
}

fn parse_mods_list(args: &[String]) -> Result<ModsListOptions> {
    let mut options = ModsListOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--sort" => {
                let value = iter.next().context("--sort requires a value")?;
                options.sort = parse_sort_key(value)?;
            }
            value if value.starts_with("--sort=") => {
                options.sort = parse_sort_key(value.trim_start_matches("--sort="))?;
            }
            "--reverse" | "-r" => options.reverse = true,
            "--updates" | "-u" => options.updates_only = true,
            "--filter" => {
                let value = iter.next().context("--filter requires a value")?;
                options.filter = Some(value.to_string());
            }
            value if value.starts_with("--filter=") => {
                options.filter = Some(value.trim_start_matches("--filter=").to_string());
            }
            other => bail!("Unknown mods list option: {other}"),
        }
    }
    Ok(options)
}

fn parse_sort_key(value: &str) -> Result<ModSortKey> {
    match value {
        "updated" => Ok(ModSortKey::Updated),
        "name" => Ok(ModSortKey::Name),
        "id" => Ok(ModSortKey::Id),
        "checked" => Ok(ModSortKey::Checked),
        _ => bail!("Unknown sort key: {value}"),
    }
}

fn parse_edit(args: &[String]) -> Result<ItemEdit> {
    let mut edit = ItemEdit::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--local-file" => {
                let value = iter.next().context("--local-file requires a value")?;
                edit.local_file = Some(value.clone());
            }
            "--file-id" => {
                let value = iter.next().context("--file-id requires a value")?;
                edit.file_id = Some(parse_number(value, "file id")?);
            }
            "--version" => {
                edit.version = Some(iter.next().context("--version requires a value")?.clone());
            }
            other => bail!("Unknown mods edit option: {other}"),
        }
    }
    if edit == ItemEdit::default() {
        bail!("mods edit needs at least one of --local-file, --file-id, --version");
    }
    Ok(edit)
}

fn parse_id(value: Option<&String>) -> Result<u64> {
    let value = value.context("missing tracked mod id")?;
    parse_number(value, "id")
}

fn parse_number(value: &str, what: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .with_context(|| format!("invalid {what}: {value}"))
}

fn run_command(app: &App, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::ModsList(options) => list_mods(app, options, format),
        CliCommand::ModsShow(id) => {
            let item = app.item(id)?;
            emit(format, &item, || print_item_details(&item))
        }
        CliCommand::ModsAdd(request) => {
            let item = app.add_item(request)?;
            emit(format, &item, || {
                println!("Tracking #{} {} ({})", item.id, item.display_name(), item.local_file)
            })
        }
        CliCommand::ModsEdit(id, edit) => {
            let item = app.edit_item(id, edit)?;
            emit(format, &item, || print_item_details(&item))
        }
        CliCommand::ModsRemove(id) => {
            app.remove_item(id)?;
            emit(format, &serde_json::json!({ "removed": id }), || {
                println!("Stopped tracking #{id}")
            })
        }
        CliCommand::UpdatesCheck(None) => {
            let report = app.run_update_check()?;
            emit(format, &report, || {
                for update in &report.updates {
                    println!(
                        "#{:<4} {} -> {} ({})",
                        update.item_id,
                        update.version,
                        update.latest_version,
                        update.latest_file_name
                    );
                    println!("      {}", update.download_url);
                }
                println!(
                    "{} update(s); checked {}, skipped {}, failed {} of {}",
                    report.updates.len(),
                    report.checked,
                    report.skipped,
                    report.failed,
                    report.total
                );
            })
        }
        CliCommand::UpdatesCheck(Some(id)) => {
            let update = app.check_one(id)?;
            emit(format, &update, || match &update {
                Some(update) => println!(
                    "#{} {} -> {} ({})\n{}",
                    update.item_id,
                    update.version,
                    update.latest_version,
                    update.latest_file_name,
                    update.download_url
                ),
                None => println!("No updates available"),
            })
        }
        CliCommand::UpdatesMark(id) => {
            let item = app.mark_updated(id)?;
            emit(format, &item, || {
                println!(
                    "#{} now at file {} ({})",
                    item.id, item.file_id, item.local_file
                )
            })
        }
        CliCommand::Link(id) => {
            let url = app.download_url(id)?;
            emit(format, &serde_json::json!({ "id": id, "url": url }), || println!("{url}"))
        }
        CliCommand::FilesList => {
            let local = app.local_files()?;
            emit(format, &local, || {
                for file in &local {
                    let mapped = file
                        .item_id
                        .map(|id| format!("#{id}"))
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{mapped:>5} {size:>10} {name}",
                        size = format_size(file.size_bytes),
                        name = file.filename
                    );
                }
            })
        }
        CliCommand::FilesScan => {
            let summary = app.scan()?;
            emit(format, &summary, || {
                println!("Mods directory: {}", summary.mods_directory.display());
                println!(
                    "{} archive(s): {} tracked, {} untracked",
                    summary.total_files, summary.mapped_files, summary.unmapped_files
                );
                for name in &summary.unmapped_list {
                    println!("  {name}");
                }
            })
        }
        CliCommand::FilesDelete(name) => {
            let path = app.delete_local_file(&name)?;
            emit(format, &serde_json::json!({ "deleted": path }), || {
                println!("Deleted {}", path.display())
            })
        }
        CliCommand::FilesAutoDetect => {
            let report = app.run_auto_detect_sweep()?;
            emit(format, &report, || {
                for promotion in &report.details {
                    println!(
                        "#{} {}: {} -> {}",
                        promotion.item_id,
                        promotion.mod_name,
                        promotion.old_file,
                        promotion.new_file
                    );
                }
                println!("{} mod(s) updated", report.promoted);
            })
        }
        CliCommand::FilesCleanup => {
            let report = app.run_cleanup_sweep()?;
            emit(format, &report, || {
                for removal in &report.details {
                    println!("#{} {} ({})", removal.item_id, removal.mod_name, removal.local_file);
                }
                println!("{} record(s) removed", report.removed);
            })
        }
        CliCommand::RemoteMod(game, mod_id) => {
            let meta = app.remote_mod(&game, mod_id)?;
            emit(format, &meta, || {
                println!(
                    "{} by {} (v{})",
                    meta.name.as_deref().unwrap_or("?"),
                    meta.author.as_deref().unwrap_or("?"),
                    meta.version.as_deref().unwrap_or("?")
                );
                if let Some(summary) = &meta.summary {
                    println!("{summary}");
                }
            })
        }
        CliCommand::RemoteFiles(game, mod_id) => {
            let mut remote = app.remote_files(&game, mod_id)?;
            remote.sort_by_key(|file| std::cmp::Reverse(file.file_id));
            emit(format, &remote, || {
                for file in &remote {
                    println!(
                        "{:>8} {:<12} {:<10} {}",
                        file.file_id,
                        file.category_name.as_deref().unwrap_or("UNKNOWN"),
                        file.version,
                        file.file_name
                    );
                }
            })
        }
        CliCommand::RemoteTracked => {
            let tracked = app.remote_tracked()?;
            emit(format, &tracked, || {
                for entry in &tracked {
                    println!("{} {}", entry.domain_name, entry.mod_id);
                }
            })
        }
        CliCommand::Paths => list_paths(app, format),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce()) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn list_mods(app: &App, options: ModsListOptions, format: OutputFormat) -> Result<()> {
    let mut items = app.items()?;
    if options.updates_only {
        items.retain(|item| item.update_available);
    }
    if let Some(filter) = &options.filter {
        let needle = filter.to_ascii_lowercase();
        items.retain(|item| {
            item.display_name().to_ascii_lowercase().contains(&needle)
                || item.local_file.to_ascii_lowercase().contains(&needle)
        });
    }

    match options.sort {
        ModSortKey::Updated => items.sort_by_key(|item| std::cmp::Reverse(item.updated_at)),
        ModSortKey::Name => items.sort_by_key(|item| item.display_name().to_ascii_lowercase()),
        ModSortKey::Id => items.sort_by_key(|item| item.id),
        ModSortKey::Checked => items.sort_by_key(|item| item.last_checked.unwrap_or(0)),
    }
    if options.reverse {
        items.reverse();
    }

    emit(format, &items, || {
        for item in &items {
            let flag = if item.update_available { "*" } else { " " };
            println!(
                "{id:>4} [{flag}] {checked} {version:<10} {name} ({file})",
                id = item.id,
                checked = format_date_cell(item.last_checked),
                version = item.version.as_deref().unwrap_or("-"),
                name = item.display_name(),
                file = item.local_file
            );
        }
    })
}

fn print_item_details(item: &TrackedItem) {
    println!("#{} {}", item.id, item.display_name());
    println!("  Game:        {}", item.game);
    println!("  Mod / file:  {} / {}", item.mod_id, item.file_id);
    println!("  Local file:  {}", item.local_file);
    println!("  Version:     {}", item.version.as_deref().unwrap_or("-"));
    if let Some(author) = &item.author {
        println!("  Author:      {author}");
    }
    if let Some(size) = item.size_in_bytes {
        println!("  Size:        {}", format_size(size));
    }
    println!("  Checked:     {}", format_date_cell(item.last_checked));
    if let (true, Some(latest)) = (item.update_available, item.latest_file_id) {
        println!(
            "  Update:      file {} v{} ({})",
            latest,
            item.latest_version.as_deref().unwrap_or("?"),
            item.latest_file_name.as_deref().unwrap_or("?")
        );
    }
}

#[derive(Serialize)]
struct PathsOutput {
    mods_dir: Option<String>,
    library: Option<String>,
    data_dir: Option<String>,
    api_key_set: bool,
    error: Option<String>,
}

fn list_paths(app: &App, format: OutputFormat) -> Result<()> {
    let error = app.mods_dir().err().map(|err| err.to_string());
    let output = PathsOutput {
        mods_dir: app
            .config
            .mods_dir
            .as_ref()
            .map(|path| path.display().to_string()),
        library: app
            .library()
            .path()
            .map(|path| path.display().to_string()),
        data_dir: config::base_data_dir()
            .ok()
            .map(|path| path.display().to_string()),
        api_key_set: app.config.api_key.is_some(),
        error,
    };

    emit(format, &output, || {
        println!("Mods dir: {}", output.mods_dir.as_deref().unwrap_or("-"));
        println!("Library: {}", output.library.as_deref().unwrap_or("-"));
        println!("Data dir: {}", output.data_dir.as_deref().unwrap_or("-"));
        println!("API key: {}", if output.api_key_set { "set" } else { "missing" });
        if let Some(error) = &output.error {
            println!("Warning: {error}");
        }
    })
}

fn print_help() {
    println!("modwatch v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  modwatch mods list [--updates] [--sort updated|name|id|checked] [--filter <text>]");
    println!("  modwatch mods show <id>                          Show a tracked mod");
    println!("  modwatch mods add <game> <mod_id> <file_id> <file>  Track a local archive");
    println!("  modwatch mods edit <id> [--local-file f] [--file-id n] [--version v]");
    println!("  modwatch mods remove <id>                        Stop tracking a mod");
    println!("  modwatch updates check [id]                      Check for newer files");
    println!("  modwatch updates mark <id>                       Apply a pending update by hand");
    println!("  modwatch link <id>                               Print the download page link");
    println!("  modwatch files list                              List archives in the mods dir");
    println!("  modwatch files scan                              Count tracked archives");
    println!("  modwatch files delete <name>                     Delete an archive");
    println!("  modwatch files auto-detect                       Promote downloaded updates");
    println!("  modwatch files cleanup                           Forget missing archives");
    println!("  modwatch remote mod|files <game> <mod_id>        Query the catalog");
    println!("  modwatch remote tracked                          List mods tracked on the catalog");
    println!("  modwatch paths                                   Show configured paths");
    println!();
    println!("Global options:");
    println!("  --format <json|text>            Output format");
    println!("  -h, --help                      Show help");
    println!("  -V, --version                   Show version");
    println!();
    println!("Environment:");
    println!(
        "  {}                        Directory holding downloaded archives",
        config::MODS_DIR_ENV
    );
    println!("  {}               Catalog API key", config::API_KEY_ENV);
    println!("  RUST_LOG                        Log filter (default modwatch=info)");
}

fn format_date_cell(value: Option<i64>) -> String {
    value
        .and_then(format_short_date)
        .unwrap_or_else(|| "----------".to_string())
}

fn format_short_date(timestamp: i64) -> Option<String> {
    if timestamp <= 0 {
        return None;
    }
    let date = time::OffsetDateTime::from_unix_timestamp(timestamp).ok()?;
    Some(format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    ))
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
