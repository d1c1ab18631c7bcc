use crate::{
    catalog::CatalogEntry,
    error::{classify_error_code, explain_error_code, known_error_codes, CryptainerError, Result},
    manager::{BatchReport, CreateRequest},
    paths::AppPaths,
};

use super::{
    output::{self, OutputStatus},
    runtime::{self, CliManager, ConfigLoad},
    Cli, Command,
};

pub(crate) fn run(cli: Cli) -> Result<i32> {
    runtime::init_tracing(cli.debug);
    if let Command::Explain { code } = &cli.command {
        return run_explain(code);
    }

    let paths = AppPaths::from_home()?;
    let config = match runtime::load_config(cli.config.as_deref(), &paths)? {
        ConfigLoad::Loaded(config) => config,
        ConfigLoad::TemplateWritten(path) => {
            stderr_line_ignore_broken_pipe(&format!(
                "wrote config template to {}\nset [volumes] volumes_dir and mount_dir, then run the command again",
                path.display()
            ))?;
            return Ok(0);
        }
    };
    let manager = runtime::manager_for_config(config, &paths)?;

    match cli.command {
        Command::List { json } => run_list(&manager, json),
        Command::Create {
            volume_type,
            size,
            auto_mount,
            use_keepass,
            template,
            generate,
            name,
        } => run_create(
            &manager,
            CreateRequest {
                name,
                type_name: volume_type,
                size,
                auto_mount,
                use_credential_store: use_keepass,
                use_template: template,
                generate,
                passphrase: None,
            },
        ),
        Command::Mount { names } => {
            let report = manager.mount(&names)?;
            report_batch(&report, "mounted")
        }
        Command::Umount { names } => {
            let report = manager.unmount(&names)?;
            report_batch(&report, "unmounted")
        }
        Command::Prune { max_age, delete } => run_prune(&manager, max_age, delete),
        Command::Clean => run_clean(&manager),
        Command::Explain { .. } => Ok(0),
    }
}

/// Formats one diagnostic line, prefixing the target unless the message already names it.
pub(crate) fn render_error(target: Option<&str>, error: &CryptainerError) -> String {
    let code = classify_error_code(error);
    let message = error.to_string();
    match target {
        Some(target) if !message.starts_with(target) => format!("error[{code}]: {target}: {message}"),
        _ => format!("error[{code}]: {message}"),
    }
}

fn run_explain(code: &str) -> Result<i32> {
    let Some(explanation) = explain_error_code(code) else {
        return Err(CryptainerError::InvalidInput(format!(
            "unknown error code `{}`; known codes: {}",
            code.trim(),
            known_error_codes().join(", ")
        )));
    };
    if let Some(code) = stdout_line_or_exit(explanation)? {
        return Ok(code);
    }
    Ok(0)
}

fn run_list(manager: &CliManager, json: bool) -> Result<i32> {
    let catalog = manager.catalog()?;
    if json {
        let rendered = serde_json::to_string_pretty(catalog.entries())?;
        if let Some(code) = stdout_line_or_exit(&rendered)? {
            return Ok(code);
        }
        return Ok(0);
    }

    if catalog.entries().is_empty() {
        stderr_line_ignore_broken_pipe(&format!(
            "no volumes in {}",
            manager.config().volumes_dir.display()
        ))?;
        return Ok(0);
    }
    for entry in catalog.entries() {
        let line = match entry {
            CatalogEntry::Volume(volume) => format!(
                "{} ({}, {})",
                volume.name,
                volume.volume_type,
                if volume.mounted { "mounted" } else { "unmounted" }
            ),
            CatalogEntry::Unrecognized { name, .. } => format!("{name} (unrecognized)"),
        };
        if let Some(code) = stdout_line_or_exit(&line)? {
            return Ok(code);
        }
    }
    Ok(0)
}

fn run_create(manager: &CliManager, request: CreateRequest) -> Result<i32> {
    let auto_mount = request.auto_mount;
    let name = request.name.clone();
    let created = match manager.create(request) {
        Ok(created) => created,
        Err(error) => {
            stderr_line_ignore_broken_pipe(&render_error(Some(&name), &error))?;
            return Ok(1);
        }
    };
    let volume = &created.volume;

    let mut lines = vec![format!(
        "created {} ({}) at {}",
        volume.name,
        volume.volume_type,
        volume.container_path.display()
    )];
    if created.stored {
        lines.push(format!(
            "passphrase stored in KeePass as {}",
            crate::credentials::KeepassStore::entry_path(&volume.name)
        ));
    }
    if let Some(passphrase) = created.generated_passphrase.as_ref() {
        lines.push(passphrase.expose(|value| format!("passphrase: {value}")));
    }
    if auto_mount && created.follow_up_error.is_none() {
        lines.push(format!(
            "mounted {} at {}",
            volume.name,
            volume.mount_path.display()
        ));
    }
    if let Some(count) = created.template_files {
        lines.push(format!("copied {count} template file(s)"));
    }
    for line in &lines {
        if let Some(code) = stdout_line_or_exit(line)? {
            return Ok(code);
        }
    }

    if let Some(error) = created.follow_up_error.as_ref() {
        stderr_line_ignore_broken_pipe(&render_error(Some(&volume.name), error))?;
        return Ok(1);
    }
    Ok(0)
}

fn report_batch(report: &BatchReport, verb: &str) -> Result<i32> {
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(()) => {
                if let Some(code) = stdout_line_or_exit(&format!("{verb} {}", outcome.name))? {
                    return Ok(code);
                }
            }
            Err(error) => {
                stderr_line_ignore_broken_pipe(&render_error(Some(&outcome.name), error))?;
            }
        }
    }
    Ok(if report.all_succeeded() { 0 } else { 1 })
}

fn run_prune(manager: &CliManager, max_age: Option<u64>, delete: bool) -> Result<i32> {
    let report = manager.prune(max_age, delete)?;
    if report.max_age_days == 0 {
        if let Some(code) = stdout_line_or_exit("pruning disabled (prune_max_age = 0)")? {
            return Ok(code);
        }
        return Ok(0);
    }

    for name in &report.skipped_mounted {
        stderr_line_ignore_broken_pipe(&format!("skipping {name}: volume is mounted"))?;
    }
    if report.candidates.is_empty() {
        if let Some(code) = stdout_line_or_exit(&format!(
            "nothing unused for more than {} days",
            report.max_age_days
        ))? {
            return Ok(code);
        }
        return Ok(0);
    }

    for candidate in &report.candidates {
        let action = if report.deleted.contains(&candidate.name) {
            "deleted"
        } else if delete {
            continue;
        } else {
            "would delete"
        };
        let line = format!(
            "{action} {} ({}, unused for {} days)",
            candidate.name, candidate.volume_type, candidate.age_days
        );
        if let Some(code) = stdout_line_or_exit(&line)? {
            return Ok(code);
        }
    }
    if !delete {
        stderr_line_ignore_broken_pipe("dry run; pass --delete to remove these containers")?;
    }
    for failure in &report.failures {
        if let Err(error) = &failure.result {
            stderr_line_ignore_broken_pipe(&render_error(Some(&failure.name), error))?;
        }
    }
    Ok(if report.failures.is_empty() { 0 } else { 1 })
}

fn run_clean(manager: &CliManager) -> Result<i32> {
    let report = manager.clean()?;
    let mut lines = Vec::new();
    lines.extend(report.unmounted.iter().map(|name| format!("unmounted {name}")));
    lines.extend(
        report
            .removed_dirs
            .iter()
            .map(|path| format!("removed {}", path.display())),
    );
    if report.is_noop() {
        lines.push("nothing to clean".to_owned());
    }
    for line in &lines {
        if let Some(code) = stdout_line_or_exit(line)? {
            return Ok(code);
        }
    }
    for name in &report.busy {
        stderr_line_ignore_broken_pipe(&format!("{name}: in use, left mounted"))?;
    }
    for failure in &report.failures {
        if let Err(error) = &failure.result {
            stderr_line_ignore_broken_pipe(&render_error(Some(&failure.name), error))?;
        }
    }
    Ok(if report.failures.is_empty() { 0 } else { 1 })
}

fn stdout_line_or_exit(line: &str) -> Result<Option<i32>> {
    match output::stdout_line(line) {
        Ok(OutputStatus::Written) => Ok(None),
        Ok(OutputStatus::BrokenPipe) => Ok(Some(0)),
        Err(error) => Err(CryptainerError::Io(error)),
    }
}

fn stderr_line_ignore_broken_pipe(line: &str) -> std::io::Result<()> {
    match output::stderr_line(line) {
        Ok(OutputStatus::Written | OutputStatus::BrokenPipe) => Ok(()),
        Err(error) => Err(error),
    }
}
